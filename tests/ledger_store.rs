// tests/ledger_store.rs
use competitor_radar::ledger::{FileLedgerStore, LedgerStore, SeenHistory};
use competitor_radar::report::{HiringSignal, UpdateItem};
use competitor_radar::WeeklyReport;

fn report(urls: &[&str]) -> WeeklyReport {
    let mut r = WeeklyReport::default();
    r.category_updates.insert(
        "CAT-A".into(),
        urls.iter()
            .map(|u| UpdateItem {
                company: "Acme".into(),
                url: Some(u.to_string()),
                ..Default::default()
            })
            .collect(),
    );
    r.hiring_signals.push(HiringSignal {
        company: "Acme".into(),
        ..Default::default()
    });
    r
}

#[tokio::test]
async fn saved_history_loads_back_and_prunes_oldest_weeks() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state").join("seen_history.json");
    let store = FileLedgerStore::new(&path);

    let mut h = store.load().await;
    assert!(h.weeks.is_empty());
    for (week, url) in [
        ("2026-W01", "https://a.example/1"),
        ("2026-W02", "https://a.example/2"),
        ("2026-W03", "https://a.example/3?utm_source=rss"),
    ] {
        h.add(week, &report(&[url]));
    }
    assert_eq!(h.prune(2), 1);
    store.save(&h).await.unwrap();
    assert!(!path.with_extension("json.tmp").exists());

    let loaded = store.load().await;
    let weeks: Vec<_> = loaded.weeks.keys().cloned().collect();
    assert_eq!(weeks, vec!["2026-W02", "2026-W03"]);
    assert!(loaded.get("2026-W03").contains("https://a.example/3"));
    assert!(!loaded.recent_urls().contains("https://a.example/1"));
}

#[tokio::test]
async fn corrupt_file_loads_as_empty() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("seen_history.json");
    std::fs::write(&path, "{ not json").unwrap();
    let h = FileLedgerStore::new(&path).load().await;
    assert_eq!(h, SeenHistory::default());
}

#[tokio::test]
async fn ledger_filter_keeps_linkless_items() {
    let mut seen = SeenHistory::default();
    seen.add("2026-W03", &report(&["https://a.example/1"]));
    let mut r = report(&["https://a.example/1/", "https://a.example/9"]);
    let removed = competitor_radar::ledger::filter(&mut r, &seen.recent_urls());
    assert_eq!(removed, 1);
    assert_eq!(r.category_updates["CAT-A"].len(), 1);
    assert_eq!(r.hiring_signals.len(), 1);
}
