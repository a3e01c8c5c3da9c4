// tests/pipeline_run.rs
//
// Whole-run scenarios with scripted collaborators: ScriptedOracle for every
// oracle call, StaticLinkChecker instead of the live web, MemoryLedgerStore
// and RecordingSink for delivery.

use std::sync::Arc;

use chrono::NaiveDate;

use competitor_radar::evidence::GroundedProvider;
use competitor_radar::ledger::{MemoryLedgerStore, SeenHistory};
use competitor_radar::notify::RecordingSink;
use competitor_radar::oracle::ScriptedOracle;
use competitor_radar::pipeline::{self, RunContext};
use competitor_radar::probe::StaticLinkChecker;
use competitor_radar::report::UpdateItem;
use competitor_radar::{RadarConfig, WeeklyReport};

const CFG: &str = r#"
[report]
categories = ["CAT-A", "CAT-B"]
top_highlights = 3

[coverage]
min_domestic_companies = 1
max_collect_retries = 0
overseas_min_items = 1
overseas_max_items = 3

[provider]
api_key = "test-key"

[[watchlist]]
name = "Acme"
category = "CAT-A"
country = "South Korea"
homepage = "https://acme.example/"

[[watchlist]]
name = "Beta"
category = "CAT-B"
country = "Korea"

[[watchlist]]
name = "Delta"
category = "CAT-B"
country = "KR"

[[watchlist]]
name = "Globex"
category = "CAT-A"
country = "United States"
"#;

const EVIDENCE: &str = r#"{"sources": [
    {"company": "Acme", "category": "CAT-A", "title": "Acme raises $10M Series A", "url": "https://acme.example/news/1?utm_source=feed"},
    {"company": "Beta", "category": "CAT-B", "title": "Beta launches new AMR", "url": "https://beta.example/p/2"},
    {"company": "Globex", "category": "CAT-A", "title": "Globex expands to Europe", "url": "https://globex.example/a"},
    {"company": "Delta", "category": "CAT-B", "title": "Delta signs partnership", "url": "https://delta.example/seen"}
]}"#;

const COMPOSED: &str = r#"Here is the report:
```json
{
  "report_date": "2026-01-14",
  "top_highlights": [
    {"company": "Acme", "category": "CAT-A", "title": "Acme 투자 유치", "insight": "시리즈 A", "importance": 5, "link": "https://acme.example/news/1"}
  ],
  "category_updates": {
    "CAT-A": [
      {"company": "Globex", "tag": "해외진출", "title": "Globex 유럽 진출", "url": "https://globex.example/a"},
      {"company": "Ghost", "tag": "Update", "title": "made up", "url": "https://ghost.example/1"}
    ],
    "CAT-B": [
      {"company": "Beta", "tag": "출시", "title": "Beta 신제품 출시", "url": "https://beta.example/p/2"},
      {"company": "Delta", "tag": "제휴", "title": "Delta 제휴", "url": "https://delta.example/seen"}
    ],
    "Bogus": []
  },
  "action_items": ["Acme 투자 동향 확인"]
}
```"#;

fn date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 1, 14).unwrap()
}

fn config() -> RadarConfig {
    RadarConfig::from_toml_str(CFG).unwrap()
}

/// Last week already delivered Delta's article.
fn last_week() -> SeenHistory {
    let mut r = WeeklyReport::default();
    r.category_updates.insert(
        "CAT-B".into(),
        vec![UpdateItem {
            company: "Delta".into(),
            url: Some("https://delta.example/seen".into()),
            ..Default::default()
        }],
    );
    let mut h = SeenHistory::default();
    h.add("2026-W02", &r);
    h
}

async fn assemble(oracle: &ScriptedOracle, checker: &StaticLinkChecker, seen: &SeenHistory) -> pipeline::AssembledReport {
    let cfg = config();
    let provider = GroundedProvider::new(Arc::new(oracle.clone()));
    let ctx = RunContext {
        config: &cfg,
        oracle: Arc::new(oracle.clone()),
        provider: &provider,
        links: checker,
    };
    pipeline::run(&ctx, date(), seen).await.expect("run")
}

#[tokio::test]
async fn full_run_applies_every_stage() {
    let oracle = ScriptedOracle::new();
    oracle.push_text(EVIDENCE).push_text(COMPOSED);
    let checker = StaticLinkChecker::new().status("https://beta.example/p/2", 404);

    let out = assemble(&oracle, &checker, &last_week()).await;
    let r = &out.report;

    // evidence + compose only: every company is known from config
    assert_eq!(oracle.prompts().len(), 2);
    assert_eq!(oracle.remaining(), 0);

    assert_eq!(r.report_date, "2026-01-14");
    assert_eq!(r.week_number, 3);
    let keys: Vec<_> = r.category_updates.keys().cloned().collect();
    assert_eq!(keys, vec!["CAT-A", "CAT-B"]);

    // Globex moved abroad, Acme filled from evidence with an inferred tag
    let a = &r.category_updates["CAT-A"];
    assert_eq!(a.len(), 1);
    assert_eq!(a[0].company, "Acme");
    assert_eq!(a[0].tag, "투자");
    assert_eq!(r.overseas_updates.len(), 1);
    assert_eq!(r.overseas_updates[0].update.company, "Globex");
    assert_eq!(r.overseas_updates[0].country.as_deref(), Some("United States"));
    assert_eq!(r.overseas_updates[0].category.as_deref(), Some("CAT-A"));

    // Beta's link is dead, Delta was delivered last week
    assert!(r.category_updates["CAT-B"].is_empty());

    // the highlight and the filled update cite the same story
    assert_eq!(r.top_highlights.len(), 1);
    assert_eq!(r.top_highlights[0].link.as_deref(), Some("https://acme.example/news/1"));
    assert_eq!(a[0].url.as_deref(), Some("https://acme.example/news/1?utm_source=feed"));
    assert_eq!(r.company_homepages["Acme"], "https://acme.example/");

    let c = &out.counters;
    assert_eq!(c.sources_collected, 4);
    assert!(!c.schema_repaired);
    assert_eq!(c.categories_dropped, 1);
    assert_eq!(c.off_evidence_removed, 1);
    assert_eq!(c.moved_overseas, 1);
    assert_eq!(c.filled_domestic, 1);
    assert_eq!(c.backfill_rounds, 0);
    assert_eq!(c.urls_dropped, 1);
    assert_eq!(c.items_deduped, 1);
    assert_eq!(out.meta.provider, "grounded");
}

#[tokio::test]
async fn short_categories_and_thin_overseas_trigger_backfill() {
    let oracle = ScriptedOracle::new();
    oracle
        .push_text(r#"{"sources": [{"company": "Acme", "category": "CAT-A", "title": "Acme opens plant", "url": "https://acme.example/news/7"}]}"#)
        .push_text(r#"{"report_date": "2026-01-14", "category_updates": {}}"#)
        .push_text(r#"{"sources": [{"company": "Zeta", "category": "CAT-B", "title": "Zeta hires new CTO", "url": "https://zeta.example/cto"}]}"#)
        .push_text(r#"{"sources": [{"company": "Far", "category": "CAT-A", "title": "Far acquires Near", "url": "https://far.example/deal", "country": "Japan"}]}"#);

    let out = assemble(&oracle, &StaticLinkChecker::new(), &SeenHistory::default()).await;
    let r = &out.report;
    let prompts = oracle.prompts();
    assert_eq!(prompts.len(), 4);
    assert!(prompts[2].contains("Only these categories matter now: CAT-B"));
    assert!(prompts[3].contains("OUTSIDE Korea"));

    assert_eq!(r.category_updates["CAT-A"][0].company, "Acme");
    let b = &r.category_updates["CAT-B"];
    assert_eq!(b.len(), 1);
    assert_eq!(b[0].company, "Zeta");
    assert_eq!(b[0].tag, "인사");
    assert_eq!(r.overseas_updates.len(), 1);
    assert_eq!(r.overseas_updates[0].update.tag, "M&A");
    assert_eq!(r.overseas_updates[0].country.as_deref(), Some("Japan"));

    assert_eq!(out.counters.backfill_rounds, 2);
    assert_eq!(out.counters.filled_domestic, 2);
    assert_eq!(out.counters.filled_overseas, 1);
    assert_eq!(out.evidence.len(), 3);
}

#[tokio::test]
async fn unstructured_compose_reply_spends_one_repair_call() {
    let oracle = ScriptedOracle::new();
    oracle
        .push_text(EVIDENCE)
        .push_text("Sorry, I could not format that. Acme did well this week.")
        .push_text(r#"{"report_date": "2026-01-14", "category_updates": {"CAT-A": [], "CAT-B": []}}"#);

    let out = assemble(&oracle, &StaticLinkChecker::new(), &SeenHistory::default()).await;
    assert!(out.counters.schema_repaired);
    assert_eq!(oracle.prompts().len(), 3);
    // report still gets the evidence-backed items
    assert!(out.report.update_count() >= 3);
    assert_eq!(out.report.overseas_updates.len(), 1);
}

#[tokio::test]
async fn failing_repair_aborts_the_run() {
    let oracle = ScriptedOracle::new();
    oracle.push_text(EVIDENCE).push_text("not json").push_text("still not json");
    let cfg = config();
    let provider = GroundedProvider::new(Arc::new(oracle.clone()));
    let checker = StaticLinkChecker::new();
    let ctx = RunContext {
        config: &cfg,
        oracle: Arc::new(oracle.clone()),
        provider: &provider,
        links: &checker,
    };
    assert!(pipeline::run(&ctx, date(), &SeenHistory::default()).await.is_err());
}

#[tokio::test]
async fn failed_collection_aborts_the_run() {
    let oracle = ScriptedOracle::new();
    oracle.push_error("quota exceeded");
    let cfg = config();
    let provider = GroundedProvider::new(Arc::new(oracle.clone()));
    let checker = StaticLinkChecker::new();
    let ctx = RunContext {
        config: &cfg,
        oracle: Arc::new(oracle.clone()),
        provider: &provider,
        links: &checker,
    };
    let err = pipeline::run(&ctx, date(), &SeenHistory::default()).await.unwrap_err();
    assert!(format!("{err:#}").contains("collecting evidence"));
}

#[tokio::test]
async fn delivery_commits_ledger_only_when_sent() {
    let oracle = ScriptedOracle::new();
    oracle.push_text(EVIDENCE).push_text(COMPOSED);
    let history = last_week();
    let out = assemble(&oracle, &StaticLinkChecker::new(), &history).await;

    // dry run: nothing sent, nothing saved
    let sink = RecordingSink::new();
    let store = MemoryLedgerStore::with(history.clone());
    let sent = pipeline::deliver_and_commit(&out, &sink, &store, history.clone(), date(), 8, true)
        .await
        .unwrap();
    assert!(!sent);
    assert_eq!(sink.count(), 0);
    assert_eq!(store.save_count(), 0);

    // failed send: ledger untouched
    let failing = RecordingSink::failing();
    let res = pipeline::deliver_and_commit(&out, &failing, &store, history.clone(), date(), 8, false).await;
    assert!(res.is_err());
    assert_eq!(store.save_count(), 0);

    // success: this week's canonical URLs recorded next to last week's
    let sent = pipeline::deliver_and_commit(&out, &sink, &store, history, date(), 8, false)
        .await
        .unwrap();
    assert!(sent);
    assert_eq!(sink.count(), 1);
    assert_eq!(store.save_count(), 1);
    let saved = store.snapshot().unwrap();
    let this_week = saved.get("2026-W03");
    assert!(this_week.contains("https://acme.example/news/1"));
    assert!(this_week.contains("https://globex.example/a"));
    assert!(saved.get("2026-W02").contains("https://delta.example/seen"));
}

#[tokio::test]
async fn second_run_of_the_week_drops_already_delivered_items() {
    let oracle = ScriptedOracle::new();
    oracle.push_text(EVIDENCE).push_text(COMPOSED);
    let first = assemble(&oracle, &StaticLinkChecker::new(), &SeenHistory::default()).await;
    let mut history = SeenHistory::default();
    history.add("2026-W03", &first.report);

    let oracle = ScriptedOracle::new();
    oracle.push_text(EVIDENCE).push_text(COMPOSED);
    let second = assemble(&oracle, &StaticLinkChecker::new(), &history).await;
    assert_eq!(second.report.item_urls().len(), 0);
    assert_eq!(second.counters.items_deduped, first.report.item_urls().len());
}
