// src/ledger.rs
//! Weekly dedup ledger: canonical URLs already delivered, keyed by ISO week.
//!
//! Loaded once at run start, committed once after a successful delivery.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::report::WeeklyReport;
use crate::url_norm::normalize_url;

pub const LEDGER_VERSION: u32 = 1;

fn default_version() -> u32 {
    LEDGER_VERSION
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct WeekEntry {
    #[serde(default)]
    pub urls: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SeenHistory {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub weeks: BTreeMap<String, WeekEntry>,
}

impl Default for SeenHistory {
    fn default() -> Self {
        Self {
            version: LEDGER_VERSION,
            weeks: BTreeMap::new(),
        }
    }
}

impl SeenHistory {
    /// Canonical URLs delivered in `week_key` (empty if unseen).
    pub fn get(&self, week_key: &str) -> BTreeSet<String> {
        self.weeks
            .get(week_key)
            .map(|w| w.urls.iter().map(|u| normalize_url(u)).collect())
            .unwrap_or_default()
    }

    /// Union over every retained week.
    pub fn recent_urls(&self) -> BTreeSet<String> {
        self.weeks
            .values()
            .flat_map(|w| w.urls.iter().map(|u| normalize_url(u)))
            .collect()
    }

    /// Unions the canonical item URLs of `report` into `week_key` and stamps
    /// the update time.
    pub fn add(&mut self, week_key: &str, report: &WeeklyReport) {
        let entry = self.weeks.entry(week_key.to_string()).or_default();
        entry
            .urls
            .extend(report.item_urls().iter().map(|u| normalize_url(u)));
        entry.updated_at = Some(Utc::now());
    }

    /// Keeps the `keep` lexicographically greatest week keys.
    pub fn prune(&mut self, keep: usize) -> usize {
        let excess = self.weeks.len().saturating_sub(keep);
        let old: Vec<String> = self.weeks.keys().take(excess).cloned().collect();
        for k in &old {
            self.weeks.remove(k);
        }
        old.len()
    }
}

/// Removes every report item whose canonical link is in `seen`. Items
/// without a link are kept. Returns the number removed.
pub fn filter(report: &mut WeeklyReport, seen: &BTreeSet<String>) -> usize {
    let is_seen = |link: &Option<String>| {
        link.as_deref()
            .is_some_and(|u| seen.contains(&normalize_url(u)))
    };
    let mut removed = 0usize;
    let mut count = |before: usize, after: usize| removed += before - after;

    let before = report.top_highlights.len();
    report.top_highlights.retain(|h| !is_seen(&h.link));
    count(before, report.top_highlights.len());

    for items in report.category_updates.values_mut() {
        let before = items.len();
        items.retain(|u| !is_seen(&u.url));
        count(before, items.len());
    }

    let before = report.overseas_updates.len();
    report.overseas_updates.retain(|o| !is_seen(&o.update.url));
    count(before, report.overseas_updates.len());

    let before = report.hiring_signals.len();
    report.hiring_signals.retain(|h| !is_seen(&h.url));
    count(before, report.hiring_signals.len());

    removed
}

#[async_trait::async_trait]
pub trait LedgerStore: Send + Sync {
    /// Absent or unreadable state loads as an empty history.
    async fn load(&self) -> SeenHistory;
    async fn save(&self, history: &SeenHistory) -> Result<()>;
}

/// JSON file on local disk, written via temp file + rename.
pub struct FileLedgerStore {
    path: PathBuf,
}

impl FileLedgerStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait::async_trait]
impl LedgerStore for FileLedgerStore {
    async fn load(&self) -> SeenHistory {
        let data = match tokio::fs::read_to_string(&self.path).await {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return SeenHistory::default(),
            Err(e) => {
                tracing::warn!(target: "ledger", error = ?e, path = %self.path.display(), "ledger unreadable; starting empty");
                return SeenHistory::default();
            }
        };
        match serde_json::from_str::<SeenHistory>(&data) {
            Ok(h) => h,
            Err(e) => {
                tracing::warn!(target: "ledger", error = %e, path = %self.path.display(), "ledger corrupt; starting empty");
                SeenHistory::default()
            }
        }
    }

    async fn save(&self, history: &SeenHistory) -> Result<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("creating ledger dir {}", dir.display()))?;
        }
        let json = serde_json::to_string_pretty(history).context("serializing ledger")?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .with_context(|| format!("writing {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("replacing {}", self.path.display()))?;
        tracing::info!(target: "ledger", weeks = history.weeks.len(), path = %self.path.display(), "ledger saved");
        Ok(())
    }
}

// --- Test helper ---
#[derive(Default)]
pub struct MemoryLedgerStore {
    pub state: std::sync::Mutex<Option<SeenHistory>>,
    pub saves: std::sync::atomic::AtomicUsize,
}

impl MemoryLedgerStore {
    pub fn with(history: SeenHistory) -> Self {
        Self {
            state: std::sync::Mutex::new(Some(history)),
            saves: Default::default(),
        }
    }

    pub fn snapshot(&self) -> Option<SeenHistory> {
        self.state.lock().ok().and_then(|s| s.clone())
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn load(&self) -> SeenHistory {
        self.snapshot().unwrap_or_default()
    }

    async fn save(&self, history: &SeenHistory) -> Result<()> {
        if let Ok(mut s) = self.state.lock() {
            *s = Some(history.clone());
        }
        self.saves.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::{Highlight, UpdateItem};

    fn history(json: &str) -> SeenHistory {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn highlight_with_tracking_params_is_filtered() {
        let h = history(r#"{"weeks":{"2026-W03":{"urls":["https://a.example/x"]}}}"#);
        assert_eq!(h.version, LEDGER_VERSION);
        let mut r = WeeklyReport::default();
        r.top_highlights.push(Highlight {
            company: "A".into(),
            link: Some("https://a.example/x?utm_source=x".into()),
            ..Default::default()
        });
        r.top_highlights.push(Highlight {
            company: "B".into(),
            link: None,
            ..Default::default()
        });
        let removed = filter(&mut r, &h.get("2026-W03"));
        assert_eq!(removed, 1);
        assert_eq!(r.top_highlights.len(), 1);
        assert_eq!(r.top_highlights[0].company, "B");
    }

    #[test]
    fn unseen_week_is_empty() {
        assert!(SeenHistory::default().get("2026-W01").is_empty());
    }

    #[test]
    fn add_unions_canonical_urls() {
        let mut h = SeenHistory::default();
        let mut r = WeeklyReport::default();
        r.category_updates.insert(
            "CAT-A".into(),
            vec![UpdateItem {
                url: Some("https://a.example/y/#frag".into()),
                ..Default::default()
            }],
        );
        h.add("2026-W04", &r);
        h.add("2026-W04", &r);
        let w = &h.weeks["2026-W04"];
        assert_eq!(w.urls.len(), 1);
        assert!(w.urls.contains("https://a.example/y"));
        assert!(w.updated_at.is_some());
    }

    #[test]
    fn prune_keeps_latest_keys() {
        let mut h = history(
            r#"{"weeks":{"2026-W01":{"urls":[]},"2025-W52":{"urls":[]},"2026-W02":{"urls":[]}}}"#,
        );
        assert_eq!(h.prune(2), 1);
        let keys: Vec<_> = h.weeks.keys().cloned().collect();
        assert_eq!(keys, vec!["2026-W01", "2026-W02"]);
        assert_eq!(h.prune(5), 0);
    }

    #[tokio::test]
    async fn file_store_round_trip_and_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("seen.json");
        let store = FileLedgerStore::new(&path);
        assert_eq!(store.load().await, SeenHistory::default());

        let mut h = SeenHistory::default();
        h.weeks.insert("2026-W03".into(), WeekEntry::default());
        store.save(&h).await.unwrap();
        assert_eq!(store.load().await.weeks.len(), 1);
        assert!(!path.with_extension("json.tmp").exists());

        std::fs::write(&path, "{not json").unwrap();
        assert_eq!(store.load().await, SeenHistory::default());
    }
}
