// src/evidence/mod.rs
//! Evidence collection: providers that produce the vetted `SourceItem` list
//! every later stage is held to.

pub mod discovery;
pub mod grounded;
pub mod news_search;

use std::collections::{BTreeMap, BTreeSet};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use metrics::counter;
use serde::Serialize;

use crate::config::RadarConfig;
use crate::fill::company_key;
use crate::origin::is_domestic_label;
use crate::report::{dedup_sources, ingest_sources, SourceItem};

pub use grounded::GroundedProvider;
pub use news_search::{NewsSearchProvider, SerperNewsClient, StaticNewsSearch};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CollectionMeta {
    pub provider: String,
    pub attempts: usize,
    pub queries: usize,
    pub results: usize,
    pub dropped_invalid: usize,
    pub dropped_stale: usize,
    /// Categories still short when collection was accepted.
    pub short_categories: Vec<String>,
}

#[async_trait]
pub trait EvidenceProvider: Send + Sync {
    async fn collect(
        &self,
        config: &RadarConfig,
        report_date: NaiveDate,
    ) -> Result<(Vec<SourceItem>, CollectionMeta)>;
    fn name(&self) -> &'static str;
}

/// Per-category coverage of an evidence list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Coverage {
    /// No company at all.
    pub missing: Vec<String>,
    /// Some companies, but fewer distinct domestic ones than required.
    pub short: Vec<String>,
}

impl Coverage {
    pub fn is_satisfied(&self) -> bool {
        self.missing.is_empty() && self.short.is_empty()
    }

    /// Missing and short together, sorted.
    pub fn lacking(&self) -> Vec<String> {
        let mut all: Vec<String> = self.missing.iter().chain(&self.short).cloned().collect();
        all.sort();
        all.dedup();
        all
    }
}

/// Domestic unless the item or its watchlist entry names a foreign country.
pub fn is_domestic_item(item: &SourceItem, config: &RadarConfig) -> bool {
    let country = item
        .country
        .as_deref()
        .or_else(|| config.watch_company(&item.company).and_then(|w| w.country.as_deref()));
    country.map_or(true, is_domestic_label)
}

pub fn evaluate_coverage(items: &[SourceItem], config: &RadarConfig) -> Coverage {
    let mut all: BTreeMap<&str, BTreeSet<String>> = BTreeMap::new();
    let mut domestic: BTreeMap<&str, BTreeSet<String>> = BTreeMap::new();
    for it in items {
        all.entry(it.category.as_str())
            .or_default()
            .insert(company_key(&it.company));
        if is_domestic_item(it, config) {
            domestic
                .entry(it.category.as_str())
                .or_default()
                .insert(company_key(&it.company));
        }
    }
    let min = config.coverage.min_domestic_companies;
    let mut cov = Coverage::default();
    for cat in &config.report.categories {
        let total = all.get(cat.as_str()).map_or(0, BTreeSet::len);
        let dom = domestic.get(cat.as_str()).map_or(0, BTreeSet::len);
        if total == 0 {
            cov.missing.push(cat.clone());
        } else if dom < min {
            cov.short.push(cat.clone());
        }
    }
    cov
}

/// Counts from one `vet` pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VetStats {
    pub invalid: usize,
    pub stale: usize,
}

/// Ingestion gate for every provider: absolute http(s) URLs only, known
/// categories only (watchlist category as fallback), publish date inside
/// the lookback window when known, deduplicated by canonical URL. Fills
/// `country` from the watchlist when the provider left it empty.
pub fn vet(raw: Vec<SourceItem>, config: &RadarConfig, report_date: NaiveDate) -> (Vec<SourceItem>, VetStats) {
    let (items, invalid) = ingest_sources(raw);
    let categories: BTreeSet<&str> = config.report.categories.iter().map(String::as_str).collect();
    let oldest = report_date - Duration::days(config.report.lookback_days);
    let mut stats = VetStats {
        invalid,
        stale: 0,
    };

    let mut kept = Vec::with_capacity(items.len());
    for mut it in items {
        let watch = config.watch_company(&it.company);
        if !categories.contains(it.category.trim()) {
            match watch {
                Some(w) => it.category = w.category.clone(),
                None => {
                    stats.invalid += 1;
                    continue;
                }
            }
        } else {
            it.category = it.category.trim().to_string();
        }
        if it.published_at.is_some_and(|d| d < oldest) {
            stats.stale += 1;
            continue;
        }
        if it.country.is_none() {
            it.country = watch.and_then(|w| w.country.clone());
        }
        kept.push(it);
    }
    let kept = dedup_sources(kept);
    counter!("radar_sources_collected_total").increment(kept.len() as u64);
    if stats.invalid > 0 || stats.stale > 0 {
        tracing::debug!(target: "evidence", invalid = stats.invalid, stale = stats.stale, "evidence items dropped at ingestion");
    }
    (kept, stats)
}

/// Appends `more` to `base`, skipping URLs already present.
pub fn union_sources(base: Vec<SourceItem>, more: Vec<SourceItem>) -> Vec<SourceItem> {
    let mut all = base;
    all.extend(more);
    dedup_sources(all)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CFG: &str = r#"
[report]
categories = ["CAT-A", "CAT-B"]
lookback_days = 7
[coverage]
min_domestic_companies = 2
[provider]
api_key = "k"
[[watchlist]]
name = "Far"
category = "CAT-A"
country = "Japan"
[[watchlist]]
name = "Near"
category = "CAT-B"
"#;

    fn item(company: &str, category: &str, url: &str) -> SourceItem {
        SourceItem {
            company: company.into(),
            category: category.into(),
            title: format!("{company} news"),
            url: url.into(),
            published_at: None,
            quote: None,
            note: None,
            country: None,
        }
    }

    #[test]
    fn coverage_separates_missing_and_short() {
        let cfg = RadarConfig::from_toml_str(CFG).unwrap();
        let items = vec![
            item("Far", "CAT-A", "https://far.example/1"),
            item("Local", "CAT-A", "https://local.example/1"),
        ];
        let cov = evaluate_coverage(&items, &cfg);
        assert_eq!(cov.missing, vec!["CAT-B".to_string()]);
        assert_eq!(cov.short, vec!["CAT-A".to_string()]);
        assert!(!cov.is_satisfied());
        assert_eq!(cov.lacking(), vec!["CAT-A".to_string(), "CAT-B".to_string()]);
    }

    #[test]
    fn vet_applies_lookback_category_and_country() {
        let cfg = RadarConfig::from_toml_str(CFG).unwrap();
        let today = NaiveDate::from_ymd_opt(2026, 1, 20).unwrap();
        let mut old = item("Near", "CAT-B", "https://near.example/old");
        old.published_at = NaiveDate::from_ymd_opt(2026, 1, 2);
        let mut fresh = item("Near", "CAT-B", "https://near.example/new");
        fresh.published_at = NaiveDate::from_ymd_opt(2026, 1, 15);
        let raw = vec![
            old,
            fresh,
            item("Far", "Robots", "https://far.example/1"),
            item("Stranger", "Robots", "https://s.example/1"),
            item("Near", "CAT-B", "/relative"),
            item("Near", "CAT-B", "https://near.example/new?utm_source=x"),
        ];
        let (kept, stats) = vet(raw, &cfg, today);
        let urls: Vec<_> = kept.iter().map(|i| i.url.as_str()).collect();
        assert_eq!(urls, vec!["https://near.example/new", "https://far.example/1"]);
        assert_eq!(kept[1].category, "CAT-A");
        assert_eq!(kept[1].country.as_deref(), Some("Japan"));
        assert_eq!(stats, VetStats { invalid: 2, stale: 1 });
    }
}
