// src/evidence/grounded.rs
//! Provider A: the oracle runs its own web search and returns a source list.
//!
//! Coverage is enforced by a bounded retry loop. Each retry repeats the base
//! prompt with a stricter instruction block naming the categories that are
//! still short and a higher total-source target.

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use metrics::counter;

use super::{evaluate_coverage, union_sources, vet, CollectionMeta, Coverage, EvidenceProvider};
use crate::config::RadarConfig;
use crate::oracle::{ask, DynOracle, Oracle};
use crate::report::SourceItem;
use crate::schema::parse_source_list;

const SOURCE_SHAPE: &str = r#"{"sources": [{"company": "...", "category": "...", "title": "...", "url": "https://...", "published_at": "YYYY-MM-DD", "quote": "short verbatim quote", "note": "one line", "country": "HQ country"}]}"#;

pub struct GroundedProvider {
    oracle: DynOracle,
}

impl GroundedProvider {
    pub fn new(oracle: DynOracle) -> Self {
        Self { oracle }
    }
}

/// Retry loop states. `Accepted` is terminal.
#[derive(Debug)]
enum CollectState {
    Collecting { attempt: usize, extra: Option<String> },
    Evaluating { attempt: usize },
    Retrying { attempt: usize, coverage: Coverage },
    Accepted { coverage: Coverage },
}

#[async_trait]
impl EvidenceProvider for GroundedProvider {
    async fn collect(
        &self,
        config: &RadarConfig,
        report_date: NaiveDate,
    ) -> Result<(Vec<SourceItem>, CollectionMeta)> {
        let base = base_prompt(config, report_date, &config.report.categories);
        let mut meta = CollectionMeta {
            provider: self.name().to_string(),
            ..Default::default()
        };
        let mut items: Vec<SourceItem> = Vec::new();
        let mut failures = 0usize;
        let mut state = CollectState::Collecting {
            attempt: 0,
            extra: None,
        };

        let coverage = loop {
            state = match state {
                CollectState::Collecting { attempt, extra } => {
                    let prompt = match &extra {
                        Some(block) => format!("{base}\n\n{block}"),
                        None => base.clone(),
                    };
                    meta.attempts += 1;
                    meta.queries += 1;
                    match request_sources(self.oracle.as_ref(), "evidence", &prompt, report_date).await {
                        Ok(raw) => {
                            meta.results += raw.len();
                            let (fresh, stats) = vet(raw, config, report_date);
                            meta.dropped_invalid += stats.invalid;
                            meta.dropped_stale += stats.stale;
                            items = union_sources(items, fresh);
                        }
                        Err(e) => {
                            failures += 1;
                            tracing::warn!(target: "evidence", attempt, error = ?e, "evidence attempt produced nothing usable");
                        }
                    }
                    CollectState::Evaluating { attempt }
                }
                CollectState::Evaluating { attempt } => {
                    let coverage = evaluate_coverage(&items, config);
                    if coverage.is_satisfied() || attempt >= config.coverage.max_collect_retries {
                        CollectState::Accepted { coverage }
                    } else {
                        CollectState::Retrying { attempt, coverage }
                    }
                }
                CollectState::Retrying { attempt, coverage } => {
                    let next = attempt + 1;
                    tracing::info!(
                        target: "evidence",
                        attempt = next,
                        missing = ?coverage.missing,
                        short = ?coverage.short,
                        sources = items.len(),
                        "coverage short; retrying collection"
                    );
                    CollectState::Collecting {
                        attempt: next,
                        extra: Some(escalation_block(next, &coverage, config)),
                    }
                }
                CollectState::Accepted { coverage } => break coverage,
            };
        };

        if items.is_empty() && failures == meta.attempts {
            bail!("evidence collection failed on all {} attempts", meta.attempts);
        }
        if !coverage.is_satisfied() {
            tracing::warn!(
                target: "evidence",
                missing = ?coverage.missing,
                short = ?coverage.short,
                sources = items.len(),
                "coverage targets not met after retries; continuing best-effort"
            );
        }
        meta.short_categories = coverage.lacking();
        tracing::info!(target: "evidence", provider = self.name(), sources = items.len(), attempts = meta.attempts, "evidence collected");
        Ok((items, meta))
    }

    fn name(&self) -> &'static str {
        "grounded"
    }
}

/// One oracle call whose reply must parse as a source list.
async fn request_sources(
    oracle: &dyn Oracle,
    stage: &'static str,
    prompt: &str,
    today: NaiveDate,
) -> Result<Vec<SourceItem>> {
    let reply = ask(oracle, stage, prompt).await?;
    if !reply.grounding_urls.is_empty() {
        tracing::debug!(target: "evidence", grounding = reply.grounding_urls.len(), "oracle reported visited pages");
    }
    Ok(parse_source_list(&reply.text, today)?)
}

fn window(config: &RadarConfig, report_date: NaiveDate) -> (NaiveDate, NaiveDate) {
    (report_date - Duration::days(config.report.lookback_days), report_date)
}

fn watchlist_lines(config: &RadarConfig, categories: &[String]) -> String {
    let lines: Vec<String> = config
        .watchlist
        .iter()
        .filter(|w| categories.contains(&w.category))
        .map(|w| {
            let mut line = format!("- {} [{}]", w.name, w.category);
            if !w.aliases.is_empty() {
                line.push_str(&format!(" aka {}", w.aliases.join(", ")));
            }
            if !w.keywords.is_empty() {
                line.push_str(&format!(" (keywords: {})", w.keywords.join(", ")));
            }
            line
        })
        .collect();
    if lines.is_empty() {
        "(none: discover relevant companies yourself)".to_string()
    } else {
        lines.join("\n")
    }
}

pub fn base_prompt(config: &RadarConfig, report_date: NaiveDate, categories: &[String]) -> String {
    let (from, to) = window(config, report_date);
    format!(
        "Use web search to collect recent news about companies in these categories.\n\
         Categories (use exactly these strings): {cats}\n\
         Period: {from} to {to}\n\
         Companies to watch:\n{watch}\n\n\
         Rules:\n\
         - Use only real URLs of pages you actually found. Never guess or construct a URL.\n\
         - One entry per article. Prefer original publishers over aggregators.\n\
         - Cover at least {min} distinct Korean companies per category when they exist.\n\
         Output one JSON object only, shaped like:\n{shape}",
        cats = categories.join(", "),
        watch = watchlist_lines(config, categories),
        min = config.coverage.min_domestic_companies,
        shape = SOURCE_SHAPE,
    )
}

pub fn escalation_block(attempt: usize, coverage: &Coverage, config: &RadarConfig) -> String {
    let target_total = config.coverage.target_sources + attempt * config.coverage.target_step;
    let list = |v: &[String]| if v.is_empty() { "(none)".to_string() } else { v.join(", ") };
    format!(
        "IMPORTANT (retry {attempt}): the previous answer did not cover every category.\n\
         - Categories with no company at all: {missing}\n\
         - Categories with fewer than {min} distinct Korean companies: {short}\n\
         Search again specifically for these categories. Return at least {target_total} sources in total \
         and at least {min} distinct companies for each category listed above. \
         The URL rules above still apply.",
        missing = list(&coverage.missing),
        short = list(&coverage.short),
        min = config.coverage.min_domestic_companies,
    )
}

/// Narrow top-up for categories still short on domestic companies after
/// classification. Failures degrade to an empty list.
pub async fn backfill_categories(
    oracle: &dyn Oracle,
    config: &RadarConfig,
    report_date: NaiveDate,
    categories: &[String],
    known_companies: &[String],
) -> Vec<SourceItem> {
    if categories.is_empty() {
        return Vec::new();
    }
    counter!("radar_backfill_rounds_total", "scope" => "domestic").increment(1);
    let mut prompt = base_prompt(config, report_date, categories);
    prompt.push_str(&format!(
        "\n\nOnly these categories matter now: {}. Focus on Korean companies not in this list: {}.",
        categories.join(", "),
        if known_companies.is_empty() { "(none)".to_string() } else { known_companies.join(", ") },
    ));
    match request_sources(oracle, "backfill_domestic", &prompt, report_date).await {
        Ok(raw) => vet(raw, config, report_date)
            .0
            .into_iter()
            .filter(|it| categories.contains(&it.category))
            .collect(),
        Err(e) => {
            tracing::warn!(target: "evidence", error = ?e, "domestic backfill failed");
            Vec::new()
        }
    }
}

/// Overseas-only top-up. Every returned item must carry a country.
pub async fn backfill_overseas(
    oracle: &dyn Oracle,
    config: &RadarConfig,
    report_date: NaiveDate,
    wanted: usize,
) -> Vec<SourceItem> {
    if wanted == 0 {
        return Vec::new();
    }
    counter!("radar_backfill_rounds_total", "scope" => "overseas").increment(1);
    let (from, to) = window(config, report_date);
    let prompt = format!(
        "Use web search to find news from {from} to {to} about companies headquartered OUTSIDE Korea \
         in these categories: {cats}.\n\
         Return at least {wanted} sources, one company per source, and set \"country\" to the HQ country.\n\
         Use only real URLs of pages you actually found.\n\
         Output one JSON object only, shaped like:\n{SOURCE_SHAPE}",
        cats = config.report.categories.join(", "),
    );
    match request_sources(oracle, "backfill_overseas", &prompt, report_date).await {
        Ok(raw) => vet(raw, config, report_date)
            .0
            .into_iter()
            .filter(|it| it.country.is_some())
            .collect(),
        Err(e) => {
            tracing::warn!(target: "evidence", error = ?e, "overseas backfill failed");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::ScriptedOracle;
    use std::sync::Arc;

    const CFG: &str = r#"
[report]
categories = ["CAT-A", "CAT-B"]
[coverage]
min_domestic_companies = 1
max_collect_retries = 2
target_sources = 40
target_step = 15
[provider]
api_key = "k"
"#;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 1, 12).unwrap()
    }

    #[tokio::test]
    async fn retries_until_categories_are_covered() {
        let cfg = RadarConfig::from_toml_str(CFG).unwrap();
        let oracle = ScriptedOracle::new();
        oracle
            .push_text(r#"{"sources":[{"company":"A","category":"CAT-A","title":"A news","url":"https://a.example/1"}]}"#)
            .push_text(r#"{"sources":[{"company":"B","category":"CAT-B","title":"B news","url":"https://b.example/1"}]}"#);
        let provider = GroundedProvider::new(Arc::new(oracle.clone()));
        let (items, meta) = provider.collect(&cfg, date()).await.unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(meta.attempts, 2);
        assert!(meta.short_categories.is_empty());
        let prompts = oracle.prompts();
        assert!(!prompts[0].contains("IMPORTANT"));
        assert!(prompts[1].contains("IMPORTANT (retry 1)"));
        assert!(prompts[1].contains("no company at all: CAT-B"));
        assert!(prompts[1].contains("at least 55 sources"));
    }

    #[tokio::test]
    async fn retry_budget_is_bounded() {
        let cfg = RadarConfig::from_toml_str(CFG).unwrap();
        let oracle = ScriptedOracle::new();
        for _ in 0..3 {
            oracle.push_text(r#"{"sources":[{"company":"A","category":"CAT-A","title":"A news","url":"https://a.example/1"}]}"#);
        }
        oracle.push_text("should never be requested");
        let provider = GroundedProvider::new(Arc::new(oracle.clone()));
        let (items, meta) = provider.collect(&cfg, date()).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(meta.attempts, 3);
        assert_eq!(meta.short_categories, vec!["CAT-B".to_string()]);
        assert_eq!(oracle.remaining(), 1);
        assert!(oracle.prompts()[2].contains("at least 70 sources"));
    }

    #[tokio::test]
    async fn all_attempts_failing_is_an_error() {
        let cfg = RadarConfig::from_toml_str(CFG).unwrap();
        let oracle = ScriptedOracle::new();
        oracle.push_error("down").push_text("no json here").push_error("down");
        let provider = GroundedProvider::new(Arc::new(oracle));
        assert!(provider.collect(&cfg, date()).await.is_err());
    }

    #[tokio::test]
    async fn overseas_backfill_keeps_only_items_with_country() {
        let cfg = RadarConfig::from_toml_str(CFG).unwrap();
        let oracle = ScriptedOracle::new();
        oracle.push_text(
            r#"{"sources":[
                {"company":"Far","category":"CAT-A","title":"Far news","url":"https://far.example/1","country":"Japan"},
                {"company":"Who","category":"CAT-A","title":"Who news","url":"https://who.example/1"}
            ]}"#,
        );
        let items = backfill_overseas(&oracle, &cfg, date(), 10).await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].company, "Far");
        assert!(oracle.prompts()[0].contains("OUTSIDE Korea"));
    }
}
