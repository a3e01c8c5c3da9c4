// src/pipeline/compose.rs
//! Report writing: the oracle drafts the report from the vetted evidence,
//! then the draft is forced back onto the evidence set and the configured
//! category layout.

use std::collections::BTreeSet;

use anyhow::{Context, Result};
use chrono::NaiveDate;

use crate::config::RadarConfig;
use crate::oracle::{ask, Oracle};
use crate::report::{SourceItem, WeeklyReport};
use crate::schema::{parse_or_repair, REPORT_SCHEMA_HINT};
use crate::url_norm::{is_http_url, normalize_url};

pub fn compose_prompt(config: &RadarConfig, report_date: NaiveDate, evidence: &[SourceItem]) -> String {
    let evidence_json = serde_json::to_string_pretty(evidence).unwrap_or_else(|_| "[]".to_string());
    format!(
        "Write this week's competitor report as JSON.\n\
         Report date: {date}\n\
         Categories (category_updates keys must be exactly these): {cats}\n\
         Top highlights: at most {top}, importance 1 (minor) to 5 (critical).\n\n\
         Rules:\n\
         - Use only the facts in EVIDENCE. Do not add events, numbers or companies that are not there.\n\
         - Every url/link must be copied exactly from an EVIDENCE item. Never construct a URL.\n\
         - One update per article; write title and insight in Korean.\n\
         - Put companies headquartered outside Korea in overseas_updates with their country.\n\
         Schema:\n{schema}\n\n\
         EVIDENCE:\n{evidence_json}\n\n\
         Output only the JSON object.",
        date = report_date.format("%Y-%m-%d"),
        cats = config.report.categories.join(", "),
        top = config.report.top_highlights,
        schema = REPORT_SCHEMA_HINT,
    )
}

/// One compose call; structural failure spends the single repair call.
/// Returns the draft and whether repair was needed.
pub async fn compose_report(
    oracle: &dyn Oracle,
    config: &RadarConfig,
    report_date: NaiveDate,
    evidence: &[SourceItem],
) -> Result<(WeeklyReport, bool)> {
    if evidence.is_empty() {
        tracing::warn!("no evidence collected; starting from an empty report");
        return Ok((WeeklyReport::empty(report_date, &config.report.categories), false));
    }
    let prompt = compose_prompt(config, report_date, evidence);
    let reply = ask(oracle, "compose", &prompt).await.context("compose call")?;
    let (report, repaired) = parse_or_repair(oracle, &reply.text)
        .await
        .context("report output unusable after repair")?;
    Ok((report, repaired))
}

/// Date stamp, exact category keys, top-N highlights, watchlist homepages.
/// Returns the report and the category keys that were dropped.
pub fn conform(mut report: WeeklyReport, config: &RadarConfig, report_date: NaiveDate) -> (WeeklyReport, Vec<String>) {
    report.stamp_date(report_date);
    let dropped = report.normalize_categories(&config.report.categories);
    if !dropped.is_empty() {
        tracing::warn!(dropped = ?dropped, "report used categories outside the configured set");
    }
    // stable: equal importance keeps the oracle's order
    report
        .top_highlights
        .sort_by(|a, b| b.importance.cmp(&a.importance));
    report.top_highlights.truncate(config.report.top_highlights);
    for h in &mut report.top_highlights {
        h.importance = h.importance.clamp(1, 5);
    }

    report.company_homepages.retain(|_, url| is_http_url(url));
    for w in &config.watchlist {
        if let Some(home) = w.homepage.as_deref().filter(|h| is_http_url(h)) {
            report.company_homepages.insert(w.name.clone(), home.to_string());
        }
    }
    (report, dropped)
}

/// Holds report links to the evidence set. Highlight links outside it
/// (and outside the homepage map) are cleared; update, overseas and hiring
/// items citing a URL outside it are dropped. Returns the number of links
/// cleared plus items dropped.
pub fn restrict_to_evidence(mut report: WeeklyReport, evidence: &[SourceItem]) -> (WeeklyReport, usize) {
    let allowed: BTreeSet<String> = evidence.iter().map(SourceItem::canonical_url).collect();
    let homepages: BTreeSet<String> = report
        .company_homepages
        .values()
        .map(|u| normalize_url(u))
        .collect();
    let cited = |url: &Option<String>| url.as_deref().map_or(true, |u| allowed.contains(&normalize_url(u)));
    let mut removed = 0usize;

    for h in &mut report.top_highlights {
        if let Some(link) = h.link.as_deref() {
            let canon = normalize_url(link);
            if !allowed.contains(&canon) && !homepages.contains(&canon) {
                h.link = None;
                removed += 1;
            }
        }
    }
    for items in report.category_updates.values_mut() {
        let before = items.len();
        items.retain(|u| cited(&u.url));
        removed += before - items.len();
    }
    let before = report.overseas_updates.len();
    report.overseas_updates.retain(|o| cited(&o.update.url));
    removed += before - report.overseas_updates.len();

    let before = report.hiring_signals.len();
    report.hiring_signals.retain(|h| cited(&h.url));
    removed += before - report.hiring_signals.len();

    if removed > 0 {
        tracing::warn!(removed, "report cited URLs outside the evidence set");
    }
    (report, removed)
}
