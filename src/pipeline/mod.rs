// src/pipeline/mod.rs
//! Report assembler. Each stage takes the whole report and returns the
//! whole report; this module only sequences them and keeps the counters.

pub mod compose;
pub mod links;

use std::collections::BTreeSet;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use metrics::counter;
use serde::Serialize;

use crate::config::RadarConfig;
use crate::dates::week_key;
use crate::evidence::{grounded, union_sources, CollectionMeta, EvidenceProvider};
use crate::fill::{fill_category_updates, fill_overseas, FillLimits};
use crate::ledger::{self, LedgerStore, SeenHistory};
use crate::notify::ReportSink;
use crate::oracle::DynOracle;
use crate::origin::{classify, domestic_shortfall, resolve_hq, CompanyHq};
use crate::probe::LinkChecker;
use crate::report::{SourceItem, WeeklyReport};

/// Numbers handed to renderers/senders next to the report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunCounters {
    pub sources_collected: usize,
    pub sources_dropped: usize,
    pub schema_repaired: bool,
    pub categories_dropped: usize,
    pub off_evidence_removed: usize,
    pub moved_overseas: usize,
    pub filled_domestic: usize,
    pub filled_overseas: usize,
    pub backfill_rounds: usize,
    pub urls_checked: usize,
    pub urls_dropped: usize,
    pub urls_rewritten: usize,
    pub items_deduped: usize,
}

#[derive(Debug, Clone)]
pub struct AssembledReport {
    pub report: WeeklyReport,
    pub counters: RunCounters,
    pub meta: CollectionMeta,
    pub evidence: Vec<SourceItem>,
}

/// Collaborators for one run.
pub struct RunContext<'a> {
    pub config: &'a RadarConfig,
    pub oracle: DynOracle,
    pub provider: &'a dyn EvidenceProvider,
    pub links: &'a dyn LinkChecker,
}

fn fill_limits(config: &RadarConfig) -> FillLimits {
    FillLimits {
        max_companies_per_category: config.coverage.max_companies_per_category,
        allow_multiple_per_company: config.coverage.allow_multiple_per_company,
        max_items_per_company: config.coverage.max_items_per_company,
    }
}

fn companies_of(report: &WeeklyReport, evidence: &[SourceItem]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let from_report = report
        .category_updates
        .values()
        .flatten()
        .map(|u| &u.company)
        .chain(report.overseas_updates.iter().map(|o| &o.update.company));
    from_report
        .chain(evidence.iter().map(|e| &e.company))
        .filter(|c| seen.insert(c.as_str()))
        .cloned()
        .collect()
}

/// Evidence items that state their own country teach the HQ map.
fn learn_countries(hq: &mut CompanyHq, evidence: &[SourceItem]) {
    for it in evidence {
        if let Some(country) = &it.country {
            if !hq.contains(&it.company) {
                hq.insert(&it.company, country);
            }
        }
    }
}

/// Collect -> compose (+repair) -> conform -> restrict to evidence ->
/// classify -> fill -> backfill -> verify links -> ledger filter.
/// `seen` is the history loaded at run start; it is not modified here.
pub async fn run(ctx: &RunContext<'_>, report_date: NaiveDate, seen: &SeenHistory) -> Result<AssembledReport> {
    let config = ctx.config;
    let oracle = ctx.oracle.as_ref();
    let mut counters = RunCounters::default();

    let (mut evidence, meta) = ctx
        .provider
        .collect(config, report_date)
        .await
        .with_context(|| format!("collecting evidence via {}", ctx.provider.name()))?;
    counters.sources_collected = evidence.len();
    counters.sources_dropped = meta.dropped_invalid + meta.dropped_stale;

    let (report, repaired) = compose::compose_report(oracle, config, report_date, &evidence).await?;
    counters.schema_repaired = repaired;
    let (report, dropped_categories) = compose::conform(report, config, report_date);
    counters.categories_dropped = dropped_categories.len();
    let (report, off_evidence) = compose::restrict_to_evidence(report, &evidence);
    counters.off_evidence_removed = off_evidence;

    let mut hq = resolve_hq(oracle, &companies_of(&report, &evidence), config).await;
    learn_countries(&mut hq, &evidence);
    let (report, moved) = classify(report, &hq);
    counters.moved_overseas = moved;

    let limits = fill_limits(config);
    let (mut report, filled) = fill_category_updates(report, &evidence, &hq, limits);
    counters.filled_domestic += filled.added;

    let short = domestic_shortfall(&report, &hq, config.coverage.min_domestic_companies);
    if !short.is_empty() {
        counters.backfill_rounds += 1;
        let known: Vec<String> = companies_of(&report, &[]);
        let more = grounded::backfill_categories(oracle, config, report_date, &short, &known).await;
        tracing::info!(short = ?short, found = more.len(), "domestic backfill round");
        learn_countries(&mut hq, &more);
        evidence = union_sources(evidence, more);
        let (r, filled) = fill_category_updates(report, &evidence, &hq, limits);
        report = r;
        counters.filled_domestic += filled.added;
        let still = domestic_shortfall(&report, &hq, config.coverage.min_domestic_companies);
        if !still.is_empty() {
            tracing::warn!(short = ?still, "categories still short on domestic companies; accepted");
        }
    }

    let overseas_max = config.coverage.overseas_max_items;
    let (r, added) = fill_overseas(report, &evidence, &hq, overseas_max);
    report = r;
    counters.filled_overseas += added;
    if report.overseas_updates.len() < config.coverage.overseas_min_items {
        counters.backfill_rounds += 1;
        let wanted = overseas_max.saturating_sub(report.overseas_updates.len());
        let more = grounded::backfill_overseas(oracle, config, report_date, wanted).await;
        learn_countries(&mut hq, &more);
        evidence = union_sources(evidence, more);
        let (r, added) = fill_overseas(report, &evidence, &hq, overseas_max);
        report = r;
        counters.filled_overseas += added;
        if report.overseas_updates.len() < config.coverage.overseas_min_items {
            tracing::warn!(
                have = report.overseas_updates.len(),
                min = config.coverage.overseas_min_items,
                "overseas coverage below minimum; accepted"
            );
        }
    }
    report.overseas_updates.truncate(overseas_max);

    let known_homepages: Vec<String> = report.company_homepages.values().cloned().collect();
    let (mut report, link_stats) =
        links::verify_links(report, ctx.links, &config.probe, &known_homepages).await;
    counters.urls_checked = link_stats.checked;
    counters.urls_dropped = link_stats.dropped;
    counters.urls_rewritten = link_stats.rewritten;

    counters.items_deduped = ledger::filter(&mut report, &seen.recent_urls());
    counter!("radar_items_deduped_total").increment(counters.items_deduped as u64);

    tracing::info!(
        report_date = %report.report_date,
        updates = report.update_count(),
        overseas = report.overseas_updates.len(),
        highlights = report.top_highlights.len(),
        deduped = counters.items_deduped,
        "report assembled"
    );
    Ok(AssembledReport {
        report,
        counters,
        meta,
        evidence,
    })
}

/// Sends the report, then records its URLs in the ledger. Nothing is
/// recorded when `dry_run` is set or the send fails. Returns whether the
/// report was delivered.
pub async fn deliver_and_commit(
    assembled: &AssembledReport,
    sink: &dyn ReportSink,
    store: &dyn LedgerStore,
    mut history: SeenHistory,
    report_date: NaiveDate,
    keep_weeks: usize,
    dry_run: bool,
) -> Result<bool> {
    if dry_run {
        tracing::info!("dry run: delivery and ledger update skipped");
        return Ok(false);
    }
    sink.deliver(&assembled.report, &assembled.counters)
        .await
        .with_context(|| format!("delivering report via {}", sink.name()))?;

    let key = week_key(report_date);
    history.add(&key, &assembled.report);
    let pruned = history.prune(keep_weeks);
    store.save(&history).await.context("saving ledger")?;
    tracing::info!(target: "ledger", week = %key, pruned, "ledger committed");
    Ok(true)
}
