// src/metrics.rs
//! Counter descriptions. No exporter is installed here; a binary that wants
//! one installs a recorder before `describe()`.

use metrics::describe_counter;
use once_cell::sync::OnceCell;

pub fn describe() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "radar_sources_collected_total",
            "Evidence items kept after ingestion vetting."
        );
        describe_counter!(
            "radar_oracle_calls_total",
            "Oracle calls, labelled by pipeline stage."
        );
        describe_counter!(
            "radar_schema_repairs_total",
            "Structure-only repair calls issued."
        );
        describe_counter!(
            "radar_urls_dropped_total",
            "Report links dropped after probing."
        );
        describe_counter!(
            "radar_urls_rewritten_total",
            "Report links rewritten to their redirect target."
        );
        describe_counter!(
            "radar_items_deduped_total",
            "Report items removed by the weekly ledger."
        );
        describe_counter!(
            "radar_backfill_rounds_total",
            "Backfill rounds, labelled by scope."
        );
    });
}
