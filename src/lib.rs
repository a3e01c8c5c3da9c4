// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod config;
pub mod dates;
pub mod evidence;
pub mod fill;
pub mod ledger;
pub mod metrics;
pub mod notify;
pub mod oracle;
pub mod origin;
pub mod pipeline;
pub mod pool;
pub mod probe;
pub mod report;
pub mod schema;
pub mod url_norm;

// ---- Re-exports for stable public API ----
pub use crate::config::RadarConfig;
pub use crate::pipeline::{AssembledReport, RunContext, RunCounters};
pub use crate::report::{SourceItem, WeeklyReport};
