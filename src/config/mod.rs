// src/config/mod.rs
pub mod radar;

pub use radar::{
    CoverageSection, LedgerSection, Locale, NewsSearchSection, ProbeSection, ProviderKind,
    ProviderSection, RadarConfig, ReportSection, WatchCompany,
};
