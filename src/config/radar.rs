// src/config/radar.rs
use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::{env, fs, path::Path};

pub const DEFAULT_CONFIG_PATH: &str = "config/radar.toml";
pub const ENV_CONFIG_PATH: &str = "RADAR_CONFIG_PATH";
const MAX_LOOKBACK_DAYS: i64 = 366;

fn default_top_highlights() -> usize {
    5
}
fn default_lookback_days() -> i64 {
    7
}
fn default_min_domestic() -> usize {
    3
}
fn default_max_companies() -> usize {
    8
}
fn default_max_retries() -> usize {
    3
}
fn default_target_sources() -> usize {
    40
}
fn default_target_step() -> usize {
    15
}
fn default_overseas_min() -> usize {
    10
}
fn default_overseas_max() -> usize {
    15
}
fn default_items_per_company() -> usize {
    2
}
fn default_model() -> String {
    "gemini-2.5-flash".to_string()
}
fn default_env_key() -> String {
    "ENV".to_string()
}
fn default_pages() -> u32 {
    1
}
fn default_min_results() -> usize {
    3
}
fn default_discovery_total() -> usize {
    10
}
fn default_discovery_per_category() -> usize {
    3
}
fn default_fanout() -> usize {
    4
}
fn default_timeout_ms() -> u64 {
    8_000
}
fn default_probe_concurrency() -> usize {
    8
}
fn default_true() -> bool {
    true
}
fn default_ledger_path() -> String {
    "state/seen_history.json".to_string()
}
fn default_keep_weeks() -> usize {
    8
}
fn default_locales() -> Vec<Locale> {
    vec![
        Locale {
            hl: "ko".into(),
            gl: "kr".into(),
        },
        Locale {
            hl: "en".into(),
            gl: "us".into(),
        },
    ]
}

/// Root of `config/radar.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RadarConfig {
    pub report: ReportSection,
    #[serde(default)]
    pub coverage: CoverageSection,
    #[serde(default)]
    pub provider: ProviderSection,
    #[serde(default)]
    pub news_search: NewsSearchSection,
    #[serde(default)]
    pub probe: ProbeSection,
    #[serde(default)]
    pub ledger: LedgerSection,
    #[serde(default)]
    pub watchlist: Vec<WatchCompany>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportSection {
    pub categories: Vec<String>,
    #[serde(default = "default_top_highlights")]
    pub top_highlights: usize,
    #[serde(default = "default_lookback_days")]
    pub lookback_days: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoverageSection {
    /// Minimum distinct domestic companies per category.
    #[serde(default = "default_min_domestic")]
    pub min_domestic_companies: usize,
    #[serde(default = "default_max_companies")]
    pub max_companies_per_category: usize,
    #[serde(default = "default_max_retries")]
    pub max_collect_retries: usize,
    /// Total source count asked for on the first retry; grows by `target_step`.
    #[serde(default = "default_target_sources")]
    pub target_sources: usize,
    #[serde(default = "default_target_step")]
    pub target_step: usize,
    #[serde(default = "default_overseas_min")]
    pub overseas_min_items: usize,
    #[serde(default = "default_overseas_max")]
    pub overseas_max_items: usize,
    #[serde(default)]
    pub allow_multiple_per_company: bool,
    #[serde(default = "default_items_per_company")]
    pub max_items_per_company: usize,
}

impl Default for CoverageSection {
    fn default() -> Self {
        Self {
            min_domestic_companies: default_min_domestic(),
            max_companies_per_category: default_max_companies(),
            max_collect_retries: default_max_retries(),
            target_sources: default_target_sources(),
            target_step: default_target_step(),
            overseas_min_items: default_overseas_min(),
            overseas_max_items: default_overseas_max(),
            allow_multiple_per_company: false,
            max_items_per_company: default_items_per_company(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    #[default]
    Grounded,
    NewsSearch,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSection {
    #[serde(default)]
    pub kind: ProviderKind,
    #[serde(default = "default_model")]
    pub model: String,
    /// "ENV" means: read from GEMINI_API_KEY
    #[serde(default = "default_env_key")]
    pub api_key: String,
}

impl Default for ProviderSection {
    fn default() -> Self {
        Self {
            kind: ProviderKind::default(),
            model: default_model(),
            api_key: default_env_key(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Locale {
    pub hl: String,
    pub gl: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsSearchSection {
    #[serde(default = "default_locales")]
    pub locales: Vec<Locale>,
    #[serde(default = "default_pages")]
    pub max_pages: u32,
    /// Below this many hits, retry with the company name alone.
    #[serde(default = "default_min_results")]
    pub min_results: usize,
    #[serde(default = "default_discovery_total")]
    pub discovery_max_total: usize,
    #[serde(default = "default_discovery_per_category")]
    pub discovery_max_per_category: usize,
    #[serde(default = "default_fanout")]
    pub concurrency: usize,
    /// "ENV" means: read from SERPER_API_KEY
    #[serde(default = "default_env_key")]
    pub api_key: String,
}

impl Default for NewsSearchSection {
    fn default() -> Self {
        Self {
            locales: default_locales(),
            max_pages: default_pages(),
            min_results: default_min_results(),
            discovery_max_total: default_discovery_total(),
            discovery_max_per_category: default_discovery_per_category(),
            concurrency: default_fanout(),
            api_key: default_env_key(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeSection {
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_probe_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_true")]
    pub soft_404: bool,
    #[serde(default = "default_true")]
    pub homepage_fallback: bool,
    #[serde(default)]
    pub drop_on_transport_error: bool,
}

impl Default for ProbeSection {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            concurrency: default_probe_concurrency(),
            soft_404: true,
            homepage_fallback: true,
            drop_on_transport_error: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerSection {
    #[serde(default = "default_ledger_path")]
    pub path: String,
    #[serde(default = "default_keep_weeks")]
    pub keep_weeks: usize,
}

impl Default for LedgerSection {
    fn default() -> Self {
        Self {
            path: default_ledger_path(),
            keep_weeks: default_keep_weeks(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WatchCompany {
    pub name: String,
    pub category: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub homepage: Option<String>,
}

impl RadarConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read_to_string(path)
            .with_context(|| format!("reading radar config from {}", path.display()))?;
        Self::from_toml_str(&data)
    }

    /// Path from $RADAR_CONFIG_PATH, else `config/radar.toml`.
    pub fn load_default() -> Result<Self> {
        let path = env::var(ENV_CONFIG_PATH).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from_file(path)
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        let mut cfg: RadarConfig = toml::from_str(s).context("parsing radar config toml")?;
        cfg.validate()?;
        cfg.resolve_keys()?;
        Ok(cfg)
    }

    fn validate(&mut self) -> Result<()> {
        self.report.categories = clean_list(std::mem::take(&mut self.report.categories));
        if self.report.categories.is_empty() {
            bail!("report.categories must not be empty");
        }
        let known: BTreeSet<&str> = self.report.categories.iter().map(String::as_str).collect();
        for w in &self.watchlist {
            if w.name.trim().is_empty() {
                bail!("watchlist entry with empty name");
            }
            if !known.contains(w.category.as_str()) {
                bail!(
                    "watchlist company {} uses unknown category {}",
                    w.name,
                    w.category
                );
            }
        }
        if !(1..=MAX_LOOKBACK_DAYS).contains(&self.report.lookback_days) {
            bail!("report.lookback_days must be within 1..={MAX_LOOKBACK_DAYS}");
        }
        let cov = &mut self.coverage;
        if cov.max_companies_per_category == 0 {
            bail!("coverage.max_companies_per_category must be positive");
        }
        if cov.overseas_min_items > cov.overseas_max_items {
            // swap to keep a valid interval
            std::mem::swap(&mut cov.overseas_min_items, &mut cov.overseas_max_items);
        }
        cov.max_items_per_company = cov.max_items_per_company.max(1);
        self.probe.concurrency = self.probe.concurrency.max(1);
        self.news_search.concurrency = self.news_search.concurrency.max(1);
        Ok(())
    }

    fn resolve_keys(&mut self) -> Result<()> {
        // Only the keys the selected provider needs are mandatory.
        let needs_search = self.provider.kind == ProviderKind::NewsSearch;
        if self.provider.api_key.trim().eq_ignore_ascii_case("env") {
            self.provider.api_key = env::var("GEMINI_API_KEY")
                .map_err(|_| anyhow!("Missing GEMINI_API_KEY env var"))?;
        }
        if self.news_search.api_key.trim().eq_ignore_ascii_case("env") {
            self.news_search.api_key = match env::var("SERPER_API_KEY") {
                Ok(k) => k,
                Err(_) if needs_search => bail!("Missing SERPER_API_KEY env var"),
                Err(_) => String::new(),
            };
        }
        Ok(())
    }

    pub fn watch_company(&self, name: &str) -> Option<&WatchCompany> {
        let key = crate::fill::company_key(name);
        self.watchlist.iter().find(|w| {
            crate::fill::company_key(&w.name) == key
                || w.aliases.iter().any(|a| crate::fill::company_key(a) == key)
        })
    }
}

fn clean_list(items: Vec<String>) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    for it in items {
        let t = it.trim();
        if !t.is_empty() && seen.insert(t.to_string()) {
            out.push(t.to_string());
        }
    }
    out
}
