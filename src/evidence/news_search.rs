// src/evidence/news_search.rs
//! Provider B: a structured news-search API queried per watchlist company
//! and locale, with an optional oracle discovery pass that widens the
//! watchlist for short categories.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::discovery::discover_companies;
use super::{evaluate_coverage, union_sources, vet, CollectionMeta, EvidenceProvider};
use crate::config::{Locale, RadarConfig, WatchCompany};
use crate::dates::parse_published;
use crate::oracle::DynOracle;
use crate::pool::run_pool;
use crate::report::SourceItem;
use crate::url_norm::{host_of, is_http_url};

const SERPER_NEWS_URL: &str = "https://google.serper.dev/news";

/// Hosts that never carry a primary article: social networks and
/// aggregator wrappers.
const DENY_HOSTS: [&str; 14] = [
    "facebook.com",
    "instagram.com",
    "twitter.com",
    "x.com",
    "youtube.com",
    "tiktok.com",
    "linkedin.com",
    "pinterest.com",
    "reddit.com",
    "news.google.com",
    "flipboard.com",
    "msn.com",
    "t.co",
    "bit.ly",
];

/// Path fragments of image popups, tag listings and click trackers.
const DENY_PATH_PARTS: [&str; 8] = [
    "/photo/",
    "imagepopup",
    "/imgview",
    "popup.",
    "/tag/",
    "/search",
    "/track/",
    "/click",
];

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct NewsHit {
    #[serde(default)]
    pub title: String,
    #[serde(default, alias = "url")]
    pub link: String,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub snippet: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewsQuery {
    pub q: String,
    pub locale: Locale,
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub page: u32,
}

#[async_trait]
pub trait NewsSearch: Send + Sync {
    async fn search(&self, query: &NewsQuery) -> Result<Vec<NewsHit>>;
}

/// serper.dev news endpoint.
pub struct SerperNewsClient {
    http: reqwest::Client,
    api_key: String,
    endpoint: String,
}

impl SerperNewsClient {
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent("competitor-radar/0.1")
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()
            .context("building news search http client")?;
        Ok(Self {
            http,
            api_key: api_key.into(),
            endpoint: SERPER_NEWS_URL.to_string(),
        })
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[derive(Serialize)]
struct SerperReq<'a> {
    q: &'a str,
    hl: &'a str,
    gl: &'a str,
    page: u32,
    tbs: String,
}

#[derive(Deserialize, Default)]
struct SerperResp {
    #[serde(default)]
    news: Vec<NewsHit>,
}

#[async_trait]
impl NewsSearch for SerperNewsClient {
    async fn search(&self, query: &NewsQuery) -> Result<Vec<NewsHit>> {
        let body = SerperReq {
            q: &query.q,
            hl: &query.locale.hl,
            gl: &query.locale.gl,
            page: query.page,
            tbs: format!(
                "cdr:1,cd_min:{},cd_max:{}",
                query.from.format("%m/%d/%Y"),
                query.to.format("%m/%d/%Y")
            ),
        };
        let resp = self
            .http
            .post(&self.endpoint)
            .header("X-API-KEY", &self.api_key)
            .json(&body)
            .send()
            .await
            .context("news search request")?
            .error_for_status()
            .context("news search status")?;
        let parsed: SerperResp = resp.json().await.context("news search json")?;
        Ok(parsed.news)
    }
}

// --- Test helper ---
/// Canned hits keyed by query text; records every query it answers.
#[derive(Clone, Default)]
pub struct StaticNewsSearch {
    hits: Arc<Mutex<BTreeMap<String, Vec<NewsHit>>>>,
    seen: Arc<Mutex<Vec<NewsQuery>>>,
}

impl StaticNewsSearch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, q: &str, hits: Vec<NewsHit>) -> Self {
        if let Ok(mut m) = self.hits.lock() {
            m.insert(q.to_string(), hits);
        }
        self
    }

    pub fn queries(&self) -> Vec<NewsQuery> {
        self.seen.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl NewsSearch for StaticNewsSearch {
    async fn search(&self, query: &NewsQuery) -> Result<Vec<NewsHit>> {
        if let Ok(mut s) = self.seen.lock() {
            s.push(query.clone());
        }
        // only the first page has canned hits
        if query.page > 1 {
            return Ok(Vec::new());
        }
        Ok(self
            .hits
            .lock()
            .ok()
            .and_then(|m| m.get(&query.q).cloned())
            .unwrap_or_default())
    }
}

pub fn is_denied(url: &str) -> bool {
    let Some(host) = host_of(url) else {
        return true;
    };
    if DENY_HOSTS
        .iter()
        .any(|d| host == *d || host.ends_with(&format!(".{d}")))
    {
        return true;
    }
    let lower = url.to_lowercase();
    DENY_PATH_PARTS.iter().any(|p| lower.contains(p))
}

/// Title or snippet names the company or one of its aliases.
pub fn mentions_company(hit: &NewsHit, company: &WatchCompany) -> bool {
    let text = format!("{} {}", hit.title, hit.snippet.as_deref().unwrap_or_default()).to_lowercase();
    std::iter::once(&company.name)
        .chain(company.aliases.iter())
        .map(|n| n.trim().to_lowercase())
        .filter(|n| !n.is_empty())
        .any(|n| text.contains(&n))
}

pub fn keyword_query(company: &WatchCompany) -> String {
    if company.keywords.is_empty() {
        name_query(company)
    } else {
        format!("\"{}\" ({})", company.name, company.keywords.join(" OR "))
    }
}

pub fn name_query(company: &WatchCompany) -> String {
    format!("\"{}\"", company.name)
}

#[derive(Debug, Default)]
struct JobOutcome {
    items: Vec<SourceItem>,
    queries: usize,
    results: usize,
}

#[derive(Clone)]
struct SearchJob {
    company: WatchCompany,
    locale: Locale,
    from: NaiveDate,
    to: NaiveDate,
    max_pages: u32,
    min_results: usize,
}

async fn run_job(search: &dyn NewsSearch, job: SearchJob) -> JobOutcome {
    let mut out = JobOutcome::default();
    let mut seen = BTreeSet::new();
    let primary = keyword_query(&job.company);
    let fallback = name_query(&job.company);

    let mut queries = vec![primary.clone()];
    if fallback != primary {
        queries.push(fallback);
    }
    for (i, q) in queries.iter().enumerate() {
        // name-only fallback only when the keyword query came back thin
        if i > 0 && out.items.len() >= job.min_results {
            break;
        }
        for page in 1..=job.max_pages.max(1) {
            let query = NewsQuery {
                q: q.clone(),
                locale: job.locale.clone(),
                from: job.from,
                to: job.to,
                page,
            };
            out.queries += 1;
            let hits = match search.search(&query).await {
                Ok(h) => h,
                Err(e) => {
                    tracing::warn!(target: "evidence", company = %job.company.name, q = %query.q, error = ?e, "news search failed");
                    break;
                }
            };
            out.results += hits.len();
            if hits.is_empty() {
                break;
            }
            for hit in hits {
                if !is_http_url(&hit.link) || is_denied(&hit.link) || !mentions_company(&hit, &job.company) {
                    continue;
                }
                if !seen.insert(crate::url_norm::normalize_url(&hit.link)) {
                    continue;
                }
                out.items.push(SourceItem {
                    company: job.company.name.clone(),
                    category: job.company.category.clone(),
                    title: hit.title.trim().to_string(),
                    url: hit.link.trim().to_string(),
                    published_at: hit.date.as_deref().and_then(|d| parse_published(d, job.to)),
                    quote: hit.snippet.clone().filter(|s| !s.trim().is_empty()),
                    note: None,
                    country: job.company.country.clone(),
                });
            }
        }
    }
    out
}

pub struct NewsSearchProvider {
    search: Arc<dyn NewsSearch>,
    discovery: Option<DynOracle>,
}

impl NewsSearchProvider {
    pub fn new(search: Arc<dyn NewsSearch>) -> Self {
        Self {
            search,
            discovery: None,
        }
    }

    /// Enables the company discovery pass for short categories.
    pub fn with_discovery(mut self, oracle: DynOracle) -> Self {
        self.discovery = Some(oracle);
        self
    }

    async fn search_companies(
        &self,
        companies: &[WatchCompany],
        config: &RadarConfig,
        report_date: NaiveDate,
        meta: &mut CollectionMeta,
    ) -> Vec<SourceItem> {
        let ns = &config.news_search;
        let from = report_date - chrono::Duration::days(config.report.lookback_days);
        let jobs: Vec<SearchJob> = companies
            .iter()
            .flat_map(|c| {
                ns.locales.iter().map(move |l| SearchJob {
                    company: c.clone(),
                    locale: l.clone(),
                    from,
                    to: report_date,
                    max_pages: ns.max_pages,
                    min_results: ns.min_results,
                })
            })
            .collect();
        let search = Arc::clone(&self.search);
        let outcomes = run_pool(jobs, ns.concurrency, move |job: SearchJob| {
            let search = Arc::clone(&search);
            async move { run_job(search.as_ref(), job).await }
        })
        .await;

        let mut raw = Vec::new();
        for o in outcomes {
            meta.queries += o.queries;
            meta.results += o.results;
            raw.extend(o.items);
        }
        let (items, stats) = vet(raw, config, report_date);
        meta.dropped_invalid += stats.invalid;
        meta.dropped_stale += stats.stale;
        items
    }
}

#[async_trait]
impl EvidenceProvider for NewsSearchProvider {
    async fn collect(
        &self,
        config: &RadarConfig,
        report_date: NaiveDate,
    ) -> Result<(Vec<SourceItem>, CollectionMeta)> {
        let mut meta = CollectionMeta {
            provider: self.name().to_string(),
            attempts: 1,
            ..Default::default()
        };
        let mut items = self
            .search_companies(&config.watchlist, config, report_date, &mut meta)
            .await;

        let mut coverage = evaluate_coverage(&items, config);
        if let Some(oracle) = &self.discovery {
            let short = coverage.lacking();
            if !short.is_empty() {
                let found = discover_companies(Arc::clone(oracle), config, &short, &config.watchlist).await;
                if !found.is_empty() {
                    meta.attempts += 1;
                    let more = self.search_companies(&found, config, report_date, &mut meta).await;
                    items = union_sources(items, more);
                    coverage = evaluate_coverage(&items, config);
                }
            }
        }
        if !coverage.is_satisfied() {
            tracing::warn!(
                target: "evidence",
                missing = ?coverage.missing,
                short = ?coverage.short,
                sources = items.len(),
                "news search coverage short; continuing best-effort"
            );
        }
        meta.short_categories = coverage.lacking();
        tracing::info!(target: "evidence", provider = self.name(), sources = items.len(), queries = meta.queries, "evidence collected");
        Ok((items, meta))
    }

    fn name(&self) -> &'static str {
        "news_search"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(title: &str, link: &str) -> NewsHit {
        NewsHit {
            title: title.into(),
            link: link.into(),
            date: Some("2 days ago".into()),
            snippet: None,
            source: None,
        }
    }

    fn company(keywords: &[&str]) -> WatchCompany {
        WatchCompany {
            name: "Acme".into(),
            category: "CAT-A".into(),
            aliases: vec!["에이크미".into()],
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
            country: None,
            homepage: None,
        }
    }

    #[test]
    fn denylist_hosts_and_paths() {
        assert!(is_denied("https://www.facebook.com/acme/posts/1"));
        assert!(is_denied("https://m.youtube.com/watch?v=1"));
        assert!(is_denied("https://news.example/photo/123"));
        assert!(!is_denied("https://news.example/article/123"));
        assert!(!is_denied("https://xylophone.com/a"));
    }

    #[test]
    fn relevance_uses_name_or_alias() {
        let c = company(&[]);
        assert!(mentions_company(&hit("ACME ships robots", "https://a.example/1"), &c));
        assert!(mentions_company(&hit("에이크미, 신제품 출시", "https://a.example/2"), &c));
        assert!(!mentions_company(&hit("Market wrap", "https://a.example/3"), &c));
    }

    #[tokio::test]
    async fn thin_keyword_results_fall_back_to_name_query() {
        let c = company(&["robot", "AMR"]);
        let search = StaticNewsSearch::new()
            .with("\"Acme\" (robot OR AMR)", vec![hit("Acme robot", "https://a.example/1")])
            .with(
                "\"Acme\"",
                vec![
                    hit("Acme robot", "https://a.example/1?utm_source=x"),
                    hit("Acme hires", "https://a.example/2"),
                    hit("Unrelated", "https://a.example/3"),
                    hit("Acme on social", "https://twitter.com/acme/1"),
                ],
            );
        let job = SearchJob {
            company: c,
            locale: Locale {
                hl: "ko".into(),
                gl: "kr".into(),
            },
            from: NaiveDate::from_ymd_opt(2026, 1, 5).unwrap(),
            to: NaiveDate::from_ymd_opt(2026, 1, 12).unwrap(),
            max_pages: 2,
            min_results: 3,
        };
        let out = run_job(&search, job).await;
        let urls: Vec<_> = out.items.iter().map(|i| i.url.as_str()).collect();
        assert_eq!(urls, vec!["https://a.example/1", "https://a.example/2"]);
        assert_eq!(out.items[0].published_at, NaiveDate::from_ymd_opt(2026, 1, 10));
        // keyword query page 1 + page 2, then name query page 1 + page 2
        assert_eq!(search.queries().len(), 4);
    }
}
