// src/probe/mod.rs
//! Live URL prober.
//!
//! HEAD first, GET on 4xx/5xx/405 or transport failure. Results are data:
//! nothing here returns `Err` for an unreachable URL.

pub mod homepage;
pub mod soft404;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;

use crate::config::ProbeSection;
use crate::pool::run_pool;
use crate::url_norm::{is_http_url, is_root_path, normalize_url, origin_of};
use homepage::{fetch_signatures, signature_of, PageSignature};
use soft404::{is_html, looks_like_soft_404, read_prefix, BODY_BUDGET};

pub const REASON_SOFT_404: &str = "SOFT_404";
pub const REASON_HOMEPAGE_FALLBACK: &str = "HOMEPAGE_FALLBACK";

/// Statuses that usually mean "bot blocked", not "page gone".
const BLOCKED_BUT_ALIVE: [u16; 6] = [401, 403, 406, 418, 429, 451];

pub fn is_ok_status(status: u16) -> bool {
    (200..400).contains(&status) || BLOCKED_BUT_ALIVE.contains(&status)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UrlCheckResult {
    pub url: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl UrlCheckResult {
    fn ok(url: &str, status: u16, final_url: Option<String>) -> Self {
        Self {
            url: url.to_string(),
            ok: true,
            status: Some(status),
            final_url,
            reason: None,
        }
    }

    fn bad(url: &str, status: Option<u16>, reason: impl Into<String>, final_url: Option<String>) -> Self {
        Self {
            url: url.to_string(),
            ok: false,
            status,
            final_url,
            reason: Some(reason.into()),
        }
    }

    /// Not-ok without any HTTP status: timeout, DNS, refused connection.
    pub fn is_transport_failure(&self) -> bool {
        !self.ok && self.status.is_none()
    }
}

fn transport_reason(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        "TIMEOUT".to_string()
    } else if e.is_connect() {
        "CONNECT_ERROR".to_string()
    } else if e.is_redirect() {
        "REDIRECT_LOOP".to_string()
    } else {
        format!("FETCH_ERROR: {e}")
    }
}

/// Seam between the pipeline and the live web.
#[async_trait]
pub trait LinkChecker: Send + Sync {
    async fn check_all(&self, urls: Vec<String>, homepages: &[String]) -> BTreeMap<String, UrlCheckResult>;
}

#[async_trait]
impl LinkChecker for UrlProber {
    async fn check_all(&self, urls: Vec<String>, homepages: &[String]) -> BTreeMap<String, UrlCheckResult> {
        UrlProber::check_all(self, urls, homepages).await
    }
}

// --- Test helper ---
/// Fixed verdicts per URL; anything unlisted is a plain 200.
#[derive(Default)]
pub struct StaticLinkChecker {
    verdicts: BTreeMap<String, UrlCheckResult>,
}

impl StaticLinkChecker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, url: &str, status: u16) -> Self {
        let r = if is_ok_status(status) {
            UrlCheckResult::ok(url, status, None)
        } else {
            UrlCheckResult::bad(url, Some(status), format!("HTTP_{status}"), None)
        };
        self.verdicts.insert(url.to_string(), r);
        self
    }

    pub fn reason(mut self, url: &str, reason: &str) -> Self {
        self.verdicts
            .insert(url.to_string(), UrlCheckResult::bad(url, Some(200), reason, None));
        self
    }

    pub fn transport_failure(mut self, url: &str) -> Self {
        self.verdicts
            .insert(url.to_string(), UrlCheckResult::bad(url, None, "TIMEOUT", None));
        self
    }

    pub fn moved(mut self, url: &str, to: &str) -> Self {
        self.verdicts
            .insert(url.to_string(), UrlCheckResult::ok(url, 200, Some(to.to_string())));
        self
    }
}

#[async_trait]
impl LinkChecker for StaticLinkChecker {
    async fn check_all(&self, urls: Vec<String>, _homepages: &[String]) -> BTreeMap<String, UrlCheckResult> {
        urls.into_iter()
            .filter(|u| is_http_url(u))
            .map(|u| {
                let r = self
                    .verdicts
                    .get(&u)
                    .cloned()
                    .unwrap_or_else(|| UrlCheckResult::ok(&u, 200, None));
                (u, r)
            })
            .collect()
    }
}

#[derive(Clone)]
pub struct UrlProber {
    http: reqwest::Client,
    settings: ProbeSection,
}

impl UrlProber {
    pub fn new(settings: ProbeSection) -> Result<Self> {
        let timeout = Duration::from_millis(settings.timeout_ms.max(1));
        let http = reqwest::Client::builder()
            .user_agent("Mozilla/5.0 (compatible; competitor-radar/0.1; link-check)")
            .connect_timeout(timeout)
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .context("building probe http client")?;
        Ok(Self { http, settings })
    }

    /// One result per distinct http(s) URL in `urls`, keyed by the URL as
    /// given. `homepages` lists known company homepages; only their origins
    /// get the homepage-fallback check.
    pub async fn check_all(
        &self,
        urls: impl IntoIterator<Item = String>,
        homepages: &[String],
    ) -> BTreeMap<String, UrlCheckResult> {
        let distinct: BTreeSet<String> = urls
            .into_iter()
            .map(|u| u.trim().to_string())
            .filter(|u| is_http_url(u))
            .collect();
        if distinct.is_empty() {
            return BTreeMap::new();
        }

        let signatures = if self.settings.homepage_fallback {
            let known: BTreeSet<String> = homepages.iter().filter_map(|h| origin_of(h)).collect();
            let needed: BTreeSet<String> = distinct
                .iter()
                .filter(|u| !is_root_path(u))
                .filter_map(|u| origin_of(u))
                .filter(|o| known.contains(o))
                .collect();
            fetch_signatures(&self.http, needed).await
        } else {
            HashMap::new()
        };
        let signatures = Arc::new(signatures);

        let prober = self.clone();
        let results = run_pool(
            distinct.into_iter().collect(),
            self.settings.concurrency,
            move |url: String| {
                let prober = prober.clone();
                let signatures = Arc::clone(&signatures);
                async move {
                    let origin = origin_of(&url);
                    let home = origin.as_ref().and_then(|o| signatures.get(o));
                    prober.check(&url, home).await
                }
            },
        )
        .await;

        let bad = results.iter().filter(|r| !r.ok).count();
        tracing::info!(target: "probe", checked = results.len(), bad, "url probe finished");
        results.into_iter().map(|r| (r.url.clone(), r)).collect()
    }

    /// Probe a single URL. `home` is the origin's homepage signature when
    /// the homepage-fallback check applies to it.
    pub async fn check(&self, url: &str, home: Option<&PageSignature>) -> UrlCheckResult {
        let head = self.http.head(url).send().await;
        let (status, landed, get_resp) = match head {
            Ok(r) if !needs_get(r.status().as_u16()) => (r.status().as_u16(), r.url().to_string(), None),
            _ => match self.http.get(url).send().await {
                Ok(r) => (r.status().as_u16(), r.url().to_string(), Some(r)),
                Err(e) => {
                    let reason = transport_reason(&e);
                    tracing::debug!(target: "probe", %url, %reason, "probe transport failure");
                    return UrlCheckResult::bad(url, None, reason, None);
                }
            },
        };
        let moved = (normalize_url(&landed) != normalize_url(url)).then_some(landed);

        if !is_ok_status(status) {
            return UrlCheckResult::bad(url, Some(status), format!("HTTP_{status}"), moved);
        }

        let check_home = self.settings.homepage_fallback && home.is_some() && !is_root_path(url);
        if check_home && moved.as_deref().is_some_and(is_root_path) {
            return UrlCheckResult::bad(url, Some(status), REASON_HOMEPAGE_FALLBACK, moved);
        }

        let wants_body = self.settings.soft_404 || check_home;
        if !wants_body || !(200..300).contains(&status) {
            return UrlCheckResult::ok(url, status, moved);
        }

        let resp = match get_resp {
            Some(r) => r,
            None => match self.http.get(url).send().await {
                Ok(r) => r,
                // body check is best effort; the status already said ok
                Err(_) => return UrlCheckResult::ok(url, status, moved),
            },
        };
        if !is_html(&resp) {
            return UrlCheckResult::ok(url, status, moved);
        }
        let prefix = read_prefix(resp, BODY_BUDGET).await;

        if self.settings.soft_404 && looks_like_soft_404(&prefix) {
            return UrlCheckResult::bad(url, Some(status), REASON_SOFT_404, moved);
        }
        if check_home && home.is_some_and(|h| *h == signature_of(&prefix)) {
            return UrlCheckResult::bad(url, Some(status), REASON_HOMEPAGE_FALLBACK, moved);
        }
        UrlCheckResult::ok(url, status, moved)
    }
}

fn needs_get(status: u16) -> bool {
    status >= 400 || status == 405
}
