// src/probe/homepage.rs
//! Homepage-fallback detection: sites that answer unknown paths with their
//! homepage instead of an error status.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;

use super::soft404::{is_html, read_prefix, BODY_BUDGET};

/// Body bytes compared between a page and its origin's homepage.
pub const SIGNATURE_BYTES: usize = 4 * 1024;

static RE_TITLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").expect("title regex"));
static RE_TAGS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<[^>]+>").expect("tag regex"));
static RE_SCRIPT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<(script|style)[^>]*>.*?</(script|style)>").expect("script regex")
});
static RE_WS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("ws regex"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageSignature {
    pub title: String,
    pub body: String,
}

impl PageSignature {
    pub fn is_blank(&self) -> bool {
        self.title.is_empty() && self.body.is_empty()
    }
}

fn normalize_text(s: &str) -> String {
    let decoded = html_escape::decode_html_entities(s).to_string();
    RE_WS.replace_all(&decoded, " ").trim().to_lowercase()
}

/// Normalized title plus the visible text of the first few KB.
pub fn signature_of(html: &str) -> PageSignature {
    let prefix: String = if html.len() > SIGNATURE_BYTES {
        let mut end = SIGNATURE_BYTES;
        while !html.is_char_boundary(end) {
            end -= 1;
        }
        html[..end].to_string()
    } else {
        html.to_string()
    };
    let title = RE_TITLE
        .captures(html)
        .and_then(|c| c.get(1))
        .map(|m| normalize_text(m.as_str()))
        .unwrap_or_default();
    let without_scripts = RE_SCRIPT.replace_all(&prefix, " ");
    let text = RE_TAGS.replace_all(&without_scripts, " ");
    PageSignature {
        title,
        body: normalize_text(&text),
    }
}

/// Fetches `/` of each origin once. Origins that fail or serve nothing
/// comparable are left out, which disables the check for them.
pub async fn fetch_signatures(
    http: &reqwest::Client,
    origins: impl IntoIterator<Item = String>,
) -> HashMap<String, PageSignature> {
    let mut out = HashMap::new();
    for origin in origins {
        let url = format!("{origin}/");
        let resp = match http.get(&url).send().await {
            Ok(r) if r.status().is_success() && is_html(&r) => r,
            Ok(r) => {
                tracing::debug!(target: "probe", %origin, status = r.status().as_u16(), "homepage not comparable");
                continue;
            }
            Err(e) => {
                tracing::debug!(target: "probe", %origin, error = %e, "homepage fetch failed");
                continue;
            }
        };
        let sig = signature_of(&read_prefix(resp, BODY_BUDGET).await);
        if !sig.is_blank() {
            out.insert(origin, sig);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_ignores_markup_and_entities() {
        let a = signature_of("<html><head><title>Acme &amp; Co</title><script>var t=1;</script></head><body><h1>Welcome</h1>  to   Acme</body>");
        let b = signature_of("<html><head><title>Acme & Co</title><script>var t=2;</script></head><body><h1>Welcome</h1> to Acme</body>");
        assert_eq!(a, b);
        assert_eq!(a.title, "acme & co");
        assert_eq!(a.body, "acme & co welcome to acme");
    }

    #[test]
    fn different_pages_differ() {
        let home = signature_of("<title>Acme</title><p>Home</p>");
        let article = signature_of("<title>Acme raises $10M</title><p>Story</p>");
        assert_ne!(home, article);
    }
}
