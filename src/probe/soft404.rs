// src/probe/soft404.rs
//! "Not found" pages served with a success status.

use once_cell::sync::Lazy;
use regex::Regex;

/// Body bytes read for content checks.
pub const BODY_BUDGET: usize = 8 * 1024;

static SOFT_404_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)<title>\s*404\s*</title>",
        r"(?i)<title>[^<]*\b404\s*(error|not\s+found|\||-|:)",
        r"(?i)\bpage\s+not\s+found\b",
        r"(?i)\b404\s*(-|:|\|)?\s*not\s+found\b",
        r"(?i)\bthis\s+page\s+(does\s+not|doesn't|doesn’t)\s+exist\b",
        r"(?i)\b(could|can)\s*not\s+be\s+found\b",
        r"(?i)\bthe\s+page\s+you\s*(are|were|’re|'re)\s+looking\s+for\b",
        r"(?i)\barticle\s+(is\s+)?no\s+longer\s+available\b",
        r"페이지를\s*찾을\s*수\s*없습니다",
        r"요청하신\s*페이지(가|를)?\s*(존재하지\s*않|찾을\s*수\s*없)",
        r"존재하지\s*않는\s*(페이지|기사|게시물)",
        r"(삭제|이동)되었거나\s*(존재하지|잘못된|변경)",
        r"기사를\s*찾을\s*수\s*없습니다",
    ]
    .into_iter()
    .map(|p| Regex::new(p).expect("soft-404 regex"))
    .collect()
});

pub fn looks_like_soft_404(body_prefix: &str) -> bool {
    SOFT_404_PATTERNS.iter().any(|re| re.is_match(body_prefix))
}

/// Reads at most `limit` body bytes chunk by chunk; a mid-body error keeps
/// whatever arrived.
pub async fn read_prefix(mut resp: reqwest::Response, limit: usize) -> String {
    let mut buf: Vec<u8> = Vec::with_capacity(limit.min(16 * 1024));
    while buf.len() < limit {
        match resp.chunk().await {
            Ok(Some(chunk)) => buf.extend_from_slice(&chunk),
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(target: "probe", error = %e, "body read aborted");
                break;
            }
        }
    }
    buf.truncate(limit);
    String::from_utf8_lossy(&buf).into_owned()
}

pub fn is_html(resp: &reqwest::Response) -> bool {
    resp.headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| {
            let ct = ct.to_ascii_lowercase();
            ct.contains("text/html") || ct.contains("application/xhtml")
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn english_and_korean_phrases() {
        assert!(looks_like_soft_404("<html><title>404 | Acme</title>"));
        assert!(looks_like_soft_404("<title>404</title>"));
        assert!(looks_like_soft_404("<title>Acme - 404 Error</title>"));
        assert!(looks_like_soft_404("<h1>Page Not Found</h1>"));
        assert!(looks_like_soft_404("Sorry, the page you're looking for is gone"));
        assert!(looks_like_soft_404("<p>페이지를 찾을 수 없습니다.</p>"));
        assert!(looks_like_soft_404("요청하신 페이지가 존재하지 않습니다"));
        assert!(looks_like_soft_404("존재하지 않는 기사입니다"));
    }

    #[test]
    fn ordinary_articles_pass() {
        assert!(!looks_like_soft_404("<title>Acme raises $10M</title><p>Found 404 robots in stock</p>"));
        assert!(!looks_like_soft_404("<title>Acme ships 404 units</title>"));
        assert!(!looks_like_soft_404("<title>404 robots shipped | Acme</title>"));
        assert!(!looks_like_soft_404("<p>레인보우로보틱스가 신제품을 공개했다</p>"));
    }
}
