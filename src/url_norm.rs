// src/url_norm.rs
//! Canonical URL form used only for equality checks (dedup, ledger, allow-lists).
//! Never display or deliver the canonical string; keep the original link for that.

use url::Url;

/// Canonicalize `raw`: drop fragment and `utm_*` params, drop an empty query,
/// collapse a non-root trailing slash. Unparseable input is returned trimmed.
pub fn normalize_url(raw: &str) -> String {
    let trimmed = raw.trim();
    let Ok(mut url) = Url::parse(trimmed) else {
        return trimmed.to_string();
    };

    url.set_fragment(None);

    if let Some(query) = url.query() {
        let kept: Vec<&str> = query
            .split('&')
            .filter(|pair| !pair.is_empty())
            .filter(|pair| {
                let name = pair.split('=').next().unwrap_or_default();
                !name.to_ascii_lowercase().starts_with("utm_")
            })
            .collect();
        if kept.is_empty() {
            url.set_query(None);
        } else {
            let joined = kept.join("&");
            url.set_query(Some(&joined));
        }
    }

    let path = url.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        let collapsed = path.trim_end_matches('/');
        url.set_path(if collapsed.is_empty() { "/" } else { collapsed });
    }

    url.to_string()
}

/// True for absolute http(s) URLs with a host.
pub fn is_http_url(raw: &str) -> bool {
    match Url::parse(raw.trim()) {
        Ok(u) => matches!(u.scheme(), "http" | "https") && u.host_str().is_some(),
        Err(_) => false,
    }
}

/// `scheme://host[:port]` of an http(s) URL.
pub fn origin_of(raw: &str) -> Option<String> {
    let u = Url::parse(raw.trim()).ok()?;
    if !matches!(u.scheme(), "http" | "https") {
        return None;
    }
    Some(u.origin().ascii_serialization())
}

/// Lowercased host without a leading `www.`.
pub fn host_of(raw: &str) -> Option<String> {
    let u = Url::parse(raw.trim()).ok()?;
    let h = u.host_str()?.to_ascii_lowercase();
    Some(h.strip_prefix("www.").unwrap_or(&h).to_string())
}

/// True when the URL points at the site root (`/`, no query).
pub fn is_root_path(raw: &str) -> bool {
    match Url::parse(raw.trim()) {
        Ok(u) => u.path() == "/" && u.query().is_none(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_fragment_and_tracking() {
        assert_eq!(
            normalize_url("https://a.example/x?utm_source=x&id=3&UTM_Medium=y#frag"),
            "https://a.example/x?id=3"
        );
    }

    #[test]
    fn drops_empty_query() {
        assert_eq!(
            normalize_url("https://a.example/x?utm_source=x"),
            "https://a.example/x"
        );
        assert_eq!(normalize_url("https://a.example/x?"), "https://a.example/x");
    }

    #[test]
    fn collapses_trailing_slash_but_keeps_root() {
        assert_eq!(normalize_url("https://a.example/news/"), "https://a.example/news");
        assert_eq!(normalize_url("https://a.example/news//"), "https://a.example/news");
        assert_eq!(normalize_url("https://a.example/"), "https://a.example/");
        assert_eq!(normalize_url("https://a.example"), "https://a.example/");
    }

    #[test]
    fn garbage_fails_open() {
        assert_eq!(normalize_url("  not a url  "), "not a url");
    }

    #[test]
    fn http_check_and_origin() {
        assert!(is_http_url("http://a.example/x"));
        assert!(!is_http_url("mailto:a@b.c"));
        assert!(!is_http_url("/relative"));
        assert_eq!(
            origin_of("https://a.example:8443/x?q=1").as_deref(),
            Some("https://a.example:8443")
        );
        assert_eq!(host_of("https://WWW.Acme.example/a").as_deref(), Some("acme.example"));
        assert!(is_root_path("https://a.example"));
        assert!(!is_root_path("https://a.example/news"));
    }
}
