// src/schema/repair.rs
//! One structure-only correction call for a report the lenient path could not decode.
//!
//! The oracle only reformats: the prompt forbids new facts and the result is
//! held to the URLs that were already present in the bad output.

use std::collections::BTreeSet;

use metrics::counter;
use once_cell::sync::Lazy;
use regex::Regex;

use super::{parse_report_text, SchemaError, REPORT_SCHEMA_HINT};
use crate::oracle::{ask, Oracle};
use crate::report::WeeklyReport;
use crate::url_norm::normalize_url;

const MAX_BAD_TEXT_CHARS: usize = 60_000;

static RE_URL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"https?://[^\s"'<>\\\)\]\}]+"#).expect("url regex"));

/// Parse the report, or spend exactly one repair call. The second failure is
/// returned as `RepairFailed`/`RepairCallFailed`; callers treat both as fatal.
pub async fn parse_or_repair(
    oracle: &dyn Oracle,
    text: &str,
) -> Result<(WeeklyReport, bool), SchemaError> {
    match parse_report_text(text) {
        Ok(r) => Ok((r, false)),
        Err(first) => {
            tracing::warn!(target: "schema", error = %first, "report failed validation; requesting structure repair");
            let r = repair_report(oracle, text).await?;
            Ok((r, true))
        }
    }
}

pub async fn repair_report(oracle: &dyn Oracle, bad_text: &str) -> Result<WeeklyReport, SchemaError> {
    counter!("radar_schema_repairs_total").increment(1);
    let allowed = extract_urls(bad_text);
    let prompt = build_repair_prompt(bad_text, &allowed);

    let reply = ask(oracle, "schema_repair", &prompt)
        .await
        .map_err(|e| SchemaError::RepairCallFailed(format!("{e:#}")))?;
    let mut report =
        parse_report_text(&reply.text).map_err(|e| SchemaError::RepairFailed(e.to_string()))?;

    let allowed_canon: BTreeSet<String> = allowed.iter().map(|u| normalize_url(u)).collect();
    let stripped = enforce_url_allow_list(&mut report, &allowed_canon);
    if stripped > 0 {
        tracing::warn!(target: "schema", stripped, "repair output carried URLs outside the allow-list; removed");
    }
    Ok(report)
}

/// Distinct URLs mentioned anywhere in `text`, in first-seen order.
pub fn extract_urls(text: &str) -> Vec<String> {
    let mut seen = BTreeSet::new();
    RE_URL
        .find_iter(text)
        .map(|m| m.as_str().trim_end_matches(&['.', ',', ';', ':'][..]).to_string())
        .filter(|u| seen.insert(u.clone()))
        .collect()
}

fn build_repair_prompt(bad_text: &str, allowed: &[String]) -> String {
    let clipped: String = bad_text.chars().take(MAX_BAD_TEXT_CHARS).collect();
    let allow_list = if allowed.is_empty() {
        "(none: every url/link field must be omitted)".to_string()
    } else {
        allowed
            .iter()
            .map(|u| format!("- {u}"))
            .collect::<Vec<_>>()
            .join("\n")
    };
    format!(
        "Reformat the text below into ONE valid JSON object matching this schema.\n\
         Do not add facts. Do not add, invent or alter any URL; preserve URLs exactly.\n\
         Only these URLs may appear in the output:\n{allow_list}\n\n\
         Schema:\n{REPORT_SCHEMA_HINT}\n\n\
         Output only the JSON object, no prose, no code fences.\n\n\
         TEXT:\n{clipped}"
    )
}

/// Removes every URL not in `allowed` (canonical forms). Returns the count removed.
pub fn enforce_url_allow_list(report: &mut WeeklyReport, allowed: &BTreeSet<String>) -> usize {
    let mut removed = 0usize;
    let mut check = |slot: &mut Option<String>| {
        if let Some(u) = slot.as_deref() {
            if !allowed.contains(&normalize_url(u)) {
                *slot = None;
                removed += 1;
            }
        }
    };
    for h in &mut report.top_highlights {
        check(&mut h.link);
    }
    for items in report.category_updates.values_mut() {
        for u in items.iter_mut() {
            check(&mut u.url);
        }
    }
    for o in &mut report.overseas_updates {
        check(&mut o.update.url);
    }
    for h in &mut report.hiring_signals {
        check(&mut h.url);
    }
    let before = report.company_homepages.len();
    report
        .company_homepages
        .retain(|_, u| allowed.contains(&normalize_url(u)));
    removed + (before - report.company_homepages.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::ScriptedOracle;

    #[test]
    fn urls_extracted_without_trailing_punctuation() {
        let text = r#"see https://a.example/x, and "https://b.example/y?q=1". again https://a.example/x"#;
        assert_eq!(
            extract_urls(text),
            vec!["https://a.example/x".to_string(), "https://b.example/y?q=1".to_string()]
        );
    }

    #[tokio::test]
    async fn valid_text_needs_no_oracle_call() {
        let oracle = ScriptedOracle::new();
        let (r, repaired) = parse_or_repair(&oracle, r#"{"report_date": "2026-01-12"}"#)
            .await
            .unwrap();
        assert!(!repaired);
        assert_eq!(r.report_date, "2026-01-12");
        assert!(oracle.prompts().is_empty());
    }

    #[tokio::test]
    async fn repair_strips_urls_outside_allow_list() {
        let oracle = ScriptedOracle::new();
        oracle.push_text(
            r#"{"report_date": "2026-01-12",
                "category_updates": {"CAT-A": [
                  {"company": "Acme", "tag": "M&A", "title": "Acme buys Beta", "url": "https://acme.example/news/1"},
                  {"company": "Gamma", "tag": "Update", "title": "Gamma", "url": "https://invented.example/x"}
                ]}}"#,
        );
        let bad = "Acme buys Beta https://acme.example/news/1 ... sorry I cannot format";
        let (r, repaired) = parse_or_repair(&oracle, bad).await.unwrap();
        assert!(repaired);
        let items = &r.category_updates["CAT-A"];
        assert_eq!(items[0].url.as_deref(), Some("https://acme.example/news/1"));
        assert_eq!(items[1].url, None);
        let prompt = &oracle.prompts()[0];
        assert!(prompt.contains("- https://acme.example/news/1"));
        assert!(prompt.contains("Do not add facts"));
    }

    #[tokio::test]
    async fn second_failure_is_fatal() {
        let oracle = ScriptedOracle::new();
        oracle.push_text("still not json");
        let err = parse_or_repair(&oracle, "garbage").await.unwrap_err();
        assert!(matches!(err, SchemaError::RepairFailed(_)));

        let oracle = ScriptedOracle::new();
        oracle.push_error("timeout");
        let err = parse_or_repair(&oracle, "garbage").await.unwrap_err();
        assert!(matches!(err, SchemaError::RepairCallFailed(_)));
    }
}
