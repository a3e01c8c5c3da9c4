// src/fill.rs
//! Deterministic fallback filler: tops up report sections straight from the
//! vetted evidence list. No oracle calls; nothing beyond the evidence
//! item's own title/note/quote is written.

use std::collections::{BTreeMap, BTreeSet};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::origin::CompanyHq;
use crate::report::{OverseasUpdate, SourceItem, UpdateItem, WeeklyReport};
use crate::schema::DEFAULT_TAG;
use crate::url_norm::normalize_url;

/// Ordered keyword -> tag rules; first match wins.
static TAG_RULES: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    let rules: [(&str, &str); 8] = [
        (r"(?i)\b(acqui\w*|m&a|merg\w*|takeover)\b|인수|합병", "M&A"),
        (r"(?i)\b(funding|raise[sd]?|raising|series [a-f]|investment|invests?)\b|투자|유치", "투자"),
        (r"(?i)\b(launch\w*|release[sd]?|unveil\w*|introduc\w*)\b|출시|공개|선보", "출시"),
        (r"(?i)\b(partner\w*|alliance|mou|collaborat\w*)\b|제휴|협력|협약|파트너", "제휴"),
        (r"(?i)\b(revenue|earnings|profit|quarterly results)\b|매출|실적|영업이익", "실적"),
        (r"(?i)\b(ceo|cto|appoint\w*|hires?|hiring)\b|선임|영입|채용", "인사"),
        (r"(?i)\b(lawsuit|regulat\w*|fine[sd]?|sued)\b|소송|규제|제재", "규제"),
        (r"(?i)\b(expan\w*|enters?|entry)\b|진출|확장", "해외진출"),
    ];
    rules
        .into_iter()
        .map(|(p, tag)| (Regex::new(p).expect("tag rule regex"), tag))
        .collect()
});

static RE_PAREN_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s*[\(\[（][^\)\]）]*[\)\]）]\s*$").expect("paren regex"));
static RE_DASH_TAIL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s*(—|–|\s-\s).*$").expect("dash regex"));
static RE_LEGAL_FORM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(^\(주\)|\(주\)$|^주식회사|주식회사$|,?\s+(inc|corp|co|ltd|llc|gmbh|plc)\.?$)")
        .expect("legal form regex")
});

/// Tag for an evidence title (and optional note).
pub fn infer_tag(title: &str, note: Option<&str>) -> &'static str {
    let text = match note {
        Some(n) => format!("{title} {n}"),
        None => title.to_string(),
    };
    TAG_RULES
        .iter()
        .find(|(re, _)| re.is_match(&text))
        .map(|(_, tag)| *tag)
        .unwrap_or(DEFAULT_TAG)
}

/// Display-level variant stripping: trailing parenthetical alias and text
/// after an em/en dash or a spaced hyphen.
pub fn strip_name_variant(name: &str) -> String {
    let s = RE_PAREN_SUFFIX.replace(name.trim(), "");
    let s = RE_DASH_TAIL.replace(&s, "");
    s.trim().to_string()
}

/// Canonical company identity used for dedup and matching.
pub fn company_key(name: &str) -> String {
    let base = strip_name_variant(name);
    let base = RE_LEGAL_FORM.replace_all(&base, "");
    base.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Thresholds the filler needs from configuration.
#[derive(Debug, Clone, Copy)]
pub struct FillLimits {
    pub max_companies_per_category: usize,
    pub allow_multiple_per_company: bool,
    pub max_items_per_company: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FillOutcome {
    pub added: usize,
    pub collapsed: usize,
}

/// Per category: collapse oracle items to one per company (or up to the
/// per-company cap), then append evidence items for companies not yet
/// represented until the category cap or the evidence runs out. Evidence
/// for companies with a known foreign HQ is left to `fill_overseas`.
pub fn fill_category_updates(
    mut report: WeeklyReport,
    evidence: &[SourceItem],
    hq: &CompanyHq,
    limits: FillLimits,
) -> (WeeklyReport, FillOutcome) {
    let mut outcome = FillOutcome::default();
    let per_company = if limits.allow_multiple_per_company {
        limits.max_items_per_company.max(1)
    } else {
        1
    };
    let mut used_urls: BTreeSet<String> =
        report.update_urls().iter().map(|u| normalize_url(u)).collect();

    for (category, items) in report.category_updates.iter_mut() {
        let mut per_key: BTreeMap<String, usize> = BTreeMap::new();
        let before = items.len();
        items.retain(|u| {
            let n = per_key.entry(company_key(&u.company)).or_default();
            *n += 1;
            *n <= per_company
        });
        outcome.collapsed += before - items.len();

        for ev in evidence.iter().filter(|e| &e.category == category) {
            if per_key.len() >= limits.max_companies_per_category {
                break;
            }
            let key = company_key(&ev.company);
            if key.is_empty() || per_key.contains_key(&key) {
                continue;
            }
            if hq.is_foreign(&ev.company) || ev.country.as_deref().is_some_and(is_foreign_label) {
                continue;
            }
            if !used_urls.insert(ev.canonical_url()) {
                continue;
            }
            per_key.insert(key, 1);
            items.push(update_from_evidence(ev));
            outcome.added += 1;
        }
    }
    (report, outcome)
}

/// Append evidence for foreign-HQ companies to the overseas bucket until it
/// holds `max_items`. One item per company, no URL already in the report.
pub fn fill_overseas(
    mut report: WeeklyReport,
    evidence: &[SourceItem],
    hq: &CompanyHq,
    max_items: usize,
) -> (WeeklyReport, usize) {
    let mut used_urls: BTreeSet<String> =
        report.update_urls().iter().map(|u| normalize_url(u)).collect();
    let mut companies: BTreeSet<String> = report
        .overseas_updates
        .iter()
        .map(|o| company_key(&o.update.company))
        .collect();
    let mut added = 0usize;

    for ev in evidence {
        if report.overseas_updates.len() >= max_items {
            break;
        }
        let country = ev.country.clone().or_else(|| hq.country_of(&ev.company).map(str::to_string));
        let foreign = country.as_deref().is_some_and(is_foreign_label);
        if !foreign {
            continue;
        }
        let key = company_key(&ev.company);
        if key.is_empty() || companies.contains(&key) || used_urls.contains(&ev.canonical_url()) {
            continue;
        }
        companies.insert(key);
        used_urls.insert(ev.canonical_url());
        report.overseas_updates.push(OverseasUpdate {
            update: update_from_evidence(ev),
            category: (!ev.category.is_empty()).then(|| ev.category.clone()),
            country,
        });
        added += 1;
    }
    (report, added)
}

fn is_foreign_label(label: &str) -> bool {
    !crate::origin::is_domestic_label(label)
}

pub fn update_from_evidence(ev: &SourceItem) -> UpdateItem {
    UpdateItem {
        company: ev.company.clone(),
        tag: infer_tag(&ev.title, ev.note.as_deref()).to_string(),
        title: ev.title.clone(),
        url: Some(ev.url.clone()),
        insight: ev.note.clone().or_else(|| ev.quote.clone()),
    }
}
