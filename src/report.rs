// src/report.rs
//! Report data model shared by every pipeline stage.
//!
//! All containers default to empty so a partially-filled oracle answer
//! still deserializes; `serde(default)` is applied at struct level.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::url_norm::{is_http_url, normalize_url};

/// One vetted piece of evidence a report item may cite.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceItem {
    pub company: String,
    pub category: String,
    pub title: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quote: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    /// HQ country when the provider already knows it (overseas backfill, watchlist).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
}

impl SourceItem {
    pub fn canonical_url(&self) -> String {
        normalize_url(&self.url)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Highlight {
    pub company: String,
    pub category: String,
    pub title: String,
    pub insight: String,
    pub importance: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct UpdateItem {
    pub company: String,
    pub tag: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insight: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OverseasUpdate {
    #[serde(flatten)]
    pub update: UpdateItem,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HiringSignal {
    pub company: String,
    pub position: String,
    pub inference: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WeeklyReport {
    pub report_date: String,
    pub week_number: u32,
    pub company_homepages: BTreeMap<String, String>,
    pub top_highlights: Vec<Highlight>,
    pub category_updates: BTreeMap<String, Vec<UpdateItem>>,
    pub overseas_updates: Vec<OverseasUpdate>,
    pub hiring_signals: Vec<HiringSignal>,
    pub action_items: Vec<String>,
}

impl WeeklyReport {
    /// Empty report for `date` with exactly `categories` as update keys.
    pub fn empty(date: NaiveDate, categories: &[String]) -> Self {
        let mut report = Self::default();
        report.stamp_date(date);
        report.normalize_categories(categories);
        report
    }

    pub fn stamp_date(&mut self, date: NaiveDate) {
        self.report_date = date.format("%Y-%m-%d").to_string();
        self.week_number = date.iso_week().week();
    }

    /// Force category keys to exactly `categories`. Returns the dropped keys.
    pub fn normalize_categories(&mut self, categories: &[String]) -> Vec<String> {
        let allowed: BTreeSet<&str> = categories.iter().map(String::as_str).collect();
        let dropped: Vec<String> = self
            .category_updates
            .keys()
            .filter(|k| !allowed.contains(k.as_str()))
            .cloned()
            .collect();
        for k in &dropped {
            self.category_updates.remove(k);
        }
        for c in categories {
            self.category_updates.entry(c.clone()).or_default();
        }
        dropped
    }

    /// Every link-bearing URL in the report (not homepages), in report order.
    pub fn item_urls(&self) -> Vec<String> {
        let mut out = Vec::new();
        out.extend(self.top_highlights.iter().filter_map(|h| h.link.clone()));
        for items in self.category_updates.values() {
            out.extend(items.iter().filter_map(|u| u.url.clone()));
        }
        out.extend(self.overseas_updates.iter().filter_map(|o| o.update.url.clone()));
        out.extend(self.hiring_signals.iter().filter_map(|h| h.url.clone()));
        out
    }

    /// URLs already carried by update items (domestic and overseas).
    /// Highlights and hiring signals only point at these stories.
    pub fn update_urls(&self) -> Vec<String> {
        let mut out: Vec<String> = self
            .category_updates
            .values()
            .flatten()
            .filter_map(|u| u.url.clone())
            .collect();
        out.extend(self.overseas_updates.iter().filter_map(|o| o.update.url.clone()));
        out
    }

    pub fn update_count(&self) -> usize {
        self.category_updates.values().map(Vec::len).sum()
    }
}

/// Drops evidence whose URL is not absolute http(s), or whose company/title is blank.
/// Returns the kept items and the number dropped.
pub fn ingest_sources(raw: Vec<SourceItem>) -> (Vec<SourceItem>, usize) {
    let before = raw.len();
    let kept: Vec<SourceItem> = raw
        .into_iter()
        .filter_map(|mut s| {
            s.url = s.url.trim().to_string();
            s.company = s.company.trim().to_string();
            s.title = s.title.trim().to_string();
            if s.company.is_empty() || s.title.is_empty() || !is_http_url(&s.url) {
                return None;
            }
            Some(s)
        })
        .collect();
    let dropped = before - kept.len();
    (kept, dropped)
}

/// Dedup by canonical URL, first occurrence wins.
pub fn dedup_sources(items: Vec<SourceItem>) -> Vec<SourceItem> {
    let mut seen = BTreeSet::new();
    items
        .into_iter()
        .filter(|s| seen.insert(s.canonical_url()))
        .collect()
}
