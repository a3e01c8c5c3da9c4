// src/dates.rs
//! Publish-date parsing for evidence from heterogeneous providers, plus ISO week keys.

use chrono::{Datelike, Duration, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;
use time::format_description::well_known::{Rfc2822, Rfc3339};
use time::{OffsetDateTime, UtcOffset};

static RE_RELATIVE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*(\d+)\s*(minute|min|hour|day|week|분|시간|일|주)s?\s*(ago|전)?\s*$")
        .expect("relative date regex")
});

/// Parse a provider date: ISO date, RFC 3339, RFC 2822, "Jan 5, 2026",
/// `2026.01.05.`, or relative "3 days ago" / "3일 전" against `today`.
pub fn parse_published(raw: &str, today: NaiveDate) -> Option<NaiveDate> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = OffsetDateTime::parse(s, &Rfc3339) {
        return offset_to_date(dt);
    }
    if let Ok(dt) = OffsetDateTime::parse(s, &Rfc2822) {
        return offset_to_date(dt);
    }
    for fmt in ["%Y-%m-%d", "%Y.%m.%d", "%Y.%m.%d.", "%Y/%m/%d", "%b %d, %Y", "%B %d, %Y"] {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Some(d);
        }
    }
    // "2026-01-05T10:00:00" without offset
    if s.len() >= 10 {
        if let Some(prefix) = s.get(..10) {
            if let Ok(d) = NaiveDate::parse_from_str(prefix, "%Y-%m-%d") {
                return Some(d);
            }
        }
    }
    let caps = RE_RELATIVE.captures(s)?;
    let n: i64 = caps.get(1)?.as_str().parse().ok()?;
    let unit = caps.get(2)?.as_str().to_lowercase();
    let back = match unit.as_str() {
        "minute" | "min" | "분" | "hour" | "시간" => Duration::zero(),
        "day" | "일" => Duration::try_days(n)?,
        "week" | "주" => Duration::try_weeks(n)?,
        _ => return None,
    };
    today.checked_sub_signed(back)
}

fn offset_to_date(dt: OffsetDateTime) -> Option<NaiveDate> {
    let utc = dt.to_offset(UtcOffset::UTC);
    NaiveDate::from_ymd_opt(utc.year(), u8::from(utc.month()) as u32, utc.day() as u32)
}

/// ISO week key, e.g. `2026-W03`. Sorts chronologically as a plain string.
pub fn week_key(date: NaiveDate) -> String {
    let w = date.iso_week();
    format!("{:04}-W{:02}", w.year(), w.week())
}
