// src/notify/mod.rs
//! Delivery seam. Sinks receive only the final validated report plus run
//! counters; they perform no validation of their own.

pub mod email;

use anyhow::Result;
use async_trait::async_trait;

use crate::pipeline::RunCounters;
use crate::report::WeeklyReport;

pub use email::EmailSender;

#[async_trait]
pub trait ReportSink: Send + Sync {
    async fn deliver(&self, report: &WeeklyReport, counters: &RunCounters) -> Result<()>;
    fn name(&self) -> &'static str;
}

/// Plain-text digest used as the mail body.
pub fn render_digest(report: &WeeklyReport, counters: &RunCounters) -> String {
    let mut out = format!(
        "Competitor radar {} (week {})\n\n",
        report.report_date, report.week_number
    );
    if !report.top_highlights.is_empty() {
        out.push_str("== Highlights ==\n");
        for h in &report.top_highlights {
            out.push_str(&format!("[{}] {} / {}: {}\n", h.importance, h.company, h.category, h.title));
            out.push_str(&format!("    {}\n", h.insight));
            if let Some(link) = &h.link {
                out.push_str(&format!("    {link}\n"));
            }
        }
        out.push('\n');
    }
    for (category, items) in &report.category_updates {
        out.push_str(&format!("== {category} ({}) ==\n", items.len()));
        for u in items {
            out.push_str(&format!("- [{}] {}: {}\n", u.tag, u.company, u.title));
            if let Some(url) = &u.url {
                out.push_str(&format!("    {url}\n"));
            }
        }
        out.push('\n');
    }
    if !report.overseas_updates.is_empty() {
        out.push_str(&format!("== Overseas ({}) ==\n", report.overseas_updates.len()));
        for o in &report.overseas_updates {
            let country = o.country.as_deref().unwrap_or("?");
            out.push_str(&format!("- [{}] {} ({country}): {}\n", o.update.tag, o.update.company, o.update.title));
        }
        out.push('\n');
    }
    if !report.hiring_signals.is_empty() {
        out.push_str("== Hiring ==\n");
        for h in &report.hiring_signals {
            out.push_str(&format!("- {}: {} ({})\n", h.company, h.position, h.inference));
        }
        out.push('\n');
    }
    if !report.action_items.is_empty() {
        out.push_str("== Action items ==\n");
        for a in &report.action_items {
            out.push_str(&format!("- {a}\n"));
        }
        out.push('\n');
    }
    out.push_str(&format!(
        "sources: {} | urls dropped: {} | rewritten: {} | deduped: {}\n",
        counters.sources_collected, counters.urls_dropped, counters.urls_rewritten, counters.items_deduped
    ));
    out
}

// --- Test helper ---
/// Records deliveries; can be told to fail.
#[derive(Default)]
pub struct RecordingSink {
    pub delivered: std::sync::Mutex<Vec<WeeklyReport>>,
    pub fail: bool,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn count(&self) -> usize {
        self.delivered.lock().map(|d| d.len()).unwrap_or(0)
    }
}

#[async_trait]
impl ReportSink for RecordingSink {
    async fn deliver(&self, report: &WeeklyReport, _counters: &RunCounters) -> Result<()> {
        if self.fail {
            anyhow::bail!("delivery refused");
        }
        if let Ok(mut d) = self.delivered.lock() {
            d.push(report.clone());
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::UpdateItem;

    #[test]
    fn digest_lists_sections_and_counters() {
        let mut r = WeeklyReport::default();
        r.report_date = "2026-01-12".into();
        r.week_number = 3;
        r.category_updates.insert(
            "CAT-A".into(),
            vec![UpdateItem {
                company: "Acme".into(),
                tag: "투자".into(),
                title: "Acme raises $10M".into(),
                url: Some("https://acme.example/news/1".into()),
                insight: None,
            }],
        );
        let counters = RunCounters {
            sources_collected: 7,
            ..Default::default()
        };
        let text = render_digest(&r, &counters);
        assert!(text.starts_with("Competitor radar 2026-01-12 (week 3)"));
        assert!(text.contains("- [투자] Acme: Acme raises $10M"));
        assert!(text.contains("sources: 7"));
    }
}
