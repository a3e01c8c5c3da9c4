// src/pipeline/links.rs
//! Post-hoc link verification: probe every report URL, rewrite moved links,
//! drop items whose page is gone.

use std::collections::BTreeMap;

use metrics::counter;

use crate::config::ProbeSection;
use crate::probe::{LinkChecker, UrlCheckResult};
use crate::report::WeeklyReport;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStats {
    pub checked: usize,
    pub dropped: usize,
    pub rewritten: usize,
    pub transport_failures: usize,
}

enum Verdict {
    Keep,
    Rewrite(String),
    Drop,
}

fn verdict(results: &BTreeMap<String, UrlCheckResult>, url: &str, probe: &ProbeSection) -> Verdict {
    let Some(r) = results.get(url.trim()) else {
        // never probed: not an http(s) URL
        return Verdict::Drop;
    };
    if r.ok {
        return match &r.final_url {
            Some(to) => Verdict::Rewrite(to.clone()),
            None => Verdict::Keep,
        };
    }
    if r.is_transport_failure() && !probe.drop_on_transport_error {
        return Verdict::Keep;
    }
    Verdict::Drop
}

/// Applies the verdict to one optional link. Returns false when the owning
/// item must go.
fn apply(
    slot: &mut Option<String>,
    results: &BTreeMap<String, UrlCheckResult>,
    probe: &ProbeSection,
    stats: &mut LinkStats,
) -> bool {
    let Some(url) = slot.as_deref() else {
        return true;
    };
    match verdict(results, url, probe) {
        Verdict::Keep => true,
        Verdict::Rewrite(to) => {
            *slot = Some(to);
            stats.rewritten += 1;
            true
        }
        Verdict::Drop => {
            stats.dropped += 1;
            false
        }
    }
}

/// `known_homepages` enables the homepage-fallback check for those origins.
pub async fn verify_links(
    mut report: WeeklyReport,
    checker: &dyn LinkChecker,
    probe: &ProbeSection,
    known_homepages: &[String],
) -> (WeeklyReport, LinkStats) {
    let mut urls = report.item_urls();
    urls.extend(report.company_homepages.values().cloned());
    let results = checker.check_all(urls, known_homepages).await;

    let mut stats = LinkStats {
        checked: results.len(),
        transport_failures: results.values().filter(|r| r.is_transport_failure()).count(),
        ..Default::default()
    };
    for r in results.values().filter(|r| !r.ok) {
        tracing::debug!(target: "probe", url = %r.url, status = ?r.status, reason = ?r.reason, "link failed probe");
    }

    report
        .top_highlights
        .retain_mut(|h| apply(&mut h.link, &results, probe, &mut stats));
    for items in report.category_updates.values_mut() {
        items.retain_mut(|u| apply(&mut u.url, &results, probe, &mut stats));
    }
    report
        .overseas_updates
        .retain_mut(|o| apply(&mut o.update.url, &results, probe, &mut stats));
    report
        .hiring_signals
        .retain_mut(|h| apply(&mut h.url, &results, probe, &mut stats));
    report.company_homepages.retain(|_, home| {
        let mut slot = Some(home.clone());
        let keep = apply(&mut slot, &results, probe, &mut stats);
        if let Some(to) = slot {
            *home = to;
        }
        keep
    });

    counter!("radar_urls_dropped_total").increment(stats.dropped as u64);
    counter!("radar_urls_rewritten_total").increment(stats.rewritten as u64);
    tracing::info!(
        target: "probe",
        checked = stats.checked,
        dropped = stats.dropped,
        rewritten = stats.rewritten,
        transport_failures = stats.transport_failures,
        "link verification applied"
    );
    (report, stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::{StaticLinkChecker, REASON_HOMEPAGE_FALLBACK, REASON_SOFT_404};
    use crate::report::{Highlight, HiringSignal, UpdateItem};

    fn update(company: &str, url: &str) -> UpdateItem {
        UpdateItem {
            company: company.into(),
            tag: "Update".into(),
            title: company.into(),
            url: Some(url.into()),
            insight: None,
        }
    }

    fn report() -> WeeklyReport {
        let mut r = WeeklyReport::default();
        r.top_highlights.push(Highlight {
            company: "Gone".into(),
            link: Some("https://example.com/gone".into()),
            ..Default::default()
        });
        r.category_updates.insert(
            "CAT-A".into(),
            vec![
                update("Gone", "https://example.com/gone"),
                update("Soft", "https://soft.example/a"),
                update("Moved", "https://old.example/a"),
                update("Slow", "https://slow.example/a"),
                update("Spoof", "https://spoof.example/a"),
                UpdateItem {
                    company: "Linkless".into(),
                    ..Default::default()
                },
            ],
        );
        r.hiring_signals.push(HiringSignal {
            company: "Fine".into(),
            url: Some("https://fine.example/jobs".into()),
            ..Default::default()
        });
        r
    }

    fn checker() -> StaticLinkChecker {
        StaticLinkChecker::new()
            .status("https://example.com/gone", 404)
            .reason("https://soft.example/a", REASON_SOFT_404)
            .moved("https://old.example/a", "https://new.example/a")
            .transport_failure("https://slow.example/a")
            .reason("https://spoof.example/a", REASON_HOMEPAGE_FALLBACK)
    }

    #[tokio::test]
    async fn dead_links_dropped_and_moved_links_rewritten() {
        let (r, stats) = verify_links(report(), &checker(), &ProbeSection::default(), &[]).await;
        assert!(r.top_highlights.is_empty());
        let items = &r.category_updates["CAT-A"];
        let names: Vec<_> = items.iter().map(|u| u.company.as_str()).collect();
        assert_eq!(names, vec!["Moved", "Slow", "Linkless"]);
        assert_eq!(items[0].url.as_deref(), Some("https://new.example/a"));
        assert_eq!(r.hiring_signals.len(), 1);
        assert_eq!(stats.dropped, 4);
        assert_eq!(stats.rewritten, 1);
        assert_eq!(stats.transport_failures, 1);
    }

    #[tokio::test]
    async fn transport_failures_dropped_when_configured() {
        let probe = ProbeSection {
            drop_on_transport_error: true,
            ..ProbeSection::default()
        };
        let (r, _) = verify_links(report(), &checker(), &probe, &[]).await;
        let names: Vec<_> = r.category_updates["CAT-A"].iter().map(|u| u.company.as_str()).collect();
        assert_eq!(names, vec!["Moved", "Linkless"]);
    }

    #[tokio::test]
    async fn dead_homepages_removed() {
        let mut r = WeeklyReport::default();
        r.company_homepages.insert("A".into(), "https://a.example/".into());
        r.company_homepages.insert("B".into(), "https://b.example/".into());
        let checker = StaticLinkChecker::new().status("https://b.example/", 500);
        let (r, _) = verify_links(r, &checker, &ProbeSection::default(), &[]).await;
        assert_eq!(r.company_homepages.len(), 1);
        assert!(r.company_homepages.contains_key("A"));
    }
}
