// src/origin.rs
//! Headquarters resolution and domestic/overseas partitioning.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;

use crate::config::RadarConfig;
use crate::fill::company_key;
use crate::oracle::{ask, Oracle};
use crate::report::{OverseasUpdate, WeeklyReport};
use crate::schema::lenient_parse;

const DOMESTIC_LABELS: [&str; 4] = ["korea", "south korea", "republic of korea", "kr"];

pub fn is_domestic_label(label: &str) -> bool {
    let l = label.trim().to_lowercase();
    DOMESTIC_LABELS.contains(&l.as_str())
}

/// Company -> HQ country label for one run.
#[derive(Debug, Clone, Default)]
pub struct CompanyHq {
    by_name: BTreeMap<String, String>,
    by_key: BTreeMap<String, String>,
}

impl CompanyHq {
    /// Seeds the map with countries declared in the watchlist.
    pub fn from_config(config: &RadarConfig) -> Self {
        let mut hq = Self::default();
        for w in &config.watchlist {
            if let Some(country) = &w.country {
                hq.insert(&w.name, country);
                for alias in &w.aliases {
                    hq.insert(alias, country);
                }
            }
        }
        hq
    }

    pub fn insert(&mut self, company: &str, country: &str) {
        let country = country.trim();
        if company.trim().is_empty() || country.is_empty() {
            return;
        }
        self.by_name.insert(company.trim().to_string(), country.to_string());
        let key = company_key(company);
        if !key.is_empty() {
            self.by_key.insert(key, country.to_string());
        }
    }

    /// Literal name first, then the normalized company identity.
    pub fn country_of(&self, company: &str) -> Option<&str> {
        self.by_name
            .get(company.trim())
            .or_else(|| self.by_key.get(&company_key(company)))
            .map(String::as_str)
    }

    /// Known and non-domestic. Unknown HQ is never foreign.
    pub fn is_foreign(&self, company: &str) -> bool {
        self.country_of(company).is_some_and(|c| !is_domestic_label(c))
    }

    pub fn contains(&self, company: &str) -> bool {
        self.country_of(company).is_some()
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

/// Moves category updates of foreign-HQ companies into `overseas_updates`.
/// Returns the report and the number of items moved.
pub fn classify(mut report: WeeklyReport, hq: &CompanyHq) -> (WeeklyReport, usize) {
    let mut moved = Vec::new();
    for (category, items) in report.category_updates.iter_mut() {
        let (foreign, domestic): (Vec<_>, Vec<_>) =
            std::mem::take(items).into_iter().partition(|u| hq.is_foreign(&u.company));
        *items = domestic;
        for update in foreign {
            let country = hq.country_of(&update.company).map(str::to_string);
            moved.push(OverseasUpdate {
                update,
                category: Some(category.clone()),
                country,
            });
        }
    }
    let n = moved.len();
    if n > 0 {
        tracing::info!(moved = n, "moved foreign-HQ updates to overseas bucket");
    }
    report.overseas_updates.extend(moved);
    for o in report.overseas_updates.iter_mut() {
        if o.country.is_none() {
            o.country = hq.country_of(&o.update.company).map(str::to_string);
        }
    }
    (report, n)
}

/// Categories whose distinct domestic companies (unknown HQ counts as
/// domestic) are below `min`.
pub fn domestic_shortfall(report: &WeeklyReport, hq: &CompanyHq, min: usize) -> Vec<String> {
    report
        .category_updates
        .iter()
        .filter(|(_, items)| {
            let distinct: BTreeSet<String> = items
                .iter()
                .filter(|u| !hq.is_foreign(&u.company))
                .map(|u| company_key(&u.company))
                .collect();
            distinct.len() < min
        })
        .map(|(c, _)| c.clone())
        .collect()
}

/// One oracle call for the HQ country of every company not already known
/// from config. Countries declared in config always win. A failed or
/// unparseable answer degrades to the config-only map.
pub async fn resolve_hq(oracle: &dyn Oracle, companies: &[String], config: &RadarConfig) -> CompanyHq {
    let mut hq = CompanyHq::from_config(config);
    let mut unknown: Vec<&str> = Vec::new();
    let mut seen = BTreeSet::new();
    for c in companies {
        if !hq.contains(c) && seen.insert(company_key(c)) {
            unknown.push(c.as_str());
        }
    }
    if unknown.is_empty() {
        return hq;
    }

    let prompt = format!(
        "For each company below, give the country of its headquarters.\n\
         Answer with one JSON object mapping the exact company name to a country name in English.\n\
         Use \"Unknown\" when unsure. Output only JSON.\n\n{}",
        unknown
            .iter()
            .map(|c| format!("- {c}"))
            .collect::<Vec<_>>()
            .join("\n")
    );
    let reply = match ask(oracle, "hq_resolve", &prompt).await {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(error = ?e, "HQ resolution failed; using watchlist countries only");
            return hq;
        }
    };
    match lenient_parse(&reply.text) {
        Ok(Value::Object(map)) => {
            for (company, country) in map {
                let Some(country) = country.as_str() else { continue };
                if country.eq_ignore_ascii_case("unknown") || hq.contains(&company) {
                    continue;
                }
                hq.insert(&company, country);
            }
        }
        Ok(_) | Err(_) => {
            tracing::warn!("HQ resolution reply was not a JSON object; ignored");
        }
    }
    tracing::info!(known = hq.len(), asked = unknown.len(), "resolved company headquarters");
    hq
}
