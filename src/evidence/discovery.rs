// src/evidence/discovery.rs
//! Oracle-assisted company discovery for categories the watchlist leaves short.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use crate::config::{RadarConfig, WatchCompany};
use crate::fill::company_key;
use crate::oracle::{ask, DynOracle};
use crate::pool::run_pool;
use crate::schema::lenient_parse;

#[derive(Debug, Deserialize)]
struct Found {
    #[serde(default)]
    name: String,
    #[serde(default)]
    aliases: Vec<String>,
    #[serde(default)]
    keywords: Vec<String>,
    #[serde(default)]
    country: Option<String>,
}

fn discovery_prompt(category: &str, known: &[String], limit: usize) -> String {
    format!(
        "List up to {limit} Korean companies that are active in the category \"{category}\".\n\
         Skip these companies: {known}.\n\
         Answer with one JSON object: {{\"companies\": [{{\"name\": \"...\", \"aliases\": [\"...\"], \"keywords\": [\"...\"], \"country\": \"Korea\"}}]}}.\n\
         Output only JSON.",
        known = if known.is_empty() { "(none)".to_string() } else { known.join(", ") },
    )
}

fn parse_found(text: &str) -> Vec<Found> {
    let items = match lenient_parse(text) {
        Ok(Value::Object(mut m)) => match m.remove("companies") {
            Some(Value::Array(a)) => a,
            _ => Vec::new(),
        },
        Ok(Value::Array(a)) => a,
        _ => Vec::new(),
    };
    items
        .into_iter()
        .filter_map(|v| serde_json::from_value::<Found>(v).ok())
        .filter(|f| !f.name.trim().is_empty())
        .collect()
}

/// One oracle call per short category, fanned out through the worker pool.
/// New companies are capped per category and in total; names already on
/// the watchlist (by company identity) are skipped.
pub async fn discover_companies(
    oracle: DynOracle,
    config: &RadarConfig,
    short_categories: &[String],
    known: &[WatchCompany],
) -> Vec<WatchCompany> {
    let ns = &config.news_search;
    if short_categories.is_empty() || ns.discovery_max_total == 0 {
        return Vec::new();
    }
    let known_names: Vec<String> = known.iter().map(|w| w.name.clone()).collect();
    let per_category = ns.discovery_max_per_category;
    let names = Arc::new(known_names.clone());

    let mut replies = run_pool(short_categories.to_vec(), ns.concurrency, move |category: String| {
        let oracle = Arc::clone(&oracle);
        let names = Arc::clone(&names);
        async move {
            let prompt = discovery_prompt(&category, &names, per_category);
            match ask(oracle.as_ref(), "discovery", &prompt).await {
                Ok(r) => (category, parse_found(&r.text)),
                Err(e) => {
                    tracing::warn!(target: "evidence", %category, error = ?e, "company discovery failed");
                    (category, Vec::new())
                }
            }
        }
    })
    .await;

    // pool output is unordered; keep category order stable
    replies.sort_by_key(|(c, _)| short_categories.iter().position(|s| s == c));

    let mut taken: BTreeSet<String> = known_names.iter().map(|n| company_key(n)).collect();
    let mut out = Vec::new();
    'categories: for (category, found) in replies {
        let mut added_here = 0usize;
        for f in found {
            if out.len() >= ns.discovery_max_total {
                break 'categories;
            }
            if added_here >= per_category {
                break;
            }
            let key = company_key(&f.name);
            if key.is_empty() || !taken.insert(key) {
                continue;
            }
            out.push(WatchCompany {
                name: f.name.trim().to_string(),
                category: category.clone(),
                aliases: f.aliases,
                keywords: f.keywords,
                country: f.country,
                homepage: None,
            });
            added_here += 1;
        }
    }
    tracing::info!(target: "evidence", discovered = out.len(), categories = short_categories.len(), "company discovery finished");
    out
}
