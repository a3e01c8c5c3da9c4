// src/schema/mod.rs
//! Schema validation for oracle output.
//!
//! Pipeline for any oracle reply: lenient parse -> pick the report object ->
//! placeholder-soften field defects -> typed decode. Only when that fails does
//! the caller spend one structure-only repair call (`repair`).

pub mod lenient;
pub mod repair;

use chrono::NaiveDate;
use serde_json::{Map, Value};

use crate::dates::parse_published;
use crate::report::{SourceItem, WeeklyReport};

pub use lenient::lenient_parse;
pub use repair::{parse_or_repair, repair_report};

pub const PLACEHOLDER_COMPANY: &str = "(회사명 미상)";
pub const PLACEHOLDER_CATEGORY: &str = "(분류 미상)";
pub const PLACEHOLDER_TITLE: &str = "(제목 없음)";
pub const PLACEHOLDER_INSIGHT: &str = "(내용 없음)";
pub const PLACEHOLDER_POSITION: &str = "(직무 미상)";
pub const PLACEHOLDER_INFERENCE: &str = "(추정 근거 없음)";
pub const DEFAULT_TAG: &str = "Update";
const DEFAULT_IMPORTANCE: u64 = 3;

/// Output shape the oracle is asked for; shared by compose and repair prompts.
pub const REPORT_SCHEMA_HINT: &str = r#"{
  "report_date": "YYYY-MM-DD",
  "week_number": 1,
  "company_homepages": {"<company>": "https://..."},
  "top_highlights": [{"company": "", "category": "", "title": "", "insight": "", "importance": 1, "link": "https://..."}],
  "category_updates": {"<category>": [{"company": "", "tag": "", "title": "", "url": "https://...", "insight": ""}]},
  "overseas_updates": [{"company": "", "tag": "", "title": "", "url": "https://...", "insight": "", "category": "", "country": ""}],
  "hiring_signals": [{"company": "", "position": "", "inference": "", "url": "https://..."}],
  "action_items": [""]
}"#;

#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("no JSON value found in provider output")]
    NoJson,
    #[error("top-level JSON is not a report object")]
    NotAnObject,
    #[error("report does not match schema: {0}")]
    Invalid(String),
    #[error("schema repair call failed: {0}")]
    RepairCallFailed(String),
    #[error("schema repair output is still invalid: {0}")]
    RepairFailed(String),
}

/// Lenient parse + decode without any oracle call.
pub fn parse_report_text(text: &str) -> Result<WeeklyReport, SchemaError> {
    let value = lenient_parse(text)?;
    decode_report(value)
}

pub fn decode_report(value: Value) -> Result<WeeklyReport, SchemaError> {
    let obj = select_report_object(value)?;
    let softened = soften_report(obj);
    serde_json::from_value(Value::Object(softened)).map_err(|e| SchemaError::Invalid(e.to_string()))
}

/// Objects pass through. For arrays, prefer the first element that has both
/// `report_date` and `category_updates`, else the first object element.
pub fn select_report_object(value: Value) -> Result<Map<String, Value>, SchemaError> {
    match value {
        Value::Object(m) => Ok(m),
        Value::Array(items) => {
            let looks_like_report = |v: &Value| {
                v.get("report_date").is_some() && v.get("category_updates").is_some()
            };
            let idx = items
                .iter()
                .position(looks_like_report)
                .or_else(|| items.iter().position(Value::is_object));
            match idx.map(|i| items.into_iter().nth(i)) {
                Some(Some(Value::Object(m))) => Ok(m),
                _ => Err(SchemaError::NotAnObject),
            }
        }
        _ => Err(SchemaError::NotAnObject),
    }
}

/// Replace field-level defects with placeholders and drop malformed containers.
pub fn soften_report(mut obj: Map<String, Value>) -> Map<String, Value> {
    if !matches!(obj.get("report_date"), Some(Value::String(_))) {
        obj.remove("report_date");
    }
    match obj.get("week_number").and_then(as_u64) {
        Some(n) => {
            obj.insert("week_number".into(), Value::from(n.min(53)));
        }
        None => {
            obj.remove("week_number");
        }
    }

    match obj.remove("company_homepages") {
        Some(Value::Object(m)) => {
            let cleaned: Map<String, Value> = m
                .into_iter()
                .filter_map(|(k, v)| non_empty_str(&v).map(|s| (k, Value::String(s))))
                .collect();
            obj.insert("company_homepages".into(), Value::Object(cleaned));
        }
        Some(_) => log_dropped("company_homepages"),
        None => {}
    }

    soften_array(&mut obj, "top_highlights", soften_highlight);

    match obj.remove("category_updates") {
        Some(Value::Object(m)) => {
            let mut cleaned = Map::new();
            for (cat, items) in m {
                match items {
                    Value::Array(arr) => {
                        let arr: Vec<Value> = arr.into_iter().filter_map(soften_update).collect();
                        cleaned.insert(cat, Value::Array(arr));
                    }
                    _ => log_dropped("category_updates[*]"),
                }
            }
            obj.insert("category_updates".into(), Value::Object(cleaned));
        }
        Some(_) => log_dropped("category_updates"),
        None => {}
    }

    soften_array(&mut obj, "overseas_updates", soften_overseas);
    soften_array(&mut obj, "hiring_signals", soften_hiring);

    match obj.remove("action_items") {
        Some(Value::Array(arr)) => {
            let items: Vec<Value> = arr
                .iter()
                .filter_map(non_empty_str)
                .map(Value::String)
                .collect();
            obj.insert("action_items".into(), Value::Array(items));
        }
        Some(_) => log_dropped("action_items"),
        None => {}
    }
    obj
}

fn soften_array(obj: &mut Map<String, Value>, key: &'static str, f: fn(Value) -> Option<Value>) {
    match obj.remove(key) {
        Some(Value::Array(arr)) => {
            let items: Vec<Value> = arr.into_iter().filter_map(f).collect();
            obj.insert(key.into(), Value::Array(items));
        }
        Some(_) => log_dropped(key),
        None => {}
    }
}

fn log_dropped(field: &str) {
    tracing::warn!(target: "schema", field, "malformed container dropped");
}

fn soften_highlight(v: Value) -> Option<Value> {
    let Value::Object(mut m) = v else {
        return None;
    };
    require_str(&mut m, "company", PLACEHOLDER_COMPANY);
    require_str(&mut m, "category", PLACEHOLDER_CATEGORY);
    require_str(&mut m, "title", PLACEHOLDER_TITLE);
    require_str(&mut m, "insight", PLACEHOLDER_INSIGHT);
    let importance = m
        .get("importance")
        .and_then(as_u64)
        .unwrap_or(DEFAULT_IMPORTANCE)
        .clamp(1, 5);
    m.insert("importance".into(), Value::from(importance));
    optional_str(&mut m, "link");
    Some(Value::Object(m))
}

fn soften_update(v: Value) -> Option<Value> {
    let Value::Object(mut m) = v else {
        return None;
    };
    require_str(&mut m, "company", PLACEHOLDER_COMPANY);
    require_str(&mut m, "tag", DEFAULT_TAG);
    require_str(&mut m, "title", PLACEHOLDER_TITLE);
    optional_str(&mut m, "url");
    optional_str(&mut m, "insight");
    Some(Value::Object(m))
}

fn soften_overseas(v: Value) -> Option<Value> {
    let Value::Object(mut m) = soften_update(v)? else {
        return None;
    };
    optional_str(&mut m, "category");
    optional_str(&mut m, "country");
    Some(Value::Object(m))
}

fn soften_hiring(v: Value) -> Option<Value> {
    let Value::Object(mut m) = v else {
        return None;
    };
    require_str(&mut m, "company", PLACEHOLDER_COMPANY);
    require_str(&mut m, "position", PLACEHOLDER_POSITION);
    require_str(&mut m, "inference", PLACEHOLDER_INFERENCE);
    optional_str(&mut m, "url");
    Some(Value::Object(m))
}

fn require_str(m: &mut Map<String, Value>, key: &str, placeholder: &str) {
    let value = m
        .get(key)
        .and_then(non_empty_str)
        .unwrap_or_else(|| placeholder.to_string());
    m.insert(key.into(), Value::String(value));
}

fn optional_str(m: &mut Map<String, Value>, key: &str) {
    match m.get(key).and_then(non_empty_str) {
        Some(s) => {
            m.insert(key.into(), Value::String(s));
        }
        None => {
            m.remove(key);
        }
    }
}

/// Strings are trimmed; numbers/bools are stringified; everything else is absent.
fn non_empty_str(v: &Value) -> Option<String> {
    let s = match v {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    (!s.is_empty()).then_some(s)
}

fn as_u64(v: &Value) -> Option<u64> {
    match v {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f.round() as u64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Evidence list from an oracle reply: `{"sources": [...]}` or a bare array.
/// Elements without company/title/url are skipped; the caller still runs
/// URL ingestion on the result.
pub fn parse_source_list(text: &str, today: NaiveDate) -> Result<Vec<SourceItem>, SchemaError> {
    let value = lenient_parse(text)?;
    let items = match value {
        Value::Array(a) => a,
        Value::Object(mut m) => match m.remove("sources").or_else(|| m.remove("items")) {
            Some(Value::Array(a)) => a,
            _ => return Err(SchemaError::Invalid("missing sources array".into())),
        },
        _ => return Err(SchemaError::NotAnObject),
    };
    Ok(items
        .into_iter()
        .filter_map(|v| source_from_value(&v, today))
        .collect())
}

fn source_from_value(v: &Value, today: NaiveDate) -> Option<SourceItem> {
    let m = v.as_object()?;
    let field = |keys: &[&str]| keys.iter().find_map(|k| m.get(*k).and_then(non_empty_str));
    Some(SourceItem {
        company: field(&["company", "company_name", "name"])?,
        category: field(&["category"]).unwrap_or_default(),
        title: field(&["title", "headline"])?,
        url: field(&["url", "link"])?,
        published_at: field(&["published_at", "date", "published"])
            .and_then(|d| parse_published(&d, today)),
        quote: field(&["quote"]),
        note: field(&["note", "summary"]),
        country: field(&["country", "hq_country"]),
    })
}
