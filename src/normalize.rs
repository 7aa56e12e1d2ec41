//! Raw article normalization
//!
//! Stateless conversion of a provider payload into the canonical
//! [`ArticleRecord`]. Missing or malformed optional fields become `None`
//! rather than errors; only the format-check boundary in the fetcher can
//! reject a payload.

use crate::{ArticleRecord, RawArticle};
use chrono::DateTime;
use serde_json::Value;
use std::collections::BTreeSet;

/// Timestamp layout used for `time_added`
const ISO_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Normalization seam used by the export driver.
///
/// Any `Fn(&RawArticle) -> ArticleRecord` qualifies, so tests can swap in
/// a closure.
pub trait Normalize: Send + Sync {
    /// Convert one raw article. Must be pure.
    fn normalize(&self, raw: &RawArticle) -> ArticleRecord;
}

impl<F> Normalize for F
where
    F: Fn(&RawArticle) -> ArticleRecord + Send + Sync,
{
    fn normalize(&self, raw: &RawArticle) -> ArticleRecord {
        self(raw)
    }
}

/// Default Pocket normalizer
#[derive(Debug, Clone, Copy, Default)]
pub struct PocketNormalizer;

impl Normalize for PocketNormalizer {
    fn normalize(&self, raw: &RawArticle) -> ArticleRecord {
        normalize(raw)
    }
}

/// Normalize one raw Pocket article.
///
/// # Examples
///
/// ```
/// use pocket_exporter::normalize::normalize;
/// use pocket_exporter::RawArticle;
///
/// let fields = serde_json::json!({
///     "item_id": "42",
///     "time_added": "1625097600",
///     "word_count": "350",
///     "tags": {"rust": {"item_id": "42", "tag": "rust"}}
/// });
/// let raw = RawArticle::new("42", fields.as_object().unwrap().clone());
/// let record = normalize(&raw);
///
/// assert_eq!(record.time_added.as_deref(), Some("2021-07-01T00:00:00Z"));
/// assert_eq!(record.word_count, Some(350));
/// assert!(record.tags.contains("rust"));
/// ```
pub fn normalize(raw: &RawArticle) -> ArticleRecord {
    let item_id = get_string(raw, "item_id").unwrap_or_else(|| raw.item_id().to_string());

    ArticleRecord {
        item_id,
        resolved_url: get_string(raw, "resolved_url"),
        resolved_title: get_string(raw, "resolved_title"),
        excerpt: get_string(raw, "excerpt"),
        tags: parse_tags(raw.get("tags")),
        status: get_string(raw, "status"),
        time_added: raw.get("time_added").and_then(normalize_time),
        word_count: raw.get("word_count").and_then(parse_count),
        original: raw.fields().clone(),
    }
}

fn get_string(raw: &RawArticle, field: &str) -> Option<String> {
    match raw.get(field)? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Tag names are the keys of the `tags` object; anything else means no tags.
fn parse_tags(value: Option<&Value>) -> BTreeSet<String> {
    match value {
        Some(Value::Object(map)) => map.keys().cloned().collect(),
        _ => BTreeSet::new(),
    }
}

/// Unix seconds (string or number) to ISO-8601 UTC. Zero means "never".
fn normalize_time(value: &Value) -> Option<String> {
    let secs = match value {
        Value::String(s) => s.trim().parse::<i64>().ok()?,
        Value::Number(n) => n.as_i64()?,
        _ => return None,
    };
    if secs == 0 {
        return None;
    }
    DateTime::from_timestamp(secs, 0).map(|dt| dt.format(ISO_FORMAT).to_string())
}

fn parse_count(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && *f >= 0.0)
                .map(|f| f.trunc() as u64)
        }),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    }
}
