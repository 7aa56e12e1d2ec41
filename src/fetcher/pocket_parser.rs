//! Pocket `/v3/get` response parser
//!
//! Stateless validation of the response body. This is the format-check
//! boundary: everything past it can rely on each [`RawArticle`] having an
//! id and an object payload.

use crate::fetcher::{FetchError, FetcherResult};
use crate::RawArticle;
use serde_json::{Map, Value};

/// Validated page contents
#[derive(Debug, Clone, PartialEq)]
pub struct PocketPage {
    /// Articles in provider order
    pub articles: Vec<RawArticle>,
    /// Provider completion indicator, as sent
    pub complete: bool,
}

/// Stateless parser for Pocket API responses
pub struct PocketParser;

impl PocketParser {
    /// Parse a raw response body
    ///
    /// # Errors
    /// Returns `FetchError::Format` if the body is not JSON or has the wrong shape.
    pub fn parse_body(body: &str) -> FetcherResult<PocketPage> {
        let value: Value = serde_json::from_str(body)
            .map_err(|e| FetchError::Format(format!("response is not valid JSON: {e}")))?;
        Self::parse_value(value)
    }

    /// Parse an already decoded response
    ///
    /// # Format
    /// `{"status": 1, "complete": 1, "list": {"<item_id>": {...}, ...}, ...}`.
    /// An empty `list` may arrive as `[]`.
    ///
    /// # Errors
    /// Returns `FetchError::Format` when `list` or `complete` is missing or malformed.
    pub fn parse_value(value: Value) -> FetcherResult<PocketPage> {
        let Value::Object(mut body) = value else {
            return Err(FetchError::Format(
                "response is not a JSON object".to_string(),
            ));
        };

        let complete = body
            .get("complete")
            .ok_or_else(|| FetchError::Format("missing completion indicator 'complete'".to_string()))
            .and_then(Self::parse_flag)?;

        let list = body
            .remove("list")
            .ok_or_else(|| FetchError::Format("missing article collection 'list'".to_string()))?;

        let articles = match list {
            Value::Object(entries) => Self::parse_keyed(entries)?,
            Value::Array(items) => Self::parse_array(items)?,
            other => {
                return Err(FetchError::Format(format!(
                    "article collection has unexpected type: {}",
                    json_type(&other)
                )))
            }
        };

        Ok(PocketPage { articles, complete })
    }

    fn parse_keyed(entries: Map<String, Value>) -> FetcherResult<Vec<RawArticle>> {
        let mut articles = Vec::with_capacity(entries.len());

        for (key, entry) in entries {
            let Value::Object(fields) = entry else {
                return Err(FetchError::Format(format!(
                    "article '{key}' is not an object"
                )));
            };

            if let Some(id) = fields.get("item_id").and_then(id_string) {
                if id != key {
                    return Err(FetchError::Format(format!(
                        "article key '{key}' does not match item_id '{id}'"
                    )));
                }
            }

            articles.push(RawArticle::new(key, fields));
        }

        Ok(articles)
    }

    fn parse_array(items: Vec<Value>) -> FetcherResult<Vec<RawArticle>> {
        let mut articles = Vec::with_capacity(items.len());

        for (index, item) in items.into_iter().enumerate() {
            let Value::Object(fields) = item else {
                return Err(FetchError::Format(format!(
                    "article at index {index} is not an object"
                )));
            };

            let id = fields.get("item_id").and_then(id_string).ok_or_else(|| {
                FetchError::Format(format!("article at index {index} has no item_id"))
            })?;

            articles.push(RawArticle::new(id, fields));
        }

        Ok(articles)
    }

    /// Accepts `true`/`false`, `0`/`1` and `"0"`/`"1"`
    fn parse_flag(value: &Value) -> FetcherResult<bool> {
        match value {
            Value::Bool(b) => Ok(*b),
            Value::Number(n) => n
                .as_i64()
                .map(|n| n != 0)
                .ok_or_else(|| FetchError::Format(format!("invalid 'complete' value: {n}"))),
            Value::String(s) => match s.trim() {
                "0" | "false" => Ok(false),
                "1" | "true" => Ok(true),
                other => Err(FetchError::Format(format!(
                    "invalid 'complete' value: {other}"
                ))),
            },
            other => Err(FetchError::Format(format!(
                "invalid 'complete' type: {}",
                json_type(other)
            ))),
        }
    }
}

fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
