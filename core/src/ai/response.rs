//! Lenient parsing of batch responses.
//!
//! Local models wrap their JSON in prose or code fences more often than not.
//! Parsing tries, in order: the whole text, the first ```json fence, the
//! outermost `{...}` span and the outermost `[...]` span. Accepted shapes are
//! `{"data": [...]}`, a bare list, or one `{"id", "es"}` object.

use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

static FENCE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)```(?:json|JSON)?\s*(.*?)```").expect("valid fence regex")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslatedItem {
    pub id: String,
    pub es: String,
}

/// Items found in `raw`, in response order. Unparseable text yields nothing.
pub fn parse_batch_response(raw: &str) -> Vec<TranslatedItem> {
    let Some(value) = locate_json(raw) else {
        debug!("no JSON found in model response ({} chars)", raw.len());
        return Vec::new();
    };
    items_from_value(&value)
}

fn locate_json(raw: &str) -> Option<Value> {
    let trimmed = raw.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Some(value);
    }
    if let Some(inner) = FENCE_REGEX.captures(trimmed).and_then(|caps| caps.get(1)) {
        if let Ok(value) = serde_json::from_str::<Value>(inner.as_str().trim()) {
            return Some(value);
        }
    }
    span_between(trimmed, '{', '}').or_else(|| span_between(trimmed, '[', ']'))
}

fn span_between(text: &str, open: char, close: char) -> Option<Value> {
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&text[start..=end]).ok()
}

fn items_from_value(value: &Value) -> Vec<TranslatedItem> {
    match value {
        Value::Array(list) => list.iter().filter_map(item_from_value).collect(),
        Value::Object(map) => match map.get("data") {
            Some(Value::Array(list)) => list.iter().filter_map(item_from_value).collect(),
            Some(single @ Value::Object(_)) => item_from_value(single).into_iter().collect(),
            _ => item_from_value(value).into_iter().collect(),
        },
        _ => Vec::new(),
    }
}

fn item_from_value(value: &Value) -> Option<TranslatedItem> {
    let id = value.get("id")?.as_str()?.trim();
    let es = value.get("es")?.as_str()?;
    if id.is_empty() {
        return None;
    }
    Some(TranslatedItem {
        id: id.to_string(),
        es: es.to_string(),
    })
}
