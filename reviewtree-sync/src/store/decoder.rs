//! Text extraction from file records of unknown shape.
//!
//! Backends disagree on where a file's text lives: a top-level `content`
//! string, an array of `lines`, a `data` wrapper, or a base64 blob a few
//! levels down. [`extract`] runs a fixed chain of [`Strategy`] values over the
//! record and its `data` payload and returns the first hit. Missing content is
//! normal for freshly created placeholders, so the fallback is an empty
//! string, never an error.

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD};
use serde_json::Value;

const DIRECT_FIELDS: [&str; 4] = ["content", "code", "text", "source"];
const DEEP_FIELDS: [&str; 8] = [
    "content", "code", "text", "source", "lines", "raw", "body", "value",
];
const BASE64_FIELDS: [&str; 3] = ["contentBase64", "base64", "b64"];
const DEEP_SEARCH_MAX_DEPTH: usize = 3;
const BASE64_SEARCH_MAX_DEPTH: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// `content`, `code`, `text` or `source` holding a string.
    DirectString,
    /// The same fields holding an array of lines.
    JoinedArray,
    /// Breadth-first search of nested objects for any text-like field.
    DeepSearch,
    /// Base64 payload anywhere in the record.
    Base64,
}

impl Strategy {
    pub const CHAIN: [Strategy; 4] = [
        Strategy::DirectString,
        Strategy::JoinedArray,
        Strategy::DeepSearch,
        Strategy::Base64,
    ];

    pub fn apply(self, value: &Value) -> Option<String> {
        match self {
            Strategy::DirectString => DIRECT_FIELDS
                .iter()
                .find_map(|field| non_empty_str(value.get(field)?)),
            Strategy::JoinedArray => DIRECT_FIELDS
                .iter()
                .find_map(|field| join_lines(value.get(field)?)),
            Strategy::DeepSearch => breadth_first(value, DEEP_SEARCH_MAX_DEPTH, |node| {
                DEEP_FIELDS.iter().find_map(|field| {
                    let found = node.get(field)?;
                    non_empty_str(found).or_else(|| join_lines(found))
                })
            }),
            Strategy::Base64 => breadth_first(value, BASE64_SEARCH_MAX_DEPTH, |node| {
                BASE64_FIELDS.iter().find_map(|field| {
                    let encoded = node.get(field)?.as_str()?;
                    decode_base64(encoded)
                })
            }),
        }
    }
}

pub fn extract(record: &Value) -> String {
    extract_with_strategy(record)
        .map(|(_, text)| text)
        .unwrap_or_default()
}

/// Like [`extract`] but also reports which strategy produced the text.
pub fn extract_with_strategy(record: &Value) -> Option<(Strategy, String)> {
    let layers = payload_layers(record);
    Strategy::CHAIN.iter().find_map(|strategy| {
        layers
            .iter()
            .find_map(|layer| strategy.apply(layer))
            .map(|text| (*strategy, text))
    })
}

fn payload_layers(record: &Value) -> Vec<&Value> {
    let mut layers = vec![record];
    if let Some(data) = record.get("data").filter(|data| data.is_object()) {
        layers.push(data);
    }
    layers
}

fn non_empty_str(value: &Value) -> Option<String> {
    value
        .as_str()
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

fn join_lines(value: &Value) -> Option<String> {
    let items = value.as_array()?;
    let lines: Vec<String> = items
        .iter()
        .filter_map(|item| match item {
            Value::String(line) => Some(line.clone()),
            Value::Null | Value::Object(_) | Value::Array(_) => None,
            other => Some(other.to_string()),
        })
        .collect();
    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n"))
    }
}

/// Visits objects level by level, up to `max_depth` levels below `root`.
fn breadth_first<F>(root: &Value, max_depth: usize, mut visit: F) -> Option<String>
where
    F: FnMut(&Value) -> Option<String>,
{
    let mut level = vec![root];
    for _ in 0..=max_depth {
        let mut next = Vec::new();
        for node in level {
            if let Some(found) = visit(node) {
                return Some(found);
            }
            match node {
                Value::Object(map) => next.extend(map.values().filter(|v| is_container(v))),
                Value::Array(items) => next.extend(items.iter().filter(|v| is_container(v))),
                _ => {}
            }
        }
        if next.is_empty() {
            break;
        }
        level = next;
    }
    None
}

fn is_container(value: &Value) -> bool {
    value.is_object() || value.is_array()
}

fn decode_base64(encoded: &str) -> Option<String> {
    let payload = match encoded.split_once(";base64,") {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => encoded,
    };
    let compact: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.is_empty() {
        return None;
    }
    let bytes = [STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD]
        .iter()
        .find_map(|engine| engine.decode(&compact).ok())?;
    Some(String::from_utf8_lossy(&bytes).into_owned())
}
