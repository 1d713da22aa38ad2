//! Working-set resolution for the three payload modes.
//!
//! `entity-ids` names stored entities; `raw-text` and `discover` turn the
//! payload itself into free-text documents. Discovery walks arbitrary JSON
//! with an explicit stack and is bounded by values scanned, items collected
//! and item length.

use sanitize_shared::{DiscoverySection, PayloadMode, content_document_id};
use sanitize_storage::EntityFilter;
use serde_json::Value;
use tracing::{debug, warn};

/// Object keys whose string values are treated as text regardless of length.
const TEXT_KEYS: [&str; 11] = [
    "text",
    "body",
    "content",
    "description",
    "summary",
    "message",
    "note",
    "comment",
    "html",
    "title",
    "caption",
];

/// Free text taken from a payload, linked to a document id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextDocument {
    pub document_id: String,
    pub entity_id: Option<String>,
    /// Text items, each scanned on its own.
    pub texts: Vec<String>,
}

/// What a task operates on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkingSet {
    Entities(EntityFilter),
    Documents(Vec<TextDocument>),
}

/// Resolve the working set for `payload` under `mode`.
///
/// Malformed payloads resolve to an empty working set with a warning.
pub fn working_set(payload: &Value, mode: PayloadMode, limits: &DiscoverySection) -> WorkingSet {
    match mode {
        PayloadMode::EntityIds => {
            let ids = requested_entity_ids(payload);
            if ids.is_empty() {
                WorkingSet::Entities(EntityFilter::All)
            } else {
                WorkingSet::Entities(EntityFilter::Ids(ids))
            }
        }
        PayloadMode::RawText => WorkingSet::Documents(raw_text_document(payload).into_iter().collect()),
        PayloadMode::Discover => {
            WorkingSet::Documents(discover_document(payload, limits).into_iter().collect())
        }
    }
}

/// Ids listed under `entity_ids`, skipping non-string and empty entries.
pub fn requested_entity_ids(payload: &Value) -> Vec<String> {
    match payload.get("entity_ids") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .filter(|id| !id.is_empty())
            .map(String::from)
            .collect(),
        Some(other) => {
            warn!(found = %other, "entity_ids is not a list, ignoring");
            Vec::new()
        }
    }
}

fn raw_text_document(payload: &Value) -> Option<TextDocument> {
    let text = match payload {
        Value::String(text) => Some(text.as_str()),
        Value::Object(map) => map.get("text").and_then(Value::as_str),
        _ => None,
    };
    let Some(text) = text.filter(|t| !t.trim().is_empty()) else {
        warn!("raw-text payload has no text");
        return None;
    };

    Some(TextDocument {
        document_id: string_field(payload, "document_id")
            .map_or_else(|| content_document_id(text), String::from),
        entity_id: string_field(payload, "entity_id").map(String::from),
        texts: vec![text.to_string()],
    })
}

fn discover_document(payload: &Value, limits: &DiscoverySection) -> Option<TextDocument> {
    let texts = discover_text(payload, limits);
    if texts.is_empty() {
        debug!("no text found in payload");
        return None;
    }

    let document_id = string_field(payload, "document_id")
        .or_else(|| string_field(payload, "id"))
        .map_or_else(|| content_document_id(&texts.join("\n")), String::from);

    Some(TextDocument {
        document_id,
        entity_id: string_field(payload, "entity_id").map(String::from),
        texts,
    })
}

/// Collect text-like strings from arbitrary JSON in document order.
///
/// A string qualifies when its key (or the key of the array holding it) is a
/// known text key, or when it has at least `min_text_length` characters.
/// Every value popped counts against `max_scanned`.
pub fn discover_text(payload: &Value, limits: &DiscoverySection) -> Vec<String> {
    let mut found = Vec::new();
    let mut scanned = 0usize;
    let mut stack: Vec<(Option<&str>, &Value)> = vec![(None, payload)];

    while let Some((key, value)) = stack.pop() {
        if found.len() >= limits.max_items {
            debug!(max_items = limits.max_items, "discovery item limit reached");
            break;
        }
        if scanned >= limits.max_scanned {
            warn!(max_scanned = limits.max_scanned, "discovery scan limit reached");
            break;
        }
        scanned += 1;
        match value {
            Value::String(text) => {
                if text.trim().is_empty() {
                    continue;
                }
                let keyed = key.is_some_and(is_text_key);
                if keyed || text.chars().count() >= limits.min_text_length {
                    found.push(truncate_on_char_boundary(text, limits.max_item_length).to_string());
                }
            }
            Value::Array(items) => stack.extend(items.iter().rev().map(|item| (key, item))),
            Value::Object(map) => {
                stack.extend(map.iter().rev().map(|(k, v)| (Some(k.as_str()), v)));
            }
            _ => {}
        }
    }
    found
}

fn is_text_key(key: &str) -> bool {
    TEXT_KEYS.iter().any(|k| key.eq_ignore_ascii_case(k))
}

fn string_field<'a>(payload: &'a Value, key: &str) -> Option<&'a str> {
    payload
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

/// Cut `text` to at most `max_bytes` bytes without splitting a character.
fn truncate_on_char_boundary(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut end = max_bytes;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
