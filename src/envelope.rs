//! Tool result normalization.
//!
//! Servers encode a tool's result in several legal shapes: a structured
//! `json` content item, JSON serialized into a `text` item, plain text, a
//! top-level `data` field, or none of these. [`unwrap_tool_result`] reduces
//! all of them to one plain value, checking in this order and stopping at the
//! first match:
//!
//! 1. `isError: true` → [`ClientError::Tool`] with the first text item, if any.
//! 2. First content item has a `json` field (even `null`) → that value.
//! 3. First content item has a string `text` field → parsed JSON if the
//!    trimmed text looks like an object or array and parses, else the
//!    trimmed string.
//! 4. No content, but a `data` field (even `null`) → that value.
//! 5. Otherwise → the envelope itself.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

use super::errors::ClientError;

/// Message used when an error envelope carries no text.
const GENERIC_TOOL_ERROR: &str = "tool reported an error";

/// Typed view of a `tools/call` result.
///
/// Every field is lenient: unexpected types degrade to "absent" instead of
/// failing, because the raw envelope is still a legal return value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ToolResultEnvelope {
    #[serde(default, deserialize_with = "lenient_content")]
    pub content: Vec<ContentItem>,
    /// `Some(Value::Null)` when the server sent `"data": null`.
    #[serde(default, deserialize_with = "present")]
    pub data: Option<Value>,
    #[serde(default, rename = "isError", deserialize_with = "strictly_true")]
    pub is_error: bool,
}

/// One entry of the envelope's `content` array.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContentItem {
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    /// `Some(Value::Null)` when the item carried `"json": null`.
    #[serde(default, deserialize_with = "present")]
    pub json: Option<Value>,
    #[serde(default)]
    pub text: Option<Value>,
}

impl ContentItem {
    /// The `text` field, only if it is a string.
    pub fn text_str(&self) -> Option<&str> {
        self.text.as_ref().and_then(Value::as_str)
    }
}

/// Distinguish a present `null` from an absent field.
fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

fn strictly_true<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(matches!(Value::deserialize(deserializer)?, Value::Bool(true)))
}

fn lenient_content<'de, D>(deserializer: D) -> Result<Vec<ContentItem>, D::Error>
where
    D: Deserializer<'de>,
{
    let Value::Array(items) = Value::deserialize(deserializer)? else {
        return Ok(Vec::new());
    };
    Ok(items
        .into_iter()
        .map(|item| serde_json::from_value(item).unwrap_or_default())
        .collect())
}

/// Normalize a raw `tools/call` result into the value a caller wants.
pub fn unwrap_tool_result(tool: &str, raw: Value) -> Result<Value, ClientError> {
    if !raw.is_object() {
        return Ok(raw);
    }
    let envelope = match ToolResultEnvelope::deserialize(&raw) {
        Ok(envelope) => envelope,
        Err(_) => return Ok(raw),
    };

    if envelope.is_error {
        let message = envelope
            .content
            .first()
            .and_then(ContentItem::text_str)
            .unwrap_or(GENERIC_TOOL_ERROR)
            .to_string();
        return Err(ClientError::Tool {
            tool: tool.to_string(),
            message,
        });
    }

    if let Some(first) = envelope.content.into_iter().next() {
        if let Some(json) = first.json {
            return Ok(json);
        }
        if let Some(text) = first.text.as_ref().and_then(Value::as_str) {
            return Ok(parse_text_payload(text));
        }
        return Ok(raw);
    }

    if let Some(data) = envelope.data {
        return Ok(data);
    }

    Ok(raw)
}

/// Trim `text`; parse it if it looks like a JSON object or array.
fn parse_text_payload(text: &str) -> Value {
    let trimmed = text.trim();
    let looks_structured = (trimmed.starts_with('{') && trimmed.ends_with('}'))
        || (trimmed.starts_with('[') && trimmed.ends_with(']'));

    if looks_structured {
        if let Ok(value) = serde_json::from_str(trimmed) {
            return value;
        }
    }
    Value::String(trimmed.to_string())
}

// ─── Tests ───────────────────────────────────────────────────────────────────
