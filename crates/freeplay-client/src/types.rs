//! Wire types for the Freeplay completion and billing endpoints
//!
//! The upstream speaks a bespoke JSON shape (a `params` list of typed
//! name/value entries instead of flat sampling fields). These structs pin
//! that shape down so malformed requests fail at the boundary instead of
//! surfacing as opaque upstream 4xx responses.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::CREDIT_FEATURE;

/// Sampling is pinned near-deterministic; these values are fixed and must
/// not be overridden by client requests.
pub const TEMPERATURE: f64 = 0.08;
pub const TOP_P: f64 = 0.14;
pub const TOP_K: u32 = 1;

/// One chat message, shared between the client-facing request format and
/// the upstream payload (the relay forwards messages verbatim).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// One entry in the upstream `params` list.
///
/// The `max_tokens` entry carries the full advanced-parameter shape with
/// explicit nulls; the sampling entries are sent in the short three-field
/// form, matching what the upstream web client emits.
#[derive(Debug, Clone, Serialize)]
pub struct Param {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial_value: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_advanced: Option<bool>,
    pub name: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nested_fields: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub range: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub str_options: Option<Value>,
    #[serde(rename = "tooltipText", skip_serializing_if = "Option::is_none")]
    pub tooltip_text: Option<Value>,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub value: Value,
}

impl Param {
    fn max_tokens(value: u32) -> Self {
        Self {
            initial_value: Some(value),
            is_advanced: Some(false),
            name: "max_tokens",
            nested_fields: Some(Value::Null),
            range: Some(Value::Null),
            str_options: Some(Value::Null),
            tooltip_text: Some(Value::Null),
            kind: "integer",
            value: value.into(),
        }
    }

    fn float(name: &'static str, value: f64) -> Self {
        Self {
            initial_value: None,
            is_advanced: None,
            name,
            nested_fields: None,
            range: None,
            str_options: None,
            tooltip_text: None,
            kind: "float",
            value: Value::from(value),
        }
    }

    fn integer(name: &'static str, value: u32) -> Self {
        Self {
            initial_value: None,
            is_advanced: None,
            name,
            nested_fields: None,
            range: None,
            str_options: None,
            tooltip_text: None,
            kind: "integer",
            value: value.into(),
        }
    }
}

/// Request body for the completion endpoint, sent as the `json_data`
/// field of a multipart form.
#[derive(Debug, Clone, Serialize)]
pub struct CompletionPayload {
    pub messages: Vec<ChatMessage>,
    pub params: Vec<Param>,
    pub model_id: String,
    pub variables: serde_json::Map<String, Value>,
    pub history: Option<Value>,
    pub asset_references: serde_json::Map<String, Value>,
}

impl CompletionPayload {
    /// Build a payload with the pinned sampling parameters and the given
    /// per-model output bound.
    pub fn new(messages: Vec<ChatMessage>, model_id: &str, max_tokens: u32) -> Self {
        Self {
            messages,
            params: vec![
                Param::max_tokens(max_tokens),
                Param::float("temperature", TEMPERATURE),
                Param::float("top_p", TOP_P),
                Param::integer("top_k", TOP_K),
            ],
            model_id: model_id.to_string(),
            variables: serde_json::Map::new(),
            history: None,
            asset_references: serde_json::Map::new(),
        }
    }
}

/// One parsed `data:` line from the upstream completion stream.
///
/// `content` carries a text delta, `error` an in-stream failure, and
/// `cost` is the billing signal that marks the generation as complete.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamEvent {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub error: Option<Value>,
    #[serde(default)]
    pub cost: Option<f64>,
}

/// Parse one line of the upstream SSE body.
///
/// Returns `None` for blank lines, non-data lines, the `[DONE]` marker,
/// and lines whose JSON does not parse — callers skip those and keep
/// draining.
pub fn parse_data_line(line: &str) -> Option<StreamEvent> {
    let data = line.trim().strip_prefix("data: ")?;
    if data == "[DONE]" {
        return None;
    }
    serde_json::from_str(data).ok()
}

/// Feature-usage entry in the billing payload.
#[derive(Debug, Clone, Deserialize)]
pub struct FeatureUsage {
    pub feature_name: String,
    #[serde(default)]
    pub usage_limit: f64,
    #[serde(default)]
    pub usage_value: f64,
}

/// Billing endpoint response body.
#[derive(Debug, Clone, Deserialize)]
pub struct BillingResponse {
    #[serde(default)]
    pub feature_usage: Vec<FeatureUsage>,
}

impl BillingResponse {
    /// Remaining credit for the tracked feature, or `None` when the
    /// feature entry is absent (ambiguous, not a confirmed zero).
    pub fn remaining_credits(&self) -> Option<f64> {
        self.feature_usage
            .iter()
            .find(|f| f.feature_name == CREDIT_FEATURE)
            .map(|f| f.usage_limit - f.usage_value)
    }
}
