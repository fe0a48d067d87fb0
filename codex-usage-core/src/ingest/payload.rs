//! Raw serde shapes of rollout records.
//!
//! Only the outer container is decoded eagerly; each payload struct is decoded
//! after dispatch so that unknown record types never fail on field shapes they
//! do not share with known ones.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Top-level container of every rollout line.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub(crate) struct RawLine {
    pub timestamp: Option<String>,
    #[serde(rename = "type")]
    pub line_type: Option<String>,
    pub payload: Value,
}

/// `session_meta` payload.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub(crate) struct SessionMetaPayload {
    pub id: Option<String>,
    pub timestamp: Option<String>,
    pub cwd: Option<String>,
    pub originator: Option<String>,
    pub cli_version: Option<String>,
    pub source: Option<Value>,
    pub model_provider: Option<String>,
    pub git: Option<GitInfo>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub(crate) struct GitInfo {
    pub commit_hash: Option<String>,
    pub branch: Option<String>,
    pub repository_url: Option<String>,
}

/// `turn_context` payload.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub(crate) struct TurnContextPayload {
    pub cwd: Option<String>,
    pub model: Option<String>,
    pub approval_policy: Option<String>,
    pub sandbox_policy: Option<Value>,
    pub truncation_policy: Option<TruncationPayload>,
    pub effort: Option<String>,
    pub summary: Option<String>,
    pub base_instructions: Option<Value>,
    pub user_instructions: Option<Value>,
    pub developer_instructions: Option<Value>,
    pub final_output_json_schema: Option<Value>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub(crate) struct TruncationPayload {
    pub mode: Option<String>,
    #[serde(deserialize_with = "lenient_i64")]
    pub limit: Option<i64>,
}

/// `event_msg` / `token_count` payload.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub(crate) struct TokenCountPayload {
    pub info: Option<TokenInfo>,
    pub rate_limits: Option<RateLimitsPayload>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub(crate) struct TokenInfo {
    pub total_token_usage: Option<TokenUsagePayload>,
    pub last_token_usage: Option<TokenUsagePayload>,
    #[serde(deserialize_with = "lenient_i64")]
    pub model_context_window: Option<i64>,
}

#[derive(Debug, Deserialize, Default, Clone, Copy)]
#[serde(default)]
pub(crate) struct TokenUsagePayload {
    #[serde(deserialize_with = "lenient_i64")]
    pub input_tokens: Option<i64>,
    #[serde(deserialize_with = "lenient_i64")]
    pub cached_input_tokens: Option<i64>,
    #[serde(deserialize_with = "lenient_i64")]
    pub output_tokens: Option<i64>,
    #[serde(deserialize_with = "lenient_i64")]
    pub reasoning_output_tokens: Option<i64>,
    #[serde(deserialize_with = "lenient_i64")]
    pub total_tokens: Option<i64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub(crate) struct RateLimitsPayload {
    pub primary: Option<RateLimitPayload>,
    pub secondary: Option<RateLimitPayload>,
    pub credits: Option<CreditsPayload>,
    pub plan_type: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub(crate) struct RateLimitPayload {
    pub used_percent: Option<f64>,
    #[serde(deserialize_with = "lenient_i64")]
    pub window_minutes: Option<i64>,
    #[serde(deserialize_with = "lenient_i64")]
    pub resets_at: Option<i64>,
    #[serde(deserialize_with = "lenient_i64")]
    pub resets_in_seconds: Option<i64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub(crate) struct CreditsPayload {
    pub has_credits: Option<bool>,
    pub unlimited: Option<bool>,
    pub balance: Option<Value>,
}

/// `event_msg` text-carrying payloads (user/agent messages and reasoning).
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub(crate) struct TextEventPayload {
    pub message: Option<String>,
    pub text: Option<String>,
    pub images: Option<Vec<Value>>,
    pub local_images: Option<Vec<Value>>,
}

/// `response_item` payload.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub(crate) struct ResponseItemPayload {
    #[serde(rename = "type")]
    pub item_type: Option<String>,
    pub role: Option<String>,
    pub content: Option<Vec<ContentBlock>>,
    pub name: Option<String>,
    pub arguments: Option<Value>,
    pub input: Option<Value>,
    pub output: Option<Value>,
    pub call_id: Option<String>,
    pub status: Option<String>,
    pub action: Option<Value>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "type")]
pub(crate) enum ContentBlock {
    #[serde(rename = "input_text")]
    InputText { text: String },
    #[serde(rename = "output_text")]
    OutputText { text: String },
    #[serde(other)]
    Unknown,
}

/// Accept integral counts written as integers, floats (`300.0`) or numeric
/// strings. Anything else reads as absent.
fn lenient_i64<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(number_to_i64))
}

fn number_to_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.round() as i64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>().ok().or_else(|| {
                s.parse::<f64>()
                    .ok()
                    .filter(|f| f.is_finite())
                    .map(|f| f.round() as i64)
            })
        }
        _ => None,
    }
}

/// Treat a missing or non-object payload as an empty object.
pub(crate) fn payload_object(payload: &Value) -> Value {
    if payload.is_object() {
        payload.clone()
    } else {
        Value::Object(serde_json::Map::new())
    }
}

/// Render a loosely typed value as text (strings verbatim, anything else as JSON).
pub(crate) fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Whether an instruction-like field carries content.
pub(crate) fn has_content(value: &Option<Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::String(s)) => !s.trim().is_empty(),
        Some(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_content_blocks_tolerate_unknown_types() {
        let item: ResponseItemPayload = serde_json::from_value(json!({
            "type": "message",
            "role": "user",
            "content": [
                {"type": "input_text", "text": "a"},
                {"type": "input_image", "image_url": "x"},
                {"type": "output_text", "text": "b"}
            ]
        }))
        .unwrap();
        let content = item.content.unwrap();
        assert_eq!(content.len(), 3);
        assert!(matches!(content[1], ContentBlock::Unknown));
    }

    #[test]
    fn test_counts_accept_float_and_string_numbers() {
        let payload: TokenCountPayload = serde_json::from_value(json!({
            "info": {
                "total_token_usage": {"input_tokens": 20.0, "output_tokens": "5", "total_tokens": 25.0},
                "model_context_window": 272000.0
            },
            "rate_limits": {
                "primary": {"used_percent": 20.0, "window_minutes": 300.0, "resets_at": "1735725600"},
                "secondary": {"window_minutes": true}
            }
        }))
        .unwrap();

        let info = payload.info.unwrap();
        let total = info.total_token_usage.unwrap();
        assert_eq!(total.input_tokens, Some(20));
        assert_eq!(total.output_tokens, Some(5));
        assert_eq!(total.total_tokens, Some(25));
        assert_eq!(total.cached_input_tokens, None);
        assert_eq!(info.model_context_window, Some(272_000));

        let limits = payload.rate_limits.unwrap();
        let primary = limits.primary.unwrap();
        assert_eq!(primary.window_minutes, Some(300));
        assert_eq!(primary.resets_at, Some(1_735_725_600));
        assert_eq!(limits.secondary.unwrap().window_minutes, None);
    }

    #[test]
    fn test_value_text_and_has_content() {
        assert_eq!(value_text(&json!("x")).as_deref(), Some("x"));
        assert_eq!(value_text(&json!({"a": 1})).as_deref(), Some(r#"{"a":1}"#));
        assert!(value_text(&Value::Null).is_none());

        assert!(has_content(&Some(json!("hello"))));
        assert!(!has_content(&Some(json!(""))));
        assert!(!has_content(&None));
    }

    #[test]
    fn test_payload_object_defaults() {
        assert_eq!(payload_object(&json!(null)), json!({}));
        assert_eq!(payload_object(&json!([1])), json!({}));
        assert_eq!(payload_object(&json!({"a": 1})), json!({"a": 1}));
    }
}
