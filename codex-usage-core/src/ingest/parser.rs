//! Rollout line parser
//!
//! Turns one JSONL line into zero or more [`Fact`]s. The parser is stateless;
//! the running [`SessionContext`] is passed in and the updated context is
//! returned next to the outcome, so every file or stream owns its own context.
//!
//! # Error Handling
//!
//! Parsing never fails with an [`Error`](crate::error::Error). A line that is
//! not a JSON object, or whose payload has an unexpected shape, yields
//! [`LineOutcome::Malformed`] and the input context unchanged. Unknown record
//! types yield an empty fact list.

use super::payload::*;
use crate::format::{format_reset, parse_timestamp};
use crate::types::*;
use chrono_tz::Tz;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Tokens reserved for the system prompt; not counted against the usable window.
pub const BASELINE_TOKENS: i64 = 12_000;

/// Event types recorded as [`EventMarker`]s.
pub const STATE_CHANGE_EVENTS: [&str; 7] = [
    "context_compacted",
    "thread_rolled_back",
    "undo_started",
    "undo_completed",
    "turn_aborted",
    "entered_review_mode",
    "exited_review_mode",
];

/// Function names whose arguments carry a shell command.
const SHELL_FUNCTIONS: [&str; 5] = [
    "shell",
    "shell_command",
    "exec_command",
    "container.exec",
    "local_shell",
];

/// Result of parsing one line.
#[derive(Debug, Clone, PartialEq)]
pub enum LineOutcome {
    /// Decoded line; may be empty for records that carry no facts
    Facts(Vec<Fact>),
    /// Line could not be decoded
    Malformed(String),
}

impl LineOutcome {
    pub fn is_malformed(&self) -> bool {
        matches!(self, LineOutcome::Malformed(_))
    }

    /// Facts produced (empty for malformed lines).
    pub fn into_facts(self) -> Vec<Fact> {
        match self {
            LineOutcome::Facts(facts) => facts,
            LineOutcome::Malformed(_) => Vec::new(),
        }
    }
}

/// Parser for rollout JSONL lines.
#[derive(Debug, Clone)]
pub struct RolloutParser {
    tz: Tz,
    capture_payloads: bool,
}

impl RolloutParser {
    pub fn new(tz: Tz) -> Self {
        Self {
            tz,
            capture_payloads: true,
        }
    }

    /// Disable Message and ToolCall facts (activity counters are kept).
    pub fn with_capture_payloads(mut self, capture: bool) -> Self {
        self.capture_payloads = capture;
        self
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    /// Parse one raw line against `context`.
    ///
    /// Returns the outcome and the context to use for the next line. On a
    /// malformed line the returned context equals `context`.
    pub fn parse_line(&self, raw: &[u8], context: &SessionContext) -> (LineOutcome, SessionContext) {
        match self.parse_inner(raw, context) {
            Ok((facts, next)) => (LineOutcome::Facts(facts), next),
            Err(reason) => (LineOutcome::Malformed(reason), context.clone()),
        }
    }

    fn parse_inner(
        &self,
        raw: &[u8],
        context: &SessionContext,
    ) -> std::result::Result<(Vec<Fact>, SessionContext), String> {
        let trimmed = trim_ascii_whitespace(raw);
        if trimmed.is_empty() {
            return Ok((Vec::new(), context.clone()));
        }

        let value: Value = serde_json::from_slice(trimmed).map_err(|e| e.to_string())?;
        if !value.is_object() {
            return Err("top-level value is not an object".to_string());
        }
        let line: RawLine = serde_json::from_value(value).map_err(|e| e.to_string())?;

        let captured = line
            .timestamp
            .as_deref()
            .and_then(parse_timestamp)
            .map(|ts| CaptureTime::new(ts, self.tz));
        let payload = payload_object(&line.payload);
        let mut next = context.clone();

        let facts = match line.line_type.as_deref() {
            Some("session_meta") => {
                let meta: SessionMetaPayload = decode(payload)?;
                self.session_meta(meta, captured, &mut next)
            }
            Some("turn_context") => {
                let turn: TurnContextPayload = decode(payload)?;
                overwrite_if_present(&mut next.model, turn.model.as_deref());
                overwrite_if_present(&mut next.directory, turn.cwd.as_deref());
                match captured {
                    Some(captured) => vec![self.turn_context(turn, captured, &next)],
                    None => Vec::new(),
                }
            }
            Some("response_item") => match captured {
                Some(captured) => {
                    let item: ResponseItemPayload = decode(payload)?;
                    self.response_item(item, captured, &next)
                }
                None => Vec::new(),
            },
            Some("event_msg") => match captured {
                Some(captured) => self.event_msg(payload, captured, &next)?,
                None => Vec::new(),
            },
            _ => Vec::new(),
        };

        Ok((facts, next))
    }

    fn session_meta(
        &self,
        meta: SessionMetaPayload,
        captured: Option<CaptureTime>,
        next: &mut SessionContext,
    ) -> Vec<Fact> {
        overwrite_if_present(&mut next.session_id, meta.id.as_deref());
        overwrite_if_present(&mut next.directory, meta.cwd.as_deref());
        overwrite_if_present(&mut next.cli_version, meta.cli_version.as_deref());

        let session_timestamp = meta
            .timestamp
            .as_deref()
            .and_then(parse_timestamp)
            .map(|ts| CaptureTime::new(ts, self.tz));
        let (Some(captured), Some(session_id)) = (captured.or(session_timestamp), next.session_id.clone())
        else {
            return Vec::new();
        };

        let git = meta.git.unwrap_or_default();
        vec![Fact::Session(SessionMeta {
            session_id,
            session_timestamp,
            cwd: meta.cwd,
            originator: meta.originator,
            cli_version: meta.cli_version,
            source_label: meta.source.as_ref().and_then(value_text),
            model_provider: meta.model_provider,
            git_commit_hash: git.commit_hash,
            git_branch: git.branch,
            git_repository_url: git.repository_url,
            captured,
            rollout_source: None,
        })]
    }

    fn turn_context(
        &self,
        turn: TurnContextPayload,
        captured: CaptureTime,
        context: &SessionContext,
    ) -> Fact {
        let truncation = turn.truncation_policy.unwrap_or_default();
        Fact::Turn(TurnContext {
            captured,
            model: turn.model,
            cwd: turn.cwd,
            approval_policy: turn.approval_policy,
            sandbox: sandbox_policy(turn.sandbox_policy.as_ref()),
            truncation: TruncationPolicy {
                mode: truncation.mode,
                limit: truncation.limit,
            },
            reasoning_effort: turn.effort,
            reasoning_summary: turn.summary,
            has_base_instructions: has_content(&turn.base_instructions),
            has_user_instructions: has_content(&turn.user_instructions),
            has_developer_instructions: has_content(&turn.developer_instructions),
            has_final_output_json_schema: has_content(&turn.final_output_json_schema),
            context: context.fact_context(),
        })
    }

    fn response_item(
        &self,
        item: ResponseItemPayload,
        captured: CaptureTime,
        context: &SessionContext,
    ) -> Vec<Fact> {
        let mut facts = Vec::new();
        let item_type = item.item_type.clone().unwrap_or_default();

        match item_type.as_str() {
            "message" => {
                let role = item.role.clone().unwrap_or_default();
                if role == "user" || role == "assistant" {
                    facts.push(activity(
                        captured,
                        "response_message",
                        Some(role.clone()),
                        1,
                        context,
                    ));
                }
                let text: String = item
                    .content
                    .iter()
                    .flatten()
                    .filter_map(|block| match block {
                        ContentBlock::InputText { text } | ContentBlock::OutputText { text } => {
                            Some(text.as_str())
                        }
                        ContentBlock::Unknown => None,
                    })
                    .collect();
                if self.capture_payloads && !text.is_empty() && !role.is_empty() {
                    facts.push(Fact::Message(MessageEvent {
                        captured,
                        role: MessageRole::from_str(&role),
                        message_type: "response_item".to_string(),
                        text,
                        context: context.fact_context(),
                    }));
                }
            }
            "local_shell_call" => {
                let command_value = item.action.as_ref().and_then(|a| a.get("command"));
                let command = command_value.and_then(command_name);
                facts.push(activity(
                    captured,
                    "tool_call",
                    Some("local_shell".to_string()),
                    1,
                    context,
                ));
                if let Some(cmd) = &command {
                    facts.push(activity(captured, "shell_command", Some(cmd.clone()), 1, context));
                }
                if self.capture_payloads {
                    facts.push(self.tool_call(
                        captured,
                        "local_shell",
                        &item,
                        command_value.and_then(command_text),
                        None,
                        command,
                        context,
                    ));
                }
            }
            "function_call" | "custom_tool_call" => {
                let tool_type = tool_type_for(&item_type);
                let arguments = if item_type == "function_call" {
                    item.arguments.as_ref()
                } else {
                    item.input.as_ref()
                };
                let command = match item.name.as_deref() {
                    Some(name) if SHELL_FUNCTIONS.contains(&name) => {
                        arguments.and_then(shell_command_from_arguments)
                    }
                    _ => None,
                };
                facts.push(activity(captured, "tool_call", item.name.clone(), 1, context));
                if let Some(cmd) = &command {
                    facts.push(activity(captured, "shell_command", Some(cmd.clone()), 1, context));
                }
                if self.capture_payloads {
                    facts.push(self.tool_call(
                        captured,
                        tool_type,
                        &item,
                        arguments.and_then(value_text),
                        None,
                        command,
                        context,
                    ));
                }
            }
            "function_call_output" | "custom_tool_call_output" => {
                if self.capture_payloads {
                    facts.push(self.tool_call(
                        captured,
                        tool_type_for(&item_type),
                        &item,
                        None,
                        item.output.as_ref().and_then(output_text),
                        None,
                        context,
                    ));
                }
            }
            "web_search_call" => {
                let action_type = item
                    .action
                    .as_ref()
                    .and_then(|a| a.get("type"))
                    .and_then(Value::as_str)
                    .map(str::to_string);
                facts.push(activity(captured, "web_search_call", action_type, 1, context));
                if self.capture_payloads {
                    let query = item
                        .action
                        .as_ref()
                        .and_then(|a| a.get("query"))
                        .and_then(value_text);
                    facts.push(self.tool_call(
                        captured,
                        "web_search",
                        &item,
                        query,
                        None,
                        None,
                        context,
                    ));
                }
            }
            t if t.starts_with("compaction") => {
                facts.push(activity(captured, "compaction", Some(t.to_string()), 1, context));
            }
            _ => {}
        }

        facts
    }

    #[allow(clippy::too_many_arguments)]
    fn tool_call(
        &self,
        captured: CaptureTime,
        tool_type: &str,
        item: &ResponseItemPayload,
        input_text: Option<String>,
        output_text: Option<String>,
        command: Option<String>,
        context: &SessionContext,
    ) -> Fact {
        Fact::ToolCall(ToolCallEvent {
            captured,
            tool_type: tool_type.to_string(),
            tool_name: item.name.clone(),
            call_id: item.call_id.clone(),
            status: item.status.clone(),
            input_text,
            output_text,
            command,
            context: context.fact_context(),
        })
    }

    fn event_msg(
        &self,
        payload: Value,
        captured: CaptureTime,
        context: &SessionContext,
    ) -> std::result::Result<Vec<Fact>, String> {
        let event_type = payload
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let facts = match event_type.as_str() {
            "token_count" => {
                let counts: TokenCountPayload = decode(payload)?;
                vec![Fact::Usage(self.token_count(counts, captured, context))]
            }
            "user_message" | "agent_message" | "agent_reasoning" | "agent_reasoning_raw_content" => {
                let event: TextEventPayload = decode(payload)?;
                self.text_event(&event_type, event, captured, context)
            }
            t if STATE_CHANGE_EVENTS.contains(&t) => vec![Fact::Marker(EventMarker {
                captured,
                event_type: event_type.clone(),
                context: context.fact_context(),
            })],
            _ => Vec::new(),
        };
        Ok(facts)
    }

    fn text_event(
        &self,
        event_type: &str,
        event: TextEventPayload,
        captured: CaptureTime,
        context: &SessionContext,
    ) -> Vec<Fact> {
        let (role, text) = match event_type {
            "user_message" => (MessageRole::User, event.message.clone()),
            "agent_message" => (MessageRole::Assistant, event.message.clone()),
            "agent_reasoning" => (MessageRole::Reasoning, event.text.clone()),
            _ => (MessageRole::RawReasoning, event.text.clone()),
        };

        let mut facts = Vec::new();
        if let Some(text) = text.filter(|t| !t.is_empty()) {
            if self.capture_payloads {
                facts.push(Fact::Message(MessageEvent {
                    captured,
                    role,
                    message_type: "event_msg".to_string(),
                    text,
                    context: context.fact_context(),
                }));
            }
        }
        facts.push(activity(captured, event_type, None, 1, context));

        if event_type == "user_message" {
            for (name, images) in [("remote", &event.images), ("local", &event.local_images)] {
                let count = images.as_ref().map_or(0, Vec::len) as i64;
                if count > 0 {
                    facts.push(activity(
                        captured,
                        "image_attachment",
                        Some(name.to_string()),
                        count,
                        context,
                    ));
                }
            }
        }
        facts
    }

    fn token_count(
        &self,
        counts: TokenCountPayload,
        captured: CaptureTime,
        context: &SessionContext,
    ) -> TokenCountSnapshot {
        let info = counts.info.unwrap_or_default();
        let last = info.last_token_usage.unwrap_or_default();
        let total = info.total_token_usage;
        let limits = counts.rate_limits.unwrap_or_default();
        let credits = limits.credits.unwrap_or_default();

        let context_used = total.and_then(|t| t.total_tokens);
        let context_window = info.model_context_window;

        TokenCountSnapshot {
            captured,
            event_type: "token_count".to_string(),
            tokens: TokenCounts {
                total: Some(last.total_tokens.unwrap_or(0)),
                input: Some(last.input_tokens.unwrap_or(0)),
                cached_input: Some(last.cached_input_tokens.unwrap_or(0)),
                output: Some(last.output_tokens.unwrap_or(0)),
                reasoning_output: Some(last.reasoning_output_tokens.unwrap_or(0)),
            },
            lifetime: TokenCounts {
                total: total.and_then(|t| t.total_tokens),
                input: total.and_then(|t| t.input_tokens),
                cached_input: total.and_then(|t| t.cached_input_tokens),
                output: total.and_then(|t| t.output_tokens),
                reasoning_output: total.and_then(|t| t.reasoning_output_tokens),
            },
            context_window: ContextUsage {
                used: context_used,
                window: context_window,
                percent_left: context_percent_left(context_used, context_window),
            },
            short_window: self.rate_limit_window(limits.primary, captured),
            long_window: self.rate_limit_window(limits.secondary, captured),
            credits: Credits {
                has_credits: credits.has_credits,
                unlimited: credits.unlimited,
                balance: credits.balance.as_ref().and_then(value_text),
            },
            plan_type: limits.plan_type,
            context: context.fact_context(),
        }
    }

    fn rate_limit_window(
        &self,
        window: Option<RateLimitPayload>,
        captured: CaptureTime,
    ) -> RateLimitWindow {
        let Some(window) = window else {
            return RateLimitWindow::default();
        };
        let resets_at = window.resets_at.or_else(|| {
            window
                .resets_in_seconds
                .map(|secs| captured.utc.timestamp() + secs)
        });
        RateLimitWindow {
            used_percent: window.used_percent,
            percent_left: percent_left(window.used_percent),
            window_minutes: window.window_minutes,
            resets_at,
            resets_text: resets_at.and_then(|at| format_reset(at, captured.utc, self.tz)),
        }
    }
}

fn trim_ascii_whitespace(raw: &[u8]) -> &[u8] {
    let start = raw
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(raw.len());
    let end = raw
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |i| i + 1);
    &raw[start..end]
}

fn decode<T: DeserializeOwned>(payload: Value) -> std::result::Result<T, String> {
    serde_json::from_value(payload).map_err(|e| e.to_string())
}

fn activity(
    captured: CaptureTime,
    event_type: &str,
    event_name: Option<String>,
    count: i64,
    context: &SessionContext,
) -> Fact {
    Fact::Activity(ActivityEvent {
        captured,
        event_type: event_type.to_string(),
        event_name,
        count,
        context: context.fact_context(),
    })
}

fn tool_type_for(item_type: &str) -> &'static str {
    match item_type {
        "local_shell_call" => "local_shell",
        "function_call" | "function_call_output" => "function",
        "custom_tool_call" | "custom_tool_call_output" => "custom_tool",
        "web_search_call" => "web_search",
        _ => "unknown",
    }
}

/// Remaining share of the usable context window, in whole percent.
///
/// The first [`BASELINE_TOKENS`] of both the window and the usage are
/// excluded. A window no larger than the baseline has nothing left.
pub fn context_percent_left(used: Option<i64>, window: Option<i64>) -> Option<i64> {
    let (used, window) = (used?, window?);
    if window <= BASELINE_TOKENS {
        return Some(0);
    }
    let effective = window - BASELINE_TOKENS;
    let used_above_baseline = (used - BASELINE_TOKENS).max(0);
    let remaining = (effective - used_above_baseline).max(0);
    Some((remaining as f64 / effective as f64 * 100.0).round() as i64)
}

/// `100 - used`, clamped to `[0, 100]`; unknown stays unknown.
pub fn percent_left(used_percent: Option<f64>) -> Option<f64> {
    used_percent.map(|used| (100.0 - used).clamp(0.0, 100.0))
}

/// Program name of a shell command given as a string or an argument list.
pub fn command_name(command: &Value) -> Option<String> {
    let first = match command {
        Value::String(s) => s.split_whitespace().next(),
        Value::Array(items) => items.first().and_then(Value::as_str).map(str::trim),
        _ => None,
    }?;
    if first.is_empty() {
        None
    } else {
        Some(first.to_string())
    }
}

/// Full command line text of a string or argument-list command.
fn command_text(command: &Value) -> Option<String> {
    match command {
        Value::Array(items) => Some(
            items
                .iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join(" "),
        ),
        other => value_text(other),
    }
}

fn shell_command_from_arguments(arguments: &Value) -> Option<String> {
    let parsed = match arguments {
        Value::String(s) => serde_json::from_str::<Value>(s).ok()?,
        other => other.clone(),
    };
    parsed
        .get("command")
        .or_else(|| parsed.get("cmd"))
        .and_then(command_name)
}

fn output_text(output: &Value) -> Option<String> {
    match output {
        Value::Object(map) => map
            .get("content")
            .and_then(value_text)
            .or_else(|| value_text(output)),
        other => value_text(other),
    }
}

fn sandbox_policy(value: Option<&Value>) -> SandboxPolicy {
    match value {
        Some(Value::String(s)) => SandboxPolicy {
            policy_type: Some(s.clone()),
            ..Default::default()
        },
        Some(Value::Object(map)) => SandboxPolicy {
            policy_type: map
                .get("type")
                .or_else(|| map.get("mode"))
                .and_then(Value::as_str)
                .map(str::to_string),
            network_access: map.get("network_access").and_then(|v| match v {
                Value::Bool(b) => Some(*b),
                Value::String(s) => match s.as_str() {
                    "enabled" => Some(true),
                    "restricted" => Some(false),
                    _ => None,
                },
                _ => None,
            }),
            writable_roots: map
                .get("writable_roots")
                .filter(|v| v.is_array())
                .map(Value::to_string),
            exclude_tmpdir_env_var: map.get("exclude_tmpdir_env_var").and_then(Value::as_bool),
            exclude_slash_tmp: map.get("exclude_slash_tmp").and_then(Value::as_bool),
        },
        _ => SandboxPolicy::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parser() -> RolloutParser {
        RolloutParser::new(chrono_tz::Europe::Stockholm)
    }

    fn line(value: Value) -> Vec<u8> {
        serde_json::to_vec(&value).unwrap()
    }

    fn parse(value: Value, context: &SessionContext) -> (Vec<Fact>, SessionContext) {
        let (outcome, next) = parser().parse_line(&line(value), context);
        assert!(!outcome.is_malformed(), "unexpected malformed: {:?}", outcome);
        (outcome.into_facts(), next)
    }

    fn token_count_line(last_total: i64) -> Value {
        json!({
            "timestamp": "2025-01-01T10:00:02.000Z",
            "type": "event_msg",
            "payload": {
                "type": "token_count",
                "info": {
                    "total_token_usage": {
                        "input_tokens": 50, "cached_input_tokens": 0, "output_tokens": 10,
                        "reasoning_output_tokens": 0, "total_tokens": 17000
                    },
                    "last_token_usage": {
                        "input_tokens": 20, "cached_input_tokens": 0, "output_tokens": 5,
                        "reasoning_output_tokens": 0, "total_tokens": last_total
                    },
                    "model_context_window": 22000
                },
                "rate_limits": {
                    "primary": {"used_percent": 20.0, "window_minutes": 300, "resets_at": 1735725600},
                    "secondary": {"used_percent": 10.0, "window_minutes": 10080, "resets_at": 1735812000},
                    "credits": {"has_credits": true, "unlimited": false, "balance": "3.50"},
                    "plan_type": "pro"
                }
            }
        })
    }

    #[test]
    fn test_malformed_json_keeps_context() {
        let context = SessionContext {
            session_id: Some("s1".to_string()),
            ..Default::default()
        };
        let (outcome, next) = parser().parse_line(b"{not json", &context);
        assert!(outcome.is_malformed());
        assert_eq!(next, context);

        let (outcome, _) = parser().parse_line(b"[1, 2, 3]", &context);
        assert!(outcome.is_malformed());
    }

    #[test]
    fn test_blank_line_is_not_malformed() {
        let (outcome, _) = parser().parse_line(b"  \r\n", &SessionContext::default());
        assert_eq!(outcome, LineOutcome::Facts(vec![]));
    }

    #[test]
    fn test_session_meta_updates_context() {
        let (facts, next) = parse(
            json!({
                "timestamp": "2025-01-01T10:00:00.000Z",
                "type": "session_meta",
                "payload": {
                    "id": "session-1", "cwd": "/tmp/project", "cli_version": "0.10.0",
                    "originator": "cli", "source": "cli", "model_provider": "openai",
                    "git": {"commit_hash": "abc123", "branch": "main"}
                }
            }),
            &SessionContext::default(),
        );
        assert_eq!(next.session_id.as_deref(), Some("session-1"));
        assert_eq!(next.directory.as_deref(), Some("/tmp/project"));
        assert_eq!(next.cli_version.as_deref(), Some("0.10.0"));
        match &facts[..] {
            [Fact::Session(meta)] => {
                assert_eq!(meta.session_id, "session-1");
                assert_eq!(meta.git_branch.as_deref(), Some("main"));
                assert_eq!(meta.source_label.as_deref(), Some("cli"));
            }
            other => panic!("unexpected facts: {:?}", other),
        }
    }

    #[test]
    fn test_session_meta_without_timestamp_only_updates_context() {
        let (facts, next) = parse(
            json!({"type": "session_meta", "payload": {"id": "s1", "cwd": "/p"}}),
            &SessionContext::default(),
        );
        assert!(facts.is_empty());
        assert_eq!(next.session_id.as_deref(), Some("s1"));
        assert_eq!(next.directory.as_deref(), Some("/p"));
    }

    #[test]
    fn test_absent_values_do_not_clear_context() {
        let context = SessionContext {
            session_id: Some("s1".to_string()),
            directory: Some("/p".to_string()),
            cli_version: Some("1.0".to_string()),
            model: Some("gpt-5".to_string()),
        };
        let (_, next) = parse(
            json!({"type": "session_meta", "payload": {"cwd": ""}}),
            &context,
        );
        assert_eq!(next, context);
    }

    #[test]
    fn test_turn_context_fields() {
        let (facts, next) = parse(
            json!({
                "timestamp": "2025-01-01T10:00:01.000Z",
                "type": "turn_context",
                "payload": {
                    "cwd": "/tmp/project", "model": "gpt-5.1", "approval_policy": "on-request",
                    "sandbox_policy": {
                        "type": "workspace-write", "writable_roots": ["/tmp/extra"],
                        "network_access": "enabled", "exclude_tmpdir_env_var": true,
                        "exclude_slash_tmp": false
                    },
                    "effort": "high", "summary": "concise",
                    "base_instructions": "hello", "developer_instructions": "",
                    "truncation_policy": {"mode": "tokens", "limit": 2048}
                }
            }),
            &SessionContext::default(),
        );
        assert_eq!(next.model.as_deref(), Some("gpt-5.1"));
        match &facts[..] {
            [Fact::Turn(turn)] => {
                assert_eq!(turn.sandbox.policy_type.as_deref(), Some("workspace-write"));
                assert_eq!(turn.sandbox.network_access, Some(true));
                assert_eq!(turn.sandbox.writable_roots.as_deref(), Some(r#"["/tmp/extra"]"#));
                assert_eq!(turn.truncation.limit, Some(2048));
                assert!(turn.has_base_instructions);
                assert!(!turn.has_developer_instructions);
                assert_eq!(turn.context.model.as_deref(), Some("gpt-5.1"));
                assert_eq!(turn.context.turn_index, None);
            }
            other => panic!("unexpected facts: {:?}", other),
        }
    }

    #[test]
    fn test_sandbox_shorthand() {
        let policy = sandbox_policy(Some(&json!("read-only")));
        assert_eq!(policy.policy_type.as_deref(), Some("read-only"));
        assert_eq!(policy.network_access, None);
    }

    #[test]
    fn test_token_count_derivations() {
        let context = SessionContext {
            session_id: Some("s1".to_string()),
            ..Default::default()
        };
        let (facts, _) = parse(token_count_line(25), &context);
        let usage = match &facts[..] {
            [Fact::Usage(usage)] => usage,
            other => panic!("unexpected facts: {:?}", other),
        };
        assert_eq!(usage.tokens.total, Some(25));
        assert_eq!(usage.tokens.input, Some(20));
        assert_eq!(usage.lifetime.total, Some(17000));
        assert_eq!(usage.context_window.used, Some(17000));
        assert_eq!(usage.context_window.window, Some(22000));
        assert_eq!(usage.context_window.percent_left, Some(50));
        assert_eq!(usage.short_window.percent_left, Some(80.0));
        assert_eq!(usage.long_window.percent_left, Some(90.0));
        assert_eq!(usage.short_window.resets_text.as_deref(), Some("11:00"));
        assert_eq!(usage.long_window.resets_text.as_deref(), Some("11:00 on 2 Jan"));
        assert_eq!(usage.credits.balance.as_deref(), Some("3.50"));
        assert_eq!(usage.plan_type.as_deref(), Some("pro"));
        assert_eq!(usage.context.session_id.as_deref(), Some("s1"));
    }

    #[test]
    fn test_token_count_with_float_encoded_counts() {
        let mut value = token_count_line(25);
        value["payload"]["info"]["last_token_usage"]["total_tokens"] = json!(25.0);
        value["payload"]["info"]["model_context_window"] = json!(22000.0);
        value["payload"]["rate_limits"]["primary"]["window_minutes"] = json!(300.0);
        let (outcome, _) = parser().parse_line(&line(value), &SessionContext::default());
        assert!(!outcome.is_malformed());
        let facts = outcome.into_facts();
        let usage = match &facts[..] {
            [Fact::Usage(usage)] => usage,
            other => panic!("unexpected facts: {:?}", other),
        };
        assert_eq!(usage.tokens.total, Some(25));
        assert_eq!(usage.context_window.percent_left, Some(50));
        assert_eq!(usage.short_window.window_minutes, Some(300));
    }

    #[test]
    fn test_token_count_missing_fields() {
        let (facts, _) = parse(
            json!({
                "timestamp": "2025-01-01T10:00:02Z",
                "type": "event_msg",
                "payload": {"type": "token_count", "info": null,
                            "rate_limits": {"primary": {"window_minutes": 300}}}
            }),
            &SessionContext::default(),
        );
        let usage = match &facts[..] {
            [Fact::Usage(usage)] => usage,
            other => panic!("unexpected facts: {:?}", other),
        };
        assert_eq!(usage.tokens.total, Some(0));
        assert_eq!(usage.lifetime.total, None);
        assert_eq!(usage.context_window.percent_left, None);
        assert_eq!(usage.short_window.used_percent, None);
        assert_eq!(usage.short_window.percent_left, None);
    }

    #[test]
    fn test_resets_in_seconds_backfill() {
        let (facts, _) = parse(
            json!({
                "timestamp": "2025-01-01T10:00:00Z",
                "type": "event_msg",
                "payload": {"type": "token_count",
                            "rate_limits": {"primary": {"used_percent": 5.0, "resets_in_seconds": 3600}}}
            }),
            &SessionContext::default(),
        );
        match &facts[..] {
            [Fact::Usage(usage)] => {
                assert_eq!(usage.short_window.resets_at, Some(1_735_725_600 + 3600));
                assert_eq!(usage.short_window.resets_text.as_deref(), Some("12:00"));
            }
            other => panic!("unexpected facts: {:?}", other),
        }
    }

    #[test]
    fn test_context_percent_left() {
        assert_eq!(context_percent_left(Some(17000), Some(22000)), Some(50));
        assert_eq!(context_percent_left(Some(5000), Some(22000)), Some(100));
        assert_eq!(context_percent_left(Some(50000), Some(22000)), Some(0));
        assert_eq!(context_percent_left(Some(1), Some(12000)), Some(0));
        assert_eq!(context_percent_left(None, Some(22000)), None);
    }

    #[test]
    fn test_percent_left() {
        assert_eq!(percent_left(Some(20.0)), Some(80.0));
        assert_eq!(percent_left(Some(120.0)), Some(0.0));
        assert_eq!(percent_left(None), None);
    }

    #[test]
    fn test_user_message_with_images() {
        let (facts, _) = parse(
            json!({
                "timestamp": "2025-01-01T10:00:04.000Z",
                "type": "event_msg",
                "payload": {"type": "user_message", "message": "hi",
                            "images": ["https://example.com/1.png"], "local_images": ["/tmp/a.png", "/tmp/b.png"]}
            }),
            &SessionContext::default(),
        );
        assert!(matches!(&facts[0], Fact::Message(m) if m.text == "hi" && m.role == MessageRole::User));
        let activities: Vec<(String, Option<String>, i64)> = facts
            .iter()
            .filter_map(|f| match f {
                Fact::Activity(a) => Some((a.event_type.clone(), a.event_name.clone(), a.count)),
                _ => None,
            })
            .collect();
        assert_eq!(
            activities,
            vec![
                ("user_message".to_string(), None, 1),
                ("image_attachment".to_string(), Some("remote".to_string()), 1),
                ("image_attachment".to_string(), Some("local".to_string()), 2),
            ]
        );
    }

    #[test]
    fn test_agent_reasoning_without_text() {
        let (facts, _) = parse(
            json!({"timestamp": "2025-01-01T10:00:04Z", "type": "event_msg",
                   "payload": {"type": "agent_reasoning"}}),
            &SessionContext::default(),
        );
        assert_eq!(facts.len(), 1);
        assert!(matches!(&facts[0], Fact::Activity(a) if a.event_type == "agent_reasoning"));
    }

    #[test]
    fn test_state_change_marker() {
        let (facts, _) = parse(
            json!({"timestamp": "2025-01-01T10:00:03Z", "type": "event_msg",
                   "payload": {"type": "context_compacted"}}),
            &SessionContext::default(),
        );
        assert!(matches!(&facts[..], [Fact::Marker(m)] if m.event_type == "context_compacted"));

        let (facts, _) = parse(
            json!({"timestamp": "2025-01-01T10:00:03Z", "type": "event_msg",
                   "payload": {"type": "something_new", "message": {"nested": true}}}),
            &SessionContext::default(),
        );
        assert!(facts.is_empty());
    }

    #[test]
    fn test_local_shell_call() {
        let (facts, _) = parse(
            json!({
                "timestamp": "2025-01-01T10:00:05.000Z",
                "type": "response_item",
                "payload": {"type": "local_shell_call", "status": "completed", "call_id": "call-1",
                            "action": {"type": "exec", "command": ["git", "status"]}}
            }),
            &SessionContext::default(),
        );
        assert!(facts.iter().any(|f| matches!(f, Fact::Activity(a) if a.event_type == "tool_call")));
        assert!(facts.iter().any(
            |f| matches!(f, Fact::Activity(a) if a.event_type == "shell_command" && a.event_name.as_deref() == Some("git"))
        ));
        match facts.iter().find(|f| f.kind() == FactKind::ToolCall) {
            Some(Fact::ToolCall(call)) => {
                assert_eq!(call.tool_type, "local_shell");
                assert_eq!(call.command.as_deref(), Some("git"));
                assert_eq!(call.input_text.as_deref(), Some("git status"));
                assert_eq!(call.call_id.as_deref(), Some("call-1"));
            }
            other => panic!("unexpected fact: {:?}", other),
        }
    }

    #[test]
    fn test_function_call_shell_command() {
        let (facts, _) = parse(
            json!({
                "timestamp": "2025-01-01T10:00:05Z",
                "type": "response_item",
                "payload": {"type": "function_call", "name": "shell", "call_id": "c2",
                            "arguments": "{\"command\":[\"bash\",\"-lc\",\"ls\"]}"}
            }),
            &SessionContext::default(),
        );
        match facts.iter().find(|f| f.kind() == FactKind::ToolCall) {
            Some(Fact::ToolCall(call)) => {
                assert_eq!(call.tool_type, "function");
                assert_eq!(call.tool_name.as_deref(), Some("shell"));
                assert_eq!(call.command.as_deref(), Some("bash"));
            }
            other => panic!("unexpected fact: {:?}", other),
        }
    }

    #[test]
    fn test_function_call_output() {
        let (facts, _) = parse(
            json!({
                "timestamp": "2025-01-01T10:00:06Z",
                "type": "response_item",
                "payload": {"type": "function_call_output", "call_id": "c2", "output": "done"}
            }),
            &SessionContext::default(),
        );
        assert!(matches!(
            &facts[..],
            [Fact::ToolCall(call)] if call.output_text.as_deref() == Some("done") && call.tool_type == "function"
        ));
    }

    #[test]
    fn test_message_text_concatenation() {
        let (facts, _) = parse(
            json!({
                "timestamp": "2025-01-01T10:00:06Z",
                "type": "response_item",
                "payload": {"type": "message", "role": "assistant", "content": [
                    {"type": "output_text", "text": "Hello, "},
                    {"type": "output_text", "text": "world"}
                ]}
            }),
            &SessionContext::default(),
        );
        assert!(matches!(&facts[0], Fact::Activity(a) if a.event_type == "response_message"));
        assert!(matches!(&facts[1], Fact::Message(m) if m.text == "Hello, world" && m.message_type == "response_item"));
    }

    #[test]
    fn test_message_without_text_parts() {
        let (facts, _) = parse(
            json!({
                "timestamp": "2025-01-01T10:00:06Z",
                "type": "response_item",
                "payload": {"type": "message", "role": "user",
                            "content": [{"type": "input_image", "image_url": "x"}]}
            }),
            &SessionContext::default(),
        );
        assert_eq!(facts.len(), 1);
        assert!(matches!(&facts[0], Fact::Activity(_)));
    }

    #[test]
    fn test_capture_payloads_disabled() {
        let parser = parser().with_capture_payloads(false);
        let raw = line(json!({
            "timestamp": "2025-01-01T10:00:04Z",
            "type": "event_msg",
            "payload": {"type": "user_message", "message": "secret"}
        }));
        let (outcome, _) = parser.parse_line(&raw, &SessionContext::default());
        let facts = outcome.into_facts();
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].kind(), FactKind::Activity);
    }

    #[test]
    fn test_command_name() {
        assert_eq!(command_name(&json!("git status")).as_deref(), Some("git"));
        assert_eq!(command_name(&json!(["ls", "-la"])).as_deref(), Some("ls"));
        assert_eq!(command_name(&json!("   ")), None);
        assert_eq!(command_name(&json!([])), None);
        assert_eq!(command_name(&json!(42)), None);
    }

    #[test]
    fn test_unknown_top_level_type() {
        let context = SessionContext::with_directory("/p");
        let (facts, next) = parse(
            json!({"timestamp": "2025-01-01T10:00:00Z", "type": "compacted", "payload": {}}),
            &context,
        );
        assert!(facts.is_empty());
        assert_eq!(next, context);
    }
}
