//! Core domain types for codex-usage
//!
//! These types are the typed facts extracted from rollout logs and live
//! terminal output, plus the bookkeeping records the store keeps about them.
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Rollout file** | A JSONL file recording one agent session's event stream |
//! | **Fact** | One typed, immutable record produced by parsing a single input line |
//! | **Session context** | Running state (model, directory, session id, version) for one file or stream |
//! | **Fingerprint** | The (mtime, size, optional content hash) tuple deciding whether a file is re-parsed |
//! | **Turn** | One request/response cycle of the agent within a session |

use chrono::{DateTime, FixedOffset, SecondsFormat, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

// ============================================
// Time
// ============================================

/// A capture instant, kept both in UTC and in the configured local zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureTime {
    pub utc: DateTime<Utc>,
    pub local: DateTime<FixedOffset>,
}

impl CaptureTime {
    /// Build a capture time from a UTC instant and the display zone.
    pub fn new(utc: DateTime<Utc>, tz: Tz) -> Self {
        Self {
            utc,
            local: utc.with_timezone(&tz).fixed_offset(),
        }
    }

    /// UTC form used for ordering (fixed width, lexically sortable).
    pub fn utc_string(&self) -> String {
        self.utc.to_rfc3339_opts(SecondsFormat::Micros, true)
    }

    /// Local form with explicit offset.
    pub fn local_string(&self) -> String {
        self.local.to_rfc3339_opts(SecondsFormat::Micros, false)
    }
}

/// Optional time bounds for file selection and fact reads.
///
/// File selection treats both ends as inclusive; fact reads treat the range
/// as half-open `[start, end)`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeRange {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl TimeRange {
    pub fn new(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Self {
        Self { start, end }
    }

    /// Half-open containment, used for fact reads.
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.start.map_or(true, |s| ts >= s) && self.end.map_or(true, |e| ts < e)
    }

    /// Inclusive containment, used for the file modification-time window.
    pub fn contains_inclusive(&self, ts: DateTime<Utc>) -> bool {
        self.start.map_or(true, |s| ts >= s) && self.end.map_or(true, |e| ts <= e)
    }
}

// ============================================
// Session context
// ============================================

/// Running state carried across the lines of one file or one live stream.
///
/// Values are only ever replaced by newer present values; nothing is cleared
/// mid-stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionContext {
    pub session_id: Option<String>,
    pub directory: Option<String>,
    pub cli_version: Option<String>,
    pub model: Option<String>,
}

impl SessionContext {
    /// Context for a live stream whose working directory is already known.
    pub fn with_directory(directory: impl Into<String>) -> Self {
        Self {
            directory: Some(directory.into()),
            ..Default::default()
        }
    }

    /// Snapshot of the context as stamped onto a fact.
    pub fn fact_context(&self) -> FactContext {
        FactContext {
            session_id: self.session_id.clone(),
            model: self.model.clone(),
            directory: self.directory.clone(),
            cli_version: self.cli_version.clone(),
            source: None,
            turn_index: None,
        }
    }
}

/// Replace `slot` with `value` when `value` carries a non-empty string.
pub(crate) fn overwrite_if_present(slot: &mut Option<String>, value: Option<&str>) {
    if let Some(v) = value.map(str::trim).filter(|v| !v.is_empty()) {
        *slot = Some(v.to_string());
    }
}

/// Context fields stamped onto every fact except [`SessionMeta`].
///
/// `source` and `turn_index` are filled in by the ingestion coordinator (or the
/// terminal capture), never by the line parser.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactContext {
    pub session_id: Option<String>,
    pub model: Option<String>,
    pub directory: Option<String>,
    pub cli_version: Option<String>,
    pub source: Option<String>,
    pub turn_index: Option<u32>,
}

// ============================================
// Facts
// ============================================

/// Discriminator for the stored fact families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactKind {
    Session,
    Turn,
    Usage,
    Marker,
    Activity,
    Message,
    ToolCall,
}

impl FactKind {
    pub const ALL: [FactKind; 7] = [
        FactKind::Session,
        FactKind::Turn,
        FactKind::Usage,
        FactKind::Marker,
        FactKind::Activity,
        FactKind::Message,
        FactKind::ToolCall,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FactKind::Session => "session",
            FactKind::Turn => "turn",
            FactKind::Usage => "usage",
            FactKind::Marker => "marker",
            FactKind::Activity => "activity",
            FactKind::Message => "message",
            FactKind::ToolCall => "tool_call",
        }
    }
}

impl std::str::FromStr for FactKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FactKind::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unknown fact kind: {}", s))
    }
}

impl std::fmt::Display for FactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One typed record derived from a single input line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Fact {
    Session(SessionMeta),
    Turn(TurnContext),
    Usage(TokenCountSnapshot),
    Marker(EventMarker),
    Activity(ActivityEvent),
    Message(MessageEvent),
    ToolCall(ToolCallEvent),
}

impl Fact {
    pub fn kind(&self) -> FactKind {
        match self {
            Fact::Session(_) => FactKind::Session,
            Fact::Turn(_) => FactKind::Turn,
            Fact::Usage(_) => FactKind::Usage,
            Fact::Marker(_) => FactKind::Marker,
            Fact::Activity(_) => FactKind::Activity,
            Fact::Message(_) => FactKind::Message,
            Fact::ToolCall(_) => FactKind::ToolCall,
        }
    }

    /// Capture instant of the fact.
    pub fn captured(&self) -> &CaptureTime {
        match self {
            Fact::Session(f) => &f.captured,
            Fact::Turn(f) => &f.captured,
            Fact::Usage(f) => &f.captured,
            Fact::Marker(f) => &f.captured,
            Fact::Activity(f) => &f.captured,
            Fact::Message(f) => &f.captured,
            Fact::ToolCall(f) => &f.captured,
        }
    }

    /// Stamped context, absent for session metadata.
    pub fn context(&self) -> Option<&FactContext> {
        match self {
            Fact::Session(_) => None,
            Fact::Turn(f) => Some(&f.context),
            Fact::Usage(f) => Some(&f.context),
            Fact::Marker(f) => Some(&f.context),
            Fact::Activity(f) => Some(&f.context),
            Fact::Message(f) => Some(&f.context),
            Fact::ToolCall(f) => Some(&f.context),
        }
    }

    pub fn context_mut(&mut self) -> Option<&mut FactContext> {
        match self {
            Fact::Session(_) => None,
            Fact::Turn(f) => Some(&mut f.context),
            Fact::Usage(f) => Some(&mut f.context),
            Fact::Marker(f) => Some(&mut f.context),
            Fact::Activity(f) => Some(&mut f.context),
            Fact::Message(f) => Some(&mut f.context),
            Fact::ToolCall(f) => Some(&mut f.context),
        }
    }

    /// Tag the fact with the path (or stream label) it was derived from.
    pub fn set_source(&mut self, source: &str) {
        match self {
            Fact::Session(f) => f.rollout_source = Some(source.to_string()),
            other => {
                if let Some(ctx) = other.context_mut() {
                    ctx.source = Some(source.to_string());
                }
            }
        }
    }
}

/// One per session, upserted by session id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMeta {
    pub session_id: String,
    pub session_timestamp: Option<CaptureTime>,
    pub cwd: Option<String>,
    pub originator: Option<String>,
    pub cli_version: Option<String>,
    /// Source label reported by the agent (e.g. "cli", "vscode")
    pub source_label: Option<String>,
    pub model_provider: Option<String>,
    pub git_commit_hash: Option<String>,
    pub git_branch: Option<String>,
    pub git_repository_url: Option<String>,
    pub captured: CaptureTime,
    /// Rollout file the row was last written from
    pub rollout_source: Option<String>,
}

/// Sandbox policy of a turn, flattened for storage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxPolicy {
    pub policy_type: Option<String>,
    pub network_access: Option<bool>,
    /// JSON array text of the writable roots
    pub writable_roots: Option<String>,
    pub exclude_tmpdir_env_var: Option<bool>,
    pub exclude_slash_tmp: Option<bool>,
}

/// Output truncation policy of a turn.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TruncationPolicy {
    pub mode: Option<String>,
    pub limit: Option<i64>,
}

/// One per agent turn. `context.turn_index` is 1-based and assigned by the
/// ingestion coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnContext {
    pub captured: CaptureTime,
    pub model: Option<String>,
    pub cwd: Option<String>,
    pub approval_policy: Option<String>,
    pub sandbox: SandboxPolicy,
    pub truncation: TruncationPolicy,
    pub reasoning_effort: Option<String>,
    pub reasoning_summary: Option<String>,
    pub has_base_instructions: bool,
    pub has_user_instructions: bool,
    pub has_developer_instructions: bool,
    pub has_final_output_json_schema: bool,
    pub context: FactContext,
}

/// The five token counters reported by the agent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenCounts {
    pub total: Option<i64>,
    pub input: Option<i64>,
    pub cached_input: Option<i64>,
    pub output: Option<i64>,
    pub reasoning_output: Option<i64>,
}

/// Context-window occupancy at capture time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextUsage {
    pub used: Option<i64>,
    pub window: Option<i64>,
    pub percent_left: Option<i64>,
}

/// One rate-limit window ("short" is the 5h window, "long" the weekly one).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RateLimitWindow {
    pub used_percent: Option<f64>,
    pub percent_left: Option<f64>,
    pub window_minutes: Option<i64>,
    /// Absolute reset instant, seconds since the Unix epoch
    pub resets_at: Option<i64>,
    /// Reset instant formatted relative to the capture day
    pub resets_text: Option<String>,
}

/// Credit-balance fields attached to rate-limit reports.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credits {
    pub has_credits: Option<bool>,
    pub unlimited: Option<bool>,
    pub balance: Option<String>,
}

/// Usage report (token counts, context window, rate limits).
///
/// `event_type` is `token_count` for rollout files, `status_snapshot` for
/// captured status panels and `usage_line` for terminal usage summaries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenCountSnapshot {
    pub captured: CaptureTime,
    pub event_type: String,
    pub tokens: TokenCounts,
    pub lifetime: TokenCounts,
    pub context_window: ContextUsage,
    pub short_window: RateLimitWindow,
    pub long_window: RateLimitWindow,
    pub credits: Credits,
    pub plan_type: Option<String>,
    pub context: FactContext,
}

/// A named instantaneous state change (compaction, rollback, abort, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMarker {
    pub captured: CaptureTime,
    pub event_type: String,
    pub context: FactContext,
}

/// A named counted occurrence used for activity analytics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityEvent {
    pub captured: CaptureTime,
    pub event_type: String,
    pub event_name: Option<String>,
    /// Always >= 1; zero or negative counts are never produced
    pub count: i64,
    pub context: FactContext,
}

/// Role of a conversational text chunk.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    Reasoning,
    RawReasoning,
    Other(String),
}

impl MessageRole {
    pub fn as_str(&self) -> &str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::Reasoning => "reasoning",
            MessageRole::RawReasoning => "raw_reasoning",
            MessageRole::Other(s) => s,
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "user" => MessageRole::User,
            "assistant" => MessageRole::Assistant,
            "reasoning" => MessageRole::Reasoning,
            "raw_reasoning" => MessageRole::RawReasoning,
            other => MessageRole::Other(other.to_string()),
        }
    }
}

/// A role-tagged chunk of conversational text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEvent {
    pub captured: CaptureTime,
    pub role: MessageRole,
    /// Record family the text came from (`event_msg` or `response_item`)
    pub message_type: String,
    pub text: String,
    pub context: FactContext,
}

/// One edge (call or call-output) of a tool invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallEvent {
    pub captured: CaptureTime,
    pub tool_type: String,
    pub tool_name: Option<String>,
    pub call_id: Option<String>,
    pub status: Option<String>,
    pub input_text: Option<String>,
    pub output_text: Option<String>,
    /// Program name of shell-like invocations
    pub command: Option<String>,
    pub context: FactContext,
}

// ============================================
// Ledger
// ============================================

/// What the ledger remembers about one source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FingerprintRecord {
    pub path: String,
    pub mtime_ns: i64,
    pub size: u64,
    pub content_hash: Option<String>,
    pub last_ingested_at: DateTime<Utc>,
}
