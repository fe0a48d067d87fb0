//! Database repository layer
//!
//! Provides bulk insert, delete-by-source and read operations for every fact
//! family.

use crate::error::{Error, Result};
use crate::format::{format_utc, parse_timestamp};
use crate::types::*;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

/// Event types stored in `events` that are usage facts rather than markers.
pub const USAGE_EVENT_TYPES: [&str; 3] = ["token_count", "status_snapshot", "usage_line"];

/// Tables holding facts tagged with a `source` column.
const FACT_TABLES: [&str; 5] = [
    "events",
    "turns",
    "activity_events",
    "content_messages",
    "tool_calls",
];

/// Row counts per table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCounts {
    pub sessions: i64,
    pub turns: i64,
    pub events: i64,
    pub activity_events: i64,
    pub content_messages: i64,
    pub tool_calls: i64,
    pub ingestion_files: i64,
}

/// A row of the session table.
///
/// Rows created implicitly from facts carry only the id and source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    pub session_id: String,
    pub session_timestamp: Option<DateTime<Utc>>,
    pub cwd: Option<String>,
    pub originator: Option<String>,
    pub cli_version: Option<String>,
    pub source_label: Option<String>,
    pub model_provider: Option<String>,
    pub git_commit_hash: Option<String>,
    pub git_branch: Option<String>,
    pub git_repository_url: Option<String>,
    pub rollout_source: Option<String>,
}

/// Database handle (single connection behind a mutex)
pub struct Database {
    pub(crate) conn: Mutex<Connection>,
}

impl Database {
    /// Open or create a database at the given path
    pub fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;
            ",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run schema migrations and the ledger-version check
    pub fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        super::schema::run_migrations(&conn)?;
        super::ledger::ensure_ledger_version(&conn)?;
        Ok(())
    }

    /// Get the underlying connection (for advanced use)
    pub fn connection(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap()
    }

    // ============================================
    // Bulk writes
    // ============================================

    /// Insert a batch of facts as one transaction.
    ///
    /// Returns the number of rows written. Usage facts that collide with the
    /// dedup index are dropped silently and not counted.
    pub fn insert_facts(&self, facts: &[Fact]) -> Result<usize> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let mut written = 0;
        for fact in facts {
            written += match fact {
                Fact::Session(meta) => Self::upsert_session_meta(&tx, meta)?,
                Fact::Turn(turn) => Self::insert_turn(&tx, turn)?,
                Fact::Usage(usage) => Self::insert_usage(&tx, usage)?,
                Fact::Marker(marker) => Self::insert_marker(&tx, marker)?,
                Fact::Activity(activity) => Self::insert_activity(&tx, activity)?,
                Fact::Message(message) => Self::insert_message(&tx, message)?,
                Fact::ToolCall(call) => Self::insert_tool_call(&tx, call)?,
            };
            if let Some(ctx) = fact.context() {
                Self::ensure_session_row(&tx, ctx)?;
            }
        }

        tx.commit()?;
        Ok(written)
    }

    /// Delete every fact derived from `source`.
    ///
    /// The session row recorded from `source` goes too, unless facts from
    /// another source still refer to that session. Returns the number of
    /// rows removed across all tables.
    pub fn delete_facts_for_source(&self, source: &str) -> Result<usize> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let mut removed = 0;
        for table in FACT_TABLES {
            removed += tx.execute(&format!("DELETE FROM {} WHERE source = ?1", table), [source])?;
        }
        let still_referenced = FACT_TABLES
            .iter()
            .map(|table| {
                format!(
                    "EXISTS (SELECT 1 FROM {} f WHERE f.session_id = sessions.session_id)",
                    table
                )
            })
            .collect::<Vec<_>>()
            .join(" OR ");
        removed += tx.execute(
            &format!(
                "DELETE FROM sessions WHERE rollout_source = ?1 AND NOT ({})",
                still_referenced
            ),
            [source],
        )?;

        tx.commit()?;
        Ok(removed)
    }

    /// Delete all stored message text and tool-call rows.
    ///
    /// Returns `(messages_removed, tool_calls_removed)`.
    pub fn purge_content(&self) -> Result<(usize, usize)> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let messages = tx.execute("DELETE FROM content_messages", [])?;
        let tool_calls = tx.execute("DELETE FROM tool_calls", [])?;
        tx.commit()?;
        tracing::info!(messages, tool_calls, "Purged stored content");
        Ok((messages, tool_calls))
    }

    fn upsert_session_meta(conn: &Connection, meta: &SessionMeta) -> rusqlite::Result<usize> {
        conn.execute(
            r#"
            INSERT INTO sessions (session_id, session_timestamp, session_timestamp_utc, cwd,
                                  originator, cli_version, source, model_provider,
                                  git_commit_hash, git_branch, git_repository_url,
                                  captured_at, captured_at_utc, rollout_source)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            ON CONFLICT(session_id) DO UPDATE SET
                session_timestamp = excluded.session_timestamp,
                session_timestamp_utc = excluded.session_timestamp_utc,
                cwd = excluded.cwd,
                originator = excluded.originator,
                cli_version = excluded.cli_version,
                source = excluded.source,
                model_provider = excluded.model_provider,
                git_commit_hash = excluded.git_commit_hash,
                git_branch = excluded.git_branch,
                git_repository_url = excluded.git_repository_url,
                captured_at = excluded.captured_at,
                captured_at_utc = excluded.captured_at_utc,
                rollout_source = excluded.rollout_source
            "#,
            params![
                meta.session_id,
                meta.session_timestamp.map(|t| t.local_string()),
                meta.session_timestamp.map(|t| t.utc_string()),
                meta.cwd,
                meta.originator,
                meta.cli_version,
                meta.source_label,
                meta.model_provider,
                meta.git_commit_hash,
                meta.git_branch,
                meta.git_repository_url,
                meta.captured.local_string(),
                meta.captured.utc_string(),
                meta.rollout_source,
            ],
        )
    }

    fn ensure_session_row(conn: &Connection, ctx: &FactContext) -> rusqlite::Result<()> {
        if let Some(session_id) = &ctx.session_id {
            conn.execute(
                "INSERT OR IGNORE INTO sessions (session_id, cwd, cli_version, rollout_source)
                 VALUES (?1, ?2, ?3, ?4)",
                params![session_id, ctx.directory, ctx.cli_version, ctx.source],
            )?;
        }
        Ok(())
    }

    fn insert_turn(conn: &Connection, turn: &TurnContext) -> rusqlite::Result<usize> {
        let ctx = &turn.context;
        conn.execute(
            r#"
            INSERT INTO turns (session_id, turn_index, captured_at, captured_at_utc, model, cwd,
                               approval_policy, sandbox_policy_type, sandbox_network_access,
                               sandbox_writable_roots, sandbox_exclude_tmpdir_env_var,
                               sandbox_exclude_slash_tmp, truncation_policy_mode,
                               truncation_policy_limit, reasoning_effort, reasoning_summary,
                               has_base_instructions, has_user_instructions,
                               has_developer_instructions, has_final_output_json_schema,
                               directory, codex_version, source)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                    ?17, ?18, ?19, ?20, ?21, ?22, ?23)
            "#,
            params![
                ctx.session_id,
                ctx.turn_index,
                turn.captured.local_string(),
                turn.captured.utc_string(),
                turn.model,
                turn.cwd,
                turn.approval_policy,
                turn.sandbox.policy_type,
                turn.sandbox.network_access,
                turn.sandbox.writable_roots,
                turn.sandbox.exclude_tmpdir_env_var,
                turn.sandbox.exclude_slash_tmp,
                turn.truncation.mode,
                turn.truncation.limit,
                turn.reasoning_effort,
                turn.reasoning_summary,
                turn.has_base_instructions,
                turn.has_user_instructions,
                turn.has_developer_instructions,
                turn.has_final_output_json_schema,
                ctx.directory,
                ctx.cli_version,
                ctx.source,
            ],
        )
    }

    fn insert_usage(conn: &Connection, usage: &TokenCountSnapshot) -> rusqlite::Result<usize> {
        let ctx = &usage.context;
        let short = &usage.short_window;
        let long = &usage.long_window;
        conn.execute(
            r#"
            INSERT OR IGNORE INTO events (
                captured_at, captured_at_utc, event_type,
                total_tokens, input_tokens, cached_input_tokens, output_tokens,
                reasoning_output_tokens,
                lifetime_total_tokens, lifetime_input_tokens, lifetime_cached_input_tokens,
                lifetime_output_tokens, lifetime_reasoning_output_tokens,
                context_used, context_total, context_percent_left,
                limit_5h_percent_left, limit_5h_resets_at,
                limit_weekly_percent_left, limit_weekly_resets_at,
                limit_5h_used_percent, limit_5h_window_minutes, limit_5h_resets_at_seconds,
                limit_weekly_used_percent, limit_weekly_window_minutes,
                limit_weekly_resets_at_seconds,
                rate_limit_has_credits, rate_limit_unlimited, rate_limit_balance,
                rate_limit_plan_type,
                model, directory, session_id, codex_version, turn_index, source
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                    ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27, ?28, ?29, ?30,
                    ?31, ?32, ?33, ?34, ?35, ?36)
            "#,
            params![
                usage.captured.local_string(),
                usage.captured.utc_string(),
                usage.event_type,
                usage.tokens.total,
                usage.tokens.input,
                usage.tokens.cached_input,
                usage.tokens.output,
                usage.tokens.reasoning_output,
                usage.lifetime.total,
                usage.lifetime.input,
                usage.lifetime.cached_input,
                usage.lifetime.output,
                usage.lifetime.reasoning_output,
                usage.context_window.used,
                usage.context_window.window,
                usage.context_window.percent_left,
                short.percent_left,
                short.resets_text,
                long.percent_left,
                long.resets_text,
                short.used_percent,
                short.window_minutes,
                short.resets_at,
                long.used_percent,
                long.window_minutes,
                long.resets_at,
                usage.credits.has_credits,
                usage.credits.unlimited,
                usage.credits.balance,
                usage.plan_type,
                ctx.model,
                ctx.directory,
                ctx.session_id,
                ctx.cli_version,
                ctx.turn_index,
                ctx.source,
            ],
        )
    }

    fn insert_marker(conn: &Connection, marker: &EventMarker) -> rusqlite::Result<usize> {
        let ctx = &marker.context;
        conn.execute(
            r#"
            INSERT INTO events (captured_at, captured_at_utc, event_type, model,
                                directory, session_id, codex_version, turn_index, source)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                marker.captured.local_string(),
                marker.captured.utc_string(),
                marker.event_type,
                ctx.model,
                ctx.directory,
                ctx.session_id,
                ctx.cli_version,
                ctx.turn_index,
                ctx.source,
            ],
        )
    }

    fn insert_activity(conn: &Connection, activity: &ActivityEvent) -> rusqlite::Result<usize> {
        let ctx = &activity.context;
        conn.execute(
            r#"
            INSERT INTO activity_events (captured_at, captured_at_utc, event_type, event_name,
                                         count, session_id, model, directory, codex_version,
                                         turn_index, source)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
            params![
                activity.captured.local_string(),
                activity.captured.utc_string(),
                activity.event_type,
                activity.event_name,
                activity.count,
                ctx.session_id,
                ctx.model,
                ctx.directory,
                ctx.cli_version,
                ctx.turn_index,
                ctx.source,
            ],
        )
    }

    fn insert_message(conn: &Connection, message: &MessageEvent) -> rusqlite::Result<usize> {
        let ctx = &message.context;
        conn.execute(
            r#"
            INSERT INTO content_messages (captured_at, captured_at_utc, role, message_type,
                                          message, session_id, model, directory, codex_version,
                                          turn_index, source)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
            params![
                message.captured.local_string(),
                message.captured.utc_string(),
                message.role.as_str(),
                message.message_type,
                message.text,
                ctx.session_id,
                ctx.model,
                ctx.directory,
                ctx.cli_version,
                ctx.turn_index,
                ctx.source,
            ],
        )
    }

    fn insert_tool_call(conn: &Connection, call: &ToolCallEvent) -> rusqlite::Result<usize> {
        let ctx = &call.context;
        conn.execute(
            r#"
            INSERT INTO tool_calls (captured_at, captured_at_utc, tool_type, tool_name, call_id,
                                    status, input_text, output_text, command, session_id, model,
                                    directory, codex_version, turn_index, source)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
            "#,
            params![
                call.captured.local_string(),
                call.captured.utc_string(),
                call.tool_type,
                call.tool_name,
                call.call_id,
                call.status,
                call.input_text,
                call.output_text,
                call.command,
                ctx.session_id,
                ctx.model,
                ctx.directory,
                ctx.cli_version,
                ctx.turn_index,
                ctx.source,
            ],
        )
    }

    // ============================================
    // Reads
    // ============================================

    /// Load stored facts in capture order.
    ///
    /// `kind` restricts the result to one fact family; `range` applies a
    /// half-open `[start, end)` filter on the UTC capture time.
    pub fn load_facts(&self, kind: Option<FactKind>, range: Option<TimeRange>) -> Result<Vec<Fact>> {
        let kinds: Vec<FactKind> = match kind {
            Some(kind) => vec![kind],
            None => FactKind::ALL.to_vec(),
        };
        let range = range.unwrap_or_default();

        let conn = self.conn.lock().unwrap();
        let mut facts = Vec::new();
        for kind in kinds {
            facts.extend(Self::load_kind(&conn, kind, &range)?);
        }
        facts.sort_by(|a, b| a.captured().utc.cmp(&b.captured().utc));
        Ok(facts)
    }

    fn load_kind(conn: &Connection, kind: FactKind, range: &TimeRange) -> Result<Vec<Fact>> {
        let usage_list = USAGE_EVENT_TYPES
            .iter()
            .map(|t| format!("'{}'", t))
            .collect::<Vec<_>>()
            .join(", ");
        let (table, extra) = match kind {
            FactKind::Session => ("sessions", "captured_at_utc IS NOT NULL".to_string()),
            FactKind::Turn => ("turns", "1=1".to_string()),
            FactKind::Usage => ("events", format!("event_type IN ({})", usage_list)),
            FactKind::Marker => ("events", format!("event_type NOT IN ({})", usage_list)),
            FactKind::Activity => ("activity_events", "1=1".to_string()),
            FactKind::Message => ("content_messages", "1=1".to_string()),
            FactKind::ToolCall => ("tool_calls", "1=1".to_string()),
        };

        let mut sql = format!("SELECT * FROM {} WHERE {}", table, extra);
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![];

        if let Some(start) = range.start {
            sql.push_str(" AND captured_at_utc >= ?");
            params.push(Box::new(format_utc(start)));
        }
        if let Some(end) = range.end {
            sql.push_str(" AND captured_at_utc < ?");
            params.push(Box::new(format_utc(end)));
        }

        let order_tail = if kind == FactKind::Session {
            "session_id"
        } else {
            "id"
        };
        sql.push_str(&format!(" ORDER BY captured_at_utc ASC, {} ASC", order_tail));

        let params_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let mut stmt = conn.prepare(&sql)?;
        let facts = stmt
            .query_map(params_refs.as_slice(), |row| match kind {
                FactKind::Session => Self::row_to_session_meta(row).map(Fact::Session),
                FactKind::Turn => Self::row_to_turn(row).map(Fact::Turn),
                FactKind::Usage => Self::row_to_usage(row).map(Fact::Usage),
                FactKind::Marker => Self::row_to_marker(row).map(Fact::Marker),
                FactKind::Activity => Self::row_to_activity(row).map(Fact::Activity),
                FactKind::Message => Self::row_to_message(row).map(Fact::Message),
                FactKind::ToolCall => Self::row_to_tool_call(row).map(Fact::ToolCall),
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(facts)
    }

    /// The most recent usage report (rollout token count or captured status panel).
    pub fn latest_status_fact(&self) -> Result<Option<TokenCountSnapshot>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            r#"
            SELECT * FROM events
            WHERE event_type IN ('status_snapshot', 'token_count')
            ORDER BY captured_at_utc DESC, id DESC
            LIMIT 1
            "#,
            [],
            Self::row_to_usage,
        )
        .optional()
        .map_err(Error::from)
    }

    /// List stored session rows ordered by session timestamp (unknown last).
    pub fn list_sessions(&self) -> Result<Vec<SessionRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT * FROM sessions
             ORDER BY session_timestamp_utc IS NULL, session_timestamp_utc ASC, session_id ASC",
        )?;
        let sessions = stmt
            .query_map([], |row| {
                let ts: Option<String> = row.get("session_timestamp_utc")?;
                Ok(SessionRecord {
                    session_id: row.get("session_id")?,
                    session_timestamp: ts.as_deref().and_then(parse_timestamp),
                    cwd: row.get("cwd")?,
                    originator: row.get("originator")?,
                    cli_version: row.get("cli_version")?,
                    source_label: row.get("source")?,
                    model_provider: row.get("model_provider")?,
                    git_commit_hash: row.get("git_commit_hash")?,
                    git_branch: row.get("git_branch")?,
                    git_repository_url: row.get("git_repository_url")?,
                    rollout_source: row.get("rollout_source")?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(sessions)
    }

    /// Row counts per table.
    pub fn counts(&self) -> Result<StoreCounts> {
        let conn = self.conn.lock().unwrap();
        let count = |table: &str| -> Result<i64> {
            let n: i64 =
                conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |r| r.get(0))?;
            Ok(n)
        };
        Ok(StoreCounts {
            sessions: count("sessions")?,
            turns: count("turns")?,
            events: count("events")?,
            activity_events: count("activity_events")?,
            content_messages: count("content_messages")?,
            tool_calls: count("tool_calls")?,
            ingestion_files: count("ingestion_files")?,
        })
    }

    /// Largest turn index stored for `session_id` from sources sorting before `source`.
    pub fn max_turn_index_before(&self, session_id: &str, source: &str) -> Result<Option<u32>> {
        let conn = self.conn.lock().unwrap();
        let max: Option<u32> = conn.query_row(
            "SELECT MAX(turn_index) FROM turns WHERE session_id = ?1 AND source < ?2",
            params![session_id, source],
            |r| r.get(0),
        )?;
        Ok(max)
    }

    /// Sessions with turns from `source`, mapped to their largest turn index
    /// over `source` and every source sorting before it.
    pub fn turn_maxima_through(&self, source: &str) -> Result<HashMap<String, u32>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            r#"
            SELECT session_id, MAX(turn_index) FROM turns
            WHERE source <= ?1
              AND turn_index IS NOT NULL
              AND session_id IN (SELECT session_id FROM turns WHERE source = ?1)
            GROUP BY session_id
            "#,
        )?;
        let maxima = stmt
            .query_map([source], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<HashMap<_, _>, _>>()?;
        Ok(maxima)
    }

    /// Largest turn index stored for `session_id` from `source` and the sources before it.
    pub fn max_turn_index_through(&self, session_id: &str, source: &str) -> Result<Option<u32>> {
        let conn = self.conn.lock().unwrap();
        let max: Option<u32> = conn.query_row(
            "SELECT MAX(turn_index) FROM turns WHERE session_id = ?1 AND source <= ?2",
            params![session_id, source],
            |r| r.get(0),
        )?;
        Ok(max)
    }

    /// Sources sorting after `source` that hold any fact for `session_id`.
    pub fn sources_after(&self, session_id: &str, source: &str) -> Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let union = FACT_TABLES
            .iter()
            .map(|table| {
                format!(
                    "SELECT source FROM {} WHERE session_id = ?1 AND source > ?2",
                    table
                )
            })
            .collect::<Vec<_>>()
            .join(" UNION ");
        let mut stmt = conn.prepare(&format!("{} ORDER BY source", union))?;
        let sources = stmt
            .query_map(params![session_id, source], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(sources)
    }

    // ============================================
    // Row mapping
    // ============================================

    fn capture_time(row: &Row, local_col: &str, utc_col: &str) -> rusqlite::Result<CaptureTime> {
        let utc_str: String = row.get(utc_col)?;
        let local_str: Option<String> = row.get(local_col)?;
        let utc = parse_timestamp(&utc_str).unwrap_or_default();
        let local = local_str
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .unwrap_or_else(|| utc.fixed_offset());
        Ok(CaptureTime { utc, local })
    }

    fn row_to_context(row: &Row) -> rusqlite::Result<FactContext> {
        Ok(FactContext {
            session_id: row.get("session_id")?,
            model: row.get("model")?,
            directory: row.get("directory")?,
            cli_version: row.get("codex_version")?,
            source: row.get("source")?,
            turn_index: row.get("turn_index")?,
        })
    }

    fn row_to_session_meta(row: &Row) -> rusqlite::Result<SessionMeta> {
        let session_ts: Option<String> = row.get("session_timestamp_utc")?;
        let session_timestamp = match session_ts {
            Some(_) => Some(Self::capture_time(
                row,
                "session_timestamp",
                "session_timestamp_utc",
            )?),
            None => None,
        };
        Ok(SessionMeta {
            session_id: row.get("session_id")?,
            session_timestamp,
            cwd: row.get("cwd")?,
            originator: row.get("originator")?,
            cli_version: row.get("cli_version")?,
            source_label: row.get("source")?,
            model_provider: row.get("model_provider")?,
            git_commit_hash: row.get("git_commit_hash")?,
            git_branch: row.get("git_branch")?,
            git_repository_url: row.get("git_repository_url")?,
            captured: Self::capture_time(row, "captured_at", "captured_at_utc")?,
            rollout_source: row.get("rollout_source")?,
        })
    }

    fn row_to_turn(row: &Row) -> rusqlite::Result<TurnContext> {
        Ok(TurnContext {
            captured: Self::capture_time(row, "captured_at", "captured_at_utc")?,
            model: row.get("model")?,
            cwd: row.get("cwd")?,
            approval_policy: row.get("approval_policy")?,
            sandbox: SandboxPolicy {
                policy_type: row.get("sandbox_policy_type")?,
                network_access: row.get("sandbox_network_access")?,
                writable_roots: row.get("sandbox_writable_roots")?,
                exclude_tmpdir_env_var: row.get("sandbox_exclude_tmpdir_env_var")?,
                exclude_slash_tmp: row.get("sandbox_exclude_slash_tmp")?,
            },
            truncation: TruncationPolicy {
                mode: row.get("truncation_policy_mode")?,
                limit: row.get("truncation_policy_limit")?,
            },
            reasoning_effort: row.get("reasoning_effort")?,
            reasoning_summary: row.get("reasoning_summary")?,
            has_base_instructions: row
                .get::<_, Option<bool>>("has_base_instructions")?
                .unwrap_or(false),
            has_user_instructions: row
                .get::<_, Option<bool>>("has_user_instructions")?
                .unwrap_or(false),
            has_developer_instructions: row
                .get::<_, Option<bool>>("has_developer_instructions")?
                .unwrap_or(false),
            has_final_output_json_schema: row
                .get::<_, Option<bool>>("has_final_output_json_schema")?
                .unwrap_or(false),
            context: Self::row_to_context(row)?,
        })
    }

    fn row_to_usage(row: &Row) -> rusqlite::Result<TokenCountSnapshot> {
        Ok(TokenCountSnapshot {
            captured: Self::capture_time(row, "captured_at", "captured_at_utc")?,
            event_type: row.get("event_type")?,
            tokens: TokenCounts {
                total: row.get("total_tokens")?,
                input: row.get("input_tokens")?,
                cached_input: row.get("cached_input_tokens")?,
                output: row.get("output_tokens")?,
                reasoning_output: row.get("reasoning_output_tokens")?,
            },
            lifetime: TokenCounts {
                total: row.get("lifetime_total_tokens")?,
                input: row.get("lifetime_input_tokens")?,
                cached_input: row.get("lifetime_cached_input_tokens")?,
                output: row.get("lifetime_output_tokens")?,
                reasoning_output: row.get("lifetime_reasoning_output_tokens")?,
            },
            context_window: ContextUsage {
                used: row.get("context_used")?,
                window: row.get("context_total")?,
                percent_left: row.get("context_percent_left")?,
            },
            short_window: RateLimitWindow {
                used_percent: row.get("limit_5h_used_percent")?,
                percent_left: row.get("limit_5h_percent_left")?,
                window_minutes: row.get("limit_5h_window_minutes")?,
                resets_at: row.get("limit_5h_resets_at_seconds")?,
                resets_text: row.get("limit_5h_resets_at")?,
            },
            long_window: RateLimitWindow {
                used_percent: row.get("limit_weekly_used_percent")?,
                percent_left: row.get("limit_weekly_percent_left")?,
                window_minutes: row.get("limit_weekly_window_minutes")?,
                resets_at: row.get("limit_weekly_resets_at_seconds")?,
                resets_text: row.get("limit_weekly_resets_at")?,
            },
            credits: Credits {
                has_credits: row.get("rate_limit_has_credits")?,
                unlimited: row.get("rate_limit_unlimited")?,
                balance: row.get("rate_limit_balance")?,
            },
            plan_type: row.get("rate_limit_plan_type")?,
            context: Self::row_to_context(row)?,
        })
    }

    fn row_to_marker(row: &Row) -> rusqlite::Result<EventMarker> {
        Ok(EventMarker {
            captured: Self::capture_time(row, "captured_at", "captured_at_utc")?,
            event_type: row.get("event_type")?,
            context: Self::row_to_context(row)?,
        })
    }

    fn row_to_activity(row: &Row) -> rusqlite::Result<ActivityEvent> {
        Ok(ActivityEvent {
            captured: Self::capture_time(row, "captured_at", "captured_at_utc")?,
            event_type: row.get("event_type")?,
            event_name: row.get("event_name")?,
            count: row.get("count")?,
            context: Self::row_to_context(row)?,
        })
    }

    fn row_to_message(row: &Row) -> rusqlite::Result<MessageEvent> {
        let role: String = row.get("role")?;
        Ok(MessageEvent {
            captured: Self::capture_time(row, "captured_at", "captured_at_utc")?,
            role: MessageRole::from_str(&role),
            message_type: row.get("message_type")?,
            text: row.get("message")?,
            context: Self::row_to_context(row)?,
        })
    }

    fn row_to_tool_call(row: &Row) -> rusqlite::Result<ToolCallEvent> {
        Ok(ToolCallEvent {
            captured: Self::capture_time(row, "captured_at", "captured_at_utc")?,
            tool_type: row.get("tool_type")?,
            tool_name: row.get("tool_name")?,
            call_id: row.get("call_id")?,
            status: row.get("status")?,
            input_text: row.get("input_text")?,
            output_text: row.get("output_text")?,
            command: row.get("command")?,
            context: Self::row_to_context(row)?,
        })
    }
}
