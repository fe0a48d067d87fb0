//! Database schema and additive migrations
//!
//! The base tables are created with `CREATE TABLE IF NOT EXISTS`. Columns
//! introduced after the first release are added by an ordered list of
//! "add column if absent" steps, gated by the `schema_version` entry in the
//! `meta` table. Indexes are created last so they can reference added columns.

use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashSet;

/// Current schema version
pub const SCHEMA_VERSION: i64 = 4;

/// `meta` key holding the schema version.
pub const SCHEMA_VERSION_KEY: &str = "schema_version";

/// Tables as they looked in the first schema version.
const BASE_SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS meta (
        key              TEXT PRIMARY KEY,
        value            TEXT NOT NULL
    );

    -- Fingerprint ledger
    CREATE TABLE IF NOT EXISTS ingestion_files (
        path             TEXT PRIMARY KEY,
        mtime_ns         INTEGER NOT NULL,
        size             INTEGER NOT NULL,
        last_ingested_at TEXT NOT NULL
    );

    -- Usage facts and state-change markers
    CREATE TABLE IF NOT EXISTS events (
        id                        INTEGER PRIMARY KEY AUTOINCREMENT,
        captured_at               TEXT NOT NULL,
        captured_at_utc           TEXT NOT NULL,
        event_type                TEXT NOT NULL,
        total_tokens              INTEGER,
        input_tokens              INTEGER,
        cached_input_tokens       INTEGER,
        output_tokens             INTEGER,
        reasoning_output_tokens   INTEGER,
        context_used              INTEGER,
        context_total             INTEGER,
        context_percent_left      INTEGER,
        limit_5h_percent_left     REAL,
        limit_5h_resets_at        TEXT,
        limit_weekly_percent_left REAL,
        limit_weekly_resets_at    TEXT,
        model                     TEXT,
        directory                 TEXT,
        session_id                TEXT,
        codex_version             TEXT,
        turn_index                INTEGER,
        source                    TEXT
    );

    CREATE TABLE IF NOT EXISTS sessions (
        session_id            TEXT PRIMARY KEY,
        session_timestamp     TEXT,
        session_timestamp_utc TEXT,
        cwd                   TEXT,
        originator            TEXT,
        cli_version           TEXT,
        source                TEXT,
        model_provider        TEXT,
        git_commit_hash       TEXT,
        git_branch            TEXT,
        git_repository_url    TEXT,
        captured_at           TEXT,
        captured_at_utc       TEXT,
        rollout_source        TEXT
    );

    CREATE TABLE IF NOT EXISTS turns (
        id                             INTEGER PRIMARY KEY AUTOINCREMENT,
        session_id                     TEXT,
        turn_index                     INTEGER,
        captured_at                    TEXT NOT NULL,
        captured_at_utc                TEXT NOT NULL,
        model                          TEXT,
        cwd                            TEXT,
        approval_policy                TEXT,
        sandbox_policy_type            TEXT,
        sandbox_network_access         INTEGER,
        sandbox_writable_roots         TEXT,
        sandbox_exclude_tmpdir_env_var INTEGER,
        sandbox_exclude_slash_tmp      INTEGER,
        truncation_policy_mode         TEXT,
        truncation_policy_limit        INTEGER,
        reasoning_effort               TEXT,
        reasoning_summary              TEXT,
        has_base_instructions          INTEGER,
        has_user_instructions          INTEGER,
        has_developer_instructions     INTEGER,
        has_final_output_json_schema   INTEGER,
        directory                      TEXT,
        codex_version                  TEXT,
        source                         TEXT
    );

    CREATE TABLE IF NOT EXISTS activity_events (
        id              INTEGER PRIMARY KEY AUTOINCREMENT,
        captured_at     TEXT NOT NULL,
        captured_at_utc TEXT NOT NULL,
        event_type      TEXT NOT NULL,
        event_name      TEXT,
        count           INTEGER NOT NULL,
        session_id      TEXT,
        model           TEXT,
        directory       TEXT,
        codex_version   TEXT,
        turn_index      INTEGER,
        source          TEXT
    );

    CREATE TABLE IF NOT EXISTS content_messages (
        id              INTEGER PRIMARY KEY AUTOINCREMENT,
        captured_at     TEXT NOT NULL,
        captured_at_utc TEXT NOT NULL,
        role            TEXT NOT NULL,
        message_type    TEXT NOT NULL,
        message         TEXT NOT NULL,
        session_id      TEXT,
        model           TEXT,
        directory       TEXT,
        codex_version   TEXT,
        turn_index      INTEGER,
        source          TEXT
    );

    CREATE TABLE IF NOT EXISTS tool_calls (
        id              INTEGER PRIMARY KEY AUTOINCREMENT,
        captured_at     TEXT NOT NULL,
        captured_at_utc TEXT NOT NULL,
        tool_type       TEXT NOT NULL,
        tool_name       TEXT,
        call_id         TEXT,
        status          TEXT,
        input_text      TEXT,
        output_text     TEXT,
        command         TEXT,
        session_id      TEXT,
        model           TEXT,
        directory       TEXT,
        codex_version   TEXT,
        turn_index      INTEGER,
        source          TEXT
    );
"#;

/// One additive column step.
#[derive(Debug, Clone, Copy)]
pub struct ColumnAddition {
    /// Schema version that introduced the column
    pub version: i64,
    pub table: &'static str,
    pub column: &'static str,
    pub ddl: &'static str,
}

const fn add(
    version: i64,
    table: &'static str,
    column: &'static str,
    ddl: &'static str,
) -> ColumnAddition {
    ColumnAddition {
        version,
        table,
        column,
        ddl,
    }
}

/// Columns added after version 1, in application order.
pub const COLUMN_ADDITIONS: &[ColumnAddition] = &[
    // Version 2: lifetime counters and raw rate-limit details
    add(2, "events", "lifetime_total_tokens", "INTEGER"),
    add(2, "events", "lifetime_input_tokens", "INTEGER"),
    add(2, "events", "lifetime_cached_input_tokens", "INTEGER"),
    add(2, "events", "lifetime_output_tokens", "INTEGER"),
    add(2, "events", "lifetime_reasoning_output_tokens", "INTEGER"),
    add(2, "events", "limit_5h_used_percent", "REAL"),
    add(2, "events", "limit_5h_window_minutes", "INTEGER"),
    add(2, "events", "limit_5h_resets_at_seconds", "INTEGER"),
    add(2, "events", "limit_weekly_used_percent", "REAL"),
    add(2, "events", "limit_weekly_window_minutes", "INTEGER"),
    add(2, "events", "limit_weekly_resets_at_seconds", "INTEGER"),
    // Version 3: credits and content hashes
    add(3, "events", "rate_limit_has_credits", "INTEGER"),
    add(3, "events", "rate_limit_unlimited", "INTEGER"),
    add(3, "events", "rate_limit_balance", "TEXT"),
    add(3, "events", "rate_limit_plan_type", "TEXT"),
    add(3, "ingestion_files", "content_hash", "TEXT"),
];

/// Unscoped dedup index used before version 4.
const LEGACY_DEDUP_INDEX: &str = "events_dedupe_idx";

/// Indexes, created after every column exists.
const INDEXES: &str = r#"
    -- Usage events only; identical markers are kept.
    CREATE UNIQUE INDEX IF NOT EXISTS events_usage_dedupe_idx ON events(
        captured_at_utc,
        event_type,
        IFNULL(total_tokens, -1),
        IFNULL(input_tokens, -1),
        IFNULL(cached_input_tokens, -1),
        IFNULL(output_tokens, -1),
        IFNULL(reasoning_output_tokens, -1),
        IFNULL(session_id, ''),
        IFNULL(source, '')
    ) WHERE event_type IN ('token_count', 'status_snapshot', 'usage_line');
    CREATE INDEX IF NOT EXISTS events_captured_at_utc_idx ON events(captured_at_utc);
    CREATE INDEX IF NOT EXISTS events_type_captured_idx ON events(event_type, captured_at_utc);
    CREATE INDEX IF NOT EXISTS events_source_idx ON events(source);

    CREATE INDEX IF NOT EXISTS sessions_rollout_source_idx ON sessions(rollout_source);

    CREATE INDEX IF NOT EXISTS turns_session_idx ON turns(session_id, turn_index);
    CREATE INDEX IF NOT EXISTS turns_captured_at_utc_idx ON turns(captured_at_utc);
    CREATE INDEX IF NOT EXISTS turns_source_idx ON turns(source);

    CREATE INDEX IF NOT EXISTS activity_type_idx ON activity_events(event_type);
    CREATE INDEX IF NOT EXISTS activity_captured_at_utc_idx ON activity_events(captured_at_utc);
    CREATE INDEX IF NOT EXISTS activity_source_idx ON activity_events(source);

    CREATE INDEX IF NOT EXISTS content_messages_captured_at_utc_idx ON content_messages(captured_at_utc);
    CREATE INDEX IF NOT EXISTS content_messages_source_idx ON content_messages(source);

    CREATE INDEX IF NOT EXISTS tool_calls_type_idx ON tool_calls(tool_type);
    CREATE INDEX IF NOT EXISTS tool_calls_captured_at_utc_idx ON tool_calls(captured_at_utc);
    CREATE INDEX IF NOT EXISTS tool_calls_source_idx ON tool_calls(source);
"#;

/// Bring the schema up to [`SCHEMA_VERSION`].
pub fn run_migrations(conn: &Connection) -> crate::error::Result<()> {
    conn.execute_batch(BASE_SCHEMA)?;

    let current_version = get_schema_version(conn)?;

    tracing::info!(
        current_version,
        target_version = SCHEMA_VERSION,
        "Checking database schema"
    );

    if current_version > SCHEMA_VERSION {
        tracing::warn!(
            current_version,
            "Database schema is newer than this build; leaving it as is"
        );
    }

    let mut added = 0usize;
    for step in COLUMN_ADDITIONS
        .iter()
        .filter(|step| step.version > current_version)
    {
        if add_column_if_absent(conn, step)? {
            added += 1;
        }
    }

    if current_version < 4 {
        conn.execute_batch(&format!("DROP INDEX IF EXISTS {}", LEGACY_DEDUP_INDEX))?;
    }
    conn.execute_batch(INDEXES)?;

    if current_version < SCHEMA_VERSION {
        set_meta(conn, SCHEMA_VERSION_KEY, &SCHEMA_VERSION.to_string())?;
        tracing::info!(
            from = current_version,
            to = SCHEMA_VERSION,
            columns_added = added,
            "Schema migration complete"
        );
    }

    Ok(())
}

/// Apply one addition step. Returns whether the column had to be added.
fn add_column_if_absent(conn: &Connection, step: &ColumnAddition) -> crate::error::Result<bool> {
    if table_columns(conn, step.table)?.contains(step.column) {
        return Ok(false);
    }
    tracing::info!(table = step.table, column = step.column, "Adding column");
    conn.execute(
        &format!(
            "ALTER TABLE {} ADD COLUMN {} {}",
            step.table, step.column, step.ddl
        ),
        [],
    )?;
    Ok(true)
}

/// Column names of `table`.
pub fn table_columns(conn: &Connection, table: &str) -> crate::error::Result<HashSet<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<std::result::Result<HashSet<_>, _>>()?;
    Ok(names)
}

/// Get the stored schema version (0 for a database without one).
pub fn get_schema_version(conn: &Connection) -> crate::error::Result<i64> {
    Ok(get_meta(conn, SCHEMA_VERSION_KEY)?
        .and_then(|v| v.parse::<i64>().ok())
        .unwrap_or(0))
}

/// Read a `meta` value.
pub fn get_meta(conn: &Connection, key: &str) -> crate::error::Result<Option<String>> {
    let value = conn
        .query_row("SELECT value FROM meta WHERE key = ?1", [key], |r| r.get(0))
        .optional()?;
    Ok(value)
}

/// Write a `meta` value.
pub fn set_meta(conn: &Connection, key: &str, value: &str) -> crate::error::Result<()> {
    conn.execute(
        "INSERT INTO meta (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![key, value],
    )?;
    Ok(())
}
