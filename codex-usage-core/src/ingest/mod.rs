//! Ingestion layer for rollout logs
//!
//! This module turns a directory tree of rollout JSONL files into stored
//! facts, re-parsing only files whose fingerprint changed.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌──────────────────┐     ┌─────────────────┐
//! │  Rollout files  │ ──► │ IngestCoordinator│ ──► │    Database     │
//! │ (~/.codex/...)  │     │                  │     │ (facts, ledger) │
//! └─────────────────┘     └──────────────────┘     └─────────────────┘
//!                               │
//!                   ┌───────────┼────────────┐
//!                   ▼           ▼            ▼
//!              discovery   fingerprint   RolloutParser
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use codex_usage_core::{Config, Database};
//! use codex_usage_core::ingest::IngestCoordinator;
//!
//! let config = Config::load()?;
//! let db = Database::open(&Config::database_path())?;
//! db.migrate()?;
//! let coordinator = IngestCoordinator::from_config(db, &config);
//!
//! let stats = coordinator.run_ingestion(&config.ingest.rollouts_root(), None)?;
//! println!("parsed {} of {} files", stats.files_parsed, stats.files_seen);
//! ```

pub mod discovery;
pub mod fingerprint;
mod parser;
mod payload;
pub mod progress;

pub use discovery::{discover, CandidateFile, ROLLOUT_PATTERN};
pub use fingerprint::{ChangeStatus, FileStat};
pub use parser::{
    command_name, context_percent_left, percent_left, LineOutcome, RolloutParser,
    BASELINE_TOKENS, STATE_CHANGE_EVENTS,
};
pub use progress::{ProgressReport, ProgressWriter, SyncStatus};

use crate::config::Config;
use crate::db::Database;
use crate::error::{Error, Result};
use crate::types::{Fact, SessionContext, TimeRange};
use chrono_tz::Tz;
use fingerprint::ContentHasher;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

/// Running totals of one ingestion run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngestStats {
    /// Candidate files after the time-window filter
    pub files_seen: usize,
    /// Files streamed through the parser
    pub files_parsed: usize,
    /// Files left alone because their fingerprint was unchanged
    pub files_skipped: usize,
    /// Lines read across all parsed files
    pub lines_read: usize,
    /// Facts produced by the parser
    pub facts_produced: usize,
    /// Rows the store reported as written
    pub facts_written: usize,
    /// Malformed lines plus per-file I/O errors
    pub errors: usize,
    /// Per-file I/O errors (file path → error message)
    pub file_errors: Vec<(PathBuf, String)>,
}

/// How one file ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileOutcome {
    Parsed,
    Skipped,
    Failed,
}

/// Turn counters for one file, keyed by session id (or file path before a
/// session id is known). Earlier files are fully stored by the time a file
/// starts, so seeding from the store is exact.
struct TurnCounter<'a> {
    db: &'a Database,
    counters: HashMap<String, u32>,
}

impl<'a> TurnCounter<'a> {
    fn new(db: &'a Database) -> Self {
        Self {
            db,
            counters: HashMap::new(),
        }
    }

    /// Counter slot for a key, seeded from turns stored by earlier sources.
    fn slot(&mut self, session_id: Option<&str>, source: &str) -> Result<&mut u32> {
        let key = session_id.unwrap_or(source).to_string();
        if !self.counters.contains_key(&key) {
            let seed = match session_id {
                Some(session_id) => self.db.max_turn_index_before(session_id, source)?,
                None => None,
            };
            self.counters.insert(key.clone(), seed.unwrap_or(0));
        }
        Ok(self.counters.entry(key).or_insert(0))
    }

    /// Assign the turn index of a fact.
    ///
    /// A turn context opens the next turn; every other fact inherits the
    /// current one (none before the first turn).
    fn stamp(&mut self, fact: &mut Fact, source: &str) -> Result<()> {
        let is_turn = matches!(fact, Fact::Turn(_));
        let Some(ctx) = fact.context_mut() else {
            return Ok(());
        };
        let session_id = ctx.session_id.clone();
        let slot = self.slot(session_id.as_deref(), source)?;
        if is_turn {
            *slot += 1;
        }
        ctx.turn_index = if *slot == 0 { None } else { Some(*slot) };
        Ok(())
    }
}

/// Coordinates discovery, change detection, parsing and storage.
pub struct IngestCoordinator {
    db: Database,
    parser: RolloutParser,
    batch_lines: usize,
    content_hash: bool,
}

impl IngestCoordinator {
    /// Create a coordinator with default settings.
    pub fn new(db: Database, tz: Tz) -> Self {
        Self {
            db,
            parser: RolloutParser::new(tz),
            batch_lines: 500,
            content_hash: true,
        }
    }

    /// Create a coordinator from loaded configuration.
    pub fn from_config(db: Database, config: &Config) -> Self {
        Self::new(db, config.timezone())
            .with_batch_lines(config.ingest.batch_lines)
            .with_content_hash(config.ingest.content_hash)
            .with_capture_payloads(config.ingest.capture_payloads)
    }

    /// Lines between store flushes (at least 1).
    pub fn with_batch_lines(mut self, batch_lines: usize) -> Self {
        self.batch_lines = batch_lines.max(1);
        self
    }

    pub fn with_content_hash(mut self, enabled: bool) -> Self {
        self.content_hash = enabled;
        self
    }

    pub fn with_capture_payloads(mut self, enabled: bool) -> Self {
        self.parser = self.parser.with_capture_payloads(enabled);
        self
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn into_database(self) -> Database {
        self.db
    }

    /// Ingest every rollout file under `root`.
    ///
    /// `window` keeps only files modified inside it (inclusive).
    pub fn run_ingestion(&self, root: &Path, window: Option<TimeRange>) -> Result<IngestStats> {
        self.run_with_progress(root, window, |_, _, _, _| {})
    }

    /// Ingest with a progress callback.
    ///
    /// The callback receives `(stats_so_far, files_done, total_files, path)`
    /// after each file.
    ///
    /// ## Example
    ///
    /// ```rust,ignore
    /// coordinator.run_with_progress(&root, None, |stats, done, total, path| {
    ///     println!("{}/{} {} ({} facts)", done, total, path.display(), stats.facts_produced);
    /// })?;
    /// ```
    pub fn run_with_progress<F>(
        &self,
        root: &Path,
        window: Option<TimeRange>,
        mut on_progress: F,
    ) -> Result<IngestStats>
    where
        F: FnMut(&IngestStats, usize, usize, &Path),
    {
        let found = discover(root, window.as_ref())?;
        let total = found.files.len();
        let mut stats = IngestStats::default();

        for (path, message) in found.errors {
            stats.errors += 1;
            stats.file_errors.push((path, message));
        }

        tracing::info!(root = %root.display(), files = total, "Starting ingestion");

        for (i, file) in found.files.iter().enumerate() {
            stats.files_seen += 1;
            match self.process_file(file, &mut stats)? {
                FileOutcome::Parsed => stats.files_parsed += 1,
                FileOutcome::Skipped => stats.files_skipped += 1,
                FileOutcome::Failed => {}
            }
            on_progress(&stats, i + 1, total, &file.path);
        }

        tracing::info!(
            files_seen = stats.files_seen,
            files_parsed = stats.files_parsed,
            files_skipped = stats.files_skipped,
            lines = stats.lines_read,
            facts = stats.facts_produced,
            errors = stats.errors,
            "Ingestion complete"
        );

        Ok(stats)
    }

    /// Ingest while keeping a progress file up to date.
    pub fn run_with_progress_file(
        &self,
        root: &Path,
        window: Option<TimeRange>,
        writer: &ProgressWriter,
    ) -> Result<IngestStats> {
        writer.running(None)?;
        let mut latest: Option<IngestStats> = None;
        let result = self.run_with_progress(root, window, |stats, _, _, _| {
            if let Err(e) = writer.running(Some(stats)) {
                tracing::warn!(error = %e, "Failed to write progress file");
            }
            latest = Some(stats.clone());
        });

        match result {
            Ok(stats) => {
                writer.completed(&stats)?;
                Ok(stats)
            }
            Err(e) => {
                writer.failed(latest.as_ref(), &e.to_string())?;
                Err(e)
            }
        }
    }

    /// Ingest while holding the process-level lock scoped to `db_path`.
    pub fn run_locked(
        &self,
        db_path: &Path,
        root: &Path,
        window: Option<TimeRange>,
    ) -> Result<IngestStats> {
        let _lock = crate::lock::acquire_ingest_lock(db_path)?;
        self.run_ingestion(root, window)
    }

    fn process_file(&self, file: &CandidateFile, stats: &mut IngestStats) -> Result<FileOutcome> {
        let source = file.path.to_string_lossy().to_string();

        let status = match fingerprint::assess(&self.db, &file.path, file.stat, self.content_hash) {
            Ok(status) => status,
            Err(Error::Io(e)) => {
                Self::record_io_error(stats, &file.path, &e);
                return Ok(FileOutcome::Failed);
            }
            Err(e) => return Err(e),
        };

        match status {
            ChangeStatus::Unchanged => {
                tracing::debug!(path = %source, "Unchanged, skipping");
                Ok(FileOutcome::Skipped)
            }
            ChangeStatus::Touched => {
                tracing::debug!(path = %source, "Touched but content unchanged");
                self.db
                    .refresh_fingerprint(&source, file.stat.mtime_ns, file.stat.size)?;
                Ok(FileOutcome::Skipped)
            }
            ChangeStatus::New | ChangeStatus::Modified => {
                self.ingest_file(file, &source, stats)
            }
        }
    }

    /// Delete the file's previous facts, then stream it through the parser.
    fn ingest_file(
        &self,
        file: &CandidateFile,
        source: &str,
        stats: &mut IngestStats,
    ) -> Result<FileOutcome> {
        let handle = match File::open(&file.path) {
            Ok(handle) => handle,
            Err(e) => {
                Self::record_io_error(stats, &file.path, &e);
                return Ok(FileOutcome::Failed);
            }
        };

        let prior_turns = self.db.turn_maxima_through(source)?;
        let removed = self.db.delete_facts_for_source(source)?;
        if removed > 0 {
            tracing::debug!(path = %source, removed, "Removed previous facts");
        }

        let mut turns = TurnCounter::new(&self.db);
        let mut reader = BufReader::new(handle);
        let mut hasher = ContentHasher::new();
        let mut context = SessionContext::default();
        let mut batch: Vec<Fact> = Vec::new();
        let mut buf = Vec::new();
        let mut line_no = 0usize;

        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) => {
                    Self::record_io_error(stats, &file.path, &e);
                    return Ok(FileOutcome::Failed);
                }
            }
            hasher.update(&buf);
            line_no += 1;
            stats.lines_read += 1;

            let (outcome, next) = self.parser.parse_line(&buf, &context);
            context = next;
            match outcome {
                LineOutcome::Facts(facts) => {
                    for mut fact in facts {
                        fact.set_source(source);
                        turns.stamp(&mut fact, source)?;
                        batch.push(fact);
                    }
                }
                LineOutcome::Malformed(reason) => {
                    stats.errors += 1;
                    tracing::debug!(path = %source, line = line_no, reason = %reason, "Malformed line");
                }
            }

            if line_no % self.batch_lines == 0 {
                self.flush(&mut batch, stats)?;
            }
        }
        self.flush(&mut batch, stats)?;

        let hash = hasher.finish();
        self.db
            .mark_ingested(source, file.stat.mtime_ns, file.stat.size, Some(&hash))?;

        tracing::debug!(path = %source, lines = line_no, "File ingested");
        self.invalidate_later_sources(source, prior_turns)?;
        Ok(FileOutcome::Parsed)
    }

    /// Later files of a session continue its turn numbering from this one.
    /// When this file's last turn index moved, forget their ledger entries so
    /// they are renumbered, in this run if discovered, else on the next.
    fn invalidate_later_sources(&self, source: &str, prior: HashMap<String, u32>) -> Result<()> {
        let mut sessions: Vec<String> = self.db.turn_maxima_through(source)?.into_keys().collect();
        sessions.extend(prior.keys().cloned());
        sessions.sort();
        sessions.dedup();

        for session_id in sessions {
            let before = match prior.get(&session_id) {
                Some(max) => Some(*max),
                None => self.db.max_turn_index_before(&session_id, source)?,
            };
            let after = self.db.max_turn_index_through(&session_id, source)?;
            if before == after {
                continue;
            }
            for later in self.db.sources_after(&session_id, source)? {
                if self.db.forget_fingerprint(&later)? {
                    tracing::debug!(
                        session_id = %session_id,
                        path = %later,
                        "Turn numbering shifted, file queued for re-ingest"
                    );
                }
            }
        }
        Ok(())
    }

    fn flush(&self, batch: &mut Vec<Fact>, stats: &mut IngestStats) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        stats.facts_produced += batch.len();
        stats.facts_written += self.db.insert_facts(batch)?;
        batch.clear();
        Ok(())
    }

    fn record_io_error(stats: &mut IngestStats, path: &Path, error: &std::io::Error) {
        tracing::warn!(path = %path.display(), error = %error, "I/O error, file will be retried");
        stats.errors += 1;
        stats
            .file_errors
            .push((path.to_path_buf(), error.to_string()));
    }
}
