//! # codex-usage-core
//!
//! Incremental ingestion of agent rollout logs into a local usage store.
//!
//! This library provides:
//! - Typed facts for sessions, turns, token usage, activity, messages and tool calls
//! - A stateful rollout line parser and a live status-panel capture
//! - A fingerprint ledger so unchanged files are never re-parsed
//! - An SQLite store with deduplication and additive schema evolution
//! - Configuration management and logging infrastructure
//!
//! ## Architecture
//!
//! Data flows through three stages:
//! - **Discovery:** rollout files under the sessions root, checked against the ledger
//! - **Parsing:** each changed file is streamed line by line into [`Fact`]s
//! - **Storage:** facts are written in batches; re-ingesting a file replaces its facts
//!
//! ## Example
//!
//! ```rust,no_run
//! use codex_usage_core::{Config, Database, IngestCoordinator};
//!
//! // Load configuration
//! let config = Config::load().expect("failed to load config");
//!
//! // Open database
//! let db = Database::open(&Config::database_path()).expect("failed to open database");
//! db.migrate().expect("failed to run migrations");
//!
//! let coordinator = IngestCoordinator::from_config(db, &config);
//! let stats = coordinator
//!     .run_ingestion(&config.ingest.rollouts_root(), None)
//!     .expect("ingestion failed");
//! println!("{} files parsed", stats.files_parsed);
//! ```

// Re-export commonly used items at the crate root
pub use capture::{OutputCapture, StatusCapture};
pub use config::Config;
pub use db::{Database, SessionRecord, StoreCounts};
pub use error::{Error, Result};
pub use ingest::{IngestCoordinator, IngestStats, RolloutParser};
pub use types::*;

// Public modules
pub mod capture;
pub mod config;
pub mod db;
pub mod error;
pub mod format;
pub mod ingest;
pub mod lock;
pub mod logging;
pub mod types;
