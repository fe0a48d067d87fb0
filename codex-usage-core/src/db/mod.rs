//! Database layer for codex-usage
//!
//! This module provides the storage layer using SQLite with:
//! - Additive schema migrations
//! - Bulk fact writes with dedup and delete-by-source
//! - The fingerprint ledger for incremental ingestion

pub mod ledger;
pub mod repo;
pub mod schema;

pub use ledger::LEDGER_VERSION;
pub use repo::{Database, SessionRecord, StoreCounts};
