//! Error types for codex-usage-core

use thiserror::Error;

/// Main error type for the codex-usage-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Parse error outside of the per-line recovery path
    #[error("parse error in {source_path}: {message}")]
    Parse {
        source_path: String,
        message: String,
    },

    /// JSON encoding/decoding error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Another process holds the ingest lock
    #[error("lock error: {0}")]
    Lock(String),
}

/// Result type alias for codex-usage-core
pub type Result<T> = std::result::Result<T, Error>;
