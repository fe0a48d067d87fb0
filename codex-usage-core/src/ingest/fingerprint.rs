//! Two-tier change detection for rollout files.
//!
//! The stat pair (mtime in nanoseconds, size) is compared first. Only when it
//! differs and the ledger holds a content hash is the file hashed; a matching
//! hash means the file was touched but not modified.

use crate::db::Database;
use crate::error::Result;
use sha2::{Digest, Sha256};
use std::fs::{File, Metadata};
use std::io::{BufReader, Read};
use std::path::Path;
use std::time::UNIX_EPOCH;

/// Stat half of a fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub mtime_ns: i64,
    pub size: u64,
}

impl FileStat {
    pub fn from_metadata(metadata: &Metadata) -> Self {
        let mtime_ns = metadata
            .modified()
            .ok()
            .and_then(|m| m.duration_since(UNIX_EPOCH).ok())
            .map(|d| i64::try_from(d.as_nanos()).unwrap_or(i64::MAX))
            .unwrap_or(0);
        Self {
            mtime_ns,
            size: metadata.len(),
        }
    }
}

/// Outcome of comparing a file against its ledger entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeStatus {
    /// No ledger entry
    New,
    /// Stat matches the ledger
    Unchanged,
    /// Stat differs but content hash matches; only the stat needs refreshing
    Touched,
    /// Content differs (or could not be confirmed equal)
    Modified,
}

impl ChangeStatus {
    pub fn needs_ingest(&self) -> bool {
        matches!(self, ChangeStatus::New | ChangeStatus::Modified)
    }
}

/// Incremental SHA-256 over streamed bytes.
#[derive(Default)]
pub struct ContentHasher {
    hasher: Sha256,
}

impl ContentHasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }

    /// Lowercase hex digest.
    pub fn finish(self) -> String {
        hex::encode(self.hasher.finalize())
    }
}

/// Hash a whole file without loading it into memory.
pub fn hash_file(path: &Path) -> std::io::Result<String> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut hasher = ContentHasher::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finish())
}

/// Compare `path` against the ledger.
///
/// With `use_hash` disabled a stat mismatch always means [`ChangeStatus::Modified`].
pub fn assess(db: &Database, path: &Path, stat: FileStat, use_hash: bool) -> Result<ChangeStatus> {
    let key = path.to_string_lossy();
    let Some(record) = db.get_fingerprint(&key)? else {
        return Ok(ChangeStatus::New);
    };
    if record.mtime_ns == stat.mtime_ns && record.size == stat.size {
        return Ok(ChangeStatus::Unchanged);
    }
    if !use_hash || record.size != stat.size {
        return Ok(ChangeStatus::Modified);
    }
    match record.content_hash {
        Some(stored) if hash_file(path)? == stored => Ok(ChangeStatus::Touched),
        _ => Ok(ChangeStatus::Modified),
    }
}
