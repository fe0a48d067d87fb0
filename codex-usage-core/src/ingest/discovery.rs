//! Rollout file discovery.

use super::fingerprint::FileStat;
use crate::error::{Error, Result};
use crate::types::TimeRange;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

/// File-name pattern of rollout files, matched anywhere under the root.
pub const ROLLOUT_PATTERN: &str = "**/rollout-*.jsonl";

/// A rollout file selected for this run.
#[derive(Debug, Clone)]
pub struct CandidateFile {
    pub path: PathBuf,
    pub stat: FileStat,
    pub modified_at: DateTime<Utc>,
}

/// Result of scanning a root directory.
#[derive(Debug, Default)]
pub struct Discovery {
    /// Selected files in lexicographic path order
    pub files: Vec<CandidateFile>,
    /// Files that matched but could not be stat'ed
    pub errors: Vec<(PathBuf, String)>,
}

/// Find rollout files under `root`, keeping those whose modification time
/// falls inside `window` (inclusive on both ends).
pub fn discover(root: &Path, window: Option<&TimeRange>) -> Result<Discovery> {
    let mut discovery = Discovery::default();
    if !root.exists() {
        tracing::info!(root = %root.display(), "Rollout root does not exist");
        return Ok(discovery);
    }

    let pattern = format!(
        "{}/{}",
        glob::Pattern::escape(&root.to_string_lossy()),
        ROLLOUT_PATTERN
    );
    let entries = glob::glob(&pattern).map_err(|e| Error::Parse {
        source_path: root.display().to_string(),
        message: format!("Invalid glob pattern: {}", e),
    })?;

    for entry in entries {
        let path = match entry {
            Ok(path) => path,
            Err(e) => {
                discovery
                    .errors
                    .push((e.path().to_path_buf(), e.error().to_string()));
                continue;
            }
        };
        let metadata = match std::fs::metadata(&path) {
            Ok(m) if m.is_file() => m,
            Ok(_) => continue,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to stat rollout file");
                discovery.errors.push((path, e.to_string()));
                continue;
            }
        };
        let modified_at = metadata
            .modified()
            .ok()
            .map(DateTime::<Utc>::from)
            .unwrap_or_default();

        if let Some(window) = window {
            if !window.contains_inclusive(modified_at) {
                tracing::debug!(path = %path.display(), "Outside time window");
                continue;
            }
        }

        discovery.files.push(CandidateFile {
            stat: FileStat::from_metadata(&metadata),
            path,
            modified_at,
        });
    }

    // Byte order of the path text, matching how the store compares sources
    discovery
        .files
        .sort_by(|a, b| a.path.to_string_lossy().cmp(&b.path.to_string_lossy()));
    Ok(discovery)
}
