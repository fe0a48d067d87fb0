//! Sync progress file.
//!
//! A small JSON document other processes (a dashboard, a status command) can
//! poll while an ingestion run is active. Every write goes to a temporary
//! sibling first and is renamed into place, so readers never see a partial
//! document.

use super::IngestStats;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Run state reported in the progress file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Running,
    Completed,
    Failed,
}

/// Document written to the progress file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressReport {
    pub sync_id: String,
    pub status: SyncStatus,
    pub progress: Option<IngestStats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Writes progress reports for one sync run.
#[derive(Debug, Clone)]
pub struct ProgressWriter {
    path: PathBuf,
    sync_id: String,
}

impl ProgressWriter {
    /// Writer with a fresh random sync id.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_sync_id(path, uuid::Uuid::new_v4().to_string())
    }

    pub fn with_sync_id(path: impl Into<PathBuf>, sync_id: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            sync_id: sync_id.into(),
        }
    }

    pub fn sync_id(&self) -> &str {
        &self.sync_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn running(&self, stats: Option<&IngestStats>) -> Result<()> {
        self.write(SyncStatus::Running, stats, None)
    }

    pub fn completed(&self, stats: &IngestStats) -> Result<()> {
        self.write(SyncStatus::Completed, Some(stats), None)
    }

    pub fn failed(&self, stats: Option<&IngestStats>, error: &str) -> Result<()> {
        self.write(SyncStatus::Failed, stats, Some(error))
    }

    fn write(
        &self,
        status: SyncStatus,
        stats: Option<&IngestStats>,
        error: Option<&str>,
    ) -> Result<()> {
        let report = ProgressReport {
            sync_id: self.sync_id.clone(),
            status,
            progress: stats.cloned(),
            error: error.map(str::to_string),
        };

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp_path = self.path.with_extension("tmp");
        std::fs::write(&tmp_path, serde_json::to_vec(&report)?)?;
        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

/// Read the current progress report, if one exists.
pub fn read_progress(path: &Path) -> Result<Option<ProgressReport>> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}
