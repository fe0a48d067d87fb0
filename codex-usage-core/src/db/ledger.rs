//! Fingerprint ledger
//!
//! One row per source file in `ingestion_files`, written only after a file
//! has been consumed completely. A format version kept in `meta` invalidates
//! every row when it changes.

use super::repo::Database;
use super::schema::{get_meta, set_meta};
use crate::error::{Error, Result};
use crate::format::{format_utc, parse_timestamp};
use crate::types::FingerprintRecord;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

/// Current ledger format version. Bumping it forces a full re-ingest.
pub const LEDGER_VERSION: i64 = 2;

/// `meta` key holding the ledger version.
pub const LEDGER_VERSION_KEY: &str = "ingest_version";

/// Drop every ledger row if the stored ledger version differs.
///
/// Stored facts are left alone. Returns whether the ledger was reset.
pub fn ensure_ledger_version(conn: &Connection) -> Result<bool> {
    let current = get_meta(conn, LEDGER_VERSION_KEY)?;
    if current.as_deref() == Some(LEDGER_VERSION.to_string().as_str()) {
        return Ok(false);
    }

    let removed = conn.execute("DELETE FROM ingestion_files", [])?;
    set_meta(conn, LEDGER_VERSION_KEY, &LEDGER_VERSION.to_string())?;

    tracing::info!(
        from = current.as_deref().unwrap_or("none"),
        to = LEDGER_VERSION,
        removed,
        "Ledger version changed, invalidated fingerprints"
    );
    Ok(true)
}

impl Database {
    /// Fetch the ledger entry for `path`.
    pub fn get_fingerprint(&self, path: &str) -> Result<Option<FingerprintRecord>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT path, mtime_ns, size, content_hash, last_ingested_at
             FROM ingestion_files WHERE path = ?1",
            [path],
            |row| {
                let size: i64 = row.get(2)?;
                let last: String = row.get(4)?;
                Ok(FingerprintRecord {
                    path: row.get(0)?,
                    mtime_ns: row.get(1)?,
                    size: size.max(0) as u64,
                    content_hash: row.get(3)?,
                    last_ingested_at: parse_timestamp(&last).unwrap_or_default(),
                })
            },
        )
        .optional()
        .map_err(Error::from)
    }

    /// Whether `path` has no ledger entry or its stored stat differs.
    pub fn needs_ingest(&self, path: &str, mtime_ns: i64, size: u64) -> Result<bool> {
        Ok(match self.get_fingerprint(path)? {
            Some(record) => record.mtime_ns != mtime_ns || record.size != size,
            None => true,
        })
    }

    /// Record a completed pass over `path`.
    pub fn mark_ingested(
        &self,
        path: &str,
        mtime_ns: i64,
        size: u64,
        content_hash: Option<&str>,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO ingestion_files (path, mtime_ns, size, content_hash, last_ingested_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(path) DO UPDATE SET
                mtime_ns = excluded.mtime_ns,
                size = excluded.size,
                content_hash = excluded.content_hash,
                last_ingested_at = excluded.last_ingested_at
            "#,
            params![
                path,
                mtime_ns,
                size as i64,
                content_hash,
                format_utc(Utc::now())
            ],
        )?;
        Ok(())
    }

    /// Update only the stat half of an entry whose content hash still matches.
    pub fn refresh_fingerprint(&self, path: &str, mtime_ns: i64, size: u64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE ingestion_files SET mtime_ns = ?2, size = ?3 WHERE path = ?1",
            params![path, mtime_ns, size as i64],
        )?;
        Ok(())
    }

    /// Drop the entry for `path` so the next run re-ingests it.
    pub fn forget_fingerprint(&self, path: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let removed = conn.execute("DELETE FROM ingestion_files WHERE path = ?1", [path])?;
        Ok(removed > 0)
    }
}
