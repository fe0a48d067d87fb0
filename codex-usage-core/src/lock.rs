//! Process-level ingest lock.
//!
//! The store expects a single writer. Callers that may launch overlapping
//! ingestion runs (a wrapper CLI, a background sync) take this advisory
//! `flock` first. The lock file lives in the runtime directory and is scoped
//! to the database path, so different stores never contend.

use crate::error::{Error, Result};
use sha2::{Digest, Sha256};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

const INGEST_LOCK_FILE: &str = "codex-usage-ingest.lock";

/// Held for as long as the ingest run owns the store.
#[derive(Debug)]
pub struct IngestLock {
    file: File,
    path: PathBuf,
}

impl IngestLock {
    /// Path of the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for IngestLock {
    fn drop(&mut self) {
        // The file stays: a waiter may already hold a handle to this inode.
        let _ = unlock_file(&self.file);
    }
}

/// Take the ingest lock for `db_path`, failing if another process holds it.
pub fn acquire_ingest_lock(db_path: &Path) -> Result<IngestLock> {
    match try_acquire_ingest_lock(db_path)? {
        Some(lock) => Ok(lock),
        None => Err(Error::Lock(format!(
            "another ingestion run is active for {}",
            db_path.display()
        ))),
    }
}

/// Take the ingest lock for `db_path` if it is free.
pub fn try_acquire_ingest_lock(db_path: &Path) -> Result<Option<IngestLock>> {
    let dir = lock_dir();
    fs::create_dir_all(&dir).map_err(|e| {
        Error::Lock(format!(
            "failed to create lock directory {}: {}",
            dir.display(),
            e
        ))
    })?;

    let path = dir.join(scoped_lock_filename(db_path));
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&path)
        .map_err(|e| Error::Lock(format!("failed to open lock file {}: {}", path.display(), e)))?;

    match lock_file_nonblocking(&file) {
        Ok(()) => {
            // Owner info for debugging only
            let _ = file.set_len(0);
            let _ = file.seek(SeekFrom::Start(0));
            let _ = writeln!(file, "pid={}", std::process::id());
            let _ = file.flush();

            tracing::debug!(path = %path.display(), "Acquired ingest lock");
            Ok(Some(IngestLock { file, path }))
        }
        Err(e) if is_lock_busy(&e) => Ok(None),
        Err(e) => Err(Error::Lock(format!(
            "failed to lock {}: {}",
            path.display(),
            e
        ))),
    }
}

fn lock_dir() -> PathBuf {
    let mut dir = match std::env::var_os("XDG_RUNTIME_DIR") {
        Some(path) if !path.is_empty() => PathBuf::from(path),
        _ => std::env::temp_dir(),
    };
    dir.push("codex-usage");
    dir
}

fn scoped_lock_filename(db_path: &Path) -> String {
    let digest = Sha256::digest(db_path.to_string_lossy().as_bytes());
    format!("{}.{}", INGEST_LOCK_FILE, &hex::encode(digest)[..16])
}

fn is_lock_busy(error: &io::Error) -> bool {
    matches!(error.kind(), io::ErrorKind::WouldBlock)
        || matches!(error.raw_os_error(), Some(11) | Some(35))
}

#[cfg(unix)]
fn lock_file_nonblocking(file: &File) -> io::Result<()> {
    use std::os::fd::AsRawFd;
    const LOCK_EX: i32 = 2;
    const LOCK_NB: i32 = 4;
    // SAFETY: flock is called with a valid file descriptor and constant flags.
    let rc = unsafe { flock(file.as_raw_fd(), LOCK_EX | LOCK_NB) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(unix)]
fn unlock_file(file: &File) -> io::Result<()> {
    use std::os::fd::AsRawFd;
    const LOCK_UN: i32 = 8;
    // SAFETY: flock is called with a valid file descriptor and constant flags.
    let rc = unsafe { flock(file.as_raw_fd(), LOCK_UN) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(unix)]
extern "C" {
    fn flock(fd: i32, operation: i32) -> i32;
}

// Advisory locking is only enforced on Unix.
#[cfg(not(unix))]
fn lock_file_nonblocking(_file: &File) -> io::Result<()> {
    Ok(())
}

#[cfg(not(unix))]
fn unlock_file(_file: &File) -> io::Result<()> {
    Ok(())
}
