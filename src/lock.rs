//! Advisory locks shared by every run touching an archive directory
//!
//! Locks are `flock`-style exclusive locks (via fs2) on a lock file. The kernel
//! drops the lock when the holding process exits, crashed or not, so a lock
//! file left on disk never blocks a later run: the lock itself is the liveness
//! check. The holder writes a small JSON record into the file so a contending
//! run can say who is holding it.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{OpsError, OpsResult};

/// Lock file name inside an archive directory
pub const ARCHIVE_LOCK_FILE: &str = ".opsvault.lock";

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Who holds a lock
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockHolder {
    pub pid: u32,
    pub purpose: String,
    pub acquired_at: DateTime<Utc>,
}

/// An acquired advisory lock; released on drop
#[derive(Debug)]
pub struct LockGuard {
    file: File,
    path: PathBuf,
}

impl LockGuard {
    /// Acquire the archive directory lock
    pub fn archive_dir(dir: &Path, timeout: Duration, purpose: &str) -> OpsResult<Self> {
        fs::create_dir_all(dir).map_err(|e| {
            OpsError::Io(format!("Failed to create archive directory: {}", e))
        })?;
        Self::acquire(&dir.join(ARCHIVE_LOCK_FILE), timeout, purpose)
    }

    /// Acquire an exclusive lock on `path`, waiting at most `timeout`
    ///
    /// A zero timeout makes exactly one attempt and fails fast with
    /// `ResourceBusy`.
    pub fn acquire(path: &Path, timeout: Duration, purpose: &str) -> OpsResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| {
                OpsError::Io(format!("Failed to open lock file {}: {}", path.display(), e))
            })?;

        let deadline = Instant::now() + timeout;
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => break,
                Err(_) if Instant::now() < deadline => thread::sleep(POLL_INTERVAL),
                Err(_) => {
                    let holder = read_holder(&mut file)
                        .map(|h| {
                            format!(
                                "held by pid {} ({}) since {}",
                                h.pid,
                                h.purpose,
                                h.acquired_at.format("%Y-%m-%d %H:%M:%S UTC")
                            )
                        })
                        .unwrap_or_else(|| "held by another process".to_string());
                    return Err(OpsError::ResourceBusy(format!(
                        "{} is {}",
                        path.display(),
                        holder
                    )));
                }
            }
        }

        let holder = LockHolder {
            pid: std::process::id(),
            purpose: purpose.to_string(),
            acquired_at: Utc::now(),
        };
        write_holder(&mut file, &holder)?;
        info!(lock = %path.display(), purpose, "lock acquired");

        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = self.file.set_len(0);
        let _ = self.file.unlock();
        debug!(lock = %self.path.display(), "lock released");
    }
}

fn write_holder(file: &mut File, holder: &LockHolder) -> OpsResult<()> {
    let json = serde_json::to_vec(holder)?;
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(&json)?;
    file.flush()?;
    Ok(())
}

fn read_holder(file: &mut File) -> Option<LockHolder> {
    let mut contents = String::new();
    file.seek(SeekFrom::Start(0)).ok()?;
    file.read_to_string(&mut contents).ok()?;
    serde_json::from_str(&contents).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_acquire_and_release() {
        let temp = TempDir::new().unwrap();
        let guard = LockGuard::archive_dir(temp.path(), Duration::ZERO, "test").unwrap();
        assert!(guard.path().exists());
        drop(guard);

        // Re-acquirable once released
        LockGuard::archive_dir(temp.path(), Duration::ZERO, "test").unwrap();
    }

    #[test]
    fn test_contention_fails_fast() {
        let temp = TempDir::new().unwrap();
        let _held = LockGuard::archive_dir(temp.path(), Duration::ZERO, "backup").unwrap();

        let started = Instant::now();
        let err = LockGuard::archive_dir(temp.path(), Duration::ZERO, "restore").unwrap_err();
        assert!(matches!(err, OpsError::ResourceBusy(_)));
        assert!(err.to_string().contains("backup"));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_waits_for_release() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().to_path_buf();
        let held = LockGuard::archive_dir(&dir, Duration::ZERO, "backup").unwrap();

        let releaser = thread::spawn(move || {
            thread::sleep(Duration::from_millis(200));
            drop(held);
        });

        LockGuard::archive_dir(&dir, Duration::from_secs(5), "restore").unwrap();
        releaser.join().unwrap();
    }

    #[test]
    fn test_stale_lock_file_does_not_block() {
        let temp = TempDir::new().unwrap();
        // Leftover from a crashed run: content but no kernel lock
        fs::write(
            temp.path().join(ARCHIVE_LOCK_FILE),
            r#"{"pid":999999,"purpose":"backup","acquired_at":"2024-01-01T00:00:00Z"}"#,
        )
        .unwrap();

        LockGuard::archive_dir(temp.path(), Duration::ZERO, "backup").unwrap();
    }
}
