//! Size estimates and the bounded free-space check

use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use walkdir::WalkDir;

use crate::error::{OpsError, OpsResult};

/// Safety factor applied to raw component sizes
///
/// Covers incompressible data plus tar/gzip framing.
pub const COMPRESSION_MARGIN: f64 = 1.2;

/// Total size in bytes of regular files under `path`
pub fn dir_size(path: &Path) -> OpsResult<u64> {
    let mut total = 0u64;
    for entry in WalkDir::new(path).follow_links(false) {
        let entry = entry.map_err(|e| {
            OpsError::Io(format!("Failed to scan {}: {}", path.display(), e))
        })?;
        if entry.file_type().is_file() {
            total += entry
                .metadata()
                .map_err(|e| OpsError::Io(format!("Failed to stat {}: {}", entry.path().display(), e)))?
                .len();
        }
    }
    Ok(total)
}

/// Bytes required on disk for components totalling `raw_bytes`
pub fn required_bytes(raw_bytes: u64) -> u64 {
    (raw_bytes as f64 * COMPRESSION_MARGIN).ceil() as u64
}

/// Free bytes available to this user on the filesystem holding `path`
///
/// The statfs call runs on a helper thread so a hung mount surfaces as
/// `OpsError::Timeout` instead of blocking the run.
pub fn query_free_space(path: &Path, timeout: Duration) -> OpsResult<u64> {
    let (tx, rx) = mpsc::channel();
    let target: PathBuf = path.to_path_buf();
    thread::spawn(move || {
        let _ = tx.send(fs2::available_space(&target));
    });

    match rx.recv_timeout(timeout) {
        Ok(Ok(bytes)) => Ok(bytes),
        Ok(Err(e)) => Err(OpsError::Io(format!(
            "Failed to query free space on {}: {}",
            path.display(),
            e
        ))),
        Err(_) => Err(OpsError::timeout(
            format!("free-space check on {}", path.display()),
            timeout.as_secs(),
        )),
    }
}

/// Fail with `InsufficientSpace` unless `required` bytes fit in `dir`
pub fn ensure_space(dir: &Path, required: u64, timeout: Duration) -> OpsResult<u64> {
    let available = query_free_space(dir, timeout)?;
    if available < required {
        return Err(OpsError::InsufficientSpace {
            path: dir.to_path_buf(),
            required,
            available,
        });
    }
    Ok(available)
}
