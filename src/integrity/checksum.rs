//! SHA-256 digests and detached checksum files
//!
//! Checksum files use the `sha256sum` layout (`<hex>  <file name>`), so
//! `sha256sum -c` works on an archive directory as well.

use std::fs::{self, File};
use std::io::{self, BufReader, Read, Write};
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::archive::naming::checksum_path;
use crate::error::{OpsError, OpsResult};
use crate::storage::file_io::write_bytes_atomic;

/// Compute the hex SHA-256 digest of a file
pub fn compute(path: &Path) -> OpsResult<String> {
    let file = File::open(path)
        .map_err(|e| OpsError::Io(format!("Failed to open {}: {}", path.display(), e)))?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = reader
            .read(&mut buf)
            .map_err(|e| OpsError::Io(format!("Failed to read {}: {}", path.display(), e)))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// True when the digest of `path` equals `expected` (case-insensitive hex)
pub fn verify(path: &Path, expected: &str) -> OpsResult<bool> {
    Ok(compute(path)?.eq_ignore_ascii_case(expected.trim()))
}

/// Write `<archive>.sha256`
pub fn write_checksum_file(archive: &Path, digest: &str) -> OpsResult<()> {
    let name = archive
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    write_bytes_atomic(checksum_path(archive), format!("{}  {}\n", digest, name).as_bytes())
}

/// Read the recorded digest from `<archive>.sha256`
///
/// The text is returned as recorded; a value that is not a SHA-256 digest
/// simply never matches.
pub fn read_checksum_file(archive: &Path) -> OpsResult<String> {
    let path = checksum_path(archive);
    let contents = fs::read_to_string(&path).map_err(|e| {
        OpsError::Io(format!("Failed to read checksum file {}: {}", path.display(), e))
    })?;
    let digest = contents.split_whitespace().next().unwrap_or_default();
    Ok(digest.to_ascii_lowercase())
}

fn is_sha256_hex(digest: &str) -> bool {
    digest.len() == 64 && digest.chars().all(|c| c.is_ascii_hexdigit())
}

/// Compare an archive against its detached checksum file
///
/// Returns the verified digest, or `ChecksumMismatch`.
pub fn verify_against_file(archive: &Path) -> OpsResult<String> {
    let expected = read_checksum_file(archive)?;
    let actual = compute(archive)?;
    if !is_sha256_hex(&expected) || actual != expected {
        return Err(OpsError::ChecksumMismatch {
            path: archive.to_path_buf(),
            expected,
            actual,
        });
    }
    Ok(actual)
}

/// Writer that hashes everything passing through it
pub struct HashingWriter<W: Write> {
    inner: W,
    hasher: Sha256,
    written: u64,
}

impl<W: Write> HashingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            written: 0,
        }
    }

    /// Return the inner writer, hex digest and byte count
    pub fn finish(self) -> (W, String, u64) {
        (self.inner, hex::encode(self.hasher.finalize()), self.written)
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
