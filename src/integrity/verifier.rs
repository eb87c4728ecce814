//! Structural and content checks on archives
//!
//! The three checks (checksum, structure, contents) run independently and
//! each outcome is kept, so a caller can tell a tampered archive from a
//! truncated one from one that simply lacks a component.

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use serde::Serialize;

use super::checksum;
use crate::archive::manifest::{ArchiveManifest, Component, ComponentSet, MANIFEST_ENTRY};
use crate::error::{ErrorKind, OpsError, OpsResult};

/// Result of a full listing pass over an archive
#[derive(Debug, Clone, Default)]
pub struct ArchiveListing {
    pub entries: Vec<PathBuf>,
    /// Components with at least one entry
    pub present: ComponentSet,
    /// Embedded manifest, when the archive has one
    pub manifest: Option<ArchiveManifest>,
    /// Uncompressed payload bytes
    pub total_bytes: u64,
}

impl ArchiveListing {
    /// Requested components with no entry in the archive
    pub fn missing(&self, expected: ComponentSet) -> Vec<Component> {
        expected
            .components()
            .into_iter()
            .filter(|c| !self.present.contains(*c))
            .collect()
    }
}

/// Read every entry of a gzip'd tar to the end without extracting
///
/// Decompression and tar framing errors map to `CorruptArchive`.
pub fn list_archive(path: &Path) -> OpsResult<ArchiveListing> {
    let corrupt = |detail: String| OpsError::CorruptArchive {
        path: path.to_path_buf(),
        detail,
    };

    let file = File::open(path)
        .map_err(|e| OpsError::Io(format!("Failed to open {}: {}", path.display(), e)))?;
    let mut archive = tar::Archive::new(GzDecoder::new(BufReader::new(file)));
    let mut listing = ArchiveListing::default();
    let mut present = Vec::new();

    let entries = archive.entries().map_err(|e| corrupt(e.to_string()))?;
    for entry in entries {
        let mut entry = entry.map_err(|e| corrupt(e.to_string()))?;
        let entry_path = entry
            .path()
            .map_err(|e| corrupt(e.to_string()))?
            .into_owned();

        let declared = entry.size();
        let read = if entry_path == Path::new(MANIFEST_ENTRY) {
            let mut raw = Vec::new();
            entry
                .read_to_end(&mut raw)
                .map_err(|e| corrupt(e.to_string()))?;
            listing.manifest = serde_json::from_slice(&raw).ok();
            raw.len() as u64
        } else {
            io::copy(&mut entry, &mut io::sink()).map_err(|e| corrupt(e.to_string()))?
        };
        if read != declared {
            return Err(corrupt(format!(
                "entry {} is truncated ({} of {} bytes)",
                entry_path.display(),
                read,
                declared
            )));
        }
        listing.total_bytes += read;

        if let Some(component) = Component::for_entry(&entry_path) {
            present.push(component);
        }
        listing.entries.push(entry_path);
    }

    // Drain the rest of the gzip stream so its trailer CRC is checked
    io::copy(&mut archive.into_inner(), &mut io::sink()).map_err(|e| corrupt(e.to_string()))?;

    if listing.entries.is_empty() {
        return Err(corrupt("archive has no entries".into()));
    }

    listing.present = present.into_iter().collect();
    Ok(listing)
}

/// True when the archive can be read end to end
pub fn verify_archive_integrity(path: &Path) -> bool {
    list_archive(path).is_ok()
}

/// True when the archive has entries for every expected component
pub fn verify_contents(path: &Path, expected: ComponentSet) -> OpsResult<bool> {
    Ok(list_archive(path)?.missing(expected).is_empty())
}

/// Outcome of one check
#[derive(Debug)]
pub enum CheckOutcome {
    Passed,
    Skipped(String),
    Failed(OpsError),
}

impl CheckOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, CheckOutcome::Failed(_))
    }

    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            CheckOutcome::Failed(e) => Some(e.kind()),
            _ => None,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            CheckOutcome::Passed => "passed".to_string(),
            CheckOutcome::Skipped(why) => format!("skipped ({})", why),
            CheckOutcome::Failed(e) => format!("FAILED: {}", e),
        }
    }
}

/// Serializable view of an integrity report
#[derive(Debug, Clone, Serialize)]
pub struct IntegritySummary {
    pub archive: PathBuf,
    pub checksum: String,
    pub structure: String,
    pub contents: String,
    pub passed: bool,
}

/// All checks for one archive
#[derive(Debug)]
pub struct IntegrityReport {
    pub archive: PathBuf,
    pub checksum: CheckOutcome,
    pub structure: CheckOutcome,
    pub contents: CheckOutcome,
    pub listing: Option<ArchiveListing>,
    pub digest: Option<String>,
}

impl IntegrityReport {
    pub fn passed(&self) -> bool {
        !(self.checksum.is_failed() || self.structure.is_failed() || self.contents.is_failed())
    }

    /// Checksum or structure failed: nothing in the archive can be trusted
    pub fn untrustworthy(&self) -> bool {
        self.checksum.is_failed() || self.structure.is_failed()
    }

    /// The most severe failure, checksum before structure before contents
    pub fn into_error(self) -> Option<OpsError> {
        [self.checksum, self.structure, self.contents]
            .into_iter()
            .find_map(|outcome| match outcome {
                CheckOutcome::Failed(e) => Some(e),
                _ => None,
            })
    }

    pub fn summary(&self) -> IntegritySummary {
        IntegritySummary {
            archive: self.archive.clone(),
            checksum: self.checksum.describe(),
            structure: self.structure.describe(),
            contents: self.contents.describe(),
            passed: self.passed(),
        }
    }
}

/// Run checksum, structure and content checks on an archive
///
/// `expected` falls back to the sidecar manifest, then the embedded one;
/// with neither, the content check is skipped.
pub fn check_archive(path: &Path, expected: Option<ComponentSet>) -> IntegrityReport {
    let (checksum, digest) = match checksum::verify_against_file(path) {
        Ok(digest) => (CheckOutcome::Passed, Some(digest)),
        Err(e) => (CheckOutcome::Failed(e), None),
    };

    let (structure, listing) = match list_archive(path) {
        Ok(listing) => (CheckOutcome::Passed, Some(listing)),
        Err(e) => (CheckOutcome::Failed(e), None),
    };

    let contents = match &listing {
        None => CheckOutcome::Skipped("archive could not be listed".into()),
        Some(listing) => {
            let expected = expected
                .or_else(|| ArchiveManifest::read_sidecar(path).map(|m| m.component_set()))
                .or_else(|| listing.manifest.as_ref().map(|m| m.component_set()));
            match expected {
                None => CheckOutcome::Skipped("no component manifest".into()),
                Some(expected) => {
                    let missing = listing.missing(expected);
                    if missing.is_empty() {
                        CheckOutcome::Passed
                    } else {
                        CheckOutcome::Failed(OpsError::MissingComponent {
                            path: path.to_path_buf(),
                            missing: missing.iter().map(|c| c.to_string()).collect(),
                        })
                    }
                }
            }
        }
    };

    IntegrityReport {
        archive: path.to_path_buf(),
        checksum,
        structure,
        contents,
        listing,
        digest,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrity::checksum::{compute, write_checksum_file};
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::fs;
    use tempfile::TempDir;

    fn write_archive(path: &Path, entries: &[(&str, &[u8])]) {
        let file = File::create(path).unwrap();
        let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
        for (name, data) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o600);
            header.set_cksum();
            builder.append_data(&mut header, name, *data).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap();
    }

    #[test]
    fn test_listing_finds_components() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("a.tar.gz");
        write_archive(
            &path,
            &[("volumes/app/data", b"1234"), ("database/dump.sql", b"SELECT 1;")],
        );

        let listing = list_archive(&path).unwrap();
        assert_eq!(listing.entries.len(), 2);
        assert_eq!(listing.total_bytes, 13);
        assert!(listing.present.volumes);
        assert!(listing.present.database);
        assert_eq!(listing.missing(ComponentSet::all()), vec![Component::Config]);
        assert!(verify_archive_integrity(&path));
    }

    #[test]
    fn test_truncated_archive_is_corrupt() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("a.tar.gz");
        write_archive(&path, &[("config/app.toml", &[7u8; 4096])]);

        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..bytes.len() / 2]).unwrap();

        assert!(matches!(
            list_archive(&path),
            Err(OpsError::CorruptArchive { .. })
        ));
        assert!(!verify_archive_integrity(&path));
    }

    #[test]
    fn test_garbage_is_corrupt() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("a.tar.gz");
        fs::write(&path, b"definitely not gzip").unwrap();
        assert!(!verify_archive_integrity(&path));
    }

    #[test]
    fn test_check_archive_reports_each_failure() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("a.tar.gz");
        write_archive(&path, &[("config/app.toml", b"port = 80")]);
        write_checksum_file(&path, &compute(&path).unwrap()).unwrap();

        let report = check_archive(&path, Some(ComponentSet::all()));
        assert!(matches!(report.checksum, CheckOutcome::Passed));
        assert!(matches!(report.structure, CheckOutcome::Passed));
        assert_eq!(report.contents.kind(), Some(ErrorKind::MissingComponent));
        assert!(!report.passed());
        assert!(!report.untrustworthy());

        let report = check_archive(&path, None);
        assert!(matches!(report.contents, CheckOutcome::Skipped(_)));
        assert!(report.passed());
    }

    #[test]
    fn test_check_archive_checksum_failure_first() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("a.tar.gz");
        write_archive(&path, &[("config/app.toml", b"port = 80")]);
        write_checksum_file(&path, &"a".repeat(64)).unwrap();

        let report = check_archive(&path, None);
        assert!(report.untrustworthy());
        assert_eq!(
            report.into_error().map(|e| e.kind()),
            Some(ErrorKind::ChecksumMismatch)
        );
    }
}
