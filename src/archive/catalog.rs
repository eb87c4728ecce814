//! Archive catalog
//!
//! Lists the archives in an archive directory and resolves the selectors
//! accepted on the command line (`latest`, a file name, a path).

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::naming::{checksum_path, ArchiveKind, ArchiveName};
use crate::error::{OpsError, OpsResult};

/// Metadata about an archive on disk
#[derive(Debug, Clone, Serialize)]
pub struct ArchiveInfo {
    /// Archive filename
    pub filename: String,
    /// Full path to the archive
    pub path: PathBuf,
    pub kind: ArchiveKind,
    /// When the archive was created
    pub created_at: DateTime<Utc>,
    /// Same-second disambiguator
    pub seq: u32,
    /// Size in bytes
    pub size_bytes: u64,
    /// Whether a detached checksum file exists
    pub has_checksum: bool,
}

impl ArchiveInfo {
    /// Parse archive info from a path; None for anything not named like an archive
    pub fn from_path(path: &Path) -> Option<Self> {
        let filename = path.file_name()?.to_string_lossy().to_string();
        let name = ArchiveName::parse(&filename)?;
        let metadata = fs::metadata(path).ok()?;
        if !metadata.is_file() {
            return None;
        }

        Some(Self {
            filename,
            path: path.to_path_buf(),
            kind: name.kind,
            created_at: name.created_at,
            seq: name.seq,
            size_bytes: metadata.len(),
            has_checksum: checksum_path(path).exists(),
        })
    }
}

/// How the caller picked an archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveSelector {
    /// Newest regular backup
    Latest,
    /// A file name in the archive directory, or a path
    File(PathBuf),
}

impl ArchiveSelector {
    pub fn from_args(latest: bool, file: Option<PathBuf>) -> Self {
        match file {
            Some(file) if !latest => ArchiveSelector::File(file),
            _ => ArchiveSelector::Latest,
        }
    }
}

/// Read-only view over an archive directory
pub struct ArchiveCatalog {
    archive_dir: PathBuf,
}

impl ArchiveCatalog {
    pub fn new(archive_dir: impl Into<PathBuf>) -> Self {
        Self {
            archive_dir: archive_dir.into(),
        }
    }

    pub fn archive_dir(&self) -> &Path {
        &self.archive_dir
    }

    /// List all archives, newest first
    ///
    /// Archives created within the same second are ordered by sequence
    /// number, then by file name, so the order is stable.
    pub fn list(&self) -> OpsResult<Vec<ArchiveInfo>> {
        if !self.archive_dir.exists() {
            return Ok(Vec::new());
        }

        let mut archives = Vec::new();
        for entry in fs::read_dir(&self.archive_dir).map_err(|e| {
            OpsError::Io(format!("Failed to read archive directory: {}", e))
        })? {
            let entry = entry
                .map_err(|e| OpsError::Io(format!("Failed to read directory entry: {}", e)))?;
            if let Some(info) = ArchiveInfo::from_path(&entry.path()) {
                archives.push(info);
            }
        }

        sort_newest_first(&mut archives);
        Ok(archives)
    }

    /// List archives of one kind, newest first
    pub fn list_kind(&self, kind: ArchiveKind) -> OpsResult<Vec<ArchiveInfo>> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|a| a.kind == kind)
            .collect())
    }

    /// Get the most recent regular backup
    pub fn latest_backup(&self) -> OpsResult<Option<ArchiveInfo>> {
        Ok(self.list_kind(ArchiveKind::Backup)?.into_iter().next())
    }

    /// Resolve a selector to one archive
    pub fn resolve(&self, selector: &ArchiveSelector) -> OpsResult<ArchiveInfo> {
        match selector {
            ArchiveSelector::Latest => self.latest_backup()?.ok_or_else(|| OpsError::NoBackupFound {
                dir: self.archive_dir.clone(),
            }),
            ArchiveSelector::File(file) => {
                let candidates = [file.clone(), self.archive_dir.join(file)];
                candidates
                    .iter()
                    .filter(|p| p.is_file())
                    .find_map(|p| ArchiveInfo::from_path(p).or_else(|| foreign_archive(p)))
                    .ok_or_else(|| OpsError::archive_not_found(file.display().to_string()))
            }
        }
    }
}

/// Sort newest first with a stable tie-break
pub fn sort_newest_first(archives: &mut [ArchiveInfo]) {
    archives.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then(b.seq.cmp(&a.seq))
            .then(a.filename.cmp(&b.filename))
    });
}

/// An explicitly named file that does not follow the naming scheme
///
/// Lets an operator verify or restore an archive that was renamed or
/// copied in from elsewhere; its creation time falls back to mtime.
fn foreign_archive(path: &Path) -> Option<ArchiveInfo> {
    let metadata = fs::metadata(path).ok()?;
    let created_at = metadata
        .modified()
        .ok()
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(Utc::now);
    Some(ArchiveInfo {
        filename: path.file_name()?.to_string_lossy().to_string(),
        path: path.to_path_buf(),
        kind: ArchiveKind::Backup,
        created_at,
        seq: 0,
        size_bytes: metadata.len(),
        has_checksum: checksum_path(path).exists(),
    })
}
