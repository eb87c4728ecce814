//! Cloud sync adapter
//!
//! Moves archives between the archive directory and configured remotes.
//! Sync is additive in both directions: nothing is ever deleted on either
//! side because it is missing on the other. Failures are collected per file
//! and never abort the rest of the batch.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{info, warn};

use super::backend::{RemoteBackend, RemoteEntry};
use super::registry::{BackendContext, BackendRegistry};
use super::remotes::RemoteConfig;
use crate::archive::catalog::ArchiveCatalog;
use crate::archive::naming::{checksum_path, meta_path, ArchiveKind, ArchiveName, CHECKSUM_EXT, META_EXT};
use crate::config::paths::OpsPaths;
use crate::error::{ErrorKind, OpsError, OpsResult};
use crate::integrity::checksum::verify_against_file;
use crate::lock::LockGuard;
use crate::storage::file_io::temp_path_for;

/// Direction of a sync
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// Local archives missing on the remote are uploaded
    Upload,
    /// Remote archives missing locally are downloaded
    Download,
    /// Upload, then download
    Bidirectional,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileAction {
    Upload,
    Download,
}

/// What happened to one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FileStatus {
    /// Transferred
    Done,
    /// Dry run: would be transferred
    Planned,
    /// Already present on the other side
    Skipped,
    Failed { kind: ErrorKind, detail: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct FileOutcome {
    pub file: String,
    pub action: FileAction,
    #[serde(flatten)]
    pub status: FileStatus,
    pub bytes: u64,
}

/// Per-remote result of a sync
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub remote: String,
    pub mode: SyncMode,
    pub dry_run: bool,
    pub files: Vec<FileOutcome>,
    /// Failure that prevented the batch from being planned at all
    pub error: Option<(ErrorKind, String)>,
}

impl SyncReport {
    fn new(remote: &str, mode: SyncMode, dry_run: bool) -> Self {
        Self {
            remote: remote.to_string(),
            mode,
            dry_run,
            files: Vec::new(),
            error: None,
        }
    }

    fn fail(mut self, err: &OpsError) -> Self {
        self.error = Some((err.kind(), err.to_string()));
        self
    }

    pub fn bytes_moved(&self) -> u64 {
        self.files
            .iter()
            .filter(|f| f.status == FileStatus::Done)
            .map(|f| f.bytes)
            .sum()
    }

    pub fn count(&self, pred: impl Fn(&FileStatus) -> bool) -> usize {
        self.files.iter().filter(|f| pred(&f.status)).count()
    }

    pub fn failed_count(&self) -> usize {
        self.count(|s| matches!(s, FileStatus::Failed { .. }))
    }

    pub fn succeeded(&self) -> bool {
        self.error.is_none() && self.failed_count() == 0
    }

    /// Kind of the first failure, batch-level before per-file
    pub fn first_error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|(k, _)| *k).or_else(|| {
            self.files.iter().find_map(|f| match &f.status {
                FileStatus::Failed { kind, .. } => Some(*kind),
                _ => None,
            })
        })
    }

    /// One-line description of the first failure
    pub fn first_error(&self) -> Option<String> {
        self.error.as_ref().map(|(_, d)| d.clone()).or_else(|| {
            self.files.iter().find_map(|f| match &f.status {
                FileStatus::Failed { detail, .. } => Some(format!("{}: {}", f.file, detail)),
                _ => None,
            })
        })
    }
}

/// Runs uploads and downloads against configured remotes
pub struct CloudSync<'a> {
    paths: &'a OpsPaths,
    archive_dir: PathBuf,
    registry: &'a BackendRegistry,
    ctx: BackendContext,
    lock_timeout: Duration,
}

impl<'a> CloudSync<'a> {
    pub fn new(
        paths: &'a OpsPaths,
        archive_dir: PathBuf,
        registry: &'a BackendRegistry,
        ctx: BackendContext,
        lock_timeout: Duration,
    ) -> Self {
        Self {
            paths,
            archive_dir,
            registry,
            ctx,
            lock_timeout,
        }
    }

    fn remote_lock(&self, remote: &RemoteConfig) -> OpsResult<LockGuard> {
        let path = self
            .paths
            .locks_dir()
            .join(format!("remote-{}.lock", remote.name));
        LockGuard::acquire(&path, self.lock_timeout, "cloud sync")
    }

    /// Check connectivity, bounded by `timeout`; returns the round-trip time
    pub fn test_connection(&self, remote: &RemoteConfig, timeout: Duration) -> OpsResult<Duration> {
        let backend = self.registry.create(remote, &self.ctx)?;
        let (tx, rx) = mpsc::channel();
        let started = Instant::now();
        thread::spawn(move || {
            let _ = tx.send(backend.test_connection());
        });

        match rx.recv_timeout(timeout) {
            Ok(result) => result.map(|_| started.elapsed()),
            Err(_) => Err(OpsError::timeout(
                format!("connection test on remote '{}'", remote.name),
                timeout.as_secs(),
            )),
        }
    }

    /// Upload one archive with its sidecars
    pub fn upload_archive(&self, remote: &RemoteConfig, archive: &Path, dry_run: bool) -> SyncReport {
        let mut report = SyncReport::new(&remote.name, SyncMode::Upload, dry_run);
        let backend = match self.registry.create(remote, &self.ctx) {
            Ok(b) => b,
            Err(e) => return report.fail(&e),
        };
        let _lock = if dry_run {
            None
        } else {
            match self.remote_lock(remote) {
                Ok(lock) => Some(lock),
                Err(e) => return report.fail(&e),
            }
        };

        for path in with_sidecars(archive) {
            report.files.push(self.upload_one(backend.as_ref(), &path, dry_run));
        }
        report
    }

    /// Sync the archive directory with one remote
    pub fn sync(&self, remote: &RemoteConfig, mode: SyncMode, dry_run: bool) -> SyncReport {
        let report = SyncReport::new(&remote.name, mode, dry_run);
        let backend = match self.registry.create(remote, &self.ctx) {
            Ok(b) => b,
            Err(e) => return report.fail(&e),
        };
        let _lock = if dry_run {
            None
        } else {
            match self.remote_lock(remote) {
                Ok(lock) => Some(lock),
                Err(e) => return report.fail(&e),
            }
        };

        info!(remote = %remote.name, ?mode, dry_run, "sync started");
        let report = self.sync_with(backend.as_ref(), report);
        info!(
            remote = %remote.name,
            files = report.files.len(),
            failed = report.failed_count(),
            bytes = report.bytes_moved(),
            "sync finished"
        );
        report
    }

    /// Sync several remotes in parallel, one thread per remote
    pub fn sync_many(&self, remotes: &[RemoteConfig], mode: SyncMode, dry_run: bool) -> Vec<SyncReport> {
        thread::scope(|scope| {
            let handles: Vec<_> = remotes
                .iter()
                .map(|remote| (remote, scope.spawn(move || self.sync(remote, mode, dry_run))))
                .collect();
            handles
                .into_iter()
                .map(|(remote, handle)| {
                    handle.join().unwrap_or_else(|_| {
                        SyncReport::new(&remote.name, mode, dry_run)
                            .fail(&OpsError::Io("sync thread panicked".into()))
                    })
                })
                .collect()
        })
    }

    fn sync_with(&self, backend: &dyn RemoteBackend, mut report: SyncReport) -> SyncReport {
        let remote_entries = match backend.list() {
            Ok(entries) => Some(entries),
            Err(e) => {
                warn!(remote = %report.remote, error = %e, "remote listing failed");
                if report.mode != SyncMode::Upload {
                    return report.fail(&e);
                }
                None
            }
        };
        let remote_index: BTreeMap<String, u64> = remote_entries
            .iter()
            .flatten()
            .map(|e| (e.name.clone(), e.size_bytes))
            .collect();

        if matches!(report.mode, SyncMode::Upload | SyncMode::Bidirectional) {
            let local = match self.local_files() {
                Ok(files) => files,
                Err(e) => return report.fail(&e),
            };
            for path in local {
                let name = file_name(&path);
                let size = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
                if remote_index.get(&name) == Some(&size) {
                    report.files.push(FileOutcome {
                        file: name,
                        action: FileAction::Upload,
                        status: FileStatus::Skipped,
                        bytes: size,
                    });
                } else {
                    report.files.push(self.upload_one(backend, &path, report.dry_run));
                }
            }
        }

        if matches!(report.mode, SyncMode::Download | SyncMode::Bidirectional) {
            let entries = remote_entries.unwrap_or_default();
            self.download_missing(backend, &entries, &mut report);
        }
        report
    }

    /// Regular backups in the archive directory, with their sidecars
    fn local_files(&self) -> OpsResult<Vec<PathBuf>> {
        let catalog = ArchiveCatalog::new(&self.archive_dir);
        Ok(catalog
            .list_kind(ArchiveKind::Backup)?
            .into_iter()
            .rev()
            .flat_map(|a| with_sidecars(&a.path))
            .collect())
    }

    fn upload_one(&self, backend: &dyn RemoteBackend, path: &Path, dry_run: bool) -> FileOutcome {
        let name = file_name(path);
        let size = fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        let status = if dry_run {
            FileStatus::Planned
        } else {
            match backend.upload(path, &name) {
                Ok(_) => {
                    info!(file = %name, bytes = size, "uploaded");
                    FileStatus::Done
                }
                Err(e) => {
                    warn!(file = %name, kind = %e.kind(), error = %e, "upload failed");
                    failed(&e)
                }
            }
        };
        FileOutcome {
            file: name,
            action: FileAction::Upload,
            status,
            bytes: size,
        }
    }

    fn download_missing(&self, backend: &dyn RemoteBackend, entries: &[RemoteEntry], report: &mut SyncReport) {
        let wanted: Vec<&RemoteEntry> = entries
            .iter()
            .filter(|e| is_archive_object(&e.name))
            .filter(|e| !self.archive_dir.join(&e.name).exists())
            .collect();
        if wanted.is_empty() {
            return;
        }

        if !report.dry_run {
            if let Err(e) = fs::create_dir_all(&self.archive_dir) {
                *report = report.clone().fail(&OpsError::from(e));
                return;
            }
        }

        let mut downloaded: BTreeSet<String> = BTreeSet::new();
        let first = report.files.len();
        for entry in wanted {
            let status = if report.dry_run {
                FileStatus::Planned
            } else {
                match download_atomic(backend, &entry.name, &self.archive_dir.join(&entry.name)) {
                    Ok(_) => {
                        info!(file = %entry.name, bytes = entry.size_bytes, "downloaded");
                        downloaded.insert(entry.name.clone());
                        FileStatus::Done
                    }
                    Err(e) => {
                        warn!(file = %entry.name, kind = %e.kind(), error = %e, "download failed");
                        failed(&e)
                    }
                }
            };
            report.files.push(FileOutcome {
                file: entry.name.clone(),
                action: FileAction::Download,
                status,
                bytes: entry.size_bytes,
            });
        }

        // Verify downloaded archives that arrived with a checksum
        let mut rejected: BTreeMap<String, FileStatus> = BTreeMap::new();
        for name in &downloaded {
            if ArchiveName::parse(name).is_none() {
                continue;
            }
            let archive = self.archive_dir.join(name);
            if !checksum_path(&archive).exists() {
                continue;
            }
            if let Err(e) = verify_against_file(&archive) {
                warn!(file = %name, error = %e, "downloaded archive failed verification");
                for path in with_sidecars(&archive) {
                    let _ = fs::remove_file(&path);
                    rejected.insert(file_name(&path), failed(&e));
                }
            }
        }
        for outcome in report.files[first..].iter_mut() {
            if let Some(status) = rejected.get(&outcome.file) {
                outcome.status = status.clone();
            }
        }
    }
}

fn failed(e: &OpsError) -> FileStatus {
    FileStatus::Failed {
        kind: e.kind(),
        detail: e.to_string(),
    }
}

fn download_atomic(backend: &dyn RemoteBackend, object: &str, dest: &Path) -> OpsResult<u64> {
    let temp = temp_path_for(dest);
    let result = backend
        .download(object, &temp)
        .and_then(|bytes| fs::rename(&temp, dest).map(|_| bytes).map_err(OpsError::from));
    if result.is_err() {
        let _ = fs::remove_file(&temp);
    }
    result
}

/// An archive path followed by whichever sidecars exist
fn with_sidecars(archive: &Path) -> Vec<PathBuf> {
    let mut paths = vec![archive.to_path_buf()];
    paths.extend(
        [checksum_path(archive), meta_path(archive)]
            .into_iter()
            .filter(|p| p.exists()),
    );
    paths
}

/// Backup archives and their sidecars; rollback points stay local
fn is_archive_object(name: &str) -> bool {
    let base = name
        .strip_suffix(CHECKSUM_EXT)
        .or_else(|| name.strip_suffix(META_EXT))
        .unwrap_or(name);
    ArchiveName::parse(base).is_some_and(|n| n.kind == ArchiveKind::Backup)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
