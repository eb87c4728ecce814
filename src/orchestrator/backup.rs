//! Backup orchestrator
//!
//! `IDLE -> BUILDING -> VERIFYING -> (UPLOADING) -> NOTIFYING -> DONE`, with
//! `FAILED` reachable from every working state. The transition function is
//! pure; [`BackupOrchestrator::run`] drives it and performs the side
//! effects of each state.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::Serialize;
use tracing::{info, warn};

use super::report::{RunReport, StepStatus};
use crate::archive::builder::{ArchiveBuilder, BuiltArchive};
use crate::archive::manifest::ComponentSet;
use crate::archive::naming::{checksum_path, meta_path, ArchiveKind};
use crate::cloud::{CloudSync, RemoteConfig};
use crate::config::settings::Settings;
use crate::error::{ErrorKind, OpsError, OpsResult};
use crate::integrity::check_archive;
use crate::journal::{Journal, Operation};
use crate::lock::LockGuard;
use crate::retention::RetentionManager;
use crate::services::Notifier;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupState {
    Idle,
    Building,
    Verifying,
    Uploading,
    Notifying,
    Done,
    Failed,
}

impl BackupState {
    pub fn is_terminal(self) -> bool {
        matches!(self, BackupState::Done | BackupState::Failed)
    }

    /// Step name used in reports and the journal
    pub fn step_name(self) -> &'static str {
        match self {
            BackupState::Idle => "idle",
            BackupState::Building => "building",
            BackupState::Verifying => "verifying",
            BackupState::Uploading => "uploading",
            BackupState::Notifying => "notifying",
            BackupState::Done => "done",
            BackupState::Failed => "failed",
        }
    }
}

impl fmt::Display for BackupState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.step_name().to_ascii_uppercase())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupEvent {
    Start,
    Succeeded,
    Failed,
    /// A failure the current step recovers from locally
    FailedNonFatal,
}

/// Pure transition function
///
/// `upload` says whether the run has an upload step. Events that make no
/// sense in a state leave it unchanged.
pub fn transition(state: BackupState, event: BackupEvent, upload: bool) -> BackupState {
    use BackupEvent as E;
    use BackupState as S;
    match (state, event) {
        (S::Idle, E::Start) => S::Building,
        (S::Building, E::Succeeded) => S::Verifying,
        (S::Verifying, E::Succeeded) if upload => S::Uploading,
        (S::Verifying, E::Succeeded) => S::Notifying,
        (S::Uploading, E::Succeeded | E::FailedNonFatal) => S::Notifying,
        // Notification failures never change the outcome
        (S::Notifying, E::Succeeded | E::Failed | E::FailedNonFatal) => S::Done,
        (S::Building | S::Verifying | S::Uploading, E::Failed) => S::Failed,
        (state, _) => state,
    }
}

/// Everything a backup run needs to know
#[derive(Debug, Clone)]
pub struct BackupRequest {
    pub components: ComponentSet,
    pub compression_level: Option<u32>,
    pub dry_run: bool,
}

/// Upload target for the `UPLOADING` step
pub struct UploadTarget<'a> {
    pub sync: &'a CloudSync<'a>,
    pub remote: RemoteConfig,
    /// Treat upload failure as a failed backup
    pub fatal: bool,
}

pub struct BackupOrchestrator<'a> {
    settings: &'a Settings,
    archive_dir: PathBuf,
    notifier: &'a dyn Notifier,
    journal: Option<&'a Journal>,
    upload: Option<UploadTarget<'a>>,
}

impl<'a> BackupOrchestrator<'a> {
    pub fn new(settings: &'a Settings, archive_dir: PathBuf, notifier: &'a dyn Notifier) -> Self {
        Self {
            settings,
            archive_dir,
            notifier,
            journal: None,
            upload: None,
        }
    }

    pub fn with_journal(mut self, journal: &'a Journal) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn with_upload(mut self, upload: UploadTarget<'a>) -> Self {
        self.upload = Some(upload);
        self
    }

    pub fn run(&self, request: &BackupRequest) -> RunReport {
        let mut report = RunReport::new(Operation::Backup, request.dry_run);
        let upload = self.upload.is_some();
        let mut state = transition(BackupState::Idle, BackupEvent::Start, upload);
        let mut builder = ArchiveBuilder::new(self.archive_dir.clone(), self.settings);
        if let Some(level) = request.compression_level {
            builder = builder.with_compression_level(level);
        }

        // Held across building, verifying and pruning
        let mut lock: Option<LockGuard> = None;
        let mut built: Option<BuiltArchive> = None;

        while !state.is_terminal() {
            let started = Instant::now();
            let step = state.step_name();
            let event = match state {
                BackupState::Building => {
                    match self.build(&builder, request, &mut lock, &mut report) {
                        Ok(archive) => {
                            if let Some(archive) = archive {
                                report.archive = Some(archive.path.clone());
                                report.bytes_written = archive.size_bytes;
                                report.record(
                                    step,
                                    StepStatus::Succeeded,
                                    format!("wrote {}", file_label(&archive.path)),
                                    started,
                                );
                                built = Some(archive);
                            }
                            BackupEvent::Succeeded
                        }
                        Err(e) => {
                            report.record_error(step, &e, true, started);
                            BackupEvent::Failed
                        }
                    }
                }
                BackupState::Verifying => match &built {
                    None => {
                        report.record(step, StepStatus::Planned, "would verify checksum, structure and components", started);
                        BackupEvent::Succeeded
                    }
                    Some(archive) => match verify_built(archive, request.components) {
                        Ok(()) => {
                            report.record(step, StepStatus::Succeeded, "checksum, structure and components verified", started);
                            BackupEvent::Succeeded
                        }
                        Err(e) => {
                            discard(&archive.path);
                            report.archive = None;
                            report.record_error(step, &e, true, started);
                            BackupEvent::Failed
                        }
                    },
                },
                BackupState::Uploading => self.upload_step(built.as_ref(), &mut report, started),
                BackupState::Notifying => {
                    let outcome = if report.upload_failed { "partial" } else { "success" };
                    self.notify(&mut report, outcome);
                    BackupEvent::Succeeded
                }
                BackupState::Idle | BackupState::Done | BackupState::Failed => break,
            };

            let next = transition(state, event, upload);
            if state == BackupState::Verifying && next != BackupState::Failed {
                self.prune(request.dry_run, &mut report);
                lock = None;
            }
            state = next;
        }
        drop(lock);

        if state == BackupState::Failed {
            self.notify(&mut report, "failed");
        }
        report.finish(state, state == BackupState::Done);
        if let Some(journal) = self.journal {
            report.write_journal(journal);
        }
        info!(state = %state, run_id = %report.run_id, "backup finished");
        report
    }

    /// Returns None in dry-run mode, after validating the request
    fn build(
        &self,
        builder: &ArchiveBuilder<'_>,
        request: &BackupRequest,
        lock: &mut Option<LockGuard>,
        report: &mut RunReport,
    ) -> OpsResult<Option<BuiltArchive>> {
        if request.dry_run {
            let started = Instant::now();
            let plan = builder.plan(request.components, ArchiveKind::Backup)?;
            let components: Vec<String> = plan.components.iter().map(|c| c.to_string()).collect();
            report.record(
                BackupState::Building.step_name(),
                StepStatus::Planned,
                format!(
                    "would archive {} (~{} bytes, {} needed, {} available)",
                    components.join(", "),
                    plan.estimated_bytes(),
                    plan.required_bytes,
                    plan.available_bytes
                ),
                started,
            );
            return Ok(None);
        }

        *lock = Some(LockGuard::archive_dir(
            &self.archive_dir,
            self.settings.lock_timeout(),
            "backup",
        )?);
        if let Err(e) = builder.cleanup_stale_temp_files() {
            warn!(error = %e, "stale temp cleanup failed");
        }
        let plan = builder.plan(request.components, ArchiveKind::Backup)?;
        Ok(Some(builder.build(&plan)?))
    }

    fn upload_step(&self, built: Option<&BuiltArchive>, report: &mut RunReport, started: Instant) -> BackupEvent {
        let step = BackupState::Uploading.step_name();
        let Some(target) = &self.upload else {
            return BackupEvent::Succeeded;
        };
        let Some(archive) = built else {
            report.record(
                step,
                StepStatus::Planned,
                format!("would upload to remote '{}'", target.remote.name),
                started,
            );
            return BackupEvent::Succeeded;
        };

        let sync = target.sync.upload_archive(&target.remote, &archive.path, false);
        report.bytes_uploaded = sync.bytes_moved();
        let outcome = if sync.succeeded() {
            report.record(
                step,
                StepStatus::Succeeded,
                format!("uploaded {} file(s) to '{}'", sync.files.len(), target.remote.name),
                started,
            );
            BackupEvent::Succeeded
        } else {
            report.upload_failed = true;
            report.record_failure(
                step,
                sync.first_error_kind().unwrap_or(ErrorKind::RemoteUnavailable),
                sync.first_error().unwrap_or_else(|| "upload failed".into()),
                target.fatal,
                started,
            );
            if target.fatal {
                BackupEvent::Failed
            } else {
                BackupEvent::FailedNonFatal
            }
        };
        report.upload = Some(sync);
        outcome
    }

    /// Retention pass after a verified build; failures are warnings
    fn prune(&self, dry_run: bool, report: &mut RunReport) {
        if !self.settings.retention.prune_after_backup {
            return;
        }
        let started = Instant::now();
        let manager = RetentionManager::new(self.archive_dir.clone());
        let policy = self.settings.retention.policy();

        let result = if dry_run {
            manager.plan_deletions(policy, false).map(|plan| {
                report.record(
                    "pruning",
                    StepStatus::Planned,
                    format!(
                        "would delete {} archive(s), freeing {} bytes",
                        plan.delete.len(),
                        plan.reclaimable_bytes()
                    ),
                    started,
                );
            })
        } else {
            manager.enforce(policy, false).map(|deleted| {
                report.bytes_freed += deleted.freed_bytes;
                report.deleted.extend(deleted.deleted.iter().cloned());
                let status = if deleted.failed.is_empty() {
                    StepStatus::Succeeded
                } else {
                    StepStatus::Warning
                };
                report.record(
                    "pruning",
                    status,
                    format!(
                        "deleted {} archive(s), {} failed",
                        deleted.deleted.len(),
                        deleted.failed.len()
                    ),
                    started,
                );
            })
        };
        if let Err(e) = result {
            report.record_error("pruning", &e, false, started);
        }
    }

    fn notify(&self, report: &mut RunReport, outcome: &str) {
        let started = Instant::now();
        let step = BackupState::Notifying.step_name();
        if report.dry_run {
            report.record(step, StepStatus::Planned, format!("would send '{}' notification", outcome), started);
            return;
        }
        match self.notifier.send("backup", outcome, &report.summary_line()) {
            Ok(()) => report.record(step, StepStatus::Succeeded, "notification sent", started),
            Err(e) => {
                let e = match e {
                    OpsError::NotificationFailed(_) => e,
                    other => OpsError::NotificationFailed(other.to_string()),
                };
                report.notification_failed = true;
                report.record_error(step, &e, false, started);
            }
        }
    }
}

fn verify_built(archive: &BuiltArchive, components: ComponentSet) -> OpsResult<()> {
    corrupt_failpoint(&archive.path);
    let report = check_archive(&archive.path, Some(components));
    match report.into_error() {
        None => Ok(()),
        Some(e) => Err(e),
    }
}

/// Remove an untrustworthy archive and its sidecars
fn discard(archive: &Path) {
    for path in [archive.to_path_buf(), checksum_path(archive), meta_path(archive)] {
        if let Err(e) = fs::remove_file(&path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(file = %path.display(), error = %e, "failed to remove unverified archive");
            }
        }
    }
}

#[cfg(test)]
thread_local! {
    static CORRUPT_BEFORE_VERIFY: std::cell::Cell<bool> = const { std::cell::Cell::new(false) };
}

/// Flip one byte of the next archive verified on this thread
#[cfg(test)]
pub(crate) struct CorruptFailpointGuard;

#[cfg(test)]
impl Drop for CorruptFailpointGuard {
    fn drop(&mut self) {
        CORRUPT_BEFORE_VERIFY.with(|f| f.set(false));
    }
}

#[cfg(test)]
pub(crate) fn corrupt_failpoint_guard() -> CorruptFailpointGuard {
    CORRUPT_BEFORE_VERIFY.with(|f| f.set(true));
    CorruptFailpointGuard
}

#[cfg(test)]
fn corrupt_failpoint(archive: &Path) {
    if CORRUPT_BEFORE_VERIFY.with(|f| f.replace(false)) {
        if let Ok(mut bytes) = fs::read(archive) {
            let mid = bytes.len() / 2;
            bytes[mid] ^= 0xff;
            let _ = fs::write(archive, bytes);
        }
    }
}

#[cfg(not(test))]
fn corrupt_failpoint(_archive: &Path) {}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
