//! Disaster recovery orchestrator
//!
//! The happy path is
//! `SELECTING -> PRE_VERIFY -> ROLLBACK_SNAPSHOT -> STOPPING_SERVICES ->
//! RESTORING -> STARTING_SERVICES -> POST_VERIFY -> DONE`.
//!
//! Failures before services are touched end in `FAILED`. Once services have
//! been stopped, any failure enters the rollback path, which restores the
//! rollback point taken just before, restarts services and re-checks their
//! health. It ends in `FAILED_ROLLED_BACK` or, if the rollback itself fails,
//! `ROLLBACK_FAILED`.

use std::fmt;
use std::io::Write;
use std::path::PathBuf;
use std::time::Instant;

use serde::Serialize;
use tracing::{info, warn};

use super::report::{RunReport, StepStatus};
use crate::archive::builder::ArchiveBuilder;
use crate::archive::catalog::{ArchiveCatalog, ArchiveInfo, ArchiveSelector};
use crate::archive::extract::ComponentRestorer;
use crate::archive::manifest::{ArchiveManifest, Component, ComponentSet};
use crate::archive::naming::ArchiveKind;
use crate::config::settings::Settings;
use crate::error::{OpsError, OpsResult};
use crate::integrity::{check_archive, CheckOutcome, IntegrityReport};
use crate::journal::{Journal, Operation, RollbackOutcome};
use crate::lock::LockGuard;
use crate::services::{wait_healthy, Notifier, ServiceLifecycle};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryState {
    Selecting,
    PreVerify,
    RollbackSnapshot,
    StoppingServices,
    Restoring,
    StartingServices,
    PostVerify,
    Done,
    Failed,
    RollbackRestoring,
    RollbackStarting,
    RollbackVerifying,
    FailedRolledBack,
    RollbackFailed,
}

impl RecoveryState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RecoveryState::Done
                | RecoveryState::Failed
                | RecoveryState::FailedRolledBack
                | RecoveryState::RollbackFailed
        )
    }

    pub fn step_name(self) -> &'static str {
        match self {
            RecoveryState::Selecting => "selecting",
            RecoveryState::PreVerify => "pre_verify",
            RecoveryState::RollbackSnapshot => "rollback_snapshot",
            RecoveryState::StoppingServices => "stopping_services",
            RecoveryState::Restoring => "restoring",
            RecoveryState::StartingServices => "starting_services",
            RecoveryState::PostVerify => "post_verify",
            RecoveryState::Done => "done",
            RecoveryState::Failed => "failed",
            RecoveryState::RollbackRestoring => "rollback_restoring",
            RecoveryState::RollbackStarting => "rollback_starting",
            RecoveryState::RollbackVerifying => "rollback_verifying",
            RecoveryState::FailedRolledBack => "failed_rolled_back",
            RecoveryState::RollbackFailed => "rollback_failed",
        }
    }
}

impl fmt::Display for RecoveryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.step_name().to_ascii_uppercase())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryEvent {
    Succeeded,
    Failed,
}

/// Pure transition function
pub fn transition(state: RecoveryState, event: RecoveryEvent) -> RecoveryState {
    use RecoveryEvent as E;
    use RecoveryState as S;
    match (state, event) {
        (S::Selecting, E::Succeeded) => S::PreVerify,
        (S::PreVerify, E::Succeeded) => S::RollbackSnapshot,
        (S::RollbackSnapshot, E::Succeeded) => S::StoppingServices,
        (S::StoppingServices, E::Succeeded) => S::Restoring,
        (S::Restoring, E::Succeeded) => S::StartingServices,
        (S::StartingServices, E::Succeeded) => S::PostVerify,
        (S::PostVerify, E::Succeeded) => S::Done,
        (S::Selecting | S::PreVerify | S::RollbackSnapshot, E::Failed) => S::Failed,
        // Nothing was restored yet; only the services need to come back
        (S::StoppingServices, E::Failed) => S::RollbackStarting,
        (S::Restoring | S::StartingServices | S::PostVerify, E::Failed) => S::RollbackRestoring,
        (S::RollbackRestoring, E::Succeeded) => S::RollbackStarting,
        (S::RollbackStarting, E::Succeeded) => S::RollbackVerifying,
        (S::RollbackVerifying, E::Succeeded) => S::FailedRolledBack,
        (S::RollbackRestoring | S::RollbackStarting | S::RollbackVerifying, E::Failed) => {
            S::RollbackFailed
        }
        (state, _) => state,
    }
}

/// Asks the operator before live data is overwritten
pub trait Confirmer {
    fn confirm(&self, prompt: &str) -> OpsResult<bool>;
}

/// Reads a literal "yes" from stdin
pub struct StdinConfirmer;

impl Confirmer for StdinConfirmer {
    fn confirm(&self, prompt: &str) -> OpsResult<bool> {
        eprint!("{} (yes/no): ", prompt);
        std::io::stderr().flush()?;

        let mut answer = String::new();
        std::io::stdin().read_line(&mut answer)?;
        Ok(answer.trim().eq_ignore_ascii_case("yes"))
    }
}

#[derive(Debug, Clone)]
pub struct RecoveryRequest {
    pub selector: ArchiveSelector,
    /// Restrict the restore; None restores what the archive says it holds
    pub components: Option<ComponentSet>,
    pub dry_run: bool,
    /// Skip confirmation and restore what is present when components are missing
    pub force: bool,
    /// Skip confirmation only
    pub auto_confirm: bool,
}

/// State carried between steps of one run
#[derive(Default)]
struct RunContext {
    archive: Option<ArchiveInfo>,
    components: Vec<Component>,
    snapshot: Vec<Component>,
    rollback_point: Option<PathBuf>,
}

impl RunContext {
    fn archive(&self) -> OpsResult<&ArchiveInfo> {
        self.archive
            .as_ref()
            .ok_or_else(|| OpsError::Validation("no archive selected".into()))
    }
}

pub struct RecoveryOrchestrator<'a> {
    settings: &'a Settings,
    archive_dir: PathBuf,
    lifecycle: &'a dyn ServiceLifecycle,
    notifier: &'a dyn Notifier,
    confirmer: &'a dyn Confirmer,
    journal: Option<&'a Journal>,
}

impl<'a> RecoveryOrchestrator<'a> {
    pub fn new(
        settings: &'a Settings,
        archive_dir: PathBuf,
        lifecycle: &'a dyn ServiceLifecycle,
        notifier: &'a dyn Notifier,
        confirmer: &'a dyn Confirmer,
    ) -> Self {
        Self {
            settings,
            archive_dir,
            lifecycle,
            notifier,
            confirmer,
            journal: None,
        }
    }

    pub fn with_journal(mut self, journal: &'a Journal) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn run(&self, request: &RecoveryRequest) -> RunReport {
        let mut report = RunReport::new(Operation::Recovery, request.dry_run);
        let mut ctx = RunContext::default();
        let mut state = RecoveryState::Selecting;

        // Held for the whole run so no backup or prune races the restore
        let _lock = if request.dry_run {
            None
        } else {
            let started = Instant::now();
            match LockGuard::archive_dir(&self.archive_dir, self.settings.lock_timeout(), "recovery") {
                Ok(lock) => Some(lock),
                Err(e) => {
                    report.record_error(state.step_name(), &e, true, started);
                    return self.finish(report, RecoveryState::Failed);
                }
            }
        };

        while !state.is_terminal() {
            let started = Instant::now();
            let step = state.step_name();
            let mut event = match self.execute(state, request, &mut ctx, &mut report) {
                Ok((status, detail)) => {
                    report.record(step, status, detail, started);
                    RecoveryEvent::Succeeded
                }
                Err(e) => {
                    report.record_error(step, &e, true, started);
                    RecoveryEvent::Failed
                }
            };

            if state == RecoveryState::PreVerify && event == RecoveryEvent::Succeeded {
                if let Err(e) = self.confirm(request, &ctx) {
                    report.record_error("confirming", &e, true, Instant::now());
                    event = RecoveryEvent::Failed;
                }
            }

            let next = transition(state, event);
            if matches!(next, RecoveryState::RollbackRestoring | RecoveryState::RollbackStarting)
                && !matches!(state, RecoveryState::RollbackRestoring)
            {
                warn!(from = %state, "recovery failed after services were touched, rolling back");
            }
            state = next;
        }

        report.rollback = match state {
            RecoveryState::FailedRolledBack => Some(RollbackOutcome::Verified),
            RecoveryState::RollbackFailed => Some(RollbackOutcome::Failed),
            _ => None,
        };
        self.finish(report, state)
    }

    fn finish(&self, mut report: RunReport, state: RecoveryState) -> RunReport {
        report.finish(state, state == RecoveryState::Done);
        if !report.dry_run {
            let started = Instant::now();
            let outcome = match state {
                RecoveryState::Done => "success",
                RecoveryState::FailedRolledBack => "rolled_back",
                RecoveryState::RollbackFailed => "rollback_failed",
                _ => "failed",
            };
            match self.notifier.send("recovery", outcome, &report.summary_line()) {
                Ok(()) => report.record("notifying", StepStatus::Succeeded, "notification sent", started),
                Err(e) => {
                    report.notification_failed = true;
                    report.record_error("notifying", &e, false, started);
                }
            }
        }
        if let Some(journal) = self.journal {
            report.write_journal(journal);
        }
        info!(state = %state, run_id = %report.run_id, "recovery finished");
        report
    }

    fn confirm(&self, request: &RecoveryRequest, ctx: &RunContext) -> OpsResult<()> {
        if request.dry_run || request.force || request.auto_confirm {
            return Ok(());
        }
        let archive = ctx.archive()?;
        let components: Vec<String> = ctx.components.iter().map(|c| c.to_string()).collect();
        let prompt = format!(
            "Restore {} from {}? This stops services and overwrites live data",
            components.join(", "),
            archive.filename
        );
        if self.confirmer.confirm(&prompt)? {
            Ok(())
        } else {
            Err(OpsError::Cancelled("recovery declined by operator".into()))
        }
    }

    /// Side effects of one state
    fn execute(
        &self,
        state: RecoveryState,
        request: &RecoveryRequest,
        ctx: &mut RunContext,
        report: &mut RunReport,
    ) -> OpsResult<(StepStatus, String)> {
        let planned = |detail: String| Ok((StepStatus::Planned, detail));
        match state {
            RecoveryState::Selecting => {
                let archive = ArchiveCatalog::new(self.archive_dir.clone()).resolve(&request.selector)?;
                let detail = format!("selected {}", archive.filename);
                report.archive = Some(archive.path.clone());
                ctx.archive = Some(archive);
                Ok((StepStatus::Succeeded, detail))
            }
            RecoveryState::PreVerify => self.pre_verify(request, ctx),
            RecoveryState::RollbackSnapshot => {
                ctx.snapshot = self.snapshot_components(&ctx.components);
                if ctx.snapshot.is_empty() {
                    return Ok((StepStatus::Skipped, "nothing on disk to snapshot".into()));
                }
                let names = join(&ctx.snapshot);
                if request.dry_run {
                    return planned(format!("would snapshot {} into a rollback point", names));
                }
                let builder = ArchiveBuilder::new(self.archive_dir.clone(), self.settings);
                let plan = builder.plan(ctx.snapshot.iter().copied().collect(), ArchiveKind::RollbackPoint)?;
                let built = builder.build(&plan)?;
                let detail = format!("rollback point {} ({})", file_name(&built.path), names);
                report.rollback_point = Some(built.path.clone());
                ctx.rollback_point = Some(built.path);
                Ok((StepStatus::Succeeded, detail))
            }
            RecoveryState::StoppingServices => {
                if request.dry_run {
                    return planned("would stop services".into());
                }
                self.lifecycle.stop_all()?;
                Ok((StepStatus::Succeeded, "services stopped".into()))
            }
            RecoveryState::Restoring => {
                let archive = ctx.archive()?;
                if request.dry_run {
                    return planned(format!(
                        "would restore {} from {}",
                        join(&ctx.components),
                        archive.filename
                    ));
                }
                let outcome = ComponentRestorer::new(&self.settings.sources).restore(&archive.path, &ctx.components)?;
                report.bytes_restored = outcome.bytes;
                Ok((StepStatus::Succeeded, format!("restored {}", join(&outcome.restored))))
            }
            RecoveryState::StartingServices => {
                if request.dry_run {
                    return planned("would start services".into());
                }
                self.lifecycle.start_all()?;
                Ok((StepStatus::Succeeded, "services started".into()))
            }
            RecoveryState::PostVerify => {
                if request.dry_run {
                    return planned("would wait for services to report healthy".into());
                }
                let health = self.wait_healthy()?;
                Ok((StepStatus::Succeeded, format!("{} service(s) healthy", health)))
            }
            RecoveryState::RollbackRestoring => self.rollback_restore(ctx),
            RecoveryState::RollbackStarting => {
                self.lifecycle.start_all()?;
                Ok((StepStatus::Succeeded, "services started".into()))
            }
            RecoveryState::RollbackVerifying => {
                let health = self.wait_healthy()?;
                Ok((StepStatus::Succeeded, format!("{} service(s) healthy after rollback", health)))
            }
            RecoveryState::Done
            | RecoveryState::Failed
            | RecoveryState::FailedRolledBack
            | RecoveryState::RollbackFailed => Ok((StepStatus::Skipped, String::new())),
        }
    }

    fn pre_verify(&self, request: &RecoveryRequest, ctx: &mut RunContext) -> OpsResult<(StepStatus, String)> {
        let archive = ctx.archive()?;
        let IntegrityReport {
            checksum,
            structure,
            contents,
            listing,
            ..
        } = check_archive(&archive.path, request.components);

        for outcome in [checksum, structure] {
            if let CheckOutcome::Failed(e) = outcome {
                return Err(e);
            }
        }
        let listing = listing.ok_or_else(|| OpsError::CorruptArchive {
            path: archive.path.clone(),
            detail: "archive could not be listed".into(),
        })?;

        let expected = request
            .components
            .or_else(|| ArchiveManifest::read_sidecar(&archive.path).map(|m| m.component_set()))
            .or_else(|| listing.manifest.as_ref().map(|m| m.component_set()))
            .unwrap_or(listing.present);

        let mut note = String::new();
        if let CheckOutcome::Failed(e) = contents {
            if !request.force {
                return Err(e);
            }
            warn!(error = %e, "forced recovery continues with the components present");
            note = format!(" (forced past: {})", e);
        }

        let components: Vec<Component> = expected
            .components()
            .into_iter()
            .filter(|c| listing.present.contains(*c))
            .collect();
        if components.is_empty() {
            return Err(OpsError::MissingComponent {
                path: archive.path.clone(),
                missing: expected.components().iter().map(|c| c.to_string()).collect(),
            });
        }
        ComponentRestorer::new(&self.settings.sources).check_targets(&components)?;

        let detail = format!("{} verified, will restore {}{}", archive.filename, join(&components), note);
        ctx.components = components;
        Ok((StepStatus::Succeeded, detail))
    }

    /// Restore components whose live data exists; the database is always dumped
    fn snapshot_components(&self, components: &[Component]) -> Vec<Component> {
        let sources = &self.settings.sources;
        components
            .iter()
            .copied()
            .filter(|c| match c {
                Component::Volumes => sources.volumes_dir.as_ref().is_some_and(|d| d.exists()),
                Component::Config => sources.config_dir.as_ref().is_some_and(|d| d.exists()),
                Component::Database => true,
            })
            .collect()
    }

    fn rollback_restore(&self, ctx: &RunContext) -> OpsResult<(StepStatus, String)> {
        // Services may be half up after a failed start; the restore goes ahead regardless
        if let Err(e) = self.lifecycle.stop_all() {
            warn!(error = %e, "stopping services before rollback failed, restoring anyway");
        }
        let Some(point) = &ctx.rollback_point else {
            return Ok((StepStatus::Skipped, "no rollback point was taken".into()));
        };

        let expected: ComponentSet = ctx.snapshot.iter().copied().collect();
        if let Some(e) = check_archive(point, Some(expected)).into_error() {
            return Err(e);
        }
        let outcome = ComponentRestorer::new(&self.settings.sources).restore(point, &ctx.snapshot)?;
        Ok((
            StepStatus::Succeeded,
            format!("restored {} from {}", join(&outcome.restored), file_name(point)),
        ))
    }

    fn wait_healthy(&self) -> OpsResult<usize> {
        let services = &self.settings.services;
        let health = wait_healthy(
            self.lifecycle,
            services.health_timeout(),
            services.health_poll_interval(),
        )?;
        Ok(health.len())
    }
}

fn join(components: &[Component]) -> String {
    if components.is_empty() {
        return "nothing".to_string();
    }
    components
        .iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn file_name(path: &std::path::Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
