//! Structured run reports
//!
//! Every command finishes by printing a report: which steps ran, which
//! succeeded or failed and why, and how many bytes were moved or freed.

use std::path::PathBuf;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, warn};
use uuid::Uuid;

use crate::cloud::SyncReport;
use crate::error::{ErrorKind, OpsError};
use crate::journal::{Journal, JournalEntry, Operation, RollbackOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Succeeded,
    /// Failed without changing the run's outcome
    Warning,
    Failed,
    /// Dry run: would run
    Planned,
    Skipped,
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepStatus::Succeeded => write!(f, "ok"),
            StepStatus::Warning => write!(f, "warning"),
            StepStatus::Failed => write!(f, "FAILED"),
            StepStatus::Planned => write!(f, "planned"),
            StepStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// One step of a run
#[derive(Debug, Clone, Serialize)]
pub struct StepRecord {
    pub step: String,
    pub status: StepStatus,
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<ErrorKind>,
    pub duration_ms: u64,
}

/// The failure that decided a run's outcome
#[derive(Debug, Clone, Serialize)]
pub struct RunFailure {
    pub step: String,
    pub kind: ErrorKind,
    pub detail: String,
}

/// Summary of one orchestrator run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub operation: Operation,
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Terminal state name
    pub final_state: String,
    pub success: bool,
    pub archive: Option<PathBuf>,
    pub rollback_point: Option<PathBuf>,
    pub steps: Vec<StepRecord>,
    pub bytes_written: u64,
    pub bytes_uploaded: u64,
    pub bytes_restored: u64,
    pub bytes_freed: u64,
    pub deleted: Vec<PathBuf>,
    pub failure: Option<RunFailure>,
    pub upload_failed: bool,
    pub notification_failed: bool,
    pub rollback: Option<RollbackOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload: Option<SyncReport>,
}

impl RunReport {
    pub fn new(operation: Operation, dry_run: bool) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            operation,
            dry_run,
            started_at: Utc::now(),
            finished_at: None,
            final_state: String::new(),
            success: false,
            archive: None,
            rollback_point: None,
            steps: Vec::new(),
            bytes_written: 0,
            bytes_uploaded: 0,
            bytes_restored: 0,
            bytes_freed: 0,
            deleted: Vec::new(),
            failure: None,
            upload_failed: false,
            notification_failed: false,
            rollback: None,
            upload: None,
        }
    }

    pub fn record(&mut self, step: &str, status: StepStatus, detail: impl Into<String>, started: Instant) {
        self.steps.push(StepRecord {
            step: step.to_string(),
            status,
            detail: detail.into(),
            kind: None,
            duration_ms: started.elapsed().as_millis() as u64,
        });
    }

    /// Record a failed step; `fatal` failures decide the run's outcome
    pub fn record_error(&mut self, step: &str, err: &OpsError, fatal: bool, started: Instant) {
        self.record_failure(step, err.kind(), err.to_string(), fatal, started);
    }

    /// Like `record_error`, for failures that only exist as a kind and detail
    pub fn record_failure(
        &mut self,
        step: &str,
        kind: ErrorKind,
        detail: String,
        fatal: bool,
        started: Instant,
    ) {
        let status = if fatal {
            error!(step, %kind, "{}", detail);
            StepStatus::Failed
        } else {
            warn!(step, %kind, "{}, continuing", detail);
            StepStatus::Warning
        };
        if fatal && self.failure.is_none() {
            self.failure = Some(RunFailure {
                step: step.to_string(),
                kind,
                detail: detail.clone(),
            });
        }
        self.steps.push(StepRecord {
            step: step.to_string(),
            status,
            detail,
            kind: Some(kind),
            duration_ms: started.elapsed().as_millis() as u64,
        });
    }

    pub fn finish(&mut self, final_state: impl std::fmt::Display, success: bool) {
        self.final_state = final_state.to_string();
        self.success = success;
        self.finished_at = Some(Utc::now());
    }

    pub fn failure_kind(&self) -> Option<ErrorKind> {
        self.failure.as_ref().map(|f| f.kind)
    }

    pub fn step(&self, name: &str) -> Option<&StepRecord> {
        self.steps.iter().find(|s| s.step == name)
    }

    /// Append every failed or warning step to the journal
    ///
    /// Journal write failures are logged; they never change the report.
    pub fn write_journal(&self, journal: &Journal) {
        for step in &self.steps {
            let Some(kind) = step.kind else {
                continue;
            };
            let mut entry = JournalEntry {
                timestamp: Utc::now(),
                run_id: self.run_id,
                operation: self.operation,
                step: step.step.clone(),
                kind,
                detail: step.detail.clone(),
                rollback_attempted: false,
                rollback_outcome: None,
            };
            let is_deciding = self
                .failure
                .as_ref()
                .is_some_and(|f| f.step == step.step && f.kind == kind);
            if is_deciding {
                if let Some(outcome) = self.rollback {
                    entry = entry.with_rollback(outcome);
                }
            }
            if let Err(e) = journal.record(&entry) {
                warn!(error = %e, "failed to write journal entry");
            }
        }
    }

    /// Short human summary used for notifications
    pub fn summary_line(&self) -> String {
        match &self.failure {
            None => format!("{} finished in state {}", self.operation, self.final_state),
            Some(f) => format!(
                "{} finished in state {}: {} failed with {} ({})",
                self.operation, self.final_state, f.step, f.kind, f.detail
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_first_fatal_failure_decides() {
        let mut report = RunReport::new(Operation::Backup, false);
        let now = Instant::now();
        report.record("building", StepStatus::Succeeded, "ok", now);
        report.record_error("uploading", &OpsError::NotificationFailed("x".into()), false, now);
        report.record_error("verifying", &OpsError::ChecksumMismatch {
            path: "a".into(),
            expected: "1".into(),
            actual: "2".into(),
        }, true, now);
        report.finish("failed", false);

        assert_eq!(report.failure_kind(), Some(ErrorKind::ChecksumMismatch));
        assert_eq!(report.step("uploading").unwrap().status, StepStatus::Warning);
        assert!(report.summary_line().contains("verifying failed with ChecksumMismatch"));
    }

    #[test]
    fn test_write_journal_marks_rollback_on_deciding_step() {
        let temp = TempDir::new().unwrap();
        let journal = Journal::new(temp.path().join("journal.jsonl"));
        let mut report = RunReport::new(Operation::Recovery, false);
        let now = Instant::now();
        report.record_error(
            "restoring",
            &OpsError::RestoreIncomplete {
                detail: "config failed".into(),
                restored: vec!["volumes".into()],
            },
            true,
            now,
        );
        report.rollback = Some(RollbackOutcome::Verified);
        report.write_journal(&journal);

        let entries = journal.read_all().unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].rollback_attempted);
        assert_eq!(entries[0].rollback_outcome, Some(RollbackOutcome::Verified));
        assert_eq!(entries[0].run_id, report.run_id);
    }
}
