//! CLI command handlers
//!
//! This module contains the implementation of CLI commands, bridging the
//! clap argument parsing with the orchestrators. Every handler returns the
//! process exit code; errors that escape a handler map to their kind's code.

pub mod archive;
pub mod backup;
pub mod cleanup;
pub mod cloud;
pub mod config;
pub mod journal;
pub mod recovery;
pub mod schedule;
pub mod verify;

use std::path::PathBuf;

use serde::Serialize;

use crate::config::paths::OpsPaths;
use crate::config::settings::Settings;
use crate::error::{ErrorKind, OpsError, OpsResult};
use crate::journal::Journal;
use crate::orchestrator::RunReport;

pub use archive::{handle_info_command, handle_list_command, InfoArgs, ListArgs};
pub use backup::{handle_backup_command, BackupArgs};
pub use cleanup::{handle_cleanup_command, CleanupArgs};
pub use cloud::{handle_cloud_command, CloudCommands};
pub use config::{handle_config_command, ConfigCommands};
pub use journal::{handle_journal_command, JournalArgs};
pub use recovery::{handle_recovery_command, RecoveryArgs};
pub use schedule::{handle_schedule_command, ScheduleCommands};
pub use verify::{handle_verify_command, VerifyArgs};

/// Everything a handler needs from the environment
pub struct CliContext {
    pub paths: OpsPaths,
    pub settings: Settings,
    /// Print machine-readable JSON instead of tables
    pub json: bool,
}

impl CliContext {
    pub fn load(json: bool) -> OpsResult<Self> {
        let paths = OpsPaths::new()?;
        let settings = Settings::load_or_create(&paths)?;
        Ok(Self {
            paths,
            settings,
            json,
        })
    }

    pub fn archive_dir(&self) -> PathBuf {
        self.settings.archive_dir(&self.paths)
    }

    pub fn journal(&self) -> Journal {
        Journal::new(self.paths.journal_file())
    }

    /// Print `value` as JSON, or the human rendering
    pub fn emit<T: Serialize>(&self, value: &T, human: impl FnOnce() -> String) -> OpsResult<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(value)?);
        } else {
            println!("{}", human());
        }
        Ok(())
    }
}

/// Backup exit code: 2 upload failed, 1 backup failed, 3 notification failed
pub fn backup_exit_code(report: &RunReport) -> u8 {
    if report.upload_failed {
        2
    } else if !report.success {
        1
    } else if report.notification_failed {
        3
    } else {
        0
    }
}

/// Verify exit code for the most severe failure kind
pub fn verify_exit_code(kind: Option<ErrorKind>) -> u8 {
    match kind {
        None => 0,
        Some(ErrorKind::ChecksumMismatch) => 2,
        Some(ErrorKind::MissingComponent) => 3,
        Some(ErrorKind::CorruptArchive) => 4,
        Some(_) => 1,
    }
}

/// Exit code for recovery, cleanup and sync: 0 or the failure kind's code
pub fn run_exit_code(report: &RunReport) -> u8 {
    if report.success {
        0
    } else {
        report.failure_kind().map(ErrorKind::exit_code).unwrap_or(1)
    }
}

/// Exit code for an error that escaped a handler
pub fn error_exit_code(err: &OpsError) -> u8 {
    err.kind().exit_code()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::Operation;

    #[test]
    fn test_backup_exit_code_precedence() {
        let mut report = RunReport::new(Operation::Backup, false);
        report.finish("DONE", true);
        assert_eq!(backup_exit_code(&report), 0);

        report.notification_failed = true;
        assert_eq!(backup_exit_code(&report), 3);

        report.upload_failed = true;
        assert_eq!(backup_exit_code(&report), 2);

        report.upload_failed = false;
        report.finish("FAILED", false);
        assert_eq!(backup_exit_code(&report), 1);
    }

    #[test]
    fn test_verify_exit_codes() {
        assert_eq!(verify_exit_code(None), 0);
        assert_eq!(verify_exit_code(Some(ErrorKind::ChecksumMismatch)), 2);
        assert_eq!(verify_exit_code(Some(ErrorKind::MissingComponent)), 3);
        assert_eq!(verify_exit_code(Some(ErrorKind::CorruptArchive)), 4);
        assert_eq!(verify_exit_code(Some(ErrorKind::NoBackupFound)), 1);
    }
}
