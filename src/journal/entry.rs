//! Journal entry data structures
//!
//! One entry per failure: which run, which operation and step, what kind of
//! failure, and for recoveries whether a rollback was attempted and how it
//! ended.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ErrorKind, OpsError};

/// Operations that write to the journal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Backup,
    Verify,
    Recovery,
    Cleanup,
    Sync,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operation::Backup => write!(f, "BACKUP"),
            Operation::Verify => write!(f, "VERIFY"),
            Operation::Recovery => write!(f, "RECOVERY"),
            Operation::Cleanup => write!(f, "CLEANUP"),
            Operation::Sync => write!(f, "SYNC"),
        }
    }
}

/// How an automatic rollback ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackOutcome {
    /// Rollback restored and verified the pre-restore state
    Verified,
    Failed,
}

/// A single journal entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    /// When the failure was recorded (UTC)
    pub timestamp: DateTime<Utc>,

    /// Run that produced the failure
    pub run_id: Uuid,

    pub operation: Operation,

    /// State machine step the failure happened in
    pub step: String,

    pub kind: ErrorKind,

    /// Human-readable detail
    pub detail: String,

    #[serde(default)]
    pub rollback_attempted: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub rollback_outcome: Option<RollbackOutcome>,
}

impl JournalEntry {
    pub fn failure(run_id: Uuid, operation: Operation, step: impl Into<String>, error: &OpsError) -> Self {
        Self {
            timestamp: Utc::now(),
            run_id,
            operation,
            step: step.into(),
            kind: error.kind(),
            detail: error.to_string(),
            rollback_attempted: false,
            rollback_outcome: None,
        }
    }

    pub fn with_rollback(mut self, outcome: RollbackOutcome) -> Self {
        self.rollback_attempted = true;
        self.rollback_outcome = Some(outcome);
        self
    }

    /// Format the entry for human-readable output
    pub fn format_human_readable(&self) -> String {
        let mut output = format!(
            "[{}] {} {} {}: {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
            self.operation,
            self.step,
            self.kind,
            self.detail
        );
        if let Some(outcome) = self.rollback_outcome {
            let outcome = match outcome {
                RollbackOutcome::Verified => "rolled back and verified",
                RollbackOutcome::Failed => "ROLLBACK FAILED",
            };
            output.push_str(&format!("\n  Rollback: {}", outcome));
        }
        output
    }
}
