//! Backup and disaster recovery state machines
//!
//! Each orchestrator is a tagged state enum with a pure transition function
//! plus a driver that performs the side effects of each state and records
//! them in a [`RunReport`].

pub mod backup;
pub mod recovery;
pub mod report;

pub use backup::{BackupOrchestrator, BackupRequest, BackupState, UploadTarget};
pub use recovery::{
    Confirmer, RecoveryOrchestrator, RecoveryRequest, RecoveryState, StdinConfirmer,
};
pub use report::{RunFailure, RunReport, StepRecord, StepStatus};
