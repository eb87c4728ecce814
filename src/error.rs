//! Custom error types for opsvault
//!
//! This module defines the error hierarchy for the application using thiserror
//! for ergonomic error definitions. Every failure carries an [`ErrorKind`] so
//! orchestrators, reports and the journal can branch on it without matching
//! on message text.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classification of a failure, independent of its message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InsufficientSpace,
    NoComponentsSelected,
    ChecksumMismatch,
    CorruptArchive,
    MissingComponent,
    NoBackupFound,
    ResourceBusy,
    RemoteUnavailable,
    InvalidCredentials,
    ServiceStopFailed,
    ServiceStartFailed,
    RestoreIncomplete,
    Timeout,
    NotificationFailed,
    Cancelled,
    /// I/O, parsing, configuration and other plumbing failures
    Internal,
}

impl ErrorKind {
    /// Process exit code for commands that report one code per failure kind
    pub fn exit_code(self) -> u8 {
        match self {
            ErrorKind::InsufficientSpace => 10,
            ErrorKind::NoComponentsSelected => 11,
            ErrorKind::ChecksumMismatch => 12,
            ErrorKind::CorruptArchive => 13,
            ErrorKind::MissingComponent => 14,
            ErrorKind::NoBackupFound => 15,
            ErrorKind::ResourceBusy => 16,
            ErrorKind::RemoteUnavailable => 17,
            ErrorKind::InvalidCredentials => 18,
            ErrorKind::ServiceStopFailed => 19,
            ErrorKind::ServiceStartFailed => 20,
            ErrorKind::RestoreIncomplete => 21,
            ErrorKind::Timeout => 22,
            ErrorKind::NotificationFailed => 23,
            ErrorKind::Cancelled => 24,
            ErrorKind::Internal => 1,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::InsufficientSpace => "InsufficientSpace",
            ErrorKind::NoComponentsSelected => "NoComponentsSelected",
            ErrorKind::ChecksumMismatch => "ChecksumMismatch",
            ErrorKind::CorruptArchive => "CorruptArchive",
            ErrorKind::MissingComponent => "MissingComponent",
            ErrorKind::NoBackupFound => "NoBackupFound",
            ErrorKind::ResourceBusy => "ResourceBusy",
            ErrorKind::RemoteUnavailable => "RemoteUnavailable",
            ErrorKind::InvalidCredentials => "InvalidCredentials",
            ErrorKind::ServiceStopFailed => "ServiceStopFailed",
            ErrorKind::ServiceStartFailed => "ServiceStartFailed",
            ErrorKind::RestoreIncomplete => "RestoreIncomplete",
            ErrorKind::Timeout => "Timeout",
            ErrorKind::NotificationFailed => "NotificationFailed",
            ErrorKind::Cancelled => "Cancelled",
            ErrorKind::Internal => "Internal",
        };
        f.write_str(name)
    }
}

/// The main error type for opsvault operations
#[derive(Error, Debug)]
pub enum OpsError {
    /// Not enough free space for the estimated archive size
    #[error("Insufficient space in {}: need {required} bytes, have {available}", path.display())]
    InsufficientSpace {
        path: PathBuf,
        required: u64,
        available: u64,
    },

    /// No archive component was requested
    #[error("No components selected: enable at least one of volumes, config, database")]
    NoComponentsSelected,

    /// Digest on disk differs from the recorded one
    #[error("Checksum mismatch for {}: expected {expected}, got {actual}", path.display())]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    /// Archive could not be read end to end
    #[error("Corrupt archive {}: {detail}", path.display())]
    CorruptArchive { path: PathBuf, detail: String },

    /// Archive lacks entries for requested components
    #[error("Archive {} is missing components: {}", path.display(), missing.join(", "))]
    MissingComponent { path: PathBuf, missing: Vec<String> },

    /// Archive directory has no usable backup
    #[error("No backups found in {}", dir.display())]
    NoBackupFound { dir: PathBuf },

    /// Advisory lock held by another run
    #[error("Resource busy: {0}")]
    ResourceBusy(String),

    /// Remote storage could not be reached
    #[error("Remote '{remote}' unavailable: {detail}")]
    RemoteUnavailable { remote: String, detail: String },

    /// Remote storage rejected the configured credentials
    #[error("Invalid credentials for remote '{remote}': {detail}")]
    InvalidCredentials { remote: String, detail: String },

    /// Service lifecycle collaborator failed to stop services
    #[error("Failed to stop services: {0}")]
    ServiceStopFailed(String),

    /// Service lifecycle collaborator failed to start services
    #[error("Failed to start services: {0}")]
    ServiceStartFailed(String),

    /// Not every requested component was extracted cleanly
    #[error("Restore incomplete: {detail}")]
    RestoreIncomplete {
        detail: String,
        restored: Vec<String>,
    },

    /// A bounded wait expired
    #[error("Timed out after {seconds}s waiting for {operation}")]
    Timeout { operation: String, seconds: u64 },

    /// Notification collaborator failed
    #[error("Notification failed: {0}")]
    NotificationFailed(String),

    /// The operator declined a confirmation prompt
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// File I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(String),

    /// Validation errors for user input
    #[error("Validation error: {0}")]
    Validation(String),

    /// Entity not found errors
    #[error("{entity_type} not found: {identifier}")]
    NotFound {
        entity_type: &'static str,
        identifier: String,
    },
}

impl OpsError {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InsufficientSpace { .. } => ErrorKind::InsufficientSpace,
            Self::NoComponentsSelected => ErrorKind::NoComponentsSelected,
            Self::ChecksumMismatch { .. } => ErrorKind::ChecksumMismatch,
            Self::CorruptArchive { .. } => ErrorKind::CorruptArchive,
            Self::MissingComponent { .. } => ErrorKind::MissingComponent,
            Self::NoBackupFound { .. } => ErrorKind::NoBackupFound,
            Self::ResourceBusy(_) => ErrorKind::ResourceBusy,
            Self::RemoteUnavailable { .. } => ErrorKind::RemoteUnavailable,
            Self::InvalidCredentials { .. } => ErrorKind::InvalidCredentials,
            Self::ServiceStopFailed(_) => ErrorKind::ServiceStopFailed,
            Self::ServiceStartFailed(_) => ErrorKind::ServiceStartFailed,
            Self::RestoreIncomplete { .. } => ErrorKind::RestoreIncomplete,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::NotificationFailed(_) => ErrorKind::NotificationFailed,
            Self::Cancelled(_) => ErrorKind::Cancelled,
            Self::Config(_)
            | Self::Io(_)
            | Self::Json(_)
            | Self::Validation(_)
            | Self::NotFound { .. } => ErrorKind::Internal,
        }
    }

    /// Create a "not found" error for archives
    pub fn archive_not_found(identifier: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: "Archive",
            identifier: identifier.into(),
        }
    }

    /// Create a "not found" error for remotes
    pub fn remote_not_found(identifier: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: "Remote",
            identifier: identifier.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, seconds: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            seconds,
        }
    }

    /// Check if this is a "not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<std::io::Error> for OpsError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for OpsError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}

/// Result type alias for opsvault operations
pub type OpsResult<T> = Result<T, OpsError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_error_display() {
        let err = OpsError::Config("test error".into());
        assert_eq!(err.to_string(), "Configuration error: test error");
    }

    #[test]
    fn test_not_found_error() {
        let err = OpsError::archive_not_found("latest");
        assert_eq!(err.to_string(), "Archive not found: latest");
        assert!(err.is_not_found());
        assert_eq!(err.kind(), ErrorKind::Internal);
    }

    #[test]
    fn test_no_backup_found_message() {
        let err = OpsError::NoBackupFound {
            dir: PathBuf::from("/srv/backups"),
        };
        assert_eq!(err.to_string(), "No backups found in /srv/backups");
        assert_eq!(err.kind(), ErrorKind::NoBackupFound);
    }

    #[test]
    fn test_exit_codes_are_distinct() {
        let kinds = [
            ErrorKind::InsufficientSpace,
            ErrorKind::NoComponentsSelected,
            ErrorKind::ChecksumMismatch,
            ErrorKind::CorruptArchive,
            ErrorKind::MissingComponent,
            ErrorKind::NoBackupFound,
            ErrorKind::ResourceBusy,
            ErrorKind::RemoteUnavailable,
            ErrorKind::InvalidCredentials,
            ErrorKind::ServiceStopFailed,
            ErrorKind::ServiceStartFailed,
            ErrorKind::RestoreIncomplete,
            ErrorKind::Timeout,
            ErrorKind::NotificationFailed,
            ErrorKind::Cancelled,
            ErrorKind::Internal,
        ];
        let codes: HashSet<u8> = kinds.iter().map(|k| k.exit_code()).collect();
        assert_eq!(codes.len(), kinds.len());
        assert!(!codes.contains(&0));
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let ops_err: OpsError = io_err.into();
        assert!(matches!(ops_err, OpsError::Io(_)));
    }

    #[test]
    fn test_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::ChecksumMismatch).unwrap();
        assert_eq!(json, "\"checksum_mismatch\"");
    }
}
