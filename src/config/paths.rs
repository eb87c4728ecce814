//! Path management for opsvault
//!
//! Resolves the base directory holding settings, remotes, the schedule record,
//! the failure journal and (by default) the archive directory.
//!
//! ## Path Resolution Order
//!
//! 1. `OPSVAULT_HOME` environment variable (if set)
//! 2. The platform data directory from `directories::ProjectDirs`
//!    (e.g. `~/.local/share/opsvault` on Linux)

use std::path::{Path, PathBuf};

use directories::ProjectDirs;

use crate::error::OpsError;

/// Environment variable overriding the base directory
pub const HOME_ENV: &str = "OPSVAULT_HOME";

/// Manages all paths used by opsvault
#[derive(Debug, Clone)]
pub struct OpsPaths {
    /// Base directory for all opsvault state
    base_dir: PathBuf,
}

impl OpsPaths {
    /// Create a new OpsPaths instance
    ///
    /// # Errors
    ///
    /// Returns an error if no home directory can be determined.
    pub fn new() -> Result<Self, OpsError> {
        let base_dir = if let Ok(custom) = std::env::var(HOME_ENV) {
            PathBuf::from(custom)
        } else {
            ProjectDirs::from("", "", "opsvault")
                .map(|dirs| dirs.data_dir().to_path_buf())
                .ok_or_else(|| {
                    OpsError::Config("Could not determine a data directory".into())
                })?
        };

        Ok(Self { base_dir })
    }

    /// Create OpsPaths with a custom base directory (useful for testing)
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Default archive directory (`<base>/archives`)
    pub fn default_archive_dir(&self) -> PathBuf {
        self.base_dir.join("archives")
    }

    /// Directory for per-remote lock files
    pub fn locks_dir(&self) -> PathBuf {
        self.base_dir.join("locks")
    }

    /// Get the path to the settings file
    pub fn settings_file(&self) -> PathBuf {
        self.base_dir.join("config.json")
    }

    /// Get the path to the cloud remotes file
    pub fn remotes_file(&self) -> PathBuf {
        self.base_dir.join("remotes.json")
    }

    /// Get the path to the backup schedule record
    pub fn schedule_file(&self) -> PathBuf {
        self.base_dir.join("schedule.json")
    }

    /// Get the path to the failure journal
    pub fn journal_file(&self) -> PathBuf {
        self.base_dir.join("journal.jsonl")
    }

    /// Ensure the base and lock directories exist
    pub fn ensure_directories(&self) -> Result<(), OpsError> {
        std::fs::create_dir_all(&self.base_dir)
            .map_err(|e| OpsError::Io(format!("Failed to create base directory: {}", e)))?;

        std::fs::create_dir_all(self.locks_dir())
            .map_err(|e| OpsError::Io(format!("Failed to create lock directory: {}", e)))?;

        Ok(())
    }
}
