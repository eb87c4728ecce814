//! User settings for opsvault
//!
//! Holds the component sources, retention policy, lock and timeout policy,
//! cloud defaults, service lifecycle and notification configuration. Every
//! field has a default so a partial `config.json` always loads.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::paths::OpsPaths;
use crate::error::OpsError;
use crate::retention::RetentionPolicy;
use crate::storage::file_io::{read_json, write_json_atomic};

/// Where the archive components come from and are restored to
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceSettings {
    /// Directory holding service volume data
    #[serde(default)]
    pub volumes_dir: Option<PathBuf>,

    /// Directory holding configuration files
    #[serde(default)]
    pub config_dir: Option<PathBuf>,

    #[serde(default)]
    pub database: DatabaseSettings,
}

/// Database dump and restore commands
///
/// The dump command writes the dump to stdout; the restore command reads it
/// from stdin. Both are argv vectors, not shell strings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseSettings {
    #[serde(default)]
    pub dump_command: Vec<String>,

    #[serde(default)]
    pub restore_command: Vec<String>,

    /// Estimated dump size used by the free-space check
    #[serde(default)]
    pub size_hint_bytes: u64,
}

/// Backup retention settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionSettings {
    /// Archives older than this many days are eligible for deletion
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    /// Number of newest backups always kept
    #[serde(default = "default_min_keep")]
    pub min_keep: usize,

    /// Run a retention pass after every successful backup
    #[serde(default = "default_true")]
    pub prune_after_backup: bool,
}

impl RetentionSettings {
    pub fn policy(&self) -> RetentionPolicy {
        RetentionPolicy {
            retention_days: self.retention_days,
            min_keep: self.min_keep,
        }
    }
}

impl Default for RetentionSettings {
    fn default() -> Self {
        Self {
            retention_days: default_retention_days(),
            min_keep: default_min_keep(),
            prune_after_backup: true,
        }
    }
}

/// Cloud sync defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudSettings {
    /// Remote used by `backup --cloud` when none is given
    #[serde(default)]
    pub default_remote: Option<String>,

    /// Treat an upload failure as a failed backup
    #[serde(default)]
    pub upload_fatal: bool,

    /// Bound on remote connectivity tests
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// rclone binary used by the rclone-backed providers
    #[serde(default = "default_rclone_bin")]
    pub rclone_bin: String,
}

impl Default for CloudSettings {
    fn default() -> Self {
        Self {
            default_remote: None,
            upload_fatal: false,
            connect_timeout_secs: default_connect_timeout(),
            rclone_bin: default_rclone_bin(),
        }
    }
}

/// How services are stopped and started around a restore
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ServiceRuntime {
    /// Services are not managed; stop/start are no-ops and health is always green
    #[default]
    None,
    /// Containers managed through the docker CLI
    Docker,
}

/// Service lifecycle settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSettings {
    #[serde(default)]
    pub runtime: ServiceRuntime,

    /// Container names, stopped in order and started in reverse order
    #[serde(default)]
    pub containers: Vec<String>,

    #[serde(default = "default_docker_bin")]
    pub docker_bin: String,

    /// Bound on post-restore health polling
    #[serde(default = "default_health_timeout")]
    pub health_timeout_secs: u64,

    #[serde(default = "default_health_poll_interval")]
    pub health_poll_interval_secs: u64,
}

impl ServiceSettings {
    pub fn health_timeout(&self) -> Duration {
        Duration::from_secs(self.health_timeout_secs)
    }

    pub fn health_poll_interval(&self) -> Duration {
        Duration::from_secs(self.health_poll_interval_secs.max(1))
    }
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            runtime: ServiceRuntime::default(),
            containers: Vec::new(),
            docker_bin: default_docker_bin(),
            health_timeout_secs: default_health_timeout(),
            health_poll_interval_secs: default_health_poll_interval(),
        }
    }
}

/// Notification settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationSettings {
    /// Command run for every notification; empty means log only
    #[serde(default)]
    pub command: Vec<String>,
}

/// User settings for opsvault
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Schema version for migration support
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,

    /// Archive directory; defaults to `<base>/archives`
    #[serde(default)]
    pub archive_dir: Option<PathBuf>,

    #[serde(default)]
    pub sources: SourceSettings,

    /// gzip level, 1-9
    #[serde(default = "default_compression_level")]
    pub compression_level: u32,

    #[serde(default)]
    pub retention: RetentionSettings,

    /// How long to wait for the archive directory lock; 0 fails fast
    #[serde(default)]
    pub lock_timeout_secs: u64,

    /// Bound on the free-space check
    #[serde(default = "default_space_check_timeout")]
    pub space_check_timeout_secs: u64,

    #[serde(default)]
    pub cloud: CloudSettings,

    #[serde(default)]
    pub services: ServiceSettings,

    #[serde(default)]
    pub notifications: NotificationSettings,
}

fn default_schema_version() -> u32 {
    1
}

fn default_compression_level() -> u32 {
    6
}

fn default_retention_days() -> u32 {
    7
}

fn default_min_keep() -> usize {
    3
}

fn default_true() -> bool {
    true
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_rclone_bin() -> String {
    "rclone".to_string()
}

fn default_docker_bin() -> String {
    "docker".to_string()
}

fn default_health_timeout() -> u64 {
    180
}

fn default_health_poll_interval() -> u64 {
    5
}

fn default_space_check_timeout() -> u64 {
    5
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            schema_version: default_schema_version(),
            archive_dir: None,
            sources: SourceSettings::default(),
            compression_level: default_compression_level(),
            retention: RetentionSettings::default(),
            lock_timeout_secs: 0,
            space_check_timeout_secs: default_space_check_timeout(),
            cloud: CloudSettings::default(),
            services: ServiceSettings::default(),
            notifications: NotificationSettings::default(),
        }
    }
}

impl Settings {
    /// Resolve the archive directory
    pub fn archive_dir(&self, paths: &OpsPaths) -> PathBuf {
        self.archive_dir
            .clone()
            .unwrap_or_else(|| paths.default_archive_dir())
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }

    pub fn space_check_timeout(&self) -> Duration {
        Duration::from_secs(self.space_check_timeout_secs)
    }

    /// Check values that serde cannot
    pub fn validate(&self) -> Result<(), OpsError> {
        if !(1..=9).contains(&self.compression_level) {
            return Err(OpsError::Config(format!(
                "compression_level must be between 1 and 9, got {}",
                self.compression_level
            )));
        }
        if self.services.runtime == ServiceRuntime::Docker && self.services.containers.is_empty() {
            return Err(OpsError::Config(
                "services.runtime is docker but no containers are listed".into(),
            ));
        }
        Ok(())
    }

    /// Load settings from disk, or create default settings if file doesn't exist
    pub fn load_or_create(paths: &OpsPaths) -> Result<Self, OpsError> {
        let settings: Settings = read_json(paths.settings_file()).map_err(|e| {
            OpsError::Config(format!("Failed to load settings file: {}", e))
        })?;
        settings.validate()?;
        Ok(settings)
    }

    /// Save settings to disk
    pub fn save(&self, paths: &OpsPaths) -> Result<(), OpsError> {
        paths.ensure_directories()?;
        write_json_atomic(paths.settings_file(), self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.compression_level, 6);
        assert_eq!(settings.retention.retention_days, 7);
        assert_eq!(settings.retention.min_keep, 3);
        assert_eq!(settings.lock_timeout_secs, 0);
        assert_eq!(settings.services.runtime, ServiceRuntime::None);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let paths = OpsPaths::with_base_dir(temp_dir.path().to_path_buf());

        let mut settings = Settings::default();
        settings.compression_level = 9;
        settings.retention.min_keep = 5;
        settings.cloud.default_remote = Some("offsite".into());

        settings.save(&paths).unwrap();

        let loaded = Settings::load_or_create(&paths).unwrap();
        assert_eq!(loaded.compression_level, 9);
        assert_eq!(loaded.retention.min_keep, 5);
        assert_eq!(loaded.cloud.default_remote.as_deref(), Some("offsite"));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let paths = OpsPaths::with_base_dir(temp_dir.path().to_path_buf());
        std::fs::write(paths.settings_file(), r#"{"retention": {"min_keep": 1}}"#).unwrap();

        let loaded = Settings::load_or_create(&paths).unwrap();
        assert_eq!(loaded.retention.min_keep, 1);
        assert_eq!(loaded.retention.retention_days, 7);
        assert!(loaded.retention.prune_after_backup);
    }

    #[test]
    fn test_invalid_compression_level() {
        let settings = Settings {
            compression_level: 12,
            ..Settings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_archive_dir_defaults_under_base() {
        let temp_dir = TempDir::new().unwrap();
        let paths = OpsPaths::with_base_dir(temp_dir.path().to_path_buf());
        let settings = Settings::default();
        assert_eq!(settings.archive_dir(&paths), temp_dir.path().join("archives"));
    }
}
