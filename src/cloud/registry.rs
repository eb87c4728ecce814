//! Provider registry
//!
//! Backends are looked up by the remote's provider identifier. Each entry
//! carries a factory; adding a provider means adding an entry, the sync
//! adapter never branches on provider names.

use std::time::Duration;

use super::backend::RemoteBackend;
use super::local::LocalBackend;
use super::rclone::{RcloneBackend, RcloneProfile, AZURE, B2, GCS, S3};
use super::remotes::RemoteConfig;
use crate::config::settings::CloudSettings;
use crate::error::{OpsError, OpsResult};

/// Settings shared by every backend factory
#[derive(Debug, Clone)]
pub struct BackendContext {
    pub rclone_bin: String,
    /// Bound on each remote command
    pub command_timeout: Option<Duration>,
}

impl BackendContext {
    pub fn from_settings(settings: &CloudSettings) -> Self {
        Self {
            rclone_bin: settings.rclone_bin.clone(),
            command_timeout: None,
        }
    }
}

pub type BackendFactory = fn(&RemoteConfig, &BackendContext) -> OpsResult<Box<dyn RemoteBackend>>;

/// Registry entry for a provider
pub struct BackendEntry {
    /// Provider identifier used in remote configurations
    pub provider: &'static str,
    /// Human-readable description
    pub description: &'static str,
    pub factory: BackendFactory,
}

fn local_factory(config: &RemoteConfig, _ctx: &BackendContext) -> OpsResult<Box<dyn RemoteBackend>> {
    Ok(Box::new(LocalBackend::from_config(config)?))
}

fn rclone_factory(
    profile: &'static RcloneProfile,
    config: &RemoteConfig,
    ctx: &BackendContext,
) -> OpsResult<Box<dyn RemoteBackend>> {
    Ok(Box::new(RcloneBackend::from_config(
        profile,
        config,
        &ctx.rclone_bin,
        ctx.command_timeout,
    )?))
}

/// Built-in providers
pub static BUILTIN_BACKENDS: &[BackendEntry] = &[
    BackendEntry {
        provider: "local",
        description: "Directory on a mounted filesystem",
        factory: local_factory,
    },
    BackendEntry {
        provider: "s3",
        description: "Amazon S3 (via rclone)",
        factory: |c, ctx| rclone_factory(&S3, c, ctx),
    },
    BackendEntry {
        provider: "b2",
        description: "Backblaze B2 (via rclone)",
        factory: |c, ctx| rclone_factory(&B2, c, ctx),
    },
    BackendEntry {
        provider: "gcs",
        description: "Google Cloud Storage (via rclone)",
        factory: |c, ctx| rclone_factory(&GCS, c, ctx),
    },
    BackendEntry {
        provider: "azure",
        description: "Azure Blob Storage (via rclone)",
        factory: |c, ctx| rclone_factory(&AZURE, c, ctx),
    },
];

/// Lookup table from provider identifier to factory
pub struct BackendRegistry {
    entries: Vec<&'static BackendEntry>,
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl BackendRegistry {
    pub fn builtin() -> Self {
        Self {
            entries: BUILTIN_BACKENDS.iter().collect(),
        }
    }

    /// Add or override a provider
    pub fn register(&mut self, entry: &'static BackendEntry) {
        self.entries.retain(|e| e.provider != entry.provider);
        self.entries.push(entry);
    }

    pub fn contains(&self, provider: &str) -> bool {
        self.entries.iter().any(|e| e.provider == provider)
    }

    /// Create the backend for a remote
    pub fn create(&self, config: &RemoteConfig, ctx: &BackendContext) -> OpsResult<Box<dyn RemoteBackend>> {
        let entry = self
            .entries
            .iter()
            .find(|e| e.provider == config.provider)
            .ok_or_else(|| {
                OpsError::Config(format!(
                    "Unknown provider '{}'. Available providers: {}",
                    config.provider,
                    self.providers()
                        .iter()
                        .map(|(name, _)| *name)
                        .collect::<Vec<_>>()
                        .join(", ")
                ))
            })?;
        (entry.factory)(config, ctx)
    }

    /// (provider, description) pairs
    pub fn providers(&self) -> Vec<(&'static str, &'static str)> {
        self.entries.iter().map(|e| (e.provider, e.description)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn ctx() -> BackendContext {
        BackendContext {
            rclone_bin: "rclone".into(),
            command_timeout: None,
        }
    }

    #[test]
    fn test_dispatch_by_provider() {
        let temp = TempDir::new().unwrap();
        let registry = BackendRegistry::builtin();
        let config = RemoteConfig::new("nas", "local", temp.path().to_string_lossy());
        let backend = registry.create(&config, &ctx()).unwrap();
        assert_eq!(backend.provider(), "local");
        assert!(backend.test_connection().is_ok());
    }

    #[test]
    fn test_unknown_provider() {
        let registry = BackendRegistry::builtin();
        let config = RemoteConfig::new("x", "ftp", "bucket");
        let err = registry.create(&config, &ctx()).err().unwrap();
        assert!(err.to_string().contains("Unknown provider 'ftp'"));
    }

    #[test]
    fn test_register_overrides() {
        static FAKE: BackendEntry = BackendEntry {
            provider: "s3",
            description: "fake",
            factory: local_factory,
        };
        let mut registry = BackendRegistry::builtin();
        let before = registry.providers().len();
        registry.register(&FAKE);
        assert_eq!(registry.providers().len(), before);
        assert!(registry.providers().contains(&("s3", "fake")));
        assert!(registry.contains("s3"));
    }
}
