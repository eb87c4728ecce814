//! Named remote configurations, persisted in `remotes.json`
//!
//! A remote binds a provider, a bucket and a credential reference under a
//! name. Saving a remote under an existing name replaces it.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::paths::OpsPaths;
use crate::error::{OpsError, OpsResult};
use crate::storage::file_io::{read_json, read_json_required, write_json_atomic};

/// Where a remote's secrets come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialRef {
    /// JSON object of string keys and values
    File(PathBuf),
    /// Every environment variable starting with this prefix
    Env(String),
}

impl CredentialRef {
    /// Parse `env:PREFIX` or a file path
    pub fn parse(raw: &str) -> Self {
        match raw.strip_prefix("env:") {
            Some(prefix) => CredentialRef::Env(prefix.to_string()),
            None => CredentialRef::File(PathBuf::from(raw)),
        }
    }

    /// Load the key/value pairs; keys are lowercased
    pub fn resolve(&self, remote: &str) -> OpsResult<BTreeMap<String, String>> {
        let invalid = |detail: String| OpsError::InvalidCredentials {
            remote: remote.to_string(),
            detail,
        };

        let values: BTreeMap<String, String> = match self {
            CredentialRef::File(path) => {
                if !path.exists() {
                    return Err(invalid(format!(
                        "credential file {} does not exist",
                        path.display()
                    )));
                }
                let raw: BTreeMap<String, String> = read_json_required(path).map_err(|e| {
                    invalid(format!("credential file {} is unreadable: {}", path.display(), e))
                })?;
                raw.into_iter()
                    .map(|(k, v)| (k.to_ascii_lowercase(), v))
                    .collect()
            }
            CredentialRef::Env(prefix) => std::env::vars()
                .filter_map(|(k, v)| {
                    k.strip_prefix(prefix.as_str())
                        .filter(|rest| !rest.is_empty())
                        .map(|rest| (rest.trim_start_matches('_').to_ascii_lowercase(), v))
                })
                .collect(),
        };

        if values.is_empty() {
            return Err(invalid("no credential values found".into()));
        }
        Ok(values)
    }
}

/// A named remote
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub name: String,
    /// Provider identifier, e.g. `local`, `s3`, `b2`
    pub provider: String,
    /// Bucket or container; a directory for the `local` provider
    pub bucket: String,
    #[serde(default)]
    pub region: Option<String>,
    /// Object prefix inside the bucket
    #[serde(default)]
    pub prefix: Option<String>,
    /// `env:PREFIX` or a path to a JSON credential file
    #[serde(default)]
    pub credentials: Option<String>,
    /// Extra provider-specific options
    #[serde(default)]
    pub options: BTreeMap<String, String>,
    pub updated_at: DateTime<Utc>,
}

impl RemoteConfig {
    pub fn new(name: impl Into<String>, provider: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            provider: provider.into(),
            bucket: bucket.into(),
            region: None,
            prefix: None,
            credentials: None,
            options: BTreeMap::new(),
            updated_at: Utc::now(),
        }
    }

    pub fn credential_ref(&self) -> Option<CredentialRef> {
        self.credentials.as_deref().map(CredentialRef::parse)
    }

    /// Resolved credentials, or an empty map when none are configured
    pub fn resolve_credentials(&self) -> OpsResult<BTreeMap<String, String>> {
        match self.credential_ref() {
            Some(cred) => cred.resolve(&self.name),
            None => Ok(BTreeMap::new()),
        }
    }

    pub fn validate(&self) -> OpsResult<()> {
        if self.name.trim().is_empty() {
            return Err(OpsError::Validation("remote name cannot be empty".into()));
        }
        if !self
            .name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(OpsError::Validation(format!(
                "remote name '{}' may only contain letters, digits, '-' and '_'",
                self.name
            )));
        }
        if self.bucket.trim().is_empty() {
            return Err(OpsError::Validation("bucket cannot be empty".into()));
        }
        Ok(())
    }
}

/// All configured remotes
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemoteStore {
    #[serde(default)]
    remotes: BTreeMap<String, RemoteConfig>,
}

impl RemoteStore {
    pub fn load(paths: &OpsPaths) -> OpsResult<Self> {
        read_json(paths.remotes_file())
    }

    pub fn save(&self, paths: &OpsPaths) -> OpsResult<()> {
        write_json_atomic(paths.remotes_file(), self)
    }

    pub fn get(&self, name: &str) -> OpsResult<&RemoteConfig> {
        self.remotes
            .get(name)
            .ok_or_else(|| OpsError::remote_not_found(name))
    }

    /// Insert or replace a remote; returns the previous one
    pub fn upsert(&mut self, remote: RemoteConfig) -> OpsResult<Option<RemoteConfig>> {
        remote.validate()?;
        Ok(self.remotes.insert(remote.name.clone(), remote))
    }

    pub fn remove(&mut self, name: &str) -> OpsResult<RemoteConfig> {
        self.remotes
            .remove(name)
            .ok_or_else(|| OpsError::remote_not_found(name))
    }

    pub fn list(&self) -> impl Iterator<Item = &RemoteConfig> {
        self.remotes.values()
    }

    pub fn is_empty(&self) -> bool {
        self.remotes.is_empty()
    }
}
