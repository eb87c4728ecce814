//! Object-storage providers driven through rclone
//!
//! Each provider is a profile naming the rclone backend type and the
//! credential keys it needs. The remote definition is passed to rclone
//! entirely through `RCLONE_CONFIG_OPSVAULT_*` environment variables, so no
//! rclone config file is read or written.

use std::collections::BTreeMap;
use std::path::Path;
use std::process::Command;
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use super::backend::{RemoteBackend, RemoteEntry};
use super::remotes::RemoteConfig;
use crate::error::{OpsError, OpsResult};
use crate::process::{run, CommandOutput};

const RCLONE_REMOTE: &str = "OPSVAULT";

/// How one provider maps onto an rclone backend
#[derive(Debug)]
pub struct RcloneProfile {
    pub provider: &'static str,
    /// rclone backend `type`
    pub rclone_type: &'static str,
    /// Credential keys that must be present
    pub required: &'static [&'static str],
    /// Fixed options set for this provider
    pub fixed: &'static [(&'static str, &'static str)],
}

pub const S3: RcloneProfile = RcloneProfile {
    provider: "s3",
    rclone_type: "s3",
    required: &["access_key_id", "secret_access_key"],
    fixed: &[("provider", "AWS")],
};

pub const B2: RcloneProfile = RcloneProfile {
    provider: "b2",
    rclone_type: "b2",
    required: &["account", "key"],
    fixed: &[],
};

pub const GCS: RcloneProfile = RcloneProfile {
    provider: "gcs",
    rclone_type: "google cloud storage",
    required: &["service_account_file"],
    fixed: &[],
};

pub const AZURE: RcloneProfile = RcloneProfile {
    provider: "azure",
    rclone_type: "azureblob",
    required: &["account", "key"],
    fixed: &[],
};

pub struct RcloneBackend {
    profile: &'static RcloneProfile,
    remote: String,
    bin: String,
    /// Path on the rclone remote, `bucket[/prefix]`
    base: String,
    env: BTreeMap<String, String>,
    timeout: Option<Duration>,
}

impl RcloneBackend {
    pub fn from_config(
        profile: &'static RcloneProfile,
        config: &RemoteConfig,
        bin: &str,
        timeout: Option<Duration>,
    ) -> OpsResult<Self> {
        let credentials = config.resolve_credentials()?;
        let missing: Vec<&str> = profile
            .required
            .iter()
            .copied()
            .filter(|key| !credentials.contains_key(*key))
            .collect();
        if !missing.is_empty() {
            return Err(OpsError::InvalidCredentials {
                remote: config.name.clone(),
                detail: format!("missing credential keys: {}", missing.join(", ")),
            });
        }

        let mut env = BTreeMap::new();
        let mut set = |key: &str, value: &str| {
            env.insert(
                format!("RCLONE_CONFIG_{}_{}", RCLONE_REMOTE, key.to_ascii_uppercase()),
                value.to_string(),
            );
        };
        set("type", profile.rclone_type);
        for &(key, value) in profile.fixed {
            set(key, value);
        }
        if let Some(region) = &config.region {
            set("region", region.as_str());
        }
        for (key, value) in config.options.iter().chain(credentials.iter()) {
            set(key.as_str(), value.as_str());
        }

        let mut base = config.bucket.trim_matches('/').to_string();
        if let Some(prefix) = config.prefix.as_deref().map(|p| p.trim_matches('/')) {
            if !prefix.is_empty() {
                base = format!("{}/{}", base, prefix);
            }
        }

        Ok(Self {
            profile,
            remote: config.name.clone(),
            bin: bin.to_string(),
            base,
            env,
            timeout,
        })
    }

    fn target(&self, object: &str) -> String {
        format!("{}:{}/{}", RCLONE_REMOTE, self.base, object)
    }

    fn rclone(&self, args: &[&str], operation: &str) -> OpsResult<CommandOutput> {
        let mut cmd = Command::new(&self.bin);
        cmd.args(args).envs(&self.env);
        let output = run(cmd, None, self.timeout, operation).map_err(|e| match e {
            OpsError::Io(detail) => OpsError::RemoteUnavailable {
                remote: self.remote.clone(),
                detail,
            },
            other => other,
        })?;
        if !output.success() {
            return Err(classify_failure(&self.remote, &output.stderr));
        }
        Ok(output)
    }
}

impl RemoteBackend for RcloneBackend {
    fn provider(&self) -> &'static str {
        self.profile.provider
    }

    fn upload(&self, local: &Path, object: &str) -> OpsResult<u64> {
        let bytes = std::fs::metadata(local)?.len();
        let source = local.to_string_lossy();
        self.rclone(&["copyto", &source, &self.target(object)], "rclone upload")?;
        Ok(bytes)
    }

    fn download(&self, object: &str, local: &Path) -> OpsResult<u64> {
        let dest = local.to_string_lossy();
        self.rclone(&["copyto", &self.target(object), &dest], "rclone download")?;
        Ok(std::fs::metadata(local)?.len())
    }

    fn list(&self) -> OpsResult<Vec<RemoteEntry>> {
        let base = format!("{}:{}", RCLONE_REMOTE, self.base);
        let output = self.rclone(&["lsjson", "--files-only", &base], "rclone list")?;
        parse_lsjson(&output.stdout)
    }

    fn test_connection(&self) -> OpsResult<()> {
        let base = format!("{}:{}", RCLONE_REMOTE, self.base);
        self.rclone(&["lsf", "--max-depth", "1", &base], "rclone connection test")?;
        debug!(remote = %self.remote, "rclone connection ok");
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct LsJsonEntry {
    name: String,
    size: i64,
    #[serde(default)]
    is_dir: bool,
}

fn parse_lsjson(stdout: &[u8]) -> OpsResult<Vec<RemoteEntry>> {
    let entries: Vec<LsJsonEntry> = serde_json::from_slice(stdout)?;
    let mut entries: Vec<RemoteEntry> = entries
        .into_iter()
        .filter(|e| !e.is_dir)
        .map(|e| RemoteEntry {
            name: e.name,
            size_bytes: e.size.max(0) as u64,
        })
        .collect();
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}

/// Map rclone's stderr to a failure kind
fn classify_failure(remote: &str, stderr: &str) -> OpsError {
    const AUTH_MARKERS: &[&str] = &[
        "accessdenied",
        "invalidaccesskeyid",
        "signaturedoesnotmatch",
        "unauthorized",
        "401",
        "403",
        "bad_auth_token",
        "authorizationfailure",
        "invalid_grant",
    ];
    let lowered = stderr.to_ascii_lowercase();
    let detail = stderr.lines().last().unwrap_or("rclone failed").to_string();
    if AUTH_MARKERS.iter().any(|m| lowered.contains(m)) {
        OpsError::InvalidCredentials {
            remote: remote.to_string(),
            detail,
        }
    } else {
        OpsError::RemoteUnavailable {
            remote: remote.to_string(),
            detail,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn s3_config(temp: &Path) -> RemoteConfig {
        let creds = temp.join("s3.json");
        std::fs::write(
            &creds,
            r#"{"access_key_id": "AKIA", "secret_access_key": "secret"}"#,
        )
        .unwrap();
        let mut config = RemoteConfig::new("offsite", "s3", "/ops-backups/");
        config.region = Some("eu-west-1".into());
        config.prefix = Some("uc1".into());
        config.credentials = Some(creds.to_string_lossy().into_owned());
        config
    }

    #[test]
    fn test_env_carries_remote_definition() {
        let temp = TempDir::new().unwrap();
        let backend = RcloneBackend::from_config(&S3, &s3_config(temp.path()), "rclone", None).unwrap();

        assert_eq!(backend.env["RCLONE_CONFIG_OPSVAULT_TYPE"], "s3");
        assert_eq!(backend.env["RCLONE_CONFIG_OPSVAULT_PROVIDER"], "AWS");
        assert_eq!(backend.env["RCLONE_CONFIG_OPSVAULT_REGION"], "eu-west-1");
        assert_eq!(backend.env["RCLONE_CONFIG_OPSVAULT_ACCESS_KEY_ID"], "AKIA");
        assert_eq!(backend.target("a.tar.gz"), "OPSVAULT:ops-backups/uc1/a.tar.gz");
    }

    #[test]
    fn test_missing_keys_are_invalid_credentials() {
        let temp = TempDir::new().unwrap();
        let creds = temp.path().join("b2.json");
        std::fs::write(&creds, r#"{"account": "id"}"#).unwrap();
        let mut config = RemoteConfig::new("b2", "b2", "bucket");
        config.credentials = Some(creds.to_string_lossy().into_owned());

        let err = RcloneBackend::from_config(&B2, &config, "rclone", None).err().unwrap();
        assert!(matches!(err, OpsError::InvalidCredentials { .. }));
    }

    #[test]
    fn test_missing_binary_is_unavailable() {
        let temp = TempDir::new().unwrap();
        let backend = RcloneBackend::from_config(
            &S3,
            &s3_config(temp.path()),
            "/nonexistent/rclone-binary",
            None,
        )
        .unwrap();
        assert!(matches!(
            backend.test_connection(),
            Err(OpsError::RemoteUnavailable { .. })
        ));
    }

    #[test]
    fn test_classify_failure() {
        let auth = classify_failure("s3", "ERROR : AccessDenied: Access Denied\n");
        assert!(matches!(auth, OpsError::InvalidCredentials { .. }));
        let net = classify_failure("s3", "dial tcp: lookup s3.amazonaws.com: no such host");
        assert!(matches!(net, OpsError::RemoteUnavailable { .. }));
    }

    #[test]
    fn test_parse_lsjson() {
        let raw = br#"[
            {"Path":"b.tar.gz","Name":"b.tar.gz","Size":20,"IsDir":false},
            {"Path":"a.tar.gz","Name":"a.tar.gz","Size":10,"IsDir":false},
            {"Path":"sub","Name":"sub","Size":-1,"IsDir":true}
        ]"#;
        let entries = parse_lsjson(raw).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "a.tar.gz");
        assert_eq!(entries[1].size_bytes, 20);
    }
}
