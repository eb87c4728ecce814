//! Directory-backed remote
//!
//! The bucket is a directory, typically a mounted NAS or a second disk. It
//! is never created implicitly: a missing bucket reads as an unreachable
//! remote, the way an unmounted share would.

use std::fs;
use std::path::{Path, PathBuf};

use super::backend::{RemoteBackend, RemoteEntry};
use super::remotes::RemoteConfig;
use crate::error::{OpsError, OpsResult};
use crate::storage::file_io::temp_path_for;

pub struct LocalBackend {
    remote: String,
    root: PathBuf,
}

impl LocalBackend {
    /// Credentials are optional; when referenced they must resolve
    pub fn from_config(config: &RemoteConfig) -> OpsResult<Self> {
        config.resolve_credentials()?;
        let mut root = PathBuf::from(&config.bucket);
        if let Some(prefix) = config.prefix.as_deref().filter(|p| !p.is_empty()) {
            root.push(prefix);
        }
        Ok(Self {
            remote: config.name.clone(),
            root,
        })
    }

    fn unavailable(&self, detail: impl Into<String>) -> OpsError {
        OpsError::RemoteUnavailable {
            remote: self.remote.clone(),
            detail: detail.into(),
        }
    }

    fn bucket(&self) -> OpsResult<&Path> {
        if !self.root.is_dir() {
            return Err(self.unavailable(format!("{} is not a directory", self.root.display())));
        }
        Ok(&self.root)
    }

    fn object_path(&self, object: &str) -> OpsResult<PathBuf> {
        if object.is_empty() || object.contains('/') || object.contains('\\') || object == ".." {
            return Err(OpsError::Validation(format!("invalid object name '{}'", object)));
        }
        Ok(self.bucket()?.join(object))
    }
}

impl RemoteBackend for LocalBackend {
    fn provider(&self) -> &'static str {
        "local"
    }

    fn upload(&self, local: &Path, object: &str) -> OpsResult<u64> {
        let target = self.object_path(object)?;
        let temp = temp_path_for(&target);
        let bytes = fs::copy(local, &temp).map_err(|e| self.unavailable(e.to_string()))?;
        fs::rename(&temp, &target).map_err(|e| {
            let _ = fs::remove_file(&temp);
            self.unavailable(e.to_string())
        })?;
        Ok(bytes)
    }

    fn download(&self, object: &str, local: &Path) -> OpsResult<u64> {
        let source = self.object_path(object)?;
        if !source.is_file() {
            return Err(OpsError::NotFound {
                entity_type: "Remote object",
                identifier: object.to_string(),
            });
        }
        fs::copy(&source, local).map_err(|e| self.unavailable(e.to_string()))
    }

    fn list(&self) -> OpsResult<Vec<RemoteEntry>> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(self.bucket()?).map_err(|e| self.unavailable(e.to_string()))? {
            let entry = entry.map_err(|e| self.unavailable(e.to_string()))?;
            let metadata = entry.metadata().map_err(|e| self.unavailable(e.to_string()))?;
            let name = entry.file_name().to_string_lossy().to_string();
            if metadata.is_file() && !name.ends_with(".tmp") {
                entries.push(RemoteEntry {
                    name,
                    size_bytes: metadata.len(),
                });
            }
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn test_connection(&self) -> OpsResult<()> {
        fs::read_dir(self.bucket()?)
            .map(|_| ())
            .map_err(|e| self.unavailable(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn backend(bucket: &Path) -> LocalBackend {
        LocalBackend::from_config(&RemoteConfig::new("nas", "local", bucket.to_string_lossy())).unwrap()
    }

    #[test]
    fn test_upload_list_download() {
        let temp = TempDir::new().unwrap();
        let bucket = temp.path().join("bucket");
        fs::create_dir(&bucket).unwrap();
        let local = temp.path().join("a.tar.gz");
        fs::write(&local, b"payload").unwrap();

        let backend = backend(&bucket);
        assert_eq!(backend.upload(&local, "a.tar.gz").unwrap(), 7);
        assert_eq!(
            backend.list().unwrap(),
            vec![RemoteEntry {
                name: "a.tar.gz".into(),
                size_bytes: 7
            }]
        );

        let back = temp.path().join("back.tar.gz");
        backend.download("a.tar.gz", &back).unwrap();
        assert_eq!(fs::read(back).unwrap(), b"payload");
    }

    #[test]
    fn test_missing_bucket_is_unavailable() {
        let temp = TempDir::new().unwrap();
        let backend = backend(&temp.path().join("unmounted"));
        assert!(matches!(
            backend.test_connection(),
            Err(OpsError::RemoteUnavailable { .. })
        ));
    }

    #[test]
    fn test_missing_credentials_file_rejected() {
        let temp = TempDir::new().unwrap();
        let mut config = RemoteConfig::new("nas", "local", temp.path().to_string_lossy());
        config.credentials = Some(temp.path().join("nope.json").to_string_lossy().into_owned());
        assert!(matches!(
            LocalBackend::from_config(&config),
            Err(OpsError::InvalidCredentials { .. })
        ));
    }

    #[test]
    fn test_object_names_cannot_escape_bucket() {
        let temp = TempDir::new().unwrap();
        let backend = backend(temp.path());
        assert!(backend.object_path("../x").is_err());
    }
}
