//! Archive builder
//!
//! Packages the selected components into one timestamped `.tar.gz`. The
//! archive is written to `<name>.tmp` and renamed into place only after the
//! gzip stream is finished, synced and its checksum file written, so the
//! final path never holds a partial archive.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::{debug, info, warn};

use super::manifest::{ArchiveManifest, Component, ComponentSet, MANIFEST_ENTRY};
use super::naming::{next_archive_path, ArchiveKind};
use super::space::{dir_size, ensure_space, required_bytes};
use crate::config::settings::{Settings, SourceSettings};
use crate::error::{OpsError, OpsResult};
use crate::integrity::checksum::{write_checksum_file, HashingWriter};
use crate::process::{command_from_argv, run_with_files};
use crate::storage::file_io::temp_path_for;

/// Entry name of the database dump inside an archive
pub const DATABASE_ENTRY: &str = "database/dump.sql";

/// What a build would do, computed without writing anything
#[derive(Debug, Clone)]
pub struct BuildPlan {
    pub kind: ArchiveKind,
    pub components: Vec<Component>,
    /// Estimated uncompressed bytes per component
    pub component_bytes: BTreeMap<Component, u64>,
    pub required_bytes: u64,
    pub available_bytes: u64,
}

impl BuildPlan {
    pub fn estimated_bytes(&self) -> u64 {
        self.component_bytes.values().sum()
    }
}

/// A finished archive
#[derive(Debug, Clone)]
pub struct BuiltArchive {
    pub path: PathBuf,
    pub manifest: ArchiveManifest,
    pub size_bytes: u64,
    pub digest: String,
}

/// Builds archives from the configured component sources
pub struct ArchiveBuilder<'a> {
    archive_dir: PathBuf,
    sources: &'a SourceSettings,
    compression_level: u32,
    space_check_timeout: Duration,
}

impl<'a> ArchiveBuilder<'a> {
    pub fn new(archive_dir: PathBuf, settings: &'a Settings) -> Self {
        Self {
            archive_dir,
            sources: &settings.sources,
            compression_level: settings.compression_level,
            space_check_timeout: settings.space_check_timeout(),
        }
    }

    pub fn with_compression_level(mut self, level: u32) -> Self {
        self.compression_level = level.clamp(1, 9);
        self
    }

    pub fn archive_dir(&self) -> &Path {
        &self.archive_dir
    }

    /// Validate the request and check free space; writes nothing
    pub fn plan(&self, set: ComponentSet, kind: ArchiveKind) -> OpsResult<BuildPlan> {
        if set.is_empty() {
            return Err(OpsError::NoComponentsSelected);
        }

        let mut component_bytes = BTreeMap::new();
        for component in set.components() {
            let bytes = match component {
                Component::Volumes => dir_size(self.source_dir(component)?)?,
                Component::Config => dir_size(self.source_dir(component)?)?,
                Component::Database => {
                    self.database_command()?;
                    self.sources.database.size_hint_bytes
                }
            };
            debug!(%component, bytes, "component sized");
            component_bytes.insert(component, bytes);
        }

        let required = required_bytes(component_bytes.values().sum());
        let available = ensure_space(
            existing_ancestor(&self.archive_dir),
            required,
            self.space_check_timeout,
        )?;

        Ok(BuildPlan {
            kind,
            components: set.components(),
            component_bytes,
            required_bytes: required,
            available_bytes: available,
        })
    }

    /// Write the archive described by `plan`
    pub fn build(&self, plan: &BuildPlan) -> OpsResult<BuiltArchive> {
        fs::create_dir_all(&self.archive_dir).map_err(|e| {
            OpsError::Io(format!("Failed to create archive directory: {}", e))
        })?;

        let now = Utc::now();
        let final_path = next_archive_path(&self.archive_dir, plan.kind, now);
        let temp_path = temp_path_for(&final_path);
        let dump_path = final_path.with_extension("db.tmp");

        let result = self.write_archive(plan, now, &final_path, &temp_path, &dump_path);

        let _ = fs::remove_file(&dump_path);
        if result.is_err() {
            let _ = fs::remove_file(&temp_path);
        }
        let built = result?;

        if let Err(e) = built.manifest.write_sidecar(&built.path) {
            warn!(archive = %built.path.display(), error = %e, "failed to write metadata sidecar");
        }

        info!(
            archive = %built.path.display(),
            bytes = built.size_bytes,
            "archive created"
        );
        Ok(built)
    }

    fn write_archive(
        &self,
        plan: &BuildPlan,
        now: DateTime<Utc>,
        final_path: &Path,
        temp_path: &Path,
        dump_path: &Path,
    ) -> OpsResult<BuiltArchive> {
        let mut manifest = ArchiveManifest::new(plan.kind, now, plan.components.clone());
        manifest.component_bytes = plan.component_bytes.clone();

        // Dump first so the manifest records the real dump size
        if plan.components.contains(&Component::Database) {
            info!(component = %Component::Database, "component started");
            let size = self.dump_database(dump_path)?;
            manifest.component_bytes.insert(Component::Database, size);
        }

        let file = File::create(temp_path)
            .map_err(|e| OpsError::Io(format!("Failed to create {}: {}", temp_path.display(), e)))?;
        let hashing = HashingWriter::new(BufWriter::new(file));
        let encoder = GzEncoder::new(hashing, Compression::new(self.compression_level));
        let mut tar = tar::Builder::new(encoder);
        tar.follow_symlinks(false);

        let manifest_bytes = serde_json::to_vec_pretty(&manifest)?;
        append_bytes(&mut tar, MANIFEST_ENTRY, &manifest_bytes, now)?;

        for component in &plan.components {
            match component {
                Component::Volumes | Component::Config => {
                    info!(component = %component, "component started");
                    let source = self.source_dir(*component)?;
                    tar.append_dir_all(component.prefix(), source).map_err(|e| {
                        OpsError::Io(format!("Failed to archive {}: {}", component, e))
                    })?;
                }
                Component::Database => {
                    tar.append_path_with_name(dump_path, DATABASE_ENTRY)
                        .map_err(|e| OpsError::Io(format!("Failed to archive database dump: {}", e)))?;
                }
            }
            info!(
                component = %component,
                bytes = manifest.component_bytes.get(component).copied().unwrap_or(0),
                "component finished"
            );
        }

        let encoder = tar
            .into_inner()
            .map_err(|e| OpsError::Io(format!("Failed to finish tar stream: {}", e)))?;
        let hashing = encoder
            .finish()
            .map_err(|e| OpsError::Io(format!("Failed to finish gzip stream: {}", e)))?;
        let (writer, digest, size_bytes) = hashing.finish();
        let file = writer
            .into_inner()
            .map_err(|e| OpsError::Io(format!("Failed to flush archive: {}", e.error())))?;
        file.sync_all()?;
        drop(file);

        write_checksum_file(final_path, &digest)?;
        fs::rename(temp_path, final_path).map_err(|e| {
            OpsError::Io(format!("Failed to move archive into place: {}", e))
        })?;

        Ok(BuiltArchive {
            path: final_path.to_path_buf(),
            manifest,
            size_bytes,
            digest,
        })
    }

    fn dump_database(&self, dump_path: &Path) -> OpsResult<u64> {
        let cmd = command_from_argv(self.database_command()?)?;
        let file = File::create(dump_path)
            .map_err(|e| OpsError::Io(format!("Failed to create {}: {}", dump_path.display(), e)))?;
        let output = run_with_files(cmd, None, Some(file), None, "database dump")?;
        if !output.success() {
            return Err(OpsError::Io(format!(
                "database dump exited with {}: {}",
                output.status, output.stderr
            )));
        }
        Ok(fs::metadata(dump_path)?.len())
    }

    fn database_command(&self) -> OpsResult<&[String]> {
        let cmd = &self.sources.database.dump_command;
        if cmd.is_empty() {
            return Err(OpsError::Config(
                "database requested but sources.database.dump_command is empty".into(),
            ));
        }
        Ok(cmd)
    }

    fn source_dir(&self, component: Component) -> OpsResult<&Path> {
        let dir = match component {
            Component::Volumes => self.sources.volumes_dir.as_deref(),
            Component::Config => self.sources.config_dir.as_deref(),
            Component::Database => None,
        }
        .ok_or_else(|| {
            OpsError::Config(format!("{} requested but no source directory is configured", component))
        })?;

        if !dir.is_dir() {
            return Err(OpsError::Config(format!(
                "{} source {} is not a directory",
                component,
                dir.display()
            )));
        }
        Ok(dir)
    }

    /// Remove `*.tmp` leftovers from interrupted runs
    ///
    /// Only call this while holding the archive directory lock.
    pub fn cleanup_stale_temp_files(&self) -> OpsResult<usize> {
        if !self.archive_dir.exists() {
            return Ok(0);
        }
        let mut removed = 0;
        for entry in fs::read_dir(&self.archive_dir)? {
            let path = entry?.path();
            if path.is_file() && path.extension().is_some_and(|ext| ext == "tmp") {
                fs::remove_file(&path)?;
                warn!(file = %path.display(), "removed stale temp file");
                removed += 1;
            }
        }
        Ok(removed)
    }
}

fn append_bytes<W: std::io::Write>(
    tar: &mut tar::Builder<W>,
    path: &str,
    data: &[u8],
    created_at: DateTime<Utc>,
) -> OpsResult<()> {
    let mut header = tar::Header::new_gnu();
    header.set_size(data.len() as u64);
    header.set_mode(0o600);
    header.set_mtime(created_at.timestamp().max(0) as u64);
    header.set_cksum();
    tar.append_data(&mut header, path, data)
        .map_err(|e| OpsError::Io(format!("Failed to append {}: {}", path, e)))
}

/// Closest existing directory at or above `dir`, for probing before it exists
fn existing_ancestor(dir: &Path) -> &Path {
    dir.ancestors()
        .find(|p| p.exists())
        .unwrap_or_else(|| Path::new("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::naming::checksum_path;
    use crate::integrity::{check_archive, verify};
    use tempfile::TempDir;

    fn settings_for(temp: &Path) -> Settings {
        let volumes = temp.join("volumes");
        let config = temp.join("config");
        fs::create_dir_all(volumes.join("app")).unwrap();
        fs::create_dir_all(&config).unwrap();
        fs::write(volumes.join("app").join("data.bin"), vec![1u8; 2048]).unwrap();
        fs::write(config.join("app.toml"), "port = 8080\n").unwrap();

        let mut settings = Settings::default();
        settings.sources.volumes_dir = Some(volumes);
        settings.sources.config_dir = Some(config);
        settings.sources.database.dump_command =
            vec!["sh".into(), "-c".into(), "echo 'CREATE TABLE t (id int);'".into()];
        settings
    }

    #[test]
    fn test_empty_component_set_fails() {
        let temp = TempDir::new().unwrap();
        let settings = settings_for(temp.path());
        let builder = ArchiveBuilder::new(temp.path().join("archives"), &settings);

        let err = builder
            .plan(ComponentSet::default(), ArchiveKind::Backup)
            .unwrap_err();
        assert!(matches!(err, OpsError::NoComponentsSelected));
    }

    #[test]
    fn test_plan_writes_nothing() {
        let temp = TempDir::new().unwrap();
        let settings = settings_for(temp.path());
        let archive_dir = temp.path().join("archives");
        let builder = ArchiveBuilder::new(archive_dir.clone(), &settings);

        let plan = builder.plan(ComponentSet::all(), ArchiveKind::Backup).unwrap();
        assert_eq!(plan.components.len(), 3);
        assert!(plan.estimated_bytes() >= 2048);
        assert!(plan.required_bytes >= plan.estimated_bytes());
        assert!(!archive_dir.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_build_all_components() {
        let temp = TempDir::new().unwrap();
        let settings = settings_for(temp.path());
        let builder = ArchiveBuilder::new(temp.path().join("archives"), &settings);

        let plan = builder.plan(ComponentSet::all(), ArchiveKind::Backup).unwrap();
        let built = builder.build(&plan).unwrap();

        assert!(built.path.exists());
        assert!(checksum_path(&built.path).exists());
        assert!(verify(&built.path, &built.digest).unwrap());
        assert_eq!(fs::metadata(&built.path).unwrap().len(), built.size_bytes);

        let report = check_archive(&built.path, Some(ComponentSet::all()));
        assert!(report.passed(), "{:?}", report.summary());
        let listing = report.listing.unwrap();
        assert_eq!(listing.manifest.unwrap().components, plan.components);
        assert!(listing
            .entries
            .iter()
            .any(|p| p == Path::new(DATABASE_ENTRY)));
    }

    #[cfg(unix)]
    #[test]
    fn test_failed_build_leaves_nothing_at_final_path() {
        let temp = TempDir::new().unwrap();
        let mut settings = settings_for(temp.path());
        settings.sources.database.dump_command = vec!["sh".into(), "-c".into(), "exit 3".into()];
        let archive_dir = temp.path().join("archives");
        let builder = ArchiveBuilder::new(archive_dir.clone(), &settings);

        let plan = builder.plan(ComponentSet::all(), ArchiveKind::Backup).unwrap();
        assert!(builder.build(&plan).is_err());

        let leftovers: Vec<_> = fs::read_dir(&archive_dir).unwrap().collect();
        assert!(leftovers.is_empty(), "{:?}", leftovers);
    }

    #[test]
    fn test_missing_source_is_config_error() {
        let temp = TempDir::new().unwrap();
        let settings = Settings::default();
        let builder = ArchiveBuilder::new(temp.path().to_path_buf(), &settings);

        let set: ComponentSet = [Component::Volumes].into_iter().collect();
        assert!(matches!(
            builder.plan(set, ArchiveKind::Backup),
            Err(OpsError::Config(_))
        ));
    }

    #[test]
    fn test_cleanup_stale_temp_files() {
        let temp = TempDir::new().unwrap();
        let settings = Settings::default();
        fs::write(temp.path().join("backup-20250101-000000.tar.gz.tmp"), b"partial").unwrap();
        fs::write(temp.path().join("backup-20250101-000000.tar.gz"), b"kept").unwrap();

        let builder = ArchiveBuilder::new(temp.path().to_path_buf(), &settings);
        assert_eq!(builder.cleanup_stale_temp_files().unwrap(), 1);
        assert!(temp.path().join("backup-20250101-000000.tar.gz").exists());
    }
}
