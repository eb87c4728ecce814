//! Restoring archive components into place
//!
//! Extraction is two-phase. Every requested component is first unpacked into
//! a staging location next to its target; only when all of them unpacked
//! cleanly are they swapped into place one by one. A failure in either phase
//! is reported as `RestoreIncomplete` together with the components already
//! swapped, so the caller knows whether live data was touched.

use std::fs;
use std::path::{Component as PathComponent, Path, PathBuf};

use flate2::read::GzDecoder;
use tracing::{info, warn};

use super::builder::DATABASE_ENTRY;
use super::manifest::Component;
use crate::config::settings::SourceSettings;
use crate::error::{OpsError, OpsResult};
use crate::process::{command_from_argv, run_with_files};

const STAGING_SUFFIX: &str = ".opsvault-staging";
const OLD_SUFFIX: &str = ".opsvault-old";

#[cfg(test)]
thread_local! {
    static RESTORE_FAILPOINT: std::cell::Cell<usize> = const { std::cell::Cell::new(0) };
}

/// Fail the n-th (1-based) swap of the next restore on this thread
#[cfg(test)]
pub(crate) struct RestoreFailpointGuard;

#[cfg(test)]
impl Drop for RestoreFailpointGuard {
    fn drop(&mut self) {
        RESTORE_FAILPOINT.with(|f| f.set(0));
    }
}

#[cfg(test)]
pub(crate) fn restore_failpoint_guard(step: usize) -> RestoreFailpointGuard {
    RESTORE_FAILPOINT.with(|f| f.set(step));
    RestoreFailpointGuard
}

#[cfg(test)]
fn restore_failpoint(step: usize) -> bool {
    RESTORE_FAILPOINT.with(|f| {
        if f.get() == step {
            f.set(0);
            true
        } else {
            false
        }
    })
}

#[cfg(not(test))]
fn restore_failpoint(_step: usize) -> bool {
    false
}

/// Components that were swapped into place
#[derive(Debug, Clone, Default)]
pub struct RestoreOutcome {
    pub restored: Vec<Component>,
    pub bytes: u64,
}

/// Unpacks archive components over the configured targets
pub struct ComponentRestorer<'a> {
    sources: &'a SourceSettings,
}

impl<'a> ComponentRestorer<'a> {
    pub fn new(sources: &'a SourceSettings) -> Self {
        Self { sources }
    }

    /// Fail early if any requested component has no restore target
    pub fn check_targets(&self, components: &[Component]) -> OpsResult<()> {
        for component in components {
            match component {
                Component::Volumes | Component::Config => {
                    self.target_dir(*component)?;
                }
                Component::Database => {
                    if self.sources.database.restore_command.is_empty() {
                        return Err(OpsError::Config(
                            "database restore requested but sources.database.restore_command is empty"
                                .into(),
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    /// Restore `components` from `archive`
    pub fn restore(&self, archive: &Path, components: &[Component]) -> OpsResult<RestoreOutcome> {
        self.check_targets(components)?;

        let staging = Staging::new(self, archive, components)?;
        let result = self
            .unpack(archive, components, &staging)
            .and_then(|bytes| self.apply(components, &staging, bytes));
        staging.cleanup();
        result
    }

    fn unpack(&self, archive: &Path, components: &[Component], staging: &Staging) -> OpsResult<u64> {
        let incomplete = |detail: String| OpsError::RestoreIncomplete {
            detail,
            restored: Vec::new(),
        };

        let file = fs::File::open(archive)
            .map_err(|e| incomplete(format!("cannot open {}: {}", archive.display(), e)))?;
        let mut tar = tar::Archive::new(GzDecoder::new(std::io::BufReader::new(file)));
        let mut seen: Vec<Component> = Vec::new();
        let mut bytes = 0u64;

        let entries = tar.entries().map_err(|e| incomplete(e.to_string()))?;
        for entry in entries {
            let mut entry = entry.map_err(|e| incomplete(e.to_string()))?;
            let entry_path = entry.path().map_err(|e| incomplete(e.to_string()))?.into_owned();

            let Some(component) = Component::for_entry(&entry_path) else {
                continue;
            };
            if !components.contains(&component) {
                continue;
            }
            if !seen.contains(&component) {
                seen.push(component);
            }

            let dest = match component {
                Component::Database => {
                    if entry_path != Path::new(DATABASE_ENTRY) {
                        continue;
                    }
                    staging.database_file.clone()
                }
                _ => {
                    let relative = safe_relative(&entry_path, component)
                        .ok_or_else(|| incomplete(format!("unsafe entry path {}", entry_path.display())))?;
                    if relative.as_os_str().is_empty() {
                        continue;
                    }
                    staging.dir_for(component).join(relative)
                }
            };

            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent).map_err(|e| incomplete(e.to_string()))?;
            }
            bytes += entry.size();
            entry
                .unpack(&dest)
                .map_err(|e| incomplete(format!("failed to extract {}: {}", entry_path.display(), e)))?;
        }

        // Drain so a corrupt gzip trailer fails the restore
        std::io::copy(&mut tar.into_inner(), &mut std::io::sink())
            .map_err(|e| incomplete(e.to_string()))?;

        let absent: Vec<String> = components
            .iter()
            .filter(|c| !seen.contains(c))
            .map(|c| c.to_string())
            .collect();
        if !absent.is_empty() {
            return Err(incomplete(format!(
                "archive has no entries for {}",
                absent.join(", ")
            )));
        }
        Ok(bytes)
    }

    fn apply(&self, components: &[Component], staging: &Staging, bytes: u64) -> OpsResult<RestoreOutcome> {
        let mut outcome = RestoreOutcome {
            restored: Vec::new(),
            bytes,
        };

        for (index, component) in components.iter().enumerate() {
            info!(component = %component, "restoring component");
            let step = if restore_failpoint(index + 1) {
                Err(OpsError::Io("injected restore failure".into()))
            } else {
                match component {
                    Component::Volumes | Component::Config => {
                        swap_into_place(&staging.dir_for(*component), self.target_dir(*component)?)
                    }
                    Component::Database => self.load_database(&staging.database_file),
                }
            };

            if let Err(e) = step {
                return Err(OpsError::RestoreIncomplete {
                    detail: format!("{} failed: {}", component, e),
                    restored: outcome.restored.iter().map(|c| c.to_string()).collect(),
                });
            }
            outcome.restored.push(*component);
            info!(component = %component, "component restored");
        }
        Ok(outcome)
    }

    fn load_database(&self, dump: &Path) -> OpsResult<()> {
        let file = fs::File::open(dump)?;
        let cmd = command_from_argv(&self.sources.database.restore_command)?;
        let output = run_with_files(cmd, Some(file), None, None, "database restore")?;
        if !output.success() {
            return Err(OpsError::Io(format!(
                "database restore exited with {}: {}",
                output.status, output.stderr
            )));
        }
        Ok(())
    }

    fn target_dir(&self, component: Component) -> OpsResult<&Path> {
        match component {
            Component::Volumes => self.sources.volumes_dir.as_deref(),
            Component::Config => self.sources.config_dir.as_deref(),
            Component::Database => None,
        }
        .ok_or_else(|| {
            OpsError::Config(format!("{} restore requested but no target directory is configured", component))
        })
    }
}

/// Staging locations for one restore
struct Staging {
    dirs: Vec<(Component, PathBuf)>,
    database_file: PathBuf,
}

impl Staging {
    fn new(restorer: &ComponentRestorer<'_>, archive: &Path, components: &[Component]) -> OpsResult<Self> {
        let mut dirs = Vec::new();
        for component in components {
            if matches!(component, Component::Volumes | Component::Config) {
                let dir = with_suffix(restorer.target_dir(*component)?, STAGING_SUFFIX);
                if dir.exists() {
                    fs::remove_dir_all(&dir)?;
                }
                fs::create_dir_all(&dir)?;
                dirs.push((*component, dir));
            }
        }
        Ok(Self {
            dirs,
            database_file: with_suffix(archive, ".restore-db.tmp"),
        })
    }

    fn dir_for(&self, component: Component) -> PathBuf {
        self.dirs
            .iter()
            .find(|(c, _)| *c == component)
            .map(|(_, d)| d.clone())
            .unwrap_or_default()
    }

    fn cleanup(&self) {
        for (_, dir) in &self.dirs {
            if dir.exists() {
                if let Err(e) = fs::remove_dir_all(dir) {
                    warn!(dir = %dir.display(), error = %e, "failed to remove staging directory");
                }
            }
        }
        let _ = fs::remove_file(&self.database_file);
    }
}

/// Replace `target` with `staged`, keeping the old tree until the swap succeeds
fn swap_into_place(staged: &Path, target: &Path) -> OpsResult<()> {
    let old = with_suffix(target, OLD_SUFFIX);
    if old.exists() {
        fs::remove_dir_all(&old)?;
    }
    if target.exists() {
        fs::rename(target, &old)?;
    } else if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    if let Err(e) = fs::rename(staged, target) {
        if old.exists() {
            let _ = fs::rename(&old, target);
        }
        return Err(e.into());
    }
    if old.exists() {
        fs::remove_dir_all(&old)?;
    }
    Ok(())
}

/// Entry path below its component prefix, rejecting `..` and absolute parts
fn safe_relative(entry_path: &Path, component: Component) -> Option<PathBuf> {
    let relative = entry_path.strip_prefix(component.prefix()).ok()?;
    relative
        .components()
        .all(|c| matches!(c, PathComponent::Normal(_)))
        .then(|| relative.to_path_buf())
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(suffix);
    path.with_file_name(name)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::archive::builder::ArchiveBuilder;
    use crate::archive::manifest::ComponentSet;
    use crate::archive::naming::ArchiveKind;
    use crate::config::settings::Settings;
    use tempfile::TempDir;

    fn setup(temp: &Path) -> Settings {
        let volumes = temp.join("volumes");
        let config = temp.join("config");
        fs::create_dir_all(volumes.join("db")).unwrap();
        fs::create_dir_all(&config).unwrap();
        fs::write(volumes.join("db").join("pg.dat"), b"original volume").unwrap();
        fs::write(config.join("app.env"), b"MODE=prod").unwrap();

        let mut settings = Settings::default();
        settings.sources.volumes_dir = Some(volumes);
        settings.sources.config_dir = Some(config);
        settings
    }

    fn build(settings: &Settings, temp: &Path) -> PathBuf {
        let builder = ArchiveBuilder::new(temp.join("archives"), settings);
        let set: ComponentSet = [Component::Volumes, Component::Config].into_iter().collect();
        let plan = builder.plan(set, ArchiveKind::Backup).unwrap();
        builder.build(&plan).unwrap().path
    }

    #[test]
    fn test_restore_replaces_targets() {
        let temp = TempDir::new().unwrap();
        let settings = setup(temp.path());
        let archive = build(&settings, temp.path());

        let volumes = settings.sources.volumes_dir.clone().unwrap();
        fs::write(volumes.join("db").join("pg.dat"), b"changed").unwrap();
        fs::write(volumes.join("stray"), b"new file").unwrap();

        let restorer = ComponentRestorer::new(&settings.sources);
        let outcome = restorer
            .restore(&archive, &[Component::Volumes, Component::Config])
            .unwrap();

        assert_eq!(outcome.restored, vec![Component::Volumes, Component::Config]);
        assert_eq!(fs::read(volumes.join("db").join("pg.dat")).unwrap(), b"original volume");
        assert!(!volumes.join("stray").exists());
        assert!(!with_suffix(&volumes, STAGING_SUFFIX).exists());
        assert!(!with_suffix(&volumes, OLD_SUFFIX).exists());
    }

    #[test]
    fn test_failpoint_reports_partial_restore() {
        let temp = TempDir::new().unwrap();
        let settings = setup(temp.path());
        let archive = build(&settings, temp.path());

        let _guard = restore_failpoint_guard(2);
        let restorer = ComponentRestorer::new(&settings.sources);
        let err = restorer
            .restore(&archive, &[Component::Volumes, Component::Config])
            .unwrap_err();

        match err {
            OpsError::RestoreIncomplete { restored, .. } => assert_eq!(restored, vec!["volumes"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_absent_component_is_incomplete() {
        let temp = TempDir::new().unwrap();
        let mut settings = setup(temp.path());
        let archive = build(&settings, temp.path());
        settings.sources.database.restore_command = vec!["sh".into(), "-c".into(), "cat >/dev/null".into()];

        let restorer = ComponentRestorer::new(&settings.sources);
        let err = restorer.restore(&archive, &[Component::Database]).unwrap_err();
        assert!(matches!(err, OpsError::RestoreIncomplete { .. }));
    }

    #[test]
    fn test_database_restore_receives_dump() {
        let temp = TempDir::new().unwrap();
        let mut settings = setup(temp.path());
        let sink = temp.path().join("restored.sql");
        settings.sources.database.dump_command =
            vec!["sh".into(), "-c".into(), "printf 'INSERT 1;'".into()];
        settings.sources.database.restore_command = vec![
            "sh".into(),
            "-c".into(),
            format!("cat > {}", sink.display()),
        ];

        let builder = ArchiveBuilder::new(temp.path().join("archives"), &settings);
        let set: ComponentSet = [Component::Database].into_iter().collect();
        let archive = builder
            .build(&builder.plan(set, ArchiveKind::Backup).unwrap())
            .unwrap()
            .path;

        ComponentRestorer::new(&settings.sources)
            .restore(&archive, &[Component::Database])
            .unwrap();
        assert_eq!(fs::read(&sink).unwrap(), b"INSERT 1;");
    }

    #[test]
    fn test_safe_relative_rejects_traversal() {
        assert!(safe_relative(Path::new("volumes/../etc/passwd"), Component::Volumes).is_none());
        assert_eq!(
            safe_relative(Path::new("volumes/a/b"), Component::Volumes),
            Some(PathBuf::from("a/b"))
        );
    }
}
