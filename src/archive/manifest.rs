//! Archive components and the manifest embedded in every archive

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::naming::{meta_path, ArchiveKind};
use crate::error::{OpsError, OpsResult};
use crate::storage::file_io::{read_json_required, write_json_atomic};

/// Path of the manifest entry inside an archive
pub const MANIFEST_ENTRY: &str = ".opsvault/manifest.json";

pub const MANIFEST_FORMAT_VERSION: u32 = 1;

/// A category of data an archive can carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Component {
    Volumes,
    Config,
    Database,
}

impl Component {
    pub const ALL: [Component; 3] = [Component::Volumes, Component::Config, Component::Database];

    /// Top-level directory of this component inside the archive
    pub fn prefix(self) -> &'static str {
        match self {
            Component::Volumes => "volumes",
            Component::Config => "config",
            Component::Database => "database",
        }
    }

    /// Component owning an archive entry path, if any
    pub fn for_entry(path: &Path) -> Option<Self> {
        let first = path.components().next()?;
        let first = first.as_os_str().to_str()?;
        Component::ALL.into_iter().find(|c| c.prefix() == first)
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

impl FromStr for Component {
    type Err = OpsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Component::ALL
            .into_iter()
            .find(|c| c.prefix().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| OpsError::Validation(format!("unknown component '{}'", s)))
    }
}

/// The set of components requested for a build or restore
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentSet {
    pub volumes: bool,
    pub config: bool,
    pub database: bool,
}

impl ComponentSet {
    pub fn all() -> Self {
        Self {
            volumes: true,
            config: true,
            database: true,
        }
    }

    pub fn contains(&self, component: Component) -> bool {
        match component {
            Component::Volumes => self.volumes,
            Component::Config => self.config,
            Component::Database => self.database,
        }
    }

    pub fn is_empty(&self) -> bool {
        !(self.volumes || self.config || self.database)
    }

    pub fn components(&self) -> Vec<Component> {
        Component::ALL
            .into_iter()
            .filter(|c| self.contains(*c))
            .collect()
    }
}

impl FromIterator<Component> for ComponentSet {
    fn from_iter<I: IntoIterator<Item = Component>>(iter: I) -> Self {
        let mut set = ComponentSet::default();
        for component in iter {
            match component {
                Component::Volumes => set.volumes = true,
                Component::Config => set.config = true,
                Component::Database => set.database = true,
            }
        }
        set
    }
}

/// Convenience index describing an archive
///
/// Embedded as the first archive entry and mirrored into a sidecar file.
/// Restores never depend on it: the archive listing is authoritative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveManifest {
    pub format_version: u32,
    pub kind: ArchiveKind,
    pub created_at: DateTime<Utc>,
    pub components: Vec<Component>,
    /// Uncompressed bytes per component
    #[serde(default)]
    pub component_bytes: BTreeMap<Component, u64>,
    pub tool_version: String,
}

impl ArchiveManifest {
    pub fn new(kind: ArchiveKind, created_at: DateTime<Utc>, components: Vec<Component>) -> Self {
        Self {
            format_version: MANIFEST_FORMAT_VERSION,
            kind,
            created_at,
            components,
            component_bytes: BTreeMap::new(),
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn component_set(&self) -> ComponentSet {
        self.components.iter().copied().collect()
    }

    /// Write the sidecar next to `archive`
    pub fn write_sidecar(&self, archive: &Path) -> OpsResult<()> {
        write_json_atomic(meta_path(archive), self)
    }

    /// Read the sidecar next to `archive`, if present and readable
    pub fn read_sidecar(archive: &Path) -> Option<Self> {
        let path = meta_path(archive);
        if !path.exists() {
            return None;
        }
        read_json_required(path).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_component_for_entry() {
        assert_eq!(
            Component::for_entry(Path::new("volumes/app/data.bin")),
            Some(Component::Volumes)
        );
        assert_eq!(
            Component::for_entry(Path::new("database/dump.sql")),
            Some(Component::Database)
        );
        assert_eq!(Component::for_entry(Path::new(MANIFEST_ENTRY)), None);
    }

    #[test]
    fn test_component_set() {
        let set: ComponentSet = [Component::Config, Component::Database].into_iter().collect();
        assert!(!set.is_empty());
        assert!(!set.contains(Component::Volumes));
        assert_eq!(set.components(), vec![Component::Config, Component::Database]);
        assert!(ComponentSet::default().is_empty());
    }

    #[test]
    fn test_component_from_str() {
        assert_eq!("Volumes".parse::<Component>().unwrap(), Component::Volumes);
        assert!("logs".parse::<Component>().is_err());
    }

    #[test]
    fn test_sidecar_round_trip() {
        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("backup-20250101-000000.tar.gz");
        let manifest =
            ArchiveManifest::new(ArchiveKind::Backup, Utc::now(), vec![Component::Config]);

        assert!(ArchiveManifest::read_sidecar(&archive).is_none());
        manifest.write_sidecar(&archive).unwrap();
        assert_eq!(ArchiveManifest::read_sidecar(&archive), Some(manifest));
    }
}
