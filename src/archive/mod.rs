//! Archive creation, naming, cataloguing and extraction
//!
//! An archive is one `.tar.gz` holding any of the volume tree, the config
//! tree and a database dump, next to a detached `.sha256` file.

pub mod builder;
pub mod catalog;
pub mod extract;
pub mod manifest;
pub mod naming;
pub mod space;

pub use builder::{ArchiveBuilder, BuildPlan, BuiltArchive};
pub use catalog::{ArchiveCatalog, ArchiveInfo, ArchiveSelector};
pub use extract::{ComponentRestorer, RestoreOutcome};
pub use manifest::{ArchiveManifest, Component, ComponentSet};
pub use naming::{ArchiveKind, ArchiveName};
