//! opsvault - backup, retention, cloud sync and disaster recovery
//!
//! This library provides the archive pipeline behind the `opsvault` binary:
//! building verified archives of service volumes, configuration and a
//! database dump, pruning them by age and count, copying them to remote
//! storage, and restoring them with an automatic rollback when a restore
//! fails part way.
//!
//! # Architecture
//!
//! The crate is organized into the following modules:
//!
//! - `config`: Base directory, settings and the backup schedule record
//! - `error`: Error type and failure kinds
//! - `archive`: Archive naming, building, cataloguing and extraction
//! - `integrity`: Checksums and archive verification
//! - `retention`: Age and count based pruning
//! - `cloud`: Remote backends and the sync adapter
//! - `services`: Service lifecycle and notification collaborators
//! - `orchestrator`: Backup and recovery state machines
//! - `journal`: Append-only failure journal
//! - `lock`: Advisory directory locks
//! - `cli`, `display`: Command handlers and terminal output
//!
//! # Example
//!
//! ```rust,ignore
//! use opsvault::config::{paths::OpsPaths, settings::Settings};
//!
//! let paths = OpsPaths::new()?;
//! let settings = Settings::load_or_create(&paths)?;
//! ```

pub mod archive;
pub mod cli;
pub mod cloud;
pub mod config;
pub mod display;
pub mod error;
pub mod integrity;
pub mod journal;
pub mod lock;
pub mod logging;
pub mod orchestrator;
pub mod process;
pub mod retention;
pub mod services;
pub mod storage;

pub use error::{ErrorKind, OpsError, OpsResult};
