//! Offsite copies of archives
//!
//! - `backend`: the capability each provider implements
//! - `local`, `rclone`: provider implementations
//! - `registry`: provider lookup by identifier
//! - `remotes`: named remote configurations
//! - `adapter`: upload, download and bidirectional sync

pub mod adapter;
pub mod backend;
pub mod local;
pub mod rclone;
pub mod registry;
pub mod remotes;

pub use adapter::{CloudSync, FileAction, FileOutcome, FileStatus, SyncMode, SyncReport};
pub use backend::{RemoteBackend, RemoteEntry};
pub use registry::{BackendContext, BackendEntry, BackendRegistry};
pub use remotes::{CredentialRef, RemoteConfig, RemoteStore};
