//! The capability every remote storage provider implements

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::OpsResult;

/// An object stored on a remote
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEntry {
    /// Object name below the remote's prefix
    pub name: String,
    pub size_bytes: u64,
}

/// Uniform operations on one configured remote
///
/// Objects are addressed by file name below the remote's bucket and
/// prefix. Network failures surface as `RemoteUnavailable` and rejected
/// credentials as `InvalidCredentials`.
pub trait RemoteBackend: Send + Sync {
    /// Provider identifier this backend was built for
    fn provider(&self) -> &'static str;

    /// Copy a local file to `object`; returns bytes transferred
    fn upload(&self, local: &Path, object: &str) -> OpsResult<u64>;

    /// Copy `object` to a local path; returns bytes transferred
    fn download(&self, object: &str, local: &Path) -> OpsResult<u64>;

    /// List objects below the prefix
    fn list(&self) -> OpsResult<Vec<RemoteEntry>>;

    /// Check the remote is reachable and the credentials are accepted
    fn test_connection(&self) -> OpsResult<()>;
}
