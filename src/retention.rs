//! Retention management for the archive directory
//!
//! Planning is pure: it looks at a listing and a clock and returns what
//! would be deleted. Execution re-lists the directory and only deletes
//! archives that are still candidates under the fresh listing, so a plan
//! computed earlier can never push the archive count below `min_keep`.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::archive::catalog::{sort_newest_first, ArchiveCatalog, ArchiveInfo};
use crate::archive::naming::{checksum_path, meta_path, ArchiveKind};
use crate::error::OpsResult;

/// Age and count rule for archive deletion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    /// Archives older than this many days are eligible
    pub retention_days: u32,
    /// Floor on the number of archives left, regardless of age
    pub min_keep: usize,
}

impl RetentionPolicy {
    fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - Duration::days(i64::from(self.retention_days))
    }
}

/// Archives split into kept and to-be-deleted
#[derive(Debug, Clone, Serialize)]
pub struct RetentionPlan {
    pub policy: RetentionPolicy,
    /// Delete every rollback point regardless of age or the `min_keep` floor
    pub all_rollback_points: bool,
    pub keep: Vec<ArchiveInfo>,
    pub delete: Vec<ArchiveInfo>,
}

impl RetentionPlan {
    pub fn candidate_paths(&self) -> Vec<PathBuf> {
        self.delete.iter().map(|a| a.path.clone()).collect()
    }

    /// Bytes the deletions would free, archives only
    pub fn reclaimable_bytes(&self) -> u64 {
        self.delete.iter().map(|a| a.size_bytes).sum()
    }
}

/// Compute a retention plan over `archives`
///
/// Archives older than `retention_days` are deleted unless that would leave
/// fewer than `min_keep` archives. The `min_keep` newest regular backups are
/// always kept; if the total is still short of the floor, the newest expired
/// rollback points are spared too. `all_rollback_points` overrides the floor
/// for rollback points and deletes every one of them.
pub fn plan(
    archives: &[ArchiveInfo],
    policy: RetentionPolicy,
    all_rollback_points: bool,
    now: DateTime<Utc>,
) -> RetentionPlan {
    let cutoff = policy.cutoff(now);
    let mut sorted = archives.to_vec();
    sort_newest_first(&mut sorted);

    let mut keep = Vec::new();
    let mut delete = Vec::new();
    let mut expired_points = Vec::new();
    let mut backups_seen = 0usize;

    for archive in sorted {
        let expired = archive.created_at < cutoff;
        match archive.kind {
            ArchiveKind::Backup => {
                backups_seen += 1;
                if backups_seen > policy.min_keep && expired {
                    delete.push(archive);
                } else {
                    keep.push(archive);
                }
            }
            ArchiveKind::RollbackPoint if all_rollback_points => delete.push(archive),
            ArchiveKind::RollbackPoint if expired => expired_points.push(archive),
            ArchiveKind::RollbackPoint => keep.push(archive),
        }
    }

    // Newest first, so the floor spares the most recent rollback points
    for point in expired_points {
        if keep.len() < policy.min_keep {
            keep.push(point);
        } else {
            delete.push(point);
        }
    }
    sort_newest_first(&mut keep);
    sort_newest_first(&mut delete);

    RetentionPlan {
        policy,
        all_rollback_points,
        keep,
        delete,
    }
}

/// Result of executing deletions
#[derive(Debug, Clone, Default, Serialize)]
pub struct DeletionReport {
    pub deleted: Vec<PathBuf>,
    pub freed_bytes: u64,
    /// Archives that could not be deleted, with the reason
    pub failed: Vec<(PathBuf, String)>,
    /// Candidates that were no longer eligible when re-listed
    pub skipped: Vec<PathBuf>,
}

/// Applies a retention policy to one archive directory
///
/// Callers hold the archive directory lock around `execute_deletions`.
pub struct RetentionManager {
    catalog: ArchiveCatalog,
}

impl RetentionManager {
    pub fn new(archive_dir: impl Into<PathBuf>) -> Self {
        Self {
            catalog: ArchiveCatalog::new(archive_dir),
        }
    }

    pub fn archive_dir(&self) -> &Path {
        self.catalog.archive_dir()
    }

    /// List the directory and plan deletions; touches nothing
    pub fn plan_deletions(
        &self,
        policy: RetentionPolicy,
        all_rollback_points: bool,
    ) -> OpsResult<RetentionPlan> {
        let archives = self.catalog.list()?;
        Ok(plan(&archives, policy, all_rollback_points, Utc::now()))
    }

    /// Delete `candidates` that are still eligible under a fresh listing
    pub fn execute_deletions(
        &self,
        candidates: &[PathBuf],
        policy: RetentionPolicy,
        all_rollback_points: bool,
    ) -> OpsResult<DeletionReport> {
        let fresh = self.plan_deletions(policy, all_rollback_points)?;
        let mut report = DeletionReport::default();

        for candidate in candidates {
            let Some(archive) = fresh.delete.iter().find(|a| &a.path == candidate) else {
                report.skipped.push(candidate.clone());
                continue;
            };

            match fs::remove_file(&archive.path) {
                Ok(()) => {
                    report.freed_bytes += archive.size_bytes;
                    report.freed_bytes += remove_sidecars(&archive.path);
                    info!(archive = %archive.filename, bytes = archive.size_bytes, "archive deleted");
                    report.deleted.push(archive.path.clone());
                }
                Err(e) => {
                    warn!(archive = %archive.filename, error = %e, "failed to delete archive");
                    report.failed.push((archive.path.clone(), e.to_string()));
                }
            }
        }

        Ok(report)
    }

    /// Plan and execute in one step
    pub fn enforce(
        &self,
        policy: RetentionPolicy,
        all_rollback_points: bool,
    ) -> OpsResult<DeletionReport> {
        let plan = self.plan_deletions(policy, all_rollback_points)?;
        self.execute_deletions(&plan.candidate_paths(), policy, all_rollback_points)
    }
}

/// Remove the checksum and metadata files of a deleted archive
fn remove_sidecars(archive: &Path) -> u64 {
    let mut freed = 0;
    for sidecar in [checksum_path(archive), meta_path(archive)] {
        let size = fs::metadata(&sidecar).map(|m| m.len()).unwrap_or(0);
        match fs::remove_file(&sidecar) {
            Ok(()) => freed += size,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(file = %sidecar.display(), error = %e, "failed to delete sidecar"),
        }
    }
    freed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::naming::ArchiveName;
    use chrono::TimeZone;
    use proptest::prelude::*;
    use tempfile::TempDir;

    fn info(kind: ArchiveKind, created_at: DateTime<Utc>, seq: u32) -> ArchiveInfo {
        let filename = ArchiveName::new(kind, created_at, seq).file_name();
        ArchiveInfo {
            path: PathBuf::from("/archives").join(&filename),
            filename,
            kind,
            created_at,
            seq,
            size_bytes: 100,
            has_checksum: true,
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 15, 12, 0, 0).unwrap()
    }

    const POLICY: RetentionPolicy = RetentionPolicy {
        retention_days: 7,
        min_keep: 3,
    };

    #[test]
    fn test_all_old_keeps_min_keep_newest() {
        let ten_days_ago = now() - Duration::days(10);
        let archives: Vec<ArchiveInfo> = (0..10)
            .map(|i| info(ArchiveKind::Backup, ten_days_ago - Duration::minutes(i), 0))
            .collect();

        let plan = plan(&archives, POLICY, false, now());
        assert_eq!(plan.delete.len(), 7);
        assert_eq!(plan.keep.len(), 3);
        let kept: Vec<_> = plan.keep.iter().map(|a| a.created_at).collect();
        assert_eq!(
            kept,
            vec![
                ten_days_ago,
                ten_days_ago - Duration::minutes(1),
                ten_days_ago - Duration::minutes(2)
            ]
        );
    }

    #[test]
    fn test_recent_archives_are_kept() {
        let archives: Vec<ArchiveInfo> = (0..6)
            .map(|i| info(ArchiveKind::Backup, now() - Duration::days(i), 0))
            .collect();
        let plan = plan(&archives, POLICY, false, now());
        assert!(plan.delete.is_empty());
    }

    #[test]
    fn test_identical_timestamps_tie_break_is_stable() {
        let at = now() - Duration::days(30);
        let archives = vec![
            info(ArchiveKind::Backup, at, 0),
            info(ArchiveKind::Backup, at, 2),
            info(ArchiveKind::Backup, at, 1),
        ];
        let policy = RetentionPolicy {
            retention_days: 7,
            min_keep: 1,
        };

        let first = plan(&archives, policy, false, now());
        let reversed: Vec<_> = archives.into_iter().rev().collect();
        let second = plan(&reversed, policy, false, now());

        assert_eq!(first.keep[0].seq, 2);
        assert_eq!(first.candidate_paths(), second.candidate_paths());
    }

    #[test]
    fn test_rollback_points_count_toward_min_keep() {
        let old = now() - Duration::days(10);
        let archives = vec![
            info(ArchiveKind::Backup, old, 0),
            info(ArchiveKind::RollbackPoint, old - Duration::hours(1), 0),
            info(ArchiveKind::RollbackPoint, old - Duration::hours(2), 0),
            info(ArchiveKind::RollbackPoint, old - Duration::hours(3), 0),
        ];

        let plan = plan(&archives, POLICY, false, now());
        assert_eq!(plan.keep.len(), 3);
        assert_eq!(plan.delete.len(), 1);
        assert_eq!(plan.delete[0].kind, ArchiveKind::RollbackPoint);
        assert_eq!(plan.delete[0].created_at, old - Duration::hours(3));
    }

    #[test]
    fn test_expired_rollback_points_go_once_backups_meet_the_floor() {
        let old = now() - Duration::days(10);
        let mut archives: Vec<ArchiveInfo> = (0..3)
            .map(|i| info(ArchiveKind::Backup, now() - Duration::days(i), 0))
            .collect();
        archives.push(info(ArchiveKind::RollbackPoint, old, 0));
        archives.push(info(ArchiveKind::RollbackPoint, now(), 1));

        let plan = plan(&archives, POLICY, false, now());
        assert_eq!(plan.delete.len(), 1);
        assert_eq!(plan.delete[0].kind, ArchiveKind::RollbackPoint);
        assert_eq!(plan.delete[0].created_at, old);
    }

    #[test]
    fn test_all_rollback_points_overrides_floor() {
        let old = now() - Duration::days(10);
        let archives = vec![
            info(ArchiveKind::Backup, old, 0),
            info(ArchiveKind::RollbackPoint, now(), 0),
            info(ArchiveKind::RollbackPoint, old, 0),
        ];

        let plan = plan(&archives, POLICY, true, now());
        assert_eq!(plan.delete.len(), 2);
        assert!(plan
            .delete
            .iter()
            .all(|a| a.kind == ArchiveKind::RollbackPoint));
        assert_eq!(plan.keep.len(), 1);
    }

    #[test]
    fn test_enforce_keeps_floor_across_kinds() {
        let temp = TempDir::new().unwrap();
        let old = Utc::now() - Duration::days(30);
        let kinds = [
            ArchiveKind::Backup,
            ArchiveKind::RollbackPoint,
            ArchiveKind::RollbackPoint,
            ArchiveKind::RollbackPoint,
        ];
        for (i, kind) in kinds.into_iter().enumerate() {
            let name = ArchiveName::new(kind, old - Duration::hours(i as i64), 0).file_name();
            fs::write(temp.path().join(name), b"x").unwrap();
        }

        let report = RetentionManager::new(temp.path()).enforce(POLICY, false).unwrap();
        assert_eq!(report.deleted.len(), 1);
        assert_eq!(ArchiveCatalog::new(temp.path()).list().unwrap().len(), 3);
    }

    #[test]
    fn test_execute_deletes_archive_and_sidecars() {
        let temp = TempDir::new().unwrap();
        let old = Utc::now() - Duration::days(30);
        for i in 0..4 {
            let name = ArchiveName::new(ArchiveKind::Backup, old - Duration::hours(i), 0).file_name();
            let path = temp.path().join(&name);
            fs::write(&path, vec![0u8; 10]).unwrap();
            fs::write(checksum_path(&path), "x").unwrap();
            fs::write(meta_path(&path), "{}").unwrap();
        }

        let manager = RetentionManager::new(temp.path());
        let plan = manager.plan_deletions(POLICY, false).unwrap();
        assert_eq!(plan.delete.len(), 1);
        // Planning is side-effect free
        assert_eq!(fs::read_dir(temp.path()).unwrap().count(), 12);

        let report = manager
            .execute_deletions(&plan.candidate_paths(), POLICY, false)
            .unwrap();
        assert_eq!(report.deleted.len(), 1);
        assert_eq!(report.freed_bytes, 10 + 1 + 2);
        assert!(report.failed.is_empty());
        assert_eq!(fs::read_dir(temp.path()).unwrap().count(), 9);
    }

    #[test]
    fn test_stale_plan_cannot_break_floor() {
        let temp = TempDir::new().unwrap();
        let old = Utc::now() - Duration::days(30);
        let mut paths = Vec::new();
        for i in 0..4 {
            let name = ArchiveName::new(ArchiveKind::Backup, old - Duration::hours(i), 0).file_name();
            let path = temp.path().join(name);
            fs::write(&path, b"x").unwrap();
            paths.push(path);
        }

        let manager = RetentionManager::new(temp.path());
        // Pretend an outdated plan wanted every archive gone
        let report = manager.execute_deletions(&paths, POLICY, false).unwrap();
        assert_eq!(report.deleted.len(), 1);
        assert_eq!(report.skipped.len(), 3);
        assert_eq!(ArchiveCatalog::new(temp.path()).list().unwrap().len(), 3);
    }

    proptest! {
        #[test]
        fn prop_never_below_min_keep(
            ages in proptest::collection::vec((0i64..60, 0u32..3, any::<bool>()), 0..40),
            retention_days in 0u32..30,
            min_keep in 0usize..12,
        ) {
            let archives: Vec<ArchiveInfo> = ages
                .iter()
                .map(|(days, seq, rollback)| {
                    let kind = if *rollback { ArchiveKind::RollbackPoint } else { ArchiveKind::Backup };
                    info(kind, now() - Duration::days(*days), *seq)
                })
                .collect();
            let policy = RetentionPolicy { retention_days, min_keep };
            let plan = plan(&archives, policy, false, now());

            prop_assert_eq!(plan.keep.len() + plan.delete.len(), archives.len());
            prop_assert!(plan.keep.len() >= min_keep.min(archives.len()));
            let backups = archives.iter().filter(|a| a.kind == ArchiveKind::Backup).count();
            let kept_backups = plan.keep.iter().filter(|a| a.kind == ArchiveKind::Backup).count();
            prop_assert!(kept_backups >= min_keep.min(backups));
            let cutoff = now() - Duration::days(i64::from(retention_days));
            prop_assert!(plan.delete.iter().all(|a| a.created_at < cutoff));
        }
    }
}
