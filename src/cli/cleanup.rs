//! Cleanup CLI command
//!
//! Applies the retention policy to the archive directory. Without
//! `--force` it only prints what would be deleted.

use std::time::Instant;

use clap::Args;
use serde::Serialize;

use super::{run_exit_code, CliContext};
use crate::display::{format_retention_plan, format_run_report};
use crate::error::OpsResult;
use crate::journal::Operation;
use crate::lock::LockGuard;
use crate::orchestrator::{RunReport, StepStatus};
use crate::retention::{RetentionManager, RetentionPlan, RetentionPolicy};

#[derive(Args, Debug, Clone, Default)]
pub struct CleanupArgs {
    /// Delete archives older than this many days
    #[arg(long)]
    pub days: Option<u32>,

    /// Always keep this many of the newest backups
    #[arg(long)]
    pub keep: Option<usize>,

    /// Also delete every rollback point, whatever its age; overrides the --keep floor
    #[arg(long)]
    pub rollback_points: bool,

    /// Print the plan only
    #[arg(long)]
    pub dry_run: bool,

    /// Delete without asking for a second run
    #[arg(long)]
    pub force: bool,
}

impl CleanupArgs {
    fn policy(&self, defaults: RetentionPolicy) -> RetentionPolicy {
        RetentionPolicy {
            retention_days: self.days.unwrap_or(defaults.retention_days),
            min_keep: self.keep.unwrap_or(defaults.min_keep),
        }
    }
}

#[derive(Serialize)]
struct PlanOutput<'a> {
    dry_run: bool,
    plan: &'a RetentionPlan,
}

/// Handle the cleanup command
pub fn handle_cleanup_command(ctx: &CliContext, args: CleanupArgs) -> OpsResult<u8> {
    let archive_dir = ctx.archive_dir();
    let manager = RetentionManager::new(archive_dir.clone());
    let policy = args.policy(ctx.settings.retention.policy());
    let plan = manager.plan_deletions(policy, args.rollback_points)?;

    if args.dry_run || !args.force {
        ctx.emit(&PlanOutput { dry_run: true, plan: &plan }, || {
            let mut out = format_retention_plan(&plan);
            if !args.dry_run && !plan.delete.is_empty() {
                out.push_str("\nRun again with --force to delete these archives.");
            }
            out
        })?;
        return Ok(0);
    }

    let mut report = RunReport::new(Operation::Cleanup, false);
    let started = Instant::now();
    let result = LockGuard::archive_dir(&archive_dir, ctx.settings.lock_timeout(), "cleanup")
        .and_then(|_lock| manager.execute_deletions(&plan.candidate_paths(), policy, args.rollback_points));

    match result {
        Ok(deleted) => {
            report.bytes_freed = deleted.freed_bytes;
            report.deleted = deleted.deleted.clone();
            let status = if deleted.failed.is_empty() {
                StepStatus::Succeeded
            } else {
                StepStatus::Warning
            };
            report.record(
                "deleting",
                status,
                format!(
                    "{} deleted, {} failed, {} no longer eligible",
                    deleted.deleted.len(),
                    deleted.failed.len(),
                    deleted.skipped.len()
                ),
                started,
            );
            for (path, reason) in &deleted.failed {
                report.record("deleting", StepStatus::Warning, format!("{}: {}", path.display(), reason), started);
            }
            report.finish("DONE", true);
        }
        Err(e) => {
            report.record_error("deleting", &e, true, started);
            report.finish("FAILED", false);
        }
    }

    report.write_journal(&ctx.journal());
    ctx.emit(&report, || format_run_report(&report))?;
    Ok(run_exit_code(&report))
}
