//! Run report formatting
//!
//! Every command ends by printing what ran, what succeeded, what failed and
//! how many bytes moved, whatever the outcome.

use tabled::settings::Style;
use tabled::{Table, Tabled};

use super::{format_size, truncate};
use crate::orchestrator::{RunReport, StepStatus};
use crate::retention::RetentionPlan;

#[derive(Tabled)]
struct StepRow {
    #[tabled(rename = "Step")]
    step: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Detail")]
    detail: String,
    #[tabled(rename = "Time")]
    time: String,
}

fn file_label(path: &std::path::Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Format a finished run
pub fn format_run_report(report: &RunReport) -> String {
    let mut output = format!(
        "{}{} {} (run {})\n",
        report.operation,
        if report.dry_run { " [dry run]" } else { "" },
        report.final_state,
        report.run_id
    );

    let rows: Vec<StepRow> = report
        .steps
        .iter()
        .map(|s| StepRow {
            step: s.step.clone(),
            status: match (s.status, s.kind) {
                (StepStatus::Failed | StepStatus::Warning, Some(kind)) => format!("{} [{}]", s.status, kind),
                (status, _) => status.to_string(),
            },
            detail: truncate(&s.detail, 80),
            time: format!("{} ms", s.duration_ms),
        })
        .collect();
    if !rows.is_empty() {
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        output.push_str(&table.to_string());
        output.push('\n');
    }

    if let Some(archive) = &report.archive {
        output.push_str(&format!("Archive:         {}\n", archive.display()));
    }
    if let Some(point) = &report.rollback_point {
        output.push_str(&format!("Rollback point:  {}\n", file_label(point)));
    }
    let bytes = [
        ("Written", report.bytes_written),
        ("Uploaded", report.bytes_uploaded),
        ("Restored", report.bytes_restored),
        ("Freed", report.bytes_freed),
    ];
    for (label, value) in bytes {
        if value > 0 {
            output.push_str(&format!("{:<17}{}\n", format!("{}:", label), format_size(value)));
        }
    }
    if !report.deleted.is_empty() {
        output.push_str(&format!("Deleted:         {} archive(s)\n", report.deleted.len()));
    }
    if let Some(failure) = &report.failure {
        output.push_str(&format!(
            "Failure:         {} at {}: {}\n",
            failure.kind, failure.step, failure.detail
        ));
    }
    if report.upload_failed {
        output.push_str("Upload:          FAILED (local archive kept)\n");
    }
    if report.notification_failed {
        output.push_str("Notification:    FAILED\n");
    }
    output
}

#[derive(Tabled)]
struct PlanRow {
    #[tabled(rename = "Archive")]
    filename: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Created")]
    created: String,
    #[tabled(rename = "Size")]
    size: String,
}

/// Format the archives a retention pass would delete
pub fn format_retention_plan(plan: &RetentionPlan) -> String {
    let mut output = format!(
        "Retention: delete archives older than {} day(s), always keep the newest {} backup(s)\n",
        plan.policy.retention_days, plan.policy.min_keep
    );
    if plan.all_rollback_points {
        output.push_str("All rollback points are selected for deletion.\n");
    }

    if plan.delete.is_empty() {
        output.push_str(&format!("Nothing to delete; {} archive(s) kept.\n", plan.keep.len()));
        return output;
    }

    let rows: Vec<PlanRow> = plan
        .delete
        .iter()
        .map(|a| PlanRow {
            filename: a.filename.clone(),
            kind: a.kind.to_string(),
            created: a.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            size: format_size(a.size_bytes),
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    output.push_str(&table.to_string());
    output.push_str(&format!(
        "\n{} to delete ({}), {} kept\n",
        plan.delete.len(),
        format_size(plan.reclaimable_bytes()),
        plan.keep.len()
    ));
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OpsError;
    use crate::journal::Operation;
    use std::time::Instant;

    #[test]
    fn test_report_shows_failure_and_kind() {
        let mut report = RunReport::new(Operation::Backup, false);
        report.record_error("building", &OpsError::NoComponentsSelected, true, Instant::now());
        report.finish("FAILED", false);

        let out = format_run_report(&report);
        assert!(out.starts_with("BACKUP FAILED"));
        assert!(out.contains("FAILED [NoComponentsSelected]"));
        assert!(out.contains("Failure:         NoComponentsSelected at building"));
    }

    #[test]
    fn test_dry_run_marker() {
        let mut report = RunReport::new(Operation::Recovery, true);
        report.record("restoring", StepStatus::Planned, "would restore volumes", Instant::now());
        report.finish("DONE", true);

        let out = format_run_report(&report);
        assert!(out.starts_with("RECOVERY [dry run] DONE"));
        assert!(out.contains("planned"));
    }
}
