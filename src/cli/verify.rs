//! Verify CLI command
//!
//! Exit codes: 0 passed, 1 generic failure, 2 checksum mismatch,
//! 3 missing component, 4 corrupt archive.

use std::path::PathBuf;

use clap::Args;
use tracing::{error, warn};
use uuid::Uuid;

use super::{verify_exit_code, CliContext};
use crate::archive::catalog::{ArchiveCatalog, ArchiveInfo, ArchiveSelector};
use crate::display::format_integrity;
use crate::error::{ErrorKind, OpsResult};
use crate::integrity::{check_archive, IntegritySummary};
use crate::journal::{JournalEntry, Operation};

#[derive(Args, Debug, Clone)]
pub struct VerifyArgs {
    /// Verify the newest backup (default)
    #[arg(long, conflicts_with_all = ["file", "all"])]
    pub latest: bool,

    /// Verify one archive, by file name or path
    #[arg(long, conflicts_with = "all")]
    pub file: Option<PathBuf>,

    /// Verify every archive in the archive directory
    #[arg(long)]
    pub all: bool,
}

fn select(catalog: &ArchiveCatalog, args: &VerifyArgs) -> OpsResult<Vec<ArchiveInfo>> {
    if args.all {
        return catalog.list();
    }
    let selector = ArchiveSelector::from_args(args.latest, args.file.clone());
    Ok(vec![catalog.resolve(&selector)?])
}

/// Handle the verify command
pub fn handle_verify_command(ctx: &CliContext, args: VerifyArgs) -> OpsResult<u8> {
    let catalog = ArchiveCatalog::new(ctx.archive_dir());
    let journal = ctx.journal();
    let run_id = Uuid::new_v4();

    let archives = match select(&catalog, &args) {
        Ok(archives) => archives,
        Err(e) => {
            error!(kind = %e.kind(), "{}", e);
            eprintln!("Error: {}", e);
            record(&journal, run_id, &e);
            return Ok(verify_exit_code(Some(ErrorKind::Internal)));
        }
    };
    if archives.is_empty() {
        eprintln!("Error: no backups found in {}", catalog.archive_dir().display());
        return Ok(1);
    }

    let mut summaries: Vec<IntegritySummary> = Vec::new();
    let mut first_failure: Option<ErrorKind> = None;
    for archive in &archives {
        let report = check_archive(&archive.path, None);
        summaries.push(report.summary());
        if let Some(e) = report.into_error() {
            warn!(archive = %archive.filename, kind = %e.kind(), "verification failed");
            record(&journal, run_id, &e);
            first_failure.get_or_insert(e.kind());
        }
    }

    ctx.emit(&summaries, || {
        let mut out: Vec<String> = summaries.iter().map(format_integrity).collect();
        let failed = summaries.iter().filter(|s| !s.passed).count();
        out.push(format!(
            "\n{} archive(s) checked, {} passed, {} failed",
            summaries.len(),
            summaries.len() - failed,
            failed
        ));
        out.join("\n")
    })?;
    Ok(verify_exit_code(first_failure))
}

fn record(journal: &crate::journal::Journal, run_id: Uuid, err: &crate::error::OpsError) {
    let entry = JournalEntry::failure(run_id, Operation::Verify, "verifying", err);
    if let Err(e) = journal.record(&entry) {
        warn!(error = %e, "failed to write journal entry");
    }
}
