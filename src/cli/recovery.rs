//! Disaster recovery CLI command

use std::path::PathBuf;

use clap::Args;

use super::{run_exit_code, CliContext};
use crate::archive::catalog::ArchiveSelector;
use crate::archive::manifest::{Component, ComponentSet};
use crate::display::format_run_report;
use crate::error::OpsResult;
use crate::orchestrator::{RecoveryOrchestrator, RecoveryRequest, StdinConfirmer};
use crate::services::{lifecycle_from_settings, notifier_from_settings};

#[derive(Args, Debug, Clone)]
pub struct RecoveryArgs {
    /// Restore the newest backup (default)
    #[arg(long, conflicts_with = "file")]
    pub latest: bool,

    /// Restore one archive, by file name or path
    #[arg(long)]
    pub file: Option<PathBuf>,

    /// Restrict the restore to these components
    #[arg(long, value_delimiter = ',')]
    pub components: Vec<Component>,

    /// Verify and print the planned steps; services are never touched
    #[arg(long)]
    pub dry_run: bool,

    /// Skip confirmation and restore what is present if components are missing
    #[arg(long)]
    pub force: bool,

    /// Skip the confirmation prompt
    #[arg(long)]
    pub auto_confirm: bool,
}

impl RecoveryArgs {
    fn request(&self) -> RecoveryRequest {
        let components = if self.components.is_empty() {
            None
        } else {
            Some(self.components.iter().copied().collect::<ComponentSet>())
        };
        RecoveryRequest {
            selector: ArchiveSelector::from_args(self.latest, self.file.clone()),
            components,
            dry_run: self.dry_run,
            force: self.force,
            auto_confirm: self.auto_confirm,
        }
    }
}

/// Handle the restore command
pub fn handle_recovery_command(ctx: &CliContext, args: RecoveryArgs) -> OpsResult<u8> {
    let lifecycle = lifecycle_from_settings(&ctx.settings.services);
    let notifier = notifier_from_settings(&ctx.settings.notifications);
    let journal = ctx.journal();

    let report = RecoveryOrchestrator::new(
        &ctx.settings,
        ctx.archive_dir(),
        lifecycle.as_ref(),
        notifier.as_ref(),
        &StdinConfirmer,
    )
    .with_journal(&journal)
    .run(&args.request());

    ctx.emit(&report, || format_run_report(&report))?;
    Ok(run_exit_code(&report))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_from_args() {
        let args = RecoveryArgs {
            latest: false,
            file: Some(PathBuf::from("backup-20260101-020000.tar.gz")),
            components: vec![Component::Config],
            dry_run: true,
            force: false,
            auto_confirm: true,
        };
        let request = args.request();
        assert_eq!(
            request.selector,
            ArchiveSelector::File(PathBuf::from("backup-20260101-020000.tar.gz"))
        );
        assert_eq!(request.components.map(|c| c.components()), Some(vec![Component::Config]));
    }
}
