//! Backup CLI command
//!
//! Builds, verifies, optionally uploads, and reports one archive.

use clap::Args;
use tracing::info;

use super::{backup_exit_code, CliContext};
use crate::archive::manifest::{Component, ComponentSet};
use crate::cloud::{BackendContext, BackendRegistry, CloudSync, RemoteConfig, RemoteStore};
use crate::config::settings::Settings;
use crate::display::format_run_report;
use crate::error::{OpsError, OpsResult};
use crate::orchestrator::{BackupOrchestrator, BackupRequest, UploadTarget};
use crate::services::notifier_from_settings;

#[derive(Args, Debug, Clone, Default)]
pub struct BackupArgs {
    /// Validate and report without writing, uploading or notifying
    #[arg(long)]
    pub dry_run: bool,

    /// gzip level, 1-9
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..=9))]
    pub compression_level: Option<u32>,

    /// Include the volume tree
    #[arg(long)]
    pub include_volumes: bool,

    /// Include the config tree
    #[arg(long)]
    pub include_config: bool,

    /// Include a database dump
    #[arg(long)]
    pub include_database: bool,

    /// Upload the archive after verification
    #[arg(long)]
    pub cloud: bool,

    /// Remote to upload to; defaults to cloud.default_remote
    #[arg(long, requires = "cloud")]
    pub remote: Option<String>,
}

impl BackupArgs {
    /// Explicit include flags, or every configured source when none is given
    pub fn components(&self, settings: &Settings) -> ComponentSet {
        if self.include_volumes || self.include_config || self.include_database {
            return ComponentSet {
                volumes: self.include_volumes,
                config: self.include_config,
                database: self.include_database,
            };
        }
        let sources = &settings.sources;
        Component::ALL
            .into_iter()
            .filter(|c| match c {
                Component::Volumes => sources.volumes_dir.is_some(),
                Component::Config => sources.config_dir.is_some(),
                Component::Database => !sources.database.dump_command.is_empty(),
            })
            .collect()
    }
}

/// Resolve `--remote`, falling back to the configured default
pub(crate) fn resolve_remote(ctx: &CliContext, name: Option<&str>) -> OpsResult<RemoteConfig> {
    let name = name
        .map(str::to_string)
        .or_else(|| ctx.settings.cloud.default_remote.clone())
        .ok_or_else(|| {
            OpsError::Config("no remote given and cloud.default_remote is not set".into())
        })?;
    let store = RemoteStore::load(&ctx.paths)?;
    store.get(&name).cloned()
}

/// Handle the backup command
pub fn handle_backup_command(ctx: &CliContext, args: BackupArgs) -> OpsResult<u8> {
    let components = args.components(&ctx.settings);
    let archive_dir = ctx.archive_dir();
    info!(?components, dry_run = args.dry_run, archive_dir = %archive_dir.display(), "backup requested");

    let notifier = notifier_from_settings(&ctx.settings.notifications);
    let journal = ctx.journal();
    let registry = BackendRegistry::builtin();
    let sync = CloudSync::new(
        &ctx.paths,
        archive_dir.clone(),
        &registry,
        BackendContext::from_settings(&ctx.settings.cloud),
        ctx.settings.lock_timeout(),
    );

    let mut orchestrator =
        BackupOrchestrator::new(&ctx.settings, archive_dir, notifier.as_ref()).with_journal(&journal);
    if args.cloud {
        let remote = resolve_remote(ctx, args.remote.as_deref())?;
        orchestrator = orchestrator.with_upload(UploadTarget {
            sync: &sync,
            remote,
            fatal: ctx.settings.cloud.upload_fatal,
        });
    }

    let report = orchestrator.run(&BackupRequest {
        components,
        compression_level: args.compression_level,
        dry_run: args.dry_run,
    });

    ctx.emit(&report, || format_run_report(&report))?;
    Ok(backup_exit_code(&report))
}
