//! Cloud CLI commands
//!
//! Remote management and archive sync against one or more remotes.

use std::time::{Duration, Instant};

use clap::{Args, Subcommand};

use super::backup::resolve_remote;
use super::{run_exit_code, CliContext};
use crate::cloud::{
    BackendContext, BackendRegistry, CloudSync, RemoteConfig, RemoteStore, SyncMode, SyncReport,
};
use crate::display::{format_remote_list, format_run_report, format_sync_report};
use crate::error::{ErrorKind, OpsError, OpsResult};
use crate::journal::Operation;
use crate::orchestrator::{RunReport, StepStatus};

/// Cloud subcommands
#[derive(Subcommand, Debug)]
pub enum CloudCommands {
    /// Sync the archive directory with remotes
    Sync(SyncArgs),

    /// Manage remotes
    #[command(subcommand)]
    Remote(RemoteCommands),
}

#[derive(Args, Debug, Clone)]
pub struct SyncArgs {
    /// Direction of the sync
    #[arg(long, value_enum, default_value_t = SyncMode::Upload)]
    pub mode: SyncMode,

    /// Remote to sync with; repeat for several, defaults to cloud.default_remote
    #[arg(long = "remote", conflicts_with_all = ["all", "provider"])]
    pub remotes: Vec<String>,

    /// Sync with every configured remote
    #[arg(long)]
    pub all: bool,

    /// Ad-hoc remote provider, used with --bucket
    #[arg(long, requires = "bucket")]
    pub provider: Option<String>,

    /// Ad-hoc remote bucket
    #[arg(long, requires = "provider")]
    pub bucket: Option<String>,

    /// Credential reference for the ad-hoc remote
    #[arg(long, requires = "provider")]
    pub credentials: Option<String>,

    /// Report what would be transferred without transferring
    #[arg(long)]
    pub dry_run: bool,
}

/// Remote subcommands
#[derive(Subcommand, Debug)]
pub enum RemoteCommands {
    /// Add or replace a remote
    Add {
        /// Remote name
        name: String,

        /// Provider identifier (see `cloud remote providers`)
        #[arg(long)]
        provider: String,

        /// Bucket or container; a directory for the local provider
        #[arg(long)]
        bucket: String,

        #[arg(long)]
        region: Option<String>,

        /// Object prefix inside the bucket
        #[arg(long)]
        prefix: Option<String>,

        /// `env:PREFIX` or a path to a JSON credential file
        #[arg(long)]
        credentials: Option<String>,

        /// Provider option as key=value; repeatable
        #[arg(long = "option", value_parser = parse_key_value)]
        options: Vec<(String, String)>,

        /// Make this the default remote
        #[arg(long)]
        default: bool,
    },

    /// Remove a remote
    Remove {
        name: String,
    },

    /// List configured remotes
    List,

    /// List supported providers
    Providers,

    /// Check that a remote is reachable with its credentials
    Test {
        name: String,

        /// Give up after this many seconds; defaults to cloud.connect_timeout_secs
        #[arg(long)]
        timeout: Option<u64>,
    },
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("expected key=value, got '{}'", raw))
}

/// Handle a cloud command
pub fn handle_cloud_command(ctx: &mut CliContext, cmd: CloudCommands) -> OpsResult<u8> {
    match cmd {
        CloudCommands::Sync(args) => handle_sync(ctx, args),
        CloudCommands::Remote(cmd) => handle_remote(ctx, cmd),
    }
}

fn sync_targets(ctx: &CliContext, args: &SyncArgs) -> OpsResult<Vec<RemoteConfig>> {
    if let (Some(provider), Some(bucket)) = (&args.provider, &args.bucket) {
        let mut remote = RemoteConfig::new("adhoc", provider.as_str(), bucket.as_str());
        remote.credentials = args.credentials.clone();
        remote.validate()?;
        return Ok(vec![remote]);
    }
    if args.all {
        let store = RemoteStore::load(&ctx.paths)?;
        if store.is_empty() {
            return Err(OpsError::Config("no remotes configured".into()));
        }
        return Ok(store.list().cloned().collect());
    }
    if args.remotes.is_empty() {
        return Ok(vec![resolve_remote(ctx, None)?]);
    }
    let store = RemoteStore::load(&ctx.paths)?;
    args.remotes
        .iter()
        .map(|name| store.get(name).cloned())
        .collect()
}

fn handle_sync(ctx: &CliContext, args: SyncArgs) -> OpsResult<u8> {
    let remotes = sync_targets(ctx, &args)?;
    let registry = BackendRegistry::builtin();
    let sync = CloudSync::new(
        &ctx.paths,
        ctx.archive_dir(),
        &registry,
        BackendContext::from_settings(&ctx.settings.cloud),
        ctx.settings.lock_timeout(),
    );

    let started = Instant::now();
    let results = sync.sync_many(&remotes, args.mode, args.dry_run);
    let report = sync_run_report(&results, args.dry_run, started);
    if !args.dry_run {
        report.write_journal(&ctx.journal());
    }

    ctx.emit(&results, || {
        let mut out: Vec<String> = results.iter().map(format_sync_report).collect();
        out.push(format_run_report(&report));
        out.join("\n")
    })?;
    Ok(run_exit_code(&report))
}

/// Fold per-remote sync reports into one run report
fn sync_run_report(results: &[SyncReport], dry_run: bool, started: Instant) -> RunReport {
    let mut report = RunReport::new(Operation::Sync, dry_run);
    for result in results {
        let step = format!("remote:{}", result.remote);
        report.bytes_uploaded += result.bytes_moved();
        if result.succeeded() {
            let status = if dry_run { StepStatus::Planned } else { StepStatus::Succeeded };
            report.record(&step, status, format!("{} file(s)", result.files.len()), started);
        } else {
            report.record_failure(
                &step,
                result.first_error_kind().unwrap_or(ErrorKind::RemoteUnavailable),
                result.first_error().unwrap_or_else(|| "sync failed".into()),
                true,
                started,
            );
        }
    }
    let success = report.failure.is_none();
    report.finish(if success { "DONE" } else { "PARTIAL" }, success);
    report
}

fn handle_remote(ctx: &mut CliContext, cmd: RemoteCommands) -> OpsResult<u8> {
    let registry = BackendRegistry::builtin();
    match cmd {
        RemoteCommands::Add {
            name,
            provider,
            bucket,
            region,
            prefix,
            credentials,
            options,
            default,
        } => {
            if !registry.contains(&provider) {
                let known: Vec<&str> = registry.providers().into_iter().map(|(p, _)| p).collect();
                return Err(OpsError::Validation(format!(
                    "unknown provider '{}'; available: {}",
                    provider,
                    known.join(", ")
                )));
            }
            let mut remote = RemoteConfig::new(name.as_str(), provider, bucket);
            remote.region = region;
            remote.prefix = prefix;
            remote.credentials = credentials;
            remote.options = options.into_iter().collect();

            ctx.paths.ensure_directories()?;
            let mut store = RemoteStore::load(&ctx.paths)?;
            let replaced = store.upsert(remote)?.is_some();
            store.save(&ctx.paths)?;
            if default {
                ctx.settings.cloud.default_remote = Some(name.clone());
                ctx.settings.save(&ctx.paths)?;
            }
            println!("{} remote '{}'", if replaced { "Updated" } else { "Added" }, name);
        }

        RemoteCommands::Remove { name } => {
            let mut store = RemoteStore::load(&ctx.paths)?;
            store.remove(&name)?;
            store.save(&ctx.paths)?;
            if ctx.settings.cloud.default_remote.as_deref() == Some(name.as_str()) {
                ctx.settings.cloud.default_remote = None;
                ctx.settings.save(&ctx.paths)?;
            }
            println!("Removed remote '{}'", name);
        }

        RemoteCommands::List => {
            let store = RemoteStore::load(&ctx.paths)?;
            let remotes: Vec<&RemoteConfig> = store.list().collect();
            ctx.emit(&remotes, || {
                format_remote_list(remotes.iter().copied(), ctx.settings.cloud.default_remote.as_deref())
            })?;
        }

        RemoteCommands::Providers => {
            for (provider, description) in registry.providers() {
                println!("{:<8} {}", provider, description);
            }
        }

        RemoteCommands::Test { name, timeout } => {
            let store = RemoteStore::load(&ctx.paths)?;
            let remote = store.get(&name)?;
            let timeout = Duration::from_secs(timeout.unwrap_or(ctx.settings.cloud.connect_timeout_secs));
            let sync = CloudSync::new(
                &ctx.paths,
                ctx.archive_dir(),
                &registry,
                BackendContext::from_settings(&ctx.settings.cloud),
                ctx.settings.lock_timeout(),
            );
            let elapsed = sync.test_connection(remote, timeout)?;
            println!("Remote '{}' is reachable ({} ms)", name, elapsed.as_millis());
        }
    }
    Ok(0)
}
