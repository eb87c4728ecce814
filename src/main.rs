use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};

use opsvault::cli::{
    error_exit_code, handle_backup_command, handle_cleanup_command, handle_cloud_command,
    handle_config_command, handle_info_command, handle_journal_command, handle_list_command,
    handle_recovery_command, handle_schedule_command, handle_verify_command, BackupArgs,
    CleanupArgs, CliContext, CloudCommands, ConfigCommands, InfoArgs, JournalArgs, ListArgs,
    RecoveryArgs, ScheduleCommands, VerifyArgs,
};
use opsvault::error::OpsError;
use opsvault::logging::init_logging;

#[derive(Parser)]
#[command(
    name = "opsvault",
    version,
    about = "Backup, retention, cloud sync and disaster recovery",
    long_about = "opsvault builds verified archives of service volumes, configuration \
                  and a database dump, prunes them by age and count, copies them to \
                  remote storage, and restores them with an automatic rollback."
)]
struct Cli {
    /// Print reports as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Debug-level logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Write logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build, verify and optionally upload an archive
    Backup(BackupArgs),

    /// Verify archive checksums, structure and components
    Verify(VerifyArgs),

    /// Restore an archive, rolling back on failure
    #[command(alias = "dr")]
    Restore(RecoveryArgs),

    /// Delete archives past the retention policy
    Cleanup(CleanupArgs),

    /// Cloud remotes and sync
    #[command(subcommand)]
    Cloud(CloudCommands),

    /// List archives, newest first
    List(ListArgs),

    /// Show one archive's metadata and check results
    Info(InfoArgs),

    /// Backup schedule record
    #[command(subcommand)]
    Schedule(ScheduleCommands),

    /// Show recent failures
    Journal(JournalArgs),

    /// Show or initialize configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

fn run(cli: Cli) -> Result<u8, OpsError> {
    let mut ctx = CliContext::load(cli.json)?;
    match cli.command {
        Commands::Backup(args) => handle_backup_command(&ctx, args),
        Commands::Verify(args) => handle_verify_command(&ctx, args),
        Commands::Restore(args) => handle_recovery_command(&ctx, args),
        Commands::Cleanup(args) => handle_cleanup_command(&ctx, args),
        Commands::Cloud(cmd) => handle_cloud_command(&mut ctx, cmd),
        Commands::List(args) => handle_list_command(&ctx, args),
        Commands::Info(args) => handle_info_command(&ctx, args),
        Commands::Schedule(cmd) => handle_schedule_command(&ctx, cmd),
        Commands::Journal(args) => handle_journal_command(&ctx, args),
        Commands::Config { command } => handle_config_command(&ctx, command),
    }
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_json);

    match run(cli) {
        Ok(code) => Ok(ExitCode::from(code)),
        Err(e) => {
            tracing::error!(kind = %e.kind(), "{}", e);
            eprintln!("Error: {}", e);
            Ok(ExitCode::from(error_exit_code(&e)))
        }
    }
}
