//! Schedule CLI commands
//!
//! opsvault holds no scheduler; it stores the schedule record and renders
//! the crontab line an external scheduler runs.

use clap::Subcommand;

use super::CliContext;
use crate::config::schedule::BackupSchedule;
use crate::error::OpsResult;

/// Schedule subcommands
#[derive(Subcommand, Debug)]
pub enum ScheduleCommands {
    /// Show the stored schedule and its crontab line
    Show,

    /// Store a schedule
    Set {
        /// Five-field cron expression, e.g. "0 2 * * *"
        #[arg(long)]
        cron: String,

        /// Store the schedule disabled
        #[arg(long)]
        disable: bool,

        /// Extra arguments passed to `opsvault backup`
        #[arg(last = true)]
        backup_args: Vec<String>,
    },
}

fn program_name() -> String {
    std::env::current_exe()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|_| "opsvault".to_string())
}

/// Handle a schedule command
pub fn handle_schedule_command(ctx: &CliContext, cmd: ScheduleCommands) -> OpsResult<u8> {
    match cmd {
        ScheduleCommands::Show => match BackupSchedule::load(&ctx.paths)? {
            None => println!("No schedule configured.\nSet one with: opsvault schedule set --cron \"0 2 * * *\""),
            Some(schedule) => {
                let line = schedule.crontab_line(&program_name());
                ctx.emit(&schedule, || {
                    format!(
                        "Expression: {}\nEnabled:    {}\nUpdated:    {}\n\nCrontab line:\n{}",
                        schedule.expression,
                        if schedule.enabled { "yes" } else { "no" },
                        schedule.updated_at.format("%Y-%m-%d %H:%M:%S UTC"),
                        line
                    )
                })?;
            }
        },

        ScheduleCommands::Set {
            cron,
            disable,
            backup_args,
        } => {
            let schedule = BackupSchedule::new(&cron, !disable, backup_args)?;
            schedule.save(&ctx.paths)?;
            println!("Schedule saved.");
            println!("{}", schedule.crontab_line(&program_name()));
        }
    }
    Ok(0)
}
