//! Config CLI commands

use clap::Subcommand;

use super::CliContext;
use crate::config::settings::Settings;
use crate::error::OpsResult;

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Show resolved paths and settings (default)
    Show,

    /// Write default settings and create the directory layout
    Init {
        /// Overwrite an existing settings file
        #[arg(long)]
        force: bool,
    },
}

/// Handle a config command
pub fn handle_config_command(ctx: &CliContext, cmd: Option<ConfigCommands>) -> OpsResult<u8> {
    match cmd.unwrap_or(ConfigCommands::Show) {
        ConfigCommands::Show => {
            let paths = &ctx.paths;
            if ctx.json {
                println!("{}", serde_json::to_string_pretty(&ctx.settings)?);
                return Ok(0);
            }
            println!("opsvault Configuration");
            println!("======================");
            println!("Base directory:    {}", paths.base_dir().display());
            println!("Settings file:     {}", paths.settings_file().display());
            println!("Remotes file:      {}", paths.remotes_file().display());
            println!("Schedule file:     {}", paths.schedule_file().display());
            println!("Journal:           {}", paths.journal_file().display());
            println!("Archive directory: {}", ctx.archive_dir().display());
            println!();
            println!("Settings:");
            println!("{}", serde_json::to_string_pretty(&ctx.settings)?);
        }

        ConfigCommands::Init { force } => {
            let path = ctx.paths.settings_file();
            if path.exists() && !force {
                println!("Settings already exist at {}", path.display());
                println!("Run again with --force to overwrite them with defaults.");
                return Ok(0);
            }
            ctx.paths.ensure_directories()?;
            Settings::default().save(&ctx.paths)?;
            println!("Initialized opsvault at: {}", ctx.paths.base_dir().display());
        }
    }
    Ok(0)
}
