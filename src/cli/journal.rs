//! Journal CLI command

use clap::Args;

use super::CliContext;
use crate::error::OpsResult;

#[derive(Args, Debug, Clone)]
pub struct JournalArgs {
    /// Number of entries to show
    #[arg(short = 'n', long, default_value = "20")]
    pub limit: usize,
}

/// Handle the journal command
pub fn handle_journal_command(ctx: &CliContext, args: JournalArgs) -> OpsResult<u8> {
    let journal = ctx.journal();
    let entries = journal.read_recent(args.limit)?;

    ctx.emit(&entries, || {
        if entries.is_empty() {
            return "No failures recorded.".to_string();
        }
        let mut out: Vec<String> = entries.iter().map(|e| e.format_human_readable()).collect();
        out.push(format!("\n{} entr{} from {}", entries.len(), if entries.len() == 1 { "y" } else { "ies" }, journal.path().display()));
        out.join("\n")
    })?;
    Ok(0)
}
