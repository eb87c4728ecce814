//! Cloud remote and sync display formatting

use tabled::settings::Style;
use tabled::{Table, Tabled};

use super::{format_size, truncate};
use crate::cloud::{FileAction, FileStatus, RemoteConfig, SyncReport};

#[derive(Tabled)]
struct RemoteRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Provider")]
    provider: String,
    #[tabled(rename = "Bucket")]
    bucket: String,
    #[tabled(rename = "Prefix")]
    prefix: String,
    #[tabled(rename = "Credentials")]
    credentials: String,
    #[tabled(rename = "Default")]
    default: String,
}

/// Format configured remotes, marking the default one
pub fn format_remote_list<'a>(
    remotes: impl IntoIterator<Item = &'a RemoteConfig>,
    default_remote: Option<&str>,
) -> String {
    let rows: Vec<RemoteRow> = remotes
        .into_iter()
        .map(|r| RemoteRow {
            name: r.name.clone(),
            provider: r.provider.clone(),
            bucket: r.bucket.clone(),
            prefix: r.prefix.clone().unwrap_or_default(),
            credentials: r.credentials.clone().unwrap_or_else(|| "-".into()),
            default: if default_remote == Some(r.name.as_str()) { "*" } else { "" }.to_string(),
        })
        .collect();

    if rows.is_empty() {
        return "No remotes configured.\nAdd one with: opsvault cloud remote add <name> --provider <provider> --bucket <bucket>".to_string();
    }
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    table.to_string()
}

#[derive(Tabled)]
struct FileRow {
    #[tabled(rename = "File")]
    file: String,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Size")]
    size: String,
}

/// Format one remote's sync outcome
pub fn format_sync_report(report: &SyncReport) -> String {
    let mode = match report.mode {
        crate::cloud::SyncMode::Upload => "upload",
        crate::cloud::SyncMode::Download => "download",
        crate::cloud::SyncMode::Bidirectional => "bidirectional",
    };
    let mut output = format!(
        "Remote '{}' ({}{})\n",
        report.remote,
        mode,
        if report.dry_run { ", dry run" } else { "" }
    );

    if let Some((kind, detail)) = &report.error {
        output.push_str(&format!("  FAILED [{}]: {}\n", kind, detail));
        return output;
    }
    if report.files.is_empty() {
        output.push_str("  Nothing to transfer.\n");
        return output;
    }

    let rows: Vec<FileRow> = report
        .files
        .iter()
        .map(|f| FileRow {
            file: f.file.clone(),
            action: match f.action {
                FileAction::Upload => "upload",
                FileAction::Download => "download",
            }
            .to_string(),
            status: match &f.status {
                FileStatus::Done => "done".to_string(),
                FileStatus::Planned => "planned".to_string(),
                FileStatus::Skipped => "present".to_string(),
                FileStatus::Failed { kind, detail } => format!("FAILED [{}] {}", kind, truncate(detail, 60)),
            },
            size: format_size(f.bytes),
        })
        .collect();

    let mut table = Table::new(rows);
    table.with(Style::rounded());
    output.push_str(&table.to_string());
    output.push_str(&format!(
        "\n  {} transferred, {} failed, {} moved\n",
        report.count(|s| *s == FileStatus::Done),
        report.failed_count(),
        format_size(report.bytes_moved())
    ));
    output
}
