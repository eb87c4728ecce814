//! Archive display formatting
//!
//! Formats the archive catalog and integrity results for terminal output.

use chrono::{DateTime, Utc};
use tabled::settings::Style;
use tabled::{Table, Tabled};

use super::{format_age, format_size};
use crate::archive::catalog::ArchiveInfo;
use crate::archive::manifest::ArchiveManifest;
use crate::integrity::IntegritySummary;

#[derive(Tabled)]
struct ArchiveRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Archive")]
    filename: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Created")]
    created: String,
    #[tabled(rename = "Age")]
    age: String,
    #[tabled(rename = "Size")]
    size: String,
    #[tabled(rename = "Checksum")]
    checksum: String,
}

/// Format the archive catalog, newest first
pub fn format_archive_list(archives: &[ArchiveInfo], now: DateTime<Utc>) -> String {
    if archives.is_empty() {
        return "No archives found.".to_string();
    }

    let rows: Vec<ArchiveRow> = archives
        .iter()
        .enumerate()
        .map(|(i, a)| ArchiveRow {
            index: i + 1,
            filename: a.filename.clone(),
            kind: a.kind.to_string(),
            created: a.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            age: format_age(now.signed_duration_since(a.created_at)),
            size: format_size(a.size_bytes),
            checksum: if a.has_checksum { "yes" } else { "MISSING" }.to_string(),
        })
        .collect();

    let total: u64 = archives.iter().map(|a| a.size_bytes).sum();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    format!(
        "{}\nTotal: {} archive(s), {}",
        table,
        archives.len(),
        format_size(total)
    )
}

#[derive(Tabled)]
struct InfoRow {
    #[tabled(rename = "Property")]
    key: String,
    #[tabled(rename = "Value")]
    value: String,
}

fn row(key: &str, value: impl Into<String>) -> InfoRow {
    InfoRow {
        key: key.to_string(),
        value: value.into(),
    }
}

/// Format one archive with its manifest and check results
pub fn format_archive_info(
    info: &ArchiveInfo,
    manifest: Option<&ArchiveManifest>,
    integrity: &IntegritySummary,
) -> String {
    let mut rows = vec![
        row("File", info.filename.clone()),
        row("Location", info.path.display().to_string()),
        row("Kind", info.kind.to_string()),
        row("Created", info.created_at.format("%Y-%m-%d %H:%M:%S UTC").to_string()),
        row("Size", format_size(info.size_bytes)),
    ];

    match manifest {
        Some(m) => {
            let components: Vec<String> = m
                .components
                .iter()
                .map(|c| match m.component_bytes.get(c) {
                    Some(bytes) => format!("{} ({})", c, format_size(*bytes)),
                    None => c.to_string(),
                })
                .collect();
            rows.push(row("Components", components.join(", ")));
            rows.push(row("Tool version", m.tool_version.clone()));
        }
        None => rows.push(row("Components", "unknown (no manifest)")),
    }

    rows.push(row("Checksum", integrity.checksum.clone()));
    rows.push(row("Structure", integrity.structure.clone()));
    rows.push(row("Contents", integrity.contents.clone()));

    let mut table = Table::new(rows);
    table.with(Style::rounded());
    table.to_string()
}

/// Format the three verification checks of one archive
pub fn format_integrity(summary: &IntegritySummary) -> String {
    let name = summary
        .archive
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| summary.archive.display().to_string());
    let verdict = if summary.passed { "PASSED" } else { "FAILED" };
    format!(
        "{}: {}\n  checksum:  {}\n  structure: {}\n  contents:  {}",
        name, verdict, summary.checksum, summary.structure, summary.contents
    )
}
