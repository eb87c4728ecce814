//! Archive catalog CLI commands

use std::path::PathBuf;

use chrono::Utc;
use clap::{Args, ValueEnum};
use serde::Serialize;

use super::CliContext;
use crate::archive::catalog::{ArchiveCatalog, ArchiveInfo, ArchiveSelector};
use crate::archive::manifest::ArchiveManifest;
use crate::archive::naming::ArchiveKind;
use crate::display::{format_archive_info, format_archive_list};
use crate::error::OpsResult;
use crate::integrity::{check_archive, IntegritySummary};

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum KindFilter {
    Backup,
    Rollback,
}

#[derive(Args, Debug, Clone)]
pub struct ListArgs {
    /// Only list one kind of archive
    #[arg(long, value_enum)]
    pub kind: Option<KindFilter>,
}

#[derive(Args, Debug, Clone)]
pub struct InfoArgs {
    /// Archive file name or path; `latest` for the newest backup
    pub archive: String,
}

/// Handle the list command
pub fn handle_list_command(ctx: &CliContext, args: ListArgs) -> OpsResult<u8> {
    let catalog = ArchiveCatalog::new(ctx.archive_dir());
    let archives = match args.kind {
        None => catalog.list()?,
        Some(KindFilter::Backup) => catalog.list_kind(ArchiveKind::Backup)?,
        Some(KindFilter::Rollback) => catalog.list_kind(ArchiveKind::RollbackPoint)?,
    };
    ctx.emit(&archives, || format_archive_list(&archives, Utc::now()))?;
    Ok(0)
}

#[derive(Serialize)]
struct InfoOutput {
    archive: ArchiveInfo,
    manifest: Option<ArchiveManifest>,
    integrity: IntegritySummary,
}

/// Handle the info command
pub fn handle_info_command(ctx: &CliContext, args: InfoArgs) -> OpsResult<u8> {
    let catalog = ArchiveCatalog::new(ctx.archive_dir());
    let selector = if args.archive.eq_ignore_ascii_case("latest") {
        ArchiveSelector::Latest
    } else {
        ArchiveSelector::File(PathBuf::from(&args.archive))
    };
    let archive = catalog.resolve(&selector)?;

    let report = check_archive(&archive.path, None);
    let manifest = ArchiveManifest::read_sidecar(&archive.path)
        .or_else(|| report.listing.as_ref().and_then(|l| l.manifest.clone()));
    let output = InfoOutput {
        integrity: report.summary(),
        manifest,
        archive,
    };

    ctx.emit(&output, || {
        format_archive_info(&output.archive, output.manifest.as_ref(), &output.integrity)
    })?;
    Ok(0)
}
