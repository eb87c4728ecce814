//! Archive file naming
//!
//! Archives are named `<kind>-YYYYMMDD-HHMMSS[-N].tar.gz`. The timestamp is
//! the creation time in UTC with second granularity; `N` disambiguates two
//! archives created within the same second.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

pub const ARCHIVE_EXT: &str = ".tar.gz";
pub const CHECKSUM_EXT: &str = ".sha256";
pub const META_EXT: &str = ".meta.json";

/// What an archive was created for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveKind {
    /// Regular scheduled or on-demand backup
    Backup,
    /// Transient snapshot taken right before a restore
    RollbackPoint,
}

impl ArchiveKind {
    pub fn prefix(self) -> &'static str {
        match self {
            ArchiveKind::Backup => "backup",
            ArchiveKind::RollbackPoint => "rollback",
        }
    }

    fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "backup" => Some(ArchiveKind::Backup),
            "rollback" => Some(ArchiveKind::RollbackPoint),
            _ => None,
        }
    }
}

impl fmt::Display for ArchiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArchiveKind::Backup => write!(f, "backup"),
            ArchiveKind::RollbackPoint => write!(f, "rollback point"),
        }
    }
}

/// Parsed archive file name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveName {
    pub kind: ArchiveKind,
    pub created_at: DateTime<Utc>,
    pub seq: u32,
}

impl ArchiveName {
    pub fn new(kind: ArchiveKind, created_at: DateTime<Utc>, seq: u32) -> Self {
        Self {
            kind,
            created_at,
            seq,
        }
    }

    pub fn file_name(&self) -> String {
        let stamp = self.created_at.format("%Y%m%d-%H%M%S");
        if self.seq == 0 {
            format!("{}-{}{}", self.kind.prefix(), stamp, ARCHIVE_EXT)
        } else {
            format!("{}-{}-{}{}", self.kind.prefix(), stamp, self.seq, ARCHIVE_EXT)
        }
    }

    /// Parse a file name; returns None for anything that is not an archive
    pub fn parse(file_name: &str) -> Option<Self> {
        let stem = file_name.strip_suffix(ARCHIVE_EXT)?;
        let (prefix, rest) = stem.split_once('-')?;
        let kind = ArchiveKind::from_prefix(prefix)?;
        let (created_at, seq) = parse_archive_timestamp(rest)?;
        Some(Self {
            kind,
            created_at,
            seq,
        })
    }
}

/// First free archive path in `dir` for `kind` created at `now`
pub fn next_archive_path(dir: &Path, kind: ArchiveKind, now: DateTime<Utc>) -> PathBuf {
    let mut seq = 0;
    loop {
        let path = dir.join(ArchiveName::new(kind, now, seq).file_name());
        if !path.exists() && !checksum_path(&path).exists() {
            return path;
        }
        seq += 1;
    }
}

/// Detached checksum path for an archive
pub fn checksum_path(archive: &Path) -> PathBuf {
    sibling_with_suffix(archive, CHECKSUM_EXT)
}

/// Metadata sidecar path for an archive
pub fn meta_path(archive: &Path) -> PathBuf {
    sibling_with_suffix(archive, META_EXT)
}

fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(suffix);
    path.with_file_name(name)
}

/// Parse `YYYYMMDD-HHMMSS` or `YYYYMMDD-HHMMSS-N`
fn parse_archive_timestamp(date_str: &str) -> Option<(DateTime<Utc>, u32)> {
    let parts: Vec<&str> = date_str.split('-').collect();
    if parts.len() < 2 || parts.len() > 3 {
        return None;
    }

    let date_part = parts[0];
    let time_part = parts[1];
    let seq: u32 = if parts.len() == 3 {
        parts[2].parse().ok()?
    } else {
        0
    };

    if date_part.len() != 8 || time_part.len() != 6 {
        return None;
    }

    let year: i32 = date_part[0..4].parse().ok()?;
    let month: u32 = date_part[4..6].parse().ok()?;
    let day: u32 = date_part[6..8].parse().ok()?;
    let hour: u32 = time_part[0..2].parse().ok()?;
    let minute: u32 = time_part[2..4].parse().ok()?;
    let second: u32 = time_part[4..6].parse().ok()?;

    let date = NaiveDate::from_ymd_opt(year, month, day)?;
    let time = NaiveTime::from_hms_opt(hour, minute, second)?;
    let datetime = NaiveDateTime::new(date, time);

    Some((DateTime::from_naive_utc_and_offset(datetime, Utc), seq))
}
