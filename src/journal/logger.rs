//! Append-only failure journal
//!
//! Each entry is written as a single JSON line and flushed immediately.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use crate::error::{OpsError, OpsResult};

use super::entry::JournalEntry;

/// Writes journal entries to a JSONL file
pub struct Journal {
    log_path: PathBuf,
}

impl Journal {
    pub fn new(log_path: PathBuf) -> Self {
        Self { log_path }
    }

    /// Append one entry
    pub fn record(&self, entry: &JournalEntry) -> OpsResult<()> {
        if let Some(parent) = self.log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .map_err(|e| OpsError::Io(format!("Failed to open journal: {}", e)))?;

        let json = serde_json::to_string(entry)
            .map_err(|e| OpsError::Json(format!("Failed to serialize journal entry: {}", e)))?;

        writeln!(file, "{}", json)
            .map_err(|e| OpsError::Io(format!("Failed to write journal entry: {}", e)))?;

        file.flush()
            .map_err(|e| OpsError::Io(format!("Failed to flush journal: {}", e)))?;

        Ok(())
    }

    /// Read all entries, oldest first
    pub fn read_all(&self) -> OpsResult<Vec<JournalEntry>> {
        if !self.log_path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&self.log_path)
            .map_err(|e| OpsError::Io(format!("Failed to open journal: {}", e)))?;

        let mut entries = Vec::new();
        for (line_num, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|e| {
                OpsError::Io(format!("Failed to read journal line {}: {}", line_num + 1, e))
            })?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: JournalEntry = serde_json::from_str(&line).map_err(|e| {
                OpsError::Json(format!(
                    "Failed to parse journal entry at line {}: {}",
                    line_num + 1,
                    e
                ))
            })?;
            entries.push(entry);
        }

        Ok(entries)
    }

    /// Read the most recent N entries
    pub fn read_recent(&self, count: usize) -> OpsResult<Vec<JournalEntry>> {
        let all_entries = self.read_all()?;
        let start = all_entries.len().saturating_sub(count);
        Ok(all_entries[start..].to_vec())
    }

    pub fn path(&self) -> &Path {
        &self.log_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::journal::entry::Operation;
    use tempfile::TempDir;
    use uuid::Uuid;

    fn entry(detail: &str) -> JournalEntry {
        JournalEntry::failure(
            Uuid::new_v4(),
            Operation::Backup,
            "building",
            &OpsError::Io(detail.into()),
        )
    }

    #[test]
    fn test_record_and_read() {
        let temp = TempDir::new().unwrap();
        let journal = Journal::new(temp.path().join("nested").join("journal.jsonl"));

        journal.record(&entry("disk gone")).unwrap();
        let entries = journal.read_all().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].kind, ErrorKind::Internal);
        assert_eq!(entries[0].step, "building");
    }

    #[test]
    fn test_read_recent() {
        let temp = TempDir::new().unwrap();
        let journal = Journal::new(temp.path().join("journal.jsonl"));
        for i in 0..10 {
            journal.record(&entry(&format!("failure {}", i))).unwrap();
        }

        let recent = journal.read_recent(3).unwrap();
        assert_eq!(recent.len(), 3);
        assert!(recent[0].detail.contains("failure 7"));
        assert!(recent[2].detail.contains("failure 9"));
    }

    #[test]
    fn test_missing_journal_is_empty() {
        let temp = TempDir::new().unwrap();
        let journal = Journal::new(temp.path().join("journal.jsonl"));
        assert!(journal.read_all().unwrap().is_empty());
    }
}
