//! Backup schedule record
//!
//! The schedule is stored apart from the archive set and consumed by an
//! external scheduler (cron or equivalent). opsvault never schedules anything
//! itself; it only validates the expression and renders a crontab line.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::paths::OpsPaths;
use crate::error::{OpsError, OpsResult};
use crate::storage::file_io::{read_json, write_json_atomic};

/// Field ranges for minute, hour, day of month, month, day of week
const FIELD_RANGES: [(&str, u32, u32); 5] = [
    ("minute", 0, 59),
    ("hour", 0, 23),
    ("day of month", 1, 31),
    ("month", 1, 12),
    ("day of week", 0, 7),
];

/// Cron expression plus enabled flag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupSchedule {
    pub expression: String,
    pub enabled: bool,
    /// Extra flags appended to `opsvault backup` in the rendered crontab line
    #[serde(default)]
    pub backup_args: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

impl Default for BackupSchedule {
    fn default() -> Self {
        Self {
            expression: "0 2 * * *".to_string(),
            enabled: false,
            backup_args: Vec::new(),
            updated_at: Utc::now(),
        }
    }
}

impl BackupSchedule {
    pub fn new(expression: &str, enabled: bool, backup_args: Vec<String>) -> OpsResult<Self> {
        validate_cron(expression)?;
        Ok(Self {
            expression: normalize(expression),
            enabled,
            backup_args,
            updated_at: Utc::now(),
        })
    }

    pub fn load(paths: &OpsPaths) -> OpsResult<Option<Self>> {
        let path = paths.schedule_file();
        if !path.exists() {
            return Ok(None);
        }
        read_json(path).map(Some)
    }

    pub fn save(&self, paths: &OpsPaths) -> OpsResult<()> {
        paths.ensure_directories()?;
        write_json_atomic(paths.schedule_file(), self)
    }

    /// Render the crontab line invoking `program backup ...`
    ///
    /// Disabled schedules are rendered commented out.
    pub fn crontab_line(&self, program: &str) -> String {
        let mut line = format!("{} {} backup", self.expression, program);
        for arg in &self.backup_args {
            line.push(' ');
            line.push_str(arg);
        }
        if self.enabled {
            line
        } else {
            format!("# {}", line)
        }
    }
}

fn normalize(expression: &str) -> String {
    expression.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Validate a five-field cron expression
///
/// Supports `*`, numbers, ranges (`a-b`), lists (`a,b`) and steps (`*/n`, `a-b/n`).
pub fn validate_cron(expression: &str) -> OpsResult<()> {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    if fields.len() != FIELD_RANGES.len() {
        return Err(OpsError::Validation(format!(
            "cron expression must have 5 fields, got {}: '{}'",
            fields.len(),
            expression
        )));
    }

    for (field, (name, min, max)) in fields.iter().zip(FIELD_RANGES.iter()) {
        validate_field(field, *min, *max)
            .map_err(|detail| OpsError::Validation(format!("invalid {} field '{}': {}", name, field, detail)))?;
    }
    Ok(())
}

fn validate_field(field: &str, min: u32, max: u32) -> Result<(), String> {
    for item in field.split(',') {
        let (range, step) = match item.split_once('/') {
            Some((range, step)) => (range, Some(step)),
            None => (item, None),
        };

        if let Some(step) = step {
            let step: u32 = step.parse().map_err(|_| format!("bad step '{}'", step))?;
            if step == 0 {
                return Err("step must be positive".into());
            }
        }

        if range == "*" {
            continue;
        }

        let (start, end) = match range.split_once('-') {
            Some((a, b)) => (parse_value(a, min, max)?, parse_value(b, min, max)?),
            None => {
                let v = parse_value(range, min, max)?;
                (v, v)
            }
        };
        if start > end {
            return Err(format!("range {}-{} is reversed", start, end));
        }
    }
    Ok(())
}

fn parse_value(value: &str, min: u32, max: u32) -> Result<u32, String> {
    let v: u32 = value
        .parse()
        .map_err(|_| format!("'{}' is not a number", value))?;
    if v < min || v > max {
        return Err(format!("{} is outside {}-{}", v, min, max));
    }
    Ok(v)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_valid_expressions() {
        for expr in ["0 2 * * *", "*/15 * * * *", "30 1 1,15 * 1-5", "0 0-23/2 * * 0"] {
            assert!(validate_cron(expr).is_ok(), "{}", expr);
        }
    }

    #[test]
    fn test_invalid_expressions() {
        for expr in ["0 2 * *", "61 * * * *", "* 24 * * *", "*/0 * * * *", "5-1 * * * *", "a * * * *"] {
            assert!(validate_cron(expr).is_err(), "{}", expr);
        }
    }

    #[test]
    fn test_crontab_line() {
        let schedule =
            BackupSchedule::new("0  3 * * *", true, vec!["--cloud".into()]).unwrap();
        assert_eq!(
            schedule.crontab_line("/usr/local/bin/opsvault"),
            "0 3 * * * /usr/local/bin/opsvault backup --cloud"
        );

        let disabled = BackupSchedule::new("0 3 * * *", false, Vec::new()).unwrap();
        assert!(disabled.crontab_line("opsvault").starts_with("# "));
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let paths = OpsPaths::with_base_dir(temp_dir.path().to_path_buf());

        assert!(BackupSchedule::load(&paths).unwrap().is_none());

        let schedule = BackupSchedule::new("15 4 * * 0", true, Vec::new()).unwrap();
        schedule.save(&paths).unwrap();

        let loaded = BackupSchedule::load(&paths).unwrap().unwrap();
        assert_eq!(loaded.expression, "15 4 * * 0");
        assert!(loaded.enabled);
    }
}
