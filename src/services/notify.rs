//! Notification collaborator
//!
//! Orchestrators send one notification per run. A failed send is logged
//! and reported, never fatal.

use std::time::Duration;

use tracing::info;

use crate::config::settings::NotificationSettings;
use crate::error::{OpsError, OpsResult};
use crate::process::{command_from_argv, run};

const NOTIFY_TIMEOUT: Duration = Duration::from_secs(30);

pub trait Notifier {
    fn send(&self, event: &str, outcome: &str, details: &str) -> OpsResult<()>;
}

/// Build the notifier for the configured command, or a log-only one
pub fn notifier_from_settings(settings: &NotificationSettings) -> Box<dyn Notifier> {
    if settings.command.is_empty() {
        Box::new(LogNotifier)
    } else {
        Box::new(CommandNotifier::new(settings.command.clone()))
    }
}

/// Writes the notification to the log
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn send(&self, event: &str, outcome: &str, details: &str) -> OpsResult<()> {
        info!(event, outcome, "{}", details);
        Ok(())
    }
}

/// Runs a command per notification
///
/// The event and outcome are passed as `OPSVAULT_EVENT` and
/// `OPSVAULT_OUTCOME`; the details are written to stdin.
pub struct CommandNotifier {
    argv: Vec<String>,
    timeout: Duration,
}

impl CommandNotifier {
    pub fn new(argv: Vec<String>) -> Self {
        Self {
            argv,
            timeout: NOTIFY_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Notifier for CommandNotifier {
    fn send(&self, event: &str, outcome: &str, details: &str) -> OpsResult<()> {
        let mut cmd = command_from_argv(&self.argv)?;
        cmd.env("OPSVAULT_EVENT", event).env("OPSVAULT_OUTCOME", outcome);
        let output = run(
            cmd,
            Some(details.as_bytes().to_vec()),
            Some(self.timeout),
            "notification command",
        )
        .map_err(|e| OpsError::NotificationFailed(e.to_string()))?;

        if !output.success() {
            return Err(OpsError::NotificationFailed(format!(
                "notification command exited with {}: {}",
                output.status, output.stderr
            )));
        }
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_command_receives_event_and_details() {
        let temp = TempDir::new().unwrap();
        let out = temp.path().join("out");
        let notifier = CommandNotifier::new(vec![
            "sh".into(),
            "-c".into(),
            format!("{{ echo \"$OPSVAULT_EVENT/$OPSVAULT_OUTCOME\"; cat; }} > {}", out.display()),
        ]);

        notifier.send("backup", "success", "3 components").unwrap();
        let written = std::fs::read_to_string(out).unwrap();
        assert_eq!(written, "backup/success\n3 components");
    }

    #[test]
    fn test_failing_command_is_notification_failed() {
        let notifier = CommandNotifier::new(vec!["sh".into(), "-c".into(), "exit 1".into()]);
        let err = notifier.send("backup", "success", "").unwrap_err();
        assert!(matches!(err, OpsError::NotificationFailed(_)));
    }

    #[test]
    fn test_hanging_command_times_out_as_notification_failed() {
        let notifier = CommandNotifier::new(vec!["sleep".into(), "5".into()])
            .with_timeout(Duration::from_millis(100));
        let err = notifier.send("backup", "success", "").unwrap_err();
        assert!(matches!(err, OpsError::NotificationFailed(_)));
    }

    #[test]
    fn test_log_notifier_never_fails() {
        assert!(LogNotifier.send("recovery", "failed", "details").is_ok());
    }
}
