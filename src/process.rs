//! External command execution with bounded waits
//!
//! rclone, docker, database dump tools and notification hooks all run through
//! here so every invocation has the same error mapping and an optional
//! deadline.

use std::fs::File;
use std::io::{Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::{OpsError, OpsResult};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Captured result of a finished command
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    pub fn stdout_string(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }
}

/// Build a `Command` from an argv vector
pub fn command_from_argv(argv: &[String]) -> OpsResult<Command> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| OpsError::Config("empty command".into()))?;
    let mut cmd = Command::new(program);
    cmd.args(args);
    Ok(cmd)
}

/// Run a command to completion, optionally feeding stdin and bounding the wait
///
/// On timeout the child is killed and `OpsError::Timeout` is returned.
pub fn run(
    mut cmd: Command,
    stdin: Option<Vec<u8>>,
    timeout: Option<Duration>,
    operation: &str,
) -> OpsResult<CommandOutput> {
    cmd.stdin(if stdin.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    })
    .stdout(Stdio::piped());
    spawn_and_wait(cmd, stdin, timeout, operation)
}

/// Like [`run`], streaming stdin from and stdout into files
///
/// Large payloads such as database dumps never pass through memory; the
/// returned `stdout` is empty when `stdout` is given.
pub fn run_with_files(
    mut cmd: Command,
    stdin: Option<File>,
    stdout: Option<File>,
    timeout: Option<Duration>,
    operation: &str,
) -> OpsResult<CommandOutput> {
    cmd.stdin(stdin.map(Stdio::from).unwrap_or_else(Stdio::null))
        .stdout(stdout.map(Stdio::from).unwrap_or_else(Stdio::piped));
    spawn_and_wait(cmd, None, timeout, operation)
}

fn spawn_and_wait(
    mut cmd: Command,
    stdin: Option<Vec<u8>>,
    timeout: Option<Duration>,
    operation: &str,
) -> OpsResult<CommandOutput> {
    debug!(?cmd, operation, "spawning command");
    cmd.stderr(Stdio::piped());

    let mut child = cmd
        .spawn()
        .map_err(|e| OpsError::Io(format!("Failed to start {}: {}", operation, e)))?;

    let writer = stdin.and_then(|bytes| {
        child.stdin.take().map(|mut pipe| {
            thread::spawn(move || {
                let _ = pipe.write_all(&bytes);
            })
        })
    });
    let stdout_reader = spawn_reader(child.stdout.take());
    let stderr_reader = spawn_reader(child.stderr.take());

    let status = wait(&mut child, timeout, operation)?;

    if let Some(writer) = writer {
        let _ = writer.join();
    }
    let stdout = stdout_reader.join().unwrap_or_default();
    let stderr = stderr_reader.join().unwrap_or_default();

    Ok(CommandOutput {
        status,
        stdout,
        stderr: String::from_utf8_lossy(&stderr).trim().to_string(),
    })
}

fn spawn_reader<R: Read + Send + 'static>(source: Option<R>) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut source) = source {
            let _ = source.read_to_end(&mut buf);
        }
        buf
    })
}

fn wait(child: &mut Child, timeout: Option<Duration>, operation: &str) -> OpsResult<ExitStatus> {
    let Some(timeout) = timeout else {
        return Ok(child.wait()?);
    };

    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(status);
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            return Err(OpsError::timeout(operation, timeout.as_secs()));
        }
        thread::sleep(POLL_INTERVAL);
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[test]
    fn test_captures_output() {
        let out = run(sh("echo hello; echo oops >&2"), None, None, "echo").unwrap();
        assert!(out.success());
        assert_eq!(out.stdout_string().trim(), "hello");
        assert_eq!(out.stderr, "oops");
    }

    #[test]
    fn test_feeds_stdin() {
        let out = run(sh("cat"), Some(b"piped".to_vec()), None, "cat").unwrap();
        assert_eq!(out.stdout, b"piped");
    }

    #[test]
    fn test_streams_files_through_child() {
        let temp = tempfile::TempDir::new().unwrap();
        let input = temp.path().join("in.sql");
        let output = temp.path().join("out.sql");
        std::fs::write(&input, "CREATE TABLE t;\n").unwrap();

        let out = run_with_files(
            sh("cat; echo done >&2"),
            Some(File::open(&input).unwrap()),
            Some(File::create(&output).unwrap()),
            None,
            "cat",
        )
        .unwrap();

        assert!(out.success());
        assert!(out.stdout.is_empty());
        assert_eq!(out.stderr, "done");
        assert_eq!(std::fs::read_to_string(&output).unwrap(), "CREATE TABLE t;\n");
    }

    #[test]
    fn test_timeout_kills_child() {
        let started = Instant::now();
        let err = run(sh("sleep 5"), None, Some(Duration::from_millis(200)), "sleep").unwrap_err();
        assert!(matches!(err, OpsError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[test]
    fn test_empty_argv_is_config_error() {
        assert!(matches!(command_from_argv(&[]), Err(OpsError::Config(_))));
    }
}
