//! Service lifecycle collaborator
//!
//! The recovery orchestrator only knows the three operations of
//! [`ServiceLifecycle`]. Stopping services that are already stopped, or
//! starting running ones, is never an error.

use std::collections::BTreeMap;
use std::process::Command;
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info};

use crate::config::settings::{ServiceRuntime, ServiceSettings};
use crate::error::{OpsError, OpsResult};
use crate::process::run;

const DOCKER_TIMEOUT: Duration = Duration::from_secs(120);

/// Health of one service
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum ServiceHealth {
    Healthy,
    Starting,
    Unhealthy(String),
    Stopped,
}

impl ServiceHealth {
    pub fn is_healthy(&self) -> bool {
        matches!(self, ServiceHealth::Healthy)
    }
}

pub type HealthMap = BTreeMap<String, ServiceHealth>;

/// Stops, starts and health-checks the managed services
pub trait ServiceLifecycle {
    fn stop_all(&self) -> OpsResult<()>;
    fn start_all(&self) -> OpsResult<()>;
    fn health_check(&self) -> OpsResult<HealthMap>;
}

/// Poll `health_check` until every service is healthy or `timeout` passes
pub fn wait_healthy(
    lifecycle: &dyn ServiceLifecycle,
    timeout: Duration,
    interval: Duration,
) -> OpsResult<HealthMap> {
    let deadline = Instant::now() + timeout;
    loop {
        let health = lifecycle.health_check()?;
        if health.values().all(ServiceHealth::is_healthy) {
            return Ok(health);
        }
        let pending: Vec<&str> = health
            .iter()
            .filter(|(_, h)| !h.is_healthy())
            .map(|(name, _)| name.as_str())
            .collect();
        debug!(?pending, "waiting for services to become healthy");

        let now = Instant::now();
        if now >= deadline {
            return Err(OpsError::timeout(
                format!("services to become healthy ({})", pending.join(", ")),
                timeout.as_secs(),
            ));
        }
        thread::sleep(interval.min(deadline - now));
    }
}

/// Build the lifecycle for the configured runtime
pub fn lifecycle_from_settings(settings: &ServiceSettings) -> Box<dyn ServiceLifecycle> {
    match settings.runtime {
        ServiceRuntime::None => Box::new(UnmanagedLifecycle),
        ServiceRuntime::Docker => Box::new(DockerLifecycle::new(
            settings.docker_bin.clone(),
            settings.containers.clone(),
        )),
    }
}

/// Services that opsvault does not manage
pub struct UnmanagedLifecycle;

impl ServiceLifecycle for UnmanagedLifecycle {
    fn stop_all(&self) -> OpsResult<()> {
        Ok(())
    }

    fn start_all(&self) -> OpsResult<()> {
        Ok(())
    }

    fn health_check(&self) -> OpsResult<HealthMap> {
        Ok(HealthMap::new())
    }
}

/// Containers managed through the docker CLI
///
/// Containers stop in the configured order and start in reverse, so
/// dependencies listed last come up first.
pub struct DockerLifecycle {
    bin: String,
    containers: Vec<String>,
}

impl DockerLifecycle {
    pub fn new(bin: String, containers: Vec<String>) -> Self {
        Self { bin, containers }
    }

    fn docker(&self, args: &[&str], operation: &str) -> OpsResult<String> {
        let mut cmd = Command::new(&self.bin);
        cmd.args(args);
        let output = run(cmd, None, Some(DOCKER_TIMEOUT), operation)?;
        if !output.success() {
            return Err(OpsError::Io(format!(
                "{} exited with {}: {}",
                operation, output.status, output.stderr
            )));
        }
        Ok(output.stdout_string())
    }
}

impl ServiceLifecycle for DockerLifecycle {
    fn stop_all(&self) -> OpsResult<()> {
        for container in &self.containers {
            info!(container = %container, "stopping container");
            self.docker(&["stop", container], "docker stop")
                .map_err(|e| OpsError::ServiceStopFailed(format!("{}: {}", container, e)))?;
        }
        Ok(())
    }

    fn start_all(&self) -> OpsResult<()> {
        for container in self.containers.iter().rev() {
            info!(container = %container, "starting container");
            self.docker(&["start", container], "docker start")
                .map_err(|e| OpsError::ServiceStartFailed(format!("{}: {}", container, e)))?;
        }
        Ok(())
    }

    fn health_check(&self) -> OpsResult<HealthMap> {
        let mut health = HealthMap::new();
        for container in &self.containers {
            let state = match self.docker(
                &[
                    "inspect",
                    "--format",
                    "{{.State.Status}} {{if .State.Health}}{{.State.Health.Status}}{{end}}",
                    container,
                ],
                "docker inspect",
            ) {
                Ok(out) => parse_docker_state(&out),
                Err(e) => ServiceHealth::Unhealthy(e.to_string()),
            };
            health.insert(container.clone(), state);
        }
        Ok(health)
    }
}

/// Parse `<status> [<health>]` from docker inspect
fn parse_docker_state(output: &str) -> ServiceHealth {
    let mut parts = output.split_whitespace();
    let status = parts.next().unwrap_or_default();
    let health = parts.next();
    match (status, health) {
        ("running", None) | ("running", Some("healthy")) => ServiceHealth::Healthy,
        ("running", Some("starting")) | ("restarting", _) => ServiceHealth::Starting,
        ("running", Some(other)) => ServiceHealth::Unhealthy(other.to_string()),
        ("created", _) | ("exited", _) | ("paused", _) => ServiceHealth::Stopped,
        (other, _) => ServiceHealth::Unhealthy(format!("state '{}'", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_parse_docker_state() {
        assert_eq!(parse_docker_state("running \n"), ServiceHealth::Healthy);
        assert_eq!(parse_docker_state("running healthy"), ServiceHealth::Healthy);
        assert_eq!(parse_docker_state("running starting"), ServiceHealth::Starting);
        assert_eq!(
            parse_docker_state("running unhealthy"),
            ServiceHealth::Unhealthy("unhealthy".into())
        );
        assert_eq!(parse_docker_state("exited "), ServiceHealth::Stopped);
    }

    #[test]
    fn test_unmanaged_is_idempotent_and_healthy() {
        let lifecycle = UnmanagedLifecycle;
        lifecycle.stop_all().unwrap();
        lifecycle.stop_all().unwrap();
        lifecycle.start_all().unwrap();
        lifecycle.start_all().unwrap();
        assert!(wait_healthy(&lifecycle, Duration::ZERO, Duration::from_millis(1)).is_ok());
    }

    struct SlowStart {
        polls_until_healthy: Cell<u32>,
    }

    impl ServiceLifecycle for SlowStart {
        fn stop_all(&self) -> OpsResult<()> {
            Ok(())
        }
        fn start_all(&self) -> OpsResult<()> {
            Ok(())
        }
        fn health_check(&self) -> OpsResult<HealthMap> {
            let left = self.polls_until_healthy.get();
            self.polls_until_healthy.set(left.saturating_sub(1));
            let state = if left == 0 {
                ServiceHealth::Healthy
            } else {
                ServiceHealth::Starting
            };
            Ok(HealthMap::from([("api".to_string(), state)]))
        }
    }

    #[test]
    fn test_wait_healthy_polls_until_ready() {
        let lifecycle = SlowStart {
            polls_until_healthy: Cell::new(2),
        };
        let health = wait_healthy(&lifecycle, Duration::from_secs(5), Duration::from_millis(5)).unwrap();
        assert!(health["api"].is_healthy());
    }

    #[test]
    fn test_wait_healthy_times_out() {
        let lifecycle = SlowStart {
            polls_until_healthy: Cell::new(u32::MAX),
        };
        let err = wait_healthy(&lifecycle, Duration::from_millis(30), Duration::from_millis(5)).unwrap_err();
        assert!(matches!(err, OpsError::Timeout { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_docker_lifecycle_with_fake_cli() {
        use std::os::unix::fs::PermissionsExt;

        let temp = tempfile::TempDir::new().unwrap();
        let log = temp.path().join("calls.log");
        let bin = temp.path().join("docker");
        std::fs::write(
            &bin,
            format!(
                "#!/bin/sh\necho \"$1 $2\" >> {}\nif [ \"$1\" = inspect ]; then echo 'running healthy'; fi\n",
                log.display()
            ),
        )
        .unwrap();
        std::fs::set_permissions(&bin, std::fs::Permissions::from_mode(0o755)).unwrap();

        let lifecycle = DockerLifecycle::new(
            bin.to_string_lossy().into_owned(),
            vec!["api".into(), "db".into()],
        );
        lifecycle.stop_all().unwrap();
        lifecycle.start_all().unwrap();
        let health = lifecycle.health_check().unwrap();
        assert!(health.values().all(ServiceHealth::is_healthy));

        let calls = std::fs::read_to_string(log).unwrap();
        let calls: Vec<&str> = calls.lines().collect();
        assert_eq!(&calls[..4], &["stop api", "stop db", "start db", "start api"]);
    }
}
