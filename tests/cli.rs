use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

struct Env {
    temp: TempDir,
}

impl Env {
    /// A home directory with a volume tree and a config tree to back up
    fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let env = Self { temp };
        fs::create_dir_all(env.volumes()).unwrap();
        fs::create_dir_all(env.config()).unwrap();
        fs::write(env.volumes().join("data.bin"), vec![7u8; 4096]).unwrap();
        fs::write(env.config().join("app.env"), "MODE=prod\n").unwrap();
        env.write_settings(serde_json::json!({}));
        env
    }

    fn home(&self) -> PathBuf {
        self.temp.path().join("home")
    }

    fn volumes(&self) -> PathBuf {
        self.temp.path().join("volumes")
    }

    fn config(&self) -> PathBuf {
        self.temp.path().join("config")
    }

    fn archives(&self) -> PathBuf {
        self.temp.path().join("archives")
    }

    /// Write config.json with the sources filled in and `extra` merged on top
    fn write_settings(&self, extra: serde_json::Value) {
        let mut settings = serde_json::json!({
            "archive_dir": self.archives(),
            "sources": {
                "volumes_dir": self.volumes(),
                "config_dir": self.config(),
            },
        });
        if let (Some(base), Some(extra)) = (settings.as_object_mut(), extra.as_object()) {
            for (k, v) in extra {
                base.insert(k.clone(), v.clone());
            }
        }
        fs::create_dir_all(self.home()).unwrap();
        fs::write(
            self.home().join("config.json"),
            serde_json::to_vec_pretty(&settings).unwrap(),
        )
        .unwrap();
    }

    fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("opsvault").unwrap();
        cmd.env("OPSVAULT_HOME", self.home()).env_remove("OPSVAULT_LOG");
        cmd
    }

    fn archive_files(&self) -> Vec<PathBuf> {
        let Ok(entries) = fs::read_dir(self.archives()) else {
            return Vec::new();
        };
        let mut files: Vec<PathBuf> = entries
            .map(|e| e.unwrap().path())
            .filter(|p| p.to_string_lossy().ends_with(".tar.gz"))
            .collect();
        files.sort();
        files
    }

    fn backup(&self) -> PathBuf {
        self.cmd().arg("backup").assert().success();
        self.archive_files().pop().unwrap()
    }
}

fn file_name(path: &Path) -> String {
    path.file_name().unwrap().to_string_lossy().into_owned()
}

#[test]
fn verify_latest_on_empty_archive_dir_reports_no_backups() {
    let env = Env::new();
    env.cmd()
        .args(["verify", "--latest"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("No backups found"));
}

#[test]
fn backup_then_verify_passes() {
    let env = Env::new();
    let archive = env.backup();
    assert!(file_name(&archive).starts_with("backup-"));
    assert!(PathBuf::from(format!("{}.sha256", archive.display())).exists());

    env.cmd()
        .args(["verify", "--latest"])
        .assert()
        .success()
        .stdout(predicate::str::contains("PASSED"));
}

#[test]
fn tampered_checksum_exits_2() {
    let env = Env::new();
    let archive = env.backup();
    let checksum = PathBuf::from(format!("{}.sha256", archive.display()));
    fs::write(&checksum, format!("{}  {}\n", "ab".repeat(32), file_name(&archive))).unwrap();

    env.cmd()
        .args(["verify", "--file", &file_name(&archive)])
        .assert()
        .code(2)
        .stdout(predicate::str::contains("FAILED"));
}

#[test]
fn short_digest_in_checksum_file_exits_2() {
    let env = Env::new();
    let archive = env.backup();
    let checksum = PathBuf::from(format!("{}.sha256", archive.display()));
    fs::write(&checksum, format!("deadbeef  {}\n", file_name(&archive))).unwrap();

    env.cmd()
        .args(["verify", "--latest"])
        .assert()
        .code(2)
        .stdout(predicate::str::contains("FAILED"));
}

#[test]
fn backup_dry_run_writes_nothing() {
    let env = Env::new();
    env.cmd()
        .args(["backup", "--dry-run"])
        .assert()
        .success()
        .stdout(predicate::str::contains("planned"));
    assert!(!env.archives().exists());
}

#[test]
fn backup_with_nothing_selected_exits_1() {
    let env = Env::new();
    env.write_settings(serde_json::json!({ "sources": {} }));
    env.cmd()
        .arg("backup")
        .assert()
        .code(1)
        .stdout(predicate::str::contains("NoComponentsSelected"));

    env.cmd()
        .arg("journal")
        .assert()
        .success()
        .stdout(predicate::str::contains("BACKUP building NoComponentsSelected"));
}

#[test]
fn upload_with_invalid_credentials_keeps_archive_and_exits_2() {
    let env = Env::new();
    let bucket = env.temp.path().join("bucket");
    fs::create_dir_all(&bucket).unwrap();
    let missing = env.temp.path().join("no-such-credentials.json");

    env.cmd()
        .args(["cloud", "remote", "add", "offsite", "--provider", "local", "--default"])
        .arg("--bucket")
        .arg(&bucket)
        .arg("--credentials")
        .arg(&missing)
        .assert()
        .success();

    env.cmd()
        .args(["backup", "--cloud"])
        .assert()
        .code(2)
        .stdout(predicate::str::contains("InvalidCredentials"));

    assert_eq!(env.archive_files().len(), 1);
    assert_eq!(fs::read_dir(&bucket).unwrap().count(), 0);
}

#[test]
fn upload_to_local_remote_succeeds() {
    let env = Env::new();
    let bucket = env.temp.path().join("bucket");
    fs::create_dir_all(&bucket).unwrap();

    env.cmd()
        .args(["cloud", "remote", "add", "nas", "--provider", "local", "--default"])
        .arg("--bucket")
        .arg(&bucket)
        .assert()
        .success();

    env.cmd().args(["backup", "--cloud"]).assert().success();
    let archive = env.archive_files().pop().unwrap();
    assert!(bucket.join(file_name(&archive)).exists());
}

#[cfg(unix)]
#[test]
fn restore_dry_run_plans_seven_steps_without_touching_services() {
    use std::os::unix::fs::PermissionsExt;

    let env = Env::new();
    let marker = env.temp.path().join("docker-called");
    let docker = env.temp.path().join("fake-docker");
    fs::write(&docker, format!("#!/bin/sh\ntouch {}\n", marker.display())).unwrap();
    fs::set_permissions(&docker, fs::Permissions::from_mode(0o755)).unwrap();

    env.backup();
    env.write_settings(serde_json::json!({
        "services": {
            "runtime": "docker",
            "containers": ["web", "db"],
            "docker_bin": docker,
        }
    }));
    let before: Vec<PathBuf> = fs::read_dir(env.archives()).unwrap().map(|e| e.unwrap().path()).collect();

    let output = env
        .cmd()
        .args(["--json", "restore", "--latest", "--dry-run"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(0));

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let steps = report["steps"].as_array().unwrap();
    assert_eq!(steps.len(), 7);
    assert_eq!(report["final_state"], "DONE");
    assert!(!marker.exists());

    let after: Vec<PathBuf> = fs::read_dir(env.archives()).unwrap().map(|e| e.unwrap().path()).collect();
    assert_eq!(before.len(), after.len());
}

#[test]
fn restore_replaces_live_data_and_keeps_rollback_point() {
    let env = Env::new();
    env.backup();
    fs::write(env.config().join("app.env"), "MODE=broken\n").unwrap();

    env.cmd()
        .args(["restore", "--latest", "--auto-confirm"])
        .assert()
        .success()
        .stdout(predicate::str::contains("RECOVERY DONE"));

    assert_eq!(fs::read_to_string(env.config().join("app.env")).unwrap(), "MODE=prod\n");
    env.cmd()
        .args(["list", "--kind", "rollback"])
        .assert()
        .success()
        .stdout(predicate::str::contains("rollback-"));
}

#[test]
fn cleanup_without_force_deletes_nothing() {
    let env = Env::new();
    env.backup();

    env.cmd()
        .args(["cleanup", "--days", "0", "--keep", "0"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Run again with --force"));
    assert_eq!(env.archive_files().len(), 1);

    env.cmd()
        .args(["cleanup", "--days", "0", "--keep", "0", "--force"])
        .assert()
        .success();
    assert!(env.archive_files().is_empty());
}

#[test]
fn schedule_rejects_bad_cron_and_renders_crontab() {
    let env = Env::new();
    env.cmd()
        .args(["schedule", "set", "--cron", "61 * * * *"])
        .assert()
        .code(1);

    env.cmd()
        .args(["schedule", "set", "--cron", "30 3 * * *"])
        .assert()
        .success();
    env.cmd()
        .args(["schedule", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("30 3 * * *").and(predicate::str::contains("backup")));
}
