//! CLI smoke tests for stevedore.
//!
//! These verify argument handling and the failure paths that need no
//! container engine; anything touching the engine or a remote
//! repository is covered by the library's scenario tests instead.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn stevedore_cmd() -> Command {
  Command::cargo_bin("stevedore").unwrap()
}

#[test]
fn help_flag_works() {
  stevedore_cmd()
    .arg("--help")
    .assert()
    .success()
    .stdout(predicate::str::contains("Usage"));
}

#[test]
fn version_flag_works() {
  stevedore_cmd()
    .arg("--version")
    .assert()
    .success()
    .stdout(predicate::str::contains("stevedore"));
}

#[test]
fn subcommand_help_works() {
  for cmd in &["run", "once", "health"] {
    stevedore_cmd()
      .arg(cmd)
      .arg("--help")
      .assert()
      .success()
      .stdout(predicate::str::contains("Usage"));
  }
}

#[test]
fn missing_subcommand_fails() {
  stevedore_cmd().assert().failure();
}

#[test]
fn once_with_missing_config_fails() {
  let temp = TempDir::new().unwrap();

  stevedore_cmd()
    .current_dir(temp.path())
    .arg("once")
    .arg("--config")
    .arg("does-not-exist.yaml")
    .assert()
    .failure()
    .stderr(predicate::str::contains("failed to load configuration"));
}

#[test]
fn run_with_malformed_config_fails() {
  let temp = TempDir::new().unwrap();
  let config_path = temp.path().join("stevedore.yaml");
  std::fs::write(&config_path, "repo_url: [unclosed").unwrap();

  stevedore_cmd()
    .current_dir(temp.path())
    .arg("run")
    .arg("--config")
    .arg(&config_path)
    .assert()
    .failure()
    .stderr(predicate::str::contains("failed to load configuration"));
}
