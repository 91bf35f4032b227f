//! Daemon configuration.
//!
//! Configuration is read from a YAML file (`stevedore.yaml` by default)
//! and individual fields may be overridden through `STEVEDORE_*`
//! environment variables.

use std::env;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// Default config file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "stevedore.yaml";

const DEFAULT_CHECK_INTERVAL: u64 = 300;

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("failed to read config file '{path}': {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to parse config file: {0}")]
  Yaml(#[from] serde_yaml::Error),

  #[error("config field '{0}' must not be empty")]
  EmptyField(&'static str),

  #[error("deployment_dir '{0}' has no base name to use as the project name")]
  NoProjectName(PathBuf),

  #[error("check_interval must be at least 1 second")]
  InvalidInterval,

  #[error("environment override {var}='{value}' is not valid: {reason}")]
  InvalidEnv {
    var: &'static str,
    value: String,
    reason: String,
  },
}

/// Daemon configuration.
///
/// `deployment_dir` doubles as the project identity: its base name is
/// the label scope for every engine-side resource this daemon owns.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Git URL of the repository carrying the composition manifest.
  pub repo_url: String,

  /// Local checkout directory for the repository.
  pub deployment_dir: PathBuf,

  /// Manifest path, relative to `deployment_dir`.
  pub compose_file: String,

  /// Branch to track.
  pub target_branch: String,

  /// Private key used when no SSH agent is available.
  #[serde(default)]
  pub ssh_key_path: Option<PathBuf>,

  /// Seconds between reconciliation cycles.
  #[serde(default = "default_check_interval")]
  pub check_interval: u64,

  /// Optional engine API version pin; negotiated when absent.
  #[serde(default)]
  pub docker_api_version: Option<String>,
}

fn default_check_interval() -> u64 {
  DEFAULT_CHECK_INTERVAL
}

impl Config {
  /// The project name: base name of the deployment directory.
  ///
  /// `load_config` validates that the base name exists, so the
  /// fallback is never reached for a loaded config.
  pub fn project_name(&self) -> String {
    self
      .deployment_dir
      .file_name()
      .map(|n| n.to_string_lossy().into_owned())
      .unwrap_or_else(|| "default".to_string())
  }

  /// Absolute path of the composition manifest.
  pub fn compose_path(&self) -> PathBuf {
    self.deployment_dir.join(&self.compose_file)
  }

  fn validate(&self) -> Result<(), ConfigError> {
    if self.repo_url.is_empty() {
      return Err(ConfigError::EmptyField("repo_url"));
    }
    if self.compose_file.is_empty() {
      return Err(ConfigError::EmptyField("compose_file"));
    }
    if self.target_branch.is_empty() {
      return Err(ConfigError::EmptyField("target_branch"));
    }
    if self.deployment_dir.file_name().is_none() {
      return Err(ConfigError::NoProjectName(self.deployment_dir.clone()));
    }
    if self.check_interval == 0 {
      return Err(ConfigError::InvalidInterval);
    }
    Ok(())
  }
}

/// Load configuration from `path`, apply environment overrides and
/// validate the result.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
  let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
    path: path.to_path_buf(),
    source: e,
  })?;

  let mut config: Config = serde_yaml::from_str(&raw)?;
  apply_env_overrides(&mut config)?;
  config.validate()?;
  Ok(config)
}

fn apply_env_overrides(config: &mut Config) -> Result<(), ConfigError> {
  if let Ok(v) = env::var("STEVEDORE_REPO_URL") {
    config.repo_url = v;
  }
  if let Ok(v) = env::var("STEVEDORE_DEPLOYMENT_DIR") {
    config.deployment_dir = PathBuf::from(v);
  }
  if let Ok(v) = env::var("STEVEDORE_COMPOSE_FILE") {
    config.compose_file = v;
  }
  if let Ok(v) = env::var("STEVEDORE_TARGET_BRANCH") {
    config.target_branch = v;
  }
  if let Ok(v) = env::var("STEVEDORE_SSH_KEY_PATH") {
    config.ssh_key_path = Some(PathBuf::from(v));
  }
  if let Ok(v) = env::var("STEVEDORE_CHECK_INTERVAL") {
    config.check_interval = v.parse().map_err(|e| ConfigError::InvalidEnv {
      var: "STEVEDORE_CHECK_INTERVAL",
      value: v,
      reason: format!("{e}"),
    })?;
  }
  if let Ok(v) = env::var("STEVEDORE_DOCKER_API_VERSION") {
    config.docker_api_version = Some(v);
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use serial_test::serial;
  use tempfile::TempDir;

  const FULL_CONFIG: &str = r#"
repo_url: git@example.com:acme/deploy.git
deployment_dir: /srv/deployments/acme
compose_file: docker-compose.yaml
target_branch: main
ssh_key_path: /home/cd/.ssh/id_ed25519
check_interval: 60
docker_api_version: "1.43"
"#;

  const MINIMAL_CONFIG: &str = r#"
repo_url: https://example.com/acme/deploy.git
deployment_dir: /srv/deployments/acme
compose_file: compose.yaml
target_branch: main
"#;

  fn write_config(content: &str) -> (TempDir, PathBuf) {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("stevedore.yaml");
    std::fs::write(&path, content).unwrap();
    (temp, path)
  }

  #[test]
  #[serial]
  fn load_full_config() {
    let (_temp, path) = write_config(FULL_CONFIG);
    let config = load_config(&path).unwrap();

    assert_eq!(config.repo_url, "git@example.com:acme/deploy.git");
    assert_eq!(config.target_branch, "main");
    assert_eq!(config.check_interval, 60);
    assert_eq!(config.docker_api_version.as_deref(), Some("1.43"));
    assert_eq!(config.project_name(), "acme");
    assert_eq!(
      config.compose_path(),
      PathBuf::from("/srv/deployments/acme/docker-compose.yaml")
    );
  }

  #[test]
  #[serial]
  fn minimal_config_uses_defaults() {
    let (_temp, path) = write_config(MINIMAL_CONFIG);
    let config = load_config(&path).unwrap();

    assert_eq!(config.check_interval, DEFAULT_CHECK_INTERVAL);
    assert!(config.ssh_key_path.is_none());
    assert!(config.docker_api_version.is_none());
  }

  #[test]
  #[serial]
  fn env_overrides_win_over_file_values() {
    let (_temp, path) = write_config(FULL_CONFIG);

    temp_env::with_vars(
      [
        ("STEVEDORE_TARGET_BRANCH", Some("staging")),
        ("STEVEDORE_CHECK_INTERVAL", Some("15")),
      ],
      || {
        let config = load_config(&path).unwrap();
        assert_eq!(config.target_branch, "staging");
        assert_eq!(config.check_interval, 15);
        // Fields without an override keep their file values.
        assert_eq!(config.repo_url, "git@example.com:acme/deploy.git");
      },
    );
  }

  #[test]
  #[serial]
  fn malformed_env_interval_is_an_error() {
    let (_temp, path) = write_config(FULL_CONFIG);

    temp_env::with_var("STEVEDORE_CHECK_INTERVAL", Some("soon"), || {
      assert!(matches!(
        load_config(&path),
        Err(ConfigError::InvalidEnv { .. })
      ));
    });
  }

  #[test]
  fn missing_file_is_an_error() {
    let result = load_config(Path::new("/nonexistent/stevedore.yaml"));
    assert!(matches!(result, Err(ConfigError::Read { .. })));
  }

  #[test]
  fn malformed_yaml_is_an_error() {
    let (_temp, path) = write_config("repo_url: [unclosed");
    assert!(matches!(load_config(&path), Err(ConfigError::Yaml(_))));
  }

  #[test]
  #[serial]
  fn empty_branch_fails_validation() {
    let (_temp, path) = write_config(
      r#"
repo_url: https://example.com/acme/deploy.git
deployment_dir: /srv/deployments/acme
compose_file: compose.yaml
target_branch: ""
"#,
    );
    assert!(matches!(
      load_config(&path),
      Err(ConfigError::EmptyField("target_branch"))
    ));
  }

  #[test]
  #[serial]
  fn zero_interval_fails_validation() {
    let (_temp, path) = write_config(
      r#"
repo_url: https://example.com/acme/deploy.git
deployment_dir: /srv/deployments/acme
compose_file: compose.yaml
target_branch: main
check_interval: 0
"#,
    );
    assert!(matches!(load_config(&path), Err(ConfigError::InvalidInterval)));
  }
}
