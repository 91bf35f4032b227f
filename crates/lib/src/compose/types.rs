use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// A duration string that failed to parse.
#[derive(Debug, Error)]
#[error("invalid duration '{value}': {source}")]
pub struct DurationError {
  pub value: String,
  #[source]
  pub source: humantime::DurationError,
}

fn parse_duration_opt(value: &Option<String>) -> Result<Duration, DurationError> {
  match value {
    Some(raw) => humantime::parse_duration(raw).map_err(|e| DurationError {
      value: raw.clone(),
      source: e,
    }),
    None => Ok(Duration::ZERO),
  }
}

/// The parsed composition manifest: the desired state of one project.
#[derive(Debug, Default, Clone, PartialEq, Deserialize)]
pub struct Composition {
  #[serde(default)]
  pub services: BTreeMap<String, Service>,

  #[serde(default)]
  pub networks: BTreeMap<String, Network>,

  #[serde(default)]
  pub volumes: BTreeMap<String, Volume>,
}

/// One service entry.
#[derive(Debug, Default, Clone, PartialEq, Deserialize)]
pub struct Service {
  /// Image reference; always required.
  #[serde(default)]
  pub image: String,

  /// Physical container name override; defaults to the service name.
  #[serde(default)]
  pub container_name: Option<String>,

  /// `KEY=VALUE` pairs, passed through as-is.
  #[serde(default)]
  pub environment: Vec<String>,

  /// Port mappings in `[HOST_IP:][HOST_PORT:]CONTAINER_PORT[/PROTO]` form.
  #[serde(default)]
  pub ports: Vec<String>,

  /// `SOURCE:TARGET` bindings; non-path sources name declared volumes.
  #[serde(default)]
  pub volumes: Vec<String>,

  /// Declared-network names the container attaches to.
  #[serde(default)]
  pub networks: Vec<String>,

  /// Argv tokens overriding the image's default command when non-empty.
  #[serde(default)]
  pub command: Vec<String>,

  /// Services that must exist (and be healthy, when healthchecked)
  /// before this one is reconciled. A set: repeated entries in the
  /// manifest collapse to one.
  #[serde(default)]
  pub depends_on: BTreeSet<String>,

  #[serde(default)]
  pub healthcheck: Option<HealthCheck>,
}

impl Service {
  /// Physical container name for this service.
  pub fn physical_name<'a>(&'a self, service_name: &'a str) -> &'a str {
    match &self.container_name {
      Some(name) if !name.is_empty() => name,
      _ => service_name,
    }
  }

  /// Whether a dependent must wait for this service's health status.
  pub fn has_healthcheck(&self) -> bool {
    self.healthcheck.as_ref().is_some_and(|h| !h.test.is_empty())
  }
}

/// Container health probe definition.
///
/// Durations are kept as strings to match the manifest format; the
/// accessors parse them, and validation runs the accessors eagerly so
/// a malformed duration fails the cycle before any engine action.
#[derive(Debug, Default, Clone, PartialEq, Deserialize)]
pub struct HealthCheck {
  /// Probe command; the first token indicates the probe kind.
  #[serde(default)]
  pub test: Vec<String>,

  #[serde(default)]
  pub interval: Option<String>,

  #[serde(default)]
  pub timeout: Option<String>,

  #[serde(default)]
  pub retries: u32,

  #[serde(default)]
  pub start_period: Option<String>,
}

impl HealthCheck {
  pub fn interval(&self) -> Result<Duration, DurationError> {
    parse_duration_opt(&self.interval)
  }

  pub fn timeout(&self) -> Result<Duration, DurationError> {
    parse_duration_opt(&self.timeout)
  }

  pub fn start_period(&self) -> Result<Duration, DurationError> {
    parse_duration_opt(&self.start_period)
  }
}

/// A declared network.
#[derive(Debug, Default, Clone, PartialEq, Deserialize)]
pub struct Network {
  /// Optional display alias.
  #[serde(default)]
  pub name: Option<String>,

  /// Engine driver; engine default when empty.
  #[serde(default)]
  pub driver: Option<String>,

  /// External resources are never created nor removed.
  #[serde(default)]
  pub external: bool,
}

/// A declared named volume.
#[derive(Debug, Default, Clone, PartialEq, Deserialize)]
pub struct Volume {
  #[serde(default)]
  pub name: Option<String>,

  #[serde(default)]
  pub driver: Option<String>,

  #[serde(default)]
  pub external: bool,
}
