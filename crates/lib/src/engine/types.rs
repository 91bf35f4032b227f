//! Engine-side records and creation specs.
//!
//! These are the crate's own value types; the Docker implementation
//! maps them onto bollard's models so the reconcilers never see the
//! engine API directly.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use crate::engine::ports::PortMap;

/// A container as reported by a list call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSummary {
  pub id: String,
  pub name: String,
  pub image: String,
  /// Identity of the image the container was created from.
  pub image_id: String,
  /// Engine state string (`running`, `exited`, ...).
  pub state: String,
  pub labels: HashMap<String, String>,
}

/// Health status reported by a container inspect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
  Starting,
  Healthy,
  Unhealthy,
}

/// Detail from inspecting a single container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerDetail {
  pub id: String,
  /// `None` when the container has no health probe configured.
  pub health: Option<HealthStatus>,
}

/// Detail from inspecting an image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageDetail {
  /// Stable content identity, e.g. `sha256:...`.
  pub id: String,
}

/// A network as reported by a list call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkRecord {
  pub id: String,
  pub name: String,
  pub labels: HashMap<String, String>,
}

/// A named volume as reported by a list call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeRecord {
  pub name: String,
  pub labels: HashMap<String, String>,
}

/// Health probe configuration for container creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthSpec {
  pub test: Vec<String>,
  pub interval: Duration,
  pub timeout: Duration,
  pub retries: u32,
  pub start_period: Duration,
}

/// A network endpoint the container attaches to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointSpec {
  /// Full physical network name.
  pub network: String,
  /// Network-scoped aliases for the container.
  pub aliases: Vec<String>,
}

/// Everything needed to create one container.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ContainerSpec {
  pub name: String,
  pub image: String,
  pub env: Vec<String>,
  /// Overrides the image's default argv when non-empty.
  pub command: Vec<String>,
  pub ports: PortMap,
  /// `SOURCE:TARGET` binds with named-volume sources already rewritten
  /// to their physical names.
  pub binds: Vec<String>,
  pub labels: BTreeMap<String, String>,
  pub healthcheck: Option<HealthSpec>,
  pub endpoints: Vec<EndpointSpec>,
}

/// Creation spec for a network.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NetworkSpec {
  /// Engine default driver when `None`.
  pub driver: Option<String>,
  pub labels: BTreeMap<String, String>,
}

/// Creation spec for a named volume.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VolumeSpec {
  pub driver: Option<String>,
  pub labels: BTreeMap<String, String>,
}

impl Default for HealthSpec {
  fn default() -> Self {
    Self {
      test: Vec::new(),
      interval: Duration::ZERO,
      timeout: Duration::ZERO,
      retries: 0,
      start_period: Duration::ZERO,
    }
  }
}
