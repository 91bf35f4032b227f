//! The container-engine capability.
//!
//! [`EngineClient`] is the minimal surface the reconcilers need from
//! whatever engine is present. Every call takes a cancellation handle
//! and returns the engine's current truth; the reconcilers never trust
//! remembered state. [`docker::DockerEngine`] wraps the real daemon;
//! [`fake::FakeEngine`] is the in-memory double the scenario tests are
//! driven through.

pub mod docker;
pub mod fake;
pub mod ports;
pub mod types;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub use types::{
  ContainerDetail, ContainerSpec, ContainerSummary, EndpointSpec, HealthSpec, HealthStatus,
  ImageDetail, NetworkRecord, NetworkSpec, VolumeRecord, VolumeSpec,
};

/// Label keys identifying resources owned by a project.
///
/// These keys are a compatibility contract: list filters select on
/// them and they are the ground truth for ownership.
pub mod labels {
  pub const PROJECT: &str = "com.docker.compose.project";
  pub const SERVICE: &str = "com.docker.compose.service";
  pub const NETWORK: &str = "com.docker.compose.network";
  pub const VOLUME: &str = "com.docker.compose.volume";
}

/// `key=value` selector matching every resource of one project.
pub fn project_selector(project: &str) -> String {
  format!("{}={}", labels::PROJECT, project)
}

/// Physical name of a project-scoped network or volume.
pub fn physical_name(project: &str, logical: &str) -> String {
  format!("{project}_{logical}")
}

/// Errors raised by engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
  /// The engine daemon cannot be reached.
  #[error("engine unavailable: {0}")]
  Unavailable(String),

  /// The resource already exists; creation paths treat this as success.
  #[error("resource already exists: {0}")]
  Conflict(String),

  #[error("resource not found: {0}")]
  NotFound(String),

  /// Any other engine-side failure.
  #[error("engine error: {0}")]
  Api(String),

  #[error("operation cancelled")]
  Cancelled,
}

/// Capability the container engine must expose.
///
/// `label_selector` arguments are `key=value` pairs; list calls return
/// only resources carrying that label.
#[async_trait]
pub trait EngineClient: Send + Sync {
  async fn ping(&self, cancel: &CancellationToken) -> Result<(), EngineError>;

  async fn list_containers(
    &self,
    label_selector: &str,
    cancel: &CancellationToken,
  ) -> Result<Vec<ContainerSummary>, EngineError>;

  async fn inspect_container(
    &self,
    id: &str,
    cancel: &CancellationToken,
  ) -> Result<ContainerDetail, EngineError>;

  async fn create_container(
    &self,
    spec: ContainerSpec,
    cancel: &CancellationToken,
  ) -> Result<String, EngineError>;

  async fn start_container(&self, id: &str, cancel: &CancellationToken)
    -> Result<(), EngineError>;

  async fn stop_container(&self, id: &str, cancel: &CancellationToken) -> Result<(), EngineError>;

  async fn remove_container(
    &self,
    id: &str,
    cancel: &CancellationToken,
  ) -> Result<(), EngineError>;

  /// Pull an image, draining the progress stream.
  async fn pull_image(&self, image: &str, cancel: &CancellationToken) -> Result<(), EngineError>;

  async fn inspect_image(
    &self,
    image: &str,
    cancel: &CancellationToken,
  ) -> Result<ImageDetail, EngineError>;

  async fn list_networks(
    &self,
    label_selector: &str,
    cancel: &CancellationToken,
  ) -> Result<Vec<NetworkRecord>, EngineError>;

  async fn create_network(
    &self,
    name: &str,
    spec: NetworkSpec,
    cancel: &CancellationToken,
  ) -> Result<String, EngineError>;

  async fn remove_network(&self, id: &str, cancel: &CancellationToken) -> Result<(), EngineError>;

  async fn list_volumes(
    &self,
    label_selector: &str,
    cancel: &CancellationToken,
  ) -> Result<Vec<VolumeRecord>, EngineError>;

  async fn create_volume(
    &self,
    name: &str,
    spec: VolumeSpec,
    cancel: &CancellationToken,
  ) -> Result<(), EngineError>;

  async fn remove_volume(
    &self,
    name: &str,
    force: bool,
    cancel: &CancellationToken,
  ) -> Result<(), EngineError>;
}
