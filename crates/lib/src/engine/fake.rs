//! In-memory engine used by the test suite.
//!
//! Mirrors the observable behavior the reconcilers depend on: labeled
//! list calls, conflict on duplicate creation, not-found on missing
//! resources. Every mutating call is recorded in an operation journal
//! so tests can assert exactly what a cycle did. Health responses and
//! pull failures can be scripted per container / image.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::engine::types::{
  ContainerDetail, ContainerSpec, ContainerSummary, HealthStatus, ImageDetail, NetworkRecord,
  NetworkSpec, VolumeRecord, VolumeSpec,
};
use crate::engine::{EngineClient, EngineError};

/// One recorded engine mutation (or pull).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineOp {
  PullImage(String),
  CreateContainer(String),
  StartContainer(String),
  StopContainer(String),
  RemoveContainer(String),
  CreateNetwork(String),
  RemoveNetwork(String),
  CreateVolume(String),
  RemoveVolume(String),
}

impl EngineOp {
  /// Whether the operation mutates engine state (pulls are read-only).
  pub fn is_mutation(&self) -> bool {
    !matches!(self, EngineOp::PullImage(_))
  }
}

/// A container held by the fake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeContainer {
  pub id: String,
  pub name: String,
  pub image: String,
  pub image_id: String,
  pub state: String,
  pub labels: HashMap<String, String>,
  /// Health reported once any scripted sequence is exhausted.
  pub health: Option<HealthStatus>,
}

#[derive(Default)]
struct State {
  containers: BTreeMap<String, FakeContainer>,
  networks: BTreeMap<String, NetworkRecord>,
  volumes: BTreeMap<String, VolumeRecord>,
  images: BTreeMap<String, String>,
  failed_pulls: BTreeSet<String>,
  health_scripts: HashMap<String, VecDeque<Option<HealthStatus>>>,
  ops: Vec<EngineOp>,
  unavailable: bool,
  next_id: u64,
}

/// In-memory [`EngineClient`] implementation.
#[derive(Default)]
pub struct FakeEngine {
  state: Mutex<State>,
}

fn matches_selector(labels: &HashMap<String, String>, selector: &str) -> bool {
  match selector.split_once('=') {
    Some((key, value)) => labels.get(key).is_some_and(|v| v == value),
    None => false,
  }
}

impl FakeEngine {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> std::sync::MutexGuard<'_, State> {
    match self.state.lock() {
      Ok(guard) => guard,
      Err(poisoned) => poisoned.into_inner(),
    }
  }

  fn check(&self, cancel: &CancellationToken) -> Result<(), EngineError> {
    if cancel.is_cancelled() {
      return Err(EngineError::Cancelled);
    }
    if self.lock().unavailable {
      return Err(EngineError::Unavailable("fake engine offline".to_string()));
    }
    Ok(())
  }

  /// Make an image reference resolvable, with the given identity.
  pub fn register_image(&self, image: &str, image_id: &str) {
    self
      .lock()
      .images
      .insert(image.to_string(), image_id.to_string());
  }

  /// Make pulls of `image` fail.
  pub fn fail_pull(&self, image: &str) {
    self.lock().failed_pulls.insert(image.to_string());
  }

  /// Make every call fail with `Unavailable`.
  pub fn set_unavailable(&self, unavailable: bool) {
    self.lock().unavailable = unavailable;
  }

  /// Seed an existing container; returns its id.
  pub fn seed_container(
    &self,
    name: &str,
    image: &str,
    image_id: &str,
    state: &str,
    labels: HashMap<String, String>,
  ) -> String {
    let mut guard = self.lock();
    guard.next_id += 1;
    let id = format!("ctr-{}", guard.next_id);
    guard.containers.insert(
      id.clone(),
      FakeContainer {
        id: id.clone(),
        name: name.to_string(),
        image: image.to_string(),
        image_id: image_id.to_string(),
        state: state.to_string(),
        labels,
        health: None,
      },
    );
    id
  }

  pub fn seed_network(&self, name: &str, labels: HashMap<String, String>) {
    let mut guard = self.lock();
    guard.networks.insert(
      name.to_string(),
      NetworkRecord {
        id: name.to_string(),
        name: name.to_string(),
        labels,
      },
    );
  }

  pub fn seed_volume(&self, name: &str, labels: HashMap<String, String>) {
    let mut guard = self.lock();
    guard.volumes.insert(
      name.to_string(),
      VolumeRecord {
        name: name.to_string(),
        labels,
      },
    );
  }

  /// Fixed health reported by inspects of the container.
  pub fn set_health(&self, id: &str, health: Option<HealthStatus>) {
    if let Some(container) = self.lock().containers.get_mut(id) {
      container.health = health;
    }
  }

  /// Health sequence consumed one inspect at a time; after the
  /// sequence is exhausted, the fixed health applies.
  pub fn script_health(&self, id: &str, sequence: Vec<Option<HealthStatus>>) {
    self
      .lock()
      .health_scripts
      .insert(id.to_string(), sequence.into());
  }

  /// All operations recorded so far.
  pub fn ops(&self) -> Vec<EngineOp> {
    self.lock().ops.clone()
  }

  /// Drain the operation journal.
  pub fn take_ops(&self) -> Vec<EngineOp> {
    std::mem::take(&mut self.lock().ops)
  }

  pub fn containers(&self) -> Vec<FakeContainer> {
    self.lock().containers.values().cloned().collect()
  }

  pub fn container_named(&self, name: &str) -> Option<FakeContainer> {
    self
      .lock()
      .containers
      .values()
      .find(|c| c.name == name)
      .cloned()
  }

  pub fn network_names(&self) -> Vec<String> {
    self.lock().networks.keys().cloned().collect()
  }

  pub fn volume_names(&self) -> Vec<String> {
    self.lock().volumes.keys().cloned().collect()
  }
}

#[async_trait]
impl EngineClient for FakeEngine {
  async fn ping(&self, cancel: &CancellationToken) -> Result<(), EngineError> {
    self.check(cancel)
  }

  async fn list_containers(
    &self,
    label_selector: &str,
    cancel: &CancellationToken,
  ) -> Result<Vec<ContainerSummary>, EngineError> {
    self.check(cancel)?;
    Ok(
      self
        .lock()
        .containers
        .values()
        .filter(|c| matches_selector(&c.labels, label_selector))
        .map(|c| ContainerSummary {
          id: c.id.clone(),
          name: c.name.clone(),
          image: c.image.clone(),
          image_id: c.image_id.clone(),
          state: c.state.clone(),
          labels: c.labels.clone(),
        })
        .collect(),
    )
  }

  async fn inspect_container(
    &self,
    id: &str,
    cancel: &CancellationToken,
  ) -> Result<ContainerDetail, EngineError> {
    self.check(cancel)?;
    let mut guard = self.lock();

    let scripted = guard
      .health_scripts
      .get_mut(id)
      .and_then(|sequence| sequence.pop_front());

    let container = guard
      .containers
      .get(id)
      .ok_or_else(|| EngineError::NotFound(id.to_string()))?;

    Ok(ContainerDetail {
      id: container.id.clone(),
      health: scripted.unwrap_or(container.health),
    })
  }

  async fn create_container(
    &self,
    spec: ContainerSpec,
    cancel: &CancellationToken,
  ) -> Result<String, EngineError> {
    self.check(cancel)?;
    let mut guard = self.lock();

    if guard.containers.values().any(|c| c.name == spec.name) {
      return Err(EngineError::Conflict(spec.name));
    }

    let image_id = guard
      .images
      .get(&spec.image)
      .cloned()
      .unwrap_or_else(|| format!("sha256:{}", spec.image));

    guard.next_id += 1;
    let id = format!("ctr-{}", guard.next_id);
    guard.ops.push(EngineOp::CreateContainer(spec.name.clone()));
    guard.containers.insert(
      id.clone(),
      FakeContainer {
        id: id.clone(),
        name: spec.name,
        image: spec.image,
        image_id,
        state: "created".to_string(),
        labels: spec.labels.into_iter().collect(),
        health: None,
      },
    );
    Ok(id)
  }

  async fn start_container(
    &self,
    id: &str,
    cancel: &CancellationToken,
  ) -> Result<(), EngineError> {
    self.check(cancel)?;
    let mut guard = self.lock();
    guard.ops.push(EngineOp::StartContainer(id.to_string()));
    let container = guard
      .containers
      .get_mut(id)
      .ok_or_else(|| EngineError::NotFound(id.to_string()))?;
    container.state = "running".to_string();
    Ok(())
  }

  async fn stop_container(&self, id: &str, cancel: &CancellationToken) -> Result<(), EngineError> {
    self.check(cancel)?;
    let mut guard = self.lock();
    guard.ops.push(EngineOp::StopContainer(id.to_string()));
    let container = guard
      .containers
      .get_mut(id)
      .ok_or_else(|| EngineError::NotFound(id.to_string()))?;
    container.state = "exited".to_string();
    Ok(())
  }

  async fn remove_container(
    &self,
    id: &str,
    cancel: &CancellationToken,
  ) -> Result<(), EngineError> {
    self.check(cancel)?;
    let mut guard = self.lock();
    guard.ops.push(EngineOp::RemoveContainer(id.to_string()));
    guard
      .containers
      .remove(id)
      .map(|_| ())
      .ok_or_else(|| EngineError::NotFound(id.to_string()))
  }

  async fn pull_image(&self, image: &str, cancel: &CancellationToken) -> Result<(), EngineError> {
    self.check(cancel)?;
    let mut guard = self.lock();
    guard.ops.push(EngineOp::PullImage(image.to_string()));
    if guard.failed_pulls.contains(image) {
      return Err(EngineError::Api(format!("pull of '{image}' failed")));
    }
    if !guard.images.contains_key(image) {
      let image_id = format!("sha256:{image}");
      guard.images.insert(image.to_string(), image_id);
    }
    Ok(())
  }

  async fn inspect_image(
    &self,
    image: &str,
    cancel: &CancellationToken,
  ) -> Result<ImageDetail, EngineError> {
    self.check(cancel)?;
    self
      .lock()
      .images
      .get(image)
      .map(|id| ImageDetail { id: id.clone() })
      .ok_or_else(|| EngineError::NotFound(image.to_string()))
  }

  async fn list_networks(
    &self,
    label_selector: &str,
    cancel: &CancellationToken,
  ) -> Result<Vec<NetworkRecord>, EngineError> {
    self.check(cancel)?;
    Ok(
      self
        .lock()
        .networks
        .values()
        .filter(|n| matches_selector(&n.labels, label_selector))
        .cloned()
        .collect(),
    )
  }

  async fn create_network(
    &self,
    name: &str,
    spec: NetworkSpec,
    cancel: &CancellationToken,
  ) -> Result<String, EngineError> {
    self.check(cancel)?;
    let mut guard = self.lock();
    guard.ops.push(EngineOp::CreateNetwork(name.to_string()));
    if guard.networks.contains_key(name) {
      return Err(EngineError::Conflict(name.to_string()));
    }
    guard.networks.insert(
      name.to_string(),
      NetworkRecord {
        id: name.to_string(),
        name: name.to_string(),
        labels: spec.labels.into_iter().collect(),
      },
    );
    Ok(name.to_string())
  }

  async fn remove_network(&self, id: &str, cancel: &CancellationToken) -> Result<(), EngineError> {
    self.check(cancel)?;
    let mut guard = self.lock();
    guard.ops.push(EngineOp::RemoveNetwork(id.to_string()));
    guard
      .networks
      .remove(id)
      .map(|_| ())
      .ok_or_else(|| EngineError::NotFound(id.to_string()))
  }

  async fn list_volumes(
    &self,
    label_selector: &str,
    cancel: &CancellationToken,
  ) -> Result<Vec<VolumeRecord>, EngineError> {
    self.check(cancel)?;
    Ok(
      self
        .lock()
        .volumes
        .values()
        .filter(|v| matches_selector(&v.labels, label_selector))
        .cloned()
        .collect(),
    )
  }

  async fn create_volume(
    &self,
    name: &str,
    spec: VolumeSpec,
    cancel: &CancellationToken,
  ) -> Result<(), EngineError> {
    self.check(cancel)?;
    let mut guard = self.lock();
    guard.ops.push(EngineOp::CreateVolume(name.to_string()));
    if guard.volumes.contains_key(name) {
      return Err(EngineError::Conflict(name.to_string()));
    }
    guard.volumes.insert(
      name.to_string(),
      VolumeRecord {
        name: name.to_string(),
        labels: spec.labels.into_iter().collect(),
      },
    );
    Ok(())
  }

  async fn remove_volume(
    &self,
    name: &str,
    _force: bool,
    cancel: &CancellationToken,
  ) -> Result<(), EngineError> {
    self.check(cancel)?;
    let mut guard = self.lock();
    guard.ops.push(EngineOp::RemoveVolume(name.to_string()));
    guard
      .volumes
      .remove(name)
      .map(|_| ())
      .ok_or_else(|| EngineError::NotFound(name.to_string()))
  }
}
