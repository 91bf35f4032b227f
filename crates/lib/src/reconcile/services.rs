//! Service convergence: the decision core of the reconciler.
//!
//! Services are visited in dependency order. Each service is gated on
//! its dependencies (existence, plus health when the dependency
//! declares a probe), then either created, recreated, started or left
//! alone. The recreate decision compares the observed container's
//! image identity against the freshly inspected image; tag equality
//! alone never triggers a recreate. Containers whose service no longer
//! appears in the composition are stopped and removed at the end.

use std::collections::BTreeMap;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::compose::{is_named_volume, Composition, DurationError, Service};
use crate::engine::ports::{parse_port_specs, PortError};
use crate::engine::{
  labels, physical_name, ContainerSpec, ContainerSummary, EndpointSpec, EngineClient, EngineError,
  HealthSpec, HealthStatus,
};
use crate::order::resolve_order;

use super::ApplyError;

const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(5);
const HEALTH_POLL_LIMIT: u32 = 60;

/// Failures scoped to a single service; the cycle continues past them.
#[derive(Debug, Error)]
pub enum ServiceError {
  #[error("failed to pull image '{image}': {source}")]
  ImagePull {
    image: String,
    #[source]
    source: EngineError,
  },

  #[error(transparent)]
  Port(#[from] PortError),

  #[error("invalid healthcheck duration: {0}")]
  Healthcheck(#[from] DurationError),

  #[error(transparent)]
  Engine(#[from] EngineError),

  #[error("dependency '{dependency}' of service '{service}' has no container")]
  MissingDependency { service: String, dependency: String },

  #[error("container '{0}' is unhealthy")]
  Unhealthy(String),

  #[error("timed out waiting for container '{0}' to become healthy")]
  HealthWaitTimeout(String),
}

impl ServiceError {
  fn is_cancelled(&self) -> bool {
    matches!(
      self,
      ServiceError::Engine(EngineError::Cancelled)
        | ServiceError::ImagePull {
          source: EngineError::Cancelled,
          ..
        }
    )
  }
}

/// Reconcile every declared service against the observed containers,
/// then prune orphans.
///
/// `observed` maps service names (from the service label) to their
/// containers; it is kept up to date as containers are created so that
/// dependents gate on containers made earlier in the same cycle.
pub async fn reconcile_services(
  engine: &dyn EngineClient,
  project: &str,
  composition: &Composition,
  mut observed: BTreeMap<String, ContainerSummary>,
  cancel: &CancellationToken,
) -> Result<(), ApplyError> {
  let deps: BTreeMap<String, Vec<String>> = composition
    .services
    .iter()
    .map(|(name, service)| (name.clone(), service.depends_on.iter().cloned().collect()))
    .collect();
  let order = resolve_order(&deps)?;
  info!(order = ?order, "service reconciliation order");

  for name in &order {
    let Some(service) = composition.services.get(name) else {
      continue;
    };
    debug!(service = %name, "reconciling service");

    if let Err(err) = gate_dependencies(engine, name, service, composition, &observed, cancel).await
    {
      if err.is_cancelled() {
        return Err(EngineError::Cancelled.into());
      }
      error!(service = %name, error = %err, "dependency gating failed, skipping service");
      continue;
    }

    let outcome = match observed.get(name) {
      Some(existing) => reconcile_existing(engine, project, name, service, existing, cancel).await,
      None => {
        info!(service = %name, "service not found, creating");
        create_service(engine, project, name, service, cancel)
          .await
          .map(Some)
      }
    };

    match outcome {
      Ok(Some(summary)) => {
        observed.insert(name.clone(), summary);
      }
      Ok(None) => {}
      Err(err) if err.is_cancelled() => return Err(EngineError::Cancelled.into()),
      Err(err) => error!(service = %name, error = %err, "failed to reconcile service"),
    }
  }

  prune_orphans(engine, composition, &observed, cancel).await?;
  Ok(())
}

/// Check that every dependency of `service` has a container, waiting
/// for health when the dependency declares a probe.
async fn gate_dependencies(
  engine: &dyn EngineClient,
  name: &str,
  service: &Service,
  composition: &Composition,
  observed: &BTreeMap<String, ContainerSummary>,
  cancel: &CancellationToken,
) -> Result<(), ServiceError> {
  for dependency in &service.depends_on {
    let Some(container) = observed.get(dependency) else {
      return Err(ServiceError::MissingDependency {
        service: name.to_string(),
        dependency: dependency.clone(),
      });
    };

    let probed = composition
      .services
      .get(dependency)
      .is_some_and(Service::has_healthcheck);
    if probed {
      info!(service = %name, dependency = %dependency, "waiting for dependency to become healthy");
      wait_for_healthy(engine, &container.id, cancel).await?;
    }
  }
  Ok(())
}

/// Poll a container until it reports healthy.
///
/// Bounded at 60 polls, 5 seconds apart. A missing container or a
/// missing health block keeps polling; `unhealthy` fails immediately.
async fn wait_for_healthy(
  engine: &dyn EngineClient,
  id: &str,
  cancel: &CancellationToken,
) -> Result<(), ServiceError> {
  debug!(container = %id, "waiting for container to become healthy");

  for _ in 0..HEALTH_POLL_LIMIT {
    match engine.inspect_container(id, cancel).await {
      Ok(detail) => match detail.health {
        Some(HealthStatus::Healthy) => {
          debug!(container = %id, "container is healthy");
          return Ok(());
        }
        Some(HealthStatus::Unhealthy) => {
          return Err(ServiceError::Unhealthy(id.to_string()));
        }
        Some(HealthStatus::Starting) | None => {}
      },
      Err(EngineError::Cancelled) => return Err(EngineError::Cancelled.into()),
      Err(EngineError::NotFound(_)) => {}
      Err(err) => return Err(err.into()),
    }

    tokio::select! {
      _ = cancel.cancelled() => return Err(ServiceError::Engine(EngineError::Cancelled)),
      _ = tokio::time::sleep(HEALTH_POLL_INTERVAL) => {}
    }
  }

  Err(ServiceError::HealthWaitTimeout(id.to_string()))
}

/// Decide what to do with an existing container: recreate on image
/// drift, start when stopped, otherwise leave alone.
///
/// Returns the replacement summary when the observed state changed.
async fn reconcile_existing(
  engine: &dyn EngineClient,
  project: &str,
  name: &str,
  service: &Service,
  existing: &ContainerSummary,
  cancel: &CancellationToken,
) -> Result<Option<ContainerSummary>, ServiceError> {
  debug!(service = %name, "service exists, checking for image updates");

  if let Err(err) = engine.pull_image(&service.image, cancel).await {
    if matches!(err, EngineError::Cancelled) {
      return Err(err.into());
    }
    warn!(service = %name, image = %service.image, error = %err, "could not pull image, skipping update check");
    return Ok(None);
  }

  let desired = match engine.inspect_image(&service.image, cancel).await {
    Ok(detail) => detail,
    Err(EngineError::Cancelled) => return Err(EngineError::Cancelled.into()),
    Err(err) => {
      warn!(service = %name, image = %service.image, error = %err, "could not inspect image, skipping update check");
      return Ok(None);
    }
  };

  if existing.image_id != desired.id {
    info!(service = %name, container = %existing.id, "image changed, recreating container");
    engine.stop_container(&existing.id, cancel).await?;
    engine.remove_container(&existing.id, cancel).await?;
    let summary = create_service(engine, project, name, service, cancel).await?;
    return Ok(Some(summary));
  }

  if existing.state != "running" {
    warn!(service = %name, state = %existing.state, "container exists but is not running, starting");
    engine.start_container(&existing.id, cancel).await?;
    let mut updated = existing.clone();
    updated.state = "running".to_string();
    return Ok(Some(updated));
  }

  debug!(service = %name, "service is up to date and running");
  Ok(None)
}

/// Pull, create and start a container for `service`.
async fn create_service(
  engine: &dyn EngineClient,
  project: &str,
  name: &str,
  service: &Service,
  cancel: &CancellationToken,
) -> Result<ContainerSummary, ServiceError> {
  engine
    .pull_image(&service.image, cancel)
    .await
    .map_err(|source| ServiceError::ImagePull {
      image: service.image.clone(),
      source,
    })?;

  let spec = container_spec(project, name, service)?;
  let container_name = spec.name.clone();
  let label_pairs = spec.labels.clone();

  let id = engine.create_container(spec, cancel).await?;
  engine.start_container(&id, cancel).await?;
  info!(service = %name, container = %id, "service created and started");

  Ok(ContainerSummary {
    id,
    name: container_name,
    image: service.image.clone(),
    // Image identity is re-observed from the engine next cycle.
    image_id: String::new(),
    state: "running".to_string(),
    labels: label_pairs.into_iter().collect(),
  })
}

/// Build the creation spec for one service.
fn container_spec(
  project: &str,
  name: &str,
  service: &Service,
) -> Result<ContainerSpec, ServiceError> {
  let ports = parse_port_specs(&service.ports)?;
  let binds = rewrite_binds(project, name, &service.volumes);

  let healthcheck = match &service.healthcheck {
    Some(check) if !check.test.is_empty() => Some(HealthSpec {
      test: check.test.clone(),
      interval: check.interval()?,
      timeout: check.timeout()?,
      retries: check.retries,
      start_period: check.start_period()?,
    }),
    _ => None,
  };

  let endpoints = service
    .networks
    .iter()
    .map(|network| EndpointSpec {
      network: physical_name(project, network),
      aliases: vec![name.to_string()],
    })
    .collect();

  Ok(ContainerSpec {
    name: service.physical_name(name).to_string(),
    image: service.image.clone(),
    env: service.environment.clone(),
    command: service.command.clone(),
    ports,
    binds,
    labels: BTreeMap::from([
      (labels::PROJECT.to_string(), project.to_string()),
      (labels::SERVICE.to_string(), name.to_string()),
    ]),
    healthcheck,
    endpoints,
  })
}

/// Rewrite named-volume binding sources to their physical names; host
/// paths pass through untouched.
fn rewrite_binds(project: &str, service_name: &str, bindings: &[String]) -> Vec<String> {
  let mut binds = Vec::with_capacity(bindings.len());
  for binding in bindings {
    match binding.split_once(':') {
      Some((source, rest)) if is_named_volume(source) => {
        binds.push(format!("{}:{}", physical_name(project, source), rest));
      }
      Some(_) => binds.push(binding.clone()),
      None => {
        warn!(service = %service_name, binding = %binding, "skipping malformed volume binding");
      }
    }
  }
  binds
}

/// Stop and remove containers whose service is no longer declared.
async fn prune_orphans(
  engine: &dyn EngineClient,
  composition: &Composition,
  observed: &BTreeMap<String, ContainerSummary>,
  cancel: &CancellationToken,
) -> Result<(), EngineError> {
  debug!("checking for orphaned services");

  for (service_name, container) in observed {
    if composition.services.contains_key(service_name) {
      continue;
    }
    info!(service = %service_name, container = %container.id, "removing orphaned service");

    match engine.stop_container(&container.id, cancel).await {
      Ok(()) => {}
      Err(EngineError::Cancelled) => return Err(EngineError::Cancelled),
      Err(err) => {
        error!(service = %service_name, error = %err, "failed to stop orphaned container");
        continue;
      }
    }
    match engine.remove_container(&container.id, cancel).await {
      Ok(()) => {}
      Err(EngineError::Cancelled) => return Err(EngineError::Cancelled),
      Err(err) => {
        error!(service = %service_name, error = %err, "failed to remove orphaned container");
      }
    }
  }

  Ok(())
}
