//! One reconciliation cycle against the container engine.
//!
//! [`apply`] converges volumes, then networks, then services. Volume
//! and network failures are logged and do not block the services
//! phase; a failure to observe containers or to order the services
//! aborts the services phase but leaves earlier phases applied. The
//! cycle never rolls anything back; the next cycle retries.

pub mod networks;
pub mod services;
pub mod volumes;

use std::collections::BTreeMap;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::compose::Composition;
use crate::engine::{labels, project_selector, ContainerSummary, EngineClient, EngineError};
use crate::order::OrderError;

pub use networks::reconcile_networks;
pub use services::reconcile_services;
pub use volumes::reconcile_volumes;

/// Errors that abort (part of) a cycle.
#[derive(Debug, Error)]
pub enum ApplyError {
  #[error("failed to resolve service order: {0}")]
  Order(#[from] OrderError),

  #[error(transparent)]
  Engine(#[from] EngineError),
}

/// Run one full reconciliation of `composition` under `project`.
pub async fn apply(
  engine: &dyn EngineClient,
  project: &str,
  composition: &Composition,
  cancel: &CancellationToken,
) -> Result<(), ApplyError> {
  if let Err(err) = reconcile_volumes(engine, project, &composition.volumes, cancel).await {
    if matches!(err, EngineError::Cancelled) {
      return Err(err.into());
    }
    warn!(error = %err, "volume reconciliation failed, continuing");
  }

  if let Err(err) = reconcile_networks(engine, project, &composition.networks, cancel).await {
    if matches!(err, EngineError::Cancelled) {
      return Err(err.into());
    }
    warn!(error = %err, "network reconciliation failed, continuing");
  }

  let observed = observe_containers(engine, project, cancel).await?;
  info!(project = %project, containers = observed.len(), "observed project containers");

  reconcile_services(engine, project, composition, observed, cancel).await
}

/// Build the observed-container map, keyed by the service label.
///
/// Containers without a service label are outside the reconciler's
/// ownership model and are ignored entirely.
async fn observe_containers(
  engine: &dyn EngineClient,
  project: &str,
  cancel: &CancellationToken,
) -> Result<BTreeMap<String, ContainerSummary>, EngineError> {
  let listed = engine
    .list_containers(&project_selector(project), cancel)
    .await?;

  let mut observed = BTreeMap::new();
  for container in listed {
    let service = container.labels.get(labels::SERVICE).cloned();
    match service {
      Some(service) if !service.is_empty() => {
        debug!(service = %service, container = %container.id, "found existing container");
        observed.insert(service, container);
      }
      _ => {}
    }
  }
  Ok(observed)
}
