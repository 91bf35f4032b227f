//! Network convergence for one project.

use std::collections::BTreeMap;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::compose::Network;
use crate::engine::{
  labels, physical_name, project_selector, EngineClient, EngineError, NetworkRecord, NetworkSpec,
};

/// Converge the project's networks onto the declared set.
///
/// Same shape as the volume pass, with one extra rule: an observed
/// network carrying the project label but no network label is treated
/// as unmanaged and is never removed.
pub async fn reconcile_networks(
  engine: &dyn EngineClient,
  project: &str,
  networks: &BTreeMap<String, Network>,
  cancel: &CancellationToken,
) -> Result<(), EngineError> {
  debug!("reconciling networks");

  let observed = engine
    .list_networks(&project_selector(project), cancel)
    .await?;

  let mut observed_by_name: BTreeMap<&str, &NetworkRecord> = BTreeMap::new();
  for record in &observed {
    match record.labels.get(labels::NETWORK) {
      Some(logical) => {
        observed_by_name.insert(logical.as_str(), record);
      }
      None => debug!(network = %record.name, "ignoring unmanaged network"),
    }
  }

  for (name, network) in networks {
    if network.external {
      info!(network = %name, "skipping external network");
      continue;
    }
    if observed_by_name.contains_key(name.as_str()) {
      continue;
    }

    let full_name = physical_name(project, name);
    let spec = NetworkSpec {
      driver: network.driver.clone(),
      labels: BTreeMap::from([
        (labels::PROJECT.to_string(), project.to_string()),
        (labels::NETWORK.to_string(), name.clone()),
      ]),
    };
    match engine.create_network(&full_name, spec, cancel).await {
      Ok(_) => info!(network = %full_name, "network created"),
      Err(EngineError::Conflict(_)) => info!(network = %full_name, "network already exists"),
      Err(EngineError::Cancelled) => return Err(EngineError::Cancelled),
      Err(err) => warn!(network = %full_name, error = %err, "could not create network"),
    }
  }

  for (logical, record) in &observed_by_name {
    if networks.contains_key(*logical) {
      continue;
    }
    info!(network = %record.name, "removing orphaned network");
    match engine.remove_network(&record.id, cancel).await {
      Ok(()) => {}
      Err(EngineError::Cancelled) => return Err(EngineError::Cancelled),
      Err(err) => warn!(network = %record.name, error = %err, "failed to remove orphaned network"),
    }
  }

  Ok(())
}
