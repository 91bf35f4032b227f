//! Named-volume convergence for one project.

use std::collections::BTreeMap;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::compose::Volume;
use crate::engine::{
  labels, physical_name, project_selector, EngineClient, EngineError, VolumeRecord, VolumeSpec,
};

/// Converge the project's named volumes onto the declared set.
///
/// External volumes are never created nor removed. Creation is
/// idempotent: an already-exists answer from the engine counts as
/// success. Removal failures are logged and do not abort the cycle.
pub async fn reconcile_volumes(
  engine: &dyn EngineClient,
  project: &str,
  volumes: &BTreeMap<String, Volume>,
  cancel: &CancellationToken,
) -> Result<(), EngineError> {
  debug!("reconciling volumes");

  let observed = engine
    .list_volumes(&project_selector(project), cancel)
    .await?;

  let mut observed_by_name: BTreeMap<&str, &VolumeRecord> = BTreeMap::new();
  for record in &observed {
    if let Some(logical) = record.labels.get(labels::VOLUME) {
      observed_by_name.insert(logical.as_str(), record);
    }
  }

  for (name, volume) in volumes {
    if volume.external {
      info!(volume = %name, "skipping external volume");
      continue;
    }
    if observed_by_name.contains_key(name.as_str()) {
      continue;
    }

    let full_name = physical_name(project, name);
    let spec = VolumeSpec {
      driver: volume.driver.clone(),
      labels: BTreeMap::from([
        (labels::PROJECT.to_string(), project.to_string()),
        (labels::VOLUME.to_string(), name.clone()),
      ]),
    };
    match engine.create_volume(&full_name, spec, cancel).await {
      Ok(()) => info!(volume = %full_name, "volume created"),
      Err(EngineError::Conflict(_)) => info!(volume = %full_name, "volume already exists"),
      Err(EngineError::Cancelled) => return Err(EngineError::Cancelled),
      Err(err) => warn!(volume = %full_name, error = %err, "could not create volume"),
    }
  }

  for (logical, record) in &observed_by_name {
    if volumes.contains_key(*logical) {
      continue;
    }
    info!(volume = %record.name, "removing orphaned volume");
    match engine.remove_volume(&record.name, true, cancel).await {
      Ok(()) => {}
      Err(EngineError::Cancelled) => return Err(EngineError::Cancelled),
      Err(err) => warn!(volume = %record.name, error = %err, "failed to remove orphaned volume"),
    }
  }

  Ok(())
}
