//! The periodic reconciliation loop.
//!
//! One cycle: synchronize the deployment repository, parse the
//! manifest at the current commit, apply it to the engine. The repo
//! update only changes what gets logged; the engine may have drifted
//! without a commit, so reconciliation runs every cycle regardless.
//!
//! Cycles never overlap: the loop runs them serially and a tick firing
//! mid-cycle is coalesced by the interval's delayed tick behavior.

use std::time::Duration;

use thiserror::Error;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::compose::{self, ComposeError};
use crate::config::Config;
use crate::engine::EngineClient;
use crate::reconcile::{self, ApplyError};
use crate::repo::{self, SyncError};

/// Errors that end one cycle early. The loop logs them and retries on
/// the next tick.
#[derive(Debug, Error)]
pub enum CycleError {
  #[error("repository sync failed: {0}")]
  Sync(#[from] SyncError),

  #[error("invalid composition: {0}")]
  Compose(#[from] ComposeError),

  #[error(transparent)]
  Apply(#[from] ApplyError),
}

/// Run a single reconciliation cycle.
pub async fn run_cycle(
  config: &Config,
  engine: &dyn EngineClient,
  cancel: &CancellationToken,
) -> Result<(), CycleError> {
  match repo::sync_repo(config)? {
    Some(update) if update.was_cloned => {
      info!(commit = %update.new_hash, "repository cloned, starting deployment");
    }
    Some(update) => {
      info!(
        old = update.old_hash.as_deref().unwrap_or(""),
        new = %update.new_hash,
        "changes detected, starting deployment"
      );
    }
    None => {
      info!("no repository changes detected, ensuring services are reconciled");
    }
  }

  let composition = compose::load_composition(&config.compose_path())?;
  info!(
    services = composition.services.len(),
    networks = composition.networks.len(),
    volumes = composition.volumes.len(),
    "parsed compose manifest"
  );

  let project = config.project_name();
  info!(project = %project, "applying composition");
  reconcile::apply(engine, &project, &composition, cancel).await?;

  info!("reconciliation cycle complete");
  Ok(())
}

/// Run the reconciliation loop until cancellation.
///
/// Performs one cycle immediately, then one per `check_interval`
/// seconds. Cycle failures are logged; the loop keeps going.
pub async fn run(config: &Config, engine: &dyn EngineClient, cancel: &CancellationToken) {
  info!(interval_secs = config.check_interval, "starting reconciliation loop");

  let mut ticker = tokio::time::interval(Duration::from_secs(config.check_interval));
  ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
  // The first tick completes immediately; consume it so the periodic
  // ticks start one full interval from now.
  ticker.tick().await;

  info!("performing initial reconciliation");
  if let Err(err) = run_cycle(config, engine, cancel).await {
    error!(error = %err, "reconciliation cycle failed");
  }

  loop {
    tokio::select! {
      _ = cancel.cancelled() => {
        info!("shutdown requested, exiting reconciliation loop");
        return;
      }
      _ = ticker.tick() => {
        info!("running periodic reconciliation");
        if let Err(err) = run_cycle(config, engine, cancel).await {
          error!(error = %err, "reconciliation cycle failed");
        }
      }
    }
  }
}
