//! Implementation of the `stevedore once` command.
//!
//! Runs a single reconciliation cycle, useful for CI pipelines and
//! for debugging a deployment without starting the loop.

use std::path::Path;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use stevedore_lib::config::load_config;
use stevedore_lib::daemon;
use stevedore_lib::engine::docker::DockerEngine;

/// Execute the once command.
pub fn cmd_once(config_path: &Path) -> Result<()> {
  let config = load_config(config_path).context("failed to load configuration")?;

  let rt = tokio::runtime::Runtime::new().context("failed to create async runtime")?;
  rt.block_on(async {
    let engine = DockerEngine::connect(config.docker_api_version.as_deref())
      .await
      .context("failed to connect to container engine")?;

    let cancel = CancellationToken::new();
    daemon::run_cycle(&config, &engine, &cancel)
      .await
      .context("reconciliation cycle failed")?;
    Ok::<(), anyhow::Error>(())
  })?;

  println!("Reconciliation complete.");
  Ok(())
}
