//! Implementation of the `stevedore health` command.
//!
//! One-shot engine ping: exit 0 when the engine answers, 1 otherwise.
//! Intended as a container HEALTHCHECK for the daemon itself.

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use stevedore_lib::engine::docker::DockerEngine;
use stevedore_lib::engine::EngineClient;

/// Execute the health command.
pub fn cmd_health() -> Result<()> {
  let rt = tokio::runtime::Runtime::new().context("failed to create async runtime")?;
  rt.block_on(async {
    let engine = DockerEngine::connect(None)
      .await
      .context("could not create engine client")?;
    engine
      .ping(&CancellationToken::new())
      .await
      .context("could not ping container engine")?;
    Ok::<_, anyhow::Error>(())
  })?;

  println!("Engine reachable.");
  Ok(())
}
