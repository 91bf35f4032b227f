//! Implementation of the `stevedore run` command.
//!
//! Runs the reconciliation loop in the foreground until SIGINT or
//! SIGTERM, then exits cleanly.

use std::path::Path;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::info;

use stevedore_lib::config::load_config;
use stevedore_lib::daemon;
use stevedore_lib::engine::docker::DockerEngine;

/// Execute the run command.
pub fn cmd_run(config_path: &Path) -> Result<()> {
  let config = load_config(config_path).context("failed to load configuration")?;

  let rt = tokio::runtime::Runtime::new().context("failed to create async runtime")?;
  rt.block_on(async {
    let engine = DockerEngine::connect(config.docker_api_version.as_deref())
      .await
      .context("failed to connect to container engine")?;

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_signal(cancel.clone()));

    daemon::run(&config, &engine, &cancel).await;
    Ok(())
  })
}

/// Cancel the token when SIGINT or SIGTERM arrives.
async fn cancel_on_signal(cancel: CancellationToken) {
  let ctrl_c = async {
    tokio::signal::ctrl_c()
      .await
      .expect("failed to install Ctrl+C handler");
  };

  #[cfg(unix)]
  let terminate = async {
    tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
      .expect("failed to install signal handler")
      .recv()
      .await;
  };

  #[cfg(not(unix))]
  let terminate = std::future::pending::<()>();

  tokio::select! {
    _ = ctrl_c => info!("received Ctrl+C, shutting down"),
    _ = terminate => info!("received terminate signal, shutting down"),
  }
  cancel.cancel();
}
