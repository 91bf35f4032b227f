//! stevedore: git-driven continuous deployment for container workloads.
//!
//! Provides the `stevedore` command with subcommands:
//! - `stevedore run` - watch the repository and reconcile continuously
//! - `stevedore once` - run a single reconciliation cycle and exit
//! - `stevedore health` - check that the container engine is reachable

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

mod cmd;

#[derive(Parser)]
#[command(name = "stevedore")]
#[command(author, version, about = "Git-driven continuous deployment for container workloads")]
struct Cli {
  /// Enable verbose output
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Watch the repository and reconcile continuously
  Run {
    /// Path to the configuration file
    #[arg(long, default_value = stevedore_lib::config::DEFAULT_CONFIG_FILE)]
    config: PathBuf,
  },

  /// Run a single reconciliation cycle and exit
  Once {
    /// Path to the configuration file
    #[arg(long, default_value = stevedore_lib::config::DEFAULT_CONFIG_FILE)]
    config: PathBuf,
  },

  /// Check that the container engine is reachable
  Health,
}

fn main() -> Result<()> {
  let cli = Cli::parse();

  let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
  FmtSubscriber::builder()
    .with_max_level(level)
    .with_target(false)
    .init();

  match cli.command {
    Commands::Run { config } => cmd::cmd_run(&config),
    Commands::Once { config } => cmd::cmd_once(&config),
    Commands::Health => cmd::cmd_health(),
  }
}
