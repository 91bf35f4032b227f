//! Deployment-repository synchronization.
//!
//! Each cycle the deployment directory is brought up to date with the
//! tracked branch: cloned when absent, otherwise fetched and
//! hard-reset onto `origin/<branch>` when the remote moved.
//! Authentication prefers a running SSH agent and falls back to the
//! configured key file, mirroring common CI setups.

use std::path::PathBuf;

use git2::build::{CheckoutBuilder, RepoBuilder};
use git2::{Cred, CredentialType, ErrorCode, FetchOptions, RemoteCallbacks, Repository, ResetType};
use thiserror::Error;
use tracing::{debug, info};

use crate::config::Config;

/// Result of one synchronization; `None` from [`sync_repo`] means the
/// checkout was already up to date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoUpdate {
  /// True when the repository was cloned fresh this cycle.
  pub was_cloned: bool,
  /// Commit the checkout was at before the update; `None` on clone.
  pub old_hash: Option<String>,
  /// Commit the checkout is at now.
  pub new_hash: String,
}

/// Errors raised during repository synchronization.
#[derive(Debug, Error)]
pub enum SyncError {
  #[error("failed to open repository at '{path}': {source}")]
  Open {
    path: PathBuf,
    #[source]
    source: git2::Error,
  },

  #[error("failed to clone '{url}': {source}")]
  Clone {
    url: String,
    #[source]
    source: git2::Error,
  },

  #[error("failed to fetch from origin: {0}")]
  Fetch(#[source] git2::Error),

  #[error("branch '{branch}' not found on origin: {source}")]
  BranchNotFound {
    branch: String,
    #[source]
    source: git2::Error,
  },

  #[error("failed to resolve HEAD: {0}")]
  Head(#[source] git2::Error),

  #[error("failed to check out '{branch}': {source}")]
  Checkout {
    branch: String,
    #[source]
    source: git2::Error,
  },
}

fn remote_callbacks(ssh_key_path: Option<PathBuf>) -> RemoteCallbacks<'static> {
  let mut callbacks = RemoteCallbacks::new();
  let mut agent_tried = false;

  callbacks.credentials(move |_url, username_from_url, allowed| {
    let username = username_from_url.unwrap_or("git");

    if allowed.contains(CredentialType::SSH_KEY) {
      let agent_available = std::env::var_os("SSH_AUTH_SOCK").is_some();
      if agent_available && !agent_tried {
        agent_tried = true;
        debug!("ssh agent detected, attempting agent authentication");
        return Cred::ssh_key_from_agent(username);
      }
      if let Some(key) = &ssh_key_path {
        debug!(path = %key.display(), "using ssh key file for authentication");
        return Cred::ssh_key(username, None, key, None);
      }
      return Err(git2::Error::from_str(
        "no SSH agent found and ssh_key_path is not configured",
      ));
    }

    Cred::default()
  });

  callbacks
}

fn fetch_options(ssh_key_path: Option<PathBuf>) -> FetchOptions<'static> {
  let mut options = FetchOptions::new();
  options.remote_callbacks(remote_callbacks(ssh_key_path));
  options
}

/// Bring the deployment directory up to date with the tracked branch.
///
/// Returns `Ok(None)` when nothing changed, `Ok(Some(update))` after a
/// clone or an update.
pub fn sync_repo(config: &Config) -> Result<Option<RepoUpdate>, SyncError> {
  match Repository::open(&config.deployment_dir) {
    Ok(repo) => fetch_and_update(&repo, config),
    Err(err) if err.code() == ErrorCode::NotFound => clone_repo(config).map(Some),
    Err(err) => Err(SyncError::Open {
      path: config.deployment_dir.clone(),
      source: err,
    }),
  }
}

fn clone_repo(config: &Config) -> Result<RepoUpdate, SyncError> {
  info!(
    url = %config.repo_url,
    dir = %config.deployment_dir.display(),
    "repository not found, cloning"
  );

  let repo = RepoBuilder::new()
    .branch(&config.target_branch)
    .fetch_options(fetch_options(config.ssh_key_path.clone()))
    .clone(&config.repo_url, &config.deployment_dir)
    .map_err(|e| SyncError::Clone {
      url: config.repo_url.clone(),
      source: e,
    })?;

  let head = head_commit(&repo)?;
  info!(commit = %head, "clone complete");

  Ok(RepoUpdate {
    was_cloned: true,
    old_hash: None,
    new_hash: head,
  })
}

fn head_commit(repo: &Repository) -> Result<String, SyncError> {
  let head = repo
    .head()
    .and_then(|r| r.peel_to_commit())
    .map_err(SyncError::Head)?;
  Ok(head.id().to_string())
}

fn fetch_and_update(repo: &Repository, config: &Config) -> Result<Option<RepoUpdate>, SyncError> {
  debug!(dir = %config.deployment_dir.display(), "repository found, fetching updates");

  let old_hash = head_commit(repo)?;

  let mut remote = repo.find_remote("origin").map_err(SyncError::Fetch)?;
  remote
    .fetch(
      &[config.target_branch.as_str()],
      Some(&mut fetch_options(config.ssh_key_path.clone())),
      None,
    )
    .map_err(SyncError::Fetch)?;

  let remote_ref = format!("refs/remotes/origin/{}", config.target_branch);
  let target = repo
    .find_reference(&remote_ref)
    .and_then(|r| r.peel_to_commit())
    .map_err(|e| SyncError::BranchNotFound {
      branch: config.target_branch.clone(),
      source: e,
    })?;
  let new_hash = target.id().to_string();

  if old_hash == new_hash {
    debug!("repository already up to date");
    return Ok(None);
  }

  info!(old = %old_hash, new = %new_hash, "updating repository");

  let checkout_err = |e| SyncError::Checkout {
    branch: config.target_branch.clone(),
    source: e,
  };

  // Force-update the local branch, point HEAD at it, then hard-reset
  // the worktree onto the fetched commit.
  repo
    .branch(&config.target_branch, &target, true)
    .map_err(checkout_err)?;
  repo
    .set_head(&format!("refs/heads/{}", config.target_branch))
    .map_err(checkout_err)?;
  repo
    .reset(
      target.as_object(),
      ResetType::Hard,
      Some(CheckoutBuilder::new().force()),
    )
    .map_err(checkout_err)?;

  info!("update complete");

  Ok(Some(RepoUpdate {
    was_cloned: false,
    old_hash: Some(old_hash),
    new_hash,
  }))
}
