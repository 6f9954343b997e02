//! Repository sync barrier.
//!
//! Guarantees each chart repository is synced at most once per invocation,
//! however many documents or batches reference it concurrently.

use std::collections::HashSet;
use std::future::Future;

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::release::RepositorySpec;

#[derive(Debug, Default)]
pub struct RepoSyncBarrier {
  synced: Mutex<HashSet<String>>,
}

impl RepoSyncBarrier {
  pub fn new() -> Self {
    Self::default()
  }

  /// Sync the repositories in `repos` that were not synced yet.
  ///
  /// The lock is held across the membership check, the `sync` call and the
  /// marking, so two callers never sync the same repository. When `sync`
  /// fails nothing is marked and a later call retries. Returns the names
  /// that were synced by this call.
  pub async fn sync_once<F, Fut, E>(&self, repos: &[RepositorySpec], sync: F) -> Result<Vec<String>, E>
  where
    F: FnOnce(Vec<RepositorySpec>) -> Fut,
    Fut: Future<Output = Result<(), E>>,
  {
    let mut synced = self.synced.lock().await;

    let mut seen = HashSet::new();
    let pending: Vec<RepositorySpec> = repos
      .iter()
      .filter(|repo| !synced.contains(&repo.name) && seen.insert(repo.name.clone()))
      .cloned()
      .collect();

    if pending.is_empty() {
      debug!(requested = repos.len(), "repositories already synced");
      return Ok(Vec::new());
    }

    let names: Vec<String> = pending.iter().map(|repo| repo.name.clone()).collect();
    info!(repositories = %names.join(", "), "syncing repositories");
    sync(pending).await?;

    synced.extend(names.iter().cloned());
    Ok(names)
  }

  pub async fn is_synced(&self, name: &str) -> bool {
    self.synced.lock().await.contains(name)
  }
}
