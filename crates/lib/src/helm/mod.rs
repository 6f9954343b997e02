//! Helm collaborator interface.
//!
//! The engine never shells out by itself. Everything that talks to a cluster
//! or a chart goes through [`DiffOracle`] and [`HelmExec`], implemented for
//! real by [`HelmCli`] and by scripted fakes in tests.

pub mod cli;

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::release::{ReleaseSpec, RepositorySpec};

pub use cli::HelmCli;

#[derive(Debug, Error)]
pub enum HelmError {
  #[error("failed to run {binary}: {source}")]
  Spawn {
    binary: String,
    #[source]
    source: std::io::Error,
  },

  #[error("`{command}` failed with {status}: {stderr}")]
  Command {
    command: String,
    status: String,
    stderr: String,
  },

  #[error("failed to parse output of `{command}`: {source}")]
  Parse {
    command: String,
    #[source]
    source: serde_json::Error,
  },

  #[error("{0}")]
  Other(String),
}

/// Per-call settings for release-scoped Helm invocations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HelmContext {
  /// Kube context to target; empty means the current one.
  pub kube_context: String,

  /// Index of the pool worker issuing the call.
  pub worker: usize,

  /// Directory relative chart paths resolve against.
  pub working_dir: PathBuf,
}

impl HelmContext {
  pub fn for_release(release: &ReleaseSpec, worker: usize, working_dir: impl Into<PathBuf>) -> Self {
    Self {
      kube_context: release.context.clone(),
      worker,
      working_dir: working_dir.into(),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffOutcome {
  Unchanged,
  Changed,
}

impl DiffOutcome {
  pub fn is_changed(&self) -> bool {
    matches!(self, DiffOutcome::Changed)
  }
}

/// One entry of a release's history, newest last.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revision {
  pub revision: u64,
  pub chart_version: String,
  pub status: String,
}

impl Revision {
  pub fn is_deployed(&self) -> bool {
    self.status == "deployed"
  }
}

#[async_trait]
pub trait DiffOracle: Send + Sync {
  /// Compare the desired release against what is deployed.
  async fn diff(&self, release: &ReleaseSpec, ctx: &HelmContext) -> Result<DiffOutcome, HelmError>;
}

#[async_trait]
pub trait HelmExec: Send + Sync {
  async fn sync_repositories(&self, repos: &[RepositorySpec]) -> Result<(), HelmError>;

  /// Install or upgrade.
  async fn upgrade(&self, release: &ReleaseSpec, ctx: &HelmContext) -> Result<(), HelmError>;

  async fn rollback(&self, release: &ReleaseSpec, revision: u64, ctx: &HelmContext) -> Result<(), HelmError>;

  async fn delete(&self, release: &ReleaseSpec, ctx: &HelmContext) -> Result<(), HelmError>;

  async fn is_deployed(&self, release: &ReleaseSpec, ctx: &HelmContext) -> Result<bool, HelmError>;

  async fn history(&self, release: &ReleaseSpec, ctx: &HelmContext) -> Result<Vec<Revision>, HelmError>;

  async fn status(&self, release: &ReleaseSpec, ctx: &HelmContext) -> Result<String, HelmError>;

  async fn test(&self, release: &ReleaseSpec, ctx: &HelmContext) -> Result<String, HelmError>;

  async fn lint(&self, release: &ReleaseSpec, ctx: &HelmContext) -> Result<String, HelmError>;

  async fn template(&self, release: &ReleaseSpec, ctx: &HelmContext) -> Result<String, HelmError>;
}

/// Both halves of the collaborator.
pub trait Helm: DiffOracle + HelmExec {}

impl<T: DiffOracle + HelmExec + ?Sized> Helm for T {}
