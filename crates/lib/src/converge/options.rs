//! Per-command options.
//!
//! A concurrency of `0` means one worker per release in a batch.

use crate::plan::NeedsPolicy;

#[derive(Debug, Clone, Default)]
pub struct ApplyOptions {
  pub concurrency: usize,
  pub needs: NeedsPolicy,

  /// Ask for confirmation before acting.
  pub interactive: bool,

  /// Exit with code 2 when any release was changed.
  pub detailed_exitcode: bool,

  /// Roll back instead of upgrading when the requested version is older
  /// than the deployed one and a matching revision exists.
  pub allow_rollback: bool,
}

#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
  pub concurrency: usize,
  pub needs: NeedsPolicy,
  pub interactive: bool,
  pub allow_rollback: bool,
}

#[derive(Debug, Clone, Default)]
pub struct DestroyOptions {
  pub concurrency: usize,
  pub needs: NeedsPolicy,
  pub interactive: bool,
}

#[derive(Debug, Clone, Default)]
pub struct DiffOptions {
  pub concurrency: usize,
  pub needs: NeedsPolicy,

  /// Turn every changed release into a change-detected error.
  pub detailed_exitcode: bool,

  /// Report rollbacks where `apply --allow-rollback` would do one.
  pub allow_rollback: bool,
}

/// Options for `status`, `test`, `lint` and `template`.
#[derive(Debug, Clone, Default)]
pub struct ReleaseOpOptions {
  pub concurrency: usize,
  pub needs: NeedsPolicy,
}
