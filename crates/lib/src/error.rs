//! Error taxonomy and exit codes.
//!
//! Per-release failures are [`ReleaseError`]s. They are either the diff
//! oracle's "changes detected" signal or fatal. An [`AggregateError`] wraps
//! one or more of them and derives a single exit code. [`RunError`] is what
//! a whole command returns.

use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::converge::affected::AffectedSummary;
use crate::helm::HelmError;
use crate::plan::PlanError;
use crate::release::{ReleaseId, ResolveError, SelectorError};
use crate::state::StateError;

pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_FAILURE: i32 = 1;
pub const EXIT_DIFF_DETECTED: i32 = 2;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Outcome of a single release when it is not plain success.
#[derive(Debug, Error)]
pub enum ReleaseError {
  #[error("release \"{id}\" has changes")]
  ChangeDetected { id: ReleaseId },

  #[error("release \"{id}\" failed: {source}")]
  Fatal {
    id: ReleaseId,
    #[source]
    source: BoxError,
  },
}

impl ReleaseError {
  pub fn fatal(id: ReleaseId, source: impl Into<BoxError>) -> Self {
    ReleaseError::Fatal {
      id,
      source: source.into(),
    }
  }

  pub fn id(&self) -> &ReleaseId {
    match self {
      ReleaseError::ChangeDetected { id } | ReleaseError::Fatal { id, .. } => id,
    }
  }

  pub fn is_change_detected(&self) -> bool {
    matches!(self, ReleaseError::ChangeDetected { .. })
  }

  pub fn exit_code(&self) -> i32 {
    match self {
      ReleaseError::ChangeDetected { .. } => EXIT_DIFF_DETECTED,
      ReleaseError::Fatal { .. } => EXIT_FAILURE,
    }
  }
}

/// A non-empty set of release errors.
#[derive(Debug)]
pub struct AggregateError {
  errors: Vec<ReleaseError>,
}

impl AggregateError {
  /// Wrap release errors.
  ///
  /// # Panics
  ///
  /// Panics when `errors` is empty. An aggregate without causes would report
  /// failure for an operation that did not fail.
  pub fn new(errors: Vec<ReleaseError>) -> Self {
    assert!(!errors.is_empty(), "aggregate error requires at least one release error");
    Self { errors }
  }

  /// `None` when there is nothing to aggregate.
  pub fn from_errors(errors: Vec<ReleaseError>) -> Option<Self> {
    if errors.is_empty() { None } else { Some(Self { errors }) }
  }

  pub fn errors(&self) -> &[ReleaseError] {
    &self.errors
  }

  pub fn into_errors(self) -> Vec<ReleaseError> {
    self.errors
  }

  pub fn len(&self) -> usize {
    self.errors.len()
  }

  pub fn is_empty(&self) -> bool {
    self.errors.is_empty()
  }

  pub fn merge(&mut self, other: AggregateError) {
    self.errors.extend(other.errors);
  }

  /// True when every cause is a detected change.
  pub fn is_change_detected(&self) -> bool {
    self.errors.iter().all(ReleaseError::is_change_detected)
  }

  pub fn exit_code(&self) -> i32 {
    if self.is_change_detected() {
      EXIT_DIFF_DETECTED
    } else {
      EXIT_FAILURE
    }
  }
}

impl fmt::Display for AggregateError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if let [only] = self.errors.as_slice() {
      return write!(f, "{only}");
    }

    write!(f, "{} release errors:", self.errors.len())?;
    for (idx, err) in self.errors.iter().enumerate() {
      write!(f, "\n  {}. {err}", idx + 1)?;
    }
    Ok(())
  }
}

impl std::error::Error for AggregateError {}

/// Top-level failure of a command.
#[derive(Debug, Error)]
pub enum RunError {
  #[error("no releases found that match the selectors {selectors}")]
  NoMatchingReleases { selectors: String },

  #[error("in {}: {source}", path.display())]
  Selector {
    path: PathBuf,
    #[source]
    source: SelectorError,
  },

  #[error("in {}: {source}", path.display())]
  Resolve {
    path: PathBuf,
    #[source]
    source: ResolveError,
  },

  #[error("in {}: {source}", path.display())]
  Plan {
    path: PathBuf,
    #[source]
    source: PlanError,
  },

  #[error(transparent)]
  State(#[from] StateError),

  #[error("in {}: failed to sync repositories: {source}", path.display())]
  RepoSync {
    path: PathBuf,
    #[source]
    source: HelmError,
  },

  #[error("in {}: failed to stage values for release \"{release}\": {source}", path.display())]
  Staging {
    path: PathBuf,
    release: ReleaseId,
    #[source]
    source: io::Error,
  },

  #[error("confirmation prompt failed: {0}")]
  Prompt(#[source] io::Error),

  #[error("operation cancelled")]
  Cancelled,

  #[error("in {}: {source}", path.display())]
  Releases {
    path: PathBuf,
    #[source]
    source: AggregateError,
    summary: AffectedSummary,
  },

  #[error("{}", render_numbered(.0))]
  Documents(Vec<RunError>),
}

fn render_numbered(errors: &[RunError]) -> String {
  let mut out = format!("{} documents failed:", errors.len());
  for (idx, err) in errors.iter().enumerate() {
    out.push_str(&format!("\n  {}. {err}", idx + 1));
  }
  out
}

impl RunError {
  pub fn exit_code(&self) -> i32 {
    match self {
      RunError::Releases { source, .. } => source.exit_code(),
      RunError::Documents(errors) => {
        if !errors.is_empty() && errors.iter().all(|e| e.exit_code() == EXIT_DIFF_DETECTED) {
          EXIT_DIFF_DETECTED
        } else {
          EXIT_FAILURE
        }
      }
      _ => EXIT_FAILURE,
    }
  }

  /// Summary of what was done before the failure, if any.
  pub fn summary(&self) -> Option<&AffectedSummary> {
    match self {
      RunError::Releases { summary, .. } => Some(summary),
      _ => None,
    }
  }

  /// Combine per-document failures into one error.
  pub fn combine(mut errors: Vec<RunError>) -> Option<RunError> {
    match errors.len() {
      0 => None,
      1 => errors.pop(),
      _ => Some(RunError::Documents(errors)),
    }
  }
}
