//! Invocation context.
//!
//! One [`Context`] lives for exactly one command invocation. It owns the
//! cancellation token, the repository sync barrier, the scratch directory
//! for staged values and a list of deferred cleanup tasks. Everything it
//! owns is released when the last `Arc` is dropped, whichever way the
//! command ended.

use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex};

use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::repo::RepoSyncBarrier;

type CleanupTask = Box<dyn FnOnce() + Send>;

pub struct Context {
  cancel: CancellationToken,
  repos: RepoSyncBarrier,
  scratch: TempDir,
  cleanup: Mutex<Vec<CleanupTask>>,
}

impl Context {
  pub fn new() -> io::Result<Arc<Self>> {
    Self::with_token(CancellationToken::new())
  }

  /// Build a context driven by an externally owned cancellation token.
  pub fn with_token(cancel: CancellationToken) -> io::Result<Arc<Self>> {
    let scratch = tempfile::Builder::new().prefix("stevedore-").tempdir()?;
    debug!(scratch = %scratch.path().display(), "created scratch directory");

    Ok(Arc::new(Self {
      cancel,
      repos: RepoSyncBarrier::new(),
      scratch,
      cleanup: Mutex::new(Vec::new()),
    }))
  }

  pub fn cancel_token(&self) -> &CancellationToken {
    &self.cancel
  }

  pub fn cancel(&self) {
    self.cancel.cancel();
  }

  pub fn is_cancelled(&self) -> bool {
    self.cancel.is_cancelled()
  }

  pub fn repos(&self) -> &RepoSyncBarrier {
    &self.repos
  }

  /// Directory for files that must not outlive the invocation.
  pub fn scratch_dir(&self) -> &Path {
    self.scratch.path()
  }

  /// Register a task to run when the context is dropped.
  ///
  /// Tasks run in reverse registration order.
  pub fn defer(&self, task: impl FnOnce() + Send + 'static) {
    self
      .cleanup
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .push(Box::new(task));
  }
}

impl std::fmt::Debug for Context {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Context")
      .field("cancelled", &self.is_cancelled())
      .field("scratch", &self.scratch.path())
      .finish_non_exhaustive()
  }
}

impl Drop for Context {
  fn drop(&mut self) {
    let tasks = std::mem::take(self.cleanup.get_mut().unwrap_or_else(|e| e.into_inner()));
    debug!(tasks = tasks.len(), "running deferred cleanup");
    for task in tasks.into_iter().rev() {
      task();
    }
  }
}
