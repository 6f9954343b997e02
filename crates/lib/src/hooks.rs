//! Release lifecycle hooks.
//!
//! Hooks are plain processes declared on a release. They run with the state
//! document's directory as working directory; the process-wide working
//! directory is never touched, so documents can be converged in parallel.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::str::FromStr;

use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

use crate::release::{HookDef, ReleaseId, ReleaseSpec};

pub const ENV_RELEASE_NAME: &str = "STEVEDORE_RELEASE_NAME";
pub const ENV_RELEASE_NAMESPACE: &str = "STEVEDORE_RELEASE_NAMESPACE";
pub const ENV_RELEASE_CONTEXT: &str = "STEVEDORE_RELEASE_CONTEXT";
pub const ENV_HOOK_EVENT: &str = "STEVEDORE_HOOK_EVENT";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookEvent {
  /// Before anything touches the cluster.
  Prepare,
  /// Before a release is acted upon by `apply`.
  PreApply,
  /// Before a release is acted upon by `sync`.
  PreSync,
  PreUninstall,
  PostUninstall,
  /// After an upgrade or rollback.
  PostSync,
  /// Always last, whether or not anything happened.
  Cleanup,
}

impl HookEvent {
  pub const ALL: [HookEvent; 7] = [
    HookEvent::Prepare,
    HookEvent::PreApply,
    HookEvent::PreSync,
    HookEvent::PreUninstall,
    HookEvent::PostUninstall,
    HookEvent::PostSync,
    HookEvent::Cleanup,
  ];

  pub fn as_str(&self) -> &'static str {
    match self {
      HookEvent::Prepare => "prepare",
      HookEvent::PreApply => "preapply",
      HookEvent::PreSync => "presync",
      HookEvent::PreUninstall => "preuninstall",
      HookEvent::PostUninstall => "postuninstall",
      HookEvent::PostSync => "postsync",
      HookEvent::Cleanup => "cleanup",
    }
  }
}

impl fmt::Display for HookEvent {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for HookEvent {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    HookEvent::ALL
      .into_iter()
      .find(|event| event.as_str() == s)
      .ok_or_else(|| format!("unknown hook event: {s}"))
  }
}

#[derive(Debug, Error)]
pub enum HookError {
  #[error("{event} hook \"{hook}\" of release \"{release}\" could not be started: {source}")]
  Spawn {
    release: ReleaseId,
    event: HookEvent,
    hook: String,
    #[source]
    source: std::io::Error,
  },

  #[error("{event} hook \"{hook}\" of release \"{release}\" exited with {status}: {stderr}")]
  Failed {
    release: ReleaseId,
    event: HookEvent,
    hook: String,
    status: String,
    stderr: String,
  },
}

/// Fires hooks for releases of one state document.
#[derive(Debug, Clone)]
pub struct HookRunner {
  base_dir: PathBuf,
}

impl HookRunner {
  pub fn new(base_dir: impl Into<PathBuf>) -> Self {
    Self {
      base_dir: base_dir.into(),
    }
  }

  pub fn base_dir(&self) -> &Path {
    &self.base_dir
  }

  /// Run every hook of `release` registered for `event`, in declaration order.
  ///
  /// The first failing hook aborts the rest. Returns how many hooks ran.
  pub async fn fire(&self, release: &ReleaseSpec, event: HookEvent) -> Result<usize, HookError> {
    let mut fired = 0;
    for hook in release.hooks_for(event.as_str()) {
      self.run_hook(release, event, hook).await?;
      fired += 1;
    }
    Ok(fired)
  }

  async fn run_hook(&self, release: &ReleaseSpec, event: HookEvent, hook: &HookDef) -> Result<(), HookError> {
    let label = hook.name.clone().unwrap_or_else(|| hook.command.clone());
    debug!(release = %release.id(), %event, hook = %label, "running hook");

    let output = Command::new(&hook.command)
      .args(&hook.args)
      .current_dir(&self.base_dir)
      .env(ENV_RELEASE_NAME, &release.name)
      .env(ENV_RELEASE_NAMESPACE, &release.namespace)
      .env(ENV_RELEASE_CONTEXT, &release.context)
      .env(ENV_HOOK_EVENT, event.as_str())
      .stdin(Stdio::null())
      .output()
      .await
      .map_err(|source| HookError::Spawn {
        release: release.id(),
        event,
        hook: label.clone(),
        source,
      })?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    for line in stdout.lines() {
      if hook.show_logs {
        info!(release = %release.id(), hook = %label, "{line}");
      } else {
        debug!(release = %release.id(), hook = %label, "{line}");
      }
    }

    if !output.status.success() {
      return Err(HookError::Failed {
        release: release.id(),
        event,
        hook: label,
        status: output
          .status
          .code()
          .map(|code| format!("exit code {code}"))
          .unwrap_or_else(|| "signal".to_string()),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
      });
    }

    Ok(())
  }
}
