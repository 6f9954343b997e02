//! Command implementations.
//!
//! Every command loads the state documents, runs them through
//! [`run_documents`] and renders the reports. Exit codes come from the
//! reports, or from the error when the run failed.

mod apply;
mod destroy;
mod diff;
mod list;
mod status;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::Args;
use tracing::{debug, warn};

use stevedore_lib::context::Context;
use stevedore_lib::converge::{Engine, Report};
use stevedore_lib::error::{EXIT_DIFF_DETECTED, EXIT_SUCCESS, RunError};
use stevedore_lib::helm::HelmCli;
use stevedore_lib::plan::NeedsPolicy;
use stevedore_lib::run::{Command, RunOptions, run_documents};
use stevedore_lib::state::{self, LoadOptions, SelectorInheritance};

use crate::output::{OutputFormat, print_error, print_summary, print_warning};
use crate::prompts::TerminalPrompt;

pub use apply::{SyncArgs, UpgradeArgs, cmd_apply, cmd_sync};
pub use destroy::{DestroyArgs, cmd_destroy};
pub use diff::{DiffArgs, cmd_diff};
pub use list::{ListArgs, cmd_list};
pub use status::{ReleaseOp, ReleaseOpArgs, cmd_release_op};

const DEFAULT_FILE: &str = "stevedore.yaml";
const DEFAULT_DIR: &str = "stevedore.d";

/// Global flags shared by every command.
#[derive(Debug)]
pub struct Invocation {
  pub file: Option<PathBuf>,
  pub selectors: Vec<String>,
  pub sequential: bool,
  pub inheritance: SelectorInheritance,
  pub helm_binary: String,
}

impl Invocation {
  fn state_path(&self) -> PathBuf {
    match &self.file {
      Some(file) => file.clone(),
      None if !Path::new(DEFAULT_FILE).exists() && Path::new(DEFAULT_DIR).is_dir() => PathBuf::from(DEFAULT_DIR),
      None => PathBuf::from(DEFAULT_FILE),
    }
  }
}

/// Flags shared by every command that talks to Helm.
#[derive(Args, Debug, Clone)]
pub struct CommonArgs {
  /// Maximum number of concurrent Helm processes (0 means one per release)
  #[arg(long, default_value_t = 0)]
  pub concurrency: usize,

  #[command(flatten)]
  pub needs: NeedsArgs,

  /// Output format
  #[arg(short = 'o', long, value_enum, default_value = "text")]
  pub output: OutputFormat,
}

#[derive(Args, Debug, Clone, Default)]
#[group(multiple = false)]
pub struct NeedsArgs {
  /// Ignore dependencies on releases that are not selected
  #[arg(long)]
  pub skip_needs: bool,

  /// Also act on the direct dependencies of selected releases
  #[arg(long)]
  pub include_needs: bool,

  /// Also act on every transitive dependency of selected releases
  #[arg(long)]
  pub include_transitive_needs: bool,
}

impl NeedsArgs {
  pub fn policy(&self) -> NeedsPolicy {
    if self.include_transitive_needs {
      NeedsPolicy::IncludeTransitive
    } else if self.include_needs {
      NeedsPolicy::IncludeDirect
    } else if self.skip_needs {
      NeedsPolicy::Skip
    } else {
      NeedsPolicy::Enforce
    }
  }
}

/// Load the documents and run `command` against all of them.
fn execute(invocation: &Invocation, command: Command, interactive: bool) -> Result<Result<Vec<Report>, RunError>> {
  let path = invocation.state_path();
  let options = LoadOptions {
    selectors: invocation.selectors.clone(),
    inheritance: invocation.inheritance,
  };
  let docs = state::load(&path, &options).with_context(|| format!("Failed to load {}", path.display()))?;
  debug!(path = %path.display(), documents = docs.len(), "loaded state");

  let mut engine = Engine::new(Arc::new(HelmCli::new(invocation.helm_binary.as_str())));
  if interactive {
    engine = engine.with_prompt(Arc::new(TerminalPrompt));
  }

  let run_options = RunOptions {
    sequential: invocation.sequential,
  };

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  rt.block_on(async move {
    let ctx = Context::new().context("Failed to create scratch directory")?;

    let token = ctx.cancel_token().clone();
    let watcher = tokio::spawn(async move {
      if tokio::signal::ctrl_c().await.is_ok() {
        warn!("interrupted, cancelling remaining batches");
        token.cancel();
      }
    });
    ctx.defer(move || watcher.abort());

    Ok::<_, anyhow::Error>(run_documents(Arc::new(engine), docs, ctx, command, run_options).await)
  })
}

/// Exit code for a successful run: the highest any report asks for.
fn reports_exit_code(reports: &[Report]) -> i32 {
  reports
    .iter()
    .map(Report::exit_code)
    .max()
    .unwrap_or(EXIT_SUCCESS)
}

/// Print what happened before a failed run and the failure itself.
fn report_failure(err: &RunError) -> i32 {
  print_failure_summaries(err);

  let code = err.exit_code();
  if code == EXIT_DIFF_DETECTED {
    print_warning(&err.to_string());
  } else {
    print_error(&err.to_string());
  }
  code
}

fn print_failure_summaries(err: &RunError) {
  match err {
    RunError::Documents(errors) => errors.iter().for_each(print_failure_summaries),
    other => {
      if let Some(summary) = other.summary().filter(|summary| !summary.is_empty()) {
        print_summary(summary);
      }
    }
  }
}
