//! Multi-document runs.
//!
//! A run converges several state documents with one command. Documents are
//! independent and run concurrently unless the caller asks for sequential
//! mode. Failing to match any release is only an error when no document of
//! the run matched.

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{debug, info};

use crate::context::Context;
use crate::converge::{ApplyOptions, DestroyOptions, DiffOptions, Engine, ReleaseOpOptions, Report, SyncOptions};
use crate::error::RunError;
use crate::state::StateDocument;

#[derive(Debug, Clone)]
pub enum Command {
  Apply(ApplyOptions),
  Sync(SyncOptions),
  Destroy(DestroyOptions),
  Diff(DiffOptions),
  Status(ReleaseOpOptions),
  Test(ReleaseOpOptions),
  Lint(ReleaseOpOptions),
  Template(ReleaseOpOptions),
  List,
}

impl Command {
  pub fn name(&self) -> &'static str {
    match self {
      Command::Apply(_) => "apply",
      Command::Sync(_) => "sync",
      Command::Destroy(_) => "destroy",
      Command::Diff(_) => "diff",
      Command::Status(_) => "status",
      Command::Test(_) => "test",
      Command::Lint(_) => "lint",
      Command::Template(_) => "template",
      Command::List => "list",
    }
  }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
  /// Converge documents one after another, stopping at the first failure.
  pub sequential: bool,
}

/// Run `command` against a single document.
pub async fn run_command(
  engine: &Engine,
  doc: &StateDocument,
  ctx: &Context,
  command: &Command,
) -> Result<Report, RunError> {
  match command {
    Command::Apply(opts) => engine.apply(doc, ctx, opts).await,
    Command::Sync(opts) => engine.sync(doc, ctx, opts).await,
    Command::Destroy(opts) => engine.destroy(doc, ctx, opts).await,
    Command::Diff(opts) => engine.diff(doc, ctx, opts).await,
    Command::Status(opts) => engine.status(doc, ctx, opts).await,
    Command::Test(opts) => engine.test(doc, ctx, opts).await,
    Command::Lint(opts) => engine.lint(doc, ctx, opts).await,
    Command::Template(opts) => engine.template(doc, ctx, opts).await,
    Command::List => engine.list(doc),
  }
}

/// Run `command` against every document.
///
/// Reports come back in document order. Per-document failures are combined
/// into one error.
pub async fn run_documents(
  engine: Arc<Engine>,
  docs: Vec<StateDocument>,
  ctx: Arc<Context>,
  command: Command,
  options: RunOptions,
) -> Result<Vec<Report>, RunError> {
  let selectors = describe_selectors(&docs);
  info!(
    command = command.name(),
    documents = docs.len(),
    sequential = options.sequential,
    "starting run"
  );

  let results = if options.sequential {
    run_sequential(&engine, docs, &ctx, &command).await
  } else {
    run_parallel(engine, docs, ctx.clone(), command).await
  };

  let mut reports = Vec::with_capacity(results.len());
  let mut errors = Vec::new();
  for result in results {
    match result {
      Ok(report) => reports.push(report),
      Err(err) => errors.push(err),
    }
  }

  if let Some(err) = RunError::combine(errors) {
    return Err(err);
  }

  if !reports.iter().any(|report| report.matched) {
    return Err(RunError::NoMatchingReleases { selectors });
  }

  Ok(reports)
}

async fn run_sequential(
  engine: &Engine,
  docs: Vec<StateDocument>,
  ctx: &Context,
  command: &Command,
) -> Vec<Result<Report, RunError>> {
  let mut results = Vec::with_capacity(docs.len());
  for doc in docs {
    if ctx.is_cancelled() {
      results.push(Err(RunError::Cancelled));
      break;
    }

    debug!(document = %doc.path.display(), "running document");
    let result = run_command(engine, &doc, ctx, command).await;
    let failed = result.is_err();
    results.push(result);
    if failed {
      break;
    }
  }
  results
}

async fn run_parallel(
  engine: Arc<Engine>,
  docs: Vec<StateDocument>,
  ctx: Arc<Context>,
  command: Command,
) -> Vec<Result<Report, RunError>> {
  let total = docs.len();
  let command = Arc::new(command);
  let mut join_set = JoinSet::new();

  for (idx, doc) in docs.into_iter().enumerate() {
    let engine = engine.clone();
    let ctx = ctx.clone();
    let command = command.clone();
    join_set.spawn(async move {
      debug!(document = %doc.path.display(), "running document");
      (idx, run_command(&engine, &doc, &ctx, &command).await)
    });
  }

  let mut slots: Vec<Option<Result<Report, RunError>>> = (0..total).map(|_| None).collect();
  while let Some(joined) = join_set.join_next().await {
    match joined {
      Ok((idx, result)) => slots[idx] = Some(result),
      Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
      Err(_) => {}
    }
  }

  slots.into_iter().flatten().collect()
}

fn describe_selectors(docs: &[StateDocument]) -> String {
  let distinct: BTreeSet<&str> = docs
    .iter()
    .flat_map(|doc| doc.selectors.iter().map(String::as_str))
    .collect();
  format!("[{}]", distinct.into_iter().collect::<Vec<_>>().join(" "))
}
