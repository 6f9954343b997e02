//! Batch execution.
//!
//! Drives a [`Plan`] batch by batch. Batches never overlap: batch `i` is
//! fully converged before batch `i + 1` starts, and the first batch that
//! reports errors stops the run. Concurrency inside a batch is the converge
//! function's business (see [`pool::run_bounded`]).

pub mod pool;

use std::future::Future;

use tracing::{debug, info, warn};

use crate::context::Context;
use crate::error::ReleaseError;
use crate::plan::{Batch, Plan};
use crate::release::ReleaseId;

pub use pool::run_bounded;

/// What a converge function reports for one batch.
#[derive(Debug, Default)]
pub struct BatchOutcome {
  /// At least one release was acted upon.
  pub processed: bool,
  pub errors: Vec<ReleaseError>,
}

impl BatchOutcome {
  pub fn processed() -> Self {
    Self {
      processed: true,
      errors: Vec::new(),
    }
  }

  pub fn failed(errors: Vec<ReleaseError>) -> Self {
    Self {
      processed: true,
      errors,
    }
  }
}

/// Result of driving a whole plan.
#[derive(Debug, Default)]
pub struct ExecuteResult {
  /// OR of every executed batch's `processed` flag.
  pub processed: bool,

  /// Errors of the batch that stopped execution.
  pub errors: Vec<ReleaseError>,

  /// Number of batches the converge function was called for.
  pub batches_run: usize,

  /// Execution stopped because the invocation was cancelled.
  pub cancelled: bool,
}

impl ExecuteResult {
  pub fn is_ok(&self) -> bool {
    self.errors.is_empty() && !self.cancelled
  }
}

/// Log the plan at debug level, one line per batch.
pub fn log_plan(plan: &Plan) {
  for (idx, batch) in plan.batches.iter().enumerate() {
    let ids: Vec<String> = batch.ids().iter().map(ReleaseId::to_string).collect();
    debug!(batch = idx, releases = %ids.join(", "), "planned batch");
  }
}

/// Run `converge` over every batch of `plan` in order.
///
/// `concurrency` is handed through to `converge` untouched. A cancelled
/// context stops execution before the next batch starts; batches already
/// running finish normally.
pub async fn run_batches<F, Fut>(plan: &Plan, ctx: &Context, concurrency: usize, mut converge: F) -> ExecuteResult
where
  F: FnMut(Batch, usize) -> Fut,
  Fut: Future<Output = BatchOutcome>,
{
  log_plan(plan);

  let mut result = ExecuteResult::default();

  for (idx, batch) in plan.batches.iter().enumerate() {
    if ctx.is_cancelled() {
      warn!(batch = idx, remaining = plan.len() - idx, "cancelled, skipping remaining batches");
      result.cancelled = true;
      break;
    }

    debug!(batch = idx, releases = batch.len(), "converging batch");
    let outcome = converge(batch.clone(), concurrency).await;
    result.batches_run += 1;
    result.processed |= outcome.processed;

    if !outcome.errors.is_empty() {
      warn!(
        batch = idx,
        errors = outcome.errors.len(),
        "batch failed, skipping remaining batches"
      );
      result.errors = outcome.errors;
      break;
    }
  }

  info!(
    batches = result.batches_run,
    processed = result.processed,
    failed = !result.errors.is_empty(),
    "plan execution complete"
  );

  result
}
