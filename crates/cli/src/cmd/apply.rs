//! `stv apply` and `stv sync`.
//!
//! Both converge the selected releases: `apply` diffs first and only acts
//! on releases that changed, `sync` upgrades everything it planned.

use anyhow::Result;
use clap::Args;

use stevedore_lib::converge::{ApplyOptions, Report, SyncOptions};
use stevedore_lib::run::Command;

use super::{CommonArgs, Invocation, execute, report_failure, reports_exit_code};
use crate::output::{OutputFormat, print_info, print_json, print_summary, print_warning};

#[derive(Args, Debug, Clone)]
pub struct UpgradeArgs {
  #[command(flatten)]
  pub common: CommonArgs,

  /// Ask for confirmation before changing anything
  #[arg(short, long)]
  pub interactive: bool,

  /// Exit with 2 when releases were changed
  #[arg(long)]
  pub detailed_exitcode: bool,

  /// Roll back instead of upgrading when an older chart version was deployed before
  #[arg(long)]
  pub allow_rollback: bool,
}

#[derive(Args, Debug, Clone)]
pub struct SyncArgs {
  #[command(flatten)]
  pub common: CommonArgs,

  /// Ask for confirmation before changing anything
  #[arg(short, long)]
  pub interactive: bool,

  /// Roll back instead of upgrading when an older chart version was deployed before
  #[arg(long)]
  pub allow_rollback: bool,
}

pub fn cmd_apply(invocation: &Invocation, args: UpgradeArgs) -> Result<i32> {
  let options = ApplyOptions {
    concurrency: args.common.concurrency,
    needs: args.common.needs.policy(),
    interactive: args.interactive,
    detailed_exitcode: args.detailed_exitcode,
    allow_rollback: args.allow_rollback,
  };

  let outcome = execute(invocation, Command::Apply(options), args.interactive)?;
  finish(outcome, args.common.output)
}

pub fn cmd_sync(invocation: &Invocation, args: SyncArgs) -> Result<i32> {
  let options = SyncOptions {
    concurrency: args.common.concurrency,
    needs: args.common.needs.policy(),
    interactive: args.interactive,
    allow_rollback: args.allow_rollback,
  };

  let outcome = execute(invocation, Command::Sync(options), args.interactive)?;
  finish(outcome, args.common.output)
}

/// Render converge reports shared by apply, sync and destroy.
pub(super) fn finish(
  outcome: Result<Vec<Report>, stevedore_lib::error::RunError>,
  output: OutputFormat,
) -> Result<i32> {
  let reports = match outcome {
    Ok(reports) => reports,
    Err(err) => return Ok(report_failure(&err)),
  };

  if output.is_json() {
    print_json(&reports)?;
    return Ok(reports_exit_code(&reports));
  }

  for report in reports.iter().filter(|report| report.matched) {
    if report.declined {
      print_warning(&format!("{}: declined, nothing changed", report.document.display()));
    } else if report.affected.is_empty() {
      print_info(&format!("{}: no releases were changed", report.document.display()));
    } else {
      print_summary(&report.affected);
    }
  }

  Ok(reports_exit_code(&reports))
}
