//! `stv diff`: show what `apply` would change without changing it.

use anyhow::Result;
use clap::Args;
use owo_colors::{OwoColorize, Stream};

use stevedore_lib::converge::{DiffOptions, Report};
use stevedore_lib::release::ReleaseId;
use stevedore_lib::run::Command;

use super::{CommonArgs, Invocation, execute, report_failure, reports_exit_code};
use crate::output::{print_info, print_json, symbols};

#[derive(Args, Debug, Clone)]
pub struct DiffArgs {
  #[command(flatten)]
  pub common: CommonArgs,

  /// Exit with 2 when any release has changes
  #[arg(long)]
  pub detailed_exitcode: bool,

  /// Report a rollback instead of an upgrade when an older chart version was deployed before
  #[arg(long)]
  pub allow_rollback: bool,
}

pub fn cmd_diff(invocation: &Invocation, args: DiffArgs) -> Result<i32> {
  let options = DiffOptions {
    concurrency: args.common.concurrency,
    needs: args.common.needs.policy(),
    detailed_exitcode: args.detailed_exitcode,
    allow_rollback: args.allow_rollback,
  };

  let reports = match execute(invocation, Command::Diff(options), false)? {
    Ok(reports) => reports,
    Err(err) => return Ok(report_failure(&err)),
  };

  if args.common.output.is_json() {
    print_json(&reports)?;
  } else {
    reports.iter().filter(|report| report.matched).for_each(print_changes);
  }

  Ok(reports_exit_code(&reports))
}

fn print_changes(report: &Report) {
  let Some(changes) = &report.changes else {
    return;
  };

  if changes.is_empty() {
    print_info(&format!("{}: no changes", report.document.display()));
    return;
  }

  println!("{}:", report.document.display());
  print_ids(symbols::MODIFY, "upgrade", &changes.update);
  print_ids(symbols::ROLLBACK, "rollback", &changes.rollback);
  print_ids(symbols::REMOVE, "delete", &changes.delete);
}

fn print_ids(symbol: &str, action: &str, ids: &[ReleaseId]) {
  for id in ids {
    let symbol = match action {
      "delete" => symbol.if_supports_color(Stream::Stdout, |s| s.red()).to_string(),
      "rollback" => symbol.if_supports_color(Stream::Stdout, |s| s.cyan()).to_string(),
      _ => symbol.if_supports_color(Stream::Stdout, |s| s.yellow()).to_string(),
    };
    println!(
      "  {} {} {}",
      symbol,
      id,
      format!("({action})").if_supports_color(Stream::Stdout, |s| s.dimmed())
    );
  }
}
