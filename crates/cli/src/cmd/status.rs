//! Read-only release commands: `status`, `test`, `lint` and `template`.

use anyhow::Result;
use clap::Args;
use owo_colors::{OwoColorize, Stream};

use stevedore_lib::converge::ReleaseOpOptions;
use stevedore_lib::run::Command;

use super::{CommonArgs, Invocation, execute, report_failure, reports_exit_code};
use crate::output::print_json;

#[derive(Debug, Clone, Copy)]
pub enum ReleaseOp {
  Status,
  Test,
  Lint,
  Template,
}

#[derive(Args, Debug, Clone)]
pub struct ReleaseOpArgs {
  #[command(flatten)]
  pub common: CommonArgs,
}

pub fn cmd_release_op(invocation: &Invocation, op: ReleaseOp, args: ReleaseOpArgs) -> Result<i32> {
  let options = ReleaseOpOptions {
    concurrency: args.common.concurrency,
    needs: args.common.needs.policy(),
  };
  let command = match op {
    ReleaseOp::Status => Command::Status(options),
    ReleaseOp::Test => Command::Test(options),
    ReleaseOp::Lint => Command::Lint(options),
    ReleaseOp::Template => Command::Template(options),
  };

  let reports = match execute(invocation, command, false)? {
    Ok(reports) => reports,
    Err(err) => return Ok(report_failure(&err)),
  };

  if args.common.output.is_json() {
    print_json(&reports)?;
    return Ok(reports_exit_code(&reports));
  }

  for output in reports.iter().flat_map(|report| &report.outputs) {
    match op {
      // Rendered manifests go to stdout untouched so they can be piped.
      ReleaseOp::Template => print!("{}", output.output),
      _ => {
        println!(
          "{}",
          format!("--- {}", output.release).if_supports_color(Stream::Stdout, |s| s.bold())
        );
        println!("{}", output.output.trim_end());
      }
    }
  }

  Ok(reports_exit_code(&reports))
}
