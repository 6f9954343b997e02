//! `stv destroy`: delete every selected release that is deployed.

use anyhow::Result;
use clap::Args;

use stevedore_lib::converge::DestroyOptions;
use stevedore_lib::run::Command;

use super::apply::finish;
use super::{CommonArgs, Invocation, execute};

#[derive(Args, Debug, Clone)]
pub struct DestroyArgs {
  #[command(flatten)]
  pub common: CommonArgs,

  /// Ask for confirmation before deleting anything
  #[arg(short, long)]
  pub interactive: bool,
}

/// Dependents are deleted before the releases they need.
pub fn cmd_destroy(invocation: &Invocation, args: DestroyArgs) -> Result<i32> {
  let options = DestroyOptions {
    concurrency: args.common.concurrency,
    needs: args.common.needs.policy(),
    interactive: args.interactive,
  };

  let outcome = execute(invocation, Command::Destroy(options), args.interactive)?;
  finish(outcome, args.common.output)
}
