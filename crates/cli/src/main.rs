mod cmd;
mod output;
mod prompts;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use cmd::{
  DestroyArgs, DiffArgs, Invocation, ListArgs, ReleaseOpArgs, SyncArgs, UpgradeArgs, cmd_apply, cmd_destroy, cmd_diff,
  cmd_list, cmd_release_op, cmd_sync,
};
use output::print_error;
use stevedore_lib::error::EXIT_FAILURE;
use stevedore_lib::state::SelectorInheritance;

/// stevedore - converge Helm releases declared in state documents
#[derive(Parser)]
#[command(name = "stv")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// State document, or directory of documents (default: stevedore.yaml, then stevedore.d)
  #[arg(short, long, global = true)]
  file: Option<PathBuf>,

  /// Release selector such as name=web or tier!=frontend. Repeat to OR selectors
  #[arg(short = 'l', long = "selector", global = true)]
  selectors: Vec<String>,

  /// Run documents one after another and stop at the first failure
  #[arg(long, global = true)]
  sequential: bool,

  /// How sub-documents without their own selectors inherit the command line's
  #[arg(long, value_enum, default_value = "legacy", global = true)]
  selector_inheritance: Inheritance,

  /// Helm binary to invoke
  #[arg(long, default_value = "helm", global = true)]
  helm_binary: String,

  /// Enable verbose output
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Inheritance {
  Legacy,
  Explicit,
}

impl From<Inheritance> for SelectorInheritance {
  fn from(value: Inheritance) -> Self {
    match value {
      Inheritance::Legacy => SelectorInheritance::Legacy,
      Inheritance::Explicit => SelectorInheritance::Explicit,
    }
  }
}

#[derive(Subcommand)]
enum Commands {
  /// Diff every release and upgrade, roll back or delete the ones that changed
  Apply(UpgradeArgs),

  /// Upgrade every release without diffing first
  Sync(SyncArgs),

  /// Show what apply would change
  Diff(DiffArgs),

  /// Delete every selected release, dependents first
  Destroy(DestroyArgs),

  /// Run `helm test` for every selected release
  Test(ReleaseOpArgs),

  /// Render every selected release with `helm template`
  Template(ReleaseOpArgs),

  /// Lint every selected release's chart
  Lint(ReleaseOpArgs),

  /// Show `helm status` for every selected release
  Status(ReleaseOpArgs),

  /// List the selected releases without contacting Helm
  List(ListArgs),
}

fn main() -> ExitCode {
  let cli = Cli::parse();

  let default_level = if cli.verbose { "debug" } else { "warn" };
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
    .with_writer(std::io::stderr)
    .without_time()
    .init();

  let invocation = Invocation {
    file: cli.file,
    selectors: cli.selectors,
    sequential: cli.sequential,
    inheritance: cli.selector_inheritance.into(),
    helm_binary: cli.helm_binary,
  };

  let result = match cli.command {
    Commands::Apply(args) => cmd_apply(&invocation, args),
    Commands::Sync(args) => cmd_sync(&invocation, args),
    Commands::Diff(args) => cmd_diff(&invocation, args),
    Commands::Destroy(args) => cmd_destroy(&invocation, args),
    Commands::Test(args) => cmd_release_op(&invocation, cmd::ReleaseOp::Test, args),
    Commands::Template(args) => cmd_release_op(&invocation, cmd::ReleaseOp::Template, args),
    Commands::Lint(args) => cmd_release_op(&invocation, cmd::ReleaseOp::Lint, args),
    Commands::Status(args) => cmd_release_op(&invocation, cmd::ReleaseOp::Status, args),
    Commands::List(args) => cmd_list(&invocation, args),
  };

  match result {
    Ok(code) => exit_code(code),
    Err(err) => {
      print_error(&format!("{err:#}"));
      exit_code(EXIT_FAILURE)
    }
  }
}

fn exit_code(code: i32) -> ExitCode {
  ExitCode::from(u8::try_from(code).unwrap_or(1))
}
