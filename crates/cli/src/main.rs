mod cmd;
mod output;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use keel_lib::consts::{DEFAULT_PROGRAM, DEFAULT_STACK};
use keel_lib::resource::{ReplaceStrategy, StackId};

use crate::cmd::Global;
use crate::output::{OutputFormat, print_error};

/// Declarative infrastructure for local container stacks
#[derive(Parser)]
#[command(name = "keel")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Stack to operate on
  #[arg(long, global = true, env = "KEEL_STACK", default_value = DEFAULT_STACK)]
  stack: StackId,

  /// Output format
  #[arg(long, global = true, value_enum, default_value_t)]
  output: OutputFormat,

  /// Enable debug logging and list unchanged resources
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Show what `up` would change without changing anything
  Plan {
    /// Program to evaluate
    #[arg(short, long, default_value = DEFAULT_PROGRAM)]
    file: PathBuf,

    /// Also write the plan as JSON to this path
    #[arg(long)]
    out: Option<PathBuf>,

    /// Re-read recorded resources from their providers first
    #[arg(long)]
    refresh: bool,
  },

  /// Create, update, replace and delete resources to match the program
  Up {
    /// Program to evaluate
    #[arg(short, long, default_value = DEFAULT_PROGRAM)]
    file: PathBuf,

    /// Maximum concurrent provider operations (0 = unbounded)
    #[arg(short, long)]
    parallelism: Option<usize>,

    /// Replace order for resources that do not pick one
    #[arg(long)]
    replace_strategy: Option<ReplaceStrategy>,

    /// Re-read recorded resources from their providers first
    #[arg(long)]
    refresh: bool,
  },

  /// Delete every resource recorded for the stack
  Destroy {
    /// Maximum concurrent provider operations (0 = unbounded)
    #[arg(short, long)]
    parallelism: Option<usize>,
  },

  /// Show the recorded state of the stack
  State,
}

fn init_tracing(verbose: bool) {
  let default = if verbose { "debug" } else { "warn" };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .with_target(false)
    .init();
}

fn main() -> ExitCode {
  let cli = Cli::parse();
  init_tracing(cli.verbose);

  let global = Global {
    stack: cli.stack,
    output: cli.output,
    verbose: cli.verbose,
  };

  let result = match cli.command {
    Commands::Plan { file, out, refresh } => cmd::cmd_plan(&global, &file, out.as_deref(), refresh),
    Commands::Up {
      file,
      parallelism,
      replace_strategy,
      refresh,
    } => cmd::cmd_up(
      &global,
      &file,
      cmd::UpOptions {
        parallelism,
        replace_strategy,
        refresh,
      },
    ),
    Commands::Destroy { parallelism } => cmd::cmd_destroy(&global, parallelism),
    Commands::State => cmd::cmd_state(&global),
  };

  match result {
    Ok(code) => code,
    Err(err) => {
      print_error(&format!("{err:#}"));
      cmd::exit_code_for(&err)
    }
  }
}
