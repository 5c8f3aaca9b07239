mod destroy;
mod plan;
mod state;
mod up;

use std::path::Path;
use std::process::ExitCode;
use std::rc::Rc;

use anyhow::{Context, Result};
use owo_colors::{OwoColorize, Stream};
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use keel_lib::config::{ConfigError, FileConfig};
use keel_lib::eval::{EvalError, evaluate_program};
use keel_lib::execute::{ApplyError, ExecutionResult, NodeStatus, StackContext};
use keel_lib::platform::paths;
use keel_lib::provider::local;
use keel_lib::resource::{ResourceSpec, StackId};
use keel_lib::state::StateStore;

use crate::output::{OutputFormat, print_stat, print_warning, symbols};

pub use destroy::cmd_destroy;
pub use plan::cmd_plan;
pub use state::cmd_state;
pub use up::{UpOptions, cmd_up};

/// Options shared by every command.
pub struct Global {
  pub stack: StackId,
  pub output: OutputFormat,
  pub verbose: bool,
}

/// Exit code for a partially failed run.
const EXIT_FAILURE: u8 = 1;

/// Exit code for a program or configuration the engine refuses to run.
const EXIT_CONFIGURATION: u8 = 2;

/// `2` when the error is a problem with the program or its configuration,
/// `1` otherwise.
fn exit_status(err: &anyhow::Error) -> u8 {
  let configuration = err.chain().any(|cause| {
    cause.is::<EvalError>()
      || cause.is::<ConfigError>()
      || cause
        .downcast_ref::<ApplyError>()
        .is_some_and(ApplyError::is_configuration)
  });
  if configuration { EXIT_CONFIGURATION } else { EXIT_FAILURE }
}

pub fn exit_code_for(err: &anyhow::Error) -> ExitCode {
  ExitCode::from(exit_status(err))
}

/// Evaluate the program at `file` with the configuration of `stack`, read
/// from `Keel.<stack>.yaml` next to it.
pub(crate) fn evaluate(file: &Path, stack: &StackId) -> Result<Vec<ResourceSpec>> {
  let dir = file
    .parent()
    .filter(|p| !p.as_os_str().is_empty())
    .unwrap_or(Path::new("."));
  let config = FileConfig::for_stack(dir, stack).context("Failed to load stack configuration")?;
  if let Some(path) = config.path() {
    debug!(path = %path.display(), "using stack configuration");
  }

  evaluate_program(file, stack, Rc::new(config))
    .with_context(|| format!("Failed to evaluate program: {}", file.display()))
}

pub(crate) fn runtime() -> Result<Runtime> {
  Runtime::new().context("Failed to create async runtime")
}

/// Local providers and the default state store for `stack`.
pub(crate) fn stack_context(stack: &StackId, cancel: CancellationToken) -> StackContext {
  StackContext::new(
    stack.clone(),
    local::registry(paths::runtime_dir()),
    StateStore::default_store(),
  )
  .with_cancel(cancel)
}

/// A token cancelled by Ctrl-C. Running operations are allowed to finish.
pub(crate) fn cancel_on_interrupt(rt: &Runtime) -> CancellationToken {
  let token = CancellationToken::new();
  let cancel = token.clone();
  rt.spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      print_warning("Interrupted: waiting for running operations to finish");
      cancel.cancel();
    }
  });
  token
}

/// Per-resource lines and totals for a finished run.
pub(crate) fn print_execution(execution: &ExecutionResult, verbose: bool) {
  for (id, outcome) in &execution.outcomes {
    match &outcome.status {
      NodeStatus::Succeeded => println!(
        "  {} {} {}",
        symbols::SUCCESS.if_supports_color(Stream::Stdout, |s| s.green()),
        outcome.action,
        id
      ),
      NodeStatus::Failed { error } => println!(
        "  {} {} {}: {}",
        symbols::ERROR.if_supports_color(Stream::Stdout, |s| s.red()),
        outcome.action,
        id,
        error.if_supports_color(Stream::Stdout, |s| s.red())
      ),
      NodeStatus::Skipped { failed_dependency } => println!(
        "  {} skipped {} (dependency {} failed)",
        symbols::WARNING.if_supports_color(Stream::Stdout, |s| s.yellow()),
        id,
        failed_dependency
      ),
      NodeStatus::Cancelled => println!(
        "  {} cancelled {}",
        symbols::WARNING.if_supports_color(Stream::Stdout, |s| s.yellow()),
        id
      ),
      NodeStatus::Unchanged if verbose => println!(
        "  {} unchanged {}",
        symbols::INFO.if_supports_color(Stream::Stdout, |s| s.dimmed()),
        id
      ),
      NodeStatus::Unchanged => {}
    }
  }

  let counts = execution.counts();
  println!();
  print_stat("Succeeded", &counts.succeeded.to_string());
  print_stat("Failed", &counts.failed.to_string());
  print_stat("Skipped", &counts.skipped.to_string());
  print_stat("Unchanged", &counts.unchanged.to_string());
  if counts.cancelled > 0 {
    print_stat("Cancelled", &counts.cancelled.to_string());
  }
  if let Some(err) = &execution.store_error {
    print_warning(&format!("State was not saved: {err}"));
  }
}

/// JSON document describing a finished run.
pub(crate) fn execution_json(stack: &StackId, execution: &ExecutionResult) -> serde_json::Value {
  serde_json::json!({
    "stack": stack,
    "serial": execution.state.serial,
    "success": execution.is_success(),
    "cancelled": execution.cancelled,
    "counts": execution.counts(),
    "outcomes": execution.outcomes,
    "store_error": execution.store_error.as_ref().map(ToString::to_string),
  })
}

pub(crate) fn exit_code(success: bool) -> ExitCode {
  if success {
    ExitCode::SUCCESS
  } else {
    ExitCode::from(EXIT_FAILURE)
  }
}
