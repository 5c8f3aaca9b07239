//! Implementation of the `keel up` command.
//!
//! Evaluates the program and drives the stack to it: plans, executes the plan
//! with the local providers and records the result in the state store.

use std::path::Path;
use std::process::ExitCode;
use std::time::Instant;

use anyhow::{Context, Result};
use tracing::info;

use keel_lib::execute::ExecuteConfig;
use keel_lib::resource::ReplaceStrategy;

use super::plan::print_plan;
use super::{Global, cancel_on_interrupt, evaluate, execution_json, exit_code, print_execution, runtime, stack_context};
use crate::output::{format_duration, print_error, print_json, print_success, print_warning};

/// Flags of `keel up` that tune execution.
#[derive(Debug, Default)]
pub struct UpOptions {
  pub parallelism: Option<usize>,
  pub replace_strategy: Option<ReplaceStrategy>,
  pub refresh: bool,
}

impl UpOptions {
  fn execute_config(&self) -> ExecuteConfig {
    let defaults = ExecuteConfig::default();
    ExecuteConfig {
      parallelism: self.parallelism.unwrap_or(defaults.parallelism),
      replace_strategy: self.replace_strategy.unwrap_or(defaults.replace_strategy),
    }
  }
}

pub fn cmd_up(global: &Global, file: &Path, options: UpOptions) -> Result<ExitCode> {
  let specs = evaluate(file, &global.stack)?;

  let rt = runtime()?;
  let cancel = cancel_on_interrupt(&rt);
  let ctx = stack_context(&global.stack, cancel)
    .with_config(options.execute_config())
    .with_refresh(options.refresh);

  let started = Instant::now();
  let result = rt.block_on(ctx.apply(specs)).context("Update failed")?;
  let elapsed = started.elapsed();
  info!(stack = %global.stack, elapsed_ms = elapsed.as_millis() as u64, "up finished");

  if global.output.is_json() {
    let mut json = execution_json(&global.stack, &result.execution);
    json["summary"] = serde_json::to_value(result.plan.summary()).context("Failed to serialize summary")?;
    print_json(&json)?;
    return Ok(exit_code(result.is_success()));
  }

  if !result.plan.has_changes() && result.is_success() {
    print_success(&format!("No changes. Stack '{}' is up to date.", global.stack));
    return Ok(ExitCode::SUCCESS);
  }

  print_plan(&result.plan, global.verbose);
  println!();
  print_execution(&result.execution, global.verbose);
  println!();

  let execution = &result.execution;
  if result.is_success() {
    print_success(&format!(
      "Stack '{}' updated in {} (serial {})",
      global.stack,
      format_duration(elapsed),
      execution.state.serial
    ));
  } else if execution.cancelled {
    print_warning("Update cancelled before all operations started");
  } else {
    let failed = execution.counts().failed;
    print_error(&format!("Update finished with {failed} failed resource(s)"));
  }

  Ok(exit_code(result.is_success()))
}
