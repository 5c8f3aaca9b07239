//! Implementation of the `keel destroy` command.
//!
//! Deletes every resource recorded for the stack, dependents before the
//! resources they depend on. The program is not evaluated.

use std::process::ExitCode;
use std::time::Instant;

use anyhow::{Context, Result};

use keel_lib::execute::ExecuteConfig;

use super::plan::print_plan;
use super::{Global, cancel_on_interrupt, execution_json, exit_code, print_execution, runtime, stack_context};
use crate::output::{format_duration, print_error, print_info, print_json, print_success};

pub fn cmd_destroy(global: &Global, parallelism: Option<usize>) -> Result<ExitCode> {
  let rt = runtime()?;
  let cancel = cancel_on_interrupt(&rt);
  let mut config = ExecuteConfig::default();
  if let Some(parallelism) = parallelism {
    config.parallelism = parallelism;
  }
  let ctx = stack_context(&global.stack, cancel).with_config(config);

  let started = Instant::now();
  let result = rt.block_on(ctx.destroy()).context("Destroy failed")?;

  if global.output.is_json() {
    print_json(&execution_json(&global.stack, &result.execution))?;
    return Ok(exit_code(result.is_success()));
  }

  if !result.plan.has_changes() {
    print_info(&format!("Stack '{}' has no resources", global.stack));
    return Ok(exit_code(result.is_success()));
  }

  print_plan(&result.plan, global.verbose);
  println!();
  print_execution(&result.execution, global.verbose);
  println!();

  if result.is_success() {
    print_success(&format!(
      "Stack '{}' destroyed in {}",
      global.stack,
      format_duration(started.elapsed())
    ));
  } else {
    let remaining = result.execution.state.len();
    print_error(&format!("Destroy incomplete: {remaining} resource(s) remain"));
  }

  Ok(exit_code(result.is_success()))
}
