//! Implementation of the `keel plan` command.
//!
//! Evaluates the program, diffs it against the recorded state of the stack
//! and prints the actions `keel up` would take. Nothing is changed.

use std::fs;
use std::path::Path;
use std::process::ExitCode;

use anyhow::{Context, Result};

use keel_lib::diff::{Action, Plan};
use keel_lib::util::hash::Hashable;

use super::{Global, cancel_on_interrupt, evaluate, runtime, stack_context};
use crate::output::{action_symbol, format_change, paint_action, print_info, print_json, print_success};

/// Print the entries of `plan` grouped by step. No-op entries only show when
/// `verbose` is set.
pub(crate) fn print_plan(plan: &Plan, verbose: bool) {
  let mut step = 0;
  for (id, entry) in plan.ordered() {
    if !entry.action.is_change() && !verbose {
      continue;
    }
    if entry.step != step {
      step = entry.step;
      println!("Step {step}:");
    }

    let mut line = format!("{} {} {}", action_symbol(entry.action), entry.action, id);
    if let Some(order) = entry.replace_order {
      line.push_str(&format!(" ({order})"));
    }
    println!("  {}", paint_action(entry.action, &line));
    let replacing = entry.action == Action::Replace;
    for change in &entry.changes {
      println!("      {}", format_change(change, replacing));
    }
  }
}

pub fn cmd_plan(global: &Global, file: &Path, out: Option<&Path>, refresh: bool) -> Result<ExitCode> {
  let specs = evaluate(file, &global.stack)?;

  let rt = runtime()?;
  let cancel = cancel_on_interrupt(&rt);
  let ctx = stack_context(&global.stack, cancel).with_refresh(refresh);
  let plan = rt.block_on(ctx.preview(specs)).context("Planning failed")?;
  let plan_id = plan.compute_hash().context("Failed to compute plan hash")?;

  if let Some(out) = out {
    let json = serde_json::to_string_pretty(&plan).context("Failed to serialize plan")?;
    fs::write(out, json).with_context(|| format!("Failed to write plan: {}", out.display()))?;
  }

  if global.output.is_json() {
    print_json(&serde_json::json!({
      "id": plan_id.0,
      "summary": plan.summary(),
      "plan": plan,
    }))?;
    return Ok(ExitCode::SUCCESS);
  }

  if plan.has_changes() || global.verbose {
    print_plan(&plan, global.verbose);
    println!();
  }

  if plan.has_changes() {
    print_success(&format!("Plan {}: {}", plan_id, plan.summary()));
  } else {
    print_success(&format!("No changes. Stack '{}' is up to date.", global.stack));
  }
  if let Some(out) = out {
    print_info(&format!("Plan written to {}", out.display()));
  }

  Ok(ExitCode::SUCCESS)
}
