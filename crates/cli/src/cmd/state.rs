//! Implementation of the `keel state` command.

use std::process::ExitCode;

use anyhow::{Context, Result};
use owo_colors::{OwoColorize, Stream};

use keel_lib::state::{ResourceStatus, StateStore};

use super::Global;
use crate::output::{format_timestamp, print_info, print_json, print_stat, print_success, symbols};

pub fn cmd_state(global: &Global) -> Result<ExitCode> {
  let store = StateStore::default_store();
  let record = store.load(&global.stack).context("Failed to load state")?;
  let history = store.history(&global.stack).context("Failed to list state history")?;

  let Some(record) = record else {
    if global.output.is_json() {
      print_json(&serde_json::Value::Null)?;
    } else {
      print_info(&format!("No state for stack '{}'. Run 'keel up' to create it.", global.stack));
    }
    return Ok(ExitCode::SUCCESS);
  };

  if global.output.is_json() {
    print_json(&record)?;
    return Ok(ExitCode::SUCCESS);
  }

  print_success(&format!("Stack '{}'", record.stack));
  print_stat("Serial", &record.serial.to_string());
  print_stat("Updated", &format_timestamp(record.updated_at));
  print_stat("Resources", &record.len().to_string());
  print_stat("History", &history.len().to_string());

  if !record.is_empty() {
    println!();
  }
  for (id, resource) in &record.resources {
    let status = match resource.status {
      ResourceStatus::Healthy => symbols::SUCCESS.if_supports_color(Stream::Stdout, |s| s.green()).to_string(),
      ResourceStatus::Pending => symbols::WARNING.if_supports_color(Stream::Stdout, |s| s.yellow()).to_string(),
      ResourceStatus::Failed => symbols::ERROR.if_supports_color(Stream::Stdout, |s| s.red()).to_string(),
    };
    let object_id = resource
      .outputs
      .as_ref()
      .and_then(|outputs| outputs.get("id"))
      .and_then(|id| id.as_str())
      .unwrap_or("-");
    println!("  {status} {id} [{object_id}]");

    if global.verbose {
      print_stat("    updated", &format_timestamp(resource.updated_at));
      for dependency in &resource.dependencies {
        print_stat("    depends on", &dependency.to_string());
      }
    }
    if let Some(error) = &resource.error {
      print_stat("    error", error);
    }
    if resource.replaced.is_some() {
      print_stat("    replaced instance", "awaiting deletion");
    }
  }

  Ok(ExitCode::SUCCESS)
}
