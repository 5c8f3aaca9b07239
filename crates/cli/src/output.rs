//! CLI output formatting utilities.
//!
//! Provides consistent formatting for terminal output including colored status
//! messages, plan change lines, timestamps and durations.

use std::time::{Duration, UNIX_EPOCH};

use anyhow::Context;
use clap::ValueEnum;
use owo_colors::{OwoColorize, Stream};
use serde_json::Value;

use keel_lib::diff::{Action, ChangeKind, PropertyChange};
use keel_lib::placeholder::Resolution;

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
  #[default]
  Text,
  Json,
}

impl OutputFormat {
  pub fn is_json(self) -> bool {
    matches!(self, OutputFormat::Json)
  }
}

pub mod symbols {
  pub const SUCCESS: &str = "✓";
  pub const ERROR: &str = "✗";
  pub const WARNING: &str = "⚠";
  pub const INFO: &str = "•";
  pub const ARROW: &str = "→";
  pub const ADD: &str = "+";
  pub const MODIFY: &str = "~";
  pub const REMOVE: &str = "-";
  pub const REPLACE: &str = "±";
}

pub fn action_symbol(action: Action) -> &'static str {
  match action {
    Action::Create => symbols::ADD,
    Action::Update => symbols::MODIFY,
    Action::Replace => symbols::REPLACE,
    Action::Delete => symbols::REMOVE,
    Action::NoOp => symbols::INFO,
  }
}

/// `text` colored the way plans color `action`.
pub fn paint_action(action: Action, text: &str) -> String {
  match action {
    Action::Create => text.if_supports_color(Stream::Stdout, |s| s.green()).to_string(),
    Action::Update => text.if_supports_color(Stream::Stdout, |s| s.yellow()).to_string(),
    Action::Replace => text.if_supports_color(Stream::Stdout, |s| s.magenta()).to_string(),
    Action::Delete => text.if_supports_color(Stream::Stdout, |s| s.red()).to_string(),
    Action::NoOp => text.if_supports_color(Stream::Stdout, |s| s.dimmed()).to_string(),
  }
}

pub fn format_value(value: &Value) -> String {
  serde_json::to_string(value).unwrap_or_else(|_| value.to_string())
}

fn format_resolution(after: Option<&Resolution>) -> String {
  match after {
    Some(Resolution::Known(value)) => format_value(value),
    Some(Resolution::Unknown) => "(known after apply)".to_string(),
    None => "null".to_string(),
  }
}

/// One property line of a plan entry, e.g. `~ envs: ["A=1"] → ["A=2"]`.
/// Replacement causes are only marked when `replacing`.
pub fn format_change(change: &PropertyChange, replacing: bool) -> String {
  let mut line = match change.kind {
    ChangeKind::Added => format!(
      "{} {}: {}",
      symbols::ADD,
      change.property,
      format_resolution(change.after.as_ref())
    ),
    ChangeKind::Removed => format!(
      "{} {}: {}",
      symbols::REMOVE,
      change.property,
      change.before.as_ref().map(format_value).unwrap_or_default()
    ),
    ChangeKind::Modified => format!(
      "{} {}: {} {} {}",
      symbols::MODIFY,
      change.property,
      change.before.as_ref().map(format_value).unwrap_or_default(),
      symbols::ARROW,
      format_resolution(change.after.as_ref())
    ),
  };
  if replacing && change.forces_replace {
    line.push_str(" (forces replacement)");
  }
  line
}

pub fn format_duration(duration: Duration) -> String {
  let secs = duration.as_secs();
  let millis = duration.subsec_millis();

  if secs >= 60 {
    let mins = secs / 60;
    let remaining_secs = secs % 60;
    format!("{}m {}s", mins, remaining_secs)
  } else if secs > 0 {
    format!("{}.{:02}s", secs, millis / 10)
  } else {
    format!("{}ms", millis)
  }
}

/// RFC 3339 rendering of a unix timestamp in seconds.
pub fn format_timestamp(unix_secs: u64) -> String {
  humantime::format_rfc3339_seconds(UNIX_EPOCH + Duration::from_secs(unix_secs)).to_string()
}

pub fn print_success(message: &str) {
  println!(
    "{} {}",
    symbols::SUCCESS.if_supports_color(Stream::Stdout, |s| s.green()),
    message
  );
}

pub fn print_error(message: &str) {
  eprintln!(
    "{} {}",
    symbols::ERROR.if_supports_color(Stream::Stderr, |s| s.red()),
    message.if_supports_color(Stream::Stderr, |s| s.red())
  );
}

pub fn print_warning(message: &str) {
  eprintln!(
    "{} {}",
    symbols::WARNING.if_supports_color(Stream::Stderr, |s| s.yellow()),
    message.if_supports_color(Stream::Stderr, |s| s.yellow())
  );
}

pub fn print_info(message: &str) {
  println!(
    "{} {}",
    symbols::INFO.if_supports_color(Stream::Stdout, |s| s.blue()),
    message
  );
}

pub fn print_stat(label: &str, value: &str) {
  println!(
    "  {}: {}",
    label.if_supports_color(Stream::Stdout, |s| s.dimmed()),
    value
  );
}

pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
  let json = serde_json::to_string_pretty(value).context("Failed to serialize to JSON")?;
  println!("{}", json);
  Ok(())
}
