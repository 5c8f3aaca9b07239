//! Directory layout for state and the local runtime.
//!
//! Every location can be overridden through the environment so tests and
//! CI runs never touch the user's real data directory.

use crate::consts::APP_NAME;
use std::path::PathBuf;

/// Overrides the directory holding per-stack state.
pub const STATE_DIR_ENV: &str = "KEEL_STATE_DIR";

/// Overrides the directory backing the local providers.
pub const RUNTIME_DIR_ENV: &str = "KEEL_RUNTIME_DIR";

/// Returns the user's home directory
#[cfg(windows)]
pub fn home_dir() -> PathBuf {
  std::env::var("USERPROFILE")
    .map(PathBuf::from)
    .unwrap_or_else(|_| PathBuf::from("."))
}

/// Returns the user's home directory
#[cfg(not(windows))]
pub fn home_dir() -> PathBuf {
  std::env::var("HOME")
    .map(PathBuf::from)
    .unwrap_or_else(|_| PathBuf::from("."))
}

/// Returns the directory for data files for the application
#[cfg(windows)]
pub fn data_dir() -> PathBuf {
  std::env::var("APPDATA")
    .map(PathBuf::from)
    .unwrap_or_else(|_| home_dir().join("AppData").join("Roaming"))
    .join(APP_NAME)
}

/// Returns the directory for data files for the application
#[cfg(not(windows))]
pub fn data_dir() -> PathBuf {
  let data_home = std::env::var("XDG_DATA_HOME")
    .map(PathBuf::from)
    .unwrap_or_else(|_| home_dir().join(".local").join("share"));
  data_home.join(APP_NAME)
}

/// Root of the state store: one directory per stack.
pub fn state_dir() -> PathBuf {
  match std::env::var(STATE_DIR_ENV) {
    Ok(path) if !path.is_empty() => PathBuf::from(path),
    _ => data_dir().join("state"),
  }
}

/// Root of the local provider runtime objects.
pub fn runtime_dir() -> PathBuf {
  match std::env::var(RUNTIME_DIR_ENV) {
    Ok(path) if !path.is_empty() => PathBuf::from(path),
    _ => data_dir().join("runtime"),
  }
}
