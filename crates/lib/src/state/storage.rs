//! On-disk state storage.
//!
//! # Storage Layout
//!
//! ```text
//! {state_dir}/
//! └── <stack>/
//!     ├── state.json          # current StateRecord
//!     ├── .lock               # StackLock
//!     └── history/
//!         └── <serial>.json   # final record of each completed run
//! ```

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, trace};

use super::lock::{LockMode, StackLock, StackLockError};
use super::types::{StateError, StateRecord};
use crate::consts::STATE_VERSION;
use crate::platform::paths::state_dir;
use crate::resource::StackId;

const STATE_FILENAME: &str = "state.json";
const HISTORY_DIR: &str = "history";

/// Per-stack state records on disk. Every write is atomic and durable.
#[derive(Debug, Clone)]
pub struct StateStore {
  base_path: PathBuf,
}

impl StateStore {
  pub fn new(base_path: impl Into<PathBuf>) -> Self {
    Self {
      base_path: base_path.into(),
    }
  }

  /// Store rooted at [`state_dir`], honoring `KEEL_STATE_DIR`.
  pub fn default_store() -> Self {
    Self::new(state_dir())
  }

  pub fn base_path(&self) -> &Path {
    &self.base_path
  }

  pub fn stack_dir(&self, stack: &StackId) -> PathBuf {
    self.base_path.join(stack.as_str())
  }

  fn state_path(&self, stack: &StackId) -> PathBuf {
    self.stack_dir(stack).join(STATE_FILENAME)
  }

  fn history_dir(&self, stack: &StackId) -> PathBuf {
    self.stack_dir(stack).join(HISTORY_DIR)
  }

  fn history_path(&self, stack: &StackId, serial: u64) -> PathBuf {
    self.history_dir(stack).join(format!("{serial:08}.json"))
  }

  /// Load the current record. Returns `Ok(None)` before the first run.
  pub fn load(&self, stack: &StackId) -> Result<Option<StateRecord>, StateError> {
    read_record(&self.state_path(stack))
  }

  /// Replace the current record.
  pub fn save(&self, stack: &StackId, record: &StateRecord) -> Result<(), StateError> {
    let dir = self.stack_dir(stack);
    fs::create_dir_all(&dir).map_err(StateError::CreateDir)?;
    write_record(&dir, &self.state_path(stack), record)?;
    debug!(stack = %stack, serial = record.serial, resources = record.len(), "saved state");
    Ok(())
  }

  /// Keep a copy of a completed run's final record.
  pub fn save_history(&self, stack: &StackId, record: &StateRecord) -> Result<(), StateError> {
    let dir = self.history_dir(stack);
    fs::create_dir_all(&dir).map_err(StateError::CreateDir)?;
    write_record(&dir, &self.history_path(stack, record.serial), record)
  }

  /// Serials of the recorded history, oldest first.
  pub fn history(&self, stack: &StackId) -> Result<Vec<u64>, StateError> {
    let entries = match fs::read_dir(self.history_dir(stack)) {
      Ok(entries) => entries,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
      Err(e) => return Err(StateError::Read(e)),
    };

    let mut serials = Vec::new();
    for entry in entries {
      let path = entry.map_err(StateError::Read)?.path();
      if path.extension().is_some_and(|ext| ext == "json")
        && let Some(serial) = path.file_stem().and_then(|s| s.to_str()).and_then(|s| s.parse().ok())
      {
        serials.push(serial);
      }
    }
    serials.sort_unstable();
    Ok(serials)
  }

  pub fn load_history(&self, stack: &StackId, serial: u64) -> Result<Option<StateRecord>, StateError> {
    read_record(&self.history_path(stack, serial))
  }

  /// Stacks that have a state file, sorted by name.
  pub fn stacks(&self) -> Result<Vec<StackId>, StateError> {
    let entries = match fs::read_dir(&self.base_path) {
      Ok(entries) => entries,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
      Err(e) => return Err(StateError::Read(e)),
    };

    let mut stacks = Vec::new();
    for entry in entries {
      let path = entry.map_err(StateError::Read)?.path();
      if path.join(STATE_FILENAME).is_file()
        && let Some(stack) = path.file_name().and_then(|n| n.to_str()).and_then(|n| n.parse().ok())
      {
        stacks.push(stack);
      }
    }
    stacks.sort();
    Ok(stacks)
  }

  pub fn lock(&self, stack: &StackId, mode: LockMode, command: &str) -> Result<StackLock, StackLockError> {
    StackLock::acquire(&self.stack_dir(stack), stack, mode, command)
  }
}

fn read_record(path: &Path) -> Result<Option<StateRecord>, StateError> {
  let content = match fs::read_to_string(path) {
    Ok(content) => content,
    Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
    Err(e) => return Err(StateError::Read(e)),
  };

  // Check the version before the full parse so newer formats fail clearly.
  let header: serde_json::Value = serde_json::from_str(&content).map_err(StateError::Parse)?;
  let found = header
    .get("version")
    .and_then(|v| v.as_u64())
    .and_then(|v| u32::try_from(v).ok())
    .unwrap_or(0);
  if found != STATE_VERSION {
    return Err(StateError::UnsupportedVersion {
      found,
      supported: STATE_VERSION,
    });
  }

  serde_json::from_value(header).map(Some).map_err(StateError::Parse)
}

/// Temp file in the same directory, fsync, rename, then fsync the directory.
fn write_record(dir: &Path, path: &Path, record: &StateRecord) -> Result<(), StateError> {
  let content = serde_json::to_vec_pretty(record).map_err(StateError::Serialize)?;

  let mut temp = tempfile::NamedTempFile::new_in(dir).map_err(StateError::Write)?;
  temp.write_all(&content).map_err(StateError::Write)?;
  temp.as_file().sync_all().map_err(StateError::Write)?;
  temp.persist(path).map_err(|e| StateError::Write(e.error))?;

  #[cfg(unix)]
  fs::File::open(dir)
    .and_then(|d| d.sync_all())
    .map_err(StateError::Write)?;

  trace!(path = %path.display(), bytes = content.len(), "wrote state file");
  Ok(())
}
