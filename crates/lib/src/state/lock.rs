//! Per-stack advisory lock.
//!
//! Mutating commands hold the lock exclusively for the whole run; previews
//! hold it shared. The lock file carries JSON metadata about the holder so a
//! contending process can say who has it.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::resource::StackId;

pub(crate) const LOCK_FILENAME: &str = ".lock";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
  Shared,
  Exclusive,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LockMetadata {
  pub version: u32,
  pub pid: u32,
  pub started_at_unix: u64,
  pub command: String,
  pub stack: String,
}

#[derive(Debug, Error)]
pub enum StackLockError {
  #[error(
    "stack '{stack}' is locked by another process: {command} (PID {pid}, started at unix time {started_at})\n\
     If you're sure no keel process is running, remove the lock file:\n  {lock_path}"
  )]
  Contention {
    stack: String,
    command: String,
    pid: u32,
    started_at: u64,
    lock_path: PathBuf,
  },

  #[error(
    "stack is locked (could not read lock metadata)\n\
     If you're sure no keel process is running, remove the lock file:\n  {lock_path}"
  )]
  ContentionUnknown { lock_path: PathBuf },

  #[error("failed to create stack directory: {0}")]
  CreateDir(#[source] io::Error),

  #[error("failed to open lock file: {0}")]
  OpenFile(#[source] io::Error),

  #[error("failed to write lock metadata: {0}")]
  WriteMetadata(#[source] io::Error),

  #[error("failed to acquire lock: {0}")]
  LockFailed(#[source] io::Error),
}

/// Held lock on one stack directory. Released on drop.
#[derive(Debug)]
pub struct StackLock {
  file: File,
  lock_path: PathBuf,
  mode: LockMode,
}

impl StackLock {
  /// Try to take the lock in `dir` without blocking.
  pub fn acquire(dir: &Path, stack: &StackId, mode: LockMode, command: &str) -> Result<Self, StackLockError> {
    let lock_path = dir.join(LOCK_FILENAME);

    std::fs::create_dir_all(dir).map_err(StackLockError::CreateDir)?;

    let file = OpenOptions::new()
      .read(true)
      .write(true)
      .create(true)
      .truncate(false)
      .open(&lock_path)
      .map_err(StackLockError::OpenFile)?;

    if let Err(err) = try_lock(&file, mode) {
      if err.kind() == io::ErrorKind::WouldBlock {
        return Err(read_contention_error(&lock_path));
      }
      return Err(StackLockError::LockFailed(err));
    }

    if mode == LockMode::Exclusive {
      write_metadata(&file, stack, command)?;
    }
    debug!(stack = %stack, ?mode, command, "acquired stack lock");

    Ok(StackLock { file, lock_path, mode })
  }

  /// Read the metadata through the held handle. Opening a second handle
  /// would fail on Windows while the lock is held.
  pub fn read_metadata(&self) -> io::Result<LockMetadata> {
    let mut file = &self.file;
    file.seek(SeekFrom::Start(0))?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)?;
    serde_json::from_str(&contents).map_err(io::Error::other)
  }

  pub fn lock_path(&self) -> &Path {
    &self.lock_path
  }

  pub fn mode(&self) -> LockMode {
    self.mode
  }
}

fn write_metadata(file: &File, stack: &StackId, command: &str) -> Result<(), StackLockError> {
  let metadata = LockMetadata {
    version: 1,
    pid: std::process::id(),
    started_at_unix: SystemTime::now()
      .duration_since(UNIX_EPOCH)
      .unwrap_or_default()
      .as_secs(),
    command: command.to_string(),
    stack: stack.to_string(),
  };

  file.set_len(0).map_err(StackLockError::WriteMetadata)?;
  let mut writer = io::BufWriter::new(file);
  serde_json::to_writer_pretty(&mut writer, &metadata).map_err(|e| StackLockError::WriteMetadata(io::Error::other(e)))?;
  writer.flush().map_err(StackLockError::WriteMetadata)?;
  Ok(())
}

fn read_contention_error(lock_path: &Path) -> StackLockError {
  if let Ok(mut file) = File::open(lock_path) {
    let mut contents = String::new();
    if file.read_to_string(&mut contents).is_ok()
      && let Ok(metadata) = serde_json::from_str::<LockMetadata>(&contents)
    {
      return StackLockError::Contention {
        stack: metadata.stack,
        command: metadata.command,
        pid: metadata.pid,
        started_at: metadata.started_at_unix,
        lock_path: lock_path.to_path_buf(),
      };
    }
  }

  StackLockError::ContentionUnknown {
    lock_path: lock_path.to_path_buf(),
  }
}

#[cfg(unix)]
fn try_lock(file: &File, mode: LockMode) -> io::Result<()> {
  use rustix::fs::{FlockOperation, flock};
  use std::os::unix::io::AsFd;

  let operation = match mode {
    LockMode::Shared => FlockOperation::NonBlockingLockShared,
    LockMode::Exclusive => FlockOperation::NonBlockingLockExclusive,
  };

  flock(file.as_fd(), operation).map_err(|e| io::Error::from_raw_os_error(e.raw_os_error()))
}

#[cfg(windows)]
fn try_lock(file: &File, mode: LockMode) -> io::Result<()> {
  use std::os::windows::io::AsRawHandle;
  use windows_sys::Win32::Foundation::HANDLE;
  use windows_sys::Win32::Storage::FileSystem::{LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY, LockFileEx};

  let handle = file.as_raw_handle() as HANDLE;
  let flags = match mode {
    LockMode::Shared => LOCKFILE_FAIL_IMMEDIATELY,
    LockMode::Exclusive => LOCKFILE_FAIL_IMMEDIATELY | LOCKFILE_EXCLUSIVE_LOCK,
  };

  // SAFETY: OVERLAPPED is plain data and valid when zeroed; the handle is
  // owned by `file` for the duration of the call.
  let result = unsafe {
    let mut overlapped = std::mem::zeroed();
    LockFileEx(handle, flags, 0, 1, 0, &mut overlapped)
  };

  if result == 0 {
    Err(io::Error::last_os_error())
  } else {
    Ok(())
  }
}
