//! Shared test helpers for CLI integration tests.

use std::path::{Path, PathBuf};

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use tempfile::TempDir;

/// Get path to a fixture file.
pub fn fixture_path(name: &str) -> PathBuf {
  PathBuf::from(env!("CARGO_MANIFEST_DIR"))
    .join("tests")
    .join("fixtures")
    .join(name)
}

/// Read fixture content.
pub fn fixture_content(name: &str) -> String {
  std::fs::read_to_string(fixture_path(name)).unwrap_or_else(|e| panic!("Failed to load fixture {}: {}", name, e))
}

/// Isolated test environment.
///
/// Each test gets its own temporary directory holding the program, the state
/// store and the local runtime.
pub struct TestEnv {
  pub temp: TempDir,
  pub program_path: PathBuf,
}

impl TestEnv {
  /// Create from a fixture program, copied to `index.lua`.
  pub fn from_fixture(name: &str) -> Self {
    let temp = TempDir::new().unwrap();
    let program_path = temp.path().join("index.lua");
    std::fs::write(&program_path, fixture_content(name)).unwrap();
    Self { temp, program_path }
  }

  /// The three-tier program with its `dev` stack configuration.
  pub fn three_tier() -> Self {
    let env = Self::from_fixture("three_tier.lua");
    env.write_file("Keel.dev.yaml", &fixture_content("Keel.dev.yaml"));
    env
  }

  /// Write a file relative to the temp directory.
  pub fn write_file(&self, relative_path: &str, content: &str) {
    let path = self.temp.path().join(relative_path);
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, content).unwrap();
  }

  /// Replace `key: ...` in the dev stack configuration.
  pub fn set_config(&self, key: &str, value: &str) {
    let path = self.temp.path().join("Keel.dev.yaml");
    let content = std::fs::read_to_string(&path).unwrap();
    let updated: Vec<String> = content
      .lines()
      .map(|line| {
        if line.trim_start().starts_with(&format!("{key}:")) {
          format!("  {key}: {value}")
        } else {
          line.to_string()
        }
      })
      .collect();
    std::fs::write(&path, updated.join("\n")).unwrap();
  }

  fn dir(&self, name: &str) -> PathBuf {
    let p = self.temp.path().join(name);
    std::fs::create_dir_all(&p).unwrap();
    dunce::canonicalize(&p).unwrap_or(p)
  }

  /// State store root (isolated per test).
  pub fn state_path(&self) -> PathBuf {
    self.dir("state")
  }

  /// Local runtime root (isolated per test).
  pub fn runtime_path(&self) -> PathBuf {
    self.dir("runtime")
  }

  /// Live runtime objects of `kind`.
  pub fn runtime_objects(&self, kind: &str) -> usize {
    let dir = self.runtime_path().join(kind);
    match std::fs::read_dir(dir) {
      Ok(entries) => entries
        .flatten()
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "json"))
        .count(),
      Err(_) => 0,
    }
  }

  pub fn state_file(&self, stack: &str) -> PathBuf {
    self.state_path().join(stack).join("state.json")
  }

  /// Get a pre-configured Command for the keel binary.
  ///
  /// Sets environment variables for isolated testing:
  /// - `KEEL_STATE_DIR`: Isolated state store
  /// - `KEEL_RUNTIME_DIR`: Isolated local runtime
  ///
  /// and clears `KEEL_STACK` and `RUST_LOG` so the host cannot leak in.
  pub fn keel_cmd(&self) -> Command {
    let mut cmd: Command = cargo_bin_cmd!("keel");
    cmd.env("KEEL_STATE_DIR", self.state_path());
    cmd.env("KEEL_RUNTIME_DIR", self.runtime_path());
    cmd.env_remove("KEEL_STACK");
    cmd.env_remove("RUST_LOG");
    cmd.current_dir(self.temp.path());
    cmd
  }

  /// `keel <command> --file index.lua`.
  pub fn run(&self, command: &str) -> Command {
    let mut cmd = self.keel_cmd();
    cmd.arg(command).arg("--file").arg(&self.program_path);
    cmd
  }

  pub fn path(&self) -> &Path {
    self.temp.path()
  }
}
