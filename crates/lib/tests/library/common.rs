//! Shared helpers for library integration tests.

use std::path::PathBuf;
use std::rc::Rc;

use keel_lib::config::MapConfig;
use keel_lib::eval::evaluate_program;
use keel_lib::execute::StackContext;
use keel_lib::provider::local;
use keel_lib::resource::{ResourceSpec, StackId};
use keel_lib::state::StateStore;
use tempfile::TempDir;

pub const PROGRAM: &str = r#"
local port = keel.config.require_number("frontend_port")
local mode = keel.config.get("mode") or "development"

local net = keel.network("net", { name = "services-" .. keel.stack })
local image = keel.image("web", { name = "nginx:1.27" })

keel.container("web", {
  name = "web-" .. keel.stack,
  image = image.outputs.repo_digest,
  ports = { { internal = 80, external = port } },
  envs = { "MODE=" .. mode },
  networks_advanced = { { name = net.outputs.name, aliases = { "web" } } },
})
"#;

/// A program directory, a state store and a runtime in one temp dir.
pub struct Workspace {
  pub temp: TempDir,
}

impl Workspace {
  pub fn new() -> Self {
    let temp = TempDir::new().unwrap();
    std::fs::write(temp.path().join("index.lua"), PROGRAM).unwrap();
    Self { temp }
  }

  pub fn program(&self) -> PathBuf {
    self.temp.path().join("index.lua")
  }

  pub fn store(&self) -> StateStore {
    StateStore::new(self.temp.path().join("state"))
  }

  pub fn context(&self, stack: &str) -> StackContext {
    StackContext::new(
      StackId::new(stack).unwrap(),
      local::registry(self.temp.path().join("runtime")),
      self.store(),
    )
  }

  /// Ids of the live runtime objects of `kind`, sorted.
  pub fn runtime_ids(&self, kind: &str) -> Vec<String> {
    let dir = self.temp.path().join("runtime").join(kind);
    let Ok(entries) = std::fs::read_dir(dir) else {
      return Vec::new();
    };
    let mut ids: Vec<String> = entries
      .map(|entry| entry.unwrap().path())
      .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
      .map(|path| path.file_stem().unwrap().to_string_lossy().into_owned())
      .collect();
    ids.sort();
    ids
  }

  /// Evaluate the program with `frontend_port` and an optional `mode`.
  pub fn specs(&self, stack: &str, port: u16, mode: Option<&str>) -> Vec<ResourceSpec> {
    let mut config = MapConfig::new().with("frontend_port", port.to_string());
    if let Some(mode) = mode {
      config = config.with("mode", mode);
    }
    evaluate_program(&self.program(), &StackId::new(stack).unwrap(), Rc::new(config)).unwrap()
  }
}
