//! Local reference providers.
//!
//! A directory of JSON objects stands in for a container runtime: one file per
//! live object under `<root>/<kind>/<id>.json`. Objects remember which other
//! objects they use, so deleting an image or network that a container still
//! uses fails the way a real runtime would.

mod container;
mod image;
mod network;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{Mutex, MutexGuard};
use tracing::debug;

use super::{ProviderError, ProviderRegistry, ResourceRequest};
use crate::util::hash::hash_bytes;
use crate::value::Properties;

pub use container::ContainerProvider;
pub use image::ImageProvider;
pub use network::NetworkProvider;

/// A live object in the local runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeObject {
  pub id: String,
  pub urn: String,
  pub created_at: u64,
  pub outputs: Properties,
  /// Ids of objects this one uses.
  #[serde(default)]
  pub uses: Vec<String>,
}

/// File-backed object store shared by the local providers.
#[derive(Debug)]
pub struct LocalRuntime {
  root: PathBuf,
  guard: Mutex<()>,
  clock: AtomicU64,
}

impl LocalRuntime {
  pub fn new(root: impl Into<PathBuf>) -> Arc<Self> {
    Arc::new(Self {
      root: root.into(),
      guard: Mutex::new(()),
      clock: AtomicU64::new(0),
    })
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  /// Serialize runtime mutations. Helpers below assume the guard is held.
  pub(crate) async fn lock(&self) -> MutexGuard<'_, ()> {
    self.guard.lock().await
  }

  /// Strictly increasing timestamp in nanoseconds.
  fn stamp(&self) -> u64 {
    let now = SystemTime::now()
      .duration_since(UNIX_EPOCH)
      .map(|d| d.as_nanos() as u64)
      .unwrap_or_default();
    let prev = self
      .clock
      .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| Some(now.max(last + 1)))
      .unwrap_or(now);
    now.max(prev + 1)
  }

  fn kind_dir(&self, kind: &str) -> PathBuf {
    self.root.join(kind)
  }

  fn object_path(&self, kind: &str, id: &str) -> PathBuf {
    self.kind_dir(kind).join(format!("{id}.json"))
  }

  pub(crate) fn new_object(&self, urn: &str, outputs: Properties, uses: Vec<String>) -> RuntimeObject {
    let created_at = self.stamp();
    let id = hash_bytes(format!("{urn}:{created_at}").as_bytes()).truncated().0;
    let mut outputs = outputs;
    outputs.insert("id".to_string(), Value::String(id.clone()));
    RuntimeObject {
      id,
      urn: urn.to_string(),
      created_at,
      outputs,
      uses,
    }
  }

  pub(crate) async fn list(&self, kind: &str) -> Result<Vec<RuntimeObject>, ProviderError> {
    let dir = self.kind_dir(kind);
    let mut entries = match tokio::fs::read_dir(&dir).await {
      Ok(entries) => entries,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
      Err(e) => return Err(e.into()),
    };

    let mut objects = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
      let path = entry.path();
      if path.extension().is_some_and(|ext| ext == "json") {
        let content = tokio::fs::read_to_string(&path).await?;
        let object: RuntimeObject = serde_json::from_str(&content)
          .map_err(|e| ProviderError::Io(format!("corrupt object {}: {e}", path.display())))?;
        objects.push(object);
      }
    }
    objects.sort_by_key(|o| o.created_at);
    Ok(objects)
  }

  pub(crate) async fn get(&self, kind: &str, id: &str) -> Result<Option<RuntimeObject>, ProviderError> {
    match tokio::fs::read_to_string(self.object_path(kind, id)).await {
      Ok(content) => serde_json::from_str(&content)
        .map(Some)
        .map_err(|e| ProviderError::Io(format!("corrupt object {kind}/{id}: {e}"))),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
      Err(e) => Err(e.into()),
    }
  }

  pub(crate) async fn put(&self, kind: &str, object: &RuntimeObject) -> Result<(), ProviderError> {
    let dir = self.kind_dir(kind);
    tokio::fs::create_dir_all(&dir).await?;
    let content = serde_json::to_string_pretty(object).map_err(|e| ProviderError::Io(e.to_string()))?;
    let temp_path = dir.join(format!("{}.json.tmp", object.id));
    tokio::fs::write(&temp_path, content).await?;
    tokio::fs::rename(&temp_path, self.object_path(kind, &object.id)).await?;
    debug!(kind, id = %object.id, urn = %object.urn, "stored runtime object");
    Ok(())
  }

  /// Remove an object, refusing while another object still uses it.
  pub(crate) async fn remove(&self, kind: &str, id: &str) -> Result<(), ProviderError> {
    for user_kind in ["container", "image", "network"] {
      for object in self.list(user_kind).await? {
        if object.uses.iter().any(|used| used == id) {
          return Err(ProviderError::Conflict(format!(
            "{kind} {id} is still in use by {user_kind} {}",
            object.id
          )));
        }
      }
    }

    match tokio::fs::remove_file(self.object_path(kind, id)).await {
      Ok(()) => {
        debug!(kind, id, "removed runtime object");
        Ok(())
      }
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
      Err(e) => Err(e.into()),
    }
  }

  /// The object recorded in `request`'s prior outputs. `None` when no id
  /// was recorded or that object is gone.
  pub(crate) async fn recorded(&self, kind: &str, request: &ResourceRequest) -> Result<Option<RuntimeObject>, ProviderError> {
    match recorded_id(request) {
      Some(id) => self.get(kind, id).await,
      None => Ok(None),
    }
  }

  /// Find the object backing `request`: the recorded one when an id was
  /// recorded, otherwise the newest object created for the same URN.
  pub(crate) async fn lookup(&self, kind: &str, request: &ResourceRequest) -> Result<Option<RuntimeObject>, ProviderError> {
    if recorded_id(request).is_some() {
      return self.recorded(kind, request).await;
    }
    let urn = request.urn();
    Ok(self.list(kind).await?.into_iter().rev().find(|o| o.urn == urn))
  }

  /// Find objects of `kind` whose output `field` equals `value`.
  pub(crate) async fn find_by_output(
    &self,
    kind: &str,
    field: &str,
    value: &str,
  ) -> Result<Vec<RuntimeObject>, ProviderError> {
    Ok(
      self
        .list(kind)
        .await?
        .into_iter()
        .filter(|o| o.outputs.get(field).and_then(Value::as_str) == Some(value))
        .collect(),
    )
  }
}

fn recorded_id(request: &ResourceRequest) -> Option<&str> {
  request
    .prior_outputs
    .as_ref()
    .and_then(|outputs| outputs.get("id"))
    .and_then(Value::as_str)
}

/// Registry with the `network`, `image` and `container` providers backed by
/// a runtime rooted at `root`.
pub fn registry(root: impl Into<PathBuf>) -> ProviderRegistry {
  let runtime = LocalRuntime::new(root);
  ProviderRegistry::new()
    .with(Arc::new(NetworkProvider::new(runtime.clone())))
    .with(Arc::new(ImageProvider::new(runtime.clone())))
    .with(Arc::new(ContainerProvider::new(runtime)))
}

pub(crate) fn required_str<'a>(inputs: &'a Properties, key: &str) -> Result<&'a str, ProviderError> {
  match inputs.get(key) {
    Some(Value::String(s)) if !s.is_empty() => Ok(s),
    Some(Value::String(_)) => Err(ProviderError::invalid(key, "must not be empty")),
    Some(other) => Err(ProviderError::invalid(key, format!("expected a string, got {other}"))),
    None => Err(ProviderError::invalid(key, "is required")),
  }
}

pub(crate) fn optional_str<'a>(inputs: &'a Properties, key: &str) -> Result<Option<&'a str>, ProviderError> {
  match inputs.get(key) {
    None | Some(Value::Null) => Ok(None),
    Some(Value::String(s)) => Ok(Some(s)),
    Some(other) => Err(ProviderError::invalid(key, format!("expected a string, got {other}"))),
  }
}

pub(crate) fn optional_list<'a>(inputs: &'a Properties, key: &str) -> Result<&'a [Value], ProviderError> {
  match inputs.get(key) {
    None | Some(Value::Null) => Ok(&[]),
    Some(Value::Array(items)) => Ok(items),
    Some(other) => Err(ProviderError::invalid(key, format!("expected a list, got {other}"))),
  }
}
