use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::consts::STATE_VERSION;
use crate::resource::{ResourceId, StackId};
use crate::value::Properties;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
  #[default]
  Healthy,
  /// A provider mutation was started and its outcome is not yet recorded.
  Pending,
  Failed,
}

/// Last-applied inputs and observed outputs of one resource generation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Instance {
  pub inputs: Properties,
  pub outputs: Properties,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceState {
  pub inputs: Properties,
  /// `None` until a create has landed.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub outputs: Option<Properties>,
  #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
  pub dependencies: BTreeSet<ResourceId>,
  #[serde(default)]
  pub status: ResourceStatus,
  /// Old instance awaiting deletion during a create-before-delete replace.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub replaced: Option<Instance>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
  #[serde(default)]
  pub updated_at: u64,
}

impl ResourceState {
  pub fn is_created(&self) -> bool {
    self.outputs.is_some()
  }

  /// The live instance, if one exists.
  pub fn instance(&self) -> Option<Instance> {
    self.outputs.as_ref().map(|outputs| Instance {
      inputs: self.inputs.clone(),
      outputs: outputs.clone(),
    })
  }
}

/// Everything the store knows about one stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateRecord {
  pub version: u32,
  pub stack: StackId,
  /// Incremented once per mutating run.
  pub serial: u64,
  pub updated_at: u64,
  #[serde(default)]
  pub resources: BTreeMap<ResourceId, ResourceState>,
}

impl StateRecord {
  pub fn new(stack: StackId) -> Self {
    Self {
      version: STATE_VERSION,
      stack,
      serial: 0,
      updated_at: unix_now(),
      resources: BTreeMap::new(),
    }
  }

  pub fn get(&self, id: &ResourceId) -> Option<&ResourceState> {
    self.resources.get(id)
  }

  pub fn len(&self) -> usize {
    self.resources.len()
  }

  pub fn is_empty(&self) -> bool {
    self.resources.is_empty()
  }

  /// Ids whose record is `pending`.
  pub fn pending(&self) -> Vec<ResourceId> {
    self
      .resources
      .iter()
      .filter(|(_, r)| r.status == ResourceStatus::Pending)
      .map(|(id, _)| id.clone())
      .collect()
  }

  pub fn touch(&mut self) {
    self.updated_at = unix_now();
  }
}

pub(crate) fn unix_now() -> u64 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .map(|d| d.as_secs())
    .unwrap_or_default()
}

#[derive(Debug, Error)]
pub enum StateError {
  #[error("failed to create state directory: {0}")]
  CreateDir(#[source] io::Error),

  #[error("failed to read state: {0}")]
  Read(#[source] io::Error),

  #[error("failed to write state: {0}")]
  Write(#[source] io::Error),

  #[error("failed to parse state: {0}")]
  Parse(#[source] serde_json::Error),

  #[error("failed to serialize state: {0}")]
  Serialize(#[source] serde_json::Error),

  #[error("unsupported state version {found} (supported: {supported})")]
  UnsupportedVersion { found: u32, supported: u32 },
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn record_serializes_ids_as_strings() {
    let mut record = StateRecord::new(StackId::new("dev").unwrap());
    record.resources.insert(
      ResourceId::new("network", "net"),
      ResourceState {
        inputs: json!({ "name": "services" }).as_object().cloned().unwrap(),
        outputs: Some(json!({ "id": "abc" }).as_object().cloned().unwrap()),
        ..Default::default()
      },
    );

    let value = serde_json::to_value(&record).unwrap();
    assert_eq!(value["stack"], "dev");
    assert_eq!(value["resources"]["network/net"]["status"], "healthy");
    assert!(value["resources"]["network/net"].get("replaced").is_none());

    let back: StateRecord = serde_json::from_value(value).unwrap();
    assert_eq!(back, record);
  }

  #[test]
  fn pending_lists_only_pending_records() {
    let mut record = StateRecord::new(StackId::new("dev").unwrap());
    record.resources.insert(
      ResourceId::new("image", "a"),
      ResourceState {
        status: ResourceStatus::Pending,
        ..Default::default()
      },
    );
    record
      .resources
      .insert(ResourceId::new("image", "b"), ResourceState::default());

    assert_eq!(record.pending(), vec![ResourceId::new("image", "a")]);
  }
}
