use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::placeholder::Resolution;
use crate::resource::{ReplaceStrategy, ResourceId, StackId};
use crate::util::hash::Hashable;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
  Create,
  Update,
  Replace,
  Delete,
  NoOp,
}

impl Action {
  pub fn as_str(&self) -> &'static str {
    match self {
      Action::Create => "create",
      Action::Update => "update",
      Action::Replace => "replace",
      Action::Delete => "delete",
      Action::NoOp => "no-op",
    }
  }

  pub fn is_change(&self) -> bool {
    !matches!(self, Action::NoOp)
  }
}

impl fmt::Display for Action {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
  Added,
  Removed,
  Modified,
}

/// One differing input property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyChange {
  pub property: String,
  pub kind: ChangeKind,
  pub forces_replace: bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub before: Option<Value>,
  /// `Unknown` when the value depends on an output produced during apply.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub after: Option<Resolution>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanEntry {
  pub action: Action,
  /// 1-based execution step; entries sharing a step may run concurrently.
  pub step: usize,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub replace_order: Option<ReplaceStrategy>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub changes: Vec<PropertyChange>,
  #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
  pub dependencies: BTreeSet<ResourceId>,
}

impl PlanEntry {
  pub(crate) fn new(action: Action) -> Self {
    Self {
      action,
      step: 0,
      replace_order: None,
      changes: Vec::new(),
      dependencies: BTreeSet::new(),
    }
  }
}

/// Per-resource action counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PlanSummary {
  pub create: usize,
  pub update: usize,
  pub replace: usize,
  pub delete: usize,
  pub no_op: usize,
}

impl PlanSummary {
  pub fn changes(&self) -> usize {
    self.create + self.update + self.replace + self.delete
  }
}

impl fmt::Display for PlanSummary {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "{} to create, {} to update, {} to replace, {} to delete, {} unchanged",
      self.create, self.update, self.replace, self.delete, self.no_op
    )
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
  pub stack: StackId,
  /// Serial of the state record the plan was computed against.
  pub prior_serial: Option<u64>,
  pub entries: BTreeMap<ResourceId, PlanEntry>,
}

impl Hashable for Plan {}

impl Plan {
  pub fn get(&self, id: &ResourceId) -> Option<&PlanEntry> {
    self.entries.get(id)
  }

  pub fn action(&self, id: &ResourceId) -> Option<Action> {
    self.entries.get(id).map(|e| e.action)
  }

  pub fn summary(&self) -> PlanSummary {
    let mut summary = PlanSummary::default();
    for entry in self.entries.values() {
      match entry.action {
        Action::Create => summary.create += 1,
        Action::Update => summary.update += 1,
        Action::Replace => summary.replace += 1,
        Action::Delete => summary.delete += 1,
        Action::NoOp => summary.no_op += 1,
      }
    }
    summary
  }

  pub fn has_changes(&self) -> bool {
    self.entries.values().any(|e| e.action.is_change())
  }

  /// Entries by step, then id.
  pub fn ordered(&self) -> Vec<(&ResourceId, &PlanEntry)> {
    let mut entries: Vec<_> = self.entries.iter().collect();
    entries.sort_by(|(a_id, a), (b_id, b)| a.step.cmp(&b.step).then_with(|| a_id.cmp(b_id)));
    entries
  }
}
