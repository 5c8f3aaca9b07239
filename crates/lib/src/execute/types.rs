//! Execution configuration, per-resource outcomes and errors.

use std::collections::BTreeMap;

use serde::Serialize;
use thiserror::Error;

use crate::consts::DEFAULT_PARALLELISM;
use crate::diff::Action;
use crate::placeholder::PlaceholderError;
use crate::provider::ProviderError;
use crate::resource::{ReplaceStrategy, ResourceId};
use crate::state::{StateError, StateRecord};

use super::ops::OpKind;

/// Execution configuration.
#[derive(Debug, Clone)]
pub struct ExecuteConfig {
  /// Maximum concurrent provider operations. `0` means unbounded.
  pub parallelism: usize,
  /// Replace order for resources that do not choose one.
  pub replace_strategy: ReplaceStrategy,
}

impl Default for ExecuteConfig {
  fn default() -> Self {
    Self {
      parallelism: DEFAULT_PARALLELISM,
      replace_strategy: ReplaceStrategy::default(),
    }
  }
}

/// Why one operation failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecuteError {
  #[error("{op} failed: {source}")]
  Provider {
    op: &'static str,
    #[source]
    source: ProviderError,
  },

  #[error("cannot resolve inputs: {0}")]
  Placeholder(#[from] PlaceholderError),

  #[error("input '{0}' is still unknown after its producer completed")]
  UnknownInput(String),

  #[error("no provider registered for kind '{0}'")]
  UnknownKind(String),

  #[error("{0:?} operation panicked")]
  Panicked(OpKind),
}

impl ExecuteError {
  pub(crate) fn provider(op: &'static str, source: ProviderError) -> Self {
    ExecuteError::Provider { op, source }
  }
}

/// Terminal status of a resource after a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum NodeStatus {
  Succeeded,
  Failed { error: String },
  /// Not attempted because `failed_dependency` failed.
  Skipped { failed_dependency: ResourceId },
  /// Nothing to do.
  Unchanged,
  /// Abandoned after cancellation or a state store failure.
  Cancelled,
}

impl NodeStatus {
  /// Precedence when a resource has more than one operation.
  fn rank(&self) -> u8 {
    match self {
      NodeStatus::Failed { .. } => 4,
      NodeStatus::Skipped { .. } => 3,
      NodeStatus::Cancelled => 2,
      NodeStatus::Succeeded => 1,
      NodeStatus::Unchanged => 0,
    }
  }

  pub(crate) fn merge(self, other: NodeStatus) -> NodeStatus {
    if other.rank() > self.rank() { other } else { self }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceOutcome {
  /// The action actually taken; may differ from the plan when a no-op or
  /// update turned out to need more once inputs were resolved.
  pub action: Action,
  #[serde(flatten)]
  pub status: NodeStatus,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OutcomeCounts {
  pub succeeded: usize,
  pub failed: usize,
  pub skipped: usize,
  pub unchanged: usize,
  pub cancelled: usize,
}

/// Result of executing a plan.
#[derive(Debug)]
pub struct ExecutionResult {
  pub outcomes: BTreeMap<ResourceId, ResourceOutcome>,
  /// Staged state at the end of the run.
  pub state: StateRecord,
  /// Set when a checkpoint failed; the run is not durable.
  pub store_error: Option<StateError>,
  pub cancelled: bool,
}

impl ExecutionResult {
  pub fn counts(&self) -> OutcomeCounts {
    let mut counts = OutcomeCounts::default();
    for outcome in self.outcomes.values() {
      match outcome.status {
        NodeStatus::Succeeded => counts.succeeded += 1,
        NodeStatus::Failed { .. } => counts.failed += 1,
        NodeStatus::Skipped { .. } => counts.skipped += 1,
        NodeStatus::Unchanged => counts.unchanged += 1,
        NodeStatus::Cancelled => counts.cancelled += 1,
      }
    }
    counts
  }

  pub fn status(&self, id: &ResourceId) -> Option<&NodeStatus> {
    self.outcomes.get(id).map(|o| &o.status)
  }

  pub fn failures(&self) -> impl Iterator<Item = (&ResourceId, &str)> {
    self.outcomes.iter().filter_map(|(id, o)| match &o.status {
      NodeStatus::Failed { error } => Some((id, error.as_str())),
      _ => None,
    })
  }

  /// Every operation succeeded or had nothing to do, and the state is durable.
  pub fn is_success(&self) -> bool {
    self.store_error.is_none()
      && self
        .outcomes
        .values()
        .all(|o| matches!(o.status, NodeStatus::Succeeded | NodeStatus::Unchanged))
  }
}
