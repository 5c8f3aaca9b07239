//! Operation graph.
//!
//! A plan names one action per resource; the executor runs provider
//! operations. Each resource contributes at most two nodes:
//!
//! - an *apply-side* node (`Create`, `Update`, `Retain`, `CreateReplacement`)
//! - a *delete-side* node (`Delete`, `DeleteReplaced`)
//!
//! Edges run from an operation to the operations that must wait for it:
//!
//! - apply-side nodes follow the desired dependency edges
//! - a create-before-delete replace deletes the old instance after the new
//!   one is up; delete-before-create is the reverse
//! - delete-side nodes wait for the delete-side nodes of resources that
//!   depended on them in the prior state, and for updates of dependents that
//!   still hold on to the old instance
//!
//! Edges that would close a cycle are dropped with a warning. Delete-before-
//! create edges are added last, so such a replace degrades to
//! create-before-delete instead of deadlocking.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use petgraph::Direction;
use petgraph::algo::has_path_connecting;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::Serialize;
use tracing::{debug, warn};

use crate::diff::{Action, PlanEntry};
use crate::graph::{ResourceGraph, levels};
use crate::resource::{ReplaceStrategy, ResourceId};
use crate::state::StateRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OpKind {
  Create,
  Update,
  /// Planned no-op; re-checked against resolved inputs at run time.
  Retain,
  CreateReplacement,
  DeleteReplaced,
  Delete,
}

impl OpKind {
  pub fn is_delete_side(&self) -> bool {
    matches!(self, OpKind::DeleteReplaced | OpKind::Delete)
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Operation {
  pub resource: ResourceId,
  pub kind: OpKind,
}

impl fmt::Display for Operation {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{:?}({})", self.kind, self.resource)
  }
}

#[derive(Debug)]
pub struct OperationGraph {
  graph: DiGraph<Operation, ()>,
  apply: BTreeMap<ResourceId, NodeIndex>,
  delete: BTreeMap<ResourceId, NodeIndex>,
  degraded: BTreeSet<ResourceId>,
  levels: Vec<usize>,
}

impl OperationGraph {
  pub fn build(desired: &ResourceGraph, entries: &BTreeMap<ResourceId, PlanEntry>, prior: Option<&StateRecord>) -> Self {
    let mut ops = Self {
      graph: DiGraph::new(),
      apply: BTreeMap::new(),
      delete: BTreeMap::new(),
      degraded: BTreeSet::new(),
      levels: Vec::new(),
    };

    for id in desired.topological_order() {
      let Some(entry) = entries.get(&id) else { continue };
      let kind = match entry.action {
        Action::Create => OpKind::Create,
        Action::Update => OpKind::Update,
        Action::NoOp => OpKind::Retain,
        Action::Replace => OpKind::CreateReplacement,
        Action::Delete => continue,
      };
      let idx = ops.add_node(&id, kind);
      ops.apply.insert(id, idx);
    }
    for (id, entry) in entries {
      let kind = match entry.action {
        Action::Replace => OpKind::DeleteReplaced,
        Action::Delete => OpKind::Delete,
        _ => continue,
      };
      let idx = ops.add_node(id, kind);
      ops.delete.insert(id.clone(), idx);
    }

    for id in desired.ids() {
      let Some(&to) = ops.apply.get(id) else { continue };
      for dep in desired.dependencies(id) {
        if let Some(&from) = ops.apply.get(&dep) {
          ops.add_edge(from, to);
        }
      }
    }

    let replace_order = |id: &ResourceId| entries.get(id).and_then(|e| e.replace_order);

    for (id, &old) in &ops.delete.clone() {
      if replace_order(id) == Some(ReplaceStrategy::CreateBeforeDelete)
        && let Some(&new) = ops.apply.get(id)
      {
        ops.add_edge(new, old);
      }
    }

    if let Some(prior) = prior {
      for (dependent, state) in &prior.resources {
        for dep in &state.dependencies {
          let Some(&dep_delete) = ops.delete.get(dep) else { continue };
          if let Some(&dependent_delete) = ops.delete.get(dependent) {
            ops.add_edge(dependent_delete, dep_delete);
          } else if entries.get(dependent).is_some_and(|e| e.action == Action::Update)
            && let Some(&dependent_apply) = ops.apply.get(dependent)
          {
            ops.add_edge(dependent_apply, dep_delete);
          }
        }
      }
    }

    for (id, &old) in &ops.delete.clone() {
      if replace_order(id) == Some(ReplaceStrategy::DeleteBeforeCreate)
        && let Some(&new) = ops.apply.get(id)
        && !ops.add_edge(old, new)
      {
        warn!(resource = %id, "replacing with create-before-delete to avoid a dependency cycle");
        ops.degraded.insert(id.clone());
      }
    }

    ops.levels = levels(&ops.graph).unwrap_or_else(|| vec![0; ops.graph.node_count()]);
    debug!(
      operations = ops.graph.node_count(),
      edges = ops.graph.edge_count(),
      "built operation graph"
    );
    ops
  }

  fn add_node(&mut self, id: &ResourceId, kind: OpKind) -> NodeIndex {
    self.graph.add_node(Operation {
      resource: id.clone(),
      kind,
    })
  }

  /// Add `from -> to` unless it would close a cycle.
  fn add_edge(&mut self, from: NodeIndex, to: NodeIndex) -> bool {
    if from == to || self.graph.contains_edge(from, to) {
      return from != to;
    }
    if has_path_connecting(&self.graph, to, from, None) {
      warn!(
        from = %self.graph[from],
        to = %self.graph[to],
        "dropping ordering edge that would close a cycle"
      );
      return false;
    }
    self.graph.add_edge(from, to, ());
    true
  }

  pub fn len(&self) -> usize {
    self.graph.node_count()
  }

  pub fn is_empty(&self) -> bool {
    self.graph.node_count() == 0
  }

  pub fn operation(&self, idx: NodeIndex) -> &Operation {
    &self.graph[idx]
  }

  pub fn indices(&self) -> impl Iterator<Item = NodeIndex> + '_ {
    self.graph.node_indices()
  }

  pub fn apply_node(&self, id: &ResourceId) -> Option<NodeIndex> {
    self.apply.get(id).copied()
  }

  pub fn delete_node(&self, id: &ResourceId) -> Option<NodeIndex> {
    self.delete.get(id).copied()
  }

  pub fn predecessors(&self, idx: NodeIndex) -> impl Iterator<Item = NodeIndex> + '_ {
    self.graph.neighbors_directed(idx, Direction::Incoming)
  }

  pub fn successors(&self, idx: NodeIndex) -> impl Iterator<Item = NodeIndex> + '_ {
    self.graph.neighbors_directed(idx, Direction::Outgoing)
  }

  /// Replacements that run create-before-delete despite asking for the
  /// opposite order.
  pub fn degraded(&self) -> &BTreeSet<ResourceId> {
    &self.degraded
  }

  /// 1-based step of each resource's first operation.
  pub fn steps(&self) -> BTreeMap<ResourceId, usize> {
    let mut steps: BTreeMap<ResourceId, usize> = BTreeMap::new();
    for idx in self.graph.node_indices() {
      let step = self.levels[idx.index()] + 1;
      steps
        .entry(self.graph[idx].resource.clone())
        .and_modify(|s| *s = (*s).min(step))
        .or_insert(step);
    }
    steps
  }

  /// Operations grouped by level.
  pub fn waves(&self) -> Vec<Vec<Operation>> {
    let mut waves: Vec<Vec<Operation>> = Vec::new();
    for idx in self.graph.node_indices() {
      let level = self.levels[idx.index()];
      if waves.len() <= level {
        waves.resize_with(level + 1, Vec::new);
      }
      waves[level].push(self.graph[idx].clone());
    }
    waves
  }
}
