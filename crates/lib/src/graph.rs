//! Resource graph construction.
//!
//! The graph builder turns a list of declarations into a DAG whose edges run
//! from a dependency to its dependent. Edges come from two sources:
//!
//! - explicit `depends_on` hints
//! - implicit references, when an input refers to another resource's output
//!
//! Construction is a pure transformation: no provider is consulted.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use thiserror::Error;
use tracing::debug;

use crate::resource::{IdError, ResourceId, ResourceSpec, StackId};

/// Why an edge exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeKind {
  /// Declared with `depends_on`.
  Explicit,
  /// Derived from an output reference in the inputs.
  Implicit,
}

/// A dependency cycle, listed in "depends on" order with the first resource
/// repeated at the end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CyclePath(pub Vec<ResourceId>);

impl CyclePath {
  /// The distinct resources on the cycle.
  pub fn members(&self) -> &[ResourceId] {
    &self.0[..self.0.len().saturating_sub(1)]
  }
}

impl fmt::Display for CyclePath {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let parts: Vec<String> = self.0.iter().map(ToString::to_string).collect();
    f.write_str(&parts.join(" -> "))
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
  #[error("duplicate resource {0}: names must be unique per kind within a stack")]
  DuplicateName(ResourceId),

  #[error("dependency cycle: {path}")]
  Cycle { path: CyclePath },

  #[error("resource {resource} depends on {dependency}, which is not declared")]
  MissingDependency {
    resource: ResourceId,
    dependency: ResourceId,
  },

  #[error("invalid resource {id}: {source}")]
  InvalidName {
    id: ResourceId,
    #[source]
    source: IdError,
  },
}

/// The desired state of one run: declarations plus dependency edges.
#[derive(Debug)]
pub struct ResourceGraph {
  stack: StackId,
  graph: DiGraph<ResourceId, EdgeKind>,
  nodes: HashMap<ResourceId, NodeIndex>,
  specs: BTreeMap<ResourceId, ResourceSpec>,
}

impl ResourceGraph {
  /// Build a graph from declarations.
  ///
  /// Node indices follow declaration order, which makes every query below
  /// deterministic.
  ///
  /// # Errors
  ///
  /// - `InvalidName` if a kind or name has characters outside `[A-Za-z0-9_.-]`
  /// - `DuplicateName` if two declarations share `(kind, name)`
  /// - `MissingDependency` if an explicit hint or reference names an undeclared resource
  /// - `Cycle` if the edges contain a cycle
  pub fn build(stack: StackId, specs: Vec<ResourceSpec>) -> Result<Self, GraphError> {
    let mut graph = DiGraph::new();
    let mut nodes = HashMap::new();
    let mut ordered = Vec::with_capacity(specs.len());

    for spec in specs {
      spec.id.validate().map_err(|source| GraphError::InvalidName {
        id: spec.id.clone(),
        source,
      })?;

      if nodes.contains_key(&spec.id) {
        return Err(GraphError::DuplicateName(spec.id));
      }

      let idx = graph.add_node(spec.id.clone());
      nodes.insert(spec.id.clone(), idx);
      ordered.push(spec);
    }

    for spec in &ordered {
      let dependent = nodes[&spec.id];
      let references = spec.references();

      let mut deps: BTreeMap<&ResourceId, EdgeKind> = BTreeMap::new();
      for dep in &spec.depends_on {
        deps.insert(dep, EdgeKind::Explicit);
      }
      for dep in &references {
        deps.insert(dep, EdgeKind::Implicit);
      }

      for (dep, kind) in deps {
        let Some(&dep_idx) = nodes.get(dep) else {
          return Err(GraphError::MissingDependency {
            resource: spec.id.clone(),
            dependency: dep.clone(),
          });
        };
        graph.add_edge(dep_idx, dependent, kind);
      }
    }

    let specs = ordered.into_iter().map(|spec| (spec.id.clone(), spec)).collect();
    let built = Self {
      stack,
      graph,
      nodes,
      specs,
    };

    if let Some(path) = built.find_cycle() {
      return Err(GraphError::Cycle { path });
    }

    debug!(
      stack = %built.stack,
      resources = built.graph.node_count(),
      edges = built.graph.edge_count(),
      "built resource graph"
    );

    Ok(built)
  }

  /// Depth-first search along "depends on" edges, in declaration order.
  fn find_cycle(&self) -> Option<CyclePath> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
      Unvisited,
      Active,
      Done,
    }

    fn visit(
      graph: &DiGraph<ResourceId, EdgeKind>,
      idx: NodeIndex,
      marks: &mut [Mark],
      stack: &mut Vec<NodeIndex>,
    ) -> Option<Vec<NodeIndex>> {
      marks[idx.index()] = Mark::Active;
      stack.push(idx);

      let mut deps: Vec<NodeIndex> = graph.neighbors_directed(idx, Direction::Incoming).collect();
      deps.sort();

      for dep in deps {
        match marks[dep.index()] {
          Mark::Active => {
            let start = stack.iter().position(|&n| n == dep).unwrap_or(0);
            let mut cycle = stack[start..].to_vec();
            cycle.push(dep);
            return Some(cycle);
          }
          Mark::Unvisited => {
            if let Some(cycle) = visit(graph, dep, marks, stack) {
              return Some(cycle);
            }
          }
          Mark::Done => {}
        }
      }

      stack.pop();
      marks[idx.index()] = Mark::Done;
      None
    }

    let mut marks = vec![Mark::Unvisited; self.graph.node_count()];
    for idx in self.graph.node_indices() {
      if marks[idx.index()] == Mark::Unvisited {
        let mut stack = Vec::new();
        if let Some(cycle) = visit(&self.graph, idx, &mut marks, &mut stack) {
          return Some(CyclePath(cycle.into_iter().map(|n| self.graph[n].clone()).collect()));
        }
      }
    }
    None
  }

  pub fn stack(&self) -> &StackId {
    &self.stack
  }

  pub fn len(&self) -> usize {
    self.graph.node_count()
  }

  pub fn is_empty(&self) -> bool {
    self.graph.node_count() == 0
  }

  pub fn contains(&self, id: &ResourceId) -> bool {
    self.nodes.contains_key(id)
  }

  pub fn spec(&self, id: &ResourceId) -> Option<&ResourceSpec> {
    self.specs.get(id)
  }

  /// Resource ids in declaration order.
  pub fn ids(&self) -> impl Iterator<Item = &ResourceId> {
    self.graph.node_indices().map(|idx| &self.graph[idx])
  }

  /// Direct dependencies of `id`.
  pub fn dependencies(&self, id: &ResourceId) -> BTreeSet<ResourceId> {
    self.neighbors(id, Direction::Incoming)
  }

  /// Direct dependents of `id`.
  pub fn dependents(&self, id: &ResourceId) -> BTreeSet<ResourceId> {
    self.neighbors(id, Direction::Outgoing)
  }

  fn neighbors(&self, id: &ResourceId, direction: Direction) -> BTreeSet<ResourceId> {
    let Some(&idx) = self.nodes.get(id) else {
      return BTreeSet::new();
    };
    self
      .graph
      .neighbors_directed(idx, direction)
      .map(|n| self.graph[n].clone())
      .collect()
  }

  /// Kind of the edge `dependency -> dependent`, if any.
  pub fn edge_kind(&self, dependency: &ResourceId, dependent: &ResourceId) -> Option<EdgeKind> {
    let from = *self.nodes.get(dependency)?;
    let to = *self.nodes.get(dependent)?;
    self.graph.find_edge(from, to).map(|e| self.graph[e])
  }

  /// Dependencies before dependents; ties broken by declaration order.
  pub fn topological_order(&self) -> Vec<ResourceId> {
    let mut in_degree: Vec<usize> = self
      .graph
      .node_indices()
      .map(|idx| self.graph.neighbors_directed(idx, Direction::Incoming).count())
      .collect();

    let mut ready: BTreeSet<NodeIndex> = self.graph.node_indices().filter(|idx| in_degree[idx.index()] == 0).collect();
    let mut order = Vec::with_capacity(self.graph.node_count());

    while let Some(idx) = ready.pop_first() {
      order.push(self.graph[idx].clone());
      for next in self.graph.neighbors_directed(idx, Direction::Outgoing) {
        in_degree[next.index()] -= 1;
        if in_degree[next.index()] == 0 {
          ready.insert(next);
        }
      }
    }

    order
  }

  /// Groups of resources whose dependencies are all in earlier groups.
  pub fn waves(&self) -> Vec<Vec<ResourceId>> {
    let levels = levels(&self.graph).unwrap_or_default();
    let mut waves: Vec<Vec<ResourceId>> = Vec::new();
    for idx in self.graph.node_indices() {
      let level = levels[idx.index()];
      if waves.len() <= level {
        waves.resize_with(level + 1, Vec::new);
      }
      waves[level].push(self.graph[idx].clone());
    }
    waves
  }
}

/// Kahn levels for every node, indexed by `NodeIndex::index()`.
///
/// Returns `None` if the graph has a cycle.
pub(crate) fn levels<N, E>(graph: &DiGraph<N, E>) -> Option<Vec<usize>> {
  let count = graph.node_count();
  let mut in_degree: Vec<usize> = graph
    .node_indices()
    .map(|idx| graph.neighbors_directed(idx, Direction::Incoming).count())
    .collect();
  let mut level = vec![0usize; count];
  let mut current: Vec<NodeIndex> = graph.node_indices().filter(|idx| in_degree[idx.index()] == 0).collect();
  let mut seen = 0;
  let mut depth = 0;

  while !current.is_empty() {
    let mut next = Vec::new();
    for &idx in &current {
      level[idx.index()] = depth;
      seen += 1;
      for dependent in graph.neighbors_directed(idx, Direction::Outgoing) {
        in_degree[dependent.index()] -= 1;
        if in_degree[dependent.index()] == 0 {
          next.push(dependent);
        }
      }
    }
    current = next;
    depth += 1;
  }

  (seen == count).then_some(level)
}
