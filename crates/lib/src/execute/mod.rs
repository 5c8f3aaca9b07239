//! Scheduler/executor.
//!
//! Runs the provider operations of a plan with dynamic ready-set scheduling:
//! an operation starts as soon as every operation it waits for has
//! succeeded, bounded by a global semaphore. Failures are collected, not
//! thrown: the failed operation's transitive successors are skipped and
//! independent work continues.
//!
//! The executor owns the staged [`StateRecord`] and is its only writer. Each
//! mutation is bracketed by checkpoints: the record is marked `pending`
//! before the provider is called, and the result is recorded right after.

pub mod apply;
pub mod ops;
pub mod resolver;
pub mod types;

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::diff::{Action, Plan, property_changes, replace_order};
use crate::placeholder::Resolution;
use crate::graph::ResourceGraph;
use crate::provider::{DiffRules, ProviderError, ProviderRegistry, ResourceProvider, ResourceRequest};
use crate::resource::{ReplaceStrategy, ResourceId};
use crate::state::{Instance, ResourceState, ResourceStatus, StateError, StateRecord, unix_now};
use crate::value::{Properties, into_properties, resolve_inputs};

use ops::{OpKind, OperationGraph};
use petgraph::graph::NodeIndex;
use resolver::StagedResolver;

pub use apply::{ApplyError, ApplyResult, StackContext};
pub use types::{ExecuteConfig, ExecuteError, ExecutionResult, NodeStatus, OutcomeCounts, ResourceOutcome};

/// Durable save of the staged state record.
pub trait Checkpoint {
  fn checkpoint(&mut self, record: &StateRecord) -> Result<(), StateError>;
}

/// Provider calls for one operation.
enum Work {
  Create(ResourceRequest),
  Update(ResourceRequest),
  Delete(ResourceRequest),
  Replace {
    order: ReplaceStrategy,
    old: ResourceRequest,
    new: ResourceRequest,
  },
}

/// What the provider calls of one operation returned.
#[derive(Default)]
struct WorkResult {
  applied: Option<Result<Properties, ProviderError>>,
  deleted: Option<Result<(), ProviderError>>,
}

async fn run_work(provider: Arc<dyn ResourceProvider>, work: Work) -> WorkResult {
  match work {
    Work::Create(request) => WorkResult {
      applied: Some(provider.create(&request).await),
      deleted: None,
    },
    Work::Update(request) => WorkResult {
      applied: Some(provider.update(&request).await),
      deleted: None,
    },
    Work::Delete(request) => WorkResult {
      applied: None,
      deleted: Some(provider.delete(&request).await),
    },
    Work::Replace {
      order: ReplaceStrategy::DeleteBeforeCreate,
      old,
      new,
    } => {
      let deleted = provider.delete(&old).await;
      let applied = match deleted {
        Ok(()) => Some(provider.create(&new).await),
        Err(_) => None,
      };
      WorkResult {
        applied,
        deleted: Some(deleted),
      }
    }
    Work::Replace {
      order: ReplaceStrategy::CreateBeforeDelete,
      old,
      new,
    } => {
      let applied = provider.create(&new).await;
      let deleted = match applied {
        Ok(_) => Some(provider.delete(&old).await),
        Err(_) => None,
      };
      WorkResult {
        applied: Some(applied),
        deleted,
      }
    }
  }
}

/// How the result of a launched operation is folded into the state.
#[derive(Debug, Clone)]
enum Effect {
  /// A new instance; `old` is kept aside when it is still running.
  Create { inputs: Properties, old: Option<Instance> },
  Update { inputs: Properties },
  /// Both halves of a replace in one operation.
  Replace { inputs: Properties, old: Instance },
  /// Delete the live instance, leaving the record for its replacement.
  DeleteCurrent,
  DeleteReplaced,
  Remove,
}

struct Launched {
  resource: ResourceId,
  kind: OpKind,
  effect: Effect,
  /// Record before the pending mark.
  before: Option<ResourceState>,
}

#[derive(Debug, Clone)]
enum NodeState {
  Waiting,
  Running,
  Done(NodeStatus),
}

struct Executor<'a> {
  graph: &'a ResourceGraph,
  plan: &'a Plan,
  providers: &'a ProviderRegistry,
  config: &'a ExecuteConfig,
  checkpoint: &'a mut dyn Checkpoint,
  ops: OperationGraph,
  state: StateRecord,
  nodes: Vec<NodeState>,
  waiting_on: Vec<usize>,
  ready: BTreeSet<NodeIndex>,
  actions: BTreeMap<ResourceId, Action>,
  store_error: Option<StateError>,
}

/// Execute `plan` against `state`, the reconciled prior record.
///
/// Never fails as a whole: provider errors are reported per resource, a
/// checkpoint failure stops new work and is returned in `store_error`.
pub async fn execute(
  graph: &ResourceGraph,
  plan: &Plan,
  state: StateRecord,
  providers: &ProviderRegistry,
  config: &ExecuteConfig,
  cancel: &CancellationToken,
  checkpoint: &mut dyn Checkpoint,
) -> ExecutionResult {
  let ops = OperationGraph::build(graph, &plan.entries, Some(&state));
  let waiting_on: Vec<usize> = ops.indices().map(|idx| ops.predecessors(idx).count()).collect();
  let ready = ops.indices().filter(|idx| waiting_on[idx.index()] == 0).collect();

  info!(
    stack = %plan.stack,
    operations = ops.len(),
    parallelism = config.parallelism,
    "starting execution"
  );

  let mut executor = Executor {
    graph,
    plan,
    providers,
    config,
    checkpoint,
    nodes: vec![NodeState::Waiting; ops.len()],
    ops,
    state,
    waiting_on,
    ready,
    actions: plan.entries.iter().map(|(id, e)| (id.clone(), e.action)).collect(),
    store_error: None,
  };
  let cancelled = executor.run(cancel).await;
  executor.finish(cancelled)
}

impl Executor<'_> {
  async fn run(&mut self, cancel: &CancellationToken) -> bool {
    let semaphore = (self.config.parallelism > 0).then(|| Arc::new(Semaphore::new(self.config.parallelism)));
    let mut tasks: JoinSet<(NodeIndex, WorkResult)> = JoinSet::new();
    let mut running: HashMap<NodeIndex, Launched> = HashMap::new();
    let mut halted = false;
    let mut cancelled = false;

    loop {
      while !halted {
        if cancel.is_cancelled() {
          cancelled = true;
          halted = true;
          break;
        }
        let Some(&idx) = self.ready.first() else { break };
        let permit: Option<OwnedSemaphorePermit> = match &semaphore {
          Some(semaphore) => match semaphore.clone().try_acquire_owned() {
            Ok(permit) => Some(permit),
            Err(_) => break,
          },
          None => None,
        };
        self.ready.remove(&idx);

        let Some((work, launched, provider)) = self.prepare(idx) else { continue };
        if let Err(e) = self.checkpoint() {
          self.abort_launch(idx, &launched, e);
          halted = true;
          break;
        }

        debug!(resource = %launched.resource, op = ?launched.kind, "starting operation");
        self.nodes[idx.index()] = NodeState::Running;
        running.insert(idx, launched);
        tasks.spawn(async move {
          let result = run_work(provider, work).await;
          drop(permit);
          (idx, result)
        });
      }

      if tasks.is_empty() {
        break;
      }

      tokio::select! {
        biased;
        joined = tasks.join_next() => match joined {
          Some(Ok((idx, result))) => {
            if let Some(launched) = running.remove(&idx) {
              self.complete(idx, launched, result);
            }
          }
          Some(Err(e)) => error!(error = %e, "operation task panicked"),
          None => {}
        },
        _ = cancel.cancelled(), if !halted => {
          info!("cancellation requested, waiting for in-flight operations");
          cancelled = true;
          halted = true;
        }
      }

      if self.store_error.is_some() {
        halted = true;
      }
    }

    // Only tasks that panicked are left.
    for (idx, launched) in running {
      self.restore(&launched);
      self.fail(idx, &launched.resource, ExecuteError::Panicked(launched.kind));
    }

    cancelled
  }

  /// Stage the pending mark for `idx` and build its provider work.
  ///
  /// Returns `None` when the operation finished without a provider call.
  fn prepare(&mut self, idx: NodeIndex) -> Option<(Work, Launched, Arc<dyn ResourceProvider>)> {
    let op = self.ops.operation(idx).clone();
    let id = op.resource.clone();
    let before = self.state.get(&id).cloned();
    let Some(provider) = self.providers.get(&id.kind) else {
      self.fail(idx, &id, ExecuteError::UnknownKind(id.kind.clone()));
      return None;
    };

    let (work, effect) = match op.kind {
      OpKind::Create | OpKind::Update | OpKind::Retain | OpKind::CreateReplacement => {
        let inputs = match self.resolve(&id) {
          Ok(inputs) => inputs,
          Err(e) => {
            self.fail(idx, &id, e);
            return None;
          }
        };
        self.prepare_apply(idx, op.kind, &id, inputs, before.as_ref(), provider.diff_rules())?
      }
      OpKind::DeleteReplaced => {
        let record = before.as_ref();
        if let Some(old) = record.and_then(|r| r.replaced.clone()) {
          (Work::Delete(self.request(&id, old.inputs, Some(old.outputs))), Effect::DeleteReplaced)
        } else if let Some(old) = record.and_then(ResourceState::instance) {
          (Work::Delete(self.request(&id, old.inputs, Some(old.outputs))), Effect::DeleteCurrent)
        } else {
          self.done(idx, NodeStatus::Succeeded);
          return None;
        }
      }
      OpKind::Delete => match before.as_ref().and_then(ResourceState::instance) {
        Some(old) => (Work::Delete(self.request(&id, old.inputs, Some(old.outputs))), Effect::Remove),
        None => {
          self.state.resources.remove(&id);
          debug!(resource = %id, "dropped record that never reached the provider");
          self.done(idx, NodeStatus::Succeeded);
          return None;
        }
      },
    };

    // A new instance is staged without outputs so an interrupted run finds
    // it by reading. The instance it replaces moves aside first.
    let record = self.state.resources.entry(id.clone()).or_default();
    let staged = match &effect {
      Effect::Create { inputs, old } => Some((inputs, old.clone())),
      Effect::Replace { inputs, old } => Some((inputs, Some(old.clone()))),
      _ => None,
    };
    if let Some((inputs, old)) = staged {
      record.inputs = inputs.clone();
      record.outputs = None;
      if old.is_some() {
        record.replaced = old;
      }
    }
    record.status = ResourceStatus::Pending;
    record.updated_at = unix_now();

    Some((
      work,
      Launched {
        resource: id,
        kind: op.kind,
        effect,
        before,
      },
      provider,
    ))
  }

  fn prepare_apply(
    &mut self,
    idx: NodeIndex,
    kind: OpKind,
    id: &ResourceId,
    inputs: Properties,
    before: Option<&ResourceState>,
    rules: &DiffRules,
  ) -> Option<(Work, Effect)> {
    let current = before.and_then(ResourceState::instance);

    let Some(old) = current else {
      return Some((
        Work::Create(self.request(id, inputs.clone(), None)),
        Effect::Create { inputs, old: None },
      ));
    };

    if kind == OpKind::CreateReplacement {
      return Some((
        Work::Create(self.request(id, inputs.clone(), None)),
        Effect::Create { inputs, old: Some(old) },
      ));
    }

    let resolved: BTreeMap<String, Resolution> = inputs
      .iter()
      .map(|(k, v)| (k.clone(), Resolution::Known(v.clone())))
      .collect();
    let changes = property_changes(&old.inputs, &resolved, rules);
    let healthy = before.is_some_and(|r| r.status == ResourceStatus::Healthy);

    if changes.iter().any(|c| c.forces_replace) {
      let requested = self.graph.spec(id).and_then(|s| s.options.replace);
      let order = replace_order(requested, self.config.replace_strategy, rules);
      info!(resource = %id, %order, "resolved inputs require a replace");
      self.actions.insert(id.clone(), Action::Replace);
      let old_request = self.request(id, old.inputs.clone(), Some(old.outputs.clone()));
      return Some((
        Work::Replace {
          order,
          old: old_request,
          new: self.request(id, inputs.clone(), None),
        },
        Effect::Replace { inputs, old },
      ));
    }

    if kind == OpKind::Retain && changes.is_empty() && healthy {
      if let Some(record) = self.state.resources.get_mut(id) {
        record.dependencies = self.graph.dependencies(id);
      }
      self.done(idx, NodeStatus::Unchanged);
      return None;
    }

    if kind == OpKind::Retain {
      debug!(resource = %id, changes = changes.len(), "resolved inputs changed, updating");
      self.actions.insert(id.clone(), Action::Update);
    }
    Some((
      Work::Update(self.request(id, inputs.clone(), Some(old.outputs))),
      Effect::Update { inputs },
    ))
  }

  fn resolve(&self, id: &ResourceId) -> Result<Properties, ExecuteError> {
    let Some(spec) = self.graph.spec(id) else {
      return Ok(Properties::new());
    };
    let resolved = resolve_inputs(&spec.inputs, &StagedResolver::new(&self.state))?;
    into_properties(resolved).map_err(ExecuteError::UnknownInput)
  }

  fn request(&self, id: &ResourceId, inputs: Properties, prior_outputs: Option<Properties>) -> ResourceRequest {
    ResourceRequest {
      stack: self.plan.stack.clone(),
      id: id.clone(),
      inputs,
      prior_outputs,
    }
  }

  /// Fold a finished operation into the staged state.
  fn complete(&mut self, idx: NodeIndex, launched: Launched, result: WorkResult) {
    let id = launched.resource.clone();
    let deps = self.graph.dependencies(&id);
    let now = unix_now();
    let mut failure: Option<ExecuteError> = None;

    match launched.effect.clone() {
      Effect::Create { inputs, old } => {
        let applied = result.applied.unwrap_or_else(|| Err(ProviderError::Failed("not attempted".into())));
        match (applied, old) {
          (Ok(outputs), old) => {
            self.state.resources.insert(
              id.clone(),
              ResourceState {
                inputs,
                outputs: Some(outputs),
                dependencies: deps,
                status: ResourceStatus::Healthy,
                replaced: old,
                error: None,
                updated_at: now,
              },
            );
          }
          (Err(e), None) => {
            self.state.resources.insert(
              id.clone(),
              ResourceState {
                inputs,
                outputs: None,
                dependencies: deps,
                status: ResourceStatus::Failed,
                replaced: None,
                error: Some(e.to_string()),
                updated_at: now,
              },
            );
            failure = Some(ExecuteError::provider("create", e));
          }
          (Err(e), Some(_)) => {
            self.restore_failed(&launched, &e);
            failure = Some(ExecuteError::provider("create", e));
          }
        }
      }

      Effect::Update { inputs } => match result.applied {
        Some(Ok(outputs)) => {
          let record = self.state.resources.entry(id.clone()).or_default();
          record.inputs = inputs;
          record.outputs = Some(outputs);
          record.dependencies = deps;
          record.status = ResourceStatus::Healthy;
          record.error = None;
          record.updated_at = now;
        }
        Some(Err(e)) => {
          self.restore_failed(&launched, &e);
          failure = Some(ExecuteError::provider("update", e));
        }
        None => {}
      },

      Effect::Replace { inputs, old } => {
        let record = ResourceState {
          inputs,
          outputs: None,
          dependencies: deps,
          status: ResourceStatus::Healthy,
          replaced: None,
          error: None,
          updated_at: now,
        };
        match (result.applied, result.deleted) {
          (Some(Ok(outputs)), Some(Ok(()))) => {
            self.state.resources.insert(
              id.clone(),
              ResourceState {
                outputs: Some(outputs),
                ..record
              },
            );
          }
          // Delete-before-create: the old instance is gone, the new one is not.
          (Some(Err(e)), Some(Ok(()))) => {
            self.state.resources.insert(
              id.clone(),
              ResourceState {
                status: ResourceStatus::Failed,
                error: Some(e.to_string()),
                ..record
              },
            );
            failure = Some(ExecuteError::provider("create", e));
          }
          // Create-before-delete: the new instance is up, the old one lingers.
          (Some(Ok(outputs)), Some(Err(e))) => {
            self.state.resources.insert(
              id.clone(),
              ResourceState {
                outputs: Some(outputs),
                replaced: Some(old),
                error: Some(e.to_string()),
                ..record
              },
            );
            failure = Some(ExecuteError::provider("delete", e));
          }
          (Some(Err(e)), _) => {
            self.restore_failed(&launched, &e);
            failure = Some(ExecuteError::provider("create", e));
          }
          (_, Some(Err(e))) => {
            self.restore_failed(&launched, &e);
            failure = Some(ExecuteError::provider("delete", e));
          }
          (None, _) | (_, None) => {
            self.restore(&launched);
          }
        }
      }

      Effect::DeleteCurrent => match result.deleted {
        Some(Ok(())) => {
          if let Some(record) = self.state.resources.get_mut(&id) {
            record.outputs = None;
            record.updated_at = now;
          }
        }
        Some(Err(e)) => {
          self.restore_failed(&launched, &e);
          failure = Some(ExecuteError::provider("delete", e));
        }
        None => {}
      },

      Effect::DeleteReplaced => match result.deleted {
        Some(Ok(())) => {
          if let Some(record) = self.state.resources.get_mut(&id) {
            record.replaced = None;
            record.status = ResourceStatus::Healthy;
            record.updated_at = now;
          }
        }
        Some(Err(e)) => {
          self.restore(&launched);
          if let Some(record) = self.state.resources.get_mut(&id) {
            record.error = Some(e.to_string());
          }
          failure = Some(ExecuteError::provider("delete", e));
        }
        None => {}
      },

      Effect::Remove => match result.deleted {
        Some(Ok(())) => {
          self.state.resources.remove(&id);
        }
        Some(Err(e)) => {
          self.restore_failed(&launched, &e);
          failure = Some(ExecuteError::provider("delete", e));
        }
        None => {}
      },
    }

    match failure {
      Some(error) => {
        error!(resource = %id, op = ?launched.kind, error = %error, "operation failed");
        self.fail(idx, &id, error);
      }
      None => {
        info!(resource = %id, op = ?launched.kind, "operation succeeded");
        self.done(idx, NodeStatus::Succeeded);
      }
    }

    if let Err(e) = self.checkpoint() {
      error!(error = %e, "failed to checkpoint state, halting");
      self.store_error.get_or_insert(e);
    }
  }

  fn checkpoint(&mut self) -> Result<(), StateError> {
    self.state.touch();
    self.checkpoint.checkpoint(&self.state)
  }

  /// Undo the pending mark of an operation whose checkpoint failed.
  fn abort_launch(&mut self, idx: NodeIndex, launched: &Launched, error: StateError) {
    error!(resource = %launched.resource, error = %error, "failed to checkpoint pending state, halting");
    self.restore(launched);
    self.store_error.get_or_insert(error);
    self.nodes[idx.index()] = NodeState::Done(NodeStatus::Cancelled);
  }

  fn restore(&mut self, launched: &Launched) {
    match &launched.before {
      Some(record) => {
        self.state.resources.insert(launched.resource.clone(), record.clone());
      }
      None => {
        self.state.resources.remove(&launched.resource);
      }
    }
  }

  fn restore_failed(&mut self, launched: &Launched, error: &ProviderError) {
    self.restore(launched);
    if let Some(record) = self.state.resources.get_mut(&launched.resource) {
      record.status = ResourceStatus::Failed;
      record.error = Some(error.to_string());
      record.updated_at = unix_now();
    }
  }

  /// Record a terminal status and release successors on success.
  fn done(&mut self, idx: NodeIndex, status: NodeStatus) {
    let release = matches!(status, NodeStatus::Succeeded | NodeStatus::Unchanged);
    self.nodes[idx.index()] = NodeState::Done(status);
    if !release {
      return;
    }
    let successors: Vec<NodeIndex> = self.ops.successors(idx).collect();
    for next in successors {
      let waiting = &mut self.waiting_on[next.index()];
      *waiting = waiting.saturating_sub(1);
      if *waiting == 0 && matches!(self.nodes[next.index()], NodeState::Waiting) {
        self.ready.insert(next);
      }
    }
  }

  /// Mark `idx` failed and skip everything downstream of it.
  fn fail(&mut self, idx: NodeIndex, id: &ResourceId, error: ExecuteError) {
    self.done(idx, NodeStatus::Failed { error: error.to_string() });

    let mut queue: VecDeque<NodeIndex> = self.ops.successors(idx).collect();
    while let Some(next) = queue.pop_front() {
      if !matches!(self.nodes[next.index()], NodeState::Waiting) {
        continue;
      }
      let skipped = &self.ops.operation(next).resource;
      warn!(resource = %skipped, failed_dependency = %id, "skipping operation");
      self.nodes[next.index()] = NodeState::Done(NodeStatus::Skipped {
        failed_dependency: id.clone(),
      });
      self.ready.remove(&next);
      queue.extend(self.ops.successors(next));
    }
  }

  fn finish(mut self, cancelled: bool) -> ExecutionResult {
    let mut outcomes: BTreeMap<ResourceId, ResourceOutcome> = BTreeMap::new();
    for idx in self.ops.indices() {
      let status = match &self.nodes[idx.index()] {
        NodeState::Done(status) => status.clone(),
        NodeState::Waiting | NodeState::Running => NodeStatus::Cancelled,
      };
      let resource = self.ops.operation(idx).resource.clone();
      let action = self.actions.get(&resource).copied().unwrap_or(Action::NoOp);
      outcomes
        .entry(resource)
        .and_modify(|o| o.status = o.status.clone().merge(status.clone()))
        .or_insert(ResourceOutcome { action, status });
    }
    self.state.touch();

    let result = ExecutionResult {
      outcomes,
      state: self.state,
      store_error: self.store_error,
      cancelled,
    };
    let counts = result.counts();
    info!(
      succeeded = counts.succeeded,
      failed = counts.failed,
      skipped = counts.skipped,
      unchanged = counts.unchanged,
      cancelled = counts.cancelled,
      "execution finished"
    );
    result
  }
}
