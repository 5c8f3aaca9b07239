//! Stack orchestration.
//!
//! [`StackContext`] threads the stack id, providers, state store, execution
//! config and cancellation token through one command:
//!
//! 1. Build the desired graph
//! 2. Lock the stack (shared for preview, exclusive otherwise)
//! 3. Load the prior record and settle `pending` entries with provider reads
//! 4. Compute the plan
//! 5. Execute it, checkpointing after every operation
//! 6. Save the final record and a history copy

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::diff::{Plan, PlanError, check_kinds, compute_plan};
use crate::graph::{GraphError, ResourceGraph};
use crate::provider::{ProviderRegistry, ResourceRequest};
use crate::resource::{ResourceId, ResourceSpec, StackId};
use crate::state::{LockMode, ResourceStatus, StackLockError, StateError, StateRecord, StateStore};

use super::types::{ExecuteConfig, ExecutionResult};
use super::{Checkpoint, execute};

#[derive(Debug, Error)]
pub enum ApplyError {
  #[error(transparent)]
  Graph(#[from] GraphError),

  #[error(transparent)]
  Plan(#[from] PlanError),

  #[error("state store error: {0}")]
  State(#[from] StateError),

  #[error(transparent)]
  Lock(#[from] StackLockError),
}

impl ApplyError {
  /// Whether the error is a problem with the program rather than the run.
  pub fn is_configuration(&self) -> bool {
    matches!(self, ApplyError::Graph(_) | ApplyError::Plan(_))
  }
}

#[derive(Debug)]
pub struct ApplyResult {
  pub plan: Plan,
  pub execution: ExecutionResult,
}

impl ApplyResult {
  pub fn is_success(&self) -> bool {
    self.execution.is_success()
  }
}

/// Checkpoints straight to the state store.
struct StoreCheckpoint<'a> {
  store: &'a StateStore,
}

impl Checkpoint for StoreCheckpoint<'_> {
  fn checkpoint(&mut self, record: &StateRecord) -> Result<(), StateError> {
    self.store.save(&record.stack, record)
  }
}

/// Everything one command needs to act on a stack.
#[derive(Debug, Clone)]
pub struct StackContext {
  pub stack: StackId,
  pub providers: ProviderRegistry,
  pub store: StateStore,
  pub config: ExecuteConfig,
  pub cancel: CancellationToken,
  /// Re-read every recorded resource before planning.
  pub refresh: bool,
}

impl StackContext {
  pub fn new(stack: StackId, providers: ProviderRegistry, store: StateStore) -> Self {
    Self {
      stack,
      providers,
      store,
      config: ExecuteConfig::default(),
      cancel: CancellationToken::new(),
      refresh: false,
    }
  }

  pub fn with_config(mut self, config: ExecuteConfig) -> Self {
    self.config = config;
    self
  }

  pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
    self.cancel = cancel;
    self
  }

  pub fn with_refresh(mut self, refresh: bool) -> Self {
    self.refresh = refresh;
    self
  }

  /// Plan without changing anything, provider state included.
  pub async fn preview(&self, specs: Vec<ResourceSpec>) -> Result<Plan, ApplyError> {
    let graph = ResourceGraph::build(self.stack.clone(), specs)?;
    let _lock = self.store.lock(&self.stack, LockMode::Shared, "plan")?;

    let mut record = self
      .store
      .load(&self.stack)?
      .unwrap_or_else(|| StateRecord::new(self.stack.clone()));
    check_kinds(&graph, Some(&record), &self.providers)?;
    self.reconcile(&mut record).await;
    if self.refresh {
      self.refresh_all(&mut record).await;
    }

    Ok(compute_plan(
      &graph,
      Some(&record),
      &self.providers,
      self.config.replace_strategy,
    )?)
  }

  /// Drive the stack to `specs`.
  pub async fn apply(&self, specs: Vec<ResourceSpec>) -> Result<ApplyResult, ApplyError> {
    self.run(specs, "up").await
  }

  /// Delete every recorded resource, dependents first.
  pub async fn destroy(&self) -> Result<ApplyResult, ApplyError> {
    self.run(Vec::new(), "destroy").await
  }

  async fn run(&self, specs: Vec<ResourceSpec>, command: &str) -> Result<ApplyResult, ApplyError> {
    let graph = ResourceGraph::build(self.stack.clone(), specs)?;
    let _lock = self.store.lock(&self.stack, LockMode::Exclusive, command)?;

    let mut record = self
      .store
      .load(&self.stack)?
      .unwrap_or_else(|| StateRecord::new(self.stack.clone()));
    check_kinds(&graph, Some(&record), &self.providers)?;

    let mut dirty = self.reconcile(&mut record).await;
    dirty |= self.delete_replaced(&mut record).await;
    if self.refresh {
      dirty |= self.refresh_all(&mut record).await;
    }
    if dirty {
      record.touch();
      self.store.save(&self.stack, &record)?;
    }

    let plan = compute_plan(&graph, Some(&record), &self.providers, self.config.replace_strategy)?;
    let mutating = dirty || plan.has_changes();
    if mutating {
      record.serial += 1;
    }
    info!(
      stack = %self.stack,
      command,
      serial = record.serial,
      changes = plan.summary().changes(),
      "executing plan"
    );

    let mut checkpoint = StoreCheckpoint { store: &self.store };
    let mut execution = execute(
      &graph,
      &plan,
      record,
      &self.providers,
      &self.config,
      &self.cancel,
      &mut checkpoint,
    )
    .await;

    if mutating && execution.store_error.is_none() {
      let saved = self
        .store
        .save(&self.stack, &execution.state)
        .and_then(|()| self.store.save_history(&self.stack, &execution.state));
      if let Err(e) = saved {
        warn!(stack = %self.stack, error = %e, "failed to save final state");
        execution.store_error = Some(e);
      }
    }

    Ok(ApplyResult { plan, execution })
  }

  fn request(&self, record: &StateRecord, id: &ResourceId) -> Option<ResourceRequest> {
    let state = record.get(id)?;
    Some(ResourceRequest {
      stack: self.stack.clone(),
      id: id.clone(),
      inputs: state.inputs.clone(),
      prior_outputs: state.outputs.clone(),
    })
  }

  /// Settle records an interrupted run left `pending`.
  ///
  /// Found instances become healthy with their observed outputs. When the
  /// instance is gone the record is dropped, or falls back to the instance
  /// it was replacing. Reads of a record without outputs adopt whatever the
  /// provider finds for the resource, so a create that landed before the
  /// crash is never repeated.
  async fn reconcile(&self, record: &mut StateRecord) -> bool {
    let pending = record.pending();
    for id in &pending {
      let (Some(provider), Some(request)) = (self.providers.get(&id.kind), self.request(record, id)) else {
        continue;
      };
      let observed = match provider.read(&request).await {
        Ok(observed) => observed,
        Err(e) => {
          warn!(resource = %id, error = %e, "cannot read pending resource, leaving it pending");
          continue;
        }
      };

      let Some(state) = record.resources.get_mut(id) else { continue };
      let replaced = state.replaced.take();
      // A replacement that never landed reads back as the instance it replaces.
      let observed = observed.filter(|outputs| replaced.as_ref().is_none_or(|old| &old.outputs != outputs));
      match (observed, replaced) {
        (Some(outputs), replaced) => {
          debug!(resource = %id, "pending resource exists");
          state.outputs = Some(outputs);
          state.replaced = replaced;
          state.status = ResourceStatus::Healthy;
          state.error = None;
        }
        (None, Some(old)) => {
          debug!(resource = %id, "pending resource is gone, keeping the instance it replaced");
          state.inputs = old.inputs;
          state.outputs = Some(old.outputs);
          state.status = ResourceStatus::Healthy;
          state.error = None;
        }
        (None, None) => {
          debug!(resource = %id, "pending resource never landed");
          record.resources.remove(id);
        }
      }
    }
    if !pending.is_empty() {
      info!(stack = %self.stack, count = pending.len(), "reconciled pending resources");
    }
    !pending.is_empty()
  }

  /// Delete old instances left behind by an interrupted create-before-delete.
  async fn delete_replaced(&self, record: &mut StateRecord) -> bool {
    let mut changed = false;
    let leftovers: Vec<_> = record
      .resources
      .iter()
      .filter_map(|(id, state)| state.replaced.clone().map(|old| (id.clone(), old)))
      .collect();

    for (id, old) in leftovers {
      let Some(provider) = self.providers.get(&id.kind) else { continue };
      let request = ResourceRequest {
        stack: self.stack.clone(),
        id: id.clone(),
        inputs: old.inputs,
        prior_outputs: Some(old.outputs),
      };
      match provider.delete(&request).await {
        Ok(()) => {
          info!(resource = %id, "deleted replaced instance");
          if let Some(state) = record.resources.get_mut(&id) {
            state.replaced = None;
            state.error = None;
          }
          changed = true;
        }
        Err(e) => warn!(resource = %id, error = %e, "failed to delete replaced instance"),
      }
    }
    changed
  }

  /// Re-read every created resource. Vanished resources are forgotten so
  /// the plan creates them again.
  async fn refresh_all(&self, record: &mut StateRecord) -> bool {
    let mut changed = false;
    let created: Vec<_> = record
      .resources
      .iter()
      .filter(|(_, state)| state.is_created())
      .map(|(id, _)| id.clone())
      .collect();

    for id in created {
      let (Some(provider), Some(request)) = (self.providers.get(&id.kind), self.request(record, &id)) else {
        continue;
      };
      match provider.read(&request).await {
        Ok(Some(outputs)) => {
          if let Some(state) = record.resources.get_mut(&id)
            && state.outputs.as_ref() != Some(&outputs)
          {
            debug!(resource = %id, "outputs drifted");
            state.outputs = Some(outputs);
            changed = true;
          }
        }
        Ok(None) => {
          warn!(resource = %id, "resource no longer exists");
          record.resources.remove(&id);
          changed = true;
        }
        Err(e) => warn!(resource = %id, error = %e, "failed to refresh resource"),
      }
    }
    changed
  }
}
