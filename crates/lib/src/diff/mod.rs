//! Diff engine.
//!
//! Compares the desired graph with the prior state record and assigns every
//! resource one [`Action`]. Resources are visited in topological order so a
//! dependency's action is settled before its dependents are compared: output
//! references into a resource that will be created or replaced are unknown
//! and always count as a change, otherwise they take the recorded output.

mod compare;
mod types;

use std::collections::BTreeMap;

use thiserror::Error;
use tracing::{debug, info};

use crate::execute::ops::OperationGraph;
use crate::graph::ResourceGraph;
use crate::placeholder::{OutputRef, PlaceholderError, Resolution, Resolver};
use crate::provider::{DiffRules, ProviderRegistry};
use crate::resource::{ReplaceStrategy, ResourceId};
use crate::state::{ResourceStatus, StateRecord};
use crate::value::resolve_inputs;

pub(crate) use compare::property_changes;
pub use types::{Action, ChangeKind, Plan, PlanEntry, PlanSummary, PropertyChange};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
  #[error("no provider registered for kind '{kind}' (resource {resource})")]
  UnknownKind { resource: ResourceId, kind: String },

  #[error("{0} is not an output of the recorded resource")]
  UnresolvedOutput(OutputRef),

  #[error("placeholder error: {0}")]
  Placeholder(PlaceholderError),
}

impl From<PlaceholderError> for PlanError {
  fn from(e: PlaceholderError) -> Self {
    match e {
      PlaceholderError::UnresolvedOutput(reference) => PlanError::UnresolvedOutput(reference),
      other => PlanError::Placeholder(other),
    }
  }
}

/// Fail unless every desired and recorded resource has a provider.
pub fn check_kinds(
  desired: &ResourceGraph,
  prior: Option<&StateRecord>,
  providers: &ProviderRegistry,
) -> Result<(), PlanError> {
  let recorded = prior.into_iter().flat_map(|p| p.resources.keys());
  for id in desired.ids().chain(recorded) {
    if !providers.contains(&id.kind) {
      return Err(PlanError::UnknownKind {
        resource: id.clone(),
        kind: id.kind.clone(),
      });
    }
  }
  Ok(())
}

/// Resolves references while planning.
struct PlanResolver<'a> {
  actions: &'a BTreeMap<ResourceId, PlanEntry>,
  prior: Option<&'a StateRecord>,
}

impl Resolver for PlanResolver<'_> {
  fn resolve_output(&self, reference: &OutputRef) -> Result<Resolution, PlaceholderError> {
    if matches!(
      self.actions.get(&reference.resource).map(|e| e.action),
      Some(Action::Create | Action::Replace)
    ) {
      return Ok(Resolution::Unknown);
    }

    self
      .prior
      .and_then(|p| p.get(&reference.resource))
      .and_then(|r| r.outputs.as_ref())
      .and_then(|outputs| outputs.get(&reference.output))
      .map(|v| Resolution::Known(v.clone()))
      .ok_or_else(|| PlaceholderError::UnresolvedOutput(reference.clone()))
  }
}

/// Replace order for a resource: its own option, else the run default,
/// falling back to delete-before-create when the provider cannot run two
/// instances side by side.
pub(crate) fn replace_order(requested: Option<ReplaceStrategy>, default: ReplaceStrategy, rules: &DiffRules) -> ReplaceStrategy {
  match requested.unwrap_or(default) {
    ReplaceStrategy::CreateBeforeDelete if rules.create_before_delete => ReplaceStrategy::CreateBeforeDelete,
    _ => ReplaceStrategy::DeleteBeforeCreate,
  }
}

/// Compute the plan that moves `prior` to `desired`.
///
/// # Errors
///
/// - `UnknownKind` if a desired or recorded resource has no provider
/// - `UnresolvedOutput` if a reference names an output the recorded producer
///   does not have
pub fn compute_plan(
  desired: &ResourceGraph,
  prior: Option<&StateRecord>,
  providers: &ProviderRegistry,
  default_replace: ReplaceStrategy,
) -> Result<Plan, PlanError> {
  check_kinds(desired, prior, providers)?;

  let mut entries: BTreeMap<ResourceId, PlanEntry> = BTreeMap::new();

  for id in desired.topological_order() {
    let Some(spec) = desired.spec(&id) else { continue };
    let Some(provider) = providers.get(&id.kind) else {
      return Err(PlanError::UnknownKind {
        resource: id.clone(),
        kind: id.kind.clone(),
      });
    };
    let rules = provider.diff_rules();

    let resolved = resolve_inputs(
      &spec.inputs,
      &PlanResolver {
        actions: &entries,
        prior,
      },
    )?;

    let recorded = prior.and_then(|p| p.get(&id)).filter(|r| r.is_created());
    let mut entry = match recorded {
      None => PlanEntry::new(Action::Create),
      Some(record) => {
        let changes = property_changes(&record.inputs, &resolved, rules);
        let action = if changes.iter().any(|c| c.forces_replace) {
          Action::Replace
        } else if !changes.is_empty() || record.status != ResourceStatus::Healthy {
          Action::Update
        } else {
          Action::NoOp
        };
        let mut entry = PlanEntry::new(action);
        entry.changes = changes;
        entry
      }
    };

    if entry.action == Action::Create {
      entry.changes = property_changes(&Default::default(), &resolved, rules);
    }
    if entry.action == Action::Replace {
      entry.replace_order = Some(replace_order(spec.options.replace, default_replace, rules));
    }
    entry.dependencies = desired.dependencies(&id);

    debug!(resource = %id, action = %entry.action, changes = entry.changes.len(), "planned resource");
    entries.insert(id, entry);
  }

  if let Some(prior) = prior {
    for (id, record) in &prior.resources {
      if !desired.contains(id) {
        let mut entry = PlanEntry::new(Action::Delete);
        entry.dependencies = record.dependencies.clone();
        entries.insert(id.clone(), entry);
      }
    }
  }

  let ops = OperationGraph::build(desired, &entries, prior);
  for (id, step) in ops.steps() {
    if let Some(entry) = entries.get_mut(&id) {
      entry.step = step;
    }
  }
  for id in ops.degraded() {
    if let Some(entry) = entries.get_mut(id) {
      entry.replace_order = Some(ReplaceStrategy::CreateBeforeDelete);
    }
  }

  let plan = Plan {
    stack: desired.stack().clone(),
    prior_serial: prior.map(|p| p.serial),
    entries,
  };

  let summary = plan.summary();
  info!(
    stack = %plan.stack,
    create = summary.create,
    update = summary.update,
    replace = summary.replace,
    delete = summary.delete,
    no_op = summary.no_op,
    "computed plan"
  );

  Ok(plan)
}
