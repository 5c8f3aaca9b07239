//! Output resolution during execution.

use crate::placeholder::{OutputRef, PlaceholderError, Resolution, Resolver};
use crate::state::StateRecord;

/// Resolves references against the staged state. Producers have finished
/// by the time a consumer starts, so every reference must be known.
pub struct StagedResolver<'a> {
  state: &'a StateRecord,
}

impl<'a> StagedResolver<'a> {
  pub fn new(state: &'a StateRecord) -> Self {
    Self { state }
  }
}

impl Resolver for StagedResolver<'_> {
  fn resolve_output(&self, reference: &OutputRef) -> Result<Resolution, PlaceholderError> {
    self
      .state
      .get(&reference.resource)
      .and_then(|r| r.outputs.as_ref())
      .and_then(|outputs| outputs.get(&reference.output))
      .map(|v| Resolution::Known(v.clone()))
      .ok_or_else(|| PlaceholderError::UnresolvedOutput(reference.clone()))
  }
}
