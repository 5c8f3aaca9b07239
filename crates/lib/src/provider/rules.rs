//! Per-provider diff rules.

use std::collections::BTreeMap;

/// How a single input property is compared and what a change to it means.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertyRule {
  /// A change forces delete + create instead of an in-place update.
  pub replace_on_change: bool,
  /// List order is significant. Unordered lists compare as multisets.
  pub ordered: bool,
}

impl Default for PropertyRule {
  fn default() -> Self {
    Self {
      replace_on_change: false,
      ordered: true,
    }
  }
}

/// Diff classification for every input of one resource kind.
///
/// Properties without an entry use [`PropertyRule::default`]: updated in
/// place, order-sensitive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffRules {
  pub properties: BTreeMap<String, PropertyRule>,
  /// The provider can run a new instance alongside the old one.
  pub create_before_delete: bool,
}

impl DiffRules {
  pub fn new() -> Self {
    Self::default()
  }

  /// Mark `property` as a replace trigger.
  pub fn replace_on(mut self, property: &str) -> Self {
    self.properties.entry(property.to_string()).or_default().replace_on_change = true;
    self
  }

  /// Mark `property` as an unordered list.
  pub fn unordered(mut self, property: &str) -> Self {
    self.properties.entry(property.to_string()).or_default().ordered = false;
    self
  }

  pub fn with_create_before_delete(mut self, supported: bool) -> Self {
    self.create_before_delete = supported;
    self
  }

  pub fn rule(&self, property: &str) -> PropertyRule {
    self.properties.get(property).copied().unwrap_or_default()
  }
}
