//! Resource identity and declarations.
//!
//! A resource is identified inside a stack by its kind tag and logical name,
//! rendered as `kind/name`. The stack qualifier is carried separately by
//! [`StackId`] so the same declarations can be applied to several stacks.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::value::PropertyValue;

/// Errors from parsing or validating identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdError {
  #[error("invalid resource id '{0}': expected 'kind/name'")]
  Malformed(String),

  #[error("invalid {field} '{value}': only letters, digits, '_', '.' and '-' are allowed")]
  InvalidCharacters { field: &'static str, value: String },
}

fn validate_segment(field: &'static str, value: &str) -> Result<(), IdError> {
  let valid = !value.is_empty()
    && value
      .chars()
      .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));
  if valid {
    Ok(())
  } else {
    Err(IdError::InvalidCharacters {
      field,
      value: value.to_string(),
    })
  }
}

/// Logical identity of a resource within a stack.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceId {
  pub kind: String,
  pub name: String,
}

impl ResourceId {
  /// Create an id without validation. [`ResourceId::validate`] is applied
  /// when the id enters a resource graph.
  pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
    Self {
      kind: kind.into(),
      name: name.into(),
    }
  }

  pub fn validate(&self) -> Result<(), IdError> {
    validate_segment("kind", &self.kind)?;
    validate_segment("name", &self.name)
  }

  /// The fully qualified name of this resource in `stack`.
  pub fn urn(&self, stack: &StackId) -> String {
    format!("{}::{}", stack, self)
  }
}

impl fmt::Display for ResourceId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}/{}", self.kind, self.name)
  }
}

impl FromStr for ResourceId {
  type Err = IdError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let (kind, name) = s.split_once('/').ok_or_else(|| IdError::Malformed(s.to_string()))?;
    let id = ResourceId::new(kind, name);
    id.validate()?;
    Ok(id)
  }
}

impl TryFrom<String> for ResourceId {
  type Error = IdError;

  fn try_from(value: String) -> Result<Self, Self::Error> {
    value.parse()
  }
}

impl From<ResourceId> for String {
  fn from(id: ResourceId) -> Self {
    id.to_string()
  }
}

/// Stack (environment) qualifier, e.g. `dev` or `prod`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StackId(String);

impl StackId {
  pub fn new(name: impl Into<String>) -> Result<Self, IdError> {
    let name = name.into();
    validate_segment("stack", &name)?;
    Ok(Self(name))
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for StackId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl FromStr for StackId {
  type Err = IdError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    StackId::new(s)
  }
}

impl TryFrom<String> for StackId {
  type Error = IdError;

  fn try_from(value: String) -> Result<Self, Self::Error> {
    StackId::new(value)
  }
}

impl From<StackId> for String {
  fn from(id: StackId) -> Self {
    id.0
  }
}

/// Ordering of the two halves of a replacement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReplaceStrategy {
  /// Delete the old instance, then create the new one.
  #[default]
  DeleteBeforeCreate,
  /// Create the new instance first; delete the old one once it is up.
  CreateBeforeDelete,
}

impl ReplaceStrategy {
  pub fn as_str(&self) -> &'static str {
    match self {
      ReplaceStrategy::DeleteBeforeCreate => "delete-before-create",
      ReplaceStrategy::CreateBeforeDelete => "create-before-delete",
    }
  }
}

impl fmt::Display for ReplaceStrategy {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for ReplaceStrategy {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "delete-before-create" => Ok(ReplaceStrategy::DeleteBeforeCreate),
      "create-before-delete" => Ok(ReplaceStrategy::CreateBeforeDelete),
      other => Err(format!(
        "unknown replace strategy '{other}' (expected 'delete-before-create' or 'create-before-delete')"
      )),
    }
  }
}

/// Per-resource options that are not provider inputs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceOptions {
  /// Overrides the run-wide replace strategy for this resource.
  pub replace: Option<ReplaceStrategy>,
}

/// A single resource declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceSpec {
  pub id: ResourceId,
  pub inputs: BTreeMap<String, PropertyValue>,
  pub depends_on: BTreeSet<ResourceId>,
  pub options: ResourceOptions,
}

impl ResourceSpec {
  pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
    Self {
      id: ResourceId::new(kind, name),
      inputs: BTreeMap::new(),
      depends_on: BTreeSet::new(),
      options: ResourceOptions::default(),
    }
  }

  pub fn input(mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
    self.inputs.insert(key.into(), value.into());
    self
  }

  pub fn depends_on(mut self, id: ResourceId) -> Self {
    self.depends_on.insert(id);
    self
  }

  pub fn replace(mut self, strategy: ReplaceStrategy) -> Self {
    self.options.replace = Some(strategy);
    self
  }

  /// Resources whose outputs are referenced by this declaration's inputs.
  pub fn references(&self) -> BTreeSet<ResourceId> {
    let mut refs = BTreeSet::new();
    for value in self.inputs.values() {
      value.collect_references(&mut refs);
    }
    refs
  }
}
