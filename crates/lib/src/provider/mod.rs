//! Provider capability interface.
//!
//! Every resource kind is backed by a [`ResourceProvider`]. The engine never
//! special-cases a kind: provider behavior reaches the core only through
//! [`DiffRules`] and the four operations. Providers are looked up by kind tag
//! in a [`ProviderRegistry`].

pub mod local;
pub mod rules;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::resource::{ResourceId, StackId};
use crate::value::Properties;

pub use rules::{DiffRules, PropertyRule};

/// Errors returned by provider operations.
///
/// These are localized to the resource that produced them: the executor
/// records them and keeps going with independent work.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
  #[error("invalid input '{property}': {message}")]
  InvalidInput { property: String, message: String },

  #[error("not found: {0}")]
  NotFound(String),

  #[error("conflict: {0}")]
  Conflict(String),

  #[error("{0}")]
  Failed(String),

  #[error("io error: {0}")]
  Io(String),
}

impl ProviderError {
  pub fn invalid(property: &str, message: impl Into<String>) -> Self {
    ProviderError::InvalidInput {
      property: property.to_string(),
      message: message.into(),
    }
  }
}

impl From<std::io::Error> for ProviderError {
  fn from(e: std::io::Error) -> Self {
    ProviderError::Io(e.to_string())
  }
}

/// Everything a provider needs to act on one resource instance.
#[derive(Debug, Clone)]
pub struct ResourceRequest {
  pub stack: StackId,
  pub id: ResourceId,
  /// Desired inputs for create/update; last-applied inputs for read/delete.
  pub inputs: Properties,
  /// Outputs recorded for the existing instance, if any.
  pub prior_outputs: Option<Properties>,
}

impl ResourceRequest {
  pub fn urn(&self) -> String {
    self.id.urn(&self.stack)
  }
}

#[async_trait]
pub trait ResourceProvider: Send + Sync {
  /// Kind tag this provider serves, e.g. `container`.
  fn kind(&self) -> &str;

  fn diff_rules(&self) -> &DiffRules;

  async fn create(&self, request: &ResourceRequest) -> Result<Properties, ProviderError>;

  /// Observe the live instance. `Ok(None)` means it does not exist.
  async fn read(&self, request: &ResourceRequest) -> Result<Option<Properties>, ProviderError>;

  async fn update(&self, request: &ResourceRequest) -> Result<Properties, ProviderError>;

  /// Remove the instance. Deleting an instance that is already gone succeeds.
  async fn delete(&self, request: &ResourceRequest) -> Result<(), ProviderError>;
}

/// Providers indexed by kind tag.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
  providers: HashMap<String, Arc<dyn ResourceProvider>>,
}

impl ProviderRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn register(&mut self, provider: Arc<dyn ResourceProvider>) {
    self.providers.insert(provider.kind().to_string(), provider);
  }

  pub fn with(mut self, provider: Arc<dyn ResourceProvider>) -> Self {
    self.register(provider);
    self
  }

  pub fn get(&self, kind: &str) -> Option<Arc<dyn ResourceProvider>> {
    self.providers.get(kind).cloned()
  }

  pub fn contains(&self, kind: &str) -> bool {
    self.providers.contains_key(kind)
  }

  /// Registered kinds, sorted.
  pub fn kinds(&self) -> Vec<&str> {
    let mut kinds: Vec<&str> = self.providers.keys().map(String::as_str).collect();
    kinds.sort_unstable();
    kinds
  }
}

impl fmt::Debug for ProviderRegistry {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ProviderRegistry").field("kinds", &self.kinds()).finish()
  }
}
