use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use super::{LocalRuntime, required_str};
use crate::provider::{DiffRules, ProviderError, ResourceProvider, ResourceRequest};
use crate::util::hash::hash_bytes;
use crate::value::Properties;

const KIND: &str = "image";

/// Pulled image. Pulling never touches a registry: the digest is derived
/// from the reference.
pub struct ImageProvider {
  runtime: Arc<LocalRuntime>,
  rules: DiffRules,
}

impl ImageProvider {
  pub fn new(runtime: Arc<LocalRuntime>) -> Self {
    Self {
      runtime,
      rules: DiffRules::new()
        .replace_on("name")
        .with_create_before_delete(true),
    }
  }

  fn outputs(inputs: &Properties) -> Result<Properties, ProviderError> {
    let name = required_str(inputs, "name")?;
    validate_reference(name)?;

    let mut outputs = Properties::new();
    outputs.insert("name".to_string(), json!(name));
    outputs.insert("repo_digest".to_string(), json!(repo_digest(name)));
    outputs.insert(
      "keep_locally".to_string(),
      inputs.get("keep_locally").cloned().unwrap_or(Value::Bool(false)),
    );
    Ok(outputs)
  }
}

/// Accepts references like `mongo:bionic`, `ghcr.io/org/app:1.2` or
/// `app@sha256:...`.
fn validate_reference(name: &str) -> Result<(), ProviderError> {
  if name.chars().any(char::is_whitespace) {
    return Err(ProviderError::invalid("name", format!("'{name}' contains whitespace")));
  }
  if name.chars().any(|c| c.is_ascii_uppercase()) {
    return Err(ProviderError::invalid(
      "name",
      format!("'{name}': repository names must be lowercase"),
    ));
  }
  if !name
    .chars()
    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '/' | ':' | '@'))
  {
    return Err(ProviderError::invalid("name", format!("'{name}' is not a valid image reference")));
  }
  if name.starts_with(['/', ':', '.', '-', '@']) || name.ends_with(['/', ':', '@']) {
    return Err(ProviderError::invalid("name", format!("'{name}' is not a valid image reference")));
  }
  Ok(())
}

/// Repository without tag, pinned to a content digest.
fn repo_digest(name: &str) -> String {
  let repo = match name.split_once('@') {
    Some((repo, _)) => repo,
    None => {
      let last_slash = name.rfind('/').map(|i| i + 1).unwrap_or(0);
      match name[last_slash..].rfind(':') {
        Some(colon) => &name[..last_slash + colon],
        None => name,
      }
    }
  };
  format!("{repo}@sha256:{}", hash_bytes(name.as_bytes()))
}

#[async_trait]
impl ResourceProvider for ImageProvider {
  fn kind(&self) -> &str {
    KIND
  }

  fn diff_rules(&self) -> &DiffRules {
    &self.rules
  }

  async fn create(&self, request: &ResourceRequest) -> Result<Properties, ProviderError> {
    let outputs = Self::outputs(&request.inputs)?;

    let _guard = self.runtime.lock().await;
    let object = self.runtime.new_object(&request.urn(), outputs, Vec::new());
    self.runtime.put(KIND, &object).await?;
    Ok(object.outputs)
  }

  async fn read(&self, request: &ResourceRequest) -> Result<Option<Properties>, ProviderError> {
    let _guard = self.runtime.lock().await;
    Ok(self.runtime.lookup(KIND, request).await?.map(|o| o.outputs))
  }

  async fn update(&self, request: &ResourceRequest) -> Result<Properties, ProviderError> {
    let mut outputs = Self::outputs(&request.inputs)?;

    let _guard = self.runtime.lock().await;
    let Some(mut object) = self.runtime.recorded(KIND, request).await? else {
      return Err(ProviderError::NotFound(request.urn()));
    };
    if let Some(keep) = outputs.remove("keep_locally") {
      object.outputs.insert("keep_locally".to_string(), keep);
    }
    self.runtime.put(KIND, &object).await?;
    Ok(object.outputs)
  }

  async fn delete(&self, request: &ResourceRequest) -> Result<(), ProviderError> {
    let _guard = self.runtime.lock().await;
    match self.runtime.recorded(KIND, request).await? {
      Some(object) => self.runtime.remove(KIND, &object.id).await,
      None => Ok(()),
    }
  }
}
