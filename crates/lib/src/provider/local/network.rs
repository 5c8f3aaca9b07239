use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use super::{LocalRuntime, optional_str, required_str};
use crate::provider::{DiffRules, ProviderError, ResourceProvider, ResourceRequest};
use crate::value::Properties;

const KIND: &str = "network";
const DEFAULT_DRIVER: &str = "bridge";

/// Named virtual network. Names are unique across the runtime.
pub struct NetworkProvider {
  runtime: Arc<LocalRuntime>,
  rules: DiffRules,
}

impl NetworkProvider {
  pub fn new(runtime: Arc<LocalRuntime>) -> Self {
    Self {
      runtime,
      rules: DiffRules::new().replace_on("name").replace_on("driver"),
    }
  }

  fn outputs(inputs: &Properties) -> Result<Properties, ProviderError> {
    let name = required_str(inputs, "name")?;
    let driver = optional_str(inputs, "driver")?.unwrap_or(DEFAULT_DRIVER);
    let labels = match inputs.get("labels") {
      None | Some(Value::Null) => json!({}),
      Some(Value::Object(map)) => Value::Object(map.clone()),
      Some(other) => return Err(ProviderError::invalid("labels", format!("expected a map, got {other}"))),
    };

    let mut outputs = Properties::new();
    outputs.insert("name".to_string(), json!(name));
    outputs.insert("driver".to_string(), json!(driver));
    outputs.insert("labels".to_string(), labels);
    Ok(outputs)
  }
}

#[async_trait]
impl ResourceProvider for NetworkProvider {
  fn kind(&self) -> &str {
    KIND
  }

  fn diff_rules(&self) -> &DiffRules {
    &self.rules
  }

  async fn create(&self, request: &ResourceRequest) -> Result<Properties, ProviderError> {
    let outputs = Self::outputs(&request.inputs)?;
    let name = required_str(&request.inputs, "name")?;

    let _guard = self.runtime.lock().await;
    if let Some(existing) = self.runtime.find_by_output(KIND, "name", name).await?.first() {
      return Err(ProviderError::Conflict(format!(
        "network '{name}' already exists ({})",
        existing.id
      )));
    }

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
    if let Some(labels) = outputs.remove("labels") {
      object.outputs.insert("labels".to_string(), labels);
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
