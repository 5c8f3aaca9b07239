use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use super::{LocalRuntime, optional_list, required_str};
use crate::provider::{DiffRules, ProviderError, ResourceProvider, ResourceRequest};
use crate::value::Properties;

const KIND: &str = "container";

/// Running container attached to previously created images and networks.
pub struct ContainerProvider {
  runtime: Arc<LocalRuntime>,
  rules: DiffRules,
}

/// Validated container inputs plus the runtime objects they use.
struct Resolved {
  outputs: Properties,
  uses: Vec<String>,
}

impl ContainerProvider {
  pub fn new(runtime: Arc<LocalRuntime>) -> Self {
    Self {
      runtime,
      rules: DiffRules::new()
        .replace_on("name")
        .replace_on("image")
        .replace_on("ports")
        .unordered("ports")
        .replace_on("networks_advanced")
        .unordered("networks_advanced")
        .unordered("envs")
        .with_create_before_delete(true),
    }
  }

  /// Validate inputs against the runtime. Must be called with the runtime lock held.
  async fn resolve(&self, inputs: &Properties) -> Result<Resolved, ProviderError> {
    let name = required_str(inputs, "name")?;
    let image = required_str(inputs, "image")?;
    let ports = parse_ports(optional_list(inputs, "ports")?)?;
    let envs = parse_envs(optional_list(inputs, "envs")?)?;
    let networks = parse_networks(optional_list(inputs, "networks_advanced")?)?;

    let mut uses = Vec::new();

    let mut images = self.runtime.find_by_output("image", "repo_digest", image).await?;
    if images.is_empty() {
      images = self.runtime.find_by_output("image", "name", image).await?;
    }
    let Some(image_object) = images.pop() else {
      return Err(ProviderError::invalid("image", format!("image '{image}' has not been pulled")));
    };
    uses.push(image_object.id.clone());

    for network in &networks {
      let network_name = network["name"].as_str().unwrap_or_default();
      let Some(found) = self
        .runtime
        .find_by_output("network", "name", network_name)
        .await?
        .pop()
      else {
        return Err(ProviderError::invalid(
          "networks_advanced",
          format!("network '{network_name}' does not exist"),
        ));
      };
      uses.push(found.id);
    }

    let mut outputs = Properties::new();
    outputs.insert("name".to_string(), json!(name));
    outputs.insert("image".to_string(), json!(image));
    outputs.insert("image_id".to_string(), json!(image_object.id));
    outputs.insert("ports".to_string(), Value::Array(ports));
    outputs.insert("envs".to_string(), Value::Array(envs));
    outputs.insert("networks_advanced".to_string(), Value::Array(networks));
    outputs.insert("status".to_string(), json!("running"));

    Ok(Resolved { outputs, uses })
  }
}

fn as_port(value: Option<&Value>, field: &str) -> Result<Option<u16>, ProviderError> {
  let Some(value) = value.filter(|v| !v.is_null()) else {
    return Ok(None);
  };
  let port = value
    .as_f64()
    .filter(|n| n.fract() == 0.0 && (1.0..=65535.0).contains(n))
    .ok_or_else(|| ProviderError::invalid("ports", format!("{field} port {value} is not in 1..=65535")))?;
  Ok(Some(port as u16))
}

/// `{internal, external?}` entries; `external` defaults to `internal`.
fn parse_ports(items: &[Value]) -> Result<Vec<Value>, ProviderError> {
  items
    .iter()
    .map(|item| {
      let internal = as_port(item.get("internal"), "internal")?
        .ok_or_else(|| ProviderError::invalid("ports", "each port needs an 'internal' number"))?;
      let external = as_port(item.get("external"), "external")?.unwrap_or(internal);
      Ok(json!({ "internal": internal, "external": external }))
    })
    .collect()
}

fn parse_envs(items: &[Value]) -> Result<Vec<Value>, ProviderError> {
  items
    .iter()
    .map(|item| match item.as_str() {
      Some(env) if env.split_once('=').is_some_and(|(key, _)| !key.is_empty()) => Ok(item.clone()),
      _ => Err(ProviderError::invalid("envs", format!("expected 'KEY=value', got {item}"))),
    })
    .collect()
}

fn parse_networks(items: &[Value]) -> Result<Vec<Value>, ProviderError> {
  items
    .iter()
    .map(|item| {
      let name = item
        .get("name")
        .and_then(Value::as_str)
        .filter(|n| !n.is_empty())
        .ok_or_else(|| ProviderError::invalid("networks_advanced", "each entry needs a 'name'"))?;
      let aliases = match item.get("aliases") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(aliases)) => aliases.clone(),
        Some(other) => {
          return Err(ProviderError::invalid(
            "networks_advanced",
            format!("aliases must be a list, got {other}"),
          ));
        }
      };
      Ok(json!({ "name": name, "aliases": aliases }))
    })
    .collect()
}

#[async_trait]
impl ResourceProvider for ContainerProvider {
  fn kind(&self) -> &str {
    KIND
  }

  fn diff_rules(&self) -> &DiffRules {
    &self.rules
  }

  async fn create(&self, request: &ResourceRequest) -> Result<Properties, ProviderError> {
    let _guard = self.runtime.lock().await;
    let resolved = self.resolve(&request.inputs).await?;
    let object = self.runtime.new_object(&request.urn(), resolved.outputs, resolved.uses);
    self.runtime.put(KIND, &object).await?;
    Ok(object.outputs)
  }

  async fn read(&self, request: &ResourceRequest) -> Result<Option<Properties>, ProviderError> {
    let _guard = self.runtime.lock().await;
    Ok(self.runtime.lookup(KIND, request).await?.map(|o| o.outputs))
  }

  async fn update(&self, request: &ResourceRequest) -> Result<Properties, ProviderError> {
    let _guard = self.runtime.lock().await;
    let Some(mut object) = self.runtime.recorded(KIND, request).await? else {
      return Err(ProviderError::NotFound(request.urn()));
    };
    let resolved = self.resolve(&request.inputs).await?;

    let id = object.id.clone();
    object.outputs = resolved.outputs;
    object.outputs.insert("id".to_string(), json!(id));
    object.uses = resolved.uses;
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
