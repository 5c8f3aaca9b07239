//! Stack configuration values.
//!
//! Programs read every setting through a [`ConfigSource`]. There are no
//! implicit defaults: a missing key is a configuration error.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_yaml::Value as YamlValue;
use thiserror::Error;
use tracing::debug;

use crate::consts::CONFIG_FILE_PREFIX;
use crate::resource::StackId;

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("missing required configuration value '{key}'")]
  MissingConfig { key: String },

  #[error("configuration value '{key}' is not a number: '{value}'")]
  InvalidNumber { key: String, value: String },

  #[error("configuration value '{key}' must be a string, number or boolean")]
  UnsupportedValue { key: String },

  #[error("failed to read {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to parse {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_yaml::Error,
  },
}

pub trait ConfigSource: Send + Sync {
  fn get(&self, key: &str) -> Option<String>;

  fn require(&self, key: &str) -> Result<String, ConfigError> {
    self
      .get(key)
      .ok_or_else(|| ConfigError::MissingConfig { key: key.to_string() })
  }

  /// Required value parsed as a finite number.
  fn require_number(&self, key: &str) -> Result<f64, ConfigError> {
    let value = self.require(key)?;
    match value.trim().parse::<f64>() {
      Ok(n) if n.is_finite() => Ok(n),
      _ => Err(ConfigError::InvalidNumber {
        key: key.to_string(),
        value,
      }),
    }
  }
}

/// In-memory configuration.
#[derive(Debug, Clone, Default)]
pub struct MapConfig {
  values: BTreeMap<String, String>,
}

impl MapConfig {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
    self.values.insert(key.into(), value.into());
    self
  }

  pub fn len(&self) -> usize {
    self.values.len()
  }

  pub fn is_empty(&self) -> bool {
    self.values.is_empty()
  }
}

impl ConfigSource for MapConfig {
  fn get(&self, key: &str) -> Option<String> {
    self.values.get(key).cloned()
  }
}

#[derive(Debug, Default, Deserialize)]
struct StackFile {
  #[serde(default)]
  config: BTreeMap<String, YamlValue>,
}

/// Values from a `Keel.<stack>.yaml` file:
///
/// ```yaml
/// config:
///   frontendPort: 3001
///   mongoHost: mongodb://mongo:27017
/// ```
#[derive(Debug, Clone, Default)]
pub struct FileConfig {
  path: Option<PathBuf>,
  values: MapConfig,
}

impl FileConfig {
  /// File name holding the configuration of `stack`.
  pub fn file_name(stack: &StackId) -> String {
    format!("{CONFIG_FILE_PREFIX}.{stack}.yaml")
  }

  /// Load the file for `stack` next to the program. A missing file yields an
  /// empty configuration.
  pub fn for_stack(dir: &Path, stack: &StackId) -> Result<Self, ConfigError> {
    Self::load(&dir.join(Self::file_name(stack)))
  }

  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    let content = match std::fs::read_to_string(path) {
      Ok(content) => content,
      Err(e) if e.kind() == io::ErrorKind::NotFound => {
        debug!(path = %path.display(), "no stack configuration file");
        return Ok(Self::default());
      }
      Err(source) => {
        return Err(ConfigError::Read {
          path: path.to_path_buf(),
          source,
        });
      }
    };

    let file: Option<StackFile> = serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
      path: path.to_path_buf(),
      source,
    })?;

    let mut values = MapConfig::new();
    for (key, value) in file.unwrap_or_default().config {
      let text = match value {
        YamlValue::Null => continue,
        YamlValue::String(s) => s,
        YamlValue::Number(n) => n.to_string(),
        YamlValue::Bool(b) => b.to_string(),
        _ => return Err(ConfigError::UnsupportedValue { key }),
      };
      values = values.with(key, text);
    }

    debug!(path = %path.display(), keys = values.len(), "loaded stack configuration");
    Ok(Self {
      path: Some(path.to_path_buf()),
      values,
    })
  }

  pub fn path(&self) -> Option<&Path> {
    self.path.as_deref()
  }
}

impl ConfigSource for FileConfig {
  fn get(&self, key: &str) -> Option<String> {
    self.values.get(key)
  }
}
