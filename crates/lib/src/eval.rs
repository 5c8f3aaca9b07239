//! Program evaluation.
//!
//! [`evaluate_program`] runs a stack's Lua program and returns the resource
//! declarations it made, in declaration order.

use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use mlua::prelude::*;
use tracing::info;

use crate::config::{ConfigError, ConfigSource};
use crate::lua::resource::Declarations;
use crate::lua::runtime;
use crate::resource::{ResourceSpec, StackId};

#[derive(Debug, thiserror::Error)]
pub enum EvalError {
  #[error("program not found: {0}")]
  NotFound(PathBuf),

  /// The program asked for configuration the stack does not provide.
  #[error(transparent)]
  Config(#[from] ConfigError),

  #[error("lua error: {0}")]
  Lua(#[from] LuaError),
}

/// The configuration error behind a Lua error raised by `keel.config`.
fn config_cause(error: &LuaError) -> Option<ConfigError> {
  match error {
    LuaError::CallbackError { cause, .. } => config_cause(cause),
    LuaError::WithContext { cause, .. } => config_cause(cause),
    LuaError::ExternalError(inner) => match inner.downcast_ref::<ConfigError>()? {
      ConfigError::MissingConfig { key } => Some(ConfigError::MissingConfig { key: key.clone() }),
      ConfigError::InvalidNumber { key, value } => Some(ConfigError::InvalidNumber {
        key: key.clone(),
        value: value.clone(),
      }),
      _ => None,
    },
    _ => None,
  }
}

/// Evaluate the program at `path` for `stack`.
///
/// # Errors
///
/// - `NotFound` if `path` does not exist
/// - `Config` if the program reads a missing or malformed config value
/// - `Lua` for any other evaluation failure
pub fn evaluate_program(
  path: &Path,
  stack: &StackId,
  config: Rc<dyn ConfigSource>,
) -> Result<Vec<ResourceSpec>, EvalError> {
  if !path.exists() {
    return Err(EvalError::NotFound(path.to_path_buf()));
  }

  let declarations: Declarations = Rc::new(RefCell::new(Vec::new()));
  {
    let lua = runtime::create_runtime(declarations.clone(), stack, config)?;
    runtime::load_program(&lua, path).map_err(|e| match config_cause(&e) {
      Some(cause) => EvalError::Config(cause),
      None => EvalError::Lua(e),
    })?;
  }

  let specs = declarations.take();
  info!(stack = %stack, path = %path.display(), resources = specs.len(), "evaluated program");
  Ok(specs)
}
