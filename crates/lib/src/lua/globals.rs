//! The `keel` global table.
//!
//! - `keel.stack` - name of the stack being evaluated
//! - `keel.dir` - directory of the program file
//! - `keel.config.require(key)` / `keel.config.require_number(key)` /
//!   `keel.config.get(key)` - stack configuration
//! - `keel.resource(kind, name, inputs, opts)` - declare a resource
//! - `keel.network{}` / `keel.image{}` / `keel.container{}` - shorthands

use std::rc::Rc;

use mlua::prelude::*;

use super::resource::{Declarations, register_resource};
use crate::config::ConfigSource;
use crate::resource::StackId;

/// Register the `keel` global.
pub fn register_globals(
  lua: &Lua,
  declarations: Declarations,
  stack: &StackId,
  config: Rc<dyn ConfigSource>,
) -> LuaResult<()> {
  let keel = lua.create_table()?;
  keel.set("stack", stack.as_str())?;
  keel.set("config", create_config_table(lua, config)?)?;
  register_resource(lua, &keel, declarations, stack.clone())?;
  lua.globals().set("keel", keel)?;
  Ok(())
}

fn create_config_table(lua: &Lua, config: Rc<dyn ConfigSource>) -> LuaResult<LuaTable> {
  let table = lua.create_table()?;

  let source = config.clone();
  table.set(
    "require",
    lua.create_function(move |_, key: String| source.require(&key).map_err(LuaError::external))?,
  )?;

  let source = config.clone();
  table.set(
    "require_number",
    lua.create_function(move |_, key: String| {
      let n = source.require_number(&key).map_err(LuaError::external)?;
      // Whole numbers come back as Lua integers.
      if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        Ok(LuaValue::Integer(n as i64))
      } else {
        Ok(LuaValue::Number(n))
      }
    })?,
  )?;

  table.set("get", lua.create_function(move |_, key: String| Ok(config.get(&key)))?)?;
  Ok(table)
}
