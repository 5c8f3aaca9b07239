use std::path::Path;
use std::rc::Rc;

use mlua::prelude::*;

use super::globals;
use super::resource::Declarations;
use crate::config::ConfigSource;
use crate::resource::StackId;

/// Create a Lua runtime with the `keel` global registered.
pub fn create_runtime(declarations: Declarations, stack: &StackId, config: Rc<dyn ConfigSource>) -> LuaResult<Lua> {
  let lua = Lua::new();
  globals::register_globals(&lua, declarations, stack, config)?;
  Ok(lua)
}

/// Run the program at `path`.
///
/// Sets `keel.dir` and lets the program `require` modules that sit next to it.
pub fn load_program(lua: &Lua, path: &Path) -> LuaResult<()> {
  let canonical_path = dunce::canonicalize(path)
    .map_err(|e| LuaError::external(format!("cannot resolve '{}': {}", path.display(), e)))?;
  let content = std::fs::read_to_string(&canonical_path)
    .map_err(|e| LuaError::external(format!("cannot read '{}': {}", canonical_path.display(), e)))?;
  let dir = canonical_path
    .parent()
    .unwrap_or(Path::new("."))
    .to_string_lossy()
    .into_owned();

  let package = lua.globals().get::<LuaTable>("package")?;
  let package_path: String = package.get("path")?;
  package.set("path", format!("{dir}/?.lua;{dir}/?/init.lua;{package_path}"))?;

  lua.globals().get::<LuaTable>("keel")?.set("dir", dir)?;

  lua
    .load(&content)
    .set_name(format!("@{}", canonical_path.display()))
    .exec()
}
