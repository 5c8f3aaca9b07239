//! Lua bindings for resource declarations.
//!
//! `keel.resource(kind, name, inputs, opts)` records a [`ResourceSpec`] and
//! returns a handle table:
//!
//! ```lua
//! local img = keel.image("backend", { name = "app/backend:latest" })
//! img.id                  -- "image/backend"
//! img.outputs.repo_digest -- "$${output:image/backend:repo_digest}"
//! ```
//!
//! Output fields are placeholders. Passing one to another resource's inputs
//! records an implicit dependency; passing the handle itself references its
//! `id` output.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use mlua::prelude::*;
use serde_json::Number;

use crate::placeholder::OutputRef;
use crate::resource::{ReplaceStrategy, ResourceId, ResourceSpec, StackId};
use crate::value::PropertyValue;

/// Metatable `__type` marker of resource handles.
pub const RESOURCE_HANDLE_TYPE: &str = "keel.resource";

/// Declarations collected while a program runs.
pub type Declarations = Rc<RefCell<Vec<ResourceSpec>>>;

/// The resource a handle table points at, if `table` is one.
fn handle_id(table: &LuaTable) -> LuaResult<Option<ResourceId>> {
  let Some(mt) = table.metatable() else {
    return Ok(None);
  };
  match mt.get::<Option<String>>("__type")? {
    Some(marker) if marker == RESOURCE_HANDLE_TYPE => {
      let kind: String = table.get("kind")?;
      let name: String = table.get("name")?;
      Ok(Some(ResourceId::new(kind, name)))
    }
    _ => Ok(None),
  }
}

fn lua_number(n: f64) -> LuaResult<PropertyValue> {
  if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
    return Ok(PropertyValue::Number(Number::from(n as i64)));
  }
  Number::from_f64(n)
    .map(PropertyValue::Number)
    .ok_or_else(|| LuaError::external(format!("{n} is not a valid input number")))
}

/// Convert a Lua value into a declared property value.
///
/// Tables with a positive length are lists, other tables are maps; an
/// empty table is an empty list.
pub fn lua_to_property(value: LuaValue) -> LuaResult<PropertyValue> {
  match value {
    LuaValue::Nil => Ok(PropertyValue::Null),
    LuaValue::Boolean(b) => Ok(PropertyValue::Bool(b)),
    LuaValue::Integer(i) => Ok(PropertyValue::Number(Number::from(i))),
    LuaValue::Number(n) => lua_number(n),
    LuaValue::String(s) => PropertyValue::from_str_with_refs(&s.to_str()?).map_err(LuaError::external),
    LuaValue::Table(t) => {
      if let Some(id) = handle_id(&t)? {
        return Ok(PropertyValue::Output(OutputRef::new(id, "id")));
      }

      let len = t.raw_len();
      if len > 0 {
        let mut items = Vec::with_capacity(len);
        for i in 1..=len {
          items.push(lua_to_property(t.raw_get(i)?)?);
        }
        return Ok(PropertyValue::List(items));
      }

      let mut map = BTreeMap::new();
      for pair in t.pairs::<LuaValue, LuaValue>() {
        let (key, value) = pair?;
        let LuaValue::String(key) = key else {
          return Err(LuaError::external(format!(
            "input maps need string keys, got {}",
            key.type_name()
          )));
        };
        map.insert(key.to_str()?.to_string(), lua_to_property(value)?);
      }
      if map.is_empty() {
        return Ok(PropertyValue::List(Vec::new()));
      }
      Ok(PropertyValue::Map(map))
    }
    other => Err(LuaError::external(format!(
      "unsupported input type: {}",
      other.type_name()
    ))),
  }
}

fn dependency_id(value: LuaValue) -> LuaResult<ResourceId> {
  match value {
    LuaValue::Table(t) => handle_id(&t)?.ok_or_else(|| LuaError::external("depends_on entries must be resource handles")),
    LuaValue::String(s) => s.to_str()?.parse::<ResourceId>().map_err(LuaError::external),
    other => Err(LuaError::external(format!(
      "depends_on entries must be resource handles or 'kind/name' strings, got {}",
      other.type_name()
    ))),
  }
}

/// Apply `{ depends_on = {...}, replace = "..." }` to `spec`.
fn apply_options(mut spec: ResourceSpec, opts: Option<LuaTable>) -> LuaResult<ResourceSpec> {
  let Some(opts) = opts else { return Ok(spec) };

  match opts.get::<LuaValue>("depends_on")? {
    LuaValue::Nil => {}
    LuaValue::Table(deps) if handle_id(&deps)?.is_some() => {
      spec = spec.depends_on(dependency_id(LuaValue::Table(deps))?);
    }
    LuaValue::Table(deps) => {
      for dep in deps.sequence_values::<LuaValue>() {
        spec = spec.depends_on(dependency_id(dep?)?);
      }
    }
    other => spec = spec.depends_on(dependency_id(other)?),
  }

  if let Some(replace) = opts.get::<Option<String>>("replace")? {
    let strategy: ReplaceStrategy = replace.parse().map_err(LuaError::external)?;
    spec = spec.replace(strategy);
  }
  Ok(spec)
}

/// Build the handle returned to the program.
fn create_handle(lua: &Lua, id: &ResourceId, stack: &StackId) -> LuaResult<LuaTable> {
  let handle = lua.create_table()?;
  handle.set("kind", id.kind.as_str())?;
  handle.set("name", id.name.as_str())?;
  handle.set("id", id.to_string())?;
  handle.set("urn", id.urn(stack))?;

  let outputs = lua.create_table()?;
  let outputs_mt = lua.create_table()?;
  let target = id.clone();
  outputs_mt.set(
    "__index",
    lua.create_function(move |_, (_, field): (LuaTable, String)| {
      Ok(OutputRef::new(target.clone(), field).to_placeholder())
    })?,
  )?;
  outputs_mt.set(
    "__newindex",
    lua.create_function(|_, (_, field, _): (LuaTable, String, LuaValue)| -> LuaResult<()> {
      Err(LuaError::external(format!("outputs are read-only (tried to set '{field}')")))
    })?,
  )?;
  outputs.set_metatable(Some(outputs_mt))?;
  handle.set("outputs", outputs)?;

  let mt = lua.create_table()?;
  mt.set("__type", RESOURCE_HANDLE_TYPE)?;
  handle.set_metatable(Some(mt))?;
  Ok(handle)
}

/// Record one declaration and return its handle.
pub fn declare(
  lua: &Lua,
  declarations: &Declarations,
  stack: &StackId,
  kind: &str,
  name: &str,
  inputs: Option<LuaTable>,
  opts: Option<LuaTable>,
) -> LuaResult<LuaTable> {
  let id = ResourceId::new(kind, name);
  id.validate().map_err(LuaError::external)?;

  let mut spec = ResourceSpec::new(kind, name);
  if let Some(inputs) = inputs {
    for pair in inputs.pairs::<String, LuaValue>() {
      let (key, value) = pair?;
      let value = lua_to_property(value).map_err(|e| LuaError::external(format!("{id}: input '{key}': {e}")))?;
      spec = spec.input(key, value);
    }
  }
  spec = apply_options(spec, opts)?;

  tracing::debug!(resource = %id, inputs = spec.inputs.len(), "declared resource");
  declarations.borrow_mut().push(spec);
  create_handle(lua, &id, stack)
}

/// Register `keel.resource` and the `keel.<kind>` shorthands.
pub fn register_resource(lua: &Lua, keel: &LuaTable, declarations: Declarations, stack: StackId) -> LuaResult<()> {
  let decls = declarations.clone();
  let stack_id = stack.clone();
  let resource_fn = lua.create_function(
    move |lua, (kind, name, inputs, opts): (String, String, Option<LuaTable>, Option<LuaTable>)| {
      declare(lua, &decls, &stack_id, &kind, &name, inputs, opts)
    },
  )?;
  keel.set("resource", resource_fn)?;

  for kind in ["network", "image", "container"] {
    let decls = declarations.clone();
    let stack_id = stack.clone();
    let shorthand = lua.create_function(
      move |lua, (name, inputs, opts): (String, Option<LuaTable>, Option<LuaTable>)| {
        declare(lua, &decls, &stack_id, kind, &name, inputs, opts)
      },
    )?;
    keel.set(kind, shorthand)?;
  }
  Ok(())
}
