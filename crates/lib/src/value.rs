//! Declared property values.
//!
//! A [`PropertyValue`] is what a program declares for an input. It may contain
//! output references to other resources, which are recorded as implicit
//! dependencies by the graph builder and substituted with real values by the
//! diff engine and the executor.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::{Map, Number, Value};

use crate::placeholder::{self, OutputRef, PlaceholderError, Resolution, Resolver, Segment};
use crate::resource::ResourceId;

/// Resolved property map, used for provider inputs, outputs and state.
pub type Properties = Map<String, Value>;

#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
  Null,
  Bool(bool),
  Number(Number),
  String(String),
  List(Vec<PropertyValue>),
  Map(BTreeMap<String, PropertyValue>),
  /// The whole value is another resource's output.
  Output(OutputRef),
  /// A string with embedded output references.
  Template(Vec<Segment>),
}

impl PropertyValue {
  /// Interpret a string, turning embedded placeholders into references.
  ///
  /// A string consisting of exactly one placeholder becomes
  /// [`PropertyValue::Output`], so non-string outputs keep their type.
  pub fn from_str_with_refs(s: &str) -> Result<Self, PlaceholderError> {
    let mut segments = placeholder::parse(s)?;

    if !segments.iter().any(|seg| matches!(seg, Segment::Output(_))) {
      let text = segments
        .into_iter()
        .map(|seg| match seg {
          Segment::Literal(text) => text,
          Segment::Output(_) => String::new(),
        })
        .collect();
      return Ok(PropertyValue::String(text));
    }

    if segments.len() == 1
      && let Some(Segment::Output(reference)) = segments.pop()
    {
      return Ok(PropertyValue::Output(reference));
    }

    Ok(PropertyValue::Template(segments))
  }

  /// Collect every resource referenced anywhere in this value.
  pub fn collect_references(&self, refs: &mut BTreeSet<ResourceId>) {
    match self {
      PropertyValue::Output(reference) => {
        refs.insert(reference.resource.clone());
      }
      PropertyValue::Template(segments) => {
        for segment in segments {
          if let Segment::Output(reference) = segment {
            refs.insert(reference.resource.clone());
          }
        }
      }
      PropertyValue::List(items) => items.iter().for_each(|v| v.collect_references(refs)),
      PropertyValue::Map(map) => map.values().for_each(|v| v.collect_references(refs)),
      PropertyValue::Null | PropertyValue::Bool(_) | PropertyValue::Number(_) | PropertyValue::String(_) => {}
    }
  }

  /// Substitute output references using `resolver`.
  ///
  /// A list or map containing any unknown value is unknown as a whole.
  pub fn resolve(&self, resolver: &impl Resolver) -> Result<Resolution, PlaceholderError> {
    let value = match self {
      PropertyValue::Null => Value::Null,
      PropertyValue::Bool(b) => Value::Bool(*b),
      PropertyValue::Number(n) => Value::Number(n.clone()),
      PropertyValue::String(s) => Value::String(s.clone()),
      PropertyValue::Output(reference) => return resolver.resolve_output(reference),
      PropertyValue::Template(segments) => return placeholder::substitute_segments(segments, resolver),
      PropertyValue::List(items) => {
        let mut out = Vec::with_capacity(items.len());
        for item in items {
          match item.resolve(resolver)? {
            Resolution::Known(v) => out.push(v),
            Resolution::Unknown => return Ok(Resolution::Unknown),
          }
        }
        Value::Array(out)
      }
      PropertyValue::Map(map) => {
        let mut out = Map::new();
        for (key, item) in map {
          match item.resolve(resolver)? {
            Resolution::Known(v) => {
              out.insert(key.clone(), v);
            }
            Resolution::Unknown => return Ok(Resolution::Unknown),
          }
        }
        Value::Object(out)
      }
    };
    Ok(Resolution::Known(value))
  }
}

/// Resolve every input of a declaration.
pub fn resolve_inputs(
  inputs: &BTreeMap<String, PropertyValue>,
  resolver: &impl Resolver,
) -> Result<BTreeMap<String, Resolution>, PlaceholderError> {
  inputs
    .iter()
    .map(|(key, value)| Ok((key.clone(), value.resolve(resolver)?)))
    .collect()
}

/// Collapse resolved inputs into a property map, failing on the first unknown.
pub fn into_properties(resolved: BTreeMap<String, Resolution>) -> Result<Properties, String> {
  let mut props = Properties::new();
  for (key, value) in resolved {
    match value {
      Resolution::Known(v) => {
        props.insert(key, v);
      }
      Resolution::Unknown => return Err(key),
    }
  }
  Ok(props)
}

impl From<Value> for PropertyValue {
  fn from(value: Value) -> Self {
    match value {
      Value::Null => PropertyValue::Null,
      Value::Bool(b) => PropertyValue::Bool(b),
      Value::Number(n) => PropertyValue::Number(n),
      Value::String(s) => PropertyValue::String(s),
      Value::Array(items) => PropertyValue::List(items.into_iter().map(PropertyValue::from).collect()),
      Value::Object(map) => PropertyValue::Map(map.into_iter().map(|(k, v)| (k, PropertyValue::from(v))).collect()),
    }
  }
}

impl From<OutputRef> for PropertyValue {
  fn from(reference: OutputRef) -> Self {
    PropertyValue::Output(reference)
  }
}

impl From<&str> for PropertyValue {
  fn from(s: &str) -> Self {
    PropertyValue::String(s.to_string())
  }
}

impl From<String> for PropertyValue {
  fn from(s: String) -> Self {
    PropertyValue::String(s)
  }
}

impl From<i64> for PropertyValue {
  fn from(n: i64) -> Self {
    PropertyValue::Number(n.into())
  }
}

impl From<bool> for PropertyValue {
  fn from(b: bool) -> Self {
    PropertyValue::Bool(b)
  }
}
