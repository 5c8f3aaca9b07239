//! Placeholder parsing and substitution for output references.
//!
//! A resource's outputs are not known until its provider has run. Programs
//! refer to them through placeholders embedded in strings, which this module
//! parses into typed [`OutputRef`]s and later substitutes with the values the
//! provider recorded.
//!
//! # Placeholder Format
//!
//! - `$${output:<kind>/<name>:<field>}` - output `field` of resource `kind/name`
//!
//! Single `$` characters pass through unchanged, so strings like
//! `mongodb://$HOST` need no escaping.
//!
//! # Escaping
//!
//! Use `$$$` before `{` to produce a literal `$${` sequence.
//!
//! # Example
//!
//! ```
//! use keel_lib::placeholder::{parse, OutputRef, Segment};
//! use keel_lib::resource::ResourceId;
//!
//! let segments = parse("mongodb://$${output:container/mongo:name}:27017").unwrap();
//! assert_eq!(segments, vec![
//!     Segment::Literal("mongodb://".to_string()),
//!     Segment::Output(OutputRef::new(ResourceId::new("container", "mongo"), "name")),
//!     Segment::Literal(":27017".to_string()),
//! ]);
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::resource::ResourceId;

/// Reference to a (possibly not yet known) output of another resource.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OutputRef {
  pub resource: ResourceId,
  pub output: String,
}

impl OutputRef {
  pub fn new(resource: ResourceId, output: impl Into<String>) -> Self {
    Self {
      resource,
      output: output.into(),
    }
  }

  /// Render as a placeholder string that [`parse`] turns back into this reference.
  pub fn to_placeholder(&self) -> String {
    format!("$${{output:{}:{}}}", self.resource, self.output)
  }
}

impl std::fmt::Display for OutputRef {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}.{}", self.resource, self.output)
  }
}

/// A segment of parsed text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
  /// Literal text (no placeholders)
  Literal(String),

  /// An output reference to be resolved
  Output(OutputRef),
}

/// A value that may not be known until apply time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
  Known(Value),
  Unknown,
}

impl Resolution {
  pub fn known(&self) -> Option<&Value> {
    match self {
      Resolution::Known(v) => Some(v),
      Resolution::Unknown => None,
    }
  }

  pub fn is_unknown(&self) -> bool {
    matches!(self, Resolution::Unknown)
  }
}

/// Errors that can occur during placeholder parsing or resolution.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlaceholderError {
  #[error("unclosed placeholder at position {0}")]
  Unclosed(usize),

  #[error("unknown placeholder type: {0}")]
  UnknownType(String),

  #[error("malformed placeholder: {0}")]
  Malformed(String),

  #[error("unresolved output reference {0}")]
  UnresolvedOutput(OutputRef),
}

/// Resolves output references to values.
pub trait Resolver {
  fn resolve_output(&self, reference: &OutputRef) -> Result<Resolution, PlaceholderError>;
}

/// Parse a string containing placeholders into segments.
///
/// Adjacent literal text is merged into a single segment.
///
/// # Errors
///
/// Returns an error if a placeholder is malformed (unclosed, unknown type,
/// invalid resource id).
pub fn parse(input: &str) -> Result<Vec<Segment>, PlaceholderError> {
  let mut segments = Vec::new();
  let mut literal = String::new();
  let mut chars = input.char_indices().peekable();

  while let Some((pos, ch)) = chars.next() {
    if ch != '$' {
      literal.push(ch);
      continue;
    }

    match chars.peek() {
      Some((_, '$')) => {
        chars.next();

        match chars.peek() {
          Some((_, '$')) => {
            chars.next();
            if let Some((_, '{')) = chars.peek() {
              // $$${ -> literal $${
              chars.next();
              literal.push_str("$${");
            } else {
              literal.push_str("$$$");
            }
          }
          Some((_, '{')) => {
            chars.next();

            if !literal.is_empty() {
              segments.push(Segment::Literal(std::mem::take(&mut literal)));
            }

            let mut content = String::new();
            let mut found_close = false;
            for (_, c) in chars.by_ref() {
              if c == '}' {
                found_close = true;
                break;
              }
              content.push(c);
            }

            if !found_close {
              return Err(PlaceholderError::Unclosed(pos));
            }

            segments.push(Segment::Output(parse_placeholder_content(&content)?));
          }
          _ => literal.push_str("$$"),
        }
      }
      _ => literal.push('$'),
    }
  }

  if !literal.is_empty() {
    segments.push(Segment::Literal(literal));
  }

  Ok(segments)
}

/// Parse the content between `$${` and `}`.
fn parse_placeholder_content(content: &str) -> Result<OutputRef, PlaceholderError> {
  let (kind, rest) = content
    .split_once(':')
    .ok_or_else(|| PlaceholderError::Malformed(format!("missing colon in '{content}'")))?;

  if kind != "output" {
    return Err(PlaceholderError::UnknownType(kind.to_string()));
  }

  let (resource, field) = rest
    .split_once(':')
    .ok_or_else(|| PlaceholderError::Malformed(format!("output placeholder missing field: '{content}'")))?;

  if field.is_empty() {
    return Err(PlaceholderError::Malformed(format!("empty output field in '{content}'")));
  }

  let resource = resource
    .parse::<ResourceId>()
    .map_err(|e| PlaceholderError::Malformed(e.to_string()))?;

  Ok(OutputRef::new(resource, field))
}

/// Substitute placeholders in pre-parsed segments, producing a string.
///
/// String outputs are inserted verbatim; other JSON values are inserted in
/// their JSON text form. Any unknown output makes the whole result unknown.
pub fn substitute_segments(segments: &[Segment], resolver: &impl Resolver) -> Result<Resolution, PlaceholderError> {
  let mut result = String::new();
  let mut unknown = false;

  for segment in segments {
    match segment {
      Segment::Literal(s) => result.push_str(s),
      Segment::Output(reference) => match resolver.resolve_output(reference)? {
        Resolution::Known(Value::String(s)) => result.push_str(&s),
        Resolution::Known(other) => result.push_str(&other.to_string()),
        Resolution::Unknown => unknown = true,
      },
    }
  }

  if unknown {
    Ok(Resolution::Unknown)
  } else {
    Ok(Resolution::Known(Value::String(result)))
  }
}

/// Parse and substitute in one step.
pub fn substitute(input: &str, resolver: &impl Resolver) -> Result<Resolution, PlaceholderError> {
  let segments = parse(input)?;
  substitute_segments(&segments, resolver)
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::HashMap;

  struct TestResolver {
    outputs: HashMap<OutputRef, Resolution>,
  }

  impl TestResolver {
    fn new() -> Self {
      Self {
        outputs: HashMap::new(),
      }
    }

    fn with(mut self, resource: &str, field: &str, value: Resolution) -> Self {
      self
        .outputs
        .insert(OutputRef::new(resource.parse().unwrap(), field), value);
      self
    }
  }

  impl Resolver for TestResolver {
    fn resolve_output(&self, reference: &OutputRef) -> Result<Resolution, PlaceholderError> {
      self
        .outputs
        .get(reference)
        .cloned()
        .ok_or_else(|| PlaceholderError::UnresolvedOutput(reference.clone()))
    }
  }

  fn known(s: &str) -> Resolution {
    Resolution::Known(Value::String(s.to_string()))
  }

  #[test]
  fn database_url_from_container_name() {
    let resolver = TestResolver::new().with("container/mongo", "name", known("mongo-dev"));

    let result = substitute("mongodb://$${output:container/mongo:name}:27017/cart", &resolver).unwrap();

    assert_eq!(result, known("mongodb://mongo-dev:27017/cart"));
  }

  #[test]
  fn numeric_output_is_rendered_as_json_text() {
    let resolver = TestResolver::new().with("container/backend", "port", Resolution::Known(Value::from(8000)));

    let result = substitute("http://localhost:$${output:container/backend:port}", &resolver).unwrap();

    assert_eq!(result, known("http://localhost:8000"));
  }

  #[test]
  fn unknown_output_makes_result_unknown() {
    let resolver = TestResolver::new().with("image/backend", "repo_digest", Resolution::Unknown);

    let result = substitute("$${output:image/backend:repo_digest}", &resolver).unwrap();

    assert!(result.is_unknown());
  }

  #[test]
  fn missing_output_is_an_error() {
    let resolver = TestResolver::new();

    let err = substitute("$${output:network/net:name}", &resolver).unwrap_err();

    assert_eq!(
      err,
      PlaceholderError::UnresolvedOutput(OutputRef::new(ResourceId::new("network", "net"), "name"))
    );
  }

  #[test]
  fn single_dollar_passes_through() {
    let segments = parse("echo $HOME and $$ pid").unwrap();
    assert_eq!(segments, vec![Segment::Literal("echo $HOME and $$ pid".to_string())]);
  }

  #[test]
  fn escaped_placeholder_is_literal() {
    let segments = parse("price: $$${output:x/y:z}").unwrap();
    assert_eq!(segments, vec![Segment::Literal("price: $${output:x/y:z}".to_string())]);
  }

  #[test]
  fn to_placeholder_parses_back() {
    let reference = OutputRef::new(ResourceId::new("container", "frontend"), "id");
    let segments = parse(&reference.to_placeholder()).unwrap();
    assert_eq!(segments, vec![Segment::Output(reference)]);
  }

  #[test]
  fn malformed_placeholders_are_rejected() {
    assert_eq!(parse("$${output:a/b:x"), Err(PlaceholderError::Unclosed(0)));
    assert!(matches!(parse("$${build:abc:out}"), Err(PlaceholderError::UnknownType(t)) if t == "build"));
    assert!(matches!(parse("$${output}"), Err(PlaceholderError::Malformed(_))));
    assert!(matches!(parse("$${output:a/b}"), Err(PlaceholderError::Malformed(_))));
    assert!(matches!(parse("$${output:a/b:}"), Err(PlaceholderError::Malformed(_))));
    assert!(matches!(parse("$${output:noslash:id}"), Err(PlaceholderError::Malformed(_))));
  }
}
