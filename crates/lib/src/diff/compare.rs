//! Structural comparison of input properties.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;

use super::types::{ChangeKind, PropertyChange};
use crate::placeholder::Resolution;
use crate::provider::DiffRules;
use crate::value::Properties;

/// Deep equality. Numbers compare by value, so `3000` equals `3000.0`.
pub(crate) fn json_eq(a: &Value, b: &Value) -> bool {
  match (a, b) {
    (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
      (Some(x), Some(y)) => x == y,
      _ => x == y,
    },
    (Value::Array(x), Value::Array(y)) => x.len() == y.len() && x.iter().zip(y).all(|(x, y)| json_eq(x, y)),
    (Value::Object(x), Value::Object(y)) => {
      x.len() == y.len() && x.iter().all(|(k, v)| y.get(k).is_some_and(|w| json_eq(v, w)))
    }
    _ => a == b,
  }
}

/// Equality where a top-level list is compared as a multiset.
fn unordered_eq(a: &Value, b: &Value) -> bool {
  let (Value::Array(x), Value::Array(y)) = (a, b) else {
    return json_eq(a, b);
  };
  if x.len() != y.len() {
    return false;
  }
  let mut used = vec![false; y.len()];
  x.iter().all(|item| {
    let found = y
      .iter()
      .enumerate()
      .find(|(i, other)| !used[*i] && json_eq(item, other))
      .map(|(i, _)| i);
    match found {
      Some(i) => {
        used[i] = true;
        true
      }
      None => false,
    }
  })
}

fn property_eq(a: &Value, b: &Value, ordered: bool) -> bool {
  if ordered { json_eq(a, b) } else { unordered_eq(a, b) }
}

/// Differences between recorded inputs and desired inputs.
///
/// `null` counts as absent. An unknown desired value is always a change.
pub(crate) fn property_changes(
  prior: &Properties,
  desired: &BTreeMap<String, Resolution>,
  rules: &DiffRules,
) -> Vec<PropertyChange> {
  let prior_keys = prior.iter().filter(|(_, v)| !v.is_null()).map(|(k, _)| k.as_str());
  let desired_keys = desired
    .iter()
    .filter(|(_, v)| !matches!(v, Resolution::Known(Value::Null)))
    .map(|(k, _)| k.as_str());
  let keys: BTreeSet<&str> = prior_keys.chain(desired_keys).collect();

  let mut changes = Vec::new();
  for key in keys {
    let rule = rules.rule(key);
    let before = prior.get(key).filter(|v| !v.is_null());
    let after = desired.get(key).filter(|v| !matches!(v, Resolution::Known(Value::Null)));

    let kind = match (before, after) {
      (None, Some(_)) => ChangeKind::Added,
      (Some(_), None) => ChangeKind::Removed,
      (Some(_), Some(Resolution::Unknown)) => ChangeKind::Modified,
      (Some(b), Some(Resolution::Known(a))) if !property_eq(b, a, rule.ordered) => ChangeKind::Modified,
      _ => continue,
    };

    changes.push(PropertyChange {
      property: key.to_string(),
      kind,
      forces_replace: rule.replace_on_change,
      before: before.cloned(),
      after: after.cloned(),
    });
  }
  changes
}
