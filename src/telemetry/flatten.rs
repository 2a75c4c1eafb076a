//! Flattening of nested telemetry mappings

use std::collections::HashMap;

use serde_json::{Map, Value};

/// Separator placed between a parent key and its child key
pub const SEPARATOR: char = '_';

/// Flatten a nested mapping into `parent_child` keys with scalar values
///
/// Nested mappings are descended recursively; every other value is kept as a
/// leaf under its joined key.
#[must_use]
pub fn flatten(map: &Map<String, Value>) -> HashMap<String, Value> {
    let mut out = HashMap::new();
    flatten_into(map, None, &mut out);
    out
}

fn flatten_into(map: &Map<String, Value>, parent: Option<&str>, out: &mut HashMap<String, Value>) {
    for (key, value) in map {
        let joined = match parent {
            Some(p) => format!("{p}{SEPARATOR}{key}"),
            None => key.clone(),
        };
        match value {
            Value::Object(child) => flatten_into(child, Some(&joined), out),
            leaf => {
                out.insert(joined, leaf.clone());
            }
        }
    }
}

/// Render a leaf value as a log cell
///
/// Strings are written verbatim, numbers in their JSON form, null as empty.
#[must_use]
pub fn cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}
