//! Shared helpers for working with JSON values: dot-path resolution,
//! canonical value-key encoding for indexes, and value comparison.
//!
//! A field path resolves to "missing" (`None`) when any step lands on a
//! value that is absent, null, or not an object. Missing is distinct
//! from `Value::Null` throughout the engine.

use serde_json::{Map, Value};
use std::cmp::Ordering;

/// Resolve a dot-separated field path against a JSON value.
///
/// Only object fields are stepped into; an intermediate null, scalar, or
/// array makes the whole path resolve to missing.
///
/// # Examples
///
/// ```
/// use serde_json::json;
/// use quartzdb::value_utils::resolve_path;
///
/// let doc = json!({"address": {"city": "NYC"}});
/// assert_eq!(resolve_path(&doc, "address.city"), Some(&json!("NYC")));
/// assert_eq!(resolve_path(&doc, "address.zip"), None);
/// ```
pub fn resolve_path<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return None;
    }
    let mut value = doc;
    for part in path.split('.') {
        match value {
            Value::Object(map) => value = map.get(part)?,
            _ => return None,
        }
    }
    Some(value)
}

/// Canonical encoding of a value, used as an index bucket key.
///
/// The encoding is JSON with two normalizations so that equal values
/// always produce the same key:
/// - object keys are sorted
/// - doubles with no fractional part are printed as integers
///
/// Arrays and objects are encoded whole; they index as a single key.
pub fn canonical_key(value: &Value) -> String {
    serde_json::to_string(&canonicalize(value)).unwrap_or_else(|_| "null".to_string())
}

/// Decode a canonical key back into a value (for planner comparisons).
pub fn decode_key(key: &str) -> Option<Value> {
    serde_json::from_str(key).ok()
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Number(n) => {
            // Integral doubles collapse onto the integer form so that
            // 2 and 2.0 share a bucket.
            if n.as_i64().is_none() && n.as_u64().is_none() {
                if let Some(f) = n.as_f64() {
                    if f.is_finite() && f.fract() == 0.0 && f.abs() < 9.0e15 {
                        return Value::from(f as i64);
                    }
                }
            }
            value.clone()
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut out = Map::new();
            for key in keys {
                out.insert(key.clone(), canonicalize(&map[key]));
            }
            Value::Object(out)
        }
        _ => value.clone(),
    }
}

/// Deep equality with numeric value semantics: `1` and `1.0` are equal.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(n1), Value::Number(n2)) => match (n1.as_f64(), n2.as_f64()) {
            (Some(f1), Some(f2)) => f1 == f2,
            _ => n1 == n2,
        },
        (Value::Array(a1), Value::Array(a2)) => {
            a1.len() == a2.len() && a1.iter().zip(a2.iter()).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(o1), Value::Object(o2)) => {
            o1.len() == o2.len()
                && o1
                    .iter()
                    .all(|(k, v)| o2.get(k).map_or(false, |w| values_equal(v, w)))
        }
        _ => a == b,
    }
}

/// Ordered comparison for the filter and planner range operators.
///
/// Defined only for number/number (f64 comparison) and string/string
/// (lexicographic) pairs; every other combination is unordered.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(n1), Value::Number(n2)) => {
            let f1 = n1.as_f64()?;
            let f2 = n2.as_f64()?;
            f1.partial_cmp(&f2)
        }
        (Value::String(s1), Value::String(s2)) => Some(s1.cmp(s2)),
        _ => None,
    }
}

/// Comparison for `$sort`: missing sorts smallest, booleans are ordered
/// too, and incomparable pairs compare equal so the stable sort keeps
/// input order.
pub fn compare_for_sort(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(Value::Bool(b1)), Some(Value::Bool(b2))) => b1.cmp(b2),
        (Some(av), Some(bv)) => compare_values(av, bv).unwrap_or(Ordering::Equal),
    }
}

/// Assign a value at a dot-path inside a JSON value, creating
/// intermediate objects. A non-object intermediate (the root included)
/// is replaced by an object.
pub fn set_path_value(target: &mut Value, path: &str, value: Value) {
    let parts: Vec<&str> = path.split('.').collect();
    let mut current = target;
    for part in &parts[..parts.len() - 1] {
        if !matches!(current, Value::Object(_)) {
            *current = Value::Object(Map::new());
        }
        let map = match current {
            Value::Object(map) => map,
            _ => unreachable!(),
        };
        if !matches!(map.get(*part), Some(Value::Object(_))) {
            map.insert(part.to_string(), Value::Object(Map::new()));
        }
        current = map.get_mut(*part).unwrap();
    }
    if !matches!(current, Value::Object(_)) {
        *current = Value::Object(Map::new());
    }
    if let Value::Object(map) = current {
        map.insert(parts[parts.len() - 1].to_string(), value);
    }
}

/// Remove the value at a dot-path inside a JSON value. Only object
/// steps are followed.
pub fn remove_path_value(target: &mut Value, path: &str) -> Option<Value> {
    let parts: Vec<&str> = path.split('.').collect();
    let mut current = target;
    for part in &parts[..parts.len() - 1] {
        match current {
            Value::Object(map) => current = map.get_mut(*part)?,
            _ => return None,
        }
    }
    match current {
        Value::Object(map) => map.remove(parts[parts.len() - 1]),
        _ => None,
    }
}
