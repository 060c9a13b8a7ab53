// src/document.rs

use crate::error::{QuartzError, Result};
use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

/// Name of the identifier field every document carries.
pub const ID_FIELD: &str = "_id";

/// A document: a JSON object with a unique string identifier under `_id`.
///
/// The wrapper keeps the full object (identifier included) so the filter
/// evaluator and the aggregation pipeline see exactly what is persisted.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(transparent)]
pub struct Document {
    body: Map<String, Value>,
}

impl Document {
    /// Build a document from an arbitrary JSON value.
    ///
    /// The value must be an object. A present `_id` must be a string; an
    /// absent one is filled with a fresh UUID.
    pub fn from_value(value: Value) -> Result<Self> {
        let mut body = match value {
            Value::Object(map) => map,
            other => {
                return Err(QuartzError::InvalidQuery(format!(
                    "Document must be a JSON object, got {}",
                    type_name(&other)
                )))
            }
        };

        match body.get(ID_FIELD) {
            Some(Value::String(_)) => {}
            Some(other) => {
                return Err(QuartzError::InvalidQuery(format!(
                    "Document _id must be a string, got {}",
                    type_name(other)
                )))
            }
            None => {
                let id = Uuid::new_v4().to_string();
                body.insert(ID_FIELD.to_string(), Value::String(id));
            }
        }

        Ok(Document { body })
    }

    /// Document identifier.
    pub fn id(&self) -> &str {
        match self.body.get(ID_FIELD) {
            Some(Value::String(id)) => id,
            // from_value guarantees a string _id
            _ => "",
        }
    }

    /// Resolve a dot-path against the document. Missing yields `None`.
    pub fn get(&self, path: &str) -> Option<&Value> {
        if path.is_empty() {
            return None;
        }
        let mut parts = path.split('.');
        let mut value = self.body.get(parts.next()?)?;
        for part in parts {
            match value {
                Value::Object(map) => value = map.get(part)?,
                _ => return None,
            }
        }
        Some(value)
    }

    /// Assign a value at a dot-path, creating intermediate objects.
    ///
    /// A non-object intermediate is replaced by an object, the same way
    /// a fresh path would be built.
    pub fn set_path(&mut self, path: &str, value: Value) {
        if !path.contains('.') {
            self.body.insert(path.to_string(), value);
            return;
        }

        let parts: Vec<&str> = path.split('.').collect();
        let first = parts[0];

        if !matches!(self.body.get(first), Some(Value::Object(_))) {
            self.body
                .insert(first.to_string(), nested_object(&parts[1..], value));
            return;
        }

        let mut current = self.body.get_mut(first).unwrap();
        let mut rest = &parts[1..];
        while rest.len() > 1 {
            let step = rest[0];
            let map = match current {
                Value::Object(map) => map,
                _ => unreachable!(),
            };
            if !matches!(map.get(step), Some(Value::Object(_))) {
                map.insert(step.to_string(), nested_object(&rest[1..], value));
                return;
            }
            current = map.get_mut(step).unwrap();
            rest = &rest[1..];
        }
        if let Value::Object(map) = current {
            map.insert(rest[0].to_string(), value);
        }
    }

    /// Remove the value at a dot-path. Only object steps are followed.
    pub fn remove_path(&mut self, path: &str) -> Option<Value> {
        if !path.contains('.') {
            return self.body.remove(path);
        }

        let parts: Vec<&str> = path.split('.').collect();
        let mut current = self.body.get_mut(parts[0])?;
        for part in &parts[1..parts.len() - 1] {
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

    /// Whether the path resolves to a present value.
    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    /// Borrow the underlying object.
    pub fn fields(&self) -> &Map<String, Value> {
        &self.body
    }

    /// The document as a JSON value.
    pub fn to_value(&self) -> Value {
        Value::Object(self.body.clone())
    }

    /// Consume into a JSON value.
    pub fn into_value(self) -> Value {
        Value::Object(self.body)
    }
}

fn nested_object(parts: &[&str], value: Value) -> Value {
    if parts.is_empty() {
        return value;
    }
    let mut obj = Map::new();
    obj.insert(parts[0].to_string(), nested_object(&parts[1..], value));
    Value::Object(obj)
}

pub(crate) fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_value_keeps_supplied_id() {
        let doc = Document::from_value(json!({"_id": "abc", "name": "Alice"})).unwrap();
        assert_eq!(doc.id(), "abc");
        assert_eq!(doc.get("name"), Some(&json!("Alice")));
    }

    #[test]
    fn test_from_value_generates_uuid() {
        let doc = Document::from_value(json!({"name": "Bob"})).unwrap();
        assert_eq!(doc.id().len(), 36);
        assert!(doc.id().contains('-'));
        assert_eq!(doc.get("_id"), Some(&json!(doc.id())));
    }

    #[test]
    fn test_from_value_rejects_non_object() {
        assert!(Document::from_value(json!([1, 2])).is_err());
        assert!(Document::from_value(json!("plain")).is_err());
    }

    #[test]
    fn test_from_value_rejects_non_string_id() {
        assert!(Document::from_value(json!({"_id": 7})).is_err());
        assert!(Document::from_value(json!({"_id": null})).is_err());
    }

    #[test]
    fn test_get_dot_path() {
        let doc = Document::from_value(json!({
            "_id": "d1",
            "address": {"city": "Budapest", "zip": 1111}
        }))
        .unwrap();
        assert_eq!(doc.get("address.city"), Some(&json!("Budapest")));
        assert_eq!(doc.get("address.country"), None);
        assert_eq!(doc.get("address.city.name"), None);
    }

    #[test]
    fn test_set_path_creates_intermediates() {
        let mut doc = Document::from_value(json!({"_id": "d1"})).unwrap();
        doc.set_path("a.b.c", json!(5));
        assert_eq!(doc.get("a.b.c"), Some(&json!(5)));
    }

    #[test]
    fn test_set_path_overwrites_scalar_intermediate() {
        let mut doc = Document::from_value(json!({"_id": "d1", "a": 1})).unwrap();
        doc.set_path("a.b", json!("deep"));
        assert_eq!(doc.get("a.b"), Some(&json!("deep")));
    }

    #[test]
    fn test_set_path_into_existing_object() {
        let mut doc =
            Document::from_value(json!({"_id": "d1", "a": {"keep": true}})).unwrap();
        doc.set_path("a.b", json!(2));
        assert_eq!(doc.get("a.keep"), Some(&json!(true)));
        assert_eq!(doc.get("a.b"), Some(&json!(2)));
    }

    #[test]
    fn test_remove_path() {
        let mut doc = Document::from_value(json!({
            "_id": "d1",
            "a": {"b": 1, "c": 2},
            "top": true
        }))
        .unwrap();

        assert_eq!(doc.remove_path("a.b"), Some(json!(1)));
        assert_eq!(doc.get("a.b"), None);
        assert_eq!(doc.get("a.c"), Some(&json!(2)));
        assert_eq!(doc.remove_path("top"), Some(json!(true)));
        assert_eq!(doc.remove_path("absent.path"), None);
    }

    #[test]
    fn test_serializes_as_plain_object() {
        let doc = Document::from_value(json!({"_id": "d1", "n": 1})).unwrap();
        let text = serde_json::to_string(&doc).unwrap();
        let back: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(back, json!({"_id": "d1", "n": 1}));
    }
}
