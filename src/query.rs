// src/query.rs
//! Filter evaluation for find, update, delete, and `$match`.
//!
//! A filter is a JSON object; a document matches when every key matches.
//! Individual operators live in [`operators`], registered once in a
//! global registry and dispatched by name.

pub mod operators;

pub use operators::matches_filter;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_filter_matches_all() {
        let d = json!({"_id": "a", "x": 1});
        assert!(matches_filter(&d, &json!({})).unwrap());
    }

    #[test]
    fn test_bare_value_equality() {
        let d = json!({"_id": "a", "name": "Alice"});
        assert!(matches_filter(&d, &json!({"name": "Alice"})).unwrap());
        assert!(!matches_filter(&d, &json!({"name": "Bob"})).unwrap());
    }

    #[test]
    fn test_multiple_keys_are_anded() {
        let d = json!({"_id": "a", "age": 25, "city": "NYC"});
        assert!(matches_filter(&d, &json!({"age": 25, "city": "NYC"})).unwrap());
        assert!(!matches_filter(&d, &json!({"age": 25, "city": "LA"})).unwrap());
    }

    #[test]
    fn test_range_operators_combined() {
        let d = json!({"_id": "a", "age": 25});
        assert!(matches_filter(&d, &json!({"age": {"$gte": 18, "$lt": 30}})).unwrap());
        assert!(!matches_filter(&d, &json!({"age": {"$gte": 18, "$lt": 20}})).unwrap());
    }

    #[test]
    fn test_dot_path_filter() {
        let d = json!({"_id": "a", "address": {"city": "Budapest"}});
        assert!(matches_filter(&d, &json!({"address.city": "Budapest"})).unwrap());
        assert!(!matches_filter(&d, &json!({"address.zip": {"$exists": true}})).unwrap());
    }

    #[test]
    fn test_unknown_operator_matches_nothing() {
        let d = json!({"_id": "a", "age": 25});
        assert!(!matches_filter(&d, &json!({"age": {"$near": 25}})).unwrap());
    }

    #[test]
    fn test_plain_object_criterion_is_deep_equality() {
        let d = json!({"_id": "a", "point": {"x": 1, "y": 2}});
        assert!(matches_filter(&d, &json!({"point": {"x": 1, "y": 2}})).unwrap());
        assert!(!matches_filter(&d, &json!({"point": {"x": 1}})).unwrap());
    }

    #[test]
    fn test_null_criterion_matches_null_not_missing() {
        let d = json!({"_id": "a", "x": null});
        assert!(matches_filter(&d, &json!({"x": null})).unwrap());
        // missing field does not equal null
        assert!(!matches_filter(&d, &json!({"y": null})).unwrap());
    }

    #[test]
    fn test_numeric_equality_across_forms() {
        let d = json!({"_id": "a", "total": 35.0});
        assert!(matches_filter(&d, &json!({"total": 35})).unwrap());
    }

    #[test]
    fn test_match_without_id_field() {
        // aggregation intermediates may have no _id at all
        let d = json!({"revenue": 35});
        assert!(matches_filter(&d, &json!({"revenue": {"$gt": 10}})).unwrap());
    }
}
