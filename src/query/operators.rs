// src/query/operators.rs
//! Query operator implementations.
//!
//! Each operator is a separate type implementing [`OperatorMatcher`];
//! a lazy-static registry dispatches on the operator name. Operators the
//! registry does not know match nothing — they are not an error, so a
//! filter with a stray `$typo` simply returns an empty result.

use crate::error::{QuartzError, Result};
use crate::value_utils::{compare_values, resolve_path, values_equal};
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;

/// Interface every query operator implements.
///
/// `doc_value` is the value the filtered field resolved to (`None` when
/// missing); `criterion` is the operator's operand from the filter;
/// `document` is the whole document, needed by the logical operators
/// that recurse into sub-filters.
pub trait OperatorMatcher: Send + Sync {
    fn name(&self) -> &'static str;

    fn matches(
        &self,
        doc_value: Option<&Value>,
        criterion: &Value,
        document: Option<&Value>,
    ) -> Result<bool>;
}

// ============================================================================
// COMPARISON OPERATORS
// ============================================================================

/// `$eq` — equality (deep, numeric-aware)
pub struct EqOperator;

impl OperatorMatcher for EqOperator {
    fn name(&self) -> &'static str {
        "$eq"
    }

    fn matches(
        &self,
        doc_value: Option<&Value>,
        criterion: &Value,
        _document: Option<&Value>,
    ) -> Result<bool> {
        Ok(doc_value.map_or(false, |v| values_equal(v, criterion)))
    }
}

/// `$ne` — inequality. A missing field is not equal to anything, so it
/// matches.
pub struct NeOperator;

impl OperatorMatcher for NeOperator {
    fn name(&self) -> &'static str {
        "$ne"
    }

    fn matches(
        &self,
        doc_value: Option<&Value>,
        criterion: &Value,
        _document: Option<&Value>,
    ) -> Result<bool> {
        Ok(doc_value.map_or(true, |v| !values_equal(v, criterion)))
    }
}

/// Shared body of the four range operators. Ordering is defined for
/// number/number and string/string only; any other pairing yields false.
fn ordered_match(
    doc_value: Option<&Value>,
    criterion: &Value,
    accept: fn(Ordering) -> bool,
) -> bool {
    match doc_value {
        None => false,
        Some(v) => compare_values(v, criterion).map_or(false, accept),
    }
}

/// `$gt`
pub struct GtOperator;

impl OperatorMatcher for GtOperator {
    fn name(&self) -> &'static str {
        "$gt"
    }

    fn matches(
        &self,
        doc_value: Option<&Value>,
        criterion: &Value,
        _document: Option<&Value>,
    ) -> Result<bool> {
        Ok(ordered_match(doc_value, criterion, |o| o == Ordering::Greater))
    }
}

/// `$gte`
pub struct GteOperator;

impl OperatorMatcher for GteOperator {
    fn name(&self) -> &'static str {
        "$gte"
    }

    fn matches(
        &self,
        doc_value: Option<&Value>,
        criterion: &Value,
        _document: Option<&Value>,
    ) -> Result<bool> {
        Ok(ordered_match(doc_value, criterion, |o| o != Ordering::Less))
    }
}

/// `$lt`
pub struct LtOperator;

impl OperatorMatcher for LtOperator {
    fn name(&self) -> &'static str {
        "$lt"
    }

    fn matches(
        &self,
        doc_value: Option<&Value>,
        criterion: &Value,
        _document: Option<&Value>,
    ) -> Result<bool> {
        Ok(ordered_match(doc_value, criterion, |o| o == Ordering::Less))
    }
}

/// `$lte`
pub struct LteOperator;

impl OperatorMatcher for LteOperator {
    fn name(&self) -> &'static str {
        "$lte"
    }

    fn matches(
        &self,
        doc_value: Option<&Value>,
        criterion: &Value,
        _document: Option<&Value>,
    ) -> Result<bool> {
        Ok(ordered_match(doc_value, criterion, |o| o != Ordering::Greater))
    }
}

// ============================================================================
// SET OPERATORS
// ============================================================================

/// `$in` — membership in the operand array
pub struct InOperator;

impl OperatorMatcher for InOperator {
    fn name(&self) -> &'static str {
        "$in"
    }

    fn matches(
        &self,
        doc_value: Option<&Value>,
        criterion: &Value,
        _document: Option<&Value>,
    ) -> Result<bool> {
        let candidates = criterion.as_array().ok_or_else(|| {
            QuartzError::InvalidQuery("$in requires an array operand".to_string())
        })?;
        Ok(doc_value.map_or(false, |v| candidates.iter().any(|c| values_equal(v, c))))
    }
}

/// `$nin` — absence from the operand array. Missing fields match.
pub struct NinOperator;

impl OperatorMatcher for NinOperator {
    fn name(&self) -> &'static str {
        "$nin"
    }

    fn matches(
        &self,
        doc_value: Option<&Value>,
        criterion: &Value,
        _document: Option<&Value>,
    ) -> Result<bool> {
        let candidates = criterion.as_array().ok_or_else(|| {
            QuartzError::InvalidQuery("$nin requires an array operand".to_string())
        })?;
        Ok(doc_value.map_or(true, |v| !candidates.iter().any(|c| values_equal(v, c))))
    }
}

// ============================================================================
// ELEMENT OPERATORS
// ============================================================================

/// `$exists` — asserts field presence (missing is distinct from null)
pub struct ExistsOperator;

impl OperatorMatcher for ExistsOperator {
    fn name(&self) -> &'static str {
        "$exists"
    }

    fn matches(
        &self,
        doc_value: Option<&Value>,
        criterion: &Value,
        _document: Option<&Value>,
    ) -> Result<bool> {
        match criterion {
            Value::Bool(should_exist) => Ok(doc_value.is_some() == *should_exist),
            _ => Err(QuartzError::InvalidQuery(
                "$exists requires a boolean operand".to_string(),
            )),
        }
    }
}

/// `$regex` — pattern match on string values, `regex` crate dialect.
/// Non-string document values never match.
pub struct RegexOperator;

impl OperatorMatcher for RegexOperator {
    fn name(&self) -> &'static str {
        "$regex"
    }

    fn matches(
        &self,
        doc_value: Option<&Value>,
        criterion: &Value,
        _document: Option<&Value>,
    ) -> Result<bool> {
        let pattern = criterion.as_str().ok_or_else(|| {
            QuartzError::InvalidQuery("$regex requires a string pattern".to_string())
        })?;
        let re = Regex::new(pattern)
            .map_err(|e| QuartzError::InvalidQuery(format!("$regex: {}", e)))?;
        match doc_value {
            Some(Value::String(s)) => Ok(re.is_match(s)),
            _ => Ok(false),
        }
    }
}

// ============================================================================
// LOGICAL OPERATORS
// ============================================================================

fn sub_filters<'a>(criterion: &'a Value, op: &str) -> Result<&'a Vec<Value>> {
    match criterion {
        Value::Array(conditions) => Ok(conditions),
        _ => Err(QuartzError::InvalidQuery(format!(
            "{} requires an array of filters",
            op
        ))),
    }
}

fn whole_document<'a>(document: Option<&'a Value>, op: &str) -> Result<&'a Value> {
    document.ok_or_else(|| {
        QuartzError::InvalidQuery(format!("{} is only valid at the top level", op))
    })
}

/// `$and` — every sub-filter must match
pub struct AndOperator;

impl OperatorMatcher for AndOperator {
    fn name(&self) -> &'static str {
        "$and"
    }

    fn matches(
        &self,
        _doc_value: Option<&Value>,
        criterion: &Value,
        document: Option<&Value>,
    ) -> Result<bool> {
        let doc = whole_document(document, "$and")?;
        for condition in sub_filters(criterion, "$and")? {
            if !matches_filter(doc, condition)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// `$or` — at least one sub-filter must match
pub struct OrOperator;

impl OperatorMatcher for OrOperator {
    fn name(&self) -> &'static str {
        "$or"
    }

    fn matches(
        &self,
        _doc_value: Option<&Value>,
        criterion: &Value,
        document: Option<&Value>,
    ) -> Result<bool> {
        let doc = whole_document(document, "$or")?;
        for condition in sub_filters(criterion, "$or")? {
            if matches_filter(doc, condition)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// `$nor` — no sub-filter may match
pub struct NorOperator;

impl OperatorMatcher for NorOperator {
    fn name(&self) -> &'static str {
        "$nor"
    }

    fn matches(
        &self,
        _doc_value: Option<&Value>,
        criterion: &Value,
        document: Option<&Value>,
    ) -> Result<bool> {
        let doc = whole_document(document, "$nor")?;
        for condition in sub_filters(criterion, "$nor")? {
            if matches_filter(doc, condition)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// `$not` — negates the wrapped operator object
pub struct NotOperator;

impl OperatorMatcher for NotOperator {
    fn name(&self) -> &'static str {
        "$not"
    }

    fn matches(
        &self,
        doc_value: Option<&Value>,
        criterion: &Value,
        document: Option<&Value>,
    ) -> Result<bool> {
        Ok(!matches_criterion(doc_value, criterion, document)?)
    }
}

// ============================================================================
// REGISTRY
// ============================================================================

lazy_static! {
    /// Registry of all query operators, keyed by name. Initialized once;
    /// all operators are `Send + Sync`.
    pub static ref OPERATOR_REGISTRY: HashMap<&'static str, Box<dyn OperatorMatcher>> = {
        let mut registry: HashMap<&'static str, Box<dyn OperatorMatcher>> = HashMap::new();

        registry.insert("$eq", Box::new(EqOperator));
        registry.insert("$ne", Box::new(NeOperator));
        registry.insert("$gt", Box::new(GtOperator));
        registry.insert("$gte", Box::new(GteOperator));
        registry.insert("$lt", Box::new(LtOperator));
        registry.insert("$lte", Box::new(LteOperator));

        registry.insert("$in", Box::new(InOperator));
        registry.insert("$nin", Box::new(NinOperator));

        registry.insert("$exists", Box::new(ExistsOperator));
        registry.insert("$regex", Box::new(RegexOperator));

        registry.insert("$and", Box::new(AndOperator));
        registry.insert("$or", Box::new(OrOperator));
        registry.insert("$nor", Box::new(NorOperator));
        registry.insert("$not", Box::new(NotOperator));

        registry
    };
}

/// Evaluate one field criterion against a resolved value.
///
/// An object whose keys all start with `$` is an operator conjunction;
/// any other value (plain objects included) is an equality test.
fn matches_criterion(
    doc_value: Option<&Value>,
    criterion: &Value,
    document: Option<&Value>,
) -> Result<bool> {
    if let Value::Object(ops) = criterion {
        if !ops.is_empty() && ops.keys().all(|k| k.starts_with('$')) {
            for (op_name, operand) in ops {
                match OPERATOR_REGISTRY.get(op_name.as_str()) {
                    Some(operator) => {
                        if !operator.matches(doc_value, operand, document)? {
                            return Ok(false);
                        }
                    }
                    // Unknown operators match nothing, without erroring.
                    None => return Ok(false),
                }
            }
            return Ok(true);
        }
    }
    Ok(doc_value.map_or(false, |v| values_equal(v, criterion)))
}

/// Evaluate a whole filter against a document value.
///
/// The document matches when every key of the filter matches: `$`-keys
/// dispatch to logical operators, everything else is a field criterion
/// resolved as a dot-path.
pub fn matches_filter(document: &Value, filter: &Value) -> Result<bool> {
    let filter_obj = filter.as_object().ok_or_else(|| {
        QuartzError::InvalidQuery("Filter must be a JSON object".to_string())
    })?;

    for (key, criterion) in filter_obj {
        if key.starts_with('$') {
            match OPERATOR_REGISTRY.get(key.as_str()) {
                Some(operator) => {
                    if !operator.matches(None, criterion, Some(document))? {
                        return Ok(false);
                    }
                }
                None => return Ok(false),
            }
        } else if !matches_criterion(resolve_path(document, key), criterion, Some(document))? {
            return Ok(false);
        }
    }

    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_eq_and_ne() {
        let eq = EqOperator;
        assert!(eq.matches(Some(&json!(5)), &json!(5.0), None).unwrap());
        assert!(!eq.matches(None, &json!(5), None).unwrap());

        let ne = NeOperator;
        assert!(ne.matches(Some(&json!(5)), &json!(6), None).unwrap());
        assert!(ne.matches(None, &json!(6), None).unwrap());
    }

    #[test]
    fn test_range_operators() {
        let gt = GtOperator;
        assert!(gt.matches(Some(&json!(10)), &json!(5), None).unwrap());
        assert!(!gt.matches(Some(&json!(5)), &json!(5), None).unwrap());

        let gte = GteOperator;
        assert!(gte.matches(Some(&json!(5)), &json!(5), None).unwrap());

        let lt = LtOperator;
        assert!(lt.matches(Some(&json!("apple")), &json!("banana"), None).unwrap());

        let lte = LteOperator;
        assert!(lte.matches(Some(&json!("b")), &json!("b"), None).unwrap());
    }

    #[test]
    fn test_range_operators_reject_mixed_types() {
        let gt = GtOperator;
        // string vs number is unordered, never matches
        assert!(!gt.matches(Some(&json!("10")), &json!(5), None).unwrap());
        assert!(!gt.matches(Some(&json!(true)), &json!(false), None).unwrap());
    }

    #[test]
    fn test_in_nin() {
        let inside = InOperator;
        let set = json!(["NYC", "LA"]);
        assert!(inside.matches(Some(&json!("NYC")), &set, None).unwrap());
        assert!(!inside.matches(Some(&json!("SF")), &set, None).unwrap());
        assert!(!inside.matches(None, &set, None).unwrap());
        assert!(inside.matches(Some(&json!("NYC")), &json!("NYC"), None).is_err());

        let outside = NinOperator;
        assert!(outside.matches(Some(&json!("SF")), &set, None).unwrap());
        assert!(outside.matches(None, &set, None).unwrap());
        assert!(!outside.matches(Some(&json!("LA")), &set, None).unwrap());
    }

    #[test]
    fn test_exists() {
        let op = ExistsOperator;
        assert!(op.matches(Some(&json!(null)), &json!(true), None).unwrap());
        assert!(!op.matches(None, &json!(true), None).unwrap());
        assert!(op.matches(None, &json!(false), None).unwrap());
        assert!(op.matches(None, &json!(1), None).is_err());
    }

    #[test]
    fn test_regex() {
        let op = RegexOperator;
        assert!(op
            .matches(Some(&json!("cust001")), &json!("^cust"), None)
            .unwrap());
        assert!(!op
            .matches(Some(&json!("order9")), &json!("^cust"), None)
            .unwrap());
        // non-string value never matches
        assert!(!op.matches(Some(&json!(42)), &json!("^4"), None).unwrap());
        assert!(!op.matches(None, &json!("^4"), None).unwrap());
        // malformed pattern is a query error
        assert!(op.matches(Some(&json!("x")), &json!("["), None).is_err());
    }

    #[test]
    fn test_logical_operators() {
        let d = json!({"_id": "a", "age": 25, "city": "NYC"});

        let and = AndOperator;
        assert!(and
            .matches(None, &json!([{"age": {"$gte": 18}}, {"city": "NYC"}]), Some(&d))
            .unwrap());

        let or = OrOperator;
        assert!(or
            .matches(None, &json!([{"age": {"$lt": 18}}, {"city": "NYC"}]), Some(&d))
            .unwrap());

        let nor = NorOperator;
        assert!(nor
            .matches(None, &json!([{"age": {"$lt": 18}}, {"city": "LA"}]), Some(&d))
            .unwrap());
    }

    #[test]
    fn test_not_negates_operator_object() {
        let d = json!({"_id": "a", "age": 25});
        assert!(matches_filter(&d, &json!({"age": {"$not": {"$gt": 30}}})).unwrap());
        assert!(!matches_filter(&d, &json!({"age": {"$not": {"$gt": 18}}})).unwrap());
    }

    #[test]
    fn test_unknown_top_level_operator_matches_nothing() {
        let d = json!({"_id": "a", "x": 1});
        assert!(!matches_filter(&d, &json!({"$nearby": [{"x": 1}]})).unwrap());
    }

    #[test]
    fn test_non_object_filter_is_error() {
        let d = json!({"_id": "a"});
        assert!(matches_filter(&d, &json!([1, 2])).is_err());
    }

    #[test]
    fn test_registry_contents() {
        for op in [
            "$eq", "$ne", "$gt", "$gte", "$lt", "$lte", "$in", "$nin", "$exists", "$regex",
            "$and", "$or", "$nor", "$not",
        ] {
            assert!(OPERATOR_REGISTRY.contains_key(op), "missing {}", op);
        }
        assert_eq!(OPERATOR_REGISTRY.len(), 14);
    }
}
