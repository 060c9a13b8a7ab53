// src/query_planner.rs
//! Index selection for `find`.
//!
//! The planner narrows the candidate set before the filter evaluator
//! runs. It uses at most one index — the one on the first filter field
//! that has any — and only the operators whose predicates can be
//! answered from bucket keys. The full filter is always re-applied to
//! the planner's output, so skipping an operator here only costs work,
//! never correctness.

use crate::index::FieldIndex;
use crate::value_utils::{compare_values, decode_key, values_equal};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};

/// Outcome of planning one filter.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryPlan {
    /// No usable index: evaluate the filter over every document.
    FullScan,
    /// Evaluate the filter only over these identifiers.
    IndexCandidates { field: String, ids: Vec<String> },
}

/// Operators the planner can answer from index keys.
const PLANNABLE_OPS: [&str; 6] = ["$eq", "$ne", "$gt", "$gte", "$lt", "$lte"];

/// Choose a plan for `filter` given the collection's indexes (keyed by
/// field path).
pub fn plan_query(filter: &Value, indexes: &HashMap<String, FieldIndex>) -> QueryPlan {
    let filter_obj = match filter.as_object() {
        Some(obj) if !obj.is_empty() => obj,
        _ => return QueryPlan::FullScan,
    };

    // First filter key that is a plain field with an index. `$`-keys are
    // logical operators, not fields.
    let (field, criterion) = match filter_obj
        .iter()
        .find(|(key, _)| !key.starts_with('$') && indexes.contains_key(key.as_str()))
    {
        Some(entry) => entry,
        None => return QueryPlan::FullScan,
    };
    let index = &indexes[field.as_str()];

    match candidate_ids(index, criterion) {
        Some(ids) => QueryPlan::IndexCandidates {
            field: field.clone(),
            ids: ids.into_iter().collect(),
        },
        None => QueryPlan::FullScan,
    }
}

/// Identifier set for one criterion, or `None` when the criterion has
/// nothing the index can answer.
fn candidate_ids(index: &FieldIndex, criterion: &Value) -> Option<BTreeSet<String>> {
    if let Value::Object(ops) = criterion {
        if !ops.is_empty() && ops.keys().all(|k| k.starts_with('$')) {
            // Union the buckets matching each operator, intersecting
            // across operators so they AND together.
            let mut narrowed: Option<BTreeSet<String>> = None;
            for (op, operand) in ops {
                if !PLANNABLE_OPS.contains(&op.as_str()) {
                    continue;
                }
                let matched = ids_matching(index, op, operand);
                narrowed = Some(match narrowed {
                    None => matched,
                    Some(acc) => acc.intersection(&matched).cloned().collect(),
                });
            }
            return narrowed;
        }
    }

    // Bare value (null, scalar, array, or plain object): one bucket.
    let key = crate::value_utils::canonical_key(criterion);
    let mut ids = BTreeSet::new();
    if let Some(bucket) = index.bucket(&key) {
        ids.extend(bucket.iter().cloned());
    }
    Some(ids)
}

fn ids_matching(index: &FieldIndex, op: &str, operand: &Value) -> BTreeSet<String> {
    let mut ids = BTreeSet::new();
    for (key, bucket) in &index.index {
        let key_value = match decode_key(key) {
            Some(v) => v,
            None => continue,
        };
        if key_satisfies(&key_value, op, operand) {
            ids.extend(bucket.iter().cloned());
        }
    }
    ids
}

fn key_satisfies(key_value: &Value, op: &str, operand: &Value) -> bool {
    match op {
        "$eq" => values_equal(key_value, operand),
        "$ne" => !values_equal(key_value, operand),
        "$gt" => compare_values(key_value, operand) == Some(Ordering::Greater),
        "$gte" => matches!(
            compare_values(key_value, operand),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        "$lt" => compare_values(key_value, operand) == Some(Ordering::Less),
        "$lte" => matches!(
            compare_values(key_value, operand),
            Some(Ordering::Less | Ordering::Equal)
        ),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Document;
    use serde_json::json;

    fn index_on(field: &str, docs: &[Value]) -> HashMap<String, FieldIndex> {
        let documents: Vec<Document> = docs
            .iter()
            .map(|v| Document::from_value(v.clone()).unwrap())
            .collect();
        let mut map = HashMap::new();
        map.insert(field.to_string(), FieldIndex::build("t", field, &documents));
        map
    }

    fn sample_indexes() -> HashMap<String, FieldIndex> {
        index_on(
            "age",
            &[
                json!({"_id": "a", "age": 20}),
                json!({"_id": "b", "age": 30}),
                json!({"_id": "c", "age": 40}),
                json!({"_id": "d"}),
            ],
        )
    }

    #[test]
    fn test_empty_filter_full_scan() {
        assert_eq!(plan_query(&json!({}), &sample_indexes()), QueryPlan::FullScan);
    }

    #[test]
    fn test_no_indexed_field_full_scan() {
        let plan = plan_query(&json!({"name": "x"}), &sample_indexes());
        assert_eq!(plan, QueryPlan::FullScan);
    }

    #[test]
    fn test_bare_value_uses_bucket() {
        let plan = plan_query(&json!({"age": 30}), &sample_indexes());
        assert_eq!(
            plan,
            QueryPlan::IndexCandidates {
                field: "age".to_string(),
                ids: vec!["b".to_string()],
            }
        );
    }

    #[test]
    fn test_range_operators_intersect() {
        let plan = plan_query(&json!({"age": {"$gt": 20, "$lt": 40}}), &sample_indexes());
        assert_eq!(
            plan,
            QueryPlan::IndexCandidates {
                field: "age".to_string(),
                ids: vec!["b".to_string()],
            }
        );
    }

    #[test]
    fn test_ne_unions_other_buckets() {
        let plan = plan_query(&json!({"age": {"$ne": 30}}), &sample_indexes());
        match plan {
            QueryPlan::IndexCandidates { ids, .. } => {
                assert_eq!(ids, vec!["a".to_string(), "c".to_string()]);
            }
            other => panic!("expected candidates, got {:?}", other),
        }
    }

    #[test]
    fn test_unsupported_only_operator_falls_back() {
        // $in is not plannable; the filter evaluator handles it
        let plan = plan_query(&json!({"age": {"$in": [20, 30]}}), &sample_indexes());
        assert_eq!(plan, QueryPlan::FullScan);
    }

    #[test]
    fn test_mixed_operators_use_supported_subset() {
        let plan = plan_query(
            &json!({"age": {"$gte": 30, "$in": [30, 40]}}),
            &sample_indexes(),
        );
        match plan {
            QueryPlan::IndexCandidates { ids, .. } => {
                // superset from $gte alone; $in is left to the filter
                assert_eq!(ids, vec!["b".to_string(), "c".to_string()]);
            }
            other => panic!("expected candidates, got {:?}", other),
        }
    }

    #[test]
    fn test_first_indexed_field_wins() {
        let mut indexes = sample_indexes();
        indexes.extend(index_on("city", &[json!({"_id": "x", "city": "NYC"})]));

        // "name" has no index, "age" is the first that does
        let plan = plan_query(&json!({"name": "n", "age": 20, "city": "NYC"}), &indexes);
        match plan {
            QueryPlan::IndexCandidates { field, .. } => assert_eq!(field, "age"),
            other => panic!("expected candidates, got {:?}", other),
        }
    }

    #[test]
    fn test_numeric_range_over_string_sorted_keys() {
        // canonical keys "10" < "9" as strings; planner must compare numerically
        let indexes = index_on(
            "n",
            &[
                json!({"_id": "a", "n": 9}),
                json!({"_id": "b", "n": 10}),
                json!({"_id": "c", "n": 100}),
            ],
        );
        let plan = plan_query(&json!({"n": {"$gte": 10}}), &indexes);
        match plan {
            QueryPlan::IndexCandidates { ids, .. } => {
                assert_eq!(ids, vec!["b".to_string(), "c".to_string()]);
            }
            other => panic!("expected candidates, got {:?}", other),
        }
    }
}
