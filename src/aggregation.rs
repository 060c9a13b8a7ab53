// src/aggregation.rs
// Aggregation pipeline: an ordered list of stages executed over a
// document array, each stage consuming the previous output.

pub mod expression;

use crate::error::{QuartzError, Result};
use crate::query::matches_filter;
use crate::value_utils::{
    canonical_key, compare_for_sort, remove_path_value, resolve_path, set_path_value,
    values_equal,
};
use expression::{number_value, Expr};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Hook for `$lookup`. The engine always runs [`StubLookup`]; a real
/// join can be supplied through [`Pipeline::execute_with`].
pub trait LookupResolver {
    fn lookup(
        &self,
        from: &str,
        local_value: Option<&Value>,
        foreign_field: &str,
    ) -> Result<Vec<Value>>;
}

/// The carried-over `$lookup` contract: every document gets an empty
/// array attached, whatever the arguments.
pub struct StubLookup;

impl LookupResolver for StubLookup {
    fn lookup(
        &self,
        _from: &str,
        _local_value: Option<&Value>,
        _foreign_field: &str,
    ) -> Result<Vec<Value>> {
        Ok(Vec::new())
    }
}

/// Parsed aggregation pipeline.
#[derive(Debug, Clone)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

#[derive(Debug, Clone)]
enum Stage {
    Match(MatchStage),
    Project(ProjectStage),
    Group(GroupStage),
    Sort(SortStage),
    Limit(usize),
    Skip(usize),
    Unwind(UnwindStage),
    Lookup(LookupStage),
    Count(String),
}

impl Pipeline {
    /// Parse a pipeline from its JSON form (an array of single-key
    /// stage objects).
    pub fn from_json(pipeline_json: &Value) -> Result<Self> {
        let stages_json = pipeline_json.as_array().ok_or_else(|| {
            QuartzError::AggregationError("Pipeline must be an array".to_string())
        })?;
        if stages_json.is_empty() {
            return Err(QuartzError::AggregationError(
                "Pipeline must not be empty".to_string(),
            ));
        }

        let mut stages = Vec::with_capacity(stages_json.len());
        for stage_json in stages_json {
            stages.push(Stage::from_json(stage_json)?);
        }
        Ok(Pipeline { stages })
    }

    /// Execute with the stub `$lookup`.
    pub fn execute(&self, docs: Vec<Value>) -> Result<Vec<Value>> {
        self.execute_with(docs, &StubLookup)
    }

    /// Execute with a caller-supplied `$lookup` implementation.
    pub fn execute_with(
        &self,
        mut docs: Vec<Value>,
        resolver: &dyn LookupResolver,
    ) -> Result<Vec<Value>> {
        for stage in &self.stages {
            docs = stage.execute(docs, resolver)?;
        }
        Ok(docs)
    }
}

impl Stage {
    fn from_json(stage_json: &Value) -> Result<Self> {
        let obj = stage_json.as_object().ok_or_else(|| {
            QuartzError::AggregationError("Stage must be an object".to_string())
        })?;
        if obj.len() != 1 {
            return Err(QuartzError::AggregationError(
                "Stage must have exactly one operator".to_string(),
            ));
        }
        let (name, spec) = obj.iter().next().unwrap();

        match name.as_str() {
            "$match" => Ok(Stage::Match(MatchStage::from_json(spec)?)),
            "$project" => Ok(Stage::Project(ProjectStage::from_json(spec)?)),
            "$group" => Ok(Stage::Group(GroupStage::from_json(spec)?)),
            "$sort" => Ok(Stage::Sort(SortStage::from_json(spec)?)),
            "$limit" => Ok(Stage::Limit(parse_stage_count("$limit", spec)?)),
            "$skip" => Ok(Stage::Skip(parse_stage_count("$skip", spec)?)),
            "$unwind" => Ok(Stage::Unwind(UnwindStage::from_json(spec)?)),
            "$lookup" => Ok(Stage::Lookup(LookupStage::from_json(spec)?)),
            "$count" => match spec.as_str() {
                Some(field) if !field.is_empty() => Ok(Stage::Count(field.to_string())),
                _ => Err(QuartzError::AggregationError(
                    "$count takes a non-empty field name".to_string(),
                )),
            },
            other => Err(QuartzError::UnsupportedStage(other.to_string())),
        }
    }

    fn execute(&self, docs: Vec<Value>, resolver: &dyn LookupResolver) -> Result<Vec<Value>> {
        match self {
            Stage::Match(stage) => stage.execute(docs),
            Stage::Project(stage) => stage.execute(docs),
            Stage::Group(stage) => stage.execute(docs),
            Stage::Sort(stage) => Ok(stage.execute(docs)),
            Stage::Limit(n) => {
                let mut docs = docs;
                docs.truncate(*n);
                Ok(docs)
            }
            Stage::Skip(n) => Ok(docs.into_iter().skip(*n).collect()),
            Stage::Unwind(stage) => Ok(stage.execute(docs)),
            Stage::Lookup(stage) => stage.execute(docs, resolver),
            Stage::Count(field) => {
                let mut out = Map::new();
                out.insert(field.clone(), Value::from(docs.len() as u64));
                Ok(vec![Value::Object(out)])
            }
        }
    }
}

fn parse_stage_count(stage: &str, spec: &Value) -> Result<usize> {
    match spec.as_u64() {
        Some(n) => Ok(n as usize),
        None => Err(QuartzError::AggregationError(format!(
            "{} takes a non-negative integer",
            stage
        ))),
    }
}

// ============================================================================
// $match
// ============================================================================

#[derive(Debug, Clone)]
struct MatchStage {
    filter: Value,
}

impl MatchStage {
    fn from_json(spec: &Value) -> Result<Self> {
        if !spec.is_object() {
            return Err(QuartzError::AggregationError(
                "$match takes a filter object".to_string(),
            ));
        }
        Ok(MatchStage {
            filter: spec.clone(),
        })
    }

    fn execute(&self, docs: Vec<Value>) -> Result<Vec<Value>> {
        let mut results = Vec::new();
        for doc in docs {
            if matches_filter(&doc, &self.filter)? {
                results.push(doc);
            }
        }
        Ok(results)
    }
}

// ============================================================================
// $project
// ============================================================================

#[derive(Debug, Clone)]
enum ProjectField {
    Include,
    Exclude,
    Expr(Expr),
}

#[derive(Debug, Clone)]
struct ProjectStage {
    fields: Vec<(String, ProjectField)>,
    include_mode: bool,
}

impl ProjectStage {
    fn from_json(spec: &Value) -> Result<Self> {
        let obj = spec.as_object().ok_or_else(|| {
            QuartzError::AggregationError("$project takes an object".to_string())
        })?;
        if obj.is_empty() {
            return Err(QuartzError::AggregationError(
                "$project must name at least one field".to_string(),
            ));
        }

        let mut fields = Vec::with_capacity(obj.len());
        for (field, value) in obj {
            let action = match value {
                Value::Number(n) => match n.as_i64() {
                    Some(0) => ProjectField::Exclude,
                    Some(1) => ProjectField::Include,
                    _ => {
                        return Err(QuartzError::AggregationError(format!(
                            "Invalid $project value for '{}': expected 0, 1, or an expression",
                            field
                        )))
                    }
                },
                Value::String(s) if s.starts_with('$') => {
                    ProjectField::Expr(Expr::parse(value)?)
                }
                Value::Object(_) => ProjectField::Expr(Expr::parse(value)?),
                _ => {
                    return Err(QuartzError::AggregationError(format!(
                        "Invalid $project value for '{}': expected 0, 1, or an expression",
                        field
                    )))
                }
            };
            fields.push((field.clone(), action));
        }

        let has_inclusion = fields
            .iter()
            .any(|(_, a)| matches!(a, ProjectField::Include | ProjectField::Expr(_)));
        let has_exclusion_beyond_id = fields
            .iter()
            .any(|(f, a)| matches!(a, ProjectField::Exclude) && f != "_id");

        if has_inclusion && has_exclusion_beyond_id {
            return Err(QuartzError::AggregationError(
                "$project cannot mix inclusion and exclusion".to_string(),
            ));
        }

        Ok(ProjectStage {
            fields,
            include_mode: has_inclusion,
        })
    }

    fn execute(&self, docs: Vec<Value>) -> Result<Vec<Value>> {
        let mut results = Vec::with_capacity(docs.len());
        for doc in docs {
            results.push(self.project(doc)?);
        }
        Ok(results)
    }

    fn project(&self, doc: Value) -> Result<Value> {
        if !self.include_mode {
            // Exclusion: start from the document, delete the named keys.
            let mut out = doc;
            for (field, _) in &self.fields {
                remove_path_value(&mut out, field);
            }
            return Ok(out);
        }

        // Inclusion: start empty; _id comes along unless excluded.
        let mut out = Map::new();
        let id_excluded = self
            .fields
            .iter()
            .any(|(f, a)| f == "_id" && matches!(a, ProjectField::Exclude));
        if !id_excluded {
            if let Some(id) = resolve_path(&doc, "_id") {
                out.insert("_id".to_string(), id.clone());
            }
        }

        for (field, action) in &self.fields {
            match action {
                ProjectField::Include => {
                    if let Some(value) = resolve_path(&doc, field) {
                        out.insert(field.clone(), value.clone());
                    }
                }
                ProjectField::Expr(expr) => {
                    if let Some(value) = expr.eval(&doc)? {
                        out.insert(field.clone(), value);
                    }
                }
                ProjectField::Exclude => {}
            }
        }
        Ok(Value::Object(out))
    }
}

// ============================================================================
// $group
// ============================================================================

#[derive(Debug, Clone)]
enum Accumulator {
    Sum(Expr),
    Avg(Expr),
    Min(Expr),
    Max(Expr),
    First(Expr),
    Last(Expr),
    Push(Expr),
    AddToSet(Expr),
}

#[derive(Debug, Clone)]
struct GroupStage {
    key: Expr,
    accumulators: Vec<(String, Accumulator)>,
}

impl GroupStage {
    fn from_json(spec: &Value) -> Result<Self> {
        let obj = spec.as_object().ok_or_else(|| {
            QuartzError::AggregationError("$group takes an object".to_string())
        })?;
        let key_spec = obj.get("_id").ok_or_else(|| {
            QuartzError::AggregationError("$group requires an _id expression".to_string())
        })?;
        let key = Expr::parse(key_spec)?;

        let mut accumulators = Vec::new();
        for (field, value) in obj {
            if field == "_id" {
                continue;
            }
            accumulators.push((field.clone(), Accumulator::from_json(value)?));
        }

        Ok(GroupStage { key, accumulators })
    }

    fn execute(&self, docs: Vec<Value>) -> Result<Vec<Value>> {
        // Bucket documents by the canonical encoding of their group key,
        // remembering first-encounter order.
        let mut order: Vec<String> = Vec::new();
        let mut key_values: HashMap<String, Value> = HashMap::new();
        let mut members: HashMap<String, Vec<Value>> = HashMap::new();

        for doc in docs {
            let key_value = self.key.eval(&doc)?.unwrap_or(Value::Null);
            let bucket = canonical_key(&key_value);
            if !members.contains_key(&bucket) {
                order.push(bucket.clone());
                key_values.insert(bucket.clone(), key_value);
            }
            members.entry(bucket).or_default().push(doc);
        }

        let mut results = Vec::with_capacity(order.len());
        for bucket in order {
            let group_docs = &members[&bucket];
            let mut out = Map::new();
            out.insert(
                "_id".to_string(),
                key_values.remove(&bucket).unwrap_or(Value::Null),
            );
            for (field, accumulator) in &self.accumulators {
                out.insert(field.clone(), accumulator.compute(group_docs)?);
            }
            results.push(Value::Object(out));
        }
        Ok(results)
    }
}

impl Accumulator {
    fn from_json(spec: &Value) -> Result<Self> {
        let obj = spec.as_object().ok_or_else(|| {
            QuartzError::AggregationError("Accumulator must be an object".to_string())
        })?;
        if obj.len() != 1 {
            return Err(QuartzError::AggregationError(
                "Accumulator must have exactly one operator".to_string(),
            ));
        }
        let (op, operand) = obj.iter().next().unwrap();
        let expr = Expr::parse(operand)?;

        match op.as_str() {
            "$sum" => Ok(Accumulator::Sum(expr)),
            "$avg" => Ok(Accumulator::Avg(expr)),
            "$min" => Ok(Accumulator::Min(expr)),
            "$max" => Ok(Accumulator::Max(expr)),
            "$first" => Ok(Accumulator::First(expr)),
            "$last" => Ok(Accumulator::Last(expr)),
            "$push" => Ok(Accumulator::Push(expr)),
            "$addToSet" => Ok(Accumulator::AddToSet(expr)),
            other => Err(QuartzError::UnsupportedOperator(other.to_string())),
        }
    }

    fn compute(&self, docs: &[Value]) -> Result<Value> {
        match self {
            // Undefined and non-numeric values contribute zero.
            Accumulator::Sum(expr) => {
                let mut sum = 0.0;
                for doc in docs {
                    if let Some(n) = expr.eval(doc)?.as_ref().and_then(Value::as_f64) {
                        sum += n;
                    }
                }
                Ok(number_value(sum))
            }

            // Mean of the observed numeric values.
            Accumulator::Avg(expr) => {
                let mut sum = 0.0;
                let mut count = 0u64;
                for doc in docs {
                    if let Some(n) = expr.eval(doc)?.as_ref().and_then(Value::as_f64) {
                        sum += n;
                        count += 1;
                    }
                }
                if count == 0 {
                    Ok(Value::Null)
                } else {
                    Ok(Value::from(sum / count as f64))
                }
            }

            Accumulator::Min(expr) => self.extremum(docs, expr, f64::min),
            Accumulator::Max(expr) => self.extremum(docs, expr, f64::max),

            Accumulator::First(expr) => match docs.first() {
                Some(doc) => Ok(expr.eval(doc)?.unwrap_or(Value::Null)),
                None => Ok(Value::Null),
            },
            Accumulator::Last(expr) => match docs.last() {
                Some(doc) => Ok(expr.eval(doc)?.unwrap_or(Value::Null)),
                None => Ok(Value::Null),
            },

            // Undefined values are skipped.
            Accumulator::Push(expr) => {
                let mut items = Vec::new();
                for doc in docs {
                    if let Some(value) = expr.eval(doc)? {
                        items.push(value);
                    }
                }
                Ok(Value::Array(items))
            }

            Accumulator::AddToSet(expr) => {
                let mut items: Vec<Value> = Vec::new();
                for doc in docs {
                    if let Some(value) = expr.eval(doc)? {
                        if !items.iter().any(|seen| values_equal(seen, &value)) {
                            items.push(value);
                        }
                    }
                }
                Ok(Value::Array(items))
            }
        }
    }

    fn extremum(&self, docs: &[Value], expr: &Expr, pick: fn(f64, f64) -> f64) -> Result<Value> {
        let mut best: Option<f64> = None;
        for doc in docs {
            if let Some(n) = expr.eval(doc)?.as_ref().and_then(Value::as_f64) {
                best = Some(best.map_or(n, |b| pick(b, n)));
            }
        }
        Ok(best.map(number_value).unwrap_or(Value::Null))
    }
}

// ============================================================================
// $sort
// ============================================================================

#[derive(Debug, Clone)]
struct SortStage {
    keys: Vec<(String, i64)>,
}

impl SortStage {
    fn from_json(spec: &Value) -> Result<Self> {
        let obj = spec.as_object().ok_or_else(|| {
            QuartzError::AggregationError("$sort takes an object".to_string())
        })?;
        if obj.is_empty() {
            return Err(QuartzError::AggregationError(
                "$sort must name at least one key".to_string(),
            ));
        }

        let mut keys = Vec::with_capacity(obj.len());
        for (field, direction) in obj {
            match direction.as_i64() {
                Some(d @ (1 | -1)) => keys.push((field.clone(), d)),
                _ => {
                    return Err(QuartzError::AggregationError(
                        "Sort direction must be 1 or -1".to_string(),
                    ))
                }
            }
        }
        Ok(SortStage { keys })
    }

    fn execute(&self, mut docs: Vec<Value>) -> Vec<Value> {
        // Vec::sort_by is stable: ties keep input order.
        docs.sort_by(|a, b| {
            for (field, direction) in &self.keys {
                let mut cmp = compare_for_sort(resolve_path(a, field), resolve_path(b, field));
                if *direction < 0 {
                    cmp = cmp.reverse();
                }
                if cmp != std::cmp::Ordering::Equal {
                    return cmp;
                }
            }
            std::cmp::Ordering::Equal
        });
        docs
    }
}

// ============================================================================
// $unwind
// ============================================================================

#[derive(Debug, Clone)]
struct UnwindStage {
    path: String,
    preserve_null_and_empty: bool,
    include_array_index: Option<String>,
}

impl UnwindStage {
    fn from_json(spec: &Value) -> Result<Self> {
        match spec {
            Value::String(path) => Ok(UnwindStage {
                path: field_ref_path(path, "$unwind")?,
                preserve_null_and_empty: false,
                include_array_index: None,
            }),
            Value::Object(obj) => {
                let path = obj.get("path").and_then(Value::as_str).ok_or_else(|| {
                    QuartzError::AggregationError(
                        "$unwind requires a path field reference".to_string(),
                    )
                })?;
                let preserve = obj
                    .get("preserveNullAndEmptyArrays")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                let include_index = obj
                    .get("includeArrayIndex")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                Ok(UnwindStage {
                    path: field_ref_path(path, "$unwind")?,
                    preserve_null_and_empty: preserve,
                    include_array_index: include_index,
                })
            }
            _ => Err(QuartzError::AggregationError(
                "$unwind takes a field reference or an options object".to_string(),
            )),
        }
    }

    fn execute(&self, docs: Vec<Value>) -> Vec<Value> {
        let mut results = Vec::new();
        for doc in docs {
            match resolve_path(&doc, &self.path).cloned() {
                Some(Value::Array(items)) if !items.is_empty() => {
                    for (position, item) in items.into_iter().enumerate() {
                        let mut copy = doc.clone();
                        set_path_value(&mut copy, &self.path, item);
                        if let Some(index_path) = &self.include_array_index {
                            set_path_value(&mut copy, index_path, Value::from(position as u64));
                        }
                        results.push(copy);
                    }
                }
                // missing, null, or empty array: dropped unless preserved
                Some(Value::Array(_)) | Some(Value::Null) | None => {
                    if self.preserve_null_and_empty {
                        let mut copy = doc;
                        set_path_value(&mut copy, &self.path, Value::Null);
                        if let Some(index_path) = &self.include_array_index {
                            set_path_value(&mut copy, index_path, Value::Null);
                        }
                        results.push(copy);
                    }
                }
                // non-array value: the document is dropped
                Some(_) => {}
            }
        }
        results
    }
}

fn field_ref_path(reference: &str, stage: &str) -> Result<String> {
    match reference.strip_prefix('$') {
        Some(path) if !path.is_empty() => Ok(path.to_string()),
        _ => Err(QuartzError::AggregationError(format!(
            "{} path must be a $-prefixed field reference",
            stage
        ))),
    }
}

// ============================================================================
// $lookup
// ============================================================================

#[derive(Debug, Clone)]
struct LookupStage {
    from: String,
    local_field: String,
    foreign_field: String,
    as_field: String,
}

impl LookupStage {
    fn from_json(spec: &Value) -> Result<Self> {
        let obj = spec.as_object().ok_or_else(|| {
            QuartzError::AggregationError("$lookup takes an object".to_string())
        })?;
        let get = |key: &str| -> Result<String> {
            obj.get(key)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| {
                    QuartzError::AggregationError(format!("$lookup requires '{}'", key))
                })
        };
        Ok(LookupStage {
            from: get("from")?,
            local_field: get("localField")?,
            foreign_field: get("foreignField")?,
            as_field: get("as")?,
        })
    }

    fn execute(&self, docs: Vec<Value>, resolver: &dyn LookupResolver) -> Result<Vec<Value>> {
        let mut results = Vec::with_capacity(docs.len());
        for doc in docs {
            let joined = {
                let local = resolve_path(&doc, &self.local_field);
                resolver.lookup(&self.from, local, &self.foreign_field)?
            };
            let mut out = doc;
            set_path_value(&mut out, &self.as_field, Value::Array(joined));
            results.push(out);
        }
        Ok(results)
    }
}
