// src/aggregation/expression.rs
//! Aggregation expressions, used by `$project` and `$group`.
//!
//! Expressions are parsed once into an explicit AST and evaluated per
//! document. Evaluation returns `Option<Value>`: `None` is "undefined",
//! the result of a field reference that does not resolve. Callers
//! decide how undefined folds into their operation (accumulators skip
//! or zero it, projections omit the field).

use crate::error::{QuartzError, Result};
use crate::value_utils::resolve_path;
use serde_json::{Map, Value};

/// Parsed expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Verbatim value (also produced by `$literal`)
    Literal(Value),
    /// `"$a.b.c"` — resolved against the current document
    FieldRef(String),
    Add(Vec<Expr>),
    Subtract(Box<Expr>, Box<Expr>),
    Multiply(Vec<Expr>),
    Divide(Box<Expr>, Box<Expr>),
    Concat(Vec<Expr>),
    ToLower(Box<Expr>),
    ToUpper(Box<Expr>),
    /// `$round: [expr]` or `$round: [expr, places]`
    Round(Box<Expr>, Box<Expr>),
    /// First element of the evaluated array
    First(Box<Expr>),
    /// Plain object: every field evaluated, undefined fields omitted
    Object(Vec<(String, Expr)>),
}

impl Expr {
    /// Parse an expression from its JSON form.
    ///
    /// - a string starting with `$` is a field reference
    /// - any other non-object value is a literal
    /// - an object with a single `$`-key is an operator application
    /// - any other object is a nested document
    pub fn parse(spec: &Value) -> Result<Expr> {
        match spec {
            Value::String(s) if s.starts_with('$') => {
                Ok(Expr::FieldRef(s[1..].to_string()))
            }
            Value::Object(obj) => {
                if obj.len() == 1 {
                    let (op, operand) = obj.iter().next().unwrap();
                    if op.starts_with('$') {
                        return Expr::parse_operator(op, operand);
                    }
                }
                let mut fields = Vec::with_capacity(obj.len());
                for (key, value) in obj {
                    fields.push((key.clone(), Expr::parse(value)?));
                }
                Ok(Expr::Object(fields))
            }
            other => Ok(Expr::Literal(other.clone())),
        }
    }

    fn parse_operator(op: &str, operand: &Value) -> Result<Expr> {
        match op {
            "$add" => Ok(Expr::Add(parse_nary(op, operand)?)),
            "$multiply" => Ok(Expr::Multiply(parse_nary(op, operand)?)),
            "$concat" => Ok(Expr::Concat(parse_nary(op, operand)?)),
            "$subtract" => {
                let (a, b) = parse_binary(op, operand)?;
                Ok(Expr::Subtract(Box::new(a), Box::new(b)))
            }
            "$divide" => {
                let (a, b) = parse_binary(op, operand)?;
                Ok(Expr::Divide(Box::new(a), Box::new(b)))
            }
            "$toLower" => Ok(Expr::ToLower(Box::new(parse_unary(op, operand)?))),
            "$toUpper" => Ok(Expr::ToUpper(Box::new(parse_unary(op, operand)?))),
            "$first" => Ok(Expr::First(Box::new(parse_unary(op, operand)?))),
            "$literal" => Ok(Expr::Literal(operand.clone())),
            "$round" => match operand {
                Value::Array(args) if args.len() == 1 => Ok(Expr::Round(
                    Box::new(Expr::parse(&args[0])?),
                    Box::new(Expr::Literal(Value::from(0))),
                )),
                Value::Array(args) if args.len() == 2 => Ok(Expr::Round(
                    Box::new(Expr::parse(&args[0])?),
                    Box::new(Expr::parse(&args[1])?),
                )),
                Value::Array(_) => Err(QuartzError::AggregationError(
                    "$round takes one or two arguments".to_string(),
                )),
                single => Ok(Expr::Round(
                    Box::new(Expr::parse(single)?),
                    Box::new(Expr::Literal(Value::from(0))),
                )),
            },
            _ => Err(QuartzError::UnsupportedOperator(op.to_string())),
        }
    }

    /// Evaluate against a document. `None` means undefined.
    pub fn eval(&self, doc: &Value) -> Result<Option<Value>> {
        match self {
            Expr::Literal(value) => Ok(Some(value.clone())),
            Expr::FieldRef(path) => Ok(resolve_path(doc, path).cloned()),

            Expr::Add(args) => fold_numeric(args, doc, 0.0, |acc, n| acc + n),
            Expr::Multiply(args) => fold_numeric(args, doc, 1.0, |acc, n| acc * n),

            Expr::Subtract(a, b) => {
                match (numeric_operand(a, doc)?, numeric_operand(b, doc)?) {
                    (Some(x), Some(y)) => Ok(Some(number_value(x - y))),
                    _ => Ok(Some(Value::Null)),
                }
            }

            Expr::Divide(a, b) => {
                match (numeric_operand(a, doc)?, numeric_operand(b, doc)?) {
                    (Some(x), Some(y)) => {
                        if y == 0.0 {
                            return Err(QuartzError::DivisionByZero);
                        }
                        Ok(Some(number_value(x / y)))
                    }
                    _ => Ok(Some(Value::Null)),
                }
            }

            Expr::Concat(args) => {
                let mut out = String::new();
                for arg in args {
                    match arg.eval(doc)? {
                        Some(Value::String(s)) => out.push_str(&s),
                        // null or non-string poisons the result
                        _ => return Ok(Some(Value::Null)),
                    }
                }
                Ok(Some(Value::String(out)))
            }

            Expr::ToLower(arg) => string_transform(arg, doc, |s| s.to_lowercase()),
            Expr::ToUpper(arg) => string_transform(arg, doc, |s| s.to_uppercase()),

            Expr::Round(arg, places) => {
                let value = match numeric_operand(arg, doc)? {
                    Some(v) => v,
                    None => return Ok(Some(Value::Null)),
                };
                let places = match places.eval(doc)? {
                    Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0) as i32,
                    _ => {
                        return Err(QuartzError::AggregationError(
                            "$round places must be a number".to_string(),
                        ))
                    }
                };
                let factor = 10f64.powi(places);
                Ok(Some(number_value((value * factor).round() / factor)))
            }

            Expr::First(arg) => match arg.eval(doc)? {
                Some(Value::Array(items)) => {
                    Ok(Some(items.into_iter().next().unwrap_or(Value::Null)))
                }
                _ => Ok(Some(Value::Null)),
            },

            Expr::Object(fields) => {
                let mut out = Map::new();
                for (key, expr) in fields {
                    if let Some(value) = expr.eval(doc)? {
                        out.insert(key.clone(), value);
                    }
                }
                Ok(Some(Value::Object(out)))
            }
        }
    }
}

fn parse_nary(op: &str, operand: &Value) -> Result<Vec<Expr>> {
    let args = operand.as_array().ok_or_else(|| {
        QuartzError::AggregationError(format!("{} takes an array of arguments", op))
    })?;
    if args.is_empty() {
        return Err(QuartzError::AggregationError(format!(
            "{} takes at least one argument",
            op
        )));
    }
    args.iter().map(Expr::parse).collect()
}

fn parse_binary(op: &str, operand: &Value) -> Result<(Expr, Expr)> {
    match operand.as_array() {
        Some(args) if args.len() == 2 => {
            Ok((Expr::parse(&args[0])?, Expr::parse(&args[1])?))
        }
        _ => Err(QuartzError::AggregationError(format!(
            "{} takes exactly two arguments",
            op
        ))),
    }
}

fn parse_unary(op: &str, operand: &Value) -> Result<Expr> {
    match operand {
        Value::Array(args) if args.len() == 1 => Expr::parse(&args[0]),
        Value::Array(_) => Err(QuartzError::AggregationError(format!(
            "{} takes exactly one argument",
            op
        ))),
        single => Expr::parse(single),
    }
}

fn numeric_operand(expr: &Expr, doc: &Value) -> Result<Option<f64>> {
    Ok(expr.eval(doc)?.as_ref().and_then(Value::as_f64))
}

fn fold_numeric(
    args: &[Expr],
    doc: &Value,
    init: f64,
    fold: fn(f64, f64) -> f64,
) -> Result<Option<Value>> {
    let mut acc = init;
    for arg in args {
        match numeric_operand(arg, doc)? {
            Some(n) => acc = fold(acc, n),
            None => return Ok(Some(Value::Null)),
        }
    }
    Ok(Some(number_value(acc)))
}

fn string_transform(
    arg: &Expr,
    doc: &Value,
    transform: fn(&str) -> String,
) -> Result<Option<Value>> {
    match arg.eval(doc)? {
        Some(Value::String(s)) => Ok(Some(Value::String(transform(&s)))),
        Some(Value::Null) | None => Ok(Some(Value::String(String::new()))),
        Some(other) => Err(QuartzError::AggregationError(format!(
            "expected a string, got {}",
            crate::document::type_name(&other)
        ))),
    }
}

/// A float that came out integral is emitted as a JSON integer.
pub(crate) fn number_value(f: f64) -> Value {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < 9.0e15 {
        Value::from(f as i64)
    } else {
        Value::from(f)
    }
}
