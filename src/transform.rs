//! Transformer pipeline (C2).
//!
//! Pure, synchronous helpers for recursively applying ordered transform
//! functions to arbitrary nested JSON values. Recursion happens on the
//! *output* of a transformer, not its input — a transformer that returns a
//! scalar for what was originally an object or array halts further descent.
//! This is the mechanism by which, e.g., a serialized image blob stops a
//! walk that would otherwise recurse into its internal structure.

use std::sync::Arc;

use serde_json::Value;

/// A single value-to-value transform step.
pub type Transformer = Arc<dyn Fn(Value) -> Value + Send + Sync>;

/// Apply `fns` to `input` in order: `pipe(x, f1, f2) = f2(f1(x))`.
#[must_use]
pub fn pipe(input: Value, fns: &[Transformer]) -> Value {
    fns.iter().fold(input, |acc, f| f(acc))
}

/// Apply `transform` once to `value`, then recurse into the *result*:
/// element-wise for arrays, value-wise for object values (keys are
/// preserved untouched), and stop for any other value.
#[must_use]
pub fn transform_value(value: Value, transform: &[Transformer]) -> Value {
    let output = pipe(value, transform);
    match output {
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|item| transform_value(item, transform))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, transform_value(v, transform)))
                .collect(),
        ),
        scalar => scalar,
    }
}

/// Apply [`transform_value`] to each element of `values` independently.
#[must_use]
pub fn transform_values(values: Vec<Value>, transform: &[Transformer]) -> Vec<Value> {
    values.into_iter().map(|v| transform_value(v, transform)).collect()
}
