//! Structural similarity between annotation result payloads.
//!
//! Used both to grade honeypot submissions against ground truth and to group
//! annotations during consensus. Returns a value in `0.0..=1.0`.

use std::collections::BTreeSet;

use serde_json::Value;

/// Similarity of two JSON result payloads.
///
/// - identical values: `1.0`
/// - numbers: `1 - |a - b| / max(|a|, |b|, 1)`
/// - arrays: Jaccard index over elements (compared by canonical JSON text)
/// - objects: mean similarity across the union of keys, a missing key scores 0
/// - strings, booleans, null: exact match
/// - mismatched types: `0.0`
pub fn result_similarity(a: &Value, b: &Value) -> f64 {
    if a == b {
        return 1.0;
    }
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => number_similarity(x, y),
            _ => 0.0,
        },
        (Value::Array(x), Value::Array(y)) => array_similarity(x, y),
        (Value::Object(x), Value::Object(y)) => {
            let keys: BTreeSet<&String> = x.keys().chain(y.keys()).collect();
            if keys.is_empty() {
                return 1.0;
            }
            let sum: f64 = keys
                .iter()
                .map(|k| match (x.get(*k), y.get(*k)) {
                    (Some(l), Some(r)) => result_similarity(l, r),
                    _ => 0.0,
                })
                .sum();
            sum / keys.len() as f64
        }
        _ => 0.0,
    }
}

fn number_similarity(x: f64, y: f64) -> f64 {
    if !x.is_finite() || !y.is_finite() {
        return 0.0;
    }
    let scale = x.abs().max(y.abs()).max(1.0);
    (1.0 - (x - y).abs() / scale).clamp(0.0, 1.0)
}

fn array_similarity(x: &[Value], y: &[Value]) -> f64 {
    let left: BTreeSet<String> = x.iter().map(Value::to_string).collect();
    let right: BTreeSet<String> = y.iter().map(Value::to_string).collect();
    let union = left.union(&right).count();
    if union == 0 {
        return 1.0;
    }
    left.intersection(&right).count() as f64 / union as f64
}

/// Whether two payloads are equivalent under `threshold`.
///
/// A threshold of `1.0` demands structural equality.
pub fn results_match(a: &Value, b: &Value, threshold: f64) -> bool {
    if threshold >= 1.0 {
        return a == b;
    }
    result_similarity(a, b) >= threshold
}
