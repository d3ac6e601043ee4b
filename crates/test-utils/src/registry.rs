// crates/test-utils/src/registry.rs

//! Standard callables and generators shared across the integration tests.

use std::collections::BTreeMap;

use anyhow::{anyhow, Context};
use serde_json::json;

use hashdag::exec::{CallableInputs, CallableOutputs, CallableRegistry, SubdagScope};
use hashdag::graph::{Artifact, Encoding, Value};

/// Register every standard test callable on the given registry.
pub fn register_standard(registry: &CallableRegistry) {
    registry.register("sum", sum);
    registry.register("uppercase", uppercase);
    registry.register("recover", recover);
    registry.register("merge", merge);
    registry.register_generator("mergesort", mergesort);
}

fn json_input(inputs: &CallableInputs, slot: &str) -> anyhow::Result<serde_json::Value> {
    let value = inputs
        .get(slot)
        .ok_or_else(|| anyhow!("missing input slot '{slot}'"))?
        .as_ref()
        .map_err(|e| anyhow!("input '{slot}' errored: {}", e.message))?;
    value
        .as_json()
        .cloned()
        .ok_or_else(|| anyhow!("input '{slot}' is not a JSON value"))
}

/// `sum`: JSON list of numbers in `values`, their sum in `sum`.
fn sum(inputs: CallableInputs) -> anyhow::Result<CallableOutputs> {
    let values = json_input(&inputs, "values")?;
    let list = values
        .as_array()
        .ok_or_else(|| anyhow!("'values' is not a list"))?;
    let total: f64 = list.iter().filter_map(|v| v.as_f64()).sum();

    let mut out = BTreeMap::new();
    // Keep integers integral so fetch(..) == 6, not 6.0.
    let total = if total.fract() == 0.0 {
        json!(total as i64)
    } else {
        json!(total)
    };
    out.insert("sum".to_string(), Value::Json(total));
    Ok(out)
}

/// `uppercase`: blob in `text`, uppercased blob in `upper`.
fn uppercase(inputs: CallableInputs) -> anyhow::Result<CallableOutputs> {
    let text = inputs
        .get("text")
        .ok_or_else(|| anyhow!("missing input slot 'text'"))?
        .as_ref()
        .map_err(|e| anyhow!("input 'text' errored: {}", e.message))?;
    let bytes = text
        .as_blob()
        .ok_or_else(|| anyhow!("'text' is not a blob"))?;
    let upper = String::from_utf8(bytes.to_vec())
        .context("'text' is not UTF-8")?
        .to_uppercase();

    let mut out = BTreeMap::new();
    out.insert("upper".to_string(), Value::Blob(upper.into_bytes()));
    Ok(out)
}

/// `recover`: non-strict consumer. An errored `value` input becomes the
/// string `"handled"`; a good one passes through unchanged.
fn recover(inputs: CallableInputs) -> anyhow::Result<CallableOutputs> {
    let result = inputs
        .get("value")
        .ok_or_else(|| anyhow!("missing input slot 'value'"))?;

    let out_value = match result {
        Ok(Value::Json(v)) => Value::Json(v.clone()),
        Ok(Value::Blob(_)) => return Err(anyhow!("'value' should be JSON")),
        Err(_) => Value::Json(json!("handled")),
    };

    let mut out = BTreeMap::new();
    out.insert("out".to_string(), out_value);
    Ok(out)
}

/// `merge`: two sorted JSON lists (`left`, `right`) merged into `merged`.
fn merge(inputs: CallableInputs) -> anyhow::Result<CallableOutputs> {
    let left: Vec<i64> = serde_json::from_value(json_input(&inputs, "left")?)?;
    let right: Vec<i64> = serde_json::from_value(json_input(&inputs, "right")?)?;

    let mut merged = Vec::with_capacity(left.len() + right.len());
    let (mut i, mut j) = (0, 0);
    while i < left.len() && j < right.len() {
        if left[i] <= right[j] {
            merged.push(left[i]);
            i += 1;
        } else {
            merged.push(right[j]);
            j += 1;
        }
    }
    merged.extend_from_slice(&left[i..]);
    merged.extend_from_slice(&right[j..]);

    let mut out = BTreeMap::new();
    out.insert("merged".to_string(), Value::Json(json!(merged)));
    Ok(out)
}

/// `mergesort`: recursive dynamic sub-DAG. Lists of length <= 1 come back
/// as a const; longer lists split into two nested `mergesort` sub-DAGs
/// whose results feed a `merge` callable.
fn mergesort(
    scope: &SubdagScope,
    inputs: CallableInputs,
) -> anyhow::Result<BTreeMap<String, Artifact>> {
    let list: Vec<i64> = serde_json::from_value(json_input(&inputs, "list")?)?;

    let sorted = if list.len() <= 1 {
        scope.put_json(&list)?
    } else {
        let middle = list.len() / 2;
        let left = scope.put_json(&list[..middle].to_vec())?;
        let right = scope.put_json(&list[middle..].to_vec())?;

        let left_sorted = scope
            .put_subdag("mergesort", &[("list", left)], &[("sorted", Encoding::Json)], true)?
            .remove(0);
        let right_sorted = scope
            .put_subdag("mergesort", &[("list", right)], &[("sorted", Encoding::Json)], true)?
            .remove(0);

        scope
            .put_callable(
                "merge",
                &[("left", left_sorted), ("right", right_sorted)],
                &[("merged", Encoding::Json)],
                true,
            )?
            .remove(0)
    };

    let mut out = BTreeMap::new();
    out.insert("sorted".to_string(), sorted);
    Ok(out)
}
