/// Built-in handlers
///
/// Small numeric and validation steps registered at process start. Integer
/// inputs stay integers wherever the arithmetic allows it.

use crate::logic::registry::HandlerRegistry;
use crate::pipeline::types::Params;
use anyhow::{anyhow, bail, Result};
use serde_json::{json, Value};

/// Amount `add_five` adds when no `add` param is given
const DEFAULT_ADD: i64 = 5;

pub fn register_all(registry: &mut HandlerRegistry) {
    registry
        .register_fn("double_value", double_value)
        .register_fn("add_five", add_five)
        .register_params_payload("validate_input", validate_input)
        .register_fn("do_something", do_something);
}

/// Double `value` taken from `prev`, or from `payload` when `prev` has none
pub fn double_value(prev: &Value, _params: &Params, payload: &Value) -> Result<Value> {
    let raw = value_field(prev)
        .or_else(|| value_field(payload))
        .ok_or_else(|| anyhow!("no 'value' found in prev or payload"))?;

    let doubled = match as_integer(raw) {
        Some(i) => json!(i.checked_mul(2).ok_or_else(|| anyhow!("value {} overflows when doubled", i))?),
        None => json!(as_number(raw).ok_or_else(|| anyhow!("invalid numeric value: {}", raw))? * 2.0),
    };

    Ok(json!({ "value": doubled, "note": "doubled", "prev": prev }))
}

/// Add `params.add` (default 5) to `prev.value`
pub fn add_five(prev: &Value, params: &Params, _payload: &Value) -> Result<Value> {
    let Some(raw) = value_field(prev) else {
        bail!("prev must be an object containing 'value'");
    };
    let base = as_number(raw).ok_or_else(|| anyhow!("invalid prev value: {}", raw))?;

    // Non-numeric amounts fall back to the default
    let add = params.get("add").cloned().unwrap_or(json!(DEFAULT_ADD));
    let (add_num, add_is_int) = match as_number(&add) {
        Some(n) => (n, add.is_i64() || add.is_u64()),
        None => (DEFAULT_ADD as f64, true),
    };

    let sum = base + add_num;
    let value = if add_is_int && sum.fract() == 0.0 && sum.abs() < i64::MAX as f64 {
        json!(sum as i64)
    } else {
        json!(sum)
    };

    Ok(json!({ "value": value, "added": add_num, "prev": prev }))
}

/// Legacy two-argument check: with `required`, the payload must carry `important`
pub fn validate_input(params: &Params, payload: &Value) -> Result<Value> {
    let required = params.get("required").and_then(Value::as_bool).unwrap_or(false);
    if required {
        let Some(body) = payload.as_object() else {
            return Ok(json!({ "ok": false, "reason": "payload must be JSON object" }));
        };
        if !body.contains_key("important") {
            return Ok(json!({ "ok": false, "reason": "missing 'important' key" }));
        }
    }
    Ok(json!({ "ok": true, "msg": "validated" }))
}

/// Describe what was received
pub fn do_something(prev: &Value, params: &Params, payload: &Value) -> Result<Value> {
    let payload_keys = payload
        .as_object()
        .map(|body| Value::from(body.keys().cloned().collect::<Vec<_>>()));

    Ok(json!({
        "action": "did_something",
        "prev_type": type_name(prev),
        "params": params,
        "payload_keys": payload_keys,
    }))
}

fn value_field(v: &Value) -> Option<&Value> {
    v.as_object().and_then(|o| o.get("value"))
}

/// Integral JSON numbers, including floats with no fractional part
fn as_integer(v: &Value) -> Option<i64> {
    if let Some(i) = v.as_i64() {
        return Some(i);
    }
    v.as_f64()
        .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
        .map(|f| f as i64)
}

/// Numbers and numeric strings
fn as_number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
