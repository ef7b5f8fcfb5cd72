//! Field-wise aggregation over collections of maps: pluck, select-keys,
//! group-by, sum-by, avg-by, min-by, max-by.
//!
//! Field access is keyword↔string tolerant and accepts vector paths.
//! Aggregations skip elements whose field is nil or missing and raise
//! `type_error` when a present field is not numeric.

use crate::builtins::{as_key, as_map, as_vector, check_arity, seq_items};
use crate::error::Error;
use crate::eval::{Flow, Machine};
use crate::value::{flex_get, flex_get_in, Map, MapKey, Value};
use ptc_macros::builtin;

/// A field selector: single key or vector path.
fn key_path(function: &str, selector: &Value) -> Result<Vec<MapKey>, Error> {
    match selector {
        Value::Keyword(_) | Value::Str(_) => Ok(vec![as_key(function, selector)?]),
        Value::Vector(items) => items.iter().map(|k| as_key(function, k)).collect(),
        other => Err(Error::type_error(function, "a key or path", other)),
    }
}

fn field_of(item: &Value, path: &[MapKey]) -> Option<Value> {
    flex_get_in(item, path).cloned()
}

#[builtin(name = "pluck", category = "Aggregation")]
pub fn pluck(args: &[Value]) -> Result<Value, Error> {
    check_arity("pluck", "2", args.len() == 2, args.len())?;
    let path = key_path("pluck", &args[0])?;
    let items = seq_items("pluck", &args[1])?;
    Ok(Value::Vector(
        items
            .iter()
            .map(|item| field_of(item, &path).unwrap_or(Value::Nil))
            .collect(),
    ))
}

#[builtin(name = "select-keys", category = "Aggregation")]
pub fn select_keys(args: &[Value]) -> Result<Value, Error> {
    check_arity("select-keys", "2", args.len() == 2, args.len())?;
    let m = as_map("select-keys", &args[0])?;
    let wanted = as_vector("select-keys", &args[1])?;
    let mut out = Map::new();
    for want in wanted {
        let k = as_key("select-keys", want)?;
        if let Some(v) = flex_get(m, &k) {
            out.insert(k, v.clone());
        }
    }
    Ok(Value::Map(out))
}

#[builtin(name = "group-by", category = "Aggregation", effectful)]
pub fn group_by(m: &mut Machine<'_>, args: &[Value]) -> Result<Value, Flow> {
    check_arity("group-by", "2", args.len() == 2, args.len())?;
    let items = seq_items("group-by", &args[1])?;
    let mut out: Map = Map::new();
    for item in items {
        let group = match &args[0] {
            Value::Keyword(_) | Value::Str(_) | Value::Vector(_) => {
                let path = key_path("group-by", &args[0])?;
                field_of(&item, &path).unwrap_or(Value::Nil)
            }
            f => m.call_value(f, std::slice::from_ref(&item))?,
        };
        // group keys that are not legal map keys are rendered to strings
        let key = match &group {
            Value::Keyword(k) => MapKey::Keyword(k.clone()),
            Value::Str(s) => MapKey::Str(s.clone()),
            other => MapKey::Str(other.to_string()),
        };
        let bucket = out.entry(key).or_insert_with(|| Value::Vector(Vec::new()));
        if let Value::Vector(bucket) = bucket {
            bucket.push(item);
        }
    }
    Ok(Value::Map(out))
}

/// Extract the numeric fields for an aggregation: nil/missing skipped,
/// non-numeric present values rejected.
fn numeric_fields(
    function: &str,
    selector: &Value,
    coll: &Value,
) -> Result<Vec<(Value, Value)>, Error> {
    let path = key_path(function, selector)?;
    let items = seq_items(function, coll)?;
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        match field_of(&item, &path) {
            None | Some(Value::Nil) => continue,
            Some(field) if field.is_number() => out.push((item, field)),
            Some(field) => {
                return Err(Error::type_error(function, "a numeric field", &field));
            }
        }
    }
    Ok(out)
}

#[builtin(name = "sum-by", category = "Aggregation")]
pub fn sum_by(args: &[Value]) -> Result<Value, Error> {
    check_arity("sum-by", "2", args.len() == 2, args.len())?;
    let fields = numeric_fields("sum-by", &args[0], &args[1])?;
    let all_ints = fields.iter().all(|(_, f)| matches!(f, Value::Int(_)));
    if all_ints {
        let mut sum: i64 = 0;
        for (_, f) in &fields {
            if let Value::Int(i) = f {
                sum = sum.checked_add(*i).ok_or_else(|| {
                    Error::new(crate::error::ErrorKind::ArithmeticError, "sum-by: integer overflow")
                })?;
            }
        }
        return Ok(Value::Int(sum));
    }
    let sum: f64 = fields.iter().filter_map(|(_, f)| f.as_f64()).sum();
    Ok(Value::Float(sum))
}

#[builtin(name = "avg-by", category = "Aggregation")]
pub fn avg_by(args: &[Value]) -> Result<Value, Error> {
    check_arity("avg-by", "2", args.len() == 2, args.len())?;
    let fields = numeric_fields("avg-by", &args[0], &args[1])?;
    if fields.is_empty() {
        return Ok(Value::Nil);
    }
    let sum: f64 = fields.iter().filter_map(|(_, f)| f.as_f64()).sum();
    Ok(Value::Float(sum / fields.len() as f64))
}

fn extremum_by(
    function: &str,
    args: &[Value],
    wins: fn(f64, f64) -> bool,
) -> Result<Value, Error> {
    check_arity(function, "2", args.len() == 2, args.len())?;
    let fields = numeric_fields(function, &args[0], &args[1])?;
    let mut best: Option<(Value, f64)> = None;
    for (item, field) in fields {
        let n = field.as_f64().unwrap();
        let replace = match &best {
            None => true,
            Some((_, current)) => wins(n, *current),
        };
        if replace {
            best = Some((item, n));
        }
    }
    Ok(best.map(|(item, _)| item).unwrap_or(Value::Nil))
}

#[builtin(name = "min-by", category = "Aggregation")]
pub fn min_by(args: &[Value]) -> Result<Value, Error> {
    extremum_by("min-by", args, |a, b| a < b)
}

#[builtin(name = "max-by", category = "Aggregation")]
pub fn max_by(args: &[Value]) -> Result<Value, Error> {
    extremum_by("max-by", args, |a, b| a > b)
}
