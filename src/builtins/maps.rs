//! Map builtins: get, get-in, assoc, assoc-in, update, update-in, dissoc,
//! merge, keys, vals, entries, update-vals, and the map-entry helpers
//! key/val/max-key/min-key.
//!
//! Keyed reads are keyword↔string tolerant; writes use the key exactly as
//! given.

use crate::builtins::{as_key, as_map, check_arity, seq_items};
use crate::error::{Error, ErrorKind};
use crate::eval::{Flow, Machine};
use crate::value::{flex_get, Map, MapKey, Value};
use ptc_macros::builtin;
use unicode_segmentation::UnicodeSegmentation;

/// One indexing step, shared by `get` and `get-in`.
fn get_step(coll: &Value, key: &Value) -> Option<Value> {
    match (coll, key) {
        (Value::Map(m), _) => {
            let k = as_key("get", key).ok()?;
            flex_get(m, &k).cloned()
        }
        (Value::Vector(items), Value::Int(i)) => {
            usize::try_from(*i).ok().and_then(|i| items.get(i)).cloned()
        }
        (Value::Set(items), _) => items.iter().find(|v| *v == key).cloned(),
        (Value::Str(s), Value::Int(i)) => {
            let i = usize::try_from(*i).ok()?;
            s.graphemes(true).nth(i).map(|g| Value::Str(g.to_string()))
        }
        _ => None,
    }
}

#[builtin(name = "get", category = "Maps")]
pub fn get(args: &[Value]) -> Result<Value, Error> {
    check_arity("get", "2-3", args.len() == 2 || args.len() == 3, args.len())?;
    let default = args.get(2).cloned().unwrap_or(Value::Nil);
    Ok(get_step(&args[0], &args[1]).unwrap_or(default))
}

#[builtin(name = "get-in", category = "Maps")]
pub fn get_in(args: &[Value]) -> Result<Value, Error> {
    check_arity("get-in", "2-3", args.len() == 2 || args.len() == 3, args.len())?;
    let path = match &args[1] {
        Value::Vector(path) => path,
        other => return Err(Error::type_error("get-in", "a path vector", other)),
    };
    let default = args.get(2).cloned().unwrap_or(Value::Nil);
    let mut current = args[0].clone();
    for key in path {
        match get_step(&current, key) {
            Some(next) => current = next,
            None => return Ok(default),
        }
    }
    Ok(current)
}

#[builtin(name = "assoc", category = "Maps")]
pub fn assoc(args: &[Value]) -> Result<Value, Error> {
    check_arity("assoc", "at least 3", args.len() >= 3 && args.len() % 2 == 1, args.len())?;
    match &args[0] {
        Value::Map(_) | Value::Nil => {
            let mut out = match &args[0] {
                Value::Map(existing) => existing.clone(),
                _ => Map::new(),
            };
            for pair in args[1..].chunks(2) {
                out.insert(as_key("assoc", &pair[0])?, pair[1].clone());
            }
            Ok(Value::Map(out))
        }
        Value::Vector(items) => {
            let mut out = items.clone();
            for pair in args[1..].chunks(2) {
                let i = match &pair[0] {
                    Value::Int(i) if *i >= 0 && (*i as usize) <= out.len() => *i as usize,
                    other => {
                        return Err(Error::new(
                            ErrorKind::TypeError,
                            format!("assoc: vector index out of bounds: {}", other),
                        ));
                    }
                };
                if i == out.len() {
                    out.push(pair[1].clone());
                } else {
                    out[i] = pair[1].clone();
                }
            }
            Ok(Value::Vector(out))
        }
        other => Err(Error::type_error("assoc", "a map or vector", other)),
    }
}

#[builtin(name = "assoc-in", category = "Maps")]
pub fn assoc_in(args: &[Value]) -> Result<Value, Error> {
    check_arity("assoc-in", "3", args.len() == 3, args.len())?;
    let path = match &args[1] {
        Value::Vector(path) if !path.is_empty() => path.clone(),
        Value::Vector(_) => {
            return Err(Error::new(ErrorKind::TypeError, "assoc-in: path must not be empty"));
        }
        other => return Err(Error::type_error("assoc-in", "a path vector", other)),
    };
    put_in(&args[0], &path, args[2].clone())
}

fn put_in(coll: &Value, path: &[Value], value: Value) -> Result<Value, Error> {
    let (key, rest) = path.split_first().unwrap();
    let inner = if rest.is_empty() {
        value
    } else {
        let next = get_step(coll, key).unwrap_or(Value::Nil);
        let base = if matches!(next, Value::Nil) { Value::Map(Map::new()) } else { next };
        put_in(&base, rest, value)?
    };
    assoc(&[coll.clone(), key.clone(), inner])
}

#[builtin(name = "update", category = "Maps", effectful)]
pub fn update(m: &mut Machine<'_>, args: &[Value]) -> Result<Value, Flow> {
    check_arity("update", "at least 3", args.len() >= 3, args.len())?;
    let map = as_map("update", &args[0])?;
    let key = as_key("update", &args[1])?;
    let current = flex_get(map, &key).cloned().unwrap_or(Value::Nil);
    let mut call_args = vec![current];
    call_args.extend_from_slice(&args[3..]);
    let updated = m.call_value(&args[2], &call_args)?;
    let mut out = map.clone();
    out.insert(key, updated);
    Ok(Value::Map(out))
}

#[builtin(name = "update-in", category = "Maps", effectful)]
pub fn update_in(m: &mut Machine<'_>, args: &[Value]) -> Result<Value, Flow> {
    check_arity("update-in", "at least 3", args.len() >= 3, args.len())?;
    let path = match &args[1] {
        Value::Vector(path) if !path.is_empty() => path.clone(),
        other => return Err(Error::type_error("update-in", "a non-empty path vector", other).into()),
    };
    let current = {
        let mut c = args[0].clone();
        let mut found = true;
        for key in &path {
            match get_step(&c, key) {
                Some(next) => c = next,
                None => {
                    found = false;
                    break;
                }
            }
        }
        if found {
            c
        } else {
            Value::Nil
        }
    };
    let mut call_args = vec![current];
    call_args.extend_from_slice(&args[3..]);
    let updated = m.call_value(&args[2], &call_args)?;
    Ok(put_in(&args[0], &path, updated)?)
}

#[builtin(name = "dissoc", category = "Maps")]
pub fn dissoc(args: &[Value]) -> Result<Value, Error> {
    check_arity("dissoc", "at least 2", args.len() >= 2, args.len())?;
    let mut out = as_map("dissoc", &args[0])?.clone();
    for key in &args[1..] {
        let k = as_key("dissoc", key)?;
        if out.shift_remove(&k).is_none() {
            out.shift_remove(&k.alternate());
        }
    }
    Ok(Value::Map(out))
}

#[builtin(name = "merge", category = "Maps")]
pub fn merge(args: &[Value]) -> Result<Value, Error> {
    if args.iter().all(|v| matches!(v, Value::Nil)) {
        return Ok(Value::Nil);
    }
    let mut out = Map::new();
    for arg in args {
        match arg {
            Value::Nil => {}
            Value::Map(m) => {
                for (k, v) in m {
                    out.insert(k.clone(), v.clone());
                }
            }
            other => return Err(Error::type_error("merge", "a map", other)),
        }
    }
    Ok(Value::Map(out))
}

#[builtin(name = "keys", category = "Maps")]
pub fn keys(args: &[Value]) -> Result<Value, Error> {
    check_arity("keys", "1", args.len() == 1, args.len())?;
    let m = as_map("keys", &args[0])?;
    Ok(Value::Vector(m.keys().map(MapKey::to_value).collect()))
}

#[builtin(name = "vals", category = "Maps")]
pub fn vals(args: &[Value]) -> Result<Value, Error> {
    check_arity("vals", "1", args.len() == 1, args.len())?;
    let m = as_map("vals", &args[0])?;
    Ok(Value::Vector(m.values().cloned().collect()))
}

#[builtin(name = "entries", category = "Maps")]
pub fn entries(args: &[Value]) -> Result<Value, Error> {
    check_arity("entries", "1", args.len() == 1, args.len())?;
    let m = as_map("entries", &args[0])?;
    Ok(Value::Vector(
        m.iter()
            .map(|(k, v)| Value::Vector(vec![k.to_value(), v.clone()]))
            .collect(),
    ))
}

#[builtin(name = "update-vals", category = "Maps", effectful)]
pub fn update_vals(m: &mut Machine<'_>, args: &[Value]) -> Result<Value, Flow> {
    check_arity("update-vals", "2", args.len() == 2, args.len())?;
    let map = as_map("update-vals", &args[0])?.clone();
    let mut out = Map::with_capacity(map.len());
    for (k, v) in map {
        let updated = m.call_value(&args[1], &[v])?;
        out.insert(k, updated);
    }
    Ok(Value::Map(out))
}

fn entry_part(function: &str, args: &[Value], index: usize) -> Result<Value, Error> {
    check_arity(function, "1", args.len() == 1, args.len())?;
    match &args[0] {
        Value::Vector(pair) if pair.len() == 2 => Ok(pair[index].clone()),
        other => Err(Error::type_error(function, "a [key value] entry", other)),
    }
}

#[builtin(name = "key", category = "Maps")]
pub fn key(args: &[Value]) -> Result<Value, Error> {
    entry_part("key", args, 0)
}

#[builtin(name = "val", category = "Maps")]
pub fn val(args: &[Value]) -> Result<Value, Error> {
    entry_part("val", args, 1)
}

fn extremum_by_key(
    m: &mut Machine<'_>,
    function: &str,
    args: &[Value],
    wins: fn(f64, f64) -> bool,
) -> Result<Value, Flow> {
    check_arity(function, "2", args.len() == 2, args.len())?;
    let items = seq_items(function, &args[1])?;
    let mut best: Option<(Value, f64)> = None;
    for item in items {
        let keyed = m.call_value(&args[0], std::slice::from_ref(&item))?;
        let n = keyed
            .as_f64()
            .ok_or_else(|| Error::type_error(function, "a numeric key", &keyed))?;
        let replace = match &best {
            None => true,
            Some((_, current)) => wins(n, *current),
        };
        if replace {
            best = Some((item, n));
        }
    }
    Ok(best.map(|(v, _)| v).unwrap_or(Value::Nil))
}

#[builtin(name = "max-key", category = "Maps", effectful)]
pub fn max_key(m: &mut Machine<'_>, args: &[Value]) -> Result<Value, Flow> {
    extremum_by_key(m, "max-key", args, |a, b| a > b)
}

#[builtin(name = "min-key", category = "Maps", effectful)]
pub fn min_key(m: &mut Machine<'_>, args: &[Value]) -> Result<Value, Flow> {
    extremum_by_key(m, "min-key", args, |a, b| a < b)
}
