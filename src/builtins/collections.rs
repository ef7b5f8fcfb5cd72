//! Collection builtins
//!
//! Everything here is eager: `map`, `filter`, and friends return vectors.
//! Map inputs are viewed as `[k v]` entry pairs, strings as graphemes.
//! Predicates may be functions, keywords (field truthiness), or sets
//! (membership).

use crate::builtins::{check_arity, seq_items};
use crate::config::MAX_RANGE_LEN;
use crate::error::{Error, ErrorKind};
use crate::eval::{Flow, Machine};
use crate::value::{compare_values, flex_get, Map, MapKey, Value};
use ptc_macros::builtin;
use unicode_segmentation::UnicodeSegmentation;

/// Predicate application that preserves the useful value: callables
/// return their result, keywords the field value, sets the member.
fn pred_value(m: &mut Machine<'_>, pred: &Value, item: &Value) -> Result<Value, Flow> {
    match pred {
        Value::Keyword(k) => match item {
            Value::Map(map) => {
                Ok(flex_get(map, &MapKey::Keyword(k.clone())).cloned().unwrap_or(Value::Nil))
            }
            _ => Ok(Value::Nil),
        },
        Value::Set(items) => {
            Ok(if items.contains(item) { item.clone() } else { Value::Nil })
        }
        _ => m.call_value(pred, std::slice::from_ref(item)),
    }
}

#[builtin(name = "count", category = "Collections")]
pub fn count(args: &[Value]) -> Result<Value, Error> {
    check_arity("count", "1", args.len() == 1, args.len())?;
    let n = match &args[0] {
        Value::Nil => 0,
        Value::Str(s) => s.graphemes(true).count(),
        Value::Vector(v) | Value::Set(v) => v.len(),
        Value::Map(m) => m.len(),
        other => return Err(Error::type_error("count", "a collection", other)),
    };
    Ok(Value::Int(n as i64))
}

#[builtin(name = "first", category = "Collections")]
pub fn first(args: &[Value]) -> Result<Value, Error> {
    check_arity("first", "1", args.len() == 1, args.len())?;
    Ok(seq_items("first", &args[0])?.into_iter().next().unwrap_or(Value::Nil))
}

#[builtin(name = "second", category = "Collections")]
pub fn second(args: &[Value]) -> Result<Value, Error> {
    check_arity("second", "1", args.len() == 1, args.len())?;
    Ok(seq_items("second", &args[0])?.into_iter().nth(1).unwrap_or(Value::Nil))
}

#[builtin(name = "last", category = "Collections")]
pub fn last(args: &[Value]) -> Result<Value, Error> {
    check_arity("last", "1", args.len() == 1, args.len())?;
    Ok(seq_items("last", &args[0])?.pop().unwrap_or(Value::Nil))
}

#[builtin(name = "nth", category = "Collections")]
pub fn nth(args: &[Value]) -> Result<Value, Error> {
    check_arity("nth", "2-3", args.len() == 2 || args.len() == 3, args.len())?;
    let default = args.get(2).cloned().unwrap_or(Value::Nil);
    let index = match &args[1] {
        Value::Int(i) if *i >= 0 => *i as usize,
        Value::Int(_) => return Ok(default),
        other => return Err(Error::type_error("nth", "an index", other)),
    };
    Ok(seq_items("nth", &args[0])?.into_iter().nth(index).unwrap_or(default))
}

#[builtin(name = "rest", category = "Collections")]
pub fn rest(args: &[Value]) -> Result<Value, Error> {
    check_arity("rest", "1", args.len() == 1, args.len())?;
    let mut items = seq_items("rest", &args[0])?;
    if !items.is_empty() {
        items.remove(0);
    }
    Ok(Value::Vector(items))
}

#[builtin(name = "next", category = "Collections")]
pub fn next(args: &[Value]) -> Result<Value, Error> {
    check_arity("next", "1", args.len() == 1, args.len())?;
    let mut items = seq_items("next", &args[0])?;
    if items.len() <= 1 {
        return Ok(Value::Nil);
    }
    items.remove(0);
    Ok(Value::Vector(items))
}

#[builtin(name = "ffirst", category = "Collections")]
pub fn ffirst(args: &[Value]) -> Result<Value, Error> {
    check_arity("ffirst", "1", args.len() == 1, args.len())?;
    let inner = first(args)?;
    first(&[inner])
}

#[builtin(name = "fnext", category = "Collections")]
pub fn fnext(args: &[Value]) -> Result<Value, Error> {
    check_arity("fnext", "1", args.len() == 1, args.len())?;
    second(args)
}

#[builtin(name = "nfirst", category = "Collections")]
pub fn nfirst(args: &[Value]) -> Result<Value, Error> {
    check_arity("nfirst", "1", args.len() == 1, args.len())?;
    let inner = first(args)?;
    next(&[inner])
}

#[builtin(name = "nnext", category = "Collections")]
pub fn nnext(args: &[Value]) -> Result<Value, Error> {
    check_arity("nnext", "1", args.len() == 1, args.len())?;
    let inner = next(args)?;
    next(&[inner])
}

fn count_arg(function: &str, v: &Value) -> Result<usize, Error> {
    match v {
        Value::Int(i) if *i >= 0 => Ok(*i as usize),
        Value::Int(_) => Ok(0),
        other => Err(Error::type_error(function, "a count", other)),
    }
}

#[builtin(name = "take", category = "Collections")]
pub fn take(args: &[Value]) -> Result<Value, Error> {
    check_arity("take", "2", args.len() == 2, args.len())?;
    let n = count_arg("take", &args[0])?;
    let items = seq_items("take", &args[1])?;
    Ok(Value::Vector(items.into_iter().take(n).collect()))
}

#[builtin(name = "drop", category = "Collections")]
pub fn drop(args: &[Value]) -> Result<Value, Error> {
    check_arity("drop", "2", args.len() == 2, args.len())?;
    let n = count_arg("drop", &args[0])?;
    let items = seq_items("drop", &args[1])?;
    Ok(Value::Vector(items.into_iter().skip(n).collect()))
}

#[builtin(name = "take-while", category = "Collections", effectful)]
pub fn take_while(m: &mut Machine<'_>, args: &[Value]) -> Result<Value, Flow> {
    check_arity("take-while", "2", args.len() == 2, args.len())?;
    let items = seq_items("take-while", &args[1])?;
    let mut out = Vec::new();
    for item in items {
        if !m.call_pred(&args[0], &item)? {
            break;
        }
        out.push(item);
    }
    Ok(Value::Vector(out))
}

#[builtin(name = "drop-while", category = "Collections", effectful)]
pub fn drop_while(m: &mut Machine<'_>, args: &[Value]) -> Result<Value, Flow> {
    check_arity("drop-while", "2", args.len() == 2, args.len())?;
    let items = seq_items("drop-while", &args[1])?;
    let mut out = Vec::new();
    let mut dropping = true;
    for item in items {
        if dropping && m.call_pred(&args[0], &item)? {
            continue;
        }
        dropping = false;
        out.push(item);
    }
    Ok(Value::Vector(out))
}

#[builtin(name = "distinct", category = "Collections")]
pub fn distinct(args: &[Value]) -> Result<Value, Error> {
    check_arity("distinct", "1", args.len() == 1, args.len())?;
    let items = seq_items("distinct", &args[0])?;
    let mut out: Vec<Value> = Vec::with_capacity(items.len());
    for item in items {
        if !out.contains(&item) {
            out.push(item);
        }
    }
    Ok(Value::Vector(out))
}

#[builtin(name = "conj", category = "Collections")]
pub fn conj(args: &[Value]) -> Result<Value, Error> {
    check_arity("conj", "at least 2", args.len() >= 2, args.len())?;
    match &args[0] {
        Value::Nil => Ok(Value::Vector(args[1..].to_vec())),
        Value::Vector(items) => {
            let mut out = items.clone();
            out.extend_from_slice(&args[1..]);
            Ok(Value::Vector(out))
        }
        Value::Set(items) => {
            let mut out = items.clone();
            for x in &args[1..] {
                if !out.contains(x) {
                    out.push(x.clone());
                }
            }
            Ok(Value::Set(out))
        }
        Value::Map(map) => {
            let mut out = map.clone();
            for x in &args[1..] {
                merge_entry("conj", &mut out, x)?;
            }
            Ok(Value::Map(out))
        }
        other => Err(Error::type_error("conj", "a collection", other)),
    }
}

/// Accept `[k v]` pairs or maps when conj-ing/pouring into a map.
fn merge_entry(function: &str, out: &mut Map, x: &Value) -> Result<(), Error> {
    match x {
        Value::Vector(pair) if pair.len() == 2 => {
            out.insert(MapKey::from_value(&pair[0])?, pair[1].clone());
            Ok(())
        }
        Value::Map(m) => {
            for (k, v) in m {
                out.insert(k.clone(), v.clone());
            }
            Ok(())
        }
        other => Err(Error::type_error(function, "a [key value] entry or map", other)),
    }
}

#[builtin(name = "concat", category = "Collections")]
pub fn concat(args: &[Value]) -> Result<Value, Error> {
    let mut out = Vec::new();
    for arg in args {
        out.extend(seq_items("concat", arg)?);
    }
    Ok(Value::Vector(out))
}

#[builtin(name = "into", category = "Collections")]
pub fn into(args: &[Value]) -> Result<Value, Error> {
    check_arity("into", "2", args.len() == 2, args.len())?;
    let items = seq_items("into", &args[1])?;
    match &args[0] {
        Value::Nil => Ok(Value::Vector(items)),
        Value::Vector(existing) => {
            let mut out = existing.clone();
            out.extend(items);
            Ok(Value::Vector(out))
        }
        Value::Set(existing) => {
            let mut out = existing.clone();
            for item in items {
                if !out.contains(&item) {
                    out.push(item);
                }
            }
            Ok(Value::Set(out))
        }
        Value::Map(existing) => {
            let mut out = existing.clone();
            for item in items {
                merge_entry("into", &mut out, &item)?;
            }
            Ok(Value::Map(out))
        }
        other => Err(Error::type_error("into", "a collection target", other)),
    }
}

#[builtin(name = "flatten", category = "Collections")]
pub fn flatten(args: &[Value]) -> Result<Value, Error> {
    check_arity("flatten", "1", args.len() == 1, args.len())?;
    fn walk(v: &Value, out: &mut Vec<Value>) {
        match v {
            Value::Vector(items) => {
                for item in items {
                    walk(item, out);
                }
            }
            other => out.push(other.clone()),
        }
    }
    let mut out = Vec::new();
    match &args[0] {
        Value::Nil => {}
        Value::Vector(items) => {
            for item in items {
                walk(item, &mut out);
            }
        }
        other => return Err(Error::type_error("flatten", "a vector", other)),
    }
    Ok(Value::Vector(out))
}

#[builtin(name = "interleave", category = "Collections")]
pub fn interleave(args: &[Value]) -> Result<Value, Error> {
    check_arity("interleave", "at least 2", args.len() >= 2, args.len())?;
    let colls: Vec<Vec<Value>> = args
        .iter()
        .map(|c| seq_items("interleave", c))
        .collect::<Result<_, _>>()?;
    let shortest = colls.iter().map(Vec::len).min().unwrap_or(0);
    let mut out = Vec::with_capacity(shortest * colls.len());
    for i in 0..shortest {
        for coll in &colls {
            out.push(coll[i].clone());
        }
    }
    Ok(Value::Vector(out))
}

#[builtin(name = "zip", category = "Collections")]
pub fn zip(args: &[Value]) -> Result<Value, Error> {
    check_arity("zip", "2", args.len() == 2, args.len())?;
    let a = seq_items("zip", &args[0])?;
    let b = seq_items("zip", &args[1])?;
    Ok(Value::Vector(
        a.into_iter()
            .zip(b)
            .map(|(x, y)| Value::Vector(vec![x, y]))
            .collect(),
    ))
}

#[builtin(name = "reverse", category = "Collections")]
pub fn reverse(args: &[Value]) -> Result<Value, Error> {
    check_arity("reverse", "1", args.len() == 1, args.len())?;
    let mut items = seq_items("reverse", &args[0])?;
    items.reverse();
    Ok(Value::Vector(items))
}

fn sort_values(function: &str, items: &mut [(Value, Value)]) -> Result<(), Error> {
    // incomparable pairs surface as an error after the sort pass
    let mut failed: Option<Error> = None;
    items.sort_by(|(ka, _), (kb, _)| {
        compare_values(ka, kb).unwrap_or_else(|| {
            if failed.is_none() {
                failed = Some(Error::new(
                    ErrorKind::TypeError,
                    format!("{}: values are not comparable: {} and {}", function, ka, kb),
                ));
            }
            std::cmp::Ordering::Equal
        })
    });
    match failed {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

#[builtin(name = "sort", category = "Collections")]
pub fn sort(args: &[Value]) -> Result<Value, Error> {
    check_arity("sort", "1", args.len() == 1, args.len())?;
    let items = seq_items("sort", &args[0])?;
    let mut keyed: Vec<(Value, Value)> = items.into_iter().map(|v| (v.clone(), v)).collect();
    sort_values("sort", &mut keyed)?;
    Ok(Value::Vector(keyed.into_iter().map(|(_, v)| v).collect()))
}

#[builtin(name = "sort-by", category = "Collections", effectful)]
pub fn sort_by(m: &mut Machine<'_>, args: &[Value]) -> Result<Value, Flow> {
    check_arity("sort-by", "2", args.len() == 2, args.len())?;
    let items = seq_items("sort-by", &args[1])?;
    let mut keyed = Vec::with_capacity(items.len());
    for item in items {
        let key = pred_value(m, &args[0], &item)?;
        keyed.push((key, item));
    }
    sort_values("sort-by", &mut keyed)?;
    Ok(Value::Vector(keyed.into_iter().map(|(_, v)| v).collect()))
}

#[builtin(name = "seq", category = "Collections")]
pub fn seq(args: &[Value]) -> Result<Value, Error> {
    check_arity("seq", "1", args.len() == 1, args.len())?;
    let items = seq_items("seq", &args[0])?;
    if items.is_empty() {
        Ok(Value::Nil)
    } else {
        Ok(Value::Vector(items))
    }
}

#[builtin(name = "empty?", category = "Collections")]
pub fn empty_p(args: &[Value]) -> Result<Value, Error> {
    check_arity("empty?", "1", args.len() == 1, args.len())?;
    Ok(Value::Bool(seq_items("empty?", &args[0])?.is_empty()))
}

#[builtin(name = "contains?", category = "Collections")]
pub fn contains_p(args: &[Value]) -> Result<Value, Error> {
    check_arity("contains?", "2", args.len() == 2, args.len())?;
    let found = match (&args[0], &args[1]) {
        (Value::Map(m), key) => {
            let k = crate::builtins::as_key("contains?", key)?;
            flex_get(m, &k).is_some()
        }
        (Value::Set(items), x) | (Value::Vector(items), x) => items.contains(x),
        (Value::Str(s), Value::Str(sub)) => s.contains(sub.as_str()),
        (Value::Nil, _) => false,
        (other, _) => return Err(Error::type_error("contains?", "a collection", other)),
    };
    Ok(Value::Bool(found))
}

#[builtin(name = "some", category = "Collections", effectful)]
pub fn some(m: &mut Machine<'_>, args: &[Value]) -> Result<Value, Flow> {
    check_arity("some", "2", args.len() == 2, args.len())?;
    for item in seq_items("some", &args[1])? {
        let v = pred_value(m, &args[0], &item)?;
        if v.is_truthy() {
            return Ok(v);
        }
    }
    Ok(Value::Nil)
}

#[builtin(name = "every?", category = "Collections", effectful)]
pub fn every_p(m: &mut Machine<'_>, args: &[Value]) -> Result<Value, Flow> {
    check_arity("every?", "2", args.len() == 2, args.len())?;
    for item in seq_items("every?", &args[1])? {
        if !m.call_pred(&args[0], &item)? {
            return Ok(Value::Bool(false));
        }
    }
    Ok(Value::Bool(true))
}

#[builtin(name = "not-any?", category = "Collections", effectful)]
pub fn not_any_p(m: &mut Machine<'_>, args: &[Value]) -> Result<Value, Flow> {
    check_arity("not-any?", "2", args.len() == 2, args.len())?;
    for item in seq_items("not-any?", &args[1])? {
        if m.call_pred(&args[0], &item)? {
            return Ok(Value::Bool(false));
        }
    }
    Ok(Value::Bool(true))
}

#[builtin(name = "range", category = "Collections")]
pub fn range(args: &[Value]) -> Result<Value, Error> {
    check_arity("range", "1-3", !args.is_empty() && args.len() <= 3, args.len())?;
    let int_arg = |v: &Value| crate::builtins::as_int("range", v);
    let (start, end, step) = match args {
        [end] => (0, int_arg(end)?, 1),
        [start, end] => (int_arg(start)?, int_arg(end)?, 1),
        [start, end, step] => (int_arg(start)?, int_arg(end)?, int_arg(step)?),
        _ => unreachable!(),
    };
    if step == 0 {
        return Err(Error::new(ErrorKind::ArithmeticError, "range: step must not be zero"));
    }
    let span = if step > 0 { end.saturating_sub(start) } else { start.saturating_sub(end) };
    let len = (span + step.abs() - 1) / step.abs();
    if len > MAX_RANGE_LEN {
        return Err(Error::new(
            ErrorKind::MemoryExceeded,
            format!("range of {} elements exceeds the cap of {}", len, MAX_RANGE_LEN),
        ));
    }
    let mut out = Vec::new();
    let mut i = start;
    while (step > 0 && i < end) || (step < 0 && i > end) {
        out.push(Value::Int(i));
        i += step;
    }
    Ok(Value::Vector(out))
}

#[builtin(name = "map", aliases("mapv"), category = "Collections", effectful)]
pub fn map_fn(m: &mut Machine<'_>, args: &[Value]) -> Result<Value, Flow> {
    check_arity("map", "2", args.len() == 2, args.len())?;
    let items = seq_items("map", &args[1])?;
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        out.push(m.call_value(&args[0], &[item])?);
    }
    Ok(Value::Vector(out))
}

#[builtin(name = "filter", category = "Collections", effectful)]
pub fn filter(m: &mut Machine<'_>, args: &[Value]) -> Result<Value, Flow> {
    check_arity("filter", "2", args.len() == 2, args.len())?;
    let items = seq_items("filter", &args[1])?;
    let mut out = Vec::new();
    for item in items {
        if m.call_pred(&args[0], &item)? {
            out.push(item);
        }
    }
    Ok(Value::Vector(out))
}

#[builtin(name = "remove", category = "Collections", effectful)]
pub fn remove(m: &mut Machine<'_>, args: &[Value]) -> Result<Value, Flow> {
    check_arity("remove", "2", args.len() == 2, args.len())?;
    let items = seq_items("remove", &args[1])?;
    let mut out = Vec::new();
    for item in items {
        if !m.call_pred(&args[0], &item)? {
            out.push(item);
        }
    }
    Ok(Value::Vector(out))
}

#[builtin(name = "find", category = "Collections", effectful)]
pub fn find(m: &mut Machine<'_>, args: &[Value]) -> Result<Value, Flow> {
    check_arity("find", "2", args.len() == 2, args.len())?;
    for item in seq_items("find", &args[1])? {
        if m.call_pred(&args[0], &item)? {
            return Ok(item);
        }
    }
    Ok(Value::Nil)
}

#[builtin(name = "apply", category = "Collections", effectful)]
pub fn apply(m: &mut Machine<'_>, args: &[Value]) -> Result<Value, Flow> {
    check_arity("apply", "at least 2", args.len() >= 2, args.len())?;
    let (f, rest) = args.split_first().unwrap();
    let (coll, leading) = rest.split_last().unwrap();
    let mut call_args = leading.to_vec();
    call_args.extend(seq_items("apply", coll)?);
    m.call_value(f, &call_args)
}
