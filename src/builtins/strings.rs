//! String builtins
//!
//! Length, slicing, and indexing are grapheme-aware, so emoji and
//! combining marks count as one character. `split` and `replace` accept
//! either a string or a regex object.

use crate::builtins::{as_str, check_arity, seq_items};
use crate::error::Error;
use crate::value::Value;
use ptc_macros::builtin;
use unicode_segmentation::UnicodeSegmentation;

#[builtin(name = "str", category = "Strings")]
pub fn str_fn(args: &[Value]) -> Result<Value, Error> {
    let mut out = String::new();
    for arg in args {
        out.push_str(&arg.render_string());
    }
    Ok(Value::Str(out))
}

#[builtin(name = "subs", category = "Strings")]
pub fn subs(args: &[Value]) -> Result<Value, Error> {
    check_arity("subs", "2-3", args.len() == 2 || args.len() == 3, args.len())?;
    let s = as_str("subs", &args[0])?;
    let graphemes: Vec<&str> = s.graphemes(true).collect();
    let start = index_arg("subs", &args[1])?.min(graphemes.len());
    let end = match args.get(2) {
        Some(v) => index_arg("subs", v)?.min(graphemes.len()),
        None => graphemes.len(),
    };
    if end < start {
        return Ok(Value::Str(String::new()));
    }
    Ok(Value::Str(graphemes[start..end].concat()))
}

fn index_arg(function: &str, v: &Value) -> Result<usize, Error> {
    match v {
        Value::Int(i) if *i >= 0 => Ok(*i as usize),
        Value::Int(_) => Ok(0),
        other => Err(Error::type_error(function, "an index", other)),
    }
}

#[builtin(name = "split", category = "Strings")]
pub fn split(args: &[Value]) -> Result<Value, Error> {
    check_arity("split", "2", args.len() == 2, args.len())?;
    let s = as_str("split", &args[0])?;
    let parts: Vec<Value> = match &args[1] {
        Value::Str(sep) if sep.is_empty() => {
            return Ok(Value::Vector(
                s.graphemes(true).map(|g| Value::Str(g.to_string())).collect(),
            ));
        }
        Value::Str(sep) => s.split(sep.as_str()).map(|p| Value::Str(p.to_string())).collect(),
        Value::Regex(r) => {
            let scan = crate::builtins::regex_fns::bounded_input(s);
            r.regex.split(scan).map(|p| Value::Str(p.to_string())).collect()
        }
        other => return Err(Error::type_error("split", "a string or regex separator", other)),
    };
    Ok(Value::Vector(parts))
}

#[builtin(name = "join", category = "Strings")]
pub fn join(args: &[Value]) -> Result<Value, Error> {
    check_arity("join", "1-2", args.len() == 1 || args.len() == 2, args.len())?;
    let (sep, coll) = match args {
        [coll] => (String::new(), coll),
        [sep, coll] => (as_str("join", sep)?.to_string(), coll),
        _ => unreachable!(),
    };
    let items = seq_items("join", coll)?;
    let rendered: Vec<String> = items.iter().map(Value::render_string).collect();
    Ok(Value::Str(rendered.join(&sep)))
}

#[builtin(name = "trim", category = "Strings")]
pub fn trim(args: &[Value]) -> Result<Value, Error> {
    check_arity("trim", "1", args.len() == 1, args.len())?;
    Ok(Value::Str(as_str("trim", &args[0])?.trim().to_string()))
}

#[builtin(name = "replace", category = "Strings")]
pub fn replace(args: &[Value]) -> Result<Value, Error> {
    check_arity("replace", "3", args.len() == 3, args.len())?;
    let s = as_str("replace", &args[0])?;
    let replacement = as_str("replace", &args[2])?;
    match &args[1] {
        Value::Str(m) => Ok(Value::Str(s.replace(m.as_str(), replacement))),
        Value::Regex(r) => {
            let scan = crate::builtins::regex_fns::bounded_input(s);
            Ok(Value::Str(r.regex.replace_all(scan, replacement).into_owned()))
        }
        other => Err(Error::type_error("replace", "a string or regex match", other)),
    }
}

#[builtin(name = "upper-case", aliases("upcase"), category = "Strings")]
pub fn upper_case(args: &[Value]) -> Result<Value, Error> {
    check_arity("upper-case", "1", args.len() == 1, args.len())?;
    Ok(Value::Str(as_str("upper-case", &args[0])?.to_uppercase()))
}

#[builtin(name = "lower-case", aliases("downcase"), category = "Strings")]
pub fn lower_case(args: &[Value]) -> Result<Value, Error> {
    check_arity("lower-case", "1", args.len() == 1, args.len())?;
    Ok(Value::Str(as_str("lower-case", &args[0])?.to_lowercase()))
}

#[builtin(name = "starts-with?", category = "Strings")]
pub fn starts_with_p(args: &[Value]) -> Result<Value, Error> {
    check_arity("starts-with?", "2", args.len() == 2, args.len())?;
    let s = as_str("starts-with?", &args[0])?;
    let prefix = as_str("starts-with?", &args[1])?;
    Ok(Value::Bool(s.starts_with(prefix)))
}

#[builtin(name = "ends-with?", category = "Strings")]
pub fn ends_with_p(args: &[Value]) -> Result<Value, Error> {
    check_arity("ends-with?", "2", args.len() == 2, args.len())?;
    let s = as_str("ends-with?", &args[0])?;
    let suffix = as_str("ends-with?", &args[1])?;
    Ok(Value::Bool(s.ends_with(suffix)))
}

#[builtin(name = "includes?", category = "Strings")]
pub fn includes_p(args: &[Value]) -> Result<Value, Error> {
    check_arity("includes?", "2", args.len() == 2, args.len())?;
    let s = as_str("includes?", &args[0])?;
    let needle = as_str("includes?", &args[1])?;
    Ok(Value::Bool(s.contains(needle)))
}

#[builtin(name = "index-of", category = "Strings")]
pub fn index_of(args: &[Value]) -> Result<Value, Error> {
    check_arity("index-of", "2", args.len() == 2, args.len())?;
    let s = as_str("index-of", &args[0])?;
    let needle = as_str("index-of", &args[1])?;
    Ok(byte_to_grapheme_index(s, s.find(needle)))
}

#[builtin(name = "last-index-of", category = "Strings")]
pub fn last_index_of(args: &[Value]) -> Result<Value, Error> {
    check_arity("last-index-of", "2", args.len() == 2, args.len())?;
    let s = as_str("last-index-of", &args[0])?;
    let needle = as_str("last-index-of", &args[1])?;
    Ok(byte_to_grapheme_index(s, s.rfind(needle)))
}

fn byte_to_grapheme_index(s: &str, byte_index: Option<usize>) -> Value {
    match byte_index {
        None => Value::Nil,
        Some(b) => {
            let idx = s
                .grapheme_indices(true)
                .take_while(|(offset, _)| *offset < b)
                .count();
            Value::Int(idx as i64)
        }
    }
}

#[builtin(name = "parse-long", category = "Strings")]
pub fn parse_long(args: &[Value]) -> Result<Value, Error> {
    check_arity("parse-long", "1", args.len() == 1, args.len())?;
    let s = as_str("parse-long", &args[0])?;
    Ok(s.trim().parse::<i64>().map(Value::Int).unwrap_or(Value::Nil))
}

#[builtin(name = "parse-double", category = "Strings")]
pub fn parse_double(args: &[Value]) -> Result<Value, Error> {
    check_arity("parse-double", "1", args.len() == 1, args.len())?;
    let s = as_str("parse-double", &args[0])?;
    Ok(s.trim().parse::<f64>().map(Value::Float).unwrap_or(Value::Nil))
}
