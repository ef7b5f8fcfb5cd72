//! Regex builtins: re-pattern, re-find, re-matches, regex?
//!
//! The engine is linear-time (no backtracking), so the execution budget
//! is enforced as a compiled-size limit; patterns and scanned input are
//! additionally capped by length.

use crate::builtins::{as_str, check_arity};
use crate::config::{REGEX_MAX_INPUT_BYTES, REGEX_MAX_PATTERN_BYTES, REGEX_SIZE_LIMIT};
use crate::error::{Error, ErrorKind};
use crate::value::{RegexValue, Value};
use ptc_macros::builtin;
use std::sync::Arc;

/// Clamp the scanned input to the first `REGEX_MAX_INPUT_BYTES` bytes,
/// on a char boundary.
pub fn bounded_input(s: &str) -> &str {
    if s.len() <= REGEX_MAX_INPUT_BYTES {
        return s;
    }
    let mut end = REGEX_MAX_INPUT_BYTES;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[builtin(name = "re-pattern", category = "Regex")]
pub fn re_pattern(args: &[Value]) -> Result<Value, Error> {
    check_arity("re-pattern", "1", args.len() == 1, args.len())?;
    let source = as_str("re-pattern", &args[0])?;
    if source.len() > REGEX_MAX_PATTERN_BYTES {
        return Err(Error::new(
            ErrorKind::RegexLimitExceeded,
            format!(
                "pattern is {} bytes; the limit is {}",
                source.len(),
                REGEX_MAX_PATTERN_BYTES
            ),
        ));
    }
    let regex = match regex::RegexBuilder::new(source).size_limit(REGEX_SIZE_LIMIT).build() {
        Ok(r) => r,
        Err(regex::Error::CompiledTooBig(_)) => {
            return Err(Error::new(
                ErrorKind::RegexLimitExceeded,
                "compiled pattern exceeds the execution budget",
            ));
        }
        Err(other) => {
            return Err(Error::new(ErrorKind::ValidationError, format!("re-pattern: {}", other)));
        }
    };
    Ok(Value::Regex(Arc::new(RegexValue { source: source.to_string(), regex })))
}

fn match_value(regex: &regex::Regex, captures: regex::Captures<'_>) -> Value {
    if regex.captures_len() == 1 {
        return Value::Str(captures[0].to_string());
    }
    let groups: Vec<Value> = captures
        .iter()
        .map(|g| match g {
            Some(m) => Value::Str(m.as_str().to_string()),
            None => Value::Nil,
        })
        .collect();
    Value::Vector(groups)
}

fn regex_arg<'v>(function: &str, v: &'v Value) -> Result<&'v RegexValue, Error> {
    match v {
        Value::Regex(r) => Ok(r),
        other => Err(Error::type_error(function, "a regex (use re-pattern)", other)),
    }
}

#[builtin(name = "re-find", category = "Regex")]
pub fn re_find(args: &[Value]) -> Result<Value, Error> {
    check_arity("re-find", "2", args.len() == 2, args.len())?;
    let r = regex_arg("re-find", &args[0])?;
    let input = bounded_input(as_str("re-find", &args[1])?);
    match r.regex.captures(input) {
        Some(captures) => Ok(match_value(&r.regex, captures)),
        None => Ok(Value::Nil),
    }
}

#[builtin(name = "re-matches", category = "Regex")]
pub fn re_matches(args: &[Value]) -> Result<Value, Error> {
    check_arity("re-matches", "2", args.len() == 2, args.len())?;
    let r = regex_arg("re-matches", &args[0])?;
    let input = bounded_input(as_str("re-matches", &args[1])?);
    match r.regex.captures(input) {
        Some(captures) if captures[0].len() == input.len() && captures.get(0).unwrap().start() == 0 => {
            Ok(match_value(&r.regex, captures))
        }
        _ => Ok(Value::Nil),
    }
}

#[builtin(name = "regex?", category = "Regex")]
pub fn regex_p(args: &[Value]) -> Result<Value, Error> {
    check_arity("regex?", "1", args.len() == 1, args.len())?;
    Ok(Value::Bool(matches!(args[0], Value::Regex(_))))
}
