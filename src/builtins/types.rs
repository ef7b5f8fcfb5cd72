//! Type and numeric predicates
//!
//! `char?` is grapheme-aware (characters are one-grapheme strings);
//! `coll?` is true for vectors only. `even?`/`odd?` are integer-only and
//! raise `type_error` on floats.

use crate::builtins::{as_int, check_arity};
use crate::error::Error;
use crate::value::Value;
use ptc_macros::builtin;

fn unary<'a>(function: &str, args: &'a [Value]) -> Result<&'a Value, Error> {
    check_arity(function, "1", args.len() == 1, args.len())?;
    Ok(&args[0])
}

#[builtin(name = "nil?", category = "Types")]
pub fn nil_p(args: &[Value]) -> Result<Value, Error> {
    Ok(Value::Bool(matches!(unary("nil?", args)?, Value::Nil)))
}

#[builtin(name = "some?", category = "Types")]
pub fn some_p(args: &[Value]) -> Result<Value, Error> {
    Ok(Value::Bool(!matches!(unary("some?", args)?, Value::Nil)))
}

#[builtin(name = "boolean?", category = "Types")]
pub fn boolean_p(args: &[Value]) -> Result<Value, Error> {
    Ok(Value::Bool(matches!(unary("boolean?", args)?, Value::Bool(_))))
}

#[builtin(name = "number?", category = "Types")]
pub fn number_p(args: &[Value]) -> Result<Value, Error> {
    Ok(Value::Bool(unary("number?", args)?.is_number()))
}

#[builtin(name = "string?", category = "Types")]
pub fn string_p(args: &[Value]) -> Result<Value, Error> {
    Ok(Value::Bool(matches!(unary("string?", args)?, Value::Str(_))))
}

#[builtin(name = "char?", category = "Types")]
pub fn char_p(args: &[Value]) -> Result<Value, Error> {
    Ok(Value::Bool(unary("char?", args)?.is_char()))
}

#[builtin(name = "keyword?", category = "Types")]
pub fn keyword_p(args: &[Value]) -> Result<Value, Error> {
    Ok(Value::Bool(matches!(unary("keyword?", args)?, Value::Keyword(_))))
}

#[builtin(name = "vector?", category = "Types")]
pub fn vector_p(args: &[Value]) -> Result<Value, Error> {
    Ok(Value::Bool(matches!(unary("vector?", args)?, Value::Vector(_))))
}

#[builtin(name = "map?", category = "Types")]
pub fn map_p(args: &[Value]) -> Result<Value, Error> {
    Ok(Value::Bool(matches!(unary("map?", args)?, Value::Map(_))))
}

#[builtin(name = "set?", category = "Types")]
pub fn set_p(args: &[Value]) -> Result<Value, Error> {
    Ok(Value::Bool(matches!(unary("set?", args)?, Value::Set(_))))
}

#[builtin(name = "coll?", category = "Types")]
pub fn coll_p(args: &[Value]) -> Result<Value, Error> {
    Ok(Value::Bool(matches!(unary("coll?", args)?, Value::Vector(_))))
}

#[builtin(name = "zero?", category = "Types")]
pub fn zero_p(args: &[Value]) -> Result<Value, Error> {
    match unary("zero?", args)? {
        Value::Int(i) => Ok(Value::Bool(*i == 0)),
        Value::Float(f) => Ok(Value::Bool(*f == 0.0)),
        other => Err(Error::type_error("zero?", "a number", other)),
    }
}

#[builtin(name = "pos?", category = "Types")]
pub fn pos_p(args: &[Value]) -> Result<Value, Error> {
    match unary("pos?", args)? {
        Value::Int(i) => Ok(Value::Bool(*i > 0)),
        Value::Float(f) => Ok(Value::Bool(*f > 0.0)),
        other => Err(Error::type_error("pos?", "a number", other)),
    }
}

#[builtin(name = "neg?", category = "Types")]
pub fn neg_p(args: &[Value]) -> Result<Value, Error> {
    match unary("neg?", args)? {
        Value::Int(i) => Ok(Value::Bool(*i < 0)),
        Value::Float(f) => Ok(Value::Bool(*f < 0.0)),
        other => Err(Error::type_error("neg?", "a number", other)),
    }
}

#[builtin(name = "even?", category = "Types")]
pub fn even_p(args: &[Value]) -> Result<Value, Error> {
    let i = as_int("even?", unary("even?", args)?)?;
    Ok(Value::Bool(i % 2 == 0))
}

#[builtin(name = "odd?", category = "Types")]
pub fn odd_p(args: &[Value]) -> Result<Value, Error> {
    let i = as_int("odd?", unary("odd?", args)?)?;
    Ok(Value::Bool(i % 2 != 0))
}
