//! Logic builtins: not, identity
//!
//! `and`/`or` are short-circuiting special forms handled by the
//! evaluator; only the function-valued pieces live here.

use crate::builtins::check_arity;
use crate::error::Error;
use crate::value::Value;
use ptc_macros::builtin;

#[builtin(name = "not", category = "Logic")]
pub fn not(args: &[Value]) -> Result<Value, Error> {
    check_arity("not", "1", args.len() == 1, args.len())?;
    Ok(Value::Bool(!args[0].is_truthy()))
}

#[builtin(name = "identity", category = "Logic")]
pub fn identity(args: &[Value]) -> Result<Value, Error> {
    check_arity("identity", "1", args.len() == 1, args.len())?;
    Ok(args[0].clone())
}
