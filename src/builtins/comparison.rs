//! Comparison builtins: = not= < > <= >=
//!
//! Strictly 2-arity; chained comparisons are written with `and`. Equality
//! is structural (numbers compare across int/float); ordering operators
//! require comparable operands and raise `type_error` otherwise; the
//! nil-safe variants live in `where`.

use crate::builtins::check_arity;
use crate::error::Error;
use crate::value::{compare_values, Value};
use ptc_macros::builtin;
use std::cmp::Ordering;

#[builtin(name = "=", category = "Comparison")]
pub fn eq(args: &[Value]) -> Result<Value, Error> {
    check_arity("=", "2", args.len() == 2, args.len())?;
    Ok(Value::Bool(args[0] == args[1]))
}

#[builtin(name = "not=", category = "Comparison")]
pub fn not_eq(args: &[Value]) -> Result<Value, Error> {
    check_arity("not=", "2", args.len() == 2, args.len())?;
    Ok(Value::Bool(args[0] != args[1]))
}

fn ordered(function: &str, args: &[Value], test: fn(Ordering) -> bool) -> Result<Value, Error> {
    check_arity(function, "2", args.len() == 2, args.len())?;
    match compare_values(&args[0], &args[1]) {
        Some(ordering) => Ok(Value::Bool(test(ordering))),
        None => {
            let bad = if args[0].is_number() || matches!(args[0], Value::Str(_)) {
                &args[1]
            } else {
                &args[0]
            };
            Err(Error::type_error(function, "comparable values", bad))
        }
    }
}

#[builtin(name = "<", category = "Comparison")]
pub fn lt(args: &[Value]) -> Result<Value, Error> {
    ordered("<", args, |o| o == Ordering::Less)
}

#[builtin(name = ">", category = "Comparison")]
pub fn gt(args: &[Value]) -> Result<Value, Error> {
    ordered(">", args, |o| o == Ordering::Greater)
}

#[builtin(name = "<=", category = "Comparison")]
pub fn le(args: &[Value]) -> Result<Value, Error> {
    ordered("<=", args, |o| o != Ordering::Greater)
}

#[builtin(name = ">=", category = "Comparison")]
pub fn ge(args: &[Value]) -> Result<Value, Error> {
    ordered(">=", args, |o| o != Ordering::Less)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equality_across_numeric_types() {
        assert_eq!(eq(&[Value::Int(1), Value::Float(1.0)]).unwrap(), Value::Bool(true));
        assert_eq!(eq(&[Value::Str("a".into()), Value::Keyword("a".into())]).unwrap(), Value::Bool(false));
    }

    #[test]
    fn test_comparisons_are_strictly_binary() {
        assert!(lt(&[Value::Int(1), Value::Int(2), Value::Int(3)]).is_err());
    }

    #[test]
    fn test_ordering_with_nil_is_type_error() {
        assert!(lt(&[Value::Nil, Value::Int(1)]).is_err());
        assert!(ge(&[Value::Int(1), Value::Nil]).is_err());
    }

    #[test]
    fn test_string_ordering() {
        assert_eq!(lt(&[Value::Str("a".into()), Value::Str("b".into())]).unwrap(), Value::Bool(true));
    }
}
