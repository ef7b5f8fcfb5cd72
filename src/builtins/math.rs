//! Arithmetic builtins: + - * / mod inc dec abs max min floor ceil round trunc
//!
//! Integers are 64-bit with checked arithmetic; overflow raises
//! `arithmetic_error`. Mixed int/float operations promote to float, and
//! division always returns a float.

use crate::builtins::{as_f64, check_arity};
use crate::error::{Error, ErrorKind};
use crate::value::Value;
use ptc_macros::builtin;

fn overflow(function: &str) -> Error {
    Error::new(ErrorKind::ArithmeticError, format!("{}: integer overflow", function))
}

/// Numeric tower for a two-operand step: ints stay ints, anything float
/// promotes the result.
fn numeric_fold(
    function: &str,
    args: &[Value],
    init: Option<Value>,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> Result<Value, Error> {
    let mut iter = args.iter();
    let mut acc = match init {
        Some(v) => v,
        None => match iter.next() {
            Some(v) if v.is_number() => v.clone(),
            Some(other) => return Err(Error::type_error(function, "a number", other)),
            None => return Err(Error::arity(function, "at least 1", 0)),
        },
    };
    for arg in iter {
        acc = match (&acc, arg) {
            (Value::Int(a), Value::Int(b)) => {
                Value::Int(int_op(*a, *b).ok_or_else(|| overflow(function))?)
            }
            (a, b) if a.is_number() && b.is_number() => {
                Value::Float(float_op(a.as_f64().unwrap(), b.as_f64().unwrap()))
            }
            (_, other) => return Err(Error::type_error(function, "a number", other)),
        };
    }
    Ok(acc)
}

#[builtin(name = "+", category = "Math")]
pub fn add(args: &[Value]) -> Result<Value, Error> {
    numeric_fold("+", args, Some(Value::Int(0)), i64::checked_add, |a, b| a + b)
}

#[builtin(name = "-", category = "Math")]
pub fn sub(args: &[Value]) -> Result<Value, Error> {
    if args.len() == 1 {
        return match &args[0] {
            Value::Int(i) => i.checked_neg().map(Value::Int).ok_or_else(|| overflow("-")),
            Value::Float(f) => Ok(Value::Float(-f)),
            other => Err(Error::type_error("-", "a number", other)),
        };
    }
    numeric_fold("-", args, None, i64::checked_sub, |a, b| a - b)
}

#[builtin(name = "*", category = "Math")]
pub fn mul(args: &[Value]) -> Result<Value, Error> {
    numeric_fold("*", args, Some(Value::Int(1)), i64::checked_mul, |a, b| a * b)
}

#[builtin(name = "/", category = "Math")]
pub fn div(args: &[Value]) -> Result<Value, Error> {
    check_arity("/", "at least 1", !args.is_empty(), args.len())?;
    let (first, rest) = args.split_first().unwrap();
    let mut acc = as_f64("/", first)?;
    let divisors: Vec<f64> = if rest.is_empty() {
        // (/ x) is the reciprocal
        let d = acc;
        acc = 1.0;
        vec![d]
    } else {
        rest.iter().map(|v| as_f64("/", v)).collect::<Result<_, _>>()?
    };
    for d in divisors {
        if d == 0.0 {
            return Err(Error::new(ErrorKind::ArithmeticError, "division by zero"));
        }
        acc /= d;
    }
    Ok(Value::Float(acc))
}

#[builtin(name = "mod", category = "Math")]
pub fn modulo(args: &[Value]) -> Result<Value, Error> {
    check_arity("mod", "2", args.len() == 2, args.len())?;
    match (&args[0], &args[1]) {
        (Value::Int(_), Value::Int(0)) => {
            Err(Error::new(ErrorKind::ArithmeticError, "division by zero"))
        }
        (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a.rem_euclid(*b))),
        (a, b) if a.is_number() && b.is_number() => {
            let (a, b) = (a.as_f64().unwrap(), b.as_f64().unwrap());
            if b == 0.0 {
                return Err(Error::new(ErrorKind::ArithmeticError, "division by zero"));
            }
            Ok(Value::Float(a.rem_euclid(b)))
        }
        (a, b) => {
            let bad = if a.is_number() { b } else { a };
            Err(Error::type_error("mod", "a number", bad))
        }
    }
}

#[builtin(name = "inc", category = "Math")]
pub fn inc(args: &[Value]) -> Result<Value, Error> {
    check_arity("inc", "1", args.len() == 1, args.len())?;
    match &args[0] {
        Value::Int(i) => i.checked_add(1).map(Value::Int).ok_or_else(|| overflow("inc")),
        Value::Float(f) => Ok(Value::Float(f + 1.0)),
        other => Err(Error::type_error("inc", "a number", other)),
    }
}

#[builtin(name = "dec", category = "Math")]
pub fn dec(args: &[Value]) -> Result<Value, Error> {
    check_arity("dec", "1", args.len() == 1, args.len())?;
    match &args[0] {
        Value::Int(i) => i.checked_sub(1).map(Value::Int).ok_or_else(|| overflow("dec")),
        Value::Float(f) => Ok(Value::Float(f - 1.0)),
        other => Err(Error::type_error("dec", "a number", other)),
    }
}

#[builtin(name = "abs", category = "Math")]
pub fn abs(args: &[Value]) -> Result<Value, Error> {
    check_arity("abs", "1", args.len() == 1, args.len())?;
    match &args[0] {
        Value::Int(i) => i.checked_abs().map(Value::Int).ok_or_else(|| overflow("abs")),
        Value::Float(f) => Ok(Value::Float(f.abs())),
        other => Err(Error::type_error("abs", "a number", other)),
    }
}

#[builtin(name = "max", category = "Math")]
pub fn max(args: &[Value]) -> Result<Value, Error> {
    extremum("max", args, |a, b| a > b)
}

#[builtin(name = "min", category = "Math")]
pub fn min(args: &[Value]) -> Result<Value, Error> {
    extremum("min", args, |a, b| a < b)
}

fn extremum(function: &str, args: &[Value], wins: fn(f64, f64) -> bool) -> Result<Value, Error> {
    check_arity(function, "at least 1", !args.is_empty(), args.len())?;
    let mut best = &args[0];
    let mut best_n = as_f64(function, best)?;
    for arg in &args[1..] {
        let n = as_f64(function, arg)?;
        if wins(n, best_n) {
            best = arg;
            best_n = n;
        }
    }
    Ok(best.clone())
}

#[builtin(name = "floor", category = "Math")]
pub fn floor(args: &[Value]) -> Result<Value, Error> {
    rounding("floor", args, f64::floor)
}

#[builtin(name = "ceil", category = "Math")]
pub fn ceil(args: &[Value]) -> Result<Value, Error> {
    rounding("ceil", args, f64::ceil)
}

#[builtin(name = "round", category = "Math")]
pub fn round(args: &[Value]) -> Result<Value, Error> {
    rounding("round", args, f64::round)
}

#[builtin(name = "trunc", category = "Math")]
pub fn trunc(args: &[Value]) -> Result<Value, Error> {
    rounding("trunc", args, f64::trunc)
}

fn rounding(function: &str, args: &[Value], op: fn(f64) -> f64) -> Result<Value, Error> {
    check_arity(function, "1", args.len() == 1, args.len())?;
    match &args[0] {
        Value::Int(i) => Ok(Value::Int(*i)),
        Value::Float(f) => {
            let rounded = op(*f);
            if rounded.is_finite() && rounded >= i64::MIN as f64 && rounded <= i64::MAX as f64 {
                Ok(Value::Int(rounded as i64))
            } else {
                Err(Error::new(ErrorKind::ArithmeticError, format!("{}: result out of range", function)))
            }
        }
        other => Err(Error::type_error(function, "a number", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_promotes_to_float() {
        assert_eq!(add(&[Value::Int(1), Value::Int(2)]).unwrap(), Value::Int(3));
        assert_eq!(add(&[Value::Int(1), Value::Float(2.5)]).unwrap(), Value::Float(3.5));
        assert_eq!(add(&[]).unwrap(), Value::Int(0));
    }

    #[test]
    fn test_add_nil_is_type_error() {
        let err = add(&[Value::Int(1), Value::Nil]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::TypeError);
    }

    #[test]
    fn test_sub_unary_negates() {
        assert_eq!(sub(&[Value::Int(5)]).unwrap(), Value::Int(-5));
        assert_eq!(sub(&[Value::Int(5), Value::Int(2)]).unwrap(), Value::Int(3));
    }

    #[test]
    fn test_division_always_floats() {
        assert_eq!(div(&[Value::Int(6), Value::Int(3)]).unwrap(), Value::Float(2.0));
        assert_eq!(div(&[Value::Int(1), Value::Int(4)]).unwrap(), Value::Float(0.25));
    }

    #[test]
    fn test_division_by_zero() {
        let err = div(&[Value::Int(1), Value::Int(0)]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ArithmeticError);
        let err = div(&[Value::Float(1.0), Value::Float(0.0)]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ArithmeticError);
    }

    #[test]
    fn test_int_overflow_is_arithmetic_error() {
        let err = add(&[Value::Int(i64::MAX), Value::Int(1)]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ArithmeticError);
        assert!(err.message.contains("overflow"));
    }

    #[test]
    fn test_mod_is_floored() {
        assert_eq!(modulo(&[Value::Int(-7), Value::Int(3)]).unwrap(), Value::Int(2));
        assert_eq!(modulo(&[Value::Int(7), Value::Int(3)]).unwrap(), Value::Int(1));
    }

    #[test]
    fn test_max_min_preserve_operand_type() {
        assert_eq!(max(&[Value::Int(1), Value::Float(2.5)]).unwrap(), Value::Float(2.5));
        assert_eq!(min(&[Value::Int(1), Value::Float(2.5)]).unwrap(), Value::Int(1));
    }

    #[test]
    fn test_rounding_returns_ints() {
        assert_eq!(floor(&[Value::Float(2.7)]).unwrap(), Value::Int(2));
        assert_eq!(ceil(&[Value::Float(2.1)]).unwrap(), Value::Int(3));
        assert_eq!(round(&[Value::Float(2.5)]).unwrap(), Value::Int(3));
        assert_eq!(trunc(&[Value::Float(-2.7)]).unwrap(), Value::Int(-2));
        assert_eq!(round(&[Value::Int(4)]).unwrap(), Value::Int(4));
    }
}
