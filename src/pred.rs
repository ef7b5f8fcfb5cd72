// ABOUTME: Predicate builders: where clauses, combinators, and juxt

use crate::ast::{CombKind, WhereOp};
use crate::error::Error;
use crate::eval::Flow;
use crate::value::{compare_values, flex_get_in, MapKey, NativeFn, Value};
use std::cmp::Ordering;

/// Equality with keyword↔string coercion, used by `=`/`not=`/`in`/
/// `includes` inside `where`.
pub fn loose_eq(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    matches!(
        (a, b),
        (Value::Keyword(x), Value::Str(y)) | (Value::Str(x), Value::Keyword(y)) if x == y
    )
}

/// Compile a `where` clause into a one-argument predicate closure.
/// Ordering operators never raise: a missing field or a type mismatch
/// makes the predicate false, so filters stay safe over ragged data.
pub fn make_where(path: Vec<MapKey>, op: Option<WhereOp>, target: Option<Value>) -> Value {
    NativeFn::new("where", move |_m, args| {
        if args.len() != 1 {
            return Err(Flow::Error(Error::arity("where predicate", "1", args.len())));
        }
        let field = flex_get_in(&args[0], &path).cloned().unwrap_or(Value::Nil);
        let result = match (op, &target) {
            (None, _) => field.is_truthy(),
            (Some(op), Some(target)) => where_test(op, &field, target),
            (Some(_), None) => false,
        };
        Ok(Value::Bool(result))
    })
}

fn where_test(op: WhereOp, field: &Value, target: &Value) -> bool {
    match op {
        WhereOp::Eq => loose_eq(field, target),
        WhereOp::Ne => !loose_eq(field, target),
        WhereOp::Gt => ordering_test(field, target, |o| o == Ordering::Greater),
        WhereOp::Lt => ordering_test(field, target, |o| o == Ordering::Less),
        WhereOp::Ge => ordering_test(field, target, |o| o != Ordering::Less),
        WhereOp::Le => ordering_test(field, target, |o| o != Ordering::Greater),
        WhereOp::In => match target {
            Value::Vector(items) | Value::Set(items) => {
                items.iter().any(|item| loose_eq(field, item))
            }
            Value::Str(s) => matches!(field, Value::Str(sub) if s.contains(sub.as_str())),
            _ => false,
        },
        WhereOp::Includes => match field {
            Value::Vector(items) | Value::Set(items) => {
                items.iter().any(|item| loose_eq(item, target))
            }
            Value::Str(s) => match target {
                Value::Str(sub) => s.contains(sub.as_str()),
                Value::Keyword(sub) => s.contains(sub.as_str()),
                _ => false,
            },
            _ => false,
        },
    }
}

fn ordering_test(field: &Value, target: &Value, test: impl Fn(Ordering) -> bool) -> bool {
    compare_values(field, target).map(test).unwrap_or(false)
}

/// `all-of` / `any-of` / `none-of` over already-evaluated predicates.
/// Vacuous semantics: all-of accepts, any-of rejects, none-of accepts.
pub fn make_combinator(kind: CombKind, preds: Vec<Value>) -> Value {
    let name = match kind {
        CombKind::All => "all-of",
        CombKind::Any => "any-of",
        CombKind::None => "none-of",
    };
    NativeFn::new(name, move |m, args| {
        if args.len() != 1 {
            return Err(Flow::Error(Error::arity(name, "1", args.len())));
        }
        let item = &args[0];
        let mut any = false;
        let mut all = true;
        for pred in &preds {
            if m.call_pred(pred, item)? {
                any = true;
            } else {
                all = false;
            }
            // short-circuit where the remaining predicates cannot matter
            match kind {
                CombKind::All if !all => return Ok(Value::Bool(false)),
                CombKind::Any | CombKind::None if any => {
                    return Ok(Value::Bool(kind == CombKind::Any));
                }
                _ => {}
            }
        }
        Ok(Value::Bool(match kind {
            CombKind::All => all,
            CombKind::Any => any,
            CombKind::None => !any,
        }))
    })
}

/// `(juxt f g)` → a function returning `[(f x) (g x)]`.
pub fn make_juxt(fns: Vec<Value>) -> Value {
    NativeFn::new("juxt", move |m, args| {
        let mut out = Vec::with_capacity(fns.len());
        for f in &fns {
            out.push(m.call_value(f, args)?);
        }
        Ok(Value::Vector(out))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loose_eq_coerces_keyword_and_string() {
        assert!(loose_eq(&Value::Keyword("active".into()), &Value::Str("active".into())));
        assert!(loose_eq(&Value::Str("active".into()), &Value::Keyword("active".into())));
        assert!(!loose_eq(&Value::Str("active".into()), &Value::Str("inactive".into())));
    }

    #[test]
    fn test_where_ordering_is_nil_safe() {
        assert!(!where_test(WhereOp::Gt, &Value::Nil, &Value::Int(3)));
        assert!(!where_test(WhereOp::Le, &Value::Str("x".into()), &Value::Int(3)));
        assert!(where_test(WhereOp::Gt, &Value::Int(5), &Value::Int(3)));
        assert!(where_test(WhereOp::Ge, &Value::Float(3.0), &Value::Int(3)));
    }

    #[test]
    fn test_where_in_and_includes() {
        let coll = Value::Vector(vec![Value::Str("a".into()), Value::Str("b".into())]);
        assert!(where_test(WhereOp::In, &Value::Keyword("a".into()), &coll));
        assert!(!where_test(WhereOp::In, &Value::Str("c".into()), &coll));
        assert!(where_test(WhereOp::Includes, &coll, &Value::Str("b".into())));
        assert!(where_test(
            WhereOp::Includes,
            &Value::Str("travel expenses".into()),
            &Value::Str("travel".into())
        ));
    }
}
