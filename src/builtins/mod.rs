//! # Builtin Function Registry
//!
//! Builtin functions live in category sub-modules and are registered with
//! the `#[builtin]` attribute from `ptc-macros`, which submits a
//! `BuiltinSpec` to an `inventory` collection. The registry is assembled
//! once, on first use, into a name → spec table that also covers aliases
//! and the namespace prefixes (`str/`, `clojure.string/`, `set/`, ...).

use crate::error::Error;
use crate::eval::{Flow, Machine};
use crate::value::Value;
use std::collections::HashMap;
use std::sync::OnceLock;

pub mod aggregation;
pub mod collections;
pub mod comparison;
pub mod console;
pub mod logic;
pub mod maps;
pub mod math;
pub mod regex_fns;
pub mod strings;
pub mod types;

/// A pure builtin sees only its arguments; an effectful one can call back
/// into the evaluator (higher-order functions, `println`, `apply`).
#[derive(Clone, Copy)]
pub enum BuiltinKind {
    Pure(fn(&[Value]) -> Result<Value, Error>),
    Effectful(fn(&mut Machine<'_>, &[Value]) -> Result<Value, Flow>),
}

pub struct BuiltinSpec {
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    pub category: &'static str,
    pub kind: BuiltinKind,
}

impl std::fmt::Debug for BuiltinSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BuiltinSpec({})", self.name)
    }
}

inventory::collect!(BuiltinSpec);

/// Members of the `clojure.string`/`str`/`string` namespace.
const STRING_NS: &[&str] = &[
    "str",
    "subs",
    "split",
    "join",
    "trim",
    "replace",
    "upper-case",
    "upcase",
    "lower-case",
    "downcase",
    "starts-with?",
    "ends-with?",
    "includes?",
    "index-of",
    "last-index-of",
];

/// Members of the `clojure.set`/`set` namespace.
const SET_NS: &[&str] = &["contains?", "distinct", "into", "conj", "count"];

pub struct Registry {
    by_name: HashMap<&'static str, &'static BuiltinSpec>,
    names: Vec<&'static str>,
}

impl Registry {
    pub fn lookup(&self, name: &str) -> Option<&'static BuiltinSpec> {
        self.by_name.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// All primary names, sorted, for error hints.
    pub fn names(&self) -> &[&'static str] {
        &self.names
    }
}

pub fn registry() -> &'static Registry {
    static REGISTRY: OnceLock<Registry> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let mut by_name = HashMap::new();
        let mut names = Vec::new();
        for spec in inventory::iter::<BuiltinSpec> {
            by_name.insert(spec.name, spec);
            names.push(spec.name);
            for alias in spec.aliases {
                by_name.insert(*alias, spec);
            }
        }
        names.sort_unstable();
        Registry { by_name, names }
    })
}

pub fn lookup(name: &str) -> Option<&'static BuiltinSpec> {
    registry().lookup(name)
}

pub fn is_builtin(name: &str) -> bool {
    registry().contains(name)
}

/// How a namespaced symbol resolves against the builtin tables.
pub enum NsResolution {
    /// Builtin name the symbol normalizes to.
    Resolved(&'static str),
    /// Known namespace, unknown function; carries the namespace's members.
    UnknownName(Vec<&'static str>),
    UnknownNamespace,
}

pub fn resolve_namespaced(ns: &str, name: &str) -> NsResolution {
    let members: Option<&[&str]> = match ns {
        "clojure.string" | "str" | "string" => Some(STRING_NS),
        "clojure.set" | "set" => Some(SET_NS),
        "clojure.core" | "core" => None, // every builtin
        _ => return NsResolution::UnknownNamespace,
    };
    match members {
        Some(members) => {
            if members.contains(&name) && is_builtin(name) {
                // resolve through the registry so aliases normalize too
                NsResolution::Resolved(lookup(name).map(|s| s.name).unwrap_or("str"))
            } else {
                let mut sorted: Vec<&'static str> = members.to_vec();
                sorted.sort_unstable();
                NsResolution::UnknownName(sorted)
            }
        }
        None => match lookup(name) {
            Some(spec) => NsResolution::Resolved(spec.name),
            None => NsResolution::UnknownName(registry().names().to_vec()),
        },
    }
}

// ============================================================================
// Shared coercion helpers
// ============================================================================

use crate::value::{Map, MapKey};
use unicode_segmentation::UnicodeSegmentation;

/// View any collection as a sequence of elements: vectors and sets as-is,
/// maps as `[k v]` pairs, strings as graphemes, nil as empty.
pub fn seq_items(function: &str, v: &Value) -> Result<Vec<Value>, Error> {
    match v {
        Value::Nil => Ok(Vec::new()),
        Value::Vector(items) | Value::Set(items) => Ok(items.clone()),
        Value::Map(m) => Ok(m
            .iter()
            .map(|(k, v)| Value::Vector(vec![k.to_value(), v.clone()]))
            .collect()),
        Value::Str(s) => Ok(s.graphemes(true).map(|g| Value::Str(g.to_string())).collect()),
        other => Err(Error::type_error(function, "a collection", other)),
    }
}

pub fn as_map<'v>(function: &str, v: &'v Value) -> Result<&'v Map, Error> {
    match v {
        Value::Map(m) => Ok(m),
        other => Err(Error::type_error(function, "a map", other)),
    }
}

pub fn as_vector<'v>(function: &str, v: &'v Value) -> Result<&'v [Value], Error> {
    match v {
        Value::Vector(items) => Ok(items),
        other => Err(Error::type_error(function, "a vector", other)),
    }
}

pub fn as_str<'v>(function: &str, v: &'v Value) -> Result<&'v str, Error> {
    match v {
        Value::Str(s) => Ok(s),
        other => Err(Error::type_error(function, "a string", other)),
    }
}

pub fn as_int(function: &str, v: &Value) -> Result<i64, Error> {
    match v {
        Value::Int(i) => Ok(*i),
        other => Err(Error::type_error(function, "an integer", other)),
    }
}

pub fn as_f64(function: &str, v: &Value) -> Result<f64, Error> {
    v.as_f64().ok_or_else(|| Error::type_error(function, "a number", v))
}

pub fn as_key(function: &str, v: &Value) -> Result<MapKey, Error> {
    match v {
        Value::Keyword(k) => Ok(MapKey::Keyword(k.clone())),
        Value::Str(s) => Ok(MapKey::Str(s.clone())),
        other => Err(Error::type_error(function, "a keyword or string key", other)),
    }
}

pub fn check_arity(function: &str, expected: &str, ok: bool, actual: usize) -> Result<(), Error> {
    if ok {
        Ok(())
    } else {
        Err(Error::arity(function, expected, actual))
    }
}
