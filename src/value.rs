// ABOUTME: Value types representing PTC-Lisp data and runtime callables

use crate::ast::{Node, Pattern};
use crate::builtins::BuiltinSpec;
use crate::config::MAX_PRINT_DEPTH;
use crate::env::Env;
use crate::error::{Error, ErrorKind};
use crate::eval::{Flow, Machine};
use indexmap::IndexMap;
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;
use unicode_segmentation::UnicodeSegmentation;

/// Map keys are restricted to keywords and strings; anything else raises
/// `validation_error` at the construction site.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MapKey {
    Keyword(String),
    Str(String),
}

impl MapKey {
    pub fn name(&self) -> &str {
        match self {
            MapKey::Keyword(s) | MapKey::Str(s) => s,
        }
    }

    /// The keyword↔string twin used for tolerant lookup.
    pub fn alternate(&self) -> MapKey {
        match self {
            MapKey::Keyword(s) => MapKey::Str(s.clone()),
            MapKey::Str(s) => MapKey::Keyword(s.clone()),
        }
    }

    pub fn from_value(v: &Value) -> Result<MapKey, Error> {
        match v {
            Value::Keyword(k) => Ok(MapKey::Keyword(k.clone())),
            Value::Str(s) => Ok(MapKey::Str(s.clone())),
            other => Err(Error::new(
                ErrorKind::ValidationError,
                format!("map keys must be keywords or strings, got {}", other.type_name()),
            )),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            MapKey::Keyword(s) => Value::Keyword(s.clone()),
            MapKey::Str(s) => Value::Str(s.clone()),
        }
    }
}

impl fmt::Display for MapKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MapKey::Keyword(s) => write!(f, ":{}", s),
            MapKey::Str(s) => write!(f, "\"{}\"", escape_string(s)),
        }
    }
}

/// Insertion-ordered map, the only map representation in the runtime.
pub type Map = IndexMap<MapKey, Value>;

/// String-keyed map used at the tool boundary and for memory/journal state.
pub type StrMap = IndexMap<String, Value>;

/// A user-defined function: captured environment, parameter patterns, body.
/// Patterns and body are shared with the `fn` node that produced them.
pub struct Closure {
    pub name: Option<String>,
    pub params: Arc<Vec<Pattern>>,
    pub rest: Option<Arc<Pattern>>,
    pub body: Arc<Vec<Node>>,
    pub env: Arc<Env>,
}

impl fmt::Debug for Closure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Closure({})", self.name.as_deref().unwrap_or("anonymous"))
    }
}

/// A runtime-constructed callable such as a `where` predicate or a `juxt`
/// bundle. Carries a display name and a boxed evaluator callback.
pub struct NativeFn {
    pub name: &'static str,
    #[allow(clippy::type_complexity)]
    pub call: Box<dyn Fn(&mut Machine<'_>, &[Value]) -> Result<Value, Flow> + Send + Sync>,
}

impl NativeFn {
    pub fn new<F>(name: &'static str, call: F) -> Value
    where
        F: Fn(&mut Machine<'_>, &[Value]) -> Result<Value, Flow> + Send + Sync + 'static,
    {
        Value::Native(Arc::new(NativeFn { name, call: Box::new(call) }))
    }
}

impl fmt::Debug for NativeFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativeFn({})", self.name)
    }
}

/// Compiled regex plus its source, constructed only via `(re-pattern s)`.
#[derive(Debug)]
pub struct RegexValue {
    pub source: String,
    pub regex: regex::Regex,
}

#[derive(Debug, Clone)]
pub enum Value {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Keyword(String),
    Vector(Vec<Value>),
    Map(Map),
    Set(Vec<Value>),
    Closure(Arc<Closure>),
    Native(Arc<NativeFn>),
    Builtin(&'static BuiltinSpec),
    VarRef(String),
    Regex(Arc<RegexValue>),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "boolean",
            Value::Int(_) => "integer",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::Keyword(_) => "keyword",
            Value::Vector(_) => "vector",
            Value::Map(_) => "map",
            Value::Set(_) => "set",
            Value::Closure(_) | Value::Native(_) | Value::Builtin(_) => "function",
            Value::VarRef(_) => "var",
            Value::Regex(_) => "regex",
        }
    }

    /// Only nil and false are falsy; everything else is truthy.
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Bool(false))
    }

    pub fn is_number(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Float(_))
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Characters are single-grapheme strings.
    pub fn is_char(&self) -> bool {
        matches!(self, Value::Str(s) if s.graphemes(true).count() == 1)
    }

    pub fn is_callable(&self) -> bool {
        matches!(
            self,
            Value::Closure(_)
                | Value::Native(_)
                | Value::Builtin(_)
                | Value::Keyword(_)
                | Value::Set(_)
                | Value::VarRef(_)
        )
    }

    /// Rendering used by `str` and `println`: strings appear without
    /// quotes at the top level, everything else prints canonically.
    pub fn render_string(&self) -> String {
        match self {
            Value::Str(s) => s.clone(),
            Value::Nil => String::new(),
            other => other.to_string(),
        }
    }

    /// Shallow allocation estimate charged against the heap budget.
    pub fn charged_size(&self) -> usize {
        match self {
            Value::Nil | Value::Bool(_) | Value::Int(_) | Value::Float(_) => 16,
            Value::Str(s) | Value::Keyword(s) | Value::VarRef(s) => 24 + s.len(),
            Value::Vector(v) | Value::Set(v) => 32 + 16 * v.len(),
            Value::Map(m) => 32 + 48 * m.len(),
            Value::Closure(_) | Value::Native(_) => 64,
            Value::Builtin(_) => 0,
            Value::Regex(r) => 128 + r.source.len(),
        }
    }

    /// Recursive size estimate, used for tool-call result accounting.
    pub fn deep_size(&self) -> usize {
        match self {
            Value::Vector(v) | Value::Set(v) => {
                32 + v.iter().map(Value::deep_size).sum::<usize>()
            }
            Value::Map(m) => {
                32 + m
                    .iter()
                    .map(|(k, v)| 24 + k.name().len() + v.deep_size())
                    .sum::<usize>()
            }
            other => other.charged_size(),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Nil => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => {
                serde_json::Number::from_f64(*f).map_or(serde_json::Value::Null, serde_json::Value::Number)
            }
            Value::Str(s) => serde_json::Value::String(s.clone()),
            Value::Keyword(k) => serde_json::Value::String(k.clone()),
            Value::Vector(v) | Value::Set(v) => {
                serde_json::Value::Array(v.iter().map(Value::to_json).collect())
            }
            Value::Map(m) => serde_json::Value::Object(
                m.iter().map(|(k, v)| (k.name().to_string(), v.to_json())).collect(),
            ),
            other => serde_json::Value::String(other.to_string()),
        }
    }

    pub fn from_json(json: &serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Nil,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Value::Str(s.clone()),
            serde_json::Value::Array(items) => {
                Value::Vector(items.iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(obj) => Value::Map(
                obj.iter()
                    .map(|(k, v)| (MapKey::Str(k.clone()), Value::from_json(v)))
                    .collect(),
            ),
        }
    }
}

/// Lookup with keyword↔string fallback: the declared key type first, then
/// its twin. Exact match wins when both spellings are present.
pub fn flex_get<'a>(map: &'a Map, key: &MapKey) -> Option<&'a Value> {
    map.get(key).or_else(|| map.get(&key.alternate()))
}

/// Follow a path of keys through nested maps (and integer indexes through
/// vectors), keyword↔string tolerant at each map hop.
pub fn flex_get_in<'a>(value: &'a Value, path: &[MapKey]) -> Option<&'a Value> {
    let mut current = value;
    for key in path {
        match current {
            Value::Map(m) => current = flex_get(m, key)?,
            _ => return None,
        }
    }
    Some(current)
}

/// Ordering used by `sort`, `sort-by`, and the comparison builtins.
/// Numbers compare across int/float; strings, keywords, and booleans
/// compare within their own kind; vectors compare lexicographically.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Some(x.cmp(y)),
        (x, y) if x.is_number() && y.is_number() => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::Str(x), Value::Str(y)) => Some(x.cmp(y)),
        (Value::Keyword(x), Value::Keyword(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Vector(xs), Value::Vector(ys)) => {
            for (x, y) in xs.iter().zip(ys.iter()) {
                match compare_values(x, y)? {
                    Ordering::Equal => continue,
                    other => return Some(other),
                }
            }
            Some(xs.len().cmp(&ys.len()))
        }
        _ => None,
    }
}

/// Round every float in a value to `precision` decimal places, traversing
/// vectors and maps. Sets, closures, regexes, and vars pass through.
pub fn round_floats(value: &Value, precision: u32) -> Value {
    match value {
        Value::Float(f) => {
            let factor = 10f64.powi(precision as i32);
            Value::Float((f * factor).round() / factor)
        }
        Value::Vector(items) => {
            Value::Vector(items.iter().map(|v| round_floats(v, precision)).collect())
        }
        Value::Map(m) => Value::Map(
            m.iter().map(|(k, v)| (k.clone(), round_floats(v, precision))).collect(),
        ),
        other => other.clone(),
    }
}

/// True when every element is a single-grapheme string; `println`
/// auto-joins such lists for readability.
pub fn is_char_list(value: &Value) -> bool {
    match value {
        Value::Vector(items) => !items.is_empty() && items.iter().all(Value::is_char),
        _ => false,
    }
}

/// Truncate on a grapheme boundary, appending `...` on overflow.
pub fn truncate_graphemes(s: &str, max: usize) -> String {
    let mut count = 0;
    for (offset, _) in s.grapheme_indices(true) {
        if count == max {
            return format!("{}...", &s[..offset]);
        }
        count += 1;
    }
    s.to_string()
}

/// Truncate to at most `max` bytes on a grapheme boundary, appending
/// `...` on overflow. Used for turn-history entries.
pub fn truncate_bytes(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = 0;
    for (offset, g) in s.grapheme_indices(true) {
        if offset + g.len() > max {
            break;
        }
        end = offset + g.len();
    }
    format!("{}...", &s[..end])
}

fn escape_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            other => out.push(other),
        }
    }
    out
}

fn write_value(f: &mut fmt::Formatter<'_>, value: &Value, depth: usize) -> fmt::Result {
    if depth > MAX_PRINT_DEPTH {
        return write!(f, "...");
    }
    match value {
        Value::Nil => write!(f, "nil"),
        Value::Bool(b) => write!(f, "{}", b),
        Value::Int(i) => write!(f, "{}", i),
        Value::Float(x) => write!(f, "{:?}", x),
        Value::Str(s) => write!(f, "\"{}\"", escape_string(s)),
        Value::Keyword(k) => write!(f, ":{}", k),
        Value::Vector(items) => {
            write!(f, "[")?;
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    write!(f, " ")?;
                }
                write_value(f, item, depth + 1)?;
            }
            write!(f, "]")
        }
        Value::Map(m) => {
            write!(f, "{{")?;
            for (i, (k, v)) in m.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{} ", k)?;
                write_value(f, v, depth + 1)?;
            }
            write!(f, "}}")
        }
        Value::Set(items) => {
            write!(f, "#{{")?;
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    write!(f, " ")?;
                }
                write_value(f, item, depth + 1)?;
            }
            write!(f, "}}")
        }
        Value::Closure(c) => write!(f, "#fn[{}]", c.name.as_deref().unwrap_or("anonymous")),
        Value::Native(n) => write!(f, "#fn[{}]", n.name),
        Value::Builtin(b) => write!(f, "#fn[{}]", b.name),
        Value::VarRef(name) => write!(f, "#'{}", name),
        Value::Regex(r) => write!(f, "#regex[{}]", r.source),
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_value(f, self, 0)
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Nil
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
                *a as f64 == *b
            }
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Keyword(a), Value::Keyword(b)) => a == b,
            (Value::Vector(a), Value::Vector(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => {
                a.len() == b.len() && a.iter().all(|(k, v)| b.get(k) == Some(v))
            }
            (Value::Set(a), Value::Set(b)) => {
                a.len() == b.len() && a.iter().all(|x| b.contains(x))
            }
            (Value::Closure(a), Value::Closure(b)) => Arc::ptr_eq(a, b),
            (Value::Native(a), Value::Native(b)) => Arc::ptr_eq(a, b),
            (Value::Builtin(a), Value::Builtin(b)) => std::ptr::eq(*a, *b),
            (Value::VarRef(a), Value::VarRef(b)) => a == b,
            (Value::Regex(a), Value::Regex(b)) => a.source == b.source,
            _ => false,
        }
    }
}

impl serde::Serialize for Value {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> serde::Deserialize<'de> for Value {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let json = serde_json::Value::deserialize(deserializer)?;
        Ok(Value::from_json(&json))
    }
}
