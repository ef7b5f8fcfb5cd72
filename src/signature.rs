// ABOUTME: Signature grammar, canonical rendering, and input/output validation

use crate::error::{Error, ErrorKind};
use crate::value::{flex_get, MapKey, StrMap, Value};
use log::warn;
use std::fmt;

/// A compact type describing tool I/O or an agent's return shape.
#[derive(Debug, Clone, PartialEq)]
pub enum Type {
    String,
    Int,
    Float,
    Bool,
    Keyword,
    Any,
    /// Bare `:map`: any map, fields unchecked.
    Map,
    List(Box<Type>),
    Record(Vec<Field>),
    /// `type?`: nil or absent is accepted.
    Optional(Box<Type>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub ty: Type,
}

impl Field {
    pub fn is_optional(&self) -> bool {
        matches!(self.ty, Type::Optional(_))
    }

    /// Fields named with a leading `_` exist in runtime data but are
    /// hidden from prompt rendering and parent-agent views.
    pub fn is_firewalled(&self) -> bool {
        self.name.starts_with('_')
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub ty: Type,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Signature {
    /// None when the signature is a bare type (return shape only).
    pub params: Option<Vec<Param>>,
    pub return_type: Type,
}

/// How input validation treats violations and extra fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValidationMode {
    /// Errors on missing/mismatched required fields, warnings on
    /// coercion, extras ignored.
    #[default]
    Enabled,
    /// Everything demoted to warnings.
    WarnOnly,
    Disabled,
    /// Extras rejected and coercions treated as errors.
    Strict,
}

// ============================================================================
// Parsing
// ============================================================================

struct Cursor<'a> {
    src: &'a str,
    rest: &'a str,
}

impl<'a> Cursor<'a> {
    fn new(src: &'a str) -> Self {
        Cursor { src, rest: src }
    }

    fn error(&self, msg: impl Into<String>) -> Error {
        let consumed = self.src.len() - self.rest.len();
        Error::new(
            ErrorKind::ValidationError,
            format!("invalid signature at byte {}: {}", consumed, msg.into()),
        )
    }

    fn skip_ws(&mut self) {
        self.rest = self.rest.trim_start();
    }

    fn peek(&mut self) -> Option<char> {
        self.skip_ws();
        self.rest.chars().next()
    }

    fn eat(&mut self, c: char) -> bool {
        self.skip_ws();
        if let Some(stripped) = self.rest.strip_prefix(c) {
            self.rest = stripped;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, c: char) -> Result<(), Error> {
        if self.eat(c) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{}'", c)))
        }
    }

    fn ident(&mut self) -> Result<String, Error> {
        self.skip_ws();
        let end = self
            .rest
            .find(|c: char| !(c.is_alphanumeric() || c == '_' || c == '-'))
            .unwrap_or(self.rest.len());
        if end == 0 {
            return Err(self.error("expected a name"));
        }
        let name = self.rest[..end].to_string();
        self.rest = &self.rest[end..];
        Ok(name)
    }

    fn parse_type(&mut self) -> Result<Type, Error> {
        let base = match self.peek() {
            Some(':') => {
                self.eat(':');
                let name = self.ident()?;
                match name.as_str() {
                    "string" => Type::String,
                    "int" => Type::Int,
                    "float" => Type::Float,
                    "bool" => Type::Bool,
                    "keyword" => Type::Keyword,
                    "any" => Type::Any,
                    "map" => Type::Map,
                    other => return Err(self.error(format!("unknown primitive ':{}'", other))),
                }
            }
            Some('[') => {
                self.eat('[');
                let inner = self.parse_type()?;
                self.expect(']')?;
                Type::List(Box::new(inner))
            }
            Some('{') => {
                self.eat('{');
                let mut fields = Vec::new();
                if !self.eat('}') {
                    loop {
                        let name = self.ident()?;
                        let ty = self.parse_type()?;
                        fields.push(Field { name, ty });
                        if self.eat(',') {
                            continue;
                        }
                        self.expect('}')?;
                        break;
                    }
                }
                Type::Record(fields)
            }
            Some(c) => return Err(self.error(format!("unexpected '{}'", c))),
            None => return Err(self.error("unexpected end of signature")),
        };
        if self.eat('?') {
            Ok(Type::Optional(Box::new(base)))
        } else {
            Ok(base)
        }
    }

    fn parse_params(&mut self) -> Result<Vec<Param>, Error> {
        self.expect('(')?;
        let mut params = Vec::new();
        if self.eat(')') {
            return Ok(params);
        }
        loop {
            let name = self.ident()?;
            let ty = self.parse_type()?;
            params.push(Param { name, ty });
            if self.eat(',') {
                continue;
            }
            self.expect(')')?;
            return Ok(params);
        }
    }
}

/// Parse `(param-list) -> type` or a bare type.
pub fn parse_signature(src: &str) -> Result<Signature, Error> {
    let mut cursor = Cursor::new(src);
    let params = if cursor.peek() == Some('(') {
        let params = cursor.parse_params()?;
        cursor.skip_ws();
        if !cursor.rest.starts_with("->") {
            return Err(cursor.error("expected '->' after parameter list"));
        }
        cursor.rest = &cursor.rest[2..];
        Some(params)
    } else {
        None
    };
    let return_type = cursor.parse_type()?;
    cursor.skip_ws();
    if !cursor.rest.is_empty() {
        return Err(cursor.error(format!("trailing input '{}'", cursor.rest)));
    }
    Ok(Signature { params, return_type })
}

// ============================================================================
// Canonical rendering
// ============================================================================

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::String => write!(f, ":string"),
            Type::Int => write!(f, ":int"),
            Type::Float => write!(f, ":float"),
            Type::Bool => write!(f, ":bool"),
            Type::Keyword => write!(f, ":keyword"),
            Type::Any => write!(f, ":any"),
            Type::Map => write!(f, ":map"),
            Type::List(inner) => write!(f, "[{}]", inner),
            Type::Record(fields) => {
                write!(f, "{{")?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{} {}", field.name, field.ty)?;
                }
                write!(f, "}}")
            }
            Type::Optional(inner) => write!(f, "{}?", inner),
        }
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(params) = &self.params {
            write!(f, "(")?;
            for (i, p) in params.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{} {}", p.name, p.ty)?;
            }
            write!(f, ") -> ")?;
        }
        write!(f, "{}", self.return_type)
    }
}

// ============================================================================
// Input validation (lenient, mode-controlled)
// ============================================================================

/// Validate and coerce a string-keyed argument map against declared
/// params. Returns the (possibly coerced) args plus warnings; coercion
/// warnings are also logged.
pub fn validate_input(
    params: &[Param],
    args: &StrMap,
    mode: ValidationMode,
) -> Result<(StrMap, Vec<String>), Error> {
    if mode == ValidationMode::Disabled {
        return Ok((args.clone(), Vec::new()));
    }
    let mut out = StrMap::new();
    let mut warnings = Vec::new();
    let mut violations = Vec::new();

    for param in params {
        match args.get(&param.name) {
            None => {
                if !matches!(param.ty, Type::Optional(_)) {
                    violations.push(format!("missing required argument '{}'", param.name));
                }
            }
            Some(value) => match coerce(&param.ty, value, &param.name, mode) {
                Ok((coerced, mut ws)) => {
                    warnings.append(&mut ws);
                    out.insert(param.name.clone(), coerced);
                }
                Err(msg) => violations.push(msg),
            },
        }
    }

    for key in args.keys() {
        if params.iter().any(|p| &p.name == key) {
            continue;
        }
        match mode {
            ValidationMode::Strict => violations.push(format!("unexpected argument '{}'", key)),
            _ => {
                // extras pass through untouched
                out.insert(key.clone(), args[key].clone());
            }
        }
    }

    for w in &warnings {
        warn!("signature coercion: {}", w);
    }
    if !violations.is_empty() {
        let message = violations.join("; ");
        if mode == ValidationMode::WarnOnly {
            warnings.push(message);
            // keep undeclared originals so the tool still sees everything
            for (k, v) in args {
                out.entry(k.clone()).or_insert_with(|| v.clone());
            }
            return Ok((out, warnings));
        }
        return Err(Error::new(ErrorKind::ValidationError, message));
    }
    Ok((out, warnings))
}

/// Lenient per-type coercion: `"3"` → int, `"3.14"` → float, `"true"` →
/// bool, int → float. Every coercion yields a warning; in strict mode it
/// is an error instead.
fn coerce(
    ty: &Type,
    value: &Value,
    path: &str,
    mode: ValidationMode,
) -> Result<(Value, Vec<String>), String> {
    let mismatch = |expected: &str| {
        format!("{}: expected {}, got {}", path, expected, value.type_name())
    };
    let coerced_with = |v: Value, note: String, mode: ValidationMode| {
        if mode == ValidationMode::Strict {
            Err(note)
        } else {
            Ok((v, vec![note]))
        }
    };
    match ty {
        Type::Optional(inner) => {
            if matches!(value, Value::Nil) {
                Ok((Value::Nil, Vec::new()))
            } else {
                coerce(inner, value, path, mode)
            }
        }
        Type::Any => Ok((value.clone(), Vec::new())),
        Type::String => match value {
            Value::Str(_) => Ok((value.clone(), Vec::new())),
            _ => Err(mismatch(":string")),
        },
        Type::Int => match value {
            Value::Int(_) => Ok((value.clone(), Vec::new())),
            Value::Str(s) => match s.trim().parse::<i64>() {
                Ok(i) => coerced_with(
                    Value::Int(i),
                    format!("{}: coerced string \"{}\" to :int", path, s),
                    mode,
                ),
                Err(_) => Err(mismatch(":int")),
            },
            _ => Err(mismatch(":int")),
        },
        Type::Float => match value {
            Value::Float(_) => Ok((value.clone(), Vec::new())),
            Value::Int(i) => coerced_with(
                Value::Float(*i as f64),
                format!("{}: coerced int {} to :float", path, i),
                mode,
            ),
            Value::Str(s) => match s.trim().parse::<f64>() {
                Ok(f) => coerced_with(
                    Value::Float(f),
                    format!("{}: coerced string \"{}\" to :float", path, s),
                    mode,
                ),
                Err(_) => Err(mismatch(":float")),
            },
            _ => Err(mismatch(":float")),
        },
        Type::Bool => match value {
            Value::Bool(_) => Ok((value.clone(), Vec::new())),
            Value::Str(s) if s == "true" || s == "false" => coerced_with(
                Value::Bool(s == "true"),
                format!("{}: coerced string \"{}\" to :bool", path, s),
                mode,
            ),
            _ => Err(mismatch(":bool")),
        },
        Type::Keyword => match value {
            Value::Keyword(_) => Ok((value.clone(), Vec::new())),
            _ => Err(mismatch(":keyword")),
        },
        Type::Map => match value {
            Value::Map(_) => Ok((value.clone(), Vec::new())),
            _ => Err(mismatch(":map")),
        },
        Type::List(inner) => match value {
            Value::Vector(items) => {
                let mut out = Vec::with_capacity(items.len());
                let mut warnings = Vec::new();
                for (i, item) in items.iter().enumerate() {
                    let (v, mut ws) = coerce(inner, item, &format!("{}[{}]", path, i), mode)?;
                    warnings.append(&mut ws);
                    out.push(v);
                }
                Ok((Value::Vector(out), warnings))
            }
            _ => Err(mismatch("a list")),
        },
        Type::Record(fields) => match value {
            Value::Map(m) => {
                let mut out = m.clone();
                let mut warnings = Vec::new();
                for field in fields {
                    let key = MapKey::Str(field.name.clone());
                    match flex_get(m, &key) {
                        None => {
                            if !field.is_optional() {
                                return Err(format!("{}.{}: missing required field", path, field.name));
                            }
                        }
                        Some(v) => {
                            let (coerced, mut ws) =
                                coerce(&field.ty, v, &format!("{}.{}", path, field.name), mode)?;
                            warnings.append(&mut ws);
                            out.insert(key, coerced);
                        }
                    }
                }
                Ok((Value::Map(out), warnings))
            }
            _ => Err(mismatch("a map")),
        },
    }
}

// ============================================================================
// Output validation (strict, dotted paths)
// ============================================================================

/// Validate a return value against a declared type. Strict: no coercion,
/// errors carry dotted paths rooted at `return`.
pub fn validate_output(ty: &Type, value: &Value) -> Result<(), Error> {
    check_output(ty, value, "return")
}

fn check_output(ty: &Type, value: &Value, path: &str) -> Result<(), Error> {
    let mismatch = |expected: String| {
        Error::new(
            ErrorKind::ValidationError,
            format!("{}: expected {}, got {}", path, expected, value.type_name()),
        )
    };
    match ty {
        Type::Optional(inner) => match value {
            Value::Nil => Ok(()),
            _ => check_output(inner, value, path),
        },
        Type::Any => Ok(()),
        Type::String => match value {
            Value::Str(_) => Ok(()),
            _ => Err(mismatch(":string".into())),
        },
        Type::Int => match value {
            Value::Int(_) => Ok(()),
            _ => Err(mismatch(":int".into())),
        },
        Type::Float => match value {
            Value::Float(_) => Ok(()),
            _ => Err(mismatch(":float".into())),
        },
        Type::Bool => match value {
            Value::Bool(_) => Ok(()),
            _ => Err(mismatch(":bool".into())),
        },
        Type::Keyword => match value {
            Value::Keyword(_) => Ok(()),
            _ => Err(mismatch(":keyword".into())),
        },
        Type::Map => match value {
            Value::Map(_) => Ok(()),
            _ => Err(mismatch(":map".into())),
        },
        Type::List(inner) => match value {
            Value::Vector(items) => {
                for (i, item) in items.iter().enumerate() {
                    check_output(inner, item, &format!("{}[{}]", path, i))?;
                }
                Ok(())
            }
            _ => Err(mismatch(format!("[{}]", inner))),
        },
        Type::Record(fields) => match value {
            Value::Map(m) => {
                for field in fields {
                    let key = MapKey::Str(field.name.clone());
                    match flex_get(m, &key) {
                        None => {
                            if !field.is_optional() {
                                return Err(Error::new(
                                    ErrorKind::ValidationError,
                                    format!("{}.{}: missing required field", path, field.name),
                                ));
                            }
                        }
                        Some(v) => check_output(&field.ty, v, &format!("{}.{}", path, field.name))?,
                    }
                }
                Ok(())
            }
            _ => Err(mismatch("a map".into())),
        },
    }
}

/// Remove firewalled (`_`-prefixed) fields for prompt rendering and
/// parent-agent views. Runtime data is untouched; this produces a copy.
pub fn strip_firewalled(ty: &Type, value: &Value) -> Value {
    match (ty, value) {
        (Type::Record(fields), Value::Map(m)) => {
            let mut out = crate::value::Map::new();
            for (k, v) in m {
                let field = fields.iter().find(|f| f.name == k.name());
                match field {
                    Some(f) if f.is_firewalled() => continue,
                    Some(f) => {
                        out.insert(k.clone(), strip_firewalled(&f.ty, v));
                    }
                    None => {
                        out.insert(k.clone(), v.clone());
                    }
                }
            }
            Value::Map(out)
        }
        (Type::List(inner), Value::Vector(items)) => {
            Value::Vector(items.iter().map(|v| strip_firewalled(inner, v)).collect())
        }
        (Type::Optional(inner), v) => strip_firewalled(inner, v),
        _ => value.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Map;

    fn record(src: &str) -> Type {
        parse_signature(src).unwrap().return_type
    }

    #[test]
    fn test_parse_bare_type() {
        let sig = parse_signature("{count :int, _ids [:int]}").unwrap();
        assert!(sig.params.is_none());
        match sig.return_type {
            Type::Record(fields) => {
                assert_eq!(fields.len(), 2);
                assert!(!fields[0].is_firewalled());
                assert!(fields[1].is_firewalled());
                assert_eq!(fields[1].ty, Type::List(Box::new(Type::Int)));
            }
            other => panic!("expected record, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_params_and_optional() {
        let sig = parse_signature("(query :string, limit :int?) -> [{id :int}]").unwrap();
        let params = sig.params.unwrap();
        assert_eq!(params.len(), 2);
        assert!(matches!(params[1].ty, Type::Optional(_)));
    }

    #[test]
    fn test_parse_empty_params() {
        let sig = parse_signature("() -> :map").unwrap();
        assert_eq!(sig.params.as_deref(), Some(&[][..]));
        assert_eq!(sig.return_type, Type::Map);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_signature("(id :").is_err());
        assert!(parse_signature(":integer").is_err());
        assert!(parse_signature("{a :int} extra").is_err());
    }

    #[test]
    fn test_canonical_round_trip() {
        for src in [
            "(a :int, b [:string]) -> {count :int, _ids [:int]}",
            "{name :string, tags [:keyword]?}",
            ":float",
            "() -> :any",
        ] {
            let sig = parse_signature(src).unwrap();
            let rendered = sig.to_string();
            let reparsed = parse_signature(&rendered).unwrap();
            assert_eq!(sig, reparsed, "round trip failed for {}", src);
        }
    }

    #[test]
    fn test_output_validation_paths() {
        let ty = record("{results [{customer {id :int}}]}");
        let mut customer = Map::new();
        customer.insert(MapKey::Keyword("id".into()), Value::Str("7".into()));
        let mut entry = Map::new();
        entry.insert(MapKey::Keyword("customer".into()), Value::Map(customer));
        let mut top = Map::new();
        top.insert(MapKey::Keyword("results".into()), Value::Vector(vec![Value::Map(entry)]));

        let err = validate_output(&ty, &Value::Map(top)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ValidationError);
        assert!(err.message.contains("return.results[0].customer.id"));
    }

    #[test]
    fn test_output_validation_is_strict() {
        // no int → float coercion on output
        let err = validate_output(&record(":float"), &Value::Int(3)).unwrap_err();
        assert!(err.message.contains(":float"));
    }

    #[test]
    fn test_output_optional_fields() {
        let ty = record("{count :int, note :string?}");
        let mut m = Map::new();
        m.insert(MapKey::Keyword("count".into()), Value::Int(3));
        assert!(validate_output(&ty, &Value::Map(m)).is_ok());
    }

    #[test]
    fn test_input_coercion_warns() {
        let params = vec![
            Param { name: "n".into(), ty: Type::Int },
            Param { name: "rate".into(), ty: Type::Float },
        ];
        let mut args = StrMap::new();
        args.insert("n".into(), Value::Str("3".into()));
        args.insert("rate".into(), Value::Int(2));
        let (out, warnings) = validate_input(&params, &args, ValidationMode::Enabled).unwrap();
        assert_eq!(out.get("n"), Some(&Value::Int(3)));
        assert_eq!(out.get("rate"), Some(&Value::Float(2.0)));
        assert_eq!(warnings.len(), 2);
    }

    #[test]
    fn test_input_missing_required() {
        let params = vec![Param { name: "id".into(), ty: Type::Int }];
        let args = StrMap::new();
        let err = validate_input(&params, &args, ValidationMode::Enabled).unwrap_err();
        assert!(err.message.contains("missing required argument 'id'"));
        // warn_only demotes to a warning
        let (_, warnings) = validate_input(&params, &args, ValidationMode::WarnOnly).unwrap();
        assert!(!warnings.is_empty());
    }

    #[test]
    fn test_input_extras_by_mode() {
        let params = vec![Param { name: "id".into(), ty: Type::Int }];
        let mut args = StrMap::new();
        args.insert("id".into(), Value::Int(1));
        args.insert("extra".into(), Value::Int(9));
        // enabled keeps extras
        let (out, _) = validate_input(&params, &args, ValidationMode::Enabled).unwrap();
        assert!(out.contains_key("extra"));
        // strict rejects them
        assert!(validate_input(&params, &args, ValidationMode::Strict).is_err());
    }

    #[test]
    fn test_strict_rejects_coercion() {
        let params = vec![Param { name: "n".into(), ty: Type::Int }];
        let mut args = StrMap::new();
        args.insert("n".into(), Value::Str("3".into()));
        assert!(validate_input(&params, &args, ValidationMode::Strict).is_err());
    }

    #[test]
    fn test_strip_firewalled() {
        let ty = record("{count :int, _ids [:int]}");
        let mut m = Map::new();
        m.insert(MapKey::Keyword("count".into()), Value::Int(3));
        m.insert(MapKey::Keyword("_ids".into()), Value::Vector(vec![Value::Int(1)]));
        let stripped = strip_firewalled(&ty, &Value::Map(m));
        match stripped {
            Value::Map(m) => {
                assert!(m.contains_key(&MapKey::Keyword("count".into())));
                assert!(!m.contains_key(&MapKey::Keyword("_ids".into())));
            }
            other => panic!("expected map, got {:?}", other),
        }
    }
}
