// ABOUTME: Reader producing a raw syntax tree from UTF-8 source text

use crate::error::{Error, ErrorKind};
use nom::bytes::complete::take_while;
use nom::Offset;
use unicode_segmentation::UnicodeSegmentation;

/// A raw form with the source position of its first character.
#[derive(Debug, Clone, PartialEq)]
pub struct Form {
    pub kind: FormKind,
    pub line: u32,
    pub col: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FormKind {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    /// Character literal, stored as its one-grapheme string.
    Char(String),
    Keyword(String),
    Symbol(String),
    List(Vec<Form>),
    Vector(Vec<Form>),
    /// Flat key/value sequence; evenness is checked at parse time.
    Map(Vec<Form>),
    Set(Vec<Form>),
    /// `#(...)` body forms, lowered to `fn` by the analyzer.
    Lambda(Vec<Form>),
    /// `#'name`.
    VarQuote(String),
}

const NAMED_CHARS: &[(&str, &str)] = &[
    ("newline", "\n"),
    ("space", " "),
    ("tab", "\t"),
    ("return", "\r"),
    ("backspace", "\u{8}"),
    ("formfeed", "\u{c}"),
];

fn is_symbol_char(c: char) -> bool {
    c.is_alphanumeric()
        || matches!(c, '+' | '-' | '*' | '/' | '_' | '!' | '?' | '<' | '>' | '=' | '.' | '%' | '&' | '$' | '\'')
}

/// Whitespace includes comma; comments run from `;` to end of line.
fn skip_ws(input: &str) -> &str {
    let mut rest = input;
    loop {
        let trimmed = rest.trim_start_matches(|c: char| c.is_whitespace() || c == ',');
        if let Some(stripped) = trimmed.strip_prefix(';') {
            rest = match stripped.find('\n') {
                Some(i) => &stripped[i + 1..],
                None => "",
            };
        } else if trimmed.len() == rest.len() {
            return rest;
        } else {
            rest = trimmed;
        }
    }
}

struct Reader<'a> {
    src: &'a str,
}

impl<'a> Reader<'a> {
    fn pos(&self, rest: &str) -> (u32, u32) {
        let offset = self.src.offset(rest);
        let before = &self.src[..offset];
        let line = before.matches('\n').count() as u32 + 1;
        let col = match before.rfind('\n') {
            Some(i) => before[i + 1..].chars().count() as u32 + 1,
            None => before.chars().count() as u32 + 1,
        };
        (line, col)
    }

    fn err(&self, rest: &str, msg: impl Into<String>) -> Error {
        let (line, col) = self.pos(rest);
        Error::at(ErrorKind::ParseError, msg, line, col)
    }

    fn parse_expr(&self, input: &'a str, in_lambda: bool) -> Result<(&'a str, Form), Error> {
        let input = skip_ws(input);
        let (line, col) = self.pos(input);
        let mut chars = input.chars();
        let first = chars
            .next()
            .ok_or_else(|| self.err(input, "unexpected end of input"))?;

        let form = |kind| Form { kind, line, col };

        match first {
            '(' => {
                let (rest, items) = self.parse_seq(&input[1..], input, ')', in_lambda)?;
                Ok((rest, form(FormKind::List(items))))
            }
            '[' => {
                let (rest, items) = self.parse_seq(&input[1..], input, ']', in_lambda)?;
                Ok((rest, form(FormKind::Vector(items))))
            }
            '{' => {
                let (rest, items) = self.parse_seq(&input[1..], input, '}', in_lambda)?;
                if items.len() % 2 != 0 {
                    return Err(self.err(input, "map literal requires an even number of forms"));
                }
                Ok((rest, form(FormKind::Map(items))))
            }
            '#' => match chars.next() {
                Some('{') => {
                    let (rest, items) = self.parse_seq(&input[2..], input, '}', in_lambda)?;
                    Ok((rest, form(FormKind::Set(items))))
                }
                Some('(') => {
                    if in_lambda {
                        return Err(self.err(input, "nested #(...) is not supported"));
                    }
                    let (rest, items) = self.parse_seq(&input[2..], input, ')', true)?;
                    Ok((rest, form(FormKind::Lambda(items))))
                }
                Some('\'') => {
                    let after = &input[2..];
                    let (rest, token) = take_token(after);
                    if token.is_empty() {
                        return Err(self.err(input, "#' must be followed by a symbol"));
                    }
                    Ok((rest, form(FormKind::VarQuote(token.to_string()))))
                }
                _ => Err(self.err(input, "unsupported reader macro after '#'")),
            },
            '"' => self.parse_string(input).map(|(rest, s)| (rest, form(FormKind::Str(s)))),
            '\\' => self.parse_char(input).map(|(rest, c)| (rest, form(FormKind::Char(c)))),
            ':' => self.parse_keyword(input).map(|(rest, k)| (rest, form(FormKind::Keyword(k)))),
            ')' | ']' | '}' => Err(self.err(input, format!("unexpected '{}'", first))),
            _ => self.parse_atom(input).map(|(rest, kind)| (rest, form(kind))),
        }
    }

    /// Parse forms until the closing delimiter; the opening delimiter has
    /// already been consumed. `open_at` points at it for error reporting.
    fn parse_seq(
        &self,
        mut input: &'a str,
        open_at: &'a str,
        close: char,
        in_lambda: bool,
    ) -> Result<(&'a str, Vec<Form>), Error> {
        let mut items = Vec::new();
        loop {
            input = skip_ws(input);
            match input.chars().next() {
                None => {
                    return Err(self.err(open_at, format!("unbalanced delimiter: expected '{}'", close)));
                }
                Some(c) if c == close => return Ok((&input[c.len_utf8()..], items)),
                Some(c) if matches!(c, ')' | ']' | '}') => {
                    return Err(self.err(input, format!("mismatched delimiter: expected '{}', found '{}'", close, c)));
                }
                Some(_) => {
                    let (rest, item) = self.parse_expr(input, in_lambda)?;
                    items.push(item);
                    input = rest;
                }
            }
        }
    }

    fn parse_string(&self, input: &'a str) -> Result<(&'a str, String), Error> {
        let mut out = String::new();
        let mut chars = input[1..].char_indices();
        while let Some((i, c)) = chars.next() {
            match c {
                '"' => return Ok((&input[1 + i + 1..], out)),
                '\n' => return Err(self.err(input, "multi-line strings are not supported")),
                '\\' => match chars.next() {
                    Some((_, '\\')) => out.push('\\'),
                    Some((_, '"')) => out.push('"'),
                    Some((_, 'n')) => out.push('\n'),
                    Some((_, 't')) => out.push('\t'),
                    Some((_, 'r')) => out.push('\r'),
                    Some((_, other)) => {
                        return Err(self.err(input, format!("invalid escape '\\{}'", other)));
                    }
                    None => return Err(self.err(input, "unterminated string")),
                },
                other => out.push(other),
            }
        }
        Err(self.err(input, "unterminated string"))
    }

    fn parse_char(&self, input: &'a str) -> Result<(&'a str, String), Error> {
        let after = &input[1..];
        let (rest, token) = take_token(after);
        if token.is_empty() {
            // a single delimiter grapheme is still a valid character
            let mut graphemes = after.grapheme_indices(true);
            return match graphemes.next() {
                Some((_, g)) if !g.contains('\n') => Ok((&after[g.len()..], g.to_string())),
                _ => Err(self.err(input, "invalid character literal")),
            };
        }
        if let Some((_, replacement)) = NAMED_CHARS.iter().find(|(name, _)| *name == token) {
            return Ok((rest, replacement.to_string()));
        }
        let mut graphemes = token.graphemes(true);
        match (graphemes.next(), graphemes.next()) {
            (Some(g), None) => Ok((rest, g.to_string())),
            _ => Err(self.err(input, format!("invalid character literal '\\{}'", token))),
        }
    }

    fn parse_keyword(&self, input: &'a str) -> Result<(&'a str, String), Error> {
        let after = &input[1..];
        let (rest, token) = take_token(after);
        if token.is_empty() {
            return Err(self.err(input, "':' must be followed by a name"));
        }
        if token.contains('/') {
            return Err(self.err(input, "keyword namespaces are not supported"));
        }
        Ok((rest, token.to_string()))
    }

    fn parse_atom(&self, input: &'a str) -> Result<(&'a str, FormKind), Error> {
        let (rest, token) = take_token(input);
        if token.is_empty() {
            let c = input.chars().next().unwrap_or(' ');
            return Err(self.err(input, format!("unexpected character '{}'", c)));
        }
        match token {
            "nil" => return Ok((rest, FormKind::Nil)),
            "true" => return Ok((rest, FormKind::Bool(true))),
            "false" => return Ok((rest, FormKind::Bool(false))),
            _ => {}
        }
        if looks_numeric(token) {
            return match classify_number(token) {
                Some(kind) => Ok((rest, kind)),
                None => Err(self.err(input, format!("invalid number '{}'", token))),
            };
        }
        let slashes = token.matches('/').count();
        if slashes > 1 || (slashes == 1 && token != "/" && token.split('/').any(str::is_empty)) {
            return Err(self.err(input, format!("invalid symbol '{}'", token)));
        }
        Ok((rest, FormKind::Symbol(token.to_string())))
    }
}

fn take_token(input: &str) -> (&str, &str) {
    let (rest, token) =
        take_while::<_, _, nom::error::Error<&str>>(is_symbol_char)(input).unwrap_or((input, ""));
    (rest, token)
}

/// Tokenization precedence puts numbers before symbols: a token that
/// starts with a digit, or a sign followed by a digit or dot, is a number
/// candidate and never a symbol.
fn looks_numeric(token: &str) -> bool {
    let mut chars = token.chars();
    match chars.next() {
        Some(c) if c.is_ascii_digit() => true,
        Some('+') | Some('-') => matches!(chars.next(), Some(c) if c.is_ascii_digit() || c == '.'),
        Some('.') => matches!(chars.next(), Some(c) if c.is_ascii_digit()),
        _ => false,
    }
}

fn classify_number(token: &str) -> Option<FormKind> {
    let body = token.strip_prefix(['+', '-']).unwrap_or(token);
    let is_float = body.contains('.') || body.contains(['e', 'E']);
    if !is_float {
        if !body.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        // integer literals beyond i64 lower to floats
        return match token.parse::<i64>() {
            Ok(i) => Some(FormKind::Int(i)),
            Err(_) => token.parse::<f64>().ok().map(FormKind::Float),
        };
    }
    let valid = {
        let (mantissa, exponent) = match body.split_once(['e', 'E']) {
            Some((m, e)) => (m, Some(e)),
            None => (body, None),
        };
        let mantissa_ok = match mantissa.split_once('.') {
            Some((whole, frac)) => {
                (!whole.is_empty() || !frac.is_empty())
                    && whole.chars().all(|c| c.is_ascii_digit())
                    && frac.chars().all(|c| c.is_ascii_digit())
            }
            None => !mantissa.is_empty() && mantissa.chars().all(|c| c.is_ascii_digit()),
        };
        let exponent_ok = exponent.is_none_or(|e| {
            let e = e.strip_prefix(['+', '-']).unwrap_or(e);
            !e.is_empty() && e.chars().all(|c| c.is_ascii_digit())
        });
        mantissa_ok && exponent_ok
    };
    if !valid {
        return None;
    }
    token.parse::<f64>().ok().map(FormKind::Float)
}

/// Parse a whole program: any number of top-level forms.
pub fn parse_program(src: &str) -> Result<Vec<Form>, Error> {
    let reader = Reader { src };
    let mut forms = Vec::new();
    let mut input = src;
    loop {
        input = skip_ws(input);
        if input.is_empty() {
            return Ok(forms);
        }
        let (rest, form) = reader.parse_expr(input, false)?;
        forms.push(form);
        input = rest;
    }
}
