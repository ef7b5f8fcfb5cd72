// ABOUTME: Error taxonomy for parse, analysis, and evaluation failures

use crate::value::Value;
use serde::Serialize;
use thiserror::Error;

/// Reason tags for every error the runtime can produce. Signals
/// (`return`/`fail`) are not errors and never carry one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ParseError,
    AnalysisError,
    InvalidArity,
    UnboundVar,
    NotCallable,
    TypeError,
    ArithmeticError,
    ValidationError,
    UnknownTool,
    InvalidToolArgs,
    ToolError,
    DestructureError,
    SymbolLimitExceeded,
    Timeout,
    MemoryExceeded,
    MaxIterationsExceeded,
    RegexLimitExceeded,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ParseError => "parse_error",
            ErrorKind::AnalysisError => "analysis_error",
            ErrorKind::InvalidArity => "invalid_arity",
            ErrorKind::UnboundVar => "unbound_var",
            ErrorKind::NotCallable => "not_callable",
            ErrorKind::TypeError => "type_error",
            ErrorKind::ArithmeticError => "arithmetic_error",
            ErrorKind::ValidationError => "validation_error",
            ErrorKind::UnknownTool => "unknown_tool",
            ErrorKind::InvalidToolArgs => "invalid_tool_args",
            ErrorKind::ToolError => "tool_error",
            ErrorKind::DestructureError => "destructure_error",
            ErrorKind::SymbolLimitExceeded => "symbol_limit_exceeded",
            ErrorKind::Timeout => "timeout",
            ErrorKind::MemoryExceeded => "memory_exceeded",
            ErrorKind::MaxIterationsExceeded => "max_iterations_exceeded",
            ErrorKind::RegexLimitExceeded => "regex_limit_exceeded",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tagged error: reason plus a message rendered for the LLM feedback
/// loop, with the failing construct's source position where available.
#[derive(Error, Debug, Clone)]
#[error("{}", self.render())]
pub struct Error {
    pub kind: ErrorKind,
    pub message: String,
    pub line: Option<u32>,
    pub col: Option<u32>,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Error {
            kind,
            message: message.into(),
            line: None,
            col: None,
        }
    }

    pub fn at(kind: ErrorKind, message: impl Into<String>, line: u32, col: u32) -> Self {
        Error {
            kind,
            message: message.into(),
            line: Some(line),
            col: Some(col),
        }
    }

    pub fn with_pos(mut self, line: u32, col: u32) -> Self {
        if self.line.is_none() {
            self.line = Some(line);
            self.col = Some(col);
        }
        self
    }

    /// Type mismatch with function context, e.g. `sum-by: expected number,
    /// got string`.
    pub fn type_error(function: &str, expected: &str, actual: &Value) -> Self {
        Error::new(
            ErrorKind::TypeError,
            format!("{}: expected {}, got {}", function, expected, actual.type_name()),
        )
    }

    /// Wrong argument count for a call or special form.
    pub fn arity(function: &str, expected: impl Into<String>, actual: usize) -> Self {
        let expected = expected.into();
        let plural = if expected == "1" { "" } else { "s" };
        Error::new(
            ErrorKind::InvalidArity,
            format!("{}: expected {} argument{}, got {}", function, expected, plural, actual),
        )
    }

    pub fn analysis(message: impl Into<String>) -> Self {
        Error::new(ErrorKind::AnalysisError, message)
    }

    pub fn unbound(name: &str) -> Self {
        Error::new(ErrorKind::UnboundVar, format!("Unbound symbol: {}", name))
    }

    /// `type: Message`, with the source position appended when known.
    pub fn render(&self) -> String {
        match (self.line, self.col) {
            (Some(line), Some(col)) => {
                format!("{}: {} (line {}, col {})", self.kind, self.message, line, col)
            }
            _ => format!("{}: {}", self.kind, self.message),
        }
    }
}
