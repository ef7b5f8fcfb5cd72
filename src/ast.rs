// ABOUTME: Core AST emitted by the analyzer and walked by the evaluator

use crate::value::{MapKey, Value};
use std::sync::Arc;

/// A node of the analyzed program. Nodes are immutable after construction;
/// function bodies are shared via `Arc` so closure creation is cheap.
#[derive(Debug, Clone)]
pub struct Node {
    pub kind: NodeKind,
    pub line: u32,
    pub col: u32,
}

impl Node {
    pub fn new(kind: NodeKind, line: u32, col: u32) -> Self {
        Node { kind, line, col }
    }
}

#[derive(Debug, Clone)]
pub enum NodeKind {
    /// Self-evaluating literal: nil, booleans, numbers, strings,
    /// characters, keywords.
    Literal(Value),
    /// Plain symbol resolved at runtime: local env, then memory, then
    /// builtins.
    Var(String),
    /// `ctx/key` or `data/key`.
    Data(String),
    /// `memory/key`: forced user-namespace lookup.
    MemoryRef(String),
    /// `#'name` var-reference literal.
    VarQuote(String),
    Vector(Vec<Node>),
    MapLit(Vec<(Node, Node)>),
    SetLit(Vec<Node>),
    Let {
        bindings: Vec<(Pattern, Node)>,
        body: Vec<Node>,
    },
    Fn {
        name: Option<String>,
        params: Arc<Vec<Pattern>>,
        rest: Option<Arc<Pattern>>,
        body: Arc<Vec<Node>>,
    },
    Call {
        target: Box<Node>,
        args: Vec<Node>,
    },
    ToolCall {
        name: String,
        args: Vec<Node>,
    },
    If {
        cond: Box<Node>,
        then: Box<Node>,
        els: Box<Node>,
    },
    Do(Vec<Node>),
    And(Vec<Node>),
    Or(Vec<Node>),
    Def {
        name: String,
        value: Box<Node>,
        doc: Option<String>,
    },
    Loop {
        bindings: Vec<(Pattern, Node)>,
        body: Vec<Node>,
    },
    Recur(Vec<Node>),
    Return(Box<Node>),
    Fail(Box<Node>),
    Where {
        path: Vec<MapKey>,
        op: Option<WhereOp>,
        value: Option<Box<Node>>,
    },
    PredCombinator {
        kind: CombKind,
        preds: Vec<Node>,
    },
    Juxt(Vec<Node>),
    Pmap {
        f: Box<Node>,
        coll: Box<Node>,
    },
    Pcalls(Vec<Node>),
    Task {
        id: TaskId,
        body: Vec<Node>,
    },
    StepDone {
        id: Box<Node>,
        summary: Box<Node>,
    },
    TaskReset {
        id: Box<Node>,
    },
    BudgetRemaining,
    /// `*1` / `*2` / `*3` (1-based index into the turn history).
    TurnHistory(u8),
}

/// Task ids are usually literals so repeated turns hit the journal; a
/// computed id flows through the dynamic variant.
#[derive(Debug, Clone)]
pub enum TaskId {
    Literal(String),
    Dynamic(Box<Node>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WhereOp {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
    In,
    Includes,
}

impl WhereOp {
    pub fn from_symbol(sym: &str) -> Option<WhereOp> {
        match sym {
            "=" => Some(WhereOp::Eq),
            "not=" => Some(WhereOp::Ne),
            ">" => Some(WhereOp::Gt),
            "<" => Some(WhereOp::Lt),
            ">=" => Some(WhereOp::Ge),
            "<=" => Some(WhereOp::Le),
            "in" => Some(WhereOp::In),
            "includes" => Some(WhereOp::Includes),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WhereOp::Eq => "=",
            WhereOp::Ne => "not=",
            WhereOp::Gt => ">",
            WhereOp::Lt => "<",
            WhereOp::Ge => ">=",
            WhereOp::Le => "<=",
            WhereOp::In => "in",
            WhereOp::Includes => "includes",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CombKind {
    All,
    Any,
    None,
}

/// Binding patterns produced by destructuring lowering.
#[derive(Debug, Clone)]
pub enum Pattern {
    Var(String),
    /// `[a b]`, `[a & more]`, `[a b :as all]`.
    Seq {
        items: Vec<Pattern>,
        rest: Option<Box<Pattern>>,
        as_name: Option<String>,
    },
    /// `{:keys [a b] :or {...} :as m}` and rename form `{x :px}`.
    MapKeys {
        entries: Vec<MapEntryPattern>,
        as_name: Option<String>,
    },
}

#[derive(Debug, Clone)]
pub struct MapEntryPattern {
    /// Local name introduced by the binding.
    pub local: String,
    /// Key looked up in the value (keyword↔string tolerant).
    pub key: MapKey,
    /// `:or` default, evaluated only when the key is absent.
    pub default: Option<Node>,
}

impl Pattern {
    /// Collect every name the pattern introduces, in binding order.
    pub fn bound_names(&self, out: &mut Vec<String>) {
        match self {
            Pattern::Var(name) => out.push(name.clone()),
            Pattern::Seq { items, rest, as_name } => {
                for item in items {
                    item.bound_names(out);
                }
                if let Some(rest) = rest {
                    rest.bound_names(out);
                }
                if let Some(name) = as_name {
                    out.push(name.clone());
                }
            }
            Pattern::MapKeys { entries, as_name } => {
                for entry in entries {
                    out.push(entry.local.clone());
                }
                if let Some(name) = as_name {
                    out.push(name.clone());
                }
            }
        }
    }
}
