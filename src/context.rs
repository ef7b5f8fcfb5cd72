// ABOUTME: Static context filtering based on referenced data keys

use crate::ast::{Node, NodeKind, Pattern, TaskId};
use crate::value::{Map, Value};
use log::debug;
use std::collections::HashSet;

/// Collect every `data/*` / `ctx/*` key the program references.
pub fn referenced_data_keys(program: &Node) -> HashSet<String> {
    let mut keys = HashSet::new();
    walk(program, &mut |node| {
        if let NodeKind::Data(key) = &node.kind {
            keys.insert(key.clone());
        }
    });
    keys
}

/// Drop collection-valued context entries the program never mentions.
/// Scalars are always kept; they are cheap and often feed templates.
pub fn filter_context(ctx: &Map, referenced: &HashSet<String>) -> Map {
    let filtered: Map = ctx
        .iter()
        .filter(|(key, value)| {
            let is_collection = matches!(value, Value::Vector(_) | Value::Map(_) | Value::Set(_));
            !is_collection || referenced.contains(key.name())
        })
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    if filtered.len() != ctx.len() {
        debug!("context filter kept {} of {} keys", filtered.len(), ctx.len());
    }
    filtered
}

fn walk(node: &Node, f: &mut impl FnMut(&Node)) {
    f(node);
    match &node.kind {
        NodeKind::Literal(_)
        | NodeKind::Var(_)
        | NodeKind::Data(_)
        | NodeKind::MemoryRef(_)
        | NodeKind::VarQuote(_)
        | NodeKind::BudgetRemaining
        | NodeKind::TurnHistory(_) => {}
        NodeKind::Vector(children) | NodeKind::SetLit(children) | NodeKind::Do(children)
        | NodeKind::And(children) | NodeKind::Or(children) | NodeKind::Recur(children)
        | NodeKind::Juxt(children) | NodeKind::Pcalls(children) => {
            for child in children {
                walk(child, f);
            }
        }
        NodeKind::MapLit(pairs) => {
            for (k, v) in pairs {
                walk(k, f);
                walk(v, f);
            }
        }
        NodeKind::Let { bindings, body } | NodeKind::Loop { bindings, body } => {
            for (pattern, value) in bindings {
                walk_pattern(pattern, f);
                walk(value, f);
            }
            for child in body {
                walk(child, f);
            }
        }
        NodeKind::Fn { body, params, rest, .. } => {
            for p in params.iter() {
                walk_pattern(p, f);
            }
            if let Some(r) = rest {
                walk_pattern(r, f);
            }
            for child in body.iter() {
                walk(child, f);
            }
        }
        NodeKind::Call { target, args } => {
            walk(target, f);
            for arg in args {
                walk(arg, f);
            }
        }
        NodeKind::ToolCall { args, .. } => {
            for arg in args {
                walk(arg, f);
            }
        }
        NodeKind::If { cond, then, els } => {
            walk(cond, f);
            walk(then, f);
            walk(els, f);
        }
        NodeKind::Def { value, .. } => walk(value, f),
        NodeKind::Return(inner) | NodeKind::Fail(inner) | NodeKind::TaskReset { id: inner } => {
            walk(inner, f);
        }
        NodeKind::Where { value, .. } => {
            if let Some(value) = value {
                walk(value, f);
            }
        }
        NodeKind::PredCombinator { preds, .. } => {
            for p in preds {
                walk(p, f);
            }
        }
        NodeKind::Pmap { f: func, coll } => {
            walk(func, f);
            walk(coll, f);
        }
        NodeKind::Task { id, body } => {
            if let TaskId::Dynamic(id) = id {
                walk(id, f);
            }
            for child in body {
                walk(child, f);
            }
        }
        NodeKind::StepDone { id, summary } => {
            walk(id, f);
            walk(summary, f);
        }
    }
}

fn walk_pattern(pattern: &Pattern, f: &mut impl FnMut(&Node)) {
    match pattern {
        Pattern::Var(_) => {}
        Pattern::Seq { items, rest, .. } => {
            for item in items {
                walk_pattern(item, f);
            }
            if let Some(rest) = rest {
                walk_pattern(rest, f);
            }
        }
        Pattern::MapKeys { entries, .. } => {
            for entry in entries {
                if let Some(default) = &entry.default {
                    walk(default, f);
                }
            }
        }
    }
}
