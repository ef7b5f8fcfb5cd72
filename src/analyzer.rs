// ABOUTME: Semantic analysis and desugaring from raw forms to the Core AST

use crate::ast::{CombKind, MapEntryPattern, Node, NodeKind, Pattern, TaskId, WhereOp};
use crate::builtins::{self, NsResolution};
use crate::error::{Error, ErrorKind};
use crate::parser::{Form, FormKind};
use crate::value::{MapKey, Value};
use log::debug;
use std::collections::HashSet;
use std::sync::Arc;

/// Form heads handled by the analyzer rather than by function application.
pub const SPECIAL_FORMS: &[&str] = &[
    "let", "fn", "defn", "def", "if", "when", "cond", "if-let", "when-let", "do", "and", "or",
    "->", "->>", "loop", "recur", "return", "fail", "where", "all-of", "any-of", "none-of",
    "juxt", "pmap", "pcalls", "task", "step-done", "task-reset",
];

/// Analyze a parsed program. `memory_keys` are the names already present
/// in the user namespace, allowed as free symbols; `max_symbols` is the
/// pre-execution symbol budget.
pub fn analyze_program(
    forms: &[Form],
    memory_keys: &HashSet<String>,
    max_symbols: usize,
) -> Result<Node, Error> {
    check_symbol_budget(forms, max_symbols)?;
    let mut analyzer = Analyzer {
        memory: memory_keys,
        scopes: Vec::new(),
        defs: HashSet::new(),
        binders: Vec::new(),
    };
    let mut nodes = Vec::with_capacity(forms.len());
    for form in forms {
        nodes.push(analyzer.analyze(form)?);
    }
    debug!("analysis complete: {} top-level form(s)", nodes.len());
    match nodes.len() {
        0 => Ok(Node::new(NodeKind::Literal(Value::Nil), 1, 1)),
        1 => Ok(nodes.pop().unwrap()),
        _ => Ok(Node::new(NodeKind::Do(nodes), 1, 1)),
    }
}

fn check_symbol_budget(forms: &[Form], max_symbols: usize) -> Result<(), Error> {
    fn collect<'a>(form: &'a Form, seen: &mut HashSet<&'a str>) {
        match &form.kind {
            FormKind::Symbol(s) | FormKind::Keyword(s) | FormKind::VarQuote(s) => {
                seen.insert(s.as_str());
            }
            FormKind::List(xs)
            | FormKind::Vector(xs)
            | FormKind::Map(xs)
            | FormKind::Set(xs)
            | FormKind::Lambda(xs) => {
                for x in xs {
                    collect(x, seen);
                }
            }
            _ => {}
        }
    }
    let mut seen = HashSet::new();
    for form in forms {
        collect(form, &mut seen);
    }
    if seen.len() > max_symbols {
        return Err(Error::new(
            ErrorKind::SymbolLimitExceeded,
            format!(
                "program uses {} distinct symbols/keywords (limit {})",
                seen.len(),
                max_symbols
            ),
        ));
    }
    Ok(())
}

struct Analyzer<'a> {
    memory: &'a HashSet<String>,
    /// Lexical frames opened by let/fn/loop.
    scopes: Vec<HashSet<String>>,
    /// Names introduced by `def`, threaded forward to permit recursion.
    defs: HashSet<String>,
    /// recur targets: arity of each enclosing loop/fn binder.
    binders: Vec<usize>,
}

impl<'a> Analyzer<'a> {
    fn analyze(&mut self, form: &Form) -> Result<Node, Error> {
        let node = |kind| Node::new(kind, form.line, form.col);
        match &form.kind {
            FormKind::Nil => Ok(node(NodeKind::Literal(Value::Nil))),
            FormKind::Bool(b) => Ok(node(NodeKind::Literal(Value::Bool(*b)))),
            FormKind::Int(i) => Ok(node(NodeKind::Literal(Value::Int(*i)))),
            FormKind::Float(f) => Ok(node(NodeKind::Literal(Value::Float(*f)))),
            FormKind::Str(s) => Ok(node(NodeKind::Literal(Value::Str(s.clone())))),
            FormKind::Char(c) => Ok(node(NodeKind::Literal(Value::Str(c.clone())))),
            FormKind::Keyword(k) => Ok(node(NodeKind::Literal(Value::Keyword(k.clone())))),
            FormKind::Symbol(s) => self.analyze_symbol(s, form),
            FormKind::VarQuote(name) => {
                if name.contains('/') {
                    return Err(self.fail(form, format!("#'{} must name a plain symbol", name)));
                }
                Ok(node(NodeKind::VarQuote(name.clone())))
            }
            FormKind::Vector(items) => {
                let children = self.analyze_all(items)?;
                Ok(node(NodeKind::Vector(children)))
            }
            FormKind::Map(items) => {
                let mut pairs = Vec::with_capacity(items.len() / 2);
                for pair in items.chunks(2) {
                    pairs.push((self.analyze(&pair[0])?, self.analyze(&pair[1])?));
                }
                Ok(node(NodeKind::MapLit(pairs)))
            }
            FormKind::Set(items) => {
                let children = self.analyze_all(items)?;
                Ok(node(NodeKind::SetLit(children)))
            }
            FormKind::Lambda(items) => self.analyze_lambda(items, form),
            FormKind::List(items) => self.analyze_list(items, form),
        }
    }

    fn analyze_all(&mut self, forms: &[Form]) -> Result<Vec<Node>, Error> {
        forms.iter().map(|f| self.analyze(f)).collect()
    }

    /// Analyze a body with an implicit `do`; empty bodies evaluate to nil.
    fn analyze_body(&mut self, forms: &[Form]) -> Result<Vec<Node>, Error> {
        if forms.is_empty() {
            return Ok(vec![Node::new(NodeKind::Literal(Value::Nil), 0, 0)]);
        }
        self.analyze_all(forms)
    }

    fn fail(&self, form: &Form, msg: impl Into<String>) -> Error {
        Error::at(ErrorKind::AnalysisError, msg, form.line, form.col)
    }

    fn in_scope(&self, name: &str) -> bool {
        self.scopes.iter().any(|frame| frame.contains(name))
            || self.defs.contains(name)
            || self.memory.contains(name)
    }

    fn analyze_symbol(&mut self, name: &str, form: &Form) -> Result<Node, Error> {
        let node = |kind| Node::new(kind, form.line, form.col);
        if let Some(rest) = name.strip_prefix('%') {
            // placeholders were rewritten to %1..%N inside #(...); anything
            // left unbound escaped a lambda body
            if !self.in_scope(name) {
                return Err(self.fail(
                    form,
                    format!("placeholder '%{}' is only valid inside #(...)", rest),
                ));
            }
            return Ok(node(NodeKind::Var(name.to_string())));
        }
        match name {
            "*1" => return Ok(node(NodeKind::TurnHistory(1))),
            "*2" => return Ok(node(NodeKind::TurnHistory(2))),
            "*3" => return Ok(node(NodeKind::TurnHistory(3))),
            "ctx" | "data" | "memory" => {
                return Err(self.fail(
                    form,
                    format!("whole-map access to '{}' is forbidden; use {}/<key>", name, name),
                ));
            }
            _ => {}
        }
        if name != "/" {
            if let Some((ns, rest)) = name.split_once('/') {
                return self.analyze_namespaced(ns, rest, form);
            }
        }
        if self.in_scope(name) || builtins::is_builtin(name) {
            return Ok(node(NodeKind::Var(name.to_string())));
        }
        if SPECIAL_FORMS.contains(&name) {
            return Err(self.fail(
                form,
                format!("'{}' is a special form and cannot be used as a value", name),
            ));
        }
        let mut msg = format!("Unknown symbol '{}'", name);
        if let Some(suggestion) = suggest(name) {
            msg.push_str(&format!(". Did you mean `{}`?", suggestion));
        }
        Err(Error::at(ErrorKind::UnboundVar, msg, form.line, form.col))
    }

    fn analyze_namespaced(&mut self, ns: &str, name: &str, form: &Form) -> Result<Node, Error> {
        let node = |kind| Node::new(kind, form.line, form.col);
        match ns {
            "ctx" | "data" => Ok(node(NodeKind::Data(name.to_string()))),
            "memory" => Ok(node(NodeKind::MemoryRef(name.to_string()))),
            "tool" => Err(self.fail(
                form,
                format!("tools can only be invoked: (tool/{} {{...}})", name),
            )),
            "budget" => Err(self.fail(form, "use (budget/remaining) as a call".to_string())),
            _ => match builtins::resolve_namespaced(ns, name) {
                NsResolution::Resolved(builtin) => Ok(node(NodeKind::Var(builtin.to_string()))),
                NsResolution::UnknownName(members) => Err(self.fail(
                    form,
                    format!(
                        "'{}' is not in namespace '{}'. Available: {}",
                        name,
                        ns,
                        members.join(", ")
                    ),
                )),
                NsResolution::UnknownNamespace => {
                    Err(self.fail(form, format!("Unknown namespace '{}'", ns)))
                }
            },
        }
    }

    fn analyze_list(&mut self, items: &[Form], form: &Form) -> Result<Node, Error> {
        let node = |kind| Node::new(kind, form.line, form.col);
        let Some(head) = items.first() else {
            return Ok(node(NodeKind::Literal(Value::Nil)));
        };
        if let FormKind::Symbol(sym) = &head.kind {
            if let Some((ns, name)) = sym.split_once('/').filter(|_| sym != "/") {
                if ns == "tool" {
                    let args = self.analyze_all(&items[1..])?;
                    return Ok(node(NodeKind::ToolCall { name: name.to_string(), args }));
                }
                if ns == "budget" && name == "remaining" {
                    if items.len() != 1 {
                        return Err(Error::arity("budget/remaining", "0", items.len() - 1)
                            .with_pos(form.line, form.col));
                    }
                    return Ok(node(NodeKind::BudgetRemaining));
                }
            }
            match sym.as_str() {
                "def" => return self.analyze_def(&items[1..], form),
                "defn" => return self.analyze_defn(&items[1..], form),
                "fn" => return self.analyze_fn_form(&items[1..], form),
                "let" => return self.analyze_let(&items[1..], form, false),
                "loop" => return self.analyze_let(&items[1..], form, true),
                "recur" => return self.analyze_recur(&items[1..], form),
                "if" => {
                    if items.len() != 4 {
                        return Err(Error::arity("if", "3", items.len() - 1)
                            .with_pos(form.line, form.col));
                    }
                    return Ok(node(NodeKind::If {
                        cond: Box::new(self.analyze(&items[1])?),
                        then: Box::new(self.analyze(&items[2])?),
                        els: Box::new(self.analyze(&items[3])?),
                    }));
                }
                "when" => {
                    if items.len() < 2 {
                        return Err(Error::arity("when", "at least 1", items.len() - 1)
                            .with_pos(form.line, form.col));
                    }
                    let cond = self.analyze(&items[1])?;
                    let body = self.analyze_body(&items[2..])?;
                    return Ok(node(NodeKind::If {
                        cond: Box::new(cond),
                        then: Box::new(Node::new(NodeKind::Do(body), form.line, form.col)),
                        els: Box::new(Node::new(NodeKind::Literal(Value::Nil), form.line, form.col)),
                    }));
                }
                "cond" => return self.analyze_cond(&items[1..], form),
                "if-let" => return self.analyze_if_let(&items[1..], form, false),
                "when-let" => return self.analyze_if_let(&items[1..], form, true),
                "do" => {
                    let body = self.analyze_body(&items[1..])?;
                    return Ok(node(NodeKind::Do(body)));
                }
                "and" => return Ok(node(NodeKind::And(self.analyze_all(&items[1..])?))),
                "or" => return Ok(node(NodeKind::Or(self.analyze_all(&items[1..])?))),
                "->" => return self.analyze_thread(items, form, false),
                "->>" => return self.analyze_thread(items, form, true),
                "return" => {
                    if items.len() != 2 {
                        return Err(Error::arity("return", "1", items.len() - 1)
                            .with_pos(form.line, form.col));
                    }
                    return Ok(node(NodeKind::Return(Box::new(self.analyze(&items[1])?))));
                }
                "fail" => {
                    if items.len() != 2 {
                        return Err(Error::arity("fail", "1", items.len() - 1)
                            .with_pos(form.line, form.col));
                    }
                    return Ok(node(NodeKind::Fail(Box::new(self.analyze(&items[1])?))));
                }
                "where" => return self.analyze_where(&items[1..], form),
                "all-of" => {
                    return Ok(node(NodeKind::PredCombinator {
                        kind: CombKind::All,
                        preds: self.analyze_all(&items[1..])?,
                    }));
                }
                "any-of" => {
                    return Ok(node(NodeKind::PredCombinator {
                        kind: CombKind::Any,
                        preds: self.analyze_all(&items[1..])?,
                    }));
                }
                "none-of" => {
                    return Ok(node(NodeKind::PredCombinator {
                        kind: CombKind::None,
                        preds: self.analyze_all(&items[1..])?,
                    }));
                }
                "juxt" => {
                    if items.len() < 2 {
                        return Err(Error::arity("juxt", "at least 1", 0)
                            .with_pos(form.line, form.col));
                    }
                    return Ok(node(NodeKind::Juxt(self.analyze_all(&items[1..])?)));
                }
                "pmap" => {
                    if items.len() != 3 {
                        return Err(Error::arity("pmap", "2", items.len() - 1)
                            .with_pos(form.line, form.col));
                    }
                    return Ok(node(NodeKind::Pmap {
                        f: Box::new(self.analyze(&items[1])?),
                        coll: Box::new(self.analyze(&items[2])?),
                    }));
                }
                "pcalls" => return Ok(node(NodeKind::Pcalls(self.analyze_all(&items[1..])?))),
                "task" => return self.analyze_task(&items[1..], form),
                "step-done" => {
                    if items.len() != 3 {
                        return Err(Error::arity("step-done", "2", items.len() - 1)
                            .with_pos(form.line, form.col));
                    }
                    return Ok(node(NodeKind::StepDone {
                        id: Box::new(self.analyze(&items[1])?),
                        summary: Box::new(self.analyze(&items[2])?),
                    }));
                }
                "task-reset" => {
                    if items.len() != 2 {
                        return Err(Error::arity("task-reset", "1", items.len() - 1)
                            .with_pos(form.line, form.col));
                    }
                    return Ok(node(NodeKind::TaskReset {
                        id: Box::new(self.analyze(&items[1])?),
                    }));
                }
                _ => {}
            }
        }
        let target = self.analyze(head)?;
        let args = self.analyze_all(&items[1..])?;
        Ok(node(NodeKind::Call { target: Box::new(target), args }))
    }

    fn analyze_def(&mut self, args: &[Form], form: &Form) -> Result<Node, Error> {
        let (name_form, doc, value_form) = match args {
            [name, value] => (name, None, value),
            [name, Form { kind: FormKind::Str(doc), .. }, value] => {
                (name, Some(doc.clone()), value)
            }
            _ => return Err(Error::arity("def", "2", args.len()).with_pos(form.line, form.col)),
        };
        let name = self.def_name(name_form)?;
        // visible to the value expression so definitions can self-reference
        self.defs.insert(name.clone());
        let value = self.analyze(value_form)?;
        Ok(Node::new(
            NodeKind::Def { name, value: Box::new(value), doc },
            form.line,
            form.col,
        ))
    }

    fn analyze_defn(&mut self, args: &[Form], form: &Form) -> Result<Node, Error> {
        if args.len() < 2 {
            return Err(Error::arity("defn", "at least 2", args.len())
                .with_pos(form.line, form.col));
        }
        let name = self.def_name(&args[0])?;
        // docstrings are accepted and recorded on the def, not the closure
        let (doc, rest) = match &args[1].kind {
            FormKind::Str(doc) if args.len() > 2 => (Some(doc.clone()), &args[2..]),
            _ => (None, &args[1..]),
        };
        if rest.is_empty() {
            return Err(self.fail(form, "defn: missing parameter vector"));
        }
        self.defs.insert(name.clone());
        let fn_kind = self.analyze_fn(Some(name.clone()), &rest[0], &rest[1..])?;
        Ok(Node::new(
            NodeKind::Def {
                name,
                value: Box::new(Node::new(fn_kind, form.line, form.col)),
                doc,
            },
            form.line,
            form.col,
        ))
    }

    fn def_name(&self, form: &Form) -> Result<String, Error> {
        let FormKind::Symbol(name) = &form.kind else {
            return Err(self.fail(form, "def requires a symbol name"));
        };
        if name.contains('/') {
            return Err(self.fail(form, format!("def name '{}' must not be namespaced", name)));
        }
        if builtins::is_builtin(name) || SPECIAL_FORMS.contains(&name.as_str()) {
            return Err(self.fail(form, format!("def must not shadow the builtin '{}'", name)));
        }
        Ok(name.clone())
    }

    fn analyze_fn_form(&mut self, args: &[Form], form: &Form) -> Result<Node, Error> {
        // (fn name? [params] body...)
        let (name, rest) = match args.first().map(|f| &f.kind) {
            Some(FormKind::Symbol(s)) => (Some(s.clone()), &args[1..]),
            _ => (None, args),
        };
        if rest.is_empty() {
            return Err(self.fail(form, "fn: missing parameter vector"));
        }
        let kind = self.analyze_fn(name, &rest[0], &rest[1..])?;
        Ok(Node::new(kind, form.line, form.col))
    }

    fn analyze_fn(
        &mut self,
        name: Option<String>,
        params_form: &Form,
        body: &[Form],
    ) -> Result<NodeKind, Error> {
        let FormKind::Vector(param_forms) = &params_form.kind else {
            return Err(self.fail(params_form, "fn requires a parameter vector"));
        };
        let mut params = Vec::new();
        let mut rest: Option<Arc<Pattern>> = None;
        let mut i = 0;
        while i < param_forms.len() {
            if matches!(&param_forms[i].kind, FormKind::Symbol(s) if s == "&") {
                if i + 1 != param_forms.len() - 1 {
                    return Err(self.fail(params_form, "'&' must be followed by exactly one rest parameter"));
                }
                rest = Some(Arc::new(self.analyze_pattern(&param_forms[i + 1])?));
                i += 2;
                continue;
            }
            params.push(self.analyze_pattern(&param_forms[i])?);
            i += 1;
        }

        let mut frame = HashSet::new();
        let mut names = Vec::new();
        for p in &params {
            p.bound_names(&mut names);
        }
        if let Some(r) = &rest {
            r.bound_names(&mut names);
        }
        if let Some(n) = &name {
            names.push(n.clone());
        }
        frame.extend(names);
        self.scopes.push(frame);
        self.binders.push(params.len() + usize::from(rest.is_some()));
        let body_nodes = self.analyze_body(body);
        self.binders.pop();
        self.scopes.pop();
        Ok(NodeKind::Fn {
            name,
            params: Arc::new(params),
            rest,
            body: Arc::new(body_nodes?),
        })
    }

    fn analyze_let(&mut self, args: &[Form], form: &Form, is_loop: bool) -> Result<Node, Error> {
        let label = if is_loop { "loop" } else { "let" };
        let Some(bindings_form) = args.first() else {
            return Err(Error::arity(label, "at least 1", 0).with_pos(form.line, form.col));
        };
        let FormKind::Vector(binding_forms) = &bindings_form.kind else {
            return Err(self.fail(bindings_form, format!("{} requires a binding vector", label)));
        };
        if binding_forms.len() % 2 != 0 {
            return Err(self.fail(
                bindings_form,
                format!("{} binding vector requires an even number of forms", label),
            ));
        }

        self.scopes.push(HashSet::new());
        let result = (|| {
            let mut bindings = Vec::with_capacity(binding_forms.len() / 2);
            for pair in binding_forms.chunks(2) {
                let value = self.analyze(&pair[1])?;
                let pattern = self.analyze_pattern(&pair[0])?;
                let mut names = Vec::new();
                pattern.bound_names(&mut names);
                self.scopes.last_mut().unwrap().extend(names);
                bindings.push((pattern, value));
            }
            if is_loop {
                self.binders.push(bindings.len());
            }
            let body = self.analyze_body(&args[1..]);
            if is_loop {
                self.binders.pop();
            }
            let kind = if is_loop {
                NodeKind::Loop { bindings, body: body? }
            } else {
                NodeKind::Let { bindings, body: body? }
            };
            Ok(Node::new(kind, form.line, form.col))
        })();
        self.scopes.pop();
        result
    }

    fn analyze_recur(&mut self, args: &[Form], form: &Form) -> Result<Node, Error> {
        let Some(&arity) = self.binders.last() else {
            return Err(self.fail(form, "recur is only valid inside loop or fn"));
        };
        if args.len() != arity {
            return Err(Error::arity("recur", arity.to_string(), args.len())
                .with_pos(form.line, form.col));
        }
        Ok(Node::new(NodeKind::Recur(self.analyze_all(args)?), form.line, form.col))
    }

    fn analyze_cond(&mut self, args: &[Form], form: &Form) -> Result<Node, Error> {
        if args.len() % 2 != 0 {
            return Err(self.fail(form, "cond requires an even number of forms"));
        }
        let mut node = Node::new(NodeKind::Literal(Value::Nil), form.line, form.col);
        for pair in args.chunks(2).rev() {
            let cond = self.analyze(&pair[0])?;
            let then = self.analyze(&pair[1])?;
            node = Node::new(
                NodeKind::If {
                    cond: Box::new(cond),
                    then: Box::new(then),
                    els: Box::new(node),
                },
                pair[0].line,
                pair[0].col,
            );
        }
        Ok(node)
    }

    fn analyze_if_let(&mut self, args: &[Form], form: &Form, when_form: bool) -> Result<Node, Error> {
        let label = if when_form { "when-let" } else { "if-let" };
        let Some(bindings_form) = args.first() else {
            return Err(Error::arity(label, "at least 2", args.len()).with_pos(form.line, form.col));
        };
        let FormKind::Vector(binding_forms) = &bindings_form.kind else {
            return Err(self.fail(bindings_form, format!("{} requires a binding vector", label)));
        };
        if binding_forms.len() != 2 {
            return Err(self.fail(
                bindings_form,
                format!("{} requires exactly one binding pair", label),
            ));
        }
        if args.len() < 2 || (!when_form && args.len() > 3) {
            return Err(Error::arity(label, if when_form { "at least 2" } else { "2-3" }, args.len())
                .with_pos(form.line, form.col));
        }

        let value = self.analyze(&binding_forms[1])?;
        self.scopes.push(HashSet::new());
        let result = (|| {
            let pattern = self.analyze_pattern(&binding_forms[0])?;
            let mut names = Vec::new();
            pattern.bound_names(&mut names);
            // the tested symbol: first bound name stands for the whole value
            let test_name = names.first().cloned().unwrap_or_else(|| "__it".to_string());
            self.scopes.last_mut().unwrap().extend(names);

            let then = if when_form {
                Node::new(NodeKind::Do(self.analyze_body(&args[1..])?), form.line, form.col)
            } else {
                self.analyze(&args[1])?
            };
            let els = if !when_form && args.len() == 3 {
                self.analyze(&args[2])?
            } else {
                Node::new(NodeKind::Literal(Value::Nil), form.line, form.col)
            };
            let test = Node::new(NodeKind::Var(test_name), form.line, form.col);
            let body = Node::new(
                NodeKind::If { cond: Box::new(test), then: Box::new(then), els: Box::new(els) },
                form.line,
                form.col,
            );
            Ok(Node::new(
                NodeKind::Let { bindings: vec![(pattern, value)], body: vec![body] },
                form.line,
                form.col,
            ))
        })();
        self.scopes.pop();
        result
    }

    /// `->` and `->>` rewrite at the form level, then analyze the result.
    fn analyze_thread(&mut self, items: &[Form], form: &Form, last: bool) -> Result<Node, Error> {
        let label = if last { "->>" } else { "->" };
        if items.len() < 2 {
            return Err(Error::arity(label, "at least 1", items.len() - 1)
                .with_pos(form.line, form.col));
        }
        let mut acc = items[1].clone();
        for step in &items[2..] {
            acc = match &step.kind {
                FormKind::List(xs) if !xs.is_empty() => {
                    let mut threaded = xs.clone();
                    if last {
                        threaded.push(acc);
                    } else {
                        threaded.insert(1, acc);
                    }
                    Form { kind: FormKind::List(threaded), line: step.line, col: step.col }
                }
                _ => Form {
                    kind: FormKind::List(vec![step.clone(), acc]),
                    line: step.line,
                    col: step.col,
                },
            };
        }
        self.analyze(&acc)
    }

    fn analyze_where(&mut self, args: &[Form], form: &Form) -> Result<Node, Error> {
        let path = match args.first() {
            Some(field) => self.where_path(field)?,
            None => {
                return Err(Error::arity("where", "1 or 3", 0).with_pos(form.line, form.col));
            }
        };
        match args.len() {
            1 => Ok(Node::new(
                NodeKind::Where { path, op: None, value: None },
                form.line,
                form.col,
            )),
            2 => Err(self.fail(
                form,
                "where: missing operator. Use (where :field = value), not (where :field value)",
            )),
            3 => {
                let FormKind::Symbol(op_sym) = &args[1].kind else {
                    return Err(self.fail(&args[1], "where: operator must be a symbol"));
                };
                let Some(op) = WhereOp::from_symbol(op_sym) else {
                    return Err(self.fail(
                        &args[1],
                        format!(
                            "where: unknown operator '{}'. One of: = not= > < >= <= in includes",
                            op_sym
                        ),
                    ));
                };
                let value = self.analyze(&args[2])?;
                Ok(Node::new(
                    NodeKind::Where { path, op: Some(op), value: Some(Box::new(value)) },
                    form.line,
                    form.col,
                ))
            }
            n => Err(Error::arity("where", "1 or 3", n).with_pos(form.line, form.col)),
        }
    }

    fn where_path(&self, field: &Form) -> Result<Vec<MapKey>, Error> {
        match &field.kind {
            FormKind::Keyword(k) => Ok(vec![MapKey::Keyword(k.clone())]),
            FormKind::Str(s) => Ok(vec![MapKey::Str(s.clone())]),
            FormKind::Vector(items) => items
                .iter()
                .map(|item| match &item.kind {
                    FormKind::Keyword(k) => Ok(MapKey::Keyword(k.clone())),
                    FormKind::Str(s) => Ok(MapKey::Str(s.clone())),
                    _ => Err(self.fail(item, "where: path elements must be keywords or strings")),
                })
                .collect(),
            _ => Err(self.fail(field, "where: field must be a keyword, string, or vector path")),
        }
    }

    fn analyze_task(&mut self, args: &[Form], form: &Form) -> Result<Node, Error> {
        if args.len() < 2 {
            return Err(Error::arity("task", "at least 2", args.len())
                .with_pos(form.line, form.col));
        }
        let id = match &args[0].kind {
            FormKind::Keyword(k) => TaskId::Literal(k.clone()),
            FormKind::Str(s) => TaskId::Literal(s.clone()),
            _ => TaskId::Dynamic(Box::new(self.analyze(&args[0])?)),
        };
        let body = self.analyze_body(&args[1..])?;
        Ok(Node::new(NodeKind::Task { id, body }, form.line, form.col))
    }

    fn analyze_lambda(&mut self, items: &[Form], form: &Form) -> Result<Node, Error> {
        let arity = max_placeholder(items)?;
        let params: Vec<Pattern> = (1..=arity).map(|i| Pattern::Var(format!("%{}", i))).collect();

        let mut frame = HashSet::new();
        frame.extend((1..=arity).map(|i| format!("%{}", i)));
        self.scopes.push(frame);
        self.binders.push(params.len());
        let body = (|| {
            let rewritten: Vec<Form> = items.iter().map(rewrite_bare_placeholder).collect();
            let call = Form {
                kind: FormKind::List(rewritten),
                line: form.line,
                col: form.col,
            };
            self.analyze(&call)
        })();
        self.binders.pop();
        self.scopes.pop();
        Ok(Node::new(
            NodeKind::Fn {
                name: None,
                params: Arc::new(params),
                rest: None,
                body: Arc::new(vec![body?]),
            },
            form.line,
            form.col,
        ))
    }

    fn analyze_pattern(&mut self, form: &Form) -> Result<Pattern, Error> {
        match &form.kind {
            FormKind::Symbol(name) => {
                if name.contains('/') || name == "&" {
                    return Err(self.fail(form, format!("invalid binding name '{}'", name)));
                }
                Ok(Pattern::Var(name.clone()))
            }
            FormKind::Vector(items) => {
                let mut patterns = Vec::new();
                let mut rest = None;
                let mut as_name = None;
                let mut i = 0;
                while i < items.len() {
                    match &items[i].kind {
                        FormKind::Symbol(s) if s == "&" => {
                            let Some(rest_form) = items.get(i + 1) else {
                                return Err(self.fail(form, "'&' requires a rest pattern"));
                            };
                            rest = Some(Box::new(self.analyze_pattern(rest_form)?));
                            i += 2;
                        }
                        FormKind::Keyword(k) if k == "as" => {
                            let Some(FormKind::Symbol(name)) = items.get(i + 1).map(|f| &f.kind)
                            else {
                                return Err(self.fail(form, ":as requires a symbol"));
                            };
                            as_name = Some(name.clone());
                            i += 2;
                        }
                        _ => {
                            patterns.push(self.analyze_pattern(&items[i])?);
                            i += 1;
                        }
                    }
                }
                Ok(Pattern::Seq { items: patterns, rest, as_name })
            }
            FormKind::Map(items) => self.analyze_map_pattern(items, form),
            _ => Err(self.fail(form, "unsupported binding pattern")),
        }
    }

    fn analyze_map_pattern(&mut self, items: &[Form], form: &Form) -> Result<Pattern, Error> {
        let mut entries: Vec<MapEntryPattern> = Vec::new();
        let mut as_name = None;
        let mut defaults: Vec<(String, Node)> = Vec::new();
        for pair in items.chunks(2) {
            match (&pair[0].kind, &pair[1].kind) {
                (FormKind::Keyword(k), FormKind::Vector(syms)) if k == "keys" => {
                    for sym in syms {
                        let FormKind::Symbol(name) = &sym.kind else {
                            return Err(self.fail(sym, ":keys entries must be symbols"));
                        };
                        entries.push(MapEntryPattern {
                            local: name.clone(),
                            key: MapKey::Keyword(name.clone()),
                            default: None,
                        });
                    }
                }
                (FormKind::Keyword(k), FormKind::Symbol(name)) if k == "as" => {
                    as_name = Some(name.clone());
                }
                (FormKind::Keyword(k), FormKind::Map(default_pairs)) if k == "or" => {
                    for dp in default_pairs.chunks(2) {
                        let FormKind::Symbol(name) = &dp[0].kind else {
                            return Err(self.fail(&dp[0], ":or keys must be symbols"));
                        };
                        defaults.push((name.clone(), self.analyze(&dp[1])?));
                    }
                }
                (FormKind::Symbol(local), FormKind::Keyword(key)) => {
                    entries.push(MapEntryPattern {
                        local: local.clone(),
                        key: MapKey::Keyword(key.clone()),
                        default: None,
                    });
                }
                (FormKind::Symbol(local), FormKind::Str(key)) => {
                    entries.push(MapEntryPattern {
                        local: local.clone(),
                        key: MapKey::Str(key.clone()),
                        default: None,
                    });
                }
                _ => return Err(self.fail(form, "unsupported map destructuring entry")),
            }
        }
        for (name, default) in defaults {
            match entries.iter_mut().find(|e| e.local == name) {
                Some(entry) => entry.default = Some(default),
                None => {
                    return Err(self.fail(form, format!(":or default for unbound name '{}'", name)));
                }
            }
        }
        Ok(Pattern::MapKeys { entries, as_name })
    }
}

/// Highest placeholder used inside `#(...)`: `%` alone means 1; no
/// placeholder at all means a zero-argument function.
fn max_placeholder(items: &[Form]) -> Result<usize, Error> {
    fn walk(form: &Form, max: &mut usize) -> Result<(), Error> {
        match &form.kind {
            FormKind::Symbol(s) if s == "%" => *max = (*max).max(1),
            FormKind::Symbol(s) => {
                if let Some(digits) = s.strip_prefix('%') {
                    let n: usize = digits.parse().map_err(|_| {
                        Error::at(
                            ErrorKind::AnalysisError,
                            format!("invalid placeholder '{}'", s),
                            form.line,
                            form.col,
                        )
                    })?;
                    if n == 0 {
                        return Err(Error::at(
                            ErrorKind::AnalysisError,
                            "placeholder numbering starts at %1",
                            form.line,
                            form.col,
                        ));
                    }
                    *max = (*max).max(n);
                }
            }
            FormKind::List(xs)
            | FormKind::Vector(xs)
            | FormKind::Map(xs)
            | FormKind::Set(xs)
            | FormKind::Lambda(xs) => {
                for x in xs {
                    walk(x, max)?;
                }
            }
            _ => {}
        }
        Ok(())
    }
    let mut max = 0;
    for item in items {
        walk(item, &mut max)?;
    }
    Ok(max)
}

/// Rewrite bare `%` to `%1` so lambda bodies bind uniformly.
fn rewrite_bare_placeholder(form: &Form) -> Form {
    let kind = match &form.kind {
        FormKind::Symbol(s) if s == "%" => FormKind::Symbol("%1".to_string()),
        FormKind::List(xs) => FormKind::List(xs.iter().map(rewrite_bare_placeholder).collect()),
        FormKind::Vector(xs) => FormKind::Vector(xs.iter().map(rewrite_bare_placeholder).collect()),
        FormKind::Map(xs) => FormKind::Map(xs.iter().map(rewrite_bare_placeholder).collect()),
        FormKind::Set(xs) => FormKind::Set(xs.iter().map(rewrite_bare_placeholder).collect()),
        other => other.clone(),
    };
    Form { kind, line: form.line, col: form.col }
}

/// Small edit-distance suggestion for unknown symbols.
fn suggest(name: &str) -> Option<&'static str> {
    if name.len() < 3 {
        return None;
    }
    let candidates = builtins::registry()
        .names()
        .iter()
        .copied()
        .chain(SPECIAL_FORMS.iter().copied());
    let mut best: Option<(&'static str, usize)> = None;
    for candidate in candidates {
        let d = edit_distance(name, candidate);
        if d <= 2 && best.is_none_or(|(_, bd)| d < bd) {
            best = Some((candidate, d));
        }
    }
    best.map(|(c, _)| c)
}

fn edit_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0; b.len() + 1];
    for (i, &ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, &cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            current[j + 1] = (prev[j + 1] + 1).min(current[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut current);
    }
    prev[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_program;

    fn analyze_src(src: &str) -> Result<Node, Error> {
        let forms = parse_program(src).unwrap();
        analyze_program(&forms, &HashSet::new(), 10_000)
    }

    fn analyze_with_memory(src: &str, names: &[&str]) -> Result<Node, Error> {
        let forms = parse_program(src).unwrap();
        let memory: HashSet<String> = names.iter().map(|s| s.to_string()).collect();
        analyze_program(&forms, &memory, 10_000)
    }

    #[test]
    fn test_if_requires_three_children() {
        assert!(analyze_src("(if true 1 2)").is_ok());
        let err = analyze_src("(if true 1)").unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArity);
    }

    #[test]
    fn test_when_desugars_to_if() {
        let node = analyze_src("(when true 1 2)").unwrap();
        assert!(matches!(node.kind, NodeKind::If { .. }));
    }

    #[test]
    fn test_cond_desugars_to_nested_if() {
        let node = analyze_src("(cond false 1 :else 2)").unwrap();
        match node.kind {
            NodeKind::If { els, .. } => assert!(matches!(els.kind, NodeKind::If { .. })),
            other => panic!("expected if, got {:?}", other),
        }
        assert!(analyze_src("(cond false 1 :else)").is_err());
    }

    #[test]
    fn test_thread_first_and_last() {
        // (-> 1 (+ 2)) => (+ 1 2); (->> [1] (map inc)) => (map inc [1])
        assert!(analyze_src("(-> 1 (+ 2) inc)").is_ok());
        assert!(analyze_src("(->> [1 2] (filter (where :a = 1)))").is_ok());
    }

    #[test]
    fn test_let_requires_even_bindings() {
        let err = analyze_src("(let [x] x)").unwrap_err();
        assert_eq!(err.kind, ErrorKind::AnalysisError);
        assert!(analyze_src("(let [x 1 y 2] (+ x y))").is_ok());
    }

    #[test]
    fn test_sequential_let_bindings_see_earlier_names() {
        assert!(analyze_src("(let [x 1 y (inc x)] y)").is_ok());
    }

    #[test]
    fn test_unknown_symbol_reported_before_execution() {
        let err = analyze_src("(inc missing)").unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnboundVar);
    }

    #[test]
    fn test_unknown_symbol_suggestion() {
        let err = analyze_src("(allof (where :a = 1))").unwrap_err();
        assert!(err.message.contains("all-of"), "message: {}", err.message);
    }

    #[test]
    fn test_memory_names_are_in_scope() {
        assert!(analyze_src("(count high-paid)").is_err());
        assert!(analyze_with_memory("(count high-paid)", &["high-paid"]).is_ok());
    }

    #[test]
    fn test_defn_threads_name_for_recursion() {
        assert!(analyze_src("(defn f [x] (if (pos? x) (f (dec x)) 0))").is_ok());
    }

    #[test]
    fn test_def_cannot_shadow_builtin() {
        let err = analyze_src("(def count 1)").unwrap_err();
        assert!(err.message.contains("shadow"));
    }

    #[test]
    fn test_where_missing_operator_is_analysis_error() {
        let err = analyze_src("(where :status \"active\")").unwrap_err();
        assert_eq!(err.kind, ErrorKind::AnalysisError);
        assert!(err.message.contains("operator"));
    }

    #[test]
    fn test_where_unknown_operator_lists_choices() {
        let err = analyze_src("(where :a contains 1)").unwrap_err();
        assert!(err.message.contains("includes"));
    }

    #[test]
    fn test_namespace_normalization() {
        assert!(analyze_src("(clojure.string/split \"a,b\" \",\")").is_ok());
        assert!(analyze_src("(str/join \",\" [\"a\" \"b\"])").is_ok());
        let err = analyze_src("(str/frobnicate \"x\")").unwrap_err();
        assert!(err.message.contains("Available"));
        let err = analyze_src("(nope/fn 1)").unwrap_err();
        assert!(err.message.contains("Unknown namespace"));
    }

    #[test]
    fn test_bare_ctx_is_rejected() {
        let err = analyze_src("(count ctx)").unwrap_err();
        assert!(err.message.contains("forbidden"));
    }

    #[test]
    fn test_placeholder_outside_lambda() {
        let err = analyze_src("(inc %)").unwrap_err();
        assert!(err.message.contains("#("));
    }

    #[test]
    fn test_lambda_arity_from_placeholders() {
        let node = analyze_src("#(+ %1 %2)").unwrap();
        match node.kind {
            NodeKind::Fn { params, .. } => assert_eq!(params.len(), 2),
            other => panic!("expected fn, got {:?}", other),
        }
        let node = analyze_src("#(inc %)").unwrap();
        match node.kind {
            NodeKind::Fn { params, .. } => assert_eq!(params.len(), 1),
            other => panic!("expected fn, got {:?}", other),
        }
    }

    #[test]
    fn test_recur_outside_binder_is_error() {
        let err = analyze_src("(recur 1)").unwrap_err();
        assert!(err.message.contains("recur"));
    }

    #[test]
    fn test_recur_arity_must_match_binder() {
        let err = analyze_src("(loop [i 0 j 0] (recur (inc i)))").unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArity);
        assert!(analyze_src("(loop [i 0] (recur (inc i)))").is_ok());
    }

    #[test]
    fn test_symbol_budget() {
        let forms = parse_program("(let [alpha 1 beta 2] (+ alpha beta))").unwrap();
        let err = analyze_program(&forms, &HashSet::new(), 3).unwrap_err();
        assert_eq!(err.kind, ErrorKind::SymbolLimitExceeded);
    }

    #[test]
    fn test_tool_call_form() {
        let node = analyze_src("(tool/fetch {:id 7})").unwrap();
        match node.kind {
            NodeKind::ToolCall { name, args } => {
                assert_eq!(name, "fetch");
                assert_eq!(args.len(), 1);
            }
            other => panic!("expected tool call, got {:?}", other),
        }
    }

    #[test]
    fn test_budget_remaining_call() {
        assert!(matches!(
            analyze_src("(budget/remaining)").unwrap().kind,
            NodeKind::BudgetRemaining
        ));
    }

    #[test]
    fn test_turn_history_symbols() {
        assert!(matches!(analyze_src("*1").unwrap().kind, NodeKind::TurnHistory(1)));
        assert!(matches!(analyze_src("*3").unwrap().kind, NodeKind::TurnHistory(3)));
    }

    #[test]
    fn test_destructuring_patterns() {
        assert!(analyze_src("(let [[a b & more] [1 2 3 4]] more)").is_ok());
        assert!(analyze_src("(let [{:keys [a b] :or {b 2} :as m} {:a 1}] [a b m])").is_ok());
        assert!(analyze_src("(let [{x :px} {:px 1}] x)").is_ok());
        assert!(analyze_src("(fn [{:keys [id]}] id)").is_ok());
    }

    #[test]
    fn test_multiple_top_level_forms_wrap_in_do() {
        let node = analyze_src("(def x 1) x").unwrap();
        assert!(matches!(node.kind, NodeKind::Do(_)));
    }

    #[test]
    fn test_special_form_as_value_is_rejected() {
        let err = analyze_src("(mapv where [1 2])").unwrap_err();
        assert!(err.message.contains("special form"));
    }
}
