// ABOUTME: Tree-walking evaluator over the Core AST

use crate::ast::{Node, NodeKind, Pattern, TaskId};
use crate::builtins::{self, BuiltinKind};
use crate::config::Limits;
use crate::env::Env;
use crate::error::{Error, ErrorKind};
use crate::pred;
use crate::sandbox::Interrupt;
use crate::step::{PmapCall, Step, ToolCall};
use crate::tools::ToolRegistry;
use crate::value::{
    flex_get, truncate_graphemes, Closure, Map, MapKey, StrMap, Value,
};
use indexmap::IndexMap;
use log::{debug, trace};
use std::sync::Arc;
use std::time::Instant;

/// Non-local control flow: signals, loop re-entry, and typed errors.
#[derive(Debug)]
pub enum Flow {
    Return(Value),
    Fail(Value),
    Recur(Vec<Value>),
    Error(Error),
}

impl From<Error> for Flow {
    fn from(e: Error) -> Self {
        Flow::Error(e)
    }
}

pub type EvalResult = Result<Value, Flow>;

/// Per-call mutable record: the user namespace snapshot plus every side
/// output the Step will report.
#[derive(Default)]
pub struct EvalCtx {
    pub user_ns: StrMap,
    pub prints: Vec<String>,
    pub tool_calls: Vec<ToolCall>,
    pub pmap_calls: Vec<PmapCall>,
    pub child_steps: Vec<Step>,
    pub child_traces: Vec<String>,
    pub journal: StrMap,
    pub summaries: IndexMap<String, String>,
    pub tool_cache: StrMap,
    pub heap_used: usize,
    /// Inside a pmap/pcalls branch: prints and tool-call records are
    /// dropped to keep observable order deterministic.
    pub in_parallel: bool,
}

impl EvalCtx {
    pub fn seeded(
        user_ns: StrMap,
        journal: StrMap,
        summaries: IndexMap<String, String>,
        tool_cache: StrMap,
    ) -> Self {
        EvalCtx { user_ns, journal, summaries, tool_cache, ..EvalCtx::default() }
    }
}

/// The evaluator: read-only inputs by reference, mutable state in `ec`.
pub struct Machine<'a> {
    pub ctx: &'a Map,
    pub tools: &'a ToolRegistry,
    pub limits: &'a Limits,
    pub interrupt: &'a Interrupt,
    pub turn_history: &'a [Value],
    pub budget: Option<&'a Value>,
    pub branch_deadline: Option<Instant>,
    pub ec: EvalCtx,
    depth: u32,
    ops: u64,
}

impl<'a> Machine<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ctx: &'a Map,
        tools: &'a ToolRegistry,
        limits: &'a Limits,
        interrupt: &'a Interrupt,
        turn_history: &'a [Value],
        budget: Option<&'a Value>,
        ec: EvalCtx,
    ) -> Self {
        Machine {
            ctx,
            tools,
            limits,
            interrupt,
            turn_history,
            budget,
            branch_deadline: None,
            ec,
            depth: 0,
            ops: 0,
        }
    }

    // ------------------------------------------------------------------
    // Resource checks
    // ------------------------------------------------------------------

    fn tick(&mut self) -> Result<(), Error> {
        self.ops += 1;
        if self.ops & 0x3ff == 0 {
            if self.interrupt.expired() {
                return Err(Error::new(
                    ErrorKind::Timeout,
                    format!("wall-clock limit of {} ms exceeded", self.limits.timeout_ms),
                ));
            }
            if let Some(deadline) = self.branch_deadline {
                if Instant::now() >= deadline {
                    return Err(Error::new(ErrorKind::Timeout, "parallel branch deadline exceeded"));
                }
            }
        }
        Ok(())
    }

    /// Charge an allocation against the heap budget.
    pub fn charge(&mut self, value: &Value) -> Result<(), Error> {
        self.ec.heap_used += value.charged_size();
        if self.ec.heap_used > self.limits.max_heap_bytes {
            return Err(Error::new(
                ErrorKind::MemoryExceeded,
                format!(
                    "heap limit of {} bytes exceeded ({} bytes allocated)",
                    self.limits.max_heap_bytes, self.ec.heap_used
                ),
            ));
        }
        Ok(())
    }

    /// Append to the print log, truncated; dropped inside parallel
    /// branches.
    pub fn push_print(&mut self, text: String) {
        if self.ec.in_parallel {
            trace!("dropping print inside parallel branch");
            return;
        }
        self.ec.prints.push(truncate_graphemes(&text, self.limits.max_print_length));
    }

    // ------------------------------------------------------------------
    // Evaluation
    // ------------------------------------------------------------------

    pub fn eval(&mut self, node: &Node, env: &Arc<Env>) -> EvalResult {
        self.tick()?;
        match self.eval_node(node, env) {
            Err(Flow::Error(e)) => Err(Flow::Error(e.with_pos(node.line, node.col))),
            other => other,
        }
    }

    /// Body with implicit `do`.
    pub fn eval_body(&mut self, body: &[Node], env: &Arc<Env>) -> EvalResult {
        let mut result = Value::Nil;
        for node in body {
            result = self.eval(node, env)?;
        }
        Ok(result)
    }

    fn eval_node(&mut self, node: &Node, env: &Arc<Env>) -> EvalResult {
        match &node.kind {
            NodeKind::Literal(v) => Ok(v.clone()),
            NodeKind::Var(name) => self.lookup(name, env),
            NodeKind::Data(key) => self.lookup_ctx(key),
            NodeKind::MemoryRef(name) => match self.ec.user_ns.get(name) {
                Some(v) => Ok(v.clone()),
                None => Err(Error::unbound(&format!("memory/{}", name)).into()),
            },
            NodeKind::VarQuote(name) => Ok(Value::VarRef(name.clone())),
            NodeKind::Vector(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.eval(item, env)?);
                }
                let v = Value::Vector(out);
                self.charge(&v)?;
                Ok(v)
            }
            NodeKind::MapLit(pairs) => {
                let mut out = Map::with_capacity(pairs.len());
                for (k, v) in pairs {
                    let key = self.eval(k, env)?;
                    let value = self.eval(v, env)?;
                    out.insert(MapKey::from_value(&key)?, value);
                }
                let v = Value::Map(out);
                self.charge(&v)?;
                Ok(v)
            }
            NodeKind::SetLit(items) => {
                let mut out: Vec<Value> = Vec::with_capacity(items.len());
                for item in items {
                    let v = self.eval(item, env)?;
                    if !out.contains(&v) {
                        out.push(v);
                    }
                }
                let v = Value::Set(out);
                self.charge(&v)?;
                Ok(v)
            }
            NodeKind::Let { bindings, body } => {
                let mut local = Arc::clone(env);
                for (pattern, value_node) in bindings {
                    let value = self.eval(value_node, &local)?;
                    local = self.bind_pattern(&local, pattern, value)?;
                }
                self.eval_body(body, &local)
            }
            NodeKind::Fn { name, params, rest, body } => {
                let closure = Value::Closure(Arc::new(Closure {
                    name: name.clone(),
                    params: Arc::clone(params),
                    rest: rest.clone(),
                    body: Arc::clone(body),
                    env: Arc::clone(env),
                }));
                self.charge(&closure)?;
                Ok(closure)
            }
            NodeKind::Call { target, args } => {
                let f = self.eval(target, env)?;
                let mut arg_vals = Vec::with_capacity(args.len());
                for arg in args {
                    arg_vals.push(self.eval(arg, env)?);
                }
                self.call_value(&f, &arg_vals)
            }
            NodeKind::ToolCall { name, args } => self.eval_tool_call(name, args, env),
            NodeKind::If { cond, then, els } => {
                if self.eval(cond, env)?.is_truthy() {
                    self.eval(then, env)
                } else {
                    self.eval(els, env)
                }
            }
            NodeKind::Do(body) => self.eval_body(body, env),
            NodeKind::And(exprs) => {
                let mut last = Value::Bool(true);
                for expr in exprs {
                    last = self.eval(expr, env)?;
                    if !last.is_truthy() {
                        return Ok(last);
                    }
                }
                Ok(last)
            }
            NodeKind::Or(exprs) => {
                let mut last = Value::Nil;
                for expr in exprs {
                    last = self.eval(expr, env)?;
                    if last.is_truthy() {
                        return Ok(last);
                    }
                }
                Ok(last)
            }
            NodeKind::Def { name, value, doc: _ } => {
                let v = self.eval(value, env)?;
                self.charge(&v)?;
                self.ec.user_ns.insert(name.clone(), v);
                Ok(Value::VarRef(name.clone()))
            }
            NodeKind::Loop { bindings, body } => self.eval_loop(bindings, body, env),
            NodeKind::Recur(args) => {
                let mut vals = Vec::with_capacity(args.len());
                for arg in args {
                    vals.push(self.eval(arg, env)?);
                }
                Err(Flow::Recur(vals))
            }
            NodeKind::Return(inner) => {
                let v = self.eval(inner, env)?;
                Err(Flow::Return(v))
            }
            NodeKind::Fail(inner) => {
                let v = self.eval(inner, env)?;
                Err(Flow::Fail(v))
            }
            NodeKind::Where { path, op, value } => {
                let target = match value {
                    Some(v) => Some(self.eval(v, env)?),
                    None => None,
                };
                Ok(pred::make_where(path.clone(), *op, target))
            }
            NodeKind::PredCombinator { kind, preds } => {
                let mut ps = Vec::with_capacity(preds.len());
                for p in preds {
                    ps.push(self.eval(p, env)?);
                }
                Ok(pred::make_combinator(*kind, ps))
            }
            NodeKind::Juxt(fns) => {
                let mut fs = Vec::with_capacity(fns.len());
                for f in fns {
                    fs.push(self.eval(f, env)?);
                }
                Ok(pred::make_juxt(fs))
            }
            NodeKind::Pmap { f, coll } => {
                let f = self.eval(f, env)?;
                let coll = self.eval(coll, env)?;
                let items = builtins::seq_items("pmap", &coll)?;
                crate::parallel::pmap(self, f, items)
            }
            NodeKind::Pcalls(fns) => {
                let mut thunks = Vec::with_capacity(fns.len());
                for f in fns {
                    let v = self.eval(f, env)?;
                    if !v.is_callable() {
                        return Err(Error::type_error("pcalls", "a zero-argument function", &v).into());
                    }
                    thunks.push(v);
                }
                crate::parallel::pcalls(self, thunks)
            }
            NodeKind::Task { id, body } => {
                let key = match id {
                    TaskId::Literal(s) => s.clone(),
                    TaskId::Dynamic(node) => match self.eval(node, env)? {
                        Value::Keyword(s) | Value::Str(s) => s,
                        other => {
                            return Err(Error::type_error("task", "a keyword or string id", &other)
                                .into());
                        }
                    },
                };
                if let Some(v) = self.ec.journal.get(&key) {
                    trace!("task {} served from journal", key);
                    return Ok(v.clone());
                }
                let v = self.eval_body(body, env)?;
                self.ec.journal.insert(key, v.clone());
                Ok(v)
            }
            NodeKind::StepDone { id, summary } => {
                let key = self.task_key("step-done", id, env)?;
                let summary = self.eval(summary, env)?;
                self.ec.summaries.insert(key, summary.render_string());
                Ok(Value::Nil)
            }
            NodeKind::TaskReset { id } => {
                let key = self.task_key("task-reset", id, env)?;
                self.ec.journal.shift_remove(&key);
                Ok(Value::Nil)
            }
            NodeKind::BudgetRemaining => Ok(self.budget.cloned().unwrap_or(Value::Nil)),
            NodeKind::TurnHistory(n) => {
                Ok(self.turn_history.get(*n as usize - 1).cloned().unwrap_or(Value::Nil))
            }
        }
    }

    fn task_key(&mut self, function: &str, id: &Node, env: &Arc<Env>) -> Result<String, Flow> {
        match self.eval(id, env)? {
            Value::Keyword(s) | Value::Str(s) => Ok(s),
            other => {
                Err(Error::type_error(function, "a keyword or string id", &other).into())
            }
        }
    }

    // ------------------------------------------------------------------
    // Lookup
    // ------------------------------------------------------------------

    fn lookup(&mut self, name: &str, env: &Arc<Env>) -> EvalResult {
        if let Some(v) = env.get(name) {
            return Ok(v.clone());
        }
        if let Some(v) = self.ec.user_ns.get(name) {
            return Ok(v.clone());
        }
        if let Some(spec) = builtins::lookup(name) {
            return Ok(Value::Builtin(spec));
        }
        Err(Error::unbound(name).into())
    }

    fn lookup_ctx(&mut self, key: &str) -> EvalResult {
        match flex_get(self.ctx, &MapKey::Str(key.to_string())) {
            Some(v) => Ok(v.clone()),
            None => {
                let mut keys: Vec<&str> = self.ctx.keys().map(|k| k.name()).collect();
                keys.sort_unstable();
                Err(Error::new(
                    ErrorKind::UnboundVar,
                    format!(
                        "ctx/{} is not present in the context. Available: {}",
                        key,
                        if keys.is_empty() { "(none)".to_string() } else { keys.join(", ") }
                    ),
                )
                .into())
            }
        }
    }

    // ------------------------------------------------------------------
    // Calling
    // ------------------------------------------------------------------

    pub fn call_value(&mut self, f: &Value, args: &[Value]) -> EvalResult {
        self.tick()?;
        self.depth += 1;
        if self.depth > self.limits.max_recursion_depth {
            self.depth -= 1;
            return Err(Error::new(
                ErrorKind::MaxIterationsExceeded,
                format!("recursion depth limit of {} exceeded", self.limits.max_recursion_depth),
            )
            .into());
        }
        let result = self.dispatch_call(f, args);
        self.depth -= 1;
        if let Ok(v) = &result {
            self.charge(v)?;
        }
        result
    }

    fn dispatch_call(&mut self, f: &Value, args: &[Value]) -> EvalResult {
        match f {
            Value::Closure(c) => self.call_closure(c, args),
            Value::Builtin(spec) => match spec.kind {
                BuiltinKind::Pure(func) => func(args).map_err(Flow::from),
                BuiltinKind::Effectful(func) => func(self, args),
            },
            Value::Native(native) => (native.call)(self, args),
            Value::Keyword(k) => {
                if args.is_empty() || args.len() > 2 {
                    return Err(Error::arity(&format!(":{}", k), "1-2", args.len()).into());
                }
                let default = args.get(1).cloned().unwrap_or(Value::Nil);
                match &args[0] {
                    Value::Map(m) => Ok(flex_get(m, &MapKey::Keyword(k.clone()))
                        .cloned()
                        .unwrap_or(default)),
                    _ => Ok(default),
                }
            }
            Value::Set(items) => {
                if args.len() != 1 {
                    return Err(Error::arity("set lookup", "1", args.len()).into());
                }
                Ok(if items.contains(&args[0]) { args[0].clone() } else { Value::Nil })
            }
            Value::VarRef(name) => {
                let target = match self.ec.user_ns.get(name) {
                    Some(v) => v.clone(),
                    None => return Err(Error::unbound(name).into()),
                };
                self.dispatch_call(&target, args)
            }
            other => Err(Error::new(
                ErrorKind::NotCallable,
                format!("cannot call a {}", other.type_name()),
            )
            .into()),
        }
    }

    fn call_closure(&mut self, closure: &Arc<Closure>, args: &[Value]) -> EvalResult {
        let mut env = self.bind_closure_args(closure, args.to_vec(), false)?;
        let mut iterations = 0u32;
        loop {
            match self.eval_body(&closure.body, &env) {
                Err(Flow::Recur(vals)) => {
                    iterations += 1;
                    if iterations > self.limits.max_iterations {
                        return Err(Error::new(
                            ErrorKind::MaxIterationsExceeded,
                            format!("loop limit of {} iterations exceeded", self.limits.max_iterations),
                        )
                        .into());
                    }
                    env = self.bind_closure_args(closure, vals, true)?;
                }
                other => return other,
            }
        }
    }

    /// `from_recur`: recur passes exactly one value per binder slot, so a
    /// variadic slot receives its value directly instead of being
    /// collected from trailing arguments.
    fn bind_closure_args(
        &mut self,
        closure: &Arc<Closure>,
        mut args: Vec<Value>,
        from_recur: bool,
    ) -> Result<Arc<Env>, Flow> {
        let required = closure.params.len();
        let label = closure.name.as_deref().unwrap_or("fn");
        let ok_arity = match (&closure.rest, from_recur, args.len()) {
            (Some(_), true, n) => n == required + 1,
            (Some(_), false, n) => n >= required,
            (None, _, n) => n == required,
        };
        if !ok_arity {
            let expected = match &closure.rest {
                Some(_) => format!("at least {}", required),
                None => required.to_string(),
            };
            return Err(Error::arity(label, expected, args.len()).into());
        }

        let mut env = Arc::clone(&closure.env);
        if let Some(name) = &closure.name {
            env = Env::with_binding(&env, name.clone(), Value::Closure(Arc::clone(closure)));
        }
        let restargs = args.split_off(required);
        for (pattern, value) in closure.params.iter().zip(args) {
            env = self.bind_pattern(&env, pattern, value)?;
        }
        if let Some(rest_pattern) = &closure.rest {
            let rest_value = if from_recur {
                restargs.into_iter().next().unwrap_or(Value::Nil)
            } else {
                Value::Vector(restargs)
            };
            env = self.bind_pattern(&env, rest_pattern, rest_value)?;
        }
        Ok(env)
    }

    fn eval_loop(
        &mut self,
        bindings: &[(Pattern, Node)],
        body: &[Node],
        env: &Arc<Env>,
    ) -> EvalResult {
        let mut local = Arc::clone(env);
        for (pattern, value_node) in bindings {
            let value = self.eval(value_node, &local)?;
            local = self.bind_pattern(&local, pattern, value)?;
        }
        let mut iterations = 0u32;
        loop {
            match self.eval_body(body, &local) {
                Err(Flow::Recur(vals)) => {
                    iterations += 1;
                    if iterations > self.limits.max_iterations {
                        return Err(Error::new(
                            ErrorKind::MaxIterationsExceeded,
                            format!("loop limit of {} iterations exceeded", self.limits.max_iterations),
                        )
                        .into());
                    }
                    let mut rebound = Arc::clone(env);
                    for ((pattern, _), value) in bindings.iter().zip(vals) {
                        rebound = self.bind_pattern(&rebound, pattern, value)?;
                    }
                    local = rebound;
                }
                other => return other,
            }
        }
    }

    /// True when the predicate accepts the item; keywords test field
    /// truthiness, sets test membership, everything else is called.
    pub fn call_pred(&mut self, pred: &Value, item: &Value) -> Result<bool, Flow> {
        match pred {
            Value::Keyword(k) => match item {
                Value::Map(m) => Ok(flex_get(m, &MapKey::Keyword(k.clone()))
                    .map(Value::is_truthy)
                    .unwrap_or(false)),
                _ => Ok(false),
            },
            Value::Set(items) => Ok(items.contains(item)),
            _ => Ok(self.call_value(pred, std::slice::from_ref(item))?.is_truthy()),
        }
    }

    // ------------------------------------------------------------------
    // Pattern matching
    // ------------------------------------------------------------------

    pub fn bind_pattern(
        &mut self,
        env: &Arc<Env>,
        pattern: &Pattern,
        value: Value,
    ) -> Result<Arc<Env>, Flow> {
        match pattern {
            Pattern::Var(name) => Ok(Env::with_binding(env, name.clone(), value)),
            Pattern::Seq { items, rest, as_name } => {
                let elements = match &value {
                    Value::Vector(v) => v.clone(),
                    other => {
                        return Err(Error::new(
                            ErrorKind::DestructureError,
                            format!("cannot destructure {} with a sequence pattern", other.type_name()),
                        )
                        .into());
                    }
                };
                if elements.len() < items.len() {
                    return Err(Error::new(
                        ErrorKind::DestructureError,
                        format!(
                            "sequence pattern needs at least {} elements, got {}",
                            items.len(),
                            elements.len()
                        ),
                    )
                    .into());
                }
                let mut env = Arc::clone(env);
                let mut iter = elements.into_iter();
                for item_pattern in items {
                    let v = iter.next().unwrap_or(Value::Nil);
                    env = self.bind_pattern(&env, item_pattern, v)?;
                }
                if let Some(rest_pattern) = rest {
                    env = self.bind_pattern(&env, rest_pattern, Value::Vector(iter.collect()))?;
                }
                if let Some(name) = as_name {
                    env = Env::with_binding(&env, name.clone(), value);
                }
                Ok(env)
            }
            Pattern::MapKeys { entries, as_name } => {
                let map = match &value {
                    Value::Map(m) => Some(m.clone()),
                    // destructuring nil binds every name to nil
                    Value::Nil => None,
                    other => {
                        return Err(Error::new(
                            ErrorKind::DestructureError,
                            format!("cannot destructure {} with a map pattern", other.type_name()),
                        )
                        .into());
                    }
                };
                let mut env = Arc::clone(env);
                for entry in entries {
                    let found = map.as_ref().and_then(|m| flex_get(m, &entry.key)).cloned();
                    let v = match (found, &entry.default) {
                        (Some(v), _) => v,
                        (None, Some(default)) => self.eval(default, &env)?,
                        (None, None) => Value::Nil,
                    };
                    env = Env::with_binding(&env, entry.local.clone(), v);
                }
                if let Some(name) = as_name {
                    env = Env::with_binding(&env, name.clone(), value);
                }
                Ok(env)
            }
        }
    }

    // ------------------------------------------------------------------
    // Tool invocation
    // ------------------------------------------------------------------

    fn eval_tool_call(&mut self, name: &str, args: &[Node], env: &Arc<Env>) -> EvalResult {
        let mut arg_vals = Vec::with_capacity(args.len());
        for arg in args {
            arg_vals.push(self.eval(arg, env)?);
        }
        let arg_map = assemble_tool_args(name, &arg_vals)?;
        let string_args = normalize_tool_args(&arg_map);

        if self.tools.is_empty() {
            return Err(Error::new(ErrorKind::UnknownTool, "No tools available").into());
        }
        let Some(tool) = self.tools.get(name) else {
            return Err(Error::new(
                ErrorKind::UnknownTool,
                format!("Unknown tool '{}'. Available tools: {}", name, self.tools.names().join(", ")),
            )
            .into());
        };
        let tool = tool.clone();

        let string_args = match tool.signature.as_ref().and_then(|s| s.params.as_deref()) {
            Some(params) => {
                let (validated, _warnings) = crate::signature::validate_input(
                    params,
                    &string_args,
                    crate::signature::ValidationMode::Enabled,
                )?;
                validated
            }
            None => string_args,
        };

        let args_value = Value::Map(
            string_args
                .iter()
                .map(|(k, v)| (MapKey::Str(k.clone()), v.clone()))
                .collect(),
        );

        if tool.cache {
            let cache_key = cache_key(name, &string_args);
            if let Some(hit) = self.ec.tool_cache.get(&cache_key).cloned() {
                debug!("tool {} served from cache", name);
                self.record_tool_call(name, args_value, hit.deep_size() as u64, 0, true);
                self.charge(&hit)?;
                return Ok(hit);
            }
        }

        debug!("invoking tool {}", name);
        let started = Instant::now();
        let outcome = tool.call(&string_args);
        let duration_ms = started.elapsed().as_millis() as u64;

        let raw = match outcome {
            Ok(v) => v,
            Err(reason) => {
                self.record_tool_call(name, args_value, 0, duration_ms, false);
                return Err(Error::new(ErrorKind::ToolError, format!("{}: {}", name, reason)).into());
            }
        };

        let result = match self.unwrap_tool_envelope(name, raw) {
            Ok(v) => v,
            Err(flow) => {
                self.record_tool_call(name, args_value, 0, duration_ms, false);
                return Err(flow);
            }
        };

        self.record_tool_call(name, args_value, result.deep_size() as u64, duration_ms, false);
        if let Some(return_type) = tool.signature.as_ref().map(|s| &s.return_type) {
            crate::signature::validate_output(return_type, &result).map_err(|e| {
                Error::new(
                    ErrorKind::ValidationError,
                    format!("tool '{}' {}", name, e.message),
                )
            })?;
        }
        if tool.cache {
            self.ec.tool_cache.insert(cache_key(name, &string_args), result.clone());
        }
        self.charge(&result)?;
        Ok(result)
    }

    /// Interpret `{ok v}` / `{error reason}` / `{__child_step__ ...}`
    /// envelopes in a tool's returned value.
    fn unwrap_tool_envelope(&mut self, name: &str, raw: Value) -> EvalResult {
        let Value::Map(m) = &raw else { return Ok(raw) };

        let child_key = MapKey::Str("__child_step__".to_string());
        if let Some(child) = flex_get(m, &child_key) {
            if let Some(step) = Step::from_value(child) {
                if let Some(trace_id) = &step.trace_id {
                    self.ec.child_traces.push(trace_id.clone());
                }
                self.ec.child_steps.push(step);
            }
            if let Some(summary) = flex_get(m, &MapKey::Str("summary".to_string())) {
                self.ec.summaries.insert(name.to_string(), summary.render_string());
            }
            return Ok(flex_get(m, &MapKey::Str("value".to_string()))
                .cloned()
                .unwrap_or(Value::Nil));
        }
        if m.len() == 1 {
            if let Some(ok) = flex_get(m, &MapKey::Str("ok".to_string())) {
                return Ok(ok.clone());
            }
            if let Some(reason) = flex_get(m, &MapKey::Str("error".to_string())) {
                return Err(Error::new(
                    ErrorKind::ToolError,
                    format!("{}: {}", name, reason.render_string()),
                )
                .into());
            }
        }
        Ok(raw)
    }

    fn record_tool_call(
        &mut self,
        name: &str,
        args: Value,
        result_size: u64,
        duration_ms: u64,
        cached: bool,
    ) {
        if self.ec.in_parallel {
            // branch side effects are dropped with the branch
            return;
        }
        self.ec.tool_calls.push(ToolCall {
            name: name.to_string(),
            args,
            result_size,
            duration_ms,
            cached,
        });
    }
}

/// Tool args must be a single map or keyword pairs; positional arguments
/// are rejected.
fn assemble_tool_args(name: &str, vals: &[Value]) -> Result<Map, Error> {
    match vals {
        [] => Ok(Map::new()),
        [Value::Map(m)] => Ok(m.clone()),
        [Value::Nil] => Ok(Map::new()),
        _ => {
            let keyword_pairs = vals.len() % 2 == 0
                && vals.iter().step_by(2).all(|v| matches!(v, Value::Keyword(_)));
            if keyword_pairs {
                let mut out = Map::new();
                for pair in vals.chunks(2) {
                    let Value::Keyword(k) = &pair[0] else { unreachable!() };
                    out.insert(MapKey::Keyword(k.clone()), pair[1].clone());
                }
                return Ok(out);
            }
            Err(Error::new(
                ErrorKind::InvalidToolArgs,
                format!("tool/{} takes a single map argument: (tool/{} {{:key value}})", name, name),
            ))
        }
    }
}

/// Kebab-case keyword keys become snake_case string keys, recursively.
fn normalize_tool_args(args: &Map) -> StrMap {
    args.iter()
        .map(|(k, v)| (normalize_key(k), normalize_tool_value(v)))
        .collect()
}

fn normalize_key(key: &MapKey) -> String {
    match key {
        MapKey::Keyword(s) => s.replace('-', "_"),
        MapKey::Str(s) => s.clone(),
    }
}

fn normalize_tool_value(value: &Value) -> Value {
    match value {
        Value::Map(m) => Value::Map(
            m.iter()
                .map(|(k, v)| (MapKey::Str(normalize_key(k)), normalize_tool_value(v)))
                .collect(),
        ),
        Value::Vector(items) => Value::Vector(items.iter().map(normalize_tool_value).collect()),
        other => other.clone(),
    }
}

/// Content-addressed cache key: name plus canonically rendered args
/// (map keys sorted at every level).
fn cache_key(name: &str, args: &StrMap) -> String {
    fn canonical(value: &Value, out: &mut String) {
        match value {
            Value::Map(m) => {
                let mut entries: Vec<(&MapKey, &Value)> = m.iter().collect();
                entries.sort_by(|a, b| a.0.name().cmp(b.0.name()));
                out.push('{');
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    out.push_str(&k.to_string());
                    out.push(' ');
                    canonical(v, out);
                }
                out.push('}');
            }
            Value::Vector(items) => {
                out.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push(' ');
                    }
                    canonical(item, out);
                }
                out.push(']');
            }
            other => out.push_str(&other.to_string()),
        }
    }
    let mut keys: Vec<&String> = args.keys().collect();
    keys.sort_unstable();
    let mut out = format!("{}(", name);
    for (i, k) in keys.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        out.push_str(k);
        out.push('=');
        canonical(&args[k.as_str()], &mut out);
    }
    out.push(')');
    out
}
