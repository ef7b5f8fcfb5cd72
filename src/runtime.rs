// ABOUTME: Runtime entry point: run(source, options) -> Step

use crate::analyzer::analyze_program;
use crate::config::Limits;
use crate::context::{filter_context, referenced_data_keys};
use crate::error::Error;
use crate::eval::Flow;
use crate::parser::parse_program;
use crate::sandbox::{self, CarriedState};
use crate::signature::{parse_signature, validate_output, Signature};
use crate::step::{Fail, Step, StepError, Usage};
use crate::tools::ToolRegistry;
use crate::value::{flex_get, round_floats, truncate_bytes, Map, MapKey, StrMap, Value};
use indexmap::IndexMap;
use log::debug;
use std::collections::HashSet;
use std::sync::Arc;

/// Options for one `run` call. Everything is per-call; the runtime holds
/// no process-wide state.
pub struct RunOptions {
    pub context: Map,
    pub memory: StrMap,
    pub tools: ToolRegistry,
    /// Declared return signature, validated against `step.return`.
    pub signature: Option<String>,
    /// Round every float in the returned value to this many decimals.
    pub float_precision: Option<u32>,
    pub limits: Limits,
    /// Previous turn results, most recent first (`*1`, `*2`, `*3`).
    pub turn_history: Vec<Value>,
    /// Drop collection-valued ctx entries the program never references.
    pub filter_context: bool,
    /// Host budget info returned by `(budget/remaining)`.
    pub budget: Option<Value>,
    pub journal: StrMap,
    pub summaries: IndexMap<String, String>,
    pub tool_cache: StrMap,
    pub turns: u32,
    pub trace_id: Option<String>,
    pub parent_trace_id: Option<String>,
    pub field_descriptions: IndexMap<String, String>,
}

impl Default for RunOptions {
    fn default() -> Self {
        RunOptions {
            context: Map::new(),
            memory: StrMap::new(),
            tools: ToolRegistry::new(),
            signature: None,
            float_precision: None,
            limits: Limits::default(),
            turn_history: Vec::new(),
            filter_context: true,
            budget: None,
            journal: StrMap::new(),
            summaries: IndexMap::new(),
            tool_cache: StrMap::new(),
            turns: 0,
            trace_id: None,
            parent_trace_id: None,
            field_descriptions: IndexMap::new(),
        }
    }
}

/// Execute one program. Always returns a Step: parse/analysis failures,
/// runtime errors, and limit breaches all surface as error Steps with the
/// entry memory intact.
pub fn run(source: &str, options: RunOptions) -> Step {
    let entry_memory = options.memory.clone();
    let mut step = Step::new();
    step.memory = entry_memory.clone();
    step.signature = options.signature.clone();
    step.turns = options.turns;
    step.trace_id = options.trace_id.clone();
    step.parent_trace_id = options.parent_trace_id.clone();
    step.field_descriptions = options.field_descriptions.clone();
    step.journal = options.journal.clone();
    step.summaries = options.summaries.clone();
    step.tool_cache = options.tool_cache.clone();

    let signature: Option<Signature> = match &options.signature {
        Some(raw) => match parse_signature(raw) {
            Ok(sig) => Some(sig),
            Err(e) => return error_step(step, &e),
        },
        None => None,
    };

    let forms = match parse_program(source) {
        Ok(forms) => forms,
        Err(e) => return error_step(step, &e),
    };
    let memory_keys: HashSet<String> = options.memory.keys().cloned().collect();
    let program = match analyze_program(&forms, &memory_keys, options.limits.max_symbols) {
        Ok(program) => program,
        Err(e) => return error_step(step, &e),
    };

    let ctx = if options.filter_context {
        filter_context(&options.context, &referenced_data_keys(&program))
    } else {
        options.context.clone()
    };

    let carried = CarriedState {
        user_ns: options.memory,
        journal: options.journal,
        summaries: options.summaries,
        tool_cache: options.tool_cache,
    };
    let outcome = sandbox::execute(
        program,
        ctx,
        Arc::new(options.tools),
        options.limits.clone(),
        options.turn_history,
        options.budget,
        carried,
    );

    step.usage = Usage {
        duration_ms: outcome.duration_ms,
        memory_bytes: outcome.ec.heap_used as u64,
    };
    step.prints = outcome.ec.prints;
    step.tool_calls = outcome.ec.tool_calls;
    step.pmap_calls = outcome.ec.pmap_calls;
    step.child_steps = outcome.ec.child_steps;
    step.child_traces = outcome.ec.child_traces;
    // cooperative state survives errors: completed tasks stay journaled
    step.journal = outcome.ec.journal;
    step.summaries = outcome.ec.summaries;
    step.tool_cache = outcome.ec.tool_cache;

    match outcome.result {
        Ok(value) | Err(Flow::Return(value)) => {
            step.return_value = value;
            step.memory = outcome.ec.user_ns;
        }
        Err(Flow::Fail(value)) => {
            step.fail = Some(make_fail(&value));
            // fail rolls the namespace back for atomicity
            step.memory = entry_memory.clone();
        }
        Err(Flow::Recur(_)) => {
            let e = Error::analysis("recur outside loop or fn");
            step.error = Some(StepError::from(&e));
            step.memory = entry_memory.clone();
        }
        Err(Flow::Error(e)) => {
            debug!("execution failed: {}", e.render());
            step.error = Some(StepError::from(&e));
            step.memory = entry_memory.clone();
        }
    }

    if step.is_success() {
        if let Some(precision) = options.float_precision {
            step.return_value = round_floats(&step.return_value, precision);
        }
        if let Some(sig) = &signature {
            if let Err(e) = validate_output(&sig.return_type, &step.return_value) {
                step.error = Some(StepError::from(&e));
                step.return_value = Value::Nil;
                step.memory = entry_memory;
            }
        }
    }
    step
}

fn error_step(mut step: Step, e: &Error) -> Step {
    step.error = Some(StepError::from(e));
    step
}

/// Map a `(fail value)` payload to the Step's fail record: maps provide
/// `:reason` and `:message`, anything else renders as the message with
/// reason `runtime`.
fn make_fail(value: &Value) -> Fail {
    match value {
        Value::Map(m) => {
            let reason = flex_get(m, &MapKey::Keyword("reason".to_string()))
                .map(|v| match v {
                    Value::Keyword(k) => k.clone(),
                    other => other.render_string(),
                })
                .unwrap_or_else(|| "runtime".to_string());
            let message = flex_get(m, &MapKey::Keyword("message".to_string()))
                .map(Value::render_string)
                .unwrap_or_else(|| value.to_string());
            Fail { reason, message }
        }
        other => Fail { reason: "runtime".to_string(), message: other.render_string() },
    }
}

/// Truncate a previous turn's result for `*1`/`*2`/`*3`: small values
/// pass through intact, large ones become a truncated rendering.
pub fn history_entry(value: &Value, max_bytes: usize) -> Value {
    let rendered = value.to_string();
    if rendered.len() <= max_bytes {
        value.clone()
    } else {
        Value::Str(truncate_bytes(&rendered, max_bytes))
    }
}
