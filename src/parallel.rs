// ABOUTME: Parallel fan-out for pmap and pcalls over isolated branch evaluators

use crate::eval::{EvalCtx, EvalResult, Flow, Machine};
use crate::error::{Error, ErrorKind};
use crate::step::{PmapBranch, PmapCall};
use crate::value::Value;
use crossbeam_channel::unbounded;
use log::debug;
use std::time::{Duration, Instant};

struct BranchOutcome {
    index: usize,
    result: Result<Value, Flow>,
    duration_ms: u64,
    child_steps: Vec<crate::step::Step>,
    child_traces: Vec<String>,
    heap_used: usize,
}

/// `(pmap f coll)`: one branch per element, input-order results.
pub fn pmap(parent: &mut Machine<'_>, f: Value, items: Vec<Value>) -> EvalResult {
    let calls: Vec<(Value, Vec<Value>)> =
        items.into_iter().map(|item| (f.clone(), vec![item])).collect();
    run_parallel(parent, "pmap", calls)
}

/// `(pcalls f1 ... fN)`: one branch per thunk, argument-order results.
pub fn pcalls(parent: &mut Machine<'_>, thunks: Vec<Value>) -> EvalResult {
    let calls: Vec<(Value, Vec<Value>)> = thunks.into_iter().map(|f| (f, Vec::new())).collect();
    run_parallel(parent, "pcalls", calls)
}

fn run_parallel(
    parent: &mut Machine<'_>,
    kind: &str,
    calls: Vec<(Value, Vec<Value>)>,
) -> EvalResult {
    let limits = parent.limits;
    if calls.len() > limits.pmap_max_branches {
        return Err(Error::new(
            ErrorKind::TypeError,
            format!("{}: {} branches exceed the limit of {}", kind, calls.len(), limits.pmap_max_branches),
        )
        .into());
    }
    if calls.is_empty() {
        return Ok(Value::Vector(Vec::new()));
    }

    let started = Instant::now();
    let total = calls.len();
    let worker_count = total.min(limits.pmap_max_workers).max(1);
    let branch_deadline = limits
        .pmap_timeout_ms
        .map(|ms| Instant::now() + Duration::from_millis(ms));
    debug!("{}: {} branches across {} workers", kind, total, worker_count);

    // every branch shares the same read-only snapshot of the caller state
    let ctx = parent.ctx;
    let tools = parent.tools;
    let interrupt = parent.interrupt;
    let turn_history = parent.turn_history;
    let budget = parent.budget;
    let user_ns = parent.ec.user_ns.clone();
    let journal = parent.ec.journal.clone();
    let summaries = parent.ec.summaries.clone();
    let tool_cache = parent.ec.tool_cache.clone();
    let heap_base = parent.ec.heap_used;

    let (task_tx, task_rx) = unbounded::<(usize, (Value, Vec<Value>))>();
    for task in calls.into_iter().enumerate() {
        let _ = task_tx.send(task);
    }
    drop(task_tx);
    let (result_tx, result_rx) = unbounded::<BranchOutcome>();

    let mut outcomes: Vec<Option<BranchOutcome>> = Vec::new();
    outcomes.resize_with(total, || None);

    std::thread::scope(|scope| {
        for _ in 0..worker_count {
            let task_rx = task_rx.clone();
            let result_tx = result_tx.clone();
            let user_ns = user_ns.clone();
            let journal = journal.clone();
            let summaries = summaries.clone();
            let tool_cache = tool_cache.clone();
            scope.spawn(move || {
                while let Ok((index, (f, args))) = task_rx.recv() {
                    let mut ec = EvalCtx::seeded(
                        user_ns.clone(),
                        journal.clone(),
                        summaries.clone(),
                        tool_cache.clone(),
                    );
                    ec.in_parallel = true;
                    ec.heap_used = heap_base;
                    let mut machine =
                        Machine::new(ctx, tools, limits, interrupt, turn_history, budget, ec);
                    machine.branch_deadline = branch_deadline;
                    let branch_started = Instant::now();
                    let result = machine.call_value(&f, &args);
                    let outcome = BranchOutcome {
                        index,
                        result,
                        duration_ms: branch_started.elapsed().as_millis() as u64,
                        child_steps: std::mem::take(&mut machine.ec.child_steps),
                        child_traces: std::mem::take(&mut machine.ec.child_traces),
                        heap_used: machine.ec.heap_used,
                    };
                    if result_tx.send(outcome).is_err() {
                        return;
                    }
                }
            });
        }
        drop(result_tx);
        while let Ok(outcome) = result_rx.recv() {
            let index = outcome.index;
            outcomes[index] = Some(outcome);
        }
    });

    // assemble the fan-out record in input order
    let mut branches = Vec::with_capacity(total);
    let mut results: Vec<Value> = Vec::with_capacity(total);
    let mut failure: Option<Flow> = None;
    let mut peak_heap = parent.ec.heap_used;
    for slot in outcomes {
        let outcome = match slot {
            Some(o) => o,
            None => {
                failure.get_or_insert(Flow::Error(Error::new(
                    ErrorKind::TypeError,
                    format!("{}: branch worker terminated unexpectedly", kind),
                )));
                continue;
            }
        };
        peak_heap = peak_heap.max(outcome.heap_used);
        branches.push(PmapBranch {
            index: outcome.index,
            duration_ms: outcome.duration_ms,
            ok: outcome.result.is_ok(),
            child_steps: outcome.child_steps,
            child_traces: outcome.child_traces,
        });
        match outcome.result {
            Ok(v) => results.push(v),
            Err(flow) => {
                if failure.is_none() {
                    failure = Some(flow);
                }
            }
        }
    }
    parent.ec.heap_used = peak_heap;
    parent.ec.pmap_calls.push(PmapCall {
        kind: kind.to_string(),
        duration_ms: started.elapsed().as_millis() as u64,
        branches,
    });

    if let Some(flow) = failure {
        return Err(flow);
    }
    let out = Value::Vector(results);
    parent.charge(&out)?;
    Ok(out)
}
