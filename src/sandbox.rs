// ABOUTME: Isolated execution of one program under time and heap limits

use crate::ast::Node;
use crate::config::Limits;
use crate::env::Env;
use crate::error::{Error, ErrorKind};
use crate::eval::{EvalCtx, Flow, Machine};
use crate::tools::ToolRegistry;
use crate::value::{Map, StrMap, Value};
use crossbeam_channel::{bounded, RecvTimeoutError};
use indexmap::IndexMap;
use log::{debug, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Shared cancellation token plus the wall-clock deadline. The evaluator
/// polls it between nodes; the sandbox flips it when the deadline passes
/// so the worker and every parallel branch unwind cooperatively.
pub struct Interrupt {
    cancelled: AtomicBool,
    deadline: Instant,
}

impl Interrupt {
    pub fn with_timeout_ms(ms: u64) -> Self {
        Interrupt {
            cancelled: AtomicBool::new(false),
            deadline: Instant::now() + Duration::from_millis(ms),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn expired(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed) || Instant::now() >= self.deadline
    }
}

/// State carried across turns, threaded into the evaluator's context.
#[derive(Default, Clone)]
pub struct CarriedState {
    pub user_ns: StrMap,
    pub journal: StrMap,
    pub summaries: IndexMap<String, String>,
    pub tool_cache: StrMap,
}

pub struct SandboxOutcome {
    pub result: Result<Value, Flow>,
    pub ec: EvalCtx,
    pub duration_ms: u64,
}

/// Run one analyzed program on a dedicated worker thread. On deadline the
/// worker (and any pmap branches) are cancelled through the shared token
/// and abandoned; the caller proceeds with the rollback state.
pub fn execute(
    program: Node,
    ctx: Map,
    tools: Arc<ToolRegistry>,
    limits: Limits,
    turn_history: Vec<Value>,
    budget: Option<Value>,
    carried: CarriedState,
) -> SandboxOutcome {
    let started = Instant::now();
    let timeout_ms = limits.timeout_ms;
    let interrupt = Arc::new(Interrupt::with_timeout_ms(timeout_ms));
    let worker_interrupt = Arc::clone(&interrupt);
    // entry snapshot: restored when the worker is abandoned on timeout
    let entry = carried.clone();
    let (tx, rx) = bounded(1);

    let spawned = std::thread::Builder::new()
        .name("ptc-eval".to_string())
        .stack_size(16 * 1024 * 1024)
        .spawn(move || {
            let ec = EvalCtx::seeded(
                carried.user_ns,
                carried.journal,
                carried.summaries,
                carried.tool_cache,
            );
            let mut machine = Machine::new(
                &ctx,
                &tools,
                &limits,
                &worker_interrupt,
                &turn_history,
                budget.as_ref(),
                ec,
            );
            let result = machine.eval(&program, &Env::root());
            let _ = tx.send((result, machine.ec));
        });

    if let Err(e) = spawned {
        return SandboxOutcome {
            result: Err(Flow::Error(Error::new(
                ErrorKind::TypeError,
                format!("failed to start execution worker: {}", e),
            ))),
            ec: EvalCtx::default(),
            duration_ms: started.elapsed().as_millis() as u64,
        };
    }

    // small grace so the in-band deadline check usually reports first
    let recv_deadline = Duration::from_millis(timeout_ms + 50);
    let (result, ec) = match rx.recv_timeout(recv_deadline) {
        Ok(outcome) => outcome,
        Err(RecvTimeoutError::Timeout) => {
            warn!("evaluation exceeded {} ms; cancelling worker", timeout_ms);
            interrupt.cancel();
            (
                Err(Flow::Error(Error::new(
                    ErrorKind::Timeout,
                    format!("wall-clock limit of {} ms exceeded", timeout_ms),
                ))),
                EvalCtx::seeded(entry.user_ns, entry.journal, entry.summaries, entry.tool_cache),
            )
        }
        Err(RecvTimeoutError::Disconnected) => (
            Err(Flow::Error(Error::new(
                ErrorKind::TypeError,
                "execution worker terminated unexpectedly",
            ))),
            EvalCtx::seeded(entry.user_ns, entry.journal, entry.summaries, entry.tool_cache),
        ),
    };

    let duration_ms = started.elapsed().as_millis() as u64;
    debug!("sandbox finished in {} ms", duration_ms);
    SandboxOutcome { result, ec, duration_ms }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interrupt_expires_after_deadline() {
        let i = Interrupt::with_timeout_ms(0);
        std::thread::sleep(Duration::from_millis(2));
        assert!(i.expired());
    }

    #[test]
    fn test_interrupt_cancel_is_immediate() {
        let i = Interrupt::with_timeout_ms(10_000);
        assert!(!i.expired());
        i.cancel();
        assert!(i.expired());
    }
}
