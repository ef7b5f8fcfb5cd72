// ABOUTME: CLI for running programs and a REPL driving the per-turn contract

use clap::Parser;
use log::LevelFilter;
use ptc_lisp::{history_entry, run, Limits, Map, RunOptions, Step, StrMap, Value};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Parser)]
#[command(
    name = "ptc-lisp",
    version,
    about = "Run PTC-Lisp programs in a sandboxed, deterministic runtime"
)]
struct Cli {
    /// Program file to run; starts a REPL when omitted
    file: Option<PathBuf>,

    /// JSON file providing the request context (accessed as ctx/<key>)
    #[arg(long)]
    context: Option<PathBuf>,

    /// JSON file providing the starting memory
    #[arg(long)]
    memory: Option<PathBuf>,

    /// Return signature validated against step.return
    #[arg(long)]
    signature: Option<String>,

    /// Wall-clock limit in milliseconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Heap budget in bytes
    #[arg(long)]
    max_heap: Option<usize>,

    /// Distinct symbol/keyword budget
    #[arg(long)]
    max_symbols: Option<usize>,

    /// Round floats in the result to this many decimals
    #[arg(long)]
    float_precision: Option<u32>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let level = match cli.verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    let _ = simple_logger::SimpleLogger::new().with_level(level).init();

    let context = match cli.context.as_deref().map(load_context).transpose() {
        Ok(ctx) => ctx.unwrap_or_default(),
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let memory = match cli.memory.as_deref().map(load_memory).transpose() {
        Ok(m) => m.unwrap_or_default(),
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let mut limits = Limits::default();
    if let Some(ms) = cli.timeout {
        limits.timeout_ms = ms;
    }
    if let Some(bytes) = cli.max_heap {
        limits.max_heap_bytes = bytes;
    }
    if let Some(n) = cli.max_symbols {
        limits.max_symbols = n;
    }

    match &cli.file {
        Some(file) => run_file(file, context, memory, &cli, limits),
        None => repl(context, memory, &cli, limits),
    }
}

fn load_context(path: &Path) -> Result<Map, String> {
    let json = load_json(path)?;
    match Value::from_json(&json) {
        Value::Map(m) => Ok(m),
        _ => Err(format!("{}: context must be a JSON object", path.display())),
    }
}

fn load_memory(path: &Path) -> Result<StrMap, String> {
    let json = load_json(path)?;
    match json {
        serde_json::Value::Object(obj) => Ok(obj
            .iter()
            .map(|(k, v)| (k.clone(), Value::from_json(v)))
            .collect()),
        _ => Err(format!("{}: memory must be a JSON object", path.display())),
    }
}

fn load_json(path: &Path) -> Result<serde_json::Value, String> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
    serde_json::from_str(&text).map_err(|e| format!("{}: invalid JSON: {}", path.display(), e))
}

fn options_for_turn(
    context: Map,
    memory: StrMap,
    cli: &Cli,
    limits: Limits,
    turn_history: Vec<Value>,
    turns: u32,
) -> RunOptions {
    RunOptions {
        context,
        memory,
        signature: cli.signature.clone(),
        float_precision: cli.float_precision,
        limits,
        turn_history,
        turns,
        ..RunOptions::default()
    }
}

fn run_file(file: &Path, context: Map, memory: StrMap, cli: &Cli, limits: Limits) -> ExitCode {
    let source = match std::fs::read_to_string(file) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("error: cannot read {}: {}", file.display(), e);
            return ExitCode::FAILURE;
        }
    };
    let step = run(&source, options_for_turn(context, memory, cli, limits, Vec::new(), 0));
    println!("{}", step.to_json_string());
    if step.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

/// Interactive loop: each submitted form runs as one turn, with memory,
/// journal, and turn history threaded to the next line.
fn repl(context: Map, mut memory: StrMap, cli: &Cli, limits: Limits) -> ExitCode {
    println!("PTC-Lisp {} (each line runs as one turn)", env!("CARGO_PKG_VERSION"));
    println!("Type :quit or Ctrl-D to exit.");

    let mut editor = match DefaultEditor::new() {
        Ok(editor) => editor,
        Err(e) => {
            eprintln!("error: cannot start line editor: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let mut journal = StrMap::new();
    let mut summaries = indexmap::IndexMap::new();
    let mut tool_cache = StrMap::new();
    let mut turn_history: Vec<Value> = Vec::new();
    let mut turns: u32 = 0;

    loop {
        let line = match editor.readline("ptc> ") {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("error: {}", e);
                break;
            }
        };
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if trimmed == ":quit" || trimmed == ":exit" {
            break;
        }
        let _ = editor.add_history_entry(trimmed);

        turns += 1;
        let mut options = options_for_turn(
            context.clone(),
            memory.clone(),
            cli,
            limits.clone(),
            turn_history.clone(),
            turns,
        );
        options.journal = journal.clone();
        options.summaries = summaries.clone();
        options.tool_cache = tool_cache.clone();

        let step = run(trimmed, options);
        render_step(&step);

        // the per-turn contract: memory and cooperative state thread on
        memory = step.memory.clone();
        journal = step.journal.clone();
        summaries = step.summaries.clone();
        tool_cache = step.tool_cache.clone();
        if step.is_success() {
            turn_history.insert(0, history_entry(&step.return_value, limits.turn_history_bytes));
            turn_history.truncate(limits.turn_history_len);
        }
    }
    ExitCode::SUCCESS
}

fn render_step(step: &Step) {
    for line in &step.prints {
        println!("{}", line);
    }
    if let Some(error) = &step.error {
        eprintln!("{}", error.message);
        return;
    }
    if let Some(fail) = &step.fail {
        eprintln!("fail({}): {}", fail.reason, fail.message);
        return;
    }
    println!("{}", step.return_value);
}
