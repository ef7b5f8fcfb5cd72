// End-to-end coverage of the runtime contract: parse → analyze → sandbox
// → memory contract → signature validation, driven through run().

use ptc_lisp::{run, Limits, Map, MapKey, RunOptions, Step, StrMap, Tool, ToolRegistry, Value};

fn ctx_from_json(json: serde_json::Value) -> Map {
    match Value::from_json(&json) {
        Value::Map(m) => m,
        other => panic!("context must be a map, got {:?}", other),
    }
}

fn eval_src(src: &str) -> Step {
    run(src, RunOptions::default())
}

fn ret(src: &str) -> Value {
    let step = eval_src(src);
    assert!(step.is_success(), "expected success, got {:?} / {:?}", step.error, step.fail);
    step.return_value
}

fn error_reason(step: &Step) -> String {
    step.error.as_ref().expect("expected an error step").reason.clone()
}

// ============================================================================
// §8.3 end-to-end scenarios
// ============================================================================

#[test]
fn test_s1_filter_and_sum() {
    let options = RunOptions {
        context: ctx_from_json(serde_json::json!({
            "expenses": [
                {"category": "travel", "amount": 100},
                {"category": "food", "amount": 50},
                {"category": "travel", "amount": 200},
            ]
        })),
        ..RunOptions::default()
    };
    let step = run(
        "(->> ctx/expenses (filter (where :category = \"travel\")) (sum-by :amount))",
        options,
    );
    assert!(step.is_success());
    assert_eq!(step.return_value, Value::Int(300));
    assert!(step.memory.is_empty());
}

#[test]
fn test_s2_def_persistence_across_turns() {
    let context = ctx_from_json(serde_json::json!({
        "employees": [
            {"name": "a", "salary": 80_000},
            {"name": "b", "salary": 150_000},
            {"name": "c", "salary": 200_000},
        ]
    }));
    let turn1 = run(
        "(do (def high-paid (filter (where :salary > 100000) ctx/employees)) (count high-paid))",
        RunOptions { context: context.clone(), ..RunOptions::default() },
    );
    assert!(turn1.is_success());
    assert_eq!(turn1.return_value, Value::Int(2));
    match turn1.memory.get("high-paid") {
        Some(Value::Vector(items)) => assert_eq!(items.len(), 2),
        other => panic!("expected two high-paid employees in memory, got {:?}", other),
    }

    let turn2 = run(
        "(count high-paid)",
        RunOptions { context, memory: turn1.memory.clone(), ..RunOptions::default() },
    );
    assert!(turn2.is_success());
    assert_eq!(turn2.return_value, Value::Int(2));
}

#[test]
fn test_s3_tool_call_with_keyword_coercion() {
    let mut tools = ToolRegistry::new();
    tools.register(
        "fetch",
        Tool::new(|args: &StrMap| {
            assert_eq!(args.get("id"), Some(&Value::Int(7)));
            assert_eq!(args.len(), 1);
            Ok(Value::from_json(&serde_json::json!([
                {"status": "active"},
                {"status": "inactive"},
            ])))
        }),
    );
    let step = run(
        "(->> (tool/fetch {:id 7}) (filter (where :status = :active)) (count))",
        RunOptions { tools, ..RunOptions::default() },
    );
    assert!(step.is_success(), "error: {:?}", step.error);
    assert_eq!(step.return_value, Value::Int(1));
    assert_eq!(step.tool_calls.len(), 1);
    let recorded = &step.tool_calls[0];
    assert_eq!(recorded.name, "fetch");
    match &recorded.args {
        Value::Map(m) => assert_eq!(m.get(&MapKey::Str("id".into())), Some(&Value::Int(7))),
        other => panic!("expected string-keyed args, got {:?}", other),
    }
}

#[test]
fn test_s4_return_with_signature_validation() {
    let options = RunOptions {
        signature: Some("{count :int, _ids [:int]}".to_string()),
        ..RunOptions::default()
    };
    let step = run("(return {:count 3 :_ids [1 2 3]})", options);
    assert!(step.is_success(), "error: {:?}", step.error);
    assert_eq!(step.signature.as_deref(), Some("{count :int, _ids [:int]}"));
    match &step.return_value {
        Value::Map(m) => {
            assert_eq!(m.get(&MapKey::Keyword("count".into())), Some(&Value::Int(3)));
        }
        other => panic!("expected map, got {:?}", other),
    }

    let bad = run(
        "(return {:count \"3\" :_ids [1 2 3]})",
        RunOptions {
            signature: Some("{count :int, _ids [:int]}".to_string()),
            ..RunOptions::default()
        },
    );
    assert_eq!(error_reason(&bad), "validation_error");
    assert!(bad.error.as_ref().unwrap().message.contains("return.count"));
}

#[test]
fn test_s5_timeout_on_tight_loop() {
    let mut memory = StrMap::new();
    memory.insert("keep".to_string(), Value::Int(1));
    let options = RunOptions {
        memory: memory.clone(),
        limits: Limits {
            timeout_ms: 50,
            max_iterations: u32::MAX,
            ..Limits::default()
        },
        ..RunOptions::default()
    };
    let step = run("(loop [i 0] (recur (inc i)))", options);
    assert_eq!(error_reason(&step), "timeout");
    assert_eq!(step.memory, memory);
}

#[test]
fn test_s6_pmap_failure_rolls_back_and_records_fanout() {
    let mut tools = ToolRegistry::new();
    tools.register("good", Tool::new(|_: &StrMap| Ok(Value::Int(1))));
    tools.register("bad", Tool::new(|_: &StrMap| Err("nope".to_string())));
    let mut memory = StrMap::new();
    memory.insert("keep".to_string(), Value::Int(1));

    let step = run(
        "(pmap (fn [n] (if (= n 2) (tool/bad {}) (tool/good {}))) [1 2 3])",
        RunOptions { tools, memory: memory.clone(), ..RunOptions::default() },
    );
    assert_eq!(error_reason(&step), "tool_error");
    assert_eq!(step.memory, memory);
    assert_eq!(step.pmap_calls.len(), 1);
    let fanout = &step.pmap_calls[0];
    assert_eq!(fanout.kind, "pmap");
    assert_eq!(fanout.branches.len(), 3);
    assert!(fanout.branches.iter().any(|b| !b.ok));
}

// ============================================================================
// §8.1 invariants
// ============================================================================

#[test]
fn test_transactional_rollback_on_runtime_error() {
    let mut memory = StrMap::new();
    memory.insert("stable".to_string(), Value::Int(1));
    let step = run(
        "(do (def x 42) (/ 1 0))",
        RunOptions { memory: memory.clone(), ..RunOptions::default() },
    );
    assert_eq!(error_reason(&step), "arithmetic_error");
    assert_eq!(step.memory, memory);
    assert!(!step.memory.contains_key("x"));
}

#[test]
fn test_ctx_is_never_mutated() {
    let context = ctx_from_json(serde_json::json!({"xs": [1, 2, 3]}));
    let before = context.clone();
    let step = run(
        "(do (def doubled (map #(* % 2) ctx/xs)) (conj ctx/xs 99))",
        RunOptions { context: context.clone(), ..RunOptions::default() },
    );
    assert!(step.is_success());
    assert_eq!(context, before);
}

#[test]
fn test_signal_semantics() {
    assert_eq!(ret("(return 42)"), Value::Int(42));

    let step = eval_src("(fail {:reason :data-missing :message \"no rows\"})");
    assert!(step.error.is_none());
    let fail = step.fail.expect("fail signal expected");
    assert_eq!(fail.reason, "data-missing");
    assert_eq!(fail.message, "no rows");

    // fail rolls the namespace back
    let step = eval_src("(do (def x 1) (fail \"stop\"))");
    assert!(step.memory.is_empty());
    assert_eq!(step.fail.unwrap().reason, "runtime");
}

#[test]
fn test_return_unwinds_through_surrounding_constructs() {
    assert_eq!(ret("(let [x 1] (map (fn [n] (if (= n 2) (return :found) n)) [1 2 3]))"),
        Value::Keyword("found".into()));
}

#[test]
fn test_truthiness_only_nil_and_false_are_falsy() {
    for (src, expected) in [
        ("(if 0 1 0)", 1),
        ("(if \"\" 1 0)", 1),
        ("(if [] 1 0)", 1),
        ("(if {} 1 0)", 1),
        ("(if nil 1 0)", 0),
        ("(if false 1 0)", 0),
        ("(if true 1 0)", 1),
    ] {
        assert_eq!(ret(src), Value::Int(expected), "source: {}", src);
    }
}

#[test]
fn test_pmap_matches_sequential_map() {
    assert_eq!(
        ret("(pmap #(* % 2) [1 2 3 4 5])"),
        ret("(map #(* % 2) [1 2 3 4 5])")
    );
}

#[test]
fn test_key_coercion_consistency() {
    let context = ctx_from_json(serde_json::json!({
        "rows": [{"k": 2}, {"k": 1}]
    }));
    for f in ["sum-by", "avg-by", "pluck"] {
        let keyword = run(
            &format!("({} :k ctx/rows)", f),
            RunOptions { context: context.clone(), ..RunOptions::default() },
        );
        let string = run(
            &format!("({} \"k\" ctx/rows)", f),
            RunOptions { context: context.clone(), ..RunOptions::default() },
        );
        assert_eq!(keyword.return_value, string.return_value, "builtin: {}", f);
    }
}

#[test]
fn test_division_always_floats() {
    assert_eq!(ret("(/ 6 3)"), Value::Float(2.0));
    assert_eq!(ret("(/ 7 2)"), Value::Float(3.5));
}

#[test]
fn test_predicate_builder_vacuity() {
    assert_eq!(ret("(filter (all-of) [1 2])"), ret("[1 2]"));
    assert_eq!(ret("(filter (any-of) [1 2])"), ret("[]"));
    assert_eq!(ret("(filter (none-of) [1 2])"), ret("[1 2]"));
}

#[test]
fn test_empty_aggregations() {
    assert_eq!(ret("(sum-by :x [])"), Value::Int(0));
    assert_eq!(ret("(avg-by :x [])"), Value::Nil);
    assert_eq!(ret("(min-by :x [])"), Value::Nil);
    assert_eq!(ret("(max-by :x [])"), Value::Nil);
}

#[test]
fn test_value_print_parse_round_trip() {
    let first = ret("[1 2.5 \"x\" :k #{1} {:a [1 nil true]}]");
    let reparsed = ret(&first.to_string());
    assert_eq!(first, reparsed);
}

// ============================================================================
// §8.2 boundary scenarios
// ============================================================================

#[test]
fn test_unbalanced_parens_is_parse_error_with_position() {
    let step = eval_src("(+ 1 (inc 2)");
    assert_eq!(error_reason(&step), "parse_error");
    assert!(step.error.unwrap().message.contains("line 1"));
}

#[test]
fn test_where_missing_operator_fails_before_execution() {
    let mut tools = ToolRegistry::new();
    tools.register("boom", Tool::new(|_: &StrMap| panic!("must not run")));
    let step = run(
        "(do (tool/boom {}) (filter (where :status \"active\") []))",
        RunOptions { tools, ..RunOptions::default() },
    );
    assert_eq!(error_reason(&step), "analysis_error");
    assert!(step.tool_calls.is_empty());
}

#[test]
fn test_loop_iteration_cap() {
    let step = eval_src("(loop [i 0] (recur (inc i)))");
    assert_eq!(error_reason(&step), "max_iterations_exceeded");
}

#[test]
fn test_memory_exceeded_with_rollback() {
    let mut memory = StrMap::new();
    memory.insert("keep".to_string(), Value::Int(1));
    let options = RunOptions {
        memory: memory.clone(),
        limits: Limits { max_iterations: u32::MAX, ..Limits::default() },
        ..RunOptions::default()
    };
    let step = run("(loop [v []] (recur (into v (range 10000))))", options);
    assert_eq!(error_reason(&step), "memory_exceeded");
    assert_eq!(step.memory, memory);
}

#[test]
fn test_tool_error_envelope_is_runtime_error_not_fail() {
    let mut tools = ToolRegistry::new();
    tools.register("broken", Tool::new(|_: &StrMap| {
        let mut m = Map::new();
        m.insert(MapKey::Str("error".into()), Value::Str("boom".into()));
        Ok(Value::Map(m))
    }));
    let mut memory = StrMap::new();
    memory.insert("keep".to_string(), Value::Int(1));

    let step = run(
        "(do (def x 1) (tool/broken {}))",
        RunOptions { tools, memory: memory.clone(), ..RunOptions::default() },
    );
    assert_eq!(error_reason(&step), "tool_error");
    assert!(step.fail.is_none());
    assert_eq!(step.memory, memory);
    assert_eq!(step.tool_calls.len(), 1);
}

#[test]
fn test_symbol_budget_rejects_before_execution() {
    let options = RunOptions {
        limits: Limits { max_symbols: 3, ..Limits::default() },
        ..RunOptions::default()
    };
    let step = run("(let [alpha 1 beta 2 gamma 3] (+ alpha beta gamma))", options);
    assert_eq!(error_reason(&step), "symbol_limit_exceeded");
}

// ============================================================================
// Tool contract details
// ============================================================================

#[test]
fn test_unknown_tool_messages() {
    let step = eval_src("(tool/fetch {:id 1})");
    assert_eq!(error_reason(&step), "unknown_tool");
    assert!(step.error.unwrap().message.contains("No tools available"));

    let mut tools = ToolRegistry::new();
    tools.register("alpha", Tool::new(|_: &StrMap| Ok(Value::Nil)));
    tools.register("beta", Tool::new(|_: &StrMap| Ok(Value::Nil)));
    let step = run("(tool/gamma {})", RunOptions { tools, ..RunOptions::default() });
    let message = step.error.unwrap().message;
    assert!(message.contains("alpha, beta"), "message: {}", message);
}

#[test]
fn test_positional_tool_args_rejected() {
    let mut tools = ToolRegistry::new();
    tools.register("fetch", Tool::new(|_: &StrMap| Ok(Value::Nil)));
    let step = run("(tool/fetch 7)", RunOptions { tools, ..RunOptions::default() });
    assert_eq!(error_reason(&step), "invalid_tool_args");
}

#[test]
fn test_tool_keyword_pair_args() {
    let mut tools = ToolRegistry::new();
    tools.register(
        "fetch",
        Tool::new(|args: &StrMap| {
            assert_eq!(args.get("user_id"), Some(&Value::Int(7)));
            Ok(Value::Bool(true))
        }),
    );
    let step = run("(tool/fetch :user-id 7)", RunOptions { tools, ..RunOptions::default() });
    assert!(step.is_success(), "error: {:?}", step.error);
}

#[test]
fn test_tool_ok_envelope_unwraps() {
    let mut tools = ToolRegistry::new();
    tools.register("wrapped", Tool::new(|_: &StrMap| {
        let mut m = Map::new();
        m.insert(MapKey::Str("ok".into()), Value::Int(9));
        Ok(Value::Map(m))
    }));
    let step = run("(tool/wrapped {})", RunOptions { tools, ..RunOptions::default() });
    assert_eq!(step.return_value, Value::Int(9));
}

#[test]
fn test_cached_tool_runs_once() {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);

    let mut tools = ToolRegistry::new();
    tools.register(
        "slow",
        Tool::new(move |_: &StrMap| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Value::Int(5))
        })
        .cached(),
    );
    let step = run(
        "[(tool/slow {:q 1}) (tool/slow {:q 1}) (tool/slow {:q 2})]",
        RunOptions { tools, ..RunOptions::default() },
    );
    assert!(step.is_success(), "error: {:?}", step.error);
    assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 2);
    assert_eq!(step.tool_calls.len(), 3);
    assert!(step.tool_calls[1].cached);
    assert!(!step.tool_calls[2].cached);
    assert_eq!(step.tool_cache.len(), 2);
}

#[test]
fn test_child_step_envelope_attaches_sub_step() {
    let mut child = Step::new();
    child.return_value = Value::Int(1);
    child.trace_id = Some("trace-42".to_string());
    let child_value = Value::from_json(&serde_json::to_value(&child).unwrap());

    let mut tools = ToolRegistry::new();
    tools.register(
        "agent",
        Tool::new(move |_: &StrMap| {
            let mut m = Map::new();
            m.insert(MapKey::Str("__child_step__".into()), child_value.clone());
            m.insert(MapKey::Str("value".into()), Value::Int(10));
            m.insert(MapKey::Str("summary".into()), Value::Str("child ran".into()));
            Ok(Value::Map(m))
        }),
    );
    let step = run("(tool/agent {})", RunOptions { tools, ..RunOptions::default() });
    assert!(step.is_success(), "error: {:?}", step.error);
    assert_eq!(step.return_value, Value::Int(10));
    assert_eq!(step.child_steps.len(), 1);
    assert_eq!(step.child_steps[0].return_value, Value::Int(1));
    assert_eq!(step.child_traces, vec!["trace-42".to_string()]);
    assert_eq!(step.summaries.get("agent").map(String::as_str), Some("child ran"));
}

#[test]
fn test_tool_input_signature_coerces_and_validates() {
    let mut tools = ToolRegistry::new();
    tools.register(
        "typed",
        Tool::new(|args: &StrMap| {
            assert_eq!(args.get("id"), Some(&Value::Int(7)));
            Ok(Value::Int(1))
        })
        .with_signature("(id :int) -> :int")
        .unwrap(),
    );
    // "7" coerces with a warning
    let step = run("(tool/typed {:id \"7\"})", RunOptions { tools, ..RunOptions::default() });
    assert!(step.is_success(), "error: {:?}", step.error);

    let mut tools = ToolRegistry::new();
    tools.register(
        "typed",
        Tool::new(|_: &StrMap| Ok(Value::Int(1)))
            .with_signature("(id :int) -> :int")
            .unwrap(),
    );
    let step = run("(tool/typed {})", RunOptions { tools, ..RunOptions::default() });
    assert_eq!(error_reason(&step), "validation_error");
}

// ============================================================================
// Runtime options
// ============================================================================

#[test]
fn test_float_precision_rounds_recursively() {
    let options = RunOptions { float_precision: Some(2), ..RunOptions::default() };
    let step = run("{:avg (/ 10 3) :all [(/ 1 3)]}", options);
    assert!(step.is_success());
    match &step.return_value {
        Value::Map(m) => {
            assert_eq!(m.get(&MapKey::Keyword("avg".into())), Some(&Value::Float(3.33)));
            assert_eq!(
                m.get(&MapKey::Keyword("all".into())),
                Some(&Value::Vector(vec![Value::Float(0.33)]))
            );
        }
        other => panic!("expected map, got {:?}", other),
    }
}

#[test]
fn test_turn_history_and_budget() {
    let options = RunOptions {
        turn_history: vec![Value::Int(11), Value::Int(22), Value::Int(33)],
        budget: Some(Value::from_json(&serde_json::json!({"turns_left": 2}))),
        ..RunOptions::default()
    };
    let step = run("[*1 *2 *3 (get (budget/remaining) :turns_left)]", options);
    assert!(step.is_success(), "error: {:?}", step.error);
    assert_eq!(
        step.return_value,
        Value::Vector(vec![Value::Int(11), Value::Int(22), Value::Int(33), Value::Int(2)])
    );
}

#[test]
fn test_turn_history_missing_entries_are_nil() {
    assert_eq!(ret("*1"), Value::Nil);
}

#[test]
fn test_context_filter_drops_unreferenced_collections() {
    let context = ctx_from_json(serde_json::json!({
        "used": [1, 2, 3],
        "unused": [4, 5, 6],
        "limit": 10
    }));
    let step = run(
        "(count ctx/used)",
        RunOptions { context: context.clone(), ..RunOptions::default() },
    );
    assert_eq!(step.return_value, Value::Int(3));

    // the unbound-key listing reflects the filtered context: the
    // unreferenced collection is gone, scalars survive
    let step = run(
        "[ctx/used ctx/whoops]",
        RunOptions { context, ..RunOptions::default() },
    );
    let message = step.error.unwrap().message;
    assert!(message.contains("used"));
    assert!(message.contains("limit"));
    assert!(!message.contains("unused"), "message: {}", message);
}

#[test]
fn test_missing_ctx_key_lists_available() {
    let context = ctx_from_json(serde_json::json!({"orders": []}));
    let step = run("(count ctx/missing)", RunOptions { context, ..RunOptions::default() });
    assert_eq!(error_reason(&step), "unbound_var");
    assert!(step.error.unwrap().message.contains("orders"));
}

// ============================================================================
// Journal / task operations
// ============================================================================

#[test]
fn test_task_journals_once_across_turns() {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let mut tools = ToolRegistry::new();
    tools.register(
        "expensive",
        Tool::new(move |_: &StrMap| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Value::Int(99))
        }),
    );

    let src = "(task :load (tool/expensive {}))";
    let turn1 = run(src, RunOptions { tools: tools.clone(), ..RunOptions::default() });
    assert_eq!(turn1.return_value, Value::Int(99));
    assert_eq!(turn1.journal.get("load"), Some(&Value::Int(99)));

    let turn2 = run(
        src,
        RunOptions { tools, journal: turn1.journal.clone(), ..RunOptions::default() },
    );
    assert_eq!(turn2.return_value, Value::Int(99));
    assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[test]
fn test_task_reset_and_step_done() {
    let step = eval_src(
        "(do (task :t 1) (step-done :t \"loaded the data\") (task-reset :t) (task :t 2))",
    );
    assert!(step.is_success(), "error: {:?}", step.error);
    assert_eq!(step.return_value, Value::Int(2));
    assert_eq!(step.summaries.get("t").map(String::as_str), Some("loaded the data"));
    assert_eq!(step.journal.get("t"), Some(&Value::Int(2)));
}

#[test]
fn test_journal_survives_failure() {
    let step = eval_src("(do (task :done 1) (/ 1 0))");
    assert_eq!(error_reason(&step), "arithmetic_error");
    assert_eq!(step.journal.get("done"), Some(&Value::Int(1)));
}
