// pmap/pcalls semantics: input-order results, snapshot isolation, branch
// side-effect discipline, and error propagation.

use ptc_lisp::{run, Limits, RunOptions, Step, StrMap, Tool, ToolRegistry, Value};

fn eval_src(src: &str) -> Step {
    run(src, RunOptions::default())
}

fn ret(src: &str) -> Value {
    let step = eval_src(src);
    assert!(step.is_success(), "source {:?} -> {:?} / {:?}", src, step.error, step.fail);
    step.return_value
}

#[test]
fn test_pmap_preserves_input_order() {
    assert_eq!(ret("(pmap inc [1 2 3 4 5 6 7 8])"), ret("[2 3 4 5 6 7 8 9]"));
}

#[test]
fn test_pmap_over_more_elements_than_workers() {
    let step = eval_src("(count (pmap inc (range 200)))");
    assert_eq!(step.return_value, Value::Int(200));
    assert_eq!(step.pmap_calls.len(), 1);
    assert_eq!(step.pmap_calls[0].branches.len(), 200);
}

#[test]
fn test_pcalls_returns_results_in_argument_order() {
    assert_eq!(
        ret("(pcalls (fn [] 1) (fn [] (+ 1 1)) #(+ 1 2))"),
        ret("[1 2 3]")
    );
    assert_eq!(ret("(pcalls)"), ret("[]"));
}

#[test]
fn test_branches_see_memory_snapshot_and_writes_are_discarded() {
    let step = eval_src(
        "(do (def base 10) (def out (pmap (fn [n] (do (def scratch n) (+ n base))) [1 2])) [out base])",
    );
    assert!(step.is_success(), "error: {:?}", step.error);
    // branches read the caller's snapshot; their defs never escape
    assert_eq!(step.return_value, ret("[[11 12] 10]"));
    assert_eq!(step.memory.get("base"), Some(&Value::Int(10)));
    assert!(!step.memory.contains_key("scratch"));
}

#[test]
fn test_prints_inside_branches_are_dropped() {
    let step = eval_src("(do (println \"outer\") (pmap (fn [n] (println \"inner\" n)) [1 2 3]))");
    assert!(step.is_success());
    assert_eq!(step.prints, vec!["outer".to_string()]);
}

#[test]
fn test_branch_tool_calls_are_not_recorded() {
    let mut tools = ToolRegistry::new();
    tools.register("t", Tool::new(|_: &StrMap| Ok(Value::Int(1))));
    let step = run(
        "(pmap (fn [_] (tool/t {})) [1 2 3])",
        RunOptions { tools, ..RunOptions::default() },
    );
    assert!(step.is_success(), "error: {:?}", step.error);
    assert!(step.tool_calls.is_empty());
    assert_eq!(step.pmap_calls.len(), 1);
}

#[test]
fn test_branch_error_aborts_with_lowest_index() {
    let step = eval_src("(pmap (fn [n] (if (even? n) (/ n 0) n)) [1 2 3 4])");
    let error = step.error.expect("expected error");
    assert_eq!(error.reason, "arithmetic_error");
}

#[test]
fn test_branch_return_signal_propagates() {
    let step = eval_src("(pmap (fn [n] (if (= n 2) (return :hit) n)) [1 2 3])");
    assert!(step.is_success());
    assert_eq!(step.return_value, Value::Keyword("hit".into()));
}

#[test]
fn test_pmap_records_branch_timings() {
    let step = eval_src("(pmap inc [1 2 3])");
    let fanout = &step.pmap_calls[0];
    assert_eq!(fanout.kind, "pmap");
    let mut indices: Vec<usize> = fanout.branches.iter().map(|b| b.index).collect();
    indices.sort_unstable();
    assert_eq!(indices, vec![0, 1, 2]);
    assert!(fanout.branches.iter().all(|b| b.ok));
}

#[test]
fn test_pmap_branch_cap() {
    let options = RunOptions {
        limits: Limits { pmap_max_branches: 4, ..Limits::default() },
        ..RunOptions::default()
    };
    let step = run("(pmap inc [1 2 3 4 5])", options);
    assert_eq!(step.error.unwrap().reason, "type_error");
}

#[test]
fn test_nested_parallelism_inside_sequential_code() {
    assert_eq!(
        ret("(map (fn [xs] (apply + (pmap inc xs))) [[1 2] [3 4]])"),
        ret("[5 9]")
    );
}

#[test]
fn test_pmap_over_map_gets_entry_pairs() {
    assert_eq!(
        ret("(sort (pmap (fn [[k v]] v) {:a 1 :b 2}))"),
        ret("[1 2]")
    );
}
