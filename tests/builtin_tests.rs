// Language-level coverage of special forms, destructuring, and the
// builtin library, driven through run() with literal sources.

use ptc_lisp::{run, MapKey, RunOptions, Step, Value};

fn eval_src(src: &str) -> Step {
    run(src, RunOptions::default())
}

fn ret(src: &str) -> Value {
    let step = eval_src(src);
    assert!(step.is_success(), "source {:?} -> {:?} / {:?}", src, step.error, step.fail);
    step.return_value
}

fn reason(src: &str) -> String {
    eval_src(src).error.expect("expected an error step").reason
}

#[test]
fn test_literals_and_collections() {
    assert_eq!(ret("42"), Value::Int(42));
    assert_eq!(ret("2.5"), Value::Float(2.5));
    assert_eq!(ret("\"hi\""), Value::Str("hi".into()));
    assert_eq!(ret(":k"), Value::Keyword("k".into()));
    assert_eq!(ret("nil"), Value::Nil);
    assert_eq!(ret("[1 2 3]"), Value::Vector(vec![Value::Int(1), Value::Int(2), Value::Int(3)]));
    assert_eq!(ret("(count #{1 2 2 3})"), Value::Int(3));
}

#[test]
fn test_char_literals_are_one_grapheme_strings() {
    assert_eq!(ret("\\a"), Value::Str("a".into()));
    assert_eq!(ret("\\newline"), Value::Str("\n".into()));
    assert_eq!(ret("(str \\h \\i)"), Value::Str("hi".into()));
    assert_eq!(ret("(char? \\a)"), Value::Bool(true));
}

#[test]
fn test_map_literal_key_restriction() {
    assert_eq!(reason("{1 :x}"), "validation_error");
    assert!(eval_src("{:a 1 \"b\" 2}").is_success());
}

#[test]
fn test_let_and_destructuring() {
    assert_eq!(ret("(let [x 1 y (inc x)] (+ x y))"), Value::Int(3));
    assert_eq!(ret("(let [[a b & more] [1 2 3 4]] [a b more])"),
        ret("[1 2 [3 4]]"));
    assert_eq!(ret("(let [[a b :as all] [1 2]] [a b all])"), ret("[1 2 [1 2]]"));
    assert_eq!(
        ret("(let [{:keys [a b] :or {b 9} :as m} {:a 1}] [a b (count m)])"),
        ret("[1 9 1]")
    );
    assert_eq!(ret("(let [{x :px} {:px 5}] x)"), Value::Int(5));
    assert_eq!(ret("(let [{:keys [a]} nil] a)"), Value::Nil);
    assert_eq!(reason("(let [[a b] [1]] a)"), "destructure_error");
}

#[test]
fn test_fn_closures_and_variadics() {
    assert_eq!(ret("((fn [x y] (+ x y)) 2 3)"), Value::Int(5));
    assert_eq!(ret("((fn [x & more] [x more]) 1 2 3)"), ret("[1 [2 3]]"));
    assert_eq!(ret("(let [make (fn [n] (fn [x] (+ x n))) add5 (make 5)] (add5 2))"), Value::Int(7));
    assert_eq!(reason("((fn [x] x) 1 2)"), "invalid_arity");
}

#[test]
fn test_anonymous_fn_placeholders() {
    assert_eq!(ret("(#(+ % 10) 5)"), Value::Int(15));
    assert_eq!(ret("(#(+ %1 %2) 1 2)"), Value::Int(3));
    assert_eq!(ret("(map #(* % %) [1 2 3])"), ret("[1 4 9]"));
}

#[test]
fn test_defn_and_recursion() {
    assert_eq!(
        ret("(do (defn fact [n] (if (pos? n) (* n (fact (dec n))) 1)) (fact 5))"),
        Value::Int(120)
    );
    // non-tail recursion depth is bounded
    assert_eq!(
        reason("(do (defn f [n] (+ 1 (f n))) (f 0))"),
        "max_iterations_exceeded"
    );
}

#[test]
fn test_loop_recur_accumulator() {
    assert_eq!(
        ret("(loop [i 0 acc 0] (if (= i 5) acc (recur (inc i) (+ acc i))))"),
        Value::Int(10)
    );
}

#[test]
fn test_cond_when_if_let() {
    assert_eq!(ret("(cond false 1 :else 2)"), Value::Int(2));
    assert_eq!(ret("(cond false 1 false 2)"), Value::Nil);
    assert_eq!(ret("(when true 1 2)"), Value::Int(2));
    assert_eq!(ret("(when false 1)"), Value::Nil);
    assert_eq!(ret("(if-let [x nil] x :none)"), Value::Keyword("none".into()));
    assert_eq!(ret("(if-let [x 5] (inc x) :none)"), Value::Int(6));
    assert_eq!(ret("(when-let [x 5] (inc x))"), Value::Int(6));
}

#[test]
fn test_and_or_short_circuit_and_return_last() {
    assert_eq!(ret("(and 1 2 3)"), Value::Int(3));
    assert_eq!(ret("(and 1 nil 3)"), Value::Nil);
    assert_eq!(ret("(or nil false 3)"), Value::Int(3));
    assert_eq!(ret("(or nil false)"), Value::Bool(false));
    assert_eq!(ret("(and)"), Value::Bool(true));
    assert_eq!(ret("(or)"), Value::Nil);
    // short-circuit: the division never runs
    assert_eq!(ret("(and false (/ 1 0))"), Value::Bool(false));
    assert_eq!(ret("(or 1 (/ 1 0))"), Value::Int(1));
}

#[test]
fn test_threading_macros() {
    assert_eq!(ret("(-> 5 inc (- 2))"), Value::Int(4));
    assert_eq!(ret("(->> [1 2 3 4] (filter even?) (map inc) (into []))"), ret("[3 5]"));
}

#[test]
fn test_keyword_and_set_in_operator_position() {
    assert_eq!(ret("(:a {:a 1})"), Value::Int(1));
    assert_eq!(ret("(:missing {:a 1} :default)"), Value::Keyword("default".into()));
    assert_eq!(ret("(#{1 2} 2)"), Value::Int(2));
    assert_eq!(ret("(#{1 2} 3)"), Value::Nil);
    assert_eq!(reason("(42 1)"), "not_callable");
}

#[test]
fn test_var_reference_literal() {
    assert_eq!(ret("(do (defn f [x] (inc x)) (map #'f [1 2]))"), ret("[2 3]"));
    assert_eq!(ret("(do (def answer 42) #'answer)").to_string(), "#'answer");
}

#[test]
fn test_filters_with_keyword_set_and_where() {
    assert_eq!(
        ret("(filter :active [{:active true} {:active false} {:active 1}])"),
        ret("[{:active true} {:active 1}]")
    );
    assert_eq!(ret("(filter #{2 3} [1 2 3 4])"), ret("[2 3]"));
    assert_eq!(ret("(remove #{2 3} [1 2 3 4])"), ret("[1 4]"));
    assert_eq!(
        ret("(find (where :n > 1) [{:n 1} {:n 2} {:n 3}])"),
        ret("{:n 2}")
    );
}

#[test]
fn test_filter_over_map_yields_pairs() {
    assert_eq!(
        ret("(filter (fn [[k v]] (pos? v)) {:a 1 :b -1})"),
        ret("[[:a 1]]")
    );
    assert_eq!(ret("(map (fn [[k v]] v) {:a 1 :b 2})"), ret("[1 2]"));
}

#[test]
fn test_where_paths_and_operators() {
    assert_eq!(
        ret("(filter (where [:user :age] >= 18) [{:user {:age 20}} {:user {:age 10}} {}])"),
        ret("[{:user {:age 20}}]")
    );
    assert_eq!(
        ret("(filter (where :tag in [\"a\" \"b\"]) [{:tag \"a\"} {:tag \"c\"}])"),
        ret("[{:tag \"a\"}]")
    );
    assert_eq!(
        ret("(filter (where :tags includes \"x\") [{:tags [\"x\" \"y\"]} {:tags []}])"),
        ret("[{:tags [\"x\" \"y\"]}]")
    );
    assert_eq!(ret("(filter (where :active) [{:active true} {}])"), ret("[{:active true}]"));
}

#[test]
fn test_pred_combinators_and_juxt() {
    assert_eq!(
        ret("(filter (all-of (where :n > 1) (where :n < 4)) [{:n 1} {:n 2} {:n 5}])"),
        ret("[{:n 2}]")
    );
    assert_eq!(
        ret("(filter (any-of (where :n = 1) (where :n = 5)) [{:n 1} {:n 2} {:n 5}])"),
        ret("[{:n 1} {:n 5}]")
    );
    assert_eq!(
        ret("(filter (none-of (where :n = 2)) [{:n 1} {:n 2}])"),
        ret("[{:n 1}]")
    );
    assert_eq!(ret("((juxt :a :b) {:a 1 :b 2})"), ret("[1 2]"));
    assert_eq!(ret("(map (juxt inc dec) [1 5])"), ret("[[2 0] [6 4]]"));
}

#[test]
fn test_group_by_and_aggregates() {
    let grouped = ret(
        "(group-by :category [{:category \"a\" :v 1} {:category \"b\" :v 2} {:category \"a\" :v 3}])",
    );
    match grouped {
        Value::Map(m) => {
            assert_eq!(m.len(), 2);
            match m.get(&MapKey::Str("a".into())) {
                Some(Value::Vector(items)) => assert_eq!(items.len(), 2),
                other => panic!("expected bucket, got {:?}", other),
            }
        }
        other => panic!("expected map, got {:?}", other),
    }
    // non-string group keys render to strings
    let by_n = ret("(keys (group-by :n [{:n 1} {:n 2}]))");
    assert_eq!(by_n, ret("[\"1\" \"2\"]"));

    assert_eq!(ret("(group-by even? [1 2 3 4])"), ret("{\"false\" [1 3], \"true\" [2 4]}"));
}

#[test]
fn test_sort_and_sort_by() {
    assert_eq!(ret("(sort [3 1 2])"), ret("[1 2 3]"));
    assert_eq!(
        ret("(sort-by :n [{:n 3} {:n 1} {:n 2}])"),
        ret("[{:n 1} {:n 2} {:n 3}]")
    );
    assert_eq!(ret("(sort-by count [\"aaa\" \"a\" \"aa\"])"), ret("[\"a\" \"aa\" \"aaa\"]"));
}

#[test]
fn test_some_every_not_any() {
    assert_eq!(ret("(some even? [1 2 3])"), Value::Bool(true));
    assert_eq!(ret("(some :v [{:a 1} {:v 7}])"), Value::Int(7));
    assert_eq!(ret("(some even? [1 3])"), Value::Nil);
    assert_eq!(ret("(every? pos? [1 2])"), Value::Bool(true));
    assert_eq!(ret("(every? pos? [1 -2])"), Value::Bool(false));
    assert_eq!(ret("(not-any? neg? [1 2])"), Value::Bool(true));
}

#[test]
fn test_apply_spreads_trailing_collection() {
    assert_eq!(ret("(apply + [1 2 3])"), Value::Int(6));
    assert_eq!(ret("(apply + 10 [1 2])"), Value::Int(13));
    assert_eq!(ret("(apply max [3 9 4])"), Value::Int(9));
}

#[test]
fn test_map_access_and_updates() {
    assert_eq!(ret("(get {:a 1} \"a\")"), Value::Int(1));
    assert_eq!(ret("(get-in {:a {:b [10 20]}} [:a :b 1])"), Value::Int(20));
    assert_eq!(ret("(get-in {} [:a :b] :fallback)"), Value::Keyword("fallback".into()));
    assert_eq!(ret("(assoc {:a 1} :b 2 :c 3)"), ret("{:a 1 :b 2 :c 3}"));
    assert_eq!(ret("(assoc-in {} [:a :b] 1)"), ret("{:a {:b 1}}"));
    assert_eq!(ret("(update {:n 1} :n inc)"), ret("{:n 2}"));
    assert_eq!(ret("(update {:n 1} :n + 10)"), ret("{:n 11}"));
    assert_eq!(ret("(update-in {:a {:n 1}} [:a :n] inc)"), ret("{:a {:n 2}}"));
    assert_eq!(ret("(dissoc {:a 1 :b 2} :a)"), ret("{:b 2}"));
    assert_eq!(ret("(merge {:a 1} {:a 2 :b 3})"), ret("{:a 2 :b 3}"));
    assert_eq!(ret("(update-vals {:a 1 :b 2} inc)"), ret("{:a 2 :b 3}"));
    assert_eq!(ret("(select-keys {:a 1 :b 2 :c 3} [:a :c])"), ret("{:a 1 :c 3}"));
}

#[test]
fn test_entries_key_val_and_extremum_keys() {
    assert_eq!(ret("(entries {:a 1})"), ret("[[:a 1]]"));
    assert_eq!(ret("(map key {:a 1 :b 2})"), ret("[:a :b]"));
    assert_eq!(ret("(map val {:a 1 :b 2})"), ret("[1 2]"));
    assert_eq!(ret("(max-key val (entries {:a 1 :b 5}))"), ret("[:b 5]"));
    assert_eq!(ret("(min-key :n [{:n 3} {:n 1}])"), ret("{:n 1}"));
}

#[test]
fn test_collection_staples() {
    assert_eq!(ret("(take 2 [1 2 3])"), ret("[1 2]"));
    assert_eq!(ret("(drop 2 [1 2 3])"), ret("[3]"));
    assert_eq!(ret("(take-while pos? [1 2 -1 3])"), ret("[1 2]"));
    assert_eq!(ret("(drop-while pos? [1 2 -1 3])"), ret("[-1 3]"));
    assert_eq!(ret("(distinct [1 2 1 3])"), ret("[1 2 3]"));
    assert_eq!(ret("(concat [1] [2 3] [])"), ret("[1 2 3]"));
    assert_eq!(ret("(flatten [1 [2 [3]]])"), ret("[1 2 3]"));
    assert_eq!(ret("(interleave [1 2] [:a :b])"), ret("[1 :a 2 :b]"));
    assert_eq!(ret("(zip [1 2] [:a :b :c])"), ret("[[1 :a] [2 :b]]"));
    assert_eq!(ret("(reverse [1 2 3])"), ret("[3 2 1]"));
    assert_eq!(ret("(range 2 8 2)"), ret("[2 4 6]"));
    assert_eq!(ret("(contains? {:a 1} :a)"), Value::Bool(true));
    assert_eq!(ret("(contains? #{1 2} 2)"), Value::Bool(true));
    assert_eq!(ret("(into #{} [1 1 2])"), ret("#{1 2}"));
    assert_eq!(ret("(into {} [[:a 1]])"), ret("{:a 1}"));
}

#[test]
fn test_nth_and_bounds() {
    assert_eq!(ret("(nth [10 20] 1)"), Value::Int(20));
    assert_eq!(ret("(nth [10 20] 5)"), Value::Nil);
    assert_eq!(ret("(nth [10 20] 5 :none)"), Value::Keyword("none".into()));
}

#[test]
fn test_arithmetic_with_nil_is_type_error() {
    assert_eq!(reason("(+ 1 nil)"), "type_error");
    assert_eq!(reason("(< nil 1)"), "type_error");
}

#[test]
fn test_println_captures_and_truncates() {
    let step = eval_src("(do (println \"total:\" (+ 1 2)) (println [\\h \\i]) 0)");
    assert!(step.is_success());
    assert_eq!(step.prints, vec!["total: 3".to_string(), "hi".to_string()]);

    let step = run(
        "(println (join (map (fn [_] \"x\") (range 3000))))",
        RunOptions::default(),
    );
    assert!(step.is_success(), "error: {:?}", step.error);
    assert_eq!(step.prints.len(), 1);
    assert!(step.prints[0].ends_with("..."));
    assert!(step.prints[0].len() <= 2003 + 3);
}

#[test]
fn test_regex_pipeline() {
    assert_eq!(
        ret("(let [r (re-pattern \"\\\\d+\")] (re-find r \"order 42\"))"),
        Value::Str("42".into())
    );
    assert_eq!(
        ret("(let [r (re-pattern \",\")] (split \"a,b\" r))"),
        ret("[\"a\" \"b\"]")
    );
    assert_eq!(reason("(re-find \"\\\\d+\" \"42\")"), "type_error");
}

#[test]
fn test_string_namespace_normalization_runs() {
    assert_eq!(ret("(clojure.string/upper-case \"abc\")"), Value::Str("ABC".into()));
    assert_eq!(ret("(str/join \"-\" [\"a\" \"b\"])"), Value::Str("a-b".into()));
    assert_eq!(ret("(core/inc 1)"), Value::Int(2));
    assert_eq!(ret("(set/contains? #{1} 1)"), Value::Bool(true));
}

#[test]
fn test_nil_true_false_cannot_be_rebound() {
    assert_eq!(reason("(def nil 1)"), "analysis_error");
    assert_eq!(reason("(def true 1)"), "analysis_error");
}
