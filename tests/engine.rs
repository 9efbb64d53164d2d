use typein::{
    diagnostics::Location,
    engine::{Engine, Failure, ScriptString},
    script::{parser, scope::ScopeRef, value::ValueKind, Interpreter, Value},
    ExecutionEnvironment,
};

fn setup() -> (Interpreter, ExecutionEnvironment<ScopeRef>) {
    let mut interpreter = Interpreter::with_output(std::io::sink());
    let global = interpreter.new_global().expect("global scope");
    (interpreter, ExecutionEnvironment::new(global))
}

fn eval(source: &str) -> Value {
    let (mut interpreter, mut env) = setup();
    match interpreter.evaluate(&mut env, source, "test", 1) {
        Ok(value) => value,
        Err(_) => panic!("evaluation of {source:?} failed"),
    }
}

fn eval_exception(source: &str) -> Value {
    let (mut interpreter, mut env) = setup();
    match interpreter.evaluate(&mut env, source, "test", 1) {
        Ok(value) => panic!("expected exception, received {value:?}"),
        Err(Failure::Exception(value)) => value,
        Err(Failure::Uncatchable) => panic!("expected exception, received uncatchable failure"),
    }
}

fn expect_int(value: &Value) -> i64 {
    match value.kind() {
        ValueKind::Int(n) => *n,
        _ => panic!("expected int, found {}", value.type_name()),
    }
}

fn expect_string(value: &Value) -> String {
    match value.kind() {
        ValueKind::String(text) => text.to_utf8_lossy(),
        _ => panic!("expected string, found {}", value.type_name()),
    }
}

#[test]
fn detects_incomplete_input() {
    for source in ["1 +", "fn f() {", "\"abc", "/* open", "foo(1,", "|x|", "[1, 2", "if x { 1 } else"] {
        assert!(!parser::is_compilable_unit(source), "{source:?} should need more input");
    }
}

#[test]
fn invalid_but_finished_input_is_compilable() {
    for source in ["", "1 + 1\n", "1 +* 2", "break", "return 1", "var x = 1\n", "}"] {
        assert!(parser::is_compilable_unit(source), "{source:?} should be submitted");
    }
}

#[test]
fn evaluates_last_expression() {
    assert_eq!(expect_int(&eval("var x = 40\nx + 2")), 42);
}

#[test]
fn functions_and_closures() {
    let value = eval(
        r#"
        fn make_counter() {
            var count = 0
            return || {
                count = count + 1
                count
            }
        }
        var next = make_counter()
        next()
        next()
        "#,
    );
    assert_eq!(expect_int(&value), 2);
}

#[test]
fn logical_operators_short_circuit() {
    assert_eq!(expect_int(&eval("none || 7")), 7);
    assert!(matches!(eval("false && missing").kind(), ValueKind::Bool(false)));
}

#[test]
fn loops_with_break_and_continue() {
    let value = eval(
        r#"
        var total = 0
        var i = 0
        while true {
            i = i + 1
            if i > 10 { break }
            if i % 2 == 0 { continue }
            total = total + i
        }
        total
        "#,
    );
    assert_eq!(expect_int(&value), 25);
}

#[test]
fn nested_field_and_index_assignment() {
    let value = eval(
        r#"
        var config = {"servers": [{"port": 80}]}
        config.servers[0].port = 8080
        config.servers[0].port
        "#,
    );
    assert_eq!(expect_int(&value), 8080);
}

#[test]
fn builtins() {
    assert_eq!(expect_int(&eval("len(\"abc\") + len([1, 2]) + len({\"k\": 1})")), 6);
    assert_eq!(expect_string(&eval("type_of(1.5)")), "float");
    assert_eq!(expect_string(&eval("str([1, \"a\"])")), "[1, \"a\"]");
    assert_eq!(expect_string(&eval("\"n=\" + 3")), "n=3");
}

#[test]
fn string_iteration_is_by_code_point() {
    let value = eval("var n = 0\nfor ch in \"h\\u{1F600}!\" { n = n + 1 }\nn");
    assert_eq!(expect_int(&value), 3);
    assert_eq!(expect_int(&eval("len(\"\\u{1F600}\")")), 2);
}

#[test]
fn reference_error_carries_report() {
    let (interpreter, _) = setup();
    let exception = eval_exception("1 +\n  missing");
    let report = interpreter.error_report(&exception).expect("error has a report");
    assert_eq!(report.message, "ReferenceError: missing is not defined");
    assert_eq!(report.filename.as_deref(), Some("test"));
    assert_eq!(report.location, Some(Location::new(2, 3)));
    assert_eq!(report.source_line.as_deref(), Some("  missing"));
    assert_eq!(report.token_offset, 2);
}

#[test]
fn negative_index_is_a_range_error() {
    let exception = eval_exception("[1, 2][-1]");
    let error = exception.as_error().expect("error value");
    assert_eq!(error.kind.name(), "RangeError");
}

#[test]
fn quit_is_uncatchable_and_sets_flag() {
    let (mut interpreter, mut env) = setup();
    let result = interpreter.evaluate(&mut env, "try { quit() } catch e { 1 }", "test", 1);
    assert!(matches!(result, Err(Failure::Uncatchable)));
    assert!(env.should_quit());
}

#[test]
fn deferred_jobs_run_in_order() {
    let (mut interpreter, mut env) = setup();
    let source = r#"
        var log = ""
        defer(|| { log = log + "a" })
        defer(|x| { log = log + x }, "b")
    "#;
    interpreter
        .evaluate(&mut env, source, "test", 1)
        .expect("jobs are queued");
    assert_eq!(interpreter.pending_jobs(), 2);
    while let Some(result) = interpreter.run_next_job(&mut env) {
        assert!(result.is_ok());
    }
    let log = interpreter.evaluate(&mut env, "log", "test", 5).expect("log is defined");
    assert_eq!(expect_string(&log), "ab");
}

#[test]
fn display_and_source_conversions() {
    let (mut interpreter, mut env) = setup();
    let text = Value::string("say \"hi\"\n");
    let display = interpreter.to_display_string(&mut env, &text).expect("display");
    let source = interpreter.to_source(&mut env, &text).expect("source");
    assert_eq!(display, ScriptString::from("say \"hi\"\n"));
    assert_eq!(source, ScriptString::from("\"say \\\"hi\\\"\\n\""));
}

#[test]
fn primitives_are_not_objects() {
    let (mut interpreter, _) = setup();
    let int = Value::int(1);
    assert!(!interpreter.is_object(&int));
    let array = Value::array(vec![int]);
    assert!(interpreter.is_object(&array));
    let class = interpreter.class_name(&array).ok().flatten();
    assert_eq!(class, Some(ScriptString::from("Array")));
}

#[test]
fn integer_arithmetic_is_exact() {
    assert_eq!(expect_int(&eval("9007199254740993 + 0")), 9_007_199_254_740_993);
    assert_eq!(expect_int(&eval("9223372036854775806 + 1")), i64::MAX);
    assert_eq!(expect_int(&eval("6 / 3")), 2);
    assert_eq!(expect_int(&eval("-7 % 3")), -1);
    assert!(matches!(eval("7 / 2").kind(), ValueKind::Float(n) if *n == 3.5));
    assert!(matches!(eval("1 / 0").kind(), ValueKind::Float(n) if n.is_infinite()));
}

#[test]
fn integer_overflow_is_a_range_error() {
    for source in [
        "9223372036854775807 + 1",
        "9223372036854775807 * 2",
        "-9223372036854775807 - 2",
        "var min = -9223372036854775807 - 1\nmin / -1",
        "var min = -9223372036854775807 - 1\n-min",
    ] {
        let exception = eval_exception(source);
        let error = exception.as_error().expect("error value");
        assert_eq!(error.kind.name(), "RangeError", "{source:?}");
        assert!(error.message.starts_with("integer overflow"), "{source:?}");
    }
}

#[test]
fn quit_discards_queued_jobs() {
    let (mut interpreter, mut env) = setup();
    let result = interpreter.evaluate(&mut env, "defer(println, 1); defer(println, 2); quit()", "test", 1);
    assert!(matches!(result, Err(Failure::Uncatchable)));
    assert!(env.should_quit());
    assert_eq!(interpreter.pending_jobs(), 0);
}
