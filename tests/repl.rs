use std::{cell::RefCell, io::Write, rc::Rc};

use typein::{Interpreter, LoopState, Repl, ReplConfig, ScriptedInput};

/// Captures what scripts print through the interpreter.
#[derive(Clone, Default)]
struct SharedBuffer(Rc<RefCell<Vec<u8>>>);

impl SharedBuffer {
    fn contents(&self) -> String {
        String::from_utf8(self.0.borrow().clone()).expect("printed output is utf-8")
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

struct Session {
    out: String,
    err: String,
    printed: String,
    state: LoopState,
    prompts: Vec<String>,
    history: Vec<String>,
    remaining: usize,
    errors: usize,
    pending: usize,
    quit_requested: bool,
}

fn session(lines: &[&str]) -> Session {
    let printed = SharedBuffer::default();
    let mut repl = Repl::new(Interpreter::with_output(printed.clone()), ReplConfig::default())
        .expect("engine starts");
    let mut input = ScriptedInput::new(lines.iter().copied());
    let mut out = Vec::new();
    let mut err = Vec::new();
    let state = repl
        .run(&mut input, &mut out, &mut err)
        .expect("loop finishes without a fatal error");
    assert_eq!(state, repl.state());
    Session {
        out: String::from_utf8(out).expect("stdout is utf-8"),
        err: String::from_utf8(err).expect("stderr is utf-8"),
        printed: printed.contents(),
        state,
        prompts: input.prompts().to_vec(),
        history: input.history().to_vec(),
        remaining: input.remaining(),
        errors: repl.errors_reported(),
        pending: repl.engine().pending_jobs(),
        quit_requested: repl.environment().should_quit(),
    }
}

#[test]
fn prints_results_of_expressions() {
    let s = session(&["1 + 1", "\"a\" + \"b\"", "7 / 2"]);
    assert_eq!(s.out, "2\n\"ab\"\n3.5\n");
    assert_eq!(s.err, "");
    assert_eq!(s.state, LoopState::EndOfInput);
}

#[test]
fn void_results_print_nothing() {
    let s = session(&["var x = 41", "", "print(\"\")", "x + 1"]);
    assert_eq!(s.out, "42\n");
    assert_eq!(s.prompts, vec![">> "; 5]);
}

#[test]
fn bindings_persist_between_statements() {
    let s = session(&["var total = 0", "for n in [1, 2, 3] { total = total + n }", "total"]);
    assert_eq!(s.out, "6\n");
}

#[test]
fn continuation_prompt_until_statement_is_complete() {
    let s = session(&["fn add(a, b) {", "  return a + b", "}", "add(2, 3)"]);
    assert_eq!(s.out, "5\n");
    assert_eq!(s.prompts, vec![">> ", "... ", "... ", ">> ", ">> "]);
    assert_eq!(s.history, vec!["fn add(a, b) {", "  return a + b", "}", "add(2, 3)"]);
}

#[test]
fn empty_lines_are_not_recorded_in_history() {
    let s = session(&["", "1"]);
    assert_eq!(s.history, vec!["1"]);
}

#[test]
fn reports_runtime_error_with_source_line_and_caret() {
    let s = session(&["1", "2", "x"]);
    assert_eq!(s.out, "1\n2\n");
    assert_eq!(
        s.err,
        "typein:3:1 ReferenceError: x is not defined:\ntypein:3:1 x\ntypein:3:1 ^\n"
    );
    assert_eq!(s.errors, 1);
    assert_eq!(s.state, LoopState::EndOfInput);
}

#[test]
fn errors_inside_functions_point_at_their_definition() {
    let s = session(&["fn f() {", "  return y", "}", "f()"]);
    assert_eq!(
        s.err,
        "typein:2:10 ReferenceError: y is not defined:\n\
         typein:2:10   return y\n\
         typein:2:10 .........^\n"
    );
}

#[test]
fn reports_syntax_error_and_keeps_going() {
    let s = session(&["1 +* 2", "3"]);
    assert_eq!(
        s.err,
        "typein:1:4 SyntaxError: unexpected token in expression:\n\
         typein:1:4 1 +* 2\n\
         typein:1:4 ...^\n"
    );
    assert_eq!(s.out, "3\n");
}

#[test]
fn unfinished_statement_at_end_of_input_is_still_evaluated() {
    let s = session(&["fn f() {"]);
    assert!(s.err.contains("SyntaxError"), "stderr was {:?}", s.err);
    assert_eq!(s.state, LoopState::EndOfInput);
    assert_eq!(s.errors, 1);
}

#[test]
fn const_reassignment_includes_declaration_note() {
    let s = session(&["const k = 1", "k = 2"]);
    assert_eq!(
        s.err,
        "typein:2:1 TypeError: invalid assignment to const k:\n\
         typein:2:1 k = 2\n\
         typein:2:1 ^\n\
         typein:1:7 note: k declared here\n"
    );
}

#[test]
fn thrown_error_values_use_their_report() {
    let s = session(&["throw error(\"boom\")"]);
    assert_eq!(
        s.err,
        "typein:1:7 Error: boom:\n\
         typein:1:7 throw error(\"boom\")\n\
         typein:1:7 ......^\n"
    );
}

#[test]
fn thrown_plain_values_are_formatted() {
    let s = session(&["throw \"boom\"", "throw 42"]);
    assert_eq!(s.err, "error: \"boom\"\nerror: 42\n");
    assert_eq!(s.errors, 2);
}

#[test]
fn caught_exceptions_are_not_reported() {
    let s = session(&["try { throw error(\"inner\") } catch e { str(e) }"]);
    assert_eq!(s.out, "\"Error: inner\"\n");
    assert_eq!(s.err, "");
}

#[test]
fn quit_stops_reading_input() {
    let s = session(&["1", "quit()", "2"]);
    assert_eq!(s.out, "1\n");
    assert_eq!(s.err, "");
    assert_eq!(s.state, LoopState::Quitting);
    assert_eq!(s.remaining, 1);
}

#[test]
fn quit_cannot_be_caught() {
    let s = session(&["try { quit() } catch e { 5 }", "3"]);
    assert_eq!(s.out, "");
    assert_eq!(s.state, LoopState::Quitting);
}

#[test]
fn deferred_jobs_run_after_the_statement() {
    let s = session(&["defer(println, \"job\"); println(\"now\")", "1"]);
    assert_eq!(s.printed, "now\njob\n");
    assert_eq!(s.out, "1\n");
}

#[test]
fn quit_from_a_job_discards_the_rest_of_the_queue() {
    let s = session(&["defer(quit); defer(println, \"never\")", "println(\"unreached\")"]);
    assert_eq!(s.printed, "");
    assert_eq!(s.state, LoopState::Quitting);
    assert_eq!(s.remaining, 1);
    assert_eq!(s.pending, 0);
}

#[test]
fn quit_discards_jobs_queued_by_the_same_statement() {
    let s = session(&["defer(println, \"never\"); quit()", "1"]);
    assert_eq!(s.printed, "");
    assert_eq!(s.err, "");
    assert_eq!(s.state, LoopState::Quitting);
    assert_eq!(s.pending, 0);
}

#[test]
fn repeated_quit_in_one_statement_stays_silent() {
    let s = session(&["defer(quit); defer(quit)", "1"]);
    assert!(s.quit_requested);
    assert_eq!(s.out, "");
    assert_eq!(s.err, "");
    assert_eq!(s.errors, 0);
    assert_eq!(s.state, LoopState::Quitting);
    assert_eq!(s.remaining, 1);
    assert_eq!(s.pending, 0);
}

#[test]
fn quit_from_every_formatting_hook_stays_silent() {
    let s = session(&[
        "var o = {\"to_string\": || quit(), \"to_source\": || quit()}",
        "o",
        "1",
    ]);
    assert!(s.quit_requested);
    assert_eq!(s.out, "Object\n");
    assert_eq!(s.err, "");
    assert_eq!(s.errors, 0);
    assert_eq!(s.state, LoopState::Quitting);
    assert_eq!(s.remaining, 1);
}

#[test]
fn failing_jobs_are_reported() {
    let s = session(&["defer(|| missing)"]);
    assert_eq!(
        s.err,
        "typein:1:10 ReferenceError: missing is not defined:\n\
         typein:1:10 defer(|| missing)\n\
         typein:1:10 .........^\n"
    );
    assert_eq!(s.errors, 1);
}

#[test]
fn parser_warnings_are_printed() {
    let s = session(&["fn f() {", "  return 1", "  2", "}"]);
    assert_eq!(
        s.err,
        "typein:3:3 warning: unreachable code after return statement:\n\
         typein:3:3   2\n\
         typein:3:3 ..^\n"
    );
    assert_eq!(s.errors, 0);
}

#[test]
fn assignment_in_condition_is_a_strict_warning() {
    let s = session(&["var x = 0", "if x = 1 { x }"]);
    assert_eq!(s.out, "1\n");
    assert_eq!(
        s.err,
        "typein:2:4 strict warning: test for equality (==) mistyped as assignment (=)?:\n\
         typein:2:4 if x = 1 { x }\n\
         typein:2:4 ...^\n"
    );
}

#[test]
fn script_warnings_are_printed() {
    let s = session(&["warn(\"careful\")"]);
    assert_eq!(
        s.err,
        "typein:1:1 warning: careful:\ntypein:1:1 warn(\"careful\")\ntypein:1:1 ^\n"
    );
}

#[test]
fn warnings_are_printed_before_the_result() {
    let stream = SharedBuffer::default();
    let mut repl = Repl::new(Interpreter::with_output(std::io::sink()), ReplConfig::default())
        .expect("engine starts");
    let mut input = ScriptedInput::new(["warn(\"early\"); 7"]);
    repl.run(&mut input, &mut stream.clone(), &mut stream.clone())
        .expect("loop finishes");
    assert_eq!(
        stream.contents(),
        "typein:1:1 warning: early:\n\
         typein:1:1 warn(\"early\"); 7\n\
         typein:1:1 ^\n\
         7\n"
    );
}

#[test]
fn maps_render_through_their_hooks() {
    let s = session(&[
        "var p = {\"to_string\": |me| \"point\"}",
        "p",
        "var q = {\"to_string\": |m| { throw 1 }}",
        "q",
        "var o = {\"to_string\": |m| { throw 1 }, \"to_source\": |m| { throw 2 }}",
        "o",
    ]);
    assert_eq!(
        s.out,
        "point\n{\"to_string\": <fn anonymous>}\nObject\n"
    );
    assert_eq!(s.err, "");
}

#[test]
fn structured_values_render_as_source() {
    let s = session(&["var m = {\"a\": 1, \"b\": [true, \"x\", none]}", "m", "fn f() {}", "f"]);
    assert_eq!(s.out, "{\"a\": 1, \"b\": [true, \"x\", none]}\n<fn f>\n");
}

#[test]
fn unpaired_surrogate_prints_placeholder() {
    let s = session(&["\"\\uD800\"", "[\"\\uD800\"]"]);
    assert_eq!(s.out, "[invalid string]\n[\"\\uD800\"]\n");
}

#[test]
fn run_source_evaluates_one_unit() {
    let printed = SharedBuffer::default();
    let mut repl = Repl::new(Interpreter::with_output(printed.clone()), ReplConfig::default())
        .expect("engine starts");
    let mut out = Vec::new();
    let mut err = Vec::new();
    let clean = repl
        .run_source("println(1)\nprintln(2)\nnope\n", "script.ty", &mut out, &mut err)
        .expect("runs");
    assert!(!clean);
    assert_eq!(printed.contents(), "1\n2\n");
    assert_eq!(
        String::from_utf8(err).expect("utf-8"),
        "script.ty:3:1 ReferenceError: nope is not defined:\nscript.ty:3:1 nope\nscript.ty:3:1 ^\n"
    );
}
