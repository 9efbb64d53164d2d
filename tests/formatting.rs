use std::collections::VecDeque;

use typein::{
    diagnostics::{Diagnostic, Location, Note, Result, Severity},
    engine::{Completion, Engine, Failure, ScriptString},
    format::{format_result, INVALID_CLASS, INVALID_STRING, UNKNOWN_NON_OBJECT, UNKNOWN_OBJECT},
    report::{caret_column, print_diagnostic, report_exception},
    ExecutionEnvironment, LoopState, Repl, ReplConfig, ReplError, Report, ScriptedInput,
};

/// A value whose every conversion is scripted by the test.
#[derive(Debug, Clone, Default)]
struct FakeValue {
    string: Option<ScriptString>,
    display: Option<ScriptString>,
    source: Option<ScriptString>,
    object: bool,
    class: Option<Option<&'static str>>,
    report: Option<Diagnostic>,
}

#[derive(Default)]
struct FakeEngine {
    results: VecDeque<Completion<FakeValue, FakeValue>>,
    quit_on_failure: bool,
    warning: Option<Diagnostic>,
}

impl Engine for FakeEngine {
    type Value = FakeValue;
    type Global = ();

    fn new_global(&mut self) -> Result<()> {
        Ok(())
    }

    fn is_compilable_unit(&self, _global: &(), _buffer: &str) -> bool {
        true
    }

    fn evaluate(
        &mut self,
        env: &mut ExecutionEnvironment<()>,
        _source: &str,
        _filename: &str,
        _start_line: u32,
    ) -> Completion<FakeValue, FakeValue> {
        if let Some(warning) = self.warning.take() {
            env.report_warning(warning);
        }
        let result = self.results.pop_front().unwrap_or(Ok(FakeValue::default()));
        if result.is_err() && self.quit_on_failure {
            env.request_quit();
        }
        result
    }

    fn run_next_job(&mut self, _env: &mut ExecutionEnvironment<()>) -> Option<Completion<(), FakeValue>> {
        None
    }

    fn is_void(&self, value: &FakeValue) -> bool {
        value.string.is_none() && value.display.is_none() && value.source.is_none() && !value.object
    }

    fn as_string(&self, value: &FakeValue) -> Option<ScriptString> {
        value.string.clone()
    }

    fn is_object(&self, value: &FakeValue) -> bool {
        value.object
    }

    fn to_display_string(
        &mut self,
        _env: &mut ExecutionEnvironment<()>,
        value: &FakeValue,
    ) -> Completion<ScriptString, FakeValue> {
        value.display.clone().ok_or(Failure::Exception(FakeValue::default()))
    }

    fn to_source(
        &mut self,
        _env: &mut ExecutionEnvironment<()>,
        value: &FakeValue,
    ) -> Completion<ScriptString, FakeValue> {
        value.source.clone().ok_or(Failure::Exception(FakeValue::default()))
    }

    fn class_name(&mut self, value: &FakeValue) -> Completion<Option<ScriptString>, FakeValue> {
        match value.class {
            Some(name) => Ok(name.map(ScriptString::from)),
            None => Err(Failure::Uncatchable),
        }
    }

    fn error_report(&self, exception: &FakeValue) -> Option<Diagnostic> {
        exception.report.clone()
    }
}

fn format(value: FakeValue) -> String {
    let mut engine = FakeEngine::default();
    let mut env = ExecutionEnvironment::new(());
    format_result(&mut engine, &mut env, &value)
}

fn lone_surrogate() -> ScriptString {
    ScriptString::from_units(vec![u16::from(b'a'), 0xDC00])
}

#[test]
fn strings_are_quoted() {
    let value = FakeValue {
        string: Some(ScriptString::from("hi")),
        ..FakeValue::default()
    };
    assert_eq!(format(value), "\"hi\"");
}

#[test]
fn untranscodable_strings_use_placeholder() {
    let quoted = FakeValue {
        string: Some(lone_surrogate()),
        ..FakeValue::default()
    };
    assert_eq!(format(quoted), INVALID_STRING);
    let displayed = FakeValue {
        display: Some(lone_surrogate()),
        ..FakeValue::default()
    };
    assert_eq!(format(displayed), INVALID_STRING);
}

#[test]
fn display_conversion_wins_over_source() {
    let value = FakeValue {
        display: Some(ScriptString::from("shown")),
        source: Some(ScriptString::from("hidden")),
        ..FakeValue::default()
    };
    assert_eq!(format(value), "shown");
}

#[test]
fn falls_back_to_source_conversion() {
    let value = FakeValue {
        source: Some(ScriptString::from("({})")),
        ..FakeValue::default()
    };
    assert_eq!(format(value), "({})");
}

#[test]
fn falls_back_to_class_name() {
    let named = FakeValue {
        object: true,
        class: Some(Some("Widget")),
        ..FakeValue::default()
    };
    assert_eq!(format(named), "Widget");

    let anonymous = FakeValue {
        object: true,
        class: Some(None),
        ..FakeValue::default()
    };
    assert_eq!(format(anonymous), UNKNOWN_OBJECT);

    let faulting = FakeValue {
        object: true,
        class: None,
        ..FakeValue::default()
    };
    assert_eq!(format(faulting), INVALID_CLASS);

    assert_eq!(format(FakeValue::default()), UNKNOWN_NON_OBJECT);
}

#[test]
fn exceptions_without_report_are_formatted() {
    let mut engine = FakeEngine::default();
    let mut env = ExecutionEnvironment::new(());
    let thrown = FakeValue {
        display: Some(ScriptString::from("oops")),
        ..FakeValue::default()
    };
    let report = report_exception(&mut engine, &mut env, Failure::Exception(thrown)).expect("reportable");
    assert_eq!(report, Report::Uncaught("oops".into()));

    let mut err = Vec::new();
    report.write_to(&mut err).expect("write");
    assert_eq!(String::from_utf8(err).expect("utf-8"), "error: oops\n");
}

#[test]
fn uncatchable_failures_cannot_be_reported() {
    let mut engine = FakeEngine::default();
    let mut env = ExecutionEnvironment::new(());
    let result = report_exception(&mut engine, &mut env, Failure::Uncatchable);
    assert!(matches!(result, Err(ReplError::UncatchableException)));
}

#[test]
fn uncatchable_failure_without_quit_is_fatal() {
    let engine = FakeEngine {
        results: VecDeque::from([Err(Failure::Uncatchable)]),
        quit_on_failure: false,
        ..FakeEngine::default()
    };
    let mut repl = Repl::new(engine, ReplConfig::default()).expect("repl");
    let mut input = ScriptedInput::new(["boom"]);
    let result = repl.run(&mut input, &mut Vec::<u8>::new(), &mut Vec::<u8>::new());
    assert!(matches!(result, Err(ReplError::UncatchableException)));
}

#[test]
fn quit_is_checked_before_the_exception() {
    let engine = FakeEngine {
        results: VecDeque::from([Err(Failure::Uncatchable)]),
        quit_on_failure: true,
        ..FakeEngine::default()
    };
    let mut repl = Repl::new(engine, ReplConfig::default()).expect("repl");
    let mut input = ScriptedInput::new(["bye", "unread"]);
    let mut err = Vec::<u8>::new();
    let state = repl
        .run(&mut input, &mut Vec::<u8>::new(), &mut err)
        .expect("clean quit");
    assert_eq!(state, LoopState::Quitting);
    assert!(err.is_empty());
    assert_eq!(input.remaining(), 1);
}

#[test]
fn warnings_are_printed_before_a_fatal_failure() {
    let engine = FakeEngine {
        results: VecDeque::from([Err(Failure::Uncatchable)]),
        warning: Some(Diagnostic::warning("late binding")),
        ..FakeEngine::default()
    };
    let mut repl = Repl::new(engine, ReplConfig::default()).expect("repl");
    let mut input = ScriptedInput::new(["boom"]);
    let mut err = Vec::<u8>::new();
    let result = repl.run(&mut input, &mut Vec::<u8>::new(), &mut err);
    assert!(matches!(result, Err(ReplError::UncatchableException)));
    assert_eq!(String::from_utf8(err).expect("utf-8"), "warning: late binding\n");
}

fn render(diagnostic: &Diagnostic) -> String {
    let mut out = Vec::new();
    print_diagnostic(&mut out, diagnostic).expect("write");
    String::from_utf8(out).expect("utf-8")
}

#[test]
fn caret_column_expands_tabs() {
    assert_eq!(caret_column("x", 0), 0);
    assert_eq!(caret_column("abc", 2), 2);
    assert_eq!(caret_column("\t    x", 5), 12);
    assert_eq!(caret_column("ab\tc", 3), 8);
    assert_eq!(caret_column("\t\tx", 2), 16);
}

#[test]
fn renders_source_line_and_caret() {
    let diagnostic = Diagnostic::error("bad thing")
        .with_filename("f.ty")
        .with_location(Location::new(4, 3))
        .with_source_line("a b c\n", 2);
    assert_eq!(render(&diagnostic), "f.ty:4:3 bad thing:\nf.ty:4:3 a b c\nf.ty:4:3 ..^\n");
}

#[test]
fn adds_missing_newline_after_source_line() {
    let diagnostic = Diagnostic::error("bad")
        .with_filename("f")
        .with_location(Location::new(1, 2))
        .with_source_line("\tx", 1);
    assert_eq!(render(&diagnostic), "f:1:2 bad:\nf:1:2 \tx\nf:1:2 ........^\n");
}

#[test]
fn prefixes_every_message_line() {
    let diagnostic = Diagnostic::new(Severity::StrictWarning, "first\nsecond")
        .with_filename("f")
        .with_location(Location::new(1, 1));
    assert_eq!(
        render(&diagnostic),
        "f:1:1 strict warning: first\nf:1:1 strict warning: second\n"
    );
}

#[test]
fn message_ending_in_newline_gets_trailing_prefix() {
    let diagnostic = Diagnostic::warning("oops\n")
        .with_filename("f")
        .with_location(Location::new(2, 5));
    assert_eq!(render(&diagnostic), "f:2:5 warning: oops\nf:2:5 warning: \n");
}

#[test]
fn bare_diagnostic_has_no_prefix() {
    assert_eq!(render(&Diagnostic::error("plain")), "plain\n");
}

#[test]
fn notes_follow_without_source_line() {
    let diagnostic = Diagnostic::error("conflict")
        .with_filename("f")
        .with_location(Location::new(3, 1))
        .with_source_line("y\n", 0)
        .with_note(
            Note::new("first defined here")
                .with_filename("f")
                .with_location(Location::new(1, 5)),
        );
    assert_eq!(
        render(&diagnostic),
        "f:3:1 conflict:\nf:3:1 y\nf:3:1 ^\nf:1:5 note: first defined here\n"
    );
}
