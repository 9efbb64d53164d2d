//! Rendering of diagnostics and uncaught exceptions to the error stream.

use std::io::{self, Write};

use crate::{
    diagnostics::{Diagnostic, Location, ReplError, Result, Severity},
    engine::{Engine, Failure},
    environment::ExecutionEnvironment,
    format::format_result,
};

const TAB_STOP: usize = 8;

/// What to show for a failed evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Report {
    /// The exception carried a structured error report.
    Diagnostic(Diagnostic),
    /// Any other thrown value, already formatted.
    Uncaught(String),
}

impl Report {
    pub fn write_to<W: Write + ?Sized>(&self, out: &mut W) -> io::Result<()> {
        match self {
            Report::Diagnostic(diagnostic) => print_diagnostic(out, diagnostic),
            Report::Uncaught(text) => {
                writeln!(out, "error: {text}")?;
                out.flush()
            }
        }
    }
}

/// Consumes a failure and extracts what should be shown for it.
///
/// A failure with no exception value cannot be reported; that is an
/// engine inconsistency and comes back as
/// [`ReplError::UncatchableException`].
pub fn report_exception<E: Engine>(
    engine: &mut E,
    env: &mut ExecutionEnvironment<E::Global>,
    failure: Failure<E::Value>,
) -> Result<Report> {
    let exception = match failure {
        Failure::Exception(value) => value,
        Failure::Uncatchable => return Err(ReplError::UncatchableException),
    };

    match engine.error_report(&exception) {
        Some(diagnostic) => Ok(Report::Diagnostic(diagnostic)),
        None => Ok(Report::Uncaught(format_result(engine, env, &exception))),
    }
}

/// Prints a diagnostic followed by its notes.
pub fn print_diagnostic<W: Write + ?Sized>(out: &mut W, diagnostic: &Diagnostic) -> io::Result<()> {
    let prefix = build_prefix(
        diagnostic.filename.as_deref(),
        diagnostic.location,
        diagnostic.severity,
    );
    write_message(out, &prefix, &diagnostic.message)?;
    if diagnostic.severity != Severity::Note {
        if let Some(line) = &diagnostic.source_line {
            write_source_line(out, &prefix, line, diagnostic.token_offset)?;
        }
    }
    writeln!(out)?;
    out.flush()?;

    for note in &diagnostic.notes {
        let prefix = build_prefix(note.filename.as_deref(), note.location, Severity::Note);
        write_message(out, &prefix, &note.message)?;
        writeln!(out)?;
        out.flush()?;
    }
    Ok(())
}

/// Number of display columns before `token_offset` characters of `line`.
pub fn caret_column(line: &str, token_offset: usize) -> usize {
    line.chars().take(token_offset).fold(0, |column, ch| {
        if ch == '\t' {
            (column + TAB_STOP) & !(TAB_STOP - 1)
        } else {
            column + 1
        }
    })
}

fn build_prefix(filename: Option<&str>, location: Option<Location>, severity: Severity) -> String {
    let mut prefix = String::new();
    if let Some(filename) = filename {
        prefix.push_str(filename);
        prefix.push(':');
    }
    if let Some(location) = location {
        prefix.push_str(&format!("{}:{} ", location.line, location.column));
    }
    if let Some(label) = severity.label() {
        prefix.push_str(label);
        prefix.push_str(": ");
    }
    prefix
}

fn write_message<W: Write + ?Sized>(out: &mut W, prefix: &str, message: &str) -> io::Result<()> {
    // split_inclusive keeps each segment's newline; the prefix repeats per line.
    for segment in message.split_inclusive('\n') {
        write!(out, "{prefix}{segment}")?;
    }
    if message.is_empty() || message.ends_with('\n') {
        write!(out, "{prefix}")?;
    }
    Ok(())
}

fn write_source_line<W: Write + ?Sized>(
    out: &mut W,
    prefix: &str,
    line: &str,
    token_offset: usize,
) -> io::Result<()> {
    write!(out, ":\n{prefix}{line}")?;
    if !line.ends_with('\n') {
        writeln!(out)?;
    }
    let dots = ".".repeat(caret_column(line, token_offset));
    write!(out, "{prefix}{dots}^")
}
