use std::{fmt, io};

use thiserror::Error;

/// Represents a byte span within a submitted source buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceSpan {
    pub start: usize,
    pub end: usize,
}

impl SourceSpan {
    pub const fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }
}

/// 1-based line and column of a reported position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    pub line: u32,
    pub column: u32,
}

impl Location {
    pub const fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

/// Classification of a diagnostic event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    StrictWarning,
    Note,
}

impl Severity {
    /// Label printed after the position prefix. Errors carry none.
    pub fn label(self) -> Option<&'static str> {
        match self {
            Severity::Error => None,
            Severity::Warning => Some("warning"),
            Severity::StrictWarning => Some("strict warning"),
            Severity::Note => Some("note"),
        }
    }
}

/// Supplementary message attached to a [`Diagnostic`]. Notes never nest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Note {
    pub filename: Option<String>,
    pub location: Option<Location>,
    pub message: String,
}

impl Note {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            filename: None,
            location: None,
            message: message.into(),
        }
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn with_location(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }
}

/// Rich diagnostic information surfaced to end users.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub filename: Option<String>,
    pub location: Option<Location>,
    pub message: String,
    /// The offending source line as written, usually newline-terminated.
    pub source_line: Option<String>,
    /// Characters of `source_line` preceding the offending token.
    pub token_offset: usize,
    pub notes: Vec<Note>,
}

impl Diagnostic {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            filename: None,
            location: None,
            message: message.into(),
            source_line: None,
            token_offset: 0,
            notes: Vec::new(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(Severity::Error, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, message)
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn with_location(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_source_line(mut self, line: impl Into<String>, token_offset: usize) -> Self {
        self.source_line = Some(line.into());
        self.token_offset = token_offset;
        self
    }

    pub fn with_note(mut self, note: Note) -> Self {
        self.notes.push(note);
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(filename) = &self.filename {
            write!(f, "{filename}:")?;
        }
        if let Some(location) = self.location {
            write!(f, "{}:{} ", location.line, location.column)?;
        }
        if let Some(label) = self.severity.label() {
            write!(f, "{label}: ")?;
        }
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for Diagnostic {}

/// Unified error type for the REPL front end.
#[derive(Debug, Error)]
pub enum ReplError {
    #[error("uncatchable exception thrown, out of memory or something")]
    UncatchableException,
    #[error("engine setup failed: {0}")]
    EngineSetup(String),
    #[error("line editor error: {0}")]
    Readline(#[from] rustyline::error::ReadlineError),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, ReplError>;
