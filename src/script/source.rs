use std::rc::Rc;

use crate::diagnostics::{Diagnostic, Location, Note, Severity, SourceSpan};

/// A buffer of script text as it was submitted, kept alive by every
/// function defined in it so later errors can still point into it.
#[derive(Debug)]
pub struct SourceFile {
    pub name: String,
    pub text: String,
    pub start_line: u32,
}

/// Where a byte offset falls within its source line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinePosition {
    pub location: Location,
    pub line_text: String,
    pub token_offset: usize,
}

impl SourceFile {
    pub fn new(name: impl Into<String>, text: impl Into<String>, start_line: u32) -> Rc<Self> {
        Rc::new(Self {
            name: name.into(),
            text: text.into(),
            start_line,
        })
    }

    /// Placeholder origin for code run outside any submitted buffer.
    pub fn detached() -> Rc<Self> {
        Self::new("", "", 0)
    }

    pub fn is_detached(&self) -> bool {
        self.name.is_empty() && self.text.is_empty()
    }

    pub fn position(&self, offset: usize) -> LinePosition {
        let mut offset = offset.min(self.text.len());
        while !self.text.is_char_boundary(offset) {
            offset -= 1;
        }
        let line_start = self.text[..offset].rfind('\n').map_or(0, |idx| idx + 1);
        let line_end = self.text[offset..]
            .find('\n')
            .map_or(self.text.len(), |idx| offset + idx + 1);
        let line_index = self.text[..line_start].matches('\n').count() as u32;
        let token_offset = self.text[line_start..offset].chars().count();
        LinePosition {
            location: Location::new(self.start_line + line_index, token_offset as u32 + 1),
            line_text: self.text[line_start..line_end].to_string(),
            token_offset,
        }
    }

    pub fn diagnostic(&self, severity: Severity, message: impl Into<String>, span: SourceSpan) -> Diagnostic {
        let diagnostic = Diagnostic::new(severity, message);
        if self.is_detached() {
            return diagnostic;
        }
        let diagnostic = diagnostic.with_filename(self.name.clone());
        let position = self.position(span.start);
        diagnostic
            .with_location(position.location)
            .with_source_line(position.line_text, position.token_offset)
    }

    pub fn note(&self, message: impl Into<String>, span: SourceSpan) -> Note {
        let note = Note::new(message);
        if self.is_detached() {
            return note;
        }
        note.with_filename(self.name.clone())
            .with_location(self.position(span.start).location)
    }
}
