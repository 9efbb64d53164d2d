use std::{collections::VecDeque, path::PathBuf};

use rustyline::{error::ReadlineError, DefaultEditor};

use crate::{config::ReplConfig, diagnostics::Result};

/// Where the REPL gets its physical lines from.
pub trait LineSource {
    /// Reads one line without its terminator. `None` means end of input.
    fn read_line(&mut self, prompt: &str) -> Result<Option<String>>;

    /// Remembers a non-empty line for later recall.
    fn record_history(&mut self, line: &str);
}

/// Interactive terminal input backed by rustyline.
pub struct Terminal {
    editor: DefaultEditor,
    history_file: Option<PathBuf>,
}

impl Terminal {
    pub fn new(history_file: Option<PathBuf>) -> Result<Self> {
        let mut editor = DefaultEditor::new()?;
        if let Some(path) = &history_file {
            if let Err(err) = editor.load_history(path) {
                tracing::warn!(path = %path.display(), %err, "could not load history");
            }
        }
        Ok(Self {
            editor,
            history_file,
        })
    }

    /// Writes the session history back to the configured file, if any.
    pub fn save_history(&mut self) -> Result<()> {
        if let Some(path) = &self.history_file {
            self.editor.save_history(path)?;
        }
        Ok(())
    }
}

impl LineSource for Terminal {
    fn read_line(&mut self, prompt: &str) -> Result<Option<String>> {
        match self.editor.readline(prompt) {
            Ok(line) => Ok(Some(line)),
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn record_history(&mut self, line: &str) {
        self.editor.add_history_entry(line).ok();
    }
}

/// Pre-recorded input. Used by `typein eval` and by tests.
#[derive(Debug, Default)]
pub struct ScriptedInput {
    lines: VecDeque<String>,
    prompts: Vec<String>,
    history: Vec<String>,
}

impl ScriptedInput {
    pub fn new<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            lines: lines.into_iter().map(Into::into).collect(),
            prompts: Vec::new(),
            history: Vec::new(),
        }
    }

    pub fn from_source(source: &str) -> Self {
        Self::new(source.lines())
    }

    /// Every prompt shown so far, including the one answered by end of input.
    pub fn prompts(&self) -> &[String] {
        &self.prompts
    }

    pub fn history(&self) -> &[String] {
        &self.history
    }

    pub fn remaining(&self) -> usize {
        self.lines.len()
    }
}

impl LineSource for ScriptedInput {
    fn read_line(&mut self, prompt: &str) -> Result<Option<String>> {
        self.prompts.push(prompt.to_string());
        Ok(self.lines.pop_front())
    }

    fn record_history(&mut self, line: &str) {
        self.history.push(line.to_string());
    }
}

/// One logical statement's worth of input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputBuffer {
    pub text: String,
    /// Line number the statement started on.
    pub start_line: u32,
    /// Set when the line source ran dry while reading this buffer.
    pub end_of_input: bool,
}

impl InputBuffer {
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

/// Joins physical lines until the engine reports a compilable unit.
#[derive(Debug)]
pub struct InputAccumulator {
    current_line: u32,
    primary_prompt: String,
    continuation_prompt: String,
}

impl InputAccumulator {
    pub fn new(config: &ReplConfig) -> Self {
        Self {
            current_line: config.first_line,
            primary_prompt: config.primary_prompt.clone(),
            continuation_prompt: config.continuation_prompt.clone(),
        }
    }

    /// Line number the next physical line will get.
    pub fn current_line(&self) -> u32 {
        self.current_line
    }

    /// Reads lines until `is_compilable_unit` accepts the buffer or input
    /// ends. Every line is stored newline-terminated.
    pub fn next_buffer<S, F>(&mut self, source: &mut S, mut is_compilable_unit: F) -> Result<InputBuffer>
    where
        S: LineSource + ?Sized,
        F: FnMut(&str) -> bool,
    {
        let start_line = self.current_line;
        let mut text = String::new();
        loop {
            let prompt = if self.current_line == start_line {
                &self.primary_prompt
            } else {
                &self.continuation_prompt
            };
            let Some(line) = source.read_line(prompt)? else {
                return Ok(InputBuffer {
                    text,
                    start_line,
                    end_of_input: true,
                });
            };
            if !line.is_empty() {
                source.record_history(&line);
            }
            text.push_str(&line);
            text.push('\n');
            self.current_line += 1;

            let complete = is_compilable_unit(&text);
            tracing::trace!(start_line, lines = self.current_line - start_line, complete, "probed buffer");
            if complete {
                return Ok(InputBuffer {
                    text,
                    start_line,
                    end_of_input: false,
                });
            }
        }
    }
}
