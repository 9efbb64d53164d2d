use std::path::PathBuf;

/// Runtime settings for a REPL session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplConfig {
    pub primary_prompt: String,
    pub continuation_prompt: String,
    /// Logical source name diagnostics are attributed to.
    pub filename: String,
    pub first_line: u32,
    pub history_file: Option<PathBuf>,
}

impl Default for ReplConfig {
    fn default() -> Self {
        Self {
            primary_prompt: ">> ".into(),
            continuation_prompt: "... ".into(),
            filename: "typein".into(),
            first_line: 1,
            history_file: None,
        }
    }
}

impl ReplConfig {
    pub fn with_prompts(mut self, primary: impl Into<String>, continuation: impl Into<String>) -> Self {
        self.primary_prompt = primary.into();
        self.continuation_prompt = continuation.into();
        self
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = filename.into();
        self
    }

    pub fn with_history_file(mut self, path: Option<PathBuf>) -> Self {
        self.history_file = path;
        self
    }
}
