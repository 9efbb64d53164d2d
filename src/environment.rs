use crate::diagnostics::Diagnostic;

/// Global state shared between the loop and evaluated code.
///
/// Owned by the REPL for its whole lifetime and passed by reference into
/// every engine call.
#[derive(Debug)]
pub struct ExecutionEnvironment<G> {
    global: G,
    should_quit: bool,
    warnings: Vec<Diagnostic>,
}

impl<G> ExecutionEnvironment<G> {
    pub fn new(global: G) -> Self {
        Self {
            global,
            should_quit: false,
            warnings: Vec::new(),
        }
    }

    pub fn global(&self) -> &G {
        &self.global
    }

    /// Called by the script-visible `quit` function. Idempotent.
    pub fn request_quit(&mut self) {
        self.should_quit = true;
    }

    pub fn should_quit(&self) -> bool {
        self.should_quit
    }

    /// Queues a warning raised during compilation or execution.
    pub fn report_warning(&mut self, warning: Diagnostic) {
        self.warnings.push(warning);
    }

    pub fn take_warnings(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.warnings)
    }
}
