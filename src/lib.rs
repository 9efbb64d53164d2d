//! Interactive read-eval-print front end for an embedded script engine.
//!
//! The loop itself is engine-agnostic and talks to the engine through the
//! [`Engine`] trait. [`script::Interpreter`] is the bundled engine used by
//! the `typein` binary.

pub mod config;
pub mod diagnostics;
pub mod engine;
pub mod environment;
pub mod eval;
pub mod format;
pub mod input;
pub mod repl;
pub mod report;
pub mod script;

pub use config::ReplConfig;
pub use diagnostics::{Diagnostic, Location, Note, ReplError, Severity, SourceSpan};
pub use engine::{Engine, Failure, ScriptString};
pub use environment::ExecutionEnvironment;
pub use eval::Outcome;
pub use input::{InputAccumulator, InputBuffer, LineSource, ScriptedInput, Terminal};
pub use repl::{LoopState, Repl};
pub use report::Report;
pub use script::Interpreter;
