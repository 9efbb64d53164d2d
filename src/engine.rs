//! The contract between the REPL front end and the script engine it drives.

use std::fmt;

use crate::{
    diagnostics::{Diagnostic, Result},
    environment::ExecutionEnvironment,
};

/// Text in the engine's internal encoding (UTF-16 code units).
///
/// Unlike a Rust `String` this may hold unpaired surrogates, so turning it
/// into output text can fail.
#[derive(Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScriptString(Vec<u16>);

impl ScriptString {
    pub fn from_units(units: Vec<u16>) -> Self {
        Self(units)
    }

    pub fn units(&self) -> &[u16] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Transcodes to UTF-8, failing on unpaired surrogates.
    pub fn to_utf8(&self) -> Option<String> {
        String::from_utf16(&self.0).ok()
    }

    pub fn to_utf8_lossy(&self) -> String {
        String::from_utf16_lossy(&self.0)
    }

    pub fn concat(&self, other: &ScriptString) -> ScriptString {
        let mut units = Vec::with_capacity(self.0.len() + other.0.len());
        units.extend_from_slice(&self.0);
        units.extend_from_slice(&other.0);
        ScriptString(units)
    }
}

impl From<&str> for ScriptString {
    fn from(text: &str) -> Self {
        Self(text.encode_utf16().collect())
    }
}

impl From<String> for ScriptString {
    fn from(text: String) -> Self {
        Self::from(text.as_str())
    }
}

impl fmt::Debug for ScriptString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.to_utf8_lossy())
    }
}

impl fmt::Display for ScriptString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_utf8_lossy())
    }
}

/// Why an engine call did not produce a value.
#[derive(Debug, Clone)]
pub enum Failure<V> {
    /// A catchable exception; the value is what was thrown.
    Exception(V),
    /// Failure with no exception value. Used by `quit()`; anything else
    /// reaching the loop this way is an engine inconsistency.
    Uncatchable,
}

pub type Completion<T, V> = std::result::Result<T, Failure<V>>;

/// Operations the REPL needs from an embedded script engine.
///
/// Every call that may run script code receives the execution environment
/// explicitly; there is no ambient pending-exception state. A fault raised
/// by a call is returned as a [`Failure`] and discarding it clears it.
pub trait Engine {
    type Value;
    /// The engine's global binding, owned by [`ExecutionEnvironment`].
    type Global;

    /// Creates the global binding with the engine's builtins and `quit`
    /// installed.
    fn new_global(&mut self) -> Result<Self::Global>;

    /// Whether `buffer` is syntactically complete enough to submit. Says
    /// nothing about validity.
    fn is_compilable_unit(&self, global: &Self::Global, buffer: &str) -> bool;

    fn evaluate(
        &mut self,
        env: &mut ExecutionEnvironment<Self::Global>,
        source: &str,
        filename: &str,
        start_line: u32,
    ) -> Completion<Self::Value, Self::Value>;

    /// Runs the oldest queued continuation, or returns `None` when the
    /// queue is empty.
    fn run_next_job(
        &mut self,
        env: &mut ExecutionEnvironment<Self::Global>,
    ) -> Option<Completion<(), Self::Value>>;

    /// Best-effort hint that now is a good time to collect garbage.
    fn maybe_gc(&mut self) {}

    /// Whether the value means "no result" and prints nothing.
    fn is_void(&self, value: &Self::Value) -> bool;

    fn as_string(&self, value: &Self::Value) -> Option<ScriptString>;

    fn is_object(&self, value: &Self::Value) -> bool;

    fn to_display_string(
        &mut self,
        env: &mut ExecutionEnvironment<Self::Global>,
        value: &Self::Value,
    ) -> Completion<ScriptString, Self::Value>;

    fn to_source(
        &mut self,
        env: &mut ExecutionEnvironment<Self::Global>,
        value: &Self::Value,
    ) -> Completion<ScriptString, Self::Value>;

    /// Class name of an object-like value, `Ok(None)` when it has none.
    fn class_name(&mut self, value: &Self::Value) -> Completion<Option<ScriptString>, Self::Value>;

    /// The structured report carried by an exception value, if any.
    fn error_report(&self, exception: &Self::Value) -> Option<Diagnostic>;
}
