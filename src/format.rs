//! Turns evaluated values into display text.

use crate::{
    engine::{Engine, ScriptString},
    environment::ExecutionEnvironment,
};

pub const INVALID_STRING: &str = "[invalid string]";
pub const INVALID_CLASS: &str = "[invalid class]";
pub const UNKNOWN_OBJECT: &str = "[unknown object]";
pub const UNKNOWN_NON_OBJECT: &str = "[unknown non-object]";

/// Renders `value` for the terminal.
///
/// Strings are quoted; everything else goes through the engine's display
/// conversion, then its source conversion, then the class name. Faults
/// raised by any of these are dropped here and never reach the caller.
pub fn format_result<E: Engine>(
    engine: &mut E,
    env: &mut ExecutionEnvironment<E::Global>,
    value: &E::Value,
) -> String {
    if let Some(text) = engine.as_string(value) {
        return format_string(&text);
    }

    let text = match engine.to_display_string(env, value) {
        Ok(text) => text,
        Err(_) => match engine.to_source(env, value) {
            Ok(text) => text,
            Err(_) => match fallback_name(engine, value) {
                Ok(name) => name,
                Err(placeholder) => return placeholder.to_string(),
            },
        },
    };

    text.to_utf8().unwrap_or_else(|| INVALID_STRING.to_string())
}

/// Wraps a string result in double quotes.
pub fn format_string(text: &ScriptString) -> String {
    match text.to_utf8() {
        Some(utf8) => format!("\"{utf8}\""),
        None => INVALID_STRING.to_string(),
    }
}

fn fallback_name<E: Engine>(engine: &mut E, value: &E::Value) -> Result<ScriptString, &'static str> {
    if !engine.is_object(value) {
        return Err(UNKNOWN_NON_OBJECT);
    }
    match engine.class_name(value) {
        Ok(Some(name)) => Ok(name),
        Ok(None) => Err(UNKNOWN_OBJECT),
        Err(_) => Err(INVALID_CLASS),
    }
}
