//! The bundled script engine: a small dynamically typed language with
//! lexical scopes, exceptions and a deferred job queue.

pub mod ast;
pub mod lexer;
pub mod parser;
pub mod runtime;
pub mod scope;
pub mod source;
pub mod stdlib;
pub mod value;

pub use runtime::{Executor, Interpreter};
pub use value::Value;
