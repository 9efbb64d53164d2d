use std::{fmt, rc::Rc};

use indexmap::IndexMap;

use crate::{
    diagnostics::Diagnostic,
    engine::{Failure, ScriptString},
    script::{
        ast::Stmt,
        runtime::{Completion, Executor},
        scope::ScopeRef,
        source::SourceFile,
    },
};

/// Arity marker for natives that accept any number of arguments.
pub const VARIADIC: usize = usize::MAX;

#[derive(Clone)]
pub struct Value(pub Rc<ValueKind>);

impl Value {
    pub fn new(kind: ValueKind) -> Self {
        Self(Rc::new(kind))
    }

    pub fn unit() -> Self {
        Self::new(ValueKind::Unit)
    }

    pub fn bool(value: bool) -> Self {
        Self::new(ValueKind::Bool(value))
    }

    pub fn int(value: i64) -> Self {
        Self::new(ValueKind::Int(value))
    }

    pub fn float(value: f64) -> Self {
        Self::new(ValueKind::Float(value))
    }

    pub fn string(value: impl Into<ScriptString>) -> Self {
        Self::new(ValueKind::String(value.into()))
    }

    pub fn array(values: Vec<Value>) -> Self {
        Self::new(ValueKind::Array(values))
    }

    pub fn map(entries: IndexMap<String, Value>) -> Self {
        Self::new(ValueKind::Map(entries))
    }

    pub fn error(kind: ErrorKind, message: impl Into<String>, report: Option<Diagnostic>) -> Self {
        Self::new(ValueKind::Error(ErrorValue {
            kind,
            message: message.into(),
            report,
        }))
    }

    pub fn kind(&self) -> &ValueKind {
        &self.0
    }

    pub fn is_unit(&self) -> bool {
        matches!(&*self.0, ValueKind::Unit)
    }

    pub fn is_callable(&self) -> bool {
        matches!(
            &*self.0,
            ValueKind::Function(_) | ValueKind::NativeFunction(_)
        )
    }

    /// Arrays, maps, functions and errors; everything else is a primitive.
    pub fn is_object(&self) -> bool {
        matches!(
            &*self.0,
            ValueKind::Array(_)
                | ValueKind::Map(_)
                | ValueKind::Function(_)
                | ValueKind::NativeFunction(_)
                | ValueKind::Error(_)
        )
    }

    pub fn is_truthy(&self) -> bool {
        match &*self.0 {
            ValueKind::Unit => false,
            ValueKind::Bool(b) => *b,
            ValueKind::Int(n) => *n != 0,
            ValueKind::Float(f) => *f != 0.0 && !f.is_nan(),
            ValueKind::String(s) => !s.is_empty(),
            ValueKind::Array(values) => !values.is_empty(),
            ValueKind::Map(map) => !map.is_empty(),
            ValueKind::Function(_) | ValueKind::NativeFunction(_) | ValueKind::Error(_) => true,
        }
    }

    /// The name `type_of` reports.
    pub fn type_name(&self) -> &'static str {
        match &*self.0 {
            ValueKind::Unit => "none",
            ValueKind::Bool(_) => "bool",
            ValueKind::Int(_) => "int",
            ValueKind::Float(_) => "float",
            ValueKind::String(_) => "string",
            ValueKind::Array(_) => "array",
            ValueKind::Map(_) => "map",
            ValueKind::Function(_) | ValueKind::NativeFunction(_) => "function",
            ValueKind::Error(_) => "error",
        }
    }

    /// Class name shown when nothing better can be printed.
    pub fn class_name(&self) -> Option<&'static str> {
        match &*self.0 {
            ValueKind::Array(_) => Some("Array"),
            ValueKind::Map(_) => Some("Object"),
            ValueKind::Function(_) | ValueKind::NativeFunction(_) => Some("Function"),
            ValueKind::Error(error) => Some(error.kind.name()),
            _ => None,
        }
    }

    pub fn as_string(&self) -> Option<&ScriptString> {
        match &*self.0 {
            ValueKind::String(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_error(&self) -> Option<&ErrorValue> {
        match &*self.0 {
            ValueKind::Error(error) => Some(error),
            _ => None,
        }
    }
}

/// Unlinks nested arrays and maps one level at a time so dropping a deeply
/// nested value does not recurse.
impl Drop for Value {
    fn drop(&mut self) {
        let mut pending = Vec::new();
        take_children(&mut self.0, &mut pending);
        while let Some(mut value) = pending.pop() {
            take_children(&mut value.0, &mut pending);
        }
    }
}

fn take_children(kind: &mut Rc<ValueKind>, pending: &mut Vec<Value>) {
    match Rc::get_mut(kind) {
        Some(ValueKind::Array(values)) => pending.append(values),
        Some(ValueKind::Map(map)) => pending.extend(map.drain(..).map(|(_, value)| value)),
        _ => {}
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.0 {
            ValueKind::Unit => write!(f, "none"),
            ValueKind::Bool(b) => write!(f, "{b}"),
            ValueKind::Int(n) => write!(f, "{n}"),
            ValueKind::Float(n) => write!(f, "{n}"),
            ValueKind::String(s) => write!(f, "{s:?}"),
            ValueKind::Array(values) => f.debug_list().entries(values.iter()).finish(),
            ValueKind::Map(map) => f.debug_map().entries(map.iter()).finish(),
            ValueKind::Function(fun) => write!(f, "<fn {}>", fun.display_name()),
            ValueKind::NativeFunction(fun) => write!(f, "<native fn {}>", fun.name),
            ValueKind::Error(error) => write!(f, "{}: {}", error.kind.name(), error.message),
        }
    }
}

pub enum ValueKind {
    Unit,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(ScriptString),
    Array(Vec<Value>),
    Map(IndexMap<String, Value>),
    Function(UserFunction),
    NativeFunction(NativeFunction),
    Error(ErrorValue),
}

#[derive(Clone)]
pub struct UserFunction {
    pub name: Option<String>,
    pub params: Vec<String>,
    pub body: Rc<[Stmt]>,
    pub scope: ScopeRef,
    /// Buffer the function was defined in; errors raised inside point there.
    pub origin: Rc<SourceFile>,
}

impl UserFunction {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("anonymous")
    }
}

pub type NativeFn = fn(&mut Executor<'_>, &[Value]) -> Completion<Value>;

#[derive(Clone)]
pub struct NativeFunction {
    pub name: &'static str,
    pub arity: usize,
    pub callback: NativeFn,
}

impl NativeFunction {
    pub fn call(&self, exec: &mut Executor<'_>, args: &[Value]) -> Completion<Value> {
        if self.arity != VARIADIC && args.len() != self.arity {
            return exec.raise_at_call_site(
                ErrorKind::Type,
                format!(
                    "{} expected {} arguments but received {}",
                    self.name,
                    self.arity,
                    args.len()
                ),
            );
        }
        (self.callback)(exec, args)
    }
}

/// Built-in error constructors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Syntax,
    Reference,
    Type,
    Range,
    Internal,
    Generic,
}

impl ErrorKind {
    pub fn name(self) -> &'static str {
        match self {
            ErrorKind::Syntax => "SyntaxError",
            ErrorKind::Reference => "ReferenceError",
            ErrorKind::Type => "TypeError",
            ErrorKind::Range => "RangeError",
            ErrorKind::Internal => "InternalError",
            ErrorKind::Generic => "Error",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ErrorValue {
    pub kind: ErrorKind,
    pub message: String,
    /// Where the error was created, with the offending source line.
    pub report: Option<Diagnostic>,
}

impl From<Value> for Failure<Value> {
    fn from(value: Value) -> Self {
        Failure::Exception(value)
    }
}
