use crate::{
    diagnostics::Severity,
    engine::Failure,
    script::{
        runtime::{Completion, Executor},
        scope::ScopeRef,
        value::{ErrorKind, NativeFn, NativeFunction, Value, ValueKind, VARIADIC},
    },
};

pub fn install(scope: &ScopeRef) {
    let globals = [
        native("quit", 0, quit),
        native("print", VARIADIC, io_print),
        native("println", VARIADIC, io_println),
        native("len", 1, len),
        native("str", 1, stringify),
        native("type_of", 1, type_of),
        native("error", 1, error),
        native("warn", 1, warn),
        native("defer", VARIADIC, defer),
    ];

    let mut scope = scope.borrow_mut();
    for (name, value) in globals {
        scope.define(name.into(), value, true, None);
    }
}

fn native(name: &'static str, arity: usize, callback: NativeFn) -> (&'static str, Value) {
    let value = Value::new(ValueKind::NativeFunction(NativeFunction {
        name,
        arity,
        callback,
    }));
    (name, value)
}

/// Ends the session. Fails without an exception so nothing can catch it.
/// Calls still queued by `defer` never run.
fn quit(exec: &mut Executor<'_>, _args: &[Value]) -> Completion<Value> {
    exec.environment().request_quit();
    exec.discard_jobs();
    Err(Failure::Uncatchable)
}

fn write_joined(exec: &mut Executor<'_>, args: &[Value], terminator: &str) -> Completion<Value> {
    let mut parts = Vec::with_capacity(args.len());
    for arg in args {
        parts.push(exec.display_string(arg)?.to_utf8_lossy());
    }
    let line = format!("{}{terminator}", parts.join(" "));
    let written = exec
        .output()
        .write_all(line.as_bytes())
        .and_then(|()| exec.output().flush());
    match written {
        Ok(()) => Ok(Value::unit()),
        Err(err) => exec.raise_at_call_site(ErrorKind::Internal, format!("print failed: {err}")),
    }
}

fn io_print(exec: &mut Executor<'_>, args: &[Value]) -> Completion<Value> {
    write_joined(exec, args, "")
}

fn io_println(exec: &mut Executor<'_>, args: &[Value]) -> Completion<Value> {
    write_joined(exec, args, "\n")
}

fn len(exec: &mut Executor<'_>, args: &[Value]) -> Completion<Value> {
    let count = match args[0].kind() {
        ValueKind::String(text) => text.len(),
        ValueKind::Array(values) => values.len(),
        ValueKind::Map(map) => map.len(),
        _ => {
            return exec.raise_at_call_site(
                ErrorKind::Type,
                format!("len expects string, array or map, found {}", args[0].type_name()),
            );
        }
    };
    Ok(Value::int(count as i64))
}

fn stringify(exec: &mut Executor<'_>, args: &[Value]) -> Completion<Value> {
    exec.display_string(&args[0]).map(Value::string)
}

fn type_of(_exec: &mut Executor<'_>, args: &[Value]) -> Completion<Value> {
    Ok(Value::string(args[0].type_name()))
}

/// Builds an `Error` pointing at the call; `throw` raises it.
fn error(exec: &mut Executor<'_>, args: &[Value]) -> Completion<Value> {
    let message = exec.display_string(&args[0])?.to_utf8_lossy();
    Ok(exec.error_value(ErrorKind::Generic, message, exec.call_site()))
}

fn warn(exec: &mut Executor<'_>, args: &[Value]) -> Completion<Value> {
    let message = exec.display_string(&args[0])?.to_utf8_lossy();
    let warning = exec.diagnostic_at_call_site(Severity::Warning, message);
    exec.environment().report_warning(warning);
    Ok(Value::unit())
}

fn defer(exec: &mut Executor<'_>, args: &[Value]) -> Completion<Value> {
    let Some((callee, rest)) = args.split_first() else {
        return exec.raise_at_call_site(ErrorKind::Type, "defer expects a function");
    };
    if !callee.is_callable() {
        return exec.raise_at_call_site(
            ErrorKind::Type,
            format!("defer expects a function, found {}", callee.type_name()),
        );
    }
    exec.enqueue(callee.clone(), rest.to_vec());
    Ok(Value::unit())
}
