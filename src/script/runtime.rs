use std::{
    collections::VecDeque,
    io::{self, Write},
    rc::Rc,
};

use indexmap::IndexMap;

use crate::{
    diagnostics::{Diagnostic, Note, Severity, SourceSpan},
    engine::{self, Engine, Failure, ScriptString},
    environment::ExecutionEnvironment,
    script::{
        ast::{BinaryOp, Expr, ExprKind, Literal, Program, Stmt, StmtKind, UnaryOp},
        parser,
        scope::{Declaration, Scope, ScopeError, ScopeRef},
        source::SourceFile,
        stdlib,
        value::{ErrorKind, UserFunction, Value, ValueKind},
    },
};

pub type Completion<T> = engine::Completion<T, Value>;

/// Nested script calls allowed before raising "too much recursion".
pub const MAX_CALL_DEPTH: usize = 100;

/// Nested arrays and maps walked when rendering or comparing values.
pub const MAX_VALUE_DEPTH: usize = 256;

/// A call queued by `defer`, run between top-level statements.
struct Job {
    callee: Value,
    args: Vec<Value>,
    origin: Rc<SourceFile>,
    call_site: SourceSpan,
}

/// The bundled tree-walking engine.
pub struct Interpreter {
    jobs: VecDeque<Job>,
    output: Box<dyn Write>,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl Interpreter {
    /// An interpreter whose `print` writes to stdout.
    pub fn new() -> Self {
        Self::with_output(io::stdout())
    }

    /// An interpreter whose `print` writes to `output`.
    pub fn with_output(output: impl Write + 'static) -> Self {
        Self {
            jobs: VecDeque::new(),
            output: Box::new(output),
        }
    }

    pub fn pending_jobs(&self) -> usize {
        self.jobs.len()
    }

    fn executor<'a>(
        &'a mut self,
        env: &'a mut ExecutionEnvironment<ScopeRef>,
        origin: Rc<SourceFile>,
    ) -> Executor<'a> {
        let scope = Rc::clone(env.global());
        Executor {
            env,
            jobs: &mut self.jobs,
            output: &mut *self.output,
            scope,
            origin,
            call_site: SourceSpan::default(),
            depth: 0,
            value_depth: 0,
        }
    }
}

impl Engine for Interpreter {
    type Value = Value;
    type Global = ScopeRef;

    fn new_global(&mut self) -> crate::diagnostics::Result<ScopeRef> {
        let global = Scope::new();
        stdlib::install(&global);
        Ok(global)
    }

    fn is_compilable_unit(&self, _global: &ScopeRef, buffer: &str) -> bool {
        parser::is_compilable_unit(buffer)
    }

    fn evaluate(
        &mut self,
        env: &mut ExecutionEnvironment<ScopeRef>,
        source: &str,
        filename: &str,
        start_line: u32,
    ) -> Completion<Value> {
        let origin = SourceFile::new(filename, source, start_line);
        let program = match parser::parse_program(source) {
            Ok(program) => program,
            Err(err) => {
                let report = origin.diagnostic(
                    Severity::Error,
                    format!("{}: {}", ErrorKind::Syntax.name(), err.message),
                    err.span,
                );
                return Err(Value::error(ErrorKind::Syntax, err.message, Some(report)).into());
            }
        };
        for warning in &program.warnings {
            env.report_warning(origin.diagnostic(warning.severity, warning.message.clone(), warning.span));
        }
        let result = self.executor(env, origin).run_program(&program);
        self.output.flush().ok();
        result
    }

    fn run_next_job(&mut self, env: &mut ExecutionEnvironment<ScopeRef>) -> Option<Completion<()>> {
        let job = self.jobs.pop_front()?;
        let mut exec = self.executor(env, job.origin);
        let result = exec.call(job.callee, job.args, job.call_site).map(|_| ());
        self.output.flush().ok();
        Some(result)
    }

    fn is_void(&self, value: &Value) -> bool {
        value.is_unit()
    }

    fn as_string(&self, value: &Value) -> Option<ScriptString> {
        value.as_string().cloned()
    }

    fn is_object(&self, value: &Value) -> bool {
        value.is_object()
    }

    fn to_display_string(
        &mut self,
        env: &mut ExecutionEnvironment<ScopeRef>,
        value: &Value,
    ) -> Completion<ScriptString> {
        self.executor(env, SourceFile::detached()).display_string(value)
    }

    fn to_source(&mut self, env: &mut ExecutionEnvironment<ScopeRef>, value: &Value) -> Completion<ScriptString> {
        self.executor(env, SourceFile::detached()).source_string(value)
    }

    fn class_name(&mut self, value: &Value) -> Completion<Option<ScriptString>> {
        Ok(value.class_name().map(ScriptString::from))
    }

    fn error_report(&self, exception: &Value) -> Option<Diagnostic> {
        exception.as_error().and_then(|error| error.report.clone())
    }
}

/// Evaluation state for one engine call. Native functions receive it to
/// reach the environment, the job queue and the output stream.
pub struct Executor<'a> {
    env: &'a mut ExecutionEnvironment<ScopeRef>,
    jobs: &'a mut VecDeque<Job>,
    output: &'a mut dyn Write,
    scope: ScopeRef,
    origin: Rc<SourceFile>,
    call_site: SourceSpan,
    depth: usize,
    value_depth: usize,
}

enum FlowControl {
    Next,
    NextValue(Value),
    Return(Value),
    Break,
    Continue,
}

impl<'a> Executor<'a> {
    pub fn environment(&mut self) -> &mut ExecutionEnvironment<ScopeRef> {
        &mut *self.env
    }

    pub fn output(&mut self) -> &mut dyn Write {
        &mut *self.output
    }

    pub fn call_site(&self) -> SourceSpan {
        self.call_site
    }

    /// Queues `callee(args)` to run after the current top-level statement.
    pub fn enqueue(&mut self, callee: Value, args: Vec<Value>) {
        self.jobs.push_back(Job {
            callee,
            args,
            origin: Rc::clone(&self.origin),
            call_site: self.call_site,
        });
    }

    /// Drops every queued call. Used once the session is quitting.
    pub fn discard_jobs(&mut self) {
        self.jobs.clear();
    }

    /// A diagnostic pointing at the native call currently executing.
    pub fn diagnostic_at_call_site(&self, severity: Severity, message: impl Into<String>) -> Diagnostic {
        self.origin.diagnostic(severity, message, self.call_site)
    }

    pub fn error_value(&self, kind: ErrorKind, message: impl Into<String>, span: SourceSpan) -> Value {
        let message = message.into();
        let report = self
            .origin
            .diagnostic(Severity::Error, format!("{}: {message}", kind.name()), span);
        Value::error(kind, message, Some(report))
    }

    pub fn raise<T>(&self, kind: ErrorKind, message: impl Into<String>, span: SourceSpan) -> Completion<T> {
        Err(self.error_value(kind, message, span).into())
    }

    pub fn raise_at_call_site<T>(&self, kind: ErrorKind, message: impl Into<String>) -> Completion<T> {
        self.raise(kind, message, self.call_site)
    }

    fn run_program(&mut self, program: &Program) -> Completion<Value> {
        match self.execute_statements(&program.items)? {
            FlowControl::NextValue(value) | FlowControl::Return(value) => Ok(value),
            FlowControl::Next | FlowControl::Break | FlowControl::Continue => Ok(Value::unit()),
        }
    }

    fn with_scope<T>(&mut self, scope: ScopeRef, run: impl FnOnce(&mut Self) -> Completion<T>) -> Completion<T> {
        let previous = std::mem::replace(&mut self.scope, scope);
        let result = run(self);
        self.scope = previous;
        result
    }

    fn execute_statements(&mut self, statements: &[Stmt]) -> Completion<FlowControl> {
        let mut last_value: Option<Value> = None;
        for stmt in statements {
            match self.execute_statement(stmt)? {
                FlowControl::Next => {}
                FlowControl::NextValue(value) => last_value = Some(value),
                other => return Ok(other),
            }
        }
        Ok(last_value.map_or(FlowControl::Next, FlowControl::NextValue))
    }

    fn execute_block(&mut self, statements: &[Stmt]) -> Completion<FlowControl> {
        let child = Scope::with_parent(Rc::clone(&self.scope));
        self.with_scope(child, |exec| exec.execute_statements(statements))
    }

    fn declaration(&self, span: SourceSpan) -> Option<Declaration> {
        Some(Declaration {
            origin: Rc::clone(&self.origin),
            span,
        })
    }

    fn execute_statement(&mut self, stmt: &Stmt) -> Completion<FlowControl> {
        match &stmt.kind {
            StmtKind::VarDecl {
                name,
                name_span,
                initializer,
            } => {
                let value = match initializer {
                    Some(expr) => self.evaluate(expr)?,
                    None => Value::unit(),
                };
                let declared_at = self.declaration(*name_span);
                self.scope
                    .borrow_mut()
                    .define(name.clone(), value, true, declared_at);
                Ok(FlowControl::Next)
            }
            StmtKind::ConstDecl {
                name,
                name_span,
                value,
            } => {
                let evaluated = self.evaluate(value)?;
                let declared_at = self.declaration(*name_span);
                self.scope
                    .borrow_mut()
                    .define(name.clone(), evaluated, false, declared_at);
                Ok(FlowControl::Next)
            }
            StmtKind::Function {
                name,
                name_span,
                params,
                body,
            } => {
                let function = UserFunction {
                    name: Some(name.clone()),
                    params: params.clone(),
                    body: Rc::clone(body),
                    scope: Rc::clone(&self.scope),
                    origin: Rc::clone(&self.origin),
                };
                let declared_at = self.declaration(*name_span);
                self.scope.borrow_mut().define(
                    name.clone(),
                    Value::new(ValueKind::Function(function)),
                    true,
                    declared_at,
                );
                Ok(FlowControl::Next)
            }
            StmtKind::Expr(expr) => Ok(FlowControl::NextValue(self.evaluate(expr)?)),
            StmtKind::Block(statements) => self.execute_block(statements),
            StmtKind::If {
                condition,
                then_branch,
                else_branch,
            } => {
                if self.evaluate(condition)?.is_truthy() {
                    self.execute_block(then_branch)
                } else if let Some(branch) = else_branch {
                    self.execute_block(branch)
                } else {
                    Ok(FlowControl::Next)
                }
            }
            StmtKind::While { condition, body } => {
                while self.evaluate(condition)?.is_truthy() {
                    match self.execute_block(body)? {
                        FlowControl::Break => break,
                        FlowControl::Return(value) => return Ok(FlowControl::Return(value)),
                        FlowControl::Next | FlowControl::NextValue(_) | FlowControl::Continue => {}
                    }
                }
                Ok(FlowControl::Next)
            }
            StmtKind::For {
                binding,
                iterable,
                body,
            } => {
                let iterable_value = self.evaluate(iterable)?;
                for item in self.iterate(&iterable_value, iterable.span)? {
                    let child = Scope::with_parent(Rc::clone(&self.scope));
                    child.borrow_mut().define(binding.clone(), item, true, None);
                    let flow = self.with_scope(child, |exec| exec.execute_statements(body))?;
                    match flow {
                        FlowControl::Break => break,
                        FlowControl::Return(value) => return Ok(FlowControl::Return(value)),
                        FlowControl::Next | FlowControl::NextValue(_) | FlowControl::Continue => {}
                    }
                }
                Ok(FlowControl::Next)
            }
            StmtKind::Try {
                body,
                binding,
                handler,
            } => match self.execute_block(body) {
                Err(Failure::Exception(exception)) => {
                    let child = Scope::with_parent(Rc::clone(&self.scope));
                    child
                        .borrow_mut()
                        .define(binding.clone(), exception, true, None);
                    self.with_scope(child, |exec| exec.execute_statements(handler))
                }
                other => other,
            },
            StmtKind::Throw(expr) => {
                let value = self.evaluate(expr)?;
                Err(value.into())
            }
            StmtKind::Return(expr) => {
                let value = match expr {
                    Some(expr) => self.evaluate(expr)?,
                    None => Value::unit(),
                };
                Ok(FlowControl::Return(value))
            }
            StmtKind::Break => Ok(FlowControl::Break),
            StmtKind::Continue => Ok(FlowControl::Continue),
        }
    }

    fn evaluate(&mut self, expr: &Expr) -> Completion<Value> {
        match &expr.kind {
            ExprKind::Literal(lit) => Ok(literal(lit)),
            ExprKind::Variable(name) => match Scope::lookup(&self.scope, name) {
                Some(value) => Ok(value),
                None => self.raise(ErrorKind::Reference, format!("{name} is not defined"), expr.span),
            },
            ExprKind::Binary {
                op: BinaryOp::And,
                left,
                right,
            } => {
                let left_value = self.evaluate(left)?;
                if left_value.is_truthy() {
                    self.evaluate(right)
                } else {
                    Ok(left_value)
                }
            }
            ExprKind::Binary {
                op: BinaryOp::Or,
                left,
                right,
            } => {
                let left_value = self.evaluate(left)?;
                if left_value.is_truthy() {
                    Ok(left_value)
                } else {
                    self.evaluate(right)
                }
            }
            ExprKind::Binary { op, left, right } => {
                let left_value = self.evaluate(left)?;
                let right_value = self.evaluate(right)?;
                self.binary(*op, left_value, right_value, expr.span)
            }
            ExprKind::Unary { op, expr: operand } => {
                let value = self.evaluate(operand)?;
                match op {
                    UnaryOp::Negate => match value.kind() {
                        ValueKind::Int(n) => match n.checked_neg() {
                            Some(negated) => Ok(Value::int(negated)),
                            None => self.raise(ErrorKind::Range, "integer overflow in -", expr.span),
                        },
                        ValueKind::Float(n) => Ok(Value::float(-n)),
                        _ => self.raise(
                            ErrorKind::Type,
                            format!("cannot negate {}", value.type_name()),
                            expr.span,
                        ),
                    },
                    UnaryOp::Not => Ok(Value::bool(!value.is_truthy())),
                }
            }
            ExprKind::Assign { target, value } => {
                let value = self.evaluate(value)?;
                self.write_back(target, value.clone())?;
                Ok(value)
            }
            ExprKind::Call { callee, args } => {
                let callee_value = self.evaluate(callee)?;
                let mut eval_args = Vec::with_capacity(args.len());
                for arg in args {
                    eval_args.push(self.evaluate(arg)?);
                }
                self.call(callee_value, eval_args, expr.span)
            }
            ExprKind::ArrayLiteral(elements) => {
                let mut values = Vec::with_capacity(elements.len());
                for element in elements {
                    values.push(self.evaluate(element)?);
                }
                Ok(Value::array(values))
            }
            ExprKind::MapLiteral(entries) => {
                let mut map = IndexMap::new();
                for (key_expr, value_expr) in entries {
                    let key_value = self.evaluate(key_expr)?;
                    let key = match key_value.kind() {
                        ValueKind::String(s) => s.to_utf8_lossy(),
                        ValueKind::Int(n) => n.to_string(),
                        _ => {
                            return self.raise(
                                ErrorKind::Type,
                                "map keys must be strings or integers",
                                key_expr.span,
                            );
                        }
                    };
                    let value = self.evaluate(value_expr)?;
                    map.insert(key, value);
                }
                Ok(Value::map(map))
            }
            ExprKind::Group(inner) => self.evaluate(inner),
            ExprKind::Index { target, index } => {
                let target_value = self.evaluate(target)?;
                let index_value = self.evaluate(index)?;
                self.index(&target_value, &index_value, index.span)
            }
            ExprKind::Field { target, field } => {
                let target_value = self.evaluate(target)?;
                match target_value.kind() {
                    ValueKind::Map(map) => Ok(map.get(field).cloned().unwrap_or_else(Value::unit)),
                    _ => self.raise(
                        ErrorKind::Type,
                        format!("cannot read field {field} of {}", target_value.type_name()),
                        expr.span,
                    ),
                }
            }
            ExprKind::Lambda { params, body } => Ok(Value::new(ValueKind::Function(UserFunction {
                name: None,
                params: params.clone(),
                body: Rc::clone(body),
                scope: Rc::clone(&self.scope),
                origin: Rc::clone(&self.origin),
            }))),
        }
    }

    /// Calls any callable value. Natives see `span` as their call site.
    pub fn call(&mut self, callee: Value, args: Vec<Value>, span: SourceSpan) -> Completion<Value> {
        match callee.kind() {
            ValueKind::NativeFunction(native) => {
                let previous = std::mem::replace(&mut self.call_site, span);
                let result = native.call(self, &args);
                self.call_site = previous;
                result
            }
            ValueKind::Function(fun) => self.call_user(fun, args, span),
            _ => self.raise(
                ErrorKind::Type,
                format!("{} is not a function", callee.type_name()),
                span,
            ),
        }
    }

    fn call_user(&mut self, fun: &UserFunction, args: Vec<Value>, span: SourceSpan) -> Completion<Value> {
        if args.len() != fun.params.len() {
            return self.raise(
                ErrorKind::Type,
                format!(
                    "{} expected {} arguments but received {}",
                    fun.display_name(),
                    fun.params.len(),
                    args.len()
                ),
                span,
            );
        }
        if self.depth >= MAX_CALL_DEPTH {
            return self.raise(ErrorKind::Internal, "too much recursion", span);
        }

        let frame = Scope::with_parent(Rc::clone(&fun.scope));
        for (name, value) in fun.params.iter().zip(args) {
            frame.borrow_mut().define(name.clone(), value, true, None);
        }
        let previous_origin = std::mem::replace(&mut self.origin, Rc::clone(&fun.origin));
        self.depth += 1;
        let flow = self.with_scope(frame, |exec| exec.execute_statements(&fun.body));
        self.depth -= 1;
        self.origin = previous_origin;

        match flow? {
            FlowControl::Return(value) => Ok(value),
            // Lambdas yield their last expression; named functions need `return`.
            FlowControl::NextValue(value) if fun.name.is_none() => Ok(value),
            _ => Ok(Value::unit()),
        }
    }

    fn write_back(&mut self, target: &Expr, new_value: Value) -> Completion<()> {
        match &target.kind {
            ExprKind::Variable(name) => match Scope::assign(&self.scope, name, new_value) {
                Ok(()) => Ok(()),
                Err(ScopeError::Undefined) => {
                    self.raise(ErrorKind::Reference, format!("{name} is not defined"), target.span)
                }
                Err(ScopeError::Immutable(declared_at)) => {
                    let mut error = self.error_value(
                        ErrorKind::Type,
                        format!("invalid assignment to const {name}"),
                        target.span,
                    );
                    if let Some(declaration) = declared_at {
                        let note = declaration
                            .origin
                            .note(format!("{name} declared here"), declaration.span);
                        error = attach_note(error, note);
                    }
                    Err(error.into())
                }
            },
            ExprKind::Field {
                target: owner,
                field,
            } => {
                let owner_value = self.evaluate(owner)?;
                match owner_value.kind() {
                    ValueKind::Map(map) => {
                        let mut new_map = map.clone();
                        new_map.insert(field.clone(), new_value);
                        self.write_back(owner, Value::map(new_map))
                    }
                    _ => self.raise(
                        ErrorKind::Type,
                        format!("cannot set field {field} of {}", owner_value.type_name()),
                        target.span,
                    ),
                }
            }
            ExprKind::Index {
                target: owner,
                index,
            } => {
                let owner_value = self.evaluate(owner)?;
                let index_value = self.evaluate(index)?;
                match owner_value.kind() {
                    ValueKind::Array(elements) => {
                        let idx = self.array_index(&index_value, elements.len(), index.span)?;
                        let mut new_array = elements.clone();
                        new_array[idx] = new_value;
                        self.write_back(owner, Value::array(new_array))
                    }
                    ValueKind::Map(map) => {
                        let key = self.map_key(&index_value, index.span)?;
                        let mut new_map = map.clone();
                        new_map.insert(key, new_value);
                        self.write_back(owner, Value::map(new_map))
                    }
                    _ => self.raise(
                        ErrorKind::Type,
                        format!("cannot index into {}", owner_value.type_name()),
                        target.span,
                    ),
                }
            }
            _ => self.raise(ErrorKind::Syntax, "invalid assignment target", target.span),
        }
    }

    fn binary(&mut self, op: BinaryOp, left: Value, right: Value, span: SourceSpan) -> Completion<Value> {
        use BinaryOp::*;
        match op {
            Add => {
                if left.as_string().is_some() || right.as_string().is_some() {
                    let lhs = self.display_string(&left)?;
                    let rhs = self.display_string(&right)?;
                    return Ok(Value::string(lhs.concat(&rhs)));
                }
                self.numeric(op, &left, &right, span, |a, b| a + b)
            }
            Sub => self.numeric(op, &left, &right, span, |a, b| a - b),
            Mul => self.numeric(op, &left, &right, span, |a, b| a * b),
            Div => self.numeric(op, &left, &right, span, |a, b| a / b),
            Mod => self.numeric(op, &left, &right, span, |a, b| a % b),
            Equal => Ok(Value::bool(self.equal(&left, &right, span)?)),
            NotEqual => Ok(Value::bool(!self.equal(&left, &right, span)?)),
            Less => self.comparison(&left, &right, span, |ord| ord.is_lt()),
            LessEqual => self.comparison(&left, &right, span, |ord| ord.is_le()),
            Greater => self.comparison(&left, &right, span, |ord| ord.is_gt()),
            GreaterEqual => self.comparison(&left, &right, span, |ord| ord.is_ge()),
            And | Or => Ok(if left.is_truthy() == (op == Or) { left } else { right }),
        }
    }

    fn numeric<F>(&self, op: BinaryOp, left: &Value, right: &Value, span: SourceSpan, func: F) -> Completion<Value>
    where
        F: Fn(f64, f64) -> f64,
    {
        if let (ValueKind::Int(lhs), ValueKind::Int(rhs)) = (left.kind(), right.kind()) {
            if let Some(result) = integer_arithmetic(op, *lhs, *rhs) {
                return match result {
                    Some(n) => Ok(Value::int(n)),
                    None => self.raise(
                        ErrorKind::Range,
                        format!("integer overflow in {}", operator_symbol(op)),
                        span,
                    ),
                };
            }
        }
        let (Some(lhs), Some(rhs)) = (number(left), number(right)) else {
            return self.raise(
                ErrorKind::Type,
                format!(
                    "unsupported operand types for {}: {} and {}",
                    operator_symbol(op),
                    left.type_name(),
                    right.type_name()
                ),
                span,
            );
        };
        Ok(Value::float(func(lhs, rhs)))
    }

    /// Structural equality for arrays and maps, identity for functions.
    fn equal(&mut self, left: &Value, right: &Value, span: SourceSpan) -> Completion<bool> {
        match (left.kind(), right.kind()) {
            (ValueKind::Array(a), ValueKind::Array(b)) => {
                if a.len() != b.len() {
                    return Ok(false);
                }
                for (l, r) in a.iter().zip(b) {
                    if !self.descend(span, |exec| exec.equal(l, r, span))? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            (ValueKind::Map(a), ValueKind::Map(b)) => {
                if a.len() != b.len() {
                    return Ok(false);
                }
                for (key, l) in a {
                    let Some(r) = b.get(key) else {
                        return Ok(false);
                    };
                    if !self.descend(span, |exec| exec.equal(l, r, span))? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            _ => Ok(scalar_equal(left, right)),
        }
    }

    /// Runs `walk` one level further into a nested value.
    fn descend<T>(&mut self, span: SourceSpan, walk: impl FnOnce(&mut Self) -> Completion<T>) -> Completion<T> {
        if self.value_depth >= MAX_VALUE_DEPTH {
            return self.raise(ErrorKind::Internal, "too much recursion", span);
        }
        self.value_depth += 1;
        let result = walk(self);
        self.value_depth -= 1;
        result
    }

    fn comparison<F>(&self, left: &Value, right: &Value, span: SourceSpan, accept: F) -> Completion<Value>
    where
        F: Fn(std::cmp::Ordering) -> bool,
    {
        let ordering = match (left.as_string(), right.as_string()) {
            (Some(lhs), Some(rhs)) => Some(lhs.cmp(rhs)),
            _ => match (number(left), number(right)) {
                (Some(lhs), Some(rhs)) => lhs.partial_cmp(&rhs),
                _ => {
                    return self.raise(
                        ErrorKind::Type,
                        format!("cannot compare {} with {}", left.type_name(), right.type_name()),
                        span,
                    );
                }
            },
        };
        Ok(Value::bool(ordering.is_some_and(accept)))
    }

    fn array_index(&self, index: &Value, len: usize, span: SourceSpan) -> Completion<usize> {
        match index.kind() {
            ValueKind::Int(n) if *n >= 0 && (*n as usize) < len => Ok(*n as usize),
            ValueKind::Int(n) => self.raise(
                ErrorKind::Range,
                format!("index {n} out of range for length {len}"),
                span,
            ),
            _ => self.raise(
                ErrorKind::Type,
                format!("index must be int, found {}", index.type_name()),
                span,
            ),
        }
    }

    fn map_key(&self, key: &Value, span: SourceSpan) -> Completion<String> {
        match key.kind() {
            ValueKind::String(s) => Ok(s.to_utf8_lossy()),
            ValueKind::Int(n) => Ok(n.to_string()),
            _ => self.raise(ErrorKind::Type, "map keys must be strings or integers", span),
        }
    }

    fn index(&self, target: &Value, index: &Value, span: SourceSpan) -> Completion<Value> {
        match target.kind() {
            ValueKind::Array(values) => {
                let idx = self.array_index(index, values.len(), span)?;
                Ok(values[idx].clone())
            }
            ValueKind::String(text) => {
                let idx = self.array_index(index, text.len(), span)?;
                Ok(Value::string(ScriptString::from_units(vec![text.units()[idx]])))
            }
            ValueKind::Map(map) => {
                let key = self.map_key(index, span)?;
                Ok(map.get(&key).cloned().unwrap_or_else(Value::unit))
            }
            _ => self.raise(
                ErrorKind::Type,
                format!("cannot index into {}", target.type_name()),
                span,
            ),
        }
    }

    fn iterate(&self, value: &Value, span: SourceSpan) -> Completion<Vec<Value>> {
        match value.kind() {
            ValueKind::Array(values) => Ok(values.clone()),
            ValueKind::String(text) => Ok(char::decode_utf16(text.units().iter().copied())
                .map(|unit| match unit {
                    Ok(ch) => Value::string(ch.to_string()),
                    Err(err) => Value::string(ScriptString::from_units(vec![err.unpaired_surrogate()])),
                })
                .collect()),
            ValueKind::Map(map) => Ok(map
                .iter()
                .map(|(key, value)| Value::array(vec![Value::string(key.as_str()), value.clone()]))
                .collect()),
            _ => self.raise(
                ErrorKind::Type,
                format!("{} is not iterable", value.type_name()),
                span,
            ),
        }
    }

    /// Conversion used by `str`, `print` and string concatenation. Maps
    /// with a callable `to_string` field use it.
    pub fn display_string(&mut self, value: &Value) -> Completion<ScriptString> {
        match value.kind() {
            ValueKind::String(text) => Ok(text.clone()),
            ValueKind::Map(map) => match hook(map, "to_string") {
                Some(callee) => self.call_hook(callee, value, "to_string"),
                None => self.source_string(value),
            },
            ValueKind::Error(error) => Ok(ScriptString::from(format!(
                "{}: {}",
                error.kind.name(),
                error.message
            ))),
            _ => self.source_string(value),
        }
    }

    /// Source-like rendering. Maps with a callable `to_source` field use it.
    pub fn source_string(&mut self, value: &Value) -> Completion<ScriptString> {
        let text = match value.kind() {
            ValueKind::Unit => "none".to_string(),
            ValueKind::Bool(b) => b.to_string(),
            ValueKind::Int(n) => n.to_string(),
            ValueKind::Float(n) => n.to_string(),
            ValueKind::String(text) => quote(text),
            ValueKind::Array(values) => {
                let mut parts = Vec::with_capacity(values.len());
                for element in values {
                    let rendered = self.descend(self.call_site, |exec| exec.source_string(element))?;
                    parts.push(rendered.to_utf8_lossy());
                }
                format!("[{}]", parts.join(", "))
            }
            ValueKind::Map(map) => {
                if let Some(callee) = hook(map, "to_source") {
                    return self.call_hook(callee, value, "to_source");
                }
                let mut parts = Vec::with_capacity(map.len());
                for (key, entry) in map {
                    let rendered = self
                        .descend(self.call_site, |exec| exec.source_string(entry))?
                        .to_utf8_lossy();
                    parts.push(format!("{}: {rendered}", quote(&ScriptString::from(key.as_str()))));
                }
                format!("{{{}}}", parts.join(", "))
            }
            ValueKind::Function(fun) => format!("<fn {}>", fun.display_name()),
            ValueKind::NativeFunction(fun) => format!("<native fn {}>", fun.name),
            ValueKind::Error(error) => format!(
                "{}({})",
                error.kind.name(),
                quote(&ScriptString::from(error.message.as_str()))
            ),
        };
        Ok(ScriptString::from(text))
    }

    /// Hooks take the receiver as their argument when they declare one.
    fn call_hook(&mut self, callee: Value, receiver: &Value, name: &str) -> Completion<ScriptString> {
        let takes_receiver = match callee.kind() {
            ValueKind::Function(fun) => !fun.params.is_empty(),
            _ => true,
        };
        let args = if takes_receiver {
            vec![receiver.clone()]
        } else {
            Vec::new()
        };
        let result = self.call(callee, args, self.call_site)?;
        match result.as_string() {
            Some(text) => Ok(text.clone()),
            None => self.raise_at_call_site(
                ErrorKind::Type,
                format!("{name} returned {} instead of a string", result.type_name()),
            ),
        }
    }
}

fn literal(literal: &Literal) -> Value {
    match literal {
        Literal::Int(n) => Value::int(*n),
        Literal::Float(n) => Value::float(*n),
        Literal::Bool(b) => Value::bool(*b),
        Literal::String(s) => Value::string(s.clone()),
        Literal::None => Value::unit(),
    }
}

fn number(value: &Value) -> Option<f64> {
    match value.kind() {
        ValueKind::Int(n) => Some(*n as f64),
        ValueKind::Float(n) => Some(*n),
        _ => None,
    }
}

fn operator_symbol(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Add => "+",
        BinaryOp::Sub => "-",
        BinaryOp::Mul => "*",
        BinaryOp::Div => "/",
        BinaryOp::Mod => "%",
        BinaryOp::Equal => "==",
        BinaryOp::NotEqual => "!=",
        BinaryOp::Less => "<",
        BinaryOp::LessEqual => "<=",
        BinaryOp::Greater => ">",
        BinaryOp::GreaterEqual => ">=",
        BinaryOp::And => "&&",
        BinaryOp::Or => "||",
    }
}

/// Exact result of integer `op`: `Some(None)` on overflow, `None` when the
/// result is not an integer (inexact or by-zero division).
fn integer_arithmetic(op: BinaryOp, lhs: i64, rhs: i64) -> Option<Option<i64>> {
    match op {
        BinaryOp::Add => Some(lhs.checked_add(rhs)),
        BinaryOp::Sub => Some(lhs.checked_sub(rhs)),
        BinaryOp::Mul => Some(lhs.checked_mul(rhs)),
        BinaryOp::Div if rhs != 0 && lhs.wrapping_rem(rhs) == 0 => Some(lhs.checked_div(rhs)),
        BinaryOp::Mod if rhs != 0 => Some(Some(lhs.wrapping_rem(rhs))),
        _ => None,
    }
}

fn scalar_equal(left: &Value, right: &Value) -> bool {
    match (left.kind(), right.kind()) {
        (ValueKind::Unit, ValueKind::Unit) => true,
        (ValueKind::Bool(a), ValueKind::Bool(b)) => a == b,
        (ValueKind::Int(a), ValueKind::Int(b)) => a == b,
        (ValueKind::String(a), ValueKind::String(b)) => a == b,
        (ValueKind::Int(_) | ValueKind::Float(_), ValueKind::Int(_) | ValueKind::Float(_)) => {
            number(left) == number(right)
        }
        _ => Rc::ptr_eq(&left.0, &right.0),
    }
}

fn hook(map: &IndexMap<String, Value>, name: &str) -> Option<Value> {
    map.get(name).filter(|value| value.is_callable()).cloned()
}

fn attach_note(error: Value, note: Note) -> Value {
    match error.as_error() {
        Some(inner) => Value::error(
            inner.kind,
            inner.message.clone(),
            inner.report.clone().map(|report| report.with_note(note)),
        ),
        None => error,
    }
}

/// Double-quoted with escapes; unpaired surrogates become `\uXXXX`.
fn quote(text: &ScriptString) -> String {
    let mut quoted = String::with_capacity(text.len() + 2);
    quoted.push('"');
    for unit in char::decode_utf16(text.units().iter().copied()) {
        match unit {
            Ok('"') => quoted.push_str("\\\""),
            Ok('\\') => quoted.push_str("\\\\"),
            Ok('\n') => quoted.push_str("\\n"),
            Ok('\r') => quoted.push_str("\\r"),
            Ok('\t') => quoted.push_str("\\t"),
            Ok('\0') => quoted.push_str("\\0"),
            Ok(ch) => quoted.push(ch),
            Err(err) => quoted.push_str(&format!("\\u{:04X}", err.unpaired_surrogate())),
        }
    }
    quoted.push('"');
    quoted
}
