use std::rc::Rc;

use crate::{
    diagnostics::{Severity, SourceSpan},
    engine::ScriptString,
};

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Int(i64),
    Float(f64),
    Bool(bool),
    String(ScriptString),
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Negate,
    Not,
}

#[derive(Debug, Clone)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: SourceSpan,
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    Literal(Literal),
    Variable(String),
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    Assign {
        target: Box<Expr>,
        value: Box<Expr>,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    ArrayLiteral(Vec<Expr>),
    MapLiteral(Vec<(Expr, Expr)>),
    Group(Box<Expr>),
    Index {
        target: Box<Expr>,
        index: Box<Expr>,
    },
    Field {
        target: Box<Expr>,
        field: String,
    },
    Lambda {
        params: Vec<String>,
        body: Rc<[Stmt]>,
    },
}

#[derive(Debug, Clone)]
pub enum StmtKind {
    VarDecl {
        name: String,
        name_span: SourceSpan,
        initializer: Option<Expr>,
    },
    ConstDecl {
        name: String,
        name_span: SourceSpan,
        value: Expr,
    },
    Function {
        name: String,
        name_span: SourceSpan,
        params: Vec<String>,
        body: Rc<[Stmt]>,
    },
    Expr(Expr),
    Block(Vec<Stmt>),
    If {
        condition: Expr,
        then_branch: Vec<Stmt>,
        else_branch: Option<Vec<Stmt>>,
    },
    While {
        condition: Expr,
        body: Vec<Stmt>,
    },
    For {
        binding: String,
        iterable: Expr,
        body: Vec<Stmt>,
    },
    Try {
        body: Vec<Stmt>,
        binding: String,
        handler: Vec<Stmt>,
    },
    Throw(Expr),
    Return(Option<Expr>),
    Break,
    Continue,
}

impl StmtKind {
    /// Statements after which nothing else in the same block can run.
    pub fn exit_keyword(&self) -> Option<&'static str> {
        match self {
            StmtKind::Return(_) => Some("return"),
            StmtKind::Break => Some("break"),
            StmtKind::Continue => Some("continue"),
            StmtKind::Throw(_) => Some("throw"),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: SourceSpan,
}

/// Something suspicious the parser noticed but still accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseWarning {
    pub severity: Severity,
    pub message: String,
    pub span: SourceSpan,
}

#[derive(Debug, Clone)]
pub struct Program {
    pub items: Vec<Stmt>,
    pub warnings: Vec<ParseWarning>,
}
