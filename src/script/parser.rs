use std::rc::Rc;

use crate::{
    diagnostics::{Severity, SourceSpan},
    script::{
        ast::{BinaryOp, Expr, ExprKind, Literal, ParseWarning, Program, Stmt, StmtKind, UnaryOp},
        lexer::{Keyword, Lexer, SyntaxError, Token, TokenKind},
    },
};

/// Nesting allowed in one program before parsing stops with an error
/// instead of exhausting the stack.
pub const MAX_NESTING: usize = 128;

pub fn parse_program(source: &str) -> Result<Program, SyntaxError> {
    let tokens = Lexer::new(source).tokenize()?;
    Parser::new(tokens).parse_program()
}

/// True unless the source stops in the middle of a construct. Invalid but
/// finished input counts as complete; evaluation reports the error.
pub fn is_compilable_unit(source: &str) -> bool {
    match parse_program(source) {
        Ok(_) => true,
        Err(err) => !err.incomplete,
    }
}

struct Parser {
    tokens: Vec<Token>,
    current: usize,
    warnings: Vec<ParseWarning>,
    loop_depth: usize,
    function_depth: usize,
    nesting: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            current: 0,
            warnings: Vec::new(),
            loop_depth: 0,
            function_depth: 0,
            nesting: 0,
        }
    }

    fn parse_program(mut self) -> Result<Program, SyntaxError> {
        let items = self.parse_statements(None)?;
        Ok(Program {
            items,
            warnings: self.warnings,
        })
    }

    /// Parses statements up to `terminator` (or end of input when `None`),
    /// warning once about anything after an unconditional exit.
    fn parse_statements(&mut self, terminator: Option<TokenKind>) -> Result<Vec<Stmt>, SyntaxError> {
        let mut items: Vec<Stmt> = Vec::new();
        let mut warned = false;
        loop {
            if self.check(TokenKind::Eof) {
                break;
            }
            if let Some(kind) = &terminator {
                if self.check(kind.clone()) {
                    break;
                }
            }
            let stmt = self.nested(Self::parse_statement)?;
            if !warned {
                if let Some(keyword) = items.last().and_then(|prev| prev.kind.exit_keyword()) {
                    self.warn(
                        Severity::Warning,
                        format!("unreachable code after {keyword} statement"),
                        stmt.span,
                    );
                    warned = true;
                }
            }
            items.push(stmt);
        }
        Ok(items)
    }

    fn parse_block(&mut self) -> Result<(Vec<Stmt>, SourceSpan), SyntaxError> {
        let lbrace = self.consume(TokenKind::LBrace, "expected `{` to start block")?;
        let items = self.parse_statements(Some(TokenKind::RBrace))?;
        let rbrace = self.consume(TokenKind::RBrace, "expected `}` after block")?;
        Ok((items, SourceSpan::new(lbrace.span.start, rbrace.span.end)))
    }

    fn parse_statement(&mut self) -> Result<Stmt, SyntaxError> {
        match self.peek().kind {
            TokenKind::Keyword(Keyword::Var) => self.parse_var_decl(),
            TokenKind::Keyword(Keyword::Const) => self.parse_const_decl(),
            TokenKind::Keyword(Keyword::Fn) => self.parse_function(),
            TokenKind::Keyword(Keyword::If) => self.parse_if(),
            TokenKind::Keyword(Keyword::While) => self.parse_while(),
            TokenKind::Keyword(Keyword::For) => self.parse_for(),
            TokenKind::Keyword(Keyword::Try) => self.parse_try(),
            TokenKind::Keyword(Keyword::Throw) => self.parse_throw(),
            TokenKind::Keyword(Keyword::Return) => self.parse_return(),
            TokenKind::Keyword(Keyword::Break) => {
                let token = self.advance();
                if self.loop_depth == 0 {
                    return Err(SyntaxError::new("break must be inside loop", token.span));
                }
                self.consume_optional_semicolon();
                Ok(Stmt {
                    span: token.span,
                    kind: StmtKind::Break,
                })
            }
            TokenKind::Keyword(Keyword::Continue) => {
                let token = self.advance();
                if self.loop_depth == 0 {
                    return Err(SyntaxError::new("continue must be inside loop", token.span));
                }
                self.consume_optional_semicolon();
                Ok(Stmt {
                    span: token.span,
                    kind: StmtKind::Continue,
                })
            }
            TokenKind::LBrace => {
                let (items, span) = self.parse_block()?;
                Ok(Stmt {
                    kind: StmtKind::Block(items),
                    span,
                })
            }
            _ => self.parse_expression_statement(),
        }
    }

    fn parse_var_decl(&mut self) -> Result<Stmt, SyntaxError> {
        let start = self.consume_keyword(Keyword::Var)?.span.start;
        let name = self.consume_identifier("expected variable name")?;
        let initializer = if self.matches(TokenKind::Assign) {
            Some(self.parse_expression()?)
        } else {
            None
        };
        self.consume_optional_semicolon();
        let end = initializer
            .as_ref()
            .map_or(name.span.end, |expr| expr.span.end);
        Ok(Stmt {
            kind: StmtKind::VarDecl {
                name: name.lexeme,
                name_span: name.span,
                initializer,
            },
            span: SourceSpan::new(start, end),
        })
    }

    fn parse_const_decl(&mut self) -> Result<Stmt, SyntaxError> {
        let start = self.consume_keyword(Keyword::Const)?.span.start;
        let name = self.consume_identifier("expected constant name")?;
        self.consume(TokenKind::Assign, "missing `=` in const declaration")?;
        let value = self.parse_expression()?;
        self.consume_optional_semicolon();
        Ok(Stmt {
            span: SourceSpan::new(start, value.span.end),
            kind: StmtKind::ConstDecl {
                name: name.lexeme,
                name_span: name.span,
                value,
            },
        })
    }

    fn parse_function(&mut self) -> Result<Stmt, SyntaxError> {
        let start = self.consume_keyword(Keyword::Fn)?.span.start;
        let name = self.consume_identifier("expected function name")?;
        self.consume(TokenKind::LParen, "expected `(` after function name")?;
        let mut params = Vec::new();
        if !self.check(TokenKind::RParen) {
            loop {
                params.push(self.consume_identifier("expected parameter name")?.lexeme);
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RParen, "expected `)` after parameters")?;
        let (body, span) = self.function_body(|parser| parser.parse_block())?;
        Ok(Stmt {
            span: SourceSpan::new(start, span.end),
            kind: StmtKind::Function {
                name: name.lexeme,
                name_span: name.span,
                params,
                body: Rc::from(body),
            },
        })
    }

    fn parse_if(&mut self) -> Result<Stmt, SyntaxError> {
        let start = self.consume_keyword(Keyword::If)?.span.start;
        let condition = self.parse_condition()?;
        let (then_branch, then_span) = self.parse_block()?;
        let mut end = then_span.end;
        let else_branch = if self.matches_keyword(Keyword::Else) {
            if self.check(TokenKind::Keyword(Keyword::If)) {
                let else_if = self.nested(Self::parse_if)?;
                end = else_if.span.end;
                Some(vec![else_if])
            } else {
                let (branch, span) = self.parse_block()?;
                end = span.end;
                Some(branch)
            }
        } else {
            None
        };
        Ok(Stmt {
            span: SourceSpan::new(start, end),
            kind: StmtKind::If {
                condition,
                then_branch,
                else_branch,
            },
        })
    }

    fn parse_while(&mut self) -> Result<Stmt, SyntaxError> {
        let start = self.consume_keyword(Keyword::While)?.span.start;
        let condition = self.parse_condition()?;
        let (body, span) = self.loop_body()?;
        Ok(Stmt {
            span: SourceSpan::new(start, span.end),
            kind: StmtKind::While { condition, body },
        })
    }

    fn parse_for(&mut self) -> Result<Stmt, SyntaxError> {
        let start = self.consume_keyword(Keyword::For)?.span.start;
        let binding = self.consume_identifier("expected loop binding")?;
        self.consume_keyword(Keyword::In)?;
        let iterable = self.parse_expression()?;
        let (body, span) = self.loop_body()?;
        Ok(Stmt {
            span: SourceSpan::new(start, span.end),
            kind: StmtKind::For {
                binding: binding.lexeme,
                iterable,
                body,
            },
        })
    }

    fn parse_try(&mut self) -> Result<Stmt, SyntaxError> {
        let start = self.consume_keyword(Keyword::Try)?.span.start;
        let (body, _) = self.parse_block()?;
        self.consume_keyword(Keyword::Catch)?;
        let binding = self.consume_identifier("expected identifier after `catch`")?;
        let (handler, span) = self.parse_block()?;
        Ok(Stmt {
            span: SourceSpan::new(start, span.end),
            kind: StmtKind::Try {
                body,
                binding: binding.lexeme,
                handler,
            },
        })
    }

    fn parse_throw(&mut self) -> Result<Stmt, SyntaxError> {
        let start = self.consume_keyword(Keyword::Throw)?.span.start;
        let value = self.parse_expression()?;
        self.consume_optional_semicolon();
        Ok(Stmt {
            span: SourceSpan::new(start, value.span.end),
            kind: StmtKind::Throw(value),
        })
    }

    fn parse_return(&mut self) -> Result<Stmt, SyntaxError> {
        let token = self.consume_keyword(Keyword::Return)?;
        if self.function_depth == 0 {
            return Err(SyntaxError::new("return not in function", token.span));
        }
        let expr = if self.check(TokenKind::Semicolon)
            || self.check(TokenKind::RBrace)
            || self.check(TokenKind::Eof)
        {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.consume_optional_semicolon();
        let end = expr.as_ref().map_or(token.span.end, |e| e.span.end);
        Ok(Stmt {
            span: SourceSpan::new(token.span.start, end),
            kind: StmtKind::Return(expr),
        })
    }

    fn parse_expression_statement(&mut self) -> Result<Stmt, SyntaxError> {
        let expr = self.parse_expression()?;
        self.consume_optional_semicolon();
        Ok(Stmt {
            span: expr.span,
            kind: StmtKind::Expr(expr),
        })
    }

    fn parse_condition(&mut self) -> Result<Expr, SyntaxError> {
        let condition = self.parse_expression()?;
        if matches!(condition.kind, ExprKind::Assign { .. }) {
            self.warn(
                Severity::StrictWarning,
                "test for equality (==) mistyped as assignment (=)?",
                condition.span,
            );
        }
        Ok(condition)
    }

    fn parse_expression(&mut self) -> Result<Expr, SyntaxError> {
        self.nested(Self::parse_assignment)
    }

    fn parse_assignment(&mut self) -> Result<Expr, SyntaxError> {
        let expr = self.parse_or()?;
        if self.matches(TokenKind::Assign) {
            let equals = self.previous().span;
            let value = self.parse_expression()?;
            match expr.kind {
                ExprKind::Variable(_) | ExprKind::Index { .. } | ExprKind::Field { .. } => Ok(Expr {
                    span: SourceSpan::new(expr.span.start, value.span.end),
                    kind: ExprKind::Assign {
                        target: Box::new(expr),
                        value: Box::new(value),
                    },
                }),
                _ => Err(SyntaxError::new("invalid assignment target", equals)),
            }
        } else {
            Ok(expr)
        }
    }

    fn parse_or(&mut self) -> Result<Expr, SyntaxError> {
        let mut expr = self.parse_and()?;
        while self.matches(TokenKind::DoublePipe) {
            let right = self.parse_and()?;
            expr = binary(BinaryOp::Or, expr, right);
        }
        Ok(expr)
    }

    fn parse_and(&mut self) -> Result<Expr, SyntaxError> {
        let mut expr = self.parse_equality()?;
        while self.matches(TokenKind::DoubleAmpersand) {
            let right = self.parse_equality()?;
            expr = binary(BinaryOp::And, expr, right);
        }
        Ok(expr)
    }

    fn parse_equality(&mut self) -> Result<Expr, SyntaxError> {
        let mut expr = self.parse_comparison()?;
        loop {
            let op = if self.matches(TokenKind::EqualEqual) {
                BinaryOp::Equal
            } else if self.matches(TokenKind::BangEqual) {
                BinaryOp::NotEqual
            } else {
                break;
            };
            let right = self.parse_comparison()?;
            expr = binary(op, expr, right);
        }
        Ok(expr)
    }

    fn parse_comparison(&mut self) -> Result<Expr, SyntaxError> {
        let mut expr = self.parse_term()?;
        loop {
            let op = if self.matches(TokenKind::LessEqual) {
                BinaryOp::LessEqual
            } else if self.matches(TokenKind::GreaterEqual) {
                BinaryOp::GreaterEqual
            } else if self.matches(TokenKind::Less) {
                BinaryOp::Less
            } else if self.matches(TokenKind::Greater) {
                BinaryOp::Greater
            } else {
                break;
            };
            let right = self.parse_term()?;
            expr = binary(op, expr, right);
        }
        Ok(expr)
    }

    fn parse_term(&mut self) -> Result<Expr, SyntaxError> {
        let mut expr = self.parse_factor()?;
        loop {
            let op = if self.matches(TokenKind::Plus) {
                BinaryOp::Add
            } else if self.matches(TokenKind::Minus) {
                BinaryOp::Sub
            } else {
                break;
            };
            let right = self.parse_factor()?;
            expr = binary(op, expr, right);
        }
        Ok(expr)
    }

    fn parse_factor(&mut self) -> Result<Expr, SyntaxError> {
        let mut expr = self.parse_unary()?;
        loop {
            let op = if self.matches(TokenKind::Star) {
                BinaryOp::Mul
            } else if self.matches(TokenKind::Slash) {
                BinaryOp::Div
            } else if self.matches(TokenKind::Percent) {
                BinaryOp::Mod
            } else {
                break;
            };
            let right = self.parse_unary()?;
            expr = binary(op, expr, right);
        }
        Ok(expr)
    }

    fn parse_unary(&mut self) -> Result<Expr, SyntaxError> {
        let op = if self.matches(TokenKind::Minus) {
            UnaryOp::Negate
        } else if self.matches(TokenKind::Bang) {
            UnaryOp::Not
        } else {
            return self.parse_call();
        };
        let operator = self.previous().span;
        let right = self.nested(Self::parse_unary)?;
        Ok(Expr {
            span: SourceSpan::new(operator.start, right.span.end),
            kind: ExprKind::Unary {
                op,
                expr: Box::new(right),
            },
        })
    }

    fn parse_call(&mut self) -> Result<Expr, SyntaxError> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.matches(TokenKind::LParen) {
                let mut args = Vec::new();
                if !self.check(TokenKind::RParen) {
                    loop {
                        args.push(self.parse_expression()?);
                        if !self.matches(TokenKind::Comma) {
                            break;
                        }
                    }
                }
                let paren = self.consume(TokenKind::RParen, "missing `)` after argument list")?;
                expr = Expr {
                    span: SourceSpan::new(expr.span.start, paren.span.end),
                    kind: ExprKind::Call {
                        callee: Box::new(expr),
                        args,
                    },
                };
            } else if self.matches(TokenKind::LBracket) {
                let index = self.parse_expression()?;
                let bracket = self.consume(TokenKind::RBracket, "missing `]` after index")?;
                expr = Expr {
                    span: SourceSpan::new(expr.span.start, bracket.span.end),
                    kind: ExprKind::Index {
                        target: Box::new(expr),
                        index: Box::new(index),
                    },
                };
            } else if self.matches(TokenKind::Dot) {
                let ident = self.consume_identifier("missing name after `.` operator")?;
                expr = Expr {
                    span: SourceSpan::new(expr.span.start, ident.span.end),
                    kind: ExprKind::Field {
                        target: Box::new(expr),
                        field: ident.lexeme,
                    },
                };
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr, SyntaxError> {
        let token = self.peek().clone();
        let literal = |kind| Expr {
            span: token.span,
            kind: ExprKind::Literal(kind),
        };
        match &token.kind {
            TokenKind::Keyword(Keyword::True) => {
                self.advance();
                Ok(literal(Literal::Bool(true)))
            }
            TokenKind::Keyword(Keyword::False) => {
                self.advance();
                Ok(literal(Literal::Bool(false)))
            }
            TokenKind::Keyword(Keyword::None) => {
                self.advance();
                Ok(literal(Literal::None))
            }
            TokenKind::Number => {
                self.advance();
                let digits = token.lexeme.replace('_', "");
                let parsed = if digits.contains(['.', 'e', 'E']) {
                    digits.parse().map(Literal::Float).ok()
                } else {
                    digits.parse().map(Literal::Int).ok()
                };
                parsed
                    .map(literal)
                    .ok_or_else(|| SyntaxError::new("malformed number literal", token.span))
            }
            TokenKind::String(text) => {
                self.advance();
                Ok(literal(Literal::String(text.clone())))
            }
            TokenKind::Identifier => {
                self.advance();
                Ok(Expr {
                    span: token.span,
                    kind: ExprKind::Variable(token.lexeme.clone()),
                })
            }
            TokenKind::LParen => {
                self.advance();
                let inner = self.parse_expression()?;
                let rparen = self.consume(TokenKind::RParen, "missing `)` in parenthetical")?;
                Ok(Expr {
                    span: SourceSpan::new(token.span.start, rparen.span.end),
                    kind: ExprKind::Group(Box::new(inner)),
                })
            }
            TokenKind::LBracket => {
                self.advance();
                let mut elements = Vec::new();
                if !self.check(TokenKind::RBracket) {
                    loop {
                        elements.push(self.parse_expression()?);
                        if !self.matches(TokenKind::Comma) || self.check(TokenKind::RBracket) {
                            break;
                        }
                    }
                }
                let rbracket =
                    self.consume(TokenKind::RBracket, "missing `]` after element list")?;
                Ok(Expr {
                    span: SourceSpan::new(token.span.start, rbracket.span.end),
                    kind: ExprKind::ArrayLiteral(elements),
                })
            }
            TokenKind::LBrace => self.parse_inline_map(),
            TokenKind::Pipe | TokenKind::DoublePipe => self.parse_lambda(),
            _ => Err(self.error(&token, "unexpected token in expression")),
        }
    }

    fn parse_inline_map(&mut self) -> Result<Expr, SyntaxError> {
        let lbrace = self.advance();
        let mut entries = Vec::new();
        if !self.check(TokenKind::RBrace) {
            loop {
                let key = self.parse_expression()?;
                self.consume(TokenKind::Colon, "missing `:` after property key")?;
                let value = self.parse_expression()?;
                entries.push((key, value));
                if !self.matches(TokenKind::Comma) || self.check(TokenKind::RBrace) {
                    break;
                }
            }
        }
        let rbrace = self.consume(TokenKind::RBrace, "missing `}` after property list")?;
        Ok(Expr {
            span: SourceSpan::new(lbrace.span.start, rbrace.span.end),
            kind: ExprKind::MapLiteral(entries),
        })
    }

    /// `|a, b| expr`, `|| expr`, or a lambda with a block body.
    fn parse_lambda(&mut self) -> Result<Expr, SyntaxError> {
        let opener = self.advance();
        let mut params = Vec::new();
        if opener.kind == TokenKind::Pipe {
            if !self.check(TokenKind::Pipe) {
                loop {
                    params.push(self.consume_identifier("expected parameter in lambda")?.lexeme);
                    if !self.matches(TokenKind::Comma) {
                        break;
                    }
                }
            }
            self.consume(TokenKind::Pipe, "expected closing `|` in lambda")?;
        }
        let (body, end) = self.function_body(|parser| {
            if parser.check(TokenKind::LBrace) {
                let (items, span) = parser.parse_block()?;
                Ok((items, span.end))
            } else {
                let expr = parser.parse_expression()?;
                let end = expr.span.end;
                let stmt = Stmt {
                    span: expr.span,
                    kind: StmtKind::Expr(expr),
                };
                Ok((vec![stmt], end))
            }
        })?;
        Ok(Expr {
            span: SourceSpan::new(opener.span.start, end),
            kind: ExprKind::Lambda {
                params,
                body: Rc::from(body),
            },
        })
    }

    fn loop_body(&mut self) -> Result<(Vec<Stmt>, SourceSpan), SyntaxError> {
        self.loop_depth += 1;
        let body = self.parse_block();
        self.loop_depth -= 1;
        body
    }

    /// Loops outside a function body do not extend into it.
    fn function_body<T>(
        &mut self,
        parse: impl FnOnce(&mut Self) -> Result<T, SyntaxError>,
    ) -> Result<T, SyntaxError> {
        let enclosing_loops = std::mem::replace(&mut self.loop_depth, 0);
        self.function_depth += 1;
        let body = parse(self);
        self.function_depth -= 1;
        self.loop_depth = enclosing_loops;
        body
    }

    /// Runs `parse` one level deeper, failing once `MAX_NESTING` is reached.
    fn nested<T>(&mut self, parse: impl FnOnce(&mut Self) -> Result<T, SyntaxError>) -> Result<T, SyntaxError> {
        if self.nesting >= MAX_NESTING {
            return Err(SyntaxError::new("too much nesting", self.peek().span));
        }
        self.nesting += 1;
        let result = parse(self);
        self.nesting -= 1;
        result
    }

    fn warn(&mut self, severity: Severity, message: impl Into<String>, span: SourceSpan) {
        self.warnings.push(ParseWarning {
            severity,
            message: message.into(),
            span,
        });
    }

    fn consume_optional_semicolon(&mut self) {
        let _ = self.matches(TokenKind::Semicolon);
    }

    fn matches(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn matches_keyword(&mut self, keyword: Keyword) -> bool {
        self.matches(TokenKind::Keyword(keyword))
    }

    fn consume(&mut self, kind: TokenKind, message: &str) -> Result<Token, SyntaxError> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            Err(self.error(self.peek(), message))
        }
    }

    fn consume_keyword(&mut self, keyword: Keyword) -> Result<Token, SyntaxError> {
        let message = format!("expected `{}`", keyword.as_str());
        self.consume(TokenKind::Keyword(keyword), &message)
    }

    fn consume_identifier(&mut self, message: &str) -> Result<Token, SyntaxError> {
        self.consume(TokenKind::Identifier, message)
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.peek().kind == kind
    }

    fn advance(&mut self) -> Token {
        if !self.is_at_end() {
            self.current += 1;
        }
        self.previous().clone()
    }

    fn previous(&self) -> &Token {
        &self.tokens[self.current.saturating_sub(1)]
    }

    /// The lexer always terminates the stream with `Eof`, so there is
    /// always a token to look at.
    fn peek(&self) -> &Token {
        let last = self.tokens.len() - 1;
        &self.tokens[self.current.min(last)]
    }

    fn is_at_end(&self) -> bool {
        self.peek().kind == TokenKind::Eof
    }

    fn error(&self, token: &Token, message: &str) -> SyntaxError {
        if token.kind == TokenKind::Eof {
            SyntaxError::incomplete(message, token.span)
        } else {
            SyntaxError::new(message, token.span)
        }
    }
}

fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    Expr {
        span: SourceSpan::new(left.span.start, right.span.end),
        kind: ExprKind::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        },
    }
}
