use crate::{diagnostics::SourceSpan, engine::ScriptString};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    Var,
    Const,
    Fn,
    If,
    Else,
    While,
    For,
    In,
    Break,
    Continue,
    Return,
    Throw,
    Try,
    Catch,
    True,
    False,
    None,
}

impl Keyword {
    pub fn as_str(self) -> &'static str {
        match self {
            Keyword::Var => "var",
            Keyword::Const => "const",
            Keyword::Fn => "fn",
            Keyword::If => "if",
            Keyword::Else => "else",
            Keyword::While => "while",
            Keyword::For => "for",
            Keyword::In => "in",
            Keyword::Break => "break",
            Keyword::Continue => "continue",
            Keyword::Return => "return",
            Keyword::Throw => "throw",
            Keyword::Try => "try",
            Keyword::Catch => "catch",
            Keyword::True => "true",
            Keyword::False => "false",
            Keyword::None => "none",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    Identifier,
    Number,
    String(ScriptString),
    Keyword(Keyword),
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Dot,
    Colon,
    Semicolon,
    Assign,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Pipe,
    DoubleAmpersand,
    DoublePipe,
    Bang,
    BangEqual,
    EqualEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    Unknown,
    Eof,
}

#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub lexeme: String,
    pub span: SourceSpan,
}

/// A lexing or parsing failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxError {
    pub message: String,
    pub span: SourceSpan,
    /// The input ended before the construct did; more lines may fix it.
    pub incomplete: bool,
}

impl SyntaxError {
    pub fn new(message: impl Into<String>, span: SourceSpan) -> Self {
        Self {
            message: message.into(),
            span,
            incomplete: false,
        }
    }

    pub fn incomplete(message: impl Into<String>, span: SourceSpan) -> Self {
        Self {
            message: message.into(),
            span,
            incomplete: true,
        }
    }
}

pub struct Lexer<'a> {
    source: &'a str,
    chars: std::str::CharIndices<'a>,
    current: usize,
    peeked: Option<(usize, char)>,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.char_indices(),
            current: 0,
            peeked: None,
        }
    }

    fn bump(&mut self) -> Option<(usize, char)> {
        let next = match self.peeked.take() {
            Some(pair) => Some(pair),
            None => self.chars.next(),
        };
        if let Some((idx, ch)) = next {
            self.current = idx + ch.len_utf8();
        }
        next
    }

    fn peek(&mut self) -> Option<(usize, char)> {
        if self.peeked.is_none() {
            self.peeked = self.chars.next();
        }
        self.peeked
    }

    /// The character after the one `peek` returns.
    fn peek_second(&mut self) -> Option<char> {
        self.peek();
        self.chars.clone().next().map(|(_, ch)| ch)
    }

    fn match_next(&mut self, expected: char) -> bool {
        match self.peek() {
            Some((_, ch)) if ch == expected => {
                self.bump();
                true
            }
            _ => false,
        }
    }

    fn skip_whitespace_and_comments(&mut self) -> Result<(), SyntaxError> {
        loop {
            match self.peek() {
                Some((_, ch)) if ch.is_whitespace() => {
                    self.bump();
                }
                Some((start, '/')) => match self.peek_second() {
                    Some('/') => {
                        while let Some((_, ch)) = self.peek() {
                            if ch == '\n' {
                                break;
                            }
                            self.bump();
                        }
                    }
                    Some('*') => self.block_comment(start)?,
                    _ => return Ok(()),
                },
                _ => return Ok(()),
            }
        }
    }

    fn block_comment(&mut self, start: usize) -> Result<(), SyntaxError> {
        self.bump();
        self.bump();
        let mut depth = 1;
        while let Some((_, ch)) = self.bump() {
            if ch == '/' && self.match_next('*') {
                depth += 1;
            } else if ch == '*' && self.match_next('/') {
                depth -= 1;
                if depth == 0 {
                    return Ok(());
                }
            }
        }
        Err(SyntaxError::incomplete(
            "unterminated comment",
            SourceSpan::new(start, self.current),
        ))
    }

    fn identifier_or_keyword(&mut self, start: usize) -> Token {
        while let Some((_, ch)) = self.peek() {
            if ch.is_alphanumeric() || ch == '_' {
                self.bump();
            } else {
                break;
            }
        }
        let lexeme = &self.source[start..self.current];
        let kind = keyword_for(lexeme).map_or(TokenKind::Identifier, TokenKind::Keyword);
        self.simple_token(start, kind)
    }

    fn number_literal(&mut self, start: usize) -> Token {
        let mut seen_dot = false;
        let mut seen_exponent = false;
        while let Some((_, ch)) = self.peek() {
            match ch {
                '0'..='9' | '_' => {
                    self.bump();
                }
                '.' if !seen_dot && !seen_exponent => {
                    if !matches!(self.peek_second(), Some('0'..='9')) {
                        break;
                    }
                    seen_dot = true;
                    self.bump();
                }
                'e' | 'E' if !seen_exponent => {
                    seen_exponent = true;
                    self.bump();
                    if let Some((_, '+' | '-')) = self.peek() {
                        self.bump();
                    }
                }
                _ => break,
            }
        }
        self.simple_token(start, TokenKind::Number)
    }

    fn string_literal(&mut self, start: usize) -> Result<Token, SyntaxError> {
        let mut units: Vec<u16> = Vec::new();
        while let Some((idx, ch)) = self.bump() {
            match ch {
                '"' => {
                    return Ok(self.simple_token(
                        start,
                        TokenKind::String(ScriptString::from_units(units)),
                    ));
                }
                '\\' => {
                    let Some((_, escape)) = self.bump() else {
                        break;
                    };
                    match escape {
                        'n' => units.push(u16::from(b'\n')),
                        'r' => units.push(u16::from(b'\r')),
                        't' => units.push(u16::from(b'\t')),
                        '0' => units.push(0),
                        'u' => self.unicode_escape(idx, &mut units)?,
                        other => push_char(&mut units, other),
                    }
                }
                _ => push_char(&mut units, ch),
            }
        }
        Err(SyntaxError::incomplete(
            "unterminated string literal",
            SourceSpan::new(start, self.current),
        ))
    }

    /// `\uXXXX` yields one code unit as written, so lone surrogates survive;
    /// `\u{X..}` yields a whole code point.
    fn unicode_escape(&mut self, escape_start: usize, units: &mut Vec<u16>) -> Result<(), SyntaxError> {
        let braced = self.match_next('{');
        let mut digits = String::new();
        loop {
            match self.peek() {
                Some((_, '}')) if braced => {
                    self.bump();
                    break;
                }
                Some((_, ch)) if ch.is_ascii_hexdigit() && (braced || digits.len() < 4) => {
                    digits.push(ch);
                    self.bump();
                }
                None => {
                    return Err(SyntaxError::incomplete(
                        "unterminated string literal",
                        SourceSpan::new(escape_start, self.current),
                    ));
                }
                _ if braced => {
                    return Err(SyntaxError::new(
                        "malformed Unicode character escape sequence",
                        SourceSpan::new(escape_start, self.current),
                    ));
                }
                _ => break,
            }
        }

        let malformed = || {
            SyntaxError::new(
                "malformed Unicode character escape sequence",
                SourceSpan::new(escape_start, self.current),
            )
        };
        if (!braced && digits.len() != 4) || digits.is_empty() {
            return Err(malformed());
        }
        let code = u32::from_str_radix(&digits, 16).map_err(|_| malformed())?;
        if code <= 0xFFFF {
            units.push(code as u16);
        } else {
            let ch = char::from_u32(code).ok_or_else(malformed)?;
            push_char(units, ch);
        }
        Ok(())
    }

    fn simple_token(&self, start: usize, kind: TokenKind) -> Token {
        let end = self.current;
        Token {
            kind,
            lexeme: self.source[start..end].to_string(),
            span: SourceSpan { start, end },
        }
    }

    pub fn tokenize(mut self) -> Result<Vec<Token>, SyntaxError> {
        let mut tokens = Vec::new();
        loop {
            self.skip_whitespace_and_comments()?;
            let Some((start, ch)) = self.bump() else {
                tokens.push(Token {
                    kind: TokenKind::Eof,
                    lexeme: String::new(),
                    span: SourceSpan::new(self.current, self.current),
                });
                break;
            };

            let token = match ch {
                'a'..='z' | 'A'..='Z' | '_' => self.identifier_or_keyword(start),
                '0'..='9' => self.number_literal(start),
                '"' => self.string_literal(start)?,
                '(' => self.simple_token(start, TokenKind::LParen),
                ')' => self.simple_token(start, TokenKind::RParen),
                '{' => self.simple_token(start, TokenKind::LBrace),
                '}' => self.simple_token(start, TokenKind::RBrace),
                '[' => self.simple_token(start, TokenKind::LBracket),
                ']' => self.simple_token(start, TokenKind::RBracket),
                ',' => self.simple_token(start, TokenKind::Comma),
                '.' => self.simple_token(start, TokenKind::Dot),
                ';' => self.simple_token(start, TokenKind::Semicolon),
                ':' => self.simple_token(start, TokenKind::Colon),
                '+' => self.simple_token(start, TokenKind::Plus),
                '-' => self.simple_token(start, TokenKind::Minus),
                '*' => self.simple_token(start, TokenKind::Star),
                '/' => self.simple_token(start, TokenKind::Slash),
                '%' => self.simple_token(start, TokenKind::Percent),
                '=' => {
                    if self.match_next('=') {
                        self.simple_token(start, TokenKind::EqualEqual)
                    } else {
                        self.simple_token(start, TokenKind::Assign)
                    }
                }
                '!' => {
                    if self.match_next('=') {
                        self.simple_token(start, TokenKind::BangEqual)
                    } else {
                        self.simple_token(start, TokenKind::Bang)
                    }
                }
                '&' => {
                    if self.match_next('&') {
                        self.simple_token(start, TokenKind::DoubleAmpersand)
                    } else {
                        self.simple_token(start, TokenKind::Unknown)
                    }
                }
                '|' => {
                    if self.match_next('|') {
                        self.simple_token(start, TokenKind::DoublePipe)
                    } else {
                        self.simple_token(start, TokenKind::Pipe)
                    }
                }
                '<' => {
                    if self.match_next('=') {
                        self.simple_token(start, TokenKind::LessEqual)
                    } else {
                        self.simple_token(start, TokenKind::Less)
                    }
                }
                '>' => {
                    if self.match_next('=') {
                        self.simple_token(start, TokenKind::GreaterEqual)
                    } else {
                        self.simple_token(start, TokenKind::Greater)
                    }
                }
                _ => self.simple_token(start, TokenKind::Unknown),
            };
            tokens.push(token);
        }
        Ok(tokens)
    }
}

fn push_char(units: &mut Vec<u16>, ch: char) {
    let mut buf = [0u16; 2];
    units.extend_from_slice(ch.encode_utf16(&mut buf));
}

fn keyword_for(ident: &str) -> Option<Keyword> {
    use self::Keyword as Kw;
    let keyword = match ident {
        "var" => Kw::Var,
        "const" => Kw::Const,
        "fn" => Kw::Fn,
        "if" => Kw::If,
        "else" => Kw::Else,
        "while" => Kw::While,
        "for" => Kw::For,
        "in" => Kw::In,
        "break" => Kw::Break,
        "continue" => Kw::Continue,
        "return" => Kw::Return,
        "throw" => Kw::Throw,
        "try" => Kw::Try,
        "catch" => Kw::Catch,
        "true" => Kw::True,
        "false" => Kw::False,
        "none" => Kw::None,
        _ => return None,
    };
    Some(keyword)
}
