use crate::diagnostics::{Diagnostic, DiagnosticKind, SourceSpan};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Keyword {
    And,
    Break,
    Do,
    Else,
    Elseif,
    End,
    False,
    For,
    Function,
    If,
    In,
    Local,
    Nil,
    Not,
    Or,
    Repeat,
    Return,
    Then,
    True,
    Until,
    While,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Identifier,
    Number,
    /// String literal with escapes already decoded. Lua strings are byte
    /// strings, so the payload is not required to be valid UTF-8.
    Str(Vec<u8>),
    Keyword(Keyword),
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Dot,
    DotDot,
    Semicolon,
    Colon,
    Assign,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Caret,
    Hash,
    EqualEqual,
    NotEqual,
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
        let next = if let Some((idx, ch)) = self.peeked.take() {
            Some((idx, ch))
        } else {
            self.chars.next()
        };
        if let Some((idx, ch)) = next {
            self.current = idx + ch.len_utf8();
            Some((idx, ch))
        } else {
            None
        }
    }

    fn peek(&mut self) -> Option<(usize, char)> {
        if self.peeked.is_none() {
            self.peeked = self.chars.next();
        }
        self.peeked
    }

    fn match_next(&mut self, expected: char) -> bool {
        if let Some((idx, ch)) = self.peek() {
            if ch == expected {
                self.peeked = None;
                self.current = idx + ch.len_utf8();
                true
            } else {
                false
            }
        } else {
            false
        }
    }

    fn skip_whitespace_and_comments(&mut self) -> Result<(), Diagnostic> {
        loop {
            let mut progressed = false;

            while let Some((_, ch)) = self.peek() {
                if ch.is_whitespace() {
                    self.bump();
                    progressed = true;
                } else {
                    break;
                }
            }

            if let Some((start, '-')) = self.peek() {
                let mut lookahead = self.chars.clone();
                if let Some((_, '-')) = lookahead.next() {
                    self.bump();
                    self.bump();
                    if self.match_next('[') && self.match_next('[') {
                        // Block comment, runs until `]]`.
                        let mut closed = false;
                        while let Some((_, ch)) = self.bump() {
                            if ch == ']' && self.match_next(']') {
                                closed = true;
                                break;
                            }
                        }
                        if !closed {
                            return Err(Diagnostic::new(
                                DiagnosticKind::Lexer,
                                "unterminated block comment",
                            )
                            .with_span(SourceSpan::new(start, self.current)));
                        }
                    } else {
                        while let Some((_, ch)) = self.peek() {
                            if ch == '\n' {
                                break;
                            }
                            self.bump();
                        }
                    }
                    progressed = true;
                }
            }

            if !progressed {
                return Ok(());
            }
        }
    }

    fn identifier_or_keyword(&mut self, start: usize) -> Token {
        while let Some((_, ch)) = self.peek() {
            if ch.is_alphanumeric() || ch == '_' {
                self.bump();
            } else {
                break;
            }
        }
        let end = self.current;
        let lexeme = self.source[start..end].to_string();
        let kind = keyword_for(&lexeme).unwrap_or(TokenKind::Identifier);
        Token {
            kind,
            lexeme,
            span: SourceSpan { start, end },
        }
    }

    fn number_literal(&mut self, start: usize) -> Token {
        let mut seen_dot = false;
        while let Some((_, ch)) = self.peek() {
            match ch {
                '0'..='9' => {
                    self.bump();
                }
                '.' if !seen_dot => {
                    seen_dot = true;
                    self.bump();
                }
                'e' | 'E' => {
                    self.bump();
                    if let Some((_, '+' | '-')) = self.peek() {
                        self.bump();
                    }
                }
                _ => break,
            }
        }
        let end = self.current;
        Token {
            kind: TokenKind::Number,
            lexeme: self.source[start..end].to_string(),
            span: SourceSpan { start, end },
        }
    }

    fn string_literal(&mut self, start: usize, quote: char) -> Result<Token, Diagnostic> {
        let mut value: Vec<u8> = Vec::new();
        while let Some((idx, ch)) = self.bump() {
            if ch == quote {
                let end = idx + ch.len_utf8();
                return Ok(Token {
                    kind: TokenKind::Str(value),
                    lexeme: String::new(),
                    span: SourceSpan { start, end },
                });
            }
            match ch {
                '\\' => match self.bump() {
                    Some((_, 'n')) => value.push(b'\n'),
                    Some((_, 'r')) => value.push(b'\r'),
                    Some((_, 't')) => value.push(b'\t'),
                    Some((_, 'a')) => value.push(0x07),
                    Some((_, first @ '0'..='9')) => {
                        // Decimal byte escape `\ddd`, up to three digits.
                        let mut digits = String::from(first);
                        for _ in 0..2 {
                            if let Some((_, d @ '0'..='9')) = self.peek() {
                                digits.push(d);
                                self.bump();
                            } else {
                                break;
                            }
                        }
                        let byte: u32 = digits.parse().unwrap_or(0);
                        if byte > 255 {
                            return Err(Diagnostic::new(
                                DiagnosticKind::Lexer,
                                "decimal escape too large",
                            )
                            .with_span(SourceSpan::new(start, self.current)));
                        }
                        value.push(byte as u8);
                    }
                    Some((_, other)) => {
                        let mut buf = [0u8; 4];
                        value.extend_from_slice(other.encode_utf8(&mut buf).as_bytes());
                    }
                    None => break,
                },
                _ => {
                    let mut buf = [0u8; 4];
                    value.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
                }
            }
        }
        Err(
            Diagnostic::new(DiagnosticKind::Lexer, "unterminated string literal")
                .with_span(SourceSpan::new(start, self.current)),
        )
    }

    fn simple_token(&mut self, start: usize, kind: TokenKind) -> Token {
        let end = self.current;
        Token {
            kind,
            lexeme: self.source[start..end].to_string(),
            span: SourceSpan { start, end },
        }
    }

    pub fn tokenize(mut self) -> Result<Vec<Token>, Diagnostic> {
        let mut tokens = Vec::new();
        loop {
            self.skip_whitespace_and_comments()?;
            let (start, ch) = match self.bump() {
                Some(pair) => pair,
                None => {
                    tokens.push(Token {
                        kind: TokenKind::Eof,
                        lexeme: String::new(),
                        span: SourceSpan {
                            start: self.current,
                            end: self.current,
                        },
                    });
                    break;
                }
            };

            let token = match ch {
                'a'..='z' | 'A'..='Z' | '_' => self.identifier_or_keyword(start),
                '0'..='9' => self.number_literal(start),
                '"' | '\'' => self.string_literal(start, ch)?,
                '(' => self.simple_token(start, TokenKind::LParen),
                ')' => self.simple_token(start, TokenKind::RParen),
                '{' => self.simple_token(start, TokenKind::LBrace),
                '}' => self.simple_token(start, TokenKind::RBrace),
                '[' => self.simple_token(start, TokenKind::LBracket),
                ']' => self.simple_token(start, TokenKind::RBracket),
                ',' => self.simple_token(start, TokenKind::Comma),
                ';' => self.simple_token(start, TokenKind::Semicolon),
                ':' => self.simple_token(start, TokenKind::Colon),
                '+' => self.simple_token(start, TokenKind::Plus),
                '-' => self.simple_token(start, TokenKind::Minus),
                '*' => self.simple_token(start, TokenKind::Star),
                '/' => self.simple_token(start, TokenKind::Slash),
                '%' => self.simple_token(start, TokenKind::Percent),
                '^' => self.simple_token(start, TokenKind::Caret),
                '#' => self.simple_token(start, TokenKind::Hash),
                '.' => {
                    if self.match_next('.') {
                        self.simple_token(start, TokenKind::DotDot)
                    } else {
                        self.simple_token(start, TokenKind::Dot)
                    }
                }
                '=' => {
                    if self.match_next('=') {
                        self.simple_token(start, TokenKind::EqualEqual)
                    } else {
                        self.simple_token(start, TokenKind::Assign)
                    }
                }
                '~' => {
                    if self.match_next('=') {
                        self.simple_token(start, TokenKind::NotEqual)
                    } else {
                        self.simple_token(start, TokenKind::Unknown)
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

fn keyword_for(ident: &str) -> Option<TokenKind> {
    use self::Keyword as Kw;
    let keyword = match ident {
        "and" => Kw::And,
        "break" => Kw::Break,
        "do" => Kw::Do,
        "else" => Kw::Else,
        "elseif" => Kw::Elseif,
        "end" => Kw::End,
        "false" => Kw::False,
        "for" => Kw::For,
        "function" => Kw::Function,
        "if" => Kw::If,
        "in" => Kw::In,
        "local" => Kw::Local,
        "nil" => Kw::Nil,
        "not" => Kw::Not,
        "or" => Kw::Or,
        "repeat" => Kw::Repeat,
        "return" => Kw::Return,
        "then" => Kw::Then,
        "true" => Kw::True,
        "until" => Kw::Until,
        "while" => Kw::While,
        _ => return None,
    };
    Some(TokenKind::Keyword(keyword))
}
