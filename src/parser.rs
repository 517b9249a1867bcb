use crate::{
    ast::{BinaryOp, Chunk, Expr, ExprKind, Literal, Stmt, StmtKind, TableItem, UnaryOp},
    diagnostics::{Diagnostic, DiagnosticKind, SourceSpan},
    lexer::{Keyword, Lexer, Token, TokenKind},
};

pub fn parse_chunk(source: &str) -> Result<Chunk, Diagnostic> {
    let tokens = Lexer::new(source).tokenize()?;
    Parser::new(tokens).parse_chunk()
}

struct Parser {
    tokens: Vec<Token>,
    current: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, current: 0 }
    }

    fn parse_chunk(&mut self) -> Result<Chunk, Diagnostic> {
        let body = self.parse_block()?;
        if !self.check(TokenKind::Eof) {
            let token = self.peek().cloned();
            return Err(match token {
                Some(tok) => self.error(&tok, "unexpected token after block"),
                None => self.error_eof("unexpected end of chunk"),
            });
        }
        Ok(Chunk { body })
    }

    /// Parses statements until a block terminator (`end`, `else`, `elseif`,
    /// `until` or end of input) without consuming the terminator.
    fn parse_block(&mut self) -> Result<Vec<Stmt>, Diagnostic> {
        let mut items = Vec::new();
        while !self.at_block_end() {
            if self.matches(TokenKind::Semicolon) {
                continue;
            }
            let stmt = self.parse_statement()?;
            let is_return = matches!(stmt.kind, StmtKind::Return(_));
            items.push(stmt);
            if is_return {
                // `return` closes the block.
                let _ = self.matches(TokenKind::Semicolon);
                break;
            }
        }
        Ok(items)
    }

    fn at_block_end(&self) -> bool {
        matches!(
            self.peek().map(|t| &t.kind),
            Some(TokenKind::Eof)
                | Some(TokenKind::Keyword(Keyword::End))
                | Some(TokenKind::Keyword(Keyword::Else))
                | Some(TokenKind::Keyword(Keyword::Elseif))
                | Some(TokenKind::Keyword(Keyword::Until))
                | None
        )
    }

    fn parse_statement(&mut self) -> Result<Stmt, Diagnostic> {
        if let Some(token) = self.peek() {
            match &token.kind {
                TokenKind::Keyword(Keyword::Local) => return self.parse_local(),
                TokenKind::Keyword(Keyword::Function) => return self.parse_function_statement(),
                TokenKind::Keyword(Keyword::If) => return self.parse_if(),
                TokenKind::Keyword(Keyword::While) => return self.parse_while(),
                TokenKind::Keyword(Keyword::Repeat) => return self.parse_repeat(),
                TokenKind::Keyword(Keyword::For) => return self.parse_for(),
                TokenKind::Keyword(Keyword::Return) => return self.parse_return(),
                TokenKind::Keyword(Keyword::Break) => {
                    let tok = self.advance();
                    return Ok(Stmt {
                        span: tok.span,
                        kind: StmtKind::Break,
                    });
                }
                TokenKind::Keyword(Keyword::Do) => {
                    let start = self.advance().span.start;
                    let body = self.parse_block()?;
                    let end = self.expect_end("do block")?.span.end;
                    return Ok(Stmt {
                        span: SourceSpan { start, end },
                        kind: StmtKind::Do(body),
                    });
                }
                _ => {}
            }
        }
        self.parse_expression_statement()
    }

    fn parse_local(&mut self) -> Result<Stmt, Diagnostic> {
        let start = self.consume_keyword(Keyword::Local)?.span.start;
        if self.matches_keyword(Keyword::Function) {
            let name_token = self.consume_identifier("expected function name")?;
            let (params, body, end) = self.parse_function_body()?;
            return Ok(Stmt {
                span: SourceSpan { start, end },
                kind: StmtKind::LocalFunction {
                    name: name_token.lexeme,
                    params,
                    body,
                },
            });
        }
        let mut names = Vec::new();
        let mut end;
        loop {
            let name = self.consume_identifier("expected variable name")?;
            end = name.span.end;
            names.push(name.lexeme);
            if !self.matches(TokenKind::Comma) {
                break;
            }
        }
        let mut values = Vec::new();
        if self.matches(TokenKind::Assign) {
            loop {
                let value = self.parse_expression()?;
                end = value.span.end;
                values.push(value);
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        Ok(Stmt {
            span: SourceSpan { start, end },
            kind: StmtKind::Local { names, values },
        })
    }

    fn parse_function_statement(&mut self) -> Result<Stmt, Diagnostic> {
        let start = self.consume_keyword(Keyword::Function)?.span.start;
        let name = self.consume_identifier("expected function name")?;
        let mut target = Expr {
            span: name.span,
            kind: ExprKind::Name(name.lexeme),
        };
        while self.matches(TokenKind::Dot) {
            let field = self.consume_identifier("expected field after `.`")?;
            target = Expr {
                span: SourceSpan {
                    start: target.span.start,
                    end: field.span.end,
                },
                kind: ExprKind::Index {
                    target: Box::new(target),
                    key: Box::new(Expr {
                        span: field.span,
                        kind: ExprKind::Literal(Literal::Str(field.lexeme.into_bytes())),
                    }),
                },
            };
        }
        let (params, body, end) = self.parse_function_body()?;
        Ok(Stmt {
            span: SourceSpan { start, end },
            kind: StmtKind::Function {
                target,
                params,
                body,
            },
        })
    }

    fn parse_function_body(&mut self) -> Result<(Vec<String>, Vec<Stmt>, usize), Diagnostic> {
        self.consume(TokenKind::LParen, "expected `(` after function name")?;
        let mut params = Vec::new();
        if !self.check(TokenKind::RParen) {
            loop {
                let param = self.consume_identifier("expected parameter name")?;
                params.push(param.lexeme);
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RParen, "expected `)` after parameters")?;
        let body = self.parse_block()?;
        let end = self.expect_end("function body")?.span.end;
        Ok((params, body, end))
    }

    fn parse_if(&mut self) -> Result<Stmt, Diagnostic> {
        let start = self.consume_keyword(Keyword::If)?.span.start;
        let mut arms = Vec::new();
        let condition = self.parse_expression()?;
        self.consume_keyword(Keyword::Then)?;
        let body = self.parse_block()?;
        arms.push((condition, body));
        let mut else_body = None;
        loop {
            if self.matches_keyword(Keyword::Elseif) {
                let condition = self.parse_expression()?;
                self.consume_keyword(Keyword::Then)?;
                let body = self.parse_block()?;
                arms.push((condition, body));
            } else if self.matches_keyword(Keyword::Else) {
                else_body = Some(self.parse_block()?);
                let end = self.expect_end("if statement")?.span.end;
                return Ok(Stmt {
                    span: SourceSpan { start, end },
                    kind: StmtKind::If { arms, else_body },
                });
            } else {
                let end = self.expect_end("if statement")?.span.end;
                return Ok(Stmt {
                    span: SourceSpan { start, end },
                    kind: StmtKind::If { arms, else_body },
                });
            }
        }
    }

    fn parse_while(&mut self) -> Result<Stmt, Diagnostic> {
        let start = self.consume_keyword(Keyword::While)?.span.start;
        let condition = self.parse_expression()?;
        self.consume_keyword(Keyword::Do)?;
        let body = self.parse_block()?;
        let end = self.expect_end("while loop")?.span.end;
        Ok(Stmt {
            span: SourceSpan { start, end },
            kind: StmtKind::While { condition, body },
        })
    }

    fn parse_repeat(&mut self) -> Result<Stmt, Diagnostic> {
        let start = self.consume_keyword(Keyword::Repeat)?.span.start;
        let body = self.parse_block()?;
        self.consume_keyword(Keyword::Until)?;
        let until = self.parse_expression()?;
        Ok(Stmt {
            span: SourceSpan {
                start,
                end: until.span.end,
            },
            kind: StmtKind::Repeat { body, until },
        })
    }

    fn parse_for(&mut self) -> Result<Stmt, Diagnostic> {
        let start = self.consume_keyword(Keyword::For)?.span.start;
        let var = self.consume_identifier("expected loop variable")?;
        self.consume(TokenKind::Assign, "expected `=` in numeric for")?;
        let first = self.parse_expression()?;
        self.consume(TokenKind::Comma, "expected `,` after for start value")?;
        let limit = self.parse_expression()?;
        let step = if self.matches(TokenKind::Comma) {
            Some(self.parse_expression()?)
        } else {
            None
        };
        self.consume_keyword(Keyword::Do)?;
        let body = self.parse_block()?;
        let end = self.expect_end("for loop")?.span.end;
        Ok(Stmt {
            span: SourceSpan { start, end },
            kind: StmtKind::NumericFor {
                var: var.lexeme,
                start: first,
                limit,
                step,
                body,
            },
        })
    }

    fn parse_return(&mut self) -> Result<Stmt, Diagnostic> {
        let token = self.consume_keyword(Keyword::Return)?;
        let mut values = Vec::new();
        let mut end = token.span.end;
        if !self.at_block_end() && !self.check(TokenKind::Semicolon) {
            loop {
                let value = self.parse_expression()?;
                end = value.span.end;
                values.push(value);
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        Ok(Stmt {
            span: SourceSpan {
                start: token.span.start,
                end,
            },
            kind: StmtKind::Return(values),
        })
    }

    /// A statement starting with an expression is either a call or an
    /// assignment to one or more names/index targets.
    fn parse_expression_statement(&mut self) -> Result<Stmt, Diagnostic> {
        let first = self.parse_suffixed()?;
        if self.check(TokenKind::Comma) || self.check(TokenKind::Assign) {
            let mut targets = vec![first];
            while self.matches(TokenKind::Comma) {
                targets.push(self.parse_suffixed()?);
            }
            let equals = self.consume(TokenKind::Assign, "expected `=` in assignment")?;
            for target in &targets {
                if !matches!(target.kind, ExprKind::Name(_) | ExprKind::Index { .. }) {
                    return Err(Diagnostic::new(
                        DiagnosticKind::Parser,
                        "invalid assignment target",
                    )
                    .with_span(equals.span));
                }
            }
            let mut values = Vec::new();
            let mut end;
            loop {
                let value = self.parse_expression()?;
                end = value.span.end;
                values.push(value);
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
            let start = targets[0].span.start;
            return Ok(Stmt {
                span: SourceSpan { start, end },
                kind: StmtKind::Assign { targets, values },
            });
        }
        match first.kind {
            ExprKind::Call { .. } => Ok(Stmt {
                span: first.span,
                kind: StmtKind::Call(first),
            }),
            _ => Err(
                Diagnostic::new(DiagnosticKind::Parser, "unexpected expression statement")
                    .with_span(first.span),
            ),
        }
    }

    fn parse_expression(&mut self) -> Result<Expr, Diagnostic> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr, Diagnostic> {
        let mut expr = self.parse_and()?;
        while self.matches_keyword(Keyword::Or) {
            let right = self.parse_and()?;
            expr = binary(BinaryOp::Or, expr, right);
        }
        Ok(expr)
    }

    fn parse_and(&mut self) -> Result<Expr, Diagnostic> {
        let mut expr = self.parse_comparison()?;
        while self.matches_keyword(Keyword::And) {
            let right = self.parse_comparison()?;
            expr = binary(BinaryOp::And, expr, right);
        }
        Ok(expr)
    }

    fn parse_comparison(&mut self) -> Result<Expr, Diagnostic> {
        let mut expr = self.parse_concat()?;
        while let Some(op) = if self.matches(TokenKind::EqualEqual) {
            Some(BinaryOp::Equal)
        } else if self.matches(TokenKind::NotEqual) {
            Some(BinaryOp::NotEqual)
        } else if self.matches(TokenKind::LessEqual) {
            Some(BinaryOp::LessEqual)
        } else if self.matches(TokenKind::GreaterEqual) {
            Some(BinaryOp::GreaterEqual)
        } else if self.matches(TokenKind::Less) {
            Some(BinaryOp::Less)
        } else if self.matches(TokenKind::Greater) {
            Some(BinaryOp::Greater)
        } else {
            None
        } {
            let right = self.parse_concat()?;
            expr = binary(op, expr, right);
        }
        Ok(expr)
    }

    fn parse_concat(&mut self) -> Result<Expr, Diagnostic> {
        let expr = self.parse_term()?;
        if self.matches(TokenKind::DotDot) {
            // Right-associative.
            let right = self.parse_concat()?;
            return Ok(binary(BinaryOp::Concat, expr, right));
        }
        Ok(expr)
    }

    fn parse_term(&mut self) -> Result<Expr, Diagnostic> {
        let mut expr = self.parse_factor()?;
        loop {
            if self.matches(TokenKind::Plus) {
                let right = self.parse_factor()?;
                expr = binary(BinaryOp::Add, expr, right);
            } else if self.matches(TokenKind::Minus) {
                let right = self.parse_factor()?;
                expr = binary(BinaryOp::Sub, expr, right);
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn parse_factor(&mut self) -> Result<Expr, Diagnostic> {
        let mut expr = self.parse_unary()?;
        loop {
            if self.matches(TokenKind::Star) {
                let right = self.parse_unary()?;
                expr = binary(BinaryOp::Mul, expr, right);
            } else if self.matches(TokenKind::Slash) {
                let right = self.parse_unary()?;
                expr = binary(BinaryOp::Div, expr, right);
            } else if self.matches(TokenKind::Percent) {
                let right = self.parse_unary()?;
                expr = binary(BinaryOp::Mod, expr, right);
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn parse_unary(&mut self) -> Result<Expr, Diagnostic> {
        let op = if self.matches(TokenKind::Minus) {
            Some(UnaryOp::Negate)
        } else if self.matches_keyword(Keyword::Not) {
            Some(UnaryOp::Not)
        } else if self.matches(TokenKind::Hash) {
            Some(UnaryOp::Length)
        } else {
            None
        };
        if let Some(op) = op {
            let operator = self.previous().span;
            let right = self.parse_unary()?;
            return Ok(Expr {
                span: SourceSpan {
                    start: operator.start,
                    end: right.span.end,
                },
                kind: ExprKind::Unary {
                    op,
                    expr: Box::new(right),
                },
            });
        }
        self.parse_pow()
    }

    fn parse_pow(&mut self) -> Result<Expr, Diagnostic> {
        let expr = self.parse_suffixed()?;
        if self.matches(TokenKind::Caret) {
            // Right-associative; the right operand may itself be unary.
            let right = self.parse_unary()?;
            return Ok(binary(BinaryOp::Pow, expr, right));
        }
        Ok(expr)
    }

    /// Primary expression followed by any chain of `.name`, `[expr]` and
    /// call suffixes.
    fn parse_suffixed(&mut self) -> Result<Expr, Diagnostic> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.matches(TokenKind::Dot) {
                let field = self.consume_identifier("expected field after `.`")?;
                expr = Expr {
                    span: SourceSpan {
                        start: expr.span.start,
                        end: field.span.end,
                    },
                    kind: ExprKind::Index {
                        target: Box::new(expr),
                        key: Box::new(Expr {
                            span: field.span,
                            kind: ExprKind::Literal(Literal::Str(field.lexeme.into_bytes())),
                        }),
                    },
                };
            } else if self.matches(TokenKind::LBracket) {
                let key = self.parse_expression()?;
                let bracket = self.consume(TokenKind::RBracket, "expected `]` after index")?;
                expr = Expr {
                    span: SourceSpan {
                        start: expr.span.start,
                        end: bracket.span.end,
                    },
                    kind: ExprKind::Index {
                        target: Box::new(expr),
                        key: Box::new(key),
                    },
                };
            } else if self.check(TokenKind::LParen) {
                self.advance();
                let mut args = Vec::new();
                if !self.check(TokenKind::RParen) {
                    loop {
                        args.push(self.parse_expression()?);
                        if !self.matches(TokenKind::Comma) {
                            break;
                        }
                    }
                }
                let paren = self.consume(TokenKind::RParen, "expected `)` after arguments")?;
                expr = Expr {
                    span: SourceSpan {
                        start: expr.span.start,
                        end: paren.span.end,
                    },
                    kind: ExprKind::Call {
                        callee: Box::new(expr),
                        args,
                    },
                };
            } else if matches!(self.peek().map(|t| &t.kind), Some(TokenKind::Str(_))) {
                // `f "literal"` call sugar.
                let arg = self.parse_primary()?;
                expr = Expr {
                    span: SourceSpan {
                        start: expr.span.start,
                        end: arg.span.end,
                    },
                    kind: ExprKind::Call {
                        callee: Box::new(expr),
                        args: vec![arg],
                    },
                };
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr, Diagnostic> {
        if let Some(token) = self.peek().cloned() {
            match token.kind {
                TokenKind::Keyword(Keyword::Nil) => {
                    let tok = self.advance();
                    Ok(literal(tok.span, Literal::Nil))
                }
                TokenKind::Keyword(Keyword::True) => {
                    let tok = self.advance();
                    Ok(literal(tok.span, Literal::Bool(true)))
                }
                TokenKind::Keyword(Keyword::False) => {
                    let tok = self.advance();
                    Ok(literal(tok.span, Literal::Bool(false)))
                }
                TokenKind::Number => {
                    let tok = self.advance();
                    let value: f64 = tok.lexeme.parse().map_err(|_| {
                        Diagnostic::new(DiagnosticKind::Parser, "malformed number")
                            .with_span(tok.span)
                    })?;
                    Ok(literal(tok.span, Literal::Number(value)))
                }
                TokenKind::Str(bytes) => {
                    let tok = self.advance();
                    Ok(literal(tok.span, Literal::Str(bytes)))
                }
                TokenKind::Identifier => {
                    let tok = self.advance();
                    Ok(Expr {
                        span: tok.span,
                        kind: ExprKind::Name(tok.lexeme),
                    })
                }
                TokenKind::Keyword(Keyword::Function) => {
                    let start = self.advance().span.start;
                    let (params, body, end) = self.parse_function_body()?;
                    Ok(Expr {
                        span: SourceSpan { start, end },
                        kind: ExprKind::Function { params, body },
                    })
                }
                TokenKind::LParen => {
                    self.advance();
                    let inner = self.parse_expression()?;
                    self.consume(TokenKind::RParen, "expected `)` after expression")?;
                    Ok(inner)
                }
                TokenKind::LBrace => self.parse_table(),
                _ => Err(self.error(&token, "unexpected token in expression")),
            }
        } else {
            Err(self.error_eof("unexpected end of expression"))
        }
    }

    fn parse_table(&mut self) -> Result<Expr, Diagnostic> {
        let lbrace = self.consume(TokenKind::LBrace, "expected `{`")?;
        let mut items = Vec::new();
        while !self.check(TokenKind::RBrace) {
            if self.matches(TokenKind::LBracket) {
                let key = self.parse_expression()?;
                self.consume(TokenKind::RBracket, "expected `]` after table key")?;
                self.consume(TokenKind::Assign, "expected `=` after table key")?;
                let value = self.parse_expression()?;
                items.push(TableItem::Keyed(key, value));
            } else if self.check(TokenKind::Identifier) && self.check_ahead(1, TokenKind::Assign) {
                let name = self.advance();
                self.advance();
                let value = self.parse_expression()?;
                items.push(TableItem::Named(name.lexeme, value));
            } else {
                items.push(TableItem::Positional(self.parse_expression()?));
            }
            if !self.matches(TokenKind::Comma) && !self.matches(TokenKind::Semicolon) {
                break;
            }
        }
        let rbrace = self.consume(TokenKind::RBrace, "expected `}` after table constructor")?;
        Ok(Expr {
            span: SourceSpan {
                start: lbrace.span.start,
                end: rbrace.span.end,
            },
            kind: ExprKind::Table(items),
        })
    }

    fn expect_end(&mut self, what: &str) -> Result<Token, Diagnostic> {
        if let Some(token) = self.peek() {
            if token.kind == TokenKind::Keyword(Keyword::End) {
                return Ok(self.advance());
            }
            let message = format!("expected `end` to close {what}");
            let token = token.clone();
            return Err(self.error(&token, &message));
        }
        Err(self.error_eof(&format!("expected `end` to close {what}")))
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
        if let Some(Token {
            kind: TokenKind::Keyword(k),
            ..
        }) = self.peek()
        {
            if *k == keyword {
                self.advance();
                return true;
            }
        }
        false
    }

    fn consume(&mut self, kind: TokenKind, message: &str) -> Result<Token, Diagnostic> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            Err(self
                .peek()
                .cloned()
                .map(|tok| self.error(&tok, message))
                .unwrap_or_else(|| self.error_eof(message)))
        }
    }

    fn consume_keyword(&mut self, keyword: Keyword) -> Result<Token, Diagnostic> {
        if let Some(token) = self.peek() {
            if token.kind == TokenKind::Keyword(keyword.clone()) {
                Ok(self.advance())
            } else {
                let token = token.clone();
                Err(self.error(&token, &format!("expected keyword `{keyword:?}`")))
            }
        } else {
            Err(self.error_eof("unexpected end of input"))
        }
    }

    fn consume_identifier(&mut self, message: &str) -> Result<Token, Diagnostic> {
        if self.check(TokenKind::Identifier) {
            Ok(self.advance())
        } else {
            Err(self
                .peek()
                .cloned()
                .map(|tok| self.error(&tok, message))
                .unwrap_or_else(|| self.error_eof(message)))
        }
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.peek().map(|token| token.kind == kind).unwrap_or(false)
    }

    fn check_ahead(&self, offset: usize, kind: TokenKind) -> bool {
        self.tokens
            .get(self.current + offset)
            .map(|token| token.kind == kind)
            .unwrap_or(false)
    }

    fn advance(&mut self) -> Token {
        if !self.is_at_end() {
            self.current += 1;
        }
        self.previous().clone()
    }

    fn previous(&self) -> &Token {
        &self.tokens[self.current - 1]
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.current)
    }

    fn is_at_end(&self) -> bool {
        matches!(self.peek().map(|t| &t.kind), Some(TokenKind::Eof) | None)
    }

    fn error(&self, token: &Token, message: &str) -> Diagnostic {
        Diagnostic::new(DiagnosticKind::Parser, message.to_string()).with_span(token.span)
    }

    fn error_eof(&self, message: &str) -> Diagnostic {
        Diagnostic::new(DiagnosticKind::Parser, message.to_string())
    }
}

fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    Expr {
        span: SourceSpan {
            start: left.span.start,
            end: right.span.end,
        },
        kind: ExprKind::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        },
    }
}

fn literal(span: SourceSpan, lit: Literal) -> Expr {
    Expr {
        span,
        kind: ExprKind::Literal(lit),
    }
}
