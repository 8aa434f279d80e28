//! Recursive descent parser for the Python subset.

use crate::ast::*;
use crate::lexer::Lexer;
use crate::token::{Span, Token, TokenKind};
use crate::value::Value;
use thiserror::Error;

/// Parser error.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ParseError {
    #[error("unexpected token at {span}: expected {expected}, found {found}")]
    UnexpectedToken {
        expected: String,
        found: String,
        span: Span,
    },
    #[error("unexpected end of input at {span}")]
    UnexpectedEof { span: Span },
    #[error("invalid syntax at {span}: {message}")]
    InvalidSyntax { message: String, span: Span },
}

impl ParseError {
    /// Get the source span where this error occurred.
    pub fn span(&self) -> Span {
        match self {
            ParseError::UnexpectedToken { span, .. } => *span,
            ParseError::UnexpectedEof { span } => *span,
            ParseError::InvalidSyntax { span, .. } => *span,
        }
    }
}

pub type ParseResult<T> = Result<T, ParseError>;

/// Parse a single expression, e.g. an `if` condition or an iterable.
pub fn parse_expr(source: &str) -> ParseResult<Expr> {
    let mut parser = Parser::new(source)?;
    let expr = parser.parse_expr_list()?;
    parser.skip_newlines();
    parser.expect_eof()?;
    Ok(expr)
}

/// Parse a sequence of simple statements separated by newlines or `;`.
pub fn parse_program(source: &str) -> ParseResult<Vec<Stmt>> {
    let mut parser = Parser::new(source)?;
    parser.parse_program()
}

/// Parser for the statement and expression subset.
pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    /// Create a new parser from source text. Lexer errors surface here.
    pub fn new(source: &str) -> ParseResult<Self> {
        let tokens = Lexer::new(source).tokenize();
        if let Some(bad) = tokens.iter().find(|t| t.is_error()) {
            let message = match &bad.kind {
                TokenKind::Error(msg) => msg.clone(),
                other => other.to_string(),
            };
            return Err(ParseError::InvalidSyntax {
                message,
                span: bad.span,
            });
        }
        Ok(Self { tokens, pos: 0 })
    }

    pub fn parse_program(&mut self) -> ParseResult<Vec<Stmt>> {
        let mut stmts = Vec::new();
        self.skip_separators();
        while !self.is_at_end() {
            stmts.extend(self.parse_simple_stmts()?);
            if !self.is_at_end() && !self.check(TokenKind::Newline) {
                return Err(self.unexpected("end of statement"));
            }
            self.skip_separators();
        }
        Ok(stmts)
    }

    /// Statements on one logical line, separated by `;`.
    fn parse_simple_stmts(&mut self) -> ParseResult<Vec<Stmt>> {
        let mut stmts = vec![self.parse_stmt()?];
        while self.check(TokenKind::Semicolon) {
            self.advance();
            if self.at_line_end() {
                break;
            }
            stmts.push(self.parse_stmt()?);
        }
        Ok(stmts)
    }

    fn parse_stmt(&mut self) -> ParseResult<Stmt> {
        let start = self.current_span();
        match self.peek_kind() {
            TokenKind::Pass => {
                self.advance();
                Ok(Stmt {
                    kind: StmtKind::Pass,
                    span: start,
                })
            }
            TokenKind::Del => {
                self.advance();
                let mut targets = vec![self.parse_expr()?];
                while self.check(TokenKind::Comma) {
                    self.advance();
                    targets.push(self.parse_expr()?);
                }
                Ok(Stmt {
                    kind: StmtKind::Del(targets),
                    span: start.merge(self.prev_span()),
                })
            }
            TokenKind::Assert => {
                self.advance();
                let test = self.parse_expr()?;
                let msg = if self.check(TokenKind::Comma) {
                    self.advance();
                    Some(self.parse_expr()?)
                } else {
                    None
                };
                Ok(Stmt {
                    kind: StmtKind::Assert { test, msg },
                    span: start.merge(self.prev_span()),
                })
            }
            TokenKind::If => self.parse_if_stmt(),
            TokenKind::Lambda => Err(ParseError::InvalidSyntax {
                message: "lambda is not supported".to_string(),
                span: start,
            }),
            _ => self.parse_expr_stmt(),
        }
    }

    fn parse_if_stmt(&mut self) -> ParseResult<Stmt> {
        let start = self.current_span();
        self.advance(); // consume `if` or `elif`
        let cond = self.parse_expr()?;
        self.expect(TokenKind::Colon)?;
        let body = self.parse_simple_stmts()?;

        // `elif`/`else` may follow on the next line.
        if self.check(TokenKind::Newline)
            && matches!(self.peek_ahead_kind(1), TokenKind::Elif | TokenKind::Else)
        {
            self.advance();
        }
        let orelse = match self.peek_kind() {
            TokenKind::Elif => vec![self.parse_if_stmt()?],
            TokenKind::Else => {
                self.advance();
                self.expect(TokenKind::Colon)?;
                self.parse_simple_stmts()?
            }
            _ => Vec::new(),
        };
        Ok(Stmt {
            kind: StmtKind::If { cond, body, orelse },
            span: start.merge(self.prev_span()),
        })
    }

    fn parse_expr_stmt(&mut self) -> ParseResult<Stmt> {
        let start = self.current_span();
        let first = self.parse_expr_list()?;

        if let TokenKind::AugAssign(op_tok) = self.peek_kind() {
            let op = binop_for_token(&op_tok).ok_or_else(|| ParseError::InvalidSyntax {
                message: format!("unsupported augmented assignment {}=", op_tok),
                span: self.current_span(),
            })?;
            self.advance();
            check_target(&first)?;
            let value = self.parse_expr_list()?;
            return Ok(Stmt {
                kind: StmtKind::AugAssign {
                    target: first,
                    op,
                    value,
                },
                span: start.merge(self.prev_span()),
            });
        }

        if !self.check(TokenKind::Assign) {
            return Ok(Stmt {
                kind: StmtKind::Expr(first),
                span: start.merge(self.prev_span()),
            });
        }

        let mut exprs = vec![first];
        while self.check(TokenKind::Assign) {
            self.advance();
            exprs.push(self.parse_expr_list()?);
        }
        let value = exprs.pop().ok_or_else(|| self.unexpected("expression"))?;
        for target in &exprs {
            check_target(target)?;
        }
        Ok(Stmt {
            kind: StmtKind::Assign {
                targets: exprs,
                value,
            },
            span: start.merge(self.prev_span()),
        })
    }

    /// `a, b, c` as a tuple, or a single expression.
    pub fn parse_expr_list(&mut self) -> ParseResult<Expr> {
        let start = self.current_span();
        let first = self.parse_star_or_expr()?;
        if !self.check(TokenKind::Comma) {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.check(TokenKind::Comma) {
            self.advance();
            if self.at_expr_list_end() {
                break;
            }
            items.push(self.parse_star_or_expr()?);
        }
        Ok(Expr::new(ExprKind::Tuple(items), start.merge(self.prev_span())))
    }

    fn parse_star_or_expr(&mut self) -> ParseResult<Expr> {
        if self.check(TokenKind::Star) {
            return Err(ParseError::InvalidSyntax {
                message: "starred expressions are only supported as call arguments".to_string(),
                span: self.current_span(),
            });
        }
        self.parse_expr()
    }

    /// Full expression including the conditional `a if c else b`.
    pub fn parse_expr(&mut self) -> ParseResult<Expr> {
        if self.check(TokenKind::Lambda) {
            return Err(ParseError::InvalidSyntax {
                message: "lambda is not supported".to_string(),
                span: self.current_span(),
            });
        }
        let then = self.parse_expr_impl(1)?;
        if !self.check(TokenKind::If) {
            return Ok(then);
        }
        self.advance();
        let cond = self.parse_expr_impl(1)?;
        self.expect(TokenKind::Else)?;
        let otherwise = self.parse_expr()?;
        let span = then.span.merge(otherwise.span);
        Ok(Expr::new(
            ExprKind::IfExp {
                cond: Box::new(cond),
                then: Box::new(then),
                otherwise: Box::new(otherwise),
            },
            span,
        ))
    }

    /// Precedence climbing over `or`, `and`, `not`, comparisons and
    /// the arithmetic operators.
    fn parse_expr_impl(&mut self, min_prec: u8) -> ParseResult<Expr> {
        let mut left = self.parse_prefix(min_prec)?;

        loop {
            if self.peek_cmpop().is_some() {
                if CMP_PRECEDENCE < min_prec {
                    break;
                }
                left = self.parse_compare_chain(left)?;
                continue;
            }

            let Some(op) = self.peek_binop() else {
                break;
            };
            let prec = op.precedence();
            if prec < min_prec {
                break;
            }
            self.advance(); // consume operator

            let next_prec = if op.is_right_assoc() { prec } else { prec + 1 };
            let right = self.parse_expr_impl(next_prec)?;
            let span = left.span.merge(right.span);
            left = Expr::new(
                ExprKind::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                span,
            );
        }

        Ok(left)
    }

    fn parse_prefix(&mut self, min_prec: u8) -> ParseResult<Expr> {
        let start = self.current_span();
        let (op, prec) = match self.peek_kind() {
            TokenKind::Not if min_prec <= NOT_PRECEDENCE => (UnaryOp::Not, NOT_PRECEDENCE),
            TokenKind::Minus => (UnaryOp::Neg, UNARY_PRECEDENCE),
            TokenKind::Plus => (UnaryOp::Pos, UNARY_PRECEDENCE),
            TokenKind::Tilde => (UnaryOp::Invert, UNARY_PRECEDENCE),
            _ => return self.parse_postfix(),
        };
        self.advance();
        let operand = self.parse_expr_impl(prec)?;

        // Fold negative literals so `-1` is a constant.
        if let (UnaryOp::Neg, ExprKind::Literal(Value::Int(n))) = (op, &operand.kind) {
            if let Some(neg) = n.checked_neg() {
                return Ok(Expr::new(
                    ExprKind::Literal(Value::Int(neg)),
                    start.merge(operand.span),
                ));
            }
        }

        let span = start.merge(operand.span);
        Ok(Expr::new(
            ExprKind::Unary {
                op,
                operand: Box::new(operand),
            },
            span,
        ))
    }

    fn parse_compare_chain(&mut self, first: Expr) -> ParseResult<Expr> {
        let mut rest = Vec::new();
        while let Some((op, width)) = self.peek_cmpop() {
            for _ in 0..width {
                self.advance();
            }
            rest.push((op, self.parse_expr_impl(CMP_PRECEDENCE + 1)?));
        }
        let span = first.span.merge(self.prev_span());
        Ok(Expr::new(
            ExprKind::Compare {
                first: Box::new(first),
                rest,
            },
            span,
        ))
    }

    fn parse_postfix(&mut self) -> ParseResult<Expr> {
        let mut expr = self.parse_atom()?;

        loop {
            match self.peek_kind() {
                TokenKind::Dot => {
                    self.advance();
                    let name = self.parse_ident()?;
                    let span = expr.span.merge(self.prev_span());
                    expr = Expr::new(
                        ExprKind::Attribute {
                            value: Box::new(expr),
                            name,
                        },
                        span,
                    );
                }
                TokenKind::LParen => {
                    self.advance();
                    let args = self.parse_call_args()?;
                    self.expect(TokenKind::RParen)?;
                    let span = expr.span.merge(self.prev_span());
                    expr = Expr::new(
                        ExprKind::Call {
                            func: Box::new(expr),
                            args,
                        },
                        span,
                    );
                }
                TokenKind::LBracket => {
                    self.advance();
                    expr = self.parse_subscript(expr)?;
                }
                _ => break,
            }
        }

        Ok(expr)
    }

    fn parse_subscript(&mut self, value: Expr) -> ParseResult<Expr> {
        let lower = if self.check(TokenKind::Colon) {
            None
        } else {
            let index = self.parse_expr_list()?;
            if !self.check(TokenKind::Colon) {
                self.expect(TokenKind::RBracket)?;
                let span = value.span.merge(self.prev_span());
                return Ok(Expr::new(
                    ExprKind::Subscript {
                        value: Box::new(value),
                        index: Box::new(index),
                    },
                    span,
                ));
            }
            Some(Box::new(index))
        };

        self.expect(TokenKind::Colon)?;
        let upper = if matches!(self.peek_kind(), TokenKind::Colon | TokenKind::RBracket) {
            None
        } else {
            Some(Box::new(self.parse_expr()?))
        };
        let step = if self.check(TokenKind::Colon) {
            self.advance();
            if self.check(TokenKind::RBracket) {
                None
            } else {
                Some(Box::new(self.parse_expr()?))
            }
        } else {
            None
        };
        self.expect(TokenKind::RBracket)?;
        let span = value.span.merge(self.prev_span());
        Ok(Expr::new(
            ExprKind::Slice {
                value: Box::new(value),
                lower,
                upper,
                step,
            },
            span,
        ))
    }

    fn parse_call_args(&mut self) -> ParseResult<Vec<Arg>> {
        let mut args = Vec::new();
        while !self.check(TokenKind::RParen) {
            if self.check(TokenKind::Star) {
                self.advance();
                args.push(Arg::Star(self.parse_expr()?));
            } else if matches!(self.peek_kind(), TokenKind::Ident(_))
                && self.peek_ahead_kind(1) == TokenKind::Assign
            {
                let name = self.parse_ident()?;
                self.advance(); // consume `=`
                args.push(Arg::Keyword(name, self.parse_expr()?));
            } else {
                let expr = self.parse_expr()?;
                if self.check(TokenKind::For) {
                    // Bare generator argument: `any(x for x in xs)`.
                    let clauses = self.parse_comp_clauses()?;
                    let span = expr.span.merge(self.prev_span());
                    args.push(Arg::Positional(Expr::new(
                        ExprKind::ListComp {
                            elt: Box::new(expr),
                            clauses,
                        },
                        span,
                    )));
                } else {
                    args.push(Arg::Positional(expr));
                }
            }
            if !self.check(TokenKind::Comma) {
                break;
            }
            self.advance();
        }
        Ok(args)
    }

    fn parse_atom(&mut self) -> ParseResult<Expr> {
        let start = self.current_span();
        match self.peek_kind() {
            TokenKind::Integer(n) => {
                self.advance();
                Ok(Expr::new(ExprKind::Literal(Value::Int(n)), start))
            }
            TokenKind::Float(x) => {
                self.advance();
                Ok(Expr::new(ExprKind::Literal(Value::Float(x)), start))
            }
            TokenKind::StringLit(_) => {
                // Adjacent literals concatenate.
                let mut text = String::new();
                while let TokenKind::StringLit(s) = self.peek_kind() {
                    text.push_str(&s);
                    self.advance();
                }
                Ok(Expr::new(
                    ExprKind::Literal(Value::str(&text)),
                    start.merge(self.prev_span()),
                ))
            }
            TokenKind::True => {
                self.advance();
                Ok(Expr::new(ExprKind::Literal(Value::Bool(true)), start))
            }
            TokenKind::False => {
                self.advance();
                Ok(Expr::new(ExprKind::Literal(Value::Bool(false)), start))
            }
            TokenKind::None_ => {
                self.advance();
                Ok(Expr::new(ExprKind::Literal(Value::None), start))
            }
            TokenKind::Ident(name) => {
                self.advance();
                Ok(Expr::new(ExprKind::Name(name), start))
            }
            TokenKind::LParen => self.parse_paren(),
            TokenKind::LBracket => self.parse_list_display(),
            TokenKind::LBrace => self.parse_brace_display(),
            TokenKind::Eof => Err(ParseError::UnexpectedEof { span: start }),
            _ => Err(self.unexpected("expression")),
        }
    }

    fn parse_paren(&mut self) -> ParseResult<Expr> {
        let start = self.current_span();
        self.expect(TokenKind::LParen)?;
        if self.check(TokenKind::RParen) {
            self.advance();
            return Ok(Expr::new(
                ExprKind::Tuple(Vec::new()),
                start.merge(self.prev_span()),
            ));
        }
        let first = self.parse_expr()?;
        if self.check(TokenKind::For) {
            let clauses = self.parse_comp_clauses()?;
            self.expect(TokenKind::RParen)?;
            return Ok(Expr::new(
                ExprKind::ListComp {
                    elt: Box::new(first),
                    clauses,
                },
                start.merge(self.prev_span()),
            ));
        }
        if !self.check(TokenKind::Comma) {
            self.expect(TokenKind::RParen)?;
            return Ok(first);
        }
        let mut items = vec![first];
        while self.check(TokenKind::Comma) {
            self.advance();
            if self.check(TokenKind::RParen) {
                break;
            }
            items.push(self.parse_expr()?);
        }
        self.expect(TokenKind::RParen)?;
        Ok(Expr::new(ExprKind::Tuple(items), start.merge(self.prev_span())))
    }

    fn parse_list_display(&mut self) -> ParseResult<Expr> {
        let start = self.current_span();
        self.expect(TokenKind::LBracket)?;
        if self.check(TokenKind::RBracket) {
            self.advance();
            return Ok(Expr::new(ExprKind::List(Vec::new()), start.merge(self.prev_span())));
        }
        let first = self.parse_expr()?;
        if self.check(TokenKind::For) {
            let clauses = self.parse_comp_clauses()?;
            self.expect(TokenKind::RBracket)?;
            return Ok(Expr::new(
                ExprKind::ListComp {
                    elt: Box::new(first),
                    clauses,
                },
                start.merge(self.prev_span()),
            ));
        }
        let items = self.parse_comma_tail(first, TokenKind::RBracket)?;
        self.expect(TokenKind::RBracket)?;
        Ok(Expr::new(ExprKind::List(items), start.merge(self.prev_span())))
    }

    fn parse_brace_display(&mut self) -> ParseResult<Expr> {
        let start = self.current_span();
        self.expect(TokenKind::LBrace)?;
        if self.check(TokenKind::RBrace) {
            self.advance();
            return Ok(Expr::new(ExprKind::Dict(Vec::new()), start.merge(self.prev_span())));
        }
        let first = self.parse_expr()?;

        if !self.check(TokenKind::Colon) {
            if self.check(TokenKind::For) {
                let clauses = self.parse_comp_clauses()?;
                self.expect(TokenKind::RBrace)?;
                return Ok(Expr::new(
                    ExprKind::SetComp {
                        elt: Box::new(first),
                        clauses,
                    },
                    start.merge(self.prev_span()),
                ));
            }
            let items = self.parse_comma_tail(first, TokenKind::RBrace)?;
            self.expect(TokenKind::RBrace)?;
            return Ok(Expr::new(ExprKind::Set(items), start.merge(self.prev_span())));
        }

        self.advance(); // consume `:`
        let value = self.parse_expr()?;
        if self.check(TokenKind::For) {
            let clauses = self.parse_comp_clauses()?;
            self.expect(TokenKind::RBrace)?;
            return Ok(Expr::new(
                ExprKind::DictComp {
                    key: Box::new(first),
                    value: Box::new(value),
                    clauses,
                },
                start.merge(self.prev_span()),
            ));
        }
        let mut entries = vec![(first, value)];
        while self.check(TokenKind::Comma) {
            self.advance();
            if self.check(TokenKind::RBrace) {
                break;
            }
            let key = self.parse_expr()?;
            self.expect(TokenKind::Colon)?;
            entries.push((key, self.parse_expr()?));
        }
        self.expect(TokenKind::RBrace)?;
        Ok(Expr::new(ExprKind::Dict(entries), start.merge(self.prev_span())))
    }

    fn parse_comma_tail(&mut self, first: Expr, close: TokenKind) -> ParseResult<Vec<Expr>> {
        let mut items = vec![first];
        while self.check(TokenKind::Comma) {
            self.advance();
            if self.check(close.clone()) {
                break;
            }
            items.push(self.parse_expr()?);
        }
        Ok(items)
    }

    fn parse_comp_clauses(&mut self) -> ParseResult<Vec<CompClause>> {
        let mut clauses = Vec::new();
        while self.check(TokenKind::For) {
            self.advance();
            let target = self.parse_comp_target()?;
            self.expect(TokenKind::In)?;
            let iter = self.parse_expr_impl(1)?;
            let mut conds = Vec::new();
            while self.check(TokenKind::If) {
                self.advance();
                conds.push(self.parse_expr_impl(1)?);
            }
            clauses.push(CompClause {
                target,
                iter,
                conds,
            });
        }
        Ok(clauses)
    }

    /// Loop target: names and tuples of names, stopping before `in`.
    fn parse_comp_target(&mut self) -> ParseResult<Expr> {
        let start = self.current_span();
        let first = self.parse_expr_impl(CMP_PRECEDENCE + 1)?;
        if !self.check(TokenKind::Comma) {
            check_target(&first)?;
            return Ok(first);
        }
        let mut items = vec![first];
        while self.check(TokenKind::Comma) {
            self.advance();
            if self.check(TokenKind::In) {
                break;
            }
            items.push(self.parse_expr_impl(CMP_PRECEDENCE + 1)?);
        }
        let target = Expr::new(ExprKind::Tuple(items), start.merge(self.prev_span()));
        check_target(&target)?;
        Ok(target)
    }

    // === Helper methods ===

    fn peek_binop(&self) -> Option<BinOp> {
        binop_for_token(&self.peek_kind())
    }

    /// Comparison operator at the cursor and the number of tokens it spans.
    fn peek_cmpop(&self) -> Option<(CmpOp, usize)> {
        Some(match self.peek_kind() {
            TokenKind::Eq => (CmpOp::Eq, 1),
            TokenKind::Ne => (CmpOp::Ne, 1),
            TokenKind::Lt => (CmpOp::Lt, 1),
            TokenKind::Le => (CmpOp::Le, 1),
            TokenKind::Gt => (CmpOp::Gt, 1),
            TokenKind::Ge => (CmpOp::Ge, 1),
            TokenKind::In => (CmpOp::In, 1),
            TokenKind::Not if self.peek_ahead_kind(1) == TokenKind::In => (CmpOp::NotIn, 2),
            TokenKind::Is if self.peek_ahead_kind(1) == TokenKind::Not => (CmpOp::IsNot, 2),
            TokenKind::Is => (CmpOp::Is, 1),
            _ => return None,
        })
    }

    fn parse_ident(&mut self) -> ParseResult<String> {
        match self.peek_kind() {
            TokenKind::Ident(name) => {
                self.advance();
                Ok(name)
            }
            _ => Err(self.unexpected("identifier")),
        }
    }

    fn at_line_end(&self) -> bool {
        matches!(self.peek_kind(), TokenKind::Newline | TokenKind::Eof)
    }

    fn at_expr_list_end(&self) -> bool {
        matches!(
            self.peek_kind(),
            TokenKind::Newline
                | TokenKind::Eof
                | TokenKind::Semicolon
                | TokenKind::Assign
                | TokenKind::AugAssign(_)
                | TokenKind::RParen
                | TokenKind::RBracket
                | TokenKind::Colon
        )
    }

    fn skip_newlines(&mut self) {
        while self.check(TokenKind::Newline) {
            self.advance();
        }
    }

    fn skip_separators(&mut self) {
        while matches!(self.peek_kind(), TokenKind::Newline | TokenKind::Semicolon) {
            self.advance();
        }
    }

    fn expect_eof(&self) -> ParseResult<()> {
        if self.is_at_end() {
            Ok(())
        } else {
            Err(self.unexpected("end of input"))
        }
    }

    fn unexpected(&self, expected: &str) -> ParseError {
        ParseError::UnexpectedToken {
            expected: expected.to_string(),
            found: self.peek_kind().to_string(),
            span: self.current_span(),
        }
    }

    fn peek_kind(&self) -> TokenKind {
        self.tokens
            .get(self.pos)
            .map(|t| t.kind.clone())
            .unwrap_or(TokenKind::Eof)
    }

    fn peek_ahead_kind(&self, n: usize) -> TokenKind {
        self.tokens
            .get(self.pos + n)
            .map(|t| t.kind.clone())
            .unwrap_or(TokenKind::Eof)
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.peek_kind() == kind
    }

    fn advance(&mut self) {
        if !self.is_at_end() {
            self.pos += 1;
        }
    }

    fn expect(&mut self, kind: TokenKind) -> ParseResult<()> {
        if self.check(kind.clone()) {
            self.advance();
            Ok(())
        } else if self.is_at_end() {
            Err(ParseError::UnexpectedEof {
                span: self.current_span(),
            })
        } else {
            Err(self.unexpected(&kind.to_string()))
        }
    }

    fn is_at_end(&self) -> bool {
        self.peek_kind() == TokenKind::Eof
    }

    fn current_span(&self) -> Span {
        self.tokens
            .get(self.pos)
            .map(|t| t.span)
            .unwrap_or_else(Span::dummy)
    }

    fn prev_span(&self) -> Span {
        if self.pos > 0 {
            self.tokens
                .get(self.pos - 1)
                .map(|t| t.span)
                .unwrap_or_else(Span::dummy)
        } else {
            Span::dummy()
        }
    }
}

fn binop_for_token(kind: &TokenKind) -> Option<BinOp> {
    Some(match kind {
        TokenKind::Or => BinOp::Or,
        TokenKind::And => BinOp::And,
        TokenKind::Pipe => BinOp::BitOr,
        TokenKind::Caret => BinOp::BitXor,
        TokenKind::Ampersand => BinOp::BitAnd,
        TokenKind::Plus => BinOp::Add,
        TokenKind::Minus => BinOp::Sub,
        TokenKind::Star => BinOp::Mul,
        TokenKind::Slash => BinOp::Div,
        TokenKind::SlashSlash => BinOp::FloorDiv,
        TokenKind::Percent => BinOp::Mod,
        TokenKind::StarStar => BinOp::Pow,
        _ => return None,
    })
}

fn check_target(expr: &Expr) -> ParseResult<()> {
    match &expr.kind {
        ExprKind::Name(_) | ExprKind::Attribute { .. } | ExprKind::Subscript { .. } => Ok(()),
        ExprKind::Tuple(items) | ExprKind::List(items) => items.iter().try_for_each(check_target),
        _ => Err(ParseError::InvalidSyntax {
            message: "cannot assign to expression".to_string(),
            span: expr.span,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expr(src: &str) -> Expr {
        parse_expr(src).unwrap_or_else(|e| panic!("failed to parse {:?}: {}", src, e))
    }

    #[test]
    fn test_parse_precedence() {
        let e = expr("1 + 2 * 3");
        match e.kind {
            ExprKind::Binary { op: BinOp::Add, right, .. } => {
                assert!(matches!(right.kind, ExprKind::Binary { op: BinOp::Mul, .. }));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_not_binds_looser_than_comparison() {
        let e = expr("not a == b");
        match e.kind {
            ExprKind::Unary { op: UnaryOp::Not, operand } => {
                assert!(matches!(operand.kind, ExprKind::Compare { .. }));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_compare_chain() {
        let e = expr("0 <= x < 10");
        match e.kind {
            ExprKind::Compare { rest, .. } => {
                assert_eq!(rest.len(), 2);
                assert_eq!(rest[0].0, CmpOp::Le);
                assert_eq!(rest[1].0, CmpOp::Lt);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_not_in_and_is_not() {
        let e = expr("x not in s and y is not None");
        match e.kind {
            ExprKind::Binary { op: BinOp::And, left, right } => {
                assert!(matches!(&left.kind, ExprKind::Compare { rest, .. } if rest[0].0 == CmpOp::NotIn));
                assert!(matches!(&right.kind, ExprKind::Compare { rest, .. } if rest[0].0 == CmpOp::IsNot));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_power_is_right_assoc_and_beats_unary() {
        let e = expr("-2 ** 2");
        assert!(matches!(e.kind, ExprKind::Unary { op: UnaryOp::Neg, .. }));
        let e = expr("2 ** 3 ** 2");
        match e.kind {
            ExprKind::Binary { op: BinOp::Pow, right, .. } => {
                assert!(matches!(right.kind, ExprKind::Binary { op: BinOp::Pow, .. }));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_comprehensions() {
        assert!(matches!(expr("[x * 2 for x in xs if x > 1]").kind, ExprKind::ListComp { .. }));
        assert!(matches!(expr("{x for x in xs}").kind, ExprKind::SetComp { .. }));
        assert!(matches!(expr("{k: v for k, v in d.items()}").kind, ExprKind::DictComp { .. }));
        assert!(matches!(expr("any(x for x in xs)").kind, ExprKind::Call { .. }));
    }

    #[test]
    fn test_parse_displays() {
        assert!(matches!(expr("{}").kind, ExprKind::Dict(ref e) if e.is_empty()));
        assert!(matches!(expr("{1, 2}").kind, ExprKind::Set(ref e) if e.len() == 2));
        assert!(matches!(expr("(1,)").kind, ExprKind::Tuple(ref e) if e.len() == 1));
        assert!(matches!(expr("()").kind, ExprKind::Tuple(ref e) if e.is_empty()));
        assert!(matches!(expr("[1, 2,]").kind, ExprKind::List(ref e) if e.len() == 2));
        assert!(matches!(expr("1, 2").kind, ExprKind::Tuple(ref e) if e.len() == 2));
    }

    #[test]
    fn test_parse_ternary_and_slices() {
        assert!(matches!(expr("a if c else b").kind, ExprKind::IfExp { .. }));
        assert!(matches!(expr("xs[1:]").kind, ExprKind::Slice { .. }));
        assert!(matches!(expr("xs[::-1]").kind, ExprKind::Slice { .. }));
        assert!(matches!(expr("xs[0]").kind, ExprKind::Subscript { .. }));
    }

    #[test]
    fn test_parse_call_args() {
        match expr("f(1, b=2, *rest)").kind {
            ExprKind::Call { args, .. } => {
                assert!(matches!(args[0], Arg::Positional(_)));
                assert!(matches!(&args[1], Arg::Keyword(name, _) if name == "b"));
                assert!(matches!(args[2], Arg::Star(_)));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_program_statements() {
        let stmts = parse_program("a = 1\nb, c = 2, 3; d += a\nx[0] = y.z = 4\npass").unwrap();
        assert_eq!(stmts.len(), 5);
        assert!(matches!(stmts[1].kind, StmtKind::Assign { .. }));
        assert!(matches!(stmts[2].kind, StmtKind::AugAssign { op: BinOp::Add, .. }));
        assert!(matches!(&stmts[3].kind, StmtKind::Assign { targets, .. } if targets.len() == 2));
    }

    #[test]
    fn test_parse_single_line_if() {
        let stmts = parse_program("if x > 0: y = 1; z = 2\nelif x < 0: y = -1\nelse: y = 0").unwrap();
        assert_eq!(stmts.len(), 1);
        match &stmts[0].kind {
            StmtKind::If { body, orelse, .. } => {
                assert_eq!(body.len(), 2);
                assert!(matches!(orelse[0].kind, StmtKind::If { .. }));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_program("1 = x").is_err());
        assert!(parse_expr("lambda x: x").is_err());
        assert!(matches!(parse_expr("(1, 2"), Err(ParseError::UnexpectedEof { .. })));
        assert!(parse_expr("a b").is_err());
    }
}
