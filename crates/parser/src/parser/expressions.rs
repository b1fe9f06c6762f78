//! Expression parsing by precedence climbing.
//!
//! | Level | Operators | Assoc |
//! |-------|-----------|-------|
//! | 1 | `OR` | left |
//! | 2 | `AND` | left |
//! | 3 | `NOT` (prefix) | |
//! | 4 | `= <> < <= > >=` | left |
//! | 5 | `&` | left |
//! | 6 | `+ -` | left |
//! | 7 | `* / MOD` | left |
//! | 8 | `-` (prefix) | |
//! | 9 | `^` | right |
//!
//! Postfix member access (`a.b`) and indexing (`a[i]`) bind tightest.

use super::primitives::{unescape, PResult};
use super::Parser;
use crate::ast::{BinOp, Expr, Spanned, UnaryOp};
use crate::lexer::{Keyword, TokenKind};

const PREC_NOT: u8 = 3;
const PREC_NEG: u8 = 8;

fn binary_op(kind: &TokenKind<'_>) -> Option<(BinOp, u8, bool)> {
    let op = match kind {
        TokenKind::Keyword(Keyword::Or) => (BinOp::Or, 1, false),
        TokenKind::Keyword(Keyword::And) => (BinOp::And, 2, false),
        TokenKind::Eq => (BinOp::Eq, 4, false),
        TokenKind::Ne => (BinOp::Ne, 4, false),
        TokenKind::Lt => (BinOp::Lt, 4, false),
        TokenKind::Le => (BinOp::Le, 4, false),
        TokenKind::Gt => (BinOp::Gt, 4, false),
        TokenKind::Ge => (BinOp::Ge, 4, false),
        TokenKind::Ampersand => (BinOp::Concat, 5, false),
        TokenKind::Plus => (BinOp::Add, 6, false),
        TokenKind::Minus => (BinOp::Sub, 6, false),
        TokenKind::Star => (BinOp::Mul, 7, false),
        TokenKind::Slash => (BinOp::Div, 7, false),
        TokenKind::Keyword(Keyword::Mod) => (BinOp::Mod, 7, false),
        TokenKind::Caret => (BinOp::Pow, 9, true),
        _ => return None,
    };
    Some(op)
}

impl<'t, 'src> Parser<'t, 'src> {
    pub(crate) fn expression(&mut self) -> PResult<Spanned<Expr>> {
        self.binary(0)
    }

    fn binary(&mut self, min_prec: u8) -> PResult<Spanned<Expr>> {
        self.nested(|p| p.climb(min_prec))
    }

    fn climb(&mut self, min_prec: u8) -> PResult<Spanned<Expr>> {
        let mut left = self.prefix()?;
        while let Some((op, prec, right_assoc)) = self.peek_kind().and_then(binary_op) {
            if prec < min_prec {
                break;
            }
            self.advance();
            let next_min = if right_assoc { prec } else { prec + 1 };
            let right = self.binary(next_min)?;
            let span = left.span.start..right.span.end;
            left = Spanned::new(
                Expr::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                span,
            );
        }
        Ok(left)
    }

    fn prefix(&mut self) -> PResult<Spanned<Expr>> {
        let start = self.current_span().start;
        let op = if self.eat_kw(Keyword::Not) {
            Some((UnaryOp::Not, PREC_NOT))
        } else if self.eat(&TokenKind::Minus) {
            Some((UnaryOp::Neg, PREC_NEG))
        } else {
            None
        };
        match op {
            Some((op, prec)) => {
                let operand = self.binary(prec)?;
                let span = start..operand.span.end;
                Ok(Spanned::new(
                    Expr::Unary {
                        op,
                        operand: Box::new(operand),
                    },
                    span,
                ))
            }
            None => self.postfix(),
        }
    }

    fn postfix(&mut self) -> PResult<Spanned<Expr>> {
        let mut expr = self.primary()?;
        loop {
            if self.eat(&TokenKind::Dot) {
                let field = self.ident_raw("field name")?;
                let span = expr.span.start..field.span.end;
                expr = Spanned::new(
                    Expr::Member {
                        object: Box::new(expr),
                        field: field.node.to_lowercase(),
                    },
                    span,
                );
            } else if self.eat(&TokenKind::LBracket) {
                let index = self.expression()?;
                self.expect(&TokenKind::RBracket, "']'")?;
                let span = expr.span.start..self.prev_end();
                expr = Spanned::new(
                    Expr::Index {
                        object: Box::new(expr),
                        index: Box::new(index),
                    },
                    span,
                );
            } else {
                return Ok(expr);
            }
        }
    }

    fn primary(&mut self) -> PResult<Spanned<Expr>> {
        let Some(tok) = self.peek() else {
            return self.expected("expression");
        };
        let span = tok.span.clone();
        let literal = match &tok.kind {
            TokenKind::Number(n) => Some(Expr::Number(*n)),
            TokenKind::StringLit(body) => Some(Expr::Str(unescape(body))),
            TokenKind::Keyword(Keyword::True) => Some(Expr::Bool(true)),
            TokenKind::Keyword(Keyword::False) => Some(Expr::Bool(false)),
            TokenKind::Keyword(Keyword::Null) => Some(Expr::Null),
            _ => None,
        };
        if let Some(expr) = literal {
            self.advance();
            return Ok(Spanned::new(expr, span));
        }

        match &tok.kind {
            TokenKind::Ident(name) => {
                self.advance();
                if self.eat(&TokenKind::LParen) {
                    let args = self.expression_list(&TokenKind::RParen, "')'")?;
                    Ok(Spanned::new(
                        Expr::Call {
                            name: name.to_ascii_uppercase(),
                            args,
                        },
                        span.start..self.prev_end(),
                    ))
                } else {
                    Ok(Spanned::new(Expr::Var(name.to_lowercase()), span))
                }
            }
            TokenKind::LParen => {
                self.advance();
                let inner = self.expression()?;
                self.expect(&TokenKind::RParen, "')'")?;
                Ok(Spanned::new(inner.node, span.start..self.prev_end()))
            }
            TokenKind::LBracket => {
                self.advance();
                let items = self.expression_list(&TokenKind::RBracket, "']'")?;
                Ok(Spanned::new(Expr::List(items), span.start..self.prev_end()))
            }
            _ => self.expected("expression"),
        }
    }

    /// Comma-separated expressions up to and including `close`.
    pub(crate) fn expression_list(
        &mut self,
        close: &TokenKind<'_>,
        what: &str,
    ) -> PResult<Vec<Spanned<Expr>>> {
        let mut items = Vec::new();
        if self.eat(close) {
            return Ok(items);
        }
        loop {
            items.push(self.expression()?);
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(close, what)?;
        Ok(items)
    }
}
