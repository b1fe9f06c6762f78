//! Primitive parsing operations over the token slice.
//!
//! This module contains the cursor (peek/advance), keyword and punctuation
//! expectations, identifier and literal helpers, and the line-based error
//! recovery used by every other parser module.

use super::Parser;
use crate::ast::{Span, Spanned};
use crate::error::{ParseError, ParseErrorKind};
use crate::lexer::{Keyword, Token, TokenKind};

/// Marker returned when an error has been recorded and the caller should
/// resynchronize. Carries no data; the diagnostic is already in the parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Recover;

/// Result type for parsing functions that can fail.
pub type PResult<T> = Result<T, Recover>;

/// Undo `""` escapes in a string literal body.
pub fn unescape(body: &str) -> String {
    body.replace("\"\"", "\"")
}

impl<'t, 'src> Parser<'t, 'src> {
    // ------------------------------------------------------------------
    // Cursor
    // ------------------------------------------------------------------

    pub(crate) fn peek(&self) -> Option<&'t Token<'src>> {
        self.tokens.get(self.pos)
    }

    pub(crate) fn peek_kind(&self) -> Option<&'t TokenKind<'src>> {
        self.peek().map(|t| &t.kind)
    }

    pub(crate) fn peek_nth_kind(&self, n: usize) -> Option<&'t TokenKind<'src>> {
        self.tokens.get(self.pos + n).map(|t| &t.kind)
    }

    pub(crate) fn advance(&mut self) -> Option<&'t Token<'src>> {
        let tok = self.tokens.get(self.pos);
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    pub(crate) fn at_eof(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    pub(crate) fn at(&self, kind: &TokenKind<'_>) -> bool {
        self.peek_kind() == Some(kind)
    }

    pub(crate) fn at_kw(&self, kw: Keyword) -> bool {
        matches!(self.peek_kind(), Some(TokenKind::Keyword(k)) if *k == kw)
    }

    pub(crate) fn eat(&mut self, kind: &TokenKind<'_>) -> bool {
        if self.at(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    pub(crate) fn eat_kw(&mut self, kw: Keyword) -> bool {
        if self.at_kw(kw) {
            self.advance();
            true
        } else {
            false
        }
    }

    /// At a statement separator (newline, `:`) or end of input.
    pub(crate) fn at_line_end(&self) -> bool {
        matches!(
            self.peek_kind(),
            None | Some(TokenKind::Newline) | Some(TokenKind::Colon)
        )
    }

    /// At a line end, or at the first token of a line.
    pub(crate) fn at_statement_boundary(&self) -> bool {
        self.at_line_end()
            || self.pos == 0
            || matches!(
                self.tokens.get(self.pos - 1).map(|t| &t.kind),
                Some(TokenKind::Newline) | Some(TokenKind::Colon)
            )
    }

    pub(crate) fn skip_separators(&mut self) {
        while matches!(
            self.peek_kind(),
            Some(TokenKind::Newline) | Some(TokenKind::Colon)
        ) {
            self.pos += 1;
        }
    }

    /// Skip to the end of the current line without consuming the newline.
    pub(crate) fn skip_line(&mut self) {
        while !matches!(self.peek_kind(), None | Some(TokenKind::Newline)) {
            self.pos += 1;
        }
    }

    // ------------------------------------------------------------------
    // Spans and errors
    // ------------------------------------------------------------------

    pub(crate) fn current_span(&self) -> Span {
        match self.peek() {
            Some(tok) => tok.span.clone(),
            None => self.source_len..self.source_len,
        }
    }

    /// End offset of the last consumed token.
    pub(crate) fn prev_end(&self) -> usize {
        self.pos
            .checked_sub(1)
            .and_then(|i| self.tokens.get(i))
            .map(|t| t.span.end)
            .unwrap_or(0)
    }

    fn current_position(&self) -> (usize, usize) {
        match self.peek().or_else(|| self.tokens.last()) {
            Some(tok) if self.at_eof() => (tok.line, tok.column + tok.lexeme.chars().count()),
            Some(tok) => (tok.line, tok.column),
            None => (1, 1),
        }
    }

    pub(crate) fn error_here(&mut self, kind: ParseErrorKind) {
        let (line, column) = self.current_position();
        let span = self.current_span();
        self.errors.push(ParseError {
            kind,
            line,
            column,
            span,
        });
    }

    pub(crate) fn error_at(&mut self, tok: &Token<'_>, kind: ParseErrorKind) {
        self.errors.push(ParseError {
            kind,
            line: tok.line,
            column: tok.column,
            span: tok.span.clone(),
        });
    }

    /// Record an "expected X" error at the cursor.
    pub(crate) fn expected<T>(&mut self, expected: &str) -> PResult<T> {
        let found = match self.peek() {
            Some(tok) => match tok.kind {
                TokenKind::Newline => "end of line".to_string(),
                _ => format!("'{}'", tok.lexeme),
            },
            None => "end of input".to_string(),
        };
        self.error_here(ParseErrorKind::UnexpectedToken {
            expected: expected.to_string(),
            found,
        });
        Err(Recover)
    }

    pub(crate) fn expect_kw(&mut self, kw: Keyword) -> PResult<()> {
        if self.eat_kw(kw) {
            Ok(())
        } else {
            self.expected(kw.as_str())
        }
    }

    pub(crate) fn expect(&mut self, kind: &TokenKind<'_>, what: &str) -> PResult<()> {
        if self.eat(kind) {
            Ok(())
        } else {
            self.expected(what)
        }
    }

    /// After a statement: anything left on the line is an error.
    pub(crate) fn expect_statement_end(&mut self) {
        if !self.at_statement_boundary() {
            let _ = self.expected::<()>("end of line");
            self.skip_line();
        }
    }

    // ------------------------------------------------------------------
    // Identifiers and literals
    // ------------------------------------------------------------------

    /// An identifier as written.
    pub(crate) fn ident_raw(&mut self, what: &str) -> PResult<Spanned<String>> {
        match self.peek() {
            Some(Token {
                kind: TokenKind::Ident(name),
                span,
                ..
            }) => {
                self.advance();
                Ok(Spanned::new((*name).to_string(), span.clone()))
            }
            _ => self.expected(what),
        }
    }

    /// A variable name, normalized to lower case.
    pub(crate) fn variable(&mut self) -> PResult<Spanned<String>> {
        self.ident_raw("variable name")
            .map(|name| name.map(|n| n.to_lowercase()))
    }

    pub(crate) fn string_lit(&mut self, what: &str) -> PResult<Spanned<String>> {
        match self.peek() {
            Some(Token {
                kind: TokenKind::StringLit(body),
                span,
                ..
            }) => {
                self.advance();
                Ok(Spanned::new(unescape(body), span.clone()))
            }
            _ => self.expected(what),
        }
    }

    /// Whether the tokens after the cursor spell `words` (case-insensitive).
    pub(crate) fn words_follow(&self, offset: usize, words: &[&str]) -> bool {
        words.iter().enumerate().all(|(i, word)| {
            self.tokens
                .get(self.pos + offset + i)
                .is_some_and(|t| t.lexeme.eq_ignore_ascii_case(word))
        })
    }
}
