//! Parser for dialog scripts.
//!
//! A hand-written recursive-descent parser over the token stream produced
//! by [`crate::lexer::lex`], with one token of lookahead. Expressions use
//! precedence climbing.
//!
//! # Module Structure
//!
//! - [`primitives`] - token cursor, expectations, error recovery
//! - `declarations` - `PARAM` and `DESCRIPTION`
//! - `statements` - statements and block constructs
//! - `expressions` - operators, literals, calls
//!
//! # Error Recovery
//!
//! Errors are collected, never fatal. A malformed statement is recorded and
//! the parser resynchronizes at the next line. A block that reaches the end
//! of the file (or a closer belonging to an enclosing block) records an
//! [`ParseErrorKind::UnbalancedBlock`] pointing at its opening line and
//! hands the rest of the input back to its parent.
//!
//! Nesting of blocks and sub-expressions is capped at
//! [`MAX_NESTING_DEPTH`]; deeper input is reported as
//! [`ParseErrorKind::NestingTooDeep`] instead of exhausting the stack.
//!
//! # Example
//!
//! ```rust
//! use basic_dialog_parser::parse_source;
//!
//! let (script, errors) = parse_source("PARAM name AS STRING\nTALK \"Hi \" & name\n");
//! assert!(errors.is_empty());
//! assert_eq!(script.declarations.len(), 1);
//! assert_eq!(script.body.len(), 1);
//! ```

pub mod primitives;

mod declarations;
mod expressions;
mod statements;

#[cfg(test)]
mod tests;

use crate::ast::{Block, Procedure, Script};
use crate::error::{LexError, ParseError, ParseErrorKind};
use crate::lexer::{self, Keyword, LineIndex, Token, TokenKind};
use primitives::PResult;

pub use primitives::Recover;

/// Deepest combined nesting of blocks and sub-expressions accepted.
pub const MAX_NESTING_DEPTH: usize = 128;

/// A line that closes (or continues) a block construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Closer {
    EndIf,
    EndSelect,
    EndWhile,
    Else,
    ElseIf,
    Next,
    Wend,
    Loop,
    Case,
    EndSub,
    EndFunction,
}

impl Closer {
    pub(crate) fn describe(self) -> &'static str {
        match self {
            Closer::EndIf => "END IF",
            Closer::EndSelect => "END SELECT",
            Closer::EndWhile => "END WHILE",
            Closer::Else => "ELSE",
            Closer::ElseIf => "ELSEIF",
            Closer::Next => "NEXT",
            Closer::Wend => "WEND",
            Closer::Loop => "LOOP",
            Closer::Case => "CASE",
            Closer::EndSub => "END SUB",
            Closer::EndFunction => "END FUNCTION",
        }
    }

    /// The construct this closer belongs to.
    pub(crate) fn construct(self) -> &'static str {
        match self {
            Closer::EndIf | Closer::Else | Closer::ElseIf => "IF",
            Closer::EndSelect | Closer::Case => "SELECT",
            Closer::EndWhile | Closer::Wend => "WHILE",
            Closer::Next => "FOR",
            Closer::Loop => "DO",
            Closer::EndSub => "SUB",
            Closer::EndFunction => "FUNCTION",
        }
    }
}

/// Parser state over a token slice.
pub(crate) struct Parser<'t, 'src> {
    pub(crate) tokens: &'t [Token<'src>],
    pub(crate) pos: usize,
    pub(crate) errors: Vec<ParseError>,
    pub(crate) source_len: usize,
    /// Enclosing loops, innermost last; validates `EXIT`.
    pub(crate) loops: Vec<crate::ast::LoopKind>,
    /// Current nesting, bounded by [`MAX_NESTING_DEPTH`].
    pub(crate) depth: usize,
    pub(crate) procedures: Vec<Procedure>,
}

impl<'t, 'src> Parser<'t, 'src> {
    pub(crate) fn new(tokens: &'t [Token<'src>], source_len: usize) -> Self {
        Self {
            tokens,
            pos: 0,
            errors: Vec::new(),
            source_len,
            loops: Vec::new(),
            depth: 0,
            procedures: Vec::new(),
        }
    }

    /// Run `parse` one nesting level deeper, refusing past the limit.
    pub(crate) fn nested<T>(&mut self, parse: impl FnOnce(&mut Self) -> PResult<T>) -> PResult<T> {
        if self.depth >= MAX_NESTING_DEPTH {
            self.error_here(ParseErrorKind::NestingTooDeep {
                limit: MAX_NESTING_DEPTH,
            });
            return Err(Recover);
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    /// Parse a whole script: declarations first, then statements.
    pub(crate) fn script(&mut self, lines: LineIndex) -> Script {
        let declarations = self.declarations();

        let mut body: Block = Vec::new();
        loop {
            let (mut part, closer) = self.statements_until_closer();
            body.append(&mut part);
            match closer {
                None => break,
                Some(closer) => {
                    self.error_here(ParseErrorKind::UnmatchedBlockEnd {
                        closer: closer.describe().to_string(),
                        construct: closer.construct().to_string(),
                    });
                    self.skip_line();
                }
            }
        }

        Script {
            declarations,
            body,
            procedures: std::mem::take(&mut self.procedures),
            lines,
        }
    }

    /// Parse statements until end of input or a closer line.
    ///
    /// The closer is not consumed.
    pub(crate) fn statements_until_closer(&mut self) -> (Block, Option<Closer>) {
        let mut block = Vec::new();
        loop {
            self.skip_separators();
            if self.at_eof() {
                return (block, None);
            }
            if let Some(closer) = self.closer_at_cursor() {
                return (block, Some(closer));
            }
            if self.at_kw(Keyword::Param) || self.at_kw(Keyword::Description) {
                let declaration = self.peek().map(|t| t.lexeme.to_ascii_uppercase()).unwrap_or_default();
                self.error_here(ParseErrorKind::DeclarationAfterStatement { declaration });
                self.skip_line();
                continue;
            }
            if self.at_kw(Keyword::Sub) || self.at_kw(Keyword::Function) {
                self.procedure();
                continue;
            }
            match self.statement() {
                Ok(stmt) => {
                    block.push(stmt);
                    self.expect_statement_end();
                }
                Err(Recover) => self.skip_line(),
            }
        }
    }

    /// Recognize a closer at the cursor without consuming it.
    pub(crate) fn closer_at_cursor(&self) -> Option<Closer> {
        let kw = match self.peek_kind()? {
            TokenKind::Keyword(kw) => *kw,
            _ => return None,
        };
        match kw {
            Keyword::End => match self.peek_nth_kind(1)? {
                TokenKind::Keyword(Keyword::If) => Some(Closer::EndIf),
                TokenKind::Keyword(Keyword::Select) => Some(Closer::EndSelect),
                TokenKind::Keyword(Keyword::While) => Some(Closer::EndWhile),
                TokenKind::Keyword(Keyword::Sub) => Some(Closer::EndSub),
                TokenKind::Keyword(Keyword::Function) => Some(Closer::EndFunction),
                _ => None,
            },
            Keyword::Else => match self.peek_nth_kind(1) {
                Some(TokenKind::Keyword(Keyword::If)) => Some(Closer::ElseIf),
                _ => Some(Closer::Else),
            },
            Keyword::ElseIf => Some(Closer::ElseIf),
            Keyword::Next => Some(Closer::Next),
            Keyword::Wend => Some(Closer::Wend),
            Keyword::Loop => Some(Closer::Loop),
            Keyword::Case => Some(Closer::Case),
            _ => None,
        }
    }

    /// Consume the tokens of a closer recognized by [`Self::closer_at_cursor`].
    pub(crate) fn consume_closer(&mut self, closer: Closer) {
        let words = match closer {
            Closer::EndIf
            | Closer::EndSelect
            | Closer::EndWhile
            | Closer::EndSub
            | Closer::EndFunction => 2,
            Closer::ElseIf if self.at_kw(Keyword::Else) => 2,
            _ => 1,
        };
        for _ in 0..words {
            self.advance();
        }
    }

    /// Record an unterminated block opened at `opener`.
    pub(crate) fn unbalanced(&mut self, construct: &str, opener: &Token<'_>) {
        self.errors.push(ParseError {
            kind: ParseErrorKind::UnbalancedBlock {
                construct: construct.to_string(),
                opening_line: opener.line,
            },
            line: opener.line,
            column: opener.column,
            span: opener.span.clone(),
        });
    }
}

/// Parse an already-lexed token stream.
pub fn parse_tokens(tokens: &[Token<'_>], source: &str) -> (Script, Vec<ParseError>) {
    let mut parser = Parser::new(tokens, source.len());
    let script = parser.script(LineIndex::new(source));
    (script, parser.errors)
}

/// Lex and parse source text, returning the (possibly partial) script with
/// every lexical and structural error found.
pub fn parse(source: &str) -> (Script, Vec<LexError>, Vec<ParseError>) {
    let (tokens, lex_errors) = lexer::lex(source);
    let (script, parse_errors) = parse_tokens(&tokens, source);
    (script, lex_errors, parse_errors)
}

/// Get the line content at a given line number (1-indexed)
fn get_line_content(source: &str, line_num: usize) -> &str {
    source.lines().nth(line_num.saturating_sub(1)).unwrap_or("")
}

/// Format a parse error into a human-readable string with the offending line.
pub fn format_parse_error(source: &str, error: &ParseError) -> String {
    let line_content = get_line_content(source, error.line);
    let pointer = " ".repeat(error.column.saturating_sub(1));
    format!(
        "Error at line {}, column {}: {}\n  |\n{:>3} | {}\n  | {}^",
        error.line, error.column, error.kind, error.line, line_content, pointer
    )
}

/// Parse and return formatted error strings, matching the shape command
/// line tools print.
pub fn parse_with_errors(source: &str) -> (Script, Vec<String>) {
    let (script, lex_errors, parse_errors) = parse(source);
    let mut errors: Vec<String> = lex_errors
        .iter()
        .map(|e| {
            format!(
                "Lexer error at line {}, column {}: {}",
                e.line, e.column, e.kind
            )
        })
        .collect();
    errors.extend(parse_errors.iter().map(|e| format_parse_error(source, e)));
    (script, errors)
}
