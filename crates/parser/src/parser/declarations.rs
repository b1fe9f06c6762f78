//! Declaration parsing: `PARAM` and `DESCRIPTION`.
//!
//! Declarations form the leading section of a script. Once the first
//! executable statement is seen, further declarations are errors (reported
//! by the statement loop).

use super::primitives::{unescape, PResult, Recover};
use super::Parser;
use crate::ast::{format_number, Declaration, ParamDecl, ParamType, Spanned};
use crate::error::ParseErrorKind;
use crate::lexer::{Keyword, TokenKind};

impl<'t, 'src> Parser<'t, 'src> {
    /// Parse the declaration section.
    pub(crate) fn declarations(&mut self) -> Vec<Spanned<Declaration>> {
        let mut declarations = Vec::new();
        loop {
            self.skip_separators();
            let result = if self.at_kw(Keyword::Param) {
                self.param_decl()
            } else if self.at_kw(Keyword::Description) {
                self.description_decl()
            } else {
                break;
            };
            match result {
                Ok(decl) => {
                    declarations.push(decl);
                    self.expect_statement_end();
                }
                Err(Recover) => self.skip_line(),
            }
        }
        declarations
    }

    /// `DESCRIPTION "text"`
    fn description_decl(&mut self) -> PResult<Spanned<Declaration>> {
        let start = self.current_span().start;
        self.expect_kw(Keyword::Description)?;
        let text = self.string_lit("description string")?;
        Ok(Spanned::new(
            Declaration::Description(text),
            start..self.prev_end(),
        ))
    }

    /// `PARAM name AS TYPE [LIKE example] [DESCRIPTION "text"] [ENUM [..]]`
    ///
    /// The trailing clauses may appear in any order.
    fn param_decl(&mut self) -> PResult<Spanned<Declaration>> {
        let start = self.current_span().start;
        self.expect_kw(Keyword::Param)?;
        let name = self.ident_raw("parameter name")?;
        self.expect_kw(Keyword::As)?;
        let ty = self.param_type()?;

        let mut decl = ParamDecl {
            name,
            ty,
            example: None,
            description: None,
            enum_values: Vec::new(),
        };

        while !self.at_line_end() {
            if self.eat_kw(Keyword::Like) {
                decl.example = Some(self.example_value()?);
            } else if self.eat_kw(Keyword::Description) {
                decl.description = Some(self.string_lit("parameter description")?);
            } else if self.eat_kw(Keyword::Enum) {
                decl.enum_values = self.enum_values()?;
            } else {
                return self.expected("LIKE, DESCRIPTION or ENUM");
            }
        }

        Ok(Spanned::new(Declaration::Param(decl), start..self.prev_end()))
    }

    fn param_type(&mut self) -> PResult<Spanned<ParamType>> {
        let Some(tok) = self.peek() else {
            return self.expected("parameter type");
        };
        let TokenKind::Ident(word) = tok.kind else {
            return self.expected("parameter type");
        };
        match ParamType::from_word(word) {
            Some(ty) => {
                self.advance();
                Ok(Spanned::new(ty, tok.span.clone()))
            }
            None => {
                self.error_at(tok, ParseErrorKind::UnknownType(word.to_string()));
                Err(Recover)
            }
        }
    }

    /// Example values are kept as text: strings, numbers, booleans.
    fn example_value(&mut self) -> PResult<Spanned<String>> {
        let start = self.current_span().start;
        let negative = self.eat(&TokenKind::Minus);
        let text = match self.peek_kind() {
            Some(TokenKind::StringLit(body)) if !negative => unescape(body),
            Some(TokenKind::Number(n)) => {
                let n = if negative { -*n } else { *n };
                format_number(n)
            }
            Some(TokenKind::Keyword(Keyword::True)) if !negative => "true".to_string(),
            Some(TokenKind::Keyword(Keyword::False)) if !negative => "false".to_string(),
            _ => return self.expected("example value"),
        };
        self.advance();
        Ok(Spanned::new(text, start..self.prev_end()))
    }

    /// `["a", "b"]` or a bare `"a", "b"` list.
    fn enum_values(&mut self) -> PResult<Vec<String>> {
        let bracketed = self.eat(&TokenKind::LBracket);
        let mut values = Vec::new();
        loop {
            if bracketed && self.at(&TokenKind::RBracket) {
                break;
            }
            values.push(self.string_lit("enum value")?.node);
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        if bracketed {
            self.expect(&TokenKind::RBracket, "']'")?;
        }
        Ok(values)
    }
}
