//! Statement parsing, including the block constructs.
//!
//! Block constructs parse their bodies with
//! [`Parser::statements_until_closer`] and then decide what to do with the
//! closer line that stopped the body. A closer belonging to an enclosing
//! construct is left unconsumed so the parent can use it.

use super::primitives::{PResult, Recover};
use super::{Closer, Parser};
use crate::ast::{
    Block, CaseArm, CondBranch, Expr, InputSpec, KeywordCall, LoopKind, ParamType, Procedure,
    Spanned, Stmt, UnaryOp,
};
use crate::catalogue;
use crate::error::ParseErrorKind;
use crate::lexer::{Keyword, TokenKind};

impl<'t, 'src> Parser<'t, 'src> {
    pub(crate) fn statement(&mut self) -> PResult<Spanned<Stmt>> {
        self.nested(Self::statement_at_cursor)
    }

    fn statement_at_cursor(&mut self) -> PResult<Spanned<Stmt>> {
        let start = self.current_span().start;
        let stmt = match self.peek_kind() {
            Some(TokenKind::Keyword(kw)) => match kw {
                Keyword::Talk => {
                    self.advance();
                    Stmt::Talk(self.expression()?)
                }
                Keyword::Hear => self.hear()?,
                Keyword::If => self.if_stmt()?,
                Keyword::For => self.for_stmt()?,
                Keyword::While => self.while_stmt()?,
                Keyword::Do => self.do_stmt()?,
                Keyword::Select => self.select_stmt()?,
                Keyword::Exit => self.exit_stmt()?,
                Keyword::Return => {
                    self.advance();
                    if self.at_line_end() {
                        Stmt::Return(None)
                    } else {
                        Stmt::Return(Some(self.expression()?))
                    }
                }
                Keyword::End => {
                    self.advance();
                    Stmt::Return(None)
                }
                Keyword::Call => self.call(None)?,
                kw if catalogue::is_lead(*kw) => Stmt::Keyword(self.keyword_call(None)?),
                _ => return self.expected("statement"),
            },
            Some(TokenKind::Ident(_)) if self.words_follow(0, &["ON", "ERROR"]) => self.on_error()?,
            Some(TokenKind::Ident(_)) => match self.peek_nth_kind(1) {
                Some(TokenKind::Eq) => self.assignment()?,
                Some(TokenKind::LParen) => Stmt::Expression(self.expression()?),
                _ => {
                    self.advance();
                    return self.expected("'=' after variable name");
                }
            },
            _ => return self.expected("statement"),
        };
        Ok(Spanned::new(stmt, start..self.prev_end()))
    }

    /// `var = expr` or `var = <value keyword> args`
    fn assignment(&mut self) -> PResult<Stmt> {
        let target = self.variable()?;
        self.expect(&TokenKind::Eq, "'='")?;

        if let Some(TokenKind::Keyword(kw)) = self.peek_kind() {
            if catalogue::is_lead(*kw) {
                return Ok(Stmt::Keyword(self.keyword_call(Some(target))?));
            }
            if *kw == Keyword::Call {
                return self.call(Some(target));
            }
        }

        let value = self.expression()?;
        Ok(Stmt::Assign { target, value })
    }

    /// A catalogue phrase followed by comma-separated arguments.
    fn keyword_call(&mut self, target: Option<Spanned<String>>) -> PResult<KeywordCall> {
        let Some(lead_tok) = self.peek() else {
            return self.expected("keyword");
        };
        let TokenKind::Keyword(lead) = lead_tok.kind else {
            return self.expected("keyword");
        };

        let Some(spec) = catalogue::phrases_for(lead)
            .into_iter()
            .find(|spec| self.words_follow(1, spec.rest))
        else {
            let next = self.peek_nth_kind(1).map(|k| k.to_string()).unwrap_or_default();
            self.error_at(
                lead_tok,
                ParseErrorKind::UnknownKeywordPhrase(format!("{} {}", lead, next).trim().to_string()),
            );
            return Err(Recover);
        };

        for _ in 0..=spec.rest.len() {
            self.advance();
        }

        if target.is_some() && !spec.returns_value {
            self.error_at(
                lead_tok,
                ParseErrorKind::Invalid(format!("{} does not return a value", spec.name)),
            );
            return Err(Recover);
        }

        let mut args = Vec::new();
        if !self.at_line_end() {
            loop {
                args.push(self.expression()?);
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
        }

        if args.len() < spec.min_args || args.len() > spec.max_args {
            self.error_at(
                lead_tok,
                ParseErrorKind::ArgumentCount {
                    keyword: spec.name.to_string(),
                    expected: spec.arity(),
                    found: args.len(),
                },
            );
            return Err(Recover);
        }

        Ok(KeywordCall {
            name: spec.name.to_string(),
            args,
            target,
        })
    }

    /// `CALL name [(args)]`
    fn call(&mut self, target: Option<Spanned<String>>) -> PResult<Stmt> {
        self.expect_kw(Keyword::Call)?;
        let name = self.variable()?;
        let args = if self.eat(&TokenKind::LParen) {
            self.expression_list(&TokenKind::RParen, "')'")?
        } else {
            Vec::new()
        };
        Ok(Stmt::Call { name, args, target })
    }

    /// `ON ERROR RESUME NEXT` or `ON ERROR GOTO 0`
    fn on_error(&mut self) -> PResult<Stmt> {
        self.advance();
        self.advance();
        let resume_next = if self.words_follow(0, &["RESUME", "NEXT"]) {
            true
        } else if self.words_follow(0, &["GOTO", "0"]) {
            false
        } else {
            return self.expected("RESUME NEXT or GOTO 0");
        };
        self.advance();
        self.advance();
        Ok(Stmt::OnError { resume_next })
    }

    /// `HEAR var [AS type | AS expr, expr, ...]`
    fn hear(&mut self) -> PResult<Stmt> {
        self.expect_kw(Keyword::Hear)?;
        let target = self.variable()?;

        if !self.eat_kw(Keyword::As) {
            return Ok(Stmt::Hear {
                target,
                input: InputSpec::Any,
            });
        }

        // A single type word: `HEAR x AS EMAIL`. Any other single name is a
        // variable holding the menu options.
        if let (Some(TokenKind::Ident(word)), true) = (self.peek_kind(), self.next_is_line_end(1)) {
            if let Some(ty) = ParamType::from_word(word) {
                self.advance();
                return Ok(Stmt::Hear {
                    target,
                    input: InputSpec::Typed(ty),
                });
            }
        }

        let mut options = Vec::new();
        loop {
            options.push(self.expression()?);
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        Ok(Stmt::Hear {
            target,
            input: InputSpec::Menu(options),
        })
    }

    fn next_is_line_end(&self, n: usize) -> bool {
        matches!(
            self.peek_nth_kind(n),
            None | Some(TokenKind::Newline) | Some(TokenKind::Colon)
        )
    }

    // ========================================================================
    // Block constructs
    // ========================================================================

    fn if_stmt(&mut self) -> PResult<Stmt> {
        let Some(opener) = self.peek() else {
            return self.expected("IF");
        };
        self.expect_kw(Keyword::If)?;
        let cond = self.expression()?;
        self.expect_kw(Keyword::Then)?;

        // Single-line form: IF c THEN stmt [ELSE stmt]
        if !self.at_line_end() {
            let then_stmt = self.statement()?;
            let else_body = if self.eat_kw(Keyword::Else) {
                Some(vec![self.statement()?])
            } else {
                None
            };
            return Ok(Stmt::If {
                branches: vec![CondBranch {
                    cond,
                    body: vec![then_stmt],
                }],
                else_body,
            });
        }

        let mut branches = Vec::new();
        let mut current = cond;
        loop {
            let (body, closer) = self.statements_until_closer();
            branches.push(CondBranch {
                cond: current,
                body,
            });
            match closer {
                Some(Closer::ElseIf) => {
                    self.consume_closer(Closer::ElseIf);
                    current = self.expression()?;
                    self.expect_kw(Keyword::Then)?;
                }
                Some(Closer::Else) => {
                    self.consume_closer(Closer::Else);
                    let (else_body, closer) = self.statements_until_closer();
                    if closer == Some(Closer::EndIf) {
                        self.consume_closer(Closer::EndIf);
                    } else {
                        self.unbalanced("IF", opener);
                    }
                    return Ok(Stmt::If {
                        branches,
                        else_body: Some(else_body),
                    });
                }
                Some(Closer::EndIf) => {
                    self.consume_closer(Closer::EndIf);
                    return Ok(Stmt::If {
                        branches,
                        else_body: None,
                    });
                }
                _ => {
                    self.unbalanced("IF", opener);
                    return Ok(Stmt::If {
                        branches,
                        else_body: None,
                    });
                }
            }
        }
    }

    /// `FOR EACH x IN expr` or `FOR i = a TO b [STEP s]`, closed by `NEXT [var]`.
    fn for_stmt(&mut self) -> PResult<Stmt> {
        let Some(opener) = self.peek() else {
            return self.expected("FOR");
        };
        self.expect_kw(Keyword::For)?;

        if self.eat_kw(Keyword::Each) {
            let var = self.variable()?;
            self.expect_kw(Keyword::In)?;
            let iterable = self.expression()?;
            let body = self.loop_body(LoopKind::For, "FOR EACH", opener, &[Closer::Next]);
            return Ok(Stmt::ForEach {
                var,
                iterable,
                body,
            });
        }

        let var = self.variable()?;
        self.expect(&TokenKind::Eq, "'='")?;
        let start = self.expression()?;
        self.expect_kw(Keyword::To)?;
        let end = self.expression()?;
        let step = if self.eat_kw(Keyword::Step) {
            Some(self.expression()?)
        } else {
            None
        };
        let body = self.loop_body(LoopKind::For, "FOR", opener, &[Closer::Next]);
        Ok(Stmt::For {
            var,
            start,
            end,
            step,
            body,
        })
    }

    /// `WHILE cond .. WEND` or `.. END WHILE`
    fn while_stmt(&mut self) -> PResult<Stmt> {
        let Some(opener) = self.peek() else {
            return self.expected("WHILE");
        };
        self.expect_kw(Keyword::While)?;
        let cond = self.expression()?;
        let body = self.loop_body(
            LoopKind::Conditional,
            "WHILE",
            opener,
            &[Closer::Wend, Closer::EndWhile],
        );
        Ok(Stmt::While { cond, body })
    }

    /// `DO WHILE cond .. LOOP`, `DO UNTIL cond .. LOOP`, or `DO .. LOOP`
    fn do_stmt(&mut self) -> PResult<Stmt> {
        let Some(opener) = self.peek() else {
            return self.expected("DO");
        };
        self.expect_kw(Keyword::Do)?;
        let cond = if self.eat_kw(Keyword::While) {
            self.expression()?
        } else if self.eat_kw(Keyword::Until) {
            let inner = self.expression()?;
            let span = inner.span.clone();
            Spanned::new(
                Expr::Unary {
                    op: UnaryOp::Not,
                    operand: Box::new(inner),
                },
                span,
            )
        } else {
            let span = opener.span.clone();
            Spanned::new(Expr::Bool(true), span)
        };
        let body = self.loop_body(LoopKind::Conditional, "DO", opener, &[Closer::Loop]);
        if self.at_kw(Keyword::While) || self.at_kw(Keyword::Until) {
            self.error_here(ParseErrorKind::Invalid(
                "LOOP WHILE/UNTIL is not supported; put the condition after DO".to_string(),
            ));
            self.skip_line();
        }
        Ok(Stmt::While { cond, body })
    }

    /// Parse a loop body and its closer (plus an optional `NEXT var`).
    fn loop_body(
        &mut self,
        kind: LoopKind,
        construct: &str,
        opener: &'t crate::lexer::Token<'src>,
        closers: &[Closer],
    ) -> Block {
        self.loops.push(kind);
        let (body, closer) = self.statements_until_closer();
        self.loops.pop();

        match closer {
            Some(c) if closers.contains(&c) => {
                self.consume_closer(c);
                if c == Closer::Next && matches!(self.peek_kind(), Some(TokenKind::Ident(_))) {
                    self.advance();
                }
            }
            _ => self.unbalanced(construct, opener),
        }
        body
    }

    /// `SELECT [CASE] subject`, arms `CASE v1, v2` / `CASE ELSE`, `END SELECT`
    fn select_stmt(&mut self) -> PResult<Stmt> {
        let Some(opener) = self.peek() else {
            return self.expected("SELECT");
        };
        self.expect_kw(Keyword::Select)?;
        self.eat_kw(Keyword::Case);
        let subject = self.expression()?;

        let (stray, mut closer) = self.statements_until_closer();
        if let Some(first) = stray.first() {
            let (line, column) = self.lines_of(first.span.start);
            self.errors.push(crate::error::ParseError {
                kind: ParseErrorKind::Invalid("statement before the first CASE".to_string()),
                line,
                column,
                span: first.span.clone(),
            });
        }

        let mut cases = Vec::new();
        let mut else_body: Option<Block> = None;
        loop {
            match closer {
                Some(Closer::Case) => {
                    let case_tok = self.peek();
                    self.consume_closer(Closer::Case);
                    if self.eat_kw(Keyword::Else) {
                        let (body, next) = self.statements_until_closer();
                        else_body = Some(body);
                        closer = next;
                        continue;
                    }
                    if else_body.is_some() {
                        if let Some(tok) = case_tok {
                            self.error_at(
                                tok,
                                ParseErrorKind::Invalid("CASE after CASE ELSE".to_string()),
                            );
                        }
                    }
                    let mut values = Vec::new();
                    loop {
                        values.push(self.expression()?);
                        if !self.eat(&TokenKind::Comma) {
                            break;
                        }
                    }
                    let (body, next) = self.statements_until_closer();
                    cases.push(CaseArm { values, body });
                    closer = next;
                }
                Some(Closer::EndSelect) => {
                    self.consume_closer(Closer::EndSelect);
                    break;
                }
                _ => {
                    self.unbalanced("SELECT", opener);
                    break;
                }
            }
        }

        Ok(Stmt::SelectCase {
            subject,
            cases,
            else_body,
        })
    }

    /// `SUB name(params) .. END SUB` or `FUNCTION name(params) .. END FUNCTION`.
    ///
    /// Only accepted at the top level; a definition inside a block is
    /// reported and dropped once its body has been consumed.
    pub(crate) fn procedure(&mut self) {
        let Some(opener) = self.peek() else {
            return;
        };
        let returns_value = opener.kind == TokenKind::Keyword(Keyword::Function);
        let (construct, end) = if returns_value {
            ("FUNCTION", Closer::EndFunction)
        } else {
            ("SUB", Closer::EndSub)
        };
        let top_level = self.depth == 0;
        if !top_level {
            self.error_at(
                opener,
                ParseErrorKind::Invalid(format!("{} must be defined outside any block", construct)),
            );
        }
        self.advance();

        let header = self.procedure_header();
        match header {
            Ok(_) => self.expect_statement_end(),
            Err(Recover) => self.skip_line(),
        }

        let enclosing_loops = std::mem::take(&mut self.loops);
        let parsed = self.nested(|p| Ok(p.statements_until_closer()));
        self.loops = enclosing_loops;
        let Ok((body, closer)) = parsed else {
            self.skip_line();
            return;
        };
        if closer == Some(end) {
            self.consume_closer(end);
        } else {
            self.unbalanced(construct, opener);
        }

        let Ok((name, params)) = header else {
            return;
        };
        if !top_level {
            return;
        }
        if let Some(first) = self.procedures.iter().find(|p| p.name.node == name.node) {
            let first_line = self.lines_of(first.span.start).0;
            self.error_at(
                opener,
                ParseErrorKind::DuplicateProcedure {
                    kind: construct.to_string(),
                    name: name.node.clone(),
                    first_line,
                },
            );
            return;
        }
        self.procedures.push(Procedure {
            name,
            params,
            returns_value,
            body,
            span: opener.span.start..self.prev_end(),
        });
    }

    /// Procedure name and optional parenthesized parameter names.
    fn procedure_header(&mut self) -> PResult<(Spanned<String>, Vec<Spanned<String>>)> {
        let name = self.variable()?;
        let mut params: Vec<Spanned<String>> = Vec::new();
        if self.eat(&TokenKind::LParen) && !self.eat(&TokenKind::RParen) {
            loop {
                let param = self.variable()?;
                if params.iter().any(|p| p.node == param.node) {
                    self.error_here(ParseErrorKind::Invalid(format!(
                        "parameter '{}' appears twice in '{}'",
                        param.node, name.node
                    )));
                    return Err(Recover);
                }
                params.push(param);
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
            self.expect(&TokenKind::RParen, "')'")?;
        }
        Ok((name, params))
    }

    fn lines_of(&self, offset: usize) -> (usize, usize) {
        self.tokens
            .iter()
            .find(|t| t.span.start >= offset)
            .map(|t| (t.line, t.column))
            .unwrap_or((1, 1))
    }

    /// `EXIT FOR`, `EXIT WHILE`, `EXIT DO`
    fn exit_stmt(&mut self) -> PResult<Stmt> {
        let Some(exit_tok) = self.peek() else {
            return self.expected("EXIT");
        };
        self.expect_kw(Keyword::Exit)?;
        let (kind, word) = if self.eat_kw(Keyword::For) {
            (LoopKind::For, "FOR")
        } else if self.eat_kw(Keyword::While) {
            (LoopKind::Conditional, "WHILE")
        } else if self.eat_kw(Keyword::Do) {
            (LoopKind::Conditional, "DO")
        } else {
            return self.expected("FOR, WHILE or DO");
        };
        if !self.loops.contains(&kind) {
            self.error_at(exit_tok, ParseErrorKind::ExitOutsideLoop(word.to_string()));
            return Err(Recover);
        }
        Ok(Stmt::Exit(kind))
    }
}
