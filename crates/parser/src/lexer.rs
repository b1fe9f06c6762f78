//! Lexer for dialog script source code.
//!
//! Dialog scripts are line-oriented: statements end at a newline (or `:`),
//! keywords are case-insensitive, and comments run to the end of the line.
//! This module provides tokenization in two layers:
//!
//! - [`lexer()`] is the raw chumsky lexer. It never fails: characters it does
//!   not recognize become [`TokenKind::Unknown`] tokens.
//! - [`lex()`] runs the raw lexer, attaches line/column positions, drops
//!   comments, and turns unknown characters and unterminated strings into
//!   [`LexError`]s so one pass reports every lexical problem.
//!
//! # Example
//!
//! ```rust
//! use basic_dialog_parser::lexer::{lex, Keyword, TokenKind};
//!
//! let (tokens, errors) = lex("talk \"Hello\"");
//! assert!(errors.is_empty());
//! assert_eq!(tokens[0].kind, TokenKind::Keyword(Keyword::Talk));
//! assert_eq!(tokens[1].kind, TokenKind::StringLit("Hello"));
//! ```
//!
//! # Token Types
//!
//! | Category | Examples |
//! |----------|----------|
//! | Declarations | `PARAM`, `DESCRIPTION`, `AS`, `LIKE`, `ENUM` |
//! | Conversation | `TALK`, `HEAR` |
//! | Control flow | `IF`, `FOR`, `WHILE`, `SELECT`, `RETURN`, `EXIT` |
//! | Catalogue leads | `SET`, `GET`, `USE`, `CLEAR`, `LLM`, `WAIT` |
//! | Operators | `+ - * / ^ & = <> < <= > >= AND OR NOT MOD` |
//! | Literals | `"text"`, `42`, `3.5`, `TRUE`, `FALSE`, `NULL` |
//! | Comments | `' note`, `REM note`, `// note` |

use crate::error::{LexError, LexErrorKind};
use chumsky::prelude::*;
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Reserved words of the language.
///
/// Words that only appear as the second or third word of a catalogue
/// phrase (`BOT`, `MEMORY`, `KB`, `TOOLS`) are not reserved; the parser
/// matches them as identifiers in context.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Keyword {
    // Declarations
    Param,
    Description,
    As,
    Like,
    Enum,

    // Conversation
    Talk,
    Hear,

    // Control flow
    If,
    Then,
    Else,
    ElseIf,
    End,
    For,
    Each,
    In,
    To,
    Step,
    Next,
    While,
    Wend,
    Do,
    Loop,
    Until,
    Select,
    Case,
    Return,
    Exit,
    Sub,
    Function,
    Call,

    // Operators and literals
    And,
    Or,
    Not,
    Mod,
    True,
    False,
    Null,

    // Keyword catalogue leads
    Print,
    Wait,
    Set,
    Get,
    Post,
    Use,
    Clear,
    Llm,
}

const KEYWORDS: &[(&str, Keyword)] = &[
    ("PARAM", Keyword::Param),
    ("DESCRIPTION", Keyword::Description),
    ("AS", Keyword::As),
    ("LIKE", Keyword::Like),
    ("ENUM", Keyword::Enum),
    ("TALK", Keyword::Talk),
    ("HEAR", Keyword::Hear),
    ("IF", Keyword::If),
    ("THEN", Keyword::Then),
    ("ELSE", Keyword::Else),
    ("ELSEIF", Keyword::ElseIf),
    ("END", Keyword::End),
    ("FOR", Keyword::For),
    ("EACH", Keyword::Each),
    ("IN", Keyword::In),
    ("TO", Keyword::To),
    ("STEP", Keyword::Step),
    ("NEXT", Keyword::Next),
    ("WHILE", Keyword::While),
    ("WEND", Keyword::Wend),
    ("DO", Keyword::Do),
    ("LOOP", Keyword::Loop),
    ("UNTIL", Keyword::Until),
    ("SELECT", Keyword::Select),
    ("CASE", Keyword::Case),
    ("RETURN", Keyword::Return),
    ("EXIT", Keyword::Exit),
    ("SUB", Keyword::Sub),
    ("FUNCTION", Keyword::Function),
    ("CALL", Keyword::Call),
    ("AND", Keyword::And),
    ("OR", Keyword::Or),
    ("NOT", Keyword::Not),
    ("MOD", Keyword::Mod),
    ("TRUE", Keyword::True),
    ("FALSE", Keyword::False),
    ("NULL", Keyword::Null),
    ("PRINT", Keyword::Print),
    ("WAIT", Keyword::Wait),
    ("SET", Keyword::Set),
    ("GET", Keyword::Get),
    ("POST", Keyword::Post),
    ("USE", Keyword::Use),
    ("CLEAR", Keyword::Clear),
    ("LLM", Keyword::Llm),
];

impl Keyword {
    /// Look up a word case-insensitively.
    pub fn from_word(word: &str) -> Option<Self> {
        KEYWORDS
            .iter()
            .find(|(text, _)| text.eq_ignore_ascii_case(word))
            .map(|(_, kw)| *kw)
    }

    /// Canonical upper-case spelling.
    pub fn as_str(self) -> &'static str {
        KEYWORDS
            .iter()
            .find(|(_, kw)| *kw == self)
            .map(|(text, _)| *text)
            .unwrap_or("?")
    }
}

impl std::fmt::Display for Keyword {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The kind of a token, borrowing text from the source where needed.
#[derive(Clone, Debug, PartialEq)]
pub enum TokenKind<'src> {
    Keyword(Keyword),
    Ident(&'src str),
    /// String contents between the quotes, with `""` escapes left intact.
    StringLit(&'src str),
    Number(f64),
    Comment(&'src str),
    Newline,

    // Operators
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    Ampersand,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,

    // Punctuation
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Colon,
    Dot,

    // Only produced by the raw lexer; `lex` reports these as errors.
    UnterminatedString(&'src str),
    Unknown(char),
}

impl std::fmt::Display for TokenKind<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenKind::Keyword(kw) => write!(f, "{}", kw),
            TokenKind::Ident(s) => write!(f, "{}", s),
            TokenKind::StringLit(s) => write!(f, "\"{}\"", s),
            TokenKind::Number(n) => write!(f, "{}", n),
            TokenKind::Comment(s) => write!(f, "'{}", s),
            TokenKind::Newline => write!(f, "end of line"),
            TokenKind::Plus => write!(f, "+"),
            TokenKind::Minus => write!(f, "-"),
            TokenKind::Star => write!(f, "*"),
            TokenKind::Slash => write!(f, "/"),
            TokenKind::Caret => write!(f, "^"),
            TokenKind::Ampersand => write!(f, "&"),
            TokenKind::Eq => write!(f, "="),
            TokenKind::Ne => write!(f, "<>"),
            TokenKind::Lt => write!(f, "<"),
            TokenKind::Le => write!(f, "<="),
            TokenKind::Gt => write!(f, ">"),
            TokenKind::Ge => write!(f, ">="),
            TokenKind::LParen => write!(f, "("),
            TokenKind::RParen => write!(f, ")"),
            TokenKind::LBracket => write!(f, "["),
            TokenKind::RBracket => write!(f, "]"),
            TokenKind::Comma => write!(f, ","),
            TokenKind::Colon => write!(f, ":"),
            TokenKind::Dot => write!(f, "."),
            TokenKind::UnterminatedString(s) => write!(f, "\"{}", s),
            TokenKind::Unknown(c) => write!(f, "{}", c),
        }
    }
}

/// A positioned token.
#[derive(Clone, Debug, PartialEq)]
pub struct Token<'src> {
    pub kind: TokenKind<'src>,
    pub lexeme: &'src str,
    pub span: Range<usize>,
    /// 1-based line number.
    pub line: usize,
    /// 1-based column, counted in characters.
    pub column: usize,
}

/// Span type for raw tokens.
pub type Span = SimpleSpan<usize>;

/// A raw token with its span.
pub type RawToken<'src> = (TokenKind<'src>, Span);

/// Create the raw lexer.
pub fn lexer<'src>(
) -> impl Parser<'src, &'src str, Vec<RawToken<'src>>, extra::Err<Rich<'src, char, Span>>> {
    let comment = choice((
        just('\'').ignore_then(none_of('\n').repeated().to_slice()),
        just("//").ignore_then(none_of('\n').repeated().to_slice()),
        text::ident()
            .filter(|word: &&str| word.eq_ignore_ascii_case("rem"))
            .ignore_then(none_of('\n').repeated().to_slice()),
    ))
    .map(TokenKind::Comment);

    // `""` inside a string is an escaped quote; a string may not span lines
    let string_body = choice((just("\"\"").ignored(), none_of("\"\n").ignored()))
        .repeated()
        .to_slice();
    let string_lit = just('"')
        .ignore_then(string_body)
        .then(just('"').or_not())
        .map(|(body, close): (&str, Option<char>)| match close {
            Some(_) => TokenKind::StringLit(body),
            None => TokenKind::UnterminatedString(body),
        });

    let number = text::int(10)
        .then(just('.').then(text::digits(10)).or_not())
        .to_slice()
        .map(|s: &str| TokenKind::Number(s.parse().unwrap_or_default()));

    // Multi-character operators (must come before single char versions)
    let multi_char_ops = choice((
        just("<>").to(TokenKind::Ne),
        just("!=").to(TokenKind::Ne),
        just("<=").to(TokenKind::Le),
        just(">=").to(TokenKind::Ge),
        just("==").to(TokenKind::Eq),
    ));

    let single_char_ops = choice((
        just('=').to(TokenKind::Eq),
        just('<').to(TokenKind::Lt),
        just('>').to(TokenKind::Gt),
        just('+').to(TokenKind::Plus),
        just('-').to(TokenKind::Minus),
        just('*').to(TokenKind::Star),
        just('/').to(TokenKind::Slash),
        just('^').to(TokenKind::Caret),
        just('&').to(TokenKind::Ampersand),
        just('(').to(TokenKind::LParen),
        just(')').to(TokenKind::RParen),
        just('[').to(TokenKind::LBracket),
        just(']').to(TokenKind::RBracket),
        just(',').to(TokenKind::Comma),
        just(':').to(TokenKind::Colon),
        just('.').to(TokenKind::Dot),
    ));

    let word = text::ident().map(|word: &'src str| {
        Keyword::from_word(word).map_or(TokenKind::Ident(word), TokenKind::Keyword)
    });

    let newline = just('\n').to(TokenKind::Newline);

    let unknown = any().map(TokenKind::Unknown);

    let token = choice((
        comment,
        string_lit,
        number,
        multi_char_ops,
        single_char_ops,
        word,
        newline,
        unknown,
    ));

    // Horizontal whitespace (spaces, tabs, carriage returns, but not newlines)
    let horizontal_ws = one_of(" \t\r").repeated();

    horizontal_ws.clone().ignore_then(
        token
            .map_with(|tok, e| (tok, e.span()))
            .then_ignore(horizontal_ws)
            .repeated()
            .collect(),
    )
}

/// Maps byte offsets to 1-based line numbers.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LineIndex {
    starts: Vec<usize>,
}

impl LineIndex {
    pub fn new(source: &str) -> Self {
        let starts = std::iter::once(0)
            .chain(source.match_indices('\n').map(|(i, _)| i + 1))
            .collect();
        Self { starts }
    }

    /// 1-based line containing `offset`.
    pub fn line(&self, offset: usize) -> usize {
        match self.starts.binary_search(&offset) {
            Ok(idx) => idx + 1,
            Err(idx) => idx.max(1),
        }
    }

    /// 1-based line and character column of `offset`.
    pub fn position(&self, source: &str, offset: usize) -> (usize, usize) {
        let line = self.line(offset);
        let start = self.starts.get(line - 1).copied().unwrap_or(0);
        let column = source
            .get(start..offset.min(source.len()))
            .map(|prefix| prefix.chars().count())
            .unwrap_or(0);
        (line, column + 1)
    }
}

/// Tokenize `source` into positioned tokens, collecting every lexical error.
///
/// Comments are dropped. Unknown characters are skipped. An unterminated
/// string still yields a string token so the parser can continue.
pub fn lex(source: &str) -> (Vec<Token<'_>>, Vec<LexError>) {
    let index = LineIndex::new(source);
    let (raw, raw_errors) = lexer().parse(source).into_output_errors();

    let mut tokens = Vec::new();
    let mut errors: Vec<LexError> = raw_errors
        .iter()
        .map(|e| {
            let (line, column) = index.position(source, e.span().start);
            LexError {
                kind: LexErrorKind::Malformed(e.reason().to_string()),
                line,
                column,
                span: e.span().start..e.span().end,
            }
        })
        .collect();

    for (kind, span) in raw.unwrap_or_default() {
        let range = span.start..span.end;
        let (line, column) = index.position(source, range.start);
        let kind = match kind {
            TokenKind::Comment(_) => continue,
            TokenKind::Unknown(c) => {
                errors.push(LexError {
                    kind: LexErrorKind::UnexpectedCharacter(c),
                    line,
                    column,
                    span: range,
                });
                continue;
            }
            TokenKind::UnterminatedString(body) => {
                errors.push(LexError {
                    kind: LexErrorKind::UnterminatedString,
                    line,
                    column,
                    span: range.clone(),
                });
                TokenKind::StringLit(body)
            }
            other => other,
        };
        tokens.push(Token {
            kind,
            lexeme: source.get(range.clone()).unwrap_or(""),
            span: range,
            line,
            column,
        });
    }

    (tokens, errors)
}
