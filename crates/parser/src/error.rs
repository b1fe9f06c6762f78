//! Error types and error reporting for dialog script compilation.
//!
//! This module provides structured error types and pretty error reporting
//! using the [ariadne](https://crates.io/crates/ariadne) crate for colorful,
//! context-aware error messages.
//!
//! # Error Types
//!
//! - [`LexError`] - unrecognized characters, unterminated strings
//! - [`ParseError`] - structural problems, including unbalanced blocks
//! - [`AnalysisError`] - fatal semantic problems in the declaration section
//! - [`CompileError`] - every diagnostic from one compilation attempt
//!
//! All stages collect errors instead of stopping at the first one, so a
//! single compilation reports every problem in the script.
//!
//! # Pretty Printing
//!
//! ```rust
//! use basic_dialog_parser::compile;
//! use basic_dialog_parser::error::ErrorReporter;
//!
//! let source = "IF x THEN\n  TALK \"open\"\n";
//! let err = compile(source, "broken.bas").unwrap_err();
//! let reporter = ErrorReporter::new("broken.bas", source);
//! let rendered = reporter.render(&err);
//! assert!(rendered.contains("IF"));
//! ```

use ariadne::{Color, Label, Report, ReportKind, Source};
use serde::Serialize;
use std::fmt;
use std::ops::Range;
use thiserror::Error;

use crate::analysis::{SemanticWarning, Severity};

/// What went wrong while scanning.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
pub enum LexErrorKind {
    #[error("unexpected character '{0}'")]
    UnexpectedCharacter(char),
    #[error("unterminated string literal")]
    UnterminatedString,
    #[error("{0}")]
    Malformed(String),
}

/// A lexical error at a source position.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("{line}:{column}: {kind}")]
pub struct LexError {
    pub kind: LexErrorKind,
    pub line: usize,
    pub column: usize,
    pub span: Range<usize>,
}

/// What went wrong while parsing.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
pub enum ParseErrorKind {
    #[error("unexpected {found}, expected {expected}")]
    UnexpectedToken { expected: String, found: String },
    #[error("{construct} block opened on line {opening_line} is never closed")]
    UnbalancedBlock {
        construct: String,
        opening_line: usize,
    },
    #[error("{closer} without a matching {construct}")]
    UnmatchedBlockEnd { closer: String, construct: String },
    #[error("{declaration} must appear before the first statement")]
    DeclarationAfterStatement { declaration: String },
    #[error("unknown type '{0}'")]
    UnknownType(String),
    #[error("{keyword} expects {expected} argument(s), found {found}")]
    ArgumentCount {
        keyword: String,
        expected: String,
        found: usize,
    },
    #[error("unknown keyword phrase '{0}'")]
    UnknownKeywordPhrase(String),
    #[error("EXIT {0} outside of a loop")]
    ExitOutsideLoop(String),
    #[error("nesting deeper than {limit} levels")]
    NestingTooDeep { limit: usize },
    #[error("{kind} '{name}' is already defined on line {first_line}")]
    DuplicateProcedure {
        kind: String,
        name: String,
        first_line: usize,
    },
    #[error("{0}")]
    Invalid(String),
}

/// A parse error at a source position.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("{line}:{column}: {kind}")]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub line: usize,
    pub column: usize,
    pub span: Range<usize>,
}

/// A fatal semantic error found while extracting the tool signature.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
pub enum AnalysisError {
    #[error("parameter '{name}' on line {duplicate_line} was already declared on line {first_line}")]
    DuplicateParameterName {
        name: String,
        first_line: usize,
        duplicate_line: usize,
        span: Range<usize>,
    },
    #[error("CALL to undefined procedure '{name}' on line {line}")]
    UnknownProcedure {
        name: String,
        line: usize,
        span: Range<usize>,
    },
    #[error("'{name}' takes {expected} argument(s) but line {line} passes {found}")]
    ProcedureArity {
        name: String,
        expected: usize,
        found: usize,
        line: usize,
        span: Range<usize>,
    },
    #[error("SUB '{name}' does not return a value (line {line})")]
    SubHasNoValue {
        name: String,
        line: usize,
        span: Range<usize>,
    },
}

impl AnalysisError {
    pub fn span(&self) -> Range<usize> {
        match self {
            AnalysisError::DuplicateParameterName { span, .. }
            | AnalysisError::UnknownProcedure { span, .. }
            | AnalysisError::ProcedureArity { span, .. }
            | AnalysisError::SubHasNoValue { span, .. } => span.clone(),
        }
    }
}

/// One diagnostic from a failed compilation.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
pub enum CompileDiagnostic {
    #[error("lex error at {0}")]
    Lex(LexError),
    #[error("parse error at {0}")]
    Parse(ParseError),
    #[error("analysis error: {0}")]
    Analysis(AnalysisError),
    #[error("source is not valid UTF-8 (valid up to byte {valid_up_to})")]
    Encoding { valid_up_to: usize },
}

impl CompileDiagnostic {
    pub fn span(&self) -> Range<usize> {
        match self {
            CompileDiagnostic::Lex(e) => e.span.clone(),
            CompileDiagnostic::Parse(e) => e.span.clone(),
            CompileDiagnostic::Analysis(e) => e.span(),
            CompileDiagnostic::Encoding { valid_up_to } => *valid_up_to..*valid_up_to,
        }
    }
}

/// Every diagnostic from one compilation attempt, in pipeline order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompileError {
    pub script_path: String,
    pub diagnostics: Vec<CompileDiagnostic>,
}

impl CompileError {
    pub fn lex_errors(&self) -> impl Iterator<Item = &LexError> {
        self.diagnostics.iter().filter_map(|d| match d {
            CompileDiagnostic::Lex(e) => Some(e),
            _ => None,
        })
    }

    pub fn parse_errors(&self) -> impl Iterator<Item = &ParseError> {
        self.diagnostics.iter().filter_map(|d| match d {
            CompileDiagnostic::Parse(e) => Some(e),
            _ => None,
        })
    }

    pub fn analysis_errors(&self) -> impl Iterator<Item = &AnalysisError> {
        self.diagnostics.iter().filter_map(|d| match d {
            CompileDiagnostic::Analysis(e) => Some(e),
            _ => None,
        })
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} failed to compile with {} error(s)",
            self.script_path,
            self.diagnostics.len()
        )?;
        for diagnostic in &self.diagnostics {
            write!(f, "\n  {}", diagnostic)?;
        }
        Ok(())
    }
}

impl std::error::Error for CompileError {}

/// Error reporter that uses ariadne for pretty error output.
pub struct ErrorReporter<'src> {
    source_name: String,
    source: &'src str,
}

impl<'src> ErrorReporter<'src> {
    /// Create a new error reporter.
    pub fn new(source_name: impl Into<String>, source: &'src str) -> Self {
        Self {
            source_name: source_name.into(),
            source,
        }
    }

    fn diagnostic_report(&self, diagnostic: &CompileDiagnostic) -> Report<'_, (&String, Range<usize>)> {
        let span = diagnostic.span();
        let message = match diagnostic {
            CompileDiagnostic::Lex(e) => e.kind.to_string(),
            CompileDiagnostic::Parse(e) => e.kind.to_string(),
            CompileDiagnostic::Analysis(e) => e.to_string(),
            CompileDiagnostic::Encoding { .. } => diagnostic.to_string(),
        };

        let mut report = Report::build(ReportKind::Error, &self.source_name, span.start)
            .with_message(&message)
            .with_label(
                Label::new((&self.source_name, span))
                    .with_color(Color::Red)
                    .with_message("here"),
            );

        if let CompileDiagnostic::Parse(ParseError {
            kind: ParseErrorKind::UnbalancedBlock { construct, .. },
            ..
        }) = diagnostic
        {
            report = report.with_help(format!("add the matching END for this {}", construct));
        }

        report.finish()
    }

    fn warning_report(&self, warning: &SemanticWarning) -> Report<'_, (&String, Range<usize>)> {
        let span = warning.span.clone().unwrap_or(0..0);
        let kind = match warning.severity {
            Severity::Error => ReportKind::Error,
            Severity::Warning => ReportKind::Warning,
        };

        let mut report = Report::build(kind, &self.source_name, span.start)
            .with_message(&warning.message)
            .with_label(
                Label::new((&self.source_name, span))
                    .with_color(Color::Yellow)
                    .with_message("here"),
            );

        if let Some(ref hint) = warning.hint {
            report = report.with_help(hint);
        }

        report.finish()
    }

    /// Report every diagnostic of a failed compilation to stderr.
    pub fn report_compile_error(&self, error: &CompileError) -> std::io::Result<()> {
        for diagnostic in &error.diagnostics {
            self.diagnostic_report(diagnostic)
                .eprint((&self.source_name, Source::from(self.source)))?;
        }
        Ok(())
    }

    /// Report a non-fatal semantic warning to stderr.
    pub fn report_warning(&self, warning: &SemanticWarning) -> std::io::Result<()> {
        self.warning_report(warning)
            .eprint((&self.source_name, Source::from(self.source)))
    }

    /// Render every diagnostic of a failed compilation into a string.
    pub fn render(&self, error: &CompileError) -> String {
        let mut out = Vec::new();
        for diagnostic in &error.diagnostics {
            let _ = self
                .diagnostic_report(diagnostic)
                .write((&self.source_name, Source::from(self.source)), &mut out);
        }
        String::from_utf8_lossy(&out).into_owned()
    }
}
