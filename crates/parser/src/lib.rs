//! # basic-dialog-parser
//!
//! The compiler half of the dialog script toolchain. Dialog scripts are
//! small BASIC-like programs that double as conversational flows and as
//! tools an LLM can call:
//!
//! ```text
//! PARAM city AS STRING LIKE "London" DESCRIPTION "City name"
//! DESCRIPTION "Gets weather"
//!
//! forecast = GET "https://weather.example/" & city
//! TALK "The weather in " & city & ": " & forecast
//! ```
//!
//! This crate provides:
//!
//! - **Lexing** with [chumsky](https://crates.io/crates/chumsky), collecting
//!   every lexical error in one pass ([`lexer`])
//! - **Parsing** into a spanned AST with error recovery ([`parser`], [`ast`])
//! - **Tool extraction**: an ordered [`ToolSignature`] plus warnings
//!   ([`analysis`])
//! - **Schema generation** for MCP-style and function-calling tool listings
//!   ([`schema`])
//! - **Pretty diagnostics** with [ariadne](https://crates.io/crates/ariadne)
//!   ([`error`])
//!
//! ## Quick Start
//!
//! ```rust
//! use basic_dialog_parser::compile;
//!
//! let source = r#"
//! PARAM city AS STRING LIKE "London" DESCRIPTION "City name"
//! DESCRIPTION "Gets weather"
//! TALK "Checking " & city
//! "#;
//!
//! let compiled = compile(source, "bots/demo/weather.bas").unwrap();
//! assert_eq!(compiled.signature.tool_name, "weather");
//! println!("{}", compiled.schemas.mcp.to_json().unwrap());
//! ```
//!
//! ## Pipeline
//!
//! ```text
//! source ──lex──> tokens ──parse──> Script ──analyze──> ToolSignature ──generate──> ToolSchemas
//! ```
//!
//! Each stage collects its errors; [`compile`] returns them together as a
//! [`CompileError`] so one attempt reports every problem in the script.

pub mod analysis;
pub mod ast;
pub mod catalogue;
pub mod error;
pub mod lexer;
pub mod parser;
pub mod schema;

// Re-export commonly used types
pub use analysis::{ParameterSpec, SemanticWarning, Severity, ToolSignature};
pub use ast::{ParamType, Script, Spanned};
pub use error::{AnalysisError, CompileDiagnostic, CompileError, ErrorReporter, LexError, ParseError};
pub use schema::{FunctionTool, McpTool, ToolSchemas};

/// The result of a successful compilation.
#[derive(Debug, Clone, PartialEq)]
pub struct Compilation {
    pub script: Script,
    pub signature: ToolSignature,
    pub schemas: ToolSchemas,
    pub warnings: Vec<SemanticWarning>,
}

/// Parse source code into a script, returning structural errors as strings.
///
/// # Example
///
/// ```rust
/// let (script, errors) = basic_dialog_parser::parse_source("TALK \"hi\"\n");
/// assert!(errors.is_empty());
/// assert_eq!(script.body.len(), 1);
/// ```
pub fn parse_source(source: &str) -> (Script, Vec<String>) {
    parser::parse_with_errors(source)
}

/// Run the full pipeline over `source`.
///
/// Lexing, parsing, and analysis all run even when an earlier stage found
/// errors, so the returned [`CompileError`] lists everything at once.
pub fn compile(source: &str, script_path: &str) -> Result<Compilation, CompileError> {
    let (script, lex_errors, parse_errors) = parser::parse(source);

    let mut diagnostics: Vec<CompileDiagnostic> = lex_errors
        .into_iter()
        .map(CompileDiagnostic::Lex)
        .chain(parse_errors.into_iter().map(CompileDiagnostic::Parse))
        .collect();

    let analysis = match analysis::analyze(&script, script_path) {
        Ok(analysis) => Some(analysis),
        Err(errors) => {
            diagnostics.extend(errors.into_iter().map(CompileDiagnostic::Analysis));
            None
        }
    };

    match analysis {
        Some(analysis) if diagnostics.is_empty() => {
            let schemas = schema::generate(&analysis.signature);
            Ok(Compilation {
                script,
                signature: analysis.signature,
                schemas,
                warnings: analysis.warnings,
            })
        }
        _ => Err(CompileError {
            script_path: script_path.to_string(),
            diagnostics,
        }),
    }
}

/// Compile raw source bytes, rejecting invalid UTF-8.
pub fn compile_bytes(bytes: &[u8], script_path: &str) -> Result<Compilation, CompileError> {
    match std::str::from_utf8(bytes) {
        Ok(source) => compile(source, script_path),
        Err(e) => Err(CompileError {
            script_path: script_path.to_string(),
            diagnostics: vec![CompileDiagnostic::Encoding {
                valid_up_to: e.valid_up_to(),
            }],
        }),
    }
}
