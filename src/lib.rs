//! # basic-dialog
//!
//! BASIC-like dialog scripts: a compiler that turns each script into an LLM
//! tool definition, and a runtime that executes scripts as conversations.
//!
//! ## Features
//!
//! | Feature | Crate | Description |
//! |---------|-------|-------------|
//! | `parser`  | [`basic-dialog-parser`]  | Lexer, AST, tool extraction, schema generation |
//! | `runtime` | [`basic-dialog-runtime`] | Compilation cache, engine, keywords, service |
//!
//! `default = ["full"]` enables all of the above.
//!
//! ## Quick Start
//!
//! ```toml
//! [dependencies]
//! basic-dialog = "0.1"
//! ```
//!
//! ```rust,ignore
//! use basic_dialog::compile;
//!
//! let compiled = compile(source, "bots/demo/weather.bas")?;
//! println!("{}", compiled.schemas.function.to_json()?);
//! ```

#[cfg(feature = "parser")]
pub use basic_dialog_parser as parser;

#[cfg(feature = "parser")]
pub use basic_dialog_parser::{compile, Compilation, CompileError, Script, ToolSignature};

#[cfg(feature = "runtime")]
pub use basic_dialog_runtime as runtime;

#[cfg(feature = "runtime")]
pub use basic_dialog_runtime::{DialogService, RunOutcome, RuntimeConfig, Value};
