//! Runtime error types.

use crate::value::CoercionError;
use basic_dialog_parser::CompileError;
use std::path::PathBuf;
use thiserror::Error;

/// Failure reported by an external collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    /// Worth retrying: timeouts, dropped connections, rate limits.
    #[error("transient failure: {0}")]
    Transient(String),
    /// The collaborator refused the request; retrying will not help.
    #[error("rejected: {0}")]
    Rejected(String),
    #[error("not found: {0}")]
    NotFound(String),
}

impl ServiceError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ServiceError::Transient(_))
    }
}

/// An error that aborts the current turn or tool call.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RuntimeError {
    #[error("undefined variable '{0}'")]
    UndefinedVariable(String),

    #[error("step budget of {budget} exceeded")]
    StepBudgetExceeded { budget: u64 },

    #[error("{operation} failed after {attempts} attempt(s): {message}")]
    ExternalCall {
        operation: String,
        attempts: u32,
        message: String,
    },

    #[error(transparent)]
    Coercion(#[from] CoercionError),

    #[error("unknown keyword '{0}'")]
    UnknownKeyword(String),

    #[error("unknown function '{0}'")]
    UnknownFunction(String),

    #[error("{function}: {message}")]
    InvalidArgument { function: String, message: String },

    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    #[error("division by zero")]
    DivisionByZero,

    #[error("tool '{tool}' is missing required argument '{argument}'")]
    MissingArgument { tool: String, argument: String },

    #[error("unknown tool '{0}'")]
    UnknownTool(String),

    #[error("tool '{0}' cannot wait for user input")]
    ToolSuspended(String),

    #[error("tool calls nested deeper than {0} levels")]
    ToolDepthExceeded(usize),

    #[error("procedure calls nested deeper than {0} levels")]
    CallDepthExceeded(usize),

    #[error("expression nested deeper than {0} levels")]
    ExpressionTooDeep(usize),

    #[error("undefined procedure '{0}'")]
    UnknownProcedure(String),

    #[error("continuation does not match the script: {0}")]
    InvalidContinuation(String),

    #[error("script '{script_path}' is unavailable: {error}")]
    SourceUnavailable {
        script_path: String,
        #[source]
        error: ServiceError,
    },

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error("cancelled")]
    Cancelled,
}

impl RuntimeError {
    /// Whether `ON ERROR RESUME NEXT` may skip past this error. Limits,
    /// cancellation and broken continuations always end the run.
    pub fn is_resumable(&self) -> bool {
        !matches!(
            self,
            RuntimeError::StepBudgetExceeded { .. }
                | RuntimeError::ToolDepthExceeded(_)
                | RuntimeError::CallDepthExceeded(_)
                | RuntimeError::ExpressionTooDeep(_)
                | RuntimeError::InvalidContinuation(_)
                | RuntimeError::Cancelled
        )
    }
}

/// Errors from [`DialogService::compile`](crate::service::DialogService::compile).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DialogError {
    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error("cannot read '{script_path}': {error}")]
    Source {
        script_path: String,
        #[source]
        error: ServiceError,
    },
}

impl From<DialogError> for RuntimeError {
    fn from(error: DialogError) -> Self {
        match error {
            DialogError::Compile(e) => RuntimeError::Compile(e),
            DialogError::Source { script_path, error } => {
                RuntimeError::SourceUnavailable { script_path, error }
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config value for {key}: {message}")]
    Invalid { key: &'static str, message: String },
}
