//! # basic-dialog-runtime
//!
//! Executes compiled dialog scripts as conversations and as LLM tools.
//!
//! - [`registry::ToolRegistry`] caches compilations per `(bot, script)` by
//!   source fingerprint, with single-flight compiles and a negative cache
//! - [`engine::Engine`] interprets a script with an explicit frame stack,
//!   so a turn waiting on `HEAR` or a long `WAIT` suspends into a
//!   serializable [`engine::Continuation`]
//! - [`keywords::KeywordTable`] dispatches statement keywords (`LLM`,
//!   `SET BOT MEMORY`, `GET`, ...) to their implementations
//! - [`service::DialogService`] ties them together behind `compile`,
//!   `invoke_tool`, and `run_script`
//!
//! Everything outside the process (script storage, the model, knowledge
//! search, bot memory, the chat transport, HTTP) is reached through the
//! traits in [`external`]; [`adapters`] has in-memory and filesystem
//! implementations.
//!
//! ## Example
//!
//! ```rust
//! use basic_dialog_runtime::adapters::{InMemorySourceStore, RecordingTransport};
//! use basic_dialog_runtime::engine::RunOutcome;
//! use basic_dialog_runtime::external::Collaborators;
//! use basic_dialog_runtime::service::DialogService;
//! use basic_dialog_runtime::config::RuntimeConfig;
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let sources = Arc::new(InMemorySourceStore::new());
//! sources.put("bot", "hello.bas", "TALK \"What is your name?\"\nHEAR name\nTALK \"Hi \" & name\n");
//!
//! let transport = Arc::new(RecordingTransport::default());
//! let service = DialogService::new(
//!     RuntimeConfig::default(),
//!     sources,
//!     Collaborators::new(transport.clone()),
//! );
//!
//! let first = service.run_script("bot", "s1", "hello.bas", None).await;
//! assert!(matches!(first, RunOutcome::Suspended(_)));
//!
//! let second = service.run_script("bot", "s1", "hello.bas", Some("Ada".into())).await;
//! assert!(matches!(second, RunOutcome::Completed(_)));
//! assert_eq!(transport.messages_for("s1"), vec!["What is your name?", "Hi Ada"]);
//! # }
//! ```

pub mod adapters;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod external;
pub mod functions;
pub mod input;
pub mod keywords;
pub mod registry;
pub mod retry;
pub mod service;
pub mod value;
pub mod watcher;

pub use config::RuntimeConfig;
pub use context::{ExecutionContext, SessionState};
pub use engine::{Continuation, Engine, RunOutcome, Start, SuspendReason, Suspension};
pub use error::{DialogError, RuntimeError, ServiceError};
pub use registry::{CompiledScript, ReadTicket, ToolRegistry};
pub use service::DialogService;
pub use value::{coerce, Value};
