//! Interfaces to the collaborators the runtime depends on but does not own:
//! source storage, the LLM provider, knowledge-base search, bot memory,
//! the session transport, and outbound HTTP.
//!
//! In-process implementations live in [`crate::adapters`].

use crate::error::{RuntimeError, ServiceError};
use crate::value::Value;
use async_trait::async_trait;
use basic_dialog_parser::FunctionTool;
use futures::stream::BoxStream;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Source store
// ============================================================================

/// Script bytes plus the fingerprint of exactly those bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDocument {
    pub bytes: Vec<u8>,
    pub fingerprint: String,
}

/// A script was created or modified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceChange {
    pub bot_id: String,
    pub path: String,
    pub fingerprint: String,
}

#[async_trait]
pub trait SourceStore: Send + Sync {
    async fn get(&self, bot_id: &str, path: &str) -> Result<SourceDocument, ServiceError>;

    /// Change notifications for scripts of `bot_id` whose path starts with `prefix`.
    fn subscribe(&self, bot_id: &str, prefix: &str) -> BoxStream<'static, SourceChange>;
}

// ============================================================================
// LLM provider
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    /// Set on [`Role::Tool`] messages carrying a tool result.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_name: None,
        }
    }

    pub fn tool_result(tool_name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_name: Some(tool_name.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool_name: String,
    pub arguments: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Completion {
    pub text: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: &[FunctionTool],
    ) -> Result<Completion, ServiceError>;
}

// ============================================================================
// Knowledge base, memory, transport, HTTP
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snippet {
    pub content: String,
    pub score: f64,
}

#[async_trait]
pub trait KnowledgeBase: Send + Sync {
    async fn search(&self, collections: &[String], query: &str) -> Result<Vec<Snippet>, ServiceError>;
}

/// Key-value memory shared by all sessions of a bot.
///
/// Implementations must give read-after-write consistency per key.
#[async_trait]
pub trait BotMemoryStore: Send + Sync {
    /// Returns [`Value::Null`] for unknown keys.
    async fn get(&self, bot_id: &str, key: &str) -> Result<Value, ServiceError>;
    async fn set(&self, bot_id: &str, key: &str, value: Value) -> Result<(), ServiceError>;
}

/// Outbound side of a conversation. Inbound text arrives through
/// [`DialogService::run_script`](crate::service::DialogService::run_script).
#[async_trait]
pub trait SessionTransport: Send + Sync {
    async fn send(&self, session_id: &str, message: &str) -> Result<(), ServiceError>;
}

#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn get(&self, url: &str) -> Result<String, ServiceError>;
    async fn post(&self, url: &str, body: &str) -> Result<String, ServiceError>;
}

// ============================================================================
// Tool host
// ============================================================================

/// How the `LLM` keyword reaches the tools it offers the model.
///
/// Implemented by [`DialogService`](crate::service::DialogService); tests
/// can supply their own.
#[async_trait]
pub trait ToolHost: Send + Sync {
    /// Function-calling schemas for the named tools that are currently available.
    async fn tool_schemas(&self, bot_id: &str, tool_names: &[String]) -> Vec<FunctionTool>;

    #[allow(clippy::too_many_arguments)]
    async fn call_tool(
        &self,
        bot_id: &str,
        session_id: &str,
        tool_name: &str,
        arguments: IndexMap<String, Value>,
        depth: usize,
        cancel: &CancellationToken,
    ) -> Result<Value, RuntimeError>;
}

/// A host that offers no tools.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoTools;

#[async_trait]
impl ToolHost for NoTools {
    async fn tool_schemas(&self, _bot_id: &str, _tool_names: &[String]) -> Vec<FunctionTool> {
        Vec::new()
    }

    async fn call_tool(
        &self,
        _bot_id: &str,
        _session_id: &str,
        tool_name: &str,
        _arguments: IndexMap<String, Value>,
        _depth: usize,
        _cancel: &CancellationToken,
    ) -> Result<Value, RuntimeError> {
        Err(RuntimeError::UnknownTool(tool_name.to_string()))
    }
}

/// The collaborators keywords call out to, bundled for the engine.
#[derive(Clone)]
pub struct Collaborators {
    pub transport: Arc<dyn SessionTransport>,
    pub memory: Arc<dyn BotMemoryStore>,
    pub knowledge: Arc<dyn KnowledgeBase>,
    pub llm: Arc<dyn LlmProvider>,
    pub http: Arc<dyn HttpClient>,
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}
