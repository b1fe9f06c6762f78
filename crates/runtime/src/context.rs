//! Per-turn execution state.

use crate::error::RuntimeError;
use crate::external::BotMemoryStore;
use crate::value::Value;
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// The part of a turn's state that survives a suspension.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SessionState {
    /// Variable bindings, keyed by lower-case name.
    pub bindings: IndexMap<String, Value>,
    /// Knowledge-base collections searched by `LLM`.
    pub active_kbs: IndexSet<String>,
    /// Tools offered to the model by `LLM`.
    pub active_tools: IndexSet<String>,
    /// Named prompt context set with `SET CONTEXT`.
    pub context_entries: IndexMap<String, String>,
    /// `ON ERROR RESUME NEXT` is in effect.
    #[serde(default)]
    pub resume_on_error: bool,
}

/// State for one turn or one tool invocation. Never shared across sessions.
pub struct ExecutionContext {
    pub session_id: String,
    pub bot_id: String,
    pub state: SessionState,
    memory: Arc<dyn BotMemoryStore>,
    /// User text waiting to satisfy the next `HEAR`.
    inbound: Option<String>,
    cancel: CancellationToken,
    depth: usize,
}

impl ExecutionContext {
    pub fn new(
        session_id: impl Into<String>,
        bot_id: impl Into<String>,
        memory: Arc<dyn BotMemoryStore>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            bot_id: bot_id.into(),
            state: SessionState::default(),
            memory,
            inbound: None,
            cancel: CancellationToken::new(),
            depth: 0,
        }
    }

    pub fn with_state(mut self, state: SessionState) -> Self {
        self.state = state;
        self
    }

    pub fn with_inbound(mut self, text: Option<String>) -> Self {
        self.inbound = text;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Tool-call nesting level; 0 for a conversational turn.
    pub fn with_depth(mut self, depth: usize) -> Self {
        self.depth = depth;
        self
    }

    pub fn get(&self, name: &str) -> Result<&Value, RuntimeError> {
        self.state
            .bindings
            .get(name)
            .ok_or_else(|| RuntimeError::UndefinedVariable(name.to_string()))
    }

    pub fn set(&mut self, name: &str, value: Value) {
        self.state.bindings.insert(name.to_lowercase(), value);
    }

    /// Remove a binding, returning its value.
    pub fn unset(&mut self, name: &str) -> Option<Value> {
        self.state.bindings.shift_remove(name)
    }

    pub fn memory(&self) -> &Arc<dyn BotMemoryStore> {
        &self.memory
    }

    pub fn take_inbound(&mut self) -> Option<String> {
        self.inbound.take()
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn depth(&self) -> usize {
        self.depth
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("session_id", &self.session_id)
            .field("bot_id", &self.bot_id)
            .field("state", &self.state)
            .field("depth", &self.depth)
            .finish_non_exhaustive()
    }
}
