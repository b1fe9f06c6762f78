//! The keyword dispatch table.
//!
//! Maps each catalogue phrase (`PRINT`, `SET BOT MEMORY`, `LLM`, ...) to
//! its implementation. The table is built once and shared read-only by
//! every engine; keywords that activate tools or knowledge bases change the
//! [`ExecutionContext`], never the table.
//!
//! # Adding a keyword
//!
//! Implement [`Keyword`] and register it in [`KeywordTable::builtin`]. The
//! phrase must also appear in the parser's catalogue so scripts can call it.

mod activation;
mod conversation;
mod http;
mod llm;
mod memory;

use crate::context::ExecutionContext;
use crate::engine::{Engine, SuspendReason};
use crate::error::RuntimeError;
use crate::external::ToolHost;
use crate::value::Value;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

/// What a keyword produced.
#[derive(Debug, Clone, PartialEq)]
pub enum KeywordOutcome {
    Value(Value),
    /// Stop the run here; the statement counts as done.
    Suspend(SuspendReason),
}

/// Everything a keyword may touch during one call.
pub struct Invocation<'a> {
    pub ctx: &'a mut ExecutionContext,
    pub engine: &'a Engine,
    pub tools: &'a dyn ToolHost,
}

#[async_trait]
pub trait Keyword: Send + Sync {
    /// Canonical phrase, upper case.
    fn name(&self) -> &'static str;

    /// Arguments arrive evaluated and already checked against the catalogue arity.
    async fn invoke(
        &self,
        inv: Invocation<'_>,
        args: Vec<Value>,
    ) -> Result<KeywordOutcome, RuntimeError>;
}

pub struct KeywordTable {
    entries: HashMap<&'static str, Arc<dyn Keyword>>,
}

static BUILTIN: LazyLock<Arc<KeywordTable>> = LazyLock::new(|| Arc::new(KeywordTable::builtin()));

impl KeywordTable {
    pub fn empty() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// A table with every built-in keyword.
    pub fn builtin() -> Self {
        let mut table = Self::empty();
        table.register(conversation::Print);
        table.register(conversation::Wait);
        table.register(memory::SetBotMemory);
        table.register(memory::GetBotMemory);
        table.register(memory::SetContext);
        table.register(memory::ClearContext);
        table.register(activation::UseKb);
        table.register(activation::ClearKb);
        table.register(activation::UseTool);
        table.register(activation::ClearTools);
        table.register(llm::Llm);
        table.register(http::Get);
        table.register(http::Post);
        table
    }

    /// The process-wide built-in table.
    pub fn shared() -> Arc<KeywordTable> {
        Arc::clone(&BUILTIN)
    }

    pub fn register(&mut self, keyword: impl Keyword + 'static) {
        self.entries.insert(keyword.name(), Arc::new(keyword));
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Keyword>> {
        self.entries.get(name)
    }

    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.entries.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for KeywordTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeywordTable")
            .field("keywords", &self.names())
            .finish()
    }
}

static NULL: Value = Value::Null;

/// Positional argument, or null if absent.
fn arg(args: &[Value], index: usize) -> &Value {
    args.get(index).unwrap_or(&NULL)
}

fn done() -> Result<KeywordOutcome, RuntimeError> {
    Ok(KeywordOutcome::Value(Value::Null))
}

#[cfg(test)]
mod tests {
    use super::*;
    use basic_dialog_parser::catalogue::CATALOGUE;

    #[test]
    fn test_every_catalogue_phrase_is_dispatchable() {
        let table = KeywordTable::builtin();
        for spec in CATALOGUE {
            assert!(table.get(spec.name).is_some(), "{} has no implementation", spec.name);
        }
        assert_eq!(table.names().len(), CATALOGUE.len());
    }

    #[test]
    fn test_shared_table_is_one_instance() {
        assert!(Arc::ptr_eq(&KeywordTable::shared(), &KeywordTable::shared()));
    }
}
