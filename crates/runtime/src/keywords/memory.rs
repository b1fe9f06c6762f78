use super::{arg, done, Invocation, Keyword, KeywordOutcome};
use crate::error::RuntimeError;
use crate::retry::with_retry;
use crate::value::Value;
use async_trait::async_trait;

/// `SET BOT MEMORY key, value`: bot-wide, visible to every session.
pub struct SetBotMemory;

#[async_trait]
impl Keyword for SetBotMemory {
    fn name(&self) -> &'static str {
        "SET BOT MEMORY"
    }

    async fn invoke(
        &self,
        inv: Invocation<'_>,
        args: Vec<Value>,
    ) -> Result<KeywordOutcome, RuntimeError> {
        let key = arg(&args, 0).to_string();
        let value = arg(&args, 1).clone();
        let ctx = &*inv.ctx;
        let store = ctx.memory();
        with_retry(
            &inv.engine.config().retry,
            ctx.cancellation(),
            "set bot memory",
            || store.set(&ctx.bot_id, &key, value.clone()),
        )
        .await?;
        done()
    }
}

/// `x = GET BOT MEMORY key`, null when unset.
pub struct GetBotMemory;

#[async_trait]
impl Keyword for GetBotMemory {
    fn name(&self) -> &'static str {
        "GET BOT MEMORY"
    }

    async fn invoke(
        &self,
        inv: Invocation<'_>,
        args: Vec<Value>,
    ) -> Result<KeywordOutcome, RuntimeError> {
        let key = arg(&args, 0).to_string();
        let ctx = &*inv.ctx;
        let store = ctx.memory();
        let value = with_retry(
            &inv.engine.config().retry,
            ctx.cancellation(),
            "get bot memory",
            || store.get(&ctx.bot_id, &key),
        )
        .await?;
        Ok(KeywordOutcome::Value(value))
    }
}

/// `SET CONTEXT name, text` adds a named entry to the `LLM` system prompt.
pub struct SetContext;

#[async_trait]
impl Keyword for SetContext {
    fn name(&self) -> &'static str {
        "SET CONTEXT"
    }

    async fn invoke(
        &self,
        inv: Invocation<'_>,
        args: Vec<Value>,
    ) -> Result<KeywordOutcome, RuntimeError> {
        let name = arg(&args, 0).to_string();
        let text = arg(&args, 1).to_string();
        inv.ctx.state.context_entries.insert(name, text);
        done()
    }
}

pub struct ClearContext;

#[async_trait]
impl Keyword for ClearContext {
    fn name(&self) -> &'static str {
        "CLEAR CONTEXT"
    }

    async fn invoke(
        &self,
        inv: Invocation<'_>,
        _args: Vec<Value>,
    ) -> Result<KeywordOutcome, RuntimeError> {
        inv.ctx.state.context_entries.clear();
        done()
    }
}
