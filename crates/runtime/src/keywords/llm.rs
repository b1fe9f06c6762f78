//! `x = LLM prompt`
//!
//! Builds the conversation for one completion:
//!
//! 1. a system message with the session's `SET CONTEXT` entries,
//! 2. a system message with snippets from the active knowledge bases,
//! 3. the prompt as the user message,
//!
//! then offers the session's active tools to the model. Tool calls are
//! executed through the [`ToolHost`](crate::external::ToolHost) and their
//! results fed back until the model answers in text or
//! `engine.max_tool_rounds` completions have been made.

use super::{arg, Invocation, Keyword, KeywordOutcome};
use crate::error::RuntimeError;
use crate::external::{ChatMessage, Role, ToolCall};
use crate::retry::with_retry;
use crate::value::Value;
use async_trait::async_trait;
use indexmap::IndexMap;
use tracing::{debug, warn};

pub struct Llm;

#[async_trait]
impl Keyword for Llm {
    fn name(&self) -> &'static str {
        "LLM"
    }

    async fn invoke(
        &self,
        inv: Invocation<'_>,
        args: Vec<Value>,
    ) -> Result<KeywordOutcome, RuntimeError> {
        let prompt = arg(&args, 0).to_string();
        let ctx = &*inv.ctx;
        let collaborators = inv.engine.collaborators();
        let config = inv.engine.config();
        let cancel = ctx.cancellation();

        let mut messages = Vec::new();

        if !ctx.state.context_entries.is_empty() {
            let context = ctx
                .state
                .context_entries
                .iter()
                .map(|(name, text)| format!("{name}: {text}"))
                .collect::<Vec<_>>()
                .join("\n");
            messages.push(ChatMessage::new(Role::System, context));
        }

        if !ctx.state.active_kbs.is_empty() {
            let collections: Vec<String> = ctx.state.active_kbs.iter().cloned().collect();
            let snippets = with_retry(&config.retry, cancel, "knowledge search", || {
                collaborators.knowledge.search(&collections, &prompt)
            })
            .await?;
            if !snippets.is_empty() {
                let mut text = String::from("Relevant information:");
                for snippet in &snippets {
                    text.push_str("\n- ");
                    text.push_str(&snippet.content);
                }
                messages.push(ChatMessage::new(Role::System, text));
            }
        }

        messages.push(ChatMessage::new(Role::User, prompt.clone()));

        let active: Vec<String> = ctx.state.active_tools.iter().cloned().collect();
        let tools = if active.is_empty() {
            Vec::new()
        } else {
            inv.tools.tool_schemas(&ctx.bot_id, &active).await
        };

        let max_rounds = config.engine.max_tool_rounds.max(1);
        for round in 1..=max_rounds {
            let completion = with_retry(&config.retry, cancel, "LLM completion", || {
                collaborators.llm.complete(&messages, &tools)
            })
            .await?;

            if completion.tool_calls.is_empty() {
                return Ok(KeywordOutcome::Value(Value::String(completion.text)));
            }
            if round == max_rounds {
                warn!(
                    session = %ctx.session_id,
                    rounds = max_rounds,
                    "LLM still requesting tools after the last round, using its text"
                );
                return Ok(KeywordOutcome::Value(Value::String(completion.text)));
            }

            messages.push(ChatMessage::new(Role::Assistant, completion.text));
            for call in completion.tool_calls {
                let result = run_tool_call(&inv, &active, &call).await?;
                messages.push(ChatMessage::tool_result(call.tool_name, result));
            }
        }

        Ok(KeywordOutcome::Value(Value::Null))
    }
}

/// Execute one requested tool call and render its result for the model.
///
/// Tool failures are reported back to the model as text. Cancellation and
/// runaway nesting abort the turn.
async fn run_tool_call(
    inv: &Invocation<'_>,
    active: &[String],
    call: &ToolCall,
) -> Result<String, RuntimeError> {
    let ctx = &*inv.ctx;
    if !active.iter().any(|t| t == &call.tool_name) {
        warn!(session = %ctx.session_id, tool = %call.tool_name, "LLM requested an inactive tool");
        return Ok(format!("error: tool '{}' is not available", call.tool_name));
    }

    let arguments: IndexMap<String, Value> = call
        .arguments
        .iter()
        .map(|(k, v)| (k.clone(), Value::from_json(v.clone())))
        .collect();

    debug!(session = %ctx.session_id, tool = %call.tool_name, depth = ctx.depth() + 1, "calling tool");
    match inv
        .tools
        .call_tool(
            &ctx.bot_id,
            &ctx.session_id,
            &call.tool_name,
            arguments,
            ctx.depth() + 1,
            ctx.cancellation(),
        )
        .await
    {
        Ok(value) => Ok(match value {
            Value::String(s) => s,
            other => other.to_json().to_string(),
        }),
        Err(e @ (RuntimeError::Cancelled | RuntimeError::ToolDepthExceeded(_))) => Err(e),
        Err(e) => {
            warn!(session = %ctx.session_id, tool = %call.tool_name, error = %e, "tool call failed");
            Ok(format!("error: {e}"))
        }
    }
}
