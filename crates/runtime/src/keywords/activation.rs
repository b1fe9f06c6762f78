//! Keywords that switch knowledge bases and tools on and off for the
//! current session. They only touch session state; the dispatch table and
//! the registry are never modified.

use super::{arg, done, Invocation, Keyword, KeywordOutcome};
use crate::error::RuntimeError;
use crate::value::Value;
use async_trait::async_trait;
use basic_dialog_parser::analysis::tool_name_for;
use tracing::debug;

pub struct UseKb;

#[async_trait]
impl Keyword for UseKb {
    fn name(&self) -> &'static str {
        "USE KB"
    }

    async fn invoke(
        &self,
        inv: Invocation<'_>,
        args: Vec<Value>,
    ) -> Result<KeywordOutcome, RuntimeError> {
        let collection = arg(&args, 0).to_string();
        debug!(session = %inv.ctx.session_id, %collection, "knowledge base activated");
        inv.ctx.state.active_kbs.insert(collection);
        done()
    }
}

/// `CLEAR KB [name]`: one collection, or all of them.
pub struct ClearKb;

#[async_trait]
impl Keyword for ClearKb {
    fn name(&self) -> &'static str {
        "CLEAR KB"
    }

    async fn invoke(
        &self,
        inv: Invocation<'_>,
        args: Vec<Value>,
    ) -> Result<KeywordOutcome, RuntimeError> {
        match args.first() {
            Some(name) => {
                inv.ctx.state.active_kbs.shift_remove(&name.to_string());
            }
            None => inv.ctx.state.active_kbs.clear(),
        }
        done()
    }
}

/// `USE TOOL name` accepts a tool name or a script file name.
pub struct UseTool;

#[async_trait]
impl Keyword for UseTool {
    fn name(&self) -> &'static str {
        "USE TOOL"
    }

    async fn invoke(
        &self,
        inv: Invocation<'_>,
        args: Vec<Value>,
    ) -> Result<KeywordOutcome, RuntimeError> {
        let tool = tool_name_for(&arg(&args, 0).to_string());
        debug!(session = %inv.ctx.session_id, %tool, "tool activated");
        inv.ctx.state.active_tools.insert(tool);
        done()
    }
}

pub struct ClearTools;

#[async_trait]
impl Keyword for ClearTools {
    fn name(&self) -> &'static str {
        "CLEAR TOOLS"
    }

    async fn invoke(
        &self,
        inv: Invocation<'_>,
        _args: Vec<Value>,
    ) -> Result<KeywordOutcome, RuntimeError> {
        inv.ctx.state.active_tools.clear();
        done()
    }
}
