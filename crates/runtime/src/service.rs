//! The runtime's front door: compile scripts, invoke them as tools, and
//! run conversational turns.
//!
//! [`DialogService`] owns the per-session turn locks. Turns of one session
//! run strictly one after another; different sessions run concurrently.
//! A suspended turn's [`Suspension`] is held here until the next turn of
//! the same session resumes it.

use crate::config::RuntimeConfig;
use crate::context::{ExecutionContext, SessionState};
use crate::engine::{Engine, RunOutcome, Start, SuspendReason, Suspension};
use crate::error::{DialogError, RuntimeError, ServiceError};
use crate::external::{Collaborators, SourceStore, ToolHost};
use crate::registry::{CompiledScript, ToolRegistry};
use crate::retry::with_retry;
use crate::value::{coerce, Value};
use crate::watcher::SCRIPT_EXTENSION;
use async_trait::async_trait;
use basic_dialog_parser::FunctionTool;
use chrono::Utc;
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

type SessionKey = (String, String);

#[derive(Debug, Default)]
struct SessionSlot {
    pending: Option<Suspension>,
}

#[derive(Debug, Clone, Default)]
struct SessionHandle {
    turn: Arc<tokio::sync::Mutex<SessionSlot>>,
    cancel: CancellationToken,
}

pub struct DialogService {
    registry: Arc<ToolRegistry>,
    sources: Arc<dyn SourceStore>,
    engine: Engine,
    config: Arc<RuntimeConfig>,
    sessions: Mutex<HashMap<SessionKey, SessionHandle>>,
}

impl DialogService {
    pub fn new(
        config: RuntimeConfig,
        sources: Arc<dyn SourceStore>,
        collaborators: Collaborators,
    ) -> Self {
        let config = Arc::new(config);
        Self {
            registry: Arc::new(ToolRegistry::new(&config.cache)),
            sources,
            engine: Engine::new(Arc::clone(&config), collaborators),
            config,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Share a registry between services, or inspect it from tests.
    pub fn with_registry(mut self, registry: Arc<ToolRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_engine(mut self, engine: Engine) -> Self {
        self.engine = engine;
        self
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn sources(&self) -> &Arc<dyn SourceStore> {
        &self.sources
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Fetch a script's current source and return its compilation.
    pub async fn compile(
        &self,
        bot_id: &str,
        script_path: &str,
    ) -> Result<Arc<CompiledScript>, DialogError> {
        let ticket = self.registry.ticket();
        let document = self
            .sources
            .get(bot_id, script_path)
            .await
            .map_err(|error| DialogError::Source {
                script_path: script_path.to_string(),
                error,
            })?;
        Ok(self
            .registry
            .compile_observed(
                bot_id,
                script_path,
                ticket,
                &document.bytes,
                &document.fingerprint,
            )
            .await?)
    }

    /// Run a discoverable script as a function call.
    ///
    /// Arguments are matched to parameters case-insensitively and coerced to
    /// the declared types. The run gets its own session and must finish
    /// without waiting for user input.
    pub async fn invoke_tool(
        &self,
        bot_id: &str,
        tool_name: &str,
        arguments: IndexMap<String, Value>,
    ) -> Result<Value, RuntimeError> {
        let session_id = format!("tool:{}", Uuid::new_v4());
        self.invoke_tool_in(
            bot_id,
            &session_id,
            tool_name,
            arguments,
            1,
            &CancellationToken::new(),
        )
        .await
    }

    async fn invoke_tool_in(
        &self,
        bot_id: &str,
        session_id: &str,
        tool_name: &str,
        arguments: IndexMap<String, Value>,
        depth: usize,
        cancel: &CancellationToken,
    ) -> Result<Value, RuntimeError> {
        let max_depth = self.config.engine.max_tool_depth;
        if depth > max_depth {
            return Err(RuntimeError::ToolDepthExceeded(max_depth));
        }

        let compiled = self.resolve_tool(bot_id, tool_name).await?;

        let mut ctx = ExecutionContext::new(
            session_id,
            bot_id,
            Arc::clone(&self.engine.collaborators().memory),
        )
        .with_depth(depth)
        .with_cancellation(cancel.child_token());

        for param in &compiled.signature.parameters {
            let supplied = arguments
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(&param.name))
                .map(|(_, value)| value);
            match supplied {
                Some(value) if *value != Value::Null => {
                    ctx.set(&param.name, coerce(value, param.ty)?);
                }
                _ if param.required => {
                    return Err(RuntimeError::MissingArgument {
                        tool: tool_name.to_string(),
                        argument: param.name.clone(),
                    });
                }
                _ => ctx.set(&param.name, Value::Null),
            }
        }

        info!(bot = bot_id, tool = tool_name, depth, "invoking tool");
        match self.engine.run(&compiled, &mut ctx, Start::Fresh, self).await {
            RunOutcome::Completed(value) => Ok(value),
            RunOutcome::Suspended(_) => Err(RuntimeError::ToolSuspended(tool_name.to_string())),
            RunOutcome::Failed(error) => Err(error),
        }
    }

    /// Compile the script behind `tool_name` from its current source.
    ///
    /// A tool not currently listed, e.g. because its source changed and has
    /// not been recompiled yet, is looked up by the script it was last
    /// compiled from, then by `<tool_name>.bas` at the bot's top level.
    async fn resolve_tool(
        &self,
        bot_id: &str,
        tool_name: &str,
    ) -> Result<Arc<CompiledScript>, RuntimeError> {
        let unknown = || RuntimeError::UnknownTool(tool_name.to_string());
        let script_path = match self.registry.find_tool(bot_id, tool_name) {
            Some(listed) => listed.script_path.clone(),
            None => self
                .registry
                .script_for_tool(bot_id, tool_name)
                .unwrap_or_else(|| format!("{}{}", tool_name, SCRIPT_EXTENSION)),
        };
        let compiled = match self.compile(bot_id, &script_path).await {
            Ok(compiled) => compiled,
            Err(DialogError::Source {
                error: ServiceError::NotFound(_),
                ..
            }) => return Err(unknown()),
            Err(e) => return Err(e.into()),
        };
        if compiled.is_discoverable() && compiled.tool_name() == tool_name {
            Ok(compiled)
        } else {
            Err(unknown())
        }
    }

    /// Run one conversational turn of `session_id` against `script_path`.
    ///
    /// A pending suspension for the session is resumed with `inbound` as the
    /// user's reply. Without one the script starts from the top and
    /// `inbound` is not used. If the script changed since the session
    /// suspended, the stale continuation is discarded and the script
    /// restarts. A session left with nothing pending is dropped.
    pub async fn run_script(
        &self,
        bot_id: &str,
        session_id: &str,
        script_path: &str,
        inbound: Option<String>,
    ) -> RunOutcome {
        let handle = self.session(bot_id, session_id);
        let outcome = self
            .turn(&handle, bot_id, session_id, script_path, inbound)
            .await;
        if !matches!(outcome, RunOutcome::Suspended(_)) {
            self.release(bot_id, session_id, handle);
        }
        outcome
    }

    async fn turn(
        &self,
        handle: &SessionHandle,
        bot_id: &str,
        session_id: &str,
        script_path: &str,
        inbound: Option<String>,
    ) -> RunOutcome {
        let mut slot = handle.turn.lock().await;

        let compiled = match self.compile(bot_id, script_path).await {
            Ok(compiled) => compiled,
            Err(e) => {
                slot.pending = None;
                let error = RuntimeError::from(e);
                self.report_failure(bot_id, session_id, script_path, &error).await;
                return RunOutcome::Failed(error);
            }
        };

        let (start, state, inbound) = match slot.pending.take() {
            Some(pending) if pending.continuation.matches(&compiled) => {
                if let SuspendReason::Sleeping { until } = pending.reason {
                    if until > Utc::now() {
                        debug!(session = session_id, %until, "still sleeping");
                        slot.pending = Some(pending.clone());
                        return RunOutcome::Suspended(pending);
                    }
                }
                let continuation = pending.continuation;
                (Start::Resume(continuation.frames), continuation.state, inbound)
            }
            Some(stale) => {
                warn!(
                    bot = bot_id,
                    session = session_id,
                    script = script_path,
                    suspended_on = %stale.continuation.script_path,
                    "script changed while the session was suspended, restarting"
                );
                (Start::Fresh, SessionState::default(), None)
            }
            None => (Start::Fresh, SessionState::default(), None),
        };

        let mut ctx = ExecutionContext::new(
            session_id,
            bot_id,
            Arc::clone(&self.engine.collaborators().memory),
        )
        .with_state(state)
        .with_inbound(inbound)
        .with_cancellation(handle.cancel.clone());

        let outcome = self.engine.run(&compiled, &mut ctx, start, self).await;
        match &outcome {
            RunOutcome::Suspended(suspension) => slot.pending = Some(suspension.clone()),
            RunOutcome::Completed(_) => {}
            RunOutcome::Failed(error) => {
                self.report_failure(bot_id, session_id, script_path, error)
                    .await
            }
        }
        outcome
    }

    /// The suspension a session's next turn would resume, if any.
    pub async fn pending(&self, bot_id: &str, session_id: &str) -> Option<Suspension> {
        let handle = self.find_session(bot_id, session_id)?;
        let slot = handle.turn.lock().await;
        slot.pending.clone()
    }

    /// Number of sessions currently tracked: running, queued, or suspended.
    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Cancel the session's running turn and forget its suspension.
    pub fn cancel_session(&self, bot_id: &str, session_id: &str) -> bool {
        let removed = self
            .sessions
            .lock()
            .remove(&(bot_id.to_string(), session_id.to_string()));
        match removed {
            Some(handle) => {
                info!(bot = bot_id, session = session_id, "session cancelled");
                handle.cancel.cancel();
                true
            }
            None => false,
        }
    }

    async fn report_failure(
        &self,
        bot_id: &str,
        session_id: &str,
        script_path: &str,
        failure: &RuntimeError,
    ) {
        error!(
            bot = bot_id,
            session = session_id,
            script = script_path,
            error = %failure,
            "turn failed"
        );
        if *failure == RuntimeError::Cancelled {
            return;
        }
        let transport = &self.engine.collaborators().transport;
        let message = self.config.fallback_message.as_str();
        let sent = with_retry(
            &self.config.retry,
            &CancellationToken::new(),
            "send fallback message",
            || transport.send(session_id, message),
        )
        .await;
        if let Err(e) = sent {
            warn!(session = session_id, error = %e, "could not deliver fallback message");
        }
    }

    fn session(&self, bot_id: &str, session_id: &str) -> SessionHandle {
        self.sessions
            .lock()
            .entry((bot_id.to_string(), session_id.to_string()))
            .or_default()
            .clone()
    }

    /// Drop an idle session. Handles are only cloned under the sessions
    /// lock, so a count of two (the map and `handle`) means no other turn is
    /// queued on it.
    fn release(&self, bot_id: &str, session_id: &str, handle: SessionHandle) {
        let key = (bot_id.to_string(), session_id.to_string());
        let mut sessions = self.sessions.lock();
        let idle = sessions.get(&key).is_some_and(|current| {
            Arc::ptr_eq(&current.turn, &handle.turn) && Arc::strong_count(&handle.turn) == 2
        });
        if idle {
            sessions.remove(&key);
            debug!(bot = bot_id, session = session_id, "session released");
        }
    }

    fn find_session(&self, bot_id: &str, session_id: &str) -> Option<SessionHandle> {
        self.sessions
            .lock()
            .get(&(bot_id.to_string(), session_id.to_string()))
            .cloned()
    }
}

impl std::fmt::Debug for DialogService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DialogService")
            .field("registry", &self.registry)
            .field("sessions", &self.sessions.lock().len())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ToolHost for DialogService {
    async fn tool_schemas(&self, bot_id: &str, tool_names: &[String]) -> Vec<FunctionTool> {
        self.registry
            .tools(bot_id)
            .into_iter()
            .filter(|compiled| tool_names.iter().any(|name| name == compiled.tool_name()))
            .map(|compiled| compiled.schemas.function.clone())
            .collect()
    }

    async fn call_tool(
        &self,
        bot_id: &str,
        session_id: &str,
        tool_name: &str,
        arguments: IndexMap<String, Value>,
        depth: usize,
        cancel: &CancellationToken,
    ) -> Result<Value, RuntimeError> {
        self.invoke_tool_in(bot_id, session_id, tool_name, arguments, depth, cancel)
            .await
    }
}
