//! The suspendable tree-walking interpreter.
//!
//! The engine walks a compiled script with an explicit stack of
//! [`Frame`]s instead of native recursion. When a statement must wait for
//! the outside world (`HEAR` without input, a long `WAIT`) the stack and the
//! session state are packed into a serializable [`Continuation`] and the run
//! returns [`RunOutcome::Suspended`]. Passing the frames back with
//! [`Start::Resume`] continues exactly where the run stopped.
//!
//! # Budget
//!
//! Every executed statement and every loop re-entry costs one step. A run
//! that exceeds `engine.step_budget` fails with
//! [`RuntimeError::StepBudgetExceeded`], which bounds runaway loops.
//!
//! # Procedures
//!
//! `CALL` pushes a frame rooted at the procedure body. Parameters are bound
//! as ordinary variables; the bindings they shadow are kept in the frame and
//! put back when the procedure returns, so recursion sees its own
//! arguments. Call depth is capped at [`MAX_CALL_DEPTH`].
//!
//! # Errors
//!
//! After `ON ERROR RESUME NEXT` a statement that fails with a resumable
//! [`RuntimeError`] is logged and skipped. `ON ERROR GOTO 0` turns this off.
//!
//! # Cancellation
//!
//! The context's cancellation token is checked between statements and
//! raced against every external call, so a cancelled turn stops within one
//! statement or one call.

mod eval;
mod frames;

pub use eval::{condition, eval};
pub use frames::{Frame, FrameKind, PathStep};

use crate::config::RuntimeConfig;
use crate::context::{ExecutionContext, SessionState};
use crate::error::RuntimeError;
use crate::external::{Collaborators, ToolHost};
use crate::input::{self, Expected};
use crate::keywords::{Invocation, KeywordOutcome, KeywordTable};
use crate::registry::CompiledScript;
use crate::retry::with_retry;
use crate::value::{as_number, loosely_equal, Value};
use basic_dialog_parser::ast::{Expr, InputSpec, Script, Spanned, Stmt};
use basic_dialog_parser::parser::MAX_NESTING_DEPTH;
use basic_dialog_parser::catalogue;
use chrono::{DateTime, Utc};
use frames::{counter_value, in_range, owner};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Deepest chain of active `CALL`s.
pub const MAX_CALL_DEPTH: usize = MAX_NESTING_DEPTH;

/// Why a run stopped before finishing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SuspendReason {
    /// A `HEAR` needs the user's next message.
    AwaitingInput { variable: String },
    /// A `WAIT` longer than the inline limit.
    Sleeping { until: DateTime<Utc> },
}

/// Everything needed to resume a suspended run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Continuation {
    pub script_path: String,
    /// Fingerprint of the compiled script the frames refer to. A
    /// continuation is only valid against that exact compilation.
    pub fingerprint: String,
    pub frames: Vec<Frame>,
    pub state: SessionState,
}

impl Continuation {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    /// Whether this continuation can resume `compiled`.
    pub fn matches(&self, compiled: &CompiledScript) -> bool {
        self.script_path == compiled.script_path && self.fingerprint == compiled.fingerprint
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suspension {
    pub reason: SuspendReason,
    pub continuation: Continuation,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// The script returned or ran off its end (null).
    Completed(Value),
    Suspended(Suspension),
    Failed(RuntimeError),
}

/// Where a run begins.
#[derive(Debug, Clone, PartialEq)]
pub enum Start {
    Fresh,
    Resume(Vec<Frame>),
}

enum Halt {
    Completed(Value),
    Suspended(SuspendReason),
}

enum Flow {
    Next,
    Halt(Halt),
}

/// Executes compiled scripts. Cheap to share; holds no per-run state.
#[derive(Debug, Clone)]
pub struct Engine {
    keywords: Arc<KeywordTable>,
    config: Arc<RuntimeConfig>,
    collaborators: Collaborators,
}

impl Engine {
    pub fn new(config: Arc<RuntimeConfig>, collaborators: Collaborators) -> Self {
        Self {
            keywords: KeywordTable::shared(),
            config,
            collaborators,
        }
    }

    /// Replace the built-in keyword table.
    pub fn with_keywords(mut self, keywords: Arc<KeywordTable>) -> Self {
        self.keywords = keywords;
        self
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn collaborators(&self) -> &Collaborators {
        &self.collaborators
    }

    /// Run `compiled` until it completes, suspends, or fails.
    ///
    /// The caller seeds `ctx` with bindings (tool arguments, resumed state)
    /// and any inbound user text before the call.
    pub async fn run(
        &self,
        compiled: &CompiledScript,
        ctx: &mut ExecutionContext,
        start: Start,
        tools: &dyn ToolHost,
    ) -> RunOutcome {
        let mut frames = match start {
            Start::Fresh => vec![Frame::root()],
            Start::Resume(frames) => frames,
        };
        let mut offset = 0;

        match self
            .drive(&compiled.script, ctx, &mut frames, &mut offset, tools)
            .await
        {
            Ok(Halt::Completed(value)) => {
                debug!(script = %compiled.script_path, session = %ctx.session_id, "run completed");
                RunOutcome::Completed(value)
            }
            Ok(Halt::Suspended(reason)) => {
                debug!(script = %compiled.script_path, session = %ctx.session_id, ?reason, "run suspended");
                RunOutcome::Suspended(Suspension {
                    reason,
                    continuation: Continuation {
                        script_path: compiled.script_path.clone(),
                        fingerprint: compiled.fingerprint.clone(),
                        frames,
                        state: ctx.state.clone(),
                    },
                })
            }
            Err(error) => {
                warn!(
                    script = %compiled.script_path,
                    session = %ctx.session_id,
                    line = compiled.script.line_of(offset),
                    %error,
                    "run failed"
                );
                RunOutcome::Failed(error)
            }
        }
    }

    async fn drive(
        &self,
        script: &Script,
        ctx: &mut ExecutionContext,
        frames: &mut Vec<Frame>,
        offset: &mut usize,
        tools: &dyn ToolHost,
    ) -> Result<Halt, RuntimeError> {
        let budget = self.config.engine.step_budget;
        let mut steps: u64 = 0;

        loop {
            if ctx.is_cancelled() {
                return Err(RuntimeError::Cancelled);
            }
            let Some(frame) = frames.last_mut() else {
                return Ok(Halt::Completed(Value::Null));
            };

            steps += 1;
            if steps > budget {
                return Err(RuntimeError::StepBudgetExceeded { budget });
            }

            let block = frame.block(script)?;
            let Some(stmt) = block.get(frame.pc) else {
                self.finish_block(script, ctx, frames)?;
                continue;
            };
            let index = frame.pc;
            frame.pc += 1;
            *offset = stmt.span.start;
            trace!(line = script.line_of(stmt.span.start), "step");

            match self.exec(script, stmt, index, ctx, frames, tools).await {
                Ok(Flow::Next) => {}
                Ok(Flow::Halt(halt)) => return Ok(halt),
                Err(error) if ctx.state.resume_on_error && error.is_resumable() => {
                    warn!(
                        session = %ctx.session_id,
                        line = script.line_of(stmt.span.start),
                        %error,
                        "statement failed, resuming at the next one"
                    );
                }
                Err(error) => return Err(error),
            }
        }
    }

    /// The top frame ran off the end of its block: loop again or pop.
    fn finish_block(
        &self,
        script: &Script,
        ctx: &mut ExecutionContext,
        frames: &mut Vec<Frame>,
    ) -> Result<(), RuntimeError> {
        let Some(frame) = frames.last_mut() else {
            return Ok(());
        };
        let repeat = match &mut frame.kind {
            FrameKind::Block => false,
            FrameKind::Counted {
                var,
                start,
                end,
                step,
                iteration,
            } => {
                *iteration += 1;
                let current = counter_value(*start, *step, *iteration);
                let repeat = in_range(current, *end, *step);
                if repeat {
                    ctx.set(var, Value::Number(current));
                }
                repeat
            }
            FrameKind::Each { var, items, index } => {
                *index += 1;
                match items.get(*index) {
                    Some(item) => {
                        ctx.set(var, item.clone());
                        true
                    }
                    None => false,
                }
            }
            FrameKind::Conditional => match owner(script, frame.procedure, &frame.path)? {
                Stmt::While { cond, .. } => condition(cond, ctx)?,
                _ => {
                    return Err(RuntimeError::InvalidContinuation(
                        "loop frame is not inside a WHILE".to_string(),
                    ))
                }
            },
            FrameKind::Call { .. } => false,
        };

        if repeat {
            frame.pc = 0;
        } else if let Some(done) = frames.pop() {
            if let FrameKind::Call { target, saved } = done.kind {
                leave_call(ctx, target, saved, Value::Null);
            }
        }
        Ok(())
    }

    async fn exec(
        &self,
        script: &Script,
        stmt: &Spanned<Stmt>,
        index: usize,
        ctx: &mut ExecutionContext,
        frames: &mut Vec<Frame>,
        tools: &dyn ToolHost,
    ) -> Result<Flow, RuntimeError> {
        match &stmt.node {
            Stmt::Talk(expr) => {
                let text = eval(expr, ctx)?.to_string();
                self.send(ctx, &text).await?;
            }

            Stmt::Hear { target, input } => {
                let expected = match input {
                    InputSpec::Any => Expected::Any,
                    InputSpec::Typed(ty) => Expected::Typed(*ty),
                    InputSpec::Menu(options) => Expected::Menu(menu_options(options, ctx)?),
                };
                let suspend = || {
                    Flow::Halt(Halt::Suspended(SuspendReason::AwaitingInput {
                        variable: target.node.clone(),
                    }))
                };
                let Some(reply) = ctx.take_inbound() else {
                    rewind(frames);
                    return Ok(suspend());
                };
                match input::validate(&reply, &expected) {
                    Ok(value) => ctx.set(&target.node, value),
                    Err(reprompt) => {
                        debug!(session = %ctx.session_id, variable = %target.node, "input rejected");
                        self.send(ctx, &reprompt).await?;
                        rewind(frames);
                        return Ok(suspend());
                    }
                }
            }

            Stmt::Assign { target, value } => {
                let value = eval(value, ctx)?;
                ctx.set(&target.node, value);
            }

            Stmt::If {
                branches,
                else_body,
            } => {
                let mut chosen = None;
                for (arm, branch) in branches.iter().enumerate() {
                    if condition(&branch.cond, ctx)? {
                        chosen = Some(arm);
                        break;
                    }
                }
                let arm = chosen.or(else_body.as_ref().map(|_| branches.len()));
                if let Some(arm) = arm {
                    enter(frames, index, arm, FrameKind::Block);
                }
            }

            Stmt::For {
                var,
                start,
                end,
                step,
                ..
            } => {
                let start = as_number(&eval(start, ctx)?)?;
                let end = as_number(&eval(end, ctx)?)?;
                let step = match step {
                    Some(step) => as_number(&eval(step, ctx)?)?,
                    None => 1.0,
                };
                if step == 0.0 || !step.is_finite() {
                    return Err(RuntimeError::InvalidArgument {
                        function: "FOR".to_string(),
                        message: "STEP must be a non-zero number".to_string(),
                    });
                }
                if in_range(start, end, step) {
                    ctx.set(&var.node, Value::Number(start));
                    enter(
                        frames,
                        index,
                        0,
                        FrameKind::Counted {
                            var: var.node.clone(),
                            start,
                            end,
                            step,
                            iteration: 0,
                        },
                    );
                }
            }

            Stmt::ForEach { var, iterable, .. } => {
                let items = match eval(iterable, ctx)? {
                    Value::List(items) => items,
                    Value::Null => Vec::new(),
                    other => {
                        return Err(RuntimeError::TypeMismatch(format!(
                            "FOR EACH needs a list, got a {}",
                            other.type_name()
                        )))
                    }
                };
                if let Some(first) = items.first() {
                    ctx.set(&var.node, first.clone());
                    enter(
                        frames,
                        index,
                        0,
                        FrameKind::Each {
                            var: var.node.clone(),
                            items,
                            index: 0,
                        },
                    );
                }
            }

            Stmt::While { cond, .. } => {
                if condition(cond, ctx)? {
                    enter(frames, index, 0, FrameKind::Conditional);
                }
            }

            Stmt::SelectCase {
                subject,
                cases,
                else_body,
            } => {
                let subject = eval(subject, ctx)?;
                let mut chosen = None;
                'cases: for (arm, case) in cases.iter().enumerate() {
                    for value in &case.values {
                        if loosely_equal(&subject, &eval(value, ctx)?) {
                            chosen = Some(arm);
                            break 'cases;
                        }
                    }
                }
                let arm = chosen.or(else_body.as_ref().map(|_| cases.len()));
                if let Some(arm) = arm {
                    enter(frames, index, arm, FrameKind::Block);
                }
            }

            Stmt::Keyword(call) => {
                let keyword = self
                    .keywords
                    .get(&call.name)
                    .ok_or_else(|| RuntimeError::UnknownKeyword(call.name.clone()))?;
                if let Some(spec) = catalogue::lookup(&call.name) {
                    if !(spec.min_args..=spec.max_args).contains(&call.args.len()) {
                        return Err(RuntimeError::InvalidArgument {
                            function: call.name.clone(),
                            message: format!(
                                "expected {} argument(s), got {}",
                                spec.arity(),
                                call.args.len()
                            ),
                        });
                    }
                }
                let args = call
                    .args
                    .iter()
                    .map(|arg| eval(arg, ctx))
                    .collect::<Result<Vec<_>, _>>()?;

                let invocation = Invocation {
                    ctx: &mut *ctx,
                    engine: self,
                    tools,
                };
                match keyword.invoke(invocation, args).await? {
                    KeywordOutcome::Value(value) => {
                        if let Some(target) = &call.target {
                            ctx.set(&target.node, value);
                        }
                    }
                    KeywordOutcome::Suspend(reason) => {
                        return Ok(Flow::Halt(Halt::Suspended(reason)));
                    }
                }
            }

            Stmt::Expression(expr) => {
                eval(expr, ctx)?;
            }

            Stmt::Exit(kind) => {
                while let Some(frame) = frames.pop() {
                    if frame.kind.exits_on(*kind) {
                        break;
                    }
                }
            }

            Stmt::Return(value) => {
                let value = match value {
                    Some(expr) => eval(expr, ctx)?,
                    None => Value::Null,
                };
                if frames.last().is_some_and(|f| f.procedure.is_some()) {
                    while let Some(frame) = frames.pop() {
                        if let FrameKind::Call { target, saved } = frame.kind {
                            leave_call(ctx, target, saved, value);
                            return Ok(Flow::Next);
                        }
                    }
                }
                return Ok(Flow::Halt(Halt::Completed(value)));
            }

            Stmt::Call { name, args, target } => {
                let procedure_index = script
                    .procedure(&name.node)
                    .ok_or_else(|| RuntimeError::UnknownProcedure(name.node.clone()))?;
                let procedure = &script.procedures[procedure_index];
                if procedure.params.len() != args.len() {
                    return Err(RuntimeError::InvalidArgument {
                        function: name.node.clone(),
                        message: format!(
                            "expected {} argument(s), got {}",
                            procedure.params.len(),
                            args.len()
                        ),
                    });
                }
                let active = frames
                    .iter()
                    .filter(|f| matches!(f.kind, FrameKind::Call { .. }))
                    .count();
                if active >= MAX_CALL_DEPTH {
                    return Err(RuntimeError::CallDepthExceeded(MAX_CALL_DEPTH));
                }

                let values = args
                    .iter()
                    .map(|arg| eval(arg, ctx))
                    .collect::<Result<Vec<_>, _>>()?;
                let saved = procedure
                    .params
                    .iter()
                    .map(|p| (p.node.clone(), ctx.state.bindings.get(&p.node).cloned()))
                    .collect();
                for (param, value) in procedure.params.iter().zip(values) {
                    ctx.set(&param.node, value);
                }
                trace!(procedure = %name.node, depth = active + 1, "call");
                frames.push(Frame::call(
                    procedure_index,
                    FrameKind::Call {
                        target: target.as_ref().map(|t| t.node.clone()),
                        saved,
                    },
                ));
            }

            Stmt::OnError { resume_next } => {
                ctx.state.resume_on_error = *resume_next;
            }
        }
        Ok(Flow::Next)
    }

    async fn send(&self, ctx: &ExecutionContext, text: &str) -> Result<(), RuntimeError> {
        let transport = &self.collaborators.transport;
        with_retry(&self.config.retry, ctx.cancellation(), "send message", || {
            transport.send(&ctx.session_id, text)
        })
        .await
    }
}

/// Push a frame for arm `arm` of statement `index` in the current block.
fn enter(frames: &mut Vec<Frame>, index: usize, arm: usize, kind: FrameKind) {
    if let Some(parent) = frames.last() {
        let child = parent.child(index, arm, kind);
        frames.push(child);
    }
}

/// Put back the bindings a procedure's parameters shadowed, then deliver
/// its result.
fn leave_call(
    ctx: &mut ExecutionContext,
    target: Option<String>,
    saved: Vec<(String, Option<Value>)>,
    value: Value,
) {
    for (name, previous) in saved {
        match previous {
            Some(previous) => ctx.set(&name, previous),
            None => {
                ctx.unset(&name);
            }
        }
    }
    if let Some(target) = target {
        ctx.set(&target, value);
    }
}

/// Point the top frame back at the statement that just ran, so a resumed
/// run executes it again.
fn rewind(frames: &mut [Frame]) {
    if let Some(frame) = frames.last_mut() {
        frame.pc = frame.pc.saturating_sub(1);
    }
}

/// Menu options; list values contribute each of their items.
fn menu_options(
    options: &[Spanned<Expr>],
    ctx: &ExecutionContext,
) -> Result<Vec<String>, RuntimeError> {
    let mut labels = Vec::new();
    for option in options {
        match eval(option, ctx)? {
            Value::List(items) => labels.extend(items.iter().map(Value::to_string)),
            value => labels.push(value.to_string()),
        }
    }
    Ok(labels)
}
