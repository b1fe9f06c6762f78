//! The engine's explicit control stack.
//!
//! A frame names the block it is executing by a path of
//! `(statement index, arm)` steps from the script body or from a procedure
//! body, never by pointer, so the whole stack serializes into a
//! [`Continuation`](super::Continuation).

use crate::error::RuntimeError;
use crate::value::Value;
use basic_dialog_parser::ast::{Block, LoopKind, Script, Stmt};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathStep {
    /// Statement within the parent block.
    pub index: usize,
    /// Which nested block of that statement; see [`Stmt::child_block`].
    pub arm: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Procedure whose body the path starts from; `None` for the script body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub procedure: Option<usize>,
    pub path: Vec<PathStep>,
    /// Next statement to execute in the block.
    pub pc: usize,
    pub kind: FrameKind,
}

/// What happens when a frame runs off the end of its block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FrameKind {
    /// Pop.
    Block,
    /// `FOR var = start TO end STEP step`: repeat while
    /// `start + iteration * step` is in range.
    Counted {
        var: String,
        start: f64,
        end: f64,
        step: f64,
        iteration: u64,
    },
    /// `FOR EACH`: bind the next item and repeat.
    Each {
        var: String,
        items: Vec<Value>,
        index: usize,
    },
    /// `WHILE` / `DO`: re-check the owning statement's condition.
    Conditional,
    /// A procedure body entered by `CALL`. Leaving it restores the
    /// bindings its parameters shadowed and, for `x = CALL f()`, assigns
    /// the returned value to `target`.
    Call {
        target: Option<String>,
        saved: Vec<(String, Option<Value>)>,
    },
}

impl FrameKind {
    pub fn exits_on(&self, kind: LoopKind) -> bool {
        matches!(
            (self, kind),
            (FrameKind::Counted { .. } | FrameKind::Each { .. }, LoopKind::For)
                | (FrameKind::Conditional, LoopKind::Conditional)
        )
    }
}

impl Frame {
    pub fn root() -> Self {
        Self {
            procedure: None,
            path: Vec::new(),
            pc: 0,
            kind: FrameKind::Block,
        }
    }

    /// Frame running the body of procedure `procedure`.
    pub fn call(procedure: usize, kind: FrameKind) -> Self {
        Self {
            procedure: Some(procedure),
            path: Vec::new(),
            pc: 0,
            kind,
        }
    }

    /// Frame for arm `arm` of statement `index` in this frame's block.
    pub fn child(&self, index: usize, arm: usize, kind: FrameKind) -> Self {
        let mut path = self.path.clone();
        path.push(PathStep { index, arm });
        Self {
            procedure: self.procedure,
            path,
            pc: 0,
            kind,
        }
    }

    pub fn block<'s>(&self, script: &'s Script) -> Result<&'s Block, RuntimeError> {
        resolve_block(script, self.procedure, &self.path)
    }

    /// The compound statement that owns this frame's block.
    pub fn owner<'s>(&self, script: &'s Script) -> Result<&'s Stmt, RuntimeError> {
        owner(script, self.procedure, &self.path)
    }
}

/// Value of a counted loop variable on iteration `iteration`.
///
/// Derived from the start each time so float steps do not accumulate error.
pub fn counter_value(start: f64, step: f64, iteration: u64) -> f64 {
    start + iteration as f64 * step
}

/// Whether a counted loop at `current` should run another iteration.
pub fn in_range(current: f64, end: f64, step: f64) -> bool {
    // Tolerate rounding in `start + n * step` landing just past `end`.
    let slack = step.abs() * 1e-9;
    if step > 0.0 {
        current <= end + slack
    } else {
        current >= end - slack
    }
}

pub fn resolve_block<'s>(
    script: &'s Script,
    procedure: Option<usize>,
    path: &[PathStep],
) -> Result<&'s Block, RuntimeError> {
    let mut block = match procedure {
        None => &script.body,
        Some(index) => {
            &script
                .procedures
                .get(index)
                .ok_or_else(|| {
                    RuntimeError::InvalidContinuation(format!("no procedure #{}", index))
                })?
                .body
        }
    };
    for step in path {
        block = block
            .get(step.index)
            .and_then(|stmt| stmt.node.child_block(step.arm))
            .ok_or_else(|| invalid(path))?;
    }
    Ok(block)
}

/// The compound statement that owns the block at `path`.
pub fn owner<'s>(
    script: &'s Script,
    procedure: Option<usize>,
    path: &[PathStep],
) -> Result<&'s Stmt, RuntimeError> {
    let (last, parent) = path.split_last().ok_or_else(|| invalid(path))?;
    resolve_block(script, procedure, parent)?
        .get(last.index)
        .map(|stmt| &stmt.node)
        .ok_or_else(|| invalid(path))
}

fn invalid(path: &[PathStep]) -> RuntimeError {
    let steps: Vec<String> = path
        .iter()
        .map(|s| format!("{}:{}", s.index, s.arm))
        .collect();
    RuntimeError::InvalidContinuation(format!("no block at path [{}]", steps.join(", ")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn script(source: &str) -> Script {
        basic_dialog_parser::compile(source, "t.bas").unwrap().script
    }

    #[test]
    fn test_resolve_nested_blocks() {
        let s = script("IF x THEN\n  TALK 1\nELSE\n  FOR i = 1 TO 2\n    TALK i\n  NEXT\nEND IF\n");
        let root = Frame::root();
        let else_arm = root.child(0, 1, FrameKind::Block);
        assert_eq!(else_arm.block(&s).unwrap().len(), 1);

        let loop_body = else_arm.child(0, 0, FrameKind::Block);
        assert_eq!(loop_body.block(&s).unwrap().len(), 1);
        assert!(matches!(loop_body.owner(&s), Ok(Stmt::For { .. })));
    }

    #[test]
    fn test_procedure_frames_resolve_inside_the_procedure() {
        let s = script("CALL f\nSUB f\n  WHILE TRUE\n    TALK 1\n    TALK 2\n  WEND\nEND SUB\n");
        let body = Frame::call(0, FrameKind::Call { target: None, saved: Vec::new() });
        assert_eq!(body.block(&s).unwrap().len(), 1);
        let inner = body.child(0, 0, FrameKind::Conditional);
        assert_eq!(inner.procedure, Some(0));
        assert_eq!(inner.block(&s).unwrap().len(), 2);
        assert!(matches!(inner.owner(&s), Ok(Stmt::While { .. })));

        assert!(matches!(
            Frame::call(4, FrameKind::Block).block(&s),
            Err(RuntimeError::InvalidContinuation(_))
        ));
    }

    #[test]
    fn test_counter_value_does_not_drift() {
        assert!(in_range(counter_value(0.0, 0.1, 10), 1.0, 0.1));
        assert!(!in_range(counter_value(0.0, 0.1, 11), 1.0, 0.1));
        assert!(in_range(counter_value(3.0, -1.0, 2), 1.0, -1.0));
    }

    #[test]
    fn test_bad_path_is_invalid_continuation() {
        let s = script("TALK 1\n");
        let path = [PathStep { index: 3, arm: 0 }];
        assert_eq!(
            resolve_block(&s, None, &path),
            Err(RuntimeError::InvalidContinuation("no block at path [3:0]".into()))
        );
    }

    #[test]
    fn test_exit_matching() {
        assert!(FrameKind::Conditional.exits_on(LoopKind::Conditional));
        assert!(!FrameKind::Conditional.exits_on(LoopKind::For));
        assert!(!FrameKind::Block.exits_on(LoopKind::For));
    }
}
