//! Semantic analysis: extracting a [`ToolSignature`] from a parsed script.
//!
//! The analyzer walks the declaration section in source order. Duplicate
//! parameter names are fatal ([`AnalysisError`]); everything else it finds
//! is reported as a [`SemanticWarning`] and does not stop compilation.
//!
//! | Check | Severity |
//! |-------|----------|
//! | Duplicate parameter name (case-insensitive) | fatal |
//! | No top-level `DESCRIPTION` | warning, not discoverable |
//! | More than one `DESCRIPTION` | warning, last wins |
//! | Parameter without a description | warning |
//! | Parameter never read by the body | warning |
//! | `LIKE` example outside its `ENUM` | warning |
//! | `CALL` to an undefined procedure | fatal |
//! | `CALL` with the wrong number of arguments | fatal |
//! | `x = CALL` on a `SUB` | fatal |

use crate::ast::{Declaration, Expr, InputSpec, ParamType, Script, Spanned, Stmt};
use crate::error::AnalysisError;
use crate::parser::MAX_NESTING_DEPTH;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::ops::Range;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SemanticWarning {
    pub message: String,
    pub span: Option<Range<usize>>,
    pub severity: Severity,
    pub hint: Option<String>,
}

/// One declared parameter, in the form tools expose it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    pub ty: ParamType,
    pub example: Option<String>,
    pub description: String,
    pub required: bool,
    pub enum_values: Vec<String>,
}

/// The callable interface of a script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolSignature {
    /// Derived from the script file name.
    pub tool_name: String,
    pub description: Option<String>,
    /// In declaration order.
    pub parameters: Vec<ParameterSpec>,
    pub script_path: String,
}

impl ToolSignature {
    /// Scripts without a description still run but are not offered to
    /// the LLM as tools.
    pub fn is_discoverable(&self) -> bool {
        self.description.as_deref().is_some_and(|d| !d.trim().is_empty())
    }
}

/// The analyzer's output for a script that passed.
#[derive(Debug, Clone, PartialEq)]
pub struct Analysis {
    pub signature: ToolSignature,
    pub warnings: Vec<SemanticWarning>,
}

/// Derive the tool name from a script path: the file stem with characters
/// outside `[A-Za-z0-9_-]` replaced by `_`.
pub fn tool_name_for(script_path: &str) -> String {
    let stem = Path::new(script_path)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(script_path);
    let name: String = stem
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if name.is_empty() {
        "_".to_string()
    } else {
        name
    }
}

/// Extract the tool signature from a parsed script.
pub fn analyze(script: &Script, script_path: &str) -> Result<Analysis, Vec<AnalysisError>> {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();
    let mut parameters = Vec::new();
    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut descriptions: Vec<&Spanned<String>> = Vec::new();

    for decl in &script.declarations {
        match &decl.node {
            Declaration::Description(text) => descriptions.push(text),
            Declaration::Param(param) => {
                let key = param.name.node.to_lowercase();
                let line = script.line_of(param.name.span.start);
                if let Some(first_line) = seen.get(&key) {
                    errors.push(AnalysisError::DuplicateParameterName {
                        name: param.name.node.clone(),
                        first_line: *first_line,
                        duplicate_line: line,
                        span: param.name.span.clone(),
                    });
                    continue;
                }
                seen.insert(key, line);

                if param.description.is_none() {
                    warnings.push(SemanticWarning {
                        message: format!("parameter '{}' has no description", param.name.node),
                        span: Some(param.name.span.clone()),
                        severity: Severity::Warning,
                        hint: Some("add DESCRIPTION \"...\" so the LLM knows what to pass".to_string()),
                    });
                }

                if let Some(example) = &param.example {
                    if !param.enum_values.is_empty() && !param.enum_values.contains(&example.node) {
                        warnings.push(SemanticWarning {
                            message: format!(
                                "example '{}' for '{}' is not one of its ENUM values",
                                example.node, param.name.node
                            ),
                            span: Some(example.span.clone()),
                            severity: Severity::Warning,
                            hint: None,
                        });
                    }
                }

                parameters.push(ParameterSpec {
                    name: param.name.node.clone(),
                    ty: param.ty.node,
                    example: param.example.as_ref().map(|e| e.node.clone()),
                    description: param
                        .description
                        .as_ref()
                        .map(|d| d.node.clone())
                        .unwrap_or_default(),
                    required: true,
                    enum_values: param.enum_values.clone(),
                });
            }
        }
    }

    check_calls(script, &mut errors);

    if !errors.is_empty() {
        return Err(errors);
    }

    let description = match descriptions.as_slice() {
        [] => {
            warnings.push(SemanticWarning {
                message: "script has no DESCRIPTION; it will not be offered as a tool".to_string(),
                span: None,
                severity: Severity::Warning,
                hint: Some("add DESCRIPTION \"...\" before the first statement".to_string()),
            });
            None
        }
        [only] => Some(only.node.clone()),
        [.., last] => {
            for earlier in &descriptions[..descriptions.len() - 1] {
                warnings.push(SemanticWarning {
                    message: "DESCRIPTION is overridden by a later DESCRIPTION".to_string(),
                    span: Some(earlier.span.clone()),
                    severity: Severity::Warning,
                    hint: Some("keep a single DESCRIPTION".to_string()),
                });
            }
            Some(last.node.clone())
        }
    };

    let read = referenced_variables(script);
    for param in &parameters {
        if !read.contains(&param.name.to_lowercase()) {
            let span = script.params().find_map(|d| match &d.node {
                Declaration::Param(p) if p.name.node == param.name => Some(p.name.span.clone()),
                _ => None,
            });
            warnings.push(SemanticWarning {
                message: format!("parameter '{}' is never used", param.name),
                span,
                severity: Severity::Warning,
                hint: None,
            });
        }
    }

    Ok(Analysis {
        signature: ToolSignature {
            tool_name: tool_name_for(script_path),
            description,
            parameters,
            script_path: script_path.to_string(),
        },
        warnings,
    })
}

// ============================================================================
// Procedure calls
// ============================================================================

fn check_calls(script: &Script, errors: &mut Vec<AnalysisError>) {
    let mut calls = Vec::new();
    collect_calls(&script.body, &mut calls);
    for procedure in &script.procedures {
        collect_calls(&procedure.body, &mut calls);
    }

    for stmt in calls {
        let Stmt::Call { name, args, target } = &stmt.node else {
            continue;
        };
        let line = script.line_of(stmt.span.start);
        let Some(index) = script.procedure(&name.node) else {
            errors.push(AnalysisError::UnknownProcedure {
                name: name.node.clone(),
                line,
                span: name.span.clone(),
            });
            continue;
        };
        let procedure = &script.procedures[index];
        if procedure.params.len() != args.len() {
            errors.push(AnalysisError::ProcedureArity {
                name: name.node.clone(),
                expected: procedure.params.len(),
                found: args.len(),
                line,
                span: stmt.span.clone(),
            });
        }
        if target.is_some() && !procedure.returns_value {
            errors.push(AnalysisError::SubHasNoValue {
                name: name.node.clone(),
                line,
                span: stmt.span.clone(),
            });
        }
    }
}

fn collect_calls<'a>(block: &'a [Spanned<Stmt>], calls: &mut Vec<&'a Spanned<Stmt>>) {
    for stmt in block {
        if matches!(stmt.node, Stmt::Call { .. }) {
            calls.push(stmt);
        }
        let mut arm = 0;
        while let Some(child) = stmt.node.child_block(arm) {
            collect_calls(child, calls);
            arm += 1;
        }
    }
}

// ============================================================================
// Variable references
// ============================================================================

/// Every variable name read anywhere in the body or a procedure.
pub fn referenced_variables(script: &Script) -> HashSet<String> {
    let mut names = HashSet::new();
    visit_block(&script.body, &mut names);
    for procedure in &script.procedures {
        visit_block(&procedure.body, &mut names);
    }
    names
}

fn visit_block(block: &[Spanned<Stmt>], names: &mut HashSet<String>) {
    for stmt in block {
        visit_stmt(&stmt.node, names);
    }
}

fn visit_stmt(stmt: &Stmt, names: &mut HashSet<String>) {
    match stmt {
        Stmt::Talk(e) | Stmt::Expression(e) | Stmt::Assign { value: e, .. } => visit_expr(e, names),
        Stmt::Hear { input, .. } => {
            if let InputSpec::Menu(options) = input {
                options.iter().for_each(|o| visit_expr(o, names));
            }
        }
        Stmt::If {
            branches,
            else_body,
        } => {
            for branch in branches {
                visit_expr(&branch.cond, names);
                visit_block(&branch.body, names);
            }
            if let Some(body) = else_body {
                visit_block(body, names);
            }
        }
        Stmt::For {
            start,
            end,
            step,
            body,
            ..
        } => {
            visit_expr(start, names);
            visit_expr(end, names);
            if let Some(step) = step {
                visit_expr(step, names);
            }
            visit_block(body, names);
        }
        Stmt::ForEach { iterable, body, .. } => {
            visit_expr(iterable, names);
            visit_block(body, names);
        }
        Stmt::While { cond, body } => {
            visit_expr(cond, names);
            visit_block(body, names);
        }
        Stmt::SelectCase {
            subject,
            cases,
            else_body,
        } => {
            visit_expr(subject, names);
            for case in cases {
                case.values.iter().for_each(|v| visit_expr(v, names));
                visit_block(&case.body, names);
            }
            if let Some(body) = else_body {
                visit_block(body, names);
            }
        }
        Stmt::Keyword(call) => call.args.iter().for_each(|a| visit_expr(a, names)),
        Stmt::Return(Some(e)) => visit_expr(e, names),
        Stmt::Call { args, .. } => args.iter().for_each(|a| visit_expr(a, names)),
        Stmt::Return(None) | Stmt::Exit(_) | Stmt::OnError { .. } => {}
    }
}

fn visit_expr(expr: &Spanned<Expr>, names: &mut HashSet<String>) {
    visit_expr_at(expr, names, 0);
}

/// Trees deeper than the parser's nesting limit (only possible for a
/// hand-built [`Script`]) are not descended further.
fn visit_expr_at(expr: &Spanned<Expr>, names: &mut HashSet<String>, depth: usize) {
    if depth > MAX_NESTING_DEPTH {
        return;
    }
    match &expr.node {
        Expr::Var(name) => {
            names.insert(name.clone());
        }
        Expr::List(items) | Expr::Call { args: items, .. } => {
            items.iter().for_each(|i| visit_expr_at(i, names, depth + 1));
        }
        Expr::Member { object, .. } => visit_expr_at(object, names, depth + 1),
        Expr::Index { object, index } => {
            visit_expr_at(object, names, depth + 1);
            visit_expr_at(index, names, depth + 1);
        }
        Expr::Unary { operand, .. } => visit_expr_at(operand, names, depth + 1),
        Expr::Binary { left, right, .. } => {
            visit_expr_at(left, names, depth + 1);
            visit_expr_at(right, names, depth + 1);
        }
        Expr::Null | Expr::Bool(_) | Expr::Number(_) | Expr::Str(_) => {}
    }
}
