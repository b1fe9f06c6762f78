//! Abstract Syntax Tree for dialog scripts.
//!
//! A [`Script`] is a leading run of declarations (`PARAM`, `DESCRIPTION`)
//! followed by executable statements. Every node is wrapped in
//! [`Spanned`] so diagnostics and runtime errors can point back at the
//! source.
//!
//! # Structure
//!
//! ```text
//! Script
//! ├── declarations: Vec<Spanned<Declaration>>
//! │   ├── Param(ParamDecl)        PARAM city AS STRING LIKE "London" ...
//! │   └── Description(String)     DESCRIPTION "Gets weather"
//! ├── body: Block                 Vec<Spanned<Stmt>>
//! ├── procedures: Vec<Procedure>  SUB greet(name) .. END SUB
//! └── lines: LineIndex            byte offset -> line number
//! ```
//!
//! The tree is immutable after parsing and owns no cycles. The execution
//! engine addresses nested blocks by index paths (see [`Stmt::child_block`]),
//! which is what makes a paused run serializable.

use crate::lexer::LineIndex;
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Source location as a byte range.
pub type Span = Range<usize>;

/// A value with an associated source span.
///
/// # Example
///
/// ```rust
/// use basic_dialog_parser::Spanned;
///
/// let spanned = Spanned::new("hello".to_string(), 5..10);
/// let upper = spanned.map(|s| s.to_uppercase());
/// assert_eq!(upper.node, "HELLO");
/// assert_eq!(upper.span.start, 5);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Spanned<T> {
    /// The wrapped value.
    pub node: T,
    /// Source location as byte offsets.
    pub span: Span,
}

impl<T> Spanned<T> {
    /// Create a new spanned value.
    pub fn new(node: T, span: Span) -> Self {
        Self { node, span }
    }

    /// Transform the inner value while preserving the span.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Spanned<U> {
        Spanned {
            node: f(self.node),
            span: self.span,
        }
    }
}

/// A parsed script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Script {
    pub declarations: Vec<Spanned<Declaration>>,
    pub body: Block,
    #[serde(default)]
    pub procedures: Vec<Procedure>,
    pub lines: LineIndex,
}

impl Script {
    /// 1-based source line of a byte offset.
    pub fn line_of(&self, offset: usize) -> usize {
        self.lines.line(offset)
    }

    /// Index of the procedure called `name` (lower case).
    pub fn procedure(&self, name: &str) -> Option<usize> {
        self.procedures.iter().position(|p| p.name.node == name)
    }

    /// Parameter declarations in source order.
    pub fn params(&self) -> impl Iterator<Item = &Spanned<Declaration>> {
        self.declarations
            .iter()
            .filter(|d| matches!(d.node, Declaration::Param(_)))
    }
}

/// A sequence of statements.
pub type Block = Vec<Spanned<Stmt>>;

/// `SUB name(a, b) .. END SUB` or `FUNCTION name(a) .. END FUNCTION`.
///
/// Procedures are defined at the top level, anywhere after the
/// declarations, and run only through `CALL`. Parameters are assigned as
/// script variables for the duration of the call and restored afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Procedure {
    /// Normalized to lower case.
    pub name: Spanned<String>,
    pub params: Vec<Spanned<String>>,
    /// `FUNCTION` rather than `SUB`; only functions yield a value to `x = CALL f()`.
    pub returns_value: bool,
    pub body: Block,
    pub span: Span,
}

impl Procedure {
    pub fn kind(&self) -> &'static str {
        if self.returns_value {
            "FUNCTION"
        } else {
            "SUB"
        }
    }
}

// ============================================================================
// Declarations
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Declaration {
    Param(ParamDecl),
    Description(Spanned<String>),
}

/// `PARAM name AS TYPE [LIKE example] [DESCRIPTION "text"] [ENUM [..]]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamDecl {
    pub name: Spanned<String>,
    pub ty: Spanned<ParamType>,
    pub example: Option<Spanned<String>>,
    pub description: Option<Spanned<String>>,
    pub enum_values: Vec<String>,
}

/// Declared type of a parameter or a typed `HEAR`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParamType {
    String,
    Number,
    Integer,
    Boolean,
    Date,
    Email,
    Phone,
}

impl ParamType {
    /// Parse a type word, accepting the common aliases.
    pub fn from_word(word: &str) -> Option<Self> {
        match word.to_ascii_uppercase().as_str() {
            "STRING" | "TEXT" => Some(ParamType::String),
            "NUMBER" | "FLOAT" | "DOUBLE" | "DECIMAL" => Some(ParamType::Number),
            "INTEGER" | "INT" => Some(ParamType::Integer),
            "BOOLEAN" | "BOOL" => Some(ParamType::Boolean),
            "DATE" => Some(ParamType::Date),
            "EMAIL" => Some(ParamType::Email),
            "PHONE" | "MOBILE" => Some(ParamType::Phone),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ParamType::String => "STRING",
            ParamType::Number => "NUMBER",
            ParamType::Integer => "INTEGER",
            ParamType::Boolean => "BOOLEAN",
            ParamType::Date => "DATE",
            ParamType::Email => "EMAIL",
            ParamType::Phone => "PHONE",
        }
    }

    /// JSON Schema `type` keyword.
    pub fn json_type(self) -> &'static str {
        match self {
            ParamType::Number => "number",
            ParamType::Integer => "integer",
            ParamType::Boolean => "boolean",
            ParamType::String | ParamType::Date | ParamType::Email | ParamType::Phone => "string",
        }
    }

    /// JSON Schema `format` keyword, where one applies.
    pub fn json_format(self) -> Option<&'static str> {
        match self {
            ParamType::Date => Some("date"),
            ParamType::Email => Some("email"),
            _ => None,
        }
    }
}

impl std::fmt::Display for ParamType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Statements
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Stmt {
    /// `TALK expr`
    Talk(Spanned<Expr>),
    /// `HEAR var [AS type | AS menu]`
    Hear {
        target: Spanned<String>,
        input: InputSpec,
    },
    /// `var = expr`
    Assign {
        target: Spanned<String>,
        value: Spanned<Expr>,
    },
    /// `IF .. THEN .. ELSEIF .. ELSE .. END IF`
    If {
        branches: Vec<CondBranch>,
        else_body: Option<Block>,
    },
    /// `FOR var = start TO end [STEP step] .. NEXT`
    For {
        var: Spanned<String>,
        start: Spanned<Expr>,
        end: Spanned<Expr>,
        step: Option<Spanned<Expr>>,
        body: Block,
    },
    /// `FOR EACH var IN expr .. NEXT`
    ForEach {
        var: Spanned<String>,
        iterable: Spanned<Expr>,
        body: Block,
    },
    /// `WHILE cond .. WEND` and the `DO WHILE` / `DO UNTIL` forms
    While { cond: Spanned<Expr>, body: Block },
    /// `SELECT CASE subject .. CASE v .. CASE ELSE .. END SELECT`
    SelectCase {
        subject: Spanned<Expr>,
        cases: Vec<CaseArm>,
        else_body: Option<Block>,
    },
    /// A catalogue keyword such as `SET BOT MEMORY "k", v`.
    Keyword(KeywordCall),
    /// A bare function call.
    Expression(Spanned<Expr>),
    /// `EXIT FOR`, `EXIT WHILE`, `EXIT DO`
    Exit(LoopKind),
    /// `RETURN [expr]` or a bare `END`
    Return(Option<Spanned<Expr>>),
    /// `CALL name(args)` or `var = CALL name(args)`
    Call {
        name: Spanned<String>,
        args: Vec<Spanned<Expr>>,
        target: Option<Spanned<String>>,
    },
    /// `ON ERROR RESUME NEXT` (true) and `ON ERROR GOTO 0` (false)
    OnError { resume_next: bool },
}

impl Stmt {
    /// Nested block number `arm` of a compound statement.
    ///
    /// For `If`, arms `0..branches.len()` are the conditional branches and
    /// the next index is the `ELSE` body. For `SelectCase`, arms index the
    /// cases with the `CASE ELSE` body last. Loops have a single arm 0.
    pub fn child_block(&self, arm: usize) -> Option<&Block> {
        match self {
            Stmt::If {
                branches,
                else_body,
            } => match branches.get(arm) {
                Some(branch) => Some(&branch.body),
                None if arm == branches.len() => else_body.as_ref(),
                None => None,
            },
            Stmt::SelectCase {
                cases, else_body, ..
            } => match cases.get(arm) {
                Some(case) => Some(&case.body),
                None if arm == cases.len() => else_body.as_ref(),
                None => None,
            },
            Stmt::For { body, .. } | Stmt::ForEach { body, .. } | Stmt::While { body, .. } => {
                (arm == 0).then_some(body)
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CondBranch {
    pub cond: Spanned<Expr>,
    pub body: Block,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseArm {
    pub values: Vec<Spanned<Expr>>,
    pub body: Block,
}

/// What a `HEAR` accepts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum InputSpec {
    Any,
    Typed(ParamType),
    Menu(Vec<Spanned<Expr>>),
}

/// A call into the keyword dispatch table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordCall {
    /// Canonical phrase, e.g. `GET BOT MEMORY`.
    pub name: String,
    pub args: Vec<Spanned<Expr>>,
    /// Variable receiving the result in `x = LLM "..."` forms.
    pub target: Option<Spanned<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoopKind {
    /// `FOR` and `FOR EACH`
    For,
    /// `WHILE` and `DO`
    Conditional,
}

// ============================================================================
// Expressions
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Null,
    Bool(bool),
    Number(f64),
    Str(String),
    /// Variable reference, normalized to lower case.
    Var(String),
    List(Vec<Spanned<Expr>>),
    Member {
        object: Box<Spanned<Expr>>,
        field: String,
    },
    Index {
        object: Box<Spanned<Expr>>,
        index: Box<Spanned<Expr>>,
    },
    /// Built-in function call; name normalized to upper case.
    Call {
        name: String,
        args: Vec<Spanned<Expr>>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Spanned<Expr>>,
    },
    Binary {
        op: BinOp,
        left: Box<Spanned<Expr>>,
        right: Box<Spanned<Expr>>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Concat,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Or => "OR",
            BinOp::And => "AND",
            BinOp::Eq => "=",
            BinOp::Ne => "<>",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::Concat => "&",
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "MOD",
            BinOp::Pow => "^",
        }
    }
}

/// Format a number the way scripts print it: integral values have no
/// fractional part.
pub fn format_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}
