//! The command tree.
//!
//! Every command records the 1-based source line of its head keyword; the
//! tracer and all runtime diagnostics rely on that number being present and
//! accurate. Closing `END` lines never own a command.

/// Expression forms.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    /// Quoted string literal (or a HEREDOC in expression position).
    StringLit(String),
    /// Bare identifier or compound symbol, canonicalized to uppercase.
    /// Resolves to the variable if defined, else to its own name.
    Symbol(String),
    ArrayLit(Vec<Expr>),
    /// Object literal; keys keep their written spelling.
    ObjectLit(Vec<(String, Expr)>),
    /// Function call. The name is canonical uppercase.
    Call { name: String, args: CallArgs },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
}

/// Arguments of a call: positional, or named (one parameter object whose
/// labels are string labels, never variable references).
#[derive(Debug, Clone, PartialEq)]
pub enum CallArgs {
    Positional(Vec<Expr>),
    Named(Vec<(String, Expr)>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Minus,
    Plus,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    /// `%` integer division.
    IntDivide,
    /// `//` remainder.
    Remainder,
    Power,
    /// `||` string concatenation.
    Concat,
    /// `=` non-strict comparison (numeric when both operands are numeric).
    Equal,
    /// `==` strict comparison.
    StrictEqual,
    NotEqual,
    Greater,
    Less,
    GreaterEqual,
    LessEqual,
    And,
    Or,
}

/// Target of a `CALL` statement.
#[derive(Debug, Clone, PartialEq)]
pub enum CallTarget {
    /// Subroutine label or function name (canonical uppercase).
    Name(String),
    /// External script path (`./...` or `../...`), spelling preserved.
    Path(String),
}

/// One element of a `PARSE ARG` pattern.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgPattern {
    /// Bind the next positional argument to this variable.
    Name(String),
    /// `.` placeholder: skip the next positional argument.
    Skip,
}

/// Loop form of a `DO` block.
#[derive(Debug, Clone, PartialEq)]
pub enum DoSpec {
    /// Plain `DO ... END`: runs once.
    Plain,
    Forever,
    Counted {
        var: String,
        from: Expr,
        to: Expr,
        by: Option<Expr>,
    },
    While(Expr),
    /// `DO var OVER collection`: array values or object values in insertion
    /// order.
    Over { var: String, collection: Expr },
}

/// A `WHEN cond THEN ...` clause; the line is the clause header's own line.
#[derive(Debug, Clone, PartialEq)]
pub struct WhenClause {
    pub line: usize,
    pub cond: Expr,
    pub body: Vec<Command>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub kind: CommandKind,
    /// 1-based source line of the command's head token.
    pub line: usize,
}

impl Command {
    pub fn new(kind: CommandKind, line: usize) -> Self {
        Self { kind, line }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CommandKind {
    /// `SAY expr*` - expressions joined with a single space.
    Say(Vec<Expr>),
    /// `LET name = expr` or bare `name = expr`.
    Assign { name: String, value: Expr },
    Call {
        target: CallTarget,
        args: CallArgs,
    },
    Return(Option<Expr>),
    Exit {
        code: Option<Expr>,
        /// `UNLESS cond, msg`: terminate only when the condition is false,
        /// emitting the message to the error stream.
        unless: Option<(Expr, Expr)>,
    },
    Signal(String),
    ParseArg(Vec<ArgPattern>),
    /// `ADDRESS target` - switch the current target.
    Address { target: String },
    /// `ADDRESS target "command"` - one-shot dispatch, target unchanged.
    AddressOneShot { target: String, command: Expr },
    /// `ADDRESS target MATCHING "pattern" (MULTILINE)?`.
    AddressMatching {
        target: String,
        pattern: String,
        multiline: bool,
    },
    /// Bare quoted command under the current target.
    AddressCommand(Expr),
    /// HEREDOC command under the current target.
    AddressHeredoc { body: String },
    If {
        cond: Expr,
        then_branch: Vec<Command>,
        else_branch: Option<Vec<Command>>,
    },
    Do {
        spec: DoSpec,
        body: Vec<Command>,
    },
    Select {
        whens: Vec<WhenClause>,
        /// The `OTHERWISE` header line and its block.
        otherwise: Option<(usize, Vec<Command>)>,
    },
    Label { name: String, procedure: bool },
    Require(Expr),
    Leave,
    Iterate,
    Nop,
    /// A source line that is not a recognizable statement, kept verbatim.
    /// These are the transport for `ADDRESS ... MATCHING` regions.
    RawLine(String),
}

impl CommandKind {
    /// Short name used in diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            CommandKind::Say(_) => "SAY",
            CommandKind::Assign { .. } => "assignment",
            CommandKind::Call { .. } => "CALL",
            CommandKind::Return(_) => "RETURN",
            CommandKind::Exit { .. } => "EXIT",
            CommandKind::Signal(_) => "SIGNAL",
            CommandKind::ParseArg(_) => "PARSE ARG",
            CommandKind::Address { .. }
            | CommandKind::AddressOneShot { .. }
            | CommandKind::AddressMatching { .. } => "ADDRESS",
            CommandKind::AddressCommand(_) => "command",
            CommandKind::AddressHeredoc { .. } => "HEREDOC",
            CommandKind::If { .. } => "IF",
            CommandKind::Do { .. } => "DO",
            CommandKind::Select { .. } => "SELECT",
            CommandKind::Label { .. } => "label",
            CommandKind::Require(_) => "REQUIRE",
            CommandKind::Leave => "LEAVE",
            CommandKind::Iterate => "ITERATE",
            CommandKind::Nop => "NOP",
            CommandKind::RawLine(_) => "line",
        }
    }
}
