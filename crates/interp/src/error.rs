//! Runtime errors.

use rexon_core::Value;
use rexon_library::LibraryError;
use rexon_parser::ParseError;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum RunError {
    /// Parse failure from an external script or library source.
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("Label {label} not found")]
    LabelNotFound { label: String },

    #[error("Function {name} is not defined")]
    FunctionNotFound { name: String },

    #[error("Maximum call stack size exceeded (depth {depth})")]
    StackOverflow { depth: usize },

    #[error("ADDRESS target '{target}' is not registered")]
    UnknownAddressTarget { target: String },

    #[error("No ADDRESS target is active for line {line}: {text}")]
    NoActiveTarget { line: usize, text: String },

    #[error("Handler '{target}' failed (rc {rc}): {message}")]
    Handler {
        target: String,
        rc: f64,
        message: String,
    },

    #[error("{message} at line {line}")]
    Expression { message: String, line: usize },

    #[error("Invalid MATCHING pattern '{pattern}' at line {line}: {message}")]
    BadPattern {
        pattern: String,
        message: String,
        line: usize,
    },

    #[error(transparent)]
    Library(#[from] LibraryError),

    #[error("External script not found: {path}")]
    ScriptNotFound { path: String },

    #[error("Failed to read script '{path}': {message}")]
    ScriptRead { path: String, message: String },

    #[error("{0}")]
    Output(String),

    /// Internal control flow: an `EXIT` raised while evaluating a function
    /// call. Converted to a normal exit by the program loop.
    #[doc(hidden)]
    #[error("exit {code}")]
    ExitRaised { code: f64 },
}

impl RunError {
    pub fn expression(message: impl Into<String>, line: usize) -> Self {
        RunError::Expression {
            message: message.into(),
            line,
        }
    }
}

/// Failure raised by an ADDRESS handler. The shape, when present, becomes
/// `RESULT` so scripts can inspect structured errors even as the run fails.
#[derive(Error, Debug, Clone)]
#[error("{message}")]
pub struct HandlerError {
    pub message: String,
    /// Nonzero return code for `RC`.
    pub rc: f64,
    pub shape: Option<Value>,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            rc: 1.0,
            shape: None,
        }
    }

    pub fn with_rc(mut self, rc: f64) -> Self {
        self.rc = rc;
        self
    }

    pub fn with_shape(mut self, shape: Value) -> Self {
        self.shape = Some(shape);
        self
    }
}
