//! Parse errors.
//!
//! Every variant carries the 1-based source line it was detected on. The
//! forbidden-syntax messages are part of the language contract: they name
//! the offending source text and the corrective rewrite.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("unexpected token at line {line}: expected {expected}, found {found}")]
    UnexpectedToken {
        expected: String,
        found: String,
        line: usize,
    },

    #[error("unexpected end of input: expected {expected}")]
    UnexpectedEof { expected: String },

    #[error("Missing END for {kind} at line {line}")]
    MissingEnd { kind: &'static str, line: usize },

    #[error("Unexpected END at line {line}")]
    UnexpectedEnd { line: usize },

    #[error("Array access syntax '{name}[{index}]' is not supported in expressions. Use ARRAY_GET({name}, {index}) for REXX 1-based indexing instead.")]
    ArrayAccess {
        name: String,
        index: String,
        line: usize,
    },

    #[error("LHS array assignment syntax '{name}[{index}] = ...' is not supported. Use ARRAY_SET({name}, {index}, value) for REXX 1-based indexing instead.")]
    ArrayAssignment {
        name: String,
        index: String,
        line: usize,
    },

    #[error("EXIT ... UNLESS must separate the condition and the message with a comma at line {line}. Use a comma: EXIT UNLESS condition, 'message'")]
    ExitUnlessMissingComma { line: usize },

    #[error("Unterminated string literal at line {line}")]
    UnterminatedString { line: usize },

    #[error("Unterminated HEREDOC <<{tag} starting at line {line}")]
    UnterminatedHeredoc { tag: String, line: usize },

    #[error("Unterminated block comment starting at line {line}")]
    UnterminatedComment { line: usize },

    #[error("invalid character '{ch}' at line {line}")]
    UnexpectedChar { ch: char, line: usize },

    #[error("Cannot mix named and positional arguments in call to {name} at line {line}")]
    MixedArguments { name: String, line: usize },

    #[error("Invalid pipe target at line {line}: expected a function name or call")]
    InvalidPipeTarget { line: usize },
}

impl ParseError {
    /// Source line the error was detected on, when known.
    pub fn line(&self) -> Option<usize> {
        match self {
            ParseError::UnexpectedToken { line, .. }
            | ParseError::MissingEnd { line, .. }
            | ParseError::UnexpectedEnd { line }
            | ParseError::ArrayAccess { line, .. }
            | ParseError::ArrayAssignment { line, .. }
            | ParseError::ExitUnlessMissingComma { line }
            | ParseError::UnterminatedString { line }
            | ParseError::UnterminatedHeredoc { line, .. }
            | ParseError::UnterminatedComment { line }
            | ParseError::UnexpectedChar { line, .. }
            | ParseError::MixedArguments { line, .. }
            | ParseError::InvalidPipeTarget { line } => Some(*line),
            ParseError::UnexpectedEof { .. } => None,
        }
    }
}
