//! Parser for the rexon scripting language.
//!
//! This crate turns source text into the command tree executed by the
//! interpreter. The language is a REXX dialect: classical statements
//! (labels, `DO`/`END`, `SELECT`/`WHEN`/`OTHERWISE`, `PARSE ARG`, `CALL`)
//! blended with modern extensions (array/object literals, the pipe operator
//! `|>`, HEREDOCs, `ADDRESS ... MATCHING`, `REQUIRE`, named-parameter calls).
//!
//! # Example
//!
//! ```
//! use rexon_parser::parse;
//!
//! let commands = parse(r#"
//!     LET greeting = "hello" |> UPPER
//!     SAY greeting
//! "#).expect("failed to parse");
//!
//! assert_eq!(commands.len(), 2);
//! ```
//!
//! # Pipeline
//!
//! 1. **Lexer** - Line-aware tokenization. Every token carries its 1-based
//!    source line; HEREDOC bodies are collected into a single token; lines
//!    that cannot be tokenized degrade to raw lines instead of failing the
//!    file (they may be foreign text destined for an ADDRESS handler).
//! 2. **Parser** - Recursive-descent recognition into [`ast::Command`]
//!    values. Validates block closure, rejects forbidden syntaxes with
//!    corrective messages, and preserves the head line number of every
//!    command.

pub mod ast;
pub mod error;
pub mod lexer;
pub mod parser;
pub mod token;

pub use ast::{ArgPattern, CallArgs, CallTarget, Command, CommandKind, DoSpec, Expr, WhenClause};
pub use error::ParseError;
pub use lexer::{tokenize, SourceLine};
pub use parser::Parser;
pub use token::{Token, TokenKind};

/// Parse source text into a command list.
///
/// Pure and deterministic; returns a line-annotated [`ParseError`] on
/// failure.
pub fn parse(source: &str) -> Result<Vec<Command>, ParseError> {
    Parser::parse(source)
}
