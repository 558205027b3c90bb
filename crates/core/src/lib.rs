//! Core value model for the rexon interpreter.
//!
//! This crate provides the fundamental types shared by the parser and the
//! interpreter:
//! - The runtime [`Value`] variant (numbers, strings, arrays, objects, ...)
//! - Classical REXX number/string interconversion rules
//! - Stem-array helpers (objects with numeric keys plus a `.0` count)

pub mod stem;
pub mod value;

// Re-export commonly used types at the crate root
pub use stem::{is_stem_array, stem_from_values, stem_values};
pub use value::{format_number, Opaque, Value};
