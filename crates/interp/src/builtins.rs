//! Built-in function registry and the language stdlib.
//!
//! Built-ins are callable by uppercase name without any `REQUIRE`. Each one
//! is a plain function over evaluated argument values; the context carries
//! what a few introspective built-ins need (the current frame's call
//! arguments for `ARG`, the variable store for `SYMBOL`, and the current
//! line for error messages).

use crate::error::RunError;
use crate::store::VariableStore;
use rexon_core::{format_number, stem_values, Value};
use std::collections::HashMap;
use std::sync::Arc;

pub struct BuiltinCtx<'a> {
    /// Positional arguments of the current subroutine frame.
    pub frame_args: &'a [Value],
    pub store: &'a VariableStore,
    /// Line of the command being executed, for error messages.
    pub line: usize,
}

pub type BuiltinFn = Arc<dyn Fn(&BuiltinCtx, &[Value]) -> Result<Value, RunError> + Send + Sync>;

#[derive(Default, Clone)]
pub struct BuiltinRegistry {
    table: HashMap<String, BuiltinFn>,
}

impl BuiltinRegistry {
    /// Registry seeded with the stdlib.
    pub fn with_stdlib() -> Self {
        let mut registry = Self::default();
        install_stdlib(&mut registry);
        registry
    }

    pub fn register<F>(&mut self, name: &str, f: F)
    where
        F: Fn(&BuiltinCtx, &[Value]) -> Result<Value, RunError> + Send + Sync + 'static,
    {
        self.table.insert(name.to_ascii_uppercase(), Arc::new(f));
    }

    pub fn register_fn(&mut self, name: &str, f: BuiltinFn) {
        self.table.insert(name.to_ascii_uppercase(), f);
    }

    pub fn get(&self, name: &str) -> Option<BuiltinFn> {
        self.table.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.table.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.table.keys().map(String::as_str)
    }
}

// ========== Argument helpers ==========

fn want_str(name: &str, args: &[Value], i: usize, line: usize) -> Result<String, RunError> {
    args.get(i)
        .map(Value::to_display_string)
        .ok_or_else(|| RunError::expression(format!("{} is missing argument {}", name, i + 1), line))
}

fn want_num(name: &str, args: &[Value], i: usize, line: usize) -> Result<f64, RunError> {
    let value = args.get(i).ok_or_else(|| {
        RunError::expression(format!("{} is missing argument {}", name, i + 1), line)
    })?;
    value.as_number().ok_or_else(|| {
        RunError::expression(
            format!(
                "{} expects a number for argument {}, got '{}'",
                name,
                i + 1,
                value.to_display_string()
            ),
            line,
        )
    })
}

fn opt_num(name: &str, args: &[Value], i: usize, line: usize) -> Result<Option<f64>, RunError> {
    match args.get(i) {
        Some(_) => want_num(name, args, i, line).map(Some),
        None => Ok(None),
    }
}

fn opt_str(args: &[Value], i: usize) -> Option<String> {
    args.get(i).map(Value::to_display_string)
}

/// Elements of an array, stem object, or plain object (values in insertion
/// order).
pub fn sequence_values(value: &Value) -> Option<Vec<Value>> {
    match value {
        Value::Array(items) => Some(items.clone()),
        Value::Object(map) => {
            if rexon_core::is_stem_array(map) {
                Some(stem_values(map))
            } else {
                Some(map.values().cloned().collect())
            }
        }
        _ => None,
    }
}

// ========== Collection mutation primitives ==========
//
// These are shared with the evaluator, which applies them in place when the
// first argument is a variable (the documented replacement for the
// forbidden `arr[i] = ...`).

/// 1-based element read; object keys fall back to name lookup.
pub fn collection_get(value: &Value, key: &Value, line: usize) -> Result<Value, RunError> {
    match value {
        Value::Array(items) => {
            let index = key.as_index().ok_or_else(|| {
                RunError::expression(
                    format!("ARRAY_GET expects a 1-based index, got '{}'", key),
                    line,
                )
            })?;
            if index == 0 || index > items.len() {
                return Ok(Value::Undefined);
            }
            Ok(items[index - 1].clone())
        }
        Value::Object(map) => Ok(map
            .get(&key.to_display_string())
            .cloned()
            .unwrap_or(Value::Undefined)),
        other => Err(RunError::expression(
            format!("ARRAY_GET expects an array or object, got {}", other.type_name()),
            line,
        )),
    }
}

/// 1-based element write, growing the array with empty strings as needed.
pub fn collection_set(
    value: &mut Value,
    key: &Value,
    new: Value,
    line: usize,
) -> Result<(), RunError> {
    match value {
        Value::Array(items) => {
            let index = key.as_index().filter(|i| *i >= 1).ok_or_else(|| {
                RunError::expression(
                    format!("ARRAY_SET expects a 1-based index, got '{}'", key),
                    line,
                )
            })?;
            while items.len() < index {
                items.push(Value::String(String::new()));
            }
            items[index - 1] = new;
            Ok(())
        }
        Value::Object(map) => {
            map.insert(key.to_display_string(), new);
            Ok(())
        }
        other => Err(RunError::expression(
            format!("ARRAY_SET expects an array or object, got {}", other.type_name()),
            line,
        )),
    }
}

// ========== Stdlib ==========

fn install_stdlib(reg: &mut BuiltinRegistry) {
    install_string_builtins(reg);
    install_math_builtins(reg);
    install_collection_builtins(reg);
    install_json_builtins(reg);
    install_introspection_builtins(reg);
}

fn install_string_builtins(reg: &mut BuiltinRegistry) {
    reg.register("UPPER", |ctx, args| {
        Ok(Value::String(
            want_str("UPPER", args, 0, ctx.line)?.to_uppercase(),
        ))
    });
    reg.register("LOWER", |ctx, args| {
        Ok(Value::String(
            want_str("LOWER", args, 0, ctx.line)?.to_lowercase(),
        ))
    });
    reg.register("LENGTH", |ctx, args| {
        let len = match args.first() {
            Some(Value::Array(items)) => items.len(),
            Some(Value::Object(map)) => map.len(),
            _ => want_str("LENGTH", args, 0, ctx.line)?.chars().count(),
        };
        Ok(Value::Number(len as f64))
    });
    reg.register("SUBSTR", |ctx, args| {
        let s = want_str("SUBSTR", args, 0, ctx.line)?;
        let start = want_num("SUBSTR", args, 1, ctx.line)?.max(1.0) as usize;
        let chars: Vec<char> = s.chars().collect();
        let from = start.saturating_sub(1).min(chars.len());
        let taken: String = match opt_num("SUBSTR", args, 2, ctx.line)? {
            Some(len) => {
                let len = len.max(0.0) as usize;
                let mut out: String = chars[from..].iter().take(len).collect();
                // Classical REXX pads short extracts with blanks.
                let short = len.saturating_sub(chars.len().saturating_sub(from));
                out.extend(std::iter::repeat(' ').take(short));
                out
            }
            None => chars[from..].iter().collect(),
        };
        Ok(Value::String(taken))
    });
    reg.register("POS", |ctx, args| {
        let needle = want_str("POS", args, 0, ctx.line)?;
        let haystack = want_str("POS", args, 1, ctx.line)?;
        let found = haystack
            .find(&needle)
            .map(|byte| haystack[..byte].chars().count() + 1)
            .unwrap_or(0);
        Ok(Value::Number(found as f64))
    });
    reg.register("STRIP", |ctx, args| {
        let s = want_str("STRIP", args, 0, ctx.line)?;
        let option = opt_str(args, 1).unwrap_or_default().to_ascii_uppercase();
        let pad = opt_str(args, 2)
            .and_then(|p| p.chars().next())
            .unwrap_or(' ');
        let stripped = match option.chars().next() {
            Some('L') => s.trim_start_matches(pad).to_string(),
            Some('T') => s.trim_end_matches(pad).to_string(),
            _ => s.trim_matches(pad).to_string(),
        };
        Ok(Value::String(stripped))
    });
    reg.register("REVERSE", |ctx, args| {
        Ok(Value::String(
            want_str("REVERSE", args, 0, ctx.line)?.chars().rev().collect(),
        ))
    });
    reg.register("COPIES", |ctx, args| {
        let s = want_str("COPIES", args, 0, ctx.line)?;
        let n = want_num("COPIES", args, 1, ctx.line)?.max(0.0) as usize;
        Ok(Value::String(s.repeat(n)))
    });
    reg.register("WORD", |ctx, args| {
        let s = want_str("WORD", args, 0, ctx.line)?;
        let n = want_num("WORD", args, 1, ctx.line)? as usize;
        let word = s
            .split_whitespace()
            .nth(n.saturating_sub(1))
            .unwrap_or_default();
        Ok(Value::String(word.to_string()))
    });
    reg.register("WORDS", |ctx, args| {
        let s = want_str("WORDS", args, 0, ctx.line)?;
        Ok(Value::Number(s.split_whitespace().count() as f64))
    });
    reg.register("SPACE", |ctx, args| {
        let s = want_str("SPACE", args, 0, ctx.line)?;
        let n = opt_num("SPACE", args, 1, ctx.line)?.unwrap_or(1.0).max(0.0) as usize;
        let joined = s.split_whitespace().collect::<Vec<_>>().join(&" ".repeat(n));
        Ok(Value::String(joined))
    });
    reg.register("LEFT", |ctx, args| {
        let s = want_str("LEFT", args, 0, ctx.line)?;
        let n = want_num("LEFT", args, 1, ctx.line)?.max(0.0) as usize;
        let pad = opt_str(args, 2).and_then(|p| p.chars().next()).unwrap_or(' ');
        let mut out: String = s.chars().take(n).collect();
        while out.chars().count() < n {
            out.push(pad);
        }
        Ok(Value::String(out))
    });
    reg.register("RIGHT", |ctx, args| {
        let s = want_str("RIGHT", args, 0, ctx.line)?;
        let n = want_num("RIGHT", args, 1, ctx.line)?.max(0.0) as usize;
        let pad = opt_str(args, 2).and_then(|p| p.chars().next()).unwrap_or(' ');
        let chars: Vec<char> = s.chars().collect();
        let mut out = String::new();
        for _ in 0..n.saturating_sub(chars.len()) {
            out.push(pad);
        }
        let skip = chars.len().saturating_sub(n);
        out.extend(chars[skip..].iter());
        Ok(Value::String(out))
    });
}

fn install_math_builtins(reg: &mut BuiltinRegistry) {
    reg.register("ABS", |ctx, args| {
        Ok(Value::Number(want_num("ABS", args, 0, ctx.line)?.abs()))
    });
    reg.register("MAX", |ctx, args| {
        fold_numbers("MAX", args, ctx.line, f64::max)
    });
    reg.register("MIN", |ctx, args| {
        fold_numbers("MIN", args, ctx.line, f64::min)
    });
    reg.register("TRUNC", |ctx, args| {
        let n = want_num("TRUNC", args, 0, ctx.line)?;
        let digits = opt_num("TRUNC", args, 1, ctx.line)?.unwrap_or(0.0).max(0.0) as u32;
        let scale = 10f64.powi(digits as i32);
        Ok(Value::Number((n * scale).trunc() / scale))
    });
    reg.register("SIGN", |ctx, args| {
        let n = want_num("SIGN", args, 0, ctx.line)?;
        Ok(Value::Number(if n > 0.0 {
            1.0
        } else if n < 0.0 {
            -1.0
        } else {
            0.0
        }))
    });
    reg.register("FORMAT", |ctx, args| {
        let n = want_num("FORMAT", args, 0, ctx.line)?;
        let before = opt_num("FORMAT", args, 1, ctx.line)?;
        let after = opt_num("FORMAT", args, 2, ctx.line)?;
        let mut text = match after {
            Some(decimals) => format!("{:.*}", decimals.max(0.0) as usize, n),
            None => format_number(n),
        };
        if let Some(width) = before {
            let width = width.max(0.0) as usize;
            let int_len = text
                .split('.')
                .next()
                .map(|p| p.trim_start_matches('-').len())
                .unwrap_or(0);
            if int_len < width {
                text = format!("{}{}", " ".repeat(width - int_len), text);
            }
        }
        Ok(Value::String(text))
    });
}

fn fold_numbers(
    name: &str,
    args: &[Value],
    line: usize,
    op: fn(f64, f64) -> f64,
) -> Result<Value, RunError> {
    let mut acc = want_num(name, args, 0, line)?;
    for i in 1..args.len() {
        acc = op(acc, want_num(name, args, i, line)?);
    }
    Ok(Value::Number(acc))
}

fn install_collection_builtins(reg: &mut BuiltinRegistry) {
    reg.register("ARRAY_GET", |ctx, args| {
        let value = args.first().ok_or_else(|| {
            RunError::expression("ARRAY_GET is missing argument 1", ctx.line)
        })?;
        let key = args.get(1).ok_or_else(|| {
            RunError::expression("ARRAY_GET is missing argument 2", ctx.line)
        })?;
        collection_get(value, key, ctx.line)
    });
    reg.register("ARRAY_LENGTH", |ctx, args| {
        let value = args.first().ok_or_else(|| {
            RunError::expression("ARRAY_LENGTH is missing argument 1", ctx.line)
        })?;
        let len = sequence_values(value)
            .map(|v| v.len())
            .ok_or_else(|| {
                RunError::expression(
                    format!(
                        "ARRAY_LENGTH expects an array or object, got {}",
                        value.type_name()
                    ),
                    ctx.line,
                )
            })?;
        Ok(Value::Number(len as f64))
    });
    reg.register("JOIN", |ctx, args| {
        let value = args.first().ok_or_else(|| {
            RunError::expression("JOIN is missing argument 1", ctx.line)
        })?;
        let sep = opt_str(args, 1).unwrap_or_default();
        let items = sequence_values(value).ok_or_else(|| {
            RunError::expression(
                format!("JOIN expects an array or stem, got {}", value.type_name()),
                ctx.line,
            )
        })?;
        let joined = items
            .iter()
            .map(Value::to_display_string)
            .collect::<Vec<_>>()
            .join(&sep);
        Ok(Value::String(joined))
    });
    reg.register("SPLIT", |ctx, args| {
        let s = want_str("SPLIT", args, 0, ctx.line)?;
        let sep = opt_str(args, 1).unwrap_or_else(|| " ".to_string());
        let parts: Vec<Value> = if sep.is_empty() {
            s.chars().map(|c| Value::String(c.to_string())).collect()
        } else {
            s.split(&sep).map(|p| Value::String(p.to_string())).collect()
        };
        Ok(Value::Array(parts))
    });
    reg.register("KEYS", |ctx, args| {
        match args.first() {
            Some(Value::Object(map)) => Ok(Value::Array(
                map.keys().map(|k| Value::String(k.clone())).collect(),
            )),
            Some(other) => Err(RunError::expression(
                format!("KEYS expects an object, got {}", other.type_name()),
                ctx.line,
            )),
            None => Err(RunError::expression("KEYS is missing argument 1", ctx.line)),
        }
    });
}

fn install_json_builtins(reg: &mut BuiltinRegistry) {
    reg.register("JSON_PARSE", |ctx, args| {
        let text = want_str("JSON_PARSE", args, 0, ctx.line)?;
        let parsed: serde_json::Value = serde_json::from_str(&text).map_err(|err| {
            RunError::expression(format!("JSON_PARSE: invalid JSON ({})", err), ctx.line)
        })?;
        Ok(Value::from_json(&parsed))
    });
    reg.register("JSON_STRINGIFY", |ctx, args| {
        let value = args.first().ok_or_else(|| {
            RunError::expression("JSON_STRINGIFY is missing argument 1", ctx.line)
        })?;
        let json = value.to_json();
        let pretty = opt_num("JSON_STRINGIFY", args, 1, ctx.line)?.unwrap_or(0.0) > 0.0;
        let text = if pretty {
            serde_json::to_string_pretty(&json)
        } else {
            serde_json::to_string(&json)
        }
        .map_err(|err| RunError::expression(format!("JSON_STRINGIFY: {}", err), ctx.line))?;
        Ok(Value::String(text))
    });
}

fn install_introspection_builtins(reg: &mut BuiltinRegistry) {
    reg.register("SYMBOL", |ctx, args| {
        let name = want_str("SYMBOL", args, 0, ctx.line)?;
        let valid = !name.is_empty()
            && name
                .chars()
                .next()
                .map(|c| c.is_ascii_alphabetic() || c == '_')
                .unwrap_or(false)
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.');
        let answer = if !valid {
            "BAD"
        } else if ctx.store.is_defined(&name.to_ascii_uppercase()) {
            "VAR"
        } else {
            "LIT"
        };
        Ok(Value::String(answer.to_string()))
    });
    reg.register("DATATYPE", |ctx, args| {
        let value = args.first().ok_or_else(|| {
            RunError::expression("DATATYPE is missing argument 1", ctx.line)
        })?;
        let numeric = value.as_number().is_some();
        match opt_str(args, 1).map(|t| t.to_ascii_uppercase()) {
            None => Ok(Value::String(
                if numeric { "NUM" } else { "CHAR" }.to_string(),
            )),
            Some(t) if t.starts_with('N') => Ok(Value::Boolean(numeric)),
            Some(_) => Ok(Value::Boolean(!numeric)),
        }
    });
    reg.register("TYPEOF", |ctx, args| {
        let value = args.first().ok_or_else(|| {
            RunError::expression("TYPEOF is missing argument 1", ctx.line)
        })?;
        Ok(Value::String(value.type_name().to_string()))
    });
    reg.register("ARG", |ctx, args| {
        match args.first() {
            None => Ok(Value::Number(ctx.frame_args.len() as f64)),
            Some(n) => {
                let index = n.as_index().unwrap_or(0);
                if index == 0 || index > ctx.frame_args.len() {
                    Ok(Value::String(String::new()))
                } else {
                    Ok(ctx.frame_args[index - 1].clone())
                }
            }
        }
    });
}

// ========== Built-in libraries ==========

/// A bundled library loadable via `REQUIRE`.
pub struct NativeLibrary {
    pub name: &'static str,
    pub functions: Vec<(&'static str, BuiltinFn)>,
    /// Exports-shaped metadata (`__metadata__` table) for the registry.
    pub metadata: serde_json::Value,
}

/// Names accepted by the loader's built-in classification.
pub fn native_library_names() -> Vec<String> {
    vec!["string-functions".to_string(), "math-functions".to_string()]
}

pub fn native_library(name: &str) -> Option<NativeLibrary> {
    match name.to_ascii_lowercase().as_str() {
        "string-functions" => Some(string_functions_library()),
        "math-functions" => Some(math_functions_library()),
        _ => None,
    }
}

fn string_functions_library() -> NativeLibrary {
    let mut functions: Vec<(&'static str, BuiltinFn)> = Vec::new();
    functions.push((
        "CENTER",
        Arc::new(|ctx: &BuiltinCtx, args: &[Value]| {
            let s = want_str("CENTER", args, 0, ctx.line)?;
            let width = want_num("CENTER", args, 1, ctx.line)?.max(0.0) as usize;
            let pad = opt_str(args, 2).and_then(|p| p.chars().next()).unwrap_or(' ');
            let len = s.chars().count();
            if len >= width {
                return Ok(Value::String(s.chars().take(width).collect()));
            }
            let total = width - len;
            let left = total / 2;
            let mut out = String::new();
            out.extend(std::iter::repeat(pad).take(left));
            out.push_str(&s);
            out.extend(std::iter::repeat(pad).take(total - left));
            Ok(Value::String(out))
        }),
    ));
    functions.push((
        "WORDPOS",
        Arc::new(|ctx: &BuiltinCtx, args: &[Value]| {
            let phrase = want_str("WORDPOS", args, 0, ctx.line)?;
            let text = want_str("WORDPOS", args, 1, ctx.line)?;
            let needle: Vec<&str> = phrase.split_whitespace().collect();
            let words: Vec<&str> = text.split_whitespace().collect();
            if needle.is_empty() || needle.len() > words.len() {
                return Ok(Value::Number(0.0));
            }
            let found = (0..=words.len() - needle.len())
                .find(|&i| words[i..i + needle.len()] == needle[..])
                .map(|i| i + 1)
                .unwrap_or(0);
            Ok(Value::Number(found as f64))
        }),
    ));
    functions.push((
        "CHANGESTR",
        Arc::new(|ctx: &BuiltinCtx, args: &[Value]| {
            let needle = want_str("CHANGESTR", args, 0, ctx.line)?;
            let haystack = want_str("CHANGESTR", args, 1, ctx.line)?;
            let replacement = want_str("CHANGESTR", args, 2, ctx.line)?;
            if needle.is_empty() {
                return Ok(Value::String(haystack));
            }
            Ok(Value::String(haystack.replace(&needle, &replacement)))
        }),
    ));
    NativeLibrary {
        name: "string-functions",
        functions,
        metadata: serde_json::json!({
            "__metadata__": {
                "CENTER": {
                    "module": "string-functions",
                    "category": "string",
                    "description": "Center a string in a field of the given width",
                    "parameters": ["string", "width", "pad?"],
                    "returns": "string",
                    "examples": ["CENTER('hi', 6)"]
                },
                "WORDPOS": {
                    "module": "string-functions",
                    "category": "string",
                    "description": "1-based word position of a phrase, 0 when absent",
                    "parameters": ["phrase", "string"],
                    "returns": "number"
                },
                "CHANGESTR": {
                    "module": "string-functions",
                    "category": "string",
                    "description": "Replace every occurrence of a substring",
                    "parameters": ["needle", "string", "replacement"],
                    "returns": "string"
                }
            }
        }),
    }
}

fn math_functions_library() -> NativeLibrary {
    let mut functions: Vec<(&'static str, BuiltinFn)> = Vec::new();
    functions.push((
        "CLAMP",
        Arc::new(|ctx: &BuiltinCtx, args: &[Value]| {
            let n = want_num("CLAMP", args, 0, ctx.line)?;
            let lo = want_num("CLAMP", args, 1, ctx.line)?;
            let hi = want_num("CLAMP", args, 2, ctx.line)?;
            Ok(Value::Number(n.max(lo).min(hi)))
        }),
    ));
    functions.push((
        "ROUND",
        Arc::new(|ctx: &BuiltinCtx, args: &[Value]| {
            let n = want_num("ROUND", args, 0, ctx.line)?;
            let digits = opt_num("ROUND", args, 1, ctx.line)?.unwrap_or(0.0).max(0.0) as u32;
            let scale = 10f64.powi(digits as i32);
            Ok(Value::Number((n * scale).round() / scale))
        }),
    ));
    functions.push((
        "GCD",
        Arc::new(|ctx: &BuiltinCtx, args: &[Value]| {
            let mut a = want_num("GCD", args, 0, ctx.line)?.abs().trunc() as u64;
            let mut b = want_num("GCD", args, 1, ctx.line)?.abs().trunc() as u64;
            while b != 0 {
                let t = b;
                b = a % b;
                a = t;
            }
            Ok(Value::Number(a as f64))
        }),
    ));
    NativeLibrary {
        name: "math-functions",
        functions,
        metadata: serde_json::json!({
            "__metadata__": {
                "CLAMP": {
                    "module": "math-functions",
                    "category": "math",
                    "description": "Clamp a number into an inclusive range",
                    "parameters": ["number", "low", "high"],
                    "returns": "number"
                },
                "ROUND": {
                    "module": "math-functions",
                    "category": "math",
                    "description": "Round to the given number of decimals",
                    "parameters": ["number", "digits?"],
                    "returns": "number"
                },
                "GCD": {
                    "module": "math-functions",
                    "category": "math",
                    "description": "Greatest common divisor",
                    "parameters": ["a", "b"],
                    "returns": "number"
                }
            }
        }),
    }
}
