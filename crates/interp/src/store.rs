//! Variable store.
//!
//! An insertion-ordered name → value mapping with call-frame semantics.
//! Ordinary subroutine calls share the caller's frame; `PROCEDURE` labels
//! and external scripts push a fresh one. `RC` and `RESULT` are seeded in
//! every frame so they are always present.

use indexmap::IndexMap;
use rexon_core::Value;

#[derive(Debug, Clone)]
pub struct VariableStore {
    frames: Vec<IndexMap<String, Value>>,
}

impl Default for VariableStore {
    fn default() -> Self {
        Self {
            frames: vec![seeded_frame()],
        }
    }
}

fn seeded_frame() -> IndexMap<String, Value> {
    let mut frame = IndexMap::new();
    frame.insert("RC".to_string(), Value::Number(0.0));
    frame.insert("RESULT".to_string(), Value::Undefined);
    frame
}

impl VariableStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn top(&self) -> &IndexMap<String, Value> {
        self.frames.last().expect("at least one frame")
    }

    fn top_mut(&mut self) -> &mut IndexMap<String, Value> {
        self.frames.last_mut().expect("at least one frame")
    }

    /// Read a variable from the current frame.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.top().get(name)
    }

    pub fn is_defined(&self, name: &str) -> bool {
        self.top().contains_key(name)
    }

    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.top_mut().insert(name.into(), value);
    }

    /// Fresh frame for a PROCEDURE body or an external script.
    pub fn push_frame(&mut self) {
        self.frames.push(seeded_frame());
    }

    pub fn pop_frame(&mut self) {
        if self.frames.len() > 1 {
            self.frames.pop();
        }
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn set_rc(&mut self, rc: f64) {
        self.set("RC", Value::Number(rc));
    }

    pub fn set_result(&mut self, value: Value) {
        self.set("RESULT", value);
    }

    /// Names in insertion order, for diagnostics and tests.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.top().keys().map(String::as_str)
    }
}
