//! Stem-array helpers.
//!
//! Classical REXX models sequences as "stem arrays": objects whose numeric
//! keys `1..n` hold the elements and whose `0` key holds the count. Some
//! built-ins return this shape, so sequence-consuming built-ins accept both
//! native arrays and stems transparently.

use crate::value::Value;
use indexmap::IndexMap;

/// True when the object looks like a stem array: a numeric `0` count and an
/// element under every key `1..=count`.
pub fn is_stem_array(map: &IndexMap<String, Value>) -> bool {
    let count = match map.get("0").and_then(Value::as_index) {
        Some(c) => c,
        None => return false,
    };
    (1..=count).all(|i| map.contains_key(&i.to_string()))
}

/// Elements of a stem array in index order. Empty when the shape is not a
/// stem.
pub fn stem_values(map: &IndexMap<String, Value>) -> Vec<Value> {
    if !is_stem_array(map) {
        return Vec::new();
    }
    let count = map.get("0").and_then(Value::as_index).unwrap_or(0);
    (1..=count)
        .filter_map(|i| map.get(&i.to_string()).cloned())
        .collect()
}

/// Build a stem array from a sequence.
pub fn stem_from_values(values: Vec<Value>) -> IndexMap<String, Value> {
    let mut map = IndexMap::new();
    map.insert("0".to_string(), Value::Number(values.len() as f64));
    for (i, v) in values.into_iter().enumerate() {
        map.insert((i + 1).to_string(), v);
    }
    map
}
