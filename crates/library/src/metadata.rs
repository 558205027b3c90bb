//! Function metadata registry.
//!
//! Libraries register descriptions of their exported functions (module,
//! category, description, parameters, returns, examples) into a queryable
//! table. The registry is deliberately not a process global: each
//! interpreter owns or shares one explicitly, so tests can instantiate
//! fresh registries.

use indexmap::IndexMap;

/// Metadata for one callable, stored as loosely-typed JSON plus the fields
/// the queries index on.
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataEntry {
    /// Canonical (uppercase) function name.
    pub name: String,
    pub module: Option<String>,
    pub category: Option<String>,
    pub meta: serde_json::Value,
}

#[derive(Debug, Clone, Default)]
pub struct MetadataRegistry {
    entries: IndexMap<String, MetadataEntry>,
}

/// Keys a module may expose its metadata table under.
const METADATA_KEYS: &[&str] = &["__metadata__", "metadata", "_metadata"];

impl MetadataRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register metadata for one function. Later registrations replace
    /// earlier ones.
    pub fn register(&mut self, name: &str, meta: serde_json::Value) {
        let canonical = name.to_ascii_uppercase();
        let module = string_field(&meta, "module");
        let category = string_field(&meta, "category");
        self.entries.insert(
            canonical.clone(),
            MetadataEntry {
                name: canonical,
                module,
                category,
                meta,
            },
        );
    }

    /// Register every function described by a module's exports object. The
    /// metadata table may live under `__metadata__`, `metadata`, or
    /// `_metadata`; each entry is stamped with the module name and an
    /// optional function-name prefix.
    pub fn register_module(
        &mut self,
        exports: &serde_json::Value,
        module_name: &str,
        prefix: Option<&str>,
    ) -> usize {
        let table = METADATA_KEYS
            .iter()
            .find_map(|key| exports.get(key))
            .and_then(|v| v.as_object());
        let table = match table {
            Some(t) => t,
            None => return 0,
        };
        let mut registered = 0;
        for (function, meta) in table {
            let mut meta = meta.clone();
            if let Some(obj) = meta.as_object_mut() {
                obj.entry("module".to_string())
                    .or_insert_with(|| serde_json::Value::String(module_name.to_string()));
            }
            let name = match prefix {
                Some(p) => format!("{}{}", p, function),
                None => function.clone(),
            };
            self.register(&name, meta);
            registered += 1;
        }
        registered
    }

    /// Case-insensitive lookup.
    pub fn get(&self, name: &str) -> Option<&MetadataEntry> {
        self.entries.get(&name.to_ascii_uppercase())
    }

    pub fn by_category(&self, category: &str) -> Vec<&MetadataEntry> {
        self.entries
            .values()
            .filter(|e| {
                e.category
                    .as_deref()
                    .map(|c| c.eq_ignore_ascii_case(category))
                    .unwrap_or(false)
            })
            .collect()
    }

    pub fn by_module(&self, module: &str) -> Vec<&MetadataEntry> {
        self.entries
            .values()
            .filter(|e| {
                e.module
                    .as_deref()
                    .map(|m| m.eq_ignore_ascii_case(module))
                    .unwrap_or(false)
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn string_field(meta: &serde_json::Value, field: &str) -> Option<String> {
    meta.get(field)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}
