//! Library reference classification.
//!
//! Every `REQUIRE` candidate is classified before any I/O happens; the
//! security policy decides from the class and risk alone. Direct-source
//! references must pass structural validation (`host/owner/name(@version)?`)
//! to be classified as such at all.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LibraryClass {
    /// Bare name present in the built-in set.
    Builtin,
    /// Relative path through a `src/` segment; resolved against the
    /// internal registry, not the filesystem.
    BuiltinSource,
    /// `./...` or `../...` relative to the requiring script.
    LocalSource,
    /// `central:<owner>/<name>@<version>`.
    CentralRegistry,
    /// `<source-host>/<owner>/<name>(@<version>)?`.
    DirectSource,
    Unknown,
}

impl fmt::Display for LibraryClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            LibraryClass::Builtin => "built-in",
            LibraryClass::BuiltinSource => "built-in-source",
            LibraryClass::LocalSource => "local-source",
            LibraryClass::CentralRegistry => "central-registry",
            LibraryClass::DirectSource => "direct-source",
            LibraryClass::Unknown => "unknown",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        })
    }
}

/// A classified reference.
#[derive(Debug, Clone, PartialEq)]
pub struct LibraryReference {
    pub raw: String,
    pub class: LibraryClass,
    pub risk: RiskLevel,
}

static DIRECT_SOURCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^[A-Za-z0-9][A-Za-z0-9.-]*\.[A-Za-z]{2,}/[A-Za-z0-9._-]+/[A-Za-z0-9._-]+(@[A-Za-z0-9.+_-]+)?$",
    )
    .expect("direct-source shape")
});

static CENTRAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^central:[A-Za-z0-9._-]+/[A-Za-z0-9._-]+(@[A-Za-z0-9.+_-]+)?$")
        .expect("central-registry shape")
});

static BARE_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9._-]*$").expect("bare name shape"));

/// Classify one candidate. `builtin_names` is matched case-insensitively.
pub fn classify(raw: &str, builtin_names: &HashSet<String>) -> LibraryReference {
    let reference = raw.trim();
    let class = classify_inner(reference, builtin_names);
    let risk = match class {
        LibraryClass::Builtin | LibraryClass::BuiltinSource => RiskLevel::Low,
        LibraryClass::CentralRegistry => RiskLevel::Low,
        LibraryClass::LocalSource | LibraryClass::DirectSource => RiskLevel::Medium,
        LibraryClass::Unknown => RiskLevel::High,
    };
    LibraryReference {
        raw: reference.to_string(),
        class,
        risk,
    }
}

fn classify_inner(reference: &str, builtin_names: &HashSet<String>) -> LibraryClass {
    if reference.starts_with("central:") {
        if CENTRAL.is_match(reference) {
            return LibraryClass::CentralRegistry;
        }
        return LibraryClass::Unknown;
    }
    if reference.contains("./src/") || reference.contains("../src/") {
        return LibraryClass::BuiltinSource;
    }
    if reference.starts_with("./") || reference.starts_with("../") {
        return LibraryClass::LocalSource;
    }
    if !reference.contains('/') {
        let lowered = reference.to_ascii_lowercase();
        if BARE_NAME.is_match(reference) && builtin_names.contains(&lowered) {
            return LibraryClass::Builtin;
        }
        return LibraryClass::Unknown;
    }
    if DIRECT_SOURCE.is_match(reference) {
        return LibraryClass::DirectSource;
    }
    LibraryClass::Unknown
}

/// Short name of a library derived from its reference (file stem for paths,
/// last component for registry coordinates).
pub fn library_name(reference: &str) -> String {
    let after_colon = reference.rsplit(':').next().unwrap_or(reference);
    let last = after_colon.rsplit('/').next().unwrap_or(after_colon);
    let no_version = last.split('@').next().unwrap_or(last);
    match no_version.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()) => {
            stem.to_string()
        }
        _ => no_version.to_string(),
    }
}
