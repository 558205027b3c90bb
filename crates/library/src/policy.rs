//! Named security policies for library references.
//!
//! A policy never executes anything: it looks at a classified reference and
//! answers allow / deny / ask. Approvals granted through the permission
//! exchange are recorded for the lifetime of the policy value.

use crate::error::LibraryError;
use crate::reference::{LibraryClass, LibraryReference};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PolicyName {
    Strict,
    Moderate,
    #[default]
    Default,
    Permissive,
}

impl fmt::Display for PolicyName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PolicyName::Strict => "strict",
            PolicyName::Moderate => "moderate",
            PolicyName::Default => "default",
            PolicyName::Permissive => "permissive",
        })
    }
}

impl FromStr for PolicyName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "strict" => Ok(PolicyName::Strict),
            "moderate" => Ok(PolicyName::Moderate),
            "default" => Ok(PolicyName::Default),
            "permissive" => Ok(PolicyName::Permissive),
            other => Err(format!("unknown security policy '{}'", other)),
        }
    }
}

/// Outcome of a policy check.
#[derive(Debug, Clone, PartialEq)]
pub enum PolicyDecision {
    Allow,
    Deny(LibraryError),
    /// The reference needs an explicit approval exchange with the host.
    RequireApproval,
}

#[derive(Debug, Clone, Default)]
pub struct SecurityPolicy {
    name: PolicyName,
    blocklist: HashSet<String>,
    approved: HashSet<String>,
}

impl SecurityPolicy {
    pub fn named(name: PolicyName) -> Self {
        Self {
            name,
            ..Self::default()
        }
    }

    pub fn name(&self) -> PolicyName {
        self.name
    }

    /// Add a reference to the blocklist. Matched case-insensitively against
    /// the raw reference.
    pub fn block(&mut self, reference: impl Into<String>) {
        self.blocklist.insert(reference.into().to_ascii_lowercase());
    }

    /// Record a host-approved reference for the process lifetime.
    pub fn record_approval(&mut self, reference: &str) {
        self.approved.insert(reference.to_ascii_lowercase());
    }

    pub fn is_approved(&self, reference: &str) -> bool {
        self.approved.contains(&reference.to_ascii_lowercase())
    }

    pub fn evaluate(&self, reference: &LibraryReference) -> PolicyDecision {
        if self.blocklist.contains(&reference.raw.to_ascii_lowercase()) {
            return PolicyDecision::Deny(LibraryError::Blocklisted {
                reference: reference.raw.clone(),
            });
        }
        if self.is_approved(&reference.raw) {
            return PolicyDecision::Allow;
        }

        let deny = || {
            PolicyDecision::Deny(LibraryError::PolicyDenied {
                policy: self.name.to_string(),
                class: reference.class.to_string(),
                reference: reference.raw.clone(),
            })
        };

        match self.name {
            PolicyName::Strict => match reference.class {
                LibraryClass::Builtin
                | LibraryClass::BuiltinSource
                | LibraryClass::CentralRegistry => PolicyDecision::Allow,
                _ => deny(),
            },
            PolicyName::Moderate | PolicyName::Default => match reference.class {
                LibraryClass::Unknown => PolicyDecision::RequireApproval,
                _ => PolicyDecision::Allow,
            },
            PolicyName::Permissive => PolicyDecision::Allow,
        }
    }
}
