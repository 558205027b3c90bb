//! REQUIRE resolution.
//!
//! The loader turns a `REQUIRE` argument into something the interpreter can
//! register: either the name of a bundled built-in library or source text
//! fetched from disk or from the host over the checkpoint channel. The
//! security policy gates every candidate before any I/O happens.

use crate::channel::ChannelExchange;
use crate::error::LibraryError;
use crate::policy::{PolicyDecision, SecurityPolicy};
use crate::reference::{classify, library_name, LibraryClass, LibraryReference};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Where the requiring script lives; relative references resolve against
/// this.
#[derive(Debug, Clone, Default)]
pub struct LoadContext {
    pub script_dir: Option<PathBuf>,
}

/// A successfully resolved candidate.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedLibrary {
    /// A bundled library; the interpreter registers its native functions.
    Builtin { name: String },
    /// Library source text to be parsed and registered by the interpreter.
    Source { name: String, code: String },
}

pub struct LibraryLoader {
    builtin_names: HashSet<String>,
    policy: SecurityPolicy,
    channel: Option<Arc<ChannelExchange>>,
    require_timeout: Duration,
    approval_timeout: Duration,
}

impl LibraryLoader {
    /// `builtin_names` are matched case-insensitively.
    pub fn new(builtin_names: impl IntoIterator<Item = String>) -> Self {
        Self {
            builtin_names: builtin_names
                .into_iter()
                .map(|n| n.to_ascii_lowercase())
                .collect(),
            policy: SecurityPolicy::default(),
            channel: None,
            require_timeout: Duration::from_secs(30),
            approval_timeout: Duration::from_secs(10),
        }
    }

    pub fn set_policy(&mut self, policy: SecurityPolicy) {
        self.policy = policy;
    }

    pub fn policy_mut(&mut self) -> &mut SecurityPolicy {
        &mut self.policy
    }

    pub fn set_channel(&mut self, channel: Arc<ChannelExchange>) {
        self.channel = Some(channel);
    }

    pub fn set_require_timeout(&mut self, timeout: Duration) {
        self.require_timeout = timeout;
    }

    pub fn set_approval_timeout(&mut self, timeout: Duration) {
        self.approval_timeout = timeout;
    }

    pub fn classify(&self, reference: &str) -> LibraryReference {
        classify(reference, &self.builtin_names)
    }

    /// Resolve a comma-separated preference list: candidates are trimmed
    /// and tried left to right; the first success wins, and an overall
    /// failure names every attempt.
    pub async fn resolve_list(
        &mut self,
        list: &str,
        ctx: &LoadContext,
    ) -> Result<ResolvedLibrary, LibraryError> {
        let candidates: Vec<&str> = list
            .split(',')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .collect();
        if candidates.is_empty() {
            return Err(LibraryError::AllCandidatesFailed {
                list: list.to_string(),
                attempts: "(no candidates)".to_string(),
            });
        }

        let mut attempts = Vec::new();
        for candidate in candidates {
            match self.resolve(candidate, ctx).await {
                Ok(resolved) => return Ok(resolved),
                Err(err) => {
                    tracing::debug!(candidate, %err, "REQUIRE candidate failed");
                    attempts.push(format!("{} ({})", candidate, err));
                }
            }
        }
        Err(LibraryError::AllCandidatesFailed {
            list: list.to_string(),
            attempts: attempts.join("; "),
        })
    }

    /// Resolve one candidate.
    pub async fn resolve(
        &mut self,
        reference: &str,
        ctx: &LoadContext,
    ) -> Result<ResolvedLibrary, LibraryError> {
        let classified = self.classify(reference);

        match self.policy.evaluate(&classified) {
            PolicyDecision::Allow => {}
            PolicyDecision::Deny(err) => return Err(err),
            PolicyDecision::RequireApproval => {
                self.exchange_approval(&classified).await?;
            }
        }

        match classified.class {
            LibraryClass::Builtin => Ok(ResolvedLibrary::Builtin {
                name: classified.raw.to_ascii_lowercase(),
            }),
            LibraryClass::BuiltinSource => {
                let name = library_name(&classified.raw).to_ascii_lowercase();
                if self.builtin_names.contains(&name) {
                    Ok(ResolvedLibrary::Builtin { name })
                } else {
                    Err(LibraryError::UnknownBuiltin {
                        reference: classified.raw,
                    })
                }
            }
            LibraryClass::LocalSource => self.load_local(&classified, ctx).await,
            LibraryClass::CentralRegistry
            | LibraryClass::DirectSource
            | LibraryClass::Unknown => self.load_remote(&classified).await,
        }
    }

    async fn exchange_approval(
        &mut self,
        reference: &LibraryReference,
    ) -> Result<(), LibraryError> {
        let channel = self
            .channel
            .clone()
            .ok_or_else(|| LibraryError::PermissionDenied {
                reference: reference.raw.clone(),
                reason: "no approval channel available".to_string(),
            })?;
        let metadata = serde_json::json!({
            "class": reference.class.to_string(),
        });
        let reply = channel
            .request_permission(
                &reference.raw,
                &reference.risk.to_string(),
                metadata,
                self.approval_timeout,
            )
            .await;
        if reply.approved {
            self.policy.record_approval(&reference.raw);
            Ok(())
        } else {
            Err(LibraryError::PermissionDenied {
                reference: reference.raw.clone(),
                reason: reply.reason.unwrap_or_else(|| "denied".to_string()),
            })
        }
    }

    async fn load_local(
        &self,
        reference: &LibraryReference,
        ctx: &LoadContext,
    ) -> Result<ResolvedLibrary, LibraryError> {
        let script_dir = ctx
            .script_dir
            .as_ref()
            .ok_or_else(|| LibraryError::NoScriptContext {
                reference: reference.raw.clone(),
            })?;
        let path = script_dir.join(&reference.raw);
        if !path.exists() {
            return Err(LibraryError::FileNotFound {
                path: path.display().to_string(),
            });
        }
        let code =
            tokio::fs::read_to_string(&path)
                .await
                .map_err(|err| LibraryError::Io {
                    path: path.display().to_string(),
                    message: err.to_string(),
                })?;
        Ok(ResolvedLibrary::Source {
            name: library_name(&reference.raw),
            code,
        })
    }

    async fn load_remote(
        &self,
        reference: &LibraryReference,
    ) -> Result<ResolvedLibrary, LibraryError> {
        let channel =
            self.channel
                .as_ref()
                .ok_or_else(|| LibraryError::NoCommunicationChannel {
                    reference: reference.raw.clone(),
                })?;
        let reply = channel
            .request_library(&reference.raw, self.require_timeout)
            .await;
        if !reply.success {
            return match reply.error.as_deref() {
                Some("timeout") => Err(LibraryError::Timeout {
                    reference: reference.raw.clone(),
                }),
                Some(message) => Err(LibraryError::RemoteFailed {
                    reference: reference.raw.clone(),
                    message: message.to_string(),
                }),
                None => Err(LibraryError::RemoteFailed {
                    reference: reference.raw.clone(),
                    message: "request failed".to_string(),
                }),
            };
        }
        match reply.library_code {
            Some(code) => Ok(ResolvedLibrary::Source {
                name: library_name(&reference.raw),
                code,
            }),
            None => Err(LibraryError::RemoteFailed {
                reference: reference.raw.clone(),
                message: "response carried no library code".to_string(),
            }),
        }
    }
}
