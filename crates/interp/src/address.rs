//! ADDRESS routing.
//!
//! Quoted commands, HEREDOCs, and MATCHING-collected line groups are routed
//! to registered handlers. The router owns the current-target state and the
//! MATCHING accumulation buffer; the driver applies handler results to `RC`
//! and `RESULT`.

use crate::error::HandlerError;
use async_trait::async_trait;
use regex::Regex;
use rexon_core::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Context passed to every handler invocation.
#[derive(Debug, Clone)]
pub struct SourceContext {
    /// Source line of the originating command's head.
    pub line: usize,
    /// Trimmed text of that line (empty when the source is unavailable).
    pub source_line: String,
    pub script_path: Option<String>,
    /// Registered name of the target being invoked.
    pub target: String,
}

/// An ADDRESS command handler.
///
/// `command_or_method` is the command payload for command dispatches and the
/// method name for `CALL`-style method invocations. The returned value is
/// written whole to `RESULT`; a `success`/`rc` field, when present, derives
/// `RC`.
#[async_trait]
pub trait AddressHandler: Send + Sync {
    async fn handle(
        &self,
        command_or_method: &str,
        params: &Value,
        context: &SourceContext,
    ) -> Result<Value, HandlerError>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F> AddressHandler for FnHandler<F>
where
    F: Fn(&str, &Value, &SourceContext) -> Result<Value, HandlerError> + Send + Sync,
{
    async fn handle(
        &self,
        command_or_method: &str,
        params: &Value,
        context: &SourceContext,
    ) -> Result<Value, HandlerError> {
        (self.0)(command_or_method, params, context)
    }
}

/// Wrap a synchronous closure as a handler. Convenient for embedders and
/// tests; handlers doing real I/O implement [`AddressHandler`] directly.
pub fn handler_fn<F>(f: F) -> Arc<dyn AddressHandler>
where
    F: Fn(&str, &Value, &SourceContext) -> Result<Value, HandlerError> + Send + Sync + 'static,
{
    Arc::new(FnHandler(f))
}

/// What an embedder registers for a target.
#[derive(Clone)]
pub struct AddressRegistration {
    pub handler: Arc<dyn AddressHandler>,
    /// Method names invocable via `CALL`; matched case-insensitively.
    pub methods: Vec<String>,
    pub metadata: Value,
}

impl AddressRegistration {
    pub fn new(handler: Arc<dyn AddressHandler>) -> Self {
        Self {
            handler,
            methods: Vec::new(),
            metadata: Value::Undefined,
        }
    }

    pub fn with_methods(mut self, methods: impl IntoIterator<Item = String>) -> Self {
        self.methods = methods.into_iter().collect();
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }
}

#[derive(Clone)]
pub struct AddressTarget {
    /// Name as registered.
    pub name: String,
    pub registration: AddressRegistration,
}

/// One payload to forward to the current target.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchDispatch {
    pub payload: String,
}

/// A buffered MATCHING payload owed to a target before a state change
/// completes.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingFlush {
    pub target: String,
    pub payload: String,
    pub pattern: String,
}

/// MATCHING-mode state for the current target.
#[derive(Debug)]
pub struct MatchingState {
    pub pattern: String,
    pub multiline: bool,
    regex: Regex,
    buffer: Vec<String>,
}

impl MatchingState {
    pub fn new(pattern: &str, multiline: bool) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: pattern.to_string(),
            multiline,
            regex: Regex::new(pattern)?,
            buffer: Vec::new(),
        })
    }

    /// Route one raw source line, returning the dispatches it produces in
    /// order. In MULTILINE mode matching lines accumulate and a
    /// non-matching line first flushes the buffer, then goes out verbatim.
    pub fn apply(&mut self, raw: &str) -> Vec<MatchDispatch> {
        let extracted = self.regex.captures(raw).map(|caps| {
            caps.get(1)
                .map(|m| m.as_str())
                .unwrap_or_default()
                .to_string()
        });

        match (self.multiline, extracted) {
            (true, Some(content)) => {
                let trimmed = content.trim();
                if !trimmed.is_empty() {
                    self.buffer.push(trimmed.to_string());
                }
                Vec::new()
            }
            (true, None) => {
                let mut out = Vec::new();
                if let Some(flushed) = self.flush() {
                    out.push(MatchDispatch { payload: flushed });
                }
                out.push(MatchDispatch {
                    payload: raw.to_string(),
                });
                out
            }
            (false, Some(content)) => vec![MatchDispatch {
                payload: content.trim().to_string(),
            }],
            (false, None) => vec![MatchDispatch {
                payload: raw.to_string(),
            }],
        }
    }

    /// Drain the accumulation buffer into one `\n`-joined payload.
    pub fn flush(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            None
        } else {
            let payload = self.buffer.join("\n");
            self.buffer.clear();
            Some(payload)
        }
    }
}

/// Current target, MATCHING state, and the registry of targets.
#[derive(Default)]
pub struct AddressRouter {
    targets: HashMap<String, AddressTarget>,
    current: Option<String>,
    matching: Option<MatchingState>,
}

impl AddressRouter {
    pub fn register(&mut self, name: &str, registration: AddressRegistration) {
        self.targets.insert(
            name.to_ascii_lowercase(),
            AddressTarget {
                name: name.to_string(),
                registration,
            },
        );
    }

    /// Case-insensitive lookup.
    pub fn get(&self, name: &str) -> Option<&AddressTarget> {
        self.targets.get(&name.to_ascii_lowercase())
    }

    pub fn current_name(&self) -> Option<&str> {
        self.current.as_deref()
    }

    pub fn current_target(&self) -> Option<&AddressTarget> {
        self.current.as_deref().and_then(|name| self.get(name))
    }

    /// Switch targets. Returns any buffered MATCHING payload, which must be
    /// flushed to the *previous* target before the switch takes effect.
    #[must_use]
    pub fn set_current(&mut self, name: &str) -> Option<PendingFlush> {
        let pending = self.take_pending_flush();
        self.current = Some(name.to_string());
        pending
    }

    /// Arm MATCHING mode on `name`. Same last-chance flush contract as
    /// [`AddressRouter::set_current`].
    #[must_use]
    pub fn set_matching(&mut self, name: &str, state: MatchingState) -> Option<PendingFlush> {
        let pending = self.take_pending_flush();
        self.current = Some(name.to_string());
        self.matching = Some(state);
        pending
    }

    pub fn matching_mut(&mut self) -> Option<&mut MatchingState> {
        self.matching.as_mut()
    }

    pub fn matching(&self) -> Option<&MatchingState> {
        self.matching.as_ref()
    }

    /// Drain the MATCHING buffer and clear the MATCHING state.
    fn take_pending_flush(&mut self) -> Option<PendingFlush> {
        let mut state = self.matching.take()?;
        let pattern = state.pattern.clone();
        let payload = state.flush()?;
        let target = self.current.clone()?;
        Some(PendingFlush {
            target,
            payload,
            pattern,
        })
    }

    /// End-of-program flush: buffered payload for the current target.
    #[must_use]
    pub fn final_flush(&mut self) -> Option<PendingFlush> {
        self.take_pending_flush()
    }

    /// Canonical method spelling if the target exposes `name` as a method.
    pub fn method_of<'a>(&'a self, target: &'a AddressTarget, name: &str) -> Option<&'a str> {
        target
            .registration
            .methods
            .iter()
            .find(|m| m.eq_ignore_ascii_case(name))
            .map(String::as_str)
    }
}
