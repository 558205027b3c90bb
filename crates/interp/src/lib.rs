//! Async tree-walking interpreter for the rexon scripting language.
//!
//! The interpreter walks the command tree produced by `rexon-parser`,
//! maintaining a variable store, a subroutine table, a call stack, ADDRESS
//! routing state, function registries, a security-gated `REQUIRE` loader,
//! and structured tracing.
//!
//! # Example
//!
//! ```no_run
//! use rexon_interp::{Interpreter, RunResult};
//! use rexon_parser::parse;
//!
//! # async fn demo() -> Result<(), rexon_interp::error::RunError> {
//! let commands = parse("LET x = \"hello\" |> UPPER\nRETURN x")?;
//! let mut interp = Interpreter::new();
//! let result = interp.run(commands, None, None).await?;
//! assert!(matches!(result, RunResult::Return(value) if value == "HELLO".into()));
//! # Ok(())
//! # }
//! ```
//!
//! Commands execute strictly serially: command `i + 1` begins only after
//! command `i`, including every await it entails, has completed. All state
//! is owned by the interpreter instance; only the metadata registry is
//! shareable, and only explicitly.

pub mod address;
pub mod builtins;
pub mod error;
mod eval;
mod exec;
pub mod output;
pub mod store;
pub mod trace;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use rexon_library::{
    ChannelExchange, ChannelMessage, LibraryLoader, MetadataRegistry, PolicyName, SecurityPolicy,
};
use rexon_parser::{Command, CommandKind};

use crate::address::AddressRouter;
use crate::builtins::{BuiltinFn, BuiltinRegistry};
use crate::output::{ConsoleOutput, OutputHandler};
use crate::store::VariableStore;
use crate::trace::Tracer;

// Re-export commonly used types at the crate root
pub use crate::address::{handler_fn, AddressHandler, AddressRegistration, SourceContext};
pub use crate::error::{HandlerError, RunError};
pub use crate::output::{CollectingOutput, CompositeOutput};
pub use rexon_core::Value;
pub use rexon_parser::parse;

/// Bound on subroutine nesting (including library calls).
pub const MAX_CALL_DEPTH: usize = 100;
/// Bound on external-script nesting.
pub const MAX_EXTERNAL_DEPTH: usize = 16;

/// How a run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum RunResult {
    /// Fell off the end of the program.
    Normal,
    /// Top-level `RETURN`, with its value.
    Return(Value),
    /// `EXIT`, with the process-level exit code.
    Exit(f64),
}

impl RunResult {
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            RunResult::Exit(code) => Some(*code as i32),
            _ => None,
        }
    }
}

/// Statement-level control flow.
#[derive(Debug, Clone)]
pub(crate) enum Flow {
    Normal,
    Leave,
    Iterate,
    Return(Value),
    Signal(String),
    Exit(f64),
}

/// Fallback collaborator for function names nothing local resolves:
/// `send(namespace, function, args)` forwarded over the host's RPC.
#[async_trait]
pub trait ExternalDispatch: Send + Sync {
    async fn send(&self, namespace: &str, name: &str, args: &[Value]) -> Result<Value, RunError>;
}

/// A command list plus its label table.
#[derive(Clone, Default)]
pub(crate) struct ProgramUnit {
    pub commands: Arc<Vec<Command>>,
    pub labels: Arc<HashMap<String, usize>>,
}

impl ProgramUnit {
    pub fn new(commands: Vec<Command>) -> Self {
        let mut labels = HashMap::new();
        for (index, command) in commands.iter().enumerate() {
            if let CommandKind::Label { name, .. } = &command.kind {
                labels.entry(name.clone()).or_insert(index);
            }
        }
        Self {
            commands: Arc::new(commands),
            labels: Arc::new(labels),
        }
    }
}

/// A function registered after startup (by `REQUIRE` or an embedder).
#[derive(Clone)]
pub(crate) enum DynamicFunction {
    Native(BuiltinFn),
    /// Label inside a loaded library program.
    Library { library: usize, index: usize },
}

/// A library loaded from source via `REQUIRE`.
pub(crate) struct LoadedLibrary {
    #[allow(dead_code)]
    pub name: String,
    pub unit: ProgramUnit,
}

pub struct Interpreter {
    pub(crate) store: VariableStore,
    pub(crate) builtins: BuiltinRegistry,
    pub(crate) dynamic: HashMap<String, DynamicFunction>,
    pub(crate) libraries: Vec<LoadedLibrary>,
    pub(crate) router: AddressRouter,
    pub(crate) tracer: Tracer,
    pub(crate) output: Arc<dyn OutputHandler>,
    pub(crate) external_dispatch: Option<Arc<dyn ExternalDispatch>>,
    pub(crate) loader: LibraryLoader,
    pub(crate) metadata: Arc<RwLock<MetadataRegistry>>,
    pub(crate) channel: Option<Arc<ChannelExchange>>,

    // Per-run state
    pub(crate) program: ProgramUnit,
    pub(crate) current_unit: ProgramUnit,
    pub(crate) source_lines: Vec<String>,
    pub(crate) script_path: Option<PathBuf>,
    pub(crate) script_args: Vec<Value>,
    pub(crate) frame_args: Vec<Vec<Value>>,
    pub(crate) call_depth: usize,
    pub(crate) external_depth: usize,
    pub(crate) current_line: usize,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl Interpreter {
    pub fn new() -> Self {
        Self {
            store: VariableStore::new(),
            builtins: BuiltinRegistry::with_stdlib(),
            dynamic: HashMap::new(),
            libraries: Vec::new(),
            router: AddressRouter::default(),
            tracer: Tracer::new(false),
            output: Arc::new(ConsoleOutput),
            external_dispatch: None,
            loader: LibraryLoader::new(builtins::native_library_names()),
            metadata: Arc::new(RwLock::new(MetadataRegistry::new())),
            channel: None,
            program: ProgramUnit::default(),
            current_unit: ProgramUnit::default(),
            source_lines: Vec::new(),
            script_path: None,
            script_args: Vec::new(),
            frame_args: vec![Vec::new()],
            call_depth: 0,
            external_depth: 0,
            current_line: 1,
        }
    }

    // ========== Embedding API ==========

    /// Register a named ADDRESS target.
    pub fn register_address_target(&mut self, name: &str, registration: AddressRegistration) {
        self.router.register(name, registration);
    }

    /// Register a host function callable by (uppercased) name.
    pub fn register_builtin<F>(&mut self, name: &str, f: F)
    where
        F: Fn(&builtins::BuiltinCtx, &[Value]) -> Result<Value, RunError>
            + Send
            + Sync
            + 'static,
    {
        self.builtins.register(name, f);
    }

    /// Select one of the named security policies for `REQUIRE`.
    pub fn set_security_policy(&mut self, name: &str) -> Result<(), RunError> {
        let policy: PolicyName = name
            .parse()
            .map_err(|message: String| RunError::expression(message, self.current_line))?;
        self.loader.set_policy(SecurityPolicy::named(policy));
        Ok(())
    }

    /// Add a reference to the security blocklist.
    pub fn block_library(&mut self, reference: &str) {
        self.loader.policy_mut().block(reference);
    }

    pub fn set_output_handler(&mut self, handler: Arc<dyn OutputHandler>) {
        self.output = handler;
    }

    /// Install the streaming progress callback through which checkpoint
    /// messages (remote REQUIRE, permission requests) leave the process.
    pub fn set_streaming_progress_callback<F>(&mut self, callback: F)
    where
        F: Fn(&ChannelMessage) + Send + Sync + 'static,
    {
        let exchange = Arc::new(ChannelExchange::new(callback));
        self.loader.set_channel(exchange.clone());
        self.channel = Some(exchange);
    }

    /// Feed a message from the host event channel (require / permission
    /// responses).
    pub fn deliver_channel_message(&self, message: ChannelMessage) {
        if let Some(channel) = &self.channel {
            channel.deliver(message);
        } else {
            tracing::warn!("channel message delivered with no channel configured");
        }
    }

    /// The live checkpoint exchange, for hosts that pump responses from
    /// their own event loop.
    pub fn channel_exchange(&self) -> Option<Arc<ChannelExchange>> {
        self.channel.clone()
    }

    /// Install the fallback dispatcher for unresolved function names.
    pub fn set_external_dispatch(&mut self, dispatch: Arc<dyn ExternalDispatch>) {
        self.external_dispatch = Some(dispatch);
    }

    /// Share a metadata registry between interpreter instances.
    pub fn set_metadata_registry(&mut self, registry: Arc<RwLock<MetadataRegistry>>) {
        self.metadata = registry;
    }

    pub fn metadata_registry(&self) -> Arc<RwLock<MetadataRegistry>> {
        self.metadata.clone()
    }

    pub fn set_trace(&mut self, enabled: bool) {
        self.tracer.set_enabled(enabled);
    }

    pub fn trace_lines(&self) -> &[String] {
        self.tracer.lines()
    }

    /// Positional arguments visible to the top-level `PARSE ARG`.
    pub fn set_script_arguments(&mut self, args: Vec<Value>) {
        self.script_args = args;
    }

    /// Mark this interpreter as remote-orchestrated; scripts observe the
    /// `SCRO_REMOTE` and `SCRO_ORCHESTRATION_ID` variables.
    pub fn enable_remote_orchestration(&mut self, orchestration_id: &str) {
        self.store.set("SCRO_REMOTE", Value::String("true".to_string()));
        self.store.set(
            "SCRO_ORCHESTRATION_ID",
            Value::String(orchestration_id.to_string()),
        );
    }

    pub fn get_variable(&self, name: &str) -> Option<Value> {
        self.store.get(&name.to_ascii_uppercase()).cloned()
    }

    pub fn set_variable(&mut self, name: &str, value: Value) {
        self.store.set(name.to_ascii_uppercase(), value);
    }

    /// Override the timeout for remote `REQUIRE` exchanges.
    pub fn set_require_timeout(&mut self, timeout: std::time::Duration) {
        self.loader.set_require_timeout(timeout);
    }

    /// Override the timeout for permission exchanges.
    pub fn set_approval_timeout(&mut self, timeout: std::time::Duration) {
        self.loader.set_approval_timeout(timeout);
    }

    // ========== Execution ==========

    /// Execute a parsed command list.
    ///
    /// `source` enables trace text and handler source context; `script_path`
    /// gives relative `REQUIRE` and external `CALL` references a home.
    pub async fn run(
        &mut self,
        commands: Vec<Command>,
        source: Option<&str>,
        script_path: Option<&Path>,
    ) -> Result<RunResult, RunError> {
        self.program = ProgramUnit::new(commands);
        self.current_unit = self.program.clone();
        self.source_lines = source
            .map(|s| s.lines().map(str::to_string).collect())
            .unwrap_or_default();
        self.script_path = script_path.map(Path::to_path_buf);
        self.frame_args = vec![self.script_args.clone()];
        self.call_depth = 0;
        self.current_line = 1;
        self.execute_program().await
    }

    /// Parse and run in one step.
    pub async fn run_source(
        &mut self,
        source: &str,
        script_path: Option<&Path>,
    ) -> Result<RunResult, RunError> {
        let commands = rexon_parser::parse(source)?;
        self.run(commands, Some(source), script_path).await
    }

    /// Trimmed text of a source line, empty when unavailable.
    pub(crate) fn source_text(&self, line: usize) -> String {
        self.source_lines
            .get(line.saturating_sub(1))
            .map(|l| l.trim().to_string())
            .unwrap_or_default()
    }
}
