//! The interpreter driver.
//!
//! Walks commands with a program counter, handling control flow (`IF`,
//! `SELECT`, `DO`, `CALL`, `RETURN`, `SIGNAL`, `EXIT`), ADDRESS routing,
//! `REQUIRE`, and external script calls. Execution is strictly serial: the
//! next command starts only after the current one, including every await it
//! entails, has finished.

use async_recursion::async_recursion;
use indexmap::IndexMap;
use std::path::{Path, PathBuf};

use rexon_core::Value;
use rexon_library::{LibraryError, LoadContext, ResolvedLibrary};
use rexon_parser::ast::{ArgPattern, CallTarget, Command, CommandKind, DoSpec};

use crate::address::{MatchingState, PendingFlush, SourceContext};
use crate::builtins::{native_library, sequence_values};
use crate::error::RunError;
use crate::{
    DynamicFunction, Flow, Interpreter, LoadedLibrary, ProgramUnit, RunResult, MAX_CALL_DEPTH,
    MAX_EXTERNAL_DEPTH,
};

/// Labels mark positions and raw lines are handler text; neither is an
/// executable command for the trace.
fn is_traceable(kind: &CommandKind) -> bool {
    !matches!(kind, CommandKind::Label { .. } | CommandKind::RawLine(_))
}

fn empty_params() -> Value {
    Value::Object(IndexMap::new())
}

fn matching_params(pattern: &str) -> Value {
    let mut map = IndexMap::new();
    map.insert(
        "_addressMatchingPattern".to_string(),
        Value::String(pattern.to_string()),
    );
    Value::Object(map)
}

/// Positional CALL arguments as a numbered parameter object.
fn positional_params(argv: &[Value]) -> Value {
    let mut map = IndexMap::new();
    for (i, value) in argv.iter().enumerate() {
        map.insert((i + 1).to_string(), value.clone());
    }
    Value::Object(map)
}

/// `RC` derived from a handler result: an `rc` field wins, then a
/// `success` boolean, then an `errorCode`; anything else means 0.
fn derive_rc(value: &Value) -> f64 {
    if let Value::Object(map) = value {
        if let Some(rc) = map.get("rc").and_then(Value::as_number) {
            return rc;
        }
        if let Some(success) = map.get("success") {
            return if success.is_truthy() { 0.0 } else { 1.0 };
        }
        if let Some(code) = map.get("errorCode").and_then(Value::as_number) {
            return code;
        }
    }
    0.0
}

impl Interpreter {
    /// Top-level program loop over `self.program`.
    pub(crate) async fn execute_program(&mut self) -> Result<RunResult, RunError> {
        let unit = self.program.clone();
        self.current_unit = unit.clone();
        let mut pc = 0;
        while pc < unit.commands.len() {
            let flow = match self.execute_command(&unit.commands[pc]).await {
                Ok(flow) => flow,
                Err(RunError::ExitRaised { code }) => Flow::Exit(code),
                Err(err) => return Err(err),
            };
            match flow {
                Flow::Normal | Flow::Leave | Flow::Iterate => pc += 1,
                Flow::Signal(label) => {
                    pc = *unit
                        .labels
                        .get(&label)
                        .ok_or(RunError::LabelNotFound { label })?;
                }
                Flow::Return(value) => {
                    self.flush_matching().await?;
                    return Ok(RunResult::Return(value));
                }
                Flow::Exit(code) => {
                    self.flush_matching().await?;
                    return Ok(RunResult::Exit(code));
                }
            }
        }
        self.flush_matching().await?;
        Ok(RunResult::Normal)
    }

    #[async_recursion]
    pub(crate) async fn execute_command(&mut self, command: &Command) -> Result<Flow, RunError> {
        self.current_line = command.line;
        if self.tracer.is_enabled() && is_traceable(&command.kind) {
            let text = self.source_text(command.line);
            self.tracer.record(command.line, &text);
        }

        match &command.kind {
            CommandKind::Say(exprs) => {
                let mut parts = Vec::with_capacity(exprs.len());
                for expr in exprs {
                    parts.push(self.eval_expr(expr).await?.to_display_string());
                }
                let text = parts.join(" ");
                self.output
                    .output(&text)
                    .map_err(|err| RunError::Output(err.message))?;
                Ok(Flow::Normal)
            }

            CommandKind::Assign { name, value } => {
                let value = self.eval_expr(value).await?;
                self.store.set(name.clone(), value);
                Ok(Flow::Normal)
            }

            CommandKind::Call { target, args } => {
                let value = match target {
                    CallTarget::Path(path) => {
                        let argv = self.eval_call_values(args).await?;
                        let path = path.clone();
                        self.call_external_script(&path, argv).await?
                    }
                    CallTarget::Name(name) if Interpreter::is_mutation_form(name, args) => {
                        let name = name.clone();
                        self.eval_call(&name, args).await?
                    }
                    CallTarget::Name(name) => {
                        let argv = self.eval_call_values(args).await?;
                        let name = name.clone();
                        self.invoke_call_target(&name, argv).await?
                    }
                };
                self.store.set_result(value);
                Ok(Flow::Normal)
            }

            CommandKind::Return(expr) => {
                let value = match expr {
                    Some(expr) => self.eval_expr(expr).await?,
                    None => Value::Undefined,
                };
                Ok(Flow::Return(value))
            }

            CommandKind::Exit { code, unless } => {
                let code = match code {
                    Some(expr) => {
                        let value = self.eval_expr(expr).await?;
                        value.as_number().ok_or_else(|| {
                            RunError::expression(
                                format!(
                                    "EXIT code must be numeric, got '{}'",
                                    value.to_display_string()
                                ),
                                command.line,
                            )
                        })?
                    }
                    None => 0.0,
                };
                if let Some((cond, message)) = unless {
                    if self.eval_expr(cond).await?.is_truthy() {
                        return Ok(Flow::Normal);
                    }
                    let message = self.eval_expr(message).await?.to_display_string();
                    self.output
                        .write_error(&message)
                        .map_err(|err| RunError::Output(err.message))?;
                }
                Ok(Flow::Exit(code))
            }

            CommandKind::Signal(label) => Ok(Flow::Signal(label.clone())),

            CommandKind::ParseArg(patterns) => {
                let args = self.frame_args.last().cloned().unwrap_or_default();
                let mut position = 0;
                for pattern in patterns {
                    match pattern {
                        ArgPattern::Name(name) => {
                            let value = args
                                .get(position)
                                .cloned()
                                .unwrap_or_else(|| Value::String(String::new()));
                            self.store.set(name.clone(), value);
                            position += 1;
                        }
                        ArgPattern::Skip => position += 1,
                    }
                }
                Ok(Flow::Normal)
            }

            CommandKind::Address { target } => {
                let pending = self.router.set_current(target);
                self.run_pending_flush(pending).await?;
                Ok(Flow::Normal)
            }

            CommandKind::AddressOneShot { target, command } => {
                let text = self.eval_expr(command).await?.to_display_string();
                let target = target.clone();
                self.dispatch(&target, &text, empty_params()).await?;
                Ok(Flow::Normal)
            }

            CommandKind::AddressMatching {
                target,
                pattern,
                multiline,
            } => {
                let state = MatchingState::new(pattern, *multiline).map_err(|err| {
                    RunError::BadPattern {
                        pattern: pattern.clone(),
                        message: err.to_string(),
                        line: command.line,
                    }
                })?;
                let pending = self.router.set_matching(target, state);
                self.run_pending_flush(pending).await?;
                Ok(Flow::Normal)
            }

            CommandKind::AddressCommand(expr) => {
                let text = self.eval_expr(expr).await?.to_display_string();
                let target = self.active_target(&text, command.line)?;
                self.dispatch(&target, &text, empty_params()).await?;
                Ok(Flow::Normal)
            }

            CommandKind::AddressHeredoc { body } => {
                let target = self.active_target(body, command.line)?;
                let body = body.clone();
                self.dispatch(&target, &body, empty_params()).await?;
                Ok(Flow::Normal)
            }

            CommandKind::RawLine(raw) => self.execute_raw_line(raw, command.line).await,

            CommandKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                if self.eval_expr(cond).await?.is_truthy() {
                    self.execute_block(then_branch).await
                } else if let Some(block) = else_branch {
                    self.execute_block(block).await
                } else {
                    Ok(Flow::Normal)
                }
            }

            CommandKind::Do { spec, body } => self.execute_do(spec, body).await,

            CommandKind::Select { whens, otherwise } => {
                for when in whens {
                    self.current_line = when.line;
                    if self.eval_expr(&when.cond).await?.is_truthy() {
                        if self.tracer.is_enabled() {
                            let text = self.source_text(when.line);
                            self.tracer.record(when.line, &text);
                        }
                        return self.execute_block(&when.body).await;
                    }
                }
                if let Some((line, block)) = otherwise {
                    if self.tracer.is_enabled() {
                        let text = self.source_text(*line);
                        self.tracer.record(*line, &text);
                    }
                    return self.execute_block(block).await;
                }
                Ok(Flow::Normal)
            }

            CommandKind::Label { .. } => Ok(Flow::Normal),

            CommandKind::Require(expr) => {
                let list = self.eval_expr(expr).await?.to_display_string();
                let ctx = LoadContext {
                    script_dir: self
                        .script_path
                        .as_ref()
                        .and_then(|p| p.parent())
                        .map(Path::to_path_buf),
                };
                let resolved = self.loader.resolve_list(&list, &ctx).await?;
                self.apply_library(resolved)?;
                Ok(Flow::Normal)
            }

            CommandKind::Leave => Ok(Flow::Leave),
            CommandKind::Iterate => Ok(Flow::Iterate),
            CommandKind::Nop => Ok(Flow::Normal),
        }
    }

    #[async_recursion]
    pub(crate) async fn execute_block(&mut self, commands: &[Command]) -> Result<Flow, RunError> {
        for command in commands {
            match self.execute_command(command).await? {
                Flow::Normal => {}
                other => return Ok(other),
            }
        }
        Ok(Flow::Normal)
    }

    async fn execute_do(&mut self, spec: &DoSpec, body: &[Command]) -> Result<Flow, RunError> {
        match spec {
            // A plain block runs once; LEAVE/ITERATE belong to an enclosing
            // loop and propagate.
            DoSpec::Plain => self.execute_block(body).await,

            DoSpec::Forever => loop {
                match self.execute_block(body).await? {
                    Flow::Normal | Flow::Iterate => {}
                    Flow::Leave => return Ok(Flow::Normal),
                    other => return Ok(other),
                }
            },

            DoSpec::While(cond) => loop {
                if !self.eval_expr(cond).await?.is_truthy() {
                    return Ok(Flow::Normal);
                }
                match self.execute_block(body).await? {
                    Flow::Normal | Flow::Iterate => {}
                    Flow::Leave => return Ok(Flow::Normal),
                    other => return Ok(other),
                }
            },

            DoSpec::Counted { var, from, to, by } => {
                let line = self.current_line;
                let numeric = |value: Value, what: &str| {
                    value.as_number().ok_or_else(|| {
                        RunError::expression(
                            format!("DO {} must be numeric, got '{}'", what, value),
                            line,
                        )
                    })
                };
                let start = {
                    let v = self.eval_expr(from).await?;
                    numeric(v, "start")?
                };
                let end = {
                    let v = self.eval_expr(to).await?;
                    numeric(v, "TO bound")?
                };
                let step = match by {
                    Some(expr) => {
                        let v = self.eval_expr(expr).await?;
                        numeric(v, "BY step")?
                    }
                    None => 1.0,
                };
                if step == 0.0 {
                    return Err(RunError::expression("DO BY step must not be zero", line));
                }
                let mut counter = start;
                while (step > 0.0 && counter <= end) || (step < 0.0 && counter >= end) {
                    self.store.set(var.clone(), Value::Number(counter));
                    match self.execute_block(body).await? {
                        Flow::Normal | Flow::Iterate => {}
                        Flow::Leave => return Ok(Flow::Normal),
                        other => return Ok(other),
                    }
                    counter += step;
                }
                Ok(Flow::Normal)
            }

            DoSpec::Over { var, collection } => {
                let value = self.eval_expr(collection).await?;
                let values = sequence_values(&value).ok_or_else(|| {
                    RunError::expression(
                        format!(
                            "DO OVER expects an array or object, got {}",
                            value.type_name()
                        ),
                        self.current_line,
                    )
                })?;
                for item in values {
                    self.store.set(var.clone(), item);
                    match self.execute_block(body).await? {
                        Flow::Normal | Flow::Iterate => {}
                        Flow::Leave => return Ok(Flow::Normal),
                        other => return Ok(other),
                    }
                }
                Ok(Flow::Normal)
            }
        }
    }

    // ========== CALL dispatch ==========

    /// `CALL name`: subroutine label first, then function registries, then
    /// a method of the current ADDRESS target, then the external fallback.
    async fn invoke_call_target(
        &mut self,
        name: &str,
        argv: Vec<Value>,
    ) -> Result<Value, RunError> {
        if let Some(&index) = self.current_unit.labels.get(name) {
            let unit = self.current_unit.clone();
            let fresh = self.label_is_procedure(&unit, index);
            return self.call_in_unit(unit, index, argv, fresh).await;
        }
        if let Some(result) = self.call_builtin(name, &argv) {
            return result;
        }
        if let Some(result) = self.call_dynamic(name, &argv).await {
            return result;
        }
        let method = self.router.current_target().and_then(|target| {
            self.router
                .method_of(target, name)
                .map(|m| (target.name.clone(), m.to_string()))
        });
        if let Some((target, method)) = method {
            return self.dispatch(&target, &method, positional_params(&argv)).await;
        }
        if let Some(dispatch) = self.external_dispatch.clone() {
            let namespace = self
                .router
                .current_name()
                .map(str::to_string)
                .unwrap_or_default();
            return dispatch.send(&namespace, name, &argv).await;
        }
        Err(RunError::FunctionNotFound {
            name: name.to_string(),
        })
    }

    pub(crate) fn label_is_procedure(&self, unit: &ProgramUnit, index: usize) -> bool {
        matches!(
            unit.commands.get(index).map(|c| &c.kind),
            Some(CommandKind::Label {
                procedure: true,
                ..
            })
        )
    }

    /// Run a subroutine body starting at `start` until its `RETURN`.
    #[async_recursion]
    pub(crate) async fn call_in_unit(
        &mut self,
        unit: ProgramUnit,
        start: usize,
        args: Vec<Value>,
        fresh_frame: bool,
    ) -> Result<Value, RunError> {
        if self.call_depth >= MAX_CALL_DEPTH {
            return Err(RunError::StackOverflow {
                depth: self.call_depth,
            });
        }
        self.call_depth += 1;
        self.frame_args.push(args);
        if fresh_frame {
            self.store.push_frame();
        }
        let saved_unit = std::mem::replace(&mut self.current_unit, unit.clone());

        let outcome = self.run_subroutine(&unit, start).await;

        self.current_unit = saved_unit;
        if fresh_frame {
            self.store.pop_frame();
        }
        self.frame_args.pop();
        self.call_depth -= 1;
        outcome
    }

    async fn run_subroutine(
        &mut self,
        unit: &ProgramUnit,
        start: usize,
    ) -> Result<Value, RunError> {
        let mut pc = start;
        while pc < unit.commands.len() {
            match self.execute_command(&unit.commands[pc]).await? {
                Flow::Normal | Flow::Leave | Flow::Iterate => pc += 1,
                Flow::Signal(label) => {
                    pc = *unit
                        .labels
                        .get(&label)
                        .ok_or(RunError::LabelNotFound { label })?;
                }
                Flow::Return(value) => return Ok(value),
                // EXIT terminates the whole program, not just this call.
                Flow::Exit(code) => return Err(RunError::ExitRaised { code }),
            }
        }
        Ok(Value::Undefined)
    }

    // ========== External script calls ==========

    /// `CALL "./path"`: run another script in an isolated variable frame;
    /// its `RETURN` value becomes the caller's `RESULT`.
    pub(crate) async fn call_external_script(
        &mut self,
        path: &str,
        args: Vec<Value>,
    ) -> Result<Value, RunError> {
        if self.external_depth >= MAX_EXTERNAL_DEPTH {
            return Err(RunError::StackOverflow {
                depth: self.external_depth,
            });
        }
        let resolved = match self.script_path.as_ref().and_then(|p| p.parent()) {
            Some(dir) => dir.join(path),
            None => PathBuf::from(path),
        };
        if !resolved.exists() {
            return Err(RunError::ScriptNotFound {
                path: resolved.display().to_string(),
            });
        }
        let code = tokio::fs::read_to_string(&resolved)
            .await
            .map_err(|err| RunError::ScriptRead {
                path: resolved.display().to_string(),
                message: err.to_string(),
            })?;
        let commands = rexon_parser::parse(&code)?;

        // Swap in an isolated world: fresh store, own program and source.
        let saved_program = std::mem::replace(&mut self.program, ProgramUnit::new(commands));
        let saved_unit = self.current_unit.clone();
        let saved_lines = std::mem::replace(
            &mut self.source_lines,
            code.lines().map(str::to_string).collect(),
        );
        let saved_path = std::mem::replace(&mut self.script_path, Some(resolved));
        let saved_store = std::mem::take(&mut self.store);
        self.frame_args.push(args);
        self.external_depth += 1;

        let outcome = self.execute_program().await;

        self.external_depth -= 1;
        self.frame_args.pop();
        self.store = saved_store;
        self.script_path = saved_path;
        self.source_lines = saved_lines;
        self.current_unit = saved_unit;
        self.program = saved_program;

        match outcome? {
            RunResult::Return(value) => Ok(value),
            RunResult::Normal => Ok(Value::Undefined),
            RunResult::Exit(code) => {
                self.store.set_rc(code);
                Ok(Value::Undefined)
            }
        }
    }

    // ========== ADDRESS plumbing ==========

    fn active_target(&self, text: &str, line: usize) -> Result<String, RunError> {
        self.router
            .current_name()
            .map(str::to_string)
            .ok_or_else(|| RunError::NoActiveTarget {
                line,
                text: text.lines().next().unwrap_or_default().to_string(),
            })
    }

    /// A bare non-statement line: handler text under MATCHING, a command
    /// under a plain target, an error otherwise.
    async fn execute_raw_line(&mut self, raw: &str, line: usize) -> Result<Flow, RunError> {
        if self.router.matching().is_some() {
            let (dispatches, pattern) = {
                let state = self.router.matching_mut().expect("matching state");
                (state.apply(raw), state.pattern.clone())
            };
            let target = self.active_target(raw, line)?;
            for dispatch in dispatches {
                self.dispatch(&target, &dispatch.payload, matching_params(&pattern))
                    .await?;
            }
            return Ok(Flow::Normal);
        }
        if let Some(target) = self.router.current_name().map(str::to_string) {
            self.dispatch(&target, raw.trim(), empty_params()).await?;
            return Ok(Flow::Normal);
        }
        Err(RunError::NoActiveTarget {
            line,
            text: raw.trim().to_string(),
        })
    }

    async fn run_pending_flush(&mut self, pending: Option<PendingFlush>) -> Result<(), RunError> {
        if let Some(flush) = pending {
            self.dispatch(
                &flush.target,
                &flush.payload,
                matching_params(&flush.pattern),
            )
            .await?;
        }
        Ok(())
    }

    /// End-of-program (or termination) flush of a pending MATCHING buffer.
    pub(crate) async fn flush_matching(&mut self) -> Result<(), RunError> {
        let pending = self.router.final_flush();
        self.run_pending_flush(pending).await
    }

    /// Invoke a target's handler and apply the RC/RESULT contract: the full
    /// return value lands in `RESULT`, the derived code in `RC`. A failed
    /// handler sets a nonzero `RC`, stores the error shape when one was
    /// returned, and propagates.
    pub(crate) async fn dispatch(
        &mut self,
        target_name: &str,
        payload: &str,
        params: Value,
    ) -> Result<Value, RunError> {
        let target =
            self.router
                .get(target_name)
                .cloned()
                .ok_or_else(|| RunError::UnknownAddressTarget {
                    target: target_name.to_string(),
                })?;
        let context = SourceContext {
            line: self.current_line,
            source_line: self.source_text(self.current_line),
            script_path: self.script_path.as_ref().map(|p| p.display().to_string()),
            target: target.name.clone(),
        };
        tracing::debug!(target = %target.name, line = context.line, "ADDRESS dispatch");
        match target
            .registration
            .handler
            .handle(payload, &params, &context)
            .await
        {
            Ok(value) => {
                self.store.set_rc(derive_rc(&value));
                self.store.set_result(value.clone());
                Ok(value)
            }
            Err(err) => {
                let rc = if err.rc == 0.0 { 1.0 } else { err.rc };
                self.store.set_rc(rc);
                self.store
                    .set_result(err.shape.clone().unwrap_or(Value::Undefined));
                Err(RunError::Handler {
                    target: target.name.clone(),
                    rc,
                    message: err.message,
                })
            }
        }
    }

    // ========== REQUIRE registration ==========

    pub(crate) fn apply_library(&mut self, resolved: ResolvedLibrary) -> Result<(), RunError> {
        match resolved {
            ResolvedLibrary::Builtin { name } => {
                let lib = native_library(&name).ok_or(RunError::Library(
                    LibraryError::UnknownBuiltin { reference: name },
                ))?;
                for (fname, f) in lib.functions {
                    self.dynamic
                        .insert(fname.to_string(), DynamicFunction::Native(f));
                }
                self.metadata
                    .write()
                    .expect("metadata registry lock")
                    .register_module(&lib.metadata, lib.name, None);
                tracing::debug!(library = lib.name, "registered built-in library");
            }
            ResolvedLibrary::Source { name, code } => {
                let commands = rexon_parser::parse(&code)?;
                let unit = ProgramUnit::new(commands);
                let library_index = self.libraries.len();
                for (label, &index) in unit.labels.iter() {
                    self.dynamic.insert(
                        label.clone(),
                        DynamicFunction::Library {
                            library: library_index,
                            index,
                        },
                    );
                }
                tracing::debug!(library = %name, functions = unit.labels.len(), "registered source library");
                self.libraries.push(LoadedLibrary { name, unit });
            }
        }
        Ok(())
    }
}
