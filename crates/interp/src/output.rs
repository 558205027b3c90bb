//! Output handlers.
//!
//! `SAY` and error messages leave the interpreter through an output
//! handler. A composite handler fans every message out to named
//! sub-handlers (console, log, rpc, file, ...); a failing sub-handler never
//! blocks delivery to its siblings, and all failures are aggregated into
//! one error message.

use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Error, Debug, Clone)]
#[error("{message}")]
pub struct OutputError {
    pub message: String,
}

impl OutputError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

pub trait OutputHandler: Send + Sync {
    /// Deliver one message.
    fn output(&self, text: &str) -> Result<(), OutputError>;

    /// Raw write without a line ending. Defaults to `output`.
    fn write(&self, text: &str) -> Result<(), OutputError> {
        self.output(text)
    }

    fn write_line(&self, text: &str) -> Result<(), OutputError> {
        self.output(text)
    }

    /// Error-stream write. Defaults to `output`.
    fn write_error(&self, text: &str) -> Result<(), OutputError> {
        self.output(text)
    }
}

/// Prints to stdout/stderr.
#[derive(Debug, Default)]
pub struct ConsoleOutput;

impl OutputHandler for ConsoleOutput {
    fn output(&self, text: &str) -> Result<(), OutputError> {
        println!("{}", text);
        Ok(())
    }

    fn write(&self, text: &str) -> Result<(), OutputError> {
        print!("{}", text);
        Ok(())
    }

    fn write_error(&self, text: &str) -> Result<(), OutputError> {
        eprintln!("{}", text);
        Ok(())
    }
}

/// Collects output in memory. Used by tests and embedders that render
/// output themselves.
#[derive(Debug, Default)]
pub struct CollectingOutput {
    lines: Mutex<Vec<String>>,
    errors: Mutex<Vec<String>>,
}

impl CollectingOutput {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().expect("output lines lock").clone()
    }

    pub fn error_lines(&self) -> Vec<String> {
        self.errors.lock().expect("output errors lock").clone()
    }
}

impl OutputHandler for CollectingOutput {
    fn output(&self, text: &str) -> Result<(), OutputError> {
        self.lines
            .lock()
            .expect("output lines lock")
            .push(text.to_string());
        Ok(())
    }

    fn write_error(&self, text: &str) -> Result<(), OutputError> {
        self.errors
            .lock()
            .expect("output errors lock")
            .push(text.to_string());
        Ok(())
    }
}

/// Named sub-handlers; every message goes to all of them.
#[derive(Default)]
pub struct CompositeOutput {
    handlers: Vec<(String, Arc<dyn OutputHandler>)>,
}

impl CompositeOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(mut self, name: impl Into<String>, handler: Arc<dyn OutputHandler>) -> Self {
        self.handlers.push((name.into(), handler));
        self
    }

    fn deliver<F>(&self, mut send: F) -> Result<(), OutputError>
    where
        F: FnMut(&Arc<dyn OutputHandler>) -> Result<(), OutputError>,
    {
        let mut failures = Vec::new();
        for (name, handler) in &self.handlers {
            if let Err(err) = send(handler) {
                failures.push(format!("{}: {}", name, err.message));
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(OutputError::new(format!(
                "Output handler errors: {}",
                failures.join(", ")
            )))
        }
    }
}

impl OutputHandler for CompositeOutput {
    fn output(&self, text: &str) -> Result<(), OutputError> {
        self.deliver(|h| h.output(text))
    }

    fn write(&self, text: &str) -> Result<(), OutputError> {
        self.deliver(|h| h.write(text))
    }

    fn write_line(&self, text: &str) -> Result<(), OutputError> {
        self.deliver(|h| h.write_line(text))
    }

    fn write_error(&self, text: &str) -> Result<(), OutputError> {
        self.deliver(|h| h.write_error(text))
    }
}
