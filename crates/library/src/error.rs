//! Library subsystem errors.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LibraryError {
    #[error("Library '{reference}' is on security blocklist")]
    Blocklisted { reference: String },

    #[error("Security policy '{policy}' denies {class} library '{reference}'")]
    PolicyDenied {
        policy: String,
        class: String,
        reference: String,
    },

    #[error("Permission denied for library '{reference}': {reason}")]
    PermissionDenied { reference: String, reason: String },

    #[error("Cannot resolve relative library path '{reference}': no script file context is available. Use an absolute path, a cwd-relative path, or a root-relative path instead")]
    NoScriptContext { reference: String },

    #[error("Library file not found: {path}")]
    FileNotFound { path: String },

    #[error("Failed to read library '{path}': {message}")]
    Io { path: String, message: String },

    #[error("REQUIRE of '{reference}' failed: timeout")]
    Timeout { reference: String },

    #[error("Cannot load library '{reference}': no_communication_channel")]
    NoCommunicationChannel { reference: String },

    #[error("Remote load of '{reference}' failed: {message}")]
    RemoteFailed { reference: String, message: String },

    #[error("Unknown built-in library '{reference}'")]
    UnknownBuiltin { reference: String },

    #[error("REQUIRE failed for \"{list}\"; attempted: {attempts}")]
    AllCandidatesFailed { list: String, attempts: String },
}
