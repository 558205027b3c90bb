//! Library subsystem for the rexon interpreter.
//!
//! This crate implements everything behind the language's `REQUIRE`
//! statement except execution:
//! - Classification of library references (built-in, local, central
//!   registry, direct source, unknown) with structural validation
//! - The named security policies (`strict`, `moderate`, `default`,
//!   `permissive`), blocklist, and the approval exchange
//! - Resolution of comma-separated preference lists down to either a
//!   built-in library name or loadable source text
//! - The checkpoint message channel used for remote loads and permission
//!   requests
//! - The queryable function-metadata registry

pub mod channel;
pub mod error;
pub mod loader;
pub mod metadata;
pub mod policy;
pub mod reference;

// Re-export commonly used types at the crate root
pub use channel::{ChannelExchange, ChannelMessage, PermissionReply, RequireReply};
pub use error::LibraryError;
pub use loader::{LibraryLoader, LoadContext, ResolvedLibrary};
pub use metadata::{MetadataEntry, MetadataRegistry};
pub use policy::{PolicyDecision, PolicyName, SecurityPolicy};
pub use reference::{classify, LibraryClass, LibraryReference, RiskLevel};
