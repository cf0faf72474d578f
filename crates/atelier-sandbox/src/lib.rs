//! Code-execution sandbox for model-generated Python and shell commands.
//!
//! This is isolation, not security: the sandbox prevents accidental escapes
//! (path traversal, nested directory creation, writes outside the
//! conversation workspace) and enforces per-conversation scoping. It does not
//! defend against a deliberately malicious payload — that would require
//! OS-level namespacing, which is out of scope.

pub mod error;
pub mod fonts;
pub mod runner;
pub mod safety;
pub mod sanitize;

pub use error::{Result, SandboxError};
pub use runner::{ExecOutcome, SandboxRunner};
