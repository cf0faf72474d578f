//! Shared foundation for the Atelier agent runtime: process configuration,
//! the top-level error type, and the id newtypes every other crate speaks.

pub mod config;
pub mod error;
pub mod types;

pub use config::AtelierConfig;
pub use error::{AtelierError, Result};
pub use types::{ConversationId, MessageId};
