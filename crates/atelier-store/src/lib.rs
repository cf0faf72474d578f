//! Sharded conversation persistence.
//!
//! One JSON file per conversation under
//! `conversations/{username}/{YYYY-MM}/{timestamp}_{conv_id}.json`, plus a
//! lightweight `index.json` holding metadata only (no message bodies). The
//! index is a weak cache: listing never touches conversation files.

pub mod error;
pub mod store;
pub mod types;

pub use error::{Result, StoreError};
pub use store::{ConversationStore, MessagePatch, MessageSelector, NewMessage};
pub use types::{
    Conversation, ConversationMeta, ContentPart, ImageDetail, Message, MessageContent,
    MessageStatus, PendingImage, Role, ToolCallRecord,
};
