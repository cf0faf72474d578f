use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Timestamp format used in conversation files and the index.
pub const STORED_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Compact timestamp format used for output directory names.
pub const COMPACT_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Unique identifier for a conversation (8 hex chars, process-wide unique).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().simple().to_string()[..8].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<String> for ConversationId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ConversationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Unique identifier for a message inside a conversation (12 hex chars).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().simple().to_string()[..12].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<String> for MessageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Current local time rendered in the stored timestamp format.
pub fn now_stored() -> String {
    chrono::Local::now().format(STORED_TIMESTAMP_FORMAT).to_string()
}

/// Convert a stored timestamp (`2026-08-01 15:30:45`) to its compact form
/// (`20260801_153045`). Used for output directory names; the mapping must be
/// stable because the directory name is fixed at conversation creation.
pub fn compact_timestamp(stored: &str) -> String {
    let compact: String = stored
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == ' ')
        .collect();
    compact.replace(' ', "_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversation_id_is_eight_hex() {
        let id = ConversationId::new();
        assert_eq!(id.as_str().len(), 8);
        assert!(id.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn message_id_is_twelve_hex() {
        let id = MessageId::new();
        assert_eq!(id.as_str().len(), 12);
        assert!(id.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn compact_timestamp_matches_stored() {
        assert_eq!(compact_timestamp("2026-08-01 15:30:45"), "20260801_153045");
    }

    #[test]
    fn compact_timestamp_is_stable() {
        let a = compact_timestamp("2024-12-02 09:05:00");
        let b = compact_timestamp("2024-12-02 09:05:00");
        assert_eq!(a, b);
        assert_eq!(a, "20241202_090500");
    }
}
