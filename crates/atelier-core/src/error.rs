use thiserror::Error;

#[derive(Debug, Error)]
pub enum AtelierError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    #[error("Conversation not found: {id}")]
    ConversationNotFound { id: String },

    #[error("Permission denied: {reason}")]
    PermissionDenied { reason: String },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("LLM provider error: {0}")]
    Provider(String),

    #[error("Tool error ({tool}): {reason}")]
    Tool { tool: String, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Request timeout after {ms}ms")]
    Timeout { ms: u64 },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AtelierError {
    /// Short error code string sent to HTTP clients.
    pub fn code(&self) -> &'static str {
        match self {
            AtelierError::Config(_) => "CONFIG_ERROR",
            AtelierError::AuthFailed(_) => "AUTH_FAILED",
            AtelierError::ConversationNotFound { .. } => "CONVERSATION_NOT_FOUND",
            AtelierError::PermissionDenied { .. } => "PERMISSION_DENIED",
            AtelierError::Storage(_) => "STORAGE_ERROR",
            AtelierError::Provider(_) => "LLM_PROVIDER_ERROR",
            AtelierError::Tool { .. } => "TOOL_ERROR",
            AtelierError::Serialization(_) => "SERIALIZATION_ERROR",
            AtelierError::Io(_) => "IO_ERROR",
            AtelierError::Timeout { .. } => "TIMEOUT",
            AtelierError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, AtelierError>;
