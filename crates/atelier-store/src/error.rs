use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("conversation not found: {id}")]
    NotFound { id: String },

    #[error("permission denied for conversation {id}")]
    Forbidden { id: String },

    #[error("conversation file missing or unreadable: {id}")]
    MissingFile { id: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;
