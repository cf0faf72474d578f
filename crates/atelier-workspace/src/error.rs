use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid filename: {0}")]
    InvalidFilename(String),
}

pub type Result<T> = std::result::Result<T, WorkspaceError>;
