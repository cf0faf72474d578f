use thiserror::Error;

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("missing conversation workspace, refusing to run at process root")]
    NoWorkspace,

    #[error("blocked command: {0}")]
    Blocked(String),

    #[error("invalid filename: {0}")]
    InvalidFilename(String),

    #[error("script file not found: {0}")]
    ScriptNotFound(String),

    #[error("execution timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SandboxError>;
