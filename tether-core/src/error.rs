use thiserror::Error;

use tether_model::WatchName;

#[derive(Error, Debug)]
pub enum TetherError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid watch spec: {0}")]
    InvalidSpec(String),

    #[error("Watch not found: {0}")]
    NotFound(WatchName),

    #[error("Status write conflict for {0}")]
    Conflict(WatchName),

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl TetherError {
    /// Store write conflicts are expected under concurrent modification and
    /// are dropped by the status publisher rather than retried.
    pub fn is_conflict(&self) -> bool {
        matches!(self, TetherError::Conflict(_))
    }
}

pub type Result<T> = std::result::Result<T, TetherError>;
