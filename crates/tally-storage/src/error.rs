use std::io::ErrorKind;
use std::path::PathBuf;

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("turso error: {0}")]
    Turso(#[from] turso::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid snapshot {}: {reason}", path.display())]
    InvalidSnapshot { path: PathBuf, reason: String },

    #[error("{0}")]
    Other(String),
}

impl StorageError {
    /// Transient failures worth another attempt
    ///
    /// Database: busy/locked database or a connection/IO failure.
    /// Files: would-block, interrupted and timed-out operations.
    pub fn is_retriable(&self) -> bool {
        match self {
            StorageError::Turso(
                turso::Error::Busy(_) | turso::Error::BusySnapshot(_) | turso::Error::IoError(_),
            ) => true,
            StorageError::Turso(e) => {
                let msg = e.to_string().to_lowercase();
                ["busy", "locked", "connection", "i/o", "io error"]
                    .iter()
                    .any(|needle| msg.contains(needle))
            }
            StorageError::Io(e) => matches!(
                e.kind(),
                ErrorKind::WouldBlock | ErrorKind::Interrupted | ErrorKind::TimedOut
            ),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;
