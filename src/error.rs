//! Error types for the index engine

use thiserror::Error;

pub type Result<T> = std::result::Result<T, IndexError>;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid index format: {0}")]
    InvalidFormat(String),

    #[error("Operation canceled")]
    Canceled,

    #[error("Capacity exceeded: attempted {attempted}, max {max}")]
    CapacityExceeded { attempted: u64, max: u64 },

    #[error("Index {index} out of bounds (size {size})")]
    OutOfBounds { index: u64, size: u64 },

    #[error("Write pipeline failed: {0}")]
    Pipeline(String),

    #[error("Index is not backed by a file")]
    Closed,
}

impl IndexError {
    /// Wrap any error as an I/O failure, keeping the message.
    ///
    /// Catalog init reports every construction failure this way so the caller
    /// can decide to re-parse the dump.
    pub fn into_io(self, context: &str) -> IndexError {
        match self {
            IndexError::Io(e) => IndexError::Io(std::io::Error::new(
                e.kind(),
                format!("{}: {}", context, e),
            )),
            other => IndexError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("{}: {}", context, other),
            )),
        }
    }

    /// True for cooperative cancellation.
    pub fn is_canceled(&self) -> bool {
        matches!(self, IndexError::Canceled)
    }
}
