use std::time::Duration;

/// Errors from storage backends.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// I/O error from the underlying storage.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Stored data is malformed or fails its checksum.
    #[error("corrupt data at offset {offset}: {reason}")]
    Corrupt { offset: u64, reason: String },

    /// A write did not continue the stored sequence.
    #[error("sequence conflict: expected {expected}, found {found}")]
    SequenceConflict { expected: u64, found: u64 },

    /// The backend has been closed.
    #[error("backend is closed")]
    Closed,

    #[error("compression error: {0}")]
    Compression(String),

    /// No pooled connection became available in time.
    #[error("connection pool timeout after {waited:?}")]
    PoolTimeout { waited: Duration },

    /// The backend cannot serve requests (including injected failures).
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

impl From<bincode::Error> for BackendError {
    fn from(e: bincode::Error) -> Self {
        BackendError::Serialization(e.to_string())
    }
}

/// Result alias for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;
