use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid hex string: {0}")]
    InvalidHex(String),

    #[error("invalid byte length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error(transparent)]
    Encoding(#[from] EncodingError),
}

/// A value that has no canonical byte representation.
///
/// Raised before any hashing happens, so an append that hits one of these
/// never touches ledger state.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EncodingError {
    /// NaN and infinities have no single canonical form.
    #[error("non-finite float at {path}")]
    NonFiniteFloat { path: String },

    /// Nesting deeper than the encoder accepts.
    #[error("value nested deeper than {max} levels at {path}")]
    DepthExceeded { max: usize, path: String },
}
