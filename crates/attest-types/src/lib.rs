//! Foundation types for the attest ledger.
//!
//! Every other attest crate depends on `attest-types`. It has no knowledge of
//! hashing algorithms or storage; it only defines what gets hashed and how it
//! is laid out as bytes.
//!
//! # Key Types
//!
//! - [`Value`]: closed structured value used for entry payloads and metadata
//! - [`Digest`]: variable-width hash output (width fixed per ledger)
//! - [`CanonicalEncoder`]: deterministic byte layout for hashing

pub mod canonical;
pub mod digest;
pub mod error;
pub mod value;

pub use canonical::{canonical_encode, CanonicalEncoder, MAX_DEPTH};
pub use digest::Digest;
pub use error::{EncodingError, TypeError};
pub use value::Value;
