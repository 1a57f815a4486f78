//! Storage backends for the attest ledger.
//!
//! Backends persist [`StoredEntry`] records and never interpret them: they
//! do not hash, decode payloads, or repair chains. The ledger crate owns all
//! integrity logic.
//!
//! # Backends
//!
//! - [`InMemoryBackend`]: `Vec`-backed, for tests and embedding
//! - [`FileBackend`]: append-only CRC-framed log with crash recovery
//!
//! Both implement the [`Backend`] trait.

pub mod compression;
pub mod error;
pub mod file;
pub mod memory;
pub mod pool;
pub mod record;
#[cfg(feature = "test-util")]
pub mod testing;
pub mod traits;

pub use compression::{decompress_with, Compressor, ZstdCompressor};
pub use error::{BackendError, BackendResult};
pub use file::{FileBackend, FileBackendConfig, RecoveryReport, SyncMode};
pub use memory::InMemoryBackend;
pub use pool::{ConnectionFactory, ConnectionPool, PoolConfig, PoolStats, PooledConnection};
pub use record::{Codec, StoredEntry};
pub use traits::Backend;
