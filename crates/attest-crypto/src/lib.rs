//! Cryptographic primitives for the attest ledger.
//!
//! Provides configurable hashing (SHA-2, SHA-3, BLAKE3), pluggable
//! Ed25519/ECDSA/RSA-PSS signers, binary Merkle trees with inclusion proofs,
//! and a streaming hash chain verifier.
//!
//! All crypto operations wrap established libraries; there is no custom cryptography.

pub mod chain;
pub mod ecdsa;
pub mod ed25519;
pub mod hasher;
pub mod merkle;
pub mod rsa_pss;
pub mod signer;

pub use chain::{ChainFault, ChainRecord, ChainSummary, ChainVerifier, FailureReason};
pub use ecdsa::{EcdsaCurve, EcdsaSigner};
pub use ed25519::Ed25519Signer;
pub use hasher::{ContentHasher, HashAlgorithm, HasherError};
pub use merkle::{verify_proof, MerkleError, MerkleProof, MerkleTree, Side};
pub use rsa_pss::{RsaModulus, RsaSigner};
pub use signer::{SignatureAlgorithm, SignatureError, Signer, SignerRegistry};
