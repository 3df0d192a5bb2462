//! Cryptographic primitives for cairn.
//!
//! Provides domain-separated BLAKE3 hashing, per-database symmetric key
//! material, and the vault that seals a block graph with AES-256-GCM before
//! it is written to a container.
//!
//! All crypto operations wrap established libraries. No custom cryptography.

pub mod error;
pub mod hasher;
pub mod key;
pub mod vault;

pub use error::{CryptoError, CryptoResult};
pub use hasher::ContentHasher;
pub use key::KeyMaterial;
pub use vault::{decrypt_blocks, encrypt_blocks, VaultIndex};
