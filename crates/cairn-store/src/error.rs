use cairn_car::CarError;
use cairn_crypto::CryptoError;
use cairn_types::{Cid, TypeError};

/// Errors from the blockstore, loader, and storage collaborators.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Lookup failed in every tier: overlays, cache, containers, remote.
    #[error("missing block: {0}")]
    MissingBlock(Cid),

    /// The backing container file is absent (for example, removed by compaction).
    #[error("missing container: {0}")]
    MissingContainer(Cid),

    /// A write was attempted outside a transaction.
    #[error("writes must go through a transaction")]
    UseTransaction,

    /// Persisted meta carries a different key than the one in use.
    #[error("key mismatch")]
    KeyMismatch,

    /// Container assembly or parsing failed.
    #[error("container encoding failed: {0}")]
    Encode(#[from] CarError),

    /// Sealing or opening a block batch failed (wrong key, corrupt ciphertext).
    #[error("vault error: {0}")]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Type(#[from] TypeError),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("remote transport error: {0}")]
    Remote(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// True when the failure came from opening ciphertext.
    pub fn is_decryption_failure(&self) -> bool {
        matches!(self, Self::Crypto(CryptoError::DecryptionFailed(_)))
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
