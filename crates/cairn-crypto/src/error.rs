use cairn_types::{Cid, TypeError};
use thiserror::Error;

/// Errors from key handling and the block vault.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("root block {0} is not part of the batch")]
    MissingRoot(Cid),

    #[error("encrypted block {0} is missing")]
    MissingBlock(Cid),

    #[error("failed to encrypt block {0}")]
    EncryptionFailed(Cid),

    #[error("failed to decrypt block {0}: wrong key or corrupted ciphertext")]
    DecryptionFailed(Cid),

    #[error("malformed vault block {cid}: {reason}")]
    Malformed { cid: Cid, reason: String },

    #[error(transparent)]
    Type(#[from] TypeError),
}

pub type CryptoResult<T> = Result<T, CryptoError>;
