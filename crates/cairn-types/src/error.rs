use thiserror::Error;

use crate::cid::Cid;

/// Errors produced by type operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid hex string: {0}")]
    InvalidHex(String),

    #[error("invalid byte length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("hash mismatch: expected {expected}, computed {actual}")]
    HashMismatch { expected: Cid, actual: Cid },

    #[error("serialization error: {0}")]
    Serialization(String),
}
