use cairn_types::{Cid, TypeError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CarError {
    #[error("root block {0} is not part of the container")]
    MissingRoot(Cid),

    #[error("container has no roots")]
    NoRoots,

    #[error("corrupt container at offset {offset}: {reason}")]
    Corrupt { offset: usize, reason: String },

    #[error("block hash mismatch: expected {expected}, computed {actual}")]
    HashMismatch { expected: Cid, actual: Cid },

    #[error("invalid commit header: {0}")]
    InvalidHeader(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<TypeError> for CarError {
    fn from(err: TypeError) -> Self {
        match err {
            TypeError::HashMismatch { expected, actual } => Self::HashMismatch { expected, actual },
            other => Self::Serialization(other.to_string()),
        }
    }
}

pub type CarResult<T> = Result<T, CarError>;
