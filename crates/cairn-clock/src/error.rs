//! Error types for the merkle clock.

use cairn_store::StoreError;
use cairn_types::{Cid, TypeError};

#[derive(Debug, thiserror::Error)]
pub enum ClockError {
    /// Fetching an event block failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The block is not a well-formed event.
    #[error("invalid event {cid}: {reason}")]
    InvalidEvent { cid: Cid, reason: String },

    /// The head's tips share no history, so no replay order exists.
    #[error("no common ancestor for head")]
    NoCommonAncestor,

    /// Replay was requested for an empty head.
    #[error("head is empty")]
    EmptyHead,

    #[error(transparent)]
    Type(#[from] TypeError),
}

pub type ClockResult<T> = Result<T, ClockError>;
