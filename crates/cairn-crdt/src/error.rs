//! Error types for the document layer.

use std::sync::Arc;

use cairn_clock::{ClockError, Head};
use cairn_store::StoreError;
use cairn_types::{Cid, TypeError};

#[derive(Debug, thiserror::Error)]
pub enum CrdtError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Clock(#[from] ClockError),

    #[error(transparent)]
    Type(#[from] TypeError),

    /// A conditional write expected a head that is no longer current.
    #[error("head moved: expected {expected:?}, found {actual:?}")]
    MvccConflict { expected: Head, actual: Head },

    /// The batch this request was folded into failed. Every request in the
    /// batch shares the same cause.
    #[error("write batch failed: {0}")]
    BatchFailed(Arc<CrdtError>),

    /// A bulk update with no documents.
    #[error("bulk update carries no documents")]
    EmptyBatch,

    /// The block is not a well-formed state node or document.
    #[error("invalid block {cid}: {reason}")]
    InvalidBlock { cid: Cid, reason: String },

    /// The queue worker has shut down.
    #[error("queue closed")]
    Closed,

    /// The head worker answered a task with the result of a different kind
    /// of task.
    #[error("head queue answered a {expected} task with a {actual} outcome")]
    UnexpectedOutcome {
        expected: &'static str,
        actual: &'static str,
    },
}

impl CrdtError {
    /// The block that could not be found, looking through wrapped errors.
    pub fn missing_block(&self) -> Option<Cid> {
        match self {
            Self::Store(StoreError::MissingBlock(cid)) => Some(*cid),
            Self::Clock(ClockError::Store(StoreError::MissingBlock(cid))) => Some(*cid),
            Self::BatchFailed(inner) => inner.missing_block(),
            _ => None,
        }
    }

    /// The error that actually caused a failed batch.
    pub fn root_cause(&self) -> &CrdtError {
        match self {
            Self::BatchFailed(inner) => inner.root_cause(),
            other => other,
        }
    }
}

pub type CrdtResult<T> = Result<T, CrdtError>;
