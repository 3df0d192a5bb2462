use std::collections::BTreeMap;

use cairn_types::{Block, Cid};
use serde::{Deserialize, Serialize};

use crate::error::{CarError, CarResult};

/// What a commit records, before the loader attaches its car lists.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CommitMeta {
    /// A data commit: the clock head after the transaction.
    Data { head: Vec<Cid> },
    /// An index commit: named index roots.
    Index { indexes: BTreeMap<String, Cid> },
}

impl CommitMeta {
    pub fn data(head: impl IntoIterator<Item = Cid>) -> Self {
        Self::Data {
            head: head.into_iter().collect(),
        }
    }
}

/// Typed commit header stored as a container's root block.
///
/// `cars` lists earlier containers this one depends on. `compact` lists the
/// containers this one replaces; it is non-empty only for a compaction, whose
/// `cars` is always empty.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CarHeader {
    Data {
        head: Vec<Cid>,
        cars: Vec<Cid>,
        compact: Vec<Cid>,
    },
    Index {
        indexes: BTreeMap<String, Cid>,
        cars: Vec<Cid>,
        compact: Vec<Cid>,
    },
}

impl CarHeader {
    pub fn new(meta: CommitMeta, cars: Vec<Cid>, compact: Vec<Cid>) -> Self {
        match meta {
            CommitMeta::Data { head } => Self::Data { head, cars, compact },
            CommitMeta::Index { indexes } => Self::Index {
                indexes,
                cars,
                compact,
            },
        }
    }

    /// Header of a database with no commits yet.
    pub fn empty() -> Self {
        Self::Data {
            head: Vec::new(),
            cars: Vec::new(),
            compact: Vec::new(),
        }
    }

    pub fn cars(&self) -> &[Cid] {
        match self {
            Self::Data { cars, .. } | Self::Index { cars, .. } => cars,
        }
    }

    pub fn compact(&self) -> &[Cid] {
        match self {
            Self::Data { compact, .. } | Self::Index { compact, .. } => compact,
        }
    }

    /// The clock head for data headers; `None` for index headers.
    pub fn head(&self) -> Option<&[Cid]> {
        match self {
            Self::Data { head, .. } => Some(head),
            Self::Index { .. } => None,
        }
    }

    pub fn meta(&self) -> CommitMeta {
        match self {
            Self::Data { head, .. } => CommitMeta::Data { head: head.clone() },
            Self::Index { indexes, .. } => CommitMeta::Index {
                indexes: indexes.clone(),
            },
        }
    }

    pub fn to_block(&self) -> CarResult<Block> {
        Ok(Block::encode(self)?)
    }

    pub fn from_block(block: &Block) -> CarResult<Self> {
        block
            .decode()
            .map_err(|e| CarError::InvalidHeader(e.to_string()))
    }
}
