//! Content state: the key → document map an event's `root` points at.

use std::collections::BTreeMap;

use cairn_clock::{find_common_ancestor_with_sorted_events, EventFetcher, EventOp, Head, Op};
use cairn_store::BlockFetcher;
use cairn_types::{Block, Cid};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::{CrdtError, CrdtResult};

/// One version of the content state. Keys map to [`DocValue`] blocks.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateNode {
    pub entries: BTreeMap<String, Cid>,
}

impl StateNode {
    pub fn get(&self, key: &str) -> Option<&Cid> {
        self.entries.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Cid) {
        self.entries.insert(key.into(), value);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Apply an event's ops in order. A delete without a tombstone block
    /// drops the key.
    pub fn apply_ops(&mut self, ops: &[EventOp]) {
        for op in ops {
            match (op.op, op.value) {
                (_, Some(value)) => self.insert(op.key.clone(), value),
                (Op::Delete, None) => {
                    self.entries.remove(&op.key);
                }
                (Op::Put, None) => {}
            }
        }
    }

    pub fn to_block(&self) -> CrdtResult<Block> {
        Ok(Block::encode(self)?)
    }

    pub fn from_block(block: &Block) -> CrdtResult<Self> {
        block.decode().map_err(|e| CrdtError::InvalidBlock {
            cid: block.cid(),
            reason: e.to_string(),
        })
    }

    pub async fn load(blocks: &dyn BlockFetcher, root: &Cid) -> CrdtResult<Self> {
        let block = blocks.get(root).await?;
        Self::from_block(&block)
    }
}

/// A stored document. Deletes are recorded as tombstones.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DocValue {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc: Option<Value>,
    #[serde(default)]
    pub del: bool,
}

impl DocValue {
    pub fn new(doc: Value) -> Self {
        Self {
            doc: Some(doc),
            del: false,
        }
    }

    pub fn tombstone() -> Self {
        Self { doc: None, del: true }
    }

    /// The live document, `None` for a tombstone.
    pub fn into_doc(self) -> Option<Value> {
        if self.del {
            None
        } else {
            self.doc
        }
    }

    pub fn to_block(&self) -> CrdtResult<Block> {
        Ok(Block::encode(self)?)
    }

    pub fn from_block(block: &Block) -> CrdtResult<Self> {
        block.decode().map_err(|e| CrdtError::InvalidBlock {
            cid: block.cid(),
            reason: e.to_string(),
        })
    }

    pub async fn load(blocks: &dyn BlockFetcher, cid: &Cid) -> CrdtResult<Self> {
        let block = blocks.get(cid).await?;
        Self::from_block(&block)
    }
}

/// The content state at `head`.
///
/// An empty head has an empty state and a single tip has its event's root.
/// A forked head is rebuilt by replaying every event above the tips' common
/// ancestor onto the ancestor's state.
pub async fn state_at(blocks: &dyn BlockFetcher, head: &Head) -> CrdtResult<StateNode> {
    let events = EventFetcher::new(blocks);
    match head.as_slice() {
        [] => Ok(StateNode::default()),
        [tip] => root_state(blocks, &events, tip).await,
        _ => {
            let replay = find_common_ancestor_with_sorted_events(&events, head).await?;
            let mut state = root_state(blocks, &events, &replay.ancestor).await?;
            for event in &replay.sorted {
                state.apply_ops(&event.data().ops);
            }
            debug!(
                ancestor = %replay.ancestor.short_hex(),
                replayed = replay.sorted.len(),
                "rebuilt state for forked head"
            );
            Ok(state)
        }
    }
}

async fn root_state(
    blocks: &dyn BlockFetcher,
    events: &EventFetcher<'_>,
    event: &Cid,
) -> CrdtResult<StateNode> {
    match events.get(event).await?.data().root {
        Some(root) => StateNode::load(blocks, &root).await,
        None => Ok(StateNode::default()),
    }
}

/// The live document stored under `key` at `head`.
pub async fn get_value(blocks: &dyn BlockFetcher, head: &Head, key: &str) -> CrdtResult<Option<Value>> {
    let state = state_at(blocks, head).await?;
    match state.get(key) {
        Some(cid) => Ok(DocValue::load(blocks, cid).await?.into_doc()),
        None => Ok(None),
    }
}

/// Every live document at `head`, in key order.
pub async fn all_entries(blocks: &dyn BlockFetcher, head: &Head) -> CrdtResult<Vec<(String, Value)>> {
    let state = state_at(blocks, head).await?;
    let mut out = Vec::with_capacity(state.len());
    for (key, cid) in &state.entries {
        if let Some(doc) = DocValue::load(blocks, cid).await?.into_doc() {
            out.push((key.clone(), doc));
        }
    }
    Ok(out)
}
