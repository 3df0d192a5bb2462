use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use cairn_store::BlockFetcher;
use cairn_types::{Block, Cid};
use serde::{Deserialize, Serialize};

use crate::error::{ClockError, ClockResult};

/// Kind of change an event records for a key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Op {
    Put,
    Delete,
}

/// One key change inside an event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventOp {
    pub op: Op,
    pub key: String,
    /// The document block written for this key. Deletes carry a tombstone
    /// block or nothing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Cid>,
}

impl EventOp {
    pub fn put(key: impl Into<String>, value: Cid) -> Self {
        Self {
            op: Op::Put,
            key: key.into(),
            value: Some(value),
        }
    }

    pub fn delete(key: impl Into<String>, value: Option<Cid>) -> Self {
        Self {
            op: Op::Delete,
            key: key.into(),
            value,
        }
    }
}

/// Payload of a clock event: the ops applied and the resulting state root.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventData {
    pub ops: Vec<EventOp>,
    /// State root after applying `ops` on top of the parents' state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<Cid>,
}

/// A causal step: parents plus data.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub parents: Vec<Cid>,
    pub data: EventData,
}

/// An event together with its encoded block.
#[derive(Clone, Debug)]
pub struct EventBlock {
    event: Event,
    block: Block,
}

impl EventBlock {
    /// Encode a new event. Parents are sorted and de-duplicated first, so the
    /// same causal step always gets the same id.
    pub fn create(data: EventData, parents: impl IntoIterator<Item = Cid>) -> ClockResult<Self> {
        let mut parents: Vec<Cid> = parents.into_iter().collect();
        parents.sort();
        parents.dedup();
        let event = Event { parents, data };
        let block = Block::encode(&event)?;
        Ok(Self { event, block })
    }

    pub fn from_block(block: Block) -> ClockResult<Self> {
        let event: Event = block.decode().map_err(|e| ClockError::InvalidEvent {
            cid: block.cid(),
            reason: e.to_string(),
        })?;
        Ok(Self { event, block })
    }

    pub fn cid(&self) -> Cid {
        self.block.cid()
    }

    pub fn event(&self) -> &Event {
        &self.event
    }

    pub fn parents(&self) -> &[Cid] {
        &self.event.parents
    }

    pub fn data(&self) -> &EventData {
        &self.event.data
    }

    pub fn block(&self) -> &Block {
        &self.block
    }
}

/// Decodes events from a block source, memoising each one.
pub struct EventFetcher<'a> {
    blocks: &'a dyn BlockFetcher,
    cache: Mutex<HashMap<Cid, Arc<EventBlock>>>,
}

impl<'a> EventFetcher<'a> {
    pub fn new(blocks: &'a dyn BlockFetcher) -> Self {
        Self {
            blocks,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub async fn get(&self, cid: &Cid) -> ClockResult<Arc<EventBlock>> {
        let cached = self.cache.lock().expect("lock poisoned").get(cid).cloned();
        if let Some(event) = cached {
            return Ok(event);
        }
        let block = self.blocks.get(cid).await?;
        let event = Arc::new(EventBlock::from_block(block)?);
        self.cache
            .lock()
            .expect("lock poisoned")
            .insert(*cid, event.clone());
        Ok(event)
    }

    /// Ids of every event decoded so far.
    pub fn seen(&self) -> Vec<Cid> {
        self.cache.lock().expect("lock poisoned").keys().copied().collect()
    }
}
