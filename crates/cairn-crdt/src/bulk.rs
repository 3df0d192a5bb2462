//! Turning document updates into blocks, an event, and a new head.

use std::collections::HashSet;

use cairn_clock::{advance, events_since, EventBlock, EventData, EventFetcher, EventOp, Head};
use cairn_store::{BlockFetcher, Transaction};
use cairn_types::Cid;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::{CrdtError, CrdtResult};
use crate::state::{state_at, DocValue};

/// A single document write. `value: None` deletes the key.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DocUpdate {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl DocUpdate {
    pub fn put(key: impl Into<String>, value: Value) -> Self {
        Self {
            key: key.into(),
            value: Some(value),
        }
    }

    pub fn delete(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: None,
        }
    }

    pub fn is_delete(&self) -> bool {
        self.value.is_none()
    }
}

/// Outcome of [`apply_bulk_update`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BulkResult {
    pub head: Head,
    pub event: Cid,
    pub root: Cid,
}

/// Write `updates` into `tx` as one event on top of `head`.
///
/// Document blocks, the new state root, and the event block all land in the
/// transaction; nothing is committed here.
pub async fn apply_bulk_update(
    tx: &Transaction,
    head: &Head,
    updates: &[DocUpdate],
) -> CrdtResult<BulkResult> {
    if updates.is_empty() {
        return Err(CrdtError::EmptyBatch);
    }
    let mut state = state_at(tx, head).await?;

    let mut ops = Vec::with_capacity(updates.len());
    for update in updates {
        let doc = match &update.value {
            Some(value) => DocValue::new(value.clone()),
            None => DocValue::tombstone(),
        };
        let cid = tx.put(doc.to_block()?);
        state.insert(update.key.clone(), cid);
        ops.push(match update.value {
            Some(_) => EventOp::put(update.key.clone(), cid),
            None => EventOp::delete(update.key.clone(), Some(cid)),
        });
    }

    let root = tx.put(state.to_block()?);
    let event = EventBlock::create(EventData { ops, root: Some(root) }, head.iter().copied())?;
    let event_cid = tx.put(event.block().clone());

    let events = EventFetcher::new(tx);
    let next = advance(&events, head, event_cid).await?;
    debug!(
        event = %event_cid.short_hex(),
        root = %root.short_hex(),
        updates = updates.len(),
        "applied bulk update"
    );
    Ok(BulkResult {
        head: next,
        event: event_cid,
        root,
    })
}

/// Documents changed between `since` and `head`, oldest first.
///
/// Walks events newest first and keeps only the newest write per key, so a
/// key appears at most once. `limit` caps the number of keys returned.
pub async fn changes_since(
    blocks: &dyn BlockFetcher,
    head: &Head,
    since: &Head,
    limit: Option<usize>,
) -> CrdtResult<Vec<DocUpdate>> {
    let events = EventFetcher::new(blocks);
    let walked = events_since(&events, head, since).await?;

    let mut seen = HashSet::new();
    let mut out = Vec::new();
    'events: for event in &walked {
        for op in event.data().ops.iter().rev() {
            if limit.is_some_and(|limit| out.len() >= limit) {
                break 'events;
            }
            if !seen.insert(op.key.clone()) {
                continue;
            }
            let value = match &op.value {
                Some(cid) => DocValue::load(blocks, cid).await?.into_doc(),
                None => None,
            };
            out.push(DocUpdate {
                key: op.key.clone(),
                value,
            });
        }
    }
    out.reverse();
    Ok(out)
}
