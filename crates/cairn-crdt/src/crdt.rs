use std::sync::Arc;

use cairn_clock::{vis, EventFetcher, Head};
use cairn_store::{Blockstore, DataStore, MetaStore, StoreConfig};
use cairn_types::Cid;
use serde_json::Value;
use tracing::{debug, info};

use crate::apply_head_queue::ApplyHeadQueue;
use crate::bulk::{changes_since, DocUpdate};
use crate::clock::{CrdtClock, Subscription, SubscriptionId};
use crate::error::CrdtResult;
use crate::state::{all_entries, get_value};
use crate::write_queue::WriteQueue;

/// Documents changed since some head.
#[derive(Clone, Debug, PartialEq)]
pub struct Changes {
    /// The head the changes were read at.
    pub head: Head,
    /// Oldest first, one entry per key.
    pub result: Vec<DocUpdate>,
}

/// Handle to one database.
///
/// Writes go through the write queue and head transitions through the
/// apply-head queue; reads see the head at the time they start. Must be
/// created inside a Tokio runtime.
pub struct Crdt {
    config: StoreConfig,
    blockstore: Arc<Blockstore>,
    clock: Arc<CrdtClock>,
    heads: ApplyHeadQueue,
    writes: WriteQueue,
}

impl Crdt {
    pub async fn open(config: &StoreConfig) -> CrdtResult<Self> {
        let (blockstore, header) = Blockstore::open(config).await?;
        Ok(Self::start(config, blockstore, header.head()))
    }

    /// Open a named database over explicit storage.
    pub async fn open_with(
        config: &StoreConfig,
        data: Arc<dyn DataStore>,
        meta: Arc<dyn MetaStore>,
    ) -> CrdtResult<Self> {
        let (blockstore, header) = Blockstore::open_with(config, data, meta).await?;
        Ok(Self::start(config, blockstore, header.head()))
    }

    /// An in-memory database with no containers.
    pub async fn ephemeral() -> CrdtResult<Self> {
        Self::open(&StoreConfig::ephemeral()).await
    }

    fn start(config: &StoreConfig, blockstore: Arc<Blockstore>, head: Option<&[Cid]>) -> Self {
        let head = Head::new(head.unwrap_or_default().iter().copied());
        info!(db = ?config.name, tips = head.len(), "database opened");
        let clock = Arc::new(CrdtClock::new(blockstore.clone(), head));
        let heads = ApplyHeadQueue::spawn(clock.clone());
        let writes = WriteQueue::spawn(clock.clone(), heads.clone(), config.auto_compact);
        Self {
            config: config.clone(),
            blockstore,
            clock,
            heads,
            writes,
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.config.name.as_deref()
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn head(&self) -> Head {
        self.clock.head()
    }

    pub fn blockstore(&self) -> &Arc<Blockstore> {
        &self.blockstore
    }

    pub async fn put(&self, key: impl Into<String>, value: Value) -> CrdtResult<Head> {
        self.bulk(vec![DocUpdate::put(key, value)]).await
    }

    pub async fn del(&self, key: impl Into<String>) -> CrdtResult<Head> {
        self.bulk(vec![DocUpdate::delete(key)]).await
    }

    /// Write `updates` atomically, possibly together with other queued
    /// writes. Returns the head after the batch.
    pub async fn bulk(&self, updates: Vec<DocUpdate>) -> CrdtResult<Head> {
        if updates.is_empty() {
            return Ok(self.head());
        }
        self.writes.push(updates, None).await
    }

    /// Like [`bulk`](Self::bulk), but fails with `MvccConflict` if the head
    /// is no longer `expected` when the write runs.
    pub async fn bulk_if(&self, expected: &Head, updates: Vec<DocUpdate>) -> CrdtResult<Head> {
        self.writes.push(updates, Some(expected.clone())).await
    }

    pub async fn get(&self, key: &str) -> CrdtResult<Option<Value>> {
        get_value(self.blockstore.as_ref(), &self.head(), key).await
    }

    /// Every live document, in key order.
    pub async fn all_docs(&self) -> CrdtResult<Vec<(String, Value)>> {
        all_entries(self.blockstore.as_ref(), &self.head()).await
    }

    /// Documents written after `since` (an empty head means everything).
    pub async fn changes(&self, since: &Head, limit: Option<usize>) -> CrdtResult<Changes> {
        let head = self.head();
        let result = changes_since(self.blockstore.as_ref(), &head, since, limit).await?;
        Ok(Changes { head, result })
    }

    /// Compact once queued writes have been committed.
    pub async fn compact(&self) -> CrdtResult<Option<Cid>> {
        self.writes.compact().await
    }

    /// Merge a head learned from elsewhere. Its events must be reachable
    /// through this store, typically via a remote fetcher.
    pub async fn apply_remote_head(&self, head: Head) -> CrdtResult<Head> {
        self.heads.apply_head(head, Head::empty(), None).await
    }

    /// Pull meta records from the attached transport, merge their car logs,
    /// and apply their heads. Each merge runs on the head queue, so it never
    /// interleaves with a compaction.
    pub async fn sync_from_remote(&self) -> CrdtResult<Head> {
        let Some(loader) = self.blockstore.loader() else {
            return Ok(self.head());
        };
        let metas = loader.fetch_remote_metas().await?;
        debug!(metas = metas.len(), "syncing from remote");
        for meta in metas {
            self.heads.merge_remote(meta).await?;
        }
        Ok(self.head())
    }

    pub fn subscribe(&self) -> Subscription {
        self.clock.subscribe()
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.clock.unsubscribe(id)
    }

    /// The clock DAG in Graphviz DOT format.
    pub async fn vis(&self) -> CrdtResult<String> {
        let events = EventFetcher::new(self.blockstore.as_ref());
        Ok(vis(&events, &self.head()).await?.join("\n"))
    }
}

impl std::fmt::Debug for Crdt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Crdt")
            .field("name", &self.config.name)
            .field("head", &self.head())
            .finish()
    }
}
