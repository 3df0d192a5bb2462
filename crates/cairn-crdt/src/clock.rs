//! The shared head and its subscribers.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};

use cairn_car::CommitMeta;
use cairn_clock::{advance, EventFetcher, Head};
use cairn_store::{Blockstore, CommitOpts, DbMeta};
use cairn_types::Cid;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::bulk::{changes_since, DocUpdate};
use crate::compact::compact_state;
use crate::error::{CrdtError, CrdtResult};

/// Buffered notifications per subscriber before it starts lagging.
const SUBSCRIBER_CAPACITY: usize = 64;

/// Identifies one subscription.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Debug for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SubscriptionId({})", self.0)
    }
}

/// Receives the documents changed by every head transition.
pub struct Subscription {
    id: SubscriptionId,
    rx: broadcast::Receiver<Vec<DocUpdate>>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Next batch of changes. `None` once the database is gone.
    ///
    /// A subscriber that falls behind skips the batches it missed.
    pub async fn recv(&mut self) -> Option<Vec<DocUpdate>> {
        loop {
            match self.rx.recv().await {
                Ok(updates) => return Some(updates),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(subscription = ?self.id, skipped, "subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Changes already delivered, without waiting.
    pub fn try_recv(&mut self) -> Option<Vec<DocUpdate>> {
        self.rx.try_recv().ok()
    }
}

/// Holds the current head of one database.
///
/// All mutation goes through [`apply_head`](Self::apply_head) and
/// [`compact`](Self::compact), which the apply-head queue calls one task at a
/// time.
pub struct CrdtClock {
    blockstore: Arc<Blockstore>,
    head: RwLock<Head>,
    subscribers: Mutex<HashMap<SubscriptionId, broadcast::Sender<Vec<DocUpdate>>>>,
}

impl CrdtClock {
    pub fn new(blockstore: Arc<Blockstore>, head: Head) -> Self {
        Self {
            blockstore,
            head: RwLock::new(head),
            subscribers: Mutex::new(HashMap::new()),
        }
    }

    pub fn head(&self) -> Head {
        self.head.read().expect("lock poisoned").clone()
    }

    pub fn blockstore(&self) -> &Arc<Blockstore> {
        &self.blockstore
    }

    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = broadcast::channel(SUBSCRIBER_CAPACITY);
        let id = SubscriptionId::new();
        self.subscribers.lock().expect("lock poisoned").insert(id, tx);
        Subscription { id, rx }
    }

    /// Returns whether the subscription was still registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscribers
            .lock()
            .expect("lock poisoned")
            .remove(&id)
            .is_some()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().expect("lock poisoned").len()
    }

    fn set_head(&self, head: Head) {
        *self.head.write().expect("lock poisoned") = head;
    }

    /// Move the head to `new`.
    ///
    /// `prev` is the head `new` was computed from. If the head has not moved
    /// since, `new` replaces it; otherwise every tip of `new` is advanced into
    /// the current head. A head that was not produced by a local commit
    /// (`updates` is `None`), or that had to be merged, is committed so it
    /// survives a restart. Subscribers get `updates`, or the changes between
    /// the old and new head when the caller had none.
    pub async fn apply_head(
        &self,
        new: Head,
        prev: Head,
        updates: Option<Vec<DocUpdate>>,
    ) -> CrdtResult<Head> {
        let current = self.head();
        if new == current {
            return Ok(current);
        }

        let events = EventFetcher::new(self.blockstore.as_ref());
        for tip in &new {
            events.get(tip).await?;
        }

        let moved = current != prev;
        let next = if moved {
            let mut merged = current.clone();
            for tip in &new {
                merged = advance(&events, &merged, *tip).await?;
            }
            merged
        } else {
            new
        };
        if next == current {
            debug!(tips = current.len(), "head already contains applied events");
            return Ok(current);
        }

        if moved || updates.is_none() {
            let tx = self.blockstore.open_transaction();
            self.blockstore
                .commit_transaction(&tx, CommitMeta::data(next.iter().copied()), CommitOpts::default())
                .await?;
        }
        self.set_head(next.clone());
        info!(tips = next.len(), merged = moved, "head advanced");

        let changes = match updates {
            Some(updates) => updates,
            None if self.subscriber_count() > 0 => {
                changes_since(self.blockstore.as_ref(), &next, &current, None).await?
            }
            None => Vec::new(),
        };
        self.notify(changes);
        Ok(next)
    }

    /// Fold a remote meta record into the car log and apply the head it
    /// carries. Returns the current head when the record was already known.
    pub async fn merge_remote(&self, meta: &DbMeta) -> CrdtResult<Head> {
        let Some(loader) = self.blockstore.loader() else {
            return Ok(self.head());
        };
        let Some(header) = loader.merge_db_meta(meta).await? else {
            return Ok(self.head());
        };
        let Some(remote) = header.head() else {
            return Ok(self.head());
        };
        debug!(car = %meta.car.short_hex(), tips = remote.len(), "applying remote head");
        self.apply_head(Head::new(remote.iter().copied()), Head::empty(), None)
            .await
    }

    /// Fold the car log into one container holding the state at the current
    /// head. `None` when nothing was compacted.
    pub async fn compact(&self) -> CrdtResult<Option<Cid>> {
        let head = self.head();
        if head.is_empty() {
            return Ok(None);
        }
        self.blockstore
            .compact(|fetcher| async move {
                compact_state(&fetcher, &head).await?;
                Ok::<_, CrdtError>(CommitMeta::data(head.iter().copied()))
            })
            .await
    }

    fn notify(&self, updates: Vec<DocUpdate>) {
        if updates.is_empty() {
            return;
        }
        let mut subscribers = self.subscribers.lock().expect("lock poisoned");
        let before = subscribers.len();
        subscribers.retain(|_, tx| tx.send(updates.clone()).is_ok());
        if subscribers.len() < before {
            debug!(dropped = before - subscribers.len(), "subscriber detached");
        }
    }
}

impl fmt::Debug for CrdtClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CrdtClock")
            .field("head", &self.head())
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
