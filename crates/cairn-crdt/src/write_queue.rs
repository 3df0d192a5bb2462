//! Batches concurrent document writes into single bulk commits.

use std::sync::Arc;

use cairn_car::CommitMeta;
use cairn_clock::Head;
use cairn_store::{Blockstore, CommitOpts};
use cairn_types::Cid;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::apply_head_queue::ApplyHeadQueue;
use crate::bulk::{apply_bulk_update, DocUpdate};
use crate::clock::CrdtClock;
use crate::error::{CrdtError, CrdtResult};

const ACTOR_CHANNEL_CAP: usize = 64;

struct WriteRequest {
    updates: Vec<DocUpdate>,
    expected: Option<Head>,
    reply: oneshot::Sender<CrdtResult<Head>>,
}

impl WriteRequest {
    fn answer(self, result: CrdtResult<Head>) {
        if self.reply.send(result).is_err() {
            debug!("write caller went away");
        }
    }
}

enum ToWriter {
    Write(WriteRequest),
    Compact(oneshot::Sender<CrdtResult<Option<Cid>>>),
}

/// Handle to the write actor.
///
/// Requests that arrive while a batch is being committed are drained
/// together as the next batch: one event and one container per batch.
#[derive(Debug, Clone)]
pub struct WriteQueue {
    to_actor: mpsc::Sender<ToWriter>,
}

impl WriteQueue {
    /// Spawn the actor. `auto_compact` of zero disables automatic
    /// compaction.
    pub fn spawn(clock: Arc<CrdtClock>, heads: ApplyHeadQueue, auto_compact: usize) -> Self {
        let (to_actor, inbox) = mpsc::channel(ACTOR_CHANNEL_CAP);
        let actor = Actor {
            blockstore: clock.blockstore().clone(),
            clock,
            heads,
            auto_compact,
            inbox,
        };
        tokio::spawn(actor.run());
        Self { to_actor }
    }

    /// Queue `updates`. With `expected`, the write is rejected with
    /// [`CrdtError::MvccConflict`] unless the head still equals it when the
    /// batch runs.
    pub async fn push(&self, updates: Vec<DocUpdate>, expected: Option<Head>) -> CrdtResult<Head> {
        let (reply, reply_rx) = oneshot::channel();
        self.to_actor
            .send(ToWriter::Write(WriteRequest {
                updates,
                expected,
                reply,
            }))
            .await
            .map_err(|_| CrdtError::Closed)?;
        reply_rx.await.map_err(|_| CrdtError::Closed)?
    }

    /// Compact after any writes queued ahead of this call.
    pub async fn compact(&self) -> CrdtResult<Option<Cid>> {
        let (reply, reply_rx) = oneshot::channel();
        self.to_actor
            .send(ToWriter::Compact(reply))
            .await
            .map_err(|_| CrdtError::Closed)?;
        reply_rx.await.map_err(|_| CrdtError::Closed)?
    }
}

struct Actor {
    blockstore: Arc<Blockstore>,
    clock: Arc<CrdtClock>,
    heads: ApplyHeadQueue,
    auto_compact: usize,
    inbox: mpsc::Receiver<ToWriter>,
}

impl Actor {
    async fn run(mut self) {
        while let Some(first) = self.inbox.recv().await {
            let mut batch = Vec::new();
            let mut compactions = Vec::new();
            let mut sort = |msg: ToWriter| match msg {
                ToWriter::Write(request) => batch.push(request),
                ToWriter::Compact(reply) => compactions.push(reply),
            };
            sort(first);
            while let Ok(next) = self.inbox.try_recv() {
                sort(next);
            }

            if !batch.is_empty() {
                self.write_batch(batch).await;
                self.maybe_auto_compact().await;
            }
            for reply in compactions {
                let result = self.heads.compact().await;
                if reply.send(result).is_err() {
                    debug!("compaction caller went away");
                }
            }
        }
        debug!("write queue stopped");
    }

    async fn write_batch(&self, batch: Vec<WriteRequest>) {
        let current = self.clock.head();
        let mut accepted = Vec::with_capacity(batch.len());
        for request in batch {
            if let Some(expected) = request.expected.as_ref().filter(|e| **e != current) {
                let conflict = CrdtError::MvccConflict {
                    expected: expected.clone(),
                    actual: current.clone(),
                };
                request.answer(Err(conflict));
                continue;
            }
            accepted.push(request);
        }

        let updates: Vec<DocUpdate> = accepted
            .iter()
            .flat_map(|r| r.updates.iter().cloned())
            .collect();
        if updates.is_empty() {
            for request in accepted {
                request.answer(Ok(current.clone()));
            }
            return;
        }

        let requests = accepted.len();
        match self.commit_updates(current, updates).await {
            Ok(head) => {
                debug!(requests, tips = head.len(), "write batch committed");
                for request in accepted {
                    request.answer(Ok(head.clone()));
                }
            }
            Err(e) => {
                warn!(requests, error = %e, "write batch failed");
                let cause = Arc::new(e);
                for request in accepted {
                    request.answer(Err(CrdtError::BatchFailed(cause.clone())));
                }
            }
        }
    }

    async fn commit_updates(&self, prev: Head, updates: Vec<DocUpdate>) -> CrdtResult<Head> {
        let tx = self.blockstore.open_transaction();
        let result = match apply_bulk_update(&tx, &prev, &updates).await {
            Ok(result) => result,
            Err(e) => {
                self.blockstore.discard_transaction(&tx);
                return Err(e);
            }
        };
        self.blockstore
            .commit_transaction(
                &tx,
                CommitMeta::data(result.head.iter().copied()),
                CommitOpts::default(),
            )
            .await?;
        self.heads
            .apply_head(result.head, prev, Some(updates))
            .await
    }

    async fn maybe_auto_compact(&self) {
        if self.auto_compact == 0 || self.blockstore.car_log().len() <= self.auto_compact {
            return;
        }
        match self.heads.compact().await {
            Ok(Some(car)) => info!(car = %car.short_hex(), "auto-compaction finished"),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "auto-compaction failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> (WriteRequest, oneshot::Receiver<CrdtResult<Head>>) {
        let (reply, rx) = oneshot::channel();
        let request = WriteRequest {
            updates: vec![DocUpdate::delete("k")],
            expected: None,
            reply,
        };
        (request, rx)
    }

    #[test]
    fn answer_reaches_a_waiting_caller() {
        let (request, mut rx) = request();
        request.answer(Ok(Head::empty()));
        assert_eq!(rx.try_recv().unwrap().unwrap(), Head::empty());
    }

    #[test]
    fn answer_to_a_departed_caller_is_dropped_quietly() {
        let (request, rx) = request();
        drop(rx);
        request.answer(Err(CrdtError::EmptyBatch));
    }
}
