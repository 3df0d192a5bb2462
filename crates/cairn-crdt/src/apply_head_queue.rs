//! Serializes every head transition through one actor task.

use std::collections::VecDeque;
use std::sync::Arc;

use cairn_clock::Head;
use cairn_store::DbMeta;
use cairn_types::Cid;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::bulk::DocUpdate;
use crate::clock::CrdtClock;
use crate::error::{CrdtError, CrdtResult};

/// Capacity of the channel feeding the actor.
const ACTOR_CHANNEL_CAP: usize = 64;

/// Work for the apply-head actor.
#[derive(Debug)]
pub enum HeadTask {
    /// Move the clock to `new`, computed from `prev`.
    Advance {
        new: Head,
        prev: Head,
        updates: Option<Vec<DocUpdate>>,
    },
    /// Merge a remote meta record into the car log and apply its head.
    Merge(DbMeta),
    /// Compact the car log at the current head.
    Compact,
}

impl HeadTask {
    /// Tasks that already know what changed run first.
    fn has_updates(&self) -> bool {
        matches!(self, Self::Advance { updates: Some(_), .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeadOutcome {
    Advanced(Head),
    Compacted(Option<Cid>),
}

impl HeadOutcome {
    fn kind(&self) -> &'static str {
        match self {
            Self::Advanced(_) => "advance",
            Self::Compacted(_) => "compact",
        }
    }

    fn into_head(self) -> CrdtResult<Head> {
        match self {
            Self::Advanced(head) => Ok(head),
            other => Err(CrdtError::UnexpectedOutcome {
                expected: "advance",
                actual: other.kind(),
            }),
        }
    }

    fn into_compacted(self) -> CrdtResult<Option<Cid>> {
        match self {
            Self::Compacted(car) => Ok(car),
            other => Err(CrdtError::UnexpectedOutcome {
                expected: "compact",
                actual: other.kind(),
            }),
        }
    }
}

struct Pending {
    task: HeadTask,
    reply: oneshot::Sender<CrdtResult<HeadOutcome>>,
}

/// Handle to the apply-head actor. Cloning shares the actor.
#[derive(Debug, Clone)]
pub struct ApplyHeadQueue {
    to_actor: mpsc::Sender<Pending>,
}

impl ApplyHeadQueue {
    /// Spawn the actor on the current Tokio runtime. It stops once every
    /// handle is dropped.
    pub fn spawn(clock: Arc<CrdtClock>) -> Self {
        let (to_actor, inbox) = mpsc::channel(ACTOR_CHANNEL_CAP);
        let actor = Actor {
            clock,
            inbox,
            pending: VecDeque::new(),
        };
        tokio::spawn(actor.run());
        Self { to_actor }
    }

    pub async fn push(&self, task: HeadTask) -> CrdtResult<HeadOutcome> {
        let (reply, reply_rx) = oneshot::channel();
        self.to_actor
            .send(Pending { task, reply })
            .await
            .map_err(|_| CrdtError::Closed)?;
        reply_rx.await.map_err(|_| CrdtError::Closed)?
    }

    pub async fn apply_head(
        &self,
        new: Head,
        prev: Head,
        updates: Option<Vec<DocUpdate>>,
    ) -> CrdtResult<Head> {
        self.push(HeadTask::Advance { new, prev, updates })
            .await?
            .into_head()
    }

    pub async fn merge_remote(&self, meta: DbMeta) -> CrdtResult<Head> {
        self.push(HeadTask::Merge(meta)).await?.into_head()
    }

    pub async fn compact(&self) -> CrdtResult<Option<Cid>> {
        self.push(HeadTask::Compact).await?.into_compacted()
    }
}

struct Actor {
    clock: Arc<CrdtClock>,
    inbox: mpsc::Receiver<Pending>,
    pending: VecDeque<Pending>,
}

impl Actor {
    async fn run(mut self) {
        loop {
            if self.pending.is_empty() {
                match self.inbox.recv().await {
                    Some(next) => self.pending.push_back(next),
                    None => break,
                }
            }
            while let Ok(next) = self.inbox.try_recv() {
                self.pending.push_back(next);
            }
            let Some(Pending { task, reply }) = self.pending.remove(next_index(&self.pending)) else {
                continue;
            };

            let result = match task {
                HeadTask::Advance { new, prev, updates } => self
                    .clock
                    .apply_head(new, prev, updates)
                    .await
                    .map(HeadOutcome::Advanced),
                HeadTask::Merge(meta) => self
                    .clock
                    .merge_remote(&meta)
                    .await
                    .map(HeadOutcome::Advanced),
                HeadTask::Compact => self.clock.compact().await.map(HeadOutcome::Compacted),
            };
            if let Err(e) = &result {
                warn!(error = %e, "apply-head task failed");
            }
            if reply.send(result).is_err() {
                debug!("apply-head caller went away");
            }
        }
        debug!("apply-head queue stopped");
    }
}

/// The first pending task carrying updates, else the oldest.
fn next_index(pending: &VecDeque<Pending>) -> usize {
    pending
        .iter()
        .position(|p| p.task.has_updates())
        .unwrap_or(0)
}
