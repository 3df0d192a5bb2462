//! Document layer for cairn.
//!
//! A [`Crdt`] is one database: a key → JSON document map whose every
//! version is a [`StateNode`] block referenced from a merkle-clock event.
//!
//! - Writes are batched by the [`WriteQueue`]; each batch becomes one event
//!   and one container.
//! - Head transitions (local batches, remote heads, compaction) run one at a
//!   time on the [`ApplyHeadQueue`].
//! - Reads resolve the state at the current head, replaying from the common
//!   ancestor when the head has forked.

pub mod apply_head_queue;
pub mod bulk;
pub mod clock;
pub mod compact;
pub mod crdt;
pub mod error;
pub mod state;
pub mod write_queue;

pub use apply_head_queue::{ApplyHeadQueue, HeadOutcome, HeadTask};
pub use bulk::{apply_bulk_update, changes_since, BulkResult, DocUpdate};
pub use clock::{CrdtClock, Subscription, SubscriptionId};
pub use compact::compact_state;
pub use crdt::{Changes, Crdt};
pub use error::{CrdtError, CrdtResult};
pub use state::{all_entries, get_value, state_at, DocValue, StateNode};
pub use write_queue::WriteQueue;
