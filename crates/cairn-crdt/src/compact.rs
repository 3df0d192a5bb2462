//! The reads a compaction performs. Every block touched here is written to
//! the compacted container.

use cairn_clock::{events_since, EventFetcher, Head};
use cairn_store::{BlockFetcher, LoggingFetcher};
use tracing::debug;

use crate::bulk::changes_since;
use crate::error::CrdtResult;
use crate::state::state_at;

/// Walk everything `head` needs: the full event history, each tip's state
/// root, the merged state (and the ancestor root a fork replays from), the
/// live document blocks, and the documents the change feed reads.
pub async fn compact_state(fetcher: &LoggingFetcher, head: &Head) -> CrdtResult<()> {
    let events = EventFetcher::new(fetcher);
    let history = events_since(&events, head, &Head::empty()).await?;

    for tip in head {
        if let Some(root) = events.get(tip).await?.data().root {
            fetcher.get(&root).await?;
        }
    }

    let state = state_at(fetcher, head).await?;
    for doc in state.entries.values() {
        fetcher.get(doc).await?;
    }
    changes_since(fetcher, head, &Head::empty(), None).await?;

    debug!(
        events = history.len(),
        docs = state.len(),
        blocks = fetcher.len(),
        "walked live state for compaction"
    );
    Ok(())
}
