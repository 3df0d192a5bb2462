use std::collections::{HashSet, VecDeque};

use cairn_types::Cid;
use tracing::debug;

use crate::error::ClockResult;
use crate::event::EventFetcher;
use crate::head::Head;

/// Fold `event` into `head`.
///
/// - already a tip: unchanged
/// - descends from some tips: those tips are replaced by `event`
/// - an ancestor of some tip: unchanged
/// - otherwise concurrent with every tip: added as a new tip
///
/// The result does not depend on the order events are advanced in.
pub async fn advance(events: &EventFetcher<'_>, head: &Head, event: Cid) -> ClockResult<Head> {
    if head.contains(&event) {
        return Ok(head.clone());
    }

    let mut next = head.clone();
    let mut changed = false;
    for tip in head {
        if contains(events, &event, tip).await? {
            next.remove(tip);
            next.insert(event);
            changed = true;
        }
    }
    if changed {
        debug!(event = %event.short_hex(), tips = next.len(), "event supersedes tips");
        return Ok(next);
    }

    for tip in head {
        if contains(events, tip, &event).await? {
            return Ok(head.clone());
        }
    }

    next.insert(event);
    debug!(event = %event.short_hex(), tips = next.len(), "concurrent event forks head");
    Ok(next)
}

/// Whether `a` is `b` or descends from it. Breadth-first over parents.
///
/// Never descends below a node that is one of `b`'s own parents: `b` cannot
/// be found there without a cycle.
pub async fn contains(events: &EventFetcher<'_>, a: &Cid, b: &Cid) -> ClockResult<bool> {
    if a == b {
        return Ok(true);
    }
    let a_event = events.get(a).await?;
    let b_event = events.get(b).await?;

    let mut visited = HashSet::new();
    let mut queue: VecDeque<Cid> = a_event.parents().iter().copied().collect();
    while let Some(link) = queue.pop_front() {
        if link == *b {
            return Ok(true);
        }
        if !visited.insert(link) || b_event.parents().contains(&link) {
            continue;
        }
        let event = events.get(&link).await?;
        queue.extend(event.parents().iter().copied());
    }
    Ok(false)
}
