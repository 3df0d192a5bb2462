//! Ordering the events between a head and its common ancestor.
//!
//! A head with several tips is resolved by finding the single event every tip
//! descends from, then replaying the events above it in a deterministic order:
//! each event is weighted by its depth below every tip, summed over every path
//! and every tip. Heavier (older) buckets come first, and ties inside a bucket are broken by
//! ascending id.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use cairn_types::Cid;
use tracing::debug;

use crate::error::{ClockError, ClockResult};
use crate::event::{EventBlock, EventFetcher};
use crate::head::Head;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A common ancestor and the events above it in replay order.
#[derive(Clone, Debug)]
pub struct SortedEvents {
    pub ancestor: Cid,
    pub sorted: Vec<Arc<EventBlock>>,
}

/// Find the common ancestor of `head`'s tips and the events between it and
/// the tips, in replay order. The ancestor itself is excluded.
///
/// A single-tip head is its own ancestor and has nothing to replay.
pub async fn find_common_ancestor_with_sorted_events(
    events: &EventFetcher<'_>,
    head: &Head,
) -> ClockResult<SortedEvents> {
    if head.is_empty() {
        return Err(ClockError::EmptyHead);
    }
    let ancestor = find_common_ancestor(events, head.to_vec())
        .await?
        .ok_or(ClockError::NoCommonAncestor)?;
    let sorted = find_sorted_events(events, head.as_slice(), &ancestor).await?;
    debug!(ancestor = %ancestor.short_hex(), events = sorted.len(), "sorted events for replay");
    Ok(SortedEvents { ancestor, sorted })
}

/// The first event that every path from every child leads to.
fn find_common_ancestor<'a>(
    events: &'a EventFetcher<'a>,
    children: Vec<Cid>,
) -> BoxFuture<'a, ClockResult<Option<Cid>>> {
    Box::pin(async move {
        match children.as_slice() {
            [] => return Ok(None),
            [only] => return Ok(Some(*only)),
            _ => {}
        }
        let mut candidates: Vec<Vec<Cid>> = children.iter().map(|c| vec![*c]).collect();
        loop {
            let mut changed = false;
            for i in 0..candidates.len() {
                let Some(last) = candidates[i].last().copied() else { continue };
                let Some(candidate) = find_ancestor_candidate(events, &last).await? else {
                    continue;
                };
                changed = true;
                candidates[i].push(candidate);
                if let Some(ancestor) = find_common_id(&candidates) {
                    return Ok(Some(ancestor));
                }
            }
            if !changed {
                return Ok(None);
            }
        }
    })
}

/// Next step down from `root`: its only parent, or the common ancestor of its
/// parents for a merge event. `None` at a genesis event.
async fn find_ancestor_candidate(events: &EventFetcher<'_>, root: &Cid) -> ClockResult<Option<Cid>> {
    let event = events.get(root).await?;
    match event.parents() {
        [] => Ok(None),
        [only] => Ok(Some(*only)),
        parents => find_common_ancestor(events, parents.to_vec()).await,
    }
}

/// First id (scanning lists in order) that appears in every list.
fn find_common_id(lists: &[Vec<Cid>]) -> Option<Cid> {
    for (i, list) in lists.iter().enumerate() {
        for item in list {
            let everywhere = lists
                .iter()
                .enumerate()
                .all(|(j, other)| i == j || other.contains(item));
            if everywhere {
                return Some(*item);
            }
        }
    }
    None
}

async fn find_sorted_events(
    events: &EventFetcher<'_>,
    head: &[Cid],
    tail: &Cid,
) -> ClockResult<Vec<Arc<EventBlock>>> {
    let mut weights: HashMap<Cid, (Arc<EventBlock>, usize)> = HashMap::new();
    for tip in head {
        for (event, depth) in find_events(events, tip, tail).await? {
            weights
                .entry(event.cid())
                .and_modify(|(_, weight)| *weight += depth)
                .or_insert((event, depth));
        }
    }

    let mut buckets: BTreeMap<usize, Vec<Arc<EventBlock>>> = BTreeMap::new();
    for (event, weight) in weights.into_values() {
        buckets.entry(weight).or_default().push(event);
    }

    let mut sorted = Vec::new();
    for (_, mut bucket) in buckets.into_iter().rev() {
        bucket.sort_by_key(|e| e.cid());
        sorted.extend(bucket);
    }
    Ok(sorted)
}

/// Events reachable from `start` without passing through `end`, each with its
/// depth summed over every path from `start`. An event under a diamond is
/// counted once per path. `end` is excluded.
async fn find_events(
    events: &EventFetcher<'_>,
    start: &Cid,
    end: &Cid,
) -> ClockResult<Vec<(Arc<EventBlock>, usize)>> {
    if start == end {
        return Ok(Vec::new());
    }

    let mut found: HashMap<Cid, Arc<EventBlock>> = HashMap::new();
    let mut incoming: HashMap<Cid, usize> = HashMap::new();
    let mut queue = VecDeque::from([*start]);
    while let Some(cid) = queue.pop_front() {
        if found.contains_key(&cid) {
            continue;
        }
        let event = events.get(&cid).await?;
        for parent in event.parents().iter().filter(|p| *p != end) {
            *incoming.entry(*parent).or_default() += 1;
            if !found.contains_key(parent) {
                queue.push_back(*parent);
            }
        }
        found.insert(cid, event);
    }

    // (paths, summed depth) per event, pushed to parents once every child is done.
    let mut paths: HashMap<Cid, (usize, usize)> = HashMap::from([(*start, (1, 0))]);
    let mut ready = VecDeque::from([*start]);
    let mut out = Vec::with_capacity(found.len());
    while let Some(cid) = ready.pop_front() {
        let Some(event) = found.get(&cid) else { continue };
        let (count, depth) = paths.get(&cid).copied().unwrap_or_default();
        for parent in event.parents().iter().filter(|p| *p != end) {
            let entry = paths.entry(*parent).or_default();
            entry.0 = entry.0.saturating_add(count);
            entry.1 = entry.1.saturating_add(depth).saturating_add(count);
            if let Some(left) = incoming.get_mut(parent) {
                *left -= 1;
                if *left == 0 {
                    ready.push_back(*parent);
                }
            }
        }
        out.push((event.clone(), depth));
    }
    Ok(out)
}

/// Events reachable from `head` that are not at or below a tip of `since`,
/// newest first. An empty `since` walks the whole history.
pub async fn events_since(
    events: &EventFetcher<'_>,
    head: &Head,
    since: &Head,
) -> ClockResult<Vec<Arc<EventBlock>>> {
    let mut out = Vec::new();
    let mut visited: HashSet<Cid> = since.iter().copied().collect();
    let mut queue: VecDeque<Cid> = head
        .iter()
        .filter(|c| !since.contains(c))
        .copied()
        .collect();
    visited.extend(queue.iter().copied());
    while let Some(cid) = queue.pop_front() {
        let event = events.get(&cid).await?;
        for parent in event.parents() {
            if visited.insert(*parent) {
                queue.push_back(*parent);
            }
        }
        out.push(event);
    }
    Ok(out)
}
