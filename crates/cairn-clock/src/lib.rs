//! Merkle clock for cairn.
//!
//! Every write is recorded as an immutable [`Event`] block pointing at the
//! events it causally follows. The [`Head`] is the set of events with no
//! known descendant. Concurrent writers produce a head with several tips;
//! [`advance`] folds new events in deterministically, and
//! [`find_common_ancestor_with_sorted_events`] orders the events above the
//! tips' common ancestor so a state can be rebuilt by replay.
//!
//! Ancestor searches are iterative work-lists with visited sets.

pub mod advance;
pub mod error;
pub mod event;
pub mod head;
pub mod replay;
pub mod vis;

pub use advance::{advance, contains};
pub use error::{ClockError, ClockResult};
pub use event::{Event, EventBlock, EventData, EventFetcher, EventOp, Op};
pub use head::Head;
pub use replay::{events_since, find_common_ancestor_with_sorted_events, SortedEvents};
pub use vis::vis;

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use cairn_store::{EmptyFetcher, StoreError, Transaction};
    use cairn_types::Cid;
    use proptest::prelude::*;

    use super::*;

    struct Dag {
        tx: Transaction,
    }

    impl Dag {
        fn new() -> Self {
            Self {
                tx: Transaction::new(Arc::new(EmptyFetcher)),
            }
        }

        fn event(&self, key: &str, parents: &[Cid]) -> Cid {
            let data = EventData {
                ops: vec![EventOp::put(key, Cid::from_bytes(key.as_bytes()))],
                root: None,
            };
            let event = EventBlock::create(data, parents.iter().copied()).unwrap();
            self.tx.put(event.block().clone())
        }

        fn fetcher(&self) -> EventFetcher<'_> {
            EventFetcher::new(&self.tx)
        }
    }

    async fn fold(events: &EventFetcher<'_>, ids: impl IntoIterator<Item = Cid>) -> Head {
        let mut head = Head::empty();
        for id in ids {
            head = advance(events, &head, id).await.unwrap();
        }
        head
    }

    // ---- advance ----

    #[tokio::test]
    async fn linear_writes_keep_one_tip() {
        let dag = Dag::new();
        let e1 = dag.event("a", &[]);
        let e2 = dag.event("b", &[e1]);
        let events = dag.fetcher();

        let head = advance(&events, &Head::empty(), e1).await.unwrap();
        assert_eq!(head, Head::single(e1));
        let head = advance(&events, &head, e2).await.unwrap();
        assert_eq!(head, Head::single(e2));
    }

    #[tokio::test]
    async fn concurrent_event_forks_and_merge_joins() {
        let dag = Dag::new();
        let e1 = dag.event("a", &[]);
        let e2 = dag.event("b", &[e1]);
        let e3 = dag.event("c", &[e1]);
        let events = dag.fetcher();

        let head = fold(&events, [e1, e2, e3]).await;
        assert_eq!(head, Head::new([e2, e3]));

        // Re-advancing a tip or an ancestor changes nothing.
        assert_eq!(advance(&events, &head, e3).await.unwrap(), head);
        assert_eq!(advance(&events, &head, e1).await.unwrap(), head);

        let merge = dag.event("m", &[e2, e3]);
        let head = advance(&events, &head, merge).await.unwrap();
        assert_eq!(head, Head::single(merge));
    }

    #[tokio::test]
    async fn fork_order_does_not_matter() {
        let dag = Dag::new();
        let e1 = dag.event("a", &[]);
        let e2 = dag.event("b", &[e1]);
        let e3 = dag.event("c", &[e1]);
        let events = dag.fetcher();
        assert_eq!(fold(&events, [e1, e2, e3]).await, fold(&events, [e1, e3, e2]).await);
        assert_eq!(fold(&events, [e3, e2, e1]).await, Head::new([e2, e3]));
    }

    #[tokio::test]
    async fn contains_follows_ancestry() {
        let dag = Dag::new();
        let e1 = dag.event("a", &[]);
        let e2 = dag.event("b", &[e1]);
        let e3 = dag.event("c", &[e2]);
        let side = dag.event("d", &[e1]);
        let events = dag.fetcher();
        assert!(contains(&events, &e3, &e1).await.unwrap());
        assert!(contains(&events, &e3, &e3).await.unwrap());
        assert!(!contains(&events, &e1, &e3).await.unwrap());
        assert!(!contains(&events, &e3, &side).await.unwrap());
    }

    #[tokio::test]
    async fn missing_event_is_store_error() {
        let dag = Dag::new();
        let e1 = dag.event("a", &[]);
        let ghost = Cid::from_bytes(b"ghost");
        let events = dag.fetcher();
        let err = advance(&events, &Head::single(e1), ghost).await.unwrap_err();
        assert!(matches!(err, ClockError::Store(StoreError::MissingBlock(cid)) if cid == ghost));
    }

    // ---- replay ordering ----

    #[tokio::test]
    async fn simple_fork_replays_both_tips_by_id() {
        let dag = Dag::new();
        let e1 = dag.event("a", &[]);
        let e2 = dag.event("b", &[e1]);
        let e3 = dag.event("c", &[e1]);
        let events = dag.fetcher();

        let result = find_common_ancestor_with_sorted_events(&events, &Head::new([e2, e3]))
            .await
            .unwrap();
        assert_eq!(result.ancestor, e1);
        let ids: Vec<Cid> = result.sorted.iter().map(|e| e.cid()).collect();
        let mut expected = vec![e2, e3];
        expected.sort();
        assert_eq!(ids, expected);
    }

    #[tokio::test]
    async fn deeper_events_replay_first() {
        let dag = Dag::new();
        let e1 = dag.event("root", &[]);
        let a1 = dag.event("a1", &[e1]);
        let a2 = dag.event("a2", &[a1]);
        let b1 = dag.event("b1", &[e1]);
        let events = dag.fetcher();

        let result = find_common_ancestor_with_sorted_events(&events, &Head::new([a2, b1]))
            .await
            .unwrap();
        assert_eq!(result.ancestor, e1);
        let ids: Vec<Cid> = result.sorted.iter().map(|e| e.cid()).collect();
        let mut tips = vec![a2, b1];
        tips.sort();
        assert_eq!(ids, vec![a1, tips[0], tips[1]]);
    }

    #[tokio::test]
    async fn merge_event_resolves_through_its_parents() {
        let dag = Dag::new();
        let e1 = dag.event("root", &[]);
        let a = dag.event("a", &[e1]);
        let b = dag.event("b", &[e1]);
        let m = dag.event("m", &[a, b]);
        let c = dag.event("c", &[e1]);
        let events = dag.fetcher();

        let result = find_common_ancestor_with_sorted_events(&events, &Head::new([m, c]))
            .await
            .unwrap();
        assert_eq!(result.ancestor, e1);
        let ids: Vec<Cid> = result.sorted.iter().map(|e| e.cid()).collect();
        assert_eq!(ids.len(), 4);
        let mut deeper = vec![a, b];
        deeper.sort();
        let mut tips = vec![m, c];
        tips.sort();
        assert_eq!(ids, [deeper, tips].concat());
    }

    #[tokio::test]
    async fn diamond_below_a_tip_weighs_every_path() {
        let dag = Dag::new();
        let c = dag.event("root", &[]);
        let z = dag.event("z", &[c]);
        let x = dag.event("x", &[z]);
        let y = dag.event("y", &[z]);
        let t1 = dag.event("t1", &[x, y]);
        let w3 = dag.event("w3", &[c]);
        let w2 = dag.event("w2", &[w3]);
        let w1 = dag.event("w1", &[w2]);
        let t2 = dag.event("t2", &[w1]);
        let events = dag.fetcher();

        let result = find_common_ancestor_with_sorted_events(&events, &Head::new([t1, t2]))
            .await
            .unwrap();
        assert_eq!(result.ancestor, c);
        let ids: Vec<Cid> = result.sorted.iter().map(|e| e.cid()).collect();
        // z sits under two paths of depth 2, so it outweighs w3 at depth 3.
        let mut ones = vec![x, y, w1];
        ones.sort();
        let mut tips = vec![t1, t2];
        tips.sort();
        assert_eq!(ids, [vec![z, w3, w2], ones, tips].concat());
    }

    #[tokio::test]
    async fn single_tip_is_its_own_ancestor() {
        let dag = Dag::new();
        let e1 = dag.event("a", &[]);
        let e2 = dag.event("b", &[e1]);
        let events = dag.fetcher();
        let result = find_common_ancestor_with_sorted_events(&events, &Head::single(e2))
            .await
            .unwrap();
        assert_eq!(result.ancestor, e2);
        assert!(result.sorted.is_empty());
    }

    #[tokio::test]
    async fn disjoint_histories_have_no_common_ancestor() {
        let dag = Dag::new();
        let g1 = dag.event("x", &[]);
        let g2 = dag.event("y", &[]);
        let events = dag.fetcher();
        let err = find_common_ancestor_with_sorted_events(&events, &Head::new([g1, g2]))
            .await
            .unwrap_err();
        assert!(matches!(err, ClockError::NoCommonAncestor));
    }

    #[tokio::test]
    async fn empty_head_cannot_be_replayed() {
        let dag = Dag::new();
        let events = dag.fetcher();
        let err = find_common_ancestor_with_sorted_events(&events, &Head::empty())
            .await
            .unwrap_err();
        assert!(matches!(err, ClockError::EmptyHead));
    }

    // ---- change feed / vis ----

    #[tokio::test]
    async fn events_since_stops_at_since() {
        let dag = Dag::new();
        let e1 = dag.event("a", &[]);
        let e2 = dag.event("b", &[e1]);
        let e3 = dag.event("c", &[e2]);
        let events = dag.fetcher();

        let ids = |v: Vec<Arc<EventBlock>>| v.iter().map(|e| e.cid()).collect::<Vec<_>>();
        let since = events_since(&events, &Head::single(e3), &Head::single(e1))
            .await
            .unwrap();
        assert_eq!(ids(since), vec![e3, e2]);
        let all = events_since(&events, &Head::single(e3), &Head::empty())
            .await
            .unwrap();
        assert_eq!(ids(all), vec![e3, e2, e1]);
        let none = events_since(&events, &Head::single(e3), &Head::single(e3))
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn vis_renders_dot() {
        let dag = Dag::new();
        let e1 = dag.event("a", &[]);
        let e2 = dag.event("b", &[e1]);
        let e3 = dag.event("c", &[e1]);
        let events = dag.fetcher();
        let lines = vis(&events, &Head::new([e2, e3])).await.unwrap();
        assert_eq!(lines.first().map(String::as_str), Some("digraph clock {"));
        assert_eq!(lines.last().map(String::as_str), Some("}"));
        assert!(lines.contains(&format!("  head -> \"{e2}\";")));
        assert!(lines.contains(&format!("  \"{e3}\" -> \"{e1}\";")));
        // e1 is rendered once even though two tips point at it.
        let e1_nodes = lines
            .iter()
            .filter(|l| l.starts_with("  node") && l.contains(&format!("\"{e1}\"")))
            .count();
        assert_eq!(e1_nodes, 1);
    }

    // ---- properties ----

    fn build_dag(masks: &[u8]) -> (Dag, Vec<Cid>) {
        let dag = Dag::new();
        let mut ids: Vec<Cid> = Vec::new();
        for (i, mask) in masks.iter().enumerate() {
            let parents: Vec<Cid> = (0..8usize)
                .filter(|bit| mask & (1 << bit) != 0 && *bit < i)
                .map(|bit| ids[i - 1 - bit])
                .collect();
            ids.push(dag.event(&format!("k{i}"), &parents));
        }
        (dag, ids)
    }

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap()
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(48))]

        #[test]
        fn advance_is_idempotent(masks in proptest::collection::vec(any::<u8>(), 1..12)) {
            let (dag, ids) = build_dag(&masks);
            let (once, twice) = runtime().block_on(async {
                let events = dag.fetcher();
                let last = *ids.last().unwrap();
                let head = fold(&events, ids[..ids.len() - 1].iter().copied()).await;
                let once = advance(&events, &head, last).await.unwrap();
                let twice = advance(&events, &once, last).await.unwrap();
                (once, twice)
            });
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn advance_is_order_independent(masks in proptest::collection::vec(any::<u8>(), 1..12)) {
            let (dag, ids) = build_dag(&masks);
            let (forward, backward) = runtime().block_on(async {
                let events = dag.fetcher();
                let forward = fold(&events, ids.iter().copied()).await;
                let backward = fold(&events, ids.iter().rev().copied()).await;
                (forward, backward)
            });
            prop_assert_eq!(forward, backward);
        }
    }
}
