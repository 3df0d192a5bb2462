use std::collections::{HashSet, VecDeque};

use crate::error::ClockResult;
use crate::event::{EventBlock, EventFetcher};
use crate::head::Head;

fn label(event: &EventBlock) -> String {
    let keys: Vec<&str> = event.data().ops.iter().map(|op| op.key.as_str()).collect();
    let root = event
        .data()
        .root
        .map(|r| r.short_hex())
        .unwrap_or_else(|| "-".into());
    format!("{}\\nkeys: {}\\nroot: {}", event.cid().short_hex(), keys.join(","), root)
}

/// Render the DAG below `head` as Graphviz DOT, one line per item.
pub async fn vis(events: &EventFetcher<'_>, head: &Head) -> ClockResult<Vec<String>> {
    let mut lines = vec![
        "digraph clock {".to_string(),
        "  node [shape=point fontname=\"Courier\"]; head;".to_string(),
    ];
    let mut seen = HashSet::new();
    let mut queue = VecDeque::new();

    for tip in head {
        let event = events.get(tip).await?;
        seen.insert(*tip);
        lines.push(format!(
            "  node [shape=oval fontname=\"Courier\"]; \"{tip}\" [label=\"{}\"];",
            label(&event)
        ));
        lines.push(format!("  head -> \"{tip}\";"));
        for parent in event.parents() {
            lines.push(format!("  \"{tip}\" -> \"{parent}\";"));
            queue.push_back(*parent);
        }
    }

    while let Some(cid) = queue.pop_front() {
        if !seen.insert(cid) {
            continue;
        }
        let event = events.get(&cid).await?;
        lines.push(format!(
            "  node [shape=oval fontname=\"Courier\"]; \"{cid}\" [label=\"{}\"];",
            label(&event)
        ));
        for parent in event.parents() {
            lines.push(format!("  \"{cid}\" -> \"{parent}\";"));
            queue.push_back(*parent);
        }
    }

    lines.push("}".to_string());
    Ok(lines)
}
