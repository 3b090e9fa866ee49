//! Graphviz rendering of a clock.

use std::collections::{HashSet, VecDeque};
use std::fmt::Write as _;

use super::fetcher::EventFetcher;
use super::head::Head;
use crate::block::BlockFetcher;
use crate::error::Result;
use crate::event::EventBlock;

/// Render the clock below `head` as a DOT digraph, labelling each event
/// with the short form of its data link.
///
/// # Errors
///
/// Fetch errors for unreadable events.
pub fn vis<F: BlockFetcher>(events: &EventFetcher<F>, head: &Head) -> Result<String> {
    vis_with(events, head, |event| event.event.data.short())
}

/// Like [`vis`], with node labels produced by `label`.
///
/// # Errors
///
/// Fetch errors for unreadable events.
pub fn vis_with<F, L>(events: &EventFetcher<F>, head: &Head, label: L) -> Result<String>
where
    F: BlockFetcher,
    L: Fn(&EventBlock) -> String,
{
    let mut out = String::from("digraph clock {\n");
    out.push_str("  node [shape=point fontname=\"Courier\"]; head;\n");

    let mut nodes = HashSet::new();
    let mut queue = VecDeque::new();
    for link in head {
        let event = events.get(link)?;
        nodes.insert(link.clone());
        let _ = writeln!(
            out,
            "  node [shape=oval fontname=\"Courier\"]; \"{link}\" [label=\"{}\"];",
            escape(&label(&event))
        );
        let _ = writeln!(out, "  head -> \"{link}\";");
        for parent in event.parents() {
            let _ = writeln!(out, "  \"{link}\" -> \"{parent}\";");
        }
        queue.extend(event.parents().iter().cloned());
    }

    while let Some(link) = queue.pop_front() {
        if !nodes.insert(link.clone()) {
            continue;
        }
        let event = events.get(&link)?;
        let _ = writeln!(
            out,
            "  node [shape=oval]; \"{link}\" [label=\"{}\" fontname=\"Courier\"];",
            escape(&label(&event))
        );
        for parent in event.parents() {
            let _ = writeln!(out, "  \"{link}\" -> \"{parent}\";");
        }
        queue.extend(event.parents().iter().cloned());
    }

    out.push_str("}\n");
    Ok(out)
}

fn escape(label: &str) -> String {
    label.replace('\\', "\\\\").replace('"', "\\\"")
}
