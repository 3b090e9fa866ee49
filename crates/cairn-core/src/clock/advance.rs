//! Frontier maintenance: [`advance`] and the [`contains`] ancestry test.

use std::collections::{HashSet, VecDeque};

use tracing::{instrument, trace};

use super::fetcher::EventFetcher;
use super::head::Head;
use crate::block::BlockFetcher;
use crate::error::{Error, Result};
use crate::link::Link;

/// Advance `head` by `event`.
///
/// The event must already be readable through `events`. Head links that
/// `event` descends from are replaced by it; if some head link already
/// descends from `event` the head is returned unchanged; otherwise the
/// event is concurrent and appended.
///
/// Surviving links keep their order and the new event, when added, goes
/// last. Use [`Head::canonical`] for the persisted form.
///
/// # Errors
///
/// Propagates [`Error::MissingBlock`], [`Error::CorruptBlock`] and
/// [`Error::CycleDetected`] from the ancestry walks.
#[instrument(skip(events, head), fields(head_len = head.len()))]
pub fn advance<F: BlockFetcher>(
    events: &EventFetcher<F>,
    head: &Head,
    event: &Link,
) -> Result<Head> {
    if head.contains(event) {
        trace!("event already in head");
        return Ok(head.clone());
    }

    let mut survivors = Vec::with_capacity(head.len() + 1);
    let mut subsumed = false;
    for link in head {
        if contains(events, event, link)? {
            subsumed = true;
        } else if !survivors.contains(link) {
            survivors.push(link.clone());
        }
    }
    if subsumed {
        trace!(dropped = head.len() - survivors.len(), "event supersedes head links");
        survivors.push(event.clone());
        return Ok(Head::from_links(survivors));
    }

    for link in head {
        if contains(events, link, event)? {
            trace!(%link, "event is already an ancestor of the head");
            return Ok(head.clone());
        }
    }

    trace!("event is concurrent with the head");
    let mut grown = head.as_slice().to_vec();
    grown.push(event.clone());
    Ok(Head::from_links(grown))
}

/// Whether `a` is `b` or descends from it.
///
/// Breadth-first over `a`'s ancestors. A link that is one of `b`'s own
/// parents is not descended: `b` cannot sit below its parent in an acyclic
/// graph. Each ancestor is visited at most once.
///
/// # Errors
///
/// Returns [`Error::CycleDetected`] if the walk leads back to `a`, and
/// fetch errors for unreadable events.
pub fn contains<F: BlockFetcher>(events: &EventFetcher<F>, a: &Link, b: &Link) -> Result<bool> {
    if a == b {
        return Ok(true);
    }
    let start = events.get(a)?;
    let target = events.get(b)?;

    let mut visited: HashSet<Link> = HashSet::new();
    let mut queue: VecDeque<Link> = start.parents().iter().cloned().collect();

    while let Some(link) = queue.pop_front() {
        if link == *b {
            return Ok(true);
        }
        if link == *a {
            return Err(Error::CycleDetected { link });
        }
        if target.parents().contains(&link) || visited.contains(&link) {
            continue;
        }
        let event = events.get(&link)?;
        queue.extend(event.parents().iter().cloned());
        visited.insert(link);
    }
    Ok(false)
}
