//! Common-ancestor search and the deterministic replay order of the events
//! above it.
//!
//! # Algorithm
//!
//! [`find_common_ancestor`] grows one candidate chain per head. Each step
//! extends a chain by one hop: to the single parent of a linear event, or,
//! for a merge event, to the (recursively computed) common ancestor of its
//! parents. After every extension the first link, in chain order, that all
//! chains share is the answer. A chain stops at a root event; when no chain
//! can grow any further the heads have disjoint histories.
//!
//! [`find_sorted_events`] then weights every event between the heads and
//! that ancestor by its longest distance from each head, summed over heads.
//! Heavier (older) events come first, ties are broken by link, and a parent
//! always sorts before its children. Every replica computing the order over
//! the same heads gets the same sequence.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use tracing::{debug, instrument};

use super::advance::contains;
use super::fetcher::EventFetcher;
use crate::block::BlockFetcher;
use crate::error::{Error, Result};
use crate::event::EventBlock;
use crate::link::Link;

/// Find the most recent event that every link in `heads` descends from.
///
/// # Errors
///
/// - [`Error::NoCommonAncestor`] when `heads` is empty or the histories are
///   disjoint.
/// - [`Error::CycleDetected`] when a chain revisits a link.
/// - Fetch errors for unreadable events.
#[instrument(skip(events), fields(heads = heads.len()))]
pub fn find_common_ancestor<F: BlockFetcher>(
    events: &EventFetcher<F>,
    heads: &[Link],
) -> Result<Link> {
    let mut search = AncestorSearch {
        events,
        resolving: HashSet::new(),
        merges: HashMap::new(),
    };
    let ancestor = search.common_ancestor(heads)?;
    debug!(%ancestor, "found common ancestor");
    Ok(ancestor)
}

struct AncestorSearch<'a, F> {
    events: &'a EventFetcher<F>,
    /// Merge events whose parents' ancestor is being computed.
    resolving: HashSet<Link>,
    /// Memoized merge resolutions; `None` means the parents are disjoint.
    merges: HashMap<Link, Option<Link>>,
}

struct Chain {
    links: Vec<Link>,
    members: HashSet<Link>,
    stopped: bool,
}

impl Chain {
    fn new(head: &Link) -> Self {
        Self {
            links: vec![head.clone()],
            members: HashSet::from([head.clone()]),
            stopped: false,
        }
    }
}

impl<F: BlockFetcher> AncestorSearch<'_, F> {
    fn common_ancestor(&mut self, heads: &[Link]) -> Result<Link> {
        let mut chains: Vec<Chain> = heads.iter().map(Chain::new).collect();
        if let Some(shared) = first_shared(&chains) {
            return Ok(shared);
        }

        loop {
            let mut changed = false;
            for index in 0..chains.len() {
                if chains[index].stopped {
                    continue;
                }
                let Some(tip) = chains[index].links.last().cloned() else {
                    continue;
                };
                let Some(candidate) = self.candidate(&tip)? else {
                    chains[index].stopped = true;
                    continue;
                };
                let chain = &mut chains[index];
                if !chain.members.insert(candidate.clone()) {
                    return Err(Error::CycleDetected { link: candidate });
                }
                chain.links.push(candidate);
                changed = true;

                if let Some(shared) = first_shared(&chains) {
                    return Ok(shared);
                }
            }
            if !changed {
                return Err(Error::NoCommonAncestor {
                    heads: heads.to_vec(),
                });
            }
        }
    }

    /// Next hop down from `link`, or `None` when the chain cannot continue.
    fn candidate(&mut self, link: &Link) -> Result<Option<Link>> {
        let event = self.events.get(link)?;
        match event.parents() {
            [] => Ok(None),
            [parent] => Ok(Some(parent.clone())),
            parents => {
                if let Some(resolved) = self.merges.get(link) {
                    return Ok(resolved.clone());
                }
                if !self.resolving.insert(link.clone()) {
                    return Err(Error::CycleDetected { link: link.clone() });
                }
                let resolved = match self.common_ancestor(parents) {
                    Ok(ancestor) => Some(ancestor),
                    Err(Error::NoCommonAncestor { .. }) => None,
                    Err(err) => return Err(err),
                };
                self.resolving.remove(link);
                self.merges.insert(link.clone(), resolved.clone());
                Ok(resolved)
            }
        }
    }
}

/// First link, scanning chains in order, that every chain contains.
fn first_shared(chains: &[Chain]) -> Option<Link> {
    chains.iter().find_map(|chain| {
        chain
            .links
            .iter()
            .find(|link| chains.iter().all(|other| other.members.contains(*link)))
            .cloned()
    })
}

/// Events between `heads` and `ancestor`, in deterministic replay order.
///
/// The ancestor itself is neither included nor walked through. Each event's
/// weight is the sum, over heads, of its longest distance from that head;
/// events are returned by descending weight, then ascending link.
///
/// # Errors
///
/// Fetch errors for unreadable events.
#[instrument(skip(events, heads), fields(heads = heads.len(), %ancestor))]
pub fn find_sorted_events<F: BlockFetcher>(
    events: &EventFetcher<F>,
    heads: &[Link],
    ancestor: &Link,
) -> Result<Vec<Arc<EventBlock>>> {
    let mut weights: HashMap<Link, (u64, Arc<EventBlock>)> = HashMap::new();

    for head in heads {
        for (event, depth) in depths_from(events, head, ancestor)? {
            weights
                .entry(event.link.clone())
                .and_modify(|(weight, _)| *weight += depth)
                .or_insert((depth, event));
        }
    }

    let mut buckets: BTreeMap<u64, Vec<Arc<EventBlock>>> = BTreeMap::new();
    for (weight, event) in weights.into_values() {
        buckets.entry(weight).or_default().push(event);
    }

    let sorted: Vec<Arc<EventBlock>> = buckets
        .into_values()
        .rev()
        .flat_map(|mut bucket| {
            bucket.sort_by(|a, b| a.link.cmp(&b.link));
            bucket
        })
        .collect();
    debug!(events = sorted.len(), "sorted events above ancestor");
    Ok(sorted)
}

/// Longest distance from `head` to every event above `ancestor`.
///
/// Longest rather than shortest paths keep every parent strictly heavier
/// than its children, so replaying by descending weight never applies an
/// event before one of its ancestors.
fn depths_from<F: BlockFetcher>(
    events: &EventFetcher<F>,
    head: &Link,
    ancestor: &Link,
) -> Result<Vec<(Arc<EventBlock>, u64)>> {
    let mut found = Vec::new();
    if head == ancestor {
        return Ok(found);
    }

    // Collect the sub-graph and count each event's children inside it.
    let mut nodes: HashMap<Link, Arc<EventBlock>> = HashMap::new();
    let mut children: HashMap<Link, usize> = HashMap::new();
    let mut queue = VecDeque::from([head.clone()]);
    while let Some(link) = queue.pop_front() {
        if nodes.contains_key(&link) {
            continue;
        }
        let event = events.get(&link)?;
        for parent in event.parents() {
            if parent == ancestor {
                continue;
            }
            *children.entry(parent.clone()).or_default() += 1;
            if !nodes.contains_key(parent) {
                queue.push_back(parent.clone());
            }
        }
        nodes.insert(link, event);
    }

    // Visit an event once all of its children have been, carrying the
    // maximum depth down.
    let mut depths: HashMap<Link, u64> = HashMap::from([(head.clone(), 0)]);
    let mut ready = vec![head.clone()];
    while let Some(link) = ready.pop() {
        let Some(event) = nodes.get(&link) else {
            continue;
        };
        let depth = depths.get(&link).copied().unwrap_or_default();
        for parent in event.parents() {
            if parent == ancestor {
                continue;
            }
            let deepest = depths.entry(parent.clone()).or_default();
            *deepest = (*deepest).max(depth + 1);
            if let Some(pending) = children.get_mut(parent) {
                *pending -= 1;
                if *pending == 0 {
                    ready.push(parent.clone());
                }
            }
        }
        found.push((Arc::clone(event), depth));
    }
    Ok(found)
}

/// Result of [`find_events_to_sync`].
#[derive(Debug, Clone)]
pub struct SyncSet {
    pub ancestor: Link,
    /// Events above the ancestor, in replay order.
    pub events: Vec<Arc<EventBlock>>,
}

/// The common ancestor of `heads` and the sorted events a peer holding only
/// the ancestor would be missing.
///
/// # Errors
///
/// Same as [`find_common_ancestor`] and [`find_sorted_events`].
pub fn find_events_to_sync<F: BlockFetcher>(
    events: &EventFetcher<F>,
    heads: &[Link],
) -> Result<SyncSet> {
    let ancestor = find_common_ancestor(events, heads)?;
    let mut missing = Vec::new();
    for event in find_sorted_events(events, heads, &ancestor)? {
        if !contains(events, &ancestor, &event.link)? {
            missing.push(event);
        }
    }
    Ok(SyncSet {
        ancestor,
        events: missing,
    })
}
