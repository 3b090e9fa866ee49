//! Change feed: the latest update of every key written since a given head.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, trace, warn};

use crate::block::{BlockFetcher, load};
use crate::clock::{EventFetcher, Head};
use crate::error::{Error, Result};
use crate::event::data::DocBody;
use crate::event::{DocValue, EventBlock, Operation};
use crate::kv::{self, Entry, Shard};
use crate::link::Link;

/// Options for [`changes_since`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangesOptions {
    /// Skip unreadable events and values with a warning instead of failing.
    pub dirty: bool,
    /// Maximum number of records to return.
    pub limit: Option<usize>,
}

/// One key's most recent update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    pub key: String,
    /// The document body; `None` when the update deleted the key.
    pub value: Option<DocBody>,
    pub deleted: bool,
    /// Event that carried the update.
    pub clock: Link,
}

/// Result of a change-feed query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Changes {
    /// Oldest first.
    pub updates: Vec<Change>,
    /// The head the feed was computed at; pass it as `since` next time.
    pub head: Head,
}

/// Collect updates reachable from `head` but not from the links in `since`.
///
/// Everything `since` descends from is already known to the caller, so the
/// walk never enters it. Events are visited newest first: an event only
/// after every walked event that descends from it, first parent first, and
/// within an event the writes last to first. Each key reports the value it
/// holds at `head`, attributed to the newest visited write of that value.
/// Records come back oldest first, and `limit` keeps the newest records.
///
/// # Errors
///
/// Fetch errors for unreadable events, payloads or values, unless
/// `options.dirty` is set.
#[instrument(skip(events, head, since), fields(head = head.len(), since = since.len()))]
pub fn changes_since<F: BlockFetcher>(
    events: &EventFetcher<F>,
    head: &Head,
    since: &[Link],
    options: ChangesOptions,
) -> Result<Changes> {
    let state = match kv::root(events, head) {
        Ok(state) => Some(state),
        Err(Error::NoCommonAncestor { .. }) => None,
        Err(err) if options.dirty && err.is_block_unavailable() => {
            warn!(error = %err, "change feed without state at head");
            None
        }
        Err(err) => return Err(err),
    };
    let known = history(events, since)?;
    let order = newest_first(events, head, &known, options.dirty)?;

    let mut gather = Gather {
        events,
        dirty: options.dirty,
        state: state.as_ref(),
        rank: 0,
        settled: HashMap::new(),
        pending: HashMap::new(),
    };
    for event in &order {
        gather.event(&event.link, &event.event.data)?;
    }
    let picks = gather.finish();

    let limit = options.limit.unwrap_or(usize::MAX);
    let blocks = events.blocks();
    let mut updates = Vec::new();
    for pick in picks {
        if updates.len() >= limit {
            break;
        }
        let value = match &pick.entry {
            Entry::Tombstone => None,
            Entry::Value(link) => match load::<DocValue, _>(blocks, link) {
                Ok(doc) => doc.into_doc(),
                Err(err) => {
                    skip_or_fail(options.dirty, err, link)?;
                    continue;
                }
            },
        };
        updates.push(Change {
            key: pick.key,
            deleted: value.is_none(),
            value,
            clock: pick.clock,
        });
    }

    updates.reverse();
    trace!(events = order.len(), updates = updates.len(), "collected changes");
    Ok(Changes {
        updates,
        head: head.clone(),
    })
}

fn skip_or_fail(dirty: bool, err: Error, link: &Link) -> Result<()> {
    if dirty && err.is_block_unavailable() {
        warn!(%link, error = %err, "skipping unreadable block in change feed");
        Ok(())
    } else {
        Err(err)
    }
}

/// `since` plus every event it descends from.
///
/// A link whose event is not in the store still cuts itself off; the walk
/// just cannot see past it.
fn history<F: BlockFetcher>(events: &EventFetcher<F>, since: &[Link]) -> Result<HashSet<Link>> {
    let mut seen: HashSet<Link> = HashSet::new();
    let mut queue: VecDeque<Link> = since.iter().cloned().collect();
    while let Some(link) = queue.pop_front() {
        if !seen.insert(link.clone()) {
            continue;
        }
        match events.get(&link) {
            Ok(event) => queue.extend(event.parents().iter().cloned()),
            Err(err) if err.is_block_unavailable() => {
                debug!(%link, error = %err, "cannot see past known event");
            }
            Err(err) => return Err(err),
        }
    }
    Ok(seen)
}

/// Events reachable from `head` outside `known`, each after all of its
/// walked descendants.
fn newest_first<F: BlockFetcher>(
    events: &EventFetcher<F>,
    head: &Head,
    known: &HashSet<Link>,
    dirty: bool,
) -> Result<Vec<Arc<EventBlock>>> {
    let mut nodes: HashMap<Link, Arc<EventBlock>> = HashMap::new();
    let mut children: HashMap<Link, usize> = HashMap::new();
    let mut unreadable: HashSet<Link> = HashSet::new();
    let mut queue: VecDeque<Link> = head.iter().filter(|l| !known.contains(*l)).cloned().collect();

    while let Some(link) = queue.pop_front() {
        if nodes.contains_key(&link) || unreadable.contains(&link) {
            continue;
        }
        let event = match events.get(&link) {
            Ok(event) => event,
            Err(err) => {
                skip_or_fail(dirty, err, &link)?;
                unreadable.insert(link);
                continue;
            }
        };
        for parent in event.parents() {
            if known.contains(parent) {
                continue;
            }
            *children.entry(parent.clone()).or_default() += 1;
            queue.push_back(parent.clone());
        }
        nodes.insert(link, event);
    }

    // Stack, so the first head and first parent are visited first.
    let mut queued: HashSet<&Link> = HashSet::new();
    let mut ready: Vec<Link> = head
        .iter()
        .filter(|l| nodes.contains_key(*l) && !children.contains_key(*l) && queued.insert(*l))
        .rev()
        .cloned()
        .collect();
    let mut order = Vec::with_capacity(nodes.len());
    while let Some(link) = ready.pop() {
        let Some(event) = nodes.get(&link) else {
            continue;
        };
        for parent in event.parents().iter().rev() {
            let Some(pending) = children.get_mut(parent) else {
                continue;
            };
            *pending -= 1;
            if *pending == 0 && nodes.contains_key(parent) {
                ready.push(parent.clone());
            }
        }
        order.push(Arc::clone(event));
    }
    Ok(order)
}

/// A key's update as it will be reported.
struct Pick {
    rank: usize,
    key: String,
    entry: Entry,
    clock: Link,
}

struct Gather<'a, F> {
    events: &'a EventFetcher<F>,
    dirty: bool,
    /// State at the head, when it could be built.
    state: Option<&'a Shard>,
    rank: usize,
    settled: HashMap<String, Pick>,
    /// Newest write of keys whose head value has not been seen yet.
    pending: HashMap<String, Pick>,
}

impl<F: BlockFetcher> Gather<'_, F> {
    fn event(&mut self, clock: &Link, data: &Link) -> Result<()> {
        let events = self.events;
        let blocks = events.blocks();
        let payload = match kv::load_payload(blocks, data) {
            Ok(payload) => payload,
            Err(err) => return skip_or_fail(self.dirty, err, data),
        };

        if payload.op == Operation::Snapshot {
            let shard = match kv::load_shard(blocks, &payload.root) {
                Ok(shard) => shard,
                Err(err) => return skip_or_fail(self.dirty, err, &payload.root),
            };
            for (key, entry) in shard.iter().collect::<Vec<_>>().into_iter().rev() {
                self.write(clock, key, entry.clone());
            }
            return Ok(());
        }

        for write in payload.op.writes().iter().rev() {
            match write {
                Operation::Put { key, value } => {
                    self.write(clock, key, Entry::Value(value.clone()));
                }
                Operation::Delete { key } => self.write(clock, key, Entry::Tombstone),
                Operation::Batch { .. } | Operation::Snapshot => {}
            }
        }
        Ok(())
    }

    /// Settle `key` at the newest write that left the value it holds at
    /// the head.
    fn write(&mut self, clock: &Link, key: &str, entry: Entry) {
        self.rank += 1;
        if self.settled.contains_key(key) {
            return;
        }
        let pick = Pick {
            rank: self.rank,
            key: key.to_string(),
            entry,
            clock: clock.clone(),
        };
        match self.state.and_then(|state| state.get(key)) {
            Some(current) if *current != pick.entry => {
                self.pending.entry(pick.key.clone()).or_insert(pick);
            }
            _ => {
                self.pending.remove(key);
                self.settled.insert(pick.key.clone(), pick);
            }
        }
    }

    /// Picks newest first.
    ///
    /// A key whose head value was written outside the walk reports that
    /// value at its newest walked write.
    fn finish(self) -> Vec<Pick> {
        let state = self.state;
        let mut picks: Vec<Pick> = self.settled.into_values().collect();
        for (key, mut pick) in self.pending {
            if let Some(current) = state.and_then(|state| state.get(&key)) {
                pick.entry = current.clone();
            }
            picks.push(pick);
        }
        picks.sort_by_key(|pick| pick.rank);
        picks
    }
}
