//! Compaction: rebase the head onto a single synthetic snapshot event.
//!
//! The merged key/value state at the head, minus tombstones, becomes the
//! shard of a parentless [`Operation::Snapshot`] event. Every event, payload
//! and shard reachable from the old head that the snapshot does not reuse is
//! reported in [`CommitResult::removed_blocks`]; document values that are
//! still live are kept.
//!
//! Compaction is deterministic: two replicas compacting the same head
//! produce the same snapshot link, and compacting a compacted head changes
//! nothing.

use std::collections::{BTreeSet, HashSet, VecDeque};

use tracing::{debug, instrument};

use super::changes::{ChangesOptions, changes_since};
use crate::block::{Block, BlockFetcher, CommitResult, Transaction, load, require};
use crate::clock::{EventFetcher, Head};
use crate::error::Result;
use crate::event::{DocValue, EventBlock, EventPayload, Operation};
use crate::kv;
use crate::link::Link;

/// Compute the compacted commit for `head` without applying it.
///
/// `head` must not be empty.
///
/// # Errors
///
/// Any missing or corrupt block reachable from `head` is fatal, as is a
/// failure of the post-compaction change-feed check.
#[instrument(skip(events, head), fields(head = head.len()))]
pub fn plan<F: BlockFetcher>(events: &EventFetcher<F>, head: &Head) -> Result<CommitResult> {
    for link in head {
        require(events.blocks(), link)?;
    }
    let before = reachable(events, head)?;

    let state = kv::root(events, head)?.without_tombstones();
    let shard = Block::encode(&state)?;
    let payload = Block::encode(&EventPayload {
        op: Operation::Snapshot,
        root: shard.link.clone(),
    })?;
    let snapshot = EventBlock::create(payload.link.clone(), Vec::new())?;

    let mut after: HashSet<Link> = state.live().map(|(_, link)| link.clone()).collect();
    after.insert(shard.link.clone());
    after.insert(payload.link.clone());
    after.insert(snapshot.link.clone());

    let removed: BTreeSet<Link> = before.difference(&after).cloned().collect();
    let new_head = Head::from_links(vec![snapshot.link.clone()]);
    let new_blocks = vec![shard, payload, snapshot.to_block()];

    verify(events.blocks(), &new_head, &new_blocks)?;
    debug!(
        reachable = before.len(),
        kept = after.len(),
        removed = removed.len(),
        "planned compaction"
    );

    Ok(CommitResult {
        head: new_head,
        new_blocks,
        removed_blocks: removed.into_iter().collect(),
    })
}

/// Every block reachable from `head`: events, payloads, shards and the
/// document values any of them reference. Each block is fetched and decoded.
fn reachable<F: BlockFetcher>(events: &EventFetcher<F>, head: &Head) -> Result<HashSet<Link>> {
    let blocks = events.blocks();
    let mut seen: HashSet<Link> = HashSet::new();
    let mut queue: VecDeque<Link> = head.iter().cloned().collect();

    while let Some(link) = queue.pop_front() {
        if !seen.insert(link.clone()) {
            continue;
        }
        let event = events.get(&link)?;
        queue.extend(event.parents().iter().cloned());

        let data = &event.event.data;
        let payload = kv::load_payload(blocks, data)?;
        seen.insert(data.clone());

        let mut values: Vec<&Link> = Vec::new();
        for write in payload.op.writes() {
            if let Operation::Put { value, .. } = write {
                values.push(value);
            }
        }
        if seen.insert(payload.root.clone()) {
            let shard = kv::load_shard(blocks, &payload.root)?;
            for (_, value) in shard.live() {
                if seen.insert(value.clone()) {
                    load::<DocValue, _>(blocks, value)?;
                }
            }
        }
        for value in values {
            if seen.insert(value.clone()) {
                load::<DocValue, _>(blocks, value)?;
            }
        }
    }
    Ok(seen)
}

/// Read the full change feed of the compacted head before it is committed.
fn verify<F: BlockFetcher>(blocks: &F, head: &Head, new_blocks: &[Block]) -> Result<()> {
    let mut tx = Transaction::new(blocks);
    for block in new_blocks {
        tx.put(block.clone());
    }
    let changes = changes_since(&EventFetcher::new(&tx), head, &[], ChangesOptions::default())?;
    debug!(keys = changes.updates.len(), "compacted head reads back");
    Ok(())
}
