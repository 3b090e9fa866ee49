//! Key/value CRDT state carried by the clock.
//!
//! Every event's payload links a [`Shard`] holding the full key/value state
//! after that event. The state at a multi-event head is rebuilt by taking the
//! shard at the heads' common ancestor and replaying the events above it in
//! the order given by [`crate::clock::find_sorted_events`], so every replica
//! with the same head computes the same shard.

pub mod shard;

pub use shard::{Entry, Shard};

use tracing::{debug, instrument};

use crate::block::{Block, BlockFetcher, Transaction, load};
use crate::clock::{EventFetcher, Head, find_events_to_sync};
use crate::error::{Error, Result};
use crate::event::{EventBlock, EventPayload, Operation};
use crate::link::Link;

/// Load the payload an event's `data` link points at.
///
/// # Errors
///
/// [`Error::MissingBlock`] or [`Error::CorruptBlock`], including for
/// batches that nest other batches or snapshots.
pub fn load_payload<F: BlockFetcher + ?Sized>(blocks: &F, link: &Link) -> Result<EventPayload> {
    let payload: EventPayload = load(blocks, link)?;
    payload
        .op
        .validate()
        .map_err(|reason| Error::corrupt(link, reason))?;
    Ok(payload)
}

/// Load a shard block.
///
/// # Errors
///
/// [`Error::MissingBlock`] or [`Error::CorruptBlock`].
pub fn load_shard<F: BlockFetcher + ?Sized>(blocks: &F, link: &Link) -> Result<Shard> {
    load(blocks, link)
}

/// The key/value state at `head`.
///
/// # Errors
///
/// Fetch errors for any block on the way, and
/// [`Error::NoCommonAncestor`] for heads with disjoint histories.
#[instrument(skip(events, head), fields(head = head.len()))]
pub fn root<F: BlockFetcher>(events: &EventFetcher<F>, head: &Head) -> Result<Shard> {
    match head.as_slice() {
        [] => Ok(Shard::new()),
        [only] => {
            let event = events.get(only)?;
            let payload = load_payload(events.blocks(), &event.event.data)?;
            load_shard(events.blocks(), &payload.root)
        }
        heads => {
            let sync = find_events_to_sync(events, heads)?;
            let base = events.get(&sync.ancestor)?;
            let payload = load_payload(events.blocks(), &base.event.data)?;
            let mut shard = load_shard(events.blocks(), &payload.root)?;
            for event in &sync.events {
                let payload = load_payload(events.blocks(), &event.event.data)?;
                match payload.op {
                    Operation::Snapshot => {
                        shard.merge_from(&load_shard(events.blocks(), &payload.root)?);
                    }
                    op => shard.apply(&op),
                }
            }
            debug!(
                replayed = sync.events.len(),
                keys = shard.len(),
                "rebuilt state at merged head"
            );
            Ok(shard)
        }
    }
}

/// Apply `op` on top of `state` and stage the resulting shard, payload and
/// event blocks in `tx`. The event's parents are `head`, in order.
///
/// # Errors
///
/// [`Error::Encode`] if a block cannot be serialized.
pub fn write<F: BlockFetcher + ?Sized>(
    tx: &mut Transaction<'_, F>,
    head: &Head,
    mut state: Shard,
    op: Operation,
) -> Result<EventBlock> {
    state.apply(&op);
    let shard = Block::encode(&state)?;
    let payload = Block::encode(&EventPayload {
        op,
        root: shard.link.clone(),
    })?;
    let event = EventBlock::create(payload.link.clone(), head.as_slice().to_vec())?;

    tx.put(shard);
    tx.put(payload);
    tx.put(event.to_block());
    Ok(event)
}
