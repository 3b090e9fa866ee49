use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::block::{BlockFetcher, require};
use crate::error::Result;
use crate::event::{self, EventBlock};
use crate::link::Link;

/// Default number of decoded events memoized per fetcher.
pub const DEFAULT_EVENT_CACHE_CAPACITY: usize = 4096;

/// Decoding event reader with a bounded, append-only cache.
///
/// One fetcher is meant to live for one traversal (or one engine
/// operation). Once the cache is full, further events are decoded on every
/// read but never evicted from or added to the cache.
#[derive(Debug)]
pub struct EventFetcher<F> {
    blocks: F,
    cache: RwLock<HashMap<Link, Arc<EventBlock>>>,
    capacity: usize,
}

impl<F: BlockFetcher> EventFetcher<F> {
    pub fn new(blocks: F) -> Self {
        Self::with_capacity(blocks, DEFAULT_EVENT_CACHE_CAPACITY)
    }

    pub fn with_capacity(blocks: F, capacity: usize) -> Self {
        Self {
            blocks,
            cache: RwLock::new(HashMap::new()),
            capacity,
        }
    }

    /// The underlying block reader.
    pub const fn blocks(&self) -> &F {
        &self.blocks
    }

    /// Fetch and decode the event at `link`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::MissingBlock`] when the block is absent and
    /// [`crate::Error::CorruptBlock`] when it is not a valid event.
    pub fn get(&self, link: &Link) -> Result<Arc<EventBlock>> {
        if let Some(hit) = self
            .cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(link)
        {
            return Ok(Arc::clone(hit));
        }

        let bytes = require(&self.blocks, link)?;
        let decoded = Arc::new(event::decode_at(link, &bytes)?);

        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        if cache.len() < self.capacity {
            cache
                .entry(link.clone())
                .or_insert_with(|| Arc::clone(&decoded));
        }
        Ok(decoded)
    }

    /// Number of cached events.
    pub fn cached(&self) -> usize {
        self.cache.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}
