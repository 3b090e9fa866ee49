use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use tracing::trace;

use super::{Block, BlockFetcher, Blockstore, CommitResult};
use crate::error::Result;
use crate::link::Link;

/// In-memory block store.
///
/// Commits are applied atomically with respect to readers: new blocks are
/// inserted and removed blocks dropped under one write lock.
#[derive(Debug, Default)]
pub struct MemoryBlockstore {
    blocks: RwLock<HashMap<Link, Vec<u8>>>,
}

impl MemoryBlockstore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a block. Re-putting an existing link is a no-op.
    pub fn put(&self, block: Block) {
        self.write_map().entry(block.link).or_insert(block.bytes);
    }

    /// Store several blocks at once.
    pub fn put_all(&self, blocks: impl IntoIterator<Item = Block>) {
        let mut map = self.write_map();
        for block in blocks {
            map.entry(block.link).or_insert(block.bytes);
        }
    }

    /// Remove a block, returning whether it was present.
    pub fn remove(&self, link: &Link) -> bool {
        self.write_map().remove(link).is_some()
    }

    #[must_use]
    pub fn contains(&self, link: &Link) -> bool {
        self.read_map().contains_key(link)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.read_map().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read_map().is_empty()
    }

    /// All stored links, sorted.
    #[must_use]
    pub fn links(&self) -> Vec<Link> {
        let mut links: Vec<Link> = self.read_map().keys().cloned().collect();
        links.sort();
        links
    }

    /// A copy of every stored block, sorted by link.
    #[must_use]
    pub fn blocks(&self) -> Vec<Block> {
        let mut blocks: Vec<Block> = self
            .read_map()
            .iter()
            .map(|(link, bytes)| Block {
                link: link.clone(),
                bytes: bytes.clone(),
            })
            .collect();
        blocks.sort_by(|a, b| a.link.cmp(&b.link));
        blocks
    }

    fn read_map(&self) -> std::sync::RwLockReadGuard<'_, HashMap<Link, Vec<u8>>> {
        self.blocks.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_map(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<Link, Vec<u8>>> {
        self.blocks.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl BlockFetcher for MemoryBlockstore {
    fn get(&self, link: &Link) -> Result<Option<Vec<u8>>> {
        Ok(self.read_map().get(link).cloned())
    }
}

impl Blockstore for MemoryBlockstore {
    fn commit(&self, commit: &CommitResult) -> Result<()> {
        let mut map = self.write_map();
        for block in &commit.new_blocks {
            map.entry(block.link.clone())
                .or_insert_with(|| block.bytes.clone());
        }
        for link in &commit.removed_blocks {
            map.remove(link);
        }
        trace!(
            added = commit.new_blocks.len(),
            removed = commit.removed_blocks.len(),
            total = map.len(),
            "applied commit"
        );
        Ok(())
    }
}
