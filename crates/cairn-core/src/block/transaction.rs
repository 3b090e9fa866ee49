use std::collections::HashMap;

use super::{Block, BlockFetcher};
use crate::error::Result;
use crate::link::Link;

/// Staging area for the blocks of one write.
///
/// Reads see staged blocks first and fall through to the parent fetcher.
/// Nothing reaches the parent until the staged blocks are handed to
/// [`super::Blockstore::commit`]; dropping a transaction discards them.
#[derive(Debug)]
pub struct Transaction<'a, F: BlockFetcher + ?Sized> {
    parent: &'a F,
    staged: HashMap<Link, Vec<u8>>,
    order: Vec<Link>,
}

impl<'a, F: BlockFetcher + ?Sized> Transaction<'a, F> {
    pub fn new(parent: &'a F) -> Self {
        Self {
            parent,
            staged: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Stage a block. Staging the same link twice keeps the first copy.
    pub fn put(&mut self, block: Block) {
        if !self.staged.contains_key(&block.link) {
            self.order.push(block.link.clone());
            self.staged.insert(block.link, block.bytes);
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Staged blocks in the order they were first put.
    #[must_use]
    pub fn into_blocks(mut self) -> Vec<Block> {
        self.order
            .into_iter()
            .filter_map(|link| {
                self.staged
                    .remove(&link)
                    .map(|bytes| Block { link, bytes })
            })
            .collect()
    }
}

impl<F: BlockFetcher + ?Sized> BlockFetcher for Transaction<'_, F> {
    fn get(&self, link: &Link) -> Result<Option<Vec<u8>>> {
        if let Some(bytes) = self.staged.get(link) {
            return Ok(Some(bytes.clone()));
        }
        self.parent.get(link)
    }
}
