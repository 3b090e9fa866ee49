//! Content-addressed block access.
//!
//! The clock and the CRDT engine never touch storage directly. They read
//! through a [`BlockFetcher`] and stage writes in a [`Transaction`]; the
//! finished write is handed to a [`Blockstore`] as a [`CommitResult`].
//!
//! # Sub-modules
//!
//! - [`memory`]: in-process [`MemoryBlockstore`] used by tests, the simulator
//!   and embedders that persist commits themselves.
//! - [`transaction`]: staging area whose reads fall through to its parent.

pub mod memory;
pub mod transaction;

pub use memory::MemoryBlockstore;
pub use transaction::Transaction;

use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::clock::Head;
use crate::error::{Error, Result};
use crate::event::canonical::{canonical_bytes, to_canonical_vec};
use crate::link::Link;

/// Read side of a block store.
///
/// Implementations must be safe to call from several traversals at once.
/// `Ok(None)` means the block is not (yet) available locally; transport or
/// I/O failures should be reported as [`Error::Storage`].
pub trait BlockFetcher: Send + Sync {
    /// Fetch the bytes stored under `link`.
    ///
    /// # Errors
    ///
    /// Returns an error when the store itself fails.
    fn get(&self, link: &Link) -> Result<Option<Vec<u8>>>;
}

/// A block store that can durably apply a finished write.
pub trait Blockstore: BlockFetcher {
    /// Persist `commit.new_blocks` and drop `commit.removed_blocks`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] when the commit cannot be applied.
    fn commit(&self, commit: &CommitResult) -> Result<()>;
}

impl<T: BlockFetcher + ?Sized> BlockFetcher for &T {
    fn get(&self, link: &Link) -> Result<Option<Vec<u8>>> {
        (**self).get(link)
    }
}

impl<T: BlockFetcher + ?Sized> BlockFetcher for Arc<T> {
    fn get(&self, link: &Link) -> Result<Option<Vec<u8>>> {
        (**self).get(link)
    }
}

impl<T: Blockstore + ?Sized> Blockstore for Arc<T> {
    fn commit(&self, commit: &CommitResult) -> Result<()> {
        (**self).commit(commit)
    }
}

/// An encoded block and its link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub link: Link,
    pub bytes: Vec<u8>,
}

impl Block {
    /// Wrap raw bytes, hashing them to obtain the link.
    #[must_use]
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            link: Link::digest(&bytes),
            bytes,
        }
    }

    /// Encode `value` as canonical JSON.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Encode`] if `value` has no JSON representation.
    pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        Ok(Self::from_bytes(to_canonical_vec(value)?))
    }

    /// Decode this block's bytes as `T`.
    ///
    /// # Errors
    ///
    /// Same as [`decode_block`].
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        decode_block(&self.link, &self.bytes)
    }
}

/// Decode bytes fetched under `link`.
///
/// The bytes must hash to `link`, be canonical JSON, and deserialize as `T`.
///
/// # Errors
///
/// Returns [`Error::CorruptBlock`] when any of those checks fail.
pub fn decode_block<T: DeserializeOwned>(link: &Link, bytes: &[u8]) -> Result<T> {
    let actual = Link::digest(bytes);
    if actual != *link {
        return Err(Error::corrupt(link, format_args!("content hashes to {actual}")));
    }
    let value: serde_json::Value =
        serde_json::from_slice(bytes).map_err(|e| Error::corrupt(link, e))?;
    if canonical_bytes(&value)? != bytes {
        return Err(Error::corrupt(link, "bytes are not in canonical form"));
    }
    serde_json::from_value(value).map_err(|e| Error::corrupt(link, e))
}

/// Fetch `link` or fail with [`Error::MissingBlock`].
///
/// # Errors
///
/// Returns [`Error::MissingBlock`] if the block is absent, or the store's
/// own error.
pub fn require<F: BlockFetcher + ?Sized>(blocks: &F, link: &Link) -> Result<Vec<u8>> {
    blocks
        .get(link)?
        .ok_or_else(|| Error::MissingBlock(link.clone()))
}

/// Fetch and decode `link` as `T`.
///
/// # Errors
///
/// Same as [`require`] and [`decode_block`].
pub fn load<T: DeserializeOwned, F: BlockFetcher + ?Sized>(blocks: &F, link: &Link) -> Result<T> {
    let bytes = require(blocks, link)?;
    decode_block(link, &bytes)
}

/// Outcome of a write handed to the storage layer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitResult {
    /// Head after the write.
    pub head: Head,
    /// Blocks created by the write, in staging order.
    pub new_blocks: Vec<Block>,
    /// Blocks that became unreachable (compaction only), sorted.
    pub removed_blocks: Vec<Link>,
}

impl CommitResult {
    /// A commit that changes nothing.
    #[must_use]
    pub const fn unchanged(head: Head) -> Self {
        Self {
            head,
            new_blocks: Vec::new(),
            removed_blocks: Vec::new(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.new_blocks.is_empty() && self.removed_blocks.is_empty()
    }
}
