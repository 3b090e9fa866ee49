//! Document CRDT engine on top of the Merkle clock.
//!
//! [`Crdt`] owns the head of one database replica. Writers ([`Crdt::bulk`],
//! [`Crdt::merge`], [`Crdt::compact`]) are serialized through a FIFO
//! [`WriterQueue`]; readers take a snapshot of the head and never wait on
//! the queue. Compaction deletes blocks, so each read holds a shared
//! reclaim lock that compaction takes exclusively for its commit.
//!
//! # Write path
//!
//! 1. Encode each document body as a [`DocValue`] block.
//! 2. Build one operation: a bare `Put`/`Delete` for a single update, a
//!    `Batch` for several.
//! 3. Fold it into the state at the current head ([`kv::write`]), staging the
//!    shard, payload and event blocks in a [`Transaction`].
//! 4. [`advance`] the head by the new event, commit the staged blocks, then
//!    swap the head.
//!
//! A failure at any step leaves the head and the store untouched.
//!
//! # Sub-modules
//!
//! - [`queue`]: single-writer FIFO queue and [`Phase`] state.
//! - [`changes`]: change feed. ([`changes_since`])
//! - [`compact`]: snapshot compaction planning.

pub mod changes;
pub mod compact;
pub mod queue;

pub use changes::{Change, Changes, ChangesOptions, changes_since};
pub use queue::{Phase, QueueGuard, WriterQueue};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::block::{Block, Blockstore, CommitResult, Transaction, load};
use crate::clock::{self, EventFetcher, Head, advance};
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::event::data::DocBody;
use crate::event::{DocValue, Operation};
use crate::kv::{self, Entry};
use crate::link::Link;

/// One caller-supplied document update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocUpdate {
    pub key: String,
    /// Required unless `del` is set.
    #[serde(default)]
    pub value: Option<DocBody>,
    #[serde(default)]
    pub del: bool,
}

impl DocUpdate {
    #[must_use]
    pub fn put(key: impl Into<String>, value: DocBody) -> Self {
        Self {
            key: key.into(),
            value: Some(value),
            del: false,
        }
    }

    #[must_use]
    pub fn delete(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: None,
            del: true,
        }
    }
}

/// A live document read from the database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub key: String,
    pub value: DocBody,
    /// Link of the value block.
    pub link: Link,
}

/// A replica of a document database backed by block store `S`.
#[derive(Debug)]
pub struct Crdt<S> {
    store: Arc<S>,
    config: EngineConfig,
    head: RwLock<Head>,
    /// Held shared by readers; held exclusively while compaction removes
    /// blocks and swaps the head.
    reclaim: RwLock<()>,
    queue: WriterQueue,
    writes_since_compaction: AtomicUsize,
}

impl<S: Blockstore> Crdt<S> {
    /// An empty database with default settings.
    pub fn new(store: Arc<S>) -> Self {
        Self::with_config(store, EngineConfig::default())
    }

    pub fn with_config(store: Arc<S>, config: EngineConfig) -> Self {
        Self::open(store, Head::new(), config)
    }

    /// Resume a database at a previously committed head.
    pub fn open(store: Arc<S>, head: Head, config: EngineConfig) -> Self {
        let queue = WriterQueue::new(config.lock_timeout());
        Self {
            store,
            head: RwLock::new(Head::canonical(head.into_vec())),
            reclaim: RwLock::new(()),
            queue,
            config,
            writes_since_compaction: AtomicUsize::new(0),
        }
    }

    /// Current canonical head.
    #[must_use]
    pub fn head(&self) -> Head {
        self.head
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub const fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn phase(&self) -> Phase {
        self.queue.phase()
    }

    fn events(&self) -> EventFetcher<&S> {
        EventFetcher::with_capacity(&*self.store, self.config.event_cache_capacity)
    }

    /// Head to read from, with the blocks under it pinned until the guard
    /// drops.
    fn pin(&self) -> (RwLockReadGuard<'_, ()>, Head) {
        let guard = self.reclaim.read().unwrap_or_else(PoisonError::into_inner);
        (guard, self.head())
    }

    fn swap_head(&self, prev: &Head, next: &Head) -> Head {
        let mut head = self.head.write().unwrap_or_else(PoisonError::into_inner);
        *head = head.apply(next.as_slice(), prev.as_slice());
        head.clone()
    }

    /// Apply `updates` as one event.
    ///
    /// An empty list returns the current head and writes nothing.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidUpdate`] for a non-delete update without a value.
    /// - [`Error::LockTimeout`] when the writer queue does not admit us.
    /// - Fetch or store errors from building or committing the event.
    #[instrument(skip(self, updates), fields(updates = updates.len()))]
    pub fn bulk(&self, updates: Vec<DocUpdate>) -> Result<CommitResult> {
        if let Some(bad) = updates.iter().find(|u| !u.del && u.value.is_none()) {
            return Err(Error::InvalidUpdate {
                key: bad.key.clone(),
                reason: "missing value",
            });
        }

        let commit = {
            let _turn = self.queue.write()?;
            let before = self.head();
            if updates.is_empty() {
                return Ok(CommitResult::unchanged(before));
            }

            let mut tx = Transaction::new(&*self.store);
            let mut ops = Vec::with_capacity(updates.len());
            for update in updates {
                match update.value {
                    Some(body) if !update.del => {
                        let block = Block::encode(&DocValue::Doc(body))?;
                        ops.push(Operation::Put {
                            key: update.key,
                            value: block.link.clone(),
                        });
                        tx.put(block);
                    }
                    _ => ops.push(Operation::Delete { key: update.key }),
                }
            }
            let op = match ops.pop() {
                Some(only) if ops.is_empty() => only,
                Some(last) => {
                    ops.push(last);
                    Operation::Batch { ops }
                }
                None => return Ok(CommitResult::unchanged(before)),
            };

            let state = kv::root(&self.events(), &before)?;
            let event = kv::write(&mut tx, &before, state, op)?;
            let next = {
                let staged = EventFetcher::with_capacity(&tx, self.config.event_cache_capacity);
                advance(&staged, &before, &event.link)?
            };

            let commit = CommitResult {
                head: Head::canonical(next.into_vec()),
                new_blocks: tx.into_blocks(),
                removed_blocks: Vec::new(),
            };
            self.store.commit(&commit)?;
            let head = self.swap_head(&before, &commit.head);
            debug!(event = %event.link, blocks = commit.new_blocks.len(), head = head.len(), "committed write");
            commit
        };

        self.maybe_auto_compact();
        Ok(commit)
    }

    fn maybe_auto_compact(&self) {
        let written = self.writes_since_compaction.fetch_add(1, Ordering::SeqCst) + 1;
        let Some(threshold) = self.config.auto_compact_after else {
            return;
        };
        if written < threshold {
            return;
        }
        if let Err(err) = self.compact() {
            warn!(error = %err, written, "automatic compaction failed");
        }
    }

    /// Fold a remote replica's head into ours.
    ///
    /// The remote events and everything they reference must already be in
    /// the store.
    ///
    /// # Errors
    ///
    /// - [`Error::CompactionConflict`] when the wait timed out behind a
    ///   compaction, [`Error::LockTimeout`] for any other timeout.
    /// - Fetch errors from the ancestry walks.
    #[instrument(skip(self, remote), fields(remote = remote.len()))]
    pub fn merge(&self, remote: &Head) -> Result<Head> {
        let _turn = self.queue.merge()?;
        let before = self.head();
        let events = self.events();
        let mut next = before.clone();
        for link in remote {
            next = advance(&events, &next, link)?;
        }
        let next = Head::canonical(next.into_vec());
        if next == before {
            return Ok(before);
        }

        self.store.commit(&CommitResult::unchanged(next.clone()))?;
        let head = self.swap_head(&before, &next);
        debug!(head = head.len(), "merged remote head");
        Ok(head)
    }

    /// Read the document stored under `key`.
    ///
    /// Returns `Ok(None)` when the key was deleted.
    ///
    /// # Errors
    ///
    /// - [`Error::EmptyDatabase`] when nothing was written yet.
    /// - [`Error::NotFound`] when the key was never written.
    /// - Fetch errors for unreadable blocks.
    pub fn get(&self, key: &str) -> Result<Option<Document>> {
        let (_pinned, head) = self.pin();
        if head.is_empty() {
            return Err(Error::EmptyDatabase);
        }
        let state = kv::root(&self.events(), &head)?;
        match state.get(key) {
            None => Err(Error::NotFound(key.to_string())),
            Some(Entry::Tombstone) => Ok(None),
            Some(Entry::Value(link)) => self.document(key, link),
        }
    }

    fn document(&self, key: &str, link: &Link) -> Result<Option<Document>> {
        let value: DocValue = load(&*self.store, link)?;
        Ok(value.into_doc().map(|value| Document {
            key: key.to_string(),
            value,
            link: link.clone(),
        }))
    }

    /// Every live document, sorted by key.
    ///
    /// # Errors
    ///
    /// Fetch errors for unreadable blocks.
    pub fn entries(&self) -> Result<Vec<Document>> {
        let (_pinned, head) = self.pin();
        let state = kv::root(&self.events(), &head)?;
        let mut docs = Vec::with_capacity(state.len());
        for (key, link) in state.live() {
            if let Some(doc) = self.document(key, link)? {
                docs.push(doc);
            }
        }
        Ok(docs)
    }

    /// Updates made since `since`, oldest first. See [`changes_since`].
    ///
    /// # Errors
    ///
    /// Fetch errors unless `options.dirty` is set.
    pub fn changes(&self, since: &[Link], options: ChangesOptions) -> Result<Changes> {
        let (_pinned, head) = self.pin();
        changes_since(&self.events(), &head, since, options)
    }

    /// Rebase the head onto a single snapshot event.
    ///
    /// Returns `Ok(None)` when another compaction is already in flight or
    /// the database is empty.
    ///
    /// # Errors
    ///
    /// [`Error::LockTimeout`], or any missing or corrupt reachable block.
    #[instrument(skip(self))]
    pub fn compact(&self) -> Result<Option<CommitResult>> {
        let Some(_turn) = self.queue.compact()? else {
            return Ok(None);
        };
        let before = self.head();
        if before.is_empty() {
            return Ok(None);
        }

        let commit = compact::plan(&self.events(), &before)?;
        {
            let _reclaim = self.reclaim.write().unwrap_or_else(PoisonError::into_inner);
            self.store.commit(&commit)?;
            self.swap_head(&before, &commit.head);
        }
        self.writes_since_compaction.store(0, Ordering::SeqCst);
        info!(
            head = %commit.head.as_slice().iter().map(Link::short).collect::<Vec<_>>().join(","),
            removed = commit.removed_blocks.len(),
            "compacted database"
        );
        Ok(Some(commit))
    }

    /// Graphviz DOT rendering of the clock at the current head.
    ///
    /// # Errors
    ///
    /// Fetch errors for unreadable events.
    pub fn vis(&self) -> Result<String> {
        let (_pinned, head) = self.pin();
        clock::vis(&self.events(), &head)
    }
}
