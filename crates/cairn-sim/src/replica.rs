use std::sync::Arc;

use anyhow::{Context, Result};
use cairn_core::{Crdt, DocUpdate, Document, Head, MemoryBlockstore};
use serde::{Deserialize, Serialize};
use serde_json::{Map, json};
use tracing::trace;

use crate::network::SyncMessage;
use crate::rng::DeterministicRng;

/// Stable index of a simulated replica.
pub type ReplicaId = usize;

/// Observable state of one replica after a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaState {
    pub id: ReplicaId,
    pub head: Head,
    pub entries: Vec<Document>,
}

/// Summary of one random local write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteSummary {
    pub puts: Vec<String>,
    pub deletes: Vec<String>,
    pub head_len: usize,
}

/// One engine over its own in-memory block store.
#[derive(Debug)]
pub struct Replica {
    id: ReplicaId,
    store: Arc<MemoryBlockstore>,
    crdt: Crdt<MemoryBlockstore>,
}

impl Replica {
    #[must_use]
    pub fn new(id: ReplicaId) -> Self {
        let store = Arc::new(MemoryBlockstore::new());
        let crdt = Crdt::new(Arc::clone(&store));
        Self { id, store, crdt }
    }

    #[must_use]
    pub const fn id(&self) -> ReplicaId {
        self.id
    }

    #[must_use]
    pub const fn crdt(&self) -> &Crdt<MemoryBlockstore> {
        &self.crdt
    }

    #[must_use]
    pub fn head(&self) -> Head {
        self.crdt.head()
    }

    /// Write the document every replica starts from.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine rejects the write.
    pub fn write_genesis(&self) -> Result<()> {
        let mut doc = Map::new();
        doc.insert("genesis".into(), json!(true));
        self.crdt
            .bulk(vec![DocUpdate::put("_genesis", doc)])
            .with_context(|| format!("replica {} failed to write genesis", self.id))?;
        Ok(())
    }

    /// Apply a random batch of puts and deletes over `key_space` keys.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine rejects the write.
    pub fn write_random(
        &self,
        round: u64,
        key_space: usize,
        rng: &mut DeterministicRng,
    ) -> Result<WriteSummary> {
        let count = 1 + rng.index(3);
        let mut updates = Vec::with_capacity(count);
        let mut puts = Vec::new();
        let mut deletes = Vec::new();
        for _ in 0..count {
            let key = format!("k{}", rng.index(key_space.max(1)));
            if rng.percent(20) {
                deletes.push(key.clone());
                updates.push(DocUpdate::delete(key));
            } else {
                let mut doc = Map::new();
                doc.insert("replica".into(), json!(self.id));
                doc.insert("round".into(), json!(round));
                doc.insert("n".into(), json!(rng.below(1_000)));
                puts.push(key.clone());
                updates.push(DocUpdate::put(key, doc));
            }
        }

        let commit = self
            .crdt
            .bulk(updates)
            .with_context(|| format!("replica {} failed to write in round {round}", self.id))?;
        Ok(WriteSummary {
            puts,
            deletes,
            head_len: commit.head.len(),
        })
    }

    /// Everything a peer needs to catch up with this replica.
    #[must_use]
    pub fn sync_message(&self, to: ReplicaId) -> SyncMessage {
        SyncMessage {
            from: self.id,
            to,
            head: self.crdt.head(),
            blocks: self.store.blocks(),
        }
    }

    /// Store the message's blocks and merge its head; reports whether the
    /// local head moved.
    ///
    /// # Errors
    ///
    /// Returns an error if the merge fails.
    pub fn receive(&self, message: &SyncMessage) -> Result<bool> {
        self.store.put_all(message.blocks.iter().cloned());
        let before = self.crdt.head();
        let after = self.crdt.merge(&message.head).with_context(|| {
            format!(
                "replica {} failed to merge head from replica {}",
                self.id, message.from
            )
        })?;
        trace!(replica = self.id, from = message.from, heads = after.len(), "merged");
        Ok(after != before)
    }

    /// # Errors
    ///
    /// Returns an error if the current documents cannot be read.
    pub fn state(&self) -> Result<ReplicaState> {
        let entries = self
            .crdt
            .entries()
            .with_context(|| format!("replica {} failed to list entries", self.id))?;
        Ok(ReplicaState {
            id: self.id,
            head: self.crdt.head(),
            entries,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn receiving_a_peer_catches_up() {
        let a = Replica::new(0);
        let b = Replica::new(1);
        a.write_genesis().unwrap();
        assert!(b.receive(&a.sync_message(1)).unwrap());
        assert_eq!(a.head(), b.head());
        assert!(!b.receive(&a.sync_message(1)).unwrap());
    }

    #[test]
    fn concurrent_writes_converge_after_exchange() {
        let a = Replica::new(0);
        let b = Replica::new(1);
        a.write_genesis().unwrap();
        b.receive(&a.sync_message(1)).unwrap();

        let mut left = Map::new();
        left.insert("side".into(), json!("left"));
        let mut right = Map::new();
        right.insert("side".into(), json!("right"));
        a.crdt().bulk(vec![DocUpdate::put("k", left)]).unwrap();
        b.crdt().bulk(vec![DocUpdate::put("k", right)]).unwrap();
        let mut rng = DeterministicRng::new(9);
        b.write_random(2, 4, &mut rng).unwrap();

        let to_b = a.sync_message(1);
        let to_a = b.sync_message(0);
        b.receive(&to_b).unwrap();
        a.receive(&to_a).unwrap();

        assert_eq!(a.head().len(), 2);
        assert_eq!(a.state().unwrap().head, b.state().unwrap().head);
        assert_eq!(a.state().unwrap().entries, b.state().unwrap().entries);
    }
}
