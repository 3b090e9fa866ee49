use std::fmt;

use serde::{Deserialize, Serialize};

use crate::event::Operation;
use crate::link::Link;

/// State of one key in a shard.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Entry {
    /// Link to a [`crate::event::DocValue`] block.
    Value(Link),
    /// The key was deleted.
    Tombstone,
}

impl Entry {
    #[must_use]
    pub const fn link(&self) -> Option<&Link> {
        match self {
            Self::Value(link) => Some(link),
            Self::Tombstone => None,
        }
    }
}

/// Key/value state at one event: `(key, entry)` pairs sorted by key.
///
/// Encoded as `{"entries":[["key",{"value":"blake3:.."}],["gone","tombstone"]]}`.
/// Decoding rejects unsorted or duplicate keys, so a given state has exactly
/// one block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawShard", into = "RawShard")]
pub struct Shard {
    entries: Vec<(String, Entry)>,
}

impl Shard {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Entry> {
        self.position(key)
            .ok()
            .map(|index| &self.entries[index].1)
    }

    /// Set `key` to `entry`, replacing any previous entry.
    pub fn set(&mut self, key: &str, entry: Entry) {
        match self.position(key) {
            Ok(index) => self.entries[index].1 = entry,
            Err(index) => self.entries.insert(index, (key.to_string(), entry)),
        }
    }

    pub fn put(&mut self, key: &str, value: Link) {
        self.set(key, Entry::Value(value));
    }

    pub fn delete(&mut self, key: &str) {
        self.set(key, Entry::Tombstone);
    }

    /// Apply the writes of `op` in order.
    ///
    /// A [`Operation::Snapshot`] carries no writes of its own; its state is
    /// folded in with [`Shard::merge_from`].
    pub fn apply(&mut self, op: &Operation) {
        for write in op.writes() {
            match write {
                Operation::Put { key, value } => self.put(key, value.clone()),
                Operation::Delete { key } => self.delete(key),
                Operation::Batch { .. } | Operation::Snapshot => {}
            }
        }
    }

    /// Overlay every entry of `other` onto this shard.
    pub fn merge_from(&mut self, other: &Self) {
        for (key, entry) in &other.entries {
            self.set(key, entry.clone());
        }
    }

    /// The same state with deleted keys dropped entirely.
    #[must_use]
    pub fn without_tombstones(&self) -> Self {
        Self {
            entries: self
                .entries
                .iter()
                .filter(|(_, entry)| matches!(entry, Entry::Value(_)))
                .cloned()
                .collect(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Entry)> {
        self.entries.iter().map(|(key, entry)| (key.as_str(), entry))
    }

    /// Keys that currently hold a value, with that value's link.
    pub fn live(&self) -> impl Iterator<Item = (&str, &Link)> {
        self.iter()
            .filter_map(|(key, entry)| entry.link().map(|link| (key, link)))
    }

    fn position(&self, key: &str) -> Result<usize, usize> {
        self.entries
            .binary_search_by(|(probe, _)| probe.as_str().cmp(key))
    }
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawShard {
    entries: Vec<(String, Entry)>,
}

/// Error for shard blocks whose keys are not strictly ascending.
#[derive(Debug)]
pub struct UnsortedShard {
    key: String,
}

impl fmt::Display for UnsortedShard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "shard key {:?} is out of order or repeated", self.key)
    }
}

impl TryFrom<RawShard> for Shard {
    type Error = UnsortedShard;

    fn try_from(raw: RawShard) -> Result<Self, Self::Error> {
        if let Some(pair) = raw.entries.windows(2).find(|pair| pair[0].0 >= pair[1].0) {
            return Err(UnsortedShard {
                key: pair[1].0.clone(),
            });
        }
        Ok(Self {
            entries: raw.entries,
        })
    }
}

impl From<Shard> for RawShard {
    fn from(shard: Shard) -> Self {
        Self {
            entries: shard.entries,
        }
    }
}
