//! Event codec for the Merkle clock.
//!
//! An [`Event`] is an immutable DAG node: an ordered list of parent event
//! links and a link to its operation payload. Events are stored as canonical
//! JSON blocks and identified by the BLAKE3 hash of those bytes.
//!
//! # Wire format
//!
//! ```text
//! {"data":"blake3:<hex>","parents":["blake3:<hex>",...]}
//! ```
//!
//! Parent order is caller-supplied and preserved verbatim; it participates
//! in the hash. No sorting is applied.
//!
//! # Sub-modules
//!
//! - [`canonical`]: canonical JSON serialization shared by every block kind.
//! - [`data`]: operation payloads and document values referenced by events.

pub mod canonical;
pub mod data;

pub use data::{DocValue, EventPayload, Operation};

use serde::{Deserialize, Serialize};

use crate::block::{Block, decode_block};
use crate::error::Result;
use crate::link::Link;

/// A clock event: causal parents plus a link to the operation payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Event {
    /// Parent event links. Empty for a root, two or more at a merge point.
    pub parents: Vec<Link>,
    /// Link to the [`EventPayload`] block.
    pub data: Link,
}

/// A decoded event together with its link and encoded bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventBlock {
    pub link: Link,
    pub event: Event,
    pub bytes: Vec<u8>,
}

impl EventBlock {
    /// Create an event pointing at `data` with the given parents.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Encode`] if serialization fails.
    pub fn create(data: Link, parents: Vec<Link>) -> Result<Self> {
        encode(parents, data)
    }

    #[must_use]
    pub fn parents(&self) -> &[Link] {
        &self.event.parents
    }

    #[must_use]
    pub fn is_root(&self) -> bool {
        self.event.parents.is_empty()
    }

    /// The encoded block, for staging in a transaction.
    #[must_use]
    pub fn to_block(&self) -> Block {
        Block {
            link: self.link.clone(),
            bytes: self.bytes.clone(),
        }
    }
}

/// Encode an event into a content-addressed block.
///
/// # Errors
///
/// Returns [`crate::Error::Encode`] if serialization fails.
pub fn encode(parents: Vec<Link>, data: Link) -> Result<EventBlock> {
    let event = Event { parents, data };
    let Block { link, bytes } = Block::encode(&event)?;
    Ok(EventBlock { link, event, bytes })
}

/// Decode event bytes, deriving the link from their hash.
///
/// # Errors
///
/// Returns [`crate::Error::CorruptBlock`] when the bytes are not a
/// canonically encoded event.
pub fn decode(bytes: &[u8]) -> Result<EventBlock> {
    decode_at(&Link::digest(bytes), bytes)
}

/// Decode event bytes fetched under `link`, verifying the hash.
///
/// # Errors
///
/// Returns [`crate::Error::CorruptBlock`] on hash mismatch or bad shape.
pub fn decode_at(link: &Link, bytes: &[u8]) -> Result<EventBlock> {
    let event: Event = decode_block(link, bytes)?;
    Ok(EventBlock {
        link: link.clone(),
        event,
        bytes: bytes.to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn data(tag: &str) -> Link {
        Link::digest(tag.as_bytes())
    }

    #[test]
    fn root_event_encodes_empty_parents() {
        let event = EventBlock::create(data("d"), vec![]).unwrap();
        assert!(event.is_root());
        let text = String::from_utf8(event.bytes.clone()).unwrap();
        assert_eq!(text, format!(r#"{{"data":"{}","parents":[]}}"#, data("d")));
    }

    #[test]
    fn identical_inputs_hash_identically() {
        let a = encode(vec![data("p1"), data("p2")], data("d")).unwrap();
        let b = encode(vec![data("p1"), data("p2")], data("d")).unwrap();
        assert_eq!(a.link, b.link);
        assert_eq!(a.bytes, b.bytes);
    }

    #[test]
    fn parent_order_is_preserved_and_hashed() {
        let forward = encode(vec![data("p1"), data("p2")], data("d")).unwrap();
        let reverse = encode(vec![data("p2"), data("p1")], data("d")).unwrap();
        assert_ne!(forward.link, reverse.link);

        let decoded = decode(&reverse.bytes).unwrap();
        assert_eq!(decoded.event.parents, vec![data("p2"), data("p1")]);
        assert_eq!(decoded, reverse);
    }

    #[test]
    fn decode_at_rejects_wrong_link() {
        let event = encode(vec![], data("d")).unwrap();
        let err = decode_at(&data("elsewhere"), &event.bytes).unwrap_err();
        assert!(matches!(err, Error::CorruptBlock { .. }));
    }

    #[test]
    fn decode_rejects_garbage_and_extra_fields() {
        assert!(matches!(decode(b"\x00\x01"), Err(Error::CorruptBlock { .. })));

        let extra = format!(r#"{{"data":"{}","extra":1,"parents":[]}}"#, data("d"));
        assert!(matches!(
            decode(extra.as_bytes()),
            Err(Error::CorruptBlock { .. })
        ));

        let bad_parent = format!(r#"{{"data":"{}","parents":["nope"]}}"#, data("d"));
        assert!(matches!(
            decode(bad_parent.as_bytes()),
            Err(Error::CorruptBlock { .. })
        ));
    }
}
