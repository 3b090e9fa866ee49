//! Operation payloads and document values.
//!
//! An event's `data` link points at an [`EventPayload`]: the [`Operation`]
//! the event records plus the link of the key/value shard that reflects the
//! state after it. Document bodies live in separate [`DocValue`] blocks
//! referenced from `Put` operations.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::link::Link;

/// A document body: a JSON object.
pub type DocBody = Map<String, Value>;

/// Operation recorded by one event.
///
/// Serialized internally tagged, e.g. `{"key":"a","type":"put","value":"blake3:.."}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Operation {
    /// Set `key` to the document value block at `value`.
    Put { key: String, value: Link },
    /// Tombstone `key`.
    Delete { key: String },
    /// Several puts/deletes applied in order.
    Batch { ops: Vec<Operation> },
    /// Synthetic compaction root; the state is the payload's whole shard.
    Snapshot,
}

impl Operation {
    /// The key/value writes this operation performs, in application order.
    ///
    /// A bare put or delete yields itself; a snapshot yields nothing (its
    /// writes live in the shard it points to).
    #[must_use]
    pub fn writes(&self) -> &[Self] {
        match self {
            Self::Put { .. } | Self::Delete { .. } => std::slice::from_ref(self),
            Self::Batch { ops } => ops,
            Self::Snapshot => &[],
        }
    }

    /// Key touched by a bare put or delete.
    #[must_use]
    pub fn key(&self) -> Option<&str> {
        match self {
            Self::Put { key, .. } | Self::Delete { key } => Some(key),
            Self::Batch { .. } | Self::Snapshot => None,
        }
    }

    /// Check structural rules that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns a description of the first violation: a batch must be
    /// non-empty and may only hold puts and deletes.
    pub fn validate(&self) -> Result<(), &'static str> {
        if let Self::Batch { ops } = self {
            if ops.is_empty() {
                return Err("batch has no operations");
            }
            if ops
                .iter()
                .any(|op| matches!(op, Self::Batch { .. } | Self::Snapshot))
            {
                return Err("batch may only contain put and delete operations");
            }
        }
        Ok(())
    }
}

/// Block referenced by an event's `data` link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EventPayload {
    pub op: Operation,
    /// Shard reflecting the key/value state after `op`.
    pub root: Link,
}

/// Stored document value: a body, or a deletion marker.
///
/// Encoded as `{"doc":{...}}` or `{"del":true}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawDocValue", into = "RawDocValue")]
pub enum DocValue {
    Doc(DocBody),
    Deleted,
}

impl DocValue {
    #[must_use]
    pub const fn is_deleted(&self) -> bool {
        matches!(self, Self::Deleted)
    }

    #[must_use]
    pub fn into_doc(self) -> Option<DocBody> {
        match self {
            Self::Doc(body) => Some(body),
            Self::Deleted => None,
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawDocValue {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    doc: Option<DocBody>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    del: Option<bool>,
}

/// Error for document values that are neither a body nor a deletion marker.
#[derive(Debug)]
pub struct InvalidDocValue;

impl fmt::Display for InvalidDocValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("document value must be {\"doc\":{...}} or {\"del\":true}")
    }
}

impl TryFrom<RawDocValue> for DocValue {
    type Error = InvalidDocValue;

    fn try_from(raw: RawDocValue) -> Result<Self, Self::Error> {
        match (raw.doc, raw.del) {
            (Some(doc), None) => Ok(Self::Doc(doc)),
            (None, Some(true)) => Ok(Self::Deleted),
            _ => Err(InvalidDocValue),
        }
    }
}

impl From<DocValue> for RawDocValue {
    fn from(value: DocValue) -> Self {
        match value {
            DocValue::Doc(doc) => Self {
                doc: Some(doc),
                del: None,
            },
            DocValue::Deleted => Self {
                doc: None,
                del: Some(true),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::Block;
    use serde_json::json;

    fn link(tag: &str) -> Link {
        Link::digest(tag.as_bytes())
    }

    #[test]
    fn operations_are_internally_tagged() {
        let put = Operation::Put {
            key: "ace".into(),
            value: link("v"),
        };
        let json = serde_json::to_value(&put).unwrap();
        assert_eq!(json, json!({"type": "put", "key": "ace", "value": link("v")}));

        let snapshot = serde_json::to_value(Operation::Snapshot).unwrap();
        assert_eq!(snapshot, json!({"type": "snapshot"}));
    }

    #[test]
    fn writes_flattens_batches() {
        let del = Operation::Delete { key: "a".into() };
        assert_eq!(del.writes(), std::slice::from_ref(&del));

        let batch = Operation::Batch {
            ops: vec![del.clone(), del.clone()],
        };
        assert_eq!(batch.writes().len(), 2);
        assert!(Operation::Snapshot.writes().is_empty());
    }

    #[test]
    fn validate_rejects_nested_batches() {
        let nested = Operation::Batch {
            ops: vec![Operation::Batch { ops: vec![] }],
        };
        assert!(nested.validate().is_err());
        assert!(Operation::Batch { ops: vec![] }.validate().is_err());
        assert!(Operation::Snapshot.validate().is_ok());
    }

    #[test]
    fn doc_value_encodings() {
        let mut body = DocBody::new();
        body.insert("points".into(), json!(11));
        let doc = Block::encode(&DocValue::Doc(body.clone())).unwrap();
        assert_eq!(doc.bytes, br#"{"doc":{"points":11}}"#);
        assert_eq!(doc.decode::<DocValue>().unwrap(), DocValue::Doc(body));

        let del = Block::encode(&DocValue::Deleted).unwrap();
        assert_eq!(del.bytes, br#"{"del":true}"#);
        assert!(del.decode::<DocValue>().unwrap().is_deleted());
    }

    #[test]
    fn doc_value_rejects_ambiguous_shapes() {
        for bad in [json!({}), json!({"del": false}), json!({"doc": {}, "del": true})] {
            let block = Block::encode(&bad).unwrap();
            assert!(block.decode::<DocValue>().is_err(), "{bad}");
        }
    }
}
