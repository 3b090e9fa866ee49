//! Content-addressed block links.
//!
//! A [`Link`] names a block by the BLAKE3 hash of its bytes, rendered as
//! `blake3:<64 lowercase hex>`. Links order lexicographically by that string,
//! which is the order used for canonical heads and sorted-event tie-breaks.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Prefix carried by every link string.
pub const LINK_PREFIX: &str = "blake3:";

const HEX_LEN: usize = 64;

/// Errors from parsing a link string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LinkParseError {
    #[error("link {0:?} does not start with `blake3:`")]
    MissingPrefix(String),

    #[error("link {0:?} must carry 64 lowercase hex digits")]
    BadDigest(String),
}

/// Hash of a content-addressed block.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Link(String);

impl Link {
    /// Hash `bytes` into a link.
    #[must_use]
    pub fn digest(bytes: &[u8]) -> Self {
        let hash = blake3::hash(bytes);
        Self(format!("{LINK_PREFIX}{hash}"))
    }

    /// Parse a `blake3:<hex>` string.
    ///
    /// # Errors
    ///
    /// Returns [`LinkParseError`] when the prefix or digest is malformed.
    pub fn parse(s: &str) -> Result<Self, LinkParseError> {
        let Some(hex) = s.strip_prefix(LINK_PREFIX) else {
            return Err(LinkParseError::MissingPrefix(s.to_string()));
        };
        let well_formed = hex.len() == HEX_LEN
            && hex
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if !well_formed {
            return Err(LinkParseError::BadDigest(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Hex digest without the prefix.
    #[must_use]
    pub fn digest_hex(&self) -> &str {
        &self.0[LINK_PREFIX.len()..]
    }

    /// Abbreviated `abcd..wxyz` form used in graph renderings.
    #[must_use]
    pub fn short(&self) -> String {
        let hex = self.digest_hex();
        format!("{}..{}", &hex[..4], &hex[hex.len() - 4..])
    }
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Link {
    type Err = LinkParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl AsRef<str> for Link {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Serialize for Link {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Link {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_prefixed_hex() {
        let link = Link::digest(b"hello");
        assert!(link.as_str().starts_with("blake3:"));
        assert_eq!(link.digest_hex().len(), 64);
        assert_eq!(link, Link::digest(b"hello"));
        assert_ne!(link, Link::digest(b"hello!"));
    }

    #[test]
    fn parse_round_trips_display() {
        let link = Link::digest(b"payload");
        let parsed: Link = link.to_string().parse().unwrap();
        assert_eq!(parsed, link);
    }

    #[test]
    fn parse_rejects_malformed() {
        assert!(matches!(
            Link::parse("sha256:abc"),
            Err(LinkParseError::MissingPrefix(_))
        ));
        assert!(matches!(
            Link::parse("blake3:abc"),
            Err(LinkParseError::BadDigest(_))
        ));
        let upper = format!("blake3:{}", "A".repeat(64));
        assert!(Link::parse(&upper).is_err());
    }

    #[test]
    fn short_form_keeps_both_ends() {
        let link = Link::digest(b"x");
        let hex = link.digest_hex();
        assert_eq!(link.short(), format!("{}..{}", &hex[..4], &hex[60..]));
    }

    #[test]
    fn serde_uses_plain_string() {
        let link = Link::digest(b"x");
        let json = serde_json::to_string(&link).unwrap();
        assert_eq!(json, format!("\"{link}\""));
        let back: Link = serde_json::from_str(&json).unwrap();
        assert_eq!(back, link);
        assert!(serde_json::from_str::<Link>("\"nope\"").is_err());
    }
}
