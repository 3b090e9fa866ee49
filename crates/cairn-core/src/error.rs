use std::fmt;
use std::time::Duration;

use crate::link::Link;

/// Machine-readable error codes for callers that branch on failure kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    MissingBlock,
    StorageFailure,
    CorruptBlock,
    CycleDetected,
    NoCommonAncestor,
    EncodeFailed,
    EmptyDatabase,
    KeyNotFound,
    InvalidUpdate,
    CompactionConflict,
    LockTimeout,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::MissingBlock => "E1001",
            Self::StorageFailure => "E1002",
            Self::CorruptBlock => "E2001",
            Self::CycleDetected => "E2002",
            Self::NoCommonAncestor => "E2003",
            Self::EncodeFailed => "E2004",
            Self::EmptyDatabase => "E3001",
            Self::KeyNotFound => "E3002",
            Self::InvalidUpdate => "E3003",
            Self::CompactionConflict => "E5001",
            Self::LockTimeout => "E5002",
        }
    }

    /// Short human-facing summary for logs and terminal output.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::MissingBlock => "Referenced block is missing",
            Self::StorageFailure => "Block store failure",
            Self::CorruptBlock => "Block does not decode",
            Self::CycleDetected => "Event graph contains a cycle",
            Self::NoCommonAncestor => "Heads share no common ancestor",
            Self::EncodeFailed => "Block encoding failed",
            Self::EmptyDatabase => "Database is empty",
            Self::KeyNotFound => "Key not found",
            Self::InvalidUpdate => "Invalid document update",
            Self::CompactionConflict => "Compaction in progress",
            Self::LockTimeout => "Writer queue timeout",
        }
    }

    /// Optional remediation hint that can be surfaced to operators.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::MissingBlock => {
                Some("Fetch the missing blocks from a replica, or read changes in dirty mode.")
            }
            Self::StorageFailure => Some("Retry once. If persistent, check the block store."),
            Self::CorruptBlock | Self::CycleDetected => {
                Some("Discard the offending blocks; they did not come from a valid writer.")
            }
            Self::NoCommonAncestor => {
                Some("Do not merge heads from different databases or across compactions.")
            }
            Self::EncodeFailed => Some("Report a bug with the offending document."),
            Self::EmptyDatabase | Self::KeyNotFound => None,
            Self::InvalidUpdate => Some("Provide a value for every non-delete update."),
            Self::CompactionConflict | Self::LockTimeout => {
                Some("Retry after the running write or compaction finishes.")
            }
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Errors returned by clock traversal, the CRDT engine and compaction.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A referenced block could not be fetched.
    #[error("missing block: {0}")]
    MissingBlock(Link),

    /// The block store itself failed (I/O, remote fetch).
    #[error("block store failure: {reason}")]
    Storage { reason: String },

    /// Bytes did not decode to the expected structure, or did not hash to
    /// the link they were fetched under.
    #[error("corrupt block {link}: {reason}")]
    CorruptBlock { link: Link, reason: String },

    /// A traversal came back to an event it started from.
    #[error("cycle detected in event graph at {link}")]
    CycleDetected { link: Link },

    /// The given heads have disjoint histories.
    #[error("failed to find common ancestor of {} head(s)", .heads.len())]
    NoCommonAncestor { heads: Vec<Link> },

    /// A value could not be serialized into a block.
    #[error("failed to encode block: {0}")]
    Encode(#[from] serde_json::Error),

    /// `get` was called before anything was written.
    #[error("cannot read from an empty database")]
    EmptyDatabase,

    /// The key was never written at the current head.
    #[error("key not found: {0}")]
    NotFound(String),

    /// A caller-supplied update is malformed.
    #[error("invalid update for key {key}: {reason}")]
    InvalidUpdate { key: String, reason: &'static str },

    /// A merge waited too long behind a running compaction.
    #[error("cannot merge while compacting")]
    CompactionConflict,

    /// The writer queue did not admit the caller in time.
    #[error("timed out after {waited:?} waiting for the writer queue")]
    LockTimeout { waited: Duration },
}

impl Error {
    /// Machine-readable code associated with this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::MissingBlock(_) => ErrorCode::MissingBlock,
            Self::Storage { .. } => ErrorCode::StorageFailure,
            Self::CorruptBlock { .. } => ErrorCode::CorruptBlock,
            Self::CycleDetected { .. } => ErrorCode::CycleDetected,
            Self::NoCommonAncestor { .. } => ErrorCode::NoCommonAncestor,
            Self::Encode(_) => ErrorCode::EncodeFailed,
            Self::EmptyDatabase => ErrorCode::EmptyDatabase,
            Self::NotFound(_) => ErrorCode::KeyNotFound,
            Self::InvalidUpdate { .. } => ErrorCode::InvalidUpdate,
            Self::CompactionConflict => ErrorCode::CompactionConflict,
            Self::LockTimeout { .. } => ErrorCode::LockTimeout,
        }
    }

    /// Optional remediation hint for operators.
    #[must_use]
    pub const fn hint(&self) -> Option<&'static str> {
        self.code().hint()
    }

    /// Whether retrying the same call may succeed.
    ///
    /// Structural failures (corrupt blocks, cycles, disjoint histories) are
    /// never retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::MissingBlock(_)
                | Self::Storage { .. }
                | Self::CompactionConflict
                | Self::LockTimeout { .. }
        )
    }

    /// Whether the failure is confined to one unreadable block, so that a
    /// best-effort traversal may skip it.
    #[must_use]
    pub const fn is_block_unavailable(&self) -> bool {
        matches!(
            self,
            Self::MissingBlock(_) | Self::Storage { .. } | Self::CorruptBlock { .. }
        )
    }

    pub(crate) fn corrupt(link: &Link, reason: impl fmt::Display) -> Self {
        Self::CorruptBlock {
            link: link.clone(),
            reason: reason.to_string(),
        }
    }
}

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::{Error, ErrorCode};
    use crate::link::Link;
    use std::collections::HashSet;

    #[test]
    fn all_codes_are_unique() {
        let all = [
            ErrorCode::MissingBlock,
            ErrorCode::StorageFailure,
            ErrorCode::CorruptBlock,
            ErrorCode::CycleDetected,
            ErrorCode::NoCommonAncestor,
            ErrorCode::EncodeFailed,
            ErrorCode::EmptyDatabase,
            ErrorCode::KeyNotFound,
            ErrorCode::InvalidUpdate,
            ErrorCode::CompactionConflict,
            ErrorCode::LockTimeout,
        ];

        let mut seen = HashSet::new();
        for code in all {
            assert!(seen.insert(code.code()), "duplicate code {}", code.code());
        }
    }

    #[test]
    fn code_format_is_machine_friendly() {
        let code = ErrorCode::NoCommonAncestor.code();
        assert_eq!(code.len(), 5);
        assert!(code.starts_with('E'));
        assert!(code.chars().skip(1).all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn integrity_errors_are_not_retryable() {
        let link = Link::digest(b"x");
        assert!(!Error::corrupt(&link, "bad").is_retryable());
        assert!(!Error::CycleDetected { link: link.clone() }.is_retryable());
        assert!(!Error::NoCommonAncestor { heads: vec![link.clone()] }.is_retryable());
        assert!(Error::MissingBlock(link).is_retryable());
        assert!(Error::CompactionConflict.is_retryable());
    }

    #[test]
    fn display_includes_head_count() {
        let err = Error::NoCommonAncestor {
            heads: vec![Link::digest(b"a"), Link::digest(b"b")],
        };
        assert_eq!(err.to_string(), "failed to find common ancestor of 2 head(s)");
        assert_eq!(err.code(), ErrorCode::NoCommonAncestor);
    }
}
