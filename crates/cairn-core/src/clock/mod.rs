//! Merkle clock over content-addressed events.
//!
//! The clock is the DAG of [`crate::event::Event`] blocks plus a [`Head`]:
//! the minimal set of events nothing else descends from. Replicas exchange
//! blocks and fold each other's head links in with [`advance()`]; any two
//! replicas that hold the same events converge on the same canonical head.
//!
//! # Sub-modules
//!
//! - [`head`]: the frontier type and its canonical form. ([`Head`])
//! - [`fetcher`]: decoding event reader with a bounded cache.
//!   ([`EventFetcher`])
//! - [`advance`]: frontier update and ancestry test. ([`advance()`],
//!   [`contains`])
//! - [`ancestor`]: common ancestor and deterministic replay order.
//!   ([`find_common_ancestor`], [`find_sorted_events`],
//!   [`find_events_to_sync`])
//! - [`vis`]: Graphviz rendering. ([`vis()`], [`vis_with`])
//!
//! # Traversal guarantees
//!
//! Every walk tracks visited links, so malformed input cannot make it loop.
//! A walk that returns to its starting event fails with
//! [`crate::Error::CycleDetected`]; an unreadable event fails with
//! [`crate::Error::MissingBlock`] or [`crate::Error::CorruptBlock`].

pub mod advance;
pub mod ancestor;
pub mod fetcher;
pub mod head;
pub mod vis;

pub use advance::{advance, contains};
pub use ancestor::{SyncSet, find_common_ancestor, find_events_to_sync, find_sorted_events};
pub use fetcher::{DEFAULT_EVENT_CACHE_CAPACITY, EventFetcher};
pub use head::Head;
pub use vis::{vis, vis_with};
