//! cairn-core library: a content-addressed Merkle clock and the document
//! CRDT built on it.
//!
//! # Conventions
//!
//! - **Errors**: library functions return [`Result`] with the typed
//!   [`Error`]; configuration loading uses `anyhow::Result`.
//! - **Logging**: Use `tracing` macros (`info!`, `warn!`, `debug!`, `trace!`).
//!   No subscriber is installed here.

pub mod block;
pub mod clock;
pub mod config;
pub mod crdt;
pub mod error;
pub mod event;
pub mod kv;
pub mod link;

pub use block::{Block, BlockFetcher, Blockstore, CommitResult, MemoryBlockstore, Transaction};
pub use clock::{EventFetcher, Head};
pub use config::{EngineConfig, load_config};
pub use crdt::{Change, Changes, ChangesOptions, Crdt, DocUpdate, Document, Phase};
pub use error::{Error, ErrorCode, Result};
pub use event::{DocValue, Event, EventBlock, EventPayload, Operation};
pub use link::Link;
