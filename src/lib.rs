//! # ordKV - Typed Access to an Ordered Persistent Key-Value Store
//!
//! ordKV puts a typed, resource-safe access layer on top of an embedded
//! ordered byte-string engine. Keys and values are arbitrary serializable
//! Rust values; a [`Codec`] turns them into bytes on the way in and back on
//! the way out.
//!
//! ## Architecture
//!
//! - **Codec**: serializes keys and values (JSON or postcard), with a
//!   process-wide default and per-scope overrides
//! - **Store**: owns the engine; point reads and writes, bulk writes,
//!   conditional deletes, sync, compaction and size estimates
//! - **Snapshot**: consistent point-in-time reads, released exactly once
//! - **Batch**: atomic multi-operation writes, single-use
//! - **Cursor**: range iteration that releases its engine iterator as soon
//!   as the range is exhausted, on error, on close or on drop
//! - **Engine**: the ordered byte-string contract, implemented by the
//!   bundled [`JournalDb`] (MVCC skiplist plus checksummed journal)
//!
//! ## Example Usage
//!
//! ```no_run
//! use ordkv::prelude::*;
//! use ordkv::{Options, Store};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Store::open("./data", Options::default())?;
//!
//!     // PUT / GET / DELETE
//!     store.put("user:1", "alice")?;
//!     let name: Option<String> = store.get("user:1")?;
//!     assert_eq!(name.as_deref(), Some("alice"));
//!     store.delete("user:1")?;
//!
//!     // Atomic batch, committed on scope exit
//!     store.write_batch(|batch| {
//!         batch.put("a", &1)?;
//!         batch.put("b", &2)?;
//!         Ok(())
//!     })?;
//!
//!     // Point-in-time reads
//!     let snapshot = store.snapshot()?;
//!     store.put("a", &10)?;
//!     assert_eq!(snapshot.get::<_, i32>("a")?, Some(1));
//!     snapshot.close();
//!
//!     // Range scan, start and end inclusive
//!     let pairs: Vec<(String, i32)> = store
//!         .iterator(Some(&"a".to_string()), Some(&"b".to_string()))?
//!         .collect::<ordkv::Result<_>>()?;
//!     assert_eq!(pairs.len(), 2);
//!
//!     store.close()?;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`store`]: store lifecycle and the write operations
//! - [`view`]: read operations shared by stores, scopes and snapshots
//! - [`batch`]: atomic write batches
//! - [`cursor`]: lazily closing range cursors
//! - [`codec`]: key/value serialization
//! - [`options`]: user options and their resolution to engine options
//! - [`engine`]: the engine contract and the bundled journal engine
//! - [`metrics`]: latency histograms and handle lifecycle counters
//! - [`error`]: error types and result aliases

/// Atomic write batches
pub mod batch;

/// Checksum utilities (CRC32, XXH64) for journal integrity
pub mod checksum;

/// Command-line interface
pub mod cli;

/// Key and value serialization
pub mod codec;

/// Lazily closing range cursors
pub mod cursor;

/// Engine contract and the bundled journal engine
pub mod engine;

/// Error types and result aliases
pub mod error;

/// Performance metrics collection and reporting
pub mod metrics;

/// User options and their resolution
pub mod options;

/// Store lifecycle and write operations
pub mod store;

/// Read operations and snapshots
pub mod view;

pub use batch::{Batch, BatchState};
pub use codec::{Codec, CodecKind, JsonCodec, PostcardCodec};
pub use cursor::{Cursor, CursorState};
pub use engine::db::RepairReport;
pub use engine::{
    Comparator, Engine, EngineOptions, InfoLog, JournalDb, ReadOptions, SizeEstimate, WriteOptions,
};
pub use error::{Resource, Result, StorageError};
pub use metrics::{Metrics, MetricsReport};
pub use options::Options;
pub use store::{CodecScope, Store, WriteView, DELETE_ALL_CHUNK};
pub use view::{ReadView, Snapshot};

#[doc(hidden)]
pub use view::ViewContext;

/// Traits needed to call read and write operations on any view.
pub mod prelude {
    pub use crate::codec::{Codec, CodecKind};
    pub use crate::store::WriteView;
    pub use crate::view::ReadView;
}
