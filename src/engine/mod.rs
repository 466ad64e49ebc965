//! The ordered byte-string engine underneath the store.
//!
//! [`Engine`] is the contract the access layer depends on: point reads and
//! writes, atomic batches with optional sync, snapshots, forward iterators
//! with seek, size estimates, named statistics and range compaction. The
//! access layer never looks past this trait.
//!
//! [`JournalDb`] is the bundled implementation: an MVCC skiplist made durable
//! by a checksummed append-only journal.

pub mod db;
pub mod journal;
pub mod memtable;

use crate::checksum::ChecksumAlgorithm;
use crate::error::{Result, StorageError};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

pub use db::JournalDb;

/// Sequence number assigned to every committed write.
pub type SequenceNumber = u64;

/// Defines the order of keys inside the engine.
///
/// The name is persisted with the store; reopening with a comparator of a
/// different name is refused.
pub trait Comparator: Send + Sync {
    fn name(&self) -> &str;
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering;
}

/// Lexicographic byte order.
#[derive(Debug, Clone, Copy, Default)]
pub struct BytewiseComparator;

impl Comparator for BytewiseComparator {
    fn name(&self) -> &str {
        "ordkv.BytewiseComparator"
    }

    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }
}

/// Sink for engine diagnostics (recovery, compaction, repair).
///
/// Messages are also emitted through `tracing`; this sink is for callers who
/// want the engine's own log stream.
pub trait InfoLog: Send + Sync {
    fn log(&self, message: &str);
}

impl<F> InfoLog for F
where
    F: Fn(&str) + Send + Sync,
{
    fn log(&self, message: &str) {
        self(message)
    }
}

/// Block compression applied to journal payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Compression {
    None,
    Zstd,
}

/// Engine tuning structure produced by the options resolver.
#[derive(Clone)]
pub struct EngineOptions {
    pub create_if_missing: bool,
    pub error_if_exists: bool,
    pub paranoid_checks: bool,
    /// Capacity of the journal writer buffer.
    pub write_buffer_size: usize,
    /// Read buffer used while replaying the journal.
    pub block_size: usize,
    /// Records appended between forced flushes of the writer buffer.
    pub block_restart_interval: usize,
    /// Accepted for compatibility; the journal engine holds one file open.
    pub max_open_files: Option<usize>,
    /// Bytes of superseded versions tolerated before an automatic prune.
    pub cache_size: usize,
    pub compression: Compression,
    pub checksum_algorithm: ChecksumAlgorithm,
    pub comparator: Arc<dyn Comparator>,
    pub info_log: Option<Arc<dyn InfoLog>>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            create_if_missing: false,
            error_if_exists: false,
            paranoid_checks: false,
            write_buffer_size: 4 * 1024 * 1024,
            block_size: 4 * 1024,
            block_restart_interval: 16,
            max_open_files: None,
            cache_size: 8 * 1024 * 1024,
            compression: Compression::None,
            checksum_algorithm: ChecksumAlgorithm::CRC32,
            comparator: Arc::new(BytewiseComparator),
            info_log: None,
        }
    }
}

impl fmt::Debug for EngineOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineOptions")
            .field("create_if_missing", &self.create_if_missing)
            .field("error_if_exists", &self.error_if_exists)
            .field("paranoid_checks", &self.paranoid_checks)
            .field("write_buffer_size", &self.write_buffer_size)
            .field("block_size", &self.block_size)
            .field("block_restart_interval", &self.block_restart_interval)
            .field("max_open_files", &self.max_open_files)
            .field("cache_size", &self.cache_size)
            .field("compression", &self.compression)
            .field("checksum_algorithm", &self.checksum_algorithm)
            .field("comparator", &self.comparator.name())
            .field("info_log", &self.info_log.is_some())
            .finish()
    }
}

/// A pinned point-in-time view inside the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SnapshotId(pub(crate) SequenceNumber);

impl SnapshotId {
    pub fn sequence(&self) -> SequenceNumber {
        self.0
    }
}

/// Options applied to reads.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadOptions {
    /// Read as of this snapshot instead of the latest state.
    pub snapshot: Option<SnapshotId>,
}

/// Options applied to writes.
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteOptions {
    /// Force the journal to stable storage before the write returns.
    pub sync: bool,
}

/// A single staged mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

impl BatchOp {
    pub fn key(&self) -> &[u8] {
        match self {
            BatchOp::Put { key, .. } | BatchOp::Delete { key } => key,
        }
    }
}

/// Ordered set of mutations applied atomically by [`Engine::write`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
    byte_size: usize,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.byte_size += key.len() + value.len();
        self.ops.push(BatchOp::Put { key, value });
    }

    pub fn delete(&mut self, key: Vec<u8>) {
        self.byte_size += key.len();
        self.ops.push(BatchOp::Delete { key });
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Sum of key and value lengths staged so far.
    pub fn byte_size(&self) -> usize {
        self.byte_size
    }

    pub fn clear(&mut self) {
        self.ops.clear();
        self.byte_size = 0;
    }

    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }

    pub(crate) fn into_ops(self) -> Vec<BatchOp> {
        self.ops
    }

    pub(crate) fn from_ops(ops: Vec<BatchOp>) -> Self {
        let byte_size = ops
            .iter()
            .map(|op| match op {
                BatchOp::Put { key, value } => key.len() + value.len(),
                BatchOp::Delete { key } => key.len(),
            })
            .sum();
        Self { ops, byte_size }
    }
}

/// Result of [`Engine::approximate_size`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SizeEstimate {
    /// Approximate bytes of key and value data in the range.
    pub bytes: u64,
    /// Approximate number of distinct keys in the range.
    pub entries: u64,
}

/// Forward cursor over raw engine entries.
///
/// Positioned with one of the seek methods; `next_entry` returns the entry at
/// the current position and advances past it.
pub trait EngineIterator: Send {
    /// Position at the first key >= `target`.
    fn seek(&mut self, target: &[u8]) -> Result<()>;

    fn seek_to_first(&mut self) -> Result<()>;

    fn seek_to_last(&mut self) -> Result<()>;

    fn has_next(&self) -> bool;

    fn peek_next(&self) -> Option<(&[u8], &[u8])>;

    fn next_entry(&mut self) -> Result<Option<(Vec<u8>, Vec<u8>)>>;
}

/// The storage engine contract.
pub trait Engine: Send + Sync {
    fn get(&self, options: &ReadOptions, key: &[u8]) -> Result<Option<Vec<u8>>>;

    fn put(&self, options: &WriteOptions, key: &[u8], value: &[u8]) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.put(key.to_vec(), value.to_vec());
        self.write(options, batch)
    }

    fn delete(&self, options: &WriteOptions, key: &[u8]) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.delete(key.to_vec());
        self.write(options, batch)
    }

    /// Apply every operation in `batch` as one indivisible unit.
    fn write(&self, options: &WriteOptions, batch: WriteBatch) -> Result<()>;

    fn snapshot(&self) -> Result<SnapshotId>;

    fn release_snapshot(&self, snapshot: SnapshotId);

    /// Create an iterator. Without a snapshot in `options` the iterator
    /// pins the state at creation time.
    fn iter(&self, options: &ReadOptions) -> Result<Box<dyn EngineIterator>>;

    /// Estimate the data held in `[start, end)`; `None` leaves a side open.
    fn approximate_size(&self, _start: Option<&[u8]>, _end: Option<&[u8]>) -> Result<SizeEstimate> {
        Err(StorageError::Unsupported("approximate_size".to_string()))
    }

    /// Named diagnostic property, `None` when the name is unknown.
    fn property(&self, name: &str) -> Option<String>;

    /// Compact the inclusive range `[start, end]`; `None` leaves a side open.
    fn compact_range(&self, _start: Option<&[u8]>, _end: Option<&[u8]>) -> Result<()> {
        Err(StorageError::Unsupported("compact_range".to_string()))
    }

    fn comparator(&self) -> &Arc<dyn Comparator>;

    /// Flush and release the engine. Idempotent.
    fn close(&self) -> Result<()>;
}
