use crate::codec::{Codec, CodecKind};
use crate::engine::{WriteBatch, WriteOptions};
use crate::error::{Resource, Result, StorageError};
use crate::store::StoreShared;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// Lifecycle of a [`Batch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    /// Accepting operations.
    Open,
    /// Applied to the store.
    Committed,
    /// Dropped without effect, explicitly or because commit failed.
    Discarded,
}

/// Atomic set of puts and deletes.
///
/// Operations are staged in memory and become visible together when the
/// batch is committed; readers never observe part of a batch. A batch is
/// single-use: after commit or discard every further call fails with
/// `UseAfterClose { resource: Batch }`.
///
/// Dropping a batch that is still open discards it. Use
/// [`WriteView::write_batch`](crate::WriteView::write_batch) to commit on
/// scope exit.
///
/// # Example
///
/// ```no_run
/// use ordkv::prelude::*;
/// use ordkv::{Options, Store};
///
/// # fn main() -> ordkv::Result<()> {
/// let store = Store::open("./data", Options::default())?;
///
/// let mut batch = store.batch()?;
/// batch.put("a", "1")?;
/// batch.put("b", "2")?;
/// batch.delete("stale")?;
/// batch.commit()?;
/// # Ok(())
/// # }
/// ```
pub struct Batch<C: Codec = CodecKind> {
    shared: Arc<StoreShared>,
    staged: WriteBatch,
    write_options: WriteOptions,
    codec: C,
    state: BatchState,
}

impl<C: Codec> Batch<C> {
    pub(crate) fn new(shared: Arc<StoreShared>, write_options: WriteOptions, codec: C) -> Result<Self> {
        shared.check_open()?;
        Ok(Self {
            shared,
            staged: WriteBatch::new(),
            write_options,
            codec,
            state: BatchState::Open,
        })
    }

    fn check_open(&self) -> Result<()> {
        if self.state == BatchState::Open {
            Ok(())
        } else {
            Err(StorageError::closed(Resource::Batch))
        }
    }

    /// Stage a put of `key` → `value`.
    pub fn put<K, V>(&mut self, key: &K, value: &V) -> Result<()>
    where
        K: Serialize + ?Sized,
        V: Serialize + ?Sized,
    {
        self.check_open()?;
        let key = self.codec.encode(key)?;
        let value = self.codec.encode(value)?;
        self.staged.put(key, value);
        Ok(())
    }

    /// Stage a delete of `key`.
    pub fn delete<K>(&mut self, key: &K) -> Result<()>
    where
        K: Serialize + ?Sized,
    {
        self.check_open()?;
        let key = self.codec.encode(key)?;
        self.staged.delete(key);
        Ok(())
    }

    /// Number of staged operations.
    pub fn len(&self) -> usize {
        self.staged.len()
    }

    pub fn is_empty(&self) -> bool {
        self.staged.is_empty()
    }

    pub fn state(&self) -> BatchState {
        self.state
    }

    pub fn write_options(&self) -> WriteOptions {
        self.write_options
    }

    /// Apply every staged operation as one unit.
    ///
    /// The batch is closed afterwards whether or not the engine accepted it;
    /// on failure nothing was applied.
    ///
    /// # Errors
    ///
    /// - `UseAfterClose { resource: Batch }` when already committed or discarded
    /// - `UseAfterClose { resource: Store }` when the store is closed
    /// - any engine failure from the atomic write
    pub fn commit(&mut self) -> Result<()> {
        self.check_open()?;
        let staged = std::mem::take(&mut self.staged);
        let count = staged.len();

        if let Err(e) = self.shared.check_open() {
            self.mark_discarded();
            return Err(e);
        }

        let start = Instant::now();
        match self.shared.engine.write(&self.write_options, staged) {
            Ok(()) => {
                self.state = BatchState::Committed;
                self.shared.metrics.record_latency("batch", start.elapsed());
                self.shared.metrics.batch_committed();
                tracing::debug!("Committed batch of {} operations", count);
                Ok(())
            }
            Err(e) => {
                tracing::warn!("Batch of {} operations failed to commit: {}", count, e);
                self.mark_discarded();
                Err(e)
            }
        }
    }

    /// Commit if still open; a no-op otherwise.
    pub fn close(&mut self) -> Result<()> {
        match self.state {
            BatchState::Open => self.commit(),
            BatchState::Committed | BatchState::Discarded => Ok(()),
        }
    }

    /// Drop every staged operation without applying any of them.
    pub fn discard(&mut self) {
        if self.state == BatchState::Open {
            self.staged.clear();
            self.mark_discarded();
        }
    }

    fn mark_discarded(&mut self) {
        self.state = BatchState::Discarded;
        self.shared.metrics.batch_discarded();
    }
}

impl<C: Codec> fmt::Debug for Batch<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Batch")
            .field("state", &self.state)
            .field("staged", &self.staged.len())
            .field("write_options", &self.write_options)
            .field("codec", &self.codec.name())
            .finish()
    }
}

impl<C: Codec> Drop for Batch<C> {
    fn drop(&mut self) {
        if self.state == BatchState::Open {
            if !self.staged.is_empty() {
                tracing::warn!(
                    "Batch dropped with {} uncommitted operations, discarding",
                    self.staged.len()
                );
            }
            self.discard();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prelude::*;
    use crate::{Options, Store};
    use tempfile::TempDir;

    fn create_test_store() -> (Store, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = Store::open_with_codec(
            temp_dir.path().join("store"),
            Options::default(),
            CodecKind::Json,
        )
        .unwrap();
        (store, temp_dir)
    }

    #[test]
    fn test_nothing_visible_before_commit() {
        let (store, _temp_dir) = create_test_store();
        let mut batch = store.batch().unwrap();
        batch.put("a", "1").unwrap();
        batch.put("b", "2").unwrap();
        assert_eq!(batch.len(), 2);

        assert_eq!(store.get::<_, String>("a").unwrap(), None);
        assert_eq!(store.get::<_, String>("b").unwrap(), None);

        batch.commit().unwrap();
        assert_eq!(batch.state(), BatchState::Committed);
        assert_eq!(store.get::<_, String>("a").unwrap(), Some("1".to_string()));
        assert_eq!(store.get::<_, String>("b").unwrap(), Some("2".to_string()));
    }

    #[test]
    fn test_operations_apply_in_order() {
        let (store, _temp_dir) = create_test_store();
        store.put("gone", "x").unwrap();

        let mut batch = store.batch().unwrap();
        batch.put("k", "first").unwrap();
        batch.put("k", "second").unwrap();
        batch.delete("gone").unwrap();
        batch.close().unwrap();

        assert_eq!(store.get::<_, String>("k").unwrap(), Some("second".to_string()));
        assert_eq!(store.get::<_, String>("gone").unwrap(), None);
    }

    #[test]
    fn test_commit_twice_fails() {
        let (store, _temp_dir) = create_test_store();
        let mut batch = store.batch().unwrap();
        batch.put("a", "1").unwrap();
        batch.commit().unwrap();

        let err = batch.commit().unwrap_err();
        assert!(matches!(err, StorageError::UseAfterClose { resource: Resource::Batch }));
        assert!(batch.put("b", "2").unwrap_err().is_use_after_close());
        assert!(batch.delete("a").unwrap_err().is_use_after_close());

        // close after commit is a no-op
        assert!(batch.close().is_ok());
    }

    #[test]
    fn test_discard_and_drop() {
        let (store, _temp_dir) = create_test_store();

        let mut batch = store.batch().unwrap();
        batch.put("a", "1").unwrap();
        batch.discard();
        assert_eq!(batch.state(), BatchState::Discarded);
        assert!(batch.commit().unwrap_err().is_use_after_close());

        {
            let mut dropped = store.batch().unwrap();
            dropped.put("b", "2").unwrap();
        }

        assert_eq!(store.get::<_, String>("a").unwrap(), None);
        assert_eq!(store.get::<_, String>("b").unwrap(), None);
        assert_eq!(store.metrics().report().batches_discarded, 2);
    }

    #[test]
    fn test_commit_after_store_close() {
        let (store, _temp_dir) = create_test_store();
        let mut batch = store.batch().unwrap();
        batch.put("a", "1").unwrap();
        store.close().unwrap();

        let err = batch.commit().unwrap_err();
        assert!(matches!(err, StorageError::UseAfterClose { resource: Resource::Store }));
        assert_eq!(batch.state(), BatchState::Discarded);
    }

    #[test]
    fn test_synced_batch() {
        let (store, _temp_dir) = create_test_store();
        let mut batch = store.batch_with(WriteOptions { sync: true }).unwrap();
        assert!(batch.write_options().sync);
        batch.put("durable", &true).unwrap();
        batch.commit().unwrap();

        assert_eq!(store.get::<_, bool>("durable").unwrap(), Some(true));
    }

    #[test]
    fn test_empty_batch_commits() {
        let (store, _temp_dir) = create_test_store();
        let mut batch = store.batch().unwrap();
        assert!(batch.is_empty());
        batch.commit().unwrap();
        assert_eq!(store.metrics().report().batches_committed, 1);
    }
}
