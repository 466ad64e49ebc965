use crate::batch::Batch;
use crate::codec::{Codec, CodecKind};
use crate::engine::db::RepairReport;
use crate::engine::{Engine, JournalDb, ReadOptions, SizeEstimate, WriteBatch, WriteOptions};
use crate::error::{Resource, Result, StorageError};
use crate::metrics::Metrics;
use crate::options::Options;
use crate::view::{private, ReadView, ViewContext};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Keys removed per atomic batch by [`WriteView::delete_all`].
pub const DELETE_ALL_CHUNK: usize = 1000;

/// State shared by a store and every handle cut from it.
pub(crate) struct StoreShared {
    pub(crate) engine: Box<dyn Engine>,
    pub(crate) path: PathBuf,
    pub(crate) read_options: ReadOptions,
    pub(crate) write_options: WriteOptions,
    pub(crate) metrics: Metrics,
    closed: AtomicBool,
}

impl StoreShared {
    pub(crate) fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(StorageError::closed(Resource::Store))
        } else {
            Ok(())
        }
    }

    fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let result = self.engine.close();
        tracing::info!("Store at {:?} closed", self.path);
        result
    }
}

/// Mutations available on the live store.
///
/// Implemented by [`Store`] and [`CodecScope`]; snapshots are read-only.
pub trait WriteView: ReadView {
    /// Store `value` under `key`, replacing any previous value.
    fn put<K, V>(&self, key: &K, value: &V) -> Result<()>
    where
        K: Serialize + ?Sized,
        V: Serialize + ?Sized,
    {
        let ctx = self.context()?;
        let start = Instant::now();

        let key = ctx.codec.encode(key)?;
        let value = ctx.codec.encode(value)?;
        ctx.shared.engine.put(&ctx.write_options, &key, &value)?;

        ctx.shared.metrics.record_latency("put", start.elapsed());
        ctx.shared.metrics.increment_throughput();
        Ok(())
    }

    /// Store every pair in `entries` as one atomic batch.
    fn put_all<K, V, I>(&self, entries: I) -> Result<()>
    where
        K: Serialize,
        V: Serialize,
        I: IntoIterator<Item = (K, V)>,
    {
        let ctx = self.context()?;
        let start = Instant::now();

        let mut batch = WriteBatch::new();
        for (key, value) in entries {
            batch.put(ctx.codec.encode(&key)?, ctx.codec.encode(&value)?);
        }
        let count = batch.len();
        ctx.shared.engine.write(&ctx.write_options, batch)?;

        ctx.shared.metrics.record_latency("put_all", start.elapsed());
        ctx.shared.metrics.batch_committed();
        tracing::debug!("Stored {} entries in one batch", count);
        Ok(())
    }

    /// Remove `key`. Removing a missing key is not an error.
    fn delete<K>(&self, key: &K) -> Result<()>
    where
        K: Serialize + ?Sized,
    {
        let ctx = self.context()?;
        let start = Instant::now();

        let key = ctx.codec.encode(key)?;
        ctx.shared.engine.delete(&ctx.write_options, &key)?;

        ctx.shared.metrics.record_latency("delete", start.elapsed());
        ctx.shared.metrics.increment_throughput();
        Ok(())
    }

    /// Remove `key` only if its current value equals `expected`.
    ///
    /// Returns whether the key was removed. The read and the delete are
    /// separate engine calls: a concurrent writer can change the key between
    /// them, in which case the newer value is deleted.
    fn delete_if<K, V>(&self, key: &K, expected: &V) -> Result<bool>
    where
        K: Serialize + ?Sized,
        V: DeserializeOwned + PartialEq,
    {
        let ctx = self.context()?;
        let key = ctx.codec.encode(key)?;

        let Some(raw) = ctx.shared.engine.get(&ctx.read_options, &key)? else {
            return Ok(false);
        };
        let current: V = ctx.codec.decode(&raw)?;
        if current != *expected {
            return Ok(false);
        }

        ctx.shared.engine.delete(&ctx.write_options, &key)?;
        ctx.shared.metrics.increment_throughput();
        Ok(true)
    }

    /// Remove every key. Returns how many keys were deleted.
    ///
    /// Keys are scanned from a pinned view and deleted in atomic batches of
    /// [`DELETE_ALL_CHUNK`]; the operation as a whole is not atomic, and keys
    /// written after the scan began survive.
    fn delete_all(&self) -> Result<u64> {
        let ctx = self.context()?;
        let start = Instant::now();

        let mut iter = ctx.shared.engine.iter(&ctx.read_options)?;
        iter.seek_to_first()?;

        let mut deleted = 0u64;
        let mut batch = WriteBatch::new();
        while let Some((key, _)) = iter.next_entry()? {
            batch.delete(key);
            if batch.len() >= DELETE_ALL_CHUNK {
                deleted += batch.len() as u64;
                ctx.shared.engine.write(&ctx.write_options, std::mem::take(&mut batch))?;
            }
        }
        if !batch.is_empty() {
            deleted += batch.len() as u64;
            ctx.shared.engine.write(&ctx.write_options, batch)?;
        }

        ctx.shared.metrics.record_latency("delete_all", start.elapsed());
        tracing::info!("Deleted {} keys from {:?}", deleted, ctx.shared.path);
        Ok(deleted)
    }

    /// Force everything written so far to stable storage.
    fn sync(&self) -> Result<()> {
        let ctx = self.context()?;
        ctx.shared
            .engine
            .write(&WriteOptions { sync: true }, WriteBatch::new())?;
        ctx.shared.metrics.increment_syncs();
        Ok(())
    }

    /// Compact the whole key range.
    fn compact(&self) -> Result<()> {
        self.compact_range::<()>(None, None)
    }

    /// Compact `[start, end]`. An omitted side extends to that end of the
    /// keyspace, which covers the store's observed bounds. With a side
    /// omitted, an empty store is left untouched.
    fn compact_range<K>(&self, start: Option<&K>, end: Option<&K>) -> Result<()>
    where
        K: Serialize + ?Sized,
    {
        let ctx = self.context()?;
        let start_key = start.map(|key| ctx.codec.encode(key)).transpose()?;
        let end_key = end.map(|key| ctx.codec.encode(key)).transpose()?;

        if start_key.is_none() || end_key.is_none() {
            let mut iter = ctx.shared.engine.iter(&ctx.read_options)?;
            iter.seek_to_first()?;
            if !iter.has_next() {
                tracing::debug!("Store at {:?} is empty, nothing to compact", ctx.shared.path);
                return Ok(());
            }
        }

        let timer = Instant::now();
        ctx.shared
            .engine
            .compact_range(start_key.as_deref(), end_key.as_deref())?;
        ctx.shared.metrics.record_latency("compact", timer.elapsed());
        tracing::debug!("Compacted {:?} in {:?}", ctx.shared.path, timer.elapsed());
        Ok(())
    }

    /// Approximate number of keys in the store. Not exact.
    fn count(&self) -> Result<u64> {
        let ctx = self.context()?;
        Ok(ctx.shared.engine.approximate_size(None, None)?.entries)
    }

    /// Approximate data held in `[start, end)`.
    fn approximate_size<K>(&self, start: Option<&K>, end: Option<&K>) -> Result<SizeEstimate>
    where
        K: Serialize + ?Sized,
    {
        let ctx = self.context()?;
        let start = start.map(|key| ctx.codec.encode(key)).transpose()?;
        let end = end.map(|key| ctx.codec.encode(key)).transpose()?;
        ctx.shared
            .engine
            .approximate_size(start.as_deref(), end.as_deref())
    }

    /// A new batch using the store's default write options.
    fn batch(&self) -> Result<Batch<Self::Codec>> {
        let ctx = self.context()?;
        Batch::new(Arc::clone(ctx.shared), ctx.write_options, ctx.codec.clone())
    }

    /// A new batch committed with `write_options`.
    fn batch_with(&self, write_options: WriteOptions) -> Result<Batch<Self::Codec>> {
        let ctx = self.context()?;
        Batch::new(Arc::clone(ctx.shared), write_options, ctx.codec.clone())
    }

    /// Run `f` against a fresh batch, committing it when `f` returns `Ok`
    /// and discarding it when `f` returns `Err`.
    fn write_batch<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Batch<Self::Codec>) -> Result<T>,
    {
        let mut batch = self.batch()?;
        match f(&mut batch) {
            Ok(value) => {
                batch.close()?;
                Ok(value)
            }
            Err(e) => {
                batch.discard();
                Err(e)
            }
        }
    }
}

/// Handle to an open store.
///
/// The store owns its engine exclusively. Reads ([`ReadView`]) and writes
/// ([`WriteView`]) encode keys and values with the store's codec, which
/// defaults to the process-wide default fixed by
/// [`codec::init_default`](crate::codec::init_default).
///
/// Snapshots, batches and cursors are not tracked: they must be closed (or
/// dropped) by the caller, and once the store is closed they fail with
/// `UseAfterClose { resource: Store }`.
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
/// store.put("foo", "bar")?;
/// assert_eq!(store.get::<_, String>("foo")?, Some("bar".to_string()));
/// assert_eq!(store.get_or("missing", "default".to_string())?, "default");
///
/// for entry in store.iterator::<String, String>(None, None)? {
///     let (key, value) = entry?;
///     println!("{} = {}", key, value);
/// }
///
/// store.close()?;
/// # Ok(())
/// # }
/// ```
pub struct Store<C: Codec = CodecKind> {
    shared: Arc<StoreShared>,
    codec: C,
}

impl Store {
    /// Open the store at `path` with the process-wide default codec.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - the options fail validation (`ConfigError`)
    /// - the store is missing and `create_if_missing` is off, or exists and
    ///   `error_if_exists` is on (`InvalidArgument`)
    /// - the store is already open in this process (`AlreadyOpen`)
    /// - the journal cannot be read or is corrupt under `paranoid_checks`
    pub fn open(path: impl AsRef<Path>, options: Options) -> Result<Self> {
        Self::open_with_codec(path, options, CodecKind::process_default())
    }

    /// Delete the store at `path`. It must not be open.
    pub fn destroy(path: impl AsRef<Path>, options: Options) -> Result<()> {
        JournalDb::destroy(path, &options.resolve())
    }

    /// Salvage a damaged store at `path`. It must not be open.
    pub fn repair(path: impl AsRef<Path>, options: Options) -> Result<RepairReport> {
        JournalDb::repair(path, &options.resolve())
    }
}

impl<C: Codec> Store<C> {
    /// Open the store at `path`, encoding with `codec`.
    pub fn open_with_codec(path: impl AsRef<Path>, options: Options, codec: C) -> Result<Self> {
        options.validate()?;
        let path = path.as_ref();
        let engine = JournalDb::open(path, options.resolve())?;
        tracing::info!("Opened store at {:?} with {} codec", path, codec.name());
        Ok(Self::from_engine(
            Box::new(engine),
            path,
            options.write_options(),
            codec,
        ))
    }

    /// Wrap an already open engine.
    pub fn from_engine(
        engine: Box<dyn Engine>,
        path: impl Into<PathBuf>,
        write_options: WriteOptions,
        codec: C,
    ) -> Self {
        Self {
            shared: Arc::new(StoreShared {
                engine,
                path: path.into(),
                read_options: ReadOptions::default(),
                write_options,
                metrics: Metrics::new(),
                closed: AtomicBool::new(false),
            }),
            codec,
        }
    }

    /// Close the engine. Idempotent.
    pub fn close(&self) -> Result<()> {
        self.shared.close()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.check_open().is_err()
    }

    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    pub fn codec(&self) -> &C {
        &self.codec
    }

    pub fn metrics(&self) -> &Metrics {
        &self.shared.metrics
    }

    /// Live access to this store through another codec.
    pub fn with_codec<C2: Codec>(&self, codec: C2) -> CodecScope<'_, C2> {
        CodecScope {
            shared: &self.shared,
            codec,
        }
    }

    /// Run `f` with `codec` bound for the duration of the call.
    pub fn using<C2, T, F>(&self, codec: C2, f: F) -> T
    where
        C2: Codec,
        F: FnOnce(&CodecScope<'_, C2>) -> T,
    {
        f(&self.with_codec(codec))
    }
}

impl<C: Codec> private::Sealed for Store<C> {}

impl<C: Codec> ReadView for Store<C> {
    type Codec = C;

    fn context(&self) -> Result<ViewContext<'_, C>> {
        self.shared.check_open()?;
        Ok(ViewContext {
            shared: &self.shared,
            codec: &self.codec,
            read_options: self.shared.read_options,
            write_options: self.shared.write_options,
            pin: None,
        })
    }
}

impl<C: Codec> WriteView for Store<C> {}

impl<C: Codec> fmt::Debug for Store<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("path", &self.shared.path)
            .field("codec", &self.codec.name())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl<C: Codec> Drop for Store<C> {
    fn drop(&mut self) {
        if let Err(e) = self.shared.close() {
            tracing::warn!("Failed to close store at {:?}: {}", self.shared.path, e);
        }
    }
}

/// The live store seen through a different codec.
///
/// Borrowed from a [`Store`]; closing the store closes the scope too.
pub struct CodecScope<'a, C: Codec> {
    shared: &'a Arc<StoreShared>,
    codec: C,
}

impl<C: Codec> CodecScope<'_, C> {
    pub fn codec(&self) -> &C {
        &self.codec
    }
}

impl<C: Codec> private::Sealed for CodecScope<'_, C> {}

impl<C: Codec> ReadView for CodecScope<'_, C> {
    type Codec = C;

    fn context(&self) -> Result<ViewContext<'_, C>> {
        self.shared.check_open()?;
        Ok(ViewContext {
            shared: self.shared,
            codec: &self.codec,
            read_options: self.shared.read_options,
            write_options: self.shared.write_options,
            pin: None,
        })
    }
}

impl<C: Codec> WriteView for CodecScope<'_, C> {}
