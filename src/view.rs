//! Read access shared by the live store and its snapshots.
//!
//! [`ReadView`] is implemented by [`Store`](crate::Store) (live reads),
//! [`CodecScope`](crate::CodecScope) (live reads through another codec) and
//! [`Snapshot`] (reads pinned at a point in time). All lookups go through
//! the view's codec: keys are encoded before they reach the engine and
//! values are decoded on the way out.

use crate::codec::{Codec, CodecKind};
use crate::cursor::Cursor;
use crate::engine::{ReadOptions, SnapshotId, WriteOptions};
use crate::error::{Resource, Result, StorageError};
use crate::store::StoreShared;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

pub(crate) mod private {
    pub trait Sealed {}
}

/// Everything a view operation needs, resolved once per call.
#[doc(hidden)]
pub struct ViewContext<'a, C> {
    pub(crate) shared: &'a Arc<StoreShared>,
    pub(crate) codec: &'a C,
    pub(crate) read_options: ReadOptions,
    pub(crate) write_options: WriteOptions,
    pub(crate) pin: Option<&'a Arc<SnapshotPin>>,
}

fn encode_bound<C: Codec, K: Serialize + ?Sized>(codec: &C, bound: Bound<&K>) -> Result<Bound<Vec<u8>>> {
    Ok(match bound {
        Bound::Included(key) => Bound::Included(codec.encode(key)?),
        Bound::Excluded(key) => Bound::Excluded(codec.encode(key)?),
        Bound::Unbounded => Bound::Unbounded,
    })
}

/// Point lookups, range iteration, bounds and statistics.
///
/// This trait is sealed; it is implemented only by the handles in this
/// crate.
pub trait ReadView: private::Sealed {
    /// The codec applied to keys and values.
    type Codec: Codec;

    #[doc(hidden)]
    fn context(&self) -> Result<ViewContext<'_, Self::Codec>>;

    /// Look up `key`. A missing key is `Ok(None)`, never an error.
    ///
    /// # Errors
    ///
    /// - `UseAfterClose` when the view or its store is closed
    /// - `Decode` when the stored value is not a `V` under this codec
    fn get<K, V>(&self, key: &K) -> Result<Option<V>>
    where
        K: Serialize + ?Sized,
        V: DeserializeOwned,
    {
        let ctx = self.context()?;
        let start = Instant::now();

        let key = ctx.codec.encode(key)?;
        let raw = ctx.shared.engine.get(&ctx.read_options, &key)?;
        ctx.shared.metrics.record_latency("get", start.elapsed());

        raw.map(|bytes| ctx.codec.decode(&bytes)).transpose()
    }

    /// Look up `key`, falling back to `default` when it is absent.
    fn get_or<K, V>(&self, key: &K, default: V) -> Result<V>
    where
        K: Serialize + ?Sized,
        V: DeserializeOwned,
    {
        Ok(self.get(key)?.unwrap_or(default))
    }

    /// Cursor over `[start, end]`. Omitted bounds leave that side open.
    fn iterator<K, V>(&self, start: Option<&K>, end: Option<&K>) -> Result<Cursor<K, V, Self::Codec>>
    where
        K: Serialize + DeserializeOwned,
        V: DeserializeOwned,
    {
        let end = match end {
            Some(end) => Bound::Included(end),
            None => Bound::Unbounded,
        };
        self.range(start, end)
    }

    /// Cursor starting at the first key `>= start` and stopping at `end`.
    fn range<K, V>(&self, start: Option<&K>, end: Bound<&K>) -> Result<Cursor<K, V, Self::Codec>>
    where
        K: Serialize + DeserializeOwned,
        V: DeserializeOwned,
    {
        let ctx = self.context()?;
        let start = start.map(|key| ctx.codec.encode(key)).transpose()?;
        let end = encode_bound(ctx.codec, end)?;
        Cursor::open(
            Arc::clone(ctx.shared),
            &ctx.read_options,
            ctx.codec.clone(),
            ctx.pin.cloned(),
            start,
            end,
        )
    }

    /// Smallest and largest key in the view, `None` when it is empty.
    fn bounds<K>(&self) -> Result<Option<(K, K)>>
    where
        K: DeserializeOwned,
    {
        let ctx = self.context()?;
        let mut iter = ctx.shared.engine.iter(&ctx.read_options)?;

        iter.seek_to_first()?;
        let Some(first) = iter.peek_next().map(|(key, _)| key.to_vec()) else {
            return Ok(None);
        };
        iter.seek_to_last()?;
        let last = match iter.peek_next() {
            Some((key, _)) => key.to_vec(),
            None => first.clone(),
        };

        Ok(Some((ctx.codec.decode(&first)?, ctx.codec.decode(&last)?)))
    }

    /// Engine-reported diagnostic property; `None` for unknown names.
    fn stats(&self, property: &str) -> Result<Option<String>> {
        let ctx = self.context()?;
        Ok(ctx.shared.engine.property(property))
    }

    /// A point-in-time view.
    ///
    /// On a store this pins the current state. On a snapshot it returns a
    /// handle to the same pin.
    fn snapshot(&self) -> Result<Snapshot<Self::Codec>> {
        let ctx = self.context()?;
        let pin = match ctx.pin {
            Some(pin) => Arc::clone(pin),
            None => Arc::new(SnapshotPin::acquire(Arc::clone(ctx.shared))?),
        };
        Ok(Snapshot {
            pin,
            codec: ctx.codec.clone(),
        })
    }
}

/// Engine snapshot shared by every [`Snapshot`] handle cut from it.
pub(crate) struct SnapshotPin {
    shared: Arc<StoreShared>,
    id: SnapshotId,
    released: AtomicBool,
}

impl SnapshotPin {
    fn acquire(shared: Arc<StoreShared>) -> Result<Self> {
        shared.check_open()?;
        let id = shared.engine.snapshot()?;
        shared.metrics.snapshot_opened();
        tracing::debug!("Snapshot pinned at sequence {}", id.sequence());
        Ok(Self {
            shared,
            id,
            released: AtomicBool::new(false),
        })
    }

    fn release(&self) {
        if !self.released.swap(true, Ordering::AcqRel) {
            self.shared.engine.release_snapshot(self.id);
            self.shared.metrics.snapshot_released();
            tracing::debug!("Snapshot at sequence {} released", self.id.sequence());
        }
    }

    pub(crate) fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }
}

impl Drop for SnapshotPin {
    fn drop(&mut self) {
        self.release();
    }
}

/// Read-only view of the store frozen at creation.
///
/// Writes made after the snapshot was taken are invisible through it.
/// Handles returned by [`ReadView::snapshot`] on a snapshot share its pin,
/// so closing any of them closes all. The engine snapshot is released on
/// [`Snapshot::close`] or when the last handle is dropped.
///
/// Snapshots are not tracked by the store: once the store is closed, reads
/// through a snapshot fail with `UseAfterClose { resource: Store }`.
pub struct Snapshot<C: Codec = CodecKind> {
    pin: Arc<SnapshotPin>,
    codec: C,
}

impl<C: Codec> Snapshot<C> {
    /// Release the engine snapshot. Idempotent.
    pub fn close(&self) {
        self.pin.release();
    }

    pub fn is_closed(&self) -> bool {
        self.pin.is_released()
    }

    /// Engine sequence the snapshot is pinned at.
    pub fn sequence(&self) -> u64 {
        self.pin.id.sequence()
    }

    /// The same pinned view, read through another codec.
    pub fn with_codec<C2: Codec>(&self, codec: C2) -> Snapshot<C2> {
        Snapshot {
            pin: Arc::clone(&self.pin),
            codec,
        }
    }
}

impl<C: Codec> private::Sealed for Snapshot<C> {}

impl<C: Codec> ReadView for Snapshot<C> {
    type Codec = C;

    fn context(&self) -> Result<ViewContext<'_, C>> {
        if self.pin.is_released() {
            return Err(StorageError::closed(Resource::Snapshot));
        }
        self.pin.shared.check_open()?;
        Ok(ViewContext {
            shared: &self.pin.shared,
            codec: &self.codec,
            read_options: ReadOptions {
                snapshot: Some(self.pin.id),
            },
            write_options: WriteOptions::default(),
            pin: Some(&self.pin),
        })
    }
}

impl<C: Codec> fmt::Debug for Snapshot<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Snapshot")
            .field("sequence", &self.sequence())
            .field("closed", &self.is_closed())
            .field("codec", &self.codec.name())
            .finish()
    }
}
