//! Lazy, self-closing iteration over a key range.

use crate::codec::{Codec, CodecKind};
use crate::engine::{EngineIterator, ReadOptions};
use crate::error::{Resource, Result, StorageError};
use crate::store::StoreShared;
use crate::view::SnapshotPin;
use serde::de::DeserializeOwned;
use std::cmp::Ordering;
use std::fmt;
use std::marker::PhantomData;
use std::ops::Bound;
use std::sync::Arc;

/// Lifecycle of a [`Cursor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorState {
    /// More entries may follow.
    Open,
    /// The range ended and the engine iterator was released.
    Exhausted,
    /// Closed by the caller before the range ended.
    Closed,
}

/// Single-pass sequence of decoded `(key, value)` pairs.
///
/// Entries come in ascending comparator order, starting at the first key
/// `>= start` and stopping at the end bound. The engine iterator is released
/// exactly once: as soon as the last in-range entry has been handed out, on
/// [`Cursor::close`], or on drop, whichever comes first.
///
/// An empty range produces a cursor that is already [`CursorState::Exhausted`].
///
/// A cursor opened on a [`Snapshot`](crate::Snapshot) holds the snapshot's
/// pin until the iterator is released, so dropping the snapshot handle early
/// is fine. Closing the snapshot explicitly makes further reads fail with
/// `UseAfterClose { resource: Snapshot }`.
pub struct Cursor<K, V, C: Codec = CodecKind> {
    store: Arc<StoreShared>,
    iter: Option<Box<dyn EngineIterator>>,
    // declared after `iter` so the pin outlives the iterator
    pin: Option<Arc<SnapshotPin>>,
    end: Bound<Vec<u8>>,
    codec: C,
    state: CursorState,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K, V, C: Codec> Cursor<K, V, C> {
    pub(crate) fn open(
        store: Arc<StoreShared>,
        read_options: &ReadOptions,
        codec: C,
        pin: Option<Arc<SnapshotPin>>,
        start: Option<Vec<u8>>,
        end: Bound<Vec<u8>>,
    ) -> Result<Self> {
        store.check_open()?;
        let mut iter = store.engine.iter(read_options)?;
        store.metrics.cursor_opened();

        let positioned = match &start {
            Some(start) => iter.seek(start),
            None => iter.seek_to_first(),
        };

        let mut cursor = Self {
            store,
            iter: Some(iter),
            pin,
            end,
            codec,
            state: CursorState::Open,
            _marker: PhantomData,
        };
        // a failed seek still releases the iterator through Drop
        positioned?;
        cursor.settle();
        Ok(cursor)
    }

    fn check_pin(&self) -> Result<()> {
        match &self.pin {
            Some(pin) if pin.is_released() => Err(StorageError::closed(Resource::Snapshot)),
            _ => self.store.check_open(),
        }
    }

    fn within_end(&self, key: &[u8]) -> bool {
        let comparator = self.store.engine.comparator();
        match &self.end {
            Bound::Unbounded => true,
            Bound::Included(end) => comparator.compare(key, end) != Ordering::Greater,
            Bound::Excluded(end) => comparator.compare(key, end) == Ordering::Less,
        }
    }

    /// Release the iterator early when nothing in range is left.
    fn settle(&mut self) {
        let more = match &self.iter {
            Some(iter) => match iter.peek_next() {
                Some((key, _)) => self.within_end(key),
                None => false,
            },
            None => false,
        };
        if !more {
            self.release(CursorState::Exhausted);
        }
    }

    fn release(&mut self, state: CursorState) {
        if let Some(iter) = self.iter.take() {
            drop(iter);
            self.pin = None;
            self.store.metrics.cursor_released();
            tracing::trace!("Cursor released ({:?})", state);
        }
        if self.state == CursorState::Open {
            self.state = state;
        }
    }

    /// True when another entry is available.
    ///
    /// # Errors
    ///
    /// `UseAfterClose` when the cursor was closed by the caller.
    pub fn has_next(&self) -> Result<bool> {
        match self.state {
            CursorState::Closed => Err(StorageError::closed(Resource::Cursor)),
            CursorState::Exhausted => Ok(false),
            CursorState::Open => {
                self.check_pin()?;
                Ok(self.iter.as_ref().map_or(false, |iter| iter.has_next()))
            }
        }
    }

    pub fn state(&self) -> CursorState {
        self.state
    }

    /// True once the engine iterator has been released.
    pub fn is_closed(&self) -> bool {
        self.state != CursorState::Open
    }

    /// Release the engine iterator. Further reads fail with `UseAfterClose`.
    pub fn close(&mut self) {
        self.release(CursorState::Closed);
        self.state = CursorState::Closed;
    }
}

impl<K, V, C> Cursor<K, V, C>
where
    K: DeserializeOwned,
    V: DeserializeOwned,
    C: Codec,
{
    /// Decode and return the next entry, `None` at the end of the range.
    pub fn try_next(&mut self) -> Result<Option<(K, V)>> {
        match self.state {
            CursorState::Closed => return Err(StorageError::closed(Resource::Cursor)),
            CursorState::Exhausted => return Ok(None),
            CursorState::Open => self.check_pin()?,
        }

        let entry = match self.iter.as_mut() {
            Some(iter) => iter.next_entry()?,
            None => None,
        };
        let Some((key, value)) = entry else {
            self.release(CursorState::Exhausted);
            return Ok(None);
        };
        self.settle();

        let key = self.codec.decode(&key)?;
        let value = self.codec.decode(&value)?;
        Ok(Some((key, value)))
    }

    /// Drain the remaining entries. The cursor is closed afterwards, also
    /// when decoding fails part way.
    pub fn collect_all(&mut self) -> Result<Vec<(K, V)>> {
        let mut entries = Vec::new();
        let result = loop {
            match self.try_next() {
                Ok(Some(entry)) => entries.push(entry),
                Ok(None) => break Ok(entries),
                Err(e) => break Err(e),
            }
        };
        self.release(CursorState::Closed);
        result
    }
}

impl<K, V, C> Iterator for Cursor<K, V, C>
where
    K: DeserializeOwned,
    V: DeserializeOwned,
    C: Codec,
{
    type Item = Result<(K, V)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.state == CursorState::Closed {
            return None;
        }
        match self.try_next() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => None,
            Err(e) => {
                self.close();
                Some(Err(e))
            }
        }
    }
}

impl<K, V, C: Codec> std::iter::FusedIterator for Cursor<K, V, C>
where
    K: DeserializeOwned,
    V: DeserializeOwned,
{
}

impl<K, V, C: Codec> fmt::Debug for Cursor<K, V, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cursor")
            .field("state", &self.state)
            .field("codec", &self.codec.name())
            .field("end", &self.end)
            .finish()
    }
}

impl<K, V, C: Codec> Drop for Cursor<K, V, C> {
    fn drop(&mut self) {
        self.release(CursorState::Closed);
    }
}
