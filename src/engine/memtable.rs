use crate::engine::{Comparator, SequenceNumber, SizeEstimate};
use crossbeam_skiplist::map::Entry;
use crossbeam_skiplist::SkipMap;
use std::cmp::Ordering;
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

/// Per-version bookkeeping overhead added to the memory estimate.
const VERSION_OVERHEAD: u64 = 32;

/// A user key tagged with the sequence that wrote it.
///
/// Ordered by user key under the configured comparator, then by sequence
/// descending, so the newest version of a key comes first.
#[derive(Clone)]
pub struct VersionKey {
    pub user_key: Vec<u8>,
    pub sequence: SequenceNumber,
    comparator: Arc<dyn Comparator>,
}

impl VersionKey {
    fn new(user_key: Vec<u8>, sequence: SequenceNumber, comparator: &Arc<dyn Comparator>) -> Self {
        Self {
            user_key,
            sequence,
            comparator: Arc::clone(comparator),
        }
    }
}

impl PartialEq for VersionKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for VersionKey {}

impl PartialOrd for VersionKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for VersionKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.comparator
            .compare(&self.user_key, &other.user_key)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

/// Multi-version in-memory table.
///
/// Every write adds a version; `None` values are tombstones. Readers pick
/// the newest version at or below their snapshot sequence, which is what
/// makes snapshots and atomic batch visibility work.
pub struct Memtable {
    data: SkipMap<VersionKey, Option<Vec<u8>>>,
    comparator: Arc<dyn Comparator>,
    size: AtomicU64,
    superseded: AtomicU64,
}

impl Memtable {
    pub fn new(comparator: Arc<dyn Comparator>) -> Self {
        Self {
            data: SkipMap::new(),
            comparator,
            size: AtomicU64::new(0),
            superseded: AtomicU64::new(0),
        }
    }

    pub fn comparator(&self) -> &Arc<dyn Comparator> {
        &self.comparator
    }

    fn lookup_key(&self, user_key: &[u8], sequence: SequenceNumber) -> VersionKey {
        VersionKey::new(user_key.to_vec(), sequence, &self.comparator)
    }

    fn same_key(&self, a: &[u8], b: &[u8]) -> bool {
        self.comparator.compare(a, b) == Ordering::Equal
    }

    pub fn put(&self, key: Vec<u8>, value: Vec<u8>, seq: SequenceNumber) {
        self.insert(key, Some(value), seq);
    }

    pub fn delete(&self, key: Vec<u8>, seq: SequenceNumber) {
        self.insert(key, None, seq);
    }

    fn insert(&self, key: Vec<u8>, value: Option<Vec<u8>>, seq: SequenceNumber) {
        let entry_size = Self::version_size(&key, value.as_deref());

        // an older version of this key becomes garbage once nothing reads it
        if let Some(previous) = self.data.lower_bound(Bound::Included(&self.lookup_key(&key, SequenceNumber::MAX))) {
            if self.same_key(&previous.key().user_key, &key) {
                self.superseded.fetch_add(entry_size, AtomicOrdering::Relaxed);
            }
        }

        self.data.insert(VersionKey::new(key, seq, &self.comparator), value);
        self.size.fetch_add(entry_size, AtomicOrdering::Relaxed);
    }

    fn version_size(key: &[u8], value: Option<&[u8]>) -> u64 {
        (key.len() + value.map_or(0, |v| v.len())) as u64 + VERSION_OVERHEAD
    }

    /// Newest version of `key` visible at `snapshot`.
    ///
    /// `None` when the key has no visible version, `Some(None)` when the
    /// visible version is a tombstone.
    pub fn get(&self, key: &[u8], snapshot: SequenceNumber) -> Option<Option<Vec<u8>>> {
        let entry = self.data.lower_bound(Bound::Included(&self.lookup_key(key, snapshot)))?;
        if self.same_key(&entry.key().user_key, key) {
            Some(entry.value().clone())
        } else {
            None
        }
    }

    /// First live entry at or after `from` visible at `snapshot`.
    fn seek_visible(
        &self,
        from: Bound<&VersionKey>,
        snapshot: SequenceNumber,
    ) -> Option<(Vec<u8>, Vec<u8>)> {
        let mut entry = self.data.lower_bound(from)?;
        loop {
            let version = entry.key();
            if version.sequence > snapshot {
                entry = self.data.lower_bound(Bound::Excluded(version))?;
                continue;
            }
            match entry.value() {
                Some(value) => return Some((version.user_key.clone(), value.clone())),
                None => {
                    // tombstone hides every older version of this key
                    let last = self.lookup_key(&version.user_key, 0);
                    entry = self.data.lower_bound(Bound::Excluded(&last))?;
                }
            }
        }
    }

    /// First live entry with user key >= `target`.
    pub fn seek(&self, target: &[u8], snapshot: SequenceNumber) -> Option<(Vec<u8>, Vec<u8>)> {
        self.seek_visible(Bound::Included(&self.lookup_key(target, snapshot)), snapshot)
    }

    pub fn first(&self, snapshot: SequenceNumber) -> Option<(Vec<u8>, Vec<u8>)> {
        self.seek_visible(Bound::Unbounded, snapshot)
    }

    /// First live entry with user key strictly after `key`.
    pub fn next_after(&self, key: &[u8], snapshot: SequenceNumber) -> Option<(Vec<u8>, Vec<u8>)> {
        self.seek_visible(Bound::Excluded(&self.lookup_key(key, 0)), snapshot)
    }

    pub fn last(&self, snapshot: SequenceNumber) -> Option<(Vec<u8>, Vec<u8>)> {
        let mut user_key = self.data.back()?.key().user_key.clone();
        loop {
            if let Some(Some(value)) = self.get(&user_key, snapshot) {
                return Some((user_key, value));
            }
            let newest = self.lookup_key(&user_key, SequenceNumber::MAX);
            user_key = self.data.upper_bound(Bound::Excluded(&newest))?.key().user_key.clone();
        }
    }

    /// Latest live state of every key, in order.
    pub fn live_entries(&self, snapshot: SequenceNumber) -> Vec<(Vec<u8>, Vec<u8>)> {
        let mut results = Vec::new();
        let mut current = self.first(snapshot);
        while let Some((key, value)) = current {
            current = self.next_after(&key, snapshot);
            results.push((key, value));
        }
        results
    }

    fn range_versions(
        &self,
        start: Option<&[u8]>,
    ) -> impl Iterator<Item = Entry<'_, VersionKey, Option<Vec<u8>>>> + '_ {
        let lower = match start {
            Some(key) => Bound::Included(self.lookup_key(key, SequenceNumber::MAX)),
            None => Bound::Unbounded,
        };
        self.data.range((lower, Bound::Unbounded))
    }

    fn before_end(&self, key: &[u8], end: Option<&[u8]>, inclusive: bool) -> bool {
        match end {
            None => true,
            Some(end) => match self.comparator.compare(key, end) {
                Ordering::Less => true,
                Ordering::Equal => inclusive,
                Ordering::Greater => false,
            },
        }
    }

    /// Estimate the data held in `[start, end)`.
    ///
    /// `entries` counts distinct keys whose newest version is live. `bytes`
    /// covers every version still in memory, tombstones included.
    pub fn approximate_size(&self, start: Option<&[u8]>, end: Option<&[u8]>) -> SizeEstimate {
        let mut estimate = SizeEstimate::default();
        let mut last_key: Option<Vec<u8>> = None;

        for entry in self.range_versions(start) {
            let version = entry.key();
            if !self.before_end(&version.user_key, end, false) {
                break;
            }
            estimate.bytes += (version.user_key.len() + entry.value().as_ref().map_or(0, |v| v.len())) as u64;
            let is_new_key = match &last_key {
                Some(previous) => !self.same_key(previous, &version.user_key),
                None => true,
            };
            if is_new_key {
                if entry.value().is_some() {
                    estimate.entries += 1;
                }
                last_key = Some(version.user_key.clone());
            }
        }

        estimate
    }

    /// Drop versions in `[start, end]` that no reader at or above
    /// `oldest_snapshot` can observe. Returns the number of versions removed.
    pub fn prune(&self, start: Option<&[u8]>, end: Option<&[u8]>, oldest_snapshot: SequenceNumber) -> usize {
        let mut doomed = Vec::new();
        let mut current_key: Option<Vec<u8>> = None;
        let mut base_seen = false;

        for entry in self.range_versions(start) {
            let version = entry.key();
            if !self.before_end(&version.user_key, end, true) {
                break;
            }
            let is_new_key = match &current_key {
                Some(previous) => !self.same_key(previous, &version.user_key),
                None => true,
            };
            if is_new_key {
                current_key = Some(version.user_key.clone());
                base_seen = false;
            }

            if version.sequence > oldest_snapshot {
                continue;
            }
            if base_seen {
                doomed.push(version.clone());
            } else {
                // newest version every reader agrees on; a tombstone here
                // shadows nothing anyone can still see
                base_seen = true;
                if entry.value().is_none() {
                    doomed.push(version.clone());
                }
            }
        }

        // oldest first, so a tombstone goes only after the versions it hides
        for version in doomed.iter().rev() {
            if let Some(removed) = self.data.remove(version) {
                let size = Self::version_size(&removed.key().user_key, removed.value().as_deref());
                let _ = self.size.fetch_update(AtomicOrdering::Relaxed, AtomicOrdering::Relaxed, |current| {
                    Some(current.saturating_sub(size))
                });
            }
        }
        if start.is_none() && end.is_none() {
            self.superseded.store(0, AtomicOrdering::Relaxed);
        }

        doomed.len()
    }

    /// Number of stored versions, tombstones included.
    pub fn num_versions(&self) -> usize {
        self.data.len()
    }

    pub fn approximate_memory_usage(&self) -> u64 {
        self.size.load(AtomicOrdering::Relaxed)
    }

    /// Bytes written over existing keys since the last full prune.
    pub fn superseded_bytes(&self) -> u64 {
        self.superseded.load(AtomicOrdering::Relaxed)
    }
}
