use crate::checksum::ChecksumAlgorithm;
use crate::engine::journal::{self, JournalRecord, JournalWriter, Recovery, JOURNAL_FILE};
use crate::engine::memtable::Memtable;
use crate::engine::{
    BatchOp, Comparator, Compression, Engine, EngineIterator, EngineOptions, InfoLog, ReadOptions,
    SequenceNumber, SizeEstimate, SnapshotId, WriteBatch, WriteOptions,
};
use crate::error::{Resource, Result, StorageError};
use dashmap::DashSet;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

/// Manifest describing how a store was created.
pub const OPTIONS_FILE: &str = "OPTIONS.json";

const FORMAT_VERSION: u32 = 1;

/// Entries per record when the journal is rewritten.
const REWRITE_CHUNK: usize = 1024;

/// Canonical paths of every store open in this process.
fn open_paths() -> &'static DashSet<PathBuf> {
    static OPEN_PATHS: OnceLock<DashSet<PathBuf>> = OnceLock::new();
    OPEN_PATHS.get_or_init(DashSet::new)
}

fn is_open(path: &Path) -> bool {
    fs::canonicalize(path)
        .map(|canonical| open_paths().contains(&canonical))
        .unwrap_or(false)
}

fn report(info_log: &Option<Arc<dyn InfoLog>>, message: &str) {
    tracing::info!("{}", message);
    if let Some(log) = info_log {
        log.log(message);
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Manifest {
    format_version: u32,
    comparator: String,
    compression: Compression,
    checksum_algorithm: ChecksumAlgorithm,
}

impl Manifest {
    fn for_options(options: &EngineOptions) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            comparator: options.comparator.name().to_string(),
            compression: options.compression,
            checksum_algorithm: options.checksum_algorithm,
        }
    }

    fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    fn check_comparator(&self, options: &EngineOptions) -> Result<()> {
        if self.comparator != options.comparator.name() {
            return Err(StorageError::InvalidArgument(format!(
                "store was created with comparator {}, opened with {}",
                self.comparator,
                options.comparator.name()
            )));
        }
        Ok(())
    }
}

/// What [`JournalDb::repair`] salvaged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RepairReport {
    pub records_recovered: usize,
    pub records_skipped: usize,
    pub live_keys: usize,
}

fn apply_record(memtable: &Memtable, record: JournalRecord) -> SequenceNumber {
    let last = record.last_sequence();
    for (offset, op) in record.ops.into_iter().enumerate() {
        let sequence = record.sequence + offset as u64;
        match op {
            BatchOp::Put { key, value } => memtable.put(key, value, sequence),
            BatchOp::Delete { key } => memtable.delete(key, sequence),
        }
    }
    last
}

struct DbInner {
    path: PathBuf,
    registry_key: PathBuf,
    options: EngineOptions,
    memtable: Memtable,
    writer: Mutex<Option<JournalWriter>>,
    /// Last sequence visible to readers.
    sequence: AtomicU64,
    /// Pinned sequence -> number of holders.
    snapshots: Mutex<BTreeMap<SequenceNumber, usize>>,
    open_iterators: AtomicUsize,
    journal_bytes: AtomicU64,
    closed: AtomicBool,
}

impl DbInner {
    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(StorageError::closed(Resource::Store))
        } else {
            Ok(())
        }
    }

    fn pin(&self) -> SequenceNumber {
        let mut snapshots = self.snapshots.lock();
        let sequence = self.sequence.load(Ordering::Acquire);
        *snapshots.entry(sequence).or_insert(0) += 1;
        sequence
    }

    fn unpin(&self, sequence: SequenceNumber) {
        let mut snapshots = self.snapshots.lock();
        if let Some(holders) = snapshots.get_mut(&sequence) {
            *holders -= 1;
            if *holders == 0 {
                snapshots.remove(&sequence);
            }
        }
    }

    /// Remove versions in `[start, end]` no pinned reader can observe.
    fn prune(&self, start: Option<&[u8]>, end: Option<&[u8]>) -> usize {
        // holding the pin table keeps new snapshots from slipping under the
        // horizon while versions are removed
        let snapshots = self.snapshots.lock();
        let horizon = snapshots
            .keys()
            .next()
            .copied()
            .unwrap_or_else(|| self.sequence.load(Ordering::Acquire));
        self.memtable.prune(start, end, horizon)
    }

    fn stats(&self) -> String {
        format!(
            "path: {}\nsequence: {}\nversions: {}\njournal bytes: {}\nmemory bytes: {}\nsuperseded bytes: {}\nsnapshots: {}\nopen iterators: {}\n",
            self.path.display(),
            self.sequence.load(Ordering::Acquire),
            self.memtable.num_versions(),
            self.journal_bytes.load(Ordering::Relaxed),
            self.memtable.approximate_memory_usage(),
            self.memtable.superseded_bytes(),
            self.snapshots.lock().values().sum::<usize>(),
            self.open_iterators.load(Ordering::Relaxed),
        )
    }
}

/// The bundled journal-backed engine.
///
/// All data lives in a multi-version skiplist; every committed batch is
/// first appended to `data.journal` as one checksummed record, which is
/// replayed on open. [`Engine::compact_range`] prunes superseded versions
/// and rewrites the journal down to the live data.
///
/// A path can be open at most once per process.
pub struct JournalDb {
    inner: Arc<DbInner>,
}

impl JournalDb {
    /// Open (or create) the store in directory `path`.
    ///
    /// # Errors
    ///
    /// - [`StorageError::InvalidArgument`] when the store is missing and
    ///   `create_if_missing` is off, when it exists and `error_if_exists` is
    ///   on, or when it was created with a different comparator
    /// - [`StorageError::AlreadyOpen`] when this process already has it open
    /// - [`StorageError::CorruptedData`] for mid-journal corruption under
    ///   `paranoid_checks`
    pub fn open(path: impl AsRef<Path>, options: EngineOptions) -> Result<Self> {
        let path = path.as_ref();
        let manifest_path = path.join(OPTIONS_FILE);
        let exists = manifest_path.exists();

        if !exists && !options.create_if_missing {
            return Err(StorageError::InvalidArgument(format!(
                "store at {} does not exist (create_if_missing is false)",
                path.display()
            )));
        }
        if exists && options.error_if_exists {
            return Err(StorageError::InvalidArgument(format!(
                "store at {} already exists (error_if_exists is true)",
                path.display()
            )));
        }

        fs::create_dir_all(path)?;
        let registry_key = fs::canonicalize(path)?;
        if !open_paths().insert(registry_key.clone()) {
            return Err(StorageError::AlreadyOpen {
                path: path.to_path_buf(),
            });
        }

        let result = Self::open_registered(path, registry_key.clone(), options, exists);
        if result.is_err() {
            open_paths().remove(&registry_key);
        }
        result
    }

    fn open_registered(
        path: &Path,
        registry_key: PathBuf,
        options: EngineOptions,
        exists: bool,
    ) -> Result<Self> {
        let manifest_path = path.join(OPTIONS_FILE);
        if exists {
            let manifest = Manifest::load(&manifest_path)?;
            manifest.check_comparator(&options)?;
        }
        Manifest::for_options(&options).save(&manifest_path)?;

        let journal_path = path.join(JOURNAL_FILE);
        let recovery = if options.paranoid_checks {
            Recovery::Strict
        } else {
            Recovery::SkipCorrupt
        };
        let replayed = journal::replay(&journal_path, options.block_size, recovery)?;

        if replayed.has_torn_tail() {
            tracing::warn!(
                "Truncating journal {:?} from {} to {} bytes",
                journal_path,
                replayed.file_len,
                replayed.valid_len
            );
            let file = fs::OpenOptions::new().write(true).open(&journal_path)?;
            file.set_len(replayed.valid_len)?;
            file.sync_all()?;
        }

        let memtable = Memtable::new(Arc::clone(&options.comparator));
        let record_count = replayed.records.len();
        let skipped = replayed.skipped;
        let mut sequence: SequenceNumber = 0;
        for record in replayed.records {
            sequence = sequence.max(apply_record(&memtable, record));
        }

        let writer = JournalWriter::open(
            &journal_path,
            options.write_buffer_size,
            options.block_restart_interval,
            options.compression,
            options.checksum_algorithm,
        )?;
        let journal_bytes = writer.offset();

        report(
            &options.info_log,
            &format!(
                "Opened store at {}: {} records replayed, {} skipped, sequence {}",
                path.display(),
                record_count,
                skipped,
                sequence
            ),
        );

        Ok(Self {
            inner: Arc::new(DbInner {
                path: path.to_path_buf(),
                registry_key,
                options,
                memtable,
                writer: Mutex::new(Some(writer)),
                sequence: AtomicU64::new(sequence),
                snapshots: Mutex::new(BTreeMap::new()),
                open_iterators: AtomicUsize::new(0),
                journal_bytes: AtomicU64::new(journal_bytes),
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// Delete the store at `path`. A missing path is not an error.
    pub fn destroy(path: impl AsRef<Path>, options: &EngineOptions) -> Result<()> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(());
        }
        if is_open(path) {
            return Err(StorageError::AlreadyOpen {
                path: path.to_path_buf(),
            });
        }

        let journal_path = path.join(JOURNAL_FILE);
        for file in [
            journal_path.with_extension("journal.tmp"),
            journal_path,
            path.join(OPTIONS_FILE),
        ] {
            if file.exists() {
                fs::remove_file(&file)?;
            }
        }
        // leave the directory alone if anything else lives in it
        if fs::remove_dir(path).is_err() {
            tracing::debug!("Directory {:?} not removed, it is not empty", path);
        }

        report(&options.info_log, &format!("Destroyed store at {}", path.display()));
        Ok(())
    }

    /// Salvage whatever can be read from a damaged store.
    ///
    /// Corrupt records are skipped, a torn tail is dropped and the journal
    /// is rewritten with the surviving live entries.
    pub fn repair(path: impl AsRef<Path>, options: &EngineOptions) -> Result<RepairReport> {
        let path = path.as_ref();
        if !path.is_dir() {
            return Err(StorageError::InvalidArgument(format!(
                "no store to repair at {}",
                path.display()
            )));
        }
        if is_open(path) {
            return Err(StorageError::AlreadyOpen {
                path: path.to_path_buf(),
            });
        }

        // keys are ordered by the comparator the store was created with
        let manifest_path = path.join(OPTIONS_FILE);
        if manifest_path.is_file() {
            Manifest::load(&manifest_path)?.check_comparator(options)?;
        }

        let journal_path = path.join(JOURNAL_FILE);
        let replayed = journal::replay(&journal_path, options.block_size, Recovery::SkipCorrupt)?;

        let memtable = Memtable::new(Arc::clone(&options.comparator));
        let mut report_data = RepairReport {
            records_recovered: replayed.records.len(),
            records_skipped: replayed.skipped,
            live_keys: 0,
        };
        for record in replayed.records {
            apply_record(&memtable, record);
        }

        let live = memtable.live_entries(SequenceNumber::MAX);
        report_data.live_keys = live.len();
        journal::rewrite(
            &journal_path,
            &live,
            REWRITE_CHUNK,
            options.compression,
            options.checksum_algorithm,
        )?;
        Manifest::for_options(options).save(&manifest_path)?;

        report(
            &options.info_log,
            &format!(
                "Repaired store at {}: {} records recovered, {} skipped, {} live keys",
                path.display(),
                report_data.records_recovered,
                report_data.records_skipped,
                report_data.live_keys
            ),
        );
        Ok(report_data)
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn options(&self) -> &EngineOptions {
        &self.inner.options
    }

    fn maybe_prune(&self) {
        let inner = &self.inner;
        if inner.memtable.superseded_bytes() <= inner.options.cache_size as u64 {
            return;
        }
        let removed = inner.prune(None, None);
        tracing::debug!("Pruned {} superseded versions", removed);
    }
}

impl Engine for JournalDb {
    fn get(&self, options: &ReadOptions, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.inner.check_open()?;
        match options.snapshot {
            Some(snapshot) => Ok(self.inner.memtable.get(key, snapshot.sequence()).flatten()),
            None => {
                // pinned so a concurrent prune cannot drop the version being read
                let sequence = self.inner.pin();
                let value = self.inner.memtable.get(key, sequence).flatten();
                self.inner.unpin(sequence);
                Ok(value)
            }
        }
    }

    fn write(&self, options: &WriteOptions, batch: WriteBatch) -> Result<()> {
        self.inner.check_open()?;
        if batch.is_empty() && !options.sync {
            return Ok(());
        }

        let inner = &self.inner;
        let mut guard = inner.writer.lock();
        let writer = guard
            .as_mut()
            .ok_or_else(|| StorageError::closed(Resource::Store))?;

        let first = inner.sequence.load(Ordering::Acquire) + 1;
        if !batch.is_empty() {
            writer.append(first, &batch)?;
        }
        if options.sync {
            writer.sync()?;
        }
        inner.journal_bytes.store(writer.offset(), Ordering::Relaxed);

        if !batch.is_empty() {
            let record = JournalRecord {
                sequence: first,
                ops: batch.into_ops(),
            };
            let last = apply_record(&inner.memtable, record);
            // readers see the batch only once every operation is in place
            inner.sequence.store(last, Ordering::Release);
        }
        drop(guard);

        self.maybe_prune();
        Ok(())
    }

    fn snapshot(&self) -> Result<SnapshotId> {
        self.inner.check_open()?;
        Ok(SnapshotId(self.inner.pin()))
    }

    fn release_snapshot(&self, snapshot: SnapshotId) {
        self.inner.unpin(snapshot.sequence());
    }

    fn iter(&self, options: &ReadOptions) -> Result<Box<dyn EngineIterator>> {
        self.inner.check_open()?;
        let (sequence, implicit) = match options.snapshot {
            Some(snapshot) => (snapshot.sequence(), false),
            None => (self.inner.pin(), true),
        };
        self.inner.open_iterators.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(JournalIterator {
            db: Arc::clone(&self.inner),
            sequence,
            implicit,
            current: None,
        }))
    }

    fn approximate_size(&self, start: Option<&[u8]>, end: Option<&[u8]>) -> Result<SizeEstimate> {
        self.inner.check_open()?;
        Ok(self.inner.memtable.approximate_size(start, end))
    }

    fn property(&self, name: &str) -> Option<String> {
        let inner = &self.inner;
        if inner.closed.load(Ordering::Acquire) {
            return None;
        }
        let value = match name {
            "ordkv.stats" => inner.stats(),
            "ordkv.sequence" => inner.sequence.load(Ordering::Acquire).to_string(),
            "ordkv.num-versions" => inner.memtable.num_versions().to_string(),
            "ordkv.journal-bytes" => inner.journal_bytes.load(Ordering::Relaxed).to_string(),
            "ordkv.snapshots" => inner.snapshots.lock().values().sum::<usize>().to_string(),
            "ordkv.open-iterators" => inner.open_iterators.load(Ordering::Relaxed).to_string(),
            "ordkv.approximate-memory-usage" => inner.memtable.approximate_memory_usage().to_string(),
            "ordkv.options" => format!("{:?}", inner.options),
            _ => return None,
        };
        Some(value)
    }

    fn compact_range(&self, start: Option<&[u8]>, end: Option<&[u8]>) -> Result<()> {
        self.inner.check_open()?;
        let inner = &self.inner;

        let mut guard = inner.writer.lock();
        let writer = guard
            .as_mut()
            .ok_or_else(|| StorageError::closed(Resource::Store))?;
        writer.flush()?;

        let removed = inner.prune(start, end);

        let journal_path = writer.path().to_path_buf();
        let live = inner.memtable.live_entries(inner.sequence.load(Ordering::Acquire));
        let written = journal::rewrite(
            &journal_path,
            &live,
            REWRITE_CHUNK,
            inner.options.compression,
            inner.options.checksum_algorithm,
        )?;
        *guard = Some(JournalWriter::open(
            &journal_path,
            inner.options.write_buffer_size,
            inner.options.block_restart_interval,
            inner.options.compression,
            inner.options.checksum_algorithm,
        )?);
        inner.journal_bytes.store(written, Ordering::Relaxed);

        report(
            &inner.options.info_log,
            &format!(
                "Compacted {}: {} versions pruned, journal rewritten to {} bytes",
                inner.path.display(),
                removed,
                written
            ),
        );
        Ok(())
    }

    fn comparator(&self) -> &Arc<dyn Comparator> {
        &self.inner.options.comparator
    }

    fn close(&self) -> Result<()> {
        let inner = &self.inner;
        if inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let result = match inner.writer.lock().take() {
            Some(mut writer) => writer.sync(),
            None => Ok(()),
        };
        open_paths().remove(&inner.registry_key);

        report(&inner.options.info_log, &format!("Closed store at {}", inner.path.display()));
        result
    }
}

impl Drop for JournalDb {
    fn drop(&mut self) {
        if let Err(e) = Engine::close(self) {
            tracing::warn!("Failed to close store at {:?}: {}", self.inner.path, e);
        }
    }
}

/// Iterator over the entries visible at one sequence.
struct JournalIterator {
    db: Arc<DbInner>,
    sequence: SequenceNumber,
    /// Pinned by the iterator itself and released on drop.
    implicit: bool,
    current: Option<(Vec<u8>, Vec<u8>)>,
}

impl EngineIterator for JournalIterator {
    fn seek(&mut self, target: &[u8]) -> Result<()> {
        self.db.check_open()?;
        self.current = self.db.memtable.seek(target, self.sequence);
        Ok(())
    }

    fn seek_to_first(&mut self) -> Result<()> {
        self.db.check_open()?;
        self.current = self.db.memtable.first(self.sequence);
        Ok(())
    }

    fn seek_to_last(&mut self) -> Result<()> {
        self.db.check_open()?;
        self.current = self.db.memtable.last(self.sequence);
        Ok(())
    }

    fn has_next(&self) -> bool {
        self.current.is_some()
    }

    fn peek_next(&self) -> Option<(&[u8], &[u8])> {
        self.current
            .as_ref()
            .map(|(key, value)| (key.as_slice(), value.as_slice()))
    }

    fn next_entry(&mut self) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        self.db.check_open()?;
        let Some((key, value)) = self.current.take() else {
            return Ok(None);
        };
        self.current = self.db.memtable.next_after(&key, self.sequence);
        Ok(Some((key, value)))
    }
}

impl Drop for JournalIterator {
    fn drop(&mut self) {
        self.db.open_iterators.fetch_sub(1, Ordering::Relaxed);
        if self.implicit {
            self.db.unpin(self.sequence);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::BytewiseComparator;
    use std::cmp::Ordering as CmpOrdering;
    use tempfile::TempDir;

    fn test_options() -> EngineOptions {
        EngineOptions {
            create_if_missing: true,
            ..EngineOptions::default()
        }
    }

    fn create_test_db() -> (JournalDb, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db = JournalDb::open(temp_dir.path().join("db"), test_options()).unwrap();
        (db, temp_dir)
    }

    fn put(db: &JournalDb, key: &str, value: &str) {
        db.put(&WriteOptions::default(), key.as_bytes(), value.as_bytes())
            .unwrap();
    }

    fn get(db: &JournalDb, key: &str) -> Option<Vec<u8>> {
        db.get(&ReadOptions::default(), key.as_bytes()).unwrap()
    }

    fn collect(iter: &mut dyn EngineIterator) -> Vec<Vec<u8>> {
        let mut keys = Vec::new();
        while let Some((key, _)) = iter.next_entry().unwrap() {
            keys.push(key);
        }
        keys
    }

    #[test]
    fn test_put_get_delete() {
        let (db, _temp_dir) = create_test_db();

        put(&db, "key1", "value1");
        assert_eq!(get(&db, "key1"), Some(b"value1".to_vec()));

        db.delete(&WriteOptions::default(), b"key1").unwrap();
        assert_eq!(get(&db, "key1"), None);
        assert_eq!(get(&db, "missing"), None);
    }

    #[test]
    fn test_reopen_replays_journal() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("db");
        {
            let db = JournalDb::open(&path, test_options()).unwrap();
            put(&db, "a", "1");
            put(&db, "b", "2");
            db.delete(&WriteOptions { sync: true }, b"a").unwrap();
            db.close().unwrap();
        }

        let db = JournalDb::open(&path, test_options()).unwrap();
        assert_eq!(get(&db, "a"), None);
        assert_eq!(get(&db, "b"), Some(b"2".to_vec()));
        assert_eq!(db.property("ordkv.sequence").as_deref(), Some("3"));
    }

    #[test]
    fn test_open_flags() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("db");

        let strict = EngineOptions::default();
        let err = JournalDb::open(&path, strict).err().unwrap();
        assert!(matches!(err, StorageError::InvalidArgument(_)));
        assert!(!path.exists());

        drop(JournalDb::open(&path, test_options()).unwrap());

        let exclusive = EngineOptions {
            error_if_exists: true,
            ..test_options()
        };
        let err = JournalDb::open(&path, exclusive).err().unwrap();
        assert!(matches!(err, StorageError::InvalidArgument(_)));
    }

    #[test]
    fn test_second_open_is_refused() {
        let (db, temp_dir) = create_test_db();
        let err = JournalDb::open(temp_dir.path().join("db"), test_options())
            .err()
            .unwrap();
        assert!(matches!(err, StorageError::AlreadyOpen { .. }));

        db.close().unwrap();
        assert!(JournalDb::open(temp_dir.path().join("db"), test_options()).is_ok());
    }

    #[test]
    fn test_comparator_mismatch() {
        struct Reverse;
        impl Comparator for Reverse {
            fn name(&self) -> &str {
                "test.Reverse"
            }
            fn compare(&self, a: &[u8], b: &[u8]) -> CmpOrdering {
                b.cmp(a)
            }
        }

        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("db");
        drop(JournalDb::open(&path, test_options()).unwrap());

        let options = EngineOptions {
            comparator: Arc::new(Reverse),
            ..test_options()
        };
        let err = JournalDb::open(&path, options).err().unwrap();
        assert!(matches!(err, StorageError::InvalidArgument(ref msg) if msg.contains("test.Reverse")));

        // the failed open must not leave the path registered
        assert!(JournalDb::open(&path, test_options()).is_ok());
    }

    #[test]
    fn test_repair_keeps_creation_comparator() {
        struct Reverse;
        impl Comparator for Reverse {
            fn name(&self) -> &str {
                "test.Reverse"
            }
            fn compare(&self, a: &[u8], b: &[u8]) -> CmpOrdering {
                b.cmp(a)
            }
        }
        let reverse = || EngineOptions {
            comparator: Arc::new(Reverse),
            ..test_options()
        };

        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("db");
        {
            let db = JournalDb::open(&path, reverse()).unwrap();
            put(&db, "a", "1");
            put(&db, "b", "2");
        }

        let err = JournalDb::repair(&path, &test_options()).unwrap_err();
        assert!(matches!(err, StorageError::InvalidArgument(ref msg) if msg.contains("test.Reverse")));

        // the refused repair left the manifest alone
        assert!(JournalDb::open(&path, test_options()).is_err());
        let report = JournalDb::repair(&path, &reverse()).unwrap();
        assert_eq!(report.live_keys, 2);

        let db = JournalDb::open(&path, reverse()).unwrap();
        let mut iter = db.iter(&ReadOptions::default()).unwrap();
        iter.seek_to_first().unwrap();
        assert_eq!(collect(iter.as_mut()), vec![b"b".to_vec(), b"a".to_vec()]);
    }

    #[test]
    fn test_snapshot_isolation() {
        let (db, _temp_dir) = create_test_db();
        put(&db, "k", "old");

        let snapshot = db.snapshot().unwrap();
        put(&db, "k", "new");
        put(&db, "other", "x");

        let pinned = ReadOptions {
            snapshot: Some(snapshot),
        };
        assert_eq!(db.get(&pinned, b"k").unwrap(), Some(b"old".to_vec()));
        assert_eq!(db.get(&pinned, b"other").unwrap(), None);
        assert_eq!(get(&db, "k"), Some(b"new".to_vec()));

        let mut iter = db.iter(&pinned).unwrap();
        iter.seek_to_first().unwrap();
        assert_eq!(collect(iter.as_mut()), vec![b"k".to_vec()]);

        assert_eq!(db.property("ordkv.snapshots").as_deref(), Some("1"));
        db.release_snapshot(snapshot);
        assert_eq!(db.property("ordkv.snapshots").as_deref(), Some("0"));
    }

    #[test]
    fn test_iterator_pins_creation_state() {
        let (db, _temp_dir) = create_test_db();
        put(&db, "a", "1");
        put(&db, "c", "3");

        let mut iter = db.iter(&ReadOptions::default()).unwrap();
        put(&db, "b", "2");

        iter.seek(b"a").unwrap();
        assert_eq!(iter.peek_next().map(|(k, _)| k.to_vec()), Some(b"a".to_vec()));
        assert_eq!(collect(iter.as_mut()), vec![b"a".to_vec(), b"c".to_vec()]);
        assert!(!iter.has_next());

        assert_eq!(db.property("ordkv.open-iterators").as_deref(), Some("1"));
        drop(iter);
        assert_eq!(db.property("ordkv.open-iterators").as_deref(), Some("0"));
        assert_eq!(db.property("ordkv.snapshots").as_deref(), Some("0"));
    }

    #[test]
    fn test_seek_to_last() {
        let (db, _temp_dir) = create_test_db();
        let mut iter = db.iter(&ReadOptions::default()).unwrap();
        iter.seek_to_last().unwrap();
        assert!(!iter.has_next());
        drop(iter);

        put(&db, "a", "1");
        put(&db, "z", "26");
        let mut iter = db.iter(&ReadOptions::default()).unwrap();
        iter.seek_to_last().unwrap();
        assert_eq!(iter.next_entry().unwrap(), Some((b"z".to_vec(), b"26".to_vec())));
        assert_eq!(iter.next_entry().unwrap(), None);
    }

    #[test]
    fn test_closed_engine_rejects_operations() {
        let (db, _temp_dir) = create_test_db();
        put(&db, "a", "1");
        let mut iter = db.iter(&ReadOptions::default()).unwrap();
        iter.seek_to_first().unwrap();

        db.close().unwrap();
        db.close().unwrap();

        assert!(db.get(&ReadOptions::default(), b"a").unwrap_err().is_use_after_close());
        assert!(iter.next_entry().unwrap_err().is_use_after_close());
        assert!(db.property("ordkv.stats").is_none());
    }

    #[test]
    fn test_batch_is_one_record() {
        let (db, temp_dir) = create_test_db();
        let mut batch = WriteBatch::new();
        batch.put(b"x".to_vec(), b"1".to_vec());
        batch.put(b"y".to_vec(), b"2".to_vec());
        batch.delete(b"x".to_vec());
        db.write(&WriteOptions { sync: true }, batch).unwrap();

        assert_eq!(get(&db, "x"), None);
        assert_eq!(get(&db, "y"), Some(b"2".to_vec()));

        let replayed = journal::replay(
            &temp_dir.path().join("db").join(JOURNAL_FILE),
            4096,
            Recovery::Strict,
        )
        .unwrap();
        assert_eq!(replayed.records.len(), 1);
        assert_eq!(replayed.records[0].ops.len(), 3);
    }

    #[test]
    fn test_torn_tail_is_truncated_on_open() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("db");
        let journal_path = path.join(JOURNAL_FILE);
        {
            let db = JournalDb::open(&path, test_options()).unwrap();
            put(&db, "a", "1");
            db.close().unwrap();
        }
        let good_len = fs::metadata(&journal_path).unwrap().len();
        let mut contents = fs::read(&journal_path).unwrap();
        contents.extend_from_slice(&[7u8; 11]);
        fs::write(&journal_path, &contents).unwrap();

        let db = JournalDb::open(&path, test_options()).unwrap();
        assert_eq!(get(&db, "a"), Some(b"1".to_vec()));
        assert_eq!(fs::metadata(&journal_path).unwrap().len(), good_len);
    }

    #[test]
    fn test_paranoid_checks_reject_corruption() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("db");
        let journal_path = path.join(JOURNAL_FILE);
        {
            let db = JournalDb::open(&path, test_options()).unwrap();
            put(&db, "a", "1");
            put(&db, "b", "2");
            db.close().unwrap();
        }
        let mut contents = fs::read(&journal_path).unwrap();
        contents[journal::HEADER_SIZE + 1] ^= 0xFF;
        fs::write(&journal_path, &contents).unwrap();

        let paranoid = EngineOptions {
            paranoid_checks: true,
            ..test_options()
        };
        let err = JournalDb::open(&path, paranoid).err().unwrap();
        assert!(matches!(err, StorageError::CorruptedData { .. }));

        let db = JournalDb::open(&path, test_options()).unwrap();
        assert_eq!(get(&db, "a"), None);
        assert_eq!(get(&db, "b"), Some(b"2".to_vec()));
    }

    #[test]
    fn test_compact_rewrites_journal() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("db");
        let journal_path = path.join(JOURNAL_FILE);
        {
            let db = JournalDb::open(&path, test_options()).unwrap();
            for round in 0..20 {
                for key in 0..10 {
                    put(&db, &format!("key{}", key), &format!("value{}", round));
                }
            }
            db.delete(&WriteOptions::default(), b"key0").unwrap();
            let before = fs::metadata(&journal_path).unwrap().len();

            db.compact_range(None, None).unwrap();
            let after = fs::metadata(&journal_path).unwrap().len();
            assert!(after < before);
            assert_eq!(db.property("ordkv.num-versions").as_deref(), Some("9"));

            put(&db, "key0", "back");
            db.close().unwrap();
        }

        let db = JournalDb::open(&path, test_options()).unwrap();
        assert_eq!(get(&db, "key0"), Some(b"back".to_vec()));
        assert_eq!(get(&db, "key5"), Some(b"value19".to_vec()));
    }

    #[test]
    fn test_compact_keeps_snapshot_versions() {
        let (db, _temp_dir) = create_test_db();
        put(&db, "k", "v1");
        let snapshot = db.snapshot().unwrap();
        put(&db, "k", "v2");

        db.compact_range(None, None).unwrap();
        let pinned = ReadOptions {
            snapshot: Some(snapshot),
        };
        assert_eq!(db.get(&pinned, b"k").unwrap(), Some(b"v1".to_vec()));
        db.release_snapshot(snapshot);
    }

    #[test]
    fn test_superseded_versions_are_pruned() {
        let temp_dir = TempDir::new().unwrap();
        let options = EngineOptions {
            cache_size: 256,
            ..test_options()
        };
        let db = JournalDb::open(temp_dir.path().join("db"), options).unwrap();
        for round in 0..100 {
            put(&db, "hot", &format!("value{}", round));
        }
        let versions: usize = db.property("ordkv.num-versions").unwrap().parse().unwrap();
        assert!(versions < 100);
        assert_eq!(get(&db, "hot"), Some(b"value99".to_vec()));
    }

    #[test]
    fn test_destroy_and_repair() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("db");
        let options = test_options();
        {
            let db = JournalDb::open(&path, options.clone()).unwrap();
            put(&db, "a", "1");
            put(&db, "b", "2");
            assert!(matches!(
                JournalDb::destroy(&path, &options),
                Err(StorageError::AlreadyOpen { .. })
            ));
            db.close().unwrap();
        }

        let journal_path = path.join(JOURNAL_FILE);
        let mut contents = fs::read(&journal_path).unwrap();
        contents[journal::HEADER_SIZE + 1] ^= 0xFF;
        fs::write(&journal_path, &contents).unwrap();

        let report = JournalDb::repair(&path, &options).unwrap();
        assert_eq!(report.records_skipped, 1);
        assert_eq!(report.live_keys, 1);

        let paranoid = EngineOptions {
            paranoid_checks: true,
            ..options.clone()
        };
        let db = JournalDb::open(&path, paranoid).unwrap();
        assert_eq!(get(&db, "b"), Some(b"2".to_vec()));
        db.close().unwrap();

        JournalDb::destroy(&path, &options).unwrap();
        assert!(!path.exists());
        JournalDb::destroy(&path, &options).unwrap();
    }

    #[test]
    fn test_properties() {
        let (db, _temp_dir) = create_test_db();
        put(&db, "a", "1");

        assert!(db.property("ordkv.stats").unwrap().contains("sequence: 1"));
        assert!(db.property("ordkv.options").unwrap().contains("ordkv.BytewiseComparator"));
        assert!(db.property("ordkv.journal-bytes").unwrap().parse::<u64>().is_ok());
        assert!(db.property("ordkv.approximate-memory-usage").is_some());
        assert!(db.property("leveldb.stats").is_none());
        assert_eq!(db.comparator().name(), BytewiseComparator.name());
    }

    #[test]
    fn test_info_log_receives_diagnostics() {
        let lines = Arc::new(Mutex::new(Vec::<String>::new()));
        let sink = {
            let lines = Arc::clone(&lines);
            move |msg: &str| lines.lock().push(msg.to_string())
        };
        let temp_dir = TempDir::new().unwrap();
        let options = EngineOptions {
            info_log: Some(Arc::new(sink)),
            ..test_options()
        };
        let db = JournalDb::open(temp_dir.path().join("db"), options).unwrap();
        db.close().unwrap();

        let lines = lines.lock();
        assert!(lines[0].starts_with("Opened store"));
        assert!(lines[1].starts_with("Closed store"));
    }
}
