use crate::checksum::ChecksumAlgorithm;
use crate::engine::{Comparator, Compression, EngineOptions, InfoLog, WriteOptions};
use crate::error::{Result, StorageError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

const KIB: usize = 1024;
const MIB: usize = 1024 * KIB;

/// Configuration record accepted by [`Store::open`](crate::Store::open).
///
/// Every field has a default, so a partial JSON document (or `{}`) is a
/// valid options file. Unknown JSON fields are ignored. The comparator and
/// logger cannot be expressed in JSON and are only set through the builder
/// methods.
///
/// [`resolve`](Options::resolve) never fails: it maps whatever is set onto
/// the engine's structure. [`Store::open`](crate::Store::open) runs
/// [`validate`](Options::validate) first and rejects out-of-range sizes with
/// `ConfigError` before touching the directory.
///
/// # Example
///
/// ```
/// use ordkv::Options;
///
/// let options = Options::default()
///     .with_write_buffer_size(8 * 1024 * 1024)
///     .with_compress(false)
///     .with_paranoid_checks(true);
///
/// assert!(options.validate().is_ok());
/// let engine = options.resolve();
/// assert!(engine.paranoid_checks);
/// ```
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Create the store when the directory holds none (default: true).
    pub create_if_missing: bool,

    /// Refuse to open a store that already exists (default: false).
    pub error_if_exists: bool,

    /// Journal writer buffer in bytes (default: 32MB).
    ///
    /// Valid range: 4KB - 1GB.
    pub write_buffer_size: usize,

    /// Read buffer used while replaying the journal (default: 16KB).
    ///
    /// Valid range: 512B - 64MB.
    pub block_size: usize,

    /// Records appended between forced writer flushes. Engine default when unset.
    pub block_restart_interval: Option<usize>,

    /// File handle budget. Engine default when unset.
    pub max_open_files: Option<usize>,

    /// Superseded bytes kept in memory before old versions are pruned (default: 32MB).
    pub cache_size: usize,

    /// Custom key order. Bytewise when unset.
    #[serde(skip)]
    pub comparator: Option<Arc<dyn Comparator>>,

    /// Fail on mid-journal corruption instead of skipping the record (default: false).
    pub paranoid_checks: bool,

    /// Compress journal records with zstd (default: true).
    pub compress: bool,

    /// Receives engine diagnostics in addition to `tracing`.
    #[serde(skip)]
    pub logger: Option<Arc<dyn InfoLog>>,

    /// Sync every write to stable storage (default: false).
    pub sync_writes: bool,

    /// Checksum protecting each journal record (default: CRC32).
    pub checksum_algorithm: ChecksumAlgorithm,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            error_if_exists: false,
            write_buffer_size: 32 * MIB,
            block_size: 16 * KIB,
            block_restart_interval: None,
            max_open_files: None,
            cache_size: 32 * MIB,
            comparator: None,
            paranoid_checks: false,
            compress: true,
            logger: None,
            sync_writes: false,
            checksum_algorithm: ChecksumAlgorithm::CRC32,
        }
    }
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("create_if_missing", &self.create_if_missing)
            .field("error_if_exists", &self.error_if_exists)
            .field("write_buffer_size", &self.write_buffer_size)
            .field("block_size", &self.block_size)
            .field("block_restart_interval", &self.block_restart_interval)
            .field("max_open_files", &self.max_open_files)
            .field("cache_size", &self.cache_size)
            .field("comparator", &self.comparator.as_ref().map(|c| c.name().to_string()))
            .field("paranoid_checks", &self.paranoid_checks)
            .field("compress", &self.compress)
            .field("logger", &self.logger.is_some())
            .field("sync_writes", &self.sync_writes)
            .field("checksum_algorithm", &self.checksum_algorithm)
            .finish()
    }
}

impl Options {
    /// Load options from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns `IoError` if the file cannot be read and `JsonError` if it is
    /// not a JSON object of options.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        let options: Options = serde_json::from_str(&contents)?;
        tracing::debug!("Loaded options from {:?}", path.as_ref());
        Ok(options)
    }

    /// Map these options onto the engine's tuning structure.
    ///
    /// Starts from [`EngineOptions::default`] and overlays every option that
    /// is set; unset and `false` flags keep the engine default. Never fails.
    pub fn resolve(&self) -> EngineOptions {
        let mut engine = EngineOptions::default();

        if self.create_if_missing {
            engine.create_if_missing = true;
        }
        if self.error_if_exists {
            engine.error_if_exists = true;
        }
        if self.paranoid_checks {
            engine.paranoid_checks = true;
        }
        if self.write_buffer_size > 0 {
            engine.write_buffer_size = self.write_buffer_size;
        }
        if self.block_size > 0 {
            engine.block_size = self.block_size;
        }
        if let Some(interval) = self.block_restart_interval.filter(|n| *n > 0) {
            engine.block_restart_interval = interval;
        }
        if let Some(limit) = self.max_open_files {
            engine.max_open_files = Some(limit);
        }
        engine.cache_size = self.cache_size;
        if let Some(comparator) = &self.comparator {
            engine.comparator = Arc::clone(comparator);
        }
        engine.compression = if self.compress {
            Compression::Zstd
        } else {
            Compression::None
        };
        if let Some(logger) = &self.logger {
            engine.info_log = Some(Arc::clone(logger));
        }
        engine.checksum_algorithm = self.checksum_algorithm;

        engine
    }

    /// Write options a store applies when the caller supplies none.
    pub fn write_options(&self) -> WriteOptions {
        WriteOptions {
            sync: self.sync_writes,
        }
    }

    /// Checks that sizes are within sensible ranges.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - `write_buffer_size` is below 4KB or above 1GB
    /// - `block_size` is below 512B or above 64MB
    /// - `block_restart_interval` is zero
    /// - `max_open_files` is zero
    pub fn validate(&self) -> Result<()> {
        if self.write_buffer_size < 4 * KIB {
            return Err(StorageError::ConfigError(
                "write_buffer_size must be at least 4KB".to_string(),
            ));
        }
        if self.write_buffer_size > 1024 * MIB {
            return Err(StorageError::ConfigError(
                "write_buffer_size cannot exceed 1GB".to_string(),
            ));
        }

        if self.block_size < 512 {
            return Err(StorageError::ConfigError(
                "block_size must be at least 512 bytes".to_string(),
            ));
        }
        if self.block_size > 64 * MIB {
            return Err(StorageError::ConfigError(
                "block_size cannot exceed 64MB".to_string(),
            ));
        }

        if self.block_restart_interval == Some(0) {
            return Err(StorageError::ConfigError(
                "block_restart_interval must be at least 1".to_string(),
            ));
        }
        if self.max_open_files == Some(0) {
            return Err(StorageError::ConfigError(
                "max_open_files must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    pub fn with_create_if_missing(mut self, enable: bool) -> Self {
        self.create_if_missing = enable;
        self
    }

    pub fn with_error_if_exists(mut self, enable: bool) -> Self {
        self.error_if_exists = enable;
        self
    }

    /// Set journal writer buffer size
    pub fn with_write_buffer_size(mut self, size: usize) -> Self {
        self.write_buffer_size = size;
        self
    }

    /// Set replay read buffer size
    pub fn with_block_size(mut self, size: usize) -> Self {
        self.block_size = size;
        self
    }

    pub fn with_block_restart_interval(mut self, interval: usize) -> Self {
        self.block_restart_interval = Some(interval);
        self
    }

    pub fn with_max_open_files(mut self, limit: usize) -> Self {
        self.max_open_files = Some(limit);
        self
    }

    pub fn with_cache_size(mut self, size: usize) -> Self {
        self.cache_size = size;
        self
    }

    /// Set a custom key order
    pub fn with_comparator(mut self, comparator: Arc<dyn Comparator>) -> Self {
        self.comparator = Some(comparator);
        self
    }

    pub fn with_paranoid_checks(mut self, enable: bool) -> Self {
        self.paranoid_checks = enable;
        self
    }

    pub fn with_compress(mut self, enable: bool) -> Self {
        self.compress = enable;
        self
    }

    /// Set the diagnostic sink
    pub fn with_logger(mut self, logger: Arc<dyn InfoLog>) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn with_sync_writes(mut self, enable: bool) -> Self {
        self.sync_writes = enable;
        self
    }

    /// Set checksum algorithm
    pub fn with_checksum_algorithm(mut self, algorithm: ChecksumAlgorithm) -> Self {
        self.checksum_algorithm = algorithm;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cmp::Ordering;
    use tempfile::TempDir;

    struct Reverse;

    impl Comparator for Reverse {
        fn name(&self) -> &str {
            "test.Reverse"
        }

        fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
            b.cmp(a)
        }
    }

    #[test]
    fn test_options_default_values() {
        let options = Options::default();

        assert!(options.create_if_missing);
        assert!(!options.error_if_exists);
        assert_eq!(options.write_buffer_size, 32 * 1024 * 1024);
        assert_eq!(options.block_size, 16 * 1024);
        assert_eq!(options.cache_size, 32 * 1024 * 1024);
        assert!(options.compress);
        assert!(options.comparator.is_none());
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_resolve_defaults() {
        let engine = Options::default().resolve();
        let fallback = EngineOptions::default();

        assert!(engine.create_if_missing);
        assert!(!engine.error_if_exists);
        assert_eq!(engine.compression, Compression::Zstd);
        assert_eq!(engine.block_restart_interval, fallback.block_restart_interval);
        assert_eq!(engine.max_open_files, None);
        assert_eq!(engine.comparator.name(), "ordkv.BytewiseComparator");
        assert!(engine.info_log.is_none());
    }

    #[test]
    fn test_false_flags_keep_engine_defaults() {
        let engine = Options::default()
            .with_create_if_missing(false)
            .with_compress(false)
            .resolve();

        assert!(!engine.create_if_missing);
        assert_eq!(engine.compression, Compression::None);
    }

    #[test]
    fn test_resolve_overlays_set_options() {
        let engine = Options::default()
            .with_block_restart_interval(4)
            .with_max_open_files(100)
            .with_cache_size(1024)
            .with_comparator(Arc::new(Reverse))
            .with_logger(Arc::new(|_: &str| {}))
            .with_checksum_algorithm(ChecksumAlgorithm::XXH64)
            .resolve();

        assert_eq!(engine.block_restart_interval, 4);
        assert_eq!(engine.max_open_files, Some(100));
        assert_eq!(engine.cache_size, 1024);
        assert_eq!(engine.comparator.name(), "test.Reverse");
        assert!(engine.info_log.is_some());
        assert_eq!(engine.checksum_algorithm, ChecksumAlgorithm::XXH64);
    }

    #[test]
    fn test_validation_rejects_bad_sizes() {
        assert!(Options::default().with_write_buffer_size(100).validate().is_err());
        assert!(Options::default().with_write_buffer_size(2048 * MIB).validate().is_err());
        assert!(Options::default().with_block_size(10).validate().is_err());
        assert!(Options::default().with_block_restart_interval(0).validate().is_err());
        assert!(Options::default().with_max_open_files(0).validate().is_err());
    }

    #[test]
    fn test_sync_writes_sets_default_write_options() {
        assert!(!Options::default().write_options().sync);
        assert!(Options::default().with_sync_writes(true).write_options().sync);
    }

    #[test]
    fn test_from_json_file_ignores_unknown_fields() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("options.json");
        std::fs::write(
            &path,
            r#"{ "compress": false, "block_restart_interval": 8, "bloom_bits": 10 }"#,
        )
        .unwrap();

        let options = Options::from_json_file(&path).unwrap();
        assert!(!options.compress);
        assert_eq!(options.block_restart_interval, Some(8));
        assert!(options.create_if_missing);
        assert_eq!(options.block_size, 16 * 1024);
    }

    #[test]
    fn test_from_json_file_errors() {
        let temp_dir = TempDir::new().unwrap();
        let missing = Options::from_json_file(temp_dir.path().join("missing.json"));
        assert!(matches!(missing, Err(StorageError::IoError(_))));

        let path = temp_dir.path().join("broken.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(
            Options::from_json_file(&path),
            Err(StorageError::JsonError(_))
        ));
    }
}
