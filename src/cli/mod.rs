use crate::codec::CodecKind;
use crate::error::{Result, StorageError};
use crate::options::Options;
use crate::store::{Store, WriteView};
use crate::view::ReadView;
use clap::{Parser, Subcommand};
use std::ops::Bound;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "ordkv")]
#[command(about = "Typed access to an ordered persistent key-value store", long_about = None)]
pub struct Command {
    /// Codec used for keys and values (json or postcard)
    #[arg(long, global = true, default_value = "json")]
    pub codec: CodecKind,

    /// JSON options file; defaults apply when omitted
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create a store at the specified path
    Init {
        /// Data directory path
        #[arg(short, long)]
        path: PathBuf,

        /// Write the effective options to this file
        #[arg(long)]
        write_config: Option<PathBuf>,
    },

    /// Put a key-value pair
    Put {
        /// Key to store
        key: String,

        /// Value to store
        value: String,

        /// Data directory path
        #[arg(short, long, default_value = "./data")]
        path: PathBuf,
    },

    /// Get value for a key
    Get {
        /// Key to retrieve
        key: String,

        /// Data directory path
        #[arg(short, long, default_value = "./data")]
        path: PathBuf,
    },

    /// Delete a key
    Delete {
        /// Key to delete
        key: String,

        /// Only delete if the current value equals this
        #[arg(long)]
        if_value: Option<String>,

        /// Data directory path
        #[arg(short, long, default_value = "./data")]
        path: PathBuf,
    },

    /// Scan a key range
    Scan {
        /// Start key (inclusive)
        start: Option<String>,

        /// End key (inclusive unless --exclusive)
        end: Option<String>,

        /// Stop before the end key
        #[arg(long, default_value = "false")]
        exclusive: bool,

        /// Maximum number of entries to print
        #[arg(short, long)]
        limit: Option<usize>,

        /// Data directory path
        #[arg(short, long, default_value = "./data")]
        path: PathBuf,
    },

    /// Print the smallest and largest key
    Bounds {
        /// Data directory path
        #[arg(short, long, default_value = "./data")]
        path: PathBuf,
    },

    /// Print the approximate number of keys
    Count {
        /// Data directory path
        #[arg(short, long, default_value = "./data")]
        path: PathBuf,
    },

    /// Print an engine property
    Stats {
        /// Property name
        #[arg(default_value = "ordkv.stats")]
        property: String,

        /// Data directory path
        #[arg(short, long, default_value = "./data")]
        path: PathBuf,
    },

    /// Compact a key range, or everything when no bounds are given
    Compact {
        /// Start key (inclusive)
        start: Option<String>,

        /// End key (inclusive)
        end: Option<String>,

        /// Data directory path
        #[arg(short, long, default_value = "./data")]
        path: PathBuf,
    },

    /// Delete the store and its files
    Destroy {
        /// Data directory path
        #[arg(short, long)]
        path: PathBuf,
    },

    /// Salvage a damaged store
    Repair {
        /// Data directory path
        #[arg(short, long)]
        path: PathBuf,
    },

    /// Run benchmark
    Bench {
        /// Number of keys
        #[arg(short, long, default_value = "100000")]
        keys: u64,

        /// Read percentage (0-100)
        #[arg(short, long, default_value = "70")]
        read_pct: u8,

        /// Write percentage (0-100)
        #[arg(short, long, default_value = "30")]
        write_pct: u8,

        /// Duration in seconds
        #[arg(short, long, default_value = "10")]
        duration: u64,

        /// Data directory path
        #[arg(short, long, default_value = "./data")]
        path: PathBuf,
    },
}

pub fn execute_command(cmd: Command) -> Result<()> {
    let options = load_options(cmd.config.as_deref())?;
    let codec = cmd.codec;

    match cmd.command {
        Commands::Init { path, write_config } => {
            execute_init_command(path, write_config, options, codec)
        }
        Commands::Put { key, value, path } => {
            execute_put_command(key, value, path, options, codec)
        }
        Commands::Get { key, path } => execute_get_command(key, path, options, codec),
        Commands::Delete { key, if_value, path } => {
            execute_delete_command(key, if_value, path, options, codec)
        }
        Commands::Scan { start, end, exclusive, limit, path } => {
            execute_scan_command(start, end, exclusive, limit, path, options, codec)
        }
        Commands::Bounds { path } => execute_bounds_command(path, options, codec),
        Commands::Count { path } => execute_count_command(path, options, codec),
        Commands::Stats { property, path } => {
            execute_stats_command(property, path, options, codec)
        }
        Commands::Compact { start, end, path } => {
            execute_compact_command(start, end, path, options, codec)
        }
        Commands::Destroy { path } => execute_destroy_command(path, options),
        Commands::Repair { path } => execute_repair_command(path, options),
        Commands::Bench { keys, read_pct, write_pct, duration, path } => {
            execute_bench_command(keys, read_pct, write_pct, duration, path, options, codec)
        }
    }
}

fn load_options(config: Option<&Path>) -> Result<Options> {
    let options = match config {
        Some(path) => Options::from_json_file(path)?,
        None => Options::default(),
    };
    options.validate()?;
    Ok(options)
}

/// Commands other than `init` expect the store to exist already.
fn open_existing(path: &Path, options: Options, codec: CodecKind) -> Result<Store> {
    Store::open_with_codec(path, options.with_create_if_missing(false), codec)
}

fn execute_init_command(
    path: PathBuf,
    write_config: Option<PathBuf>,
    options: Options,
    codec: CodecKind,
) -> Result<()> {
    println!("Initializing ordKV store at: {}", path.display());

    let store = Store::open_with_codec(&path, options.clone().with_create_if_missing(true), codec)?;
    println!("  ✓ Created store");

    if let Some(config_path) = write_config {
        let config_json = serde_json::to_string_pretty(&options)?;
        std::fs::write(&config_path, config_json)?;
        println!("  ✓ Wrote options file: {}", config_path.display());
    }

    println!("\nOptions:");
    println!("  Write buffer: {} bytes", options.write_buffer_size);
    println!("  Block size: {} bytes", options.block_size);
    println!("  Cache size: {} bytes", options.cache_size);
    println!("  Compression: {}", if options.compress { "zstd" } else { "none" });
    println!("  Codec: {}", codec);

    store.close()?;
    println!("\nStore initialized successfully!");
    Ok(())
}

fn execute_put_command(
    key: String,
    value: String,
    path: PathBuf,
    options: Options,
    codec: CodecKind,
) -> Result<()> {
    let store = open_existing(&path, options, codec)?;
    store.put(&key, &value)?;
    println!("✓ Put key: {}", key);
    store.close()
}

fn execute_get_command(key: String, path: PathBuf, options: Options, codec: CodecKind) -> Result<()> {
    let store = open_existing(&path, options, codec)?;
    match store.get::<_, String>(&key)? {
        Some(value) => println!("{}", value),
        None => println!("Key not found: {}", key),
    }
    store.close()
}

fn execute_delete_command(
    key: String,
    if_value: Option<String>,
    path: PathBuf,
    options: Options,
    codec: CodecKind,
) -> Result<()> {
    let store = open_existing(&path, options, codec)?;
    match if_value {
        Some(expected) => {
            if store.delete_if(&key, &expected)? {
                println!("✓ Deleted key: {}", key);
            } else {
                println!("Key {} not deleted: value did not match", key);
            }
        }
        None => {
            store.delete(&key)?;
            println!("✓ Deleted key: {}", key);
        }
    }
    store.close()
}

fn execute_scan_command(
    start: Option<String>,
    end: Option<String>,
    exclusive: bool,
    limit: Option<usize>,
    path: PathBuf,
    options: Options,
    codec: CodecKind,
) -> Result<()> {
    let store = open_existing(&path, options, codec)?;

    let end = match (&end, exclusive) {
        (Some(end), true) => Bound::Excluded(end),
        (Some(end), false) => Bound::Included(end),
        (None, _) => Bound::Unbounded,
    };
    let mut cursor = store.range::<String, String>(start.as_ref(), end)?;

    let mut count = 0usize;
    while let Some((key, value)) = cursor.try_next()? {
        println!("  {} = {}", key, value);
        count += 1;
        if limit.is_some_and(|limit| count >= limit) {
            break;
        }
    }
    cursor.close();
    println!("Found {} entries", count);

    store.close()
}

fn execute_bounds_command(path: PathBuf, options: Options, codec: CodecKind) -> Result<()> {
    let store = open_existing(&path, options, codec)?;
    match store.bounds::<String>()? {
        Some((first, last)) => println!("{} .. {}", first, last),
        None => println!("Store is empty"),
    }
    store.close()
}

fn execute_count_command(path: PathBuf, options: Options, codec: CodecKind) -> Result<()> {
    let store = open_existing(&path, options, codec)?;
    println!("~{} keys", store.count()?);
    store.close()
}

fn execute_stats_command(
    property: String,
    path: PathBuf,
    options: Options,
    codec: CodecKind,
) -> Result<()> {
    let store = open_existing(&path, options, codec)?;
    match store.stats(&property)? {
        Some(value) => println!("{}", value),
        None => println!("Unknown property: {}", property),
    }
    store.close()
}

fn execute_compact_command(
    start: Option<String>,
    end: Option<String>,
    path: PathBuf,
    options: Options,
    codec: CodecKind,
) -> Result<()> {
    let store = open_existing(&path, options, codec)?;
    store.compact_range(start.as_ref(), end.as_ref())?;
    println!("✓ Compacted {}", path.display());
    store.close()
}

fn execute_destroy_command(path: PathBuf, options: Options) -> Result<()> {
    Store::destroy(&path, options)?;
    println!("✓ Destroyed store at {}", path.display());
    Ok(())
}

fn execute_repair_command(path: PathBuf, options: Options) -> Result<()> {
    let report = Store::repair(&path, options)?;
    println!("✓ Repaired store at {}", path.display());
    println!("  Records recovered: {}", report.records_recovered);
    println!("  Records skipped: {}", report.records_skipped);
    println!("  Live keys: {}", report.live_keys);
    Ok(())
}

fn execute_bench_command(
    keys: u64,
    read_pct: u8,
    write_pct: u8,
    duration: u64,
    path: PathBuf,
    options: Options,
    codec: CodecKind,
) -> Result<()> {
    use rand::Rng;
    use std::io::Write;
    use std::time::{Duration, Instant};

    if u16::from(read_pct) + u16::from(write_pct) != 100 {
        return Err(StorageError::ConfigError(format!(
            "Read and write percentages must sum to 100 (got {})",
            u16::from(read_pct) + u16::from(write_pct)
        )));
    }
    if keys == 0 {
        return Err(StorageError::ConfigError("Benchmark needs at least one key".to_string()));
    }

    println!("=== ordKV Benchmark ===");
    println!("Configuration:");
    println!("  Total keys: {}", keys);
    println!("  Read percentage: {}%", read_pct);
    println!("  Write percentage: {}%", write_pct);
    println!("  Duration: {} seconds", duration);
    println!("  Codec: {}", codec);
    println!("  Data path: {}", path.display());
    println!();

    let store = Store::open_with_codec(&path, options.with_create_if_missing(true), codec)?;

    println!("Populating initial data...");
    let mut populated = 0u64;
    while populated < keys {
        let chunk_end = (populated + 10_000).min(keys);
        store.put_all((populated..chunk_end).map(|i| {
            (format!("bench_key_{:010}", i), format!("bench_value_{:010}", i))
        }))?;
        populated = chunk_end;
        println!("  Populated {} / {} keys", populated, keys);
    }
    println!("✓ Initial data populated\n");
    println!("Running benchmark...");

    let start_time = Instant::now();
    let duration_limit = Duration::from_secs(duration);
    let mut rng = rand::thread_rng();
    let mut operation_count = 0u64;
    let mut read_count = 0u64;
    let mut write_count = 0u64;

    while start_time.elapsed() < duration_limit {
        let key = format!("bench_key_{:010}", rng.gen_range(0..keys));
        if rng.gen_range(0..100) < read_pct {
            let _ = store.get::<_, String>(&key)?;
            read_count += 1;
        } else {
            let value = format!("updated_value_{}", operation_count);
            store.put(&key, &value)?;
            write_count += 1;
        }
        operation_count += 1;

        if operation_count % 10_000 == 0 {
            let ops_per_sec = operation_count as f64 / start_time.elapsed().as_secs_f64();
            print!("\r  Operations: {} | Throughput: {:.0} ops/sec", operation_count, ops_per_sec);
            let _ = std::io::stdout().flush();
        }
    }

    println!("\n\n=== Benchmark Results ===");
    let elapsed = start_time.elapsed().as_secs_f64();
    let total = operation_count.max(1) as f64;
    println!("Duration: {:.2} seconds", elapsed);
    println!("Total operations: {}", operation_count);
    println!("  Reads: {} ({:.1}%)", read_count, read_count as f64 / total * 100.0);
    println!("  Writes: {} ({:.1}%)", write_count, write_count as f64 / total * 100.0);
    println!("Throughput: {:.0} ops/sec", operation_count as f64 / elapsed.max(f64::EPSILON));
    println!();

    let report = store.metrics().report();
    println!("Latency Percentiles (microseconds):");
    for (operation, (p50, p95, p99)) in &report.operation_latencies {
        println!("  {}:", operation);
        println!("    p50: {:.2} µs", p50);
        println!("    p95: {:.2} µs", p95);
        println!("    p99: {:.2} µs", p99);
    }
    println!();
    println!("Store Metrics:");
    println!("  Batches committed: {}", report.batches_committed);
    println!("  Syncs: {}", report.syncs);

    store.close()
}
