use crate::checksum::ChecksumAlgorithm;
use crate::engine::{BatchOp, Compression, SequenceNumber, WriteBatch};
use crate::error::{Result, StorageError};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

/// File name of the journal inside a store directory.
pub const JOURNAL_FILE: &str = "data.journal";

/// `[checksum u32][payload_len u32][flags u8][sequence u64][count u32]`
pub const HEADER_SIZE: usize = 4 + 4 + 1 + 8 + 4;

const FLAG_ZSTD: u8 = 0b0000_0001;
const ZSTD_LEVEL: i32 = 1;

/// Payloads smaller than this are never worth compressing.
const MIN_COMPRESS_LEN: usize = 64;

/// Largest payload a header may claim before it is treated as garbage.
const MAX_PAYLOAD_LEN: usize = 256 * 1024 * 1024;

const OP_PUT: u8 = 1;
const OP_DELETE: u8 = 2;

/// One committed batch as stored in the journal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalRecord {
    /// Sequence of the first operation; operation `i` has `sequence + i`.
    pub sequence: SequenceNumber,
    pub ops: Vec<BatchOp>,
}

impl JournalRecord {
    /// Sequence of the last operation in the record.
    pub fn last_sequence(&self) -> SequenceNumber {
        self.sequence + self.ops.len().saturating_sub(1) as u64
    }
}

fn encode_ops(ops: &[BatchOp]) -> Vec<u8> {
    let mut payload = Vec::new();
    for op in ops {
        let (tag, key, value): (u8, &[u8], &[u8]) = match op {
            BatchOp::Put { key, value } => (OP_PUT, key, value),
            BatchOp::Delete { key } => (OP_DELETE, key, &[]),
        };
        payload.push(tag);
        payload.extend_from_slice(&(key.len() as u32).to_le_bytes());
        payload.extend_from_slice(&(value.len() as u32).to_le_bytes());
        payload.extend_from_slice(key);
        payload.extend_from_slice(value);
    }
    payload
}

fn read_u32(data: &[u8], offset: usize) -> Option<u32> {
    let bytes = data.get(offset..offset + 4)?;
    Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn read_u64(data: &[u8], offset: usize) -> Option<u64> {
    let bytes = data.get(offset..offset + 8)?;
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    Some(u64::from_le_bytes(buf))
}

fn decode_ops(payload: &[u8], count: usize) -> std::result::Result<Vec<BatchOp>, String> {
    let mut ops = Vec::with_capacity(count.min(1024));
    let mut offset = 0usize;
    for index in 0..count {
        let tag = *payload
            .get(offset)
            .ok_or_else(|| format!("operation {} truncated", index))?;
        let key_len = read_u32(payload, offset + 1).ok_or("key length truncated")? as usize;
        let value_len = read_u32(payload, offset + 5).ok_or("value length truncated")? as usize;
        offset += 9;

        let key = payload
            .get(offset..offset + key_len)
            .ok_or("key truncated")?
            .to_vec();
        offset += key_len;
        let value = payload
            .get(offset..offset + value_len)
            .ok_or("value truncated")?
            .to_vec();
        offset += value_len;

        match tag {
            OP_PUT => ops.push(BatchOp::Put { key, value }),
            OP_DELETE => ops.push(BatchOp::Delete { key }),
            other => return Err(format!("invalid operation tag {}", other)),
        }
    }
    if offset != payload.len() {
        return Err(format!("{} trailing payload bytes", payload.len() - offset));
    }
    Ok(ops)
}

/// Serialize one record.
pub fn encode_record(
    sequence: SequenceNumber,
    ops: &[BatchOp],
    compression: Compression,
    checksum: ChecksumAlgorithm,
) -> Result<Vec<u8>> {
    let raw = encode_ops(ops);
    let mut flags = checksum.record_flag();

    let payload = if compression == Compression::Zstd && raw.len() >= MIN_COMPRESS_LEN {
        let compressed = zstd::encode_all(raw.as_slice(), ZSTD_LEVEL)?;
        if compressed.len() < raw.len() {
            flags |= FLAG_ZSTD;
            compressed
        } else {
            raw
        }
    } else {
        raw
    };

    let mut buffer = Vec::with_capacity(HEADER_SIZE + payload.len());
    buffer.extend_from_slice(&[0u8; 4]);
    buffer.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buffer.push(flags);
    buffer.extend_from_slice(&sequence.to_le_bytes());
    buffer.extend_from_slice(&(ops.len() as u32).to_le_bytes());
    buffer.extend_from_slice(&payload);

    let crc = checksum.compute(&buffer[4..]);
    buffer[0..4].copy_from_slice(&crc.to_le_bytes());
    Ok(buffer)
}

/// Outcome of decoding the record at the start of a slice.
#[derive(Debug)]
pub enum Decoded {
    Record { record: JournalRecord, size: usize },
    /// Not enough bytes left for the record the header announces.
    Truncated,
    /// Header plausible but contents invalid; `size` is the claimed length.
    Corrupt { reason: String, size: Option<usize> },
}

pub fn decode_record(data: &[u8]) -> Decoded {
    if data.len() < HEADER_SIZE {
        return Decoded::Truncated;
    }
    let (Some(stored_crc), Some(payload_len)) = (read_u32(data, 0), read_u32(data, 4)) else {
        return Decoded::Truncated;
    };
    let payload_len = payload_len as usize;
    if payload_len > MAX_PAYLOAD_LEN {
        return Decoded::Corrupt {
            reason: format!("payload length {} exceeds limit", payload_len),
            size: None,
        };
    }
    let size = HEADER_SIZE + payload_len;
    if data.len() < size {
        return Decoded::Truncated;
    }

    let flags = data[8];
    let algorithm = ChecksumAlgorithm::from_record_flags(flags);
    if let Err(e) = algorithm.verify(&data[4..size], stored_crc) {
        return Decoded::Corrupt {
            reason: e.to_string(),
            size: Some(size),
        };
    }

    let sequence = read_u64(data, 9).unwrap_or_default();
    let count = read_u32(data, 17).unwrap_or_default() as usize;
    let payload = &data[HEADER_SIZE..size];

    let decompressed;
    let raw = if flags & FLAG_ZSTD != 0 {
        match zstd::decode_all(payload) {
            Ok(bytes) => {
                decompressed = bytes;
                decompressed.as_slice()
            }
            Err(e) => {
                return Decoded::Corrupt {
                    reason: format!("zstd: {}", e),
                    size: Some(size),
                }
            }
        }
    } else {
        payload
    };

    match decode_ops(raw, count) {
        Ok(ops) => Decoded::Record {
            record: JournalRecord { sequence, ops },
            size,
        },
        Err(reason) => Decoded::Corrupt {
            reason,
            size: Some(size),
        },
    }
}

/// How replay treats a corrupt record in the middle of the journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// Fail with `CorruptedData`.
    Strict,
    /// Log, skip the record and continue with the next one.
    SkipCorrupt,
}

/// Records recovered from a journal file.
#[derive(Debug, Default)]
pub struct Replay {
    pub records: Vec<JournalRecord>,
    /// Offset just past the last readable record.
    pub valid_len: u64,
    pub file_len: u64,
    pub skipped: usize,
}

impl Replay {
    /// True when the file ends in a partially written record.
    pub fn has_torn_tail(&self) -> bool {
        self.file_len > self.valid_len
    }
}

/// Read every record from `path`.
pub fn replay(path: &Path, read_buffer: usize, recovery: Recovery) -> Result<Replay> {
    if !path.exists() {
        return Ok(Replay::default());
    }

    let file = File::open(path)?;
    let mut data = Vec::new();
    BufReader::with_capacity(read_buffer.max(512), file).read_to_end(&mut data)?;
    tracing::debug!("Journal {:?} has {} bytes", path, data.len());

    let mut result = Replay {
        file_len: data.len() as u64,
        ..Replay::default()
    };
    let mut offset = 0usize;

    while offset < data.len() {
        match decode_record(&data[offset..]) {
            Decoded::Record { record, size } => {
                result.records.push(record);
                offset += size;
                result.valid_len = offset as u64;
            }
            Decoded::Truncated => {
                tracing::warn!(
                    "Journal {:?} ends in a partial record at offset {} ({} bytes dropped)",
                    path,
                    offset,
                    data.len() - offset
                );
                break;
            }
            Decoded::Corrupt { reason, size } => {
                if recovery == Recovery::Strict {
                    return Err(StorageError::CorruptedData {
                        file: path.to_path_buf(),
                        offset: offset as u64,
                        reason,
                    });
                }
                match size {
                    Some(size) => {
                        tracing::warn!(
                            "Skipping corrupt journal record at offset {} in {:?}: {}",
                            offset,
                            path,
                            reason
                        );
                        result.skipped += 1;
                        offset += size;
                        result.valid_len = offset as u64;
                    }
                    None => {
                        // without a usable length there is no next record boundary
                        tracing::warn!(
                            "Unrecoverable journal corruption at offset {} in {:?}: {}",
                            offset,
                            path,
                            reason
                        );
                        break;
                    }
                }
            }
        }
    }

    tracing::info!(
        "Recovered {} journal records from {:?} ({} skipped)",
        result.records.len(),
        path,
        result.skipped
    );
    Ok(result)
}

/// Appends records to the journal file.
pub struct JournalWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    offset: u64,
    records_since_flush: usize,
    flush_interval: usize,
    compression: Compression,
    checksum: ChecksumAlgorithm,
}

impl JournalWriter {
    /// Open `path` for appending, creating it when missing.
    pub fn open(
        path: &Path,
        buffer_size: usize,
        flush_interval: usize,
        compression: Compression,
        checksum: ChecksumAlgorithm,
    ) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let offset = file.metadata()?.len();
        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::with_capacity(buffer_size.max(4096), file),
            offset,
            records_since_flush: 0,
            flush_interval: flush_interval.max(1),
            compression,
            checksum,
        })
    }

    /// Append `batch` with its first operation at `sequence`. Returns the
    /// number of bytes written.
    pub fn append(&mut self, sequence: SequenceNumber, batch: &WriteBatch) -> Result<u64> {
        let encoded = encode_record(sequence, batch.ops(), self.compression, self.checksum)?;
        self.writer.write_all(&encoded)?;
        self.offset += encoded.len() as u64;

        self.records_since_flush += 1;
        if self.records_since_flush >= self.flush_interval {
            self.flush()?;
        }
        Ok(encoded.len() as u64)
    }

    /// Hand buffered records to the operating system.
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.records_since_flush = 0;
        Ok(())
    }

    /// Flush and force the journal to stable storage.
    pub fn sync(&mut self) -> Result<()> {
        self.flush()?;
        self.writer.get_ref().sync_data()?;
        Ok(())
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Atomically replace the journal at `path` with `entries` as put records.
///
/// Entries are grouped into records of at most `chunk` operations; sequences
/// start at 1. The new file is synced before it is renamed into place.
pub fn rewrite(
    path: &Path,
    entries: &[(Vec<u8>, Vec<u8>)],
    chunk: usize,
    compression: Compression,
    checksum: ChecksumAlgorithm,
) -> Result<u64> {
    let tmp_path = path.with_extension("journal.tmp");
    let mut written = 0u64;
    {
        let mut file = BufWriter::new(File::create(&tmp_path)?);
        let mut sequence: SequenceNumber = 1;
        for group in entries.chunks(chunk.max(1)) {
            let ops: Vec<BatchOp> = group
                .iter()
                .map(|(key, value)| BatchOp::Put {
                    key: key.clone(),
                    value: value.clone(),
                })
                .collect();
            let encoded = encode_record(sequence, &ops, compression, checksum)?;
            file.write_all(&encoded)?;
            written += encoded.len() as u64;
            sequence += ops.len() as u64;
        }
        file.flush()?;
        file.get_ref().sync_all()?;
    }
    std::fs::rename(&tmp_path, path)?;
    Ok(written)
}
