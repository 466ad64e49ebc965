use crate::error::{Result, StorageError};
use serde::{Deserialize, Serialize};

/// Seed for journal record hashing with XXH64.
const XXH64_SEED: u64 = 0;

/// Checksum protecting each journal record.
///
/// The algorithm is recorded per record, so a journal written with one
/// algorithm stays readable after the option is changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChecksumAlgorithm {
    CRC32,
    XXH64,
}

impl ChecksumAlgorithm {
    /// Compute the checksum of `data`.
    pub fn compute(&self, data: &[u8]) -> u32 {
        match self {
            ChecksumAlgorithm::CRC32 => crc32fast::hash(data),
            ChecksumAlgorithm::XXH64 => {
                // lower 32 bits fit the record header
                (xxhash_rust::xxh64::xxh64(data, XXH64_SEED) & 0xFFFF_FFFF) as u32
            }
        }
    }

    /// Verify that `data` hashes to `expected`.
    pub fn verify(&self, data: &[u8], expected: u32) -> Result<()> {
        let actual = self.compute(data);
        if actual == expected {
            Ok(())
        } else {
            Err(StorageError::ChecksumMismatch { expected, actual })
        }
    }

    pub(crate) fn from_record_flags(flags: u8) -> Self {
        if flags & RECORD_FLAG_XXH64 != 0 {
            ChecksumAlgorithm::XXH64
        } else {
            ChecksumAlgorithm::CRC32
        }
    }

    pub(crate) fn record_flag(&self) -> u8 {
        match self {
            ChecksumAlgorithm::CRC32 => 0,
            ChecksumAlgorithm::XXH64 => RECORD_FLAG_XXH64,
        }
    }
}

impl Default for ChecksumAlgorithm {
    fn default() -> Self {
        ChecksumAlgorithm::CRC32
    }
}

/// Journal record flag bit selecting XXH64.
pub(crate) const RECORD_FLAG_XXH64: u8 = 0b0000_0010;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc32_verify() {
        let algo = ChecksumAlgorithm::CRC32;
        let checksum = algo.compute(b"hello world");

        assert!(algo.verify(b"hello world", checksum).is_ok());
        assert!(algo.verify(b"hello world", checksum ^ 1).is_err());
    }

    #[test]
    fn test_xxh64_verify() {
        let algo = ChecksumAlgorithm::XXH64;
        let checksum = algo.compute(b"hello world");

        assert!(algo.verify(b"hello world", checksum).is_ok());
        assert!(algo.verify(b"hello, world", checksum).is_err());
    }

    #[test]
    fn test_different_algorithms_different_checksums() {
        let data = b"test data";
        assert_ne!(
            ChecksumAlgorithm::CRC32.compute(data),
            ChecksumAlgorithm::XXH64.compute(data)
        );
    }

    #[test]
    fn test_record_flag_round_trip() {
        for algo in [ChecksumAlgorithm::CRC32, ChecksumAlgorithm::XXH64] {
            assert_eq!(ChecksumAlgorithm::from_record_flags(algo.record_flag()), algo);
        }
        // unrelated bits do not select xxh64
        assert_eq!(
            ChecksumAlgorithm::from_record_flags(0b0000_0001),
            ChecksumAlgorithm::CRC32
        );
    }
}
