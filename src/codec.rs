//! Value serialization at the store boundary.
//!
//! Every key and value crosses the engine as bytes produced by a [`Codec`].
//! Ordering inside the engine is defined over those bytes, so a key type only
//! sorts by its natural order when the codec's encoding is order-preserving.
//! [`JsonCodec`] keeps plain ASCII string keys in lexical order; most other
//! types (numbers in particular) do not sort naturally under any bundled codec.
//!
//! The process-wide default is fixed once at startup with [`init_default`].
//! Overrides are explicit: a store can be opened with a specific codec, or a
//! different codec can be bound for a lexical scope with
//! [`Store::with_codec`](crate::Store::with_codec) or
//! [`Store::using`](crate::Store::using).

use crate::error::{Result, StorageError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

/// Converts values to byte sequences and back.
pub trait Codec: Clone + Send + Sync + 'static {
    /// Short name used in error messages and diagnostics.
    fn name(&self) -> &'static str;

    /// Serialize `value` to bytes.
    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>>;

    /// Deserialize bytes produced by [`Codec::encode`].
    ///
    /// Fails with [`StorageError::Decode`] on corrupt or foreign bytes.
    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T>;
}

/// JSON encoding via `serde_json`.
///
/// `None` and `()` encode to the sentinel `null`, which is distinct from a
/// missing key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn name(&self) -> &'static str {
        "json"
    }

    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>> {
        serde_json::to_vec(value).map_err(|e| StorageError::Encode {
            codec: self.name(),
            message: e.to_string(),
        })
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        serde_json::from_slice(bytes).map_err(|e| StorageError::Decode {
            codec: self.name(),
            message: e.to_string(),
        })
    }
}

/// Compact binary encoding via `postcard`.
///
/// Not self-describing: values must be decoded as the type they were
/// encoded from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PostcardCodec;

impl Codec for PostcardCodec {
    fn name(&self) -> &'static str {
        "postcard"
    }

    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>> {
        postcard::to_allocvec(value).map_err(|e| StorageError::Encode {
            codec: self.name(),
            message: e.to_string(),
        })
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        postcard::from_bytes(bytes).map_err(|e| StorageError::Decode {
            codec: self.name(),
            message: e.to_string(),
        })
    }
}

/// A codec selected at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CodecKind {
    Json,
    Postcard,
}

impl CodecKind {
    /// The codec chosen with [`init_default`], or JSON if none was chosen.
    pub fn process_default() -> Self {
        *DEFAULT_CODEC.get_or_init(|| CodecKind::Json)
    }
}

impl Codec for CodecKind {
    fn name(&self) -> &'static str {
        match self {
            CodecKind::Json => JsonCodec.name(),
            CodecKind::Postcard => PostcardCodec.name(),
        }
    }

    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>> {
        match self {
            CodecKind::Json => JsonCodec.encode(value),
            CodecKind::Postcard => PostcardCodec.encode(value),
        }
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        match self {
            CodecKind::Json => JsonCodec.decode(bytes),
            CodecKind::Postcard => PostcardCodec.decode(bytes),
        }
    }
}

impl fmt::Display for CodecKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CodecKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(CodecKind::Json),
            "postcard" => Ok(CodecKind::Postcard),
            other => Err(format!("unknown codec '{}' (expected json or postcard)", other)),
        }
    }
}

static DEFAULT_CODEC: OnceLock<CodecKind> = OnceLock::new();

/// Fix the process-wide default codec.
///
/// Call once at startup, before the first store is opened. Repeating the
/// call with the same codec is a no-op; asking for a different codec after
/// the default has been fixed (explicitly or by first use) fails.
pub fn init_default(kind: CodecKind) -> Result<()> {
    match DEFAULT_CODEC.set(kind) {
        Ok(()) => {
            tracing::debug!("Default codec set to {}", kind);
            Ok(())
        }
        Err(_) => {
            let current = CodecKind::process_default();
            if current == kind {
                Ok(())
            } else {
                Err(StorageError::ConfigError(format!(
                    "default codec already fixed to {}, cannot switch to {}",
                    current, kind
                )))
            }
        }
    }
}
