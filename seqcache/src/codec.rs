//! Pluggable value codecs: serialization plus optional compression.
//!
//! Composition is explicit rather than inherited: a compressing codec is a
//! named wrapper around a base codec, selected at construction time. This
//! keeps the two capabilities independently testable and makes the layering
//! visible at the type level, e.g. `ZstdCodec<BincodeCodec<T>>`.

use std::fmt;
use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::CodecError;

/// Default zstd compression level used by [`ZstdCodec`].
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

/// A two-way transform between values and stored bytes.
///
/// Implementations must guarantee that `decode(encode(v)) == v` for every
/// value in the domain the caller intends to store, and that `decode` fails
/// with a [`CodecError`] on truncated or foreign-format input rather than
/// silently returning wrong data.
pub trait Codec {
    /// The value type this codec stores.
    type Value;

    /// Serialize (and optionally compress) a value.
    fn encode(&self, value: &Self::Value) -> Result<Vec<u8>, CodecError>;

    /// Decode bytes produced by [`Codec::encode`] back into a value.
    fn decode(&self, bytes: &[u8]) -> Result<Self::Value, CodecError>;
}

/// Compact binary base codec backed by bincode.
#[derive(Serialize, Deserialize)]
pub struct BincodeCodec<T>(PhantomData<fn() -> T>);

impl<T> BincodeCodec<T> {
    /// Create a bincode codec for `T`.
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for BincodeCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for BincodeCodec<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for BincodeCodec<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BincodeCodec")
    }
}

impl<T: Serialize + DeserializeOwned> Codec for BincodeCodec<T> {
    type Value = T;

    fn encode(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        bincode::serialize(value).map_err(|e| CodecError::Encode(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<T, CodecError> {
        bincode::deserialize(bytes).map_err(|e| CodecError::Decode(e.to_string()))
    }
}

/// Human-readable base codec backed by serde_json.
#[derive(Serialize, Deserialize)]
pub struct JsonCodec<T>(PhantomData<fn() -> T>);

impl<T> JsonCodec<T> {
    /// Create a JSON codec for `T`.
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for JsonCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for JsonCodec<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for JsonCodec<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("JsonCodec")
    }
}

impl<T: Serialize + DeserializeOwned> Codec for JsonCodec<T> {
    type Value = T;

    fn encode(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(value).map_err(|e| CodecError::Encode(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(bytes).map_err(|e| CodecError::Decode(e.to_string()))
    }
}

/// Compressing codec: applies zstd after the inner codec's serialization
/// and decompresses before its deserialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZstdCodec<C> {
    inner: C,
    level: i32,
}

impl<C> ZstdCodec<C> {
    /// Wrap a base codec with zstd at [`DEFAULT_COMPRESSION_LEVEL`].
    pub fn new(inner: C) -> Self {
        Self::with_level(inner, DEFAULT_COMPRESSION_LEVEL)
    }

    /// Wrap a base codec with zstd at an explicit compression level.
    pub fn with_level(inner: C, level: i32) -> Self {
        Self { inner, level }
    }
}

impl<C: Default> Default for ZstdCodec<C> {
    fn default() -> Self {
        Self::new(C::default())
    }
}

impl<C: Codec> Codec for ZstdCodec<C> {
    type Value = C::Value;

    fn encode(&self, value: &Self::Value) -> Result<Vec<u8>, CodecError> {
        let serialized = self.inner.encode(value)?;
        zstd::encode_all(serialized.as_slice(), self.level)
            .map_err(|e| CodecError::Encode(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<Self::Value, CodecError> {
        let decompressed =
            zstd::decode_all(bytes).map_err(|e| CodecError::Decompress(e.to_string()))?;
        self.inner.decode(&decompressed)
    }
}
