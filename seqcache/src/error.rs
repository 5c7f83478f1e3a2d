//! Error types for cache population and lookup.
//!
//! The taxonomy separates errors the caller can act on (`NotFound` vs
//! `CorruptRecord`, `InvalidCache` vs `PopulationFailure`) from the
//! engine- and I/O-level causes they wrap. Capacity exhaustion during
//! population is deliberately NOT part of this enum: it is a transient
//! signal handled inside the writer's grow-and-retry loop and never
//! escapes past one retry.

use std::path::PathBuf;

/// Error type for codec encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Serialization of a value failed.
    #[error("serialization failed: {0}")]
    Encode(String),

    /// Deserialization failed: truncated or foreign-format input.
    #[error("deserialization failed: {0}")]
    Decode(String),

    /// Decompression failed before deserialization was attempted.
    #[error("decompression failed: {0}")]
    Decompress(String),
}

/// Error type for all cache operations.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The directory is missing, or present but does not hold both LMDB
    /// artifacts. Never retried.
    #[error("no valid cache at {}: {reason}", .path.display())]
    InvalidCache {
        /// The directory that failed the valid-cache check.
        path: PathBuf,
        /// Why the check failed.
        reason: String,
    },

    /// A directory was expected but the path points at something else.
    #[error("not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    /// Population failed fatally. Raised only after the partially written
    /// directory has been removed, so no ambiguous on-disk state survives.
    #[error("population of cache at {} failed", .path.display())]
    PopulationFailure {
        /// The directory population was writing into.
        path: PathBuf,
        /// The underlying failure.
        #[source]
        source: Box<CacheError>,
    },

    /// No record was ever written at this index. Does not invalidate the
    /// handle; other lookups remain valid.
    #[error("no record at index {0}")]
    NotFound(u64),

    /// A record is present at this index but its bytes could not be
    /// decoded. Distinct from [`CacheError::NotFound`] so callers can tell
    /// "missing" from "present but unreadable" apart.
    #[error("record at index {index} could not be decoded")]
    CorruptRecord {
        /// The index whose stored bytes failed to decode.
        index: u64,
        /// The codec failure.
        #[source]
        source: CodecError,
    },

    /// Storage engine error.
    #[error("storage engine error: {0}")]
    Storage(#[from] heed::Error),

    /// Codec error outside of a per-record lookup.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
