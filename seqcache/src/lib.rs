//! seqcache - Write-Once, Read-Many LMDB Sequence Cache
//!
//! Materializes the results of an arbitrary (often expensive) iterable
//! computation once, durably, as a sequence of index-keyed records in LMDB;
//! any number of independent reader processes then access records by integer
//! index with minimal overhead and no write contention.
//!
//! # Design Philosophy
//!
//! The two parts with real engineering risk are isolated into their own
//! modules:
//!
//! - [`writer`] together with the extent planner owns the write-time
//!   capacity-management and batched-commit protocol: bounded batches, one
//!   transaction per batch, and a bounded grow-and-retry loop when the
//!   engine's capacity ceiling is exhausted.
//! - [`store`] owns the read-side fork-safe lazy-binding discipline: a
//!   [`Cache`] carries only a directory path across process and
//!   serialization boundaries, and every process binds its own read-only,
//!   non-locking environment on first use.
//!
//! Everything else is deliberately thin: codecs are a pluggable two-way
//! transform, and the read API is length, indexed lookup, and existence.
//!
//! # Example
//!
//! ```ignore
//! use seqcache::CompressedCache;
//!
//! // Populate once...
//! let items = (0..1000).map(|i| format!("data_{i}"));
//! let cache = CompressedCache::<String>::populate("/var/cache/answers", items)?;
//!
//! // ...then hand the descriptor to any number of worker processes.
//! let payload = serde_json::to_string(&cache)?;
//! // In each worker:
//! let cache: CompressedCache<String> = serde_json::from_str(&payload)?;
//! assert_eq!(cache.get(500)?, "data_500");
//! ```

pub mod cache;
pub mod codec;
pub mod error;
pub mod extent;
pub mod store;

mod writer;

pub use cache::{Cache, CompressedCache, PlainCache, PopulateOptions};
pub use codec::{BincodeCodec, Codec, JsonCodec, ZstdCodec, DEFAULT_COMPRESSION_LEVEL};
pub use error::{CacheError, CodecError};
pub use extent::ExtentPlanner;
pub use store::{cache_exists, StoreHandle, DATA_FILE, LOCK_FILE};
