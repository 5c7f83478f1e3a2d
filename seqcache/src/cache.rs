//! The public cache type: populate once, read from anywhere.
//!
//! A [`Cache`] is a lightweight descriptor over a populated directory. It is
//! freely clonable and serializable; only the resolved directory path (and
//! the codec configuration) crosses a process boundary, and each receiving
//! process lazily opens its own read-only environment on first lookup. Reads
//! take no write lock and run fully in parallel across threads and
//! processes.
//!
//! # Example
//!
//! ```ignore
//! use seqcache::CompressedCache;
//!
//! let items = (0..1000).map(|i| format!("data_{i}"));
//! let cache = CompressedCache::<String>::populate("/tmp/my-cache", items)?;
//!
//! assert_eq!(cache.len()?, 1000);
//! assert_eq!(cache.get(500)?, "data_500");
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::codec::{BincodeCodec, Codec, ZstdCodec};
use crate::error::CacheError;
use crate::store::{self, StoreHandle};
use crate::writer;

/// Uncompressed cache storing bincode-encoded values.
pub type PlainCache<T> = Cache<BincodeCodec<T>>;

/// Cache storing zstd-compressed bincode-encoded values.
pub type CompressedCache<T> = Cache<ZstdCodec<BincodeCodec<T>>>;

/// Tuning knobs for [`Cache::populate_with_codec`].
#[derive(Debug, Clone)]
pub struct PopulateOptions {
    /// Records per commit transaction. The last batch may be short.
    pub batch_size: usize,
    /// Starting map-size ceiling in bytes.
    pub initial_extent: usize,
    /// Minimum growth unit in bytes when the ceiling is exhausted.
    pub growth_block: usize,
    /// Overshoot factor applied on growth to amortize reopen cost.
    pub growth_multiplier: usize,
}

impl Default for PopulateOptions {
    fn default() -> Self {
        Self {
            batch_size: 128,
            initial_extent: 10 << 20,
            growth_block: 1 << 20,
            growth_multiplier: 100,
        }
    }
}

/// Removes a partially populated directory unless disarmed.
///
/// Armed for the whole population pass, including unwinds out of the source
/// iterator, so a crash never leaves a directory that a later valid-cache
/// check could misidentify.
struct CleanupGuard<'p> {
    path: &'p Path,
    armed: bool,
}

impl<'p> CleanupGuard<'p> {
    fn new(path: &'p Path) -> Self {
        Self { path, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for CleanupGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let _ = fs::remove_dir_all(self.path);
        }
    }
}

/// Resolve a cache directory path to an absolute form.
///
/// The resolved path is what travels across process boundaries, so relative
/// paths must be pinned down before the handle is constructed.
fn resolve_path(path: &Path) -> Result<PathBuf, CacheError> {
    if path.exists() {
        Ok(fs::canonicalize(path)?)
    } else {
        Ok(std::path::absolute(path)?)
    }
}

/// Whether an existing directory has no entries at all.
fn dir_is_empty(path: &Path) -> Result<bool, CacheError> {
    Ok(fs::read_dir(path)?.next().is_none())
}

/// A write-once, read-many cache of index-keyed records over LMDB.
///
/// Records are keyed by their 0-based position in the source sequence,
/// encoded as decimal strings. After population the cache is immutable:
/// there is no update or delete surface, only indexed lookups.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cache<C> {
    handle: StoreHandle,
    codec: C,
}

impl<C: Codec> Cache<C> {
    /// Open an existing cache with an explicit codec.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::InvalidCache`] if the directory is absent or
    /// does not hold both storage artifacts, and
    /// [`CacheError::NotADirectory`] if the path is not a directory.
    pub fn open_with_codec<P: AsRef<Path>>(path: P, codec: C) -> Result<Self, CacheError> {
        let path = resolve_path(path.as_ref())?;
        if !store::cache_exists(&path)? {
            return Err(CacheError::InvalidCache {
                path,
                reason: format!("missing {} or {}", store::DATA_FILE, store::LOCK_FILE),
            });
        }
        Ok(Self {
            handle: StoreHandle::unbound(path),
            codec,
        })
    }

    /// Materialize a source sequence into a cache directory, or open the
    /// cache that is already there.
    ///
    /// Idempotent re-run: if `path` already holds a valid cache, the source
    /// is not consumed and the existing cache is opened directly. An empty
    /// directory at `path` is reclaimed; a non-empty directory that is not a
    /// valid cache fails with [`CacheError::InvalidCache`] rather than being
    /// deleted.
    ///
    /// On any fatal failure the partially created directory is removed
    /// before the error propagates as [`CacheError::PopulationFailure`].
    pub fn populate_with_codec<P, I>(
        path: P,
        source: I,
        codec: C,
        options: PopulateOptions,
    ) -> Result<Self, CacheError>
    where
        P: AsRef<Path>,
        I: IntoIterator<Item = C::Value>,
    {
        let path = resolve_path(path.as_ref())?;

        if store::cache_exists(&path)? {
            return Self::open_with_codec(path, codec);
        }
        if path.exists() {
            if dir_is_empty(&path)? {
                fs::remove_dir(&path)?;
            } else {
                return Err(CacheError::InvalidCache {
                    path,
                    reason: "directory exists, is not empty, and is not a cache".to_string(),
                });
            }
        }

        fs::create_dir_all(&path)?;
        let mut guard = CleanupGuard::new(&path);

        writer::populate(&path, source, &codec, &options).map_err(|e| {
            CacheError::PopulationFailure {
                path: path.clone(),
                source: Box::new(e),
            }
        })?;

        if !store::cache_exists(&path)? {
            return Err(CacheError::PopulationFailure {
                path: path.clone(),
                source: Box::new(CacheError::InvalidCache {
                    path: path.clone(),
                    reason: "population finished without both storage artifacts".to_string(),
                }),
            });
        }

        guard.disarm();
        tracing::debug!(path = %path.display(), "cache populated");
        Self::open_with_codec(&path, codec)
    }

    /// Number of committed records.
    ///
    /// Backed by the engine's own entry count, so it reflects on-disk truth
    /// even when this handle was bound by a different process than the one
    /// that populated the cache.
    pub fn len(&self) -> Result<u64, CacheError> {
        let binding = self.handle.binding()?;
        let rtxn = binding.env.read_txn()?;
        Ok(binding.db.len(&rtxn)?)
    }

    /// Whether the cache holds no records.
    pub fn is_empty(&self) -> Result<bool, CacheError> {
        Ok(self.len()? == 0)
    }

    /// Look up the record at `index`.
    ///
    /// # Errors
    ///
    /// [`CacheError::NotFound`] if no record was written at `index`;
    /// [`CacheError::CorruptRecord`] if the stored bytes fail to decode.
    pub fn get(&self, index: u64) -> Result<C::Value, CacheError> {
        let binding = self.handle.binding()?;
        let rtxn = binding.env.read_txn()?;
        let key = index.to_string();
        match binding.db.get(&rtxn, &key)? {
            Some(bytes) => self
                .codec
                .decode(bytes)
                .map_err(|source| CacheError::CorruptRecord { index, source }),
            None => Err(CacheError::NotFound(index)),
        }
    }

    /// Whether a record exists at `index`.
    pub fn contains(&self, index: u64) -> Result<bool, CacheError> {
        let binding = self.handle.binding()?;
        let rtxn = binding.env.read_txn()?;
        Ok(binding.db.get(&rtxn, &index.to_string())?.is_some())
    }

    /// Iterate records in index order, `0..len`.
    pub fn iter(&self) -> Result<impl Iterator<Item = Result<C::Value, CacheError>> + '_, CacheError> {
        let len = self.len()?;
        Ok((0..len).map(move |index| self.get(index)))
    }

    /// The resolved cache directory.
    pub fn path(&self) -> &Path {
        self.handle.path()
    }
}

impl<C: Codec + Default> Cache<C> {
    /// Open an existing cache with the codec's default configuration.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, CacheError> {
        Self::open_with_codec(path, C::default())
    }

    /// [`Cache::populate_with_codec`] with a default codec and default
    /// [`PopulateOptions`].
    pub fn populate<P, I>(path: P, source: I) -> Result<Self, CacheError>
    where
        P: AsRef<Path>,
        I: IntoIterator<Item = C::Value>,
    {
        Self::populate_with_codec(path, source, C::default(), PopulateOptions::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CodecError;
    use std::cell::Cell;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn strings(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("data_{i}")).collect()
    }

    #[test]
    fn populate_then_read_scenario() {
        let tmp = TempDir::new().expect("tempdir creation should succeed");
        let dir = tmp.path().join("cache");

        let cache =
            CompressedCache::<String>::populate(&dir, strings(1000)).expect("populate should succeed");

        assert_eq!(cache.len().expect("len should succeed"), 1000);
        assert_eq!(cache.get(500).expect("get should succeed"), "data_500");
        assert!(matches!(cache.get(1000), Err(CacheError::NotFound(1000))));
    }

    #[test]
    fn order_is_preserved() {
        let tmp = TempDir::new().expect("tempdir creation should succeed");
        let dir = tmp.path().join("cache");
        let data = strings(257); // not a multiple of the batch size

        let cache =
            PlainCache::<String>::populate(&dir, data.clone()).expect("populate should succeed");

        for (i, expected) in data.iter().enumerate() {
            assert_eq!(&cache.get(i as u64).expect("get should succeed"), expected);
        }
    }

    #[test]
    fn iter_yields_records_in_order() {
        let tmp = TempDir::new().expect("tempdir creation should succeed");
        let dir = tmp.path().join("cache");
        let data = strings(40);

        let cache =
            PlainCache::<String>::populate(&dir, data.clone()).expect("populate should succeed");
        let read: Vec<String> = cache
            .iter()
            .expect("iter should succeed")
            .collect::<Result<_, _>>()
            .expect("all records should decode");
        assert_eq!(read, data);
    }

    #[test]
    fn empty_source_yields_empty_cache() {
        let tmp = TempDir::new().expect("tempdir creation should succeed");
        let dir = tmp.path().join("cache");

        let cache = PlainCache::<String>::populate(&dir, Vec::new())
            .expect("populate should succeed");
        assert!(cache.is_empty().expect("is_empty should succeed"));
        assert!(matches!(cache.get(0), Err(CacheError::NotFound(0))));
    }

    #[test]
    fn contains_distinguishes_written_indices() {
        let tmp = TempDir::new().expect("tempdir creation should succeed");
        let dir = tmp.path().join("cache");

        let cache =
            PlainCache::<String>::populate(&dir, strings(10)).expect("populate should succeed");
        assert!(cache.contains(9).expect("contains should succeed"));
        assert!(!cache.contains(10).expect("contains should succeed"));
    }

    #[test]
    fn repopulation_does_not_consume_source() {
        let tmp = TempDir::new().expect("tempdir creation should succeed");
        let dir = tmp.path().join("cache");

        PlainCache::<String>::populate(&dir, strings(25)).expect("populate should succeed");

        // A second run over a valid cache must open it without touching
        // the source sequence at all.
        let untouched = std::iter::from_fn(|| -> Option<String> {
            panic!("source must not be consumed on re-run")
        });
        let cache =
            PlainCache::<String>::populate(&dir, untouched).expect("re-run should succeed");
        assert_eq!(cache.len().expect("len should succeed"), 25);
        assert_eq!(cache.get(24).expect("get should succeed"), "data_24");
    }

    #[test]
    fn populate_reclaims_empty_directory() {
        let tmp = TempDir::new().expect("tempdir creation should succeed");
        let dir = tmp.path().join("cache");
        fs::create_dir(&dir).expect("mkdir should succeed");

        let cache =
            PlainCache::<String>::populate(&dir, strings(5)).expect("populate should succeed");
        assert_eq!(cache.len().expect("len should succeed"), 5);
    }

    #[test]
    fn populate_refuses_foreign_directory() {
        let tmp = TempDir::new().expect("tempdir creation should succeed");
        let dir = tmp.path().join("cache");
        fs::create_dir(&dir).expect("mkdir should succeed");
        fs::write(dir.join("unrelated.txt"), b"not ours").expect("write should succeed");

        let err = PlainCache::<String>::populate(&dir, strings(5)).unwrap_err();
        assert!(matches!(err, CacheError::InvalidCache { .. }));
        // The foreign file survives untouched.
        assert!(dir.join("unrelated.txt").exists());
    }

    #[test]
    fn open_missing_directory_fails() {
        let tmp = TempDir::new().expect("tempdir creation should succeed");
        let err = PlainCache::<String>::open(tmp.path().join("nonexistent")).unwrap_err();
        assert!(matches!(err, CacheError::InvalidCache { .. }));
    }

    /// Codec that fails encoding after a fixed number of items, to force a
    /// mid-population failure.
    #[derive(Debug)]
    struct FlakyCodec {
        inner: BincodeCodec<String>,
        fail_after: u64,
        encoded: Cell<u64>,
    }

    impl FlakyCodec {
        fn new(fail_after: u64) -> Self {
            Self {
                inner: BincodeCodec::new(),
                fail_after,
                encoded: Cell::new(0),
            }
        }
    }

    impl Codec for FlakyCodec {
        type Value = String;

        fn encode(&self, value: &String) -> Result<Vec<u8>, CodecError> {
            if self.encoded.get() >= self.fail_after {
                return Err(CodecError::Encode("synthetic mid-population failure".into()));
            }
            self.encoded.set(self.encoded.get() + 1);
            self.inner.encode(value)
        }

        fn decode(&self, bytes: &[u8]) -> Result<String, CodecError> {
            self.inner.decode(bytes)
        }
    }

    #[test]
    fn failed_population_removes_directory() {
        let tmp = TempDir::new().expect("tempdir creation should succeed");
        let dir = tmp.path().join("cache");

        let err = Cache::populate_with_codec(
            &dir,
            strings(100),
            FlakyCodec::new(50),
            PopulateOptions::default(),
        )
        .unwrap_err();

        assert!(matches!(err, CacheError::PopulationFailure { .. }));
        assert!(!dir.exists(), "no partial artifacts may survive");
    }

    #[test]
    fn growth_from_tiny_extent_keeps_all_records() {
        let tmp = TempDir::new().expect("tempdir creation should succeed");

        // Deterministic but uneven value sizes, far beyond the starting
        // extent, across several batch sizes including the degenerate one.
        let data: Vec<String> = (0..64)
            .map(|i: usize| "x".repeat((i * 131_071) % (256 * 1024)))
            .collect();

        for batch_size in [1, 7, 128] {
            let dir = tmp.path().join(format!("cache_batch_{batch_size}"));
            let options = PopulateOptions {
                batch_size,
                initial_extent: 1,
                growth_block: 1 << 16,
                growth_multiplier: 10,
            };
            let cache = Cache::populate_with_codec(
                &dir,
                data.clone(),
                BincodeCodec::<String>::new(),
                options,
            )
            .expect("populate should survive repeated extent growth");

            assert_eq!(cache.len().expect("len should succeed"), data.len() as u64);
            for (i, expected) in data.iter().enumerate() {
                assert_eq!(&cache.get(i as u64).expect("get should succeed"), expected);
            }
        }
    }

    /// Deterministic pseudo-random generator for the full-scale stress run.
    fn splitmix64(mut x: u64) -> u64 {
        x = x.wrapping_add(0x9e37_79b9_7f4a_7c15);
        x = (x ^ (x >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
        x = (x ^ (x >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
        x ^ (x >> 31)
    }

    fn stress_item(i: u64) -> Vec<u8> {
        let len = (splitmix64(i) % (10 << 20)) as usize;
        vec![(i % 251) as u8; len]
    }

    /// Full-scale growth stress: 10 000 items of random size 0-10 MiB each,
    /// degenerate batch size, extent starting at a single byte. Writes tens
    /// of gigabytes, so it only runs on demand:
    /// `cargo test -- --ignored full_scale_growth_stress`.
    #[test]
    #[ignore]
    fn full_scale_growth_stress() {
        let tmp = TempDir::new().expect("tempdir creation should succeed");
        let dir = tmp.path().join("cache");

        let options = PopulateOptions {
            batch_size: 1,
            initial_extent: 1,
            growth_block: 1 << 20,
            growth_multiplier: 10,
        };
        let cache = Cache::populate_with_codec(
            &dir,
            (0..10_000).map(stress_item),
            BincodeCodec::<Vec<u8>>::new(),
            options,
        )
        .expect("populate should survive repeated extent growth");

        assert_eq!(cache.len().expect("len should succeed"), 10_000);
        for i in 0..10_000u64 {
            assert_eq!(
                cache.get(i).expect("get should succeed"),
                stress_item(i),
                "record {i} must read back independently and intact"
            );
        }
    }

    #[test]
    fn descriptor_serde_roundtrip_rebinds() {
        let tmp = TempDir::new().expect("tempdir creation should succeed");
        let dir = tmp.path().join("cache");

        let cache =
            PlainCache::<String>::populate(&dir, strings(12)).expect("populate should succeed");
        assert_eq!(cache.get(3).expect("get should succeed"), "data_3");

        // Only the path and codec configuration cross the boundary; the
        // reconstructed cache binds its own environment on first use.
        let descriptor = serde_json::to_string(&cache).expect("serialize should succeed");
        let restored: PlainCache<String> =
            serde_json::from_str(&descriptor).expect("deserialize should succeed");
        assert_eq!(restored.get(3).expect("get should succeed"), "data_3");
        assert_eq!(restored.path(), cache.path());
    }

    #[test]
    fn concurrent_readers_share_one_cache() {
        let tmp = TempDir::new().expect("tempdir creation should succeed");
        let dir = tmp.path().join("cache");
        let data = strings(100);

        let cache = Arc::new(
            CompressedCache::<String>::populate(&dir, data.clone())
                .expect("populate should succeed"),
        );

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let data = data.clone();
                std::thread::spawn(move || {
                    for (i, expected) in data.iter().enumerate() {
                        assert_eq!(&cache.get(i as u64).expect("get should succeed"), expected);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().expect("reader thread should not panic");
        }
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(32))]

            /// Property: after populate, every index reads back the source
            /// item and the first index past the end is NotFound.
            #[test]
            fn prop_populate_preserves_sequence(
                values in proptest::collection::vec(any::<Vec<u8>>(), 0..48),
            ) {
                let tmp = TempDir::new().expect("tempdir creation should succeed");
                let dir = tmp.path().join("cache");
                let options = PopulateOptions {
                    batch_size: 16,
                    ..PopulateOptions::default()
                };

                let cache = Cache::populate_with_codec(
                    &dir,
                    values.clone(),
                    BincodeCodec::<Vec<u8>>::new(),
                    options,
                )
                .expect("populate should succeed");

                prop_assert_eq!(cache.len().expect("len should succeed"), values.len() as u64);
                for (i, expected) in values.iter().enumerate() {
                    let read = cache.get(i as u64).expect("get should succeed");
                    prop_assert_eq!(&read, expected);
                }
                let past_end = values.len() as u64;
                prop_assert!(matches!(cache.get(past_end), Err(CacheError::NotFound(_))));
            }
        }
    }
}
