//! LMDB environment lifecycle: write-capable open/close for population and
//! fork-safe lazy read binding for everything after it.
//!
//! # Fork Safety
//!
//! A native LMDB environment handle is only valid in the process that opened
//! it. A [`StoreHandle`] therefore carries the resolved directory path across
//! clone, serialization, and fork boundaries, and opens its own read-only
//! environment lazily on first use in each process. Cloning or deserializing
//! a handle always yields an *unbound* one.
//!
//! # One Environment Per (Process, Directory)
//!
//! heed refuses to open the same environment path twice within a process, so
//! read bindings go through a process-wide registry keyed by the resolved
//! path. Two caches over the same directory in one process share a single
//! environment; independent processes each open their own.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use heed::types::{Bytes, Str};
use heed::{Database, Env, EnvFlags, EnvOpenOptions};
use once_cell::sync::{Lazy, OnceCell};
use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

use crate::error::CacheError;

/// LMDB's primary data artifact inside a cache directory.
pub const DATA_FILE: &str = "data.mdb";

/// LMDB's lock artifact inside a cache directory.
pub const LOCK_FILE: &str = "lock.mdb";

/// Reader-slot capacity for read-only environments. Generous so thousands
/// of worker processes can attach to one directory without contention.
const MAX_READERS: u32 = 4096;

/// LMDB map sizes are page-granular.
const PAGE_SIZE: usize = 4096;

/// Read environments already opened by this process, keyed by resolved path.
static READ_BINDINGS: Lazy<Mutex<HashMap<PathBuf, ReadBinding>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// An opened read-only environment together with its main database.
#[derive(Clone)]
pub(crate) struct ReadBinding {
    pub(crate) env: Env,
    pub(crate) db: Database<Str, Bytes>,
}

/// Check whether a directory holds a complete cache.
///
/// A directory is a valid cache iff both the data file and the lock file are
/// present. Population removes its target directory on any failure, so a
/// directory passing this check was fully populated.
///
/// # Errors
///
/// Returns [`CacheError::NotADirectory`] if the path exists but is not a
/// directory.
pub fn cache_exists<P: AsRef<Path>>(path: P) -> Result<bool, CacheError> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(false);
    }
    if !path.is_dir() {
        return Err(CacheError::NotADirectory(path.to_path_buf()));
    }
    Ok(path.join(DATA_FILE).is_file() && path.join(LOCK_FILE).is_file())
}

/// Round a requested map size up to page granularity.
///
/// The floor leaves room for LMDB's two meta pages plus a first data page,
/// so even a degenerate requested extent opens; the first real batch then
/// trips the capacity ceiling and the writer's growth path takes over.
fn page_aligned(map_size: usize) -> usize {
    map_size.max(4 * PAGE_SIZE).next_multiple_of(PAGE_SIZE)
}

/// Open the environment write-capable with the given map-size ceiling and
/// make sure the main database exists.
///
/// Used exclusively by population; there is exactly one write-capable
/// environment per cache, ever.
pub(crate) fn open_write(
    path: &Path,
    map_size: usize,
) -> Result<(Env, Database<Str, Bytes>), CacheError> {
    let env = unsafe {
        EnvOpenOptions::new()
            .map_size(page_aligned(map_size))
            .max_dbs(1)
            .open(path)
    }?;

    let mut wtxn = env.write_txn()?;
    let db: Database<Str, Bytes> = env.create_database(&mut wtxn, None)?;
    wtxn.commit()?;

    Ok((env, db))
}

/// Close a write environment and block until the engine has released it.
///
/// Must run before reopening the same directory with a larger map size:
/// heed keeps environments registered per path until fully closed.
pub(crate) fn close_write(env: Env) {
    env.prepare_for_closing().wait();
}

/// Open (or reuse) this process's read-only environment for a directory.
///
/// The environment is opened read-only, non-locking, without read-ahead and
/// without zeroing mapped memory, with [`MAX_READERS`] reader slots. A write
/// transaction against it fails inside the engine, by construction.
fn open_read(path: &Path) -> Result<ReadBinding, CacheError> {
    if !cache_exists(path)? {
        return Err(CacheError::InvalidCache {
            path: path.to_path_buf(),
            reason: format!("missing {DATA_FILE} or {LOCK_FILE}"),
        });
    }

    let mut registry = READ_BINDINGS.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(binding) = registry.get(path) {
        return Ok(binding.clone());
    }

    let mut options = EnvOpenOptions::new();
    options.max_readers(MAX_READERS);
    let env = unsafe {
        options.flags(
            EnvFlags::READ_ONLY
                | EnvFlags::NO_LOCK
                | EnvFlags::NO_READ_AHEAD
                | EnvFlags::NO_MEM_INIT,
        );
        options.open(path)
    }?;

    let rtxn = env.read_txn()?;
    let db: Database<Str, Bytes> =
        env.open_database(&rtxn, None)?
            .ok_or_else(|| CacheError::InvalidCache {
                path: path.to_path_buf(),
                reason: "main database missing".to_string(),
            })?;
    drop(rtxn);

    let binding = ReadBinding { env, db };
    registry.insert(path.to_path_buf(), binding.clone());
    tracing::debug!(path = %path.display(), "bound read-only environment");
    Ok(binding)
}

/// A process-local, lazily bound handle to a cache directory.
///
/// Two states: unbound (path only, the state that travels across process
/// and serialization boundaries) and bound (path plus an open read-only
/// environment). Binding happens on the first read operation in a process
/// and persists for the life of the process; the environment is never
/// reopened read-write through this handle.
pub struct StoreHandle {
    path: PathBuf,
    binding: OnceCell<ReadBinding>,
}

impl StoreHandle {
    /// Create an unbound handle over a resolved cache directory path.
    pub(crate) fn unbound(path: PathBuf) -> Self {
        Self {
            path,
            binding: OnceCell::new(),
        }
    }

    /// The cache directory this handle is scoped to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether this handle has opened its environment in this process.
    pub fn is_bound(&self) -> bool {
        self.binding.get().is_some()
    }

    /// Bind on first use and return the read binding.
    pub(crate) fn binding(&self) -> Result<&ReadBinding, CacheError> {
        self.binding.get_or_try_init(|| open_read(&self.path))
    }
}

/// Clones are unbound: only the path is carried, the clone re-binds lazily.
impl Clone for StoreHandle {
    fn clone(&self) -> Self {
        Self::unbound(self.path.clone())
    }
}

impl fmt::Debug for StoreHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreHandle")
            .field("path", &self.path)
            .field("bound", &self.is_bound())
            .finish()
    }
}

/// Only the directory path crosses a serialization boundary.
impl Serialize for StoreHandle {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.path.serialize(serializer)
    }
}

/// Deserialized handles start unbound and re-bind on first use.
impl<'de> Deserialize<'de> for StoreHandle {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        PathBuf::deserialize(deserializer).map(StoreHandle::unbound)
    }
}
