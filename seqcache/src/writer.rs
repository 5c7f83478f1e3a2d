//! One-time population of a cache directory.
//!
//! The writer consumes the source sequence in bounded batches, assigns each
//! item the next sequential decimal key, encodes it through the codec, and
//! commits every batch as a single LMDB transaction. When the engine reports
//! that the map is full, the batch is retried exactly once after growing the
//! extent; a second failure on the same batch is fatal. Transactions are
//! atomic, so a retried batch can never double-insert.

use std::path::Path;

use heed::types::{Bytes, Str};
use heed::{Database, Env};

use crate::cache::PopulateOptions;
use crate::codec::Codec;
use crate::error::CacheError;
use crate::extent::ExtentPlanner;
use crate::store;

/// Whether an engine error is the transient "extent exhausted" signal.
fn is_map_full(error: &heed::Error) -> bool {
    matches!(error, heed::Error::Mdb(heed::MdbError::MapFull))
}

/// Commit one batch as a single write transaction.
fn commit_batch(
    env: &Env,
    db: Database<Str, Bytes>,
    batch: &[(String, Vec<u8>)],
) -> Result<(), heed::Error> {
    let mut wtxn = env.write_txn()?;
    for (key, value) in batch {
        db.put(&mut wtxn, key, value)?;
    }
    wtxn.commit()
}

/// Pull and encode up to `batch_size` items from the source.
///
/// Items are encoded before the transaction starts so a batch that hits the
/// capacity ceiling can be retried byte-for-byte after the extent grows.
fn next_batch<C, I>(
    source: &mut I,
    codec: &C,
    next_index: &mut u64,
    batch_size: usize,
) -> Result<Vec<(String, Vec<u8>)>, CacheError>
where
    C: Codec,
    I: Iterator<Item = C::Value>,
{
    let mut batch = Vec::with_capacity(batch_size);
    while batch.len() < batch_size {
        let Some(item) = source.next() else { break };
        let key = next_index.to_string();
        *next_index += 1;
        batch.push((key, codec.encode(&item)?));
    }
    Ok(batch)
}

/// Drive the population pass over an already-created, empty directory.
///
/// The caller owns directory creation, the cleanup-on-failure contract, and
/// the final valid-cache assertion; this function owns the write-capable
/// environment from first open to final close.
pub(crate) fn populate<C, I>(
    path: &Path,
    source: I,
    codec: &C,
    options: &PopulateOptions,
) -> Result<(), CacheError>
where
    C: Codec,
    I: IntoIterator<Item = C::Value>,
{
    let mut planner = ExtentPlanner::new(
        options.initial_extent,
        options.growth_block,
        options.growth_multiplier,
    );
    let (mut env, mut db) = store::open_write(path, planner.current_extent())?;

    let mut source = source.into_iter();
    let mut next_index: u64 = 0;
    loop {
        let batch = next_batch(&mut source, codec, &mut next_index, options.batch_size)?;
        if batch.is_empty() {
            break;
        }

        let batch_bytes: u64 = batch
            .iter()
            .map(|(key, value)| (key.len() + value.len()) as u64)
            .sum();
        planner.record(batch_bytes);

        match commit_batch(&env, db, &batch) {
            Ok(()) => {
                tracing::debug!(
                    records = batch.len(),
                    bytes = batch_bytes,
                    total_bytes = planner.seen_bytes(),
                    "committed batch"
                );
            }
            Err(e) if is_map_full(&e) => {
                // Prior commits are durable; only this batch rolled back.
                let new_extent = planner.grow_for(batch_bytes as usize);
                tracing::warn!(
                    new_extent,
                    total_bytes = planner.seen_bytes(),
                    "extent exhausted, reopening with larger map and retrying batch"
                );
                store::close_write(env);
                (env, db) = store::open_write(path, new_extent)?;
                // One retry per batch: a second MapFull here is a growth bug
                // or a pathological single item, and propagates as fatal.
                commit_batch(&env, db, &batch)?;
            }
            Err(e) => return Err(e.into()),
        }
    }

    store::close_write(env);
    Ok(())
}
