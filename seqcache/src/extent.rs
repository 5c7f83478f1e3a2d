//! Extent planning for write-time capacity growth.
//!
//! LMDB refuses writes once its memory map is full, so the writer has to
//! pick a map size up front and grow it when the engine reports exhaustion.
//! The planner tracks an estimate of bytes written so far (`key length +
//! value length` per record, committed or attempted) and computes the next
//! ceiling when a batch hits `MDB_MAP_FULL`. The estimate only decides when
//! and by how much to grow; the engine's own accounting stays authoritative.

/// Decides the next storage-extent size when the engine reports exhaustion.
#[derive(Debug, Clone)]
pub struct ExtentPlanner {
    /// Bytes committed or attempted so far (estimate).
    seen_bytes: u64,
    /// The current map-size ceiling.
    current_extent: usize,
    /// Minimum growth unit, so tiny batches still grow meaningfully.
    growth_block: usize,
    /// Overshoot factor applied on growth to amortize reopen cost.
    growth_multiplier: usize,
}

impl ExtentPlanner {
    /// Create a planner starting from `initial_extent`.
    pub fn new(initial_extent: usize, growth_block: usize, growth_multiplier: usize) -> Self {
        Self {
            seen_bytes: 0,
            current_extent: initial_extent,
            growth_block,
            growth_multiplier,
        }
    }

    /// The current map-size ceiling.
    pub fn current_extent(&self) -> usize {
        self.current_extent
    }

    /// Bytes committed or attempted so far.
    pub fn seen_bytes(&self) -> u64 {
        self.seen_bytes
    }

    /// Account for a batch that is about to be committed.
    pub fn record(&mut self, batch_bytes: u64) {
        self.seen_bytes += batch_bytes;
    }

    /// Compute and adopt the next ceiling after a failed batch.
    ///
    /// `running_total + max(growth_block, failed_batch_bytes) * multiplier`:
    /// the overshoot past the immediate need keeps reopen events rare even
    /// when item sizes fluctuate.
    pub fn grow_for(&mut self, failed_batch_bytes: usize) -> usize {
        let unit = self.growth_block.max(failed_batch_bytes);
        self.current_extent = self.seen_bytes as usize + unit * self.growth_multiplier;
        self.current_extent
    }
}
