//! Sequence id allocation.

use std::sync::atomic::{AtomicU32, Ordering};

/// Per-connection generator of correlation ids.
///
/// Values increase by one per call and wrap from `u32::MAX` to 0.
#[derive(Debug, Default)]
pub struct SequenceAllocator(AtomicU32);

impl SequenceAllocator {
    /// Allocator whose first id is 0
    pub fn new() -> Self {
        Self::starting_at(0)
    }

    /// Allocator whose first id is `start`
    pub fn starting_at(start: u32) -> Self {
        Self(AtomicU32::new(start))
    }

    /// Take the next id
    pub fn next(&self) -> u32 {
        // fetch_add wraps on overflow
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}
