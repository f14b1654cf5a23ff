//! Walk statistics counters.
//!
//! Purely diagnostic: none of these counters participate in the tree's
//! observable contract.

use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

/// Snapshot of tree walk statistics at a point in time.
#[derive(Default, Debug, Clone, Copy)]
pub struct WalkStatsSnapshot {
    /// Inserts that jumped straight to the largest-key leaf.
    pub fast_path_hits: u64,
    /// Inserts that ran the full descent.
    pub fast_path_misses: u64,
    /// Midpoint splits.
    pub splits_even: u64,
    /// Right-edge splits that kept everything but one bucket on the left.
    pub splits_uneven: u64,
}

/// Counters maintained by the tree walk.
#[derive(Default)]
pub struct WalkStats {
    fast_path_hits: AtomicU64,
    fast_path_misses: AtomicU64,
    splits_even: AtomicU64,
    splits_uneven: AtomicU64,
}

impl WalkStats {
    /// Returns the number of fast-path inserts.
    pub fn fast_path_hits(&self) -> u64 {
        self.fast_path_hits.load(AtomicOrdering::Relaxed)
    }

    /// Returns the number of full-descent inserts.
    pub fn fast_path_misses(&self) -> u64 {
        self.fast_path_misses.load(AtomicOrdering::Relaxed)
    }

    /// Returns the number of midpoint splits.
    pub fn splits_even(&self) -> u64 {
        self.splits_even.load(AtomicOrdering::Relaxed)
    }

    /// Returns the number of right-edge uneven splits.
    pub fn splits_uneven(&self) -> u64 {
        self.splits_uneven.load(AtomicOrdering::Relaxed)
    }

    pub(crate) fn inc_fast_path_hits(&self) {
        self.fast_path_hits.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn inc_fast_path_misses(&self) {
        self.fast_path_misses.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn inc_splits_even(&self) {
        self.splits_even.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn inc_splits_uneven(&self) {
        self.splits_uneven.fetch_add(1, AtomicOrdering::Relaxed);
    }

    /// Creates a snapshot of all current counters.
    pub fn snapshot(&self) -> WalkStatsSnapshot {
        WalkStatsSnapshot {
            fast_path_hits: self.fast_path_hits(),
            fast_path_misses: self.fast_path_misses(),
            splits_even: self.splits_even(),
            splits_uneven: self.splits_uneven(),
        }
    }

    /// Emits current counters to the tracing infrastructure.
    pub fn emit_tracing(&self) {
        let snapshot = self.snapshot();
        tracing::info!(
            target: "encina::stats",
            fast_path_hits = snapshot.fast_path_hits,
            fast_path_misses = snapshot.fast_path_misses,
            splits_even = snapshot.splits_even,
            splits_uneven = snapshot.splits_uneven,
            "walk stats snapshot"
        );
    }
}
