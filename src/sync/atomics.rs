//! Atomic helpers for statistics and queue selection.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// An atomic counter for statistics.
pub struct AtomicCounter(AtomicU64);

impl AtomicCounter {
    /// Create a new counter.
    pub const fn new(initial: u64) -> Self {
        Self(AtomicU64::new(initial))
    }

    /// Increment the counter.
    pub fn increment(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    /// Get the current value.
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

impl Default for AtomicCounter {
    fn default() -> Self {
        Self::new(0)
    }
}

/// A lock-free round-robin cursor over a fixed-size set of resources.
///
/// Every call to [`next`](AtomicCursor::next) hands out a distinct draw
/// modulo wraparound; no ordering between concurrent callers is guaranteed,
/// and none is needed for load balancing.
pub struct AtomicCursor(AtomicU32);

impl AtomicCursor {
    /// Create a cursor starting at slot 0.
    pub const fn new() -> Self {
        Self(AtomicU32::new(0))
    }

    /// Take the next slot index out of `len`.
    ///
    /// `len` must be non-zero.
    pub fn next(&self, len: usize) -> usize {
        debug_assert!(len > 0);
        self.0.fetch_add(1, Ordering::Relaxed) as usize % len
    }
}

impl Default for AtomicCursor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_increments() {
        let counter = AtomicCounter::new(0);
        counter.increment();
        counter.increment();
        assert_eq!(counter.get(), 2);
    }

    #[test]
    fn test_cursor_cycles() {
        let cursor = AtomicCursor::new();
        let draws: Vec<usize> = (0..8).map(|_| cursor.next(3)).collect();
        assert_eq!(draws, vec![0, 1, 2, 0, 1, 2, 0, 1]);
    }

    #[test]
    fn test_cursor_single_slot() {
        let cursor = AtomicCursor::new();
        assert_eq!(cursor.next(1), 0);
        assert_eq!(cursor.next(1), 0);
    }
}
