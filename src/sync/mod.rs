//! Synchronization primitives shared across the crate.

pub mod atomics;
pub mod mutex;

pub use atomics::{AtomicCounter, AtomicCursor};
pub use mutex::{Mutex, MutexGuard};
