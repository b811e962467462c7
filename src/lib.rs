//! # framequeue
//!
//! Per-frame GPU resource pooling and queue dispatch for Rust render
//! engines.
//!
//! ## Features
//!
//! - Bucketed slab pools with O(1) acquire/release and stable handles
//! - Write-once balanced lookup maps for structure-keyed engine state
//! - Capability-flag routing onto physical queues with round-robin
//!   load balancing
//! - Semaphore/fence recycling: steady-state frames create no primitives
//! - Lock-free deferred hand-back for background GPU-wait threads
//! - Backend-neutral device traits; `ash`/Vulkan behind `gpu-vulkan`
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use framequeue::{NullDevice, QueueDispatcher, QueueFamily, WorkTypeFlags};
//!
//! let device = Arc::new(NullDevice::new());
//! let dispatcher = QueueDispatcher::new(
//!     Arc::clone(&device),
//!     &[QueueFamily {
//!         index: 0,
//!         queue_count: 2,
//!         flags: WorkTypeFlags::ALL,
//!     }],
//! )
//! .unwrap();
//!
//! // Per submission
//! let queue = dispatcher.next_queue(WorkTypeFlags::GRAPHICS);
//! let semaphore = dispatcher.acquire_semaphore().unwrap();
//! let fence = dispatcher.acquire_fence().unwrap();
//! // ... record and submit against *queue ...
//! drop(queue);
//!
//! // Once the GPU has signaled (frame N+K)
//! dispatcher.release_semaphore(semaphore);
//! dispatcher.release_fence(fence);
//! ```

pub mod containers;
pub mod dispatch;
pub mod gpu;
pub mod pool;

mod sync;

// Re-export the public API at the crate root for convenience
pub use containers::{ArrayMap, BalancedMap, LookupMiss};
pub use dispatch::{
    DispatchError, DispatcherStats, PooledFence, PooledSemaphore, QueueDispatcher, QueueFamily,
    QueueGuard, WorkTypeFlags,
};
pub use gpu::{GpuDevice, GpuError, NullDevice};
pub use pool::{DefaultFactory, ObjectFactory, PoolError, PoolHandle, PoolStats, SlabPool};
