//! GPU device trait and error types.
//!
//! This module defines the device surface the dispatcher needs WITHOUT
//! pulling in any backend-specific dependencies.

use std::fmt;
use std::time::Duration;

/// Errors surfaced by a device backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GpuError {
    /// The device failed to create a semaphore or fence.
    PrimitiveCreation,
    /// The device failed to create a command pool for a queue family.
    CommandPoolCreation,
    /// The device failed to allocate a command list.
    CommandListAllocation,
    /// A queue handle could not be retrieved from the device.
    QueueRetrieval,
    /// A queue family descriptor has no queues or no capabilities.
    InvalidFamily,
    /// A bounded wait elapsed before the fence signaled.
    Timeout,
    /// The device was lost; outstanding work will never complete.
    DeviceLost,
    /// Backend-specific error (opaque).
    Backend(String),
}

impl fmt::Display for GpuError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GpuError::PrimitiveCreation => write!(f, "failed to create synchronization primitive"),
            GpuError::CommandPoolCreation => write!(f, "failed to create command pool"),
            GpuError::CommandListAllocation => write!(f, "failed to allocate command list"),
            GpuError::QueueRetrieval => write!(f, "failed to retrieve queue handle"),
            GpuError::InvalidFamily => write!(f, "queue family has no queues or no capabilities"),
            GpuError::Timeout => write!(f, "fence wait timed out"),
            GpuError::DeviceLost => write!(f, "device lost"),
            GpuError::Backend(msg) => write!(f, "backend error: {}", msg),
        }
    }
}

impl std::error::Error for GpuError {}

/// Device operations the dispatcher builds on.
///
/// Raw semaphore and fence handles are `Copy` so that pooled tickets can
/// carry them out of a locked pool; ownership and destruction stay with the
/// pool-held wrappers in [`primitives`](crate::gpu::primitives).
pub trait GpuDevice: Send + Sync {
    /// A physical queue handle.
    type Queue: Send;
    /// Raw device-side ordering primitive.
    type RawSemaphore: Copy + Send;
    /// Raw host-waitable completion primitive.
    type RawFence: Copy + Send;
    /// Command pool tied to one queue family.
    type CommandPool: Send;
    /// Recorded-command container allocated from a pool.
    type CommandList: Send;

    /// Retrieve a queue handle of a family.
    fn queue(&self, family_index: u32, queue_index: u32) -> Result<Self::Queue, GpuError>;

    /// Create a command pool compatible with a family.
    fn create_command_pool(&self, family_index: u32) -> Result<Self::CommandPool, GpuError>;

    /// Allocate a command list from `pool`.
    ///
    /// The caller must hold exclusive access to `pool`; command pools are
    /// not internally synchronized on any real backend.
    fn allocate_command_list(&self, pool: &Self::CommandPool) -> Result<Self::CommandList, GpuError>;

    /// Create a semaphore.
    fn create_semaphore(&self) -> Result<Self::RawSemaphore, GpuError>;

    /// Create a fence in the unsignaled state.
    fn create_fence(&self) -> Result<Self::RawFence, GpuError>;

    /// Destroy a semaphore previously created by this device.
    fn destroy_semaphore(&self, semaphore: Self::RawSemaphore);

    /// Destroy a fence previously created by this device.
    fn destroy_fence(&self, fence: Self::RawFence);

    /// Block until `fence` signals.
    ///
    /// With `timeout` of `None` the wait is unbounded and a lost device can
    /// hang the caller; pass a bound to get [`GpuError::Timeout`] instead.
    fn wait_fence(&self, fence: Self::RawFence, timeout: Option<Duration>) -> Result<(), GpuError>;

    /// Return `fence` to the unsignaled state.
    fn reset_fence(&self, fence: Self::RawFence) -> Result<(), GpuError>;
}
