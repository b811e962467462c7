//! Owned synchronization primitives and their pool factories.
//!
//! The dispatcher's pools store these wrappers; the raw handle is destroyed
//! on the device when the wrapper drops, which happens when a bucket is
//! reclaimed or the pool itself goes away. Construction only ever runs
//! inside a factory while a pool grows.

use std::sync::Arc;

use crate::gpu::traits::{GpuDevice, GpuError};
use crate::pool::ObjectFactory;

/// A device semaphore owned by a pool.
pub struct Semaphore<D: GpuDevice> {
    device: Arc<D>,
    raw: D::RawSemaphore,
}

impl<D: GpuDevice> Semaphore<D> {
    fn create(device: &Arc<D>) -> Result<Self, GpuError> {
        let raw = device.create_semaphore()?;
        Ok(Self {
            device: Arc::clone(device),
            raw,
        })
    }

    /// The raw device handle, for submission.
    pub fn raw(&self) -> D::RawSemaphore {
        self.raw
    }
}

impl<D: GpuDevice> Drop for Semaphore<D> {
    fn drop(&mut self) {
        self.device.destroy_semaphore(self.raw);
    }
}

/// A device fence owned by a pool.
pub struct Fence<D: GpuDevice> {
    device: Arc<D>,
    raw: D::RawFence,
}

impl<D: GpuDevice> Fence<D> {
    fn create(device: &Arc<D>) -> Result<Self, GpuError> {
        let raw = device.create_fence()?;
        Ok(Self {
            device: Arc::clone(device),
            raw,
        })
    }

    /// The raw device handle, for submission and waits.
    pub fn raw(&self) -> D::RawFence {
        self.raw
    }
}

impl<D: GpuDevice> Drop for Fence<D> {
    fn drop(&mut self) {
        self.device.destroy_fence(self.raw);
    }
}

/// Pool factory for semaphores.
pub struct SemaphoreFactory<D: GpuDevice> {
    device: Arc<D>,
}

impl<D: GpuDevice> SemaphoreFactory<D> {
    /// Create a factory bound to `device`.
    pub fn new(device: Arc<D>) -> Self {
        Self { device }
    }
}

impl<D: GpuDevice> ObjectFactory for SemaphoreFactory<D> {
    type Object = Semaphore<D>;
    type Error = GpuError;

    fn create(&mut self) -> Result<Semaphore<D>, GpuError> {
        Semaphore::create(&self.device)
    }
}

/// Pool factory for fences.
pub struct FenceFactory<D: GpuDevice> {
    device: Arc<D>,
}

impl<D: GpuDevice> FenceFactory<D> {
    /// Create a factory bound to `device`.
    pub fn new(device: Arc<D>) -> Self {
        Self { device }
    }
}

impl<D: GpuDevice> ObjectFactory for FenceFactory<D> {
    type Object = Fence<D>;
    type Error = GpuError;

    fn create(&mut self) -> Result<Fence<D>, GpuError> {
        Fence::create(&self.device)
    }
}
