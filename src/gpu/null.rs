//! In-process device backend for tests.
//!
//! Hands out sequentially numbered handles and counts every create/destroy,
//! so tests can assert how much primitive construction a pooling strategy
//! actually performs. Fences carry an explicit signaled flag driven by the
//! test via [`signal_fence`](NullDevice::signal_fence).

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use crate::gpu::traits::{GpuDevice, GpuError};
use crate::sync::{AtomicCounter, Mutex};

/// A queue handle of the null device.
///
/// Carries a submission counter so tests can prove they held exclusive
/// access while "submitting".
#[derive(Debug)]
pub struct NullQueue {
    family_index: u32,
    queue_index: u32,
    submissions: u64,
}

impl NullQueue {
    /// Family this queue belongs to.
    pub fn family_index(&self) -> u32 {
        self.family_index
    }

    /// Index of this queue within its family.
    pub fn queue_index(&self) -> u32 {
        self.queue_index
    }

    /// Record a submission against this queue.
    pub fn record_submission(&mut self) {
        self.submissions += 1;
    }

    /// Submissions recorded so far.
    pub fn submissions(&self) -> u64 {
        self.submissions
    }
}

/// Raw semaphore handle of the null device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NullSemaphore(u64);

/// Raw fence handle of the null device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NullFence(u64);

/// Command pool of the null device.
#[derive(Debug)]
pub struct NullCommandPool {
    family_index: u32,
    allocated: AtomicU64,
}

/// Command list of the null device.
#[derive(Debug)]
pub struct NullCommandList {
    family_index: u32,
    id: u64,
}

impl NullCommandList {
    /// Family of the pool this list came from.
    pub fn family_index(&self) -> u32 {
        self.family_index
    }

    /// Sequential id within the pool.
    pub fn id(&self) -> u64 {
        self.id
    }
}

/// Deterministic in-process [`GpuDevice`].
pub struct NullDevice {
    next_id: AtomicU64,
    semaphores_created: AtomicCounter,
    semaphores_destroyed: AtomicCounter,
    fences_created: AtomicCounter,
    fences_destroyed: AtomicCounter,
    signaled: Mutex<HashSet<u64>>,
    fail_primitive_creation: AtomicBool,
}

impl NullDevice {
    /// Create a device with all counters at zero.
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            semaphores_created: AtomicCounter::new(0),
            semaphores_destroyed: AtomicCounter::new(0),
            fences_created: AtomicCounter::new(0),
            fences_destroyed: AtomicCounter::new(0),
            signaled: Mutex::new(HashSet::new()),
            fail_primitive_creation: AtomicBool::new(false),
        }
    }

    /// Make every subsequent semaphore/fence creation fail.
    pub fn fail_primitive_creation(&self, fail: bool) {
        self.fail_primitive_creation.store(fail, Ordering::Relaxed);
    }

    /// Mark a fence as signaled, as the GPU would on completion.
    pub fn signal_fence(&self, fence: NullFence) {
        self.signaled.lock().insert(fence.0);
    }

    /// Whether a fence is currently signaled.
    pub fn is_signaled(&self, fence: NullFence) -> bool {
        self.signaled.lock().contains(&fence.0)
    }

    /// Semaphores created over the device's lifetime.
    pub fn semaphores_created(&self) -> u64 {
        self.semaphores_created.get()
    }

    /// Semaphores destroyed over the device's lifetime.
    pub fn semaphores_destroyed(&self) -> u64 {
        self.semaphores_destroyed.get()
    }

    /// Fences created over the device's lifetime.
    pub fn fences_created(&self) -> u64 {
        self.fences_created.get()
    }

    /// Fences destroyed over the device's lifetime.
    pub fn fences_destroyed(&self) -> u64 {
        self.fences_destroyed.get()
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for NullDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl GpuDevice for NullDevice {
    type Queue = NullQueue;
    type RawSemaphore = NullSemaphore;
    type RawFence = NullFence;
    type CommandPool = NullCommandPool;
    type CommandList = NullCommandList;

    fn queue(&self, family_index: u32, queue_index: u32) -> Result<NullQueue, GpuError> {
        Ok(NullQueue {
            family_index,
            queue_index,
            submissions: 0,
        })
    }

    fn create_command_pool(&self, family_index: u32) -> Result<NullCommandPool, GpuError> {
        Ok(NullCommandPool {
            family_index,
            allocated: AtomicU64::new(0),
        })
    }

    fn allocate_command_list(&self, pool: &NullCommandPool) -> Result<NullCommandList, GpuError> {
        Ok(NullCommandList {
            family_index: pool.family_index,
            id: pool.allocated.fetch_add(1, Ordering::Relaxed),
        })
    }

    fn create_semaphore(&self) -> Result<NullSemaphore, GpuError> {
        if self.fail_primitive_creation.load(Ordering::Relaxed) {
            return Err(GpuError::PrimitiveCreation);
        }
        self.semaphores_created.increment();
        Ok(NullSemaphore(self.next_id()))
    }

    fn create_fence(&self) -> Result<NullFence, GpuError> {
        if self.fail_primitive_creation.load(Ordering::Relaxed) {
            return Err(GpuError::PrimitiveCreation);
        }
        self.fences_created.increment();
        Ok(NullFence(self.next_id()))
    }

    fn destroy_semaphore(&self, _semaphore: NullSemaphore) {
        self.semaphores_destroyed.increment();
    }

    fn destroy_fence(&self, fence: NullFence) {
        self.signaled.lock().remove(&fence.0);
        self.fences_destroyed.increment();
    }

    fn wait_fence(&self, fence: NullFence, timeout: Option<Duration>) -> Result<(), GpuError> {
        if self.is_signaled(fence) {
            return Ok(());
        }
        // An unsignaled null fence would block forever; surface that as a
        // lost device rather than hanging the test suite.
        match timeout {
            Some(_) => Err(GpuError::Timeout),
            None => Err(GpuError::DeviceLost),
        }
    }

    fn reset_fence(&self, fence: NullFence) -> Result<(), GpuError> {
        self.signaled.lock().remove(&fence.0);
        Ok(())
    }
}
