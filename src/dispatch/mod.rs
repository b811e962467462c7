//! Queue routing and synchronization-primitive recycling.
//!
//! A [`QueueDispatcher`] owns one [`QueueGroup`] per physical queue family.
//! Requests name the kinds of work they carry ([`WorkTypeFlags`]); the
//! dispatcher routes each request to the first family whose capabilities
//! cover it and round-robins across that family's queues. Two slab pools
//! recycle semaphores and fences so steady-state frames create no
//! primitives at all.

pub mod work_type;

mod recycle;

pub use work_type::WorkTypeFlags;

use std::sync::Arc;
use std::time::Duration;

use crate::gpu::primitives::{Fence, FenceFactory, Semaphore, SemaphoreFactory};
use crate::gpu::traits::{GpuDevice, GpuError};
use crate::pool::{PoolError, PoolHandle, PoolStats, SlabPool};
use crate::sync::{AtomicCursor, Mutex, MutexGuard};

use recycle::DeferredReleaseQueue;

/// Pooled semaphores come in buckets of eight: a frame in flight rarely
/// needs more, and a second bucket is one amortized growth away.
const SEMAPHORE_BUCKET_SIZE: usize = 8;

/// Fences are scarcer than semaphores; buckets of four.
const FENCE_BUCKET_SIZE: usize = 4;

/// Route table covers every combination of the four work-type bits.
const ROUTE_COMBINATIONS: usize = 16;

/// Description of one hardware queue family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamily {
    /// Family index as enumerated by the device.
    pub index: u32,
    /// Number of independent queues the family exposes.
    pub queue_count: u32,
    /// Work the family can execute.
    pub flags: WorkTypeFlags,
}

/// Routing failure: no family covers the requested work types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchError {
    /// No queue group's capabilities are a superset of the request.
    NoCapableQueueGroup(WorkTypeFlags),
}

impl std::fmt::Display for DispatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DispatchError::NoCapableQueueGroup(flags) => {
                write!(f, "no queue group satisfies work types: {}", flags)
            }
        }
    }
}

impl std::error::Error for DispatchError {}

/// Exclusive hold on one physical queue for the duration of a submission.
///
/// Dropping the guard releases the queue to the next round-robin winner.
pub struct QueueGuard<'a, D: GpuDevice> {
    guard: MutexGuard<'a, D::Queue>,
    family_index: u32,
    queue_index: u32,
}

impl<'a, D: GpuDevice> QueueGuard<'a, D> {
    /// Family the held queue belongs to.
    pub fn family_index(&self) -> u32 {
        self.family_index
    }

    /// Index of the held queue within its family.
    pub fn queue_index(&self) -> u32 {
        self.queue_index
    }
}

impl<'a, D: GpuDevice> std::ops::Deref for QueueGuard<'a, D> {
    type Target = D::Queue;

    fn deref(&self) -> &D::Queue {
        &self.guard
    }
}

impl<'a, D: GpuDevice> std::ops::DerefMut for QueueGuard<'a, D> {
    fn deref_mut(&mut self) -> &mut D::Queue {
        &mut self.guard
    }
}

/// A pooled semaphore ticket: the pool slot plus the raw handle to submit.
pub struct PooledSemaphore<D: GpuDevice> {
    handle: PoolHandle<Semaphore<D>>,
    raw: D::RawSemaphore,
}

impl<D: GpuDevice> PooledSemaphore<D> {
    /// The raw device handle, for submission.
    pub fn raw(&self) -> D::RawSemaphore {
        self.raw
    }
}

impl<D: GpuDevice> Clone for PooledSemaphore<D> {
    fn clone(&self) -> Self {
        Self {
            handle: self.handle,
            raw: self.raw,
        }
    }
}

impl<D: GpuDevice> std::fmt::Debug for PooledSemaphore<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledSemaphore").field("handle", &self.handle).finish()
    }
}

/// A pooled fence ticket: the pool slot plus the raw handle to wait on.
pub struct PooledFence<D: GpuDevice> {
    handle: PoolHandle<Fence<D>>,
    raw: D::RawFence,
}

impl<D: GpuDevice> PooledFence<D> {
    /// The raw device handle, for submission and waits.
    pub fn raw(&self) -> D::RawFence {
        self.raw
    }
}

impl<D: GpuDevice> Clone for PooledFence<D> {
    fn clone(&self) -> Self {
        Self {
            handle: self.handle,
            raw: self.raw,
        }
    }
}

impl<D: GpuDevice> std::fmt::Debug for PooledFence<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledFence").field("handle", &self.handle).finish()
    }
}

/// One queue family's worth of dispatchable state.
struct QueueGroup<D: GpuDevice> {
    family_index: u32,
    flags: WorkTypeFlags,
    queues: Vec<Mutex<D::Queue>>,
    cursor: AtomicCursor,
    command_pool: Mutex<D::CommandPool>,
}

impl<D: GpuDevice> QueueGroup<D> {
    fn construct(device: &D, family: &QueueFamily) -> Result<Self, GpuError> {
        let mut queues = Vec::with_capacity(family.queue_count as usize);
        for queue_index in 0..family.queue_count {
            queues.push(Mutex::new(device.queue(family.index, queue_index)?));
        }

        let command_pool = Mutex::new(device.create_command_pool(family.index)?);

        Ok(Self {
            family_index: family.index,
            flags: family.flags,
            queues,
            cursor: AtomicCursor::new(),
            command_pool,
        })
    }

    fn next_queue(&self) -> (u32, MutexGuard<'_, D::Queue>) {
        let index = self.cursor.next(self.queues.len());
        (index as u32, self.queues[index].lock())
    }
}

/// Counter snapshot across the dispatcher's primitive pools.
#[derive(Debug, Clone, Copy)]
pub struct DispatcherStats {
    /// Semaphore pool counters.
    pub semaphores: PoolStats,
    /// Fence pool counters.
    pub fences: PoolStats,
    /// Primitives handed back but not yet collected.
    pub deferred_pending: usize,
}

/// Routes work-type requests onto physical queues and recycles
/// synchronization primitives across frames.
///
/// Construction happens once at device initialization. All methods take
/// `&self`; the primitive pools are serialized by internal mutexes, the
/// round-robin draw is lock-free, and each queue handle has its own lock.
pub struct QueueDispatcher<D: GpuDevice> {
    device: Arc<D>,
    groups: Vec<QueueGroup<D>>,
    /// Per flags-combination, the first group whose flags cover it.
    routes: [Option<u8>; ROUTE_COMBINATIONS],
    semaphores: Mutex<SlabPool<SemaphoreFactory<D>, SEMAPHORE_BUCKET_SIZE>>,
    fences: Mutex<SlabPool<FenceFactory<D>, FENCE_BUCKET_SIZE>>,
    deferred_semaphores: DeferredReleaseQueue<PooledSemaphore<D>>,
    deferred_fences: DeferredReleaseQueue<PooledFence<D>>,
}

impl<D: GpuDevice> QueueDispatcher<D> {
    /// Build one queue group per family and the flags route table.
    ///
    /// Family order is routing priority: a request goes to the first family
    /// whose capabilities are a superset of it, with no fallback past that.
    pub fn new(device: Arc<D>, families: &[QueueFamily]) -> Result<Self, GpuError> {
        let mut groups = Vec::with_capacity(families.len());
        for family in families {
            if family.queue_count == 0 || family.flags.is_empty() {
                return Err(GpuError::InvalidFamily);
            }
            groups.push(QueueGroup::construct(device.as_ref(), family)?);
        }

        let mut routes = [None; ROUTE_COMBINATIONS];
        for (bits, route) in routes.iter_mut().enumerate().skip(1) {
            let requested = WorkTypeFlags { bits: bits as u32 };
            *route = groups
                .iter()
                .position(|group| group.flags.contains(requested))
                .map(|index| index as u8);
        }

        #[cfg(feature = "log")]
        log::info!(
            "queue dispatcher ready: {} group(s), {} queue(s)",
            groups.len(),
            groups.iter().map(|group| group.queues.len()).sum::<usize>()
        );

        Ok(Self {
            semaphores: Mutex::new(SlabPool::new(SemaphoreFactory::new(Arc::clone(&device)))),
            fences: Mutex::new(SlabPool::new(FenceFactory::new(Arc::clone(&device)))),
            device,
            groups,
            routes,
            deferred_semaphores: DeferredReleaseQueue::new(),
            deferred_fences: DeferredReleaseQueue::new(),
        })
    }

    /// Exclusive access to a queue able to execute `flags`, chosen
    /// round-robin within the routed family.
    ///
    /// # Panics
    /// Panics if no family covers `flags`; requesting capabilities the
    /// device does not have is a bug in the caller.
    pub fn next_queue(&self, flags: WorkTypeFlags) -> QueueGuard<'_, D> {
        match self.try_next_queue(flags) {
            Ok(guard) => guard,
            Err(error) => panic!("{}", error),
        }
    }

    /// Non-panicking variant of [`next_queue`](QueueDispatcher::next_queue),
    /// for callers probing optional capabilities.
    pub fn try_next_queue(&self, flags: WorkTypeFlags) -> Result<QueueGuard<'_, D>, DispatchError> {
        let group = self
            .route(flags)
            .ok_or(DispatchError::NoCapableQueueGroup(flags))?;
        let (queue_index, guard) = group.next_queue();
        Ok(QueueGuard {
            guard,
            family_index: group.family_index,
            queue_index,
        })
    }

    /// Allocate a command list from the routed family's command pool.
    ///
    /// # Panics
    /// Panics if no family covers `flags`.
    pub fn create_command_list(&self, flags: WorkTypeFlags) -> Result<D::CommandList, GpuError> {
        let group = self
            .route(flags)
            .unwrap_or_else(|| panic!("{}", DispatchError::NoCapableQueueGroup(flags)));
        let pool = group.command_pool.lock();
        self.device.allocate_command_list(&pool)
    }

    /// Family index a request for `flags` routes to.
    ///
    /// # Panics
    /// Panics if no family covers `flags`.
    pub fn queue_family_index(&self, flags: WorkTypeFlags) -> u32 {
        self.route(flags)
            .unwrap_or_else(|| panic!("{}", DispatchError::NoCapableQueueGroup(flags)))
            .family_index
    }

    /// Number of queue groups.
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Take a semaphore from the pool, constructing a bucket of new ones
    /// only if every pooled semaphore is in flight.
    pub fn acquire_semaphore(&self) -> Result<PooledSemaphore<D>, GpuError> {
        let mut pool = self.semaphores.lock();
        let handle = pool.acquire()?;
        let raw = pool.get(handle).expect("freshly acquired handle resolves").raw();
        Ok(PooledSemaphore { handle, raw })
    }

    /// Return a semaphore once the GPU no longer references it.
    pub fn release_semaphore(&self, semaphore: PooledSemaphore<D>) {
        if let Err(error) = self.semaphores.lock().release(semaphore.handle) {
            rejected_release("semaphore", error);
        }
    }

    /// Take a fence from the pool; same growth policy as semaphores.
    pub fn acquire_fence(&self) -> Result<PooledFence<D>, GpuError> {
        let mut pool = self.fences.lock();
        let handle = pool.acquire()?;
        let raw = pool.get(handle).expect("freshly acquired handle resolves").raw();
        Ok(PooledFence { handle, raw })
    }

    /// Return a fence once waited on. The fence is not reset here; reset
    /// happens on reuse, before submission.
    pub fn release_fence(&self, fence: PooledFence<D>) {
        if let Err(error) = self.fences.lock().release(fence.handle) {
            rejected_release("fence", error);
        }
    }

    /// Hand a semaphore back from any thread without taking the pool lock.
    pub fn defer_release_semaphore(&self, semaphore: PooledSemaphore<D>) {
        self.deferred_semaphores.push(semaphore);
    }

    /// Hand a fence back from any thread without taking the pool lock.
    pub fn defer_release_fence(&self, fence: PooledFence<D>) {
        self.deferred_fences.push(fence);
    }

    /// Drain deferred hand-backs into the pools. Called by the render
    /// thread at a frame boundary; returns the number of primitives
    /// collected.
    pub fn collect_deferred(&self) -> usize {
        let mut collected = 0;

        {
            let mut pool = self.semaphores.lock();
            while let Some(semaphore) = self.deferred_semaphores.pop() {
                if let Err(error) = pool.release(semaphore.handle) {
                    rejected_release("semaphore", error);
                }
                collected += 1;
            }
        }
        {
            let mut pool = self.fences.lock();
            while let Some(fence) = self.deferred_fences.pop() {
                if let Err(error) = pool.release(fence.handle) {
                    rejected_release("fence", error);
                }
                collected += 1;
            }
        }

        collected
    }

    /// Block until `fence` signals. Unbounded: a lost device hangs the
    /// caller. Prefer
    /// [`wait_fence_timeout`](QueueDispatcher::wait_fence_timeout) in frame
    /// loops that must stay responsive.
    pub fn wait_fence(&self, fence: &PooledFence<D>) -> Result<(), GpuError> {
        self.device.wait_fence(fence.raw, None)
    }

    /// Block until `fence` signals or `timeout` elapses
    /// ([`GpuError::Timeout`]).
    pub fn wait_fence_timeout(
        &self,
        fence: &PooledFence<D>,
        timeout: Duration,
    ) -> Result<(), GpuError> {
        self.device.wait_fence(fence.raw, Some(timeout))
    }

    /// Return `fence` to the unsignaled state before reuse.
    pub fn reset_fence(&self, fence: &PooledFence<D>) -> Result<(), GpuError> {
        self.device.reset_fence(fence.raw)
    }

    /// Counter snapshot across both primitive pools.
    pub fn stats(&self) -> DispatcherStats {
        DispatcherStats {
            semaphores: self.semaphores.lock().stats(),
            fences: self.fences.lock().stats(),
            deferred_pending: self.deferred_semaphores.len() + self.deferred_fences.len(),
        }
    }

    fn route(&self, flags: WorkTypeFlags) -> Option<&QueueGroup<D>> {
        let bits = flags.bits as usize;
        if bits == 0 || bits >= ROUTE_COMBINATIONS {
            return None;
        }
        self.routes[bits].map(|index| &self.groups[index as usize])
    }
}

/// A rejected release means the calling engine code handed back a primitive
/// it did not own, or handed one back twice. Fail fast in debug builds.
fn rejected_release(kind: &str, error: PoolError) {
    #[cfg(feature = "log")]
    log::warn!("{} release rejected: {}", kind, error);
    debug_assert!(false, "{} release rejected: {}", kind, error);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::NullDevice;
    use std::sync::atomic::{AtomicU64, Ordering};

    fn graphics_all() -> QueueFamily {
        QueueFamily {
            index: 0,
            queue_count: 1,
            flags: WorkTypeFlags::ALL,
        }
    }

    fn dispatcher(families: &[QueueFamily]) -> (Arc<NullDevice>, QueueDispatcher<NullDevice>) {
        let device = Arc::new(NullDevice::new());
        let dispatcher = QueueDispatcher::new(Arc::clone(&device), families).unwrap();
        (device, dispatcher)
    }

    #[test]
    fn test_first_capable_family_wins() {
        let (_, dispatcher) = dispatcher(&[
            graphics_all(),
            QueueFamily {
                index: 1,
                queue_count: 2,
                flags: WorkTypeFlags::TRANSFER,
            },
        ]);

        // Family 0 covers transfer and comes first; family 1 never routes.
        assert_eq!(dispatcher.queue_family_index(WorkTypeFlags::TRANSFER), 0);
        assert_eq!(dispatcher.queue_family_index(WorkTypeFlags::GRAPHICS), 0);
        assert_eq!(dispatcher.group_count(), 2);
    }

    #[test]
    fn test_round_robin_visits_queues_evenly() {
        let (_, dispatcher) = dispatcher(&[QueueFamily {
            index: 0,
            queue_count: 3,
            flags: WorkTypeFlags::GRAPHICS,
        }]);

        let mut visits = [0u32; 3];
        for _ in 0..10 {
            let guard = dispatcher.next_queue(WorkTypeFlags::GRAPHICS);
            visits[guard.queue_index() as usize] += 1;
        }

        // 10 draws over 3 queues: each queue sees floor or ceil of 10/3.
        assert_eq!(visits.iter().sum::<u32>(), 10);
        for count in visits {
            assert!((3..=4).contains(&count), "visits: {:?}", visits);
        }
    }

    #[test]
    fn test_unsupported_flags_are_refused() {
        let (_, dispatcher) = dispatcher(&[QueueFamily {
            index: 0,
            queue_count: 1,
            flags: WorkTypeFlags::TRANSFER,
        }]);

        assert_eq!(
            dispatcher
                .try_next_queue(WorkTypeFlags::GRAPHICS | WorkTypeFlags::TRANSFER)
                .err(),
            Some(DispatchError::NoCapableQueueGroup(
                WorkTypeFlags::GRAPHICS | WorkTypeFlags::TRANSFER
            ))
        );
        assert!(dispatcher.try_next_queue(WorkTypeFlags::NONE).is_err());
        assert!(dispatcher.try_next_queue(WorkTypeFlags::TRANSFER).is_ok());
    }

    #[test]
    #[should_panic(expected = "no queue group satisfies work types")]
    fn test_next_queue_panics_on_unsupported_flags() {
        let (_, dispatcher) = dispatcher(&[QueueFamily {
            index: 0,
            queue_count: 1,
            flags: WorkTypeFlags::TRANSFER,
        }]);

        let _ = dispatcher.next_queue(WorkTypeFlags::PRESENTATION);
    }

    #[test]
    fn test_invalid_family_rejected() {
        let device = Arc::new(NullDevice::new());
        let empty_flags = QueueDispatcher::new(
            Arc::clone(&device),
            &[QueueFamily {
                index: 0,
                queue_count: 1,
                flags: WorkTypeFlags::NONE,
            }],
        );
        assert!(matches!(empty_flags, Err(GpuError::InvalidFamily)));

        let no_queues = QueueDispatcher::new(
            device,
            &[QueueFamily {
                index: 0,
                queue_count: 0,
                flags: WorkTypeFlags::GRAPHICS,
            }],
        );
        assert!(matches!(no_queues, Err(GpuError::InvalidFamily)));
    }

    #[test]
    fn test_command_lists_come_from_routed_family() {
        let (_, dispatcher) = dispatcher(&[
            QueueFamily {
                index: 0,
                queue_count: 1,
                flags: WorkTypeFlags::GRAPHICS,
            },
            QueueFamily {
                index: 3,
                queue_count: 1,
                flags: WorkTypeFlags::TRANSFER,
            },
        ]);

        let list = dispatcher.create_command_list(WorkTypeFlags::TRANSFER).unwrap();
        assert_eq!(list.family_index(), 3);

        let second = dispatcher.create_command_list(WorkTypeFlags::TRANSFER).unwrap();
        assert_eq!(second.id(), list.id() + 1);
    }

    #[test]
    fn test_semaphores_amortize_across_reuse() {
        let (device, dispatcher) = dispatcher(&[graphics_all()]);

        let first = dispatcher.acquire_semaphore().unwrap();
        assert_eq!(device.semaphores_created(), SEMAPHORE_BUCKET_SIZE as u64);

        let mut in_flight = vec![first];
        for _ in 0..SEMAPHORE_BUCKET_SIZE {
            in_flight.push(dispatcher.acquire_semaphore().unwrap());
        }
        assert_eq!(device.semaphores_created(), 2 * SEMAPHORE_BUCKET_SIZE as u64);

        for semaphore in in_flight.drain(..) {
            dispatcher.release_semaphore(semaphore);
        }

        // Steady state: the warm pool satisfies a full frame's worth
        // without touching the device.
        for _ in 0..2 * SEMAPHORE_BUCKET_SIZE {
            in_flight.push(dispatcher.acquire_semaphore().unwrap());
        }
        assert_eq!(device.semaphores_created(), 2 * SEMAPHORE_BUCKET_SIZE as u64);

        for semaphore in in_flight.drain(..) {
            dispatcher.release_semaphore(semaphore);
        }
    }

    #[test]
    fn test_fence_bucket_size() {
        let (device, dispatcher) = dispatcher(&[graphics_all()]);

        let fence = dispatcher.acquire_fence().unwrap();
        assert_eq!(device.fences_created(), FENCE_BUCKET_SIZE as u64);
        dispatcher.release_fence(fence);
    }

    #[test]
    fn test_primitive_creation_failure_propagates() {
        let (device, dispatcher) = dispatcher(&[graphics_all()]);

        device.fail_primitive_creation(true);
        assert_eq!(
            dispatcher.acquire_semaphore().err(),
            Some(GpuError::PrimitiveCreation)
        );
        assert_eq!(dispatcher.acquire_fence().err(), Some(GpuError::PrimitiveCreation));

        device.fail_primitive_creation(false);
        let semaphore = dispatcher.acquire_semaphore().unwrap();
        dispatcher.release_semaphore(semaphore);
    }

    #[test]
    #[should_panic(expected = "release rejected")]
    fn test_double_release_fails_fast() {
        let (_, dispatcher) = dispatcher(&[graphics_all()]);

        let semaphore = dispatcher.acquire_semaphore().unwrap();
        dispatcher.release_semaphore(semaphore.clone());
        dispatcher.release_semaphore(semaphore);
    }

    #[test]
    fn test_deferred_release_collected_at_frame_boundary() {
        let (_, dispatcher) = dispatcher(&[graphics_all()]);

        let semaphore = dispatcher.acquire_semaphore().unwrap();
        let fence = dispatcher.acquire_fence().unwrap();

        dispatcher.defer_release_semaphore(semaphore);
        dispatcher.defer_release_fence(fence);
        assert_eq!(dispatcher.stats().deferred_pending, 2);

        assert_eq!(dispatcher.collect_deferred(), 2);
        assert_eq!(dispatcher.stats().deferred_pending, 0);

        let stats = dispatcher.stats();
        assert_eq!(stats.semaphores.released, 1);
        assert_eq!(stats.fences.released, 1);
    }

    #[test]
    fn test_fence_wait_and_reset() {
        let (device, dispatcher) = dispatcher(&[graphics_all()]);

        let fence = dispatcher.acquire_fence().unwrap();
        assert_eq!(
            dispatcher.wait_fence_timeout(&fence, Duration::from_millis(5)),
            Err(GpuError::Timeout)
        );

        device.signal_fence(fence.raw());
        assert_eq!(dispatcher.wait_fence(&fence), Ok(()));

        dispatcher.reset_fence(&fence).unwrap();
        assert!(!device.is_signaled(fence.raw()));
        dispatcher.release_fence(fence);
    }

    #[test]
    fn test_concurrent_draws_balance_across_queues() {
        const THREADS: usize = 4;
        const DRAWS_PER_THREAD: usize = 25;

        let (_, dispatcher) = dispatcher(&[QueueFamily {
            index: 0,
            queue_count: 4,
            flags: WorkTypeFlags::GRAPHICS | WorkTypeFlags::COMPUTE,
        }]);

        let visits: [AtomicU64; 4] = Default::default();

        std::thread::scope(|scope| {
            for _ in 0..THREADS {
                scope.spawn(|| {
                    for _ in 0..DRAWS_PER_THREAD {
                        let mut guard = dispatcher.next_queue(WorkTypeFlags::COMPUTE);
                        guard.record_submission();
                        visits[guard.queue_index() as usize].fetch_add(1, Ordering::Relaxed);
                    }
                });
            }
        });

        // The atomic cursor hands every caller a distinct draw, so 100
        // draws over 4 queues land exactly 25 on each.
        for queue_visits in &visits {
            assert_eq!(queue_visits.load(Ordering::Relaxed), (THREADS * DRAWS_PER_THREAD / 4) as u64);
        }
    }
}
