//! Bucketed slab pool with stable handle identity.
//!
//! Objects are constructed up front in fixed-size buckets and handed out in
//! O(1) through an intrusive index freelist. Released slots are reused LIFO
//! within their bucket, so the warm path touches memory that is still hot.
//! The pool grows one bucket at a time and never reallocates existing
//! buckets: a reference obtained through a live handle stays valid until
//! that handle is released.
//!
//! Identity is a [`PoolHandle`] (bucket, slot, generation) rather than a raw
//! pointer, so foreign, double, and stale releases are all detectable
//! without an address-range lookup.

use std::convert::Infallible;
use std::marker::PhantomData;

/// Freelist sentinel marking a slot as currently acquired.
const ACQUIRED: u32 = u32::MAX;

/// Chain sentinel marking "no bucket".
const NO_BUCKET: u32 = u32::MAX;

/// Constructs the objects a pool hands out.
///
/// A pool invokes its factory only while growing, once per slot of the new
/// bucket. Factories that call into a device (semaphore and fence creation)
/// surface the device error here, which `acquire` propagates.
pub trait ObjectFactory {
    /// The object type stored in the pool.
    type Object;
    /// Error produced when construction fails.
    type Error;

    /// Construct one object.
    fn create(&mut self) -> Result<Self::Object, Self::Error>;
}

/// Factory that default-constructs objects; the common case for plain pools.
pub struct DefaultFactory<T>(PhantomData<fn() -> T>);

impl<T> DefaultFactory<T> {
    /// Create the factory.
    pub const fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for DefaultFactory<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Default> ObjectFactory for DefaultFactory<T> {
    type Object = T;
    type Error = Infallible;

    fn create(&mut self) -> Result<T, Infallible> {
        Ok(T::default())
    }
}

/// A stable, typed ticket for an acquired pool slot.
///
/// Handles are cheap to copy and remain meaningful after the pool mutates:
/// a handle whose slot has since been released (or reacquired by someone
/// else) simply stops resolving instead of aliasing the new tenant.
pub struct PoolHandle<T> {
    bucket: u32,
    slot: u32,
    generation: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> PoolHandle<T> {
    fn new(bucket: u32, slot: u32, generation: u32) -> Self {
        Self {
            bucket,
            slot,
            generation,
            _marker: PhantomData,
        }
    }

    /// Create a handle that resolves to nothing (for default initialization).
    pub const fn dangling() -> Self {
        Self {
            bucket: NO_BUCKET,
            slot: ACQUIRED,
            generation: 0,
            _marker: PhantomData,
        }
    }

    /// Whether this is the dangling handle.
    pub fn is_dangling(&self) -> bool {
        self.bucket == NO_BUCKET
    }
}

impl<T> Copy for PoolHandle<T> {}

impl<T> Clone for PoolHandle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> PartialEq for PoolHandle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.bucket == other.bucket && self.slot == other.slot && self.generation == other.generation
    }
}

impl<T> Eq for PoolHandle<T> {}

impl<T> std::hash::Hash for PoolHandle<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.bucket.hash(state);
        self.slot.hash(state);
        self.generation.hash(state);
    }
}

impl<T> std::fmt::Debug for PoolHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolHandle")
            .field("bucket", &self.bucket)
            .field("slot", &self.slot)
            .field("generation", &self.generation)
            .finish()
    }
}

/// Rejected release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolError {
    /// The handle was never issued by this pool.
    NotOwned,
    /// The slot is already free; the handle was released twice.
    DoubleRelease,
    /// The slot was released and reacquired since the handle was issued.
    Stale,
}

impl std::fmt::Display for PoolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PoolError::NotOwned => write!(f, "handle is not owned by this pool"),
            PoolError::DoubleRelease => write!(f, "slot released twice"),
            PoolError::Stale => write!(f, "handle is stale; the slot has been reacquired"),
        }
    }
}

impl std::error::Error for PoolError {}

/// Pool bookkeeping counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Buckets constructed over the pool's lifetime.
    pub buckets_created: u64,
    /// Buckets dropped by [`SlabPool::reclaim`].
    pub buckets_reclaimed: u64,
    /// Successful acquires.
    pub acquired: u64,
    /// Successful releases.
    pub released: u64,
    /// Releases rejected as not-owned, double, or stale.
    pub rejected_releases: u64,
}

/// One fixed-capacity bucket: factory-constructed objects plus the parallel
/// index freelist.
struct Bucket<T> {
    objects: Box<[T]>,
    /// `path[i]` is the next free slot after `i`, or `ACQUIRED`.
    path: Box<[u32]>,
    /// Bumped on every release of the slot; stale handles stop matching.
    generations: Box<[u32]>,
    /// First free slot; equals capacity when the bucket is full.
    head: u32,
    /// Next bucket with free capacity in the pool's chain.
    chain: u32,
    live: u32,
}

impl<T> Bucket<T> {
    fn construct<F>(factory: &mut F, capacity: usize, generation_floor: u32) -> Result<Self, F::Error>
    where
        F: ObjectFactory<Object = T>,
    {
        let mut objects = Vec::with_capacity(capacity);
        for _ in 0..capacity {
            objects.push(factory.create()?);
        }

        let path: Vec<u32> = (1..=capacity as u32).collect();

        Ok(Self {
            objects: objects.into_boxed_slice(),
            path: path.into_boxed_slice(),
            generations: vec![generation_floor; capacity].into_boxed_slice(),
            head: 0,
            chain: NO_BUCKET,
            live: 0,
        })
    }

    fn acquire(&mut self) -> Option<u32> {
        if self.head as usize >= self.objects.len() {
            return None;
        }

        let slot = self.head;
        self.head = self.path[slot as usize];
        self.path[slot as usize] = ACQUIRED;
        self.live += 1;

        Some(slot)
    }

    /// Caller must have validated the slot is acquired.
    fn release(&mut self, slot: u32) {
        let index = slot as usize;
        self.path[index] = self.head;
        self.head = slot;
        self.generations[index] = self.generations[index].wrapping_add(1);
        self.live -= 1;
    }

    fn is_full(&self) -> bool {
        self.head as usize >= self.objects.len()
    }
}

/// Generic bucketed object pool with O(1) acquire and release.
///
/// Not internally synchronized; the `&mut self` API makes callers serialize
/// access. The [`QueueDispatcher`](crate::dispatch::QueueDispatcher) wraps
/// its primitive pools in a mutex for exactly this reason.
pub struct SlabPool<F: ObjectFactory, const BUCKET_SIZE: usize = 32> {
    factory: F,
    /// `None` marks a reclaimed index awaiting reuse.
    buckets: Vec<Option<Bucket<F::Object>>>,
    /// Head of the free-capacity chain; acquisitions come from this bucket.
    free_head: u32,
    /// Per index, the slot generation a recreated bucket must start from.
    generation_floor: Vec<u32>,
    stats: PoolStats,
}

impl<F: ObjectFactory, const BUCKET_SIZE: usize> SlabPool<F, BUCKET_SIZE> {
    /// Create an empty pool around `factory`. No buckets are constructed
    /// until the first acquire.
    pub fn new(factory: F) -> Self {
        assert!(BUCKET_SIZE >= 2, "a slab bucket needs at least two slots");
        assert!((BUCKET_SIZE as u64) < ACQUIRED as u64);

        Self {
            factory,
            buckets: Vec::new(),
            free_head: NO_BUCKET,
            generation_floor: Vec::new(),
            stats: PoolStats::default(),
        }
    }

    /// Acquire a slot, growing by one bucket if nothing is free.
    ///
    /// The only failure mode is the factory failing while a new bucket is
    /// constructed; pool state is unchanged in that case.
    pub fn acquire(&mut self) -> Result<PoolHandle<F::Object>, F::Error> {
        if self.free_head == NO_BUCKET {
            self.grow()?;
        }

        let bucket_index = self.free_head;
        let bucket = self.buckets[bucket_index as usize]
            .as_mut()
            .expect("free chain points at live buckets");
        let slot = bucket.acquire().expect("bucket on the free chain has capacity");

        if bucket.is_full() {
            self.free_head = bucket.chain;
            bucket.chain = NO_BUCKET;
        }

        self.stats.acquired += 1;
        Ok(PoolHandle::new(
            bucket_index,
            slot,
            bucket.generations[slot as usize],
        ))
    }

    /// Return a slot to its bucket.
    ///
    /// The slot becomes the bucket's next acquisition (LIFO reuse), and a
    /// bucket that was full is relinked at the head of the free-capacity
    /// chain. Rejected releases leave the pool untouched.
    pub fn release(&mut self, handle: PoolHandle<F::Object>) -> Result<(), PoolError> {
        let Some(bucket) = self
            .buckets
            .get_mut(handle.bucket as usize)
            .and_then(Option::as_mut)
        else {
            self.stats.rejected_releases += 1;
            return Err(PoolError::NotOwned);
        };

        let slot = handle.slot as usize;
        if slot >= BUCKET_SIZE {
            self.stats.rejected_releases += 1;
            return Err(PoolError::NotOwned);
        }
        if bucket.path[slot] != ACQUIRED {
            self.stats.rejected_releases += 1;
            return Err(PoolError::DoubleRelease);
        }
        if bucket.generations[slot] != handle.generation {
            self.stats.rejected_releases += 1;
            return Err(PoolError::Stale);
        }

        let was_full = bucket.is_full();
        bucket.release(handle.slot);
        if was_full {
            bucket.chain = self.free_head;
            self.free_head = handle.bucket;
        }

        self.stats.released += 1;
        Ok(())
    }

    /// Resolve a handle to its object, or `None` for free, stale, or
    /// foreign handles.
    pub fn get(&self, handle: PoolHandle<F::Object>) -> Option<&F::Object> {
        let bucket = self.buckets.get(handle.bucket as usize)?.as_ref()?;
        let slot = handle.slot as usize;
        if slot >= BUCKET_SIZE
            || bucket.path[slot] != ACQUIRED
            || bucket.generations[slot] != handle.generation
        {
            return None;
        }
        Some(&bucket.objects[slot])
    }

    /// Mutable variant of [`get`](SlabPool::get).
    pub fn get_mut(&mut self, handle: PoolHandle<F::Object>) -> Option<&mut F::Object> {
        let bucket = self.buckets.get_mut(handle.bucket as usize)?.as_mut()?;
        let slot = handle.slot as usize;
        if slot >= BUCKET_SIZE
            || bucket.path[slot] != ACQUIRED
            || bucket.generations[slot] != handle.generation
        {
            return None;
        }
        Some(&mut bucket.objects[slot])
    }

    /// Drop every bucket with no live objects, except the bucket currently
    /// targeted for acquisition. Returns the number of buckets dropped.
    ///
    /// Reclaimed indices are reused by later growth; handles into a
    /// reclaimed bucket stop resolving, and a generation floor keeps them
    /// from matching the replacement bucket.
    pub fn reclaim(&mut self) -> usize {
        if self.free_head == NO_BUCKET {
            // Every bucket is full; nothing can be empty.
            return 0;
        }

        // Walk the free chain, keeping the acquisition target and every
        // bucket that still has live objects.
        let mut retained = Vec::new();
        let mut cursor = self.free_head;
        while cursor != NO_BUCKET {
            let bucket = self.buckets[cursor as usize]
                .as_ref()
                .expect("free chain points at live buckets");
            if cursor == self.free_head || bucket.live > 0 {
                retained.push(cursor);
            }
            cursor = bucket.chain;
        }

        let mut dropped = 0;
        for index in 0..self.buckets.len() {
            let empty = matches!(
                self.buckets[index].as_ref(),
                Some(bucket) if bucket.live == 0
            );
            if empty && index as u32 != self.free_head {
                let bucket = self.buckets[index].take().expect("checked above");
                let ceiling = bucket.generations.iter().copied().max().unwrap_or(0);
                self.generation_floor[index] = ceiling.wrapping_add(1);
                self.stats.buckets_reclaimed += 1;
                dropped += 1;
            }
        }

        // Relink the survivors in chain order.
        for pair in retained.windows(2) {
            let next = pair[1];
            self.buckets[pair[0] as usize]
                .as_mut()
                .expect("retained buckets are live")
                .chain = next;
        }
        if let Some(&last) = retained.last() {
            self.buckets[last as usize]
                .as_mut()
                .expect("retained buckets are live")
                .chain = NO_BUCKET;
        }

        #[cfg(feature = "log")]
        if dropped > 0 {
            log::trace!("slab pool reclaimed {} bucket(s)", dropped);
        }

        dropped
    }

    /// Number of live buckets.
    pub fn bucket_count(&self) -> usize {
        self.buckets.iter().filter(|bucket| bucket.is_some()).count()
    }

    /// Number of currently acquired objects.
    pub fn live_objects(&self) -> usize {
        self.buckets
            .iter()
            .flatten()
            .map(|bucket| bucket.live as usize)
            .sum()
    }

    /// Snapshot of the pool's counters.
    pub fn stats(&self) -> PoolStats {
        self.stats
    }

    fn grow(&mut self) -> Result<(), F::Error> {
        let index = self
            .buckets
            .iter()
            .position(Option::is_none)
            .unwrap_or(self.buckets.len());

        if index == self.buckets.len() {
            self.generation_floor.push(0);
            self.buckets.push(None);
        }

        let floor = self.generation_floor[index];
        let mut bucket = Bucket::construct(&mut self.factory, BUCKET_SIZE, floor)?;
        bucket.chain = self.free_head;
        self.buckets[index] = Some(bucket);
        self.free_head = index as u32;
        self.stats.buckets_created += 1;

        #[cfg(feature = "log")]
        log::trace!("slab pool grew to {} bucket(s)", self.bucket_count());

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[derive(Default)]
    struct TestObj {
        value: u32,
    }

    type TestPool<const N: usize = 8> = SlabPool<DefaultFactory<TestObj>, N>;

    /// Deterministic shuffle; the test suite carries no rand dependency.
    fn shuffle<T>(items: &mut [T], mut seed: u64) {
        for i in (1..items.len()).rev() {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let j = (seed >> 33) as usize % (i + 1);
            items.swap(i, j);
        }
    }

    #[test]
    fn test_single_acquire_release() {
        let mut pool: TestPool = SlabPool::new(DefaultFactory::new());

        let handle = pool.acquire().unwrap();
        assert!(pool.get(handle).is_some());
        assert_eq!(pool.live_objects(), 1);
        assert!(pool.release(handle).is_ok());
        assert_eq!(pool.live_objects(), 0);
    }

    #[test]
    fn test_objects_are_distinct_and_stable() {
        let mut pool: TestPool = SlabPool::new(DefaultFactory::new());

        let handles: Vec<_> = (0..100).map(|_| pool.acquire().unwrap()).collect();

        let addresses: HashSet<*const TestObj> =
            handles.iter().map(|&h| pool.get(h).unwrap() as *const _).collect();
        assert_eq!(addresses.len(), handles.len());

        // Writing through one handle must not be visible through another.
        for (i, &handle) in handles.iter().enumerate() {
            pool.get_mut(handle).unwrap().value = i as u32;
        }
        for (i, &handle) in handles.iter().enumerate() {
            assert_eq!(pool.get(handle).unwrap().value, i as u32);
        }
    }

    #[test]
    fn test_churn_releases_in_any_order() {
        let mut pool: TestPool = SlabPool::new(DefaultFactory::new());

        let mut handles: Vec<_> = (0..1000).map(|_| pool.acquire().unwrap()).collect();
        shuffle(&mut handles, 100);

        for handle in handles.drain(..500).collect::<Vec<_>>() {
            assert!(pool.release(handle).is_ok());
        }
        for _ in 0..600 {
            handles.push(pool.acquire().unwrap());
        }

        let addresses: HashSet<*const TestObj> =
            handles.iter().map(|&h| pool.get(h).unwrap() as *const _).collect();
        assert_eq!(addresses.len(), handles.len());

        for &handle in &handles {
            assert!(pool.release(handle).is_ok());
        }
        for &handle in &handles {
            assert_eq!(pool.release(handle), Err(PoolError::DoubleRelease));
        }
    }

    #[test]
    fn test_foreign_release_rejected() {
        let mut pool: TestPool = SlabPool::new(DefaultFactory::new());
        let mut other: TestPool = SlabPool::new(DefaultFactory::new());

        let _ = pool.acquire().unwrap();
        let foreign = other.acquire().unwrap();

        // Same (bucket, slot) coordinates exist in `pool`, so ownership is
        // only refutable for out-of-range coordinates.
        let fabricated = PoolHandle::<TestObj>::new(7, 0, 0);
        let stats_before = pool.stats();
        assert_eq!(pool.release(fabricated), Err(PoolError::NotOwned));
        assert_eq!(pool.release(PoolHandle::dangling()), Err(PoolError::NotOwned));
        assert_eq!(pool.stats().released, stats_before.released);
        assert_eq!(pool.live_objects(), 1);

        assert!(other.release(foreign).is_ok());
    }

    #[test]
    fn test_double_release_rejected() {
        let mut pool: TestPool = SlabPool::new(DefaultFactory::new());

        let handle = pool.acquire().unwrap();
        assert!(pool.release(handle).is_ok());
        assert_eq!(pool.release(handle), Err(PoolError::DoubleRelease));
        assert_eq!(pool.stats().rejected_releases, 1);
    }

    #[test]
    fn test_lifo_reuse_within_bucket() {
        let mut pool: TestPool<4> = SlabPool::new(DefaultFactory::new());

        // Five acquires force a second bucket holding exactly one object.
        let handles: Vec<_> = (0..5).map(|_| pool.acquire().unwrap()).collect();
        assert_eq!(pool.bucket_count(), 2);

        let freed = handles[1];
        let freed_address = pool.get(freed).unwrap() as *const TestObj;
        assert!(pool.release(freed).is_ok());

        // The freed slot, not a fresh slot in bucket two, must come back.
        let reused = pool.acquire().unwrap();
        assert_eq!(pool.get(reused).unwrap() as *const TestObj, freed_address);
        assert_eq!(pool.bucket_count(), 2);
    }

    #[test]
    fn test_stale_handle_rejected() {
        let mut pool: TestPool = SlabPool::new(DefaultFactory::new());

        let first = pool.acquire().unwrap();
        assert!(pool.release(first).is_ok());

        // LIFO reuse puts the next acquire in the same slot.
        let second = pool.acquire().unwrap();
        assert_ne!(first, second);
        assert!(pool.get(first).is_none());
        assert_eq!(pool.release(first), Err(PoolError::Stale));

        assert!(pool.get(second).is_some());
        assert!(pool.release(second).is_ok());
    }

    #[test]
    fn test_grows_without_bound() {
        let mut pool: TestPool<2> = SlabPool::new(DefaultFactory::new());

        let handles: Vec<_> = (0..64).map(|_| pool.acquire().unwrap()).collect();
        assert_eq!(pool.bucket_count(), 32);
        assert_eq!(pool.stats().buckets_created, 32);

        for handle in handles {
            assert!(pool.release(handle).is_ok());
        }
    }

    #[test]
    fn test_reclaim_keeps_live_and_target_buckets() {
        let mut pool: TestPool<4> = SlabPool::new(DefaultFactory::new());

        let first_bucket: Vec<_> = (0..4).map(|_| pool.acquire().unwrap()).collect();
        let straggler = pool.acquire().unwrap();
        assert_eq!(pool.bucket_count(), 2);

        for handle in first_bucket {
            assert!(pool.release(handle).is_ok());
        }

        // Bucket one still holds the straggler; bucket zero is empty but is
        // the acquisition target. Nothing to drop yet.
        assert_eq!(pool.reclaim(), 0);
        assert_eq!(pool.bucket_count(), 2);

        assert!(pool.release(straggler).is_ok());
        assert_eq!(pool.reclaim(), 1);
        assert_eq!(pool.bucket_count(), 1);
        assert_eq!(pool.stats().buckets_reclaimed, 1);

        // Handles into the reclaimed bucket no longer resolve.
        assert!(pool.get(straggler).is_none());
        assert_eq!(pool.release(straggler), Err(PoolError::NotOwned));
    }

    #[test]
    fn test_reclaimed_index_reuse_defeats_old_handles() {
        let mut pool: TestPool<4> = SlabPool::new(DefaultFactory::new());

        let first_bucket: Vec<_> = (0..4).map(|_| pool.acquire().unwrap()).collect();
        let straggler = pool.acquire().unwrap();
        for handle in first_bucket {
            assert!(pool.release(handle).is_ok());
        }
        assert!(pool.release(straggler).is_ok());
        assert_eq!(pool.reclaim(), 1);

        // Growth reuses the reclaimed index; the generation floor keeps the
        // old handle from matching the new tenant.
        let refills: Vec<_> = (0..5).map(|_| pool.acquire().unwrap()).collect();
        assert_eq!(pool.bucket_count(), 2);

        assert!(pool.get(straggler).is_none());
        assert_eq!(pool.release(straggler), Err(PoolError::Stale));

        for handle in refills {
            assert!(pool.release(handle).is_ok());
        }
    }

    #[test]
    fn test_fallible_factory_propagates() {
        struct FlakyFactory {
            remaining: u32,
        }

        impl ObjectFactory for FlakyFactory {
            type Object = u32;
            type Error = &'static str;

            fn create(&mut self) -> Result<u32, &'static str> {
                if self.remaining == 0 {
                    return Err("device refused");
                }
                self.remaining -= 1;
                Ok(self.remaining)
            }
        }

        let mut pool: SlabPool<FlakyFactory, 4> = SlabPool::new(FlakyFactory { remaining: 6 });

        // First bucket constructs fine; the second fails mid-construction.
        let handle = pool.acquire().unwrap();
        assert_eq!(pool.bucket_count(), 1);
        for _ in 0..3 {
            pool.acquire().unwrap();
        }
        assert_eq!(pool.acquire(), Err("device refused"));
        assert_eq!(pool.bucket_count(), 1);

        assert!(pool.get(handle).is_some());
    }
}
