//! Lock-free hand-back queue for pooled primitives.
//!
//! A thread observing GPU completion returns its primitives here without
//! touching the pool mutex; the render thread drains the queue into the
//! pools at a frame boundary.

use crossbeam_queue::SegQueue;

/// Unbounded MPMC queue of primitives awaiting return to their pool.
pub(crate) struct DeferredReleaseQueue<T> {
    queue: SegQueue<T>,
}

impl<T> DeferredReleaseQueue<T> {
    pub(crate) fn new() -> Self {
        Self {
            queue: SegQueue::new(),
        }
    }

    /// Hand a primitive back. Callable from any thread.
    pub(crate) fn push(&self, item: T) {
        self.queue.push(item);
    }

    /// Take one pending primitive, if any.
    pub(crate) fn pop(&self) -> Option<T> {
        self.queue.pop()
    }

    /// Approximate number of pending primitives.
    pub(crate) fn len(&self) -> usize {
        self.queue.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_pop_fifo() {
        let queue = DeferredReleaseQueue::new();
        queue.push(1u32);
        queue.push(2);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop(), Some(1));
        assert_eq!(queue.pop(), Some(2));
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn test_concurrent_producers() {
        let queue = std::sync::Arc::new(DeferredReleaseQueue::new());

        std::thread::scope(|scope| {
            for thread in 0..4u32 {
                let queue = std::sync::Arc::clone(&queue);
                scope.spawn(move || {
                    for item in 0..100u32 {
                        queue.push(thread * 100 + item);
                    }
                });
            }
        });

        let mut drained = Vec::new();
        while let Some(item) = queue.pop() {
            drained.push(item);
        }
        drained.sort_unstable();
        assert_eq!(drained.len(), 400);
        assert_eq!(drained, (0..400).collect::<Vec<u32>>());
    }
}
