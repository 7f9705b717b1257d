//! One rung of the size-class ladder.

use parking_lot::Mutex;

use crate::buffer::Buffer;
use crate::stats::BucketStats;

struct BucketState {
    /// Idle buffers, most recently released last (LIFO).
    free: Vec<Buffer>,
    allocated: u64,
    returned: u64,
    reused: u64,
}

/// A bounded free list of same-sized buffers behind its own lock.
pub(crate) struct BufferBucket {
    class_size: usize,
    capacity: usize,
    state: Mutex<BucketState>,
}

impl BufferBucket {
    pub(crate) fn new(class_size: usize, capacity: usize) -> Self {
        Self {
            class_size,
            capacity,
            state: Mutex::new(BucketState {
                free: Vec::new(),
                allocated: 0,
                returned: 0,
                reused: 0,
            }),
        }
    }

    #[inline]
    pub(crate) const fn class_size(&self) -> usize {
        self.class_size
    }

    #[inline]
    pub(crate) const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Pops the most recently released buffer.
    pub(crate) fn pop(&self) -> Option<Buffer> {
        let mut state = self.state.lock();
        let mut buffer = state.free.pop()?;
        state.reused += 1;
        buffer.clear();
        Some(buffer)
    }

    /// Returns a released buffer to the free list, or hands it back if full.
    pub(crate) fn push(&self, buffer: Buffer) -> Result<(), Buffer> {
        self.push_inner(buffer, true)
    }

    /// Adds a freshly allocated buffer during warmup.
    pub(crate) fn stock(&self, buffer: Buffer) -> Result<(), Buffer> {
        self.push_inner(buffer, false)
    }

    fn push_inner(&self, mut buffer: Buffer, released: bool) -> Result<(), Buffer> {
        let mut state = self.state.lock();
        if state.free.len() >= self.capacity {
            return Err(buffer);
        }
        buffer.clear();
        state.free.push(buffer);
        if released {
            state.returned += 1;
        }
        Ok(())
    }

    pub(crate) fn record_allocation(&self) {
        self.state.lock().allocated += 1;
    }

    pub(crate) fn idle_count(&self) -> usize {
        self.state.lock().free.len()
    }

    /// Takes every idle buffer out of the bucket.
    pub(crate) fn drain(&self) -> Vec<Buffer> {
        std::mem::take(&mut self.state.lock().free)
    }

    pub(crate) fn stats(&self) -> BucketStats {
        let state = self.state.lock();
        BucketStats {
            class_size: self.class_size,
            idle_count: state.free.len(),
            allocated: state.allocated,
            returned: state.returned,
            reused: state.reused,
        }
    }
}
