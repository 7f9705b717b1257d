//! Size-class bucketed buffer manager.
//!
//! # Design
//!
//! - A fixed ascending ladder of size classes, each with a bounded LIFO
//!   free list behind its own lock
//! - Requests round up to the smallest class that fits; fresh allocations
//!   are always exactly the class size so they can be pooled on release
//! - Requests above the top class bypass pooling entirely
//! - Byte totals live behind a second lock, taken only after a bucket lock
//!   has been released. They may lag the buckets and are advisory only;
//!   capacity decisions are always made under the bucket lock.
//! - Classes at or above the NUMA threshold are allocated through an
//!   attached [`NumaAllocator`]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use mtpool_common::config::BufferConfig;
use mtpool_common::memory::{try_alloc_zeroed, NumaAllocator};
use mtpool_common::{PoolError, PoolResult};

use crate::bucket::BufferBucket;
use crate::buffer::{Buffer, SizeClass, Storage};
use crate::guard::PooledBuffer;
use crate::stats::BufferStats;

/// Source of manager ids stamped into every buffer.
static NEXT_MANAGER_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Default)]
struct Totals {
    allocated_bytes: u64,
    freed_bytes: u64,
    peak_bytes: u64,
}

impl Totals {
    fn on_alloc(&mut self, bytes: u64) {
        self.allocated_bytes += bytes;
        let in_use = self.allocated_bytes.saturating_sub(self.freed_bytes);
        self.peak_bytes = self.peak_bytes.max(in_use);
    }

    fn on_free(&mut self, bytes: u64) {
        self.freed_bytes += bytes;
    }
}

/// Pool of reusable I/O buffers, bucketed by size class.
///
/// # Example
///
/// ```rust
/// use mtpool_buffer::BufferManager;
/// use mtpool_common::config::BufferConfig;
///
/// let manager = BufferManager::new(&BufferConfig::new().classes(vec![1024, 2048, 4096]))?;
///
/// let buffer = manager.acquire(1500)?;
/// assert_eq!(buffer.capacity(), 2048);
/// let ptr = buffer.as_ptr();
/// manager.release(buffer)?;
///
/// // Served from the free list
/// let again = manager.acquire(1500)?;
/// assert_eq!(again.as_ptr(), ptr);
/// # manager.release(again)?;
/// # Ok::<(), mtpool_common::PoolError>(())
/// ```
pub struct BufferManager {
    id: u64,
    buckets: Box<[BufferBucket]>,
    totals: Mutex<Totals>,
    numa: Option<Arc<NumaAllocator>>,
    numa_threshold: usize,
}

impl BufferManager {
    /// Creates a manager with the configured ladder and no NUMA allocator.
    pub fn new(config: &BufferConfig) -> PoolResult<Self> {
        Self::build(config, None)
    }

    /// Creates a manager that allocates large classes through `numa`.
    pub fn with_numa(config: &BufferConfig, numa: Arc<NumaAllocator>) -> PoolResult<Self> {
        Self::build(config, Some(numa))
    }

    fn build(config: &BufferConfig, numa: Option<Arc<NumaAllocator>>) -> PoolResult<Self> {
        config.validate()?;

        let buckets = config
            .classes
            .iter()
            .map(|&size| BufferBucket::new(size, config.bucket_capacity))
            .collect();

        let manager = Self {
            id: NEXT_MANAGER_ID.fetch_add(1, Ordering::Relaxed),
            buckets,
            totals: Mutex::new(Totals::default()),
            numa,
            numa_threshold: config.numa_threshold,
        };

        info!(
            classes = ?config.classes,
            bucket_capacity = config.bucket_capacity,
            numa = manager.numa.is_some(),
            "buffer manager created"
        );

        if config.warmup_on_start {
            manager.warmup();
        }
        Ok(manager)
    }

    /// Returns the ladder of class sizes.
    pub fn classes(&self) -> impl Iterator<Item = usize> + '_ {
        self.buckets.iter().map(BufferBucket::class_size)
    }

    /// Returns the largest class size.
    #[must_use]
    pub fn max_class(&self) -> usize {
        self.buckets.last().map_or(0, BufferBucket::class_size)
    }

    /// Returns the class a request of `size` bytes rounds up to, or `None`
    /// if it is above the ladder.
    #[must_use]
    pub fn class_for(&self, size: usize) -> Option<usize> {
        self.bucket_index(size).map(|i| self.buckets[i].class_size())
    }

    /// Returns the NUMA allocator, if one is attached.
    #[must_use]
    pub fn numa(&self) -> Option<&Arc<NumaAllocator>> {
        self.numa.as_ref()
    }

    /// Acquires a buffer of at least `size` bytes.
    ///
    /// Reuses the most recently released buffer of the matching class when
    /// there is one; otherwise allocates exactly the class size. Requests
    /// above the ladder get exactly `size` bytes.
    ///
    /// # Errors
    ///
    /// - [`PoolError::InvalidSize`] if `size` is zero
    /// - [`PoolError::OutOfMemory`] if the heap refuses
    pub fn acquire(&self, size: usize) -> PoolResult<Buffer> {
        if size == 0 {
            return Err(PoolError::InvalidSize(0));
        }

        match self.bucket_index(size) {
            Some(index) => {
                let bucket = &self.buckets[index];
                if let Some(buffer) = bucket.pop() {
                    return Ok(buffer);
                }
                let buffer = self.allocate(bucket.class_size(), SizeClass::Bucket(index))?;
                bucket.record_allocation();
                Ok(buffer)
            }
            None => self.allocate(size, SizeClass::Oversized),
        }
    }

    /// Acquires a buffer wrapped in a guard that releases it on drop.
    pub fn acquire_guard(&self, size: usize) -> PoolResult<PooledBuffer<'_>> {
        self.acquire(size).map(|buffer| PooledBuffer::new(self, buffer))
    }

    /// Returns a buffer to its bucket, or to the heap if the bucket is full
    /// or the buffer is above the ladder.
    ///
    /// # Errors
    ///
    /// [`PoolError::ForeignBuffer`] if another manager issued the buffer.
    /// The buffer's memory is freed regardless, and a NUMA-backed buffer is
    /// uncharged from the allocator that issued it.
    pub fn release(&self, buffer: Buffer) -> PoolResult<()> {
        if buffer.owner() != self.id {
            warn!(capacity = buffer.capacity(), "buffer released to foreign manager");
            return Err(PoolError::ForeignBuffer);
        }

        match buffer.size_class() {
            SizeClass::Bucket(index) => {
                if let Err(buffer) = self.buckets[index].push(buffer) {
                    self.free(buffer);
                }
            }
            SizeClass::Oversized => self.free(buffer),
        }
        Ok(())
    }

    /// Grows `buffer` to hold at least `min_size` bytes, preserving its
    /// contents.
    ///
    /// The new capacity is at least double the old one. On error `buffer`
    /// is left exactly as it was.
    pub fn extend(&self, buffer: &mut Buffer, min_size: usize) -> PoolResult<()> {
        if buffer.owner() != self.id {
            return Err(PoolError::ForeignBuffer);
        }
        if min_size <= buffer.capacity() {
            return Ok(());
        }

        let new_size = buffer.capacity().saturating_mul(2).max(min_size);
        let mut grown = self.acquire(new_size)?;
        grown.push_slice(&buffer[..]);

        let old = std::mem::replace(buffer, grown);
        self.release(old)
    }

    /// Appends `data`, growing the buffer first if it does not fit.
    pub fn append(&self, buffer: &mut Buffer, data: &[u8]) -> PoolResult<()> {
        let needed = buffer
            .len()
            .checked_add(data.len())
            .ok_or(PoolError::OutOfMemory { size: usize::MAX })?;
        if needed > buffer.capacity() {
            self.extend(buffer, needed)?;
        }
        buffer.push_slice(data);
        Ok(())
    }

    /// Pre-allocates buffers until every bucket is half full.
    ///
    /// Returns the number of buffers allocated. A bucket stops early if the
    /// heap refuses.
    pub fn warmup(&self) -> usize {
        let mut allocated = 0;

        for (index, bucket) in self.buckets.iter().enumerate() {
            let target = bucket.capacity() / 2;
            while bucket.idle_count() < target {
                let buffer = match self.allocate(bucket.class_size(), SizeClass::Bucket(index)) {
                    Ok(buffer) => buffer,
                    Err(err) => {
                        warn!(class_size = bucket.class_size(), error = %err, "warmup stopped");
                        break;
                    }
                };
                bucket.record_allocation();
                allocated += 1;
                if let Err(buffer) = bucket.stock(buffer) {
                    // Filled concurrently by releases.
                    self.free(buffer);
                    break;
                }
            }
        }

        if allocated > 0 {
            debug!(allocated, "buffer pool warmed up");
        }
        allocated
    }

    /// Frees every idle buffer. Returns the number freed.
    ///
    /// Buffers currently lent out are unaffected and may still be released
    /// afterwards.
    pub fn shutdown(&self) -> usize {
        let mut freed = 0;
        for bucket in self.buckets.iter() {
            for buffer in bucket.drain() {
                self.free(buffer);
                freed += 1;
            }
        }
        if freed > 0 {
            info!(freed, "buffer pool drained");
        }
        freed
    }

    /// Returns a snapshot of the counters.
    #[must_use]
    pub fn stats(&self) -> BufferStats {
        let buckets = self.buckets.iter().map(BufferBucket::stats).collect();
        let totals = self.totals.lock();
        BufferStats {
            allocated_bytes: totals.allocated_bytes,
            freed_bytes: totals.freed_bytes,
            peak_bytes: totals.peak_bytes,
            buckets,
        }
    }

    fn bucket_index(&self, size: usize) -> Option<usize> {
        self.buckets.iter().position(|b| b.class_size() >= size)
    }

    fn allocate(&self, size: usize, class: SizeClass) -> PoolResult<Buffer> {
        let storage = match &self.numa {
            Some(numa) if size >= self.numa_threshold => numa.allocate_default(size).map(Storage::Numa),
            _ => try_alloc_zeroed(size).map(Storage::Heap),
        };
        let storage = storage.map_err(|err| {
            warn!(size, error = %err, "buffer allocation failed");
            err
        })?;

        self.totals.lock().on_alloc(size as u64);
        Ok(Buffer::new(storage, class, self.id))
    }

    fn free(&self, buffer: Buffer) {
        let bytes = buffer.capacity() as u64;
        match buffer.into_storage() {
            Storage::Heap(data) => drop(data),
            Storage::Numa(block) => match &self.numa {
                Some(numa) => numa.free(block),
                None => drop(block),
            },
        }
        self.totals.lock().on_free(bytes);
    }
}

impl Drop for BufferManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for BufferManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferManager")
            .field("classes", &self.classes().collect::<Vec<_>>())
            .field("numa", &self.numa.is_some())
            .finish()
    }
}
