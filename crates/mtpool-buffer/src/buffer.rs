//! Pooled I/O buffer.
//!
//! A [`Buffer`] is self-describing: it records its size class and the
//! manager that issued it, so releasing it never depends on a size the
//! caller passes in.

use std::fmt;
use std::ops::{Deref, DerefMut};

use mtpool_common::memory::NumaBlock;

/// Which bucket a buffer belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SizeClass {
    /// A rung of the ladder, by index.
    Bucket(usize),
    /// Larger than the top rung; never pooled.
    Oversized,
}

impl SizeClass {
    /// Returns true for above-ladder buffers.
    #[inline]
    #[must_use]
    pub const fn is_oversized(self) -> bool {
        matches!(self, SizeClass::Oversized)
    }
}

/// Backing memory of a buffer.
pub(crate) enum Storage {
    Heap(Box<[u8]>),
    Numa(NumaBlock),
}

impl Storage {
    #[inline]
    fn as_slice(&self) -> &[u8] {
        match self {
            Storage::Heap(data) => data,
            Storage::Numa(block) => block.as_slice(),
        }
    }

    #[inline]
    fn as_mut_slice(&mut self) -> &mut [u8] {
        match self {
            Storage::Heap(data) => data,
            Storage::Numa(block) => block.as_mut_slice(),
        }
    }
}

/// An owned byte region with a fixed capacity and a fill level.
///
/// `Deref` exposes only the filled part (`..len()`); write into
/// [`Buffer::spare_mut`] and then call [`Buffer::set_len`] to fill it from a
/// socket, or let [`crate::BufferManager::append`] do both.
pub struct Buffer {
    storage: Storage,
    len: usize,
    class: SizeClass,
    owner: u64,
}

impl Buffer {
    pub(crate) fn new(storage: Storage, class: SizeClass, owner: u64) -> Self {
        Self {
            storage,
            len: 0,
            class,
            owner,
        }
    }

    /// Returns the total capacity in bytes. Never changes.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.storage.as_slice().len()
    }

    /// Returns the number of filled bytes.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns true if nothing has been written.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the unfilled capacity.
    #[inline]
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.capacity() - self.len
    }

    /// Returns the size class this buffer was issued from.
    #[inline]
    #[must_use]
    pub const fn size_class(&self) -> SizeClass {
        self.class
    }

    /// Returns the NUMA node this buffer is charged to, if NUMA-backed.
    #[must_use]
    pub fn numa_node(&self) -> Option<usize> {
        match &self.storage {
            Storage::Heap(_) => None,
            Storage::Numa(block) => Some(block.node()),
        }
    }

    /// Returns a raw pointer to the start of the buffer.
    ///
    /// Stable for the buffer's lifetime, including while it sits in a pool.
    #[inline]
    #[must_use]
    pub fn as_ptr(&self) -> *const u8 {
        self.storage.as_slice().as_ptr()
    }

    /// Returns the unfilled tail.
    #[inline]
    pub fn spare_mut(&mut self) -> &mut [u8] {
        let len = self.len;
        &mut self.storage.as_mut_slice()[len..]
    }

    /// Sets the fill level after writing into [`Buffer::spare_mut`].
    ///
    /// # Panics
    ///
    /// Panics if `len` exceeds the capacity.
    pub fn set_len(&mut self, len: usize) {
        assert!(
            len <= self.capacity(),
            "len {len} exceeds buffer capacity {}",
            self.capacity()
        );
        self.len = len;
    }

    /// Empties the buffer without touching its memory.
    #[inline]
    pub fn clear(&mut self) {
        self.len = 0;
    }

    pub(crate) const fn owner(&self) -> u64 {
        self.owner
    }

    pub(crate) fn into_storage(self) -> Storage {
        self.storage
    }

    /// Copies `data` to the end. Caller guarantees room.
    pub(crate) fn push_slice(&mut self, data: &[u8]) {
        let start = self.len;
        let end = start + data.len();
        self.storage.as_mut_slice()[start..end].copy_from_slice(data);
        self.len = end;
    }
}

impl Deref for Buffer {
    type Target = [u8];

    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.storage.as_slice()[..self.len]
    }
}

impl DerefMut for Buffer {
    #[inline]
    fn deref_mut(&mut self) -> &mut Self::Target {
        let len = self.len;
        &mut self.storage.as_mut_slice()[..len]
    }
}

impl AsRef<[u8]> for Buffer {
    #[inline]
    fn as_ref(&self) -> &[u8] {
        self
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("len", &self.len)
            .field("capacity", &self.capacity())
            .field("class", &self.class)
            .field("numa_node", &self.numa_node())
            .finish()
    }
}
