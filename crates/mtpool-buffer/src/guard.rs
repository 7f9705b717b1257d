//! Scoped buffer that returns itself to the manager on drop.

use std::fmt;
use std::ops::{Deref, DerefMut};

use crate::buffer::Buffer;
use crate::manager::BufferManager;

/// A buffer borrowed from a [`BufferManager`] for the length of a scope.
///
/// Dropping the guard releases the buffer. Use
/// [`PooledBuffer::into_inner`] to keep it past the scope and release it
/// manually.
pub struct PooledBuffer<'a> {
    manager: &'a BufferManager,
    buffer: Option<Buffer>,
}

impl<'a> PooledBuffer<'a> {
    pub(crate) fn new(manager: &'a BufferManager, buffer: Buffer) -> Self {
        Self {
            manager,
            buffer: Some(buffer),
        }
    }

    /// Appends `data`, growing through the owning manager if needed.
    pub fn append(&mut self, data: &[u8]) -> mtpool_common::PoolResult<()> {
        let manager = self.manager;
        manager.append(self, data)
    }

    /// Detaches the buffer from the guard.
    #[must_use]
    pub fn into_inner(mut self) -> Buffer {
        match self.buffer.take() {
            Some(buffer) => buffer,
            // Only `into_inner` and `drop` take the buffer, and both consume the guard.
            None => unreachable!("pooled buffer already taken"),
        }
    }
}

impl Deref for PooledBuffer<'_> {
    type Target = Buffer;

    fn deref(&self) -> &Buffer {
        match &self.buffer {
            Some(buffer) => buffer,
            None => unreachable!("pooled buffer already taken"),
        }
    }
}

impl DerefMut for PooledBuffer<'_> {
    fn deref_mut(&mut self) -> &mut Buffer {
        match &mut self.buffer {
            Some(buffer) => buffer,
            None => unreachable!("pooled buffer already taken"),
        }
    }
}

impl Drop for PooledBuffer<'_> {
    fn drop(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            if let Err(err) = self.manager.release(buffer) {
                tracing::warn!(error = %err, "failed to release pooled buffer");
            }
        }
    }
}

impl fmt::Debug for PooledBuffer<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PooledBuffer").field(&self.buffer).finish()
    }
}
