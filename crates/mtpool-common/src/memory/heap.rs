//! Fallible heap allocation.
//!
//! Every pool allocates through here so that an exhausted heap surfaces as
//! [`PoolError::OutOfMemory`] instead of aborting the process.

use std::alloc::{self, Layout};
use std::ptr::{self, NonNull};

use crate::error::{PoolError, PoolResult};

/// Allocates `size` zeroed bytes.
///
/// # Errors
///
/// - [`PoolError::InvalidSize`] if `size` is zero
/// - [`PoolError::OutOfMemory`] if the layout is invalid or the allocator
///   returns null
///
/// # Example
///
/// ```rust
/// use mtpool_common::memory::try_alloc_zeroed;
///
/// let block = try_alloc_zeroed(4096).unwrap();
/// assert_eq!(block.len(), 4096);
/// assert!(block.iter().all(|b| *b == 0));
/// ```
pub fn try_alloc_zeroed(size: usize) -> PoolResult<Box<[u8]>> {
    if size == 0 {
        return Err(PoolError::InvalidSize(0));
    }

    let layout = Layout::array::<u8>(size).map_err(|_| PoolError::OutOfMemory { size })?;

    // SAFETY: layout has non-zero size (checked above)
    let raw = unsafe { alloc::alloc_zeroed(layout) };
    let raw = NonNull::new(raw).ok_or(PoolError::OutOfMemory { size })?;

    // SAFETY: raw was allocated by the global allocator with the layout of
    // `[u8; size]`, is zero-initialized, and is owned by nobody else
    let slice = ptr::slice_from_raw_parts_mut(raw.as_ptr(), size);
    Ok(unsafe { Box::from_raw(slice) })
}
