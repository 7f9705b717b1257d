//! # mtpool-buffer
//!
//! Transient I/O buffers for the proxy request path.
//!
//! Every read and write on a client or backend socket needs scratch memory.
//! Rather than hitting the allocator per event, [`BufferManager`] keeps a
//! ladder of size classes (1 KiB to 128 KiB by default) with a bounded free
//! list per class:
//!
//! ```text
//!   acquire(1500)
//!        │
//!        ▼
//!   ┌──────┬──────┬──────┬─────┬────────┐
//!   │ 1 KiB│ 2 KiB│ 4 KiB│ ... │ 128 KiB│   size classes
//!   └──────┴──┬───┴──────┴─────┴────────┘
//!             │ pop (LIFO) or allocate 2 KiB
//!             ▼
//!          Buffer { class: 2 KiB, len: 0 }
//! ```
//!
//! Requests above the top class are served unpooled. Large classes can be
//! charged to NUMA nodes through a shared
//! [`NumaAllocator`](mtpool_common::memory::NumaAllocator).

#![warn(missing_docs)]
#![warn(clippy::all)]

mod bucket;
mod buffer;
mod guard;
mod manager;
mod stats;

pub use buffer::{Buffer, SizeClass};
pub use guard::PooledBuffer;
pub use manager::BufferManager;
pub use stats::{BucketStats, BufferStats};
