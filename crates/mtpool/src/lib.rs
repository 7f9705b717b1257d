//! # mtpool
//!
//! Resource-pooling core of a protocol proxy.
//!
//! Three pools sit underneath the proxy's request path:
//!
//! - **Buffers** ([`BufferManager`]): size-classed scratch memory for every
//!   socket read and write
//! - **Connections** ([`ConnectionPool`]): idle backend connections kept for
//!   reuse, keyed by target
//! - **NUMA** ([`NumaAllocator`]): node-aware accounting for large buffers
//!
//! [`Pools`] builds all three from one [`PoolsConfig`] and is passed to
//! every worker. [`maintenance::spawn`] runs connection expiry and buffer
//! warmup in the background.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use mtpool::{PoolableConnection, Pools, PoolsConfig};
//!
//! struct Upstream;
//!
//! impl PoolableConnection for Upstream {
//!     fn is_healthy(&self) -> bool {
//!         true
//!     }
//! }
//!
//! let pools: Pools<Upstream, &str> = Pools::new(&PoolsConfig::for_testing())?;
//!
//! let mut buffer = pools.buffers().acquire(1500)?;
//! pools.buffers().append(&mut buffer, b"GET / HTTP/1.1\r\n")?;
//! pools.buffers().release(buffer)?;
//!
//! if pools.connections().acquire(&"backend-1").is_none() {
//!     // Dial, serve the request, then offer the connection back.
//!     pools.connections().release_to_pool(Arc::new(Upstream), "backend-1");
//! }
//!
//! println!("{}", pools.snapshot());
//! # Ok::<(), mtpool::PoolError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod maintenance;
mod pools;

pub use maintenance::MaintenanceHandle;
pub use pools::{MaintenanceReport, Pools, PoolsSnapshot};

pub use mtpool_buffer::{Buffer, BufferManager, BufferStats, BucketStats, PooledBuffer, SizeClass};
pub use mtpool_common::config::{BufferConfig, ConnectionPoolConfig, NumaConfig, PoolsConfig};
pub use mtpool_common::memory::{NumaAllocator, NumaBlock, NumaPolicy, NumaStats};
pub use mtpool_common::{Clock, ErrorKind, ManualClock, PoolError, PoolResult, SystemClock};
pub use mtpool_conn::{ConnectionPool, ConnectionPoolStats, Lease, PoolableConnection};
