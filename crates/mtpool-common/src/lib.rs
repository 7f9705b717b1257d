//! # mtpool-common
//!
//! Common types, errors, and memory utilities for the proxy pooling core.
//!
//! This crate provides the foundations shared by the buffer and connection
//! pools. It includes:
//!
//! - **Errors**: the `PoolError` taxonomy and `PoolResult` alias
//! - **Config**: serde-derived pool configuration with validation
//! - **Clock**: an injectable monotonic time source
//! - **Memory**: fallible heap allocation and the NUMA accounting allocator
//! - **Constants**: defaults for every configurable value
//!
//! ## Example
//!
//! ```rust
//! use mtpool_common::config::PoolsConfig;
//! use mtpool_common::memory::{NumaAllocator, NumaPolicy};
//! use mtpool_common::PoolResult;
//!
//! fn example() -> PoolResult<()> {
//!     let config = PoolsConfig::for_testing();
//!     config.validate()?;
//!
//!     let numa = NumaAllocator::from_config(&config.numa);
//!     let block = numa.allocate(4096, NumaPolicy::Interleave)?;
//!     numa.free(block);
//!     Ok(())
//! }
//! # example().unwrap();
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod clock;
pub mod config;
pub mod constants;
pub mod error;
pub mod memory;

// Re-export commonly used items at the crate root
pub use clock::{Clock, ManualClock, SystemClock};
pub use constants::*;
pub use error::{ErrorKind, PoolError, PoolResult};
