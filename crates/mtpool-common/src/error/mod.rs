//! Error handling for the pooling core.
//!
//! A single error type and result alias is shared by every pool.

mod pool;

pub use pool::{ErrorKind, PoolError};

/// Result type alias for pool operations.
pub type PoolResult<T> = std::result::Result<T, PoolError>;
