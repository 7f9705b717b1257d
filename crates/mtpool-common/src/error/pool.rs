//! Pool error types.

use std::fmt;
use thiserror::Error;

/// Broad category of a [`PoolError`].
///
/// Callers branch on the kind rather than on individual variants: an
/// exhaustion means "fall back to the unpooled path", a contract violation
/// means the caller has a bug.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The heap or a pool ran out of room. Retry later or go unpooled.
    Exhausted,
    /// The caller broke an API contract (bad size, stale or foreign handle).
    Contract,
    /// The configuration is inconsistent.
    Config,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Exhausted => write!(f, "exhausted"),
            ErrorKind::Contract => write!(f, "contract"),
            ErrorKind::Config => write!(f, "config"),
        }
    }
}

/// Error type shared by every pool in the workspace.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    /// A zero-byte allocation was requested.
    #[error("invalid allocation size: {0}")]
    InvalidSize(usize),

    /// The heap could not satisfy an allocation.
    #[error("out of memory allocating {size} bytes")]
    OutOfMemory {
        /// Requested size in bytes.
        size: usize,
    },

    /// A buffer was released to a manager that did not issue it.
    #[error("buffer was not issued by this manager")]
    ForeignBuffer,

    /// A lease was released to a pool that did not issue it.
    #[error("lease was not issued by this pool")]
    ForeignHandle,

    /// A lease outlived its slot (evicted, reaped or shut down).
    #[error("stale lease for slot {slot} (generation {generation})")]
    StaleHandle {
        /// Slot index recorded in the lease.
        slot: usize,
        /// Generation recorded in the lease.
        generation: u64,
    },

    /// A NUMA node id outside the node table.
    #[error("unknown NUMA node: {0}")]
    UnknownNode(usize),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl PoolError {
    /// Returns the category of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            PoolError::OutOfMemory { .. } => ErrorKind::Exhausted,
            PoolError::InvalidConfig(_) => ErrorKind::Config,
            PoolError::InvalidSize(_)
            | PoolError::ForeignBuffer
            | PoolError::ForeignHandle
            | PoolError::StaleHandle { .. }
            | PoolError::UnknownNode(_) => ErrorKind::Contract,
        }
    }

    /// Returns true if the caller should degrade to an unpooled path.
    #[inline]
    #[must_use]
    pub const fn is_exhaustion(&self) -> bool {
        matches!(self.kind(), ErrorKind::Exhausted)
    }

    /// Returns true if the caller violated an API contract.
    #[inline]
    #[must_use]
    pub const fn is_contract_violation(&self) -> bool {
        matches!(self.kind(), ErrorKind::Contract)
    }

    /// Shorthand for an `InvalidConfig` error.
    pub fn config(msg: impl Into<String>) -> Self {
        PoolError::InvalidConfig(msg.into())
    }
}
