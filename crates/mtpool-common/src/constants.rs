//! System-wide constants for the pooling core.
//!
//! These are the defaults used when a configuration field is omitted.

// =============================================================================
// Buffer Pool Constants
// =============================================================================

/// Default size-class ladder for I/O buffers (1 KiB .. 128 KiB).
///
/// Every rung is a power of two so that a doubling `extend` always lands on
/// the next class up.
pub const DEFAULT_BUFFER_CLASSES: [usize; 8] = [
    1024,
    2 * 1024,
    4 * 1024,
    8 * 1024,
    16 * 1024,
    32 * 1024,
    64 * 1024,
    128 * 1024,
];

/// Default number of idle buffers kept per size class.
pub const DEFAULT_BUCKET_CAPACITY: usize = 1024;

/// Classes at or above this size are allocated through the NUMA layer
/// when one is attached.
pub const DEFAULT_NUMA_THRESHOLD: usize = 64 * 1024;

// =============================================================================
// Connection Pool Constants
// =============================================================================

/// Default number of slots in the connection table.
pub const DEFAULT_CONNECTION_POOL_CAPACITY: usize = 256;

/// Upper bound on the connection table size.
///
/// Lookup and eviction scan the whole table under its lock, so the table
/// must stay small.
pub const MAX_CONNECTION_POOL_CAPACITY: usize = 4096;

/// Default window during which an idle connection may be reused (30 s).
pub const DEFAULT_REUSE_TIMEOUT_MS: u64 = 30_000;

// =============================================================================
// NUMA Constants
// =============================================================================

/// Memory charged to each simulated node when topology detection is off (4 GiB).
pub const DEFAULT_NODE_MEMORY: u64 = 4 * 1024 * 1024 * 1024;

/// Root of the Linux sysfs node hierarchy.
pub const SYSFS_NODE_ROOT: &str = "/sys/devices/system/node";
