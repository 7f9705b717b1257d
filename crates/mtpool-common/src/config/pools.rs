//! Pool configuration structures.
//!
//! All pool state is rebuilt from these at process start: the buffer
//! ladder, the connection table size and the NUMA node topology.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::constants::{
    DEFAULT_BUCKET_CAPACITY, DEFAULT_BUFFER_CLASSES, DEFAULT_CONNECTION_POOL_CAPACITY,
    DEFAULT_NODE_MEMORY, DEFAULT_NUMA_THRESHOLD, DEFAULT_REUSE_TIMEOUT_MS,
    MAX_CONNECTION_POOL_CAPACITY,
};
use crate::error::{PoolError, PoolResult};
use crate::memory::NumaPolicy;

/// Top-level configuration for every pool.
///
/// # Example
///
/// ```rust
/// use mtpool_common::config::PoolsConfig;
///
/// let config = PoolsConfig::default();
/// assert_eq!(config.connections.capacity, 256);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolsConfig {
    /// Buffer manager configuration.
    pub buffers: BufferConfig,

    /// Connection pool configuration.
    pub connections: ConnectionPoolConfig,

    /// NUMA allocator configuration.
    pub numa: NumaConfig,
}

impl PoolsConfig {
    /// Creates a small configuration for tests: three buffer classes,
    /// a short bucket, and two simulated NUMA nodes.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            buffers: BufferConfig::new()
                .classes(vec![1024, 2048, 4096])
                .bucket_capacity(8),
            connections: ConnectionPoolConfig::new().capacity(4),
            numa: NumaConfig::simulated(2),
        }
    }

    /// Validates every section.
    pub fn validate(&self) -> PoolResult<()> {
        self.buffers.validate()?;
        self.connections.validate()?;
        self.numa.validate()
    }
}

/// Buffer manager configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Size classes in bytes, strictly ascending.
    /// Default: 1 KiB .. 128 KiB
    pub classes: Vec<usize>,

    /// Maximum idle buffers kept per class.
    /// Default: 1024
    pub bucket_capacity: usize,

    /// Classes at or above this size are allocated through the NUMA
    /// allocator when one is attached.
    /// Default: 65536 (64 KiB)
    pub numa_threshold: usize,

    /// Pre-warm every bucket when the manager is built.
    /// Default: false
    pub warmup_on_start: bool,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            classes: DEFAULT_BUFFER_CLASSES.to_vec(),
            bucket_capacity: DEFAULT_BUCKET_CAPACITY,
            numa_threshold: DEFAULT_NUMA_THRESHOLD,
            warmup_on_start: false,
        }
    }
}

impl BufferConfig {
    /// Creates the default buffer configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the size-class ladder.
    #[must_use]
    pub fn classes(mut self, classes: Vec<usize>) -> Self {
        self.classes = classes;
        self
    }

    /// Sets the per-class free-list capacity.
    #[must_use]
    pub fn bucket_capacity(mut self, capacity: usize) -> Self {
        self.bucket_capacity = capacity;
        self
    }

    /// Sets the NUMA routing threshold.
    #[must_use]
    pub fn numa_threshold(mut self, threshold: usize) -> Self {
        self.numa_threshold = threshold;
        self
    }

    /// Enables pre-warming at construction.
    #[must_use]
    pub fn warmup_on_start(mut self, enabled: bool) -> Self {
        self.warmup_on_start = enabled;
        self
    }

    /// Returns the largest class, if the ladder is non-empty.
    #[must_use]
    pub fn max_class(&self) -> Option<usize> {
        self.classes.last().copied()
    }

    /// Validates the configuration.
    pub fn validate(&self) -> PoolResult<()> {
        if self.classes.is_empty() {
            return Err(PoolError::config("buffer classes must not be empty"));
        }
        if self.classes[0] == 0 {
            return Err(PoolError::config("buffer classes must be non-zero"));
        }
        if !self.classes.windows(2).all(|w| w[0] < w[1]) {
            return Err(PoolError::config(
                "buffer classes must be strictly ascending",
            ));
        }
        if self.bucket_capacity == 0 {
            return Err(PoolError::config(
                "bucket_capacity must be greater than 0",
            ));
        }
        Ok(())
    }
}

/// Connection pool configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionPoolConfig {
    /// Number of slots in the connection table.
    /// Default: 256
    pub capacity: usize,

    /// How long an idle connection stays eligible for reuse, in milliseconds.
    /// Default: 30000
    pub reuse_timeout_ms: u64,
}

impl Default for ConnectionPoolConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CONNECTION_POOL_CAPACITY,
            reuse_timeout_ms: DEFAULT_REUSE_TIMEOUT_MS,
        }
    }
}

impl ConnectionPoolConfig {
    /// Creates the default connection pool configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the table capacity.
    #[must_use]
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Sets the reuse timeout.
    #[must_use]
    pub fn reuse_timeout(mut self, timeout: Duration) -> Self {
        self.reuse_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Returns the reuse timeout as a `Duration`.
    #[must_use]
    pub const fn reuse_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.reuse_timeout_ms)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> PoolResult<()> {
        if self.capacity == 0 {
            return Err(PoolError::config(
                "connection pool capacity must be greater than 0",
            ));
        }
        if self.capacity > MAX_CONNECTION_POOL_CAPACITY {
            return Err(PoolError::config(format!(
                "connection pool capacity {} exceeds maximum {}",
                self.capacity, MAX_CONNECTION_POOL_CAPACITY
            )));
        }
        if self.reuse_timeout_ms == 0 {
            return Err(PoolError::config(
                "reuse_timeout_ms must be greater than 0",
            ));
        }
        Ok(())
    }
}

/// NUMA allocator configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NumaConfig {
    /// Attach a NUMA allocator to the buffer manager.
    /// Default: true
    pub enabled: bool,

    /// Read the node table from sysfs instead of simulating it.
    /// Default: true
    pub detect_topology: bool,

    /// Number of nodes to simulate when detection is off or fails.
    /// Default: 1
    pub simulated_nodes: usize,

    /// Memory per simulated node, in bytes.
    /// Default: 4 GiB
    pub node_memory: u64,

    /// CPUs per simulated node.
    /// Default: 1
    pub cpus_per_node: usize,

    /// Policy used by `allocate_default`.
    /// Default: local
    pub default_policy: NumaPolicy,
}

impl Default for NumaConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            detect_topology: true,
            simulated_nodes: 1,
            node_memory: DEFAULT_NODE_MEMORY,
            cpus_per_node: 1,
            default_policy: NumaPolicy::Local,
        }
    }
}

impl NumaConfig {
    /// Creates a configuration with `nodes` simulated nodes and detection off.
    #[must_use]
    pub fn simulated(nodes: usize) -> Self {
        Self {
            detect_topology: false,
            simulated_nodes: nodes,
            ..Default::default()
        }
    }

    /// Sets the default policy.
    #[must_use]
    pub fn default_policy(mut self, policy: NumaPolicy) -> Self {
        self.default_policy = policy;
        self
    }

    /// Sets the memory per simulated node.
    #[must_use]
    pub fn node_memory(mut self, bytes: u64) -> Self {
        self.node_memory = bytes;
        self
    }

    /// Validates the configuration.
    pub fn validate(&self) -> PoolResult<()> {
        if self.simulated_nodes == 0 {
            return Err(PoolError::config("simulated_nodes must be at least 1"));
        }
        if self.node_memory == 0 {
            return Err(PoolError::config("node_memory must be greater than 0"));
        }
        if self.cpus_per_node == 0 {
            return Err(PoolError::config("cpus_per_node must be at least 1"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = PoolsConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.buffers.classes.len(), 8);
        assert_eq!(config.buffers.max_class(), Some(128 * 1024));
        assert_eq!(
            config.connections.reuse_timeout_duration(),
            Duration::from_secs(30)
        );
    }

    #[test]
    fn test_testing_config_is_valid() {
        assert!(PoolsConfig::for_testing().validate().is_ok());
    }

    #[test]
    fn test_invalid_ladders() {
        let empty = BufferConfig::new().classes(vec![]);
        assert!(empty.validate().is_err());

        let unsorted = BufferConfig::new().classes(vec![2048, 1024]);
        assert!(unsorted.validate().is_err());

        let duplicate = BufferConfig::new().classes(vec![1024, 1024]);
        assert!(duplicate.validate().is_err());

        let zero = BufferConfig::new().classes(vec![0, 1024]);
        assert!(zero.validate().is_err());

        let no_room = BufferConfig::new().bucket_capacity(0);
        assert!(no_room.validate().is_err());
    }

    #[test]
    fn test_invalid_connection_config() {
        assert!(ConnectionPoolConfig::new().capacity(0).validate().is_err());
        assert!(ConnectionPoolConfig::new()
            .capacity(MAX_CONNECTION_POOL_CAPACITY + 1)
            .validate()
            .is_err());
        assert!(ConnectionPoolConfig::new()
            .reuse_timeout(Duration::ZERO)
            .validate()
            .is_err());
    }

    #[test]
    fn test_invalid_numa_config() {
        assert!(NumaConfig::simulated(0).validate().is_err());
        assert!(NumaConfig::simulated(2).node_memory(0).validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{
            "buffers": { "classes": [512, 4096] },
            "connections": { "reuse_timeout_ms": 5000 },
            "numa": { "default_policy": "interleave", "detect_topology": false }
        }"#;
        let config: PoolsConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.buffers.classes, vec![512, 4096]);
        assert_eq!(config.buffers.bucket_capacity, DEFAULT_BUCKET_CAPACITY);
        assert_eq!(config.connections.capacity, DEFAULT_CONNECTION_POOL_CAPACITY);
        assert_eq!(
            config.connections.reuse_timeout_duration(),
            Duration::from_secs(5)
        );
        assert_eq!(config.numa.default_policy, NumaPolicy::Interleave);
        assert!(!config.numa.detect_topology);
        assert!(config.validate().is_ok());
    }
}
