//! The pool context shared by every worker.

use std::fmt;
use std::sync::Arc;

use tracing::info;

use mtpool_buffer::{BufferManager, BufferStats};
use mtpool_common::clock::{Clock, SystemClock};
use mtpool_common::config::PoolsConfig;
use mtpool_common::memory::{NumaAllocator, NumaStats};
use mtpool_common::PoolResult;
use mtpool_conn::{ConnectionPool, ConnectionPoolStats, PoolableConnection};

/// Every pool the proxy needs, built once from configuration.
///
/// Cloning is cheap and shares the underlying pools.
pub struct Pools<C, K> {
    numa: Arc<NumaAllocator>,
    buffers: Arc<BufferManager>,
    connections: Arc<ConnectionPool<C, K>>,
}

impl<C, K> Pools<C, K>
where
    C: PoolableConnection + 'static,
    K: Eq + Clone + fmt::Debug + Send + 'static,
{
    /// Builds the pools on the system clock.
    pub fn new(config: &PoolsConfig) -> PoolResult<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Builds the pools with connection expiry driven by `clock`.
    pub fn with_clock(config: &PoolsConfig, clock: Arc<dyn Clock>) -> PoolResult<Self> {
        config.validate()?;

        let numa = Arc::new(NumaAllocator::from_config(&config.numa));
        let buffers = if config.numa.enabled {
            BufferManager::with_numa(&config.buffers, Arc::clone(&numa))?
        } else {
            BufferManager::new(&config.buffers)?
        };
        let connections = ConnectionPool::with_clock(&config.connections, clock)?;

        info!(
            numa_nodes = numa.node_count(),
            numa_enabled = config.numa.enabled,
            "pools initialized"
        );

        Ok(Self {
            numa,
            buffers: Arc::new(buffers),
            connections: Arc::new(connections),
        })
    }

    /// Returns the NUMA allocator.
    pub fn numa(&self) -> &Arc<NumaAllocator> {
        &self.numa
    }

    /// Returns the buffer manager.
    pub fn buffers(&self) -> &Arc<BufferManager> {
        &self.buffers
    }

    /// Returns the connection pool.
    pub fn connections(&self) -> &Arc<ConnectionPool<C, K>> {
        &self.connections
    }

    /// Runs one maintenance pass: expires idle connections and tops up the
    /// buffer free lists.
    pub fn maintain(&self) -> MaintenanceReport {
        MaintenanceReport {
            reaped: self.connections.reap(),
            warmed: self.buffers.warmup(),
        }
    }

    /// Reads every pool's counters.
    pub fn snapshot(&self) -> PoolsSnapshot {
        PoolsSnapshot {
            buffers: self.buffers.stats(),
            connections: self.connections.stats(),
            numa: self.numa.stats(),
        }
    }

    /// Frees every pooled connection and idle buffer.
    pub fn shutdown(&self) {
        let connections = self.connections.shutdown();
        let buffers = self.buffers.shutdown();
        info!(connections, buffers, "pools shut down");
    }
}

impl<C, K> Clone for Pools<C, K> {
    fn clone(&self) -> Self {
        Self {
            numa: Arc::clone(&self.numa),
            buffers: Arc::clone(&self.buffers),
            connections: Arc::clone(&self.connections),
        }
    }
}

impl<C, K> fmt::Debug for Pools<C, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pools")
            .field("numa", &self.numa)
            .field("buffers", &self.buffers)
            .field("connections", &self.connections)
            .finish()
    }
}

/// Outcome of one maintenance pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    /// Expired connections freed.
    pub reaped: usize,
    /// Buffers pre-allocated.
    pub warmed: usize,
}

/// Counters from every pool, read together for the stats exporter.
#[derive(Debug, Clone)]
pub struct PoolsSnapshot {
    /// Buffer manager counters.
    pub buffers: BufferStats,
    /// Connection pool counters.
    pub connections: ConnectionPoolStats,
    /// NUMA allocator counters.
    pub numa: NumaStats,
}

impl fmt::Display for PoolsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.buffers)?;
        writeln!(f, "{}", self.connections)?;
        write!(f, "{}", self.numa)
    }
}
