//! Connection pool statistics.

use std::fmt;

/// Snapshot of a connection pool's counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionPoolStats {
    /// Acquisitions that found a reusable idle entry.
    pub hits: u64,
    /// Acquisitions that found nothing.
    pub misses: u64,
    /// Idle entries freed by eviction or expiry.
    pub recycled: u64,
    /// Connections accepted by `release_to_pool`.
    pub reused: u64,
    /// Entries currently in the table.
    pub total_entries: usize,
    /// Connections refused by `release_to_pool`.
    pub rejected: u64,
    /// Leases released after their slot was freed.
    pub stale_releases: u64,
}

impl ConnectionPoolStats {
    /// Returns the fraction of acquisitions that were hits (0.0 to 1.0).
    #[must_use]
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

impl fmt::Display for ConnectionPoolStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ConnectionPoolStats {{ entries: {}, hits: {}, misses: {}, hit_ratio: {:.2}%, \
             recycled: {}, reused: {}, rejected: {}, stale: {} }}",
            self.total_entries,
            self.hits,
            self.misses,
            self.hit_ratio() * 100.0,
            self.recycled,
            self.reused,
            self.rejected,
            self.stale_releases
        )
    }
}
