//! Buffer manager statistics for the stats exporter.

use std::fmt;

/// Counters for one size class.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BucketStats {
    /// Class size in bytes.
    pub class_size: usize,
    /// Buffers currently idle in the free list.
    pub idle_count: usize,
    /// Fresh heap allocations for this class.
    pub allocated: u64,
    /// Buffers released back into the free list.
    pub returned: u64,
    /// Acquisitions served from the free list.
    pub reused: u64,
}

impl BucketStats {
    /// Fraction of acquisitions served without allocating (0.0 to 1.0).
    #[must_use]
    pub fn reuse_ratio(&self) -> f64 {
        let total = self.allocated + self.reused;
        if total == 0 {
            0.0
        } else {
            self.reused as f64 / total as f64
        }
    }
}

/// Snapshot of a buffer manager.
///
/// The byte totals are kept under a separate lock from the buckets and may
/// lag them slightly; treat them as advisory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BufferStats {
    /// Bytes ever allocated from the heap.
    pub allocated_bytes: u64,
    /// Bytes ever returned to the heap.
    pub freed_bytes: u64,
    /// High-water mark of `allocated_bytes - freed_bytes`.
    pub peak_bytes: u64,
    /// Per-class counters, ascending by class size.
    pub buckets: Vec<BucketStats>,
}

impl BufferStats {
    /// Bytes currently held, pooled or lent out.
    #[must_use]
    pub fn in_use_bytes(&self) -> u64 {
        self.allocated_bytes.saturating_sub(self.freed_bytes)
    }

    /// Idle buffers across every class.
    #[must_use]
    pub fn idle_buffers(&self) -> usize {
        self.buckets.iter().map(|b| b.idle_count).sum()
    }

    /// Counters for the class of exactly `class_size` bytes.
    #[must_use]
    pub fn bucket(&self, class_size: usize) -> Option<&BucketStats> {
        self.buckets.iter().find(|b| b.class_size == class_size)
    }
}

impl fmt::Display for BufferStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "BufferStats {{ allocated: {}, freed: {}, peak: {}, idle: {} }}",
            self.allocated_bytes,
            self.freed_bytes,
            self.peak_bytes,
            self.idle_buffers()
        )?;
        for b in &self.buckets {
            write!(
                f,
                "\n  {:>7}: idle={} allocated={} returned={} reused={} ({:.1}% reuse)",
                b.class_size,
                b.idle_count,
                b.allocated,
                b.returned,
                b.reused,
                b.reuse_ratio() * 100.0
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reuse_ratio() {
        let stats = BucketStats {
            class_size: 1024,
            idle_count: 0,
            allocated: 25,
            returned: 80,
            reused: 75,
        };
        assert!((stats.reuse_ratio() - 0.75).abs() < 0.001);
        assert_eq!(BucketStats::default().reuse_ratio(), 0.0);
    }

    #[test]
    fn test_aggregates() {
        let stats = BufferStats {
            allocated_bytes: 10_000,
            freed_bytes: 4_000,
            peak_bytes: 8_000,
            buckets: vec![
                BucketStats { class_size: 1024, idle_count: 3, ..Default::default() },
                BucketStats { class_size: 2048, idle_count: 2, ..Default::default() },
            ],
        };
        assert_eq!(stats.in_use_bytes(), 6_000);
        assert_eq!(stats.idle_buffers(), 5);
        assert_eq!(stats.bucket(2048).map(|b| b.idle_count), Some(2));
        assert!(stats.bucket(4096).is_none());
    }

    #[test]
    fn test_display() {
        let stats = BufferStats {
            allocated_bytes: 2048,
            freed_bytes: 0,
            peak_bytes: 2048,
            buckets: vec![BucketStats { class_size: 1024, idle_count: 2, ..Default::default() }],
        };
        let text = stats.to_string();
        assert!(text.starts_with("BufferStats { allocated: 2048"));
        assert!(text.contains("1024: idle=2"));
    }
}
