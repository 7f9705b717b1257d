//! Keyed connection reuse cache.
//!
//! The table has a fixed number of slots. Each slot is either free or holds
//! one entry, and each entry is either idle (available for reuse) or
//! reserved by a lease:
//!
//! ```text
//!   Free ──release_to_pool──▶ Idle ──acquire──▶ Reserved
//!    ▲                         │  ▲                │
//!    └──evict / reap / shutdown┘  └────release─────┘
//! ```
//!
//! Freeing a slot bumps its generation, which invalidates any lease still
//! pointing at it.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use mtpool_common::clock::{Clock, SystemClock};
use mtpool_common::config::ConnectionPoolConfig;
use mtpool_common::{PoolError, PoolResult};

use crate::connection::PoolableConnection;
use crate::lease::{Lease, LeaseHome};
use crate::stats::ConnectionPoolStats;

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

struct Entry<C, K> {
    connection: Arc<C>,
    target: K,
    last_used: Instant,
    ref_count: u32,
}

impl<C, K> Entry<C, K> {
    #[inline]
    fn is_idle(&self) -> bool {
        self.ref_count == 0
    }

    #[inline]
    fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_used)
    }
}

struct Slot<C, K> {
    generation: u64,
    entry: Option<Entry<C, K>>,
}

#[derive(Default)]
struct Counters {
    hits: u64,
    misses: u64,
    recycled: u64,
    reused: u64,
    rejected: u64,
    stale_releases: u64,
}

struct PoolState<C, K> {
    slots: Vec<Slot<C, K>>,
    /// Indices of free slots; popped from the end.
    free: Vec<usize>,
    counters: Counters,
}

impl<C, K> PoolState<C, K> {
    fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    /// Empties a slot and invalidates outstanding leases on it.
    fn vacate(&mut self, index: usize) -> Option<Entry<C, K>> {
        let slot = &mut self.slots[index];
        let entry = slot.entry.take()?;
        slot.generation += 1;
        self.free.push(index);
        Some(entry)
    }

    /// Index of the idle entry with the oldest `last_used`.
    fn oldest_idle(&self) -> Option<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.entry.as_ref().map(|e| (i, e)))
            .filter(|(_, e)| e.is_idle())
            .min_by_key(|(_, e)| e.last_used)
            .map(|(i, _)| i)
    }
}

/// Table state shared with outstanding leases so a dropped lease can find
/// its way back.
struct Shared<C, K> {
    clock: Arc<dyn Clock>,
    state: Mutex<PoolState<C, K>>,
}

impl<C, K> Shared<C, K> {
    /// Makes a reserved entry idle again if the slot still holds it.
    fn return_entry(&self, slot: usize, generation: u64, connection: &Arc<C>) -> bool {
        let now = self.clock.now();
        let mut state = self.state.lock();

        let live = state
            .slots
            .get_mut(slot)
            .filter(|s| s.generation == generation)
            .and_then(|s| s.entry.as_mut())
            .filter(|e| Arc::ptr_eq(&e.connection, connection) && e.ref_count > 0);

        match live {
            Some(entry) => {
                entry.ref_count -= 1;
                entry.last_used = now;
                true
            }
            None => false,
        }
    }
}

impl<C, K> LeaseHome<C> for Shared<C, K>
where
    C: PoolableConnection,
    K: Send,
{
    fn return_lease(&self, slot: usize, generation: u64, connection: &Arc<C>) -> bool {
        self.return_entry(slot, generation, connection)
    }
}

/// A fixed-capacity cache of idle backend connections, keyed by target.
///
/// `C` is the proxy's connection type and `K` identifies a backend. The pool
/// holds one `Arc` per entry; whoever owns the connection lifecycle keeps
/// its own.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use mtpool_common::config::ConnectionPoolConfig;
/// use mtpool_conn::{ConnectionPool, PoolableConnection};
///
/// struct Backend;
/// impl PoolableConnection for Backend {
///     fn is_healthy(&self) -> bool { true }
/// }
///
/// let pool = ConnectionPool::new(&ConnectionPoolConfig::new().capacity(8))?;
///
/// assert!(pool.release_to_pool(Arc::new(Backend), "db-1"));
/// let lease = pool.acquire(&"db-1").expect("idle connection");
/// pool.release(lease)?;
///
/// assert_eq!(pool.stats().hits, 1);
/// # Ok::<(), mtpool_common::PoolError>(())
/// ```
pub struct ConnectionPool<C, K> {
    id: u64,
    reuse_timeout: Duration,
    shared: Arc<Shared<C, K>>,
}

impl<C, K> ConnectionPool<C, K>
where
    C: PoolableConnection + 'static,
    K: Eq + Clone + fmt::Debug + Send + 'static,
{
    /// Creates a pool on the system clock.
    pub fn new(config: &ConnectionPoolConfig) -> PoolResult<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Creates a pool that reads time from `clock`.
    pub fn with_clock(config: &ConnectionPoolConfig, clock: Arc<dyn Clock>) -> PoolResult<Self> {
        config.validate()?;

        let slots = (0..config.capacity)
            .map(|_| Slot {
                generation: 0,
                entry: None,
            })
            .collect();
        let free = (0..config.capacity).rev().collect();

        info!(
            capacity = config.capacity,
            reuse_timeout_ms = config.reuse_timeout_ms,
            "connection pool created"
        );

        Ok(Self {
            id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            reuse_timeout: config.reuse_timeout_duration(),
            shared: Arc::new(Shared {
                clock,
                state: Mutex::new(PoolState {
                    slots,
                    free,
                    counters: Counters::default(),
                }),
            }),
        })
    }

    /// Returns the number of slots.
    pub fn capacity(&self) -> usize {
        self.shared.state.lock().slots.len()
    }

    /// Returns the number of tracked entries, idle or reserved.
    pub fn len(&self) -> usize {
        self.shared.state.lock().len()
    }

    /// Returns true if nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the number of idle entries, expired or not.
    pub fn idle_count(&self) -> usize {
        self.shared
            .state
            .lock()
            .slots
            .iter()
            .filter(|s| s.entry.as_ref().is_some_and(Entry::is_idle))
            .count()
    }

    /// Returns the reuse timeout.
    pub fn reuse_timeout(&self) -> Duration {
        self.reuse_timeout
    }

    /// Reserves an idle, unexpired connection to `target`.
    ///
    /// Returns `None` on a miss; the caller should open a fresh connection.
    pub fn acquire(&self, target: &K) -> Option<Lease<C>> {
        let now = self.shared.clock.now();
        let mut state = self.shared.state.lock();

        let found = state.slots.iter_mut().enumerate().find_map(|(index, slot)| {
            let generation = slot.generation;
            slot.entry
                .as_mut()
                .filter(|e| e.is_idle() && e.target == *target && e.age(now) < self.reuse_timeout)
                .map(|entry| {
                    entry.ref_count += 1;
                    (index, generation, Arc::clone(&entry.connection))
                })
        });

        match found {
            Some((slot, generation, connection)) => {
                state.counters.hits += 1;
                let home: Weak<dyn LeaseHome<C>> = Arc::downgrade(&self.shared) as Weak<dyn LeaseHome<C>>;
                Some(Lease {
                    pool_id: self.id,
                    slot,
                    generation,
                    connection,
                    home: Some(home),
                })
            }
            None => {
                state.counters.misses += 1;
                None
            }
        }
    }

    /// Offers a connection to the pool as an idle entry for `target`.
    ///
    /// Returns false if the connection is unhealthy, already tracked, or
    /// the table is full of reserved entries. When the table is full the
    /// oldest idle entry is evicted to make room.
    pub fn release_to_pool(&self, connection: Arc<C>, target: K) -> bool {
        if !connection.is_healthy() {
            self.shared.state.lock().counters.rejected += 1;
            debug!(?target, "unhealthy connection not pooled");
            return false;
        }

        let now = self.shared.clock.now();
        let mut state = self.shared.state.lock();

        let tracked = state
            .slots
            .iter()
            .filter_map(|s| s.entry.as_ref())
            .any(|e| Arc::ptr_eq(&e.connection, &connection));
        if tracked {
            state.counters.rejected += 1;
            debug!(?target, "connection already pooled");
            return false;
        }

        let index = match state.free.pop() {
            Some(index) => index,
            None => {
                let Some(victim) = state.oldest_idle() else {
                    state.counters.rejected += 1;
                    debug!(?target, "connection pool full, no idle entry to evict");
                    return false;
                };
                if let Some(evicted) = state.vacate(victim) {
                    debug!(slot = victim, target = ?evicted.target, "evicted idle connection");
                }
                state.counters.recycled += 1;
                match state.free.pop() {
                    Some(index) => index,
                    None => return false,
                }
            }
        };

        state.slots[index].entry = Some(Entry {
            connection,
            target,
            last_used: now,
            ref_count: 0,
        });
        state.counters.reused += 1;
        true
    }

    /// Returns a lease, making its entry idle again.
    ///
    /// # Errors
    ///
    /// - [`PoolError::ForeignHandle`] if another pool issued the lease. The
    ///   lease still goes back to the pool that issued it.
    /// - [`PoolError::StaleHandle`] if the slot was freed since the lease was
    ///   issued. The lease's reference is dropped; the pool is unchanged.
    pub fn release(&self, mut lease: Lease<C>) -> PoolResult<()> {
        if lease.pool_id != self.id {
            return Err(PoolError::ForeignHandle);
        }
        lease.home = None;

        if self
            .shared
            .return_entry(lease.slot, lease.generation, &lease.connection)
        {
            return Ok(());
        }

        self.shared.state.lock().counters.stale_releases += 1;
        warn!(slot = lease.slot, generation = lease.generation, "stale connection lease");
        Err(PoolError::StaleHandle {
            slot: lease.slot,
            generation: lease.generation,
        })
    }

    /// Frees every idle entry that has reached the reuse timeout.
    ///
    /// Returns the number of entries freed.
    pub fn reap(&self) -> usize {
        let now = self.shared.clock.now();
        let mut state = self.shared.state.lock();

        let expired: Vec<usize> = state
            .slots
            .iter()
            .enumerate()
            .filter(|(_, s)| {
                s.entry
                    .as_ref()
                    .is_some_and(|e| e.is_idle() && e.age(now) >= self.reuse_timeout)
            })
            .map(|(i, _)| i)
            .collect();

        for &index in &expired {
            state.vacate(index);
        }
        state.counters.recycled += expired.len() as u64;

        if !expired.is_empty() {
            debug!(reaped = expired.len(), remaining = state.len(), "reaped idle connections");
        }
        expired.len()
    }

    /// Frees every entry, idle or reserved. Outstanding leases become stale.
    ///
    /// Returns the number of entries freed.
    pub fn shutdown(&self) -> usize {
        let mut state = self.shared.state.lock();
        let mut freed = 0;
        for index in 0..state.slots.len() {
            if state.vacate(index).is_some() {
                freed += 1;
            }
        }
        if freed > 0 {
            info!(freed, "connection pool shut down");
        }
        freed
    }

    /// Returns a snapshot of the counters.
    pub fn stats(&self) -> ConnectionPoolStats {
        let state = self.shared.state.lock();
        let c = &state.counters;
        ConnectionPoolStats {
            hits: c.hits,
            misses: c.misses,
            recycled: c.recycled,
            reused: c.reused,
            total_entries: state.len(),
            rejected: c.rejected,
            stale_releases: c.stale_releases,
        }
    }
}

impl<C, K> fmt::Debug for ConnectionPool<C, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("ConnectionPool")
            .field("capacity", &state.slots.len())
            .field("entries", &state.len())
            .field("reuse_timeout", &self.reuse_timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mtpool_common::clock::ManualClock;
    use std::sync::atomic::AtomicBool;

    #[derive(Default)]
    struct TestConn {
        broken: AtomicBool,
    }

    impl PoolableConnection for TestConn {
        fn is_healthy(&self) -> bool {
            !self.broken.load(Ordering::Relaxed)
        }
    }

    fn conn() -> Arc<TestConn> {
        Arc::new(TestConn::default())
    }

    fn pool(capacity: usize) -> (ConnectionPool<TestConn, &'static str>, ManualClock) {
        let clock = ManualClock::new();
        let config = ConnectionPoolConfig::new()
            .capacity(capacity)
            .reuse_timeout(Duration::from_secs(30));
        let pool = ConnectionPool::with_clock(&config, Arc::new(clock.clone())).unwrap();
        (pool, clock)
    }

    #[test]
    fn test_acquire_miss_on_empty() {
        let (pool, _) = pool(4);
        assert!(pool.acquire(&"a").is_none());
        assert_eq!(pool.stats().misses, 1);
    }

    #[test]
    fn test_release_to_pool_then_acquire() {
        let (pool, _) = pool(4);
        let c = conn();
        assert!(pool.release_to_pool(Arc::clone(&c), "a"));
        assert_eq!(pool.idle_count(), 1);

        let lease = pool.acquire(&"a").unwrap();
        assert!(Arc::ptr_eq(lease.connection(), &c));
        assert_eq!(pool.idle_count(), 0);

        // Reserved entries are not handed out twice.
        assert!(pool.acquire(&"a").is_none());

        pool.release(lease).unwrap();
        assert_eq!(pool.idle_count(), 1);

        let stats = pool.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.reused, 1);
        assert_eq!(stats.total_entries, 1);
    }

    #[test]
    fn test_acquire_matches_target() {
        let (pool, _) = pool(4);
        pool.release_to_pool(conn(), "a");
        assert!(pool.acquire(&"b").is_none());
        assert!(pool.acquire(&"a").is_some());
    }

    #[test]
    fn test_expired_not_reused() {
        let (pool, clock) = pool(4);
        pool.release_to_pool(conn(), "a");

        clock.advance(Duration::from_secs(29));
        let lease = pool.acquire(&"a").unwrap();
        pool.release(lease).unwrap();

        // Release refreshed last_used.
        clock.advance(Duration::from_secs(29));
        let lease = pool.acquire(&"a").unwrap();
        pool.release(lease).unwrap();

        clock.advance(Duration::from_secs(30));
        assert!(pool.acquire(&"a").is_none());
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_unhealthy_rejected() {
        let (pool, _) = pool(4);
        let c = conn();
        c.broken.store(true, Ordering::Relaxed);
        assert!(!pool.release_to_pool(c, "a"));
        assert_eq!(pool.len(), 0);
        assert_eq!(pool.stats().rejected, 1);
    }

    #[test]
    fn test_duplicate_rejected() {
        let (pool, _) = pool(4);
        let c = conn();
        assert!(pool.release_to_pool(Arc::clone(&c), "a"));
        assert!(!pool.release_to_pool(Arc::clone(&c), "b"));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_full_pool_evicts_oldest_idle() {
        let (pool, clock) = pool(2);
        let old = conn();
        pool.release_to_pool(Arc::clone(&old), "a");
        clock.advance(Duration::from_secs(1));
        pool.release_to_pool(conn(), "b");
        clock.advance(Duration::from_secs(1));

        assert!(pool.release_to_pool(conn(), "c"));
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.stats().recycled, 1);
        assert!(pool.acquire(&"a").is_none());
        assert!(pool.acquire(&"b").is_some());
        assert!(pool.acquire(&"c").is_some());
        // The pool's hold on the evicted connection is gone.
        assert_eq!(Arc::strong_count(&old), 1);
    }

    #[test]
    fn test_full_pool_without_idle_rejects() {
        let (pool, _) = pool(2);
        pool.release_to_pool(conn(), "a");
        pool.release_to_pool(conn(), "b");
        let la = pool.acquire(&"a").unwrap();
        let lb = pool.acquire(&"b").unwrap();

        let before = pool.stats();
        assert!(!pool.release_to_pool(conn(), "c"));
        let after = pool.stats();
        assert_eq!(after.total_entries, 2);
        assert_eq!(after.recycled, before.recycled);
        assert_eq!(after.rejected, before.rejected + 1);

        pool.release(la).unwrap();
        pool.release(lb).unwrap();
    }

    #[test]
    fn test_reap_expired() {
        let (pool, clock) = pool(4);
        pool.release_to_pool(conn(), "a");
        pool.release_to_pool(conn(), "b");
        let held = pool.acquire(&"b").unwrap();

        clock.advance(Duration::from_secs(30));
        assert_eq!(pool.reap(), 1);
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.stats().recycled, 1);

        // Reserved entries survive and are released normally.
        pool.release(held).unwrap();
        assert_eq!(pool.reap(), 0);
    }

    #[test]
    fn test_stale_lease_after_eviction() {
        let (pool, clock) = pool(1);
        pool.release_to_pool(conn(), "a");
        let lease = pool.acquire(&"a").unwrap();
        let (slot, generation) = (lease.slot(), lease.generation());

        assert_eq!(pool.shutdown(), 1);
        assert!(pool.release_to_pool(conn(), "b"));
        clock.advance(Duration::from_secs(1));

        let err = pool.release(lease).unwrap_err();
        assert_eq!(err, PoolError::StaleHandle { slot, generation });
        assert_eq!(pool.stats().stale_releases, 1);

        // The new occupant of the slot is untouched.
        assert_eq!(pool.idle_count(), 1);
        assert!(pool.acquire(&"b").is_some());
    }

    #[test]
    fn test_foreign_lease() {
        let (p1, _) = pool(2);
        let (p2, _) = pool(2);
        p1.release_to_pool(conn(), "a");
        let lease = p1.acquire(&"a").unwrap();
        assert_eq!(p2.release(lease).unwrap_err(), PoolError::ForeignHandle);

        // The lease still found its way back to the pool that issued it.
        assert_eq!(p1.idle_count(), 1);
        assert_eq!(p2.stats().stale_releases, 0);
    }

    #[test]
    fn test_dropped_lease_returns_entry() {
        let (pool, clock) = pool(2);
        pool.release_to_pool(conn(), "a");
        pool.release_to_pool(conn(), "b");
        let la = pool.acquire(&"a").unwrap();
        let lb = pool.acquire(&"b").unwrap();
        assert_eq!(pool.idle_count(), 0);

        clock.advance(Duration::from_secs(10));
        drop(la);
        drop(lb);
        assert_eq!(pool.idle_count(), 2);

        // Dropping refreshed last_used, so the entries are not yet expired.
        clock.advance(Duration::from_secs(25));
        assert_eq!(pool.reap(), 0);
        assert!(pool.acquire(&"a").is_some());

        clock.advance(Duration::from_secs(3600));
        assert_eq!(pool.reap(), 2);
        assert!(pool.release_to_pool(conn(), "c"));
        assert_eq!(pool.stats().stale_releases, 0);
    }

    #[test]
    fn test_dropped_lease_after_shutdown_is_ignored() {
        let (pool, _) = pool(1);
        pool.release_to_pool(conn(), "a");
        let lease = pool.acquire(&"a").unwrap();

        pool.shutdown();
        assert!(pool.release_to_pool(conn(), "b"));
        drop(lease);

        // The new occupant keeps its state and no stale release is counted.
        assert_eq!(pool.idle_count(), 1);
        assert_eq!(pool.stats().stale_releases, 0);
        let lease = pool.acquire(&"b").unwrap();
        assert_eq!(pool.idle_count(), 0);
        pool.release(lease).unwrap();
    }

    #[test]
    fn test_lease_outliving_pool() {
        let (pool, _) = pool(1);
        pool.release_to_pool(conn(), "a");
        let lease = pool.acquire(&"a").unwrap();
        drop(pool);

        assert!(lease.is_healthy());
        drop(lease);
    }

    #[test]
    fn test_shutdown_frees_all() {
        let (pool, _) = pool(4);
        pool.release_to_pool(conn(), "a");
        pool.release_to_pool(conn(), "b");
        let _lease = pool.acquire(&"a").unwrap();

        assert_eq!(pool.shutdown(), 2);
        assert!(pool.is_empty());
        assert_eq!(pool.capacity(), 4);
        assert!(pool.release_to_pool(conn(), "c"));
    }

    #[test]
    fn test_invalid_config() {
        let config = ConnectionPoolConfig::new().capacity(0);
        assert!(ConnectionPool::<TestConn, u32>::new(&config).is_err());
    }

    #[test]
    fn test_concurrent_churn() {
        use rand::{Rng, SeedableRng};
        use std::thread;

        let (pool, _) = pool(8);
        let pool = Arc::new(pool);
        let targets = ["a", "b", "c"];

        let handles: Vec<_> = (0..4u64)
            .map(|seed| {
                let pool = Arc::clone(&pool);
                thread::spawn(move || {
                    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
                    for _ in 0..500 {
                        let target = targets[rng.gen_range(0..targets.len())];
                        match pool.acquire(&target) {
                            Some(lease) => pool.release(lease).unwrap(),
                            None => {
                                pool.release_to_pool(conn(), target);
                            }
                        }
                        assert!(pool.len() <= pool.capacity());
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let stats = pool.stats();
        assert!(stats.total_entries <= 8);
        assert_eq!(stats.hits + stats.misses, 4 * 500);
        assert_eq!(pool.idle_count(), stats.total_entries);
    }
}
