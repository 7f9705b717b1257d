//! The background maintenance task against live pools.
//!
//! Tokio time is paused, so ticks only happen when a test moves the clock.

use std::sync::Arc;
use std::time::Duration;

use mtpool::{maintenance, ManualClock, Pools, PoolsConfig};
use mtpool_test::{init_tracing, MockConnection, Target};

const INTERVAL: Duration = Duration::from_millis(10);

fn pools() -> (Pools<MockConnection, Target>, ManualClock) {
    let clock = ManualClock::new();
    let pools = Pools::with_clock(&PoolsConfig::for_testing(), Arc::new(clock.clone())).unwrap();
    (pools, clock)
}

/// Moves tokio time forward one interval at a time, letting the task run
/// after each step.
async fn run_ticks(ticks: u32) {
    for _ in 0..ticks {
        tokio::task::yield_now().await;
        tokio::time::advance(INTERVAL).await;
    }
    tokio::task::yield_now().await;
}

#[tokio::test(start_paused = true)]
async fn test_expired_connections_reaped_in_background() {
    init_tracing();
    let (pools, clock) = pools();

    let handle = maintenance::spawn(pools.clone(), INTERVAL).unwrap();

    assert!(pools.connections().release_to_pool(MockConnection::new(1), "a"));
    let reserved = MockConnection::new(2);
    assert!(pools.connections().release_to_pool(reserved, "b"));
    let lease = pools.connections().acquire(&"b").unwrap();

    clock.advance(Duration::from_secs(45));
    run_ticks(3).await;

    // Only the idle entry expires.
    assert_eq!(pools.connections().len(), 1);
    assert_eq!(pools.snapshot().connections.recycled, 1);
    pools.connections().release(lease).unwrap();

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_dropped_lease_reaped_in_background() {
    init_tracing();
    let (pools, clock) = pools();
    let handle = maintenance::spawn(pools.clone(), INTERVAL).unwrap();

    assert!(pools.connections().release_to_pool(MockConnection::new(1), "a"));
    drop(pools.connections().acquire(&"a").unwrap());

    clock.advance(Duration::from_secs(3600));
    run_ticks(3).await;

    assert!(pools.connections().is_empty());

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_warmup_tops_up_buffers() {
    init_tracing();
    let (pools, _) = pools();
    let handle = maintenance::spawn(pools.clone(), INTERVAL).unwrap();

    run_ticks(3).await;
    let warm = pools.snapshot().buffers;
    assert!(warm.buckets.iter().all(|b| b.idle_count >= 4));

    pools.buffers().shutdown();
    run_ticks(3).await;
    assert!(pools.snapshot().buffers.idle_buffers() >= 3 * 4);

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_ticking() {
    init_tracing();
    let (pools, clock) = pools();
    let handle = maintenance::spawn(pools.clone(), INTERVAL).unwrap();
    handle.shutdown().await;

    assert!(pools.connections().release_to_pool(MockConnection::new(1), "a"));
    clock.advance(Duration::from_secs(60));
    run_ticks(5).await;

    assert_eq!(pools.connections().len(), 1);
}
