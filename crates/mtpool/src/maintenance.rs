//! Background maintenance tick.
//!
//! Connection expiry and buffer warmup are too slow for the request path,
//! so a tokio task runs them on a fixed interval instead.

use std::fmt;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use mtpool_common::{PoolError, PoolResult};
use mtpool_conn::PoolableConnection;

use crate::pools::Pools;

/// Handle to a running maintenance task.
#[derive(Debug)]
pub struct MaintenanceHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl MaintenanceHandle {
    /// Stops the task and waits for it to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(err) = self.task.await {
            warn!(error = %err, "maintenance task did not exit cleanly");
        }
    }

    /// Returns true once the task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Starts running [`Pools::maintain`] every `interval`.
///
/// The first pass runs one full interval after the call.
///
/// # Errors
///
/// [`PoolError::InvalidConfig`] if `interval` is zero.
///
/// # Panics
///
/// Panics if called outside a tokio runtime.
pub fn spawn<C, K>(pools: Pools<C, K>, interval: Duration) -> PoolResult<MaintenanceHandle>
where
    C: PoolableConnection + 'static,
    K: Eq + Clone + fmt::Debug + Send + Sync + 'static,
{
    if interval.is_zero() {
        return Err(PoolError::config("maintenance interval must be greater than 0"));
    }

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        info!(interval_ms = interval.as_millis() as u64, "pool maintenance started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = pools.maintain();
                    debug!(reaped = report.reaped, warmed = report.warmed, "pool maintenance pass");
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }

        info!("pool maintenance stopped");
    });

    Ok(MaintenanceHandle { shutdown_tx, task })
}

#[cfg(test)]
mod tests {
    use super::*;
    use mtpool_common::clock::ManualClock;
    use mtpool_common::config::PoolsConfig;
    use std::sync::Arc;

    struct Conn;

    impl PoolableConnection for Conn {
        fn is_healthy(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn test_zero_interval_rejected() {
        let pools: Pools<Conn, u16> = Pools::new(&PoolsConfig::for_testing()).unwrap();
        assert!(spawn(pools, Duration::ZERO).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_pass_after_one_interval() {
        let clock = ManualClock::new();
        let pools: Pools<Conn, u16> =
            Pools::with_clock(&PoolsConfig::for_testing(), Arc::new(clock.clone())).unwrap();
        pools.connections().release_to_pool(Arc::new(Conn), 80);
        clock.advance(Duration::from_secs(60));

        let handle = spawn(pools.clone(), Duration::from_millis(10)).unwrap();
        tokio::task::yield_now().await;
        tokio::time::advance(Duration::from_millis(5)).await;
        tokio::task::yield_now().await;
        assert_eq!(pools.connections().len(), 1);

        tokio::time::advance(Duration::from_millis(5)).await;
        tokio::task::yield_now().await;
        assert!(pools.connections().is_empty());
        assert!(pools.snapshot().buffers.idle_buffers() > 0);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_when_handle_dropped() {
        let pools: Pools<Conn, u16> = Pools::new(&PoolsConfig::for_testing()).unwrap();
        let handle = spawn(pools, Duration::from_millis(10)).unwrap();
        let MaintenanceHandle { shutdown_tx, task } = handle;

        drop(shutdown_tx);
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("task exits once the sender is gone")
            .unwrap();
    }
}
