//! # mtpool-test
//!
//! Integration tests for the mtpool crates.
//!
//! This crate contains:
//! - Proxy-shaped scenarios across buffers and connections
//! - Multi-threaded churn against shared pools
//! - Configuration round-trips
//! - The background maintenance task

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Once};

use mtpool::PoolableConnection;
use tracing_subscriber::EnvFilter;

static TRACING: Once = Once::new();

/// Installs a test subscriber once per test binary.
///
/// Honors `RUST_LOG`; defaults to `warn` for the mtpool crates.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("mtpool=warn,mtpool_buffer=warn,mtpool_conn=warn,mtpool_common=warn")
        });
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// A stand-in for a backend connection.
#[derive(Debug)]
pub struct MockConnection {
    id: u64,
    healthy: AtomicBool,
}

impl MockConnection {
    /// Creates a healthy connection.
    pub fn new(id: u64) -> Arc<Self> {
        Arc::new(Self {
            id,
            healthy: AtomicBool::new(true),
        })
    }

    /// Returns the connection id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Marks the connection as broken.
    pub fn fail(&self) {
        self.healthy.store(false, Ordering::Relaxed);
    }
}

impl PoolableConnection for MockConnection {
    fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }
}

/// Backend target key used by the tests.
pub type Target = &'static str;
