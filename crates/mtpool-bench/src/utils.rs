//! Benchmark utilities and helpers.

use std::sync::Arc;

use mtpool::{ConnectionPool, ConnectionPoolConfig, PoolableConnection};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// A connection that is always healthy.
#[derive(Debug, Default)]
pub struct BenchConnection;

impl PoolableConnection for BenchConnection {
    fn is_healthy(&self) -> bool {
        true
    }
}

/// Generates request sizes spread over the default buffer ladder.
pub fn request_sizes(count: usize, max: usize) -> Vec<usize> {
    let mut rng = StdRng::seed_from_u64(42);
    (0..count).map(|_| rng.gen_range(1..=max)).collect()
}

/// Builds a pool filled with idle connections spread over `targets` keys.
pub fn filled_pool(capacity: usize, targets: u32) -> ConnectionPool<BenchConnection, u32> {
    let config = ConnectionPoolConfig::new().capacity(capacity);
    let pool = ConnectionPool::new(&config).expect("valid benchmark pool config");
    for i in 0..capacity {
        pool.release_to_pool(Arc::new(BenchConnection), i as u32 % targets);
    }
    pool
}
