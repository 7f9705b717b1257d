//! mtpool Performance Benchmarks
//!
//! Benchmarks for the request-path operations of each pool:
//! - Buffer acquire/release, append growth
//! - Connection acquire/release against tables of different sizes
//! - NUMA allocation under each policy
//!
//! Run benchmarks with:
//! ```bash
//! cargo bench -p mtpool-bench
//! ```

pub mod utils;
