//! Configuration for the pooling core.
//!
//! Parsing configuration files is the embedding proxy's job; these
//! structures only derive `serde` so any format can feed them.

mod pools;

pub use pools::{BufferConfig, ConnectionPoolConfig, NumaConfig, PoolsConfig};
