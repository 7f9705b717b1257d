//! # mtpool-conn
//!
//! Outbound connection reuse for the proxy.
//!
//! Opening a backend connection costs a handshake; [`ConnectionPool`] keeps
//! recently used ones around, keyed by backend target, so the next request
//! to the same target can skip it. The pool never dials or closes anything
//! itself: the proxy offers connections with
//! [`ConnectionPool::release_to_pool`] and checks for one with
//! [`ConnectionPool::acquire`] before dialing.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod connection;
mod lease;
mod pool;
mod stats;

pub use connection::PoolableConnection;
pub use lease::Lease;
pub use pool::ConnectionPool;
pub use stats::ConnectionPoolStats;
