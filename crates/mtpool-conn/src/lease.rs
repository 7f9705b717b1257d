//! Handles for reserved connections.

use std::fmt;
use std::ops::Deref;
use std::sync::{Arc, Weak};

/// Where a lease goes back to when it is dropped.
pub(crate) trait LeaseHome<C>: Send + Sync {
    /// Makes the entry idle again if the slot still holds it.
    fn return_lease(&self, slot: usize, generation: u64, connection: &Arc<C>) -> bool;
}

/// A reserved connection.
///
/// Carries the slot it came from and that slot's generation, so releasing a
/// lease whose slot has since been evicted is detected rather than
/// corrupting a newer entry.
///
/// Hand it back with [`ConnectionPool::release`](crate::ConnectionPool::release)
/// to learn whether it was still live. Dropping it returns the entry to the
/// pool silently.
pub struct Lease<C> {
    pub(crate) pool_id: u64,
    pub(crate) slot: usize,
    pub(crate) generation: u64,
    pub(crate) connection: Arc<C>,
    pub(crate) home: Option<Weak<dyn LeaseHome<C>>>,
}

impl<C> Lease<C> {
    /// Returns the leased connection.
    #[inline]
    pub fn connection(&self) -> &Arc<C> {
        &self.connection
    }

    /// Returns the slot index.
    #[inline]
    pub const fn slot(&self) -> usize {
        self.slot
    }

    /// Returns the slot generation at reservation time.
    #[inline]
    pub const fn generation(&self) -> u64 {
        self.generation
    }
}

impl<C> Deref for Lease<C> {
    type Target = C;

    fn deref(&self) -> &C {
        &self.connection
    }
}

impl<C> Drop for Lease<C> {
    fn drop(&mut self) {
        let Some(home) = self.home.take().and_then(|home| home.upgrade()) else {
            return;
        };
        if home.return_lease(self.slot, self.generation, &self.connection) {
            tracing::debug!(slot = self.slot, "connection lease dropped, entry idle again");
        }
    }
}

impl<C> fmt::Debug for Lease<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease")
            .field("slot", &self.slot)
            .field("generation", &self.generation)
            .finish()
    }
}
