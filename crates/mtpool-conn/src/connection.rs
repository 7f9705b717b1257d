//! The seam between the pool and the proxy's connection type.

/// A backend connection the pool can hold.
///
/// The pool never performs I/O on a connection; it only asks whether one is
/// still usable before tracking it.
pub trait PoolableConnection: Send + Sync {
    /// Returns false once the connection can no longer carry requests.
    fn is_healthy(&self) -> bool;
}

impl<T: PoolableConnection + ?Sized> PoolableConnection for Box<T> {
    fn is_healthy(&self) -> bool {
        (**self).is_healthy()
    }
}
