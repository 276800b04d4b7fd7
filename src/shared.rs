//! Fan-out of one buffer provider to several consumers.

use crate::error::{Error, Result};
use crate::io::{BufferProvider, DynReader};
use std::sync::Arc;

/// One consumer's view of a shared provider.
///
/// Every view opens independent readers against the same backing buffer,
/// and the provider is released exactly once, when the last view drops.
/// With a single consumer the view is the provider behind one reference
/// count and nothing more.
pub struct SharedBuffer<P> {
    inner: Arc<P>,
}

impl<P: BufferProvider> SharedBuffer<P> {
    /// Splits `provider` into `count` independently owned views.
    pub fn wrap(provider: P, count: usize) -> Result<Vec<SharedBuffer<P>>> {
        if count == 0 {
            return Err(Error::invalid_argument(
                "shared buffer needs at least one consumer",
            ));
        }
        let inner = Arc::new(provider);
        Ok((0..count)
            .map(|_| SharedBuffer { inner: Arc::clone(&inner) })
            .collect())
    }
}

impl<P: BufferProvider> BufferProvider for SharedBuffer<P> {
    fn open(&self) -> Result<DynReader> {
        self.inner.open()
    }
}
