//! Shared registration handle

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Weak,
};

use log::error;

use crate::error::Result;

use super::{cache::CacheShared, pinner::MemoryPinner, PinHandle};

/// Unique identifier of a registration
pub type RegistrationId = u64;

#[derive(Debug)]
pub(crate) struct RegistrationInner {
    id: RegistrationId,
    pin: PinHandle,
    pinner: Arc<dyn MemoryPinner>,
    home: Weak<CacheShared>,
    unpinned: AtomicBool,
}

impl RegistrationInner {
    pub(crate) fn new(
        id: RegistrationId,
        pin: PinHandle,
        pinner: Arc<dyn MemoryPinner>,
        home: Weak<CacheShared>,
    ) -> Self {
        Self {
            id,
            pin,
            pinner,
            home,
            unpinned: AtomicBool::new(false),
        }
    }

    /// Unpin the range and evict it from its cache. Runs at most once.
    pub(crate) fn unpin(&self) -> Result<()> {
        if self.unpinned.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let home = self.home.upgrade();
        if let Some(home) = &home {
            home.evict(self.id);
        }

        let result = self.pinner.unpin(&self.pin);
        if let Some(home) = &home {
            home.record_unpin(result.is_ok());
        }
        result
    }
}

impl Drop for RegistrationInner {
    fn drop(&mut self) {
        if let Err(e) = self.unpin() {
            error!("registration {} failed to unpin: {}", self.id, e);
        }
    }
}

/// A holder's share of a pinned memory region.
///
/// Every live `Registration` value counts as one holder. New holders are
/// only created through the cache (`retain`, `lookup`); a holder gives up
/// its share with [`RegistrationCache::release`](super::RegistrationCache::release),
/// by freeing or dropping the fragment that holds it, or by dropping the
/// handle. The region is unpinned when the last holder goes away.
#[derive(Debug)]
pub struct Registration {
    inner: Arc<RegistrationInner>,
}

impl Registration {
    pub(crate) fn from_inner(inner: Arc<RegistrationInner>) -> Self {
        Self { inner }
    }

    /// Add one holder
    pub(crate) fn share(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Give up this holder's share. The last holder unpins the range and
    /// reports the unpin result.
    pub(crate) fn release(self) -> Result<()> {
        if let Some(home) = self.inner.home.upgrade() {
            home.record_release();
        }
        match Arc::into_inner(self.inner) {
            // Dropping `inner` afterwards is a no-op: the unpin already ran.
            Some(inner) => inner.unpin(),
            None => Ok(()),
        }
    }

    /// Registration identifier
    pub fn id(&self) -> RegistrationId {
        self.inner.id
    }

    /// First byte of the registered range
    pub fn base(&self) -> usize {
        self.inner.pin.address
    }

    /// Length of the registered range
    pub fn len(&self) -> usize {
        self.inner.pin.length
    }

    /// Whether the registered range is empty (never true for a live pin)
    pub fn is_empty(&self) -> bool {
        self.inner.pin.length == 0
    }

    /// Last byte of the registered range (inclusive)
    pub fn bound(&self) -> usize {
        self.inner.pin.address + self.inner.pin.length - 1
    }

    /// Pinner handle backing this registration
    pub fn pin_handle(&self) -> &PinHandle {
        &self.inner.pin
    }

    /// Number of outstanding holders
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// Whether `[address, address + length)` lies inside the registered range
    pub fn covers(&self, address: usize, length: usize) -> bool {
        covers(self.base(), self.len(), address, length)
    }

    /// Whether two handles share the same registration
    pub fn ptr_eq(&self, other: &Registration) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

pub(crate) fn covers(base: usize, len: usize, address: usize, length: usize) -> bool {
    match (address.checked_add(length), base.checked_add(len)) {
        (Some(end), Some(limit)) => address >= base && end <= limit,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::covers;

    #[test]
    fn test_covers() {
        assert!(covers(100, 50, 100, 50));
        assert!(covers(100, 50, 120, 10));
        assert!(covers(100, 50, 149, 1));
        assert!(!covers(100, 50, 99, 2));
        assert!(!covers(100, 50, 140, 11));
        assert!(!covers(100, 50, usize::MAX, 2));
    }
}
