//! Registration cache: pin once, share across operations

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError, Weak,
    },
};

use log::{debug, warn};

use crate::error::Result;

use super::{
    handle::{covers, Registration, RegistrationId, RegistrationInner},
    pinner::MemoryPinner,
};

fn next_registration_id() -> RegistrationId {
    static REGISTRATION_COUNTER: AtomicU64 = AtomicU64::new(1);
    REGISTRATION_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Snapshot of registration cache activity
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistrationStats {
    /// Ranges pinned by `register`
    pub registered: u64,
    /// Holders added through `retain`
    pub retained: u64,
    /// Holders returned through `release` or a dropped fragment
    pub released: u64,
    /// Successful `lookup` calls
    pub lookup_hits: u64,
    /// `lookup` calls that found no covering registration
    pub lookup_misses: u64,
    /// Ranges unpinned after their last holder went away
    pub unpinned: u64,
    /// Failed pin or unpin calls
    pub failures: u64,
    /// Registrations currently pinned
    pub live: usize,
}

#[derive(Debug, Default)]
struct AtomicRegistrationStats {
    registered: AtomicU64,
    retained: AtomicU64,
    released: AtomicU64,
    lookup_hits: AtomicU64,
    lookup_misses: AtomicU64,
    unpinned: AtomicU64,
    failures: AtomicU64,
}

#[derive(Debug)]
struct LiveEntry {
    base: usize,
    len: usize,
    handle: Weak<RegistrationInner>,
}

/// State shared between the cache and the registrations it produced
#[derive(Debug, Default)]
pub(crate) struct CacheShared {
    live: Mutex<HashMap<RegistrationId, LiveEntry>>,
    stats: AtomicRegistrationStats,
}

impl CacheShared {
    fn lock_live(&self) -> MutexGuard<'_, HashMap<RegistrationId, LiveEntry>> {
        self.live.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn evict(&self, id: RegistrationId) {
        self.lock_live().remove(&id);
    }

    pub(crate) fn record_release(&self) {
        self.stats.released.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_unpin(&self, success: bool) {
        if success {
            self.stats.unpinned.fetch_add(1, Ordering::Relaxed);
        } else {
            self.stats.failures.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Wraps a [`MemoryPinner`] with shared, reference-counted registrations.
///
/// Cloning the cache is cheap; clones share the same live set.
#[derive(Debug, Clone)]
pub struct RegistrationCache {
    pinner: Arc<dyn MemoryPinner>,
    shared: Arc<CacheShared>,
}

impl RegistrationCache {
    /// Create a cache on top of a pinning primitive
    pub fn new(pinner: Arc<dyn MemoryPinner>) -> Self {
        Self {
            pinner,
            shared: Arc::new(CacheShared::default()),
        }
    }

    /// Pin `[address, address + length)` and return the first holder's handle
    pub fn register(&self, address: usize, length: usize) -> Result<Registration> {
        let pin = match self.pinner.pin(address, length) {
            Ok(pin) => pin,
            Err(e) => {
                self.shared.stats.failures.fetch_add(1, Ordering::Relaxed);
                warn!("pinning {} bytes at {:#x} failed: {}", length, address, e);
                return Err(e);
            }
        };

        let id = next_registration_id();
        let inner = Arc::new(RegistrationInner::new(
            id,
            pin,
            Arc::clone(&self.pinner),
            Arc::downgrade(&self.shared),
        ));

        self.shared.lock_live().insert(
            id,
            LiveEntry {
                base: address,
                len: length,
                handle: Arc::downgrade(&inner),
            },
        );
        self.shared.stats.registered.fetch_add(1, Ordering::Relaxed);
        debug!("registered {} bytes at {:#x} as registration {}", length, address, id);

        Ok(Registration::from_inner(inner))
    }

    /// Add a holder to an existing registration
    pub fn retain(&self, registration: &Registration) -> Registration {
        self.shared.stats.retained.fetch_add(1, Ordering::Relaxed);
        registration.share()
    }

    /// Give back one holder's handle. The last release unpins the range and
    /// reports the unpin result.
    pub fn release(&self, registration: Registration) -> Result<()> {
        registration.release()
    }

    /// Find a live registration covering the range and add a holder to it
    pub fn lookup(&self, address: usize, length: usize) -> Option<Registration> {
        let found = {
            let live = self.shared.lock_live();
            live.values()
                .filter(|entry| covers(entry.base, entry.len, address, length))
                .find_map(|entry| entry.handle.upgrade())
        };

        match found {
            Some(inner) => {
                self.shared.stats.lookup_hits.fetch_add(1, Ordering::Relaxed);
                Some(Registration::from_inner(inner))
            }
            None => {
                self.shared.stats.lookup_misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Number of registrations currently pinned through this cache
    pub fn live_count(&self) -> usize {
        self.shared.lock_live().len()
    }

    /// Current statistics
    pub fn stats(&self) -> RegistrationStats {
        let stats = &self.shared.stats;
        RegistrationStats {
            registered: stats.registered.load(Ordering::Relaxed),
            retained: stats.retained.load(Ordering::Relaxed),
            released: stats.released.load(Ordering::Relaxed),
            lookup_hits: stats.lookup_hits.load(Ordering::Relaxed),
            lookup_misses: stats.lookup_misses.load(Ordering::Relaxed),
            unpinned: stats.unpinned.load(Ordering::Relaxed),
            failures: stats.failures.load(Ordering::Relaxed),
            live: self.live_count(),
        }
    }

    /// The underlying pinning primitive
    pub fn pinner(&self) -> &Arc<dyn MemoryPinner> {
        &self.pinner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{error::BytelaneError, registration::SoftwarePinner};

    fn cache_with_pinner() -> (RegistrationCache, Arc<SoftwarePinner>) {
        let pinner = Arc::new(SoftwarePinner::new());
        (RegistrationCache::new(pinner.clone()), pinner)
    }

    #[test]
    fn test_register_retain_release() {
        let (cache, pinner) = cache_with_pinner();
        let reg = cache.register(0x10_000, 4096).unwrap();
        assert_eq!(reg.ref_count(), 1);
        assert_eq!(reg.bound(), 0x10_000 + 4095);

        let second = cache.retain(&reg);
        assert_eq!(reg.ref_count(), 2);
        assert!(second.ptr_eq(&reg));

        cache.release(second).unwrap();
        assert_eq!(reg.ref_count(), 1);
        assert_eq!(pinner.live_pins(), 1);

        cache.release(reg).unwrap();
        assert_eq!(pinner.live_pins(), 0);
        assert_eq!(cache.live_count(), 0);

        let stats = cache.stats();
        assert_eq!(stats.registered, 1);
        assert_eq!(stats.retained, 1);
        assert_eq!(stats.released, 2);
        assert_eq!(stats.unpinned, 1);
    }

    #[test]
    fn test_drop_releases_holder() {
        let (cache, pinner) = cache_with_pinner();
        let reg = cache.register(0x20_000, 64).unwrap();
        let extra = cache.retain(&reg);
        drop(reg);
        assert_eq!(pinner.live_pins(), 1);
        drop(extra);
        assert_eq!(pinner.live_pins(), 0);
        assert_eq!(cache.stats().unpinned, 1);
    }

    #[test]
    fn test_lookup_covering_registration() {
        let (cache, _pinner) = cache_with_pinner();
        let reg = cache.register(0x30_000, 1024).unwrap();

        let hit = cache.lookup(0x30_100, 16).unwrap();
        assert!(hit.ptr_eq(&reg));
        assert_eq!(reg.ref_count(), 2);

        assert!(cache.lookup(0x30_3f0, 32).is_none());
        assert!(cache.lookup(0x40_000, 1).is_none());

        cache.release(hit).unwrap();
        cache.release(reg).unwrap();
        assert!(cache.lookup(0x30_100, 16).is_none());

        let stats = cache.stats();
        assert_eq!(stats.lookup_hits, 1);
        assert_eq!(stats.lookup_misses, 3);
    }

    #[test]
    fn test_register_failure_counts() {
        let cache = RegistrationCache::new(Arc::new(SoftwarePinner::with_limit(0)));
        let err = cache.register(0x1000, 8).unwrap_err();
        assert!(matches!(err, BytelaneError::RegistrationFailed { .. }));
        assert_eq!(cache.stats().failures, 1);
        assert_eq!(cache.live_count(), 0);
    }

    #[test]
    fn test_registration_outlives_cache() {
        let pinner = Arc::new(SoftwarePinner::new());
        let reg = {
            let cache = RegistrationCache::new(pinner.clone());
            cache.register(0x50_000, 32).unwrap()
        };
        assert_eq!(pinner.live_pins(), 1);
        drop(reg);
        assert_eq!(pinner.live_pins(), 0);
    }
}
