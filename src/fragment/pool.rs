//! Bounded fragment tier backed by pre-registered memory

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Condvar, Mutex, MutexGuard, PoisonError,
    },
    time::Instant,
};

use log::{debug, error, warn};

use crate::{
    error::{BytelaneError, Result},
    memory::{align_up, PinnedRegion},
    registration::RegistrationCache,
};

use super::{
    config::TierConfig,
    fragment::{Fragment, Slot},
    stats::{AtomicTierStats, TierStats},
    tier::Tier,
};

fn next_pool_id() -> u64 {
    static POOL_COUNTER: AtomicU64 = AtomicU64::new(1);
    POOL_COUNTER.fetch_add(1, Ordering::Relaxed)
}

#[derive(Debug, Clone, Copy)]
struct SlotOrigin {
    region: usize,
    local: usize,
}

#[derive(Debug, Default)]
struct PoolState {
    regions: Vec<Arc<PinnedRegion>>,
    origins: Vec<SlotOrigin>,
    checked_out: Vec<bool>,
    free: Vec<usize>,
}

/// Free-list state shared between a pool and the slots it handed out
#[derive(Debug)]
pub(crate) struct PoolShared {
    tier: Tier,
    state: Mutex<PoolState>,
    returned: Condvar,
    stats: AtomicTierStats,
}

impl PoolShared {
    fn lock_state(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Put a checked-out slot back on the free-list
    pub(crate) fn check_in(&self, index: usize) {
        {
            let mut state = self.lock_state();
            if !state.checked_out.get(index).copied().unwrap_or(false) {
                drop(state);
                error!("{} tier: slot {} returned but not checked out", self.tier, index);
                return;
            }
            state.checked_out[index] = false;
            state.free.push(index);
        }

        self.returned.notify_one();
        self.stats.record_release();
    }
}

/// Fixed-size slots of registered memory with a lock-protected free-list.
///
/// Slots are mapped and registered one region at a time: `initial_count`
/// slots at construction, then `grow_by` slots per growth step until
/// `max_count`. Once at capacity, `alloc` waits up to the configured timeout
/// for a release, or fails immediately without one.
///
/// A slot goes back on the free-list when its fragment is dropped, whether
/// or not the fragment went through [`release`](Self::release).
#[derive(Debug)]
pub struct FragmentPool {
    id: u64,
    tier: Tier,
    slot_size: usize,
    stride: usize,
    config: TierConfig,
    registrations: RegistrationCache,
    shared: Arc<PoolShared>,
}

impl FragmentPool {
    /// Create a tier of `slot_size`-byte slots
    pub fn new(
        tier: Tier,
        slot_size: usize,
        config: TierConfig,
        registrations: RegistrationCache,
    ) -> Result<Self> {
        config.validate()?;

        if !tier.is_pooled() {
            return Err(BytelaneError::invalid_parameter(
                "tier",
                "The user tier has no backing storage",
            ));
        }
        if slot_size == 0 {
            return Err(BytelaneError::invalid_parameter(
                "slot_size",
                "Slot size cannot be zero",
            ));
        }

        let pool = Self {
            id: next_pool_id(),
            tier,
            slot_size,
            stride: align_up(slot_size, config.alignment),
            config,
            registrations,
            shared: Arc::new(PoolShared {
                tier,
                state: Mutex::new(PoolState::default()),
                returned: Condvar::new(),
                stats: AtomicTierStats::new(),
            }),
        };

        if pool.config.initial_count > 0 {
            let mut state = pool.lock_state();
            pool.grow(&mut state, pool.config.initial_count)?;
        }

        debug!(
            "{} tier ready: {} slots of {} bytes (max {})",
            pool.tier, pool.config.initial_count, pool.slot_size, pool.config.max_count
        );
        Ok(pool)
    }

    /// Take a slot from the free-list, growing the tier if allowed
    pub fn alloc(&self) -> Result<Fragment> {
        let deadline = self
            .config
            .allocation_timeout
            .map(|timeout| Instant::now() + timeout);
        let mut state = self.lock_state();

        loop {
            if let Some(index) = state.free.pop() {
                return self.check_out(&mut state, index);
            }

            let total = state.origins.len();
            if total < self.config.max_count {
                let count = self.config.grow_by.min(self.config.max_count - total).max(1);
                if let Err(e) = self.grow(&mut state, count) {
                    self.shared.stats.record_failure();
                    warn!("{} tier failed to grow by {} slots: {}", self.tier, count, e);
                    return Err(BytelaneError::allocation_failed(
                        self.tier,
                        format!("growth failed: {}", e),
                    ));
                }
                continue;
            }

            let now = Instant::now();
            match deadline {
                Some(deadline) if now < deadline => {
                    let (guard, _) = self
                        .shared
                        .returned
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner);
                    state = guard;
                }
                _ => {
                    self.shared.stats.record_failure();
                    debug!("{} tier exhausted at {} slots", self.tier, total);
                    return Err(BytelaneError::allocation_failed(
                        self.tier,
                        format!("all {} slots in use", total),
                    ));
                }
            }
        }
    }

    /// Return a fragment's slot to the free-list.
    ///
    /// Fragments that this tier did not hand out are rejected. A rejected
    /// fragment is dropped, which still returns its slot to the pool that
    /// owns it.
    pub fn release(&self, fragment: Fragment) -> Result<()> {
        let Some(slot) = fragment.slot() else {
            return Err(self.reject(format!("{} fragment has no backing slot", fragment.tier())));
        };
        if fragment.tier() != self.tier || slot.pool_id != self.id {
            return Err(self.reject(format!(
                "{} fragment from pool {} released to {} pool {}",
                fragment.tier(),
                slot.pool_id,
                self.tier,
                self.id
            )));
        }

        drop(fragment);
        Ok(())
    }

    /// Pool identifier
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Tier served by this pool
    pub fn tier(&self) -> Tier {
        self.tier
    }

    /// Usable bytes per slot
    pub fn slot_size(&self) -> usize {
        self.slot_size
    }

    /// Pool configuration
    pub fn config(&self) -> &TierConfig {
        &self.config
    }

    /// Slots currently on the free-list
    pub fn available_count(&self) -> usize {
        self.lock_state().free.len()
    }

    /// Slots currently owned by the pool
    pub fn total_slots(&self) -> usize {
        self.lock_state().origins.len()
    }

    /// Fragments currently handed out
    pub fn in_use(&self) -> usize {
        self.shared.stats.in_use()
    }

    /// Current statistics
    pub fn stats(&self) -> TierStats {
        let (total, free) = {
            let state = self.lock_state();
            (state.origins.len(), state.free.len())
        };
        self.shared.stats.snapshot(total, free)
    }

    /// Tear the pool down, returning the number of fragments still handed
    /// out. Their regions stay mapped until those fragments are dropped.
    pub fn shutdown(self) -> usize {
        let outstanding = self.lock_state().checked_out.iter().filter(|out| **out).count();
        debug!("{} pool {} shut down with {} slots out", self.tier, self.id, outstanding);
        outstanding
    }

    fn check_out(&self, state: &mut PoolState, index: usize) -> Result<Fragment> {
        let origin = state.origins[index];
        let region = Arc::clone(&state.regions[origin.region]);
        let ptr = region.slot_ptr(origin.local).ok_or_else(|| {
            let message = format!("slot {} outside its region", index);
            BytelaneError::allocation_failed(self.tier, message)
        })?;

        state.checked_out[index] = true;
        self.shared.stats.record_allocation();

        Ok(Fragment::pooled(
            self.tier,
            Slot {
                pool_id: self.id,
                index,
                region,
                ptr,
                capacity: self.slot_size,
                home: Arc::downgrade(&self.shared),
            },
        ))
    }

    fn grow(&self, state: &mut PoolState, count: usize) -> Result<()> {
        let region = PinnedRegion::map(count, self.stride, &self.registrations)?;
        let region_index = state.regions.len();
        let first = state.origins.len();

        state.regions.push(Arc::new(region));
        state.origins.extend((0..count).map(|local| SlotOrigin {
            region: region_index,
            local,
        }));
        state.checked_out.resize(first + count, false);
        // Lowest indices are popped first
        state.free.extend((first..first + count).rev());

        if region_index > 0 {
            self.shared.stats.record_growth();
            debug!("{} tier grew to {} slots", self.tier, first + count);
        }
        Ok(())
    }

    fn reject(&self, message: String) -> BytelaneError {
        error!("{} pool {}: invalid descriptor: {}", self.tier, self.id, message);
        BytelaneError::invalid_descriptor(message)
    }

    fn lock_state(&self) -> MutexGuard<'_, PoolState> {
        self.shared.lock_state()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registration::SoftwarePinner;
    use std::{sync::Weak, thread, time::Duration};

    fn pool(tier: Tier, config: TierConfig) -> FragmentPool {
        let cache = RegistrationCache::new(Arc::new(SoftwarePinner::new()));
        FragmentPool::new(tier, 256, config, cache).unwrap()
    }

    #[test]
    fn test_alloc_release_roundtrip() {
        let pool = pool(Tier::Eager, TierConfig::default().with_initial_count(4).with_max_count(4));
        assert_eq!(pool.available_count(), 4);

        let fragments: Vec<_> = (0..4).map(|_| pool.alloc().unwrap()).collect();
        assert_eq!(pool.available_count(), 0);
        assert!(fragments.iter().all(|f| f.tier() == Tier::Eager && f.capacity() == 256));
        assert!(fragments.iter().all(|f| f.registration().is_some()));

        for fragment in fragments {
            pool.release(fragment).unwrap();
        }
        assert_eq!(pool.available_count(), 4);

        let stats = pool.stats();
        assert_eq!(stats.allocations, 4);
        assert_eq!(stats.releases, 4);
        assert_eq!(stats.in_use, 0);
        assert_eq!(stats.peak_usage, 4);
    }

    #[test]
    fn test_bounded_growth() {
        let pool = pool(
            Tier::Max,
            TierConfig::default().with_initial_count(1).with_max_count(5).with_grow_by(2),
        );

        let held: Vec<_> = (0..5).map(|_| pool.alloc().unwrap()).collect();
        assert_eq!(pool.total_slots(), 5);
        assert_eq!(pool.stats().growths, 2);

        let err = pool.alloc().unwrap_err();
        assert!(matches!(err, BytelaneError::AllocationFailed { tier: Tier::Max, .. }));
        assert_eq!(pool.stats().failures, 1);

        for fragment in held {
            pool.release(fragment).unwrap();
        }
        assert_eq!(pool.available_count(), 5);
    }

    #[test]
    fn test_distinct_slots() {
        let pool = pool(Tier::Eager, TierConfig::default().with_initial_count(3).with_max_count(3));
        let a = pool.alloc().unwrap();
        let b = pool.alloc().unwrap();
        assert_ne!(a.segment().address, b.segment().address);
        assert!(a.segment().address.abs_diff(b.segment().address) >= 256);
    }

    #[test]
    fn test_wait_for_release() {
        let pool = Arc::new(pool(
            Tier::Eager,
            TierConfig::default()
                .with_initial_count(1)
                .with_max_count(1)
                .with_timeout(Some(Duration::from_secs(5))),
        ));
        let held = pool.alloc().unwrap();

        let waiter = {
            let pool = Arc::clone(&pool);
            thread::spawn(move || pool.alloc().map(|f| f.tier()))
        };
        thread::sleep(Duration::from_millis(20));
        pool.release(held).unwrap();

        assert_eq!(waiter.join().unwrap().unwrap(), Tier::Eager);
    }

    #[test]
    fn test_timeout_expires() {
        let pool = pool(
            Tier::Eager,
            TierConfig::default()
                .with_initial_count(1)
                .with_max_count(1)
                .with_timeout(Some(Duration::from_millis(10))),
        );
        let _held = pool.alloc().unwrap();
        assert!(pool.alloc().is_err());
    }

    #[test]
    fn test_foreign_fragment_rejected() {
        let config = TierConfig::default().with_initial_count(2).with_max_count(2);
        let home = pool(Tier::Eager, config.clone());
        let other = pool(Tier::Eager, config);

        let fragment = home.alloc().unwrap();
        let err = other.release(fragment).unwrap_err();
        assert!(matches!(err, BytelaneError::InvalidDescriptor { .. }));
        assert_eq!(other.available_count(), 2);
        assert_eq!(other.stats().releases, 0);

        // The rejected fragment's slot went back to the pool that owns it
        assert_eq!(home.available_count(), 2);
        assert_eq!(home.stats().releases, 1);
        assert_eq!(home.in_use(), 0);
    }

    #[test]
    fn test_dropped_fragment_returns_slot() {
        let pool = pool(Tier::Eager, TierConfig::default().with_initial_count(1).with_max_count(1));
        drop(pool.alloc().unwrap());
        assert_eq!(pool.available_count(), 1);

        let fragment = pool.alloc().unwrap();
        assert_eq!(pool.in_use(), 1);
        drop(fragment);
        assert_eq!(pool.in_use(), 0);
        assert_eq!(pool.stats().releases, 2);
    }

    #[test]
    fn test_drop_wakes_waiting_alloc() {
        let pool = Arc::new(pool(
            Tier::Max,
            TierConfig::default()
                .with_initial_count(1)
                .with_max_count(1)
                .with_timeout(Some(Duration::from_secs(5))),
        ));
        let held = pool.alloc().unwrap();

        let waiter = {
            let pool = Arc::clone(&pool);
            thread::spawn(move || pool.alloc().map(|f| f.capacity()))
        };
        thread::sleep(Duration::from_millis(20));
        drop(held);

        assert_eq!(waiter.join().unwrap().unwrap(), 256);
    }

    #[test]
    fn test_wrong_tier_rejected() {
        let pool = pool(Tier::Eager, TierConfig::default().with_initial_count(2).with_max_count(2));
        let mut fragment = pool.alloc().unwrap();
        fragment.set_tier(Tier::Max);
        assert!(pool.release(fragment).is_err());
        assert_eq!(pool.available_count(), 2);
        assert_eq!(pool.stats().releases, 1);

        assert!(pool.release(Fragment::wrapper(Weak::new())).is_err());
        assert_eq!(pool.available_count(), 2);
    }

    #[test]
    fn test_user_tier_cannot_be_pooled() {
        let cache = RegistrationCache::new(Arc::new(SoftwarePinner::new()));
        assert!(FragmentPool::new(Tier::User, 64, TierConfig::default(), cache).is_err());
    }

    #[test]
    fn test_shutdown_reports_outstanding() {
        let pool = pool(Tier::Eager, TierConfig::default().with_initial_count(2).with_max_count(2));
        let held = pool.alloc().unwrap();
        assert_eq!(pool.shutdown(), 1);

        // The slot's region outlives the pool while the fragment exists
        assert_eq!(held.buffer().map(<[u8]>::len), Some(256));
    }
}
