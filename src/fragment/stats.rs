//! Fragment tier statistics tracking

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Statistics for one fragment tier
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TierStats {
    /// Slots currently owned by the tier (0 for the user tier)
    pub total_slots: usize,
    /// Slots currently on the free-list
    pub free_slots: usize,
    /// Fragments currently handed out
    pub in_use: usize,
    /// Peak number of fragments handed out simultaneously
    pub peak_usage: usize,
    /// Successful allocations
    pub allocations: u64,
    /// Fragments returned
    pub releases: u64,
    /// Failed allocations
    pub failures: u64,
    /// Growth steps taken
    pub growths: u64,
}

impl TierStats {
    /// Calculate allocation success rate (0.0 to 1.0)
    pub fn success_rate(&self) -> f64 {
        let attempts = self.allocations + self.failures;
        if attempts == 0 {
            return 1.0;
        }
        self.allocations as f64 / attempts as f64
    }

    /// Calculate slot utilization (0.0 to 1.0)
    pub fn utilization(&self) -> f64 {
        if self.total_slots == 0 {
            return 0.0;
        }
        self.in_use as f64 / self.total_slots as f64
    }

    /// Get a summary string of the statistics
    pub fn summary(&self) -> String {
        format!(
            "slots: {}, free: {}, in_use: {}, peak: {}, allocations: {}, releases: {}, \
             failures: {}, growths: {}, success_rate: {:.2}%",
            self.total_slots,
            self.free_slots,
            self.in_use,
            self.peak_usage,
            self.allocations,
            self.releases,
            self.failures,
            self.growths,
            self.success_rate() * 100.0
        )
    }
}

/// Thread-safe counters behind [`TierStats`]
#[derive(Debug, Default)]
pub struct AtomicTierStats {
    in_use: AtomicUsize,
    peak_usage: AtomicUsize,
    allocations: AtomicU64,
    releases: AtomicU64,
    failures: AtomicU64,
    growths: AtomicU64,
}

impl AtomicTierStats {
    /// Create new counters
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful allocation
    pub fn record_allocation(&self) {
        self.allocations.fetch_add(1, Ordering::Relaxed);
        let in_use = self.in_use.fetch_add(1, Ordering::Relaxed) + 1;
        self.peak_usage.fetch_max(in_use, Ordering::Relaxed);
    }

    /// Record a fragment returned to the tier
    pub fn record_release(&self) {
        self.releases.fetch_add(1, Ordering::Relaxed);
        self.in_use.fetch_sub(1, Ordering::Relaxed);
    }

    /// Record an allocation failure
    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a growth step
    pub fn record_growth(&self) {
        self.growths.fetch_add(1, Ordering::Relaxed);
    }

    /// Fragments currently handed out
    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::Relaxed)
    }

    /// Snapshot the counters; slot totals are filled in by the owning tier
    pub fn snapshot(&self, total_slots: usize, free_slots: usize) -> TierStats {
        TierStats {
            total_slots,
            free_slots,
            in_use: self.in_use.load(Ordering::Relaxed),
            peak_usage: self.peak_usage.load(Ordering::Relaxed),
            allocations: self.allocations.load(Ordering::Relaxed),
            releases: self.releases.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            growths: self.growths.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peak_tracking() {
        let stats = AtomicTierStats::new();
        stats.record_allocation();
        stats.record_allocation();
        stats.record_release();
        stats.record_allocation();

        let snapshot = stats.snapshot(4, 2);
        assert_eq!(snapshot.in_use, 2);
        assert_eq!(snapshot.peak_usage, 2);
        assert_eq!(snapshot.allocations, 3);
        assert_eq!(snapshot.releases, 1);
        assert!((snapshot.utilization() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_success_rate() {
        let stats = AtomicTierStats::new();
        assert!((stats.snapshot(0, 0).success_rate() - 1.0).abs() < f64::EPSILON);

        stats.record_allocation();
        stats.record_failure();
        let snapshot = stats.snapshot(1, 0);
        assert!((snapshot.success_rate() - 0.5).abs() < f64::EPSILON);
        assert!(snapshot.summary().contains("failures: 1"));
    }
}
