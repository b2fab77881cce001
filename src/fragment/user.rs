//! Unbounded tier of wrapper fragments

use std::sync::Arc;

use log::error;

use crate::{
    error::{BytelaneError, Result},
    registration::Registration,
};

use super::{
    fragment::Fragment,
    stats::{AtomicTierStats, TierStats},
    tier::Tier,
};

/// Hands out wrappers with no backing storage. Wrappers are created on
/// demand and dropped on release; nothing is pooled. A wrapper counts as in
/// use until it is dropped, released or not.
#[derive(Debug, Default)]
pub struct UserTier {
    stats: Arc<AtomicTierStats>,
}

impl UserTier {
    /// Create the user tier
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh wrapper
    pub fn alloc(&self) -> Fragment {
        self.stats.record_allocation();
        Fragment::wrapper(Arc::downgrade(&self.stats))
    }

    /// Drop a wrapper, handing back the registration share it held.
    ///
    /// The caller is responsible for releasing that share.
    pub fn release(&self, mut fragment: Fragment) -> Result<Option<Registration>> {
        if fragment.tier() != Tier::User || fragment.slot().is_some() {
            let message = format!(
                "{} fragment with pooled storage released to the user tier",
                fragment.tier()
            );
            error!("user tier: invalid descriptor: {}", message);
            return Err(BytelaneError::invalid_descriptor(message));
        }

        Ok(fragment.take_registration())
    }

    /// Wrappers currently handed out
    pub fn in_use(&self) -> usize {
        self.stats.in_use()
    }

    /// Current statistics
    pub fn stats(&self) -> TierStats {
        self.stats.snapshot(0, 0)
    }
}
