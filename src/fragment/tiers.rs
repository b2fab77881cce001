//! Release routing across the three tiers

use crate::{
    error::Result,
    registration::{Registration, RegistrationCache},
};

use super::{
    config::TierConfig, fragment::Fragment, pool::FragmentPool, stats::TierStats, tier::Tier,
    user::UserTier,
};

/// Eager, max and user tiers of one module
#[derive(Debug)]
pub struct FragmentTiers {
    eager: FragmentPool,
    max: FragmentPool,
    user: UserTier,
}

impl FragmentTiers {
    /// Build the bounded tiers with slot sizes equal to the module limits
    pub fn new(
        eager_limit: usize,
        max_send_size: usize,
        eager: TierConfig,
        max: TierConfig,
        registrations: &RegistrationCache,
    ) -> Result<Self> {
        Ok(Self {
            eager: FragmentPool::new(Tier::Eager, eager_limit, eager, registrations.clone())?,
            max: FragmentPool::new(Tier::Max, max_send_size, max, registrations.clone())?,
            user: UserTier::new(),
        })
    }

    /// Allocate a fragment from `tier`
    pub fn alloc(&self, tier: Tier) -> Result<Fragment> {
        match tier {
            Tier::Eager => self.eager.alloc(),
            Tier::Max => self.max.alloc(),
            Tier::User => Ok(self.user.alloc()),
        }
    }

    /// Route a fragment back to the tier named by its tag. A user-tier
    /// wrapper hands back the registration share it held.
    pub fn release(&self, fragment: Fragment) -> Result<Option<Registration>> {
        match fragment.tier() {
            Tier::Eager => self.eager.release(fragment).map(|()| None),
            Tier::Max => self.max.release(fragment).map(|()| None),
            Tier::User => self.user.release(fragment),
        }
    }

    /// The eager tier
    pub fn eager(&self) -> &FragmentPool {
        &self.eager
    }

    /// The max tier
    pub fn max(&self) -> &FragmentPool {
        &self.max
    }

    /// The user tier
    pub fn user(&self) -> &UserTier {
        &self.user
    }

    /// Statistics for one tier
    pub fn stats(&self, tier: Tier) -> TierStats {
        match tier {
            Tier::Eager => self.eager.stats(),
            Tier::Max => self.max.stats(),
            Tier::User => self.user.stats(),
        }
    }

    /// Tear down the bounded tiers; returns fragments still outstanding as
    /// (eager, max, user)
    pub fn shutdown(self) -> (usize, usize, usize) {
        let user = self.user.in_use();
        (self.eager.shutdown(), self.max.shutdown(), user)
    }
}
