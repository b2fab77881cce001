//! Bounded tier configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{BytelaneError, Result};

/// Sizing and exhaustion policy for one bounded fragment tier.
///
/// The slot size itself comes from the module limits (eager limit for the
/// eager tier, max-send size for the max tier).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierConfig {
    /// Slots mapped and registered when the tier is created
    pub initial_count: usize,
    /// Upper bound on slots the tier may ever hold
    pub max_count: usize,
    /// Slots added per growth step once the free-list runs dry
    pub grow_by: usize,
    /// Slot alignment
    pub alignment: usize,
    /// How long `alloc` waits for a release once the tier is at `max_count`.
    /// `None` fails immediately.
    pub allocation_timeout: Option<Duration>,
}

impl Default for TierConfig {
    fn default() -> Self {
        Self {
            initial_count: 16,
            max_count: 128,
            grow_by: 8,
            alignment: crate::config::DEFAULT_ALIGNMENT,
            allocation_timeout: None,
        }
    }
}

impl TierConfig {
    /// Defaults for the eager tier
    pub fn eager() -> Self {
        Self {
            initial_count: 32,
            max_count: 256,
            ..Default::default()
        }
    }

    /// Defaults for the max tier
    pub fn max() -> Self {
        Self {
            initial_count: 8,
            max_count: 64,
            ..Default::default()
        }
    }

    /// Set initial slot count
    pub fn with_initial_count(mut self, count: usize) -> Self {
        self.initial_count = count;
        self
    }

    /// Set maximum slot count
    pub fn with_max_count(mut self, count: usize) -> Self {
        self.max_count = count;
        self
    }

    /// Set growth step
    pub fn with_grow_by(mut self, count: usize) -> Self {
        self.grow_by = count;
        self
    }

    /// Set slot alignment
    pub fn with_alignment(mut self, alignment: usize) -> Self {
        self.alignment = alignment;
        self
    }

    /// Set allocation timeout
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.allocation_timeout = timeout;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.max_count == 0 {
            return Err(BytelaneError::invalid_parameter(
                "max_count",
                "Max count cannot be zero",
            ));
        }

        if self.initial_count > self.max_count {
            return Err(BytelaneError::invalid_parameter(
                "initial_count",
                "Initial count cannot exceed max count",
            ));
        }

        if self.grow_by == 0 && self.max_count > self.initial_count {
            return Err(BytelaneError::invalid_parameter(
                "grow_by",
                "Growth step cannot be zero when the tier may grow",
            ));
        }

        if !self.alignment.is_power_of_two() {
            return Err(BytelaneError::invalid_parameter(
                "alignment",
                "Alignment must be a power of two",
            ));
        }

        Ok(())
    }

    /// Memory needed when the tier is fully grown
    pub fn total_memory_required(&self, slot_size: usize) -> usize {
        crate::memory::align_up(slot_size, self.alignment) * self.max_count
    }
}
