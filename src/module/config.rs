//! Module configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{
    error::{BytelaneError, Result},
    fragment::TierConfig,
};

/// Process-wide limits that gate every tier decision; read-only once the
/// module is built
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleLimits {
    /// Largest payload-plus-reserve served from the eager tier; also the
    /// eager slot size
    pub eager_limit: usize,
    /// Largest single send; also the max slot size
    pub max_send_size: usize,
}

impl Default for ModuleLimits {
    fn default() -> Self {
        Self {
            eager_limit: crate::config::DEFAULT_EAGER_LIMIT,
            max_send_size: crate::config::DEFAULT_MAX_SEND_SIZE,
        }
    }
}

impl ModuleLimits {
    /// Create limits
    pub fn new(eager_limit: usize, max_send_size: usize) -> Self {
        Self {
            eager_limit,
            max_send_size,
        }
    }

    /// Validate the limits
    pub fn validate(&self) -> Result<()> {
        if self.eager_limit == 0 {
            return Err(BytelaneError::invalid_parameter(
                "eager_limit",
                "Eager limit cannot be zero",
            ));
        }

        if self.max_send_size < self.eager_limit {
            return Err(BytelaneError::invalid_parameter(
                "max_send_size",
                "Max send size cannot be below the eager limit",
            ));
        }

        Ok(())
    }
}

/// Configuration for a transfer module
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleConfig {
    /// Tier thresholds
    pub limits: ModuleLimits,
    /// Eager tier sizing
    pub eager: TierConfig,
    /// Max tier sizing
    pub max: TierConfig,
    /// Page-lock registered memory instead of bookkeeping-only pinning
    pub lock_registrations: bool,
}

impl Default for ModuleConfig {
    fn default() -> Self {
        Self {
            limits: ModuleLimits::default(),
            eager: TierConfig::eager(),
            max: TierConfig::max(),
            lock_registrations: false,
        }
    }
}

impl ModuleConfig {
    /// Create a configuration with custom limits
    pub fn new(eager_limit: usize, max_send_size: usize) -> Self {
        Self {
            limits: ModuleLimits::new(eager_limit, max_send_size),
            ..Default::default()
        }
    }

    /// Set the eager tier configuration
    pub fn with_eager_tier(mut self, tier: TierConfig) -> Self {
        self.eager = tier;
        self
    }

    /// Set the max tier configuration
    pub fn with_max_tier(mut self, tier: TierConfig) -> Self {
        self.max = tier;
        self
    }

    /// Enable or disable page-locking registrations
    pub fn with_lock_registrations(mut self, enable: bool) -> Self {
        self.lock_registrations = enable;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.limits.validate()?;
        self.eager.validate()?;
        self.max.validate()?;
        Ok(())
    }

    /// Memory needed when both bounded tiers are fully grown
    pub fn total_memory_required(&self) -> usize {
        self.eager.total_memory_required(self.limits.eager_limit)
            + self.max.total_memory_required(self.limits.max_send_size)
    }
}

/// Builder pattern for module configuration
pub struct ModuleConfigBuilder {
    config: ModuleConfig,
}

impl ModuleConfigBuilder {
    /// Create a new builder with default settings
    pub fn new() -> Self {
        Self {
            config: ModuleConfig::default(),
        }
    }

    /// Set the eager limit
    pub fn eager_limit(mut self, limit: usize) -> Self {
        self.config.limits.eager_limit = limit;
        self
    }

    /// Set the max send size
    pub fn max_send_size(mut self, size: usize) -> Self {
        self.config.limits.max_send_size = size;
        self
    }

    /// Set eager tier slot counts
    pub fn eager_slots(mut self, initial: usize, max: usize) -> Self {
        self.config.eager.initial_count = initial;
        self.config.eager.max_count = max;
        self
    }

    /// Set max tier slot counts
    pub fn max_slots(mut self, initial: usize, max: usize) -> Self {
        self.config.max.initial_count = initial;
        self.config.max.max_count = max;
        self
    }

    /// Set the growth step of both bounded tiers
    pub fn grow_by(mut self, count: usize) -> Self {
        self.config.eager.grow_by = count;
        self.config.max.grow_by = count;
        self
    }

    /// Wait up to `timeout` for a release when a bounded tier is exhausted
    pub fn allocation_timeout(mut self, timeout: Duration) -> Self {
        self.config.eager.allocation_timeout = Some(timeout);
        self.config.max.allocation_timeout = Some(timeout);
        self
    }

    /// Fail immediately when a bounded tier is exhausted
    pub fn no_timeout(mut self) -> Self {
        self.config.eager.allocation_timeout = None;
        self.config.max.allocation_timeout = None;
        self
    }

    /// Page-lock registered memory
    pub fn lock_registrations(mut self, enable: bool) -> Self {
        self.config.lock_registrations = enable;
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<ModuleConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for ModuleConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ModuleConfig::default();
        assert_eq!(config.limits.eager_limit, 4096);
        assert_eq!(config.limits.max_send_size, 65536);
        assert!(!config.lock_registrations);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = ModuleConfigBuilder::new()
            .eager_limit(1024)
            .max_send_size(8192)
            .eager_slots(2, 4)
            .max_slots(1, 2)
            .grow_by(1)
            .allocation_timeout(Duration::from_millis(5))
            .build()
            .unwrap();

        assert_eq!(config.limits, ModuleLimits::new(1024, 8192));
        assert_eq!(config.eager.max_count, 4);
        assert_eq!(config.max.allocation_timeout, Some(Duration::from_millis(5)));
        assert_eq!(config.total_memory_required(), 1024 * 4 + 8192 * 2);
    }

    #[test]
    fn test_validation_failures() {
        assert!(ModuleConfigBuilder::new().eager_limit(0).build().is_err());
        assert!(ModuleConfigBuilder::new()
            .eager_limit(8192)
            .max_send_size(4096)
            .build()
            .is_err());
        assert!(ModuleConfigBuilder::new().eager_slots(8, 4).build().is_err());
    }
}
