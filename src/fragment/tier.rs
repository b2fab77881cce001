//! Fragment tier tag

use serde::{Deserialize, Serialize};

/// Origin tier of a fragment; decides which return path `free` runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tier {
    /// Pre-registered slots sized to the eager limit
    Eager,
    /// Pre-registered slots sized to the max-send limit
    Max,
    /// Wrapper with no backing storage, bound to caller memory
    User,
}

impl Tier {
    /// Whether fragments of this tier own pooled backing memory
    pub fn is_pooled(&self) -> bool {
        !matches!(self, Tier::User)
    }

    /// Get a human-readable name for the tier
    pub fn name(&self) -> &'static str {
        match self {
            Tier::Eager => "eager",
            Tier::Max => "max",
            Tier::User => "user",
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
