//! Ordered tier-selection rules for send-side preparation

use crate::{fragment::Tier, module::ModuleLimits};

/// Requested payload bytes and header headroom for one preparation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteBudget {
    /// Payload bytes requested
    pub size: usize,
    /// Header bytes reserved ahead of the payload
    pub reserve: usize,
}

impl ByteBudget {
    /// Create a budget
    pub fn new(size: usize, reserve: usize) -> Self {
        Self { size, reserve }
    }

    /// Payload plus reserve, `None` on overflow
    pub fn total(&self) -> Option<usize> {
        self.size.checked_add(self.reserve)
    }

    /// Shrink the payload so that payload plus reserve fits in `limit`
    pub fn clamped_to(&self, limit: usize) -> Self {
        match self.total() {
            Some(total) if total <= limit => *self,
            _ => Self {
                size: limit.saturating_sub(self.reserve),
                reserve: self.reserve,
            },
        }
    }
}

/// How a send-side descriptor is materialized
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourcePath {
    /// Bind the caller's already-registered, contiguous memory in place.
    ///
    /// Only taken with a zero reserve. A registered contiguous source that
    /// asks for header room is packed into a pooled tier instead, so the
    /// reserve is kept ahead of the payload rather than silently dropped.
    PinnedInPlace,
    /// Register the caller's contiguous memory now and bind it in place
    RegisterInPlace,
    /// Pack into an eager-tier slot
    Eager,
    /// Pack into a max-tier slot, clamping the payload to the max-send size
    Max,
}

impl SourcePath {
    /// Tier the resulting fragment comes from
    pub fn tier(&self) -> Tier {
        match self {
            SourcePath::PinnedInPlace | SourcePath::RegisterInPlace => Tier::User,
            SourcePath::Eager => Tier::Eager,
            SourcePath::Max => Tier::Max,
        }
    }

    /// Whether the payload is used without copying
    pub fn is_zero_copy(&self) -> bool {
        self.tier() == Tier::User
    }
}

/// Facts the rules are evaluated against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceConditions {
    /// The caller supplied a registration for the payload
    pub registration_present: bool,
    /// The payload needs no intermediate buffer
    pub contiguous: bool,
    /// No header headroom was requested
    pub reserve_zero: bool,
    /// Payload plus reserve fits an eager slot
    pub fits_eager: bool,
    /// Payload alone exceeds the max-send size
    pub exceeds_max_send: bool,
}

impl SourceConditions {
    /// Evaluate the conditions for one request
    pub fn evaluate(
        limits: &ModuleLimits,
        budget: ByteBudget,
        registration_present: bool,
        contiguous: bool,
    ) -> Self {
        Self {
            registration_present,
            contiguous,
            reserve_zero: budget.reserve == 0,
            fits_eager: budget.total().is_some_and(|total| total <= limits.eager_limit),
            exceeds_max_send: budget.size > limits.max_send_size,
        }
    }
}

struct SourceRule {
    path: SourcePath,
    applies: fn(&SourceConditions) -> bool,
}

// First match wins; zero-copy paths take precedence over pooling. In-place
// binding leaves no room for headers, so both in-place rules need a zero
// reserve. For the pinned rule this is a deliberate change of precedence:
// a supplied registration no longer wins when a reserve is requested.
const SOURCE_RULES: [SourceRule; 3] = [
    SourceRule {
        path: SourcePath::PinnedInPlace,
        applies: |c| c.registration_present && c.contiguous && c.reserve_zero,
    },
    SourceRule {
        path: SourcePath::RegisterInPlace,
        applies: |c| c.exceeds_max_send && c.contiguous && c.reserve_zero,
    },
    SourceRule {
        path: SourcePath::Eager,
        applies: |c| c.fits_eager,
    },
];

/// Pick the path for a send-side preparation; falls back to the max tier
pub fn select_source_path(conditions: &SourceConditions) -> SourcePath {
    SOURCE_RULES
        .iter()
        .find(|rule| (rule.applies)(conditions))
        .map_or(SourcePath::Max, |rule| rule.path)
}
