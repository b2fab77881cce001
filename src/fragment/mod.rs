//! Fragment descriptors and the three fragment tiers
//!
//! Bounded tiers (eager, max) hand out slots of pre-registered memory; the
//! user tier hands out bare wrappers that reference caller-owned memory.

pub mod config;
pub mod descriptor;
pub mod fragment;
pub mod pool;
pub mod stats;
pub mod tier;
pub mod tiers;
pub mod user;

pub use config::TierConfig;
pub use descriptor::{DescriptorFlags, Segment, SegmentRole};
pub use fragment::Fragment;
pub use pool::FragmentPool;
pub use stats::{AtomicTierStats, TierStats};
pub use tier::Tier;
pub use tiers::FragmentTiers;
pub use user::UserTier;
