//! Reference-counted memory registration
//!
//! A [`Registration`] represents a range pinned through a [`MemoryPinner`].
//! The range is pinned once by [`RegistrationCache::register`] and stays
//! pinned for as long as any holder keeps a handle. Additional holders come
//! from [`RegistrationCache::retain`] or [`RegistrationCache::lookup`]; each
//! holder gives its handle back exactly once through
//! [`RegistrationCache::release`] (or by dropping it). The final release
//! unpins the range and evicts it from the cache.

pub mod cache;
pub mod handle;
pub mod pinner;

pub use cache::{RegistrationCache, RegistrationStats};
pub use handle::{Registration, RegistrationId};
pub use pinner::{LockingPinner, MemoryPinner, PinHandle, SoftwarePinner};
