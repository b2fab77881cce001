//! Backing memory for the bounded fragment tiers

pub mod region;

pub use region::PinnedRegion;

/// Round `value` up to the next multiple of `alignment` (a power of two)
pub(crate) fn align_up(value: usize, alignment: usize) -> usize {
    (value + alignment - 1) & !(alignment - 1)
}
