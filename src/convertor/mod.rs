//! Packing functions ("convertors") that turn a logical payload into bytes
//!
//! A convertor walks a payload that may be scattered in memory. Packing
//! either copies the next bytes into a caller buffer, or, for contiguous
//! payloads, reports where the next bytes already live so they can be used
//! in place.

pub mod contiguous;
pub mod strided;

pub use contiguous::ContiguousConvertor;
pub use strided::StridedConvertor;

use crate::error::Result;

/// Where packed bytes should go
#[derive(Debug)]
pub enum PackTarget<'a> {
    /// Report the in-place address of the next bytes; nothing is copied
    InPlace,
    /// Copy the next bytes into this buffer
    Buffer(&'a mut [u8]),
}

/// Outcome of one pack call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Packed {
    /// Address of the packed bytes (the caller buffer, or the payload itself)
    pub address: usize,
    /// Bytes packed; may be less than requested when the payload runs out
    pub length: usize,
    /// Whether the caller now owns memory the convertor allocated
    pub free_after: bool,
}

/// A payload walker consumed by the preparation engine
pub trait Convertor {
    /// Whether the payload is one contiguous range (needs no intermediate buffer)
    fn is_contiguous(&self) -> bool;

    /// Pack up to `max_len` of the next unconverted bytes into `target`
    fn pack(&mut self, target: PackTarget<'_>, max_len: usize) -> Result<Packed>;

    /// Address the payload is described relative to
    fn base_address(&self) -> usize;

    /// Offset of the payload's first byte from the base address
    fn lower_bound(&self) -> isize {
        0
    }

    /// Bytes already converted
    fn converted(&self) -> usize;

    /// Total payload bytes
    fn total_len(&self) -> usize;

    /// Bytes still to convert
    fn remaining(&self) -> usize {
        self.total_len().saturating_sub(self.converted())
    }
}
