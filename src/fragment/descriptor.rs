//! Descriptor pieces handed to the transport primitives

use serde::{Deserialize, Serialize};

/// A contiguous byte range to transfer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    /// Address of the first byte
    pub address: usize,
    /// Number of bytes
    pub length: usize,
}

impl Segment {
    /// Create a segment
    pub fn new(address: usize, length: usize) -> Self {
        Self { address, length }
    }

    /// One past the last byte
    pub fn end(&self) -> usize {
        self.address + self.length
    }
}

/// Which side of the transfer the fragment's segment describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SegmentRole {
    /// Send path: the segment is read by the transport
    Source,
    /// Receive path: the segment is written by the transport
    Destination,
}

/// Transport annotations; this layer always produces an empty set
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DescriptorFlags(u32);

impl DescriptorFlags {
    /// No annotations
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Flags from raw bits
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Raw bits
    pub const fn bits(&self) -> u32 {
        self.0
    }

    /// Whether every bit of `other` is set
    pub const fn contains(&self, other: DescriptorFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Whether no bit is set
    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }
}
