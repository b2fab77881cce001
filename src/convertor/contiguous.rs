//! Convertor over one contiguous byte range

use crate::error::{BytelaneError, Result};

use super::{Convertor, PackTarget, Packed};

/// Walks a single borrowed byte range
#[derive(Debug)]
pub struct ContiguousConvertor<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> ContiguousConvertor<'a> {
    /// Create a convertor over `data`
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    /// Skip `bytes` that were converted by other means (e.g. an earlier
    /// fragment of a multi-part receive)
    pub fn advance(&mut self, bytes: usize) -> Result<()> {
        let position = self
            .position
            .checked_add(bytes)
            .filter(|position| *position <= self.data.len())
            .ok_or_else(|| {
                BytelaneError::invalid_parameter(
                    "bytes",
                    "Cannot advance past the end of the payload",
                )
            })?;
        self.position = position;
        Ok(())
    }
}

impl Convertor for ContiguousConvertor<'_> {
    fn is_contiguous(&self) -> bool {
        true
    }

    fn pack(&mut self, target: PackTarget<'_>, max_len: usize) -> Result<Packed> {
        let remaining = &self.data[self.position..];
        let packed = match target {
            PackTarget::InPlace => {
                let length = max_len.min(remaining.len());
                Packed {
                    address: remaining.as_ptr() as usize,
                    length,
                    free_after: false,
                }
            }
            PackTarget::Buffer(buffer) => {
                let length = max_len.min(remaining.len()).min(buffer.len());
                buffer[..length].copy_from_slice(&remaining[..length]);
                Packed {
                    address: buffer.as_ptr() as usize,
                    length,
                    free_after: false,
                }
            }
        };
        self.position += packed.length;
        Ok(packed)
    }

    fn base_address(&self) -> usize {
        self.data.as_ptr() as usize
    }

    fn converted(&self) -> usize {
        self.position
    }

    fn total_len(&self) -> usize {
        self.data.len()
    }
}
