//! Convertor over fixed-size blocks spaced at a regular stride

use crate::error::{BytelaneError, Result};

use super::{Convertor, PackTarget, Packed};

/// `count` blocks of `block_len` bytes, one every `stride` bytes.
///
/// Non-contiguous whenever there is a gap between blocks, in which case
/// packing requires a buffer.
#[derive(Debug)]
pub struct StridedConvertor<'a> {
    data: &'a [u8],
    block_len: usize,
    stride: usize,
    count: usize,
    position: usize,
}

impl<'a> StridedConvertor<'a> {
    /// Create a convertor over `count` blocks inside `data`
    pub fn new(data: &'a [u8], block_len: usize, stride: usize, count: usize) -> Result<Self> {
        if block_len == 0 || stride < block_len {
            return Err(BytelaneError::invalid_parameter(
                "stride",
                "Stride must be at least the (non-zero) block length",
            ));
        }

        let span = count
            .checked_sub(1)
            .map_or(Some(0), |gaps| {
                gaps.checked_mul(stride)
                    .and_then(|offset| offset.checked_add(block_len))
            })
            .ok_or_else(|| BytelaneError::invalid_parameter("count", "Layout overflows usize"))?;
        if span > data.len() {
            return Err(BytelaneError::invalid_parameter(
                "data",
                format!("Layout spans {} bytes but only {} are available", span, data.len()),
            ));
        }

        Ok(Self {
            data,
            block_len,
            stride,
            count,
            position: 0,
        })
    }
}

impl Convertor for StridedConvertor<'_> {
    fn is_contiguous(&self) -> bool {
        self.stride == self.block_len || self.count <= 1
    }

    fn pack(&mut self, target: PackTarget<'_>, max_len: usize) -> Result<Packed> {
        let PackTarget::Buffer(buffer) = target else {
            if !self.is_contiguous() {
                return Err(BytelaneError::invalid_parameter(
                    "target",
                    "Non-contiguous payloads cannot be used in place",
                ));
            }
            let length = max_len.min(self.remaining());
            let packed = Packed {
                address: self.data.as_ptr() as usize + self.position,
                length,
                free_after: false,
            };
            self.position += length;
            return Ok(packed);
        };

        let wanted = max_len.min(self.remaining()).min(buffer.len());
        let mut written = 0;
        while written < wanted {
            let block = self.position / self.block_len;
            let within = self.position % self.block_len;
            let chunk = (self.block_len - within).min(wanted - written);
            let start = block * self.stride + within;

            buffer[written..written + chunk].copy_from_slice(&self.data[start..start + chunk]);
            written += chunk;
            self.position += chunk;
        }

        Ok(Packed {
            address: buffer.as_ptr() as usize,
            length: written,
            free_after: false,
        })
    }

    fn base_address(&self) -> usize {
        self.data.as_ptr() as usize
    }

    fn converted(&self) -> usize {
        self.position
    }

    fn total_len(&self) -> usize {
        self.block_len * self.count
    }
}
