//! Anonymous, registered memory carved into fixed-size fragment slots

use std::ptr::NonNull;

use memmap2::MmapMut;

use crate::{
    error::{BytelaneError, Result},
    registration::{Registration, RegistrationCache},
};

/// One anonymous mapping, registered once at creation, holding
/// `slot_count` fragment slots spaced `stride` bytes apart.
///
/// The registration is declared before the mapping so that it is released
/// (and the range unpinned) before the memory is unmapped.
#[derive(Debug)]
pub struct PinnedRegion {
    /// Registration covering the whole mapping
    registration: Registration,
    /// Anonymous mapping that owns the memory
    _mmap: MmapMut,
    /// Start of the mapping
    base: NonNull<u8>,
    /// Length of the mapping in bytes
    len: usize,
    /// Distance between consecutive slots
    stride: usize,
    /// Number of slots in the mapping
    slot_count: usize,
}

impl PinnedRegion {
    /// Map and register a region large enough for `slot_count` slots
    pub fn map(
        slot_count: usize,
        stride: usize,
        registrations: &RegistrationCache,
    ) -> Result<Self> {
        if slot_count == 0 || stride == 0 {
            return Err(BytelaneError::invalid_parameter(
                "slot_count",
                "Region must hold at least one non-empty slot",
            ));
        }

        let len = slot_count.checked_mul(stride).ok_or_else(|| {
            BytelaneError::invalid_parameter("slot_count", "Region size overflows usize")
        })?;

        let mut mmap = MmapMut::map_anon(len)
            .map_err(|e| BytelaneError::from_io(e, "Failed to map fragment region"))?;
        let base = NonNull::new(mmap.as_mut_ptr())
            .ok_or_else(|| BytelaneError::memory("Anonymous mapping returned a null pointer"))?;

        let registration = registrations.register(base.as_ptr() as usize, len)?;

        Ok(Self {
            registration,
            _mmap: mmap,
            base,
            len,
            stride,
            slot_count,
        })
    }

    /// Address of the first byte of the region
    pub fn base_address(&self) -> usize {
        self.base.as_ptr() as usize
    }

    /// Length of the region in bytes
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the region holds no bytes (never true for a mapped region)
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Distance between consecutive slots
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Number of slots in the region
    pub fn slot_count(&self) -> usize {
        self.slot_count
    }

    /// Registration covering the region
    pub fn registration(&self) -> &Registration {
        &self.registration
    }

    /// Pointer to the start of slot `index`, or `None` if out of range
    pub fn slot_ptr(&self, index: usize) -> Option<NonNull<u8>> {
        if index >= self.slot_count {
            return None;
        }
        // SAFETY: index * stride < len, so the offset stays inside the mapping
        Some(unsafe { NonNull::new_unchecked(self.base.as_ptr().add(index * self.stride)) })
    }
}

// The raw base pointer is only dereferenced through slots that the owning
// pool hands out exclusively.
unsafe impl Send for PinnedRegion {}
unsafe impl Sync for PinnedRegion {}
