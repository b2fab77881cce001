//! Fragment descriptor

use std::{
    ptr::NonNull,
    slice,
    sync::{Arc, Weak},
};

use log::error;

use crate::{memory::PinnedRegion, registration::Registration};

use super::{
    descriptor::{DescriptorFlags, Segment, SegmentRole},
    pool::PoolShared,
    stats::AtomicTierStats,
    tier::Tier,
};

/// A checked-out slot of a bounded tier
#[derive(Debug)]
pub(crate) struct Slot {
    /// Identifier of the pool that handed the slot out
    pub(crate) pool_id: u64,
    /// Pool-wide slot index
    pub(crate) index: usize,
    /// Region holding the slot; keeps the memory mapped and registered
    pub(crate) region: Arc<PinnedRegion>,
    /// First byte of the slot
    pub(crate) ptr: NonNull<u8>,
    /// Usable bytes in the slot
    pub(crate) capacity: usize,
    /// Pool the slot returns to when dropped
    pub(crate) home: Weak<PoolShared>,
}

impl Drop for Slot {
    fn drop(&mut self) {
        if let Some(home) = self.home.upgrade() {
            home.check_in(self.index);
        }
    }
}

// A slot is checked out to exactly one fragment at a time.
unsafe impl Send for Slot {}
unsafe impl Sync for Slot {}

/// A transport buffer descriptor.
///
/// Produced by a tier, populated by the preparation engine, consumed by a
/// transport primitive and handed back to its tier exactly once through
/// `free`. A fragment is a move-only value, so releasing it twice does not
/// compile. Dropping a fragment without `free` returns it to its tier all
/// the same, along with any registration share it holds.
#[derive(Debug)]
pub struct Fragment {
    tier: Tier,
    slot: Option<Slot>,
    lease: Option<Weak<AtomicTierStats>>,
    registration: Option<Registration>,
    segment: Segment,
    role: SegmentRole,
    reserve: usize,
    payload_len: usize,
    flags: DescriptorFlags,
}

impl Fragment {
    pub(crate) fn pooled(tier: Tier, slot: Slot) -> Self {
        let segment = Segment::new(slot.ptr.as_ptr() as usize, 0);
        Self {
            tier,
            slot: Some(slot),
            lease: None,
            registration: None,
            segment,
            role: SegmentRole::Source,
            reserve: 0,
            payload_len: 0,
            flags: DescriptorFlags::empty(),
        }
    }

    pub(crate) fn wrapper(lease: Weak<AtomicTierStats>) -> Self {
        Self {
            tier: Tier::User,
            slot: None,
            lease: Some(lease),
            registration: None,
            segment: Segment::default(),
            role: SegmentRole::Source,
            reserve: 0,
            payload_len: 0,
            flags: DescriptorFlags::empty(),
        }
    }

    /// Describe the fragment as a send-side descriptor
    pub(crate) fn set_source(&mut self, segment: Segment, reserve: usize, payload_len: usize) {
        self.segment = segment;
        self.role = SegmentRole::Source;
        self.reserve = reserve;
        self.payload_len = payload_len;
        self.flags = DescriptorFlags::empty();
    }

    /// Describe the fragment as a receive-side descriptor
    pub(crate) fn set_destination(&mut self, segment: Segment) {
        self.segment = segment;
        self.role = SegmentRole::Destination;
        self.reserve = 0;
        self.payload_len = segment.length;
        self.flags = DescriptorFlags::empty();
    }

    pub(crate) fn attach_registration(&mut self, registration: Registration) {
        self.registration = Some(registration);
    }

    pub(crate) fn take_registration(&mut self) -> Option<Registration> {
        self.registration.take()
    }

    pub(crate) fn slot(&self) -> Option<&Slot> {
        self.slot.as_ref()
    }

    #[cfg(test)]
    pub(crate) fn set_tier(&mut self, tier: Tier) {
        self.tier = tier;
    }

    /// Origin tier
    pub fn tier(&self) -> Tier {
        self.tier
    }

    /// The fragment's segment, whichever side it describes
    pub fn segment(&self) -> &Segment {
        &self.segment
    }

    /// Which side of the transfer the segment describes
    pub fn role(&self) -> SegmentRole {
        self.role
    }

    /// Source segment, present on send-side descriptors only
    pub fn source(&self) -> Option<&Segment> {
        (self.role == SegmentRole::Source).then_some(&self.segment)
    }

    /// Destination segment, present on receive-side descriptors only
    pub fn destination(&self) -> Option<&Segment> {
        (self.role == SegmentRole::Destination).then_some(&self.segment)
    }

    /// Number of source segments (0 or 1)
    pub fn source_count(&self) -> usize {
        usize::from(self.role == SegmentRole::Source)
    }

    /// Number of destination segments (0 or 1)
    pub fn destination_count(&self) -> usize {
        usize::from(self.role == SegmentRole::Destination)
    }

    /// Transport annotations
    pub fn flags(&self) -> DescriptorFlags {
        self.flags
    }

    /// Set transport annotations
    pub fn set_flags(&mut self, flags: DescriptorFlags) {
        self.flags = flags;
    }

    /// Header bytes reserved ahead of the payload
    pub fn reserve(&self) -> usize {
        self.reserve
    }

    /// Payload bytes described by the segment, excluding the reserve
    pub fn payload_len(&self) -> usize {
        self.payload_len
    }

    /// Registration the transport should use for the segment: the one the
    /// fragment holds, or the one covering its pooled slot
    pub fn registration(&self) -> Option<&Registration> {
        self.registration
            .as_ref()
            .or_else(|| self.slot.as_ref().map(|slot| slot.region.registration()))
    }

    /// Whether the fragment holds its own registration share
    pub fn holds_registration(&self) -> bool {
        self.registration.is_some()
    }

    /// Bytes of pooled backing storage (0 for user-tier wrappers)
    pub fn capacity(&self) -> usize {
        self.slot.as_ref().map_or(0, |slot| slot.capacity)
    }

    /// The whole pooled slot
    pub fn buffer(&self) -> Option<&[u8]> {
        self.slot
            .as_ref()
            // SAFETY: the slot is checked out to this fragment alone
            .map(|slot| unsafe { slice::from_raw_parts(slot.ptr.as_ptr(), slot.capacity) })
    }

    /// The whole pooled slot, mutable (reserve headroom included)
    pub fn buffer_mut(&mut self) -> Option<&mut [u8]> {
        self.slot
            .as_mut()
            // SAFETY: the slot is checked out to this fragment alone
            .map(|slot| unsafe { slice::from_raw_parts_mut(slot.ptr.as_ptr(), slot.capacity) })
    }

    /// Bytes covered by the segment of a pooled fragment
    pub fn segment_bytes(&self) -> Option<&[u8]> {
        let length = self.segment.length;
        self.buffer().and_then(|buffer| buffer.get(..length))
    }
}

impl Drop for Fragment {
    fn drop(&mut self) {
        if let Some(registration) = self.registration.take() {
            let id = registration.id();
            if let Err(e) = registration.release() {
                error!("fragment dropped with registration {}: unpin failed: {}", id, e);
            }
        }
        if let Some(stats) = self.lease.take().and_then(|lease| lease.upgrade()) {
            stats.record_release();
        }
    }
}
