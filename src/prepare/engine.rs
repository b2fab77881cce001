//! Send- and receive-side descriptor preparation

use log::{debug, error, warn};

use crate::{
    convertor::{Convertor, PackTarget},
    error::{BytelaneError, Result},
    fragment::{Fragment, FragmentTiers, Segment, Tier},
    module::ModuleLimits,
    registration::{Registration, RegistrationCache},
    transport::Endpoint,
};

use super::rules::{select_source_path, ByteBudget, SourceConditions, SourcePath};

/// Prepares descriptors against one module's tiers and registration cache.
///
/// Every failure hands back any fragment or registration share taken so
/// far; a returned fragment is always fully populated.
#[derive(Debug, Clone, Copy)]
pub struct DescriptorEngine<'a> {
    limits: ModuleLimits,
    tiers: &'a FragmentTiers,
    registrations: &'a RegistrationCache,
}

impl<'a> DescriptorEngine<'a> {
    /// Create an engine over a module's state
    pub fn new(
        limits: ModuleLimits,
        tiers: &'a FragmentTiers,
        registrations: &'a RegistrationCache,
    ) -> Self {
        Self {
            limits,
            tiers,
            registrations,
        }
    }

    /// Prepare a send-side descriptor.
    ///
    /// The fragment's `payload_len` reports how many payload bytes were
    /// actually prepared, which may be fewer than requested. Registration
    /// failures surface as `AllocationFailed`.
    pub fn prepare_source(
        &self,
        endpoint: &Endpoint,
        registration: Option<&Registration>,
        convertor: &mut dyn Convertor,
        budget: ByteBudget,
    ) -> Result<Fragment> {
        if budget.reserve > self.limits.max_send_size {
            return Err(BytelaneError::invalid_parameter(
                "reserve",
                format!(
                    "{} reserved bytes exceed the max send size {}",
                    budget.reserve, self.limits.max_send_size
                ),
            ));
        }

        let conditions = SourceConditions::evaluate(
            &self.limits,
            budget,
            registration.is_some(),
            convertor.is_contiguous(),
        );
        let path = select_source_path(&conditions);
        debug!(
            "prepare_source for {}: {} bytes + {} reserve via {:?}",
            endpoint, budget.size, budget.reserve, path
        );

        let prepared = match path {
            SourcePath::PinnedInPlace => match registration {
                Some(registration) => self.bind_registered(registration, convertor, budget.size),
                None => Err(BytelaneError::invalid_parameter(
                    "registration",
                    "In-place binding requires a registration",
                )),
            },
            SourcePath::RegisterInPlace => self.bind_and_register(convertor, budget.size),
            SourcePath::Eager => self.pack_pooled(Tier::Eager, convertor, budget),
            SourcePath::Max => {
                self.pack_pooled(Tier::Max, convertor, budget.clamped_to(self.limits.max_send_size))
            }
        };
        prepared.map_err(BytelaneError::into_allocation_failure)
    }

    /// Prepare a receive-side descriptor targeting the next unconverted byte
    /// of the convertor's payload.
    ///
    /// Receives are always zero-copy: the target range is bound directly and
    /// holds a share of the supplied registration, of a live registration
    /// already covering it, or of a fresh one. The requested size is clamped
    /// to the bytes the convertor has left. The reserve is ignored; there is
    /// no header room in caller memory.
    pub fn prepare_destination(
        &self,
        endpoint: &Endpoint,
        registration: Option<&Registration>,
        convertor: &mut dyn Convertor,
        budget: ByteBudget,
    ) -> Result<Fragment> {
        let remaining = convertor.remaining();
        let size = budget.size.min(remaining);
        if size < budget.size {
            debug!(
                "prepare_destination for {}: clamping {} bytes to the {} left",
                endpoint, budget.size, remaining
            );
        }
        if size == 0 {
            return Err(BytelaneError::invalid_parameter(
                "size",
                "Receive target has no bytes left",
            ));
        }

        let mut fragment = self.tiers.alloc(Tier::User)?;

        let address = match target_address(&*convertor) {
            Ok(address) => address,
            Err(e) => {
                self.discard(fragment);
                return Err(e);
            }
        };
        debug!("prepare_destination for {}: {} bytes at {:#x}", endpoint, size, address);

        let share = match registration {
            Some(registration) => {
                if let Err(e) = ensure_covers(registration, address, size) {
                    self.discard(fragment);
                    return Err(e);
                }
                self.registrations.retain(registration)
            }
            None => match self.covering_registration(address, size) {
                Ok(registration) => registration,
                Err(e) => {
                    self.discard(fragment);
                    return Err(e.into_allocation_failure());
                }
            },
        };

        fragment.set_destination(Segment::new(address, size));
        fragment.attach_registration(share);
        Ok(fragment)
    }

    fn bind_registered(
        &self,
        registration: &Registration,
        convertor: &mut dyn Convertor,
        size: usize,
    ) -> Result<Fragment> {
        let mut fragment = self.tiers.alloc(Tier::User)?;

        let packed = match convertor.pack(PackTarget::InPlace, size) {
            Ok(packed) => packed,
            Err(e) => {
                self.discard(fragment);
                return Err(e);
            }
        };
        if let Err(e) = ensure_covers(registration, packed.address, packed.length) {
            self.discard(fragment);
            return Err(e);
        }

        fragment.set_source(Segment::new(packed.address, packed.length), 0, packed.length);
        fragment.attach_registration(self.registrations.retain(registration));
        Ok(fragment)
    }

    fn bind_and_register(&self, convertor: &mut dyn Convertor, size: usize) -> Result<Fragment> {
        let mut fragment = self.tiers.alloc(Tier::User)?;

        let packed = match convertor.pack(PackTarget::InPlace, size) {
            Ok(packed) => packed,
            Err(e) => {
                self.discard(fragment);
                return Err(e);
            }
        };
        let registration = match self.covering_registration(packed.address, packed.length) {
            Ok(registration) => registration,
            Err(e) => {
                self.discard(fragment);
                return Err(e);
            }
        };

        fragment.set_source(Segment::new(packed.address, packed.length), 0, packed.length);
        fragment.attach_registration(registration);
        Ok(fragment)
    }

    fn pack_pooled(
        &self,
        tier: Tier,
        convertor: &mut dyn Convertor,
        budget: ByteBudget,
    ) -> Result<Fragment> {
        let mut fragment = self.tiers.alloc(tier)?;

        let packed = match fragment.buffer_mut() {
            Some(buffer) => {
                let base = buffer.as_ptr() as usize;
                let capacity = buffer.len();
                match buffer.get_mut(budget.reserve..budget.reserve + budget.size) {
                    Some(payload) => convertor
                        .pack(PackTarget::Buffer(payload), budget.size)
                        .map(|packed| (base, packed.length)),
                    None => Err(BytelaneError::invalid_parameter(
                        "size",
                        format!(
                            "{} + {} bytes do not fit a {}-byte {} slot",
                            budget.size,
                            budget.reserve,
                            capacity,
                            tier
                        ),
                    )),
                }
            }
            None => Err(BytelaneError::allocation_failed(tier, "fragment has no backing slot")),
        };

        match packed {
            Ok((base, length)) => {
                let segment = Segment::new(base, budget.reserve + length);
                fragment.set_source(segment, budget.reserve, length);
                Ok(fragment)
            }
            Err(e) => {
                self.discard(fragment);
                Err(e)
            }
        }
    }

    /// Share a live registration covering the range, or pin it fresh
    fn covering_registration(&self, address: usize, length: usize) -> Result<Registration> {
        match self.registrations.lookup(address, length) {
            Some(registration) => Ok(registration),
            None => self.registrations.register(address, length),
        }
    }

    /// Hand a half-built fragment back to its tier
    fn discard(&self, fragment: Fragment) {
        match self.tiers.release(fragment) {
            Ok(Some(registration)) => {
                if let Err(e) = self.registrations.release(registration) {
                    warn!("releasing registration of a discarded fragment failed: {}", e);
                }
            }
            Ok(None) => {}
            Err(e) => error!("discarding a half-built fragment failed: {}", e),
        }
    }
}

/// `base + lower bound + already converted`: the next byte to receive into
fn target_address(convertor: &dyn Convertor) -> Result<usize> {
    isize::try_from(convertor.converted())
        .ok()
        .and_then(|converted| convertor.lower_bound().checked_add(converted))
        .and_then(|offset| convertor.base_address().checked_add_signed(offset))
        .ok_or_else(|| {
            BytelaneError::invalid_parameter("convertor", "Receive target address overflows")
        })
}

fn ensure_covers(registration: &Registration, address: usize, length: usize) -> Result<()> {
    if registration.covers(address, length) {
        return Ok(());
    }
    Err(BytelaneError::invalid_parameter(
        "registration",
        format!(
            "registration {} [{:#x}..={:#x}] does not cover {} bytes at {:#x}",
            registration.id(),
            registration.base(),
            registration.bound(),
            length,
            address
        ),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        convertor::{ContiguousConvertor, StridedConvertor},
        fragment::{SegmentRole, TierConfig},
        registration::SoftwarePinner,
    };
    use std::sync::Arc;

    struct Fixture {
        tiers: FragmentTiers,
        cache: RegistrationCache,
        pinner: Arc<SoftwarePinner>,
        endpoint: Endpoint,
    }

    impl Fixture {
        fn new() -> Self {
            let pinner = Arc::new(SoftwarePinner::new());
            let cache = RegistrationCache::new(pinner.clone());
            let tiers = FragmentTiers::new(
                4096,
                65536,
                TierConfig::default().with_initial_count(2).with_max_count(4),
                TierConfig::default().with_initial_count(1).with_max_count(2),
                &cache,
            )
            .unwrap();
            Self {
                tiers,
                cache,
                pinner,
                endpoint: Endpoint::new(1, "peer"),
            }
        }

        fn engine(&self) -> DescriptorEngine<'_> {
            DescriptorEngine::new(ModuleLimits::new(4096, 65536), &self.tiers, &self.cache)
        }
    }

    #[test]
    fn test_eager_pack_with_reserve() {
        let fixture = Fixture::new();
        let data: Vec<u8> = (0..100).collect();
        let mut convertor = ContiguousConvertor::new(&data);

        let fragment = fixture
            .engine()
            .prepare_source(&fixture.endpoint, None, &mut convertor, ByteBudget::new(100, 20))
            .unwrap();

        assert_eq!(fragment.tier(), Tier::Eager);
        assert_eq!(fragment.segment().length, 120);
        assert_eq!(fragment.payload_len(), 100);
        assert_eq!(&fragment.segment_bytes().unwrap()[20..], &data[..]);
        assert_eq!(fragment.role(), SegmentRole::Source);
    }

    #[test]
    fn test_short_payload_reports_actual_length() {
        let fixture = Fixture::new();
        let data = [1u8; 30];
        let mut convertor = ContiguousConvertor::new(&data);

        let fragment = fixture
            .engine()
            .prepare_source(&fixture.endpoint, None, &mut convertor, ByteBudget::new(100, 4))
            .unwrap();
        assert_eq!(fragment.payload_len(), 30);
        assert_eq!(fragment.segment().length, 34);
    }

    #[test]
    fn test_pinned_in_place_retains() {
        let fixture = Fixture::new();
        let data = vec![9u8; 70_000];
        let registration = fixture.cache.register(data.as_ptr() as usize, data.len()).unwrap();
        let mut convertor = ContiguousConvertor::new(&data);

        let fragment = fixture
            .engine()
            .prepare_source(
                &fixture.endpoint,
                Some(&registration),
                &mut convertor,
                ByteBudget::new(70_000, 0),
            )
            .unwrap();

        assert_eq!(fragment.tier(), Tier::User);
        assert_eq!(fragment.segment().address, data.as_ptr() as usize);
        assert_eq!(fragment.segment().length, 70_000);
        assert_eq!(registration.ref_count(), 2);
        assert!(fragment.registration().unwrap().ptr_eq(&registration));
    }

    #[test]
    fn test_pinned_in_place_rejects_uncovered_range() {
        let fixture = Fixture::new();
        let data = vec![0u8; 256];
        let registration = fixture.cache.register(data.as_ptr() as usize, 128).unwrap();
        let mut convertor = ContiguousConvertor::new(&data);

        let err = fixture
            .engine()
            .prepare_source(
                &fixture.endpoint,
                Some(&registration),
                &mut convertor,
                ByteBudget::new(256, 0),
            )
            .unwrap_err();
        assert!(matches!(err, BytelaneError::InvalidParameter { .. }));
        assert_eq!(registration.ref_count(), 1);
        assert_eq!(fixture.tiers.user().in_use(), 0);
    }

    #[test]
    fn test_register_in_place_failure_releases_wrapper() {
        let pinner = Arc::new(SoftwarePinner::with_limit(2));
        let cache = RegistrationCache::new(pinner);
        let tiers = FragmentTiers::new(
            64,
            128,
            TierConfig::default().with_initial_count(1).with_max_count(1),
            TierConfig::default().with_initial_count(1).with_max_count(1),
            &cache,
        )
        .unwrap();
        let engine = DescriptorEngine::new(ModuleLimits::new(64, 128), &tiers, &cache);
        let data = [0u8; 512];
        let mut convertor = ContiguousConvertor::new(&data);

        // Both pins are taken by the tier regions
        let err = engine
            .prepare_source(
                &Endpoint::new(2, "peer"),
                None,
                &mut convertor,
                ByteBudget::new(512, 0),
            )
            .unwrap_err();
        assert!(matches!(err, BytelaneError::AllocationFailed { tier: Tier::User, .. }));
        assert_eq!(tiers.user().in_use(), 0);
    }

    #[test]
    fn test_max_clamps_non_contiguous() {
        let fixture = Fixture::new();
        let data = vec![3u8; 2 * 70_000];
        let mut convertor = StridedConvertor::new(&data, 1000, 2000, 70).unwrap();

        let fragment = fixture
            .engine()
            .prepare_source(&fixture.endpoint, None, &mut convertor, ByteBudget::new(70_000, 8))
            .unwrap();
        assert_eq!(fragment.tier(), Tier::Max);
        assert_eq!(fragment.payload_len(), 65_528);
        assert_eq!(fragment.segment().length, 65_536);
    }

    #[test]
    fn test_reserve_larger_than_max_send_rejected() {
        let fixture = Fixture::new();
        let data = [0u8; 4];
        let mut convertor = ContiguousConvertor::new(&data);
        assert!(fixture
            .engine()
            .prepare_source(&fixture.endpoint, None, &mut convertor, ByteBudget::new(4, 70_000))
            .is_err());
    }

    #[test]
    fn test_destination_registers_fresh() {
        let fixture = Fixture::new();
        let data = vec![0u8; 1000];
        let mut convertor = ContiguousConvertor::new(&data);
        convertor.advance(200).unwrap();

        let fragment = fixture
            .engine()
            .prepare_destination(&fixture.endpoint, None, &mut convertor, ByteBudget::new(300, 0))
            .unwrap();

        let expected = Segment::new(data.as_ptr() as usize + 200, 300);
        assert_eq!(fragment.destination(), Some(&expected));
        assert!(fragment.source().is_none());
        assert_eq!(fragment.tier(), Tier::User);
        // two tier regions plus the receive target
        assert_eq!(fixture.pinner.live_pins(), 3);
        assert!(fragment.registration().unwrap().covers(expected.address, 300));
    }

    #[test]
    fn test_destination_retains_supplied_registration() {
        let fixture = Fixture::new();
        let data = vec![0u8; 64];
        let registration = fixture.cache.register(data.as_ptr() as usize, 64).unwrap();
        let mut convertor = ContiguousConvertor::new(&data);

        let fragment = fixture
            .engine()
            .prepare_destination(
                &fixture.endpoint,
                Some(&registration),
                &mut convertor,
                ByteBudget::new(64, 0),
            )
            .unwrap();
        assert_eq!(registration.ref_count(), 2);
        drop(fragment);
        assert_eq!(registration.ref_count(), 1);
    }

    #[test]
    fn test_destination_shares_covering_registration() {
        let fixture = Fixture::new();
        let data = vec![0u8; 1000];
        let mut convertor = ContiguousConvertor::new(&data);
        let engine = fixture.engine();

        let whole = engine
            .prepare_destination(&fixture.endpoint, None, &mut convertor, ByteBudget::new(1000, 0))
            .unwrap();
        convertor.advance(100).unwrap();
        let tail = engine
            .prepare_destination(&fixture.endpoint, None, &mut convertor, ByteBudget::new(100, 0))
            .unwrap();

        let shared = whole.registration().unwrap();
        assert!(tail.registration().unwrap().ptr_eq(shared));
        assert_eq!(shared.ref_count(), 2);
        assert_eq!(fixture.pinner.live_pins(), 3);

        // The range stays pinned until the last holder goes away
        let released = fixture.tiers.release(whole).unwrap().unwrap();
        fixture.cache.release(released).unwrap();
        assert_eq!(fixture.pinner.live_pins(), 3);
        drop(tail);
        assert_eq!(fixture.pinner.live_pins(), 2);
        assert_eq!(fixture.cache.stats().lookup_hits, 1);
    }

    #[test]
    fn test_destination_clamped_to_remaining_bytes() {
        let fixture = Fixture::new();
        let data = vec![0u8; 256];
        let mut convertor = ContiguousConvertor::new(&data);
        convertor.advance(200).unwrap();

        let fragment = fixture
            .engine()
            .prepare_destination(&fixture.endpoint, None, &mut convertor, ByteBudget::new(4096, 0))
            .unwrap();
        let expected = Segment::new(data.as_ptr() as usize + 200, 56);
        assert_eq!(fragment.destination(), Some(&expected));
        assert_eq!(fragment.registration().unwrap().len(), 56);

        convertor.advance(56).unwrap();
        let err = fixture
            .engine()
            .prepare_destination(&fixture.endpoint, None, &mut convertor, ByteBudget::new(16, 0))
            .unwrap_err();
        assert!(matches!(err, BytelaneError::InvalidParameter { .. }));
        assert_eq!(fixture.tiers.user().in_use(), 1);
    }
}
