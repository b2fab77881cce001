//! Transfer module: owns the tiers, the registration cache, the receive
//! callbacks and the transport binding, and exposes the data-path entry
//! points.

pub mod config;

pub use config::{ModuleConfig, ModuleConfigBuilder, ModuleLimits};

use std::sync::Arc;

use log::{debug, info, warn};

use crate::{
    convertor::Convertor,
    error::Result,
    fragment::{Fragment, FragmentTiers, Segment, Tier, TierStats},
    prepare::{ByteBudget, DescriptorEngine},
    registration::{
        LockingPinner, MemoryPinner, Registration, RegistrationCache, RegistrationStats,
        SoftwarePinner,
    },
    transport::{
        CallbackData, CallbackTable, Endpoint, RecvCallback, RecvRegistration, StubTransport,
        Tag, Transport,
    },
};

/// Point-in-time statistics for a module
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleStats {
    pub eager: TierStats,
    pub max: TierStats,
    pub user: TierStats,
    pub registrations: RegistrationStats,
    pub callbacks: usize,
}

impl ModuleStats {
    /// Statistics for one tier
    pub fn tier(&self, tier: Tier) -> &TierStats {
        match tier {
            Tier::Eager => &self.eager,
            Tier::Max => &self.max,
            Tier::User => &self.user,
        }
    }
}

/// What was still outstanding when a module was finalized
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FinalizeReport {
    pub outstanding_eager: usize,
    pub outstanding_max: usize,
    pub outstanding_user: usize,
    /// Registrations still pinned after the tiers were torn down, held by
    /// outstanding fragments or by callers
    pub live_registrations: usize,
}

impl FinalizeReport {
    /// Whether every fragment came back before finalize
    pub fn is_clean(&self) -> bool {
        self.outstanding_eager == 0
            && self.outstanding_max == 0
            && self.outstanding_user == 0
            && self.live_registrations == 0
    }
}

/// One instance of the byte-transfer data path.
///
/// Every operation takes `&self`; the module may be shared across threads
/// behind an `Arc`.
#[derive(Debug)]
pub struct TransferModule {
    config: ModuleConfig,
    registrations: RegistrationCache,
    tiers: FragmentTiers,
    callbacks: CallbackTable,
    transport: Arc<dyn Transport>,
}

impl TransferModule {
    /// Create a module, pinning with `mlock` when `lock_registrations` is set
    pub fn new(config: ModuleConfig) -> Result<Self> {
        let pinner: Arc<dyn MemoryPinner> = if config.lock_registrations {
            Arc::new(LockingPinner::new())
        } else {
            Arc::new(SoftwarePinner::new())
        };
        Self::with_pinner(config, pinner)
    }

    /// Create a module over a caller-supplied pinning primitive
    pub fn with_pinner(config: ModuleConfig, pinner: Arc<dyn MemoryPinner>) -> Result<Self> {
        config.validate()?;

        let registrations = RegistrationCache::new(pinner);
        let tiers = FragmentTiers::new(
            config.limits.eager_limit,
            config.limits.max_send_size,
            config.eager.clone(),
            config.max.clone(),
            &registrations,
        )?;

        info!(
            "transfer module up: eager {} bytes x {}, max {} bytes x {}, pinner {}",
            config.limits.eager_limit,
            config.eager.initial_count,
            config.limits.max_send_size,
            config.max.initial_count,
            registrations.pinner().type_name()
        );

        Ok(Self {
            config,
            registrations,
            tiers,
            callbacks: CallbackTable::new(),
            transport: Arc::new(StubTransport),
        })
    }

    /// Replace the transport binding
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        debug!("transport binding set to {}", transport.name());
        self.transport = transport;
        self
    }

    pub fn config(&self) -> &ModuleConfig {
        &self.config
    }

    pub fn limits(&self) -> ModuleLimits {
        self.config.limits
    }

    /// The module's registration cache
    pub fn registrations(&self) -> &RegistrationCache {
        &self.registrations
    }

    /// The module's receive-callback table
    pub fn callbacks(&self) -> &CallbackTable {
        &self.callbacks
    }

    /// Allocate a send descriptor of `size` bytes from a bounded tier.
    ///
    /// Sizes up to the eager limit come from the eager tier; larger sizes
    /// come from the max tier with the segment clamped to the max-send size.
    pub fn alloc(&self, size: usize) -> Result<Fragment> {
        let limits = self.limits();
        let (tier, length) = if size <= limits.eager_limit {
            (Tier::Eager, size)
        } else {
            (Tier::Max, size.min(limits.max_send_size))
        };

        let mut fragment = self.tiers.alloc(tier)?;
        let address = fragment.segment().address;
        fragment.set_source(Segment::new(address, length), 0, length);
        Ok(fragment)
    }

    /// Hand a descriptor back to its tier, releasing any registration share
    /// it carried.
    ///
    /// A fragment that this module's tiers do not own is rejected with
    /// `InvalidDescriptor`; no free-list is touched.
    pub fn free(&self, fragment: Fragment) -> Result<()> {
        match self.tiers.release(fragment)? {
            Some(registration) => self.registrations.release(registration),
            None => Ok(()),
        }
    }

    /// Prepare a send-side descriptor. See [`DescriptorEngine::prepare_source`].
    pub fn prepare_source(
        &self,
        endpoint: &Endpoint,
        registration: Option<&Registration>,
        convertor: &mut dyn Convertor,
        budget: ByteBudget,
    ) -> Result<Fragment> {
        self.engine()
            .prepare_source(endpoint, registration, convertor, budget)
    }

    /// Prepare a receive-side descriptor. See
    /// [`DescriptorEngine::prepare_destination`].
    pub fn prepare_destination(
        &self,
        endpoint: &Endpoint,
        registration: Option<&Registration>,
        convertor: &mut dyn Convertor,
        budget: ByteBudget,
    ) -> Result<Fragment> {
        self.engine()
            .prepare_destination(endpoint, registration, convertor, budget)
    }

    /// Store a receive callback for `tag`; the last registration wins
    pub fn register(
        &self,
        tag: Tag,
        callback: RecvCallback,
        data: CallbackData,
    ) -> Option<RecvRegistration> {
        self.callbacks.register(tag, callback, data)
    }

    /// Run the receive callback for an inbound descriptor
    pub fn deliver(&self, fragment: &Fragment, tag: Tag) -> bool {
        self.callbacks.deliver(fragment, tag)
    }

    pub fn send(&self, endpoint: &Endpoint, fragment: &Fragment, tag: Tag) -> Result<()> {
        self.transport.send(endpoint, fragment, tag)
    }

    pub fn put(&self, endpoint: &Endpoint, fragment: &Fragment) -> Result<()> {
        self.transport.put(endpoint, fragment)
    }

    pub fn get(&self, endpoint: &Endpoint, fragment: &Fragment) -> Result<()> {
        self.transport.get(endpoint, fragment)
    }

    /// Current statistics
    pub fn stats(&self) -> ModuleStats {
        ModuleStats {
            eager: self.tiers.stats(Tier::Eager),
            max: self.tiers.stats(Tier::Max),
            user: self.tiers.stats(Tier::User),
            registrations: self.registrations.stats(),
            callbacks: self.callbacks.registered_count(),
        }
    }

    /// Tear the module down.
    ///
    /// Tier memory is unpinned and unmapped once no outstanding fragment
    /// still references it. Consuming `self` makes a second call impossible.
    pub fn finalize(self) -> FinalizeReport {
        let Self {
            registrations,
            tiers,
            callbacks,
            transport,
            ..
        } = self;
        drop(callbacks);
        drop(transport);

        let (outstanding_eager, outstanding_max, outstanding_user) = tiers.shutdown();
        let report = FinalizeReport {
            outstanding_eager,
            outstanding_max,
            outstanding_user,
            live_registrations: registrations.live_count(),
        };

        if report.is_clean() {
            info!("transfer module finalized");
        } else {
            warn!("transfer module finalized with work outstanding: {:?}", report);
        }
        report
    }

    fn engine(&self) -> DescriptorEngine<'_> {
        DescriptorEngine::new(self.limits(), &self.tiers, &self.registrations)
    }
}
