//! # Bytelane - Data Path of a Byte-Transfer Transport
//!
//! Bytelane decides, for every outgoing or incoming payload, how it becomes a
//! transport-ready memory descriptor, and manages the pooled, registered
//! memory that backs those descriptors.
//!
//! ## Features
//!
//! - **Registration cache**: pin a range once, share it through
//!   reference-counted handles, unpin when the last holder lets go
//! - **Three fragment tiers**: pre-registered eager and max-send pools with
//!   bounded growth, plus unbounded wrappers over caller memory
//! - **Descriptor preparation**: an ordered rule list that prefers zero-copy
//!   binding over pooled copies
//! - **Transport seam**: send/put/get behind a trait, and a receive-callback
//!   table keyed by a one-byte tag
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                TransferModule                   │
//! ├─────────────────────────────────────────────────┤
//! │  DescriptorEngine        │  CallbackTable       │
//! │  - source rules          │  - 256 tags          │
//! │  - destination binding   │  Transport (stub)    │
//! └─────────────────────────────────────────────────┘
//!           │                         │
//!           ▼                         ▼
//! ┌─────────────────────────┐    ┌─────────────────┐
//! │  FragmentTiers          │───▶│ Registration    │
//! │  eager │ max │ user     │    │ Cache + Pinner  │
//! └─────────────────────────┘    └─────────────────┘
//! ```

// Core modules
pub mod error;
pub mod memory;
pub mod registration;
pub mod fragment;
pub mod convertor;

// Data path
pub mod prepare;
pub mod transport;
pub mod module;

// Main API re-exports
pub use error::{BytelaneError, Result};
pub use module::{
    FinalizeReport, ModuleConfig, ModuleConfigBuilder, ModuleLimits, ModuleStats, TransferModule,
};
pub use registration::{
    LockingPinner, MemoryPinner, PinHandle, Registration, RegistrationCache, RegistrationId,
    RegistrationStats, SoftwarePinner,
};
pub use fragment::{
    DescriptorFlags, Fragment, FragmentPool, FragmentTiers, Segment, SegmentRole, Tier, TierConfig,
    TierStats, UserTier,
};
pub use convertor::{ContiguousConvertor, Convertor, PackTarget, Packed, StridedConvertor};
pub use prepare::{select_source_path, ByteBudget, DescriptorEngine, SourceConditions, SourcePath};
pub use transport::{
    CallbackData, CallbackTable, Endpoint, EndpointId, RecvCallback, RecvRegistration,
    StubTransport, Tag, Transport,
};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration constants
pub mod config {
    /// Default alignment for slot strides
    pub const DEFAULT_ALIGNMENT: usize = 64;

    /// Default eager limit (4KB)
    pub const DEFAULT_EAGER_LIMIT: usize = 4 * 1024;

    /// Default max send size (64KB)
    pub const DEFAULT_MAX_SEND_SIZE: usize = 64 * 1024;

    /// Number of receive-callback tags
    pub const TAG_COUNT: usize = 256;
}
