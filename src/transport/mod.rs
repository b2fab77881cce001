//! Transport-facing surface: endpoints, the receive-callback table and the
//! send/put/get primitives.
//!
//! No hardware binding lives here. [`StubTransport`] answers every primitive
//! with `NotImplemented`; a real binding implements [`Transport`], issues the
//! operation and reports completion out of band.

pub mod callbacks;
pub mod endpoint;
pub mod primitives;

pub use callbacks::{CallbackData, CallbackTable, RecvCallback, RecvRegistration, Tag};
pub use endpoint::{Endpoint, EndpointId};
pub use primitives::{StubTransport, Transport};
