//! Send, put and get

use std::fmt;

use crate::{
    error::{BytelaneError, Result},
    fragment::Fragment,
};

use super::{callbacks::Tag, endpoint::Endpoint};

/// Hands prepared descriptors to an underlying transport.
///
/// Every primitive is fire-and-forget: it issues the operation and returns.
/// Completion is reported out of band, exactly once per descriptor, through
/// whatever mechanism the binding provides. The caller keeps ownership of
/// the fragment and hands it back through `free` once completion is seen.
pub trait Transport: Send + Sync + fmt::Debug {
    /// Send a source descriptor carrying `tag` to `endpoint`
    fn send(&self, endpoint: &Endpoint, fragment: &Fragment, tag: Tag) -> Result<()>;

    /// Write a source descriptor into the peer's memory
    fn put(&self, endpoint: &Endpoint, fragment: &Fragment) -> Result<()>;

    /// Read from the peer's memory into a destination descriptor
    fn get(&self, endpoint: &Endpoint, fragment: &Fragment) -> Result<()>;

    fn name(&self) -> &'static str;
}

/// Transport with no hardware binding
#[derive(Debug, Default, Clone, Copy)]
pub struct StubTransport;

impl Transport for StubTransport {
    fn send(&self, _endpoint: &Endpoint, _fragment: &Fragment, _tag: Tag) -> Result<()> {
        Err(BytelaneError::not_implemented("send"))
    }

    fn put(&self, _endpoint: &Endpoint, _fragment: &Fragment) -> Result<()> {
        Err(BytelaneError::not_implemented("put"))
    }

    fn get(&self, _endpoint: &Endpoint, _fragment: &Fragment) -> Result<()> {
        Err(BytelaneError::not_implemented("get"))
    }

    fn name(&self) -> &'static str {
        "stub"
    }
}
