//! Opaque peer handles

use std::{fmt, sync::Arc};

/// Identifier assigned by connection setup
pub type EndpointId = u64;

/// Addressable peer handle produced outside this crate. The core only
/// forwards it to the transport.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    id: EndpointId,
    name: Arc<str>,
}

impl Endpoint {
    /// Create an endpoint handle
    pub fn new(id: EndpointId, name: impl Into<Arc<str>>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }

    pub fn id(&self) -> EndpointId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.name, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_and_clone() {
        let endpoint = Endpoint::new(7, "rank-7");
        let copy = endpoint.clone();
        assert_eq!(copy, endpoint);
        assert_eq!(endpoint.to_string(), "rank-7#7");
        assert_eq!(endpoint.name(), "rank-7");
    }
}
