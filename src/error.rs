//! Error types and handling for Bytelane

use crate::fragment::Tier;

/// Result type alias for Bytelane operations
pub type Result<T> = std::result::Result<T, BytelaneError>;

/// Error kinds raised by the fragment pools, the registration cache and the
/// descriptor preparation engine
#[derive(Debug, thiserror::Error)]
pub enum BytelaneError {
    /// A fragment could not be obtained from a tier. Transient resource
    /// pressure: the caller may retry later.
    #[error("Allocation failed in {tier} tier: {message}")]
    AllocationFailed { tier: Tier, message: String },

    /// The pinning primitive refused the range
    #[error("Registration failed for {length} bytes at {address:#x}: {message}")]
    RegistrationFailed {
        address: usize,
        length: usize,
        message: String,
    },

    /// A descriptor was released to a tier that does not own it
    #[error("Invalid descriptor: {message}")]
    InvalidDescriptor { message: String },

    /// The transport primitive has no hardware binding
    #[error("Operation not implemented: {operation}")]
    NotImplemented { operation: &'static str },

    /// Invalid parameters or configuration
    #[error("Invalid parameter: {parameter} - {message}")]
    InvalidParameter { parameter: String, message: String },

    /// Backing memory could not be mapped
    #[error("Memory error: {message}")]
    Memory {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },
}

impl BytelaneError {
    /// Create an allocation failure for a tier
    pub fn allocation_failed(tier: Tier, message: impl Into<String>) -> Self {
        Self::AllocationFailed {
            tier,
            message: message.into(),
        }
    }

    /// Create a registration failure for a range
    pub fn registration_failed(address: usize, length: usize, message: impl Into<String>) -> Self {
        Self::RegistrationFailed {
            address,
            length,
            message: message.into(),
        }
    }

    /// Create an invalid descriptor error
    pub fn invalid_descriptor(message: impl Into<String>) -> Self {
        Self::InvalidDescriptor {
            message: message.into(),
        }
    }

    /// Create a not-implemented error for a transport primitive
    pub fn not_implemented(operation: &'static str) -> Self {
        Self::NotImplemented { operation }
    }

    /// Create an invalid parameter error
    pub fn invalid_parameter(parameter: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            parameter: parameter.into(),
            message: message.into(),
        }
    }

    /// Create a memory error
    pub fn memory(message: impl Into<String>) -> Self {
        Self::Memory {
            message: message.into(),
            source: None,
        }
    }

    /// Create a memory error from a standard I/O error
    pub fn from_io(source: std::io::Error, context: &str) -> Self {
        Self::Memory {
            message: format!("{}: {}", context, source),
            source: Some(source),
        }
    }

    /// Fold a registration failure into an allocation failure.
    ///
    /// Callers of the preparation engine cannot tell the two remedies apart,
    /// so both surface as `AllocationFailed` at that boundary.
    pub fn into_allocation_failure(self) -> Self {
        match self {
            Self::RegistrationFailed {
                address,
                length,
                message,
            } => Self::AllocationFailed {
                tier: Tier::User,
                message: format!(
                    "registration of {} bytes at {:#x} failed: {}",
                    length, address, message
                ),
            },
            other => other,
        }
    }

    /// Whether the caller may retry the operation later
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::AllocationFailed { .. } | Self::RegistrationFailed { .. }
        )
    }
}

impl From<std::io::Error> for BytelaneError {
    fn from(err: std::io::Error) -> Self {
        Self::from_io(err, "I/O operation failed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = BytelaneError::allocation_failed(Tier::Eager, "exhausted");
        assert!(matches!(err, BytelaneError::AllocationFailed { tier: Tier::Eager, .. }));

        let err = BytelaneError::invalid_descriptor("foreign slot");
        assert!(matches!(err, BytelaneError::InvalidDescriptor { .. }));

        let err = BytelaneError::not_implemented("get");
        assert!(!err.is_transient());
    }

    #[test]
    fn test_registration_folds_into_allocation() {
        let err =
            BytelaneError::registration_failed(0x1000, 64, "ENOMEM").into_allocation_failure();
        match err {
            BytelaneError::AllocationFailed { tier, message } => {
                assert_eq!(tier, Tier::User);
                assert!(message.contains("0x1000"));
                assert!(message.contains("ENOMEM"));
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let untouched = BytelaneError::not_implemented("send").into_allocation_failure();
        assert!(matches!(untouched, BytelaneError::NotImplemented { operation: "send" }));
    }

    #[test]
    fn test_error_display() {
        let err = BytelaneError::registration_failed(0xdead, 16, "invalid range");
        let display = format!("{}", err);
        assert!(display.contains("Registration failed"));
        assert!(display.contains("0xdead"));
        assert!(err.is_transient());
    }
}
