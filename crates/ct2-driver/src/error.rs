//! Error types for CT2 driver operations

use thiserror::Error;

/// Result type alias for CT2 operations
pub type Result<T> = std::result::Result<T, Ct2Error>;

/// Errors that can occur during CT2 operations
#[derive(Debug, Error)]
pub enum Ct2Error {
    /// Offset, count, or argument outside the accepted range
    #[error("Invalid argument: {reason}")]
    InvalidArgument {
        /// What was wrong with the argument
        reason: String,
    },

    /// Caller lacks the standing the operation requires
    #[error("Permission denied: {operation}")]
    PermissionDenied {
        /// Operation that was refused
        operation: String,
    },

    /// Device state prevents the operation right now
    #[error("Device busy: {reason}")]
    Busy {
        /// Why the operation cannot proceed
        reason: String,
    },

    /// An allocation was refused
    #[error("Out of memory allocating {resource}")]
    OutOfMemory {
        /// What could not be allocated
        resource: String,
    },

    /// A blocking acquisition was cancelled
    #[error("Operation interrupted while waiting")]
    Interrupted,

    /// Operation exists in the command surface but is not provided
    #[error("Not supported: {operation}")]
    NotSupported {
        /// Operation that is not provided
        operation: String,
    },

    /// The card itself reported a fault
    #[error("Hardware error: {reason}")]
    Hardware {
        /// Reason for failure
        reason: String,
    },

    /// Bring-up or bus-level failure
    #[error("Device error: {reason}")]
    Device {
        /// Reason for failure
        reason: String,
    },

    /// No CT2 cards detected on the system
    #[error("No CT2 cards detected")]
    NoDevicesFound,

    /// I/O error during device communication
    #[error("I/O error: {source}")]
    Io {
        /// Underlying I/O error
        #[from]
        source: std::io::Error,
    },
}

impl Ct2Error {
    /// Create an invalid argument error
    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            reason: reason.into(),
        }
    }

    /// Create a permission denied error
    pub fn permission_denied(operation: impl Into<String>) -> Self {
        Self::PermissionDenied {
            operation: operation.into(),
        }
    }

    /// Create a busy error
    pub fn busy(reason: impl Into<String>) -> Self {
        Self::Busy {
            reason: reason.into(),
        }
    }

    /// Create an out-of-memory error
    pub fn out_of_memory(resource: impl Into<String>) -> Self {
        Self::OutOfMemory {
            resource: resource.into(),
        }
    }

    /// Create a not supported error
    pub fn not_supported(operation: impl Into<String>) -> Self {
        Self::NotSupported {
            operation: operation.into(),
        }
    }

    /// Create a hardware error
    pub fn hardware(reason: impl Into<String>) -> Self {
        Self::Hardware {
            reason: reason.into(),
        }
    }

    /// Create a device error
    pub fn device(reason: impl Into<String>) -> Self {
        Self::Device {
            reason: reason.into(),
        }
    }
}
