//! Error types for the commissioning policy layer
//!
//! Each module owns its specific error enum; this module unifies them so
//! callers can bubble everything with `?`. Peer-triggered conditions are
//! answered on the wire, never panicked on.

use crate::command::CommandError;
use crate::fragment::TransportError;
use crate::runtime::HostError;
use crate::storage::StorageError;
use crate::wifi::WifiError;

// ----------------------------------------------------------------------------
// Unified Error Type
// ----------------------------------------------------------------------------

/// Top-level error for the commissioning policy layer
#[derive(Debug, thiserror::Error)]
pub enum CommissionError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Host transport error: {0}")]
    Host(#[from] HostError),

    #[error("Command error: {0}")]
    Command(#[from] CommandError),

    #[error("Network error: {0}")]
    Wifi(#[from] WifiError),

    #[error("Invalid address: {reason}")]
    InvalidAddress { reason: String },
}

impl CommissionError {
    /// Create an invalid address error with a reason
    pub fn invalid_address<T: Into<String>>(reason: T) -> Self {
        CommissionError::InvalidAddress {
            reason: reason.into(),
        }
    }
}

// ----------------------------------------------------------------------------
// Type Aliases
// ----------------------------------------------------------------------------

pub type Result<T> = core::result::Result<T, CommissionError>;
