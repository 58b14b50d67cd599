//! Advertising payload content
//!
//! PDU construction is the transport's job; the policy layer only decides
//! what goes in the payload: the service identifier, the device name, and
//! a scan-response field of the form `<device-id>|<hex address>` used for
//! out-of-band identity confirmation (the same code the pairing display
//! renders).

use crate::config::PolicyConfig;
use crate::types::{PeerAddress, SERVICE_UUID};

// ----------------------------------------------------------------------------
// Advertising Payload
// ----------------------------------------------------------------------------

/// Content of the advertising and scan-response payloads
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertPayload {
    pub service_uuid: u16,
    pub device_name: String,
    /// `<device-id>|<hex-encoded address, display order>`
    pub scan_response: String,
}

impl AdvertPayload {
    pub fn build(config: &PolicyConfig, own_address: &PeerAddress) -> Self {
        Self {
            service_uuid: SERVICE_UUID,
            device_name: config.device_name.clone(),
            scan_response: format!("{}|{}", config.device_id, own_address.to_display_hex()),
        }
    }

    /// The out-of-band identity code shown on the pairing display
    pub fn identity_code(&self) -> &str {
        &self.scan_response
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
