//! Policy configuration
//!
//! All timeout and pacing values are policy constants rather than protocol
//! requirements, so they are configurable. Defaults match the shipped
//! firmware behavior.

use std::time::Duration;

// ----------------------------------------------------------------------------
// Configuration
// ----------------------------------------------------------------------------

/// Configuration for the link policy layer
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct PolicyConfig {
    /// Device name carried in the advertising payload
    pub device_name: String,
    /// Short device identifier prefixed to the scan-response field
    pub device_id: String,
    /// How long a pairing window stays open
    pub pairing_window: Duration,
    /// Timeout for a direct reconnection attempt to the preferred peer
    pub connect_timeout: Duration,
    /// Active scan window while hunting for bonded identities
    pub scan_window: Duration,
    /// Back-off between unsuccessful reconnection scans
    pub scan_backoff: Duration,
    /// Pacing delay inserted between outbound fragments
    pub chunk_pacing: Duration,
    /// Preferred transfer unit requested from the transport
    pub preferred_mtu: u16,
    /// Maximum accepted credential-submit write length in bytes
    pub max_credential_len: usize,
    /// Raw input sample debounce interval
    pub debounce: Duration,
    /// Hold duration that opens the pairing window
    pub medium_hold: Duration,
    /// Hold duration that triggers a full reset
    pub long_hold: Duration,
    /// Periodic tick granularity for soft deadlines
    pub tick_interval: Duration,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            device_name: "commissioner".to_string(),
            device_id: "CMSN".to_string(),
            pairing_window: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(10),
            scan_window: Duration::from_secs(5),
            scan_backoff: Duration::from_secs(5),
            chunk_pacing: Duration::from_millis(20),
            preferred_mtu: 247,
            max_credential_len: 127,
            debounce: Duration::from_millis(50),
            medium_hold: Duration::from_secs(2),
            long_hold: Duration::from_secs(5),
            tick_interval: Duration::from_millis(250),
        }
    }
}

impl PolicyConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the advertised device name
    pub fn with_device_name(mut self, name: impl Into<String>) -> Self {
        self.device_name = name.into();
        self
    }

    /// Set the scan-response device identifier
    pub fn with_device_id(mut self, id: impl Into<String>) -> Self {
        self.device_id = id.into();
        self
    }

    /// Set the pairing window duration
    pub fn with_pairing_window(mut self, window: Duration) -> Self {
        self.pairing_window = window;
        self
    }

    /// Set the direct reconnection timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the reconnection scan window
    pub fn with_scan_window(mut self, window: Duration) -> Self {
        self.scan_window = window;
        self
    }

    /// Set the back-off between reconnection scans
    pub fn with_scan_backoff(mut self, backoff: Duration) -> Self {
        self.scan_backoff = backoff;
        self
    }

    /// Set the inter-fragment pacing delay
    pub fn with_chunk_pacing(mut self, pacing: Duration) -> Self {
        self.chunk_pacing = pacing;
        self
    }

    /// Set the preferred transfer unit
    pub fn with_preferred_mtu(mut self, mtu: u16) -> Self {
        self.preferred_mtu = mtu;
        self
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_policy_constants() {
        let config = PolicyConfig::default();
        assert_eq!(config.pairing_window, Duration::from_secs(60));
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.scan_window, Duration::from_secs(5));
        assert_eq!(config.scan_backoff, Duration::from_secs(5));
        assert_eq!(config.chunk_pacing, Duration::from_millis(20));
        assert_eq!(config.preferred_mtu, 247);
        assert_eq!(config.max_credential_len, 127);
    }

    #[test]
    fn test_builder_setters() {
        let config = PolicyConfig::new()
            .with_device_name("lamp")
            .with_pairing_window(Duration::from_secs(5))
            .with_preferred_mtu(64);
        assert_eq!(config.device_name, "lamp");
        assert_eq!(config.pairing_window, Duration::from_secs(5));
        assert_eq!(config.preferred_mtu, 64);
    }
}
