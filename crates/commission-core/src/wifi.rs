//! Station-side collaborator interface and scan-report wire format
//!
//! The network stack that validates credentials is external; the policy
//! layer only defines the trait it is driven through, the JSON shape of
//! scan reports, and the persisted credential entries.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::storage::KeyValueStore;

/// Persisted credential keys in the key/value service
pub const SSID_KEY: &str = "wifi.ssid";
pub const PASSWORD_KEY: &str = "wifi.password";

/// Station-stack limits on credential fields
pub const MAX_SSID_LEN: usize = 32;
pub const MAX_PASSWORD_LEN: usize = 63;

// ----------------------------------------------------------------------------
// Error Types
// ----------------------------------------------------------------------------

/// Errors surfaced by the station-side collaborator
#[derive(Debug, Error)]
pub enum WifiError {
    #[error("Station interface not started")]
    NotStarted,

    #[error("Scan failed: {0}")]
    ScanFailed(String),

    #[error("Join failed: {0}")]
    JoinFailed(String),
}

// ----------------------------------------------------------------------------
// Scan Report Wire Format
// ----------------------------------------------------------------------------

/// Authentication mode of a discovered network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthMode {
    #[serde(rename = "OPEN")]
    Open,
    #[serde(rename = "WEP")]
    Wep,
    #[serde(rename = "WPA")]
    Wpa,
    #[serde(rename = "WPA2")]
    Wpa2,
    #[serde(rename = "WPA/WPA2")]
    WpaWpa2,
    #[serde(rename = "WPA2-Enterprise")]
    Wpa2Enterprise,
    #[serde(rename = "WPA3")]
    Wpa3,
    #[serde(rename = "WPA2/WPA3")]
    Wpa2Wpa3,
    #[serde(rename = "UNKNOWN")]
    Unknown,
}

/// A single discovered network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WifiNetwork {
    pub ssid: String,
    pub rssi: i8,
    pub channel: u8,
    pub auth: AuthMode,
}

/// The full scan result shipped over the scan-result channel
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanReport {
    pub networks: Vec<WifiNetwork>,
}

impl ScanReport {
    /// Serialize to the compact JSON wire form
    pub fn to_wire(&self) -> Vec<u8> {
        // ScanReport has no map keys that can fail to serialize
        serde_json::to_vec(self).unwrap_or_else(|_| b"{\"networks\":[]}".to_vec())
    }
}

// ----------------------------------------------------------------------------
// Station Collaborator
// ----------------------------------------------------------------------------

/// Driver interface for the station-mode network stack
#[async_trait]
pub trait WifiStation: Send + Sync {
    /// Run a blocking scan and return the discovered networks
    async fn scan(&self) -> Result<ScanReport, WifiError>;

    /// Attempt to join a network. Resolution (got address / failed) is
    /// reported back through the event channel by the runtime.
    async fn join(&self, ssid: &str, password: &str) -> Result<(), WifiError>;
}

// ----------------------------------------------------------------------------
// Saved Credentials
// ----------------------------------------------------------------------------

/// Saved network identity and secret, persisted as two string entries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedCredentials {
    pub ssid: String,
    pub password: String,
}

impl SavedCredentials {
    /// Load from the key/value service. A read failure or non-UTF-8 entry
    /// is treated as "nothing saved".
    pub fn load(kv: &dyn KeyValueStore) -> Option<Self> {
        let read = |key: &str| -> Option<String> {
            match kv.get(key) {
                Ok(Some(raw)) => String::from_utf8(raw).ok(),
                Ok(None) => None,
                Err(err) => {
                    warn!(key, %err, "credential read failed, treating as absent");
                    None
                }
            }
        };
        let ssid = read(SSID_KEY)?;
        if ssid.is_empty() {
            return None;
        }
        let password = read(PASSWORD_KEY).unwrap_or_default();
        Some(Self { ssid, password })
    }

    /// Persist both entries synchronously. Failure is logged and the
    /// credentials simply do not survive a restart.
    pub fn store(&self, kv: &mut dyn KeyValueStore) {
        if let Err(err) = kv.put(SSID_KEY, self.ssid.clone().into_bytes()) {
            warn!(%err, "failed to persist network identity");
            return;
        }
        if let Err(err) = kv.put(PASSWORD_KEY, self.password.clone().into_bytes()) {
            warn!(%err, "failed to persist network secret");
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
