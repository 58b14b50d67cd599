//! Core types for the commissioning policy layer
//!
//! Defines the fundamental identifiers used throughout the crate, using
//! newtype patterns for semantic validation and type safety.

use core::fmt;
use core::str::FromStr;
use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// Protocol Constants
// ----------------------------------------------------------------------------

/// 16-bit UUID of the primary commissioning service.
pub const SERVICE_UUID: u16 = 0x18F0;

/// 16-bit UUID of the scan-result (notify) characteristic.
pub const SCAN_RESULT_CHR_UUID: u16 = 0xA001;

/// 16-bit UUID of the credential-submit (write) characteristic.
pub const CREDENTIAL_CHR_UUID: u16 = 0xA002;

/// 16-bit UUID of the status (notify) characteristic.
pub const STATUS_CHR_UUID: u16 = 0xA005;

/// 16-bit UUID of the client characteristic configuration descriptor.
pub const CCCD_UUID: u16 = 0x2902;

// ----------------------------------------------------------------------------
// Peer Address
// ----------------------------------------------------------------------------

/// A 6-byte link-layer device address, stored in transmission (little-endian)
/// byte order. Display renders the conventional MSB-first form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerAddress([u8; 6]);

impl PeerAddress {
    /// Create a new address from 6 bytes in transmission order
    pub fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes in transmission order
    pub fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }

    /// Hex rendering in display (big-endian) order, no separators.
    /// This is the form embedded in the advertising scan response.
    pub fn to_display_hex(&self) -> String {
        let mut reversed = self.0;
        reversed.reverse();
        hex::encode_upper(reversed)
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            self.0[5], self.0[4], self.0[3], self.0[2], self.0[1], self.0[0]
        )
    }
}

impl FromStr for PeerAddress {
    type Err = crate::CommissionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let clean: String = s.chars().filter(|c| *c != ':').collect();
        let bytes = hex::decode(&clean)
            .map_err(|_| crate::CommissionError::invalid_address("invalid hex in address"))?;
        if bytes.len() != 6 {
            return Err(crate::CommissionError::invalid_address(
                "address must be exactly 6 bytes",
            ));
        }
        let mut addr = [0u8; 6];
        // Text form is MSB first; storage is transmission order.
        for (i, b) in bytes.iter().enumerate() {
            addr[5 - i] = *b;
        }
        Ok(Self(addr))
    }
}

// ----------------------------------------------------------------------------
// Address Type
// ----------------------------------------------------------------------------

/// Link-layer address type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AddrType {
    Public,
    Random,
}

/// Full peer identity as used by the bond store and the allow-list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerIdentity {
    pub address: PeerAddress,
    pub addr_type: AddrType,
}

impl PeerIdentity {
    pub fn new(address: PeerAddress, addr_type: AddrType) -> Self {
        Self { address, addr_type }
    }

    /// Whether this is a resolvable private address: random type with the
    /// two most significant bits of the top byte equal to `0b01`.
    pub fn is_resolvable_private(&self) -> bool {
        if self.addr_type != AddrType::Random {
            return false;
        }
        let msb = self.address.as_bytes()[5];
        (msb & 0xC0) == 0x40
    }
}

impl fmt::Display for PeerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.addr_type {
            AddrType::Public => "public",
            AddrType::Random => "random",
        };
        write!(f, "{} ({})", self.address, tag)
    }
}

// ----------------------------------------------------------------------------
// Channels
// ----------------------------------------------------------------------------

/// Application channels exposed by the primary service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelId {
    /// Fragmented scan-report payloads (notify only)
    ScanResult,
    /// Inbound commands and credentials (write only)
    CredentialSubmit,
    /// Single-token status strings (notify only)
    Status,
}

impl ChannelId {
    /// Map a 16-bit characteristic UUID to a channel, if known
    pub fn from_uuid(uuid: u16) -> Option<Self> {
        match uuid {
            SCAN_RESULT_CHR_UUID => Some(ChannelId::ScanResult),
            CREDENTIAL_CHR_UUID => Some(ChannelId::CredentialSubmit),
            STATUS_CHR_UUID => Some(ChannelId::Status),
            _ => None,
        }
    }

    pub fn uuid(&self) -> u16 {
        match self {
            ChannelId::ScanResult => SCAN_RESULT_CHR_UUID,
            ChannelId::CredentialSubmit => CREDENTIAL_CHR_UUID,
            ChannelId::Status => STATUS_CHR_UUID,
        }
    }

    /// Whether the channel supports notifications
    pub fn is_notify(&self) -> bool {
        matches!(self, ChannelId::ScanResult | ChannelId::Status)
    }
}

// ----------------------------------------------------------------------------
// Status Tokens
// ----------------------------------------------------------------------------

/// Status tokens delivered over the status channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WifiStatus {
    Unknown,
    WifiOk,
    WifiScanOk,
    WifiFail,
    PairingMode,
}

impl WifiStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WifiStatus::Unknown => "UNKNOWN",
            WifiStatus::WifiOk => "WIFI_OK",
            WifiStatus::WifiScanOk => "WIFI_SCAN_OK",
            WifiStatus::WifiFail => "WIFI_FAIL",
            WifiStatus::PairingMode => "PAIRING_MODE",
        }
    }
}

impl fmt::Display for WifiStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ----------------------------------------------------------------------------
// Advertising Mode
// ----------------------------------------------------------------------------

/// Advertising filter policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdvertisingMode {
    /// Connectable by anyone
    Unrestricted,
    /// Filtered to the allow-list of bonded identities
    Restricted,
}

impl fmt::Display for AdvertisingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdvertisingMode::Unrestricted => f.write_str("unrestricted"),
            AdvertisingMode::Restricted => f.write_str("restricted"),
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
