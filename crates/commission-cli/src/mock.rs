//! In-process collaborators for the demo session
//!
//! A transport that logs every operation instead of touching a radio, a
//! station stack that answers with canned networks, and a display that
//! prints the pairing code to the console.

use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use commission_core::fragment::NotifyError;
use commission_core::{
    AdvertPayload, AdvertisingMode, AuthMode, ChannelId, DenyReason, HostError, HostTransport,
    NotifySink, PairingDisplay, PeerAddress, PeerIdentity, ScanReport, WifiError, WifiNetwork,
    WifiStation,
};

// ----------------------------------------------------------------------------
// Simulated Transport
// ----------------------------------------------------------------------------

pub struct SimTransport {
    own_address: PeerAddress,
}

impl SimTransport {
    pub fn new(own_address: PeerAddress) -> Self {
        Self { own_address }
    }
}

#[async_trait]
impl NotifySink for SimTransport {
    async fn notify(&self, channel: ChannelId, chunk: &[u8]) -> Result<(), NotifyError> {
        info!(
            ?channel,
            bytes = chunk.len(),
            data = %String::from_utf8_lossy(chunk),
            "notify"
        );
        Ok(())
    }
}

#[async_trait]
impl HostTransport for SimTransport {
    fn own_address(&self) -> PeerAddress {
        self.own_address
    }

    async fn start_advertising(
        &self,
        payload: &AdvertPayload,
        mode: AdvertisingMode,
    ) -> Result<(), HostError> {
        info!(%mode, name = %payload.device_name, scan_rsp = %payload.scan_response, "advertising started");
        Ok(())
    }

    async fn stop_advertising(&self) -> Result<(), HostError> {
        info!("advertising stopped");
        Ok(())
    }

    async fn connect(&self, peer: PeerIdentity, timeout: Duration) -> Result<(), HostError> {
        info!(%peer, timeout_secs = timeout.as_secs(), "direct connection attempt");
        Ok(())
    }

    async fn cancel_connect(&self) -> Result<(), HostError> {
        info!("outbound connect cancelled");
        Ok(())
    }

    async fn start_scan(&self, window: Duration) -> Result<(), HostError> {
        info!(window_secs = window.as_secs(), "active scan started");
        Ok(())
    }

    async fn cancel_scan(&self) -> Result<(), HostError> {
        info!("active scan cancelled");
        Ok(())
    }

    async fn terminate_link(&self) -> Result<(), HostError> {
        info!("link terminated");
        Ok(())
    }

    async fn initiate_pairing(&self) -> Result<(), HostError> {
        info!("pairing initiated");
        Ok(())
    }

    async fn respond_repeat_pairing(&self, retry: bool) -> Result<(), HostError> {
        info!(retry, "repeat pairing answered");
        Ok(())
    }

    async fn set_allow_list(&self, peers: &[PeerIdentity]) -> Result<(), HostError> {
        info!(count = peers.len(), "allow-list updated");
        Ok(())
    }

    async fn respond_access(
        &self,
        result: Result<Option<Vec<u8>>, DenyReason>,
    ) -> Result<(), HostError> {
        match result {
            Ok(_) => info!("attribute operation accepted"),
            Err(reason) => info!(?reason, code = reason.att_code(), "attribute operation denied"),
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Simulated Station Stack
// ----------------------------------------------------------------------------

pub struct SimWifi;

#[async_trait]
impl WifiStation for SimWifi {
    async fn scan(&self) -> Result<ScanReport, WifiError> {
        tokio::time::sleep(Duration::from_millis(150)).await;
        Ok(ScanReport {
            networks: vec![
                WifiNetwork {
                    ssid: "demo-net".to_string(),
                    rssi: -38,
                    channel: 6,
                    auth: AuthMode::Wpa2,
                },
                WifiNetwork {
                    ssid: "guest".to_string(),
                    rssi: -71,
                    channel: 11,
                    auth: AuthMode::Open,
                },
            ],
        })
    }

    async fn join(&self, ssid: &str, _password: &str) -> Result<(), WifiError> {
        tokio::time::sleep(Duration::from_millis(100)).await;
        if ssid == "demo-net" {
            Ok(())
        } else {
            Err(WifiError::JoinFailed(format!("no such network: {ssid}")))
        }
    }
}

// ----------------------------------------------------------------------------
// Console Display
// ----------------------------------------------------------------------------

pub struct ConsoleDisplay;

impl PairingDisplay for ConsoleDisplay {
    fn refresh(&self, identity_code: &str) {
        info!(code = identity_code, "pairing display refreshed");
    }
}
