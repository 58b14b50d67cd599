//! Link runtime
//!
//! Owns the single event-processing task: every transport callback, input
//! event, and tick is funneled through one channel and consumed serially
//! by the link state machine, so no policy state is ever mutated from two
//! contexts. Effects returned by the machine are executed here against the
//! host transport, the station stack, and the pairing display. Long
//! operations (scan, join) are spawned and complete as later events; the
//! loop itself never blocks on them.

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::access::DenyReason;
use crate::advertise::AdvertPayload;
use crate::config::PolicyConfig;
use crate::fragment::{FragmentTransport, NotifySink, TransportError};
use crate::link::{Effect, LinkEvent, LinkStateMachine};
use crate::storage::KeyValueStore;
use crate::types::{AdvertisingMode, ChannelId, PeerAddress, PeerIdentity};
use crate::wifi::WifiStation;

// ----------------------------------------------------------------------------
// Error Types
// ----------------------------------------------------------------------------

/// Failures reported by the host transport. All of these are transients:
/// the state machine falls through to its next policy stage rather than
/// aborting.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("Advertising failed: {0}")]
    AdvertisingFailed(String),

    #[error("Connection initiation failed: {0}")]
    ConnectFailed(String),

    #[error("Scan start failed: {0}")]
    ScanFailed(String),

    #[error("Pairing initiation failed: {0}")]
    PairingFailed(String),

    #[error("Allow-list update failed: {0}")]
    AllowListFailed(String),

    #[error("Attribute response failed: {0}")]
    ResponseFailed(String),

    #[error("Link termination failed: {0}")]
    TerminateFailed(String),
}

// ----------------------------------------------------------------------------
// Host Collaborators
// ----------------------------------------------------------------------------

/// The radio/transport stack, driven by effects. Connection, pairing, and
/// scan operations are initiations only; their outcomes arrive later as
/// `LinkEvent`s on the runtime channel.
#[async_trait]
pub trait HostTransport: NotifySink {
    /// Our own identity address
    fn own_address(&self) -> PeerAddress;

    async fn start_advertising(
        &self,
        payload: &AdvertPayload,
        mode: AdvertisingMode,
    ) -> Result<(), HostError>;

    async fn stop_advertising(&self) -> Result<(), HostError>;

    /// Begin a direct connection attempt with a bounded timeout
    async fn connect(&self, peer: PeerIdentity, timeout: Duration) -> Result<(), HostError>;

    async fn cancel_connect(&self) -> Result<(), HostError>;

    /// Begin an active scan with duplicate filtering
    async fn start_scan(&self, window: Duration) -> Result<(), HostError>;

    async fn cancel_scan(&self) -> Result<(), HostError>;

    /// Drop the current link
    async fn terminate_link(&self) -> Result<(), HostError>;

    /// Initiate security on the current link
    async fn initiate_pairing(&self) -> Result<(), HostError>;

    /// Answer a repeat-pairing request: retry it or ignore it
    async fn respond_repeat_pairing(&self, retry: bool) -> Result<(), HostError>;

    /// Replace the connection filter list; an empty slice clears it
    async fn set_allow_list(&self, peers: &[PeerIdentity]) -> Result<(), HostError>;

    /// Complete an attribute operation at the wire level
    async fn respond_access(
        &self,
        result: Result<Option<Vec<u8>>, DenyReason>,
    ) -> Result<(), HostError>;
}

/// Out-of-band pairing identifier renderer (code matrix, printed label)
pub trait PairingDisplay: Send + Sync {
    fn refresh(&self, identity_code: &str);
}

// ----------------------------------------------------------------------------
// Runtime
// ----------------------------------------------------------------------------

/// Drives the link state machine from a serialized event stream
pub struct LinkRuntime {
    machine: LinkStateMachine,
    transport: Arc<dyn HostTransport>,
    wifi: Arc<dyn WifiStation>,
    display: Arc<dyn PairingDisplay>,
    fragment: FragmentTransport,
    advert: AdvertPayload,
    events: mpsc::UnboundedReceiver<LinkEvent>,
    /// Weak so the loop stops once every external sender is gone
    events_tx: mpsc::WeakUnboundedSender<LinkEvent>,
}

impl LinkRuntime {
    /// Build the runtime and the sender that feeds it. The returned sender
    /// is the only mutation path into policy state; clone it for the
    /// transport callback shim and the input sampling task.
    pub fn new(
        config: PolicyConfig,
        kv: Box<dyn KeyValueStore>,
        transport: Arc<dyn HostTransport>,
        wifi: Arc<dyn WifiStation>,
        display: Arc<dyn PairingDisplay>,
    ) -> (Self, mpsc::UnboundedSender<LinkEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let advert = AdvertPayload::build(&config, &transport.own_address());
        let fragment = FragmentTransport::new(config.chunk_pacing);
        let machine = LinkStateMachine::new(config, kv);
        let runtime = Self {
            machine,
            transport,
            wifi,
            display,
            fragment,
            advert,
            events: rx,
            events_tx: tx.downgrade(),
        };
        (runtime, tx)
    }

    /// Read-only view of the machine for assertions and diagnostics
    pub fn machine(&self) -> &LinkStateMachine {
        &self.machine
    }

    /// Process events until every sender is dropped
    pub async fn run(mut self) {
        info!(advert = %self.advert.scan_response, "link runtime starting");
        let effects = self.machine.bootstrap();
        self.execute(effects).await;

        let mut tick = tokio::time::interval(self.machine.config().tick_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                event = self.events.recv() => {
                    let Some(event) = event else {
                        info!("event channel closed, link runtime stopping");
                        break;
                    };
                    let (now, epoch_secs) = clock();
                    let effects = self.machine.handle_event(event, now, epoch_secs);
                    self.execute(effects).await;
                }
                _ = tick.tick() => {
                    let (now, epoch_secs) = clock();
                    let effects = self.machine.handle_event(LinkEvent::Tick, now, epoch_secs);
                    self.execute(effects).await;
                }
            }
        }
    }

    /// Post a follow-up event back onto the serialized channel
    fn post(&self, event: LinkEvent) {
        if let Some(tx) = self.events_tx.upgrade() {
            let _ = tx.send(event);
        }
    }

    async fn execute(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            self.apply(effect).await;
        }
    }

    async fn apply(&mut self, effect: Effect) {
        match effect {
            Effect::StartAdvertising { mode } => {
                if let Err(err) = self.transport.start_advertising(&self.advert, mode).await {
                    warn!(%err, %mode, "advertising not started");
                }
            }
            Effect::StopAdvertising => {
                if let Err(err) = self.transport.stop_advertising().await {
                    debug!(%err, "advertising stop reported failure");
                }
            }
            Effect::Connect { peer, timeout } => {
                if let Err(err) = self.transport.connect(peer, timeout).await {
                    warn!(%err, %peer, "connection initiation failed");
                    self.post(LinkEvent::ConnectFailed {
                        reason: err.to_string(),
                    });
                }
            }
            Effect::CancelConnect => {
                if let Err(err) = self.transport.cancel_connect().await {
                    debug!(%err, "connect cancel reported failure");
                }
            }
            Effect::StartScan { window } => {
                if let Err(err) = self.transport.start_scan(window).await {
                    warn!(%err, "scan start failed");
                    self.post(LinkEvent::ScanComplete);
                }
            }
            Effect::CancelScan => {
                if let Err(err) = self.transport.cancel_scan().await {
                    debug!(%err, "scan cancel reported failure");
                }
            }
            Effect::TerminateLink => {
                if let Err(err) = self.transport.terminate_link().await {
                    warn!(%err, "link termination failed");
                }
            }
            Effect::InitiatePairing => {
                if let Err(err) = self.transport.initiate_pairing().await {
                    warn!(%err, "pairing initiation failed, dropping link");
                    let _ = self.transport.terminate_link().await;
                }
            }
            Effect::RespondRepeatPairing { retry } => {
                if let Err(err) = self.transport.respond_repeat_pairing(retry).await {
                    debug!(%err, "repeat-pairing response failed");
                }
            }
            Effect::SetAllowList { peers } => {
                if let Err(err) = self.transport.set_allow_list(&peers).await {
                    warn!(%err, "allow-list refresh failed");
                }
            }
            Effect::ClearAllowList => {
                if let Err(err) = self.transport.set_allow_list(&[]).await {
                    warn!(%err, "allow-list clear failed");
                }
            }
            Effect::RespondAccess { result } => {
                if let Err(err) = self.transport.respond_access(result).await {
                    warn!(%err, "attribute response failed");
                }
            }
            Effect::NotifyStatus { status } => {
                let ctx = self.machine.send_context(ChannelId::Status);
                match self
                    .fragment
                    .send(
                        self.transport.as_ref(),
                        ChannelId::Status,
                        status.as_str().as_bytes(),
                        ctx,
                    )
                    .await
                {
                    Ok(()) => debug!(%status, "status notified"),
                    Err(TransportError::NotReady) => {
                        debug!(%status, "status dropped, channel not ready")
                    }
                    Err(err) => warn!(%err, %status, "status delivery failed"),
                }
            }
            Effect::DeliverScanReport { report } => {
                let ctx = self.machine.send_context(ChannelId::ScanResult);
                let wire = report.to_wire();
                match self
                    .fragment
                    .send(self.transport.as_ref(), ChannelId::ScanResult, &wire, ctx)
                    .await
                {
                    Ok(()) => {
                        debug!(networks = report.networks.len(), bytes = wire.len(), "scan report delivered")
                    }
                    // The whole payload must be re-requested by the peer
                    Err(err) => warn!(%err, "scan report not delivered"),
                }
            }
            Effect::StartWifiScan => {
                let wifi = Arc::clone(&self.wifi);
                let tx = self.events_tx.clone();
                tokio::spawn(async move {
                    let event = match wifi.scan().await {
                        Ok(report) => LinkEvent::WifiScanCompleted(report),
                        Err(err) => LinkEvent::WifiScanFailed {
                            reason: err.to_string(),
                        },
                    };
                    if let Some(tx) = tx.upgrade() {
                        let _ = tx.send(event);
                    }
                });
            }
            Effect::JoinNetwork { ssid, password } => {
                let wifi = Arc::clone(&self.wifi);
                let tx = self.events_tx.clone();
                tokio::spawn(async move {
                    let event = match wifi.join(&ssid, &password).await {
                        Ok(()) => LinkEvent::WifiJoined,
                        Err(err) => LinkEvent::WifiLost {
                            reason: err.to_string(),
                        },
                    };
                    if let Some(tx) = tx.upgrade() {
                        let _ = tx.send(event);
                    }
                });
            }
            Effect::RefreshPairingDisplay => {
                self.display.refresh(self.advert.identity_code());
            }
        }
    }
}

/// Wall clock pair used to stamp events
fn clock() -> (Instant, u64) {
    let epoch_secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    (Instant::now(), epoch_secs)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragment::NotifyError;
    use crate::storage::MemoryStore;
    use crate::types::{AddrType, WifiStatus};
    use crate::wifi::{AuthMode, ScanReport, WifiError, WifiNetwork};
    use std::sync::Mutex;

    #[derive(Default)]
    struct MockTransport {
        calls: Mutex<Vec<String>>,
        notifies: Mutex<Vec<(ChannelId, Vec<u8>)>>,
    }

    impl MockTransport {
        fn log(&self, entry: impl Into<String>) {
            self.calls.lock().unwrap().push(entry.into());
        }
    }

    #[async_trait]
    impl NotifySink for MockTransport {
        async fn notify(&self, channel: ChannelId, chunk: &[u8]) -> Result<(), NotifyError> {
            self.notifies.lock().unwrap().push((channel, chunk.to_vec()));
            Ok(())
        }
    }

    #[async_trait]
    impl HostTransport for MockTransport {
        fn own_address(&self) -> PeerAddress {
            PeerAddress::new([0x01, 0x02, 0x03, 0x04, 0x05, 0x06])
        }

        async fn start_advertising(
            &self,
            _payload: &AdvertPayload,
            mode: AdvertisingMode,
        ) -> Result<(), HostError> {
            self.log(format!("advertise:{mode}"));
            Ok(())
        }

        async fn stop_advertising(&self) -> Result<(), HostError> {
            self.log("stop_advertising");
            Ok(())
        }

        async fn connect(&self, peer: PeerIdentity, _timeout: Duration) -> Result<(), HostError> {
            self.log(format!("connect:{peer}"));
            Ok(())
        }

        async fn cancel_connect(&self) -> Result<(), HostError> {
            self.log("cancel_connect");
            Ok(())
        }

        async fn start_scan(&self, _window: Duration) -> Result<(), HostError> {
            self.log("start_scan");
            Ok(())
        }

        async fn cancel_scan(&self) -> Result<(), HostError> {
            self.log("cancel_scan");
            Ok(())
        }

        async fn terminate_link(&self) -> Result<(), HostError> {
            self.log("terminate");
            Ok(())
        }

        async fn initiate_pairing(&self) -> Result<(), HostError> {
            self.log("initiate_pairing");
            Ok(())
        }

        async fn respond_repeat_pairing(&self, retry: bool) -> Result<(), HostError> {
            self.log(format!("repeat_pairing:{retry}"));
            Ok(())
        }

        async fn set_allow_list(&self, peers: &[PeerIdentity]) -> Result<(), HostError> {
            self.log(format!("allow_list:{}", peers.len()));
            Ok(())
        }

        async fn respond_access(
            &self,
            _result: Result<Option<Vec<u8>>, DenyReason>,
        ) -> Result<(), HostError> {
            self.log("respond_access");
            Ok(())
        }
    }

    struct MockWifi {
        report: ScanReport,
    }

    #[async_trait]
    impl WifiStation for MockWifi {
        async fn scan(&self) -> Result<ScanReport, WifiError> {
            Ok(self.report.clone())
        }

        async fn join(&self, _ssid: &str, _password: &str) -> Result<(), WifiError> {
            Ok(())
        }
    }

    struct NullDisplay;

    impl PairingDisplay for NullDisplay {
        fn refresh(&self, _identity_code: &str) {}
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_commissioning_round_trip() {
        let transport = Arc::new(MockTransport::default());
        let report = ScanReport {
            networks: vec![WifiNetwork {
                ssid: "home".to_string(),
                rssi: -40,
                channel: 1,
                auth: AuthMode::Wpa2,
            }],
        };
        let wifi = Arc::new(MockWifi { report: report.clone() });
        let config = PolicyConfig::default()
            .with_chunk_pacing(Duration::from_millis(1))
            .with_preferred_mtu(23);

        let (runtime, tx) = LinkRuntime::new(
            config,
            Box::new(MemoryStore::new()),
            transport.clone(),
            wifi,
            Arc::new(NullDisplay),
        );
        let handle = tokio::spawn(runtime.run());

        let peer = PeerIdentity::new(
            PeerAddress::new([9, 9, 9, 9, 9, 9]),
            AddrType::Random,
        );
        tx.send(LinkEvent::ConnectionEstablished { peer }).unwrap();
        tx.send(LinkEvent::SubscriptionChanged {
            channel: ChannelId::ScanResult,
            enabled: true,
        })
        .unwrap();
        tx.send(LinkEvent::SubscriptionChanged {
            channel: ChannelId::Status,
            enabled: true,
        })
        .unwrap();

        // Let the spawned scan complete and the report flow back out
        tokio::time::sleep(Duration::from_millis(300)).await;

        {
            let calls = transport.calls.lock().unwrap();
            assert!(calls.iter().any(|c| c == "advertise:unrestricted"));
            assert!(calls.iter().any(|c| c == "initiate_pairing"));
        }
        {
            let notifies = transport.notifies.lock().unwrap();
            let scan_bytes: Vec<u8> = notifies
                .iter()
                .filter(|(ch, _)| *ch == ChannelId::ScanResult)
                .flat_map(|(_, chunk)| chunk.clone())
                .collect();
            assert_eq!(scan_bytes, report.to_wire());
            assert!(notifies
                .iter()
                .any(|(ch, data)| *ch == ChannelId::Status
                    && data == WifiStatus::WifiScanOk.as_str().as_bytes()));
        }

        drop(tx);
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("runtime stops when senders drop")
            .unwrap();
    }
}
