//! Link state machine
//!
//! Top-level controller for the peripheral's link lifecycle: advertising
//! mode selection, connect/reconnect/disconnect transitions, pairing
//! policy, and command handling. Transport callbacks arrive as a closed
//! event enum; each event is consumed by `handle_event`, which mutates the
//! owned context and returns the effects the runtime must execute against
//! the transport. The machine itself never blocks and is testable without
//! a transport.

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::access::{AccessGate, AccessOp, AttributeId, DenyReason, GateVerdict, Subscriptions};
use crate::bond::BondStore;
use crate::command::CredentialCommand;
use crate::config::PolicyConfig;
use crate::debounce::ButtonPress;
use crate::fragment::SendContext;
use crate::pairing::PairingWindow;
use crate::storage::KeyValueStore;
use crate::types::{AdvertisingMode, ChannelId, PeerIdentity, WifiStatus};
use crate::wifi::{SavedCredentials, ScanReport};

// ----------------------------------------------------------------------------
// Phases and Snapshot
// ----------------------------------------------------------------------------

/// Coarse link phase. `Connected` and `Scanning` are mutually exclusive by
/// construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkPhase {
    Disconnected,
    Advertising(AdvertisingMode),
    Connecting,
    Scanning,
    Connected,
}

/// Snapshot of the link state fields for observers and tests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkState {
    pub connected: bool,
    pub bonded: bool,
    pub transfer_unit: u16,
    pub allow_new_bonding: bool,
    pub reconnect_in_progress: bool,
    pub active_scan_in_progress: bool,
}

// ----------------------------------------------------------------------------
// Events
// ----------------------------------------------------------------------------

/// Transport callbacks and local triggers, serialized onto one event
/// channel
#[derive(Debug, Clone)]
pub enum LinkEvent {
    /// An inbound or outbound connection completed
    ConnectionEstablished { peer: PeerIdentity },
    /// An outbound connection attempt failed or timed out
    ConnectFailed { reason: String },
    /// The established link dropped
    Disconnected { reason: String },
    /// Mutual authentication confirmed by the transport
    PairingComplete { peer: PeerIdentity },
    /// The transport denied pairing on the current link
    PairingFailed { peer: PeerIdentity, reason: String },
    /// A peer asked to pair again over an existing bond
    RepeatPairingRequest { peer: PeerIdentity },
    /// Transfer unit renegotiated
    TransferUnitChanged { transfer_unit: u16 },
    /// Advertisement observed during an active scan
    AdvertisementObserved { peer: PeerIdentity },
    /// The active scan window elapsed with no connection
    ScanComplete,
    /// Transport-level subscription change on a notify channel
    SubscriptionChanged { channel: ChannelId, enabled: bool },
    /// Characteristic or descriptor operation from the peer
    AttributeAccess {
        attribute: AttributeId,
        op: AccessOp,
        payload: Vec<u8>,
    },
    /// Debounced local input
    Button(ButtonPress),
    /// Host application asked to drop the link
    DisconnectRequested,
    /// Station-side scan finished
    WifiScanCompleted(ScanReport),
    /// Station-side scan could not run
    WifiScanFailed { reason: String },
    /// Station joined the network and obtained an address
    WifiJoined,
    /// Station join failed or the network connection dropped
    WifiLost { reason: String },
    /// Periodic soft-deadline tick
    Tick,
}

// ----------------------------------------------------------------------------
// Effects
// ----------------------------------------------------------------------------

/// Commands the runtime executes against the transport and collaborators
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    StartAdvertising { mode: AdvertisingMode },
    StopAdvertising,
    Connect { peer: PeerIdentity, timeout: Duration },
    CancelConnect,
    StartScan { window: Duration },
    CancelScan,
    TerminateLink,
    InitiatePairing,
    RespondRepeatPairing { retry: bool },
    SetAllowList { peers: Vec<PeerIdentity> },
    ClearAllowList,
    /// Answer an attribute operation at the wire level
    RespondAccess {
        result: Result<Option<Vec<u8>>, DenyReason>,
    },
    /// Best-effort single-token status notification
    NotifyStatus { status: WifiStatus },
    /// Fragmented scan-report delivery
    DeliverScanReport { report: ScanReport },
    StartWifiScan,
    JoinNetwork { ssid: String, password: String },
    RefreshPairingDisplay,
}

// ----------------------------------------------------------------------------
// State Machine
// ----------------------------------------------------------------------------

/// Owns every piece of mutable link policy state. All mutation funnels
/// through `handle_event` on the single event-processing task.
pub struct LinkStateMachine {
    config: PolicyConfig,
    kv: Box<dyn KeyValueStore>,
    store: BondStore,
    gate: AccessGate,
    window: PairingWindow,
    phase: LinkPhase,
    adv_mode: AdvertisingMode,
    transfer_unit: u16,
    allow_new_bonding: bool,
    reconnect_in_progress: bool,
    rescan_at: Option<Instant>,
    wifi_scan_running: bool,
    current_peer: Option<PeerIdentity>,
}

impl LinkStateMachine {
    /// Build the machine, loading bonded peers from the key/value service.
    /// A factory-fresh device (empty store) accepts new bonds without a
    /// pairing window; once any peer is bonded, bonding requires the
    /// window.
    pub fn new(config: PolicyConfig, kv: Box<dyn KeyValueStore>) -> Self {
        let store = BondStore::load(kv.as_ref());
        let allow_new_bonding = store.is_empty();
        let adv_mode = if store.is_empty() {
            AdvertisingMode::Unrestricted
        } else {
            AdvertisingMode::Restricted
        };
        let gate = AccessGate::new(config.max_credential_len);
        let window = PairingWindow::new(config.pairing_window);
        let transfer_unit = config.preferred_mtu;
        Self {
            config,
            kv,
            store,
            gate,
            window,
            phase: LinkPhase::Disconnected,
            adv_mode,
            transfer_unit,
            allow_new_bonding,
            reconnect_in_progress: false,
            rescan_at: None,
            wifi_scan_running: false,
            current_peer: None,
        }
    }

    // ------------------------------------------------------------------
    // Observers
    // ------------------------------------------------------------------

    pub fn phase(&self) -> LinkPhase {
        self.phase
    }

    pub fn is_connected(&self) -> bool {
        self.phase == LinkPhase::Connected
    }

    pub fn subscriptions(&self) -> Subscriptions {
        self.gate.subscriptions()
    }

    pub fn bond_store(&self) -> &BondStore {
        &self.store
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    /// Current peer on the active link, if any
    pub fn current_peer(&self) -> Option<PeerIdentity> {
        self.current_peer
    }

    /// Snapshot of the data-model state fields
    pub fn state(&self) -> LinkState {
        LinkState {
            connected: self.is_connected(),
            bonded: !self.store.is_empty(),
            transfer_unit: self.transfer_unit,
            allow_new_bonding: self.allow_new_bonding,
            reconnect_in_progress: self.reconnect_in_progress,
            active_scan_in_progress: self.phase == LinkPhase::Scanning,
        }
    }

    /// Send-time preconditions for a notify channel
    pub fn send_context(&self, channel: ChannelId) -> SendContext {
        SendContext {
            connected: self.is_connected(),
            subscribed: self.gate.subscriptions().get(channel),
            transfer_unit: self.transfer_unit,
        }
    }

    /// Advertising mode policy: restricted once anything is bonded, unless
    /// a pairing window is open
    fn advertising_mode(&self) -> AdvertisingMode {
        if self.store.is_empty() || self.window.is_open() {
            AdvertisingMode::Unrestricted
        } else {
            AdvertisingMode::Restricted
        }
    }

    // ------------------------------------------------------------------
    // Boot
    // ------------------------------------------------------------------

    /// Transition out of the initial `Disconnected` state: publish the
    /// allow-list, start advertising, refresh the pairing display, and
    /// rejoin a saved network if one exists.
    pub fn bootstrap(&mut self) -> Vec<Effect> {
        self.store.log_contents();
        let mut effects = Vec::new();

        if !self.store.is_empty() {
            effects.push(Effect::SetAllowList {
                peers: self.store.identities(),
            });
        }
        let mode = self.advertising_mode();
        self.adv_mode = mode;
        self.phase = LinkPhase::Advertising(mode);
        effects.push(Effect::StartAdvertising { mode });
        effects.push(Effect::RefreshPairingDisplay);

        if let Some(creds) = SavedCredentials::load(self.kv.as_ref()) {
            info!(ssid = %creds.ssid, "rejoining saved network");
            effects.push(Effect::JoinNetwork {
                ssid: creds.ssid,
                password: creds.password,
            });
        }
        effects
    }

    // ------------------------------------------------------------------
    // Event Dispatch
    // ------------------------------------------------------------------

    /// Consume one event. `now` drives soft deadlines; `epoch_secs` stamps
    /// bond-store recency.
    pub fn handle_event(&mut self, event: LinkEvent, now: Instant, epoch_secs: u64) -> Vec<Effect> {
        match event {
            LinkEvent::ConnectionEstablished { peer } => {
                self.on_connection_established(peer, epoch_secs)
            }
            LinkEvent::ConnectFailed { reason } => self.on_connect_failed(&reason),
            LinkEvent::Disconnected { reason } => self.on_disconnected(&reason),
            LinkEvent::PairingComplete { peer } => self.on_pairing_complete(peer, epoch_secs),
            LinkEvent::PairingFailed { peer, reason } => self.on_pairing_failed(peer, &reason),
            LinkEvent::RepeatPairingRequest { peer } => {
                let retry = !self.store.contains(&peer);
                debug!(%peer, retry, "repeat pairing request");
                vec![Effect::RespondRepeatPairing { retry }]
            }
            LinkEvent::TransferUnitChanged { transfer_unit } => {
                debug!(transfer_unit, "transfer unit negotiated");
                self.transfer_unit = transfer_unit;
                Vec::new()
            }
            LinkEvent::AdvertisementObserved { peer } => self.on_advertisement(peer),
            LinkEvent::ScanComplete => self.on_scan_complete(now),
            LinkEvent::SubscriptionChanged { channel, enabled } => {
                self.gate.set_subscription(channel, enabled);
                if channel == ChannelId::ScanResult && enabled {
                    self.start_wifi_scan()
                } else {
                    Vec::new()
                }
            }
            LinkEvent::AttributeAccess {
                attribute,
                op,
                payload,
            } => self.on_attribute_access(attribute, op, &payload, now),
            LinkEvent::Button(press) => self.on_button(press, now),
            LinkEvent::DisconnectRequested => self.on_disconnect_requested(),
            LinkEvent::WifiScanCompleted(report) => {
                self.wifi_scan_running = false;
                vec![
                    Effect::DeliverScanReport { report },
                    Effect::NotifyStatus {
                        status: WifiStatus::WifiScanOk,
                    },
                ]
            }
            LinkEvent::WifiScanFailed { reason } => {
                warn!(%reason, "network scan failed");
                self.wifi_scan_running = false;
                vec![Effect::NotifyStatus {
                    status: WifiStatus::WifiFail,
                }]
            }
            LinkEvent::WifiJoined => vec![Effect::NotifyStatus {
                status: WifiStatus::WifiOk,
            }],
            LinkEvent::WifiLost { reason } => {
                debug!(%reason, "station link lost");
                vec![Effect::NotifyStatus {
                    status: WifiStatus::WifiFail,
                }]
            }
            LinkEvent::Tick => self.on_tick(now),
        }
    }

    // ------------------------------------------------------------------
    // Connection Lifecycle
    // ------------------------------------------------------------------

    fn on_connection_established(&mut self, peer: PeerIdentity, epoch_secs: u64) -> Vec<Effect> {
        let mut effects = Vec::new();

        // An inbound connection always wins over in-flight outbound work
        match self.phase {
            LinkPhase::Connecting => effects.push(Effect::CancelConnect),
            LinkPhase::Scanning => effects.push(Effect::CancelScan),
            _ => {}
        }
        self.reconnect_in_progress = false;
        self.rescan_at = None;
        effects.push(Effect::StopAdvertising);

        // The transport resolves private addresses before reporting, so
        // store matching is plain identity comparison
        debug!(%peer, rpa = peer.is_resolvable_private(), "connection established");

        let known = self.store.contains(&peer);
        if known {
            info!(%peer, "bonded peer connected");
            self.store.touch(&peer, epoch_secs, self.kv.as_mut());
            self.phase = LinkPhase::Connected;
            self.current_peer = Some(peer);
            effects.push(Effect::InitiatePairing);
        } else if self.allow_new_bonding {
            info!(%peer, "unknown peer connected, initiating pairing");
            self.phase = LinkPhase::Connected;
            self.current_peer = Some(peer);
            effects.push(Effect::InitiatePairing);
        } else {
            // Unauthenticated peers are never tolerated outside a window
            warn!(%peer, "rejecting unbonded peer outside pairing window");
            effects.push(Effect::TerminateLink);
            let mode = self.advertising_mode();
            self.adv_mode = mode;
            self.phase = LinkPhase::Advertising(mode);
            effects.push(Effect::StartAdvertising { mode });
        }
        effects
    }

    fn on_connect_failed(&mut self, reason: &str) -> Vec<Effect> {
        if self.phase != LinkPhase::Connecting {
            debug!(reason, "stale connect failure");
            return Vec::new();
        }
        if self.reconnect_in_progress {
            info!(reason, "direct reconnection failed, falling back to scan");
            self.phase = LinkPhase::Scanning;
            return vec![Effect::StartScan {
                window: self.config.scan_window,
            }];
        }
        let mode = self.advertising_mode();
        self.adv_mode = mode;
        self.phase = LinkPhase::Advertising(mode);
        vec![Effect::StartAdvertising { mode }]
    }

    fn on_disconnected(&mut self, reason: &str) -> Vec<Effect> {
        if self.phase != LinkPhase::Connected {
            debug!(reason, "stale disconnect");
            return Vec::new();
        }
        info!(reason, "link lost");
        self.phase = LinkPhase::Disconnected;
        self.current_peer = None;
        self.gate.reset_subscriptions();
        self.store.mark_all_inactive();

        if self.store.is_empty() {
            self.adv_mode = AdvertisingMode::Unrestricted;
            self.phase = LinkPhase::Advertising(AdvertisingMode::Unrestricted);
            return vec![Effect::StartAdvertising {
                mode: AdvertisingMode::Unrestricted,
            }];
        }

        // Preferred-device reconnection: target slot 0 directly
        self.store.sort();
        let Some(preferred) = self.store.preferred().map(|r| r.identity) else {
            return Vec::new();
        };
        self.reconnect_in_progress = true;
        self.phase = LinkPhase::Connecting;
        info!(peer = %preferred, "attempting preferred-device reconnection");
        vec![Effect::Connect {
            peer: preferred,
            timeout: self.config.connect_timeout,
        }]
    }

    fn on_disconnect_requested(&mut self) -> Vec<Effect> {
        if self.phase != LinkPhase::Connected {
            return vec![Effect::StopAdvertising];
        }
        info!("host requested disconnect");
        self.phase = LinkPhase::Disconnected;
        self.current_peer = None;
        self.gate.reset_subscriptions();
        self.store.mark_all_inactive();
        vec![Effect::TerminateLink, Effect::StopAdvertising]
    }

    // ------------------------------------------------------------------
    // Pairing
    // ------------------------------------------------------------------

    fn on_pairing_complete(&mut self, peer: PeerIdentity, epoch_secs: u64) -> Vec<Effect> {
        if self.phase != LinkPhase::Connected {
            debug!(%peer, "pairing completion without an active link");
            return Vec::new();
        }
        let mut effects = Vec::new();
        if !self.store.contains(&peer) {
            if self.store.add(peer, epoch_secs, self.kv.as_mut()) {
                info!(%peer, "new peer bonded");
            } else {
                warn!(%peer, "bond store full, peer not recorded");
            }
            effects.push(Effect::SetAllowList {
                peers: self.store.identities(),
            });
        }
        // A completed bond ends the new-pairing grace immediately
        self.allow_new_bonding = false;
        self.window.close();
        effects
    }

    fn on_pairing_failed(&mut self, peer: PeerIdentity, reason: &str) -> Vec<Effect> {
        warn!(%peer, reason, "pairing denied, terminating link");
        self.phase = LinkPhase::Disconnected;
        self.current_peer = None;
        self.gate.reset_subscriptions();

        let mode = self.advertising_mode();
        self.adv_mode = mode;
        self.phase = LinkPhase::Advertising(mode);
        vec![Effect::TerminateLink, Effect::StartAdvertising { mode }]
    }

    // ------------------------------------------------------------------
    // Reconnection Scanning
    // ------------------------------------------------------------------

    fn on_advertisement(&mut self, peer: PeerIdentity) -> Vec<Effect> {
        if self.phase != LinkPhase::Scanning || !self.store.contains(&peer) {
            return Vec::new();
        }
        info!(%peer, "bonded peer observed during scan");
        self.phase = LinkPhase::Connecting;
        vec![
            Effect::CancelScan,
            Effect::Connect {
                peer,
                timeout: self.config.connect_timeout,
            },
        ]
    }

    fn on_scan_complete(&mut self, now: Instant) -> Vec<Effect> {
        if self.phase != LinkPhase::Scanning {
            return Vec::new();
        }
        if self.reconnect_in_progress {
            // Back off, then scan again on a later tick
            debug!(
                backoff_secs = self.config.scan_backoff.as_secs(),
                "scan window elapsed with no match"
            );
            self.phase = LinkPhase::Disconnected;
            self.rescan_at = Some(now + self.config.scan_backoff);
            return Vec::new();
        }
        let mode = self.advertising_mode();
        self.adv_mode = mode;
        self.phase = LinkPhase::Advertising(mode);
        vec![Effect::StartAdvertising { mode }]
    }

    // ------------------------------------------------------------------
    // Attribute Access and Commands
    // ------------------------------------------------------------------

    fn on_attribute_access(
        &mut self,
        attribute: AttributeId,
        op: AccessOp,
        payload: &[u8],
        now: Instant,
    ) -> Vec<Effect> {
        match self.gate.process(attribute, op, payload) {
            GateVerdict::Accepted { response } => vec![Effect::RespondAccess {
                result: Ok(response),
            }],
            GateVerdict::Denied(reason) => vec![Effect::RespondAccess { result: Err(reason) }],
            GateVerdict::Subscribed { channel, enabled } => {
                let mut effects = vec![Effect::RespondAccess { result: Ok(None) }];
                if channel == ChannelId::ScanResult && enabled {
                    effects.extend(self.start_wifi_scan());
                }
                effects
            }
            GateVerdict::Command(command) => {
                let mut effects = vec![Effect::RespondAccess { result: Ok(None) }];
                effects.extend(self.apply_command(command, now));
                effects
            }
            GateVerdict::BadCommand(err) => {
                warn!(%err, "rejected credential write");
                vec![
                    Effect::RespondAccess { result: Ok(None) },
                    Effect::NotifyStatus {
                        status: WifiStatus::WifiFail,
                    },
                ]
            }
        }
    }

    fn apply_command(&mut self, command: CredentialCommand, now: Instant) -> Vec<Effect> {
        match command {
            CredentialCommand::Scan => self.start_wifi_scan(),
            CredentialCommand::Pair => self.open_pairing_window(now),
            CredentialCommand::Join { ssid, password } => {
                info!(ssid = %ssid, "join request received");
                SavedCredentials {
                    ssid: ssid.clone(),
                    password: password.clone(),
                }
                .store(self.kv.as_mut());
                vec![
                    Effect::NotifyStatus {
                        status: WifiStatus::Unknown,
                    },
                    Effect::JoinNetwork { ssid, password },
                ]
            }
        }
    }

    fn start_wifi_scan(&mut self) -> Vec<Effect> {
        if self.wifi_scan_running {
            warn!("scan already running");
            return Vec::new();
        }
        self.wifi_scan_running = true;
        vec![
            Effect::NotifyStatus {
                status: WifiStatus::Unknown,
            },
            Effect::StartWifiScan,
        ]
    }

    // ------------------------------------------------------------------
    // Local Triggers
    // ------------------------------------------------------------------

    fn on_button(&mut self, press: ButtonPress, now: Instant) -> Vec<Effect> {
        match press {
            ButtonPress::Short => {
                debug!("button pressed");
                Vec::new()
            }
            ButtonPress::Medium => self.open_pairing_window(now),
            ButtonPress::Long => self.full_reset(),
        }
    }

    /// Open (or re-arm) the pairing window and force unrestricted
    /// advertising, aborting any in-progress reconnection.
    fn open_pairing_window(&mut self, now: Instant) -> Vec<Effect> {
        self.window.open(now);
        self.allow_new_bonding = true;

        let mut effects = Vec::new();
        match self.phase {
            LinkPhase::Connecting => effects.push(Effect::CancelConnect),
            LinkPhase::Scanning => effects.push(Effect::CancelScan),
            _ => {}
        }
        self.reconnect_in_progress = false;
        self.rescan_at = None;

        effects.push(Effect::StopAdvertising);
        effects.push(Effect::StartAdvertising {
            mode: AdvertisingMode::Unrestricted,
        });
        self.adv_mode = AdvertisingMode::Unrestricted;
        if !self.is_connected() {
            self.phase = LinkPhase::Advertising(AdvertisingMode::Unrestricted);
        }
        effects.push(Effect::NotifyStatus {
            status: WifiStatus::PairingMode,
        });
        effects
    }

    /// Erase-all: wipe the store and every persisted entry, drop the
    /// allow-list, and return to unrestricted advertising.
    fn full_reset(&mut self) -> Vec<Effect> {
        warn!("full reset requested, erasing bonded peers");
        let mut effects = Vec::new();

        if let Err(err) = self.kv.clear_all() {
            warn!(%err, "persistent store erase failed");
        }
        self.store.clear_all(self.kv.as_mut());
        effects.push(Effect::ClearAllowList);

        if self.is_connected() {
            effects.push(Effect::TerminateLink);
        }
        match self.phase {
            LinkPhase::Connecting => effects.push(Effect::CancelConnect),
            LinkPhase::Scanning => effects.push(Effect::CancelScan),
            _ => {}
        }
        self.current_peer = None;
        self.gate.reset_subscriptions();
        self.window.close();
        self.allow_new_bonding = true;
        self.reconnect_in_progress = false;
        self.rescan_at = None;

        effects.push(Effect::StopAdvertising);
        effects.push(Effect::StartAdvertising {
            mode: AdvertisingMode::Unrestricted,
        });
        self.adv_mode = AdvertisingMode::Unrestricted;
        self.phase = LinkPhase::Advertising(AdvertisingMode::Unrestricted);
        effects.push(Effect::RefreshPairingDisplay);
        effects
    }

    // ------------------------------------------------------------------
    // Soft Deadlines
    // ------------------------------------------------------------------

    fn on_tick(&mut self, now: Instant) -> Vec<Effect> {
        let mut effects = Vec::new();

        if self.window.tick(now) {
            self.allow_new_bonding = false;
            if !self.store.is_empty() && matches!(self.phase, LinkPhase::Advertising(_)) {
                info!("pairing window expired, returning to restricted advertising");
                effects.push(Effect::StopAdvertising);
                effects.push(Effect::SetAllowList {
                    peers: self.store.identities(),
                });
                effects.push(Effect::StartAdvertising {
                    mode: AdvertisingMode::Restricted,
                });
                self.adv_mode = AdvertisingMode::Restricted;
                self.phase = LinkPhase::Advertising(AdvertisingMode::Restricted);
            }
        }

        if self.reconnect_in_progress && self.phase == LinkPhase::Disconnected {
            if let Some(at) = self.rescan_at {
                if now >= at {
                    self.rescan_at = None;
                    self.phase = LinkPhase::Scanning;
                    effects.push(Effect::StartScan {
                        window: self.config.scan_window,
                    });
                }
            }
        }

        effects
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
