//! End-to-end policy scenarios spanning restarts
//!
//! Drives the link state machine through whole sessions against a shared
//! key/value store, checking that bonding, credential, and reconnection
//! policy survive a reboot of the policy layer.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use commission_core::{
    AddrType, AdvertisingMode, ButtonPress, Effect, KeyValueStore, LinkEvent, LinkPhase,
    LinkStateMachine, MemoryStore, PeerAddress, PeerIdentity, PolicyConfig, StorageError,
};

// ----------------------------------------------------------------------------
// Shared Store
// ----------------------------------------------------------------------------

/// Key/value service shared between "reboots" of the policy layer
#[derive(Clone, Default)]
struct SharedStore(Arc<Mutex<MemoryStore>>);

impl KeyValueStore for SharedStore {
    fn put(&mut self, key: &str, data: Vec<u8>) -> Result<(), StorageError> {
        self.0.lock().unwrap().put(key, data)
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        self.0.lock().unwrap().get(key)
    }

    fn delete(&mut self, key: &str) -> Result<(), StorageError> {
        self.0.lock().unwrap().delete(key)
    }

    fn clear_all(&mut self) -> Result<(), StorageError> {
        self.0.lock().unwrap().clear_all()
    }
}

fn identity(n: u8) -> PeerIdentity {
    PeerIdentity::new(PeerAddress::new([n, 0, 0, 0, 0, 0]), AddrType::Public)
}

fn boot(kv: &SharedStore) -> (LinkStateMachine, Vec<Effect>) {
    let mut machine = LinkStateMachine::new(PolicyConfig::default(), Box::new(kv.clone()));
    let effects = machine.bootstrap();
    (machine, effects)
}

// ----------------------------------------------------------------------------
// Scenarios
// ----------------------------------------------------------------------------

#[test]
fn bonding_survives_restart() {
    let kv = SharedStore::default();
    let now = Instant::now();

    // First boot: factory fresh, open advertising, stranger bonds
    let (mut machine, effects) = boot(&kv);
    assert!(effects.contains(&Effect::StartAdvertising {
        mode: AdvertisingMode::Unrestricted
    }));
    machine.handle_event(LinkEvent::ConnectionEstablished { peer: identity(1) }, now, 100);
    machine.handle_event(LinkEvent::PairingComplete { peer: identity(1) }, now, 100);

    // Second boot: the bond is durable and advertising is filtered
    let (machine, effects) = boot(&kv);
    assert_eq!(
        machine.phase(),
        LinkPhase::Advertising(AdvertisingMode::Restricted)
    );
    assert!(effects.contains(&Effect::SetAllowList {
        peers: vec![identity(1)]
    }));
    assert!(machine.bond_store().contains(&identity(1)));
}

#[test]
fn credentials_survive_restart_and_rejoin() {
    let kv = SharedStore::default();
    let now = Instant::now();

    let (mut machine, _) = boot(&kv);
    machine.handle_event(LinkEvent::ConnectionEstablished { peer: identity(1) }, now, 100);
    machine.handle_event(
        LinkEvent::AttributeAccess {
            attribute: commission_core::AttributeId::Characteristic(
                commission_core::ChannelId::CredentialSubmit,
            ),
            op: commission_core::AccessOp::WriteCharacteristic,
            payload: b"home/secret".to_vec(),
        },
        now,
        110,
    );

    let (_machine, effects) = boot(&kv);
    assert!(effects.contains(&Effect::JoinNetwork {
        ssid: "home".to_string(),
        password: "secret".to_string()
    }));
}

#[test]
fn full_reset_erases_bonds_and_credentials() {
    let kv = SharedStore::default();
    let now = Instant::now();

    let (mut machine, _) = boot(&kv);
    machine.handle_event(LinkEvent::ConnectionEstablished { peer: identity(1) }, now, 100);
    machine.handle_event(LinkEvent::PairingComplete { peer: identity(1) }, now, 100);
    machine.handle_event(
        LinkEvent::AttributeAccess {
            attribute: commission_core::AttributeId::Characteristic(
                commission_core::ChannelId::CredentialSubmit,
            ),
            op: commission_core::AccessOp::WriteCharacteristic,
            payload: b"home/secret".to_vec(),
        },
        now,
        110,
    );

    let effects = machine.handle_event(LinkEvent::Button(ButtonPress::Long), now, 120);
    assert!(effects.contains(&Effect::ClearAllowList));
    assert!(effects.contains(&Effect::RefreshPairingDisplay));

    // Next boot sees a factory-fresh device
    let (machine, effects) = boot(&kv);
    assert!(machine.bond_store().is_empty());
    assert_eq!(
        machine.phase(),
        LinkPhase::Advertising(AdvertisingMode::Unrestricted)
    );
    assert!(machine.state().allow_new_bonding);
    assert!(!effects
        .iter()
        .any(|e| matches!(e, Effect::JoinNetwork { .. })));
}

#[test]
fn reconnection_prefers_most_recent_frequent_peer() {
    let kv = SharedStore::default();
    let now = Instant::now();
    let (mut machine, _) = boot(&kv);

    // Two peers bond; the second reconnects more often
    for (peer, connects) in [(identity(1), 1u64), (identity(2), 3u64)] {
        machine.handle_event(LinkEvent::ConnectionEstablished { peer }, now, 100);
        machine.handle_event(LinkEvent::PairingComplete { peer }, now, 100);
        machine.handle_event(
            LinkEvent::Disconnected {
                reason: "session over".to_string(),
            },
            now,
            100,
        );
        machine.handle_event(
            LinkEvent::ConnectFailed {
                reason: "timeout".to_string(),
            },
            now,
            100,
        );
        machine.handle_event(LinkEvent::ScanComplete, now, 100);
        // Abort reconnection so the next inbound connect is clean
        machine.handle_event(LinkEvent::Button(ButtonPress::Medium), now, 100);
        for round in 0..connects {
            let secs = 200 + round;
            machine.handle_event(LinkEvent::ConnectionEstablished { peer }, now, secs);
            machine.handle_event(
                LinkEvent::Disconnected {
                    reason: "done".to_string(),
                },
                now,
                secs,
            );
            machine.handle_event(
                LinkEvent::ConnectFailed {
                    reason: "timeout".to_string(),
                },
                now,
                secs,
            );
            machine.handle_event(LinkEvent::ScanComplete, now, secs);
            machine.handle_event(LinkEvent::Button(ButtonPress::Medium), now, secs);
        }
    }

    // Reboot, connect peer 1 once more, drop the link: the reconnection
    // target must still be peer 2 (higher priority from more sessions)
    let (mut machine, _) = boot(&kv);
    machine.handle_event(LinkEvent::ConnectionEstablished { peer: identity(1) }, now, 900);
    let effects = machine.handle_event(
        LinkEvent::Disconnected {
            reason: "drop".to_string(),
        },
        now,
        901,
    );
    let target = effects.iter().find_map(|e| match e {
        Effect::Connect { peer, .. } => Some(*peer),
        _ => None,
    });
    assert_eq!(target, Some(identity(2)));
}

#[test]
fn reconnect_ladder_runs_until_peer_returns() {
    let kv = SharedStore::default();
    let start = Instant::now();
    let (mut machine, _) = boot(&kv);

    machine.handle_event(LinkEvent::ConnectionEstablished { peer: identity(1) }, start, 10);
    machine.handle_event(LinkEvent::PairingComplete { peer: identity(1) }, start, 10);
    machine.handle_event(
        LinkEvent::Disconnected {
            reason: "drop".to_string(),
        },
        start,
        20,
    );

    // Two full scan rounds come up empty
    let mut now = start;
    for _ in 0..2 {
        machine.handle_event(
            LinkEvent::ConnectFailed {
                reason: "timeout".to_string(),
            },
            now,
            30,
        );
        machine.handle_event(LinkEvent::ScanComplete, now, 30);
        now += Duration::from_secs(6);
        let effects = machine.handle_event(LinkEvent::Tick, now, 36);
        assert!(effects.contains(&Effect::StartScan {
            window: Duration::from_secs(5)
        }));
        // Simulate the next direct attempt failing too
        machine.handle_event(
            LinkEvent::AdvertisementObserved { peer: identity(1) },
            now,
            36,
        );
        assert_eq!(machine.phase(), LinkPhase::Connecting);
    }

    // Third round: the peer answers
    machine.handle_event(LinkEvent::ConnectionEstablished { peer: identity(1) }, now, 50);
    assert_eq!(machine.phase(), LinkPhase::Connected);
    assert!(!machine.state().reconnect_in_progress);
}
