//! Bonded peer store
//!
//! Durable record of previously paired peers with priority and recency
//! metadata. The store holds at most eight records, is scanned linearly,
//! and writes through to the key/value service on every mutation. Slot 0
//! is always the best reconnection candidate after `sort`.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::storage::KeyValueStore;
use crate::types::PeerIdentity;

/// Maximum number of bonded peers
pub const MAX_BONDED_PEERS: usize = 8;

/// Priority saturation cap
pub const MAX_PRIORITY: u8 = 10;

/// Persisted blob key in the key/value service
pub const BOND_LIST_KEY: &str = "ble_bond.list";

// ----------------------------------------------------------------------------
// Peer Record
// ----------------------------------------------------------------------------

/// A single bonded peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerRecord {
    pub identity: PeerIdentity,
    /// Reconnection priority, bumped on every successful reconnection
    pub priority: u8,
    /// Seconds since epoch of the last successful connection
    pub last_connected: u64,
    /// Whether the peer is on the currently active link
    pub active: bool,
}

/// On-disk layout: record list plus an explicit count
#[derive(Debug, Serialize, Deserialize)]
struct StoredBondList {
    count: u8,
    records: Vec<PeerRecord>,
}

// ----------------------------------------------------------------------------
// Bond Store
// ----------------------------------------------------------------------------

/// In-memory view of the bonded peer list, write-through persisted
#[derive(Debug, Default)]
pub struct BondStore {
    records: Vec<PeerRecord>,
}

impl BondStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the store from the key/value service. A missing, truncated, or
    /// otherwise undecodable blob yields an empty store. The result is
    /// sorted so slot 0 is the preferred reconnection target.
    pub fn load(kv: &dyn KeyValueStore) -> Self {
        let raw = match kv.get(BOND_LIST_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Self::new(),
            Err(err) => {
                warn!(%err, "bond list read failed, starting empty");
                return Self::new();
            }
        };

        let stored: StoredBondList = match bincode::deserialize(&raw) {
            Ok(stored) => stored,
            Err(err) => {
                warn!(%err, "bond list blob undecodable, starting empty");
                return Self::new();
            }
        };
        if stored.count as usize != stored.records.len()
            || stored.records.len() > MAX_BONDED_PEERS
        {
            warn!(
                count = stored.count,
                records = stored.records.len(),
                "bond list blob inconsistent, starting empty"
            );
            return Self::new();
        }

        let mut store = Self {
            records: stored.records,
        };
        store.sort();
        store
    }

    /// Find a record by identity. Linear scan; the store never exceeds
    /// eight entries.
    pub fn find(&self, identity: &PeerIdentity) -> Option<&PeerRecord> {
        self.records.iter().find(|r| r.identity == *identity)
    }

    pub fn contains(&self, identity: &PeerIdentity) -> bool {
        self.find(identity).is_some()
    }

    /// Append a newly bonded peer. Returns false if the peer is already
    /// present or the store is full.
    pub fn add(
        &mut self,
        identity: PeerIdentity,
        now_secs: u64,
        kv: &mut dyn KeyValueStore,
    ) -> bool {
        if self.contains(&identity) || self.records.len() >= MAX_BONDED_PEERS {
            return false;
        }
        self.records.push(PeerRecord {
            identity,
            priority: 0,
            last_connected: now_secs,
            active: false,
        });
        self.persist(kv);
        true
    }

    /// Record a successful reconnection: bump priority (saturating at the
    /// cap), refresh the timestamp, mark active, persist, re-sort.
    pub fn touch(
        &mut self,
        identity: &PeerIdentity,
        now_secs: u64,
        kv: &mut dyn KeyValueStore,
    ) -> bool {
        let Some(record) = self.records.iter_mut().find(|r| r.identity == *identity) else {
            return false;
        };
        if record.priority < MAX_PRIORITY {
            record.priority += 1;
        }
        record.last_connected = now_secs;
        record.active = true;
        self.persist(kv);
        self.sort();
        true
    }

    /// Stable order: priority descending, ties broken by last-connected
    /// descending.
    pub fn sort(&mut self) {
        self.records
            .sort_by(|a, b| (b.priority, b.last_connected).cmp(&(a.priority, a.last_connected)));
    }

    /// Drop every record and persist the empty list. The caller is
    /// responsible for also clearing the transport-level allow-list.
    pub fn clear_all(&mut self, kv: &mut dyn KeyValueStore) {
        self.records.clear();
        self.persist(kv);
    }

    /// Clear the activity flag on every record (link lost)
    pub fn mark_all_inactive(&mut self) {
        for record in &mut self.records {
            record.active = false;
        }
    }

    /// Best reconnection candidate, if any
    pub fn preferred(&self) -> Option<&PeerRecord> {
        self.records.first()
    }

    /// Identities for the transport allow-list
    pub fn identities(&self) -> Vec<PeerIdentity> {
        self.records.iter().map(|r| r.identity).collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PeerRecord> {
        self.records.iter()
    }

    /// Boot-time dump of the stored peers
    pub fn log_contents(&self) {
        if self.records.is_empty() {
            info!("no bonded peers");
            return;
        }
        for (i, record) in self.records.iter().enumerate() {
            info!(
                slot = i,
                peer = %record.identity,
                priority = record.priority,
                last_connected = record.last_connected,
                "bonded peer"
            );
        }
    }

    /// Synchronous write-through. A failed write is logged; the in-memory
    /// state stays authoritative for this run.
    fn persist(&self, kv: &mut dyn KeyValueStore) {
        let stored = StoredBondList {
            count: self.records.len() as u8,
            records: self.records.clone(),
        };
        let blob = match bincode::serialize(&stored) {
            Ok(blob) => blob,
            Err(err) => {
                warn!(%err, "bond list serialization failed");
                return;
            }
        };
        if let Err(err) = kv.put(BOND_LIST_KEY, blob) {
            warn!(%err, "bond list not durable");
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use crate::types::{AddrType, PeerAddress};
    use proptest::prelude::*;

    fn identity(n: u8) -> PeerIdentity {
        PeerIdentity::new(PeerAddress::new([n, 0, 0, 0, 0, 0]), AddrType::Public)
    }

    #[test]
    fn test_add_rejects_duplicates_and_overflow() {
        let mut kv = MemoryStore::new();
        let mut store = BondStore::new();

        for n in 0..MAX_BONDED_PEERS as u8 {
            assert!(store.add(identity(n), 100, &mut kv));
        }
        assert!(!store.add(identity(0), 100, &mut kv));
        assert!(!store.add(identity(200), 100, &mut kv));
        assert_eq!(store.len(), MAX_BONDED_PEERS);
    }

    #[test]
    fn test_touch_bumps_and_reorders() {
        let mut kv = MemoryStore::new();
        let mut store = BondStore::new();
        store.add(identity(1), 10, &mut kv);
        store.add(identity(2), 20, &mut kv);

        assert!(store.touch(&identity(2), 30, &mut kv));
        let preferred = store.preferred().unwrap();
        assert_eq!(preferred.identity, identity(2));
        assert_eq!(preferred.priority, 1);
        assert_eq!(preferred.last_connected, 30);
        assert!(preferred.active);

        assert!(!store.touch(&identity(99), 40, &mut kv));
    }

    #[test]
    fn test_equal_priority_breaks_ties_by_recency() {
        let mut kv = MemoryStore::new();
        let mut store = BondStore::new();
        store.add(identity(1), 0, &mut kv);
        store.add(identity(2), 0, &mut kv);
        store.touch(&identity(1), 100, &mut kv);
        store.touch(&identity(2), 200, &mut kv);

        assert_eq!(store.preferred().unwrap().identity, identity(2));
    }

    #[test]
    fn test_persistence_round_trip() {
        let mut kv = MemoryStore::new();
        let mut store = BondStore::new();
        store.add(identity(7), 123, &mut kv);
        store.touch(&identity(7), 456, &mut kv);

        let reloaded = BondStore::load(&kv);
        assert_eq!(reloaded.len(), 1);
        let record = reloaded.preferred().unwrap();
        assert_eq!(record.identity, identity(7));
        assert_eq!(record.priority, 1);
        assert_eq!(record.last_connected, 456);
    }

    #[test]
    fn test_corrupt_blob_loads_empty() {
        let mut kv = MemoryStore::new();
        kv.put(BOND_LIST_KEY, vec![0xDE, 0xAD]).unwrap();
        assert!(BondStore::load(&kv).is_empty());

        // Count/record mismatch is also treated as corruption
        let stored = StoredBondList {
            count: 5,
            records: Vec::new(),
        };
        kv.put(BOND_LIST_KEY, bincode::serialize(&stored).unwrap())
            .unwrap();
        assert!(BondStore::load(&kv).is_empty());
    }

    #[test]
    fn test_clear_all_persists_empty_list() {
        let mut kv = MemoryStore::new();
        let mut store = BondStore::new();
        store.add(identity(1), 1, &mut kv);
        store.clear_all(&mut kv);
        assert!(store.is_empty());
        assert!(BondStore::load(&kv).is_empty());
    }

    #[test]
    fn test_mark_all_inactive() {
        let mut kv = MemoryStore::new();
        let mut store = BondStore::new();
        store.add(identity(1), 1, &mut kv);
        store.touch(&identity(1), 2, &mut kv);
        assert!(store.preferred().unwrap().active);
        store.mark_all_inactive();
        assert!(!store.preferred().unwrap().active);
    }

    proptest! {
        /// Size and uniqueness hold under arbitrary add/touch sequences
        #[test]
        fn prop_bounded_and_unique(ops in proptest::collection::vec((0u8..16, 0u64..1_000), 0..64)) {
            let mut kv = MemoryStore::new();
            let mut store = BondStore::new();
            for (n, t) in ops {
                if store.contains(&identity(n)) {
                    store.touch(&identity(n), t, &mut kv);
                } else {
                    store.add(identity(n), t, &mut kv);
                }
                prop_assert!(store.len() <= MAX_BONDED_PEERS);
                let ids: Vec<_> = store.identities();
                for (i, a) in ids.iter().enumerate() {
                    for b in &ids[i + 1..] {
                        prop_assert_ne!(a, b);
                    }
                }
            }
        }

        /// After any touch the order is non-increasing in priority, with
        /// last-connected non-increasing among equal priorities
        #[test]
        fn prop_sorted_after_touch(ops in proptest::collection::vec((0u8..8, 0u64..1_000), 1..64)) {
            let mut kv = MemoryStore::new();
            let mut store = BondStore::new();
            for (n, t) in ops {
                if !store.contains(&identity(n)) {
                    store.add(identity(n), t, &mut kv);
                }
                store.touch(&identity(n), t, &mut kv);
                let records: Vec<_> = store.iter().cloned().collect();
                for pair in records.windows(2) {
                    prop_assert!(pair[0].priority >= pair[1].priority);
                    if pair[0].priority == pair[1].priority {
                        prop_assert!(pair[0].last_connected >= pair[1].last_connected);
                    }
                }
            }
        }

        /// Priority never decreases under repeated touch and saturates
        #[test]
        fn prop_priority_monotone_saturating(touches in 0usize..32) {
            let mut kv = MemoryStore::new();
            let mut store = BondStore::new();
            store.add(identity(1), 0, &mut kv);
            let mut previous = 0u8;
            for t in 0..touches {
                store.touch(&identity(1), t as u64, &mut kv);
                let priority = store.find(&identity(1)).unwrap().priority;
                prop_assert!(priority >= previous);
                prop_assert!(priority <= MAX_PRIORITY);
                previous = priority;
            }
        }
    }
}
