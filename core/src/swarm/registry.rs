//! Peer registry: identity → record map plus the connected-peer list

use super::peer::PeerRecord;
use std::collections::HashMap;

/// All peer records the swarm currently holds, keyed by remote identity,
/// plus the identities that reached the connected state in connection
/// order. At most one record exists per identity at any time.
#[derive(Default)]
pub(crate) struct PeerRegistry {
    records: HashMap<String, PeerRecord>,
    connected: Vec<String>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a record. Refused (returning it back) when a record for
    /// the identity already exists; the caller must retire the old record
    /// first.
    pub fn insert(&mut self, record: PeerRecord) -> Result<(), PeerRecord> {
        if self.records.contains_key(&record.remote_id) {
            return Err(record);
        }
        self.records.insert(record.remote_id.clone(), record);
        Ok(())
    }

    pub fn contains(&self, remote_id: &str) -> bool {
        self.records.contains_key(remote_id)
    }

    pub fn get(&self, remote_id: &str) -> Option<&PeerRecord> {
        self.records.get(remote_id)
    }

    pub fn get_mut(&mut self, remote_id: &str) -> Option<&mut PeerRecord> {
        self.records.get_mut(remote_id)
    }

    /// Record that a peer reached the connected state
    pub fn mark_connected(&mut self, remote_id: &str) {
        if !self.connected.iter().any(|id| id == remote_id) {
            self.connected.push(remote_id.to_string());
        }
    }

    /// Remove the record for an identity regardless of instance (the
    /// best-effort, identity-matched disconnect path).
    pub fn remove(&mut self, remote_id: &str) -> Option<PeerRecord> {
        let record = self.records.remove(remote_id)?;
        self.connected.retain(|id| id != remote_id);
        Some(record)
    }

    /// Remove the record for an identity only if it is still this exact
    /// instance. A newer record for the same identity may have superseded
    /// the one an event refers to, and must not be evicted.
    pub fn remove_if_instance(&mut self, remote_id: &str, instance: u64) -> Option<PeerRecord> {
        match self.records.get(remote_id) {
            Some(record) if record.instance == instance => self.remove(remote_id),
            _ => None,
        }
    }

    pub fn connected_count(&self) -> usize {
        self.connected.len()
    }

    /// Connected identities in connection order
    pub fn connected_ids(&self) -> Vec<String> {
        self.connected.clone()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Snapshot of every registered (identity, instance) pair
    pub fn all_instances(&self) -> Vec<(String, u64)> {
        self.records
            .values()
            .map(|r| (r.remote_id.clone(), r.instance))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Connection;
    use crate::swarm::peer::PeerRole;
    use proptest::prelude::*;
    use serde_json::Value;
    use std::sync::Arc;

    struct NullConnection;

    impl Connection for NullConnection {
        fn signal(&self, _payload: Value) {}
        fn destroy(&self) {}
    }

    fn record(remote_id: &str, instance: u64) -> PeerRecord {
        PeerRecord::new(
            remote_id.to_string(),
            instance,
            PeerRole::Initiator,
            Arc::new(NullConnection),
        )
    }

    #[test]
    fn test_uniqueness_enforced() {
        let mut registry = PeerRegistry::new();
        assert!(registry.insert(record("peer-a", 1)).is_ok());
        assert!(registry.insert(record("peer-a", 2)).is_err());
        assert_eq!(registry.len(), 1);

        // Only after the old record is removed may a new one register.
        registry.remove("peer-a");
        assert!(registry.insert(record("peer-a", 2)).is_ok());
    }

    #[test]
    fn test_instance_guard_protects_superseding_record() {
        let mut registry = PeerRegistry::new();
        registry.insert(record("peer-a", 1)).unwrap();
        registry.remove("peer-a");
        registry.insert(record("peer-a", 2)).unwrap();

        // A stale close for the retired instance must not evict the
        // successor.
        assert!(registry.remove_if_instance("peer-a", 1).is_none());
        assert!(registry.contains("peer-a"));

        assert!(registry.remove_if_instance("peer-a", 2).is_some());
        assert!(!registry.contains("peer-a"));
    }

    #[test]
    fn test_connected_list_tracks_order_and_removal() {
        let mut registry = PeerRegistry::new();
        registry.insert(record("peer-a", 1)).unwrap();
        registry.insert(record("peer-b", 2)).unwrap();

        registry.mark_connected("peer-b");
        registry.mark_connected("peer-a");
        registry.mark_connected("peer-a"); // idempotent
        assert_eq!(registry.connected_ids(), vec!["peer-b", "peer-a"]);
        assert_eq!(registry.connected_count(), 2);

        registry.remove("peer-b");
        assert_eq!(registry.connected_ids(), vec!["peer-a"]);
    }

    #[test]
    fn test_pending_records_do_not_count_as_connected() {
        let mut registry = PeerRegistry::new();
        registry.insert(record("peer-a", 1)).unwrap();
        assert_eq!(registry.connected_count(), 0);
        assert_eq!(registry.len(), 1);
    }

    proptest! {
        /// However many times identities repeat in the insert stream, the
        /// registry holds exactly one record per distinct identity.
        #[test]
        fn prop_at_most_one_record_per_identity(
            ids in proptest::collection::vec("[a-d]", 0..32),
        ) {
            let mut registry = PeerRegistry::new();
            for (instance, id) in ids.iter().enumerate() {
                let _ = registry.insert(record(id, instance as u64));
            }
            let mut distinct = ids.clone();
            distinct.sort();
            distinct.dedup();
            prop_assert_eq!(registry.len(), distinct.len());
        }
    }
}
