//! C2: the thread-safe key → partition store.
//!
//! Grounded on `SLOPSProducer/internal/metadata.go`'s `PartitionMap`, with
//! the Go source's separate backup store dropped in favor of a snapshot
//! clone: the reverse `key -> KeyRecord` index stays a lookup-only view,
//! rebuilt synchronously with every forward write rather than an owning
//! structure in its own right.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Instant;

pub type PartitionId = u32;

#[derive(Debug, Clone, PartialEq)]
pub struct KeyRecord {
    pub key: String,
    pub count: u64,
    pub partition: PartitionId,
    pub last_migrated: Instant,
}

/// A read-only view of the forward store, used by the rebalancer's analysis
/// phase so it never holds the map's lock while computing candidates.
pub type Snapshot = Vec<HashMap<String, KeyRecord>>;

pub struct PartitionMap {
    partitions: u32,
    // Authoritative forward store: one key set per partition.
    store: RwLock<Vec<HashMap<String, KeyRecord>>>,
    // Lookup-only reverse index, kept consistent with `store` on every
    // public mutation. Never read without also trusting `store` for the
    // record itself.
    reverse: RwLock<HashMap<String, PartitionId>>,
}

impl PartitionMap {
    pub fn new(partitions: u32) -> Self {
        assert!(partitions > 0, "partition count must be positive");
        Self {
            partitions,
            store: RwLock::new((0..partitions).map(|_| HashMap::new()).collect()),
            reverse: RwLock::new(HashMap::new()),
        }
    }

    pub fn partitions(&self) -> u32 {
        self.partitions
    }

    /// Insert or update a binding. Removes any prior binding for the key
    /// first, preserving the single-partition invariant.
    pub fn bind(&self, key: &str, count: u64, partition: PartitionId) {
        assert!(
            partition < self.partitions,
            "bind to out-of-range partition {partition} (have {})",
            self.partitions
        );

        let mut store = self.store.write().expect("poisoned PartitionMap store");
        let mut reverse = self.reverse.write().expect("poisoned PartitionMap reverse index");

        if let Some(&prior) = reverse.get(key) {
            if prior != partition {
                store[prior as usize].remove(key);
            }
        }

        store[partition as usize].insert(
            key.to_string(),
            KeyRecord {
                key: key.to_string(),
                count,
                partition,
                last_migrated: Instant::now(),
            },
        );
        reverse.insert(key.to_string(), partition);
    }

    pub fn lookup(&self, key: &str) -> Option<KeyRecord> {
        let reverse = self.reverse.read().expect("poisoned PartitionMap reverse index");
        let partition = *reverse.get(key)?;
        drop(reverse);
        let store = self.store.read().expect("poisoned PartitionMap store");
        store[partition as usize].get(key).cloned()
    }

    pub fn unbind(&self, key: &str) -> Option<KeyRecord> {
        let mut reverse = self.reverse.write().expect("poisoned PartitionMap reverse index");
        let partition = reverse.remove(key)?;
        let mut store = self.store.write().expect("poisoned PartitionMap store");
        store[partition as usize].remove(key)
    }

    pub fn partition_weight(&self, partition: PartitionId) -> u64 {
        let store = self.store.read().expect("poisoned PartitionMap store");
        store[partition as usize].values().map(|r| r.count).sum()
    }

    pub fn system_average_weight(&self) -> f64 {
        let store = self.store.read().expect("poisoned PartitionMap store");
        let total: u64 = store.iter().flat_map(|p| p.values()).map(|r| r.count).sum();
        total as f64 / self.partitions as f64
    }

    /// A consistent clone of the forward store, read under a single brief
    /// shared lock. The rebalancer's analysis runs entirely over this clone.
    pub fn snapshot(&self) -> Snapshot {
        self.store.read().expect("poisoned PartitionMap store").clone()
    }

    /// C1 promotion: if the key has no binding, assign it to the
    /// least-loaded partition (ties broken by lower id); otherwise just
    /// refresh its count and leave relocation to C3.
    pub fn promote(&self, key: &str, count: u64) {
        if let Some(existing) = self.lookup(key) {
            self.bind(key, count, existing.partition);
            return;
        }
        let target = self.least_loaded_partition();
        self.bind(key, count, target);
    }

    fn least_loaded_partition(&self) -> PartitionId {
        let store = self.store.read().expect("poisoned PartitionMap store");
        store
            .iter()
            .enumerate()
            .map(|(id, keys)| (id as PartitionId, keys.values().map(|r| r.count).sum::<u64>()))
            .min_by_key(|(id, weight)| (*weight, *id))
            .map(|(id, _)| id)
            .expect("partition count is always positive")
    }

    /// Rebind a key from its current partition to `dest`, refreshing
    /// `last_migrated`. Used exclusively by the rebalancer's apply phase.
    pub fn migrate(&self, key: &str, dest: PartitionId) {
        let count = self.lookup(key).map(|r| r.count).unwrap_or(0);
        self.bind(key, count, dest);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_then_lookup() {
        let map = PartitionMap::new(4);
        map.bind("x", 10, 2);
        let rec = map.lookup("x").unwrap();
        assert_eq!(rec.partition, 2);
        assert_eq!(rec.count, 10);
    }

    #[test]
    fn rebind_moves_between_partitions_keeping_single_binding() {
        let map = PartitionMap::new(4);
        map.bind("x", 10, 0);
        map.bind("x", 10, 1);
        assert!(map.lookup("x").is_some());
        assert_eq!(map.lookup("x").unwrap().partition, 1);
        assert_eq!(map.partition_weight(0), 0);
        assert_eq!(map.partition_weight(1), 10);
    }

    #[test]
    fn unbind_removes_from_forward_and_reverse() {
        let map = PartitionMap::new(4);
        map.bind("x", 10, 0);
        let removed = map.unbind("x").unwrap();
        assert_eq!(removed.key, "x");
        assert!(map.lookup("x").is_none());
        assert_eq!(map.partition_weight(0), 0);
    }

    #[test]
    fn promote_assigns_least_loaded_partition_ties_broken_by_lower_id() {
        let map = PartitionMap::new(3);
        map.bind("heavy", 100, 1);
        map.promote("new-key", 5);
        // partitions 0 and 2 are both empty (weight 0); tie broken to id 0.
        assert_eq!(map.lookup("new-key").unwrap().partition, 0);
    }

    #[test]
    fn promote_existing_key_only_updates_count() {
        let map = PartitionMap::new(3);
        map.bind("x", 5, 2);
        map.promote("x", 50);
        let rec = map.lookup("x").unwrap();
        assert_eq!(rec.partition, 2);
        assert_eq!(rec.count, 50);
    }

    #[test]
    fn system_average_weight_tracks_total_over_partitions() {
        let map = PartitionMap::new(2);
        map.bind("x", 10, 0);
        map.bind("y", 30, 1);
        assert_eq!(map.system_average_weight(), 20.0);
    }

    #[test]
    #[should_panic]
    fn bind_out_of_range_partition_panics() {
        let map = PartitionMap::new(2);
        map.bind("x", 1, 5);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Bind(&'static str, u64, PartitionId),
        Unbind(&'static str),
    }

    fn key_strategy() -> impl proptest::strategy::Strategy<Value = &'static str> {
        use proptest::prelude::*;
        prop_oneof![Just("a"), Just("b"), Just("c")]
    }

    fn op_strategy() -> impl proptest::strategy::Strategy<Value = Op> {
        use proptest::prelude::*;
        prop_oneof![
            (key_strategy(), 0u64..100, 0u32..4).prop_map(|(k, c, p)| Op::Bind(k, c, p)),
            key_strategy().prop_map(Op::Unbind),
        ]
    }

    proptest::proptest! {
        /// Invariant 1: whatever sequence of Bind/Unbind calls runs, every
        /// key ends up in at most one partition's forward store, and the
        /// reverse index agrees with wherever the forward store puts it.
        #[test]
        fn every_key_appears_in_at_most_one_partition(ops in proptest::collection::vec(op_strategy(), 0..100)) {
            let map = PartitionMap::new(4);
            for op in ops {
                match op {
                    Op::Bind(key, count, partition) => map.bind(key, count, partition),
                    Op::Unbind(key) => { map.unbind(key); }
                }
            }

            for key in ["a", "b", "c"] {
                let snapshot = map.snapshot();
                let owners: Vec<PartitionId> = snapshot
                    .iter()
                    .enumerate()
                    .filter(|(_, keys)| keys.contains_key(key))
                    .map(|(id, _)| id as PartitionId)
                    .collect();
                proptest::prop_assert!(owners.len() <= 1);

                match map.lookup(key) {
                    Some(rec) => proptest::prop_assert_eq!(Some(rec.partition), owners.first().copied()),
                    None => proptest::prop_assert!(owners.is_empty()),
                }
            }
        }
    }
}
