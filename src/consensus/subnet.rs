//! Subnet routing and greedy aggregation pools (§4.4).

use crate::consensus::bitfield::{overlaps, popcount, try_aggregate};
use crate::crypto::bls;
use crate::types::{Attestation, AttestationData, Epoch, Hash, Slot};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SubnetError {
    #[error("subnet {subnet} is full for slot {slot}")]
    SubnetFull { subnet: u64, slot: Slot },
}

/// One gossip subnet's pending attestations for recent slots.
pub struct Subnet {
    id: u64,
    max_pending_per_slot: usize,
    pending: HashMap<Slot, Vec<Attestation>>,
    aggregates: HashMap<Slot, Attestation>,
    message_rate: f64,
}

impl Subnet {
    pub fn new(id: u64, max_pending_per_slot: usize) -> Self {
        Subnet {
            id,
            max_pending_per_slot,
            pending: HashMap::new(),
            aggregates: HashMap::new(),
            message_rate: 0.0,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn message_rate(&self) -> f64 {
        self.message_rate
    }

    /// Deep-copies `attestation` into the subnet's pending set and
    /// updates the exponential moving average message rate
    /// (`rate <- 0.9 * rate + 0.1`).
    pub fn add_attestation(&mut self, attestation: &Attestation) -> Result<(), SubnetError> {
        let slot = attestation.data.slot;
        let bucket = self.pending.entry(slot).or_default();
        if bucket.len() >= self.max_pending_per_slot {
            return Err(SubnetError::SubnetFull { subnet: self.id, slot });
        }
        bucket.push(attestation.clone());
        self.message_rate = 0.9 * self.message_rate + 0.1;
        Ok(())
    }

    /// Greedy per-slot aggregation: seed with the first pending
    /// attestation, fold in every later one whose bits are disjoint
    /// from the running aggregate.
    pub fn aggregate_slot(&mut self, slot: Slot) -> Option<Attestation> {
        let pending = self.pending.get(&slot)?;
        let mut iter = pending.iter();
        let mut result = iter.next()?.clone();

        for candidate in iter {
            if !overlaps(&result.aggregation_bits, &candidate.aggregation_bits) {
                result.aggregation_bits = crate::consensus::bitfield::or(&result.aggregation_bits, &candidate.aggregation_bits);
                result.signature = bls::aggregate_signatures(&[result.signature, candidate.signature]);
            }
        }

        self.aggregates.insert(slot, result.clone());
        Some(result)
    }

    pub fn get_aggregate(&self, slot: Slot) -> Option<Attestation> {
        self.aggregates.get(&slot).cloned()
    }
}

/// Routes incoming attestations to `committee_index mod SUBNET_COUNT`
/// and merges aggregates across subnets that vote on the same data.
pub struct SubnetRouter {
    subnets: Vec<Subnet>,
}

impl SubnetRouter {
    pub fn new(subnet_count: u64, max_pending_per_slot: usize) -> Self {
        let subnets = (0..subnet_count).map(|id| Subnet::new(id, max_pending_per_slot)).collect();
        SubnetRouter { subnets }
    }

    pub fn subnet_count(&self) -> usize {
        self.subnets.len()
    }

    pub fn route_attestation(&mut self, attestation: &Attestation) -> Result<u64, SubnetError> {
        let subnet_id = attestation.data.committee_index % self.subnets.len() as u64;
        self.subnets[subnet_id as usize].add_attestation(attestation)?;
        Ok(subnet_id)
    }

    pub fn aggregate_subnets(&mut self, slot: Slot) -> Vec<Attestation> {
        self.subnets.iter_mut().filter_map(|s| s.aggregate_slot(slot)).collect()
    }

    /// `CrossSubnetAggregate(slot)`: gathers one aggregate per non-empty
    /// subnet, then merges every subsequent aggregate that shares the
    /// first one's `AttestationData` into a single running result.
    pub fn cross_subnet_aggregate(&mut self, slot: Slot) -> Option<Attestation> {
        let per_subnet = self.aggregate_subnets(slot);
        let mut iter = per_subnet.into_iter();
        let mut result = iter.next()?;

        for candidate in iter {
            if candidate.data == result.data {
                if let Some(merged) = try_aggregate(&result, &candidate) {
                    result = merged;
                }
            }
        }
        Some(result)
    }
}

/// The coarser grouping key §4.4 uses for the aggregation pool: two
/// attestations across different committees can still share a bucket
/// if they vote for the same block and checkpoints.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PoolKey {
    slot: Slot,
    beacon_block_root: Hash,
    source_epoch: Epoch,
    source_root: Hash,
    target_epoch: Epoch,
    target_root: Hash,
}

impl PoolKey {
    fn from_data(data: &AttestationData) -> Self {
        PoolKey {
            slot: data.slot,
            beacon_block_root: data.beacon_block_root,
            source_epoch: data.source.epoch,
            source_root: data.source.root,
            target_epoch: data.target.epoch,
            target_root: data.target.root,
        }
    }
}

/// Higher-level pool that groups by the coarse pool key, folding new
/// attestations into any existing disjoint-bits entry for the same
/// exact `AttestationData` before appending a fresh one.
pub struct AggregationPool {
    max_per_slot: usize,
    buckets: HashMap<PoolKey, Vec<Attestation>>,
}

impl AggregationPool {
    pub fn new(max_per_slot: usize) -> Self {
        AggregationPool { max_per_slot, buckets: HashMap::new() }
    }

    fn count_in_slot(&self, slot: Slot) -> usize {
        self.buckets
            .iter()
            .filter(|(k, _)| k.slot == slot)
            .map(|(_, v)| v.len())
            .sum()
    }

    pub fn add_attestation(&mut self, attestation: &Attestation) -> Result<(), SubnetError> {
        let key = PoolKey::from_data(&attestation.data);
        let bucket = self.buckets.entry(key).or_default();

        for existing in bucket.iter_mut() {
            if existing.data == attestation.data {
                if let Some(merged) = try_aggregate(existing, attestation) {
                    *existing = merged;
                    return Ok(());
                }
            }
        }

        if self.count_in_slot(attestation.data.slot) >= self.max_per_slot {
            return Err(SubnetError::SubnetFull { subnet: 0, slot: attestation.data.slot });
        }
        bucket.push(attestation.clone());
        Ok(())
    }

    /// Per key: sort by popcount descending, greedily fold entries that
    /// share exact `AttestationData` into the highest-participation
    /// seed; entries with distinct `AttestationData` within the same
    /// key stay separate.
    pub fn aggregate_all(&self, slot: Slot) -> Vec<Attestation> {
        let mut output = Vec::new();
        for (key, entries) in &self.buckets {
            if key.slot != slot {
                continue;
            }
            let mut sorted: Vec<&Attestation> = entries.iter().collect();
            sorted.sort_by(|a, b| popcount(&b.aggregation_bits).cmp(&popcount(&a.aggregation_bits)));

            let mut accumulators: Vec<Attestation> = Vec::new();
            for candidate in sorted {
                let mut folded = false;
                for acc in accumulators.iter_mut() {
                    if acc.data == candidate.data {
                        if let Some(merged) = try_aggregate(acc, candidate) {
                            *acc = merged;
                            folded = true;
                            break;
                        }
                    }
                }
                if !folded {
                    accumulators.push(candidate.clone());
                }
            }
            output.extend(accumulators);
        }
        output
    }

    /// Drops every entry whose slot is older than `current_slot -
    /// max_age`.
    pub fn prune(&mut self, current_slot: Slot, max_age: Slot) {
        let cutoff = current_slot.saturating_sub(max_age);
        self.buckets.retain(|key, _| key.slot >= cutoff);
        self.buckets.retain(|_, v| !v.is_empty());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Checkpoint;

    fn data(committee_index: u64) -> AttestationData {
        AttestationData {
            slot: 10,
            beacon_block_root: [1u8; 32],
            source: Checkpoint::genesis([0u8; 32]),
            target: Checkpoint::new(1, [2u8; 32]),
            committee_index,
        }
    }

    fn att(committee_index: u64, bits: Vec<u8>) -> Attestation {
        Attestation { data: data(committee_index), aggregation_bits: bits, signature: [0u8; 96] }
    }

    #[test]
    fn router_routes_by_committee_index_modulo_subnet_count() {
        let mut router = SubnetRouter::new(4, 16);
        let subnet_id = router.route_attestation(&att(9, vec![0b01])).unwrap();
        assert_eq!(subnet_id, 1);
    }

    #[test]
    fn subnet_enforces_capacity() {
        let mut subnet = Subnet::new(0, 1);
        subnet.add_attestation(&att(0, vec![0b01])).unwrap();
        assert_eq!(
            subnet.add_attestation(&att(0, vec![0b10])),
            Err(SubnetError::SubnetFull { subnet: 0, slot: 10 })
        );
    }

    #[test]
    fn aggregate_slot_folds_disjoint_bits() {
        let mut subnet = Subnet::new(0, 16);
        subnet.add_attestation(&att(0, vec![0b0001])).unwrap();
        subnet.add_attestation(&att(0, vec![0b0010])).unwrap();
        let aggregate = subnet.aggregate_slot(10).unwrap();
        assert_eq!(aggregate.aggregation_bits, vec![0b0011]);
    }

    #[test]
    fn pool_folds_matching_data_and_caps_per_slot() {
        let mut pool = AggregationPool::new(1);
        pool.add_attestation(&att(0, vec![0b0001])).unwrap();
        pool.add_attestation(&att(0, vec![0b0010])).unwrap();
        let out = pool.aggregate_all(10);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].aggregation_bits, vec![0b0011]);
    }

    #[test]
    fn pool_prune_drops_entries_older_than_max_age() {
        let mut pool = AggregationPool::new(16);
        pool.add_attestation(&att(0, vec![0b01])).unwrap();
        pool.prune(100, 10);
        assert!(pool.aggregate_all(10).is_empty());
    }
}
