//! Inclusion-delay aware attestation pool (§4.4, `AttestationPoolV2`).

use crate::consensus::bitfield::{popcount, try_aggregate};
use crate::crypto::Hasher;
use crate::types::{Attestation, Hash, Slot};
use std::collections::HashSet;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("attestation has no aggregation bits set")]
    EmptyBits,
    #[error("committee_index {index} is not below MaxCommitteesPerSlot {max}")]
    CommitteeIndexOutOfRange { index: u64, max: u64 },
    #[error("attestation slot {slot} is in the future relative to current slot {current_slot}")]
    FutureSlot { slot: Slot, current_slot: Slot },
    #[error("attestation slot {slot} has expired: inclusion window closed at slot {closes_at}")]
    Expired { slot: Slot, closes_at: Slot },
    #[error("pool is at capacity for slot {0}")]
    PoolFull(Slot),
    #[error("attestation with this data and bits is already in the pool")]
    Duplicate,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct InclusionStats {
    pub count: u64,
    pub optimal_count: u64,
    pub min_delay: Slot,
    pub max_delay: Slot,
    pub total_delay: Slot,
}

impl InclusionStats {
    fn record(&mut self, delay: Slot) {
        if self.count == 0 {
            self.min_delay = delay;
            self.max_delay = delay;
        } else {
            self.min_delay = self.min_delay.min(delay);
            self.max_delay = self.max_delay.max(delay);
        }
        self.total_delay += delay;
        self.count += 1;
        if delay == 1 {
            self.optimal_count += 1;
        }
    }
}

fn duplicate_key(att: &Attestation) -> Hash {
    Hasher::hash_multiple(&[
        &bincode_data(att),
        &att.aggregation_bits,
    ])
}

/// A deterministic, allocation-light stand-in for a full SSZ encode:
/// concatenates the fixed-size `AttestationData` fields so the digest
/// only depends on the vote's content.
fn bincode_data(att: &Attestation) -> Vec<u8> {
    let d = &att.data;
    let mut buf = Vec::with_capacity(8 + 32 + 8 + 32 + 8 + 32 + 8);
    buf.extend_from_slice(&d.slot.to_le_bytes());
    buf.extend_from_slice(&d.beacon_block_root);
    buf.extend_from_slice(&d.source.epoch.to_le_bytes());
    buf.extend_from_slice(&d.source.root);
    buf.extend_from_slice(&d.target.epoch.to_le_bytes());
    buf.extend_from_slice(&d.target.root);
    buf.extend_from_slice(&d.committee_index.to_le_bytes());
    buf
}

pub struct AttestationPoolV2 {
    max_committees_per_slot: u64,
    max_inclusion_delay: Slot,
    capacity: usize,
    entries: Vec<Attestation>,
    seen: HashSet<Hash>,
    stats: InclusionStats,
}

impl AttestationPoolV2 {
    pub fn new(max_committees_per_slot: u64, max_inclusion_delay: Slot, capacity: usize) -> Self {
        AttestationPoolV2 {
            max_committees_per_slot,
            max_inclusion_delay,
            capacity,
            entries: Vec::new(),
            seen: HashSet::new(),
            stats: InclusionStats::default(),
        }
    }

    pub fn add_attestation(&mut self, attestation: Attestation, current_slot: Slot) -> Result<(), PoolError> {
        if popcount(&attestation.aggregation_bits) == 0 {
            return Err(PoolError::EmptyBits);
        }
        if attestation.data.committee_index >= self.max_committees_per_slot {
            return Err(PoolError::CommitteeIndexOutOfRange {
                index: attestation.data.committee_index,
                max: self.max_committees_per_slot,
            });
        }
        if attestation.data.slot > current_slot {
            return Err(PoolError::FutureSlot { slot: attestation.data.slot, current_slot });
        }
        let closes_at = attestation.data.slot + self.max_inclusion_delay;
        if closes_at < current_slot {
            return Err(PoolError::Expired { slot: attestation.data.slot, closes_at });
        }

        let key = duplicate_key(&attestation);
        if self.seen.contains(&key) {
            return Err(PoolError::Duplicate);
        }

        for existing in self.entries.iter_mut() {
            if existing.data == attestation.data {
                if let Some(merged) = try_aggregate(existing, &attestation) {
                    self.seen.insert(key);
                    *existing = merged;
                    return Ok(());
                }
            }
        }

        if self.entries.len() >= self.capacity {
            return Err(PoolError::PoolFull(attestation.data.slot));
        }
        self.seen.insert(key);
        self.entries.push(attestation);
        Ok(())
    }

    /// Removes a now-included attestation and folds its inclusion
    /// delay into the running stats.
    pub fn mark_included(&mut self, attestation: &Attestation, block_slot: Slot) {
        let key = duplicate_key(attestation);
        self.entries.retain(|a| duplicate_key(a) != key);
        self.seen.remove(&key);
        let delay = block_slot.saturating_sub(attestation.data.slot);
        self.stats.record(delay);
    }

    pub fn stats(&self) -> InclusionStats {
        self.stats
    }

    /// `GetScoredForBlock(block_slot)`: candidates ranked by
    /// `popcount(bits) / inclusion_delay`, highest first.
    pub fn get_scored_for_block(&self, block_slot: Slot) -> Vec<(Attestation, f64)> {
        let mut scored: Vec<(Attestation, f64)> = self
            .entries
            .iter()
            .filter(|a| a.data.slot < block_slot)
            .map(|a| {
                let delay = (block_slot - a.data.slot).max(1) as f64;
                (a.clone(), popcount(&a.aggregation_bits) as f64 / delay)
            })
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AttestationData, Checkpoint};

    fn data(slot: Slot, committee_index: u64) -> AttestationData {
        AttestationData {
            slot,
            beacon_block_root: [1u8; 32],
            source: Checkpoint::genesis([0u8; 32]),
            target: Checkpoint::new(1, [2u8; 32]),
            committee_index,
        }
    }

    fn att(slot: Slot, committee_index: u64, bits: Vec<u8>) -> Attestation {
        Attestation { data: data(slot, committee_index), aggregation_bits: bits, signature: [0u8; 96] }
    }

    #[test]
    fn rejects_empty_bits() {
        let mut pool = AttestationPoolV2::new(64, 32, 16);
        assert_eq!(pool.add_attestation(att(10, 0, vec![]), 10), Err(PoolError::EmptyBits));
    }

    #[test]
    fn rejects_future_slot() {
        let mut pool = AttestationPoolV2::new(64, 32, 16);
        assert_eq!(
            pool.add_attestation(att(11, 0, vec![0b01]), 10),
            Err(PoolError::FutureSlot { slot: 11, current_slot: 10 })
        );
    }

    #[test]
    fn rejects_expired_attestation() {
        let mut pool = AttestationPoolV2::new(64, 4, 16);
        assert_eq!(
            pool.add_attestation(att(0, 0, vec![0b01]), 10),
            Err(PoolError::Expired { slot: 0, closes_at: 4 })
        );
    }

    #[test]
    fn rejects_duplicate_attestation() {
        let mut pool = AttestationPoolV2::new(64, 32, 16);
        pool.add_attestation(att(10, 0, vec![0b11]), 10).unwrap();
        assert_eq!(pool.add_attestation(att(10, 0, vec![0b11]), 10), Err(PoolError::Duplicate));
    }

    #[test]
    fn mark_included_records_optimal_delay() {
        let mut pool = AttestationPoolV2::new(64, 32, 16);
        let a = att(10, 0, vec![0b01]);
        pool.add_attestation(a.clone(), 10).unwrap();
        pool.mark_included(&a, 11);
        assert_eq!(pool.stats().optimal_count, 1);
        assert!(pool.is_empty());
    }

    #[test]
    fn scoring_favors_higher_popcount_and_lower_delay() {
        let mut pool = AttestationPoolV2::new(64, 32, 16);
        pool.add_attestation(att(10, 0, vec![0b0001]), 10).unwrap();
        pool.add_attestation(att(9, 1, vec![0b1111]), 10).unwrap();
        let scored = pool.get_scored_for_block(12);
        assert_eq!(scored[0].0.data.committee_index, 1);
    }
}
