use super::{Checkpoint, Epoch, Gwei, Hash, Pubkey, Slot, Validator, ValidatorIndex};
use crate::config::ChainConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Per-validator participation flags for a single epoch, packed as a
/// 3-bit mask: bit 0 source, bit 1 target, bit 2 head.
pub const PARTICIPATION_FLAG_SOURCE: u8 = 0b001;
pub const PARTICIPATION_FLAG_TARGET: u8 = 0b010;
pub const PARTICIPATION_FLAG_HEAD: u8 = 0b100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Eth1Data {
    pub deposit_root: Hash,
    pub deposit_count: u64,
    pub block_hash: Hash,
}

impl Default for Eth1Data {
    fn default() -> Self {
        Eth1Data {
            deposit_root: [0u8; 32],
            deposit_count: 0,
            block_hash: [0u8; 32],
        }
    }
}

/// Canonical, versioned beacon state. Owns the validator registry,
/// balances, checkpoints, and the bookkeeping epoch processing reads
/// and writes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BeaconState {
    pub slot: Slot,

    pub validators: Vec<Validator>,
    pub balances: Vec<Gwei>,
    pub inactivity_scores: Vec<u64>,

    #[serde(skip)]
    pubkey_to_index: HashMap<Pubkey, ValidatorIndex>,

    pub previous_justified_checkpoint: Checkpoint,
    pub current_justified_checkpoint: Checkpoint,
    pub finalized_checkpoint: Checkpoint,
    /// `bits[0]` is the current epoch, `bits[1..3]` are progressively
    /// older epochs.
    pub justification_bits: [bool; 4],

    pub block_roots: Vec<Hash>,
    pub state_roots: Vec<Hash>,
    pub historical_roots: Vec<Hash>,

    /// Per-validator participation bitmask for the previous and
    /// current epoch.
    pub previous_epoch_participation: Vec<u8>,
    pub current_epoch_participation: Vec<u8>,

    /// Indexed by `epoch % EPOCHS_PER_SLASHINGS_VECTOR`.
    pub slashings: Vec<Gwei>,

    pub eth1_data: Eth1Data,
    pub eth1_deposit_index: u64,
}

impl BeaconState {
    pub fn genesis(config: &ChainConfig, genesis_validators: Vec<Validator>, genesis_root: Hash) -> Self {
        let n = genesis_validators.len();
        let mut pubkey_to_index = HashMap::with_capacity(n);
        let mut balances = Vec::with_capacity(n);
        for (i, v) in genesis_validators.iter().enumerate() {
            pubkey_to_index.insert(v.pubkey, i as ValidatorIndex);
            balances.push(v.effective_balance);
        }

        let mut block_roots = vec![[0u8; 32]; config.slots_per_historical_root as usize];
        block_roots[0] = genesis_root;
        let state_roots = vec![[0u8; 32]; config.slots_per_historical_root as usize];

        BeaconState {
            slot: 0,
            inactivity_scores: vec![0; n],
            previous_epoch_participation: vec![0; n],
            current_epoch_participation: vec![0; n],
            validators: genesis_validators,
            balances,
            pubkey_to_index,
            previous_justified_checkpoint: Checkpoint::genesis(genesis_root),
            current_justified_checkpoint: Checkpoint::genesis(genesis_root),
            finalized_checkpoint: Checkpoint::genesis(genesis_root),
            justification_bits: [false; 4],
            block_roots,
            state_roots,
            historical_roots: Vec::new(),
            slashings: vec![0; config.epochs_per_slashings_vector as usize],
            eth1_data: Eth1Data::default(),
            eth1_deposit_index: 0,
        }
    }

    pub fn current_epoch(&self, config: &ChainConfig) -> Epoch {
        self.slot / config.slots_per_epoch
    }

    pub fn get_validator_by_index(&self, index: ValidatorIndex) -> Option<&Validator> {
        self.validators.get(index as usize)
    }

    pub fn get_validator_by_pubkey(&self, pubkey: &Pubkey) -> Option<(ValidatorIndex, &Validator)> {
        let index = *self.pubkey_to_index.get(pubkey)?;
        self.validators.get(index as usize).map(|v| (index, v))
    }

    /// Appends a brand-new validator and grows every parallel array in
    /// lockstep. Returns its freshly assigned index.
    pub fn add_validator(&mut self, validator: Validator, balance: Gwei) -> ValidatorIndex {
        let index = self.validators.len() as ValidatorIndex;
        self.pubkey_to_index.insert(validator.pubkey, index);
        self.validators.push(validator);
        self.balances.push(balance);
        self.inactivity_scores.push(0);
        self.previous_epoch_participation.push(0);
        self.current_epoch_participation.push(0);
        index
    }

    /// Sum of effective balances of validators active at `epoch`,
    /// floored at one increment so division by it never produces a
    /// divide-by-zero downstream.
    pub fn total_active_balance(&self, config: &ChainConfig, epoch: Epoch) -> Gwei {
        let sum: Gwei = self
            .validators
            .iter()
            .filter(|v| v.is_active_at(epoch))
            .map(|v| v.effective_balance)
            .sum();
        sum.max(config.effective_balance_increment)
    }

    pub fn active_validator_indices(&self, epoch: Epoch) -> Vec<ValidatorIndex> {
        self.validators
            .iter()
            .enumerate()
            .filter(|(_, v)| v.is_active_at(epoch))
            .map(|(i, _)| i as ValidatorIndex)
            .collect()
    }

    /// Pubkey -> index map is private and rebuilt from `validators`
    /// whenever the state is deserialized or otherwise reconstructed
    /// without going through `genesis`/`add_validator`.
    pub fn rebuild_pubkey_index(&mut self) {
        self.pubkey_to_index = self
            .validators
            .iter()
            .enumerate()
            .map(|(i, v)| (v.pubkey, i as ValidatorIndex))
            .collect();
    }

    /// Every universal invariant from the data model: array lengths
    /// agree, checkpoints are ordered, and every validator's epoch
    /// fields are ordered.
    pub fn check_invariants(&self, config: &ChainConfig) -> bool {
        let n = self.validators.len();
        if self.balances.len() != n || self.inactivity_scores.len() != n {
            return false;
        }
        if self.finalized_checkpoint.epoch > self.current_justified_checkpoint.epoch {
            return false;
        }
        if self.current_justified_checkpoint.epoch > self.current_epoch(config) {
            return false;
        }
        self.validators.iter().all(Validator::check_epoch_ordering_invariant)
    }

    /// Deep copy for callers that need to mutate freely without
    /// affecting the canonical state (§5 "all returned values ... must
    /// be deep copies").
    pub fn deep_copy(&self) -> Self {
        self.clone()
    }
}
