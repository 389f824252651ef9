//! Validator registry & balance hysteresis (§4.2). Wraps a
//! [`BeaconState`] behind a single read-write lock and exposes the
//! append/lookup/activation/exit/ejection operations the rest of the
//! core drives epoch processing through.

use crate::config::ChainConfig;
use crate::types::{
    BeaconState, Epoch, Gwei, Pubkey, Validator, ValidatorIndex, FAR_FUTURE_EPOCH,
};
use std::sync::RwLock;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("validator index {0} out of range")]
    UnknownIndex(ValidatorIndex),
    #[error("validator is not active or is already exiting")]
    NotEligibleToExit,
}

pub struct ValidatorRegistry {
    state: RwLock<BeaconState>,
}

impl ValidatorRegistry {
    pub fn new(state: BeaconState) -> Self {
        ValidatorRegistry { state: RwLock::new(state) }
    }

    pub fn get_validator_by_index(&self, index: ValidatorIndex) -> Option<Validator> {
        self.state.read().unwrap().get_validator_by_index(index).cloned()
    }

    pub fn get_validator_by_pubkey(&self, pubkey: &Pubkey) -> Option<(ValidatorIndex, Validator)> {
        self.state
            .read()
            .unwrap()
            .get_validator_by_pubkey(pubkey)
            .map(|(i, v)| (i, v.clone()))
    }

    pub fn active_count(&self, epoch: Epoch) -> usize {
        self.state.read().unwrap().active_validator_indices(epoch).len()
    }

    pub fn total_active_balance(&self, config: &ChainConfig, epoch: Epoch) -> Gwei {
        self.state.read().unwrap().total_active_balance(config, epoch)
    }

    pub fn append(&self, validator: Validator, balance: Gwei) -> ValidatorIndex {
        self.state.write().unwrap().add_validator(validator, balance)
    }

    /// Deep copy of the current state for callers orchestrating across
    /// multiple locked components (§5: "all returned values ... must
    /// be deep copies").
    pub fn snapshot(&self) -> BeaconState {
        self.state.read().unwrap().deep_copy()
    }

    pub fn replace(&self, new_state: BeaconState) {
        *self.state.write().unwrap() = new_state;
    }

    /// Effective balance hysteresis (§4.2): only updates `e` when the
    /// actual balance `b` has drifted far enough in either direction,
    /// which damps oscillation right at increment boundaries.
    pub fn update_effective_balance(&self, config: &ChainConfig, index: ValidatorIndex, actual_balance: Gwei) -> Result<(), RegistryError> {
        let mut state = self.state.write().unwrap();
        let balance_len = state.balances.len();
        let validator = state
            .validators
            .get_mut(index as usize)
            .ok_or(RegistryError::UnknownIndex(index))?;
        if index as usize >= balance_len {
            return Err(RegistryError::UnknownIndex(index));
        }

        let e = validator.effective_balance;
        let down = config.hysteresis_downward_delta();
        let up = config.hysteresis_upward_delta();

        if actual_balance + down < e || e + up < actual_balance {
            let floored = (actual_balance / config.effective_balance_increment) * config.effective_balance_increment;
            validator.effective_balance = floored.min(config.max_effective_balance);
        }
        Ok(())
    }

    /// Churn-limited activation queue (§4.2): pending validators in
    /// index order become eligible once their eligibility epoch has
    /// finalized, are unslashed, and meet the minimum activation
    /// balance.
    pub fn process_activation_queue(&self, config: &ChainConfig, current_epoch: Epoch, finalized_epoch: Epoch) -> Vec<ValidatorIndex> {
        let mut state = self.state.write().unwrap();
        let active_count = state.active_validator_indices(current_epoch).len() as u64;
        let churn_limit = config.min_per_epoch_churn_limit.max(active_count / config.churn_limit_quotient);

        let mut activated = Vec::new();
        for i in 0..state.validators.len() {
            if activated.len() as u64 >= churn_limit {
                break;
            }
            let v = &mut state.validators[i];
            let pending = v.activation_epoch == FAR_FUTURE_EPOCH
                && v.activation_eligibility_epoch <= finalized_epoch
                && !v.slashed
                && v.effective_balance >= config.min_activation_balance;
            if pending {
                v.activation_epoch = compute_activation_exit_epoch(config, current_epoch);
                activated.push(i as ValidatorIndex);
            }
        }
        debug!(count = activated.len(), current_epoch, "processed activation queue");
        activated
    }

    /// Puts a validator into the exit queue (§4.2), computing the exit
    /// epoch from the current queue occupancy and the churn limit.
    pub fn initiate_exit(&self, config: &ChainConfig, current_epoch: Epoch, index: ValidatorIndex) -> Result<Epoch, RegistryError> {
        let mut state = self.state.write().unwrap();
        let active_count = state.active_validator_indices(current_epoch).len() as u64;
        let churn_limit = config.min_per_epoch_churn_limit.max(active_count / config.churn_limit_quotient);

        let max_existing_exit_epoch = state
            .validators
            .iter()
            .filter(|v| v.exit_epoch != FAR_FUTURE_EPOCH)
            .map(|v| v.exit_epoch)
            .max()
            .unwrap_or(0);

        let mut exit_queue_epoch = (current_epoch + 1 + config.max_seed_lookahead).max(max_existing_exit_epoch);
        let queued_at_epoch = state
            .validators
            .iter()
            .filter(|v| v.exit_epoch == exit_queue_epoch)
            .count() as u64;
        if queued_at_epoch >= churn_limit {
            exit_queue_epoch += 1;
        }

        let validator = state
            .validators
            .get_mut(index as usize)
            .ok_or(RegistryError::UnknownIndex(index))?;
        if !validator.is_active_at(current_epoch) || validator.is_exiting() {
            return Err(RegistryError::NotEligibleToExit);
        }
        validator.exit_epoch = exit_queue_epoch;
        validator.withdrawable_epoch = exit_queue_epoch + config.min_validator_withdrawability_delay;
        Ok(exit_queue_epoch)
    }

    /// Active validators whose effective balance has fallen to or
    /// below the ejection threshold and who are not already exiting
    /// enter the exit queue (§4.2).
    pub fn process_ejections(&self, config: &ChainConfig, current_epoch: Epoch) -> Vec<ValidatorIndex> {
        let candidates: Vec<ValidatorIndex> = {
            let state = self.state.read().unwrap();
            state
                .validators
                .iter()
                .enumerate()
                .filter(|(_, v)| {
                    v.is_active_at(current_epoch)
                        && v.effective_balance <= config.ejection_balance
                        && !v.is_exiting()
                })
                .map(|(i, _)| i as ValidatorIndex)
                .collect()
        };

        let mut ejected = Vec::new();
        for index in candidates {
            if self.initiate_exit(config, current_epoch, index).is_ok() {
                ejected.push(index);
            }
        }
        ejected
    }
}

/// Standard activation/exit epoch delay: one epoch past the seed
/// lookahead window, so the activating validator's randomness
/// dependency is already settled by the time it takes effect.
pub fn compute_activation_exit_epoch(config: &ChainConfig, current_epoch: Epoch) -> Epoch {
    current_epoch + 1 + config.max_seed_lookahead
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> ChainConfig {
        ChainConfig::default()
    }

    fn registry_with(n: usize) -> ValidatorRegistry {
        let validators: Vec<Validator> = (0..n)
            .map(|i| Validator::new([i as u8; 48], [0u8; 32], 32_000_000_000))
            .collect();
        let state = BeaconState::genesis(&cfg(), validators, [0u8; 32]);
        ValidatorRegistry::new(state)
    }

    #[test]
    fn hysteresis_ignores_small_drift() {
        let registry = registry_with(1);
        registry.update_effective_balance(&cfg(), 0, 32_100_000_000).unwrap();
        assert_eq!(registry.get_validator_by_index(0).unwrap().effective_balance, 32_000_000_000);
    }

    #[test]
    fn hysteresis_applies_large_downward_drift() {
        let registry = registry_with(1);
        registry.update_effective_balance(&cfg(), 0, 30_000_000_000).unwrap();
        assert_eq!(registry.get_validator_by_index(0).unwrap().effective_balance, 30_000_000_000);
    }

    #[test]
    fn activation_queue_respects_churn_limit() {
        let registry = registry_with(10);
        {
            let mut state = registry.state.write().unwrap();
            for v in state.validators.iter_mut() {
                v.activation_eligibility_epoch = 0;
            }
        }
        let activated = registry.process_activation_queue(&cfg(), 0, 0);
        assert_eq!(activated.len(), cfg().min_per_epoch_churn_limit as usize);
    }

    #[test]
    fn ejection_queues_exit_for_low_balance_validator() {
        let registry = registry_with(1);
        {
            let mut state = registry.state.write().unwrap();
            state.validators[0].activation_epoch = 0;
            state.validators[0].effective_balance = 10_000_000_000;
        }
        let ejected = registry.process_ejections(&cfg(), 1);
        assert_eq!(ejected, vec![0]);
        assert_ne!(registry.get_validator_by_index(0).unwrap().exit_epoch, FAR_FUTURE_EPOCH);
    }
}
