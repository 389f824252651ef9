//! Epoch boundary orchestration (§4.9): participation accounting,
//! Altair-style rewards and penalties, registry updates, slashings
//! payout, and historical root rollup, all run once per epoch.

use crate::config::ChainConfig;
use crate::consensus::finality::FinalityTracker;
use crate::consensus::registry::{compute_activation_exit_epoch, ValidatorRegistry};
use crate::crypto::merkle::hash_tree;
use crate::types::{
    Checkpoint, Epoch, Gwei, ValidatorIndex, FAR_FUTURE_EPOCH, PARTICIPATION_FLAG_HEAD,
    PARTICIPATION_FLAG_SOURCE, PARTICIPATION_FLAG_TARGET,
};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EpochBoundaryError {
    #[error("epoch {0} has already been processed")]
    AlreadyProcessed(Epoch),
}

#[derive(Debug, Clone, Default)]
pub struct EpochSummary {
    pub epoch: Epoch,
    pub active_validators: usize,
    pub total_active_balance: Gwei,
    pub balance_deltas: Vec<i64>,
    pub activated: Vec<ValidatorIndex>,
    pub ejected: Vec<ValidatorIndex>,
    pub slashing_penalties_applied: Vec<(ValidatorIndex, Gwei)>,
    pub historical_root_appended: bool,
}

/// Integer square root via Newton's method; `total_active_balance` is
/// always floored above zero so the loop terminates in a handful of
/// iterations.
fn isqrt(n: u64) -> u64 {
    if n == 0 {
        return 0;
    }
    let mut x = n;
    let mut y = (x + 1) / 2;
    while y < x {
        x = y;
        y = (x + n / x) / 2;
    }
    x
}

pub struct EpochBoundaryProcessor {
    last_processed_epoch: Option<Epoch>,
}

impl Default for EpochBoundaryProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl EpochBoundaryProcessor {
    pub fn new() -> Self {
        EpochBoundaryProcessor { last_processed_epoch: None }
    }

    /// Runs the full epoch boundary against a registry snapshot,
    /// writing the result back through `replace` so no lock is held
    /// across the whole orchestration (§5).
    pub fn process_epoch(
        &mut self,
        registry: &ValidatorRegistry,
        config: &ChainConfig,
        finality: &mut FinalityTracker,
        current_epoch: Epoch,
        previous_checkpoint: Checkpoint,
        current_checkpoint: Checkpoint,
    ) -> Result<EpochSummary, EpochBoundaryError> {
        if self.last_processed_epoch == Some(current_epoch) {
            return Err(EpochBoundaryError::AlreadyProcessed(current_epoch));
        }

        let mut state = registry.snapshot();
        let n = state.validators.len();
        let total_active_balance = state.total_active_balance(config, current_epoch);

        let component_balance = |flag: u8, participation: &[u8]| -> Gwei {
            state
                .validators
                .iter()
                .enumerate()
                .filter(|(i, v)| {
                    v.is_active_at(current_epoch) && !v.slashed && participation.get(*i).map(|p| p & flag != 0).unwrap_or(false)
                })
                .map(|(_, v)| v.effective_balance)
                .sum::<Gwei>()
                .max(config.effective_balance_increment)
        };

        let prev_target_balance = component_balance(PARTICIPATION_FLAG_TARGET, &state.previous_epoch_participation);
        let curr_target_balance = component_balance(PARTICIPATION_FLAG_TARGET, &state.current_epoch_participation);
        let source_balance = component_balance(PARTICIPATION_FLAG_SOURCE, &state.current_epoch_participation);
        let head_balance = component_balance(PARTICIPATION_FLAG_HEAD, &state.current_epoch_participation);

        finality.process_epoch(
            current_epoch,
            previous_checkpoint,
            current_checkpoint,
            total_active_balance,
            prev_target_balance,
            curr_target_balance,
        );

        let finality_delay = finality.finality_delay(current_epoch);
        let in_leak = finality_delay > config.min_epochs_to_inactivity_penalty;

        let base_reward_denominator = isqrt(total_active_balance).max(1);

        let mut balance_deltas = vec![0i64; n];
        for i in 0..n {
            let validator = &state.validators[i];
            if validator.slashed || !validator.is_active_at(current_epoch) {
                continue;
            }
            let base_reward = (validator.effective_balance * config.base_reward_factor / base_reward_denominator) as i64;
            let flags = state.current_epoch_participation[i];

            let components: [(u8, u64, Gwei, bool); 3] = [
                (PARTICIPATION_FLAG_SOURCE, config.timely_source_weight, source_balance, true),
                (PARTICIPATION_FLAG_TARGET, config.timely_target_weight, curr_target_balance, true),
                (PARTICIPATION_FLAG_HEAD, config.timely_head_weight, head_balance, false),
            ];

            for (flag, weight, component_balance, penalizes) in components {
                let component_reward = base_reward * weight as i64 / config.weight_denominator as i64;
                let attested = flags & flag != 0;
                if in_leak {
                    if attested {
                        balance_deltas[i] += component_reward;
                    }
                } else if attested {
                    let ebi = config.effective_balance_increment.max(1);
                    let numerator = (component_balance / ebi) as i64;
                    let denominator = (total_active_balance / ebi).max(1) as i64;
                    balance_deltas[i] += component_reward * numerator / denominator;
                } else if penalizes {
                    balance_deltas[i] -= component_reward;
                }
            }

            if in_leak && flags & PARTICIPATION_FLAG_TARGET == 0 {
                state.inactivity_scores[i] = state.inactivity_scores[i].saturating_add(1);
                let penalty = (validator.effective_balance * state.inactivity_scores[i] / config.inactivity_penalty_quotient) as i64;
                balance_deltas[i] -= penalty;
            } else if state.inactivity_scores[i] > 0 {
                state.inactivity_scores[i] -= 1;
            }
        }

        for (i, delta) in balance_deltas.iter().enumerate() {
            state.balances[i] = (state.balances[i] as i64 + delta).max(0) as Gwei;
        }

        let finalized_epoch = finality.finalized().epoch;
        let activated = {
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
            activated
        };

        let ejected = {
            let active_count = state.active_validator_indices(current_epoch).len() as u64;
            let churn_limit = config.min_per_epoch_churn_limit.max(active_count / config.churn_limit_quotient);
            let candidates: Vec<ValidatorIndex> = state
                .validators
                .iter()
                .enumerate()
                .filter(|(_, v)| v.is_active_at(current_epoch) && v.effective_balance <= config.ejection_balance && !v.is_exiting())
                .map(|(i, _)| i as ValidatorIndex)
                .collect();

            let mut ejected = Vec::new();
            let mut queued_at_max = state
                .validators
                .iter()
                .filter(|v| v.exit_epoch != FAR_FUTURE_EPOCH)
                .map(|v| v.exit_epoch)
                .max()
                .unwrap_or(0)
                .max(current_epoch + 1 + config.max_seed_lookahead);
            let mut queued_count = state.validators.iter().filter(|v| v.exit_epoch == queued_at_max).count() as u64;
            for index in candidates {
                if queued_count >= churn_limit {
                    queued_at_max += 1;
                    queued_count = 0;
                }
                let v = &mut state.validators[index as usize];
                v.exit_epoch = queued_at_max;
                v.withdrawable_epoch = queued_at_max + config.min_validator_withdrawability_delay;
                queued_count += 1;
                ejected.push(index);
            }
            ejected
        };

        let down = config.hysteresis_downward_delta();
        let up = config.hysteresis_upward_delta();
        for i in 0..state.validators.len() {
            if !state.validators[i].is_active_at(current_epoch) {
                continue;
            }
            let actual = state.balances[i];
            let e = state.validators[i].effective_balance;
            if actual + down < e || e + up < actual {
                let floored = (actual / config.effective_balance_increment) * config.effective_balance_increment;
                state.validators[i].effective_balance = floored.min(config.max_effective_balance);
            }
        }

        let slashings_len = state.slashings.len() as Epoch;
        let mut slashing_penalties_applied = Vec::new();
        if slashings_len > 0 {
            let half_vector = config.epochs_per_slashings_vector / 2;
            let total_slashed: Gwei = state.slashings.iter().sum();
            let bounded_total_slashed = total_slashed
                .saturating_mul(config.proportional_slashing_multiplier)
                .min(total_active_balance);
            for i in 0..state.validators.len() {
                let withdrawable_epoch = state.validators[i].withdrawable_epoch;
                if state.validators[i].slashed && withdrawable_epoch == current_epoch + half_vector {
                    let ebi = config.effective_balance_increment.max(1);
                    let penalty = state.validators[i].effective_balance / ebi * bounded_total_slashed / total_active_balance * ebi;
                    state.balances[i] = state.balances[i].saturating_sub(penalty);
                    slashing_penalties_applied.push((i as ValidatorIndex, penalty));
                }
            }
        }

        let historical_root_appended = if slashings_len > 0 && (current_epoch + 1) * config.slots_per_epoch % config.slots_per_historical_root == 0 {
            let root = hash_tree(&state.block_roots, &state.state_roots);
            state.historical_roots.push(root);
            true
        } else {
            false
        };

        state.previous_epoch_participation = state.current_epoch_participation.clone();
        state.current_epoch_participation = vec![0u8; state.validators.len()];

        let active_validators = state.active_validator_indices(current_epoch).len();
        registry.replace(state);
        self.last_processed_epoch = Some(current_epoch);

        info!(
            epoch = current_epoch,
            active_validators,
            activated = activated.len(),
            ejected = ejected.len(),
            finalized_epoch = finalized_epoch,
            "processed epoch boundary"
        );
        debug!(total_active_balance, finality_delay, in_leak, "epoch boundary balances");

        Ok(EpochSummary {
            epoch: current_epoch,
            active_validators,
            total_active_balance,
            balance_deltas,
            activated,
            ejected,
            slashing_penalties_applied,
            historical_root_appended,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BeaconState, Validator};

    fn cfg() -> ChainConfig {
        ChainConfig::default()
    }

    fn registry_with(n: usize) -> ValidatorRegistry {
        let validators: Vec<Validator> = (0..n)
            .map(|i| {
                let mut v = Validator::new([i as u8; 48], [0u8; 32], 32_000_000_000);
                v.activation_epoch = 0;
                v.activation_eligibility_epoch = 0;
                v
            })
            .collect();
        let state = BeaconState::genesis(&cfg(), validators, [0u8; 32]);
        ValidatorRegistry::new(state)
    }

    #[test]
    fn rejects_reprocessing_the_same_epoch() {
        let registry = registry_with(4);
        let config = cfg();
        let mut finality = FinalityTracker::new(&config, [0u8; 32]);
        let mut processor = EpochBoundaryProcessor::new();
        processor
            .process_epoch(&registry, &config, &mut finality, 1, Checkpoint::new(0, [0u8; 32]), Checkpoint::new(1, [1u8; 32]))
            .unwrap();
        assert_eq!(
            processor.process_epoch(&registry, &config, &mut finality, 1, Checkpoint::new(0, [0u8; 32]), Checkpoint::new(1, [1u8; 32])),
            Err(EpochBoundaryError::AlreadyProcessed(1))
        );
    }

    #[test]
    fn participation_rotates_after_processing() {
        let registry = registry_with(2);
        {
            let mut state = registry.snapshot();
            state.current_epoch_participation = vec![0b111, 0b111];
            registry.replace(state);
        }
        let config = cfg();
        let mut finality = FinalityTracker::new(&config, [0u8; 32]);
        let mut processor = EpochBoundaryProcessor::new();
        processor
            .process_epoch(&registry, &config, &mut finality, 1, Checkpoint::new(0, [0u8; 32]), Checkpoint::new(1, [1u8; 32]))
            .unwrap();
        let state = registry.snapshot();
        assert_eq!(state.previous_epoch_participation, vec![0b111, 0b111]);
        assert_eq!(state.current_epoch_participation, vec![0, 0]);
    }

    #[test]
    fn fully_attesting_validators_earn_positive_reward() {
        let registry = registry_with(4);
        {
            let mut state = registry.snapshot();
            state.current_epoch_participation = vec![0b111; 4];
            registry.replace(state);
        }
        let config = cfg();
        let mut finality = FinalityTracker::new(&config, [0u8; 32]);
        let mut processor = EpochBoundaryProcessor::new();
        let summary = processor
            .process_epoch(&registry, &config, &mut finality, 1, Checkpoint::new(0, [0u8; 32]), Checkpoint::new(1, [1u8; 32]))
            .unwrap();
        assert!(summary.balance_deltas.iter().all(|d| *d >= 0));
        assert!(summary.balance_deltas.iter().any(|d| *d > 0));
    }

    #[test]
    fn isqrt_matches_known_values() {
        assert_eq!(isqrt(0), 0);
        assert_eq!(isqrt(1), 1);
        assert_eq!(isqrt(99), 9);
        assert_eq!(isqrt(100), 10);
    }
}
