use crate::types::{Epoch, Gwei, Slot};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Enumerated protocol parameters for the beacon chain core. Unlike
/// node-level configuration (network address, keystore path, log
/// format — out of scope for this crate), every field here feeds
/// directly into a consensus computation in `consensus::*`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainConfig {
    // --- Time / schedule ---
    pub seconds_per_slot: u64,
    pub slots_per_epoch: Slot,

    // --- Validator registry & balances ---
    pub max_effective_balance: Gwei,
    pub min_activation_balance: Gwei,
    pub effective_balance_increment: Gwei,
    pub hysteresis_downward_multiplier: u64,
    pub hysteresis_upward_multiplier: u64,
    pub hysteresis_quotient: u64,
    pub ejection_balance: Gwei,
    pub min_per_epoch_churn_limit: u64,
    pub churn_limit_quotient: u64,
    pub max_seed_lookahead: Epoch,
    pub min_validator_withdrawability_delay: Epoch,
    pub shard_committee_period: Epoch,

    // --- Historical roots ---
    pub slots_per_historical_root: u64,

    // --- Attestation subnets / pools ---
    pub subnet_count: u64,
    pub max_pending_per_slot: usize,
    pub max_committees_per_slot: u64,
    pub max_inclusion_delay: Slot,
    pub pool_max_per_slot: usize,
    pub pool_max_age_slots: Slot,

    // --- FFG finality ---
    pub single_epoch_finality: bool,

    // --- SSF round engine ---
    pub ssf_threshold_numerator: u64,
    pub ssf_threshold_denominator: u64,
    pub max_round_history: usize,

    // --- Slashing detector ---
    pub slashing_attestation_window_epochs: Epoch,
    pub max_pending_evidence: usize,

    // --- Epoch boundary rewards (source/target/head weighted scheme) ---
    // Proposer and sync-committee reward terms are a Non-goal here: see
    // SPEC_FULL.md and DESIGN.md (no per-slot proposer-duty or
    // sync-committee-participation record exists in this crate to pay
    // them out against).
    pub base_reward_factor: u64,
    pub weight_denominator: u64,
    pub timely_source_weight: u64,
    pub timely_target_weight: u64,
    pub timely_head_weight: u64,
    pub inactivity_penalty_quotient: u64,
    pub min_epochs_to_inactivity_penalty: Epoch,

    // --- Slashings vector / penalties ---
    pub epochs_per_slashings_vector: Epoch,
    pub proportional_slashing_multiplier: u64,
    pub min_slashing_penalty_quotient: u64,
    pub whistleblower_reward_quotient: u64,
    pub proposer_reward_quotient: u64,

    // --- Deposits ---
    pub min_deposit_amount: Gwei,
    pub deposit_tree_depth: u32,

    // --- Optimistic confirmation ---
    pub confirm_timeout: u64,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("seconds_per_slot must be non-zero")]
    ZeroSlotDuration,
    #[error("slots_per_epoch must be non-zero")]
    ZeroSlotsPerEpoch,
    #[error("effective_balance_increment must be non-zero")]
    ZeroEffectiveBalanceIncrement,
    #[error("max_effective_balance must be a multiple of effective_balance_increment")]
    MaxEffectiveBalanceNotAligned,
    #[error("min_activation_balance exceeds max_effective_balance")]
    MinActivationExceedsMax,
    #[error("ssf_threshold_denominator must be non-zero")]
    ZeroThresholdDenominator,
    #[error("ssf_threshold_numerator must not exceed ssf_threshold_denominator")]
    ThresholdNumeratorExceedsDenominator,
    #[error("weight_denominator must be non-zero")]
    ZeroWeightDenominator,
    #[error("epochs_per_slashings_vector must be non-zero")]
    ZeroSlashingsVectorLength,
}

impl ChainConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.seconds_per_slot == 0 {
            return Err(ConfigError::ZeroSlotDuration);
        }
        if self.slots_per_epoch == 0 {
            return Err(ConfigError::ZeroSlotsPerEpoch);
        }
        if self.effective_balance_increment == 0 {
            return Err(ConfigError::ZeroEffectiveBalanceIncrement);
        }
        if self.max_effective_balance % self.effective_balance_increment != 0 {
            return Err(ConfigError::MaxEffectiveBalanceNotAligned);
        }
        if self.min_activation_balance > self.max_effective_balance {
            return Err(ConfigError::MinActivationExceedsMax);
        }
        if self.ssf_threshold_denominator == 0 {
            return Err(ConfigError::ZeroThresholdDenominator);
        }
        if self.ssf_threshold_numerator > self.ssf_threshold_denominator {
            return Err(ConfigError::ThresholdNumeratorExceedsDenominator);
        }
        if self.weight_denominator == 0 {
            return Err(ConfigError::ZeroWeightDenominator);
        }
        if self.epochs_per_slashings_vector == 0 {
            return Err(ConfigError::ZeroSlashingsVectorLength);
        }
        Ok(())
    }

    pub fn hysteresis_downward_delta(&self) -> Gwei {
        self.effective_balance_increment * self.hysteresis_downward_multiplier
            / self.hysteresis_quotient
    }

    pub fn hysteresis_upward_delta(&self) -> Gwei {
        self.effective_balance_increment * self.hysteresis_upward_multiplier
            / self.hysteresis_quotient
    }
}

impl Default for ChainConfig {
    fn default() -> Self {
        ChainConfig {
            seconds_per_slot: 12,
            slots_per_epoch: 32,

            max_effective_balance: 32_000_000_000,
            min_activation_balance: 32_000_000_000,
            effective_balance_increment: 1_000_000_000,
            hysteresis_downward_multiplier: 1,
            hysteresis_upward_multiplier: 5,
            hysteresis_quotient: 4,
            ejection_balance: 16_000_000_000,
            min_per_epoch_churn_limit: 4,
            churn_limit_quotient: 65_536,
            max_seed_lookahead: 4,
            min_validator_withdrawability_delay: 256,
            shard_committee_period: 256,

            slots_per_historical_root: 8192,

            subnet_count: 64,
            max_pending_per_slot: 256,
            max_committees_per_slot: 64,
            max_inclusion_delay: 32,
            pool_max_per_slot: 128,
            pool_max_age_slots: 64,

            single_epoch_finality: false,

            ssf_threshold_numerator: 2,
            ssf_threshold_denominator: 3,
            max_round_history: 256,

            slashing_attestation_window_epochs: 256,
            max_pending_evidence: 1024,

            base_reward_factor: 64,
            weight_denominator: 64,
            timely_source_weight: 14,
            timely_target_weight: 26,
            timely_head_weight: 14,
            inactivity_penalty_quotient: 50_331_648,
            min_epochs_to_inactivity_penalty: 4,

            epochs_per_slashings_vector: 8192,
            proportional_slashing_multiplier: 2,
            min_slashing_penalty_quotient: 64,
            whistleblower_reward_quotient: 512,
            proposer_reward_quotient: 8,

            min_deposit_amount: 1_000_000_000,
            deposit_tree_depth: 32,

            confirm_timeout: 60,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(ChainConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_zero_slot_duration() {
        let mut cfg = ChainConfig::default();
        cfg.seconds_per_slot = 0;
        assert_eq!(cfg.validate(), Err(ConfigError::ZeroSlotDuration));
    }

    #[test]
    fn rejects_misaligned_max_effective_balance() {
        let mut cfg = ChainConfig::default();
        cfg.max_effective_balance = 32_000_000_001;
        assert_eq!(cfg.validate(), Err(ConfigError::MaxEffectiveBalanceNotAligned));
    }

    #[test]
    fn hysteresis_deltas_match_spec_defaults() {
        let cfg = ChainConfig::default();
        assert_eq!(cfg.hysteresis_downward_delta(), cfg.effective_balance_increment / 4);
        assert_eq!(cfg.hysteresis_upward_delta(), cfg.effective_balance_increment * 5 / 4);
    }
}
