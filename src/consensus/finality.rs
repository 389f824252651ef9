//! Casper FFG finality tracker (§4.6): the 4-bit justification vector
//! plus the justified/finalized checkpoint advancement rules.

use crate::config::ChainConfig;
use crate::types::{Checkpoint, Epoch, Gwei, Hash};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FinalityError {
    #[error("finalized epoch {finalized} exceeds justified epoch {justified}")]
    FinalizedAheadOfJustified { finalized: Epoch, justified: Epoch },
    #[error("justified epoch {justified} exceeds current epoch {current}")]
    JustifiedAheadOfCurrent { justified: Epoch, current: Epoch },
}

pub struct FinalityTracker {
    single_epoch_finality: bool,
    justification_bits: [bool; 4],
    previous_justified: Checkpoint,
    current_justified: Checkpoint,
    finalized: Checkpoint,
}

impl FinalityTracker {
    pub fn new(config: &ChainConfig, genesis_root: Hash) -> Self {
        let genesis = Checkpoint::genesis(genesis_root);
        FinalityTracker {
            single_epoch_finality: config.single_epoch_finality,
            justification_bits: [false; 4],
            previous_justified: genesis,
            current_justified: genesis,
            finalized: genesis,
        }
    }

    pub fn previous_justified(&self) -> Checkpoint {
        self.previous_justified
    }

    pub fn current_justified(&self) -> Checkpoint {
        self.current_justified
    }

    pub fn finalized(&self) -> Checkpoint {
        self.finalized
    }

    pub fn justification_bits(&self) -> [bool; 4] {
        self.justification_bits
    }

    pub fn finality_delay(&self, current_epoch: Epoch) -> Epoch {
        current_epoch.saturating_sub(self.finalized.epoch)
    }

    pub fn is_finalized_at(&self, epoch: Epoch) -> bool {
        self.finalized.epoch >= epoch
    }

    pub fn validate(&self, current_epoch: Epoch) -> Result<(), FinalityError> {
        if self.finalized.epoch > self.current_justified.epoch {
            return Err(FinalityError::FinalizedAheadOfJustified {
                finalized: self.finalized.epoch,
                justified: self.current_justified.epoch,
            });
        }
        if self.current_justified.epoch > current_epoch {
            return Err(FinalityError::JustifiedAheadOfCurrent {
                justified: self.current_justified.epoch,
                current: current_epoch,
            });
        }
        Ok(())
    }

    /// Runs one epoch boundary of FFG (§4.6): rotates the bit vector,
    /// justifies the previous and/or current epoch from their target
    /// attesting balances, then applies the first matching
    /// finalization rule.
    pub fn process_epoch(
        &mut self,
        current_epoch: Epoch,
        previous_checkpoint: Checkpoint,
        current_checkpoint: Checkpoint,
        total_active_balance: Gwei,
        prev_target_balance: Gwei,
        curr_target_balance: Gwei,
    ) {
        // Finalization below must reference the checkpoints as they
        // stood before this epoch's justification updates.
        let old_previous_justified = self.previous_justified;
        let old_current_justified = self.current_justified;

        self.previous_justified = old_current_justified;
        self.justification_bits = [false, self.justification_bits[0], self.justification_bits[1], self.justification_bits[2]];

        if prev_target_balance * 3 >= total_active_balance * 2 {
            self.justification_bits[1] = true;
            self.current_justified = previous_checkpoint;
        }
        if curr_target_balance * 3 >= total_active_balance * 2 {
            self.justification_bits[0] = true;
            self.current_justified = current_checkpoint;
            if self.single_epoch_finality {
                self.finalized = self.current_justified;
                info!(epoch = current_epoch, "finalized under single-epoch finality mode");
                return;
            }
        }

        let bits = self.justification_bits;
        if bits[1] && bits[2] && bits[3] && old_previous_justified.epoch + 3 == current_epoch {
            self.finalized = old_previous_justified;
        } else if bits[1] && bits[2] && old_previous_justified.epoch + 2 == current_epoch {
            self.finalized = old_previous_justified;
        } else if bits[0] && bits[1] && bits[2] && old_current_justified.epoch + 2 == current_epoch {
            self.finalized = old_current_justified;
        } else if bits[0] && bits[1] && old_current_justified.epoch + 1 == current_epoch {
            self.finalized = old_current_justified;
        }

        if self.finalized.epoch > 0 {
            info!(epoch = self.finalized.epoch, "epoch finalized");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> FinalityTracker {
        FinalityTracker::new(&ChainConfig::default(), [0u8; 32])
    }

    #[test]
    fn genesis_state_is_all_unjustified() {
        let t = tracker();
        assert_eq!(t.justification_bits(), [false; 4]);
        assert_eq!(t.finalized().epoch, 0);
        assert!(t.validate(0).is_ok());
    }

    #[test]
    fn rule_4_finalizes_after_two_consecutive_justifications() {
        let mut t = tracker();
        // Epoch 1: justify current (bit0), no rule applies yet.
        t.process_epoch(1, Checkpoint::new(0, [0u8; 32]), Checkpoint::new(1, [1u8; 32]), 100, 0, 100);
        assert!(t.justification_bits()[0]);
        assert_eq!(t.finalized().epoch, 0);

        // Epoch 2: justify previous (now epoch 1) and current (epoch 2); rule (d) chains to rule 4.
        t.process_epoch(2, Checkpoint::new(1, [1u8; 32]), Checkpoint::new(2, [2u8; 32]), 100, 100, 100);
        assert_eq!(t.finalized(), Checkpoint::new(1, [1u8; 32]));
    }

    #[test]
    fn single_epoch_finality_finalizes_immediately() {
        let mut config = ChainConfig::default();
        config.single_epoch_finality = true;
        let mut t = FinalityTracker::new(&config, [0u8; 32]);
        t.process_epoch(1, Checkpoint::new(0, [0u8; 32]), Checkpoint::new(1, [1u8; 32]), 100, 0, 100);
        assert_eq!(t.finalized(), Checkpoint::new(1, [1u8; 32]));
    }

    #[test]
    fn below_threshold_does_not_justify() {
        let mut t = tracker();
        t.process_epoch(1, Checkpoint::new(0, [0u8; 32]), Checkpoint::new(1, [1u8; 32]), 100, 0, 50);
        assert!(!t.justification_bits()[0]);
        assert_eq!(t.current_justified().epoch, 0);
    }

    #[test]
    fn validate_rejects_finalized_ahead_of_justified() {
        let mut t = tracker();
        t.finalized = Checkpoint::new(5, [9u8; 32]);
        assert_eq!(
            t.validate(5),
            Err(FinalityError::FinalizedAheadOfJustified { finalized: 5, justified: 0 })
        );
    }
}
