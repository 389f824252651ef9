use super::{Epoch, Gwei, Pubkey, FAR_FUTURE_EPOCH};
use serde::{Deserialize, Serialize};

/// A single entry in the beacon chain's validator registry.
///
/// Registry indices are append-only: once a validator is added its
/// index never changes and is never reassigned to another pubkey.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validator {
    pub pubkey: Pubkey,
    pub withdrawal_credentials: [u8; 32],
    pub effective_balance: Gwei,
    pub slashed: bool,
    pub activation_eligibility_epoch: Epoch,
    pub activation_epoch: Epoch,
    pub exit_epoch: Epoch,
    pub withdrawable_epoch: Epoch,
}

impl Validator {
    /// A pending validator: eligible but not yet scheduled for
    /// activation, exit, or withdrawal.
    pub fn new(pubkey: Pubkey, withdrawal_credentials: [u8; 32], effective_balance: Gwei) -> Self {
        Validator {
            pubkey,
            withdrawal_credentials,
            effective_balance,
            slashed: false,
            activation_eligibility_epoch: FAR_FUTURE_EPOCH,
            activation_epoch: FAR_FUTURE_EPOCH,
            exit_epoch: FAR_FUTURE_EPOCH,
            withdrawable_epoch: FAR_FUTURE_EPOCH,
        }
    }

    /// `activation_epoch <= e < exit_epoch`.
    pub fn is_active_at(&self, epoch: Epoch) -> bool {
        self.activation_epoch <= epoch && epoch < self.exit_epoch
    }

    /// Not already slashed, and within the slashable window
    /// `activation_epoch <= e < withdrawable_epoch`.
    pub fn is_slashable_at(&self, epoch: Epoch) -> bool {
        !self.slashed && self.activation_epoch <= epoch && epoch < self.withdrawable_epoch
    }

    /// `activation_epoch == FAR_FUTURE_EPOCH`: awaiting activation.
    pub fn is_eligible_for_activation_queue(&self) -> bool {
        self.activation_epoch == FAR_FUTURE_EPOCH
    }

    /// Already in the process of exiting (exit has been scheduled).
    pub fn is_exiting(&self) -> bool {
        self.exit_epoch != FAR_FUTURE_EPOCH
    }

    /// `activation_eligibility_epoch <= activation_epoch <= exit_epoch
    /// <= withdrawable_epoch`, allowing `FAR_FUTURE_EPOCH` at any point
    /// in the chain where the value is not yet set.
    pub fn check_epoch_ordering_invariant(&self) -> bool {
        self.activation_eligibility_epoch <= self.activation_epoch
            && self.activation_epoch <= self.exit_epoch
            && self.exit_epoch <= self.withdrawable_epoch
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> Validator {
        Validator::new([1u8; 48], [0u8; 32], 32_000_000_000)
    }

    #[test]
    fn new_validator_has_far_future_epochs() {
        let v = validator();
        assert_eq!(v.activation_eligibility_epoch, FAR_FUTURE_EPOCH);
        assert_eq!(v.activation_epoch, FAR_FUTURE_EPOCH);
        assert_eq!(v.exit_epoch, FAR_FUTURE_EPOCH);
        assert_eq!(v.withdrawable_epoch, FAR_FUTURE_EPOCH);
        assert!(v.check_epoch_ordering_invariant());
        assert!(v.is_eligible_for_activation_queue());
    }

    #[test]
    fn active_window_is_half_open() {
        let mut v = validator();
        v.activation_epoch = 5;
        v.exit_epoch = 10;
        assert!(!v.is_active_at(4));
        assert!(v.is_active_at(5));
        assert!(v.is_active_at(9));
        assert!(!v.is_active_at(10));
    }

    #[test]
    fn slashable_excludes_already_slashed() {
        let mut v = validator();
        v.activation_epoch = 0;
        v.withdrawable_epoch = 100;
        assert!(v.is_slashable_at(50));
        v.slashed = true;
        assert!(!v.is_slashable_at(50));
    }
}
