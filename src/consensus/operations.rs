//! Deposit, voluntary exit, and slashing operation processing (§4.10):
//! the per-operation state transitions applied as blocks arrive,
//! distinct from the once-per-epoch work in [`crate::consensus::epoch_processor`].

use crate::config::ChainConfig;
use crate::consensus::registry::ValidatorRegistry;
use crate::crypto::merkle::verify_deposit_proof;
use crate::types::{
    AttesterSlashing, Epoch, Gwei, Hash, ProposerSlashing, SignedVoluntaryExit, Validator,
    ValidatorIndex,
};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum OperationsError {
    #[error("deposit proof does not verify against the eth1 deposit root")]
    InvalidDepositProof,
    #[error("deposit amount {0} is below the minimum deposit")]
    DepositTooSmall(Gwei),
    #[error("voluntary exit references an unknown validator")]
    UnknownValidator(ValidatorIndex),
    #[error("voluntary exit epoch {requested} is in the future relative to current epoch {current}")]
    ExitEpochInFuture { requested: Epoch, current: Epoch },
    #[error("validator is not active or has already initiated exit")]
    NotEligibleToExit,
    #[error("validator has not been active long enough to exit (requires {required} epochs)")]
    BelowShardCommitteePeriod { required: Epoch },
    #[error("attester slashing does not demonstrate a double vote or a surround vote")]
    NotSlashable,
    #[error("attester slashing's intersection of attesting indices contains no slashable validator")]
    NoIntersection,
    #[error("proposer slashing headers do not conflict (same slot, same signing root, or different proposer)")]
    NotConflicting,
}

pub struct DepositResult {
    pub validator_index: ValidatorIndex,
    pub is_new_validator: bool,
}

/// Validates the Merkle proof, then either tops up an existing
/// validator's balance or appends a new one (§4.10).
pub fn process_deposit(
    registry: &ValidatorRegistry,
    config: &ChainConfig,
    pubkey: crate::types::Pubkey,
    withdrawal_credentials: Hash,
    amount: Gwei,
    signature: crate::types::BlsSignature,
    proof: &[Hash],
    index: u64,
    deposit_root: &Hash,
) -> Result<DepositResult, OperationsError> {
    if amount < config.min_deposit_amount {
        return Err(OperationsError::DepositTooSmall(amount));
    }

    let leaf = crate::crypto::merkle::compute_deposit_leaf(&pubkey, &withdrawal_credentials, amount, &signature);
    if !verify_deposit_proof(&leaf, proof, index, deposit_root) {
        return Err(OperationsError::InvalidDepositProof);
    }

    if let Some((existing_index, _)) = registry.get_validator_by_pubkey(&pubkey) {
        let mut state = registry.snapshot();
        state.balances[existing_index as usize] += amount;
        registry.replace(state);
        info!(validator = existing_index, amount, "deposit topped up existing validator");
        return Ok(DepositResult { validator_index: existing_index, is_new_validator: false });
    }

    let effective_balance = (amount / config.effective_balance_increment * config.effective_balance_increment)
        .min(config.max_effective_balance);
    let validator = Validator::new(pubkey, withdrawal_credentials, effective_balance);
    let new_index = registry.append(validator, amount);
    info!(validator = new_index, amount, "deposit registered new validator");
    Ok(DepositResult { validator_index: new_index, is_new_validator: true })
}

/// Validates and schedules a voluntary exit (§4.10).
pub fn process_voluntary_exit(
    registry: &ValidatorRegistry,
    config: &ChainConfig,
    current_epoch: Epoch,
    exit: &SignedVoluntaryExit,
) -> Result<Epoch, OperationsError> {
    let validator = registry
        .get_validator_by_index(exit.validator_index)
        .ok_or(OperationsError::UnknownValidator(exit.validator_index))?;

    if exit.epoch > current_epoch {
        return Err(OperationsError::ExitEpochInFuture { requested: exit.epoch, current: current_epoch });
    }
    if !validator.is_active_at(current_epoch) || validator.is_exiting() {
        return Err(OperationsError::NotEligibleToExit);
    }
    let active_for = current_epoch.saturating_sub(validator.activation_epoch);
    if active_for < config.shard_committee_period {
        return Err(OperationsError::BelowShardCommitteePeriod { required: config.shard_committee_period });
    }

    registry
        .initiate_exit(config, current_epoch, exit.validator_index)
        .map_err(|_| OperationsError::NotEligibleToExit)
}

fn slash_validator(
    registry: &ValidatorRegistry,
    config: &ChainConfig,
    current_epoch: Epoch,
    index: ValidatorIndex,
) -> (Gwei, Gwei) {
    let mut state = registry.snapshot();
    let effective_balance = state.validators[index as usize].effective_balance;

    state.validators[index as usize].slashed = true;
    let extended_withdrawable = current_epoch + config.epochs_per_slashings_vector;
    if state.validators[index as usize].withdrawable_epoch < extended_withdrawable {
        state.validators[index as usize].withdrawable_epoch = extended_withdrawable;
    }

    let slashings_len = state.slashings.len() as Epoch;
    let bucket = (current_epoch % slashings_len) as usize;
    state.slashings[bucket] += effective_balance;

    let immediate_penalty = effective_balance / config.min_slashing_penalty_quotient;
    state.balances[index as usize] = state.balances[index as usize].saturating_sub(immediate_penalty);

    let whistleblower_reward = effective_balance / config.whistleblower_reward_quotient;
    let proposer_share = whistleblower_reward / config.proposer_reward_quotient;

    registry.replace(state);

    if !registry.get_validator_by_index(index).map(|v| v.is_exiting()).unwrap_or(true) {
        let _ = registry.initiate_exit(config, current_epoch, index);
    }

    (whistleblower_reward, proposer_share)
}

/// Validates a double-vote or surround-vote pair, slashes every
/// slashable validator in the intersection of attesting indices, and
/// returns the whistleblower/proposer reward totals (§4.10). Crediting
/// those totals to a specific whistleblower or block proposer is left
/// to the caller: this function has no whistleblower/proposer index to
/// credit against, the same way [`process_deposit`] and
/// [`process_voluntary_exit`] leave follow-up effects at the caller
/// boundary.
pub fn process_attester_slashing(
    registry: &ValidatorRegistry,
    config: &ChainConfig,
    current_epoch: Epoch,
    slashing: &AttesterSlashing,
) -> Result<(Vec<ValidatorIndex>, Gwei, Gwei), OperationsError> {
    let a = &slashing.attestation_1.data;
    let b = &slashing.attestation_2.data;

    let double_vote = a.target.epoch == b.target.epoch && (a.target.root != b.target.root || a.source.root != b.source.root);
    let surrounds = (a.source.epoch < b.source.epoch && b.target.epoch < a.target.epoch)
        || (b.source.epoch < a.source.epoch && a.target.epoch < b.target.epoch);
    if !double_vote && !surrounds {
        return Err(OperationsError::NotSlashable);
    }

    let mut indices_1 = slashing.attestation_1.attesting_indices.clone();
    let mut indices_2 = slashing.attestation_2.attesting_indices.clone();
    indices_1.sort_unstable();
    indices_1.dedup();
    indices_2.sort_unstable();
    indices_2.dedup();

    let intersection: Vec<ValidatorIndex> = indices_1.into_iter().filter(|i| indices_2.binary_search(i).is_ok()).collect();
    if intersection.is_empty() {
        return Err(OperationsError::NoIntersection);
    }

    let slashable: Vec<ValidatorIndex> = intersection
        .into_iter()
        .filter(|&i| registry.get_validator_by_index(i).map(|v| v.is_slashable_at(current_epoch)).unwrap_or(false))
        .collect();
    if slashable.is_empty() {
        return Err(OperationsError::NoIntersection);
    }

    let mut total_whistleblower = 0;
    let mut total_proposer = 0;
    for &index in &slashable {
        let (whistleblower, proposer) = slash_validator(registry, config, current_epoch, index);
        total_whistleblower += whistleblower;
        total_proposer += proposer;
    }

    info!(count = slashable.len(), current_epoch, "processed attester slashing");
    Ok((slashable, total_whistleblower, total_proposer))
}

/// Validates two signed headers for the same slot and proposer with
/// different signing roots, then slashes the proposer (§4.10). As with
/// [`process_attester_slashing`], the returned whistleblower/proposer
/// reward totals are not credited to any balance here — the caller
/// supplies the whistleblower identity (this crate has no notion of
/// "who reported this slashing") and the current block's proposer
/// index, then applies the credit itself.
pub fn process_proposer_slashing(
    registry: &ValidatorRegistry,
    config: &ChainConfig,
    current_epoch: Epoch,
    slashing: &ProposerSlashing,
    signing_root_1: Hash,
    signing_root_2: Hash,
) -> Result<(ValidatorIndex, Gwei, Gwei), OperationsError> {
    let h1 = &slashing.signed_header_1.header;
    let h2 = &slashing.signed_header_2.header;

    if h1.slot != h2.slot || h1.proposer_index != h2.proposer_index || signing_root_1 == signing_root_2 {
        return Err(OperationsError::NotConflicting);
    }

    let index = h1.proposer_index;
    let validator = registry.get_validator_by_index(index).ok_or(OperationsError::UnknownValidator(index))?;
    if !validator.is_slashable_at(current_epoch) {
        return Err(OperationsError::NoIntersection);
    }

    let (whistleblower, proposer) = slash_validator(registry, config, current_epoch, index);
    info!(validator = index, current_epoch, "processed proposer slashing");
    Ok((index, whistleblower, proposer))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::bls::SecretKeyHandle;
    use crate::crypto::merkle::compute_deposit_leaf;
    use crate::types::{BeaconState, Checkpoint, IndexedAttestation, AttestationData};

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

    fn build_deposit_proof(leaf: Hash, index: u64) -> (Vec<Hash>, Hash) {
        let depth = crate::crypto::merkle::DEPOSIT_CONTRACT_TREE_DEPTH;
        let mut node = leaf;
        let mut proof = Vec::with_capacity(depth + 1);
        for i in 0..depth {
            let sibling = [i as u8; 32];
            proof.push(sibling);
            node = if (index >> i) & 1 == 0 {
                crate::crypto::Hasher::hash_two(&node, &sibling)
            } else {
                crate::crypto::Hasher::hash_two(&sibling, &node)
            };
        }
        let count_mix = [0xAAu8; 32];
        proof.push(count_mix);
        let root = crate::crypto::Hasher::hash_two(&node, &count_mix);
        (proof, root)
    }

    #[test]
    fn deposit_rejects_amount_below_minimum() {
        let registry = registry_with(0);
        let sk = SecretKeyHandle::from_seed(b"d0");
        let leaf = compute_deposit_leaf(&sk.public_key(), &[0u8; 32], 0, &[0u8; 96]);
        let (proof, root) = build_deposit_proof(leaf, 0);
        assert_eq!(
            process_deposit(&registry, &cfg(), sk.public_key(), [0u8; 32], 0, [0u8; 96], &proof, 0, &root),
            Err(OperationsError::DepositTooSmall(0))
        );
    }

    #[test]
    fn deposit_appends_new_validator_on_valid_proof() {
        let registry = registry_with(0);
        let sk = SecretKeyHandle::from_seed(b"d1");
        let amount = 32_000_000_000u64;
        let leaf = compute_deposit_leaf(&sk.public_key(), &[0u8; 32], amount, &[0u8; 96]);
        let (proof, root) = build_deposit_proof(leaf, 0);
        let result = process_deposit(&registry, &cfg(), sk.public_key(), [0u8; 32], amount, [0u8; 96], &proof, 0, &root).unwrap();
        assert!(result.is_new_validator);
        assert_eq!(registry.get_validator_by_index(result.validator_index).unwrap().effective_balance, amount);
    }

    #[test]
    fn deposit_rejects_invalid_proof() {
        let registry = registry_with(0);
        let sk = SecretKeyHandle::from_seed(b"d2");
        let amount = 32_000_000_000u64;
        let leaf = compute_deposit_leaf(&sk.public_key(), &[0u8; 32], amount, &[0u8; 96]);
        let (proof, _) = build_deposit_proof(leaf, 0);
        let wrong_root = [0xFFu8; 32];
        assert_eq!(
            process_deposit(&registry, &cfg(), sk.public_key(), [0u8; 32], amount, [0u8; 96], &proof, 0, &wrong_root),
            Err(OperationsError::InvalidDepositProof)
        );
    }

    #[test]
    fn voluntary_exit_requires_shard_committee_period() {
        let registry = registry_with(1);
        let exit = SignedVoluntaryExit { epoch: 1, validator_index: 0, signature: [0u8; 96] };
        assert_eq!(
            process_voluntary_exit(&registry, &cfg(), 1, &exit),
            Err(OperationsError::BelowShardCommitteePeriod { required: cfg().shard_committee_period })
        );
    }

    #[test]
    fn voluntary_exit_succeeds_after_committee_period() {
        let registry = registry_with(1);
        let current_epoch = cfg().shard_committee_period;
        let exit = SignedVoluntaryExit { epoch: current_epoch, validator_index: 0, signature: [0u8; 96] };
        let exit_epoch = process_voluntary_exit(&registry, &cfg(), current_epoch, &exit).unwrap();
        assert!(exit_epoch >= current_epoch);
        assert!(registry.get_validator_by_index(0).unwrap().is_exiting());
    }

    fn indexed(source: Epoch, target: Epoch, target_root: Hash, indices: Vec<ValidatorIndex>) -> IndexedAttestation {
        IndexedAttestation {
            attesting_indices: indices,
            data: AttestationData {
                slot: target * cfg().slots_per_epoch,
                beacon_block_root: [1u8; 32],
                source: Checkpoint::new(source, [2u8; 32]),
                target: Checkpoint::new(target, target_root),
                committee_index: 0,
            },
            signature: [0u8; 96],
        }
    }

    #[test]
    fn attester_slashing_double_vote_slashes_intersection() {
        let registry = registry_with(3);
        let a1 = indexed(1, 2, [1u8; 32], vec![0, 1]);
        let a2 = indexed(1, 2, [2u8; 32], vec![1, 2]);
        let slashing = AttesterSlashing { attestation_1: a1, attestation_2: a2 };
        let (slashed, _, _) = process_attester_slashing(&registry, &cfg(), 0, &slashing).unwrap();
        assert_eq!(slashed, vec![1]);
        assert!(registry.get_validator_by_index(1).unwrap().slashed);
    }

    #[test]
    fn attester_slashing_rejects_non_conflicting_votes() {
        let registry = registry_with(2);
        let a1 = indexed(1, 2, [1u8; 32], vec![0]);
        let a2 = indexed(2, 3, [2u8; 32], vec![1]);
        let slashing = AttesterSlashing { attestation_1: a1, attestation_2: a2 };
        assert_eq!(process_attester_slashing(&registry, &cfg(), 0, &slashing), Err(OperationsError::NotSlashable));
    }

    #[test]
    fn proposer_slashing_requires_same_slot_and_proposer() {
        let registry = registry_with(1);
        let h1 = crate::types::BeaconBlockHeader { slot: 5, proposer_index: 0, parent_root: [0u8; 32], state_root: [1u8; 32], body_root: [2u8; 32] };
        let h2 = crate::types::BeaconBlockHeader { slot: 6, proposer_index: 0, parent_root: [0u8; 32], state_root: [1u8; 32], body_root: [3u8; 32] };
        let slashing = ProposerSlashing {
            signed_header_1: crate::types::SignedBeaconBlockHeader { header: h1, signature: [0u8; 96] },
            signed_header_2: crate::types::SignedBeaconBlockHeader { header: h2, signature: [0u8; 96] },
        };
        assert_eq!(
            process_proposer_slashing(&registry, &cfg(), 0, &slashing, [1u8; 32], [2u8; 32]),
            Err(OperationsError::NotConflicting)
        );
    }

    #[test]
    fn proposer_slashing_slashes_on_conflicting_roots() {
        let registry = registry_with(1);
        let h1 = crate::types::BeaconBlockHeader { slot: 5, proposer_index: 0, parent_root: [0u8; 32], state_root: [1u8; 32], body_root: [2u8; 32] };
        let h2 = crate::types::BeaconBlockHeader { slot: 5, proposer_index: 0, parent_root: [0u8; 32], state_root: [1u8; 32], body_root: [3u8; 32] };
        let slashing = ProposerSlashing {
            signed_header_1: crate::types::SignedBeaconBlockHeader { header: h1, signature: [0u8; 96] },
            signed_header_2: crate::types::SignedBeaconBlockHeader { header: h2, signature: [0u8; 96] },
        };
        let (index, _, _) = process_proposer_slashing(&registry, &cfg(), 0, &slashing, [1u8; 32], [2u8; 32]).unwrap();
        assert_eq!(index, 0);
        assert!(registry.get_validator_by_index(0).unwrap().slashed);
    }
}
