//! Single-Slot Finality round engine (§4.7): a per-slot state machine
//! that takes a proposed block through attestation, optional explicit
//! aggregation, and finalization once a supermajority of stake agrees
//! on one root.

use crate::crypto::{bls, hash::ssf_vote_digest};
use crate::types::{BlsSignature, Epoch, Gwei, Hash, Pubkey, Slot, ValidatorIndex};
use std::collections::{HashMap, VecDeque};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SsfError {
    #[error("no round exists for slot {0}")]
    RoundNotFound(Slot),
    #[error("a round already exists for slot {0}")]
    RoundAlreadyExists(Slot),
    #[error("operation not valid in the round's current phase")]
    WrongPhase,
    #[error("round for slot {0} is already finalized")]
    AlreadyFinalized(Slot),
    #[error("validator {validator} already voted for root {root:?}")]
    DuplicateVote { validator: ValidatorIndex, root: Hash },
    #[error("validator {validator} equivocated: previously voted {first:?}, now {second:?}")]
    Equivocation { validator: ValidatorIndex, first: Hash, second: Hash },
    #[error("round has zero total stake")]
    ZeroTotalStake,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundPhase {
    Propose,
    Attest,
    Aggregate,
    Finalize,
}

#[derive(Debug, Clone)]
pub struct Vote {
    pub validator: ValidatorIndex,
    pub pubkey: Pubkey,
    pub stake: Gwei,
    pub root: Hash,
    pub signature: BlsSignature,
}

#[derive(Debug, Clone)]
pub struct Round {
    pub slot: Slot,
    pub phase: RoundPhase,
    pub block_root: Option<Hash>,
    pub total_stake: Gwei,
    pub stake_by_root: HashMap<Hash, Gwei>,
    pub votes: Vec<Vote>,
    voted: HashMap<ValidatorIndex, Hash>,
    pub finalized: bool,
    pub finalized_at: Option<u64>,
    pub agg_sig: Option<BlsSignature>,
    pub bitfield: Vec<u8>,
}

impl Round {
    fn new(slot: Slot, total_stake: Gwei) -> Self {
        Round {
            slot,
            phase: RoundPhase::Propose,
            block_root: None,
            total_stake,
            stake_by_root: HashMap::new(),
            votes: Vec::new(),
            voted: HashMap::new(),
            finalized: false,
            finalized_at: None,
            agg_sig: None,
            bitfield: Vec::new(),
        }
    }

    fn meets_threshold(&self, root: &Hash, num: u64, den: u64) -> bool {
        let stake = self.stake_by_root.get(root).copied().unwrap_or(0);
        stake * den >= self.total_stake * num
    }

    fn leading_root(&self, num: u64, den: u64) -> Option<Hash> {
        self.stake_by_root
            .iter()
            .filter(|(root, _)| self.meets_threshold(root, num, den))
            .max_by(|(root_a, stake_a), (root_b, stake_b)| stake_a.cmp(stake_b).then_with(|| root_a.cmp(root_b)))
            .map(|(root, _)| *root)
    }
}

pub struct SsfRoundEngine {
    threshold_num: u64,
    threshold_den: u64,
    max_round_history: usize,
    rounds: HashMap<Slot, Round>,
    history: VecDeque<Slot>,
}

impl SsfRoundEngine {
    pub fn new(threshold_num: u64, threshold_den: u64, max_round_history: usize) -> Self {
        SsfRoundEngine {
            threshold_num,
            threshold_den,
            max_round_history,
            rounds: HashMap::new(),
            history: VecDeque::new(),
        }
    }

    pub fn new_round(&mut self, slot: Slot, total_stake: Gwei) -> Result<(), SsfError> {
        if self.rounds.contains_key(&slot) {
            return Err(SsfError::RoundAlreadyExists(slot));
        }
        if total_stake == 0 {
            return Err(SsfError::ZeroTotalStake);
        }
        self.rounds.insert(slot, Round::new(slot, total_stake));
        if self.history.len() >= self.max_round_history {
            if let Some(evicted) = self.history.pop_front() {
                self.rounds.remove(&evicted);
            }
        }
        self.history.push_back(slot);
        Ok(())
    }

    fn round_mut(&mut self, slot: Slot) -> Result<&mut Round, SsfError> {
        self.rounds.get_mut(&slot).ok_or(SsfError::RoundNotFound(slot))
    }

    pub fn propose_block(&mut self, slot: Slot, root: Hash) -> Result<(), SsfError> {
        let round = self.round_mut(slot)?;
        if round.phase != RoundPhase::Propose {
            return Err(SsfError::WrongPhase);
        }
        round.block_root = Some(root);
        round.phase = RoundPhase::Attest;
        Ok(())
    }

    /// Accepts a vote while the round is unfinalized, rejecting
    /// duplicates and recording (then rejecting) equivocation. Crosses
    /// directly into `Finalize` the moment a root meets the
    /// supermajority threshold (the optimistic fast path).
    pub fn submit_attestation(&mut self, slot: Slot, vote: Vote) -> Result<RoundPhase, SsfError> {
        let round = self.round_mut(slot)?;
        if round.finalized {
            return Err(SsfError::AlreadyFinalized(slot));
        }
        if round.phase != RoundPhase::Attest && round.phase != RoundPhase::Aggregate {
            return Err(SsfError::WrongPhase);
        }

        if let Some(previous_root) = round.voted.get(&vote.validator).copied() {
            if previous_root == vote.root {
                return Err(SsfError::DuplicateVote { validator: vote.validator, root: vote.root });
            }
            return Err(SsfError::Equivocation {
                validator: vote.validator,
                first: previous_root,
                second: vote.root,
            });
        }

        *round.stake_by_root.entry(vote.root).or_insert(0) += vote.stake;
        round.voted.insert(vote.validator, vote.root);
        let root = vote.root;
        round.votes.push(vote);

        if round.meets_threshold(&root, self.threshold_num, self.threshold_den) {
            round.phase = RoundPhase::Finalize;
        }
        Ok(round.phase)
    }

    /// Builds the round's aggregate BLS signature over every
    /// submitted vote's signature and re-checks whether any root now
    /// meets the threshold.
    pub fn aggregate_votes(&mut self, slot: Slot) -> Result<RoundPhase, SsfError> {
        let round = self.round_mut(slot)?;
        if round.finalized {
            return Err(SsfError::AlreadyFinalized(slot));
        }
        if round.phase != RoundPhase::Attest {
            return Err(SsfError::WrongPhase);
        }

        let signatures: Vec<BlsSignature> = round.votes.iter().map(|v| v.signature).collect();
        round.agg_sig = Some(bls::aggregate_signatures(&signatures));

        let mut bitfield = Vec::new();
        for (i, _) in round.votes.iter().enumerate() {
            crate::consensus::bitfield::set_bit(&mut bitfield, i);
        }
        round.bitfield = bitfield;

        round.phase = RoundPhase::Aggregate;
        if let Some(leading) = round.leading_root(self.threshold_num, self.threshold_den) {
            let _ = leading;
            round.phase = RoundPhase::Finalize;
        }
        Ok(round.phase)
    }

    /// Selects the highest-stake root meeting the threshold (ties
    /// broken by lexicographically greater root), marks the round
    /// finalized, and rolls it into the bounded history.
    pub fn finalize(&mut self, slot: Slot, now: u64) -> Result<Hash, SsfError> {
        let round = self.round_mut(slot)?;
        if round.finalized {
            return Err(SsfError::AlreadyFinalized(slot));
        }

        let winner = round
            .leading_root(self.threshold_num, self.threshold_den)
            .ok_or(SsfError::WrongPhase)?;

        round.block_root = Some(winner);
        round.finalized = true;
        round.finalized_at = Some(now);
        round.phase = RoundPhase::Finalize;
        info!(slot, root = ?winner, "ssf round finalized");
        Ok(winner)
    }

    pub fn get_round(&self, slot: Slot) -> Option<Round> {
        self.rounds.get(&slot).cloned()
    }

    /// The root currently meeting the supermajority threshold for
    /// `slot`, if any, ranked the same way [`Self::finalize`] picks a
    /// winner. Lets a caller that just observed `RoundPhase::Finalize`
    /// from [`Self::submit_attestation`]/[`Self::aggregate_votes`] find
    /// out which root triggered it without finalizing the round itself.
    pub fn leading_root(&self, slot: Slot) -> Option<Hash> {
        self.rounds.get(&slot)?.leading_root(self.threshold_num, self.threshold_den)
    }

    pub fn is_finalized(&self, slot: Slot) -> bool {
        self.rounds.get(&slot).map(|r| r.finalized).unwrap_or(false)
    }
}

/// A compact, independently verifiable attestation of finality for a
/// given slot (§4.7).
#[derive(Debug, Clone)]
pub struct FinalityProof {
    pub epoch: Epoch,
    pub slot: Slot,
    pub block_root: Hash,
    pub state_root: Hash,
    pub agg_sig: BlsSignature,
    pub participant_bitfield: Vec<u8>,
    pub participant_count: u64,
    pub total_stake: Gwei,
}

/// Extracts the participating keys from the bitfield and
/// fast-aggregate-verifies them over the canonical vote digest.
pub fn verify_finality_proof(proof: &FinalityProof, validator_pubkeys: &[Pubkey]) -> bool {
    let digest = ssf_vote_digest(proof.slot, &proof.block_root);
    let participants: Vec<Pubkey> = validator_pubkeys
        .iter()
        .enumerate()
        .filter(|(i, _)| crate::consensus::bitfield::get_bit(&proof.participant_bitfield, *i))
        .map(|(_, pk)| *pk)
        .collect();
    if participants.is_empty() {
        return false;
    }
    bls::fast_aggregate_verify(&participants, &digest, &proof.agg_sig)
}

pub fn proof_meets_threshold(proof: &FinalityProof, total_stake: Gwei, num: u64, den: u64) -> bool {
    proof.total_stake * den >= total_stake * num
}
