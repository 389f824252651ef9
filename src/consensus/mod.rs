pub mod bitfield;
pub mod epoch_processor;
pub mod fast_confirm;
pub mod finality;
pub mod fork_choice;
pub mod migration;
pub mod operations;
pub mod pool;
pub mod registry;
pub mod slashing_detector;
pub mod ssf;
pub mod subnet;
pub mod time;

pub use bitfield::*;
pub use epoch_processor::*;
pub use fast_confirm::*;
pub use finality::*;
pub use fork_choice::*;
pub use migration::*;
pub use operations::*;
pub use pool::*;
pub use registry::*;
pub use slashing_detector::*;
pub use ssf::*;
pub use subnet::*;
pub use time::*;

use crate::config::{ChainConfig, ConfigError};
use crate::types::*;
use thiserror::Error;
use tracing::debug;

/// Errors surfaced by [`BeaconChain`]'s composed operations. Each
/// variant wraps the originating component's own error type rather
/// than flattening it into a string.
#[derive(Debug, Error)]
pub enum BeaconChainError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    ForkChoice(#[from] ForkChoiceError),
    #[error(transparent)]
    Subnet(#[from] SubnetError),
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error(transparent)]
    EpochBoundary(#[from] EpochBoundaryError),
    #[error(transparent)]
    Ssf(#[from] SsfError),
}

/// Wires together every leaf component into the data flow described
/// by the system overview: the slot clock drives phase transitions,
/// attestations are routed to subnets and aggregated into the pool,
/// fork choice tracks the head from latest messages, and the epoch
/// boundary runs FFG, rewards, registry churn, and slashings payout.
///
/// Each field owns its own lock-free state and is only ever touched
/// one at a time by the methods here — no method holds more than one
/// component's internals mutably borrowed across an await or a call
/// into another component.
pub struct BeaconChain {
    pub config: ChainConfig,
    pub slot_clock: SlotClock,
    pub registry: ValidatorRegistry,
    pub fork_choice: ForkChoice,
    pub finality: FinalityTracker,
    pub ssf: SsfRoundEngine,
    pub slashing_detector: SlashingDetector,
    pub epoch_processor: EpochBoundaryProcessor,
    pub subnets: SubnetRouter,
    pub pool: AttestationPoolV2,
    pub fast_confirm: FastConfirmTracker,
    pub migrations: MigrationRegistry,
}

impl BeaconChain {
    pub fn new(
        config: ChainConfig,
        genesis_validators: Vec<Validator>,
        genesis_time: u64,
        genesis_root: Hash,
    ) -> Result<Self, BeaconChainError> {
        config.validate()?;

        let state = BeaconState::genesis(&config, genesis_validators, genesis_root);
        let registry = ValidatorRegistry::new(state);
        let slot_clock = SlotClock::new(genesis_time, config.seconds_per_slot);
        let fork_choice = ForkChoice::new(BlockRef::genesis(genesis_root));
        let finality = FinalityTracker::new(&config, genesis_root);
        let ssf = SsfRoundEngine::new(config.ssf_threshold_numerator, config.ssf_threshold_denominator, config.max_round_history);
        let slashing_detector = SlashingDetector::new(config.slashing_attestation_window_epochs, config.max_pending_evidence);
        let subnets = SubnetRouter::new(config.subnet_count, config.max_pending_per_slot);
        let pool = AttestationPoolV2::new(config.max_committees_per_slot, config.max_inclusion_delay, config.pool_max_per_slot);
        let fast_confirm = FastConfirmTracker::new(config.confirm_timeout);

        Ok(BeaconChain {
            config,
            slot_clock,
            registry,
            fork_choice,
            finality,
            ssf,
            slashing_detector,
            epoch_processor: EpochBoundaryProcessor::new(),
            subnets,
            pool,
            fast_confirm,
            migrations: MigrationRegistry::new(),
        })
    }

    pub fn current_slot(&self, now: u64) -> Slot {
        self.slot_clock.current_slot(now)
    }

    pub fn current_epoch(&self, now: u64) -> Epoch {
        self.slot_clock.epoch_of(self.current_slot(now), self.config.slots_per_epoch)
    }

    /// Registers an incoming block with both fork choice and the
    /// slashing detector (so a later conflicting proposal at the same
    /// slot is caught even if this block is never imported again).
    pub fn on_block(&mut self, block: BlockRef, proposer: ValidatorIndex) -> Result<(), BeaconChainError> {
        self.slashing_detector.register_block(proposer, block.slot, block.root);
        self.fork_choice.on_block(block)?;
        Ok(())
    }

    /// Routes an attestation to its gossip subnet, adds it to the
    /// aggregation pool, feeds it to fork choice as a latest message,
    /// and records it with the slashing detector. Returns the subnet
    /// id the attestation was routed to.
    pub fn on_attestation(
        &mut self,
        validator: ValidatorIndex,
        attestation: &Attestation,
        current_slot: Slot,
    ) -> Result<u64, BeaconChainError> {
        let subnet_id = self.subnets.route_attestation(attestation)?;
        self.pool.add_attestation(attestation.clone(), current_slot)?;
        self.fork_choice.on_attestation(validator, attestation.data.target.root, attestation.data.target.epoch);
        self.slashing_detector.register_attestation(
            validator,
            AttestationRecord {
                source_epoch: attestation.data.source.epoch,
                target_epoch: attestation.data.target.epoch,
                target_root: attestation.data.target.root,
            },
        );
        debug!(validator, subnet_id, "attestation routed and recorded");
        Ok(subnet_id)
    }

    pub fn get_head(&self) -> Result<Hash, BeaconChainError> {
        Ok(self.fork_choice.get_head()?)
    }

    /// Drains any proposer/attester slashing evidence accumulated so
    /// far. Callers are expected to turn each entry into a
    /// `ProposerSlashing`/`AttesterSlashing` and feed it through
    /// [`operations::process_proposer_slashing`]/
    /// [`operations::process_attester_slashing`].
    pub fn drain_slashing_evidence(&mut self) -> (Vec<ProposerSlashingEvidence>, Vec<AttesterSlashingEvidence>) {
        (self.slashing_detector.detect_proposer_evidence(), self.slashing_detector.detect_attester_evidence())
    }

    /// Runs the epoch boundary: resolves the previous/current epoch's
    /// target checkpoints from the canonical head, hands them to the
    /// epoch processor (which drives FFG, rewards, registry churn,
    /// and slashings payout), then syncs the result back into fork
    /// choice's justified/finalized checkpoints.
    pub fn process_epoch_boundary(&mut self, current_epoch: Epoch) -> Result<EpochSummary, BeaconChainError> {
        let head = self.get_head()?;
        let previous_epoch = current_epoch.saturating_sub(1);
        let spe = self.config.slots_per_epoch;

        let previous_root = self.fork_choice.get_ancestor(head, previous_epoch * spe).unwrap_or(head);
        let current_root = self.fork_choice.get_ancestor(head, current_epoch * spe).unwrap_or(head);

        let previous_checkpoint = Checkpoint::new(previous_epoch, previous_root);
        let current_checkpoint = Checkpoint::new(current_epoch, current_root);

        let summary = self.epoch_processor.process_epoch(
            &self.registry,
            &self.config,
            &mut self.finality,
            current_epoch,
            previous_checkpoint,
            current_checkpoint,
        )?;

        self.fork_choice.update_justified_checkpoint(self.finality.current_justified());
        self.fork_choice.update_finalized_checkpoint(self.finality.finalized());
        self.fork_choice.prune(self.finality.finalized().root);

        Ok(summary)
    }

    /// Prunes optimistic confirmations older than `confirm_timeout`
    /// relative to `now`.
    pub fn prune_fast_confirm(&mut self, now: u64) -> usize {
        self.fast_confirm.prune(now)
    }

    /// Submits an SSF vote for `slot` and, if it crosses the
    /// optimistic fast path (the round's phase becomes
    /// [`RoundPhase::Finalize`] without a full [`SsfRoundEngine::finalize`]
    /// call), records the winning root with [`FastConfirmTracker`] so
    /// it shows up as confirmed ahead of full finality.
    pub fn submit_ssf_attestation(&mut self, slot: Slot, vote: ssf::Vote, now: u64) -> Result<RoundPhase, BeaconChainError> {
        let phase = self.ssf.submit_attestation(slot, vote)?;
        self.record_if_fast_confirmed(slot, phase, now);
        Ok(phase)
    }

    /// Builds the round's aggregate signature (see
    /// [`SsfRoundEngine::aggregate_votes`]) and records an optimistic
    /// fast-path confirmation the same way [`Self::submit_ssf_attestation`]
    /// does, in case aggregation itself pushes a root over threshold.
    pub fn aggregate_ssf_votes(&mut self, slot: Slot, now: u64) -> Result<RoundPhase, BeaconChainError> {
        let phase = self.ssf.aggregate_votes(slot)?;
        self.record_if_fast_confirmed(slot, phase, now);
        Ok(phase)
    }

    fn record_if_fast_confirmed(&mut self, slot: Slot, phase: RoundPhase, now: u64) {
        if phase == RoundPhase::Finalize {
            if let Some(root) = self.ssf.leading_root(slot) {
                self.fast_confirm.record(root, slot, now);
                debug!(slot, root = ?root, "ssf optimistic fast path confirmed");
            }
        }
    }
}
