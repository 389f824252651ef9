use super::{BlsSignature, Checkpoint, Hash, Slot, ValidatorIndex};
use serde::{Deserialize, Serialize};

/// The content two or more validators vote for. Two attestations are
/// aggregatable iff this tuple is equal and their bitfields are
/// disjoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttestationData {
    pub slot: Slot,
    pub beacon_block_root: Hash,
    pub source: Checkpoint,
    pub target: Checkpoint,
    pub committee_index: u64,
}

/// A (possibly aggregated) attestation: data plus a participation
/// bitfield and the BLS signature over that data shared by every
/// participating validator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attestation {
    pub data: AttestationData,
    pub aggregation_bits: Vec<u8>,
    pub signature: BlsSignature,
}

impl Attestation {
    pub fn new(data: AttestationData, aggregation_bits: Vec<u8>, signature: BlsSignature) -> Self {
        Attestation {
            data,
            aggregation_bits,
            signature,
        }
    }
}

/// An attestation paired with the explicit set of attesting validator
/// indices, used for slashing evidence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedAttestation {
    pub attesting_indices: Vec<ValidatorIndex>,
    pub data: AttestationData,
    pub signature: BlsSignature,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposerSlashing {
    pub signed_header_1: SignedBeaconBlockHeader,
    pub signed_header_2: SignedBeaconBlockHeader,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttesterSlashing {
    pub attestation_1: IndexedAttestation,
    pub attestation_2: IndexedAttestation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedBeaconBlockHeader {
    pub header: BeaconBlockHeader,
    pub signature: BlsSignature,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeaconBlockHeader {
    pub slot: Slot,
    pub proposer_index: ValidatorIndex,
    pub parent_root: Hash,
    pub state_root: Hash,
    pub body_root: Hash,
}

/// A voluntary exit request signed by the exiting validator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedVoluntaryExit {
    pub epoch: super::Epoch,
    pub validator_index: ValidatorIndex,
    pub signature: BlsSignature,
}
