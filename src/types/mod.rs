pub mod attestation;
pub mod beacon_state;
pub mod block;
pub mod checkpoint;
pub mod validator;

pub use attestation::*;
pub use beacon_state::*;
pub use block::*;
pub use checkpoint::*;
pub use validator::*;

/// Slot number, monotonically increasing from genesis.
pub type Slot = u64;
/// Epoch number; `slot / SLOTS_PER_EPOCH`.
pub type Epoch = u64;
/// Index into the validator registry. Never reused or reordered.
pub type ValidatorIndex = u64;
/// Balance denominated in Gwei (1 ETH = 10^9 Gwei).
pub type Gwei = u64;
/// 32-byte digest used for roots, block hashes, and domain separation.
pub type Hash = [u8; 32];
/// BLS12-381 G1 compressed public key.
pub type Pubkey = [u8; 48];
/// BLS12-381 G2 compressed signature.
pub type BlsSignature = [u8; 96];

/// Sentinel for "never happened" / "not yet scheduled" epoch fields.
pub const FAR_FUTURE_EPOCH: Epoch = u64::MAX;

/// 1 ETH expressed in Gwei.
pub const GWEI_PER_ETH: Gwei = 1_000_000_000;

/// Smallest unit effective balances are aligned to.
pub const EFFECTIVE_BALANCE_INCREMENT: Gwei = GWEI_PER_ETH;
