pub mod config;
pub mod consensus;
pub mod crypto;
pub mod types;

pub use config::ChainConfig;
pub use consensus::{BeaconChain, BeaconChainError};
pub use types::*;