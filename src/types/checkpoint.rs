use super::{Epoch, Hash};
use serde::{Deserialize, Serialize};

/// An `(epoch, root)` pair that Casper FFG votes and SSF rounds
/// reference as a source or target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Checkpoint {
    pub epoch: Epoch,
    pub root: Hash,
}

impl Checkpoint {
    pub const fn new(epoch: Epoch, root: Hash) -> Self {
        Checkpoint { epoch, root }
    }

    pub const fn genesis(root: Hash) -> Self {
        Checkpoint { epoch: 0, root }
    }
}

impl Default for Checkpoint {
    fn default() -> Self {
        Checkpoint {
            epoch: 0,
            root: [0u8; 32],
        }
    }
}
