use super::{Epoch, Hash, Slot};
use serde::{Deserialize, Serialize};

/// The fork-choice view of a beacon block: just enough to place it in
/// the block DAG and weigh it. Execution payload, operations, and
/// full SSZ body are out of scope for this core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRef {
    pub slot: Slot,
    pub root: Hash,
    pub parent_root: Hash,
    pub justified_epoch: Epoch,
    pub finalized_epoch: Epoch,
}

impl BlockRef {
    pub fn genesis(root: Hash) -> Self {
        BlockRef {
            slot: 0,
            root,
            parent_root: [0u8; 32],
            justified_epoch: 0,
            finalized_epoch: 0,
        }
    }
}
