//! LMD-GHOST-style fork choice (§4.5): weight blocks by validators'
//! latest attested target, walk down from the justified checkpoint
//! picking the heaviest viable child at each step.

use crate::types::{BlockRef, Checkpoint, Epoch, Gwei, Hash, ValidatorIndex};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ForkChoiceError {
    #[error("block {0:?} references an unknown parent")]
    UnknownParent(Hash),
    #[error("block {0:?} already known")]
    DuplicateBlock(Hash),
    #[error("no viable head: justified checkpoint root is not in the store")]
    NoViableHead,
}

struct Node {
    block: BlockRef,
    parent: Option<Hash>,
    children: Vec<Hash>,
}

pub struct ForkChoice {
    nodes: HashMap<Hash, Node>,
    latest_messages: HashMap<ValidatorIndex, (Hash, Epoch)>,
    balances: HashMap<ValidatorIndex, Gwei>,
    justified: Checkpoint,
    finalized: Checkpoint,
}

impl ForkChoice {
    pub fn new(genesis: BlockRef) -> Self {
        let root = genesis.root;
        let mut nodes = HashMap::new();
        nodes.insert(root, Node { block: genesis, parent: None, children: Vec::new() });

        ForkChoice {
            nodes,
            latest_messages: HashMap::new(),
            balances: HashMap::new(),
            justified: Checkpoint::genesis(root),
            finalized: Checkpoint::genesis(root),
        }
    }

    pub fn justified_checkpoint(&self) -> Checkpoint {
        self.justified
    }

    pub fn finalized_checkpoint(&self) -> Checkpoint {
        self.finalized
    }

    pub fn on_block(&mut self, block: BlockRef) -> Result<(), ForkChoiceError> {
        if self.nodes.contains_key(&block.root) {
            return Err(ForkChoiceError::DuplicateBlock(block.root));
        }
        if !self.nodes.contains_key(&block.parent_root) {
            return Err(ForkChoiceError::UnknownParent(block.parent_root));
        }

        self.nodes
            .get_mut(&block.parent_root)
            .expect("parent presence checked above")
            .children
            .push(block.root);

        let parent_root = block.parent_root;
        self.nodes.insert(block.root, Node { block, parent: Some(parent_root), children: Vec::new() });
        Ok(())
    }

    /// Records validator's vote only if it is newer than any message
    /// already on file (per-validator epoch monotonicity, §5).
    pub fn on_attestation(&mut self, validator: ValidatorIndex, target_root: Hash, epoch: Epoch) {
        match self.latest_messages.get(&validator) {
            Some((_, stored_epoch)) if *stored_epoch >= epoch => {}
            _ => {
                self.latest_messages.insert(validator, (target_root, epoch));
            }
        }
    }

    pub fn set_balance(&mut self, validator: ValidatorIndex, balance: Gwei) {
        self.balances.insert(validator, balance);
    }

    pub fn update_justified_checkpoint(&mut self, checkpoint: Checkpoint) {
        if checkpoint.epoch > self.justified.epoch {
            self.justified = checkpoint;
        }
    }

    pub fn update_finalized_checkpoint(&mut self, checkpoint: Checkpoint) {
        if checkpoint.epoch > self.finalized.epoch {
            self.finalized = checkpoint;
        }
    }

    fn is_descendant(&self, ancestor: Hash, mut descendant: Hash) -> bool {
        loop {
            if descendant == ancestor {
                return true;
            }
            match self.nodes.get(&descendant).and_then(|n| n.parent) {
                Some(parent) => descendant = parent,
                None => return false,
            }
        }
    }

    pub fn get_ancestor(&self, mut root: Hash, epoch_boundary_slot: crate::types::Slot) -> Option<Hash> {
        loop {
            let node = self.nodes.get(&root)?;
            if node.block.slot <= epoch_boundary_slot {
                return Some(root);
            }
            root = node.parent?;
        }
    }

    /// Credits every ancestor of each validator's vote target, up to
    /// (and including) `anchor`, with that validator's balance. Votes
    /// whose target isn't a descendant of `anchor` are ignored.
    fn compute_weights(&self, anchor: Hash) -> HashMap<Hash, Gwei> {
        let mut weights: HashMap<Hash, Gwei> = HashMap::new();
        for (validator, (target_root, _epoch)) in &self.latest_messages {
            if !self.nodes.contains_key(target_root) || !self.is_descendant(anchor, *target_root) {
                continue;
            }
            let balance = self.balances.get(validator).copied().unwrap_or(0);
            let mut cursor = *target_root;
            loop {
                *weights.entry(cursor).or_insert(0) += balance;
                if cursor == anchor {
                    break;
                }
                match self.nodes.get(&cursor).and_then(|n| n.parent) {
                    Some(parent) => cursor = parent,
                    None => break,
                }
            }
        }
        weights
    }

    /// A child is viable if its recorded justified/finalized epochs
    /// have not regressed behind the store's current checkpoints —
    /// i.e. its subtree still conforms to them.
    fn is_viable(&self, root: &Hash) -> bool {
        match self.nodes.get(root) {
            Some(node) => {
                node.block.justified_epoch >= self.justified.epoch
                    && node.block.finalized_epoch >= self.finalized.epoch
            }
            None => false,
        }
    }

    /// Walks down from the justified checkpoint, at each step picking
    /// the viable child with the greatest weight, ties broken by the
    /// lexicographically greater root.
    pub fn get_head(&self) -> Result<Hash, ForkChoiceError> {
        let anchor = self.justified.root;
        if !self.nodes.contains_key(&anchor) {
            return Err(ForkChoiceError::NoViableHead);
        }

        let weights = self.compute_weights(anchor);
        let mut current = anchor;
        loop {
            let node = self.nodes.get(&current).expect("current is always a known node");
            let viable: Vec<Hash> = node.children.iter().copied().filter(|c| self.is_viable(c)).collect();
            if viable.is_empty() {
                return Ok(current);
            }
            current = *viable
                .iter()
                .max_by(|a, b| {
                    let wa = weights.get(*a).copied().unwrap_or(0);
                    let wb = weights.get(*b).copied().unwrap_or(0);
                    wa.cmp(&wb).then_with(|| a.cmp(b))
                })
                .expect("viable is non-empty");
        }
    }

    /// Deletes every node outside the subtree rooted at
    /// `new_finalized_root`, returning the count removed. The new root
    /// keeps its parent pointer cleared so children can still attach.
    pub fn prune(&mut self, new_finalized_root: Hash) -> usize {
        if !self.nodes.contains_key(&new_finalized_root) {
            return 0;
        }

        let mut keep = std::collections::HashSet::new();
        let mut stack = vec![new_finalized_root];
        while let Some(root) = stack.pop() {
            if !keep.insert(root) {
                continue;
            }
            if let Some(node) = self.nodes.get(&root) {
                stack.extend(node.children.iter().copied());
            }
        }

        let before = self.nodes.len();
        self.nodes.retain(|root, _| keep.contains(root));
        if let Some(node) = self.nodes.get_mut(&new_finalized_root) {
            node.parent = None;
        }
        self.latest_messages.retain(|_, (target, _)| self.nodes.contains_key(target) || keep.contains(target));
        before - self.nodes.len()
    }

    pub fn chain_length(&self, mut root: Hash) -> usize {
        let mut length = 0;
        while let Some(node) = self.nodes.get(&root) {
            length += 1;
            match node.parent {
                Some(parent) => root = parent,
                None => break,
            }
        }
        length
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(root: u8, parent: u8, slot: u64) -> BlockRef {
        BlockRef {
            slot,
            root: [root; 32],
            parent_root: [parent; 32],
            justified_epoch: 0,
            finalized_epoch: 0,
        }
    }

    #[test]
    fn single_block_is_its_own_head() {
        let fc = ForkChoice::new(BlockRef::genesis([0u8; 32]));
        assert_eq!(fc.get_head().unwrap(), [0u8; 32]);
    }

    #[test]
    fn linear_chain_head_is_tip() {
        let mut fc = ForkChoice::new(BlockRef::genesis([0u8; 32]));
        fc.on_block(block(1, 0, 1)).unwrap();
        fc.on_block(block(2, 1, 2)).unwrap();
        assert_eq!(fc.get_head().unwrap(), [2u8; 32]);
    }

    #[test]
    fn unknown_parent_is_rejected() {
        let mut fc = ForkChoice::new(BlockRef::genesis([0u8; 32]));
        assert_eq!(fc.on_block(block(1, 9, 1)), Err(ForkChoiceError::UnknownParent([9u8; 32])));
    }

    #[test]
    fn duplicate_block_is_rejected() {
        let mut fc = ForkChoice::new(BlockRef::genesis([0u8; 32]));
        fc.on_block(block(1, 0, 1)).unwrap();
        assert_eq!(fc.on_block(block(1, 0, 1)), Err(ForkChoiceError::DuplicateBlock([1u8; 32])));
    }

    #[test]
    fn heaviest_branch_wins_head() {
        let mut fc = ForkChoice::new(BlockRef::genesis([0u8; 32]));
        fc.on_block(block(1, 0, 1)).unwrap();
        fc.on_block(block(2, 0, 1)).unwrap();
        fc.set_balance(0, 100);
        fc.set_balance(1, 10);
        fc.on_attestation(0, [1u8; 32], 1);
        fc.on_attestation(1, [2u8; 32], 1);
        assert_eq!(fc.get_head().unwrap(), [1u8; 32]);
    }

    #[test]
    fn tie_breaks_on_lexicographically_greater_root() {
        let mut fc = ForkChoice::new(BlockRef::genesis([0u8; 32]));
        fc.on_block(block(1, 0, 1)).unwrap();
        fc.on_block(block(2, 0, 1)).unwrap();
        assert_eq!(fc.get_head().unwrap(), [2u8; 32]);
    }

    #[test]
    fn is_descendant_detects_ancestry_through_chain() {
        let mut fc = ForkChoice::new(BlockRef::genesis([0u8; 32]));
        fc.on_block(block(1, 0, 1)).unwrap();
        fc.on_block(block(2, 1, 2)).unwrap();
        assert!(fc.is_descendant([0u8; 32], [2u8; 32]));
        assert!(!fc.is_descendant([2u8; 32], [0u8; 32]));
    }

    #[test]
    fn prune_keeps_only_new_root_subtree() {
        let mut fc = ForkChoice::new(BlockRef::genesis([0u8; 32]));
        fc.on_block(block(1, 0, 1)).unwrap();
        fc.on_block(block(2, 0, 1)).unwrap();
        fc.on_block(block(3, 1, 2)).unwrap();
        let removed = fc.prune([1u8; 32]);
        assert_eq!(removed, 2);
        assert_eq!(fc.chain_length([3u8; 32]), 2);
    }

    #[test]
    fn update_justified_checkpoint_rejects_non_increasing_epoch() {
        let mut fc = ForkChoice::new(BlockRef::genesis([0u8; 32]));
        fc.update_justified_checkpoint(Checkpoint::new(5, [9u8; 32]));
        fc.update_justified_checkpoint(Checkpoint::new(3, [8u8; 32]));
        assert_eq!(fc.justified_checkpoint().epoch, 5);
    }
}
