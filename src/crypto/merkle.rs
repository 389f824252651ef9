use crate::types::{BlsSignature, Hash, Pubkey};
use crate::crypto::Hasher;

/// Depth of the deposit contract's incremental Merkle tree (§4.10).
pub const DEPOSIT_CONTRACT_TREE_DEPTH: usize = 32;

fn pad_to(data: &[u8], len: usize) -> Vec<u8> {
    let mut padded = vec![0u8; len];
    padded[..data.len()].copy_from_slice(data);
    padded
}

/// §6 canonical deposit leaf: nested SHA-256 over pubkey/withdrawal
/// credentials on one branch and amount/signature on the other, each
/// padded to a 64- or 128-byte chunk before hashing.
pub fn compute_deposit_leaf(
    pubkey: &Pubkey,
    withdrawal_credentials: &Hash,
    amount: u64,
    signature: &BlsSignature,
) -> Hash {
    let pubkey_root = Hasher::hash(&pad_to(pubkey, 64));
    let wc_root = Hasher::hash(&pad_to(withdrawal_credentials, 64));
    let left = Hasher::hash_two(&pubkey_root, &wc_root);

    let amount_root = Hasher::hash(&pad_to(&amount.to_le_bytes(), 64));
    let sig_root = Hasher::hash(&pad_to(signature, 128));
    let right = Hasher::hash_two(&amount_root, &sig_root);

    Hasher::hash_two(&left, &right)
}

/// Verifies a deposit Merkle proof of length `TREE_DEPTH + 1` (33)
/// against `deposit_root` (§4.10). The first 32 elements walk the
/// incremental tree using the little-endian bits of `index` as path
/// directions; the 33rd element mixes in the deposit count.
pub fn verify_deposit_proof(leaf: &Hash, proof: &[Hash], index: u64, deposit_root: &Hash) -> bool {
    if proof.len() != DEPOSIT_CONTRACT_TREE_DEPTH + 1 {
        return false;
    }

    let mut node = *leaf;
    for (i, sibling) in proof[..DEPOSIT_CONTRACT_TREE_DEPTH].iter().enumerate() {
        node = if (index >> i) & 1 == 0 {
            Hasher::hash_two(&node, sibling)
        } else {
            Hasher::hash_two(sibling, &node)
        };
    }

    let mixed = Hasher::hash_two(&node, &proof[DEPOSIT_CONTRACT_TREE_DEPTH]);
    mixed == *deposit_root
}

/// Plain binary Merkle root over `leaves`, duplicating the last node
/// at each level when the count is odd. Only used internally by
/// [`hash_tree`]; nothing in this crate needs proof generation or
/// updates against this shape of tree.
fn merkle_root(leaves: &[Hash]) -> Hash {
    if leaves.is_empty() {
        return [0u8; 32];
    }

    let mut level = leaves.to_vec();
    while level.len() > 1 {
        let mut next = Vec::with_capacity((level.len() + 1) / 2);
        for chunk in level.chunks(2) {
            let hash = if chunk.len() == 2 {
                Hasher::hash_two(&chunk[0], &chunk[1])
            } else {
                Hasher::hash_two(&chunk[0], &chunk[0])
            };
            next.push(hash);
        }
        level = next;
    }
    level[0]
}

/// `hash_tree(block_roots || state_roots)` from §4.9: a plain binary
/// Merkle root over the concatenated history buffers.
pub fn hash_tree(block_roots: &[Hash], state_roots: &[Hash]) -> Hash {
    let mut leaves = Vec::with_capacity(block_roots.len() + state_roots.len());
    leaves.extend_from_slice(block_roots);
    leaves.extend_from_slice(state_roots);
    merkle_root(&leaves)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deposit_proof_round_trips() {
        let leaf = compute_deposit_leaf(&[1u8; 48], &[2u8; 32], 32_000_000_000, &[3u8; 96]);

        let mut node = leaf;
        let mut siblings = Vec::with_capacity(DEPOSIT_CONTRACT_TREE_DEPTH + 1);
        let index: u64 = 5;
        for i in 0..DEPOSIT_CONTRACT_TREE_DEPTH {
            let sibling = Hasher::hash(&[i as u8]);
            node = if (index >> i) & 1 == 0 {
                Hasher::hash_two(&node, &sibling)
            } else {
                Hasher::hash_two(&sibling, &node)
            };
            siblings.push(sibling);
        }
        let count_mix = Hasher::hash(b"deposit-count-1");
        siblings.push(count_mix);
        let deposit_root = Hasher::hash_two(&node, &count_mix);

        assert!(verify_deposit_proof(&leaf, &siblings, index, &deposit_root));
    }

    #[test]
    fn deposit_proof_rejects_wrong_length() {
        let leaf = compute_deposit_leaf(&[1u8; 48], &[2u8; 32], 32_000_000_000, &[3u8; 96]);
        assert!(!verify_deposit_proof(&leaf, &[[0u8; 32]; 10], 0, &[0u8; 32]));
    }

    #[test]
    fn hash_tree_is_deterministic_and_order_sensitive() {
        let a = hash_tree(&[[1u8; 32], [2u8; 32]], &[[3u8; 32]]);
        let b = hash_tree(&[[1u8; 32], [2u8; 32]], &[[3u8; 32]]);
        let c = hash_tree(&[[2u8; 32], [1u8; 32]], &[[3u8; 32]]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn hash_tree_of_no_roots_is_zero() {
        assert_eq!(hash_tree(&[], &[]), [0u8; 32]);
    }
}
