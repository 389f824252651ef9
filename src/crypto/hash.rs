use crate::types::{Hash, Slot};
use sha2::{Digest, Sha256};

/// Domain separation tag for SSF vote digests (§6): `0x0E000000`.
pub const DOMAIN_SSF_VOTE: [u8; 4] = [0x00, 0x00, 0x00, 0x0E];

pub struct Hasher;

impl Hasher {
    pub fn hash(data: &[u8]) -> Hash {
        let mut hasher = Sha256::new();
        hasher.update(data);
        hasher.finalize().into()
    }

    pub fn hash_multiple(data_chunks: &[&[u8]]) -> Hash {
        let mut hasher = Sha256::new();
        for chunk in data_chunks {
            hasher.update(chunk);
        }
        hasher.finalize().into()
    }

    pub fn hash_two(left: &Hash, right: &Hash) -> Hash {
        let mut hasher = Sha256::new();
        hasher.update(left);
        hasher.update(right);
        hasher.finalize().into()
    }

    pub fn double_hash(data: &[u8]) -> Hash {
        let first_hash = Self::hash(data);
        Self::hash(&first_hash)
    }

    pub fn hash_with_domain(domain: &[u8], data: &[u8]) -> Hash {
        let mut hasher = Sha256::new();
        hasher.update(domain);
        hasher.update(data);
        hasher.finalize().into()
    }

    pub fn hash_serializable<T: serde::Serialize>(data: &T) -> Result<Hash, serde_json::Error> {
        let serialized = serde_json::to_vec(data)?;
        Ok(Self::hash(&serialized))
    }
}

pub struct HashBuilder {
    hasher: Sha256,
}

impl HashBuilder {
    pub fn new() -> Self {
        HashBuilder {
            hasher: Sha256::new(),
        }
    }

    pub fn update(&mut self, data: &[u8]) -> &mut Self {
        self.hasher.update(data);
        self
    }

    pub fn update_u64(&mut self, value: u64) -> &mut Self {
        self.hasher.update(value.to_le_bytes());
        self
    }

    pub fn update_hash(&mut self, hash: &Hash) -> &mut Self {
        self.hasher.update(hash);
        self
    }

    pub fn finalize(self) -> Hash {
        self.hasher.finalize().into()
    }
}

impl Default for HashBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// §6 canonical layout: `domain(4, LE) || slot(8, LE) || block_root(32)`,
/// 44 bytes, the message SSF votes are signed over.
pub fn ssf_vote_digest(slot: Slot, block_root: &Hash) -> [u8; 44] {
    let mut buf = [0u8; 44];
    buf[0..4].copy_from_slice(&DOMAIN_SSF_VOTE);
    buf[4..12].copy_from_slice(&slot.to_le_bytes());
    buf[12..44].copy_from_slice(block_root);
    buf
}

/// §6 canonical layout: little-endian 8-byte slot || parent_root ||
/// state_root || body_root, SHA-256'd.
pub fn beacon_block_signing_root(
    slot: Slot,
    parent_root: &Hash,
    state_root: &Hash,
    body_root: &Hash,
) -> Hash {
    let mut builder = HashBuilder::new();
    builder
        .update_u64(slot)
        .update_hash(parent_root)
        .update_hash(state_root)
        .update_hash(body_root);
    builder.finalize()
}
