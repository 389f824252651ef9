//! Thin wrapper over `blst::min_pk` implementing the BLS contract §6
//! depends on as an opaque primitive: `Sign`, `Verify`,
//! `AggregateSignatures`, `AggregatePublicKeys`, `FastAggregateVerify`,
//! `VerifyAggregate`. Callers never touch `blst` types directly.

use crate::types::{BlsSignature, Pubkey};
use blst::min_pk::{
    AggregatePublicKey, AggregateSignature, PublicKey as BlstPublicKey, SecretKey,
    Signature as BlstSignature,
};
use blst::BLST_ERROR;
use thiserror::Error;

/// Domain separation tag for all beacon-chain BLS operations in this
/// core. Real deployments would fork this per signing domain; a single
/// DST is sufficient since the core only ever verifies its own vote
/// digests (§4.7).
const DST: &[u8] = b"BEACON-CONSENSUS-CORE-BLS-SIG-V1";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BlsError {
    #[error("invalid secret key bytes")]
    InvalidSecretKey,
    #[error("invalid public key bytes")]
    InvalidPublicKey,
    #[error("invalid signature bytes")]
    InvalidSignature,
    #[error("cannot aggregate zero signatures into a non-identity result is fine, but verification requires at least one public key")]
    EmptyPublicKeys,
    #[error("mismatched number of messages and public keys for aggregate verification")]
    LengthMismatch,
}

/// A BLS12-381 secret scalar. Kept out of the public data model
/// (§3 only defines `Pubkey`/`BlsSignature`); this exists purely so
/// tests and signers have something to call `sign` with.
pub struct SecretKeyHandle(SecretKey);

impl SecretKeyHandle {
    /// Deterministic seeded key generation, exactly as §9's design
    /// notes prescribe for tests ("a deterministic seeded BLS key
    /// generator"). Production signers would wrap a hardware-backed
    /// key store behind the same `sign` method instead.
    pub fn from_seed(seed: &[u8]) -> Self {
        let mut ikm = [0u8; 32];
        let n = seed.len().min(32);
        ikm[..n].copy_from_slice(&seed[..n]);
        SecretKeyHandle(SecretKey::key_gen(&ikm, &[]).expect("32-byte IKM is always valid"))
    }

    pub fn public_key(&self) -> Pubkey {
        self.0.sk_to_pk().compress().try_into().expect("compressed G1 is 48 bytes")
    }

    pub fn sign(&self, message: &[u8]) -> BlsSignature {
        self.0
            .sign(message, DST, &[])
            .compress()
            .try_into()
            .expect("compressed G2 is 96 bytes")
    }
}

fn decode_pubkey(pubkey: &Pubkey) -> Result<BlstPublicKey, BlsError> {
    BlstPublicKey::uncompress(pubkey).map_err(|_| BlsError::InvalidPublicKey)
}

fn decode_signature(sig: &BlsSignature) -> Result<BlstSignature, BlsError> {
    BlstSignature::uncompress(sig).map_err(|_| BlsError::InvalidSignature)
}

/// `Verify(pk, msg, sig) -> bool`.
pub fn verify(pubkey: &Pubkey, message: &[u8], signature: &BlsSignature) -> bool {
    let (Ok(pk), Ok(sig)) = (decode_pubkey(pubkey), decode_signature(signature)) else {
        return false;
    };
    sig.verify(true, message, DST, &[], &pk, true) == BLST_ERROR::BLST_SUCCESS
}

/// `AggregateSignatures(sigs) -> sig`. Identity (all-zero G2) on an
/// empty input, matching §6's contract.
pub fn aggregate_signatures(signatures: &[BlsSignature]) -> BlsSignature {
    if signatures.is_empty() {
        return [0u8; 96];
    }
    let decoded: Vec<BlstSignature> = signatures
        .iter()
        .filter_map(|s| decode_signature(s).ok())
        .collect();
    if decoded.is_empty() {
        return [0u8; 96];
    }
    let refs: Vec<&BlstSignature> = decoded.iter().collect();
    let agg = AggregateSignature::aggregate(&refs, true).expect("validated signatures aggregate");
    agg.to_signature().compress().try_into().expect("compressed G2 is 96 bytes")
}

/// `AggregatePublicKeys(pks) -> pk`.
pub fn aggregate_public_keys(pubkeys: &[Pubkey]) -> Result<Pubkey, BlsError> {
    if pubkeys.is_empty() {
        return Err(BlsError::EmptyPublicKeys);
    }
    let decoded: Result<Vec<BlstPublicKey>, BlsError> = pubkeys.iter().map(decode_pubkey).collect();
    let decoded = decoded?;
    let refs: Vec<&BlstPublicKey> = decoded.iter().collect();
    let agg = AggregatePublicKey::aggregate(&refs, true).map_err(|_| BlsError::InvalidPublicKey)?;
    Ok(agg.to_public_key().compress().try_into().expect("compressed G1 is 48 bytes"))
}

/// `FastAggregateVerify(pks, msg, sig) -> bool`: all signers vouch for
/// the same message.
pub fn fast_aggregate_verify(pubkeys: &[Pubkey], message: &[u8], signature: &BlsSignature) -> bool {
    if pubkeys.is_empty() {
        return false;
    }
    let Ok(sig) = decode_signature(signature) else {
        return false;
    };
    let decoded: Result<Vec<BlstPublicKey>, BlsError> = pubkeys.iter().map(decode_pubkey).collect();
    let Ok(decoded) = decoded else {
        return false;
    };
    let refs: Vec<&BlstPublicKey> = decoded.iter().collect();
    sig.fast_aggregate_verify(true, message, DST, &refs) == BLST_ERROR::BLST_SUCCESS
}

/// `VerifyAggregate(pks, msgs, sig) -> bool`: general multi-message
/// aggregate verify, used when votes don't all share one digest.
pub fn verify_aggregate(pubkeys: &[Pubkey], messages: &[&[u8]], signature: &BlsSignature) -> bool {
    if pubkeys.len() != messages.len() || pubkeys.is_empty() {
        return false;
    }
    let Ok(sig) = decode_signature(signature) else {
        return false;
    };
    let decoded: Result<Vec<BlstPublicKey>, BlsError> = pubkeys.iter().map(decode_pubkey).collect();
    let Ok(decoded) = decoded else {
        return false;
    };
    let refs: Vec<&BlstPublicKey> = decoded.iter().collect();
    let dsts: Vec<&[u8]> = std::iter::repeat(DST).take(pubkeys.len()).collect();
    sig.aggregate_verify(true, messages, &dsts, &refs, true) == BLST_ERROR::BLST_SUCCESS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify_round_trip() {
        let sk = SecretKeyHandle::from_seed(b"validator-0");
        let pk = sk.public_key();
        let sig = sk.sign(b"hello beacon chain");
        assert!(verify(&pk, b"hello beacon chain", &sig));
        assert!(!verify(&pk, b"tampered", &sig));
    }

    #[test]
    fn fast_aggregate_verify_over_shared_message() {
        let sk1 = SecretKeyHandle::from_seed(b"v1");
        let sk2 = SecretKeyHandle::from_seed(b"v2");
        let msg = b"same vote digest";
        let sig1 = sk1.sign(msg);
        let sig2 = sk2.sign(msg);
        let agg_sig = aggregate_signatures(&[sig1, sig2]);
        assert!(fast_aggregate_verify(&[sk1.public_key(), sk2.public_key()], msg, &agg_sig));
    }

    #[test]
    fn verify_aggregate_over_distinct_messages() {
        let sk1 = SecretKeyHandle::from_seed(b"v1");
        let sk2 = SecretKeyHandle::from_seed(b"v2");
        let sig1 = sk1.sign(b"message one");
        let sig2 = sk2.sign(b"message two");
        let agg_sig = aggregate_signatures(&[sig1, sig2]);
        assert!(verify_aggregate(
            &[sk1.public_key(), sk2.public_key()],
            &[b"message one".as_slice(), b"message two".as_slice()],
            &agg_sig,
        ));
    }

    #[test]
    fn empty_aggregate_signature_is_identity() {
        assert_eq!(aggregate_signatures(&[]), [0u8; 96]);
    }
}
