//! Little-endian bitfield primitives used by attestations and
//! aggregation (§4.3). Bit `i` lives at byte `i/8`, bit `i%8`,
//! LSB-first.

use crate::crypto::bls;
use crate::types::{Attestation, AttestationData, BlsSignature};

pub fn get_bit(bits: &[u8], i: usize) -> bool {
    let byte = i / 8;
    if byte >= bits.len() {
        return false;
    }
    (bits[byte] >> (i % 8)) & 1 == 1
}

/// Grows the slice with zero bytes if `i` falls past the current end.
pub fn set_bit(bits: &mut Vec<u8>, i: usize) {
    let byte = i / 8;
    if byte >= bits.len() {
        bits.resize(byte + 1, 0);
    }
    bits[byte] |= 1 << (i % 8);
}

pub fn popcount(bits: &[u8]) -> u32 {
    bits.iter().map(|b| b.count_ones()).sum()
}

/// Byte-wise OR, zero-padded to `max(|a|, |b|)`.
pub fn or(a: &[u8], b: &[u8]) -> Vec<u8> {
    let len = a.len().max(b.len());
    let mut out = vec![0u8; len];
    for (i, byte) in out.iter_mut().enumerate() {
        let av = a.get(i).copied().unwrap_or(0);
        let bv = b.get(i).copied().unwrap_or(0);
        *byte = av | bv;
    }
    out
}

/// Byte-wise AND, truncated to `min(|a|, |b|)`.
pub fn and(a: &[u8], b: &[u8]) -> Vec<u8> {
    let len = a.len().min(b.len());
    a[..len].iter().zip(&b[..len]).map(|(x, y)| x & y).collect()
}

/// True iff some bit position is set in both `a` and `b`; positions
/// past either slice's end count as zero.
pub fn overlaps(a: &[u8], b: &[u8]) -> bool {
    let len = a.len().min(b.len());
    a[..len].iter().zip(&b[..len]).any(|(x, y)| x & y != 0)
}

/// `TryAggregate(att1, att2)` (§4.3): only mergeable when the two
/// attestations vote on identical data and their bitfields never
/// overlap (no double-counted signers).
pub fn try_aggregate(att1: &Attestation, att2: &Attestation) -> Option<Attestation> {
    if att1.data != att2.data {
        return None;
    }
    if overlaps(&att1.aggregation_bits, &att2.aggregation_bits) {
        return None;
    }

    let merged_bits = or(&att1.aggregation_bits, &att2.aggregation_bits);
    let merged_signature: BlsSignature = bls::aggregate_signatures(&[att1.signature, att2.signature]);

    Some(Attestation {
        data: att1.data.clone(),
        aggregation_bits: merged_bits,
        signature: merged_signature,
    })
}

pub fn data_matches(a: &AttestationData, b: &AttestationData) -> bool {
    a == b
}
