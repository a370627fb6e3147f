//! Byte encoding of G1 affine points.
//!
//! A point is written as two 32-byte big-endian field elements, `y` first and
//! then `x`, both in canonical form. The point at infinity has no affine
//! coordinates and is written as the base field modulus twice; readers check
//! for that sentinel before interpreting the bytes as field elements.

use ark_ec::AffineRepr;
use ark_ff::PrimeField;
use bbtrace_numeric::{U256, U256Ext};
use thiserror::Error;

use crate::curves::bn254::{Fq, G1Affine, FQ_MODULUS};
use crate::fields::conversions::field_to_u256;

/// Size of a serialized base field element.
pub const FIELD_BYTES: usize = 32;
/// Size of a serialized affine point.
pub const AFFINE_BYTES: usize = 2 * FIELD_BYTES;

/// Errors raised while decoding a serialized point.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SerializationError {
    /// The input holds fewer bytes than one encoded point.
    #[error("buffer too short: need {needed} bytes, got {got}")]
    BufferTooShort { needed: usize, got: usize },

    /// The decoded coordinates do not satisfy the curve equation.
    #[error("decoded point is not on the curve")]
    NotOnCurve,
}

fn write_u256_be(value: &U256, out: &mut [u8]) {
    for (chunk, limb) in out.chunks_exact_mut(8).zip(value.limbs().iter().rev()) {
        chunk.copy_from_slice(&limb.to_be_bytes());
    }
}

fn read_u256_be(bytes: &[u8]) -> U256 {
    let mut limbs = [0u64; 4];
    for (i, chunk) in bytes.chunks_exact(8).enumerate() {
        let mut word = [0u8; 8];
        word.copy_from_slice(chunk);
        limbs[3 - i] = u64::from_be_bytes(word);
    }
    U256::from_limbs(limbs)
}

/// Serialize a point as `y || x`, or the modulus twice for infinity.
pub fn serialize_affine(point: &G1Affine) -> [u8; AFFINE_BYTES] {
    let mut out = [0u8; AFFINE_BYTES];
    let (y, x) = if point.is_zero() {
        let modulus = U256::from_limbs(FQ_MODULUS);
        (modulus, modulus)
    } else {
        (field_to_u256(&point.y), field_to_u256(&point.x))
    };
    write_u256_be(&y, &mut out[..FIELD_BYTES]);
    write_u256_be(&x, &mut out[FIELD_BYTES..]);
    out
}

/// Read a point written by [`serialize_affine`].
///
/// Coordinates at or above the modulus (other than the infinity sentinel) are
/// reduced, matching how field elements are read elsewhere.
pub fn deserialize_affine(bytes: &[u8]) -> Result<G1Affine, SerializationError> {
    if bytes.len() < AFFINE_BYTES {
        return Err(SerializationError::BufferTooShort {
            needed: AFFINE_BYTES,
            got: bytes.len(),
        });
    }
    let y_raw = read_u256_be(&bytes[..FIELD_BYTES]);
    let x_raw = read_u256_be(&bytes[FIELD_BYTES..AFFINE_BYTES]);

    let modulus = U256::from_limbs(FQ_MODULUS);
    if y_raw == modulus && x_raw == modulus {
        return Ok(G1Affine::zero());
    }

    let y = Fq::from_be_bytes_mod_order(&bytes[..FIELD_BYTES]);
    let x = Fq::from_be_bytes_mod_order(&bytes[FIELD_BYTES..AFFINE_BYTES]);
    let point = G1Affine::new_unchecked(x, y);
    if !point.is_on_curve() {
        return Err(SerializationError::NotOnCurve);
    }
    Ok(point)
}

/// Canonical `(x, y)` integers of a point; `(0, 0)` for infinity.
pub fn affine_coordinates_u256(point: &G1Affine) -> (U256, U256) {
    if point.is_zero() {
        (U256::ZERO, U256::ZERO)
    } else {
        (field_to_u256(&point.x), field_to_u256(&point.y))
    }
}
