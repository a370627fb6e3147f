//! Conversions between 4-limb prime field elements and `U256`.
//!
//! Everything here works on canonical integers; Montgomery form never leaks
//! out of arkworks.

use ark_ff::{BigInt, PrimeField};
use bbtrace_numeric::{U256, U256Ext};

/// Canonical integer value of a field element.
pub fn field_to_u256<F: PrimeField<BigInt = BigInt<4>>>(value: &F) -> U256 {
    U256::from_limbs(value.into_bigint().0)
}

/// Field element for an integer, reducing modulo the field prime.
pub fn u256_to_field<F: PrimeField>(value: &U256) -> F {
    let mut bytes = [0u8; 32];
    for (chunk, limb) in bytes.chunks_exact_mut(8).zip(value.limbs()) {
        chunk.copy_from_slice(&limb.to_le_bytes());
    }
    F::from_le_bytes_mod_order(&bytes)
}

/// Number of significant bits in the canonical form of a field element.
pub fn field_bit_length<F: PrimeField<BigInt = BigInt<4>>>(value: &F) -> u32 {
    field_to_u256(value).bit_length()
}
