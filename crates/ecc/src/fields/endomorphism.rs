//! Endomorphism scalar split for the BN254 scalar field.
//!
//! A scalar `k` is decomposed into two ~128-bit halves `(k1, k2)` with
//! `k = k1 - k2 * lambda (mod r)`, where `lambda` is the non-trivial cube root
//! of unity in Fr that the GLV lattice below was reduced against.

use bbtrace_numeric::{U256, U256Ext};
use crypto_bigint::Uint;

use crate::curves::bn254::{EndoParams, Fr, FR_CUBE_ROOT};
use crate::fields::conversions::{field_to_u256, u256_to_field};

type U512 = Uint<8>;

/// The cube root of unity `lambda` in Fr.
pub fn cube_root_of_unity() -> Fr {
    Fr::new(FR_CUBE_ROOT)
}

/// High 256 bits of a 256 x 256 product.
fn mul_shift_256(a: &U256, b: &U256) -> U256 {
    let wide: U512 = a.widening_mul(b);
    let (_lo, hi) = wide.split();
    hi
}

/// Split `k` into `(k1, k2)` such that `k = k1 - k2 * lambda`.
///
/// Both halves fit in 128 bits.
pub fn split_into_endomorphism_scalars(k: &Fr) -> (Fr, Fr) {
    let input = field_to_u256(k);
    let g1 = U256::from_limbs(EndoParams::G1);
    let g2 = U256::from_limbs(EndoParams::G2);
    let minus_b1 = U256::from_limbs(EndoParams::MINUS_B1);
    let b2 = U256::from_limbs(EndoParams::B2);

    // c1 = (g2 * k) >> 256, c2 = (g1 * k) >> 256
    let c1 = mul_shift_256(&g2, &input);
    let c2 = mul_shift_256(&g1, &input);

    // Only the low 256 bits of the lattice products are kept
    let q1 = c1.wrapping_mul(&minus_b1);
    let q2 = c2.wrapping_mul(&b2);

    let k2 = u256_to_field::<Fr>(&q2) - u256_to_field::<Fr>(&q1);
    let k1 = k2 * cube_root_of_unity() + k;
    (k1, k2)
}
