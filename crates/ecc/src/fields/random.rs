//! Random field elements and curve points drawn from a seeded RNG.

use ark_ec::{AffineRepr, CurveGroup};
use ark_ff::PrimeField;
use bbtrace_numeric::random::DebugRng;

use crate::curves::bn254::{Fr, G1Affine};

/// Uniform field element from 512 random bits.
pub fn random_field_element<F: PrimeField>(rng: &mut DebugRng) -> F {
    F::from_le_bytes_mod_order(&rng.get_random_wide_bytes())
}

/// Uniform scalar.
pub fn random_scalar(rng: &mut DebugRng) -> Fr {
    random_field_element(rng)
}

/// Random G1 point, as a random multiple of the generator.
pub fn random_point(rng: &mut DebugRng) -> G1Affine {
    (G1Affine::generator() * random_scalar(rng)).into_affine()
}
