//! BN254 field and curve collaborators for the trace crates.
//!
//! Arithmetic comes from arkworks; this crate adds what the op queue and
//! builder need on top of it: fixed curve constants, the endomorphism scalar
//! split, u256 conversions and the serialized point encoding.

pub mod curves;
pub mod fields;
pub mod groups;

pub use curves::bn254::{Fq, Fr, G1Affine, G1Projective};
