use ark_ff::BigInt;

// ---------------------------------------------------------------------------
// BN254 types
// ---------------------------------------------------------------------------

/// Base field of the BN254 G1 curve.
pub type Fq = ark_bn254::Fq;
/// Scalar field of the BN254 G1 curve; also the native field of the circuits.
pub type Fr = ark_bn254::Fr;
/// BN254 G1 point in affine coordinates.
pub type G1Affine = ark_bn254::G1Affine;
/// BN254 G1 point in projective coordinates.
pub type G1Projective = ark_bn254::G1Projective;

// ---------------------------------------------------------------------------
// BN254 Base Field (Fq)
// ---------------------------------------------------------------------------

pub const FQ_MODULUS: [u64; 4] = [
    0x3C208C16D87CFD47,
    0x97816a916871ca8d,
    0xb85045b68181585d,
    0x30644e72e131a029,
];

// ---------------------------------------------------------------------------
// BN254 Scalar Field (Fr)
// ---------------------------------------------------------------------------

pub const FR_MODULUS: [u64; 4] = [
    0x43E1F593F0000001,
    0x2833E84879B97091,
    0xB85045B68181585D,
    0x30644E72E131A029,
];

/// Non-trivial cube root of unity in Fr, in canonical (non-Montgomery) form.
pub const FR_CUBE_ROOT: BigInt<4> = BigInt::new([
    0x8b17ea66b99c90dd,
    0x5bfc41088d8daaa7,
    0xb3c4d79d41a91758,
    0x0000000000000000,
]);

/// GLV lattice constants for Fr.
///
/// `g1`, `g2` are the rounded `2^256 * b / r` multipliers and `minus_b1`, `b2`
/// the short lattice basis entries.
pub struct EndoParams;

impl EndoParams {
    pub const G1: [u64; 4] = [0x7a7bd9d4391eb18d, 0x4ccef014a773d2cf, 0x0000000000000002, 0];
    pub const G2: [u64; 4] = [0xd91d232ec7e0b3d7, 0x0000000000000002, 0, 0];
    pub const MINUS_B1: [u64; 4] = [0x8211bbeb7d4f1128, 0x6f4d8248eeb859fc, 0, 0];
    pub const B2: [u64; 4] = [0x89d3256894d213e3, 0, 0, 0];
}

/// Number of bits in each limb of a non-native field element simulated in-circuit.
pub const NUM_LIMB_BITS_IN_FIELD_SIMULATION: u32 = 68;
