//! Gate descriptions handed to the builder's gate-creation methods.
//!
//! Each struct names the witness indices a gate reads and the selector
//! coefficients it scales them by.

/// `a*a_scaling + b*b_scaling + c*c_scaling + const_scaling = 0`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddTriple<F> {
    pub a: u32,
    pub b: u32,
    pub c: u32,
    pub a_scaling: F,
    pub b_scaling: F,
    pub c_scaling: F,
    pub const_scaling: F,
}

/// Width-4 addition: `a*a_s + b*b_s + c*c_s + d*d_s + const_scaling = 0`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddQuad<F> {
    pub a: u32,
    pub b: u32,
    pub c: u32,
    pub d: u32,
    pub a_scaling: F,
    pub b_scaling: F,
    pub c_scaling: F,
    pub d_scaling: F,
    pub const_scaling: F,
}

/// Width-4 mul-add: `a*b*mul_scaling + a*a_s + b*b_s + c*c_s + d*d_s + const_scaling = 0`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MulQuad<F> {
    pub a: u32,
    pub b: u32,
    pub c: u32,
    pub d: u32,
    pub mul_scaling: F,
    pub a_scaling: F,
    pub b_scaling: F,
    pub c_scaling: F,
    pub d_scaling: F,
    pub const_scaling: F,
}

/// `q_m*a*b + q_l*a + q_r*b + q_o*c + q_c = 0`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArithmeticTriple<F> {
    pub a: u32,
    pub b: u32,
    pub c: u32,
    pub q_m: F,
    pub q_l: F,
    pub q_r: F,
    pub q_o: F,
    pub q_c: F,
}

/// Witness indices written to the two ecc_op rows of one queued operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EccOpTuple {
    pub op: u32,
    pub x_lo: u32,
    pub x_hi: u32,
    pub y_lo: u32,
    pub y_hi: u32,
    pub z_1: u32,
    pub z_2: u32,
    pub return_is_infinity: bool,
}

/// `(x3, y3) = (x1, y1) + sign_coefficient * (x2, y2)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EccAddGate<F> {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
    pub x3: u32,
    pub y3: u32,
    /// `1` for addition, `-1` for subtraction.
    pub sign_coefficient: F,
}

/// `(x3, y3) = 2 * (x1, y1)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EccDblGate {
    pub x1: u32,
    pub y1: u32,
    pub x3: u32,
    pub y3: u32,
}

/// A read of `value` at position `index` of a databus column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatabusLookupGate {
    pub index: u32,
    pub value: u32,
}

/// One external Poseidon2 round over the state `(a, b, c, d)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Poseidon2ExternalGate<F> {
    pub a: u32,
    pub b: u32,
    pub c: u32,
    pub d: u32,
    /// The round's constants, one per state element.
    pub round_constants: [F; 4],
}

/// One internal Poseidon2 round over the state `(a, b, c, d)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Poseidon2InternalGate<F> {
    pub a: u32,
    pub b: u32,
    pub c: u32,
    pub d: u32,
    /// Internal rounds only add a constant to the first state element.
    pub round_constant: F,
}

/// Selector patterns of the auxiliary block. Memory and non-native field
/// gadgets write their rows through these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuxSelector {
    None,
    LimbAccumulate1,
    LimbAccumulate2,
    NonNativeField1,
    NonNativeField2,
    NonNativeField3,
    RomConsistencyCheck,
    RamConsistencyCheck,
    RamTimestampCheck,
    RomRead,
    RamRead,
    RamWrite,
}

impl AuxSelector {
    /// Non-gate selector values `[q_m, q_c, q_1, q_2, q_3, q_4]` as small integers.
    pub(crate) fn non_gate_pattern(self) -> [u64; 6] {
        match self {
            AuxSelector::None => [0, 0, 0, 0, 0, 0],
            AuxSelector::LimbAccumulate1 => [0, 0, 0, 0, 1, 1],
            AuxSelector::LimbAccumulate2 => [1, 0, 0, 0, 1, 0],
            AuxSelector::NonNativeField1 => [0, 0, 0, 1, 1, 0],
            AuxSelector::NonNativeField2 => [0, 0, 0, 1, 0, 1],
            AuxSelector::NonNativeField3 => [1, 0, 0, 1, 0, 0],
            AuxSelector::RomConsistencyCheck => [0, 0, 1, 1, 0, 0],
            AuxSelector::RamConsistencyCheck => [0, 0, 0, 0, 1, 0],
            AuxSelector::RamTimestampCheck => [0, 0, 1, 0, 0, 1],
            AuxSelector::RomRead | AuxSelector::RamRead => [1, 0, 1, 0, 0, 0],
            AuxSelector::RamWrite => [1, 1, 1, 0, 0, 0],
        }
    }
}

/// Variables constrained to `[0, target_range]`, with the tag pair used by the
/// sorted-set check that proves it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeList {
    pub target_range: u64,
    pub range_tag: u32,
    pub tau_tag: u32,
    pub variable_indices: Vec<u32>,
}
