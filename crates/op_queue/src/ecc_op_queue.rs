// ECC op queue.
//
// Records the elliptic curve operations issued by a chain of circuits. Each
// operation is evaluated natively against a running accumulator and stored
// twice: as a raw op for the ECC virtual machine and as an Ultra op whose two
// rows are copied into the issuing circuit's ecc_op block.

use ark_ec::{AffineRepr, CurveGroup};
use ark_ff::Zero;
use bbtrace_ecc::curves::bn254::NUM_LIMB_BITS_IN_FIELD_SIMULATION;
use bbtrace_ecc::fields::conversions::{field_bit_length, field_to_u256, u256_to_field};
use bbtrace_ecc::fields::endomorphism::split_into_endomorphism_scalars;
use bbtrace_ecc::fields::random::{random_point, random_scalar};
use bbtrace_ecc::groups::serialize::affine_coordinates_u256;
use bbtrace_ecc::{Fr, G1Affine};
use bbtrace_numeric::random::DebugRng;
use bbtrace_numeric::{U256, U256Ext};
use tracing::debug;

use crate::ecc_ops_table::{
    EccOpCode, EccvmOperation, EccvmOpsTable, MergeSettings, UltraEccOpsTable, UltraOp,
};

/// Bits in the low chunk of a coordinate: two non-native limbs.
pub const CHUNK_SIZE: u32 = 2 * NUM_LIMB_BITS_IN_FIELD_SIMULATION;

/// Scalars with at most this many bits skip the endomorphism split.
const SHORT_SCALAR_BITS: u32 = 128;

#[derive(Debug, Clone)]
pub struct EccOpQueue {
    accumulator: G1Affine,
    eccvm_ops_table: EccvmOpsTable,
    ultra_ops_table: UltraEccOpsTable,
}

impl Default for EccOpQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl EccOpQueue {
    pub fn new() -> Self {
        Self {
            accumulator: G1Affine::zero(),
            eccvm_ops_table: EccvmOpsTable::new(),
            ultra_ops_table: UltraEccOpsTable::new(),
        }
    }

    // ════════════════════════════════════════════════════════════════════
    //  Subtables
    // ════════════════════════════════════════════════════════════════════

    /// Open the subtables for the next circuit. Must precede any op of that circuit.
    pub fn initialize_new_subtable(&mut self) {
        self.eccvm_ops_table.create_new_subtable();
        self.ultra_ops_table.create_new_subtable();
        debug!(
            subtables = self.eccvm_ops_table.num_subtables(),
            previous_ops = self.eccvm_ops_table.size(),
            "initialized ecc op subtable"
        );
    }

    /// Merge the current subtables into the aggregate tables.
    pub fn merge(&mut self, settings: MergeSettings, ultra_fixed_offset: Option<usize>) {
        self.eccvm_ops_table.merge(settings);
        self.ultra_ops_table.merge(settings, ultra_fixed_offset);
        debug!(
            ?settings,
            ?ultra_fixed_offset,
            ops = self.eccvm_ops_table.size(),
            "merged ecc op subtable"
        );
    }

    // ════════════════════════════════════════════════════════════════════
    //  Accessors
    // ════════════════════════════════════════════════════════════════════

    pub fn get_accumulator(&self) -> G1Affine {
        self.accumulator
    }

    /// Raw ops of the whole chain, in aggregate order.
    pub fn get_eccvm_ops(&self) -> Vec<EccvmOperation> {
        self.eccvm_ops_table.get_reconstructed()
    }

    /// Ultra ops of the whole chain, in aggregate order.
    pub fn get_ultra_ops(&self) -> Vec<UltraOp> {
        self.ultra_ops_table.get_reconstructed()
    }

    pub fn get_eccvm_ops_table(&self) -> &EccvmOpsTable {
        &self.eccvm_ops_table
    }

    pub fn get_ultra_ops_table(&self) -> &UltraEccOpsTable {
        &self.ultra_ops_table
    }

    /// All Ultra ops of the chain, without copying.
    pub fn get_aggregate_transcript(&self) -> impl Iterator<Item = &UltraOp> + '_ {
        self.ultra_ops_table.iter()
    }

    /// Ultra ops issued before the current subtable, without copying.
    pub fn get_previous_aggregate_transcript(&self) -> impl Iterator<Item = &UltraOp> + '_ {
        self.ultra_ops_table.iter_previous()
    }

    pub fn get_num_ops(&self) -> usize {
        self.eccvm_ops_table.size()
    }

    pub fn get_current_subtable_size(&self) -> usize {
        self.ultra_ops_table.current_subtable_size()
    }

    pub fn get_ultra_ops_table_num_rows(&self) -> usize {
        self.ultra_ops_table.ultra_table_size()
    }

    pub fn get_previous_ultra_ops_table_num_rows(&self) -> usize {
        self.ultra_ops_table.previous_ultra_table_size()
    }

    pub fn construct_ultra_ops_table_columns(&self) -> [Vec<Fr>; 4] {
        self.ultra_ops_table.construct_table_columns()
    }

    pub fn construct_previous_ultra_ops_table_columns(&self) -> [Vec<Fr>; 4] {
        self.ultra_ops_table.construct_previous_table_columns()
    }

    pub fn construct_current_ultra_ops_subtable_columns(&self) -> [Vec<Fr>; 4] {
        self.ultra_ops_table.construct_current_subtable_columns()
    }

    // ════════════════════════════════════════════════════════════════════
    //  Operations
    // ════════════════════════════════════════════════════════════════════

    /// `accumulator += point`.
    pub fn add_accumulate(&mut self, point: &G1Affine) -> UltraOp {
        assert!(!point.is_zero(), "add_accumulate called with the point at infinity");
        self.add_accumulate_unchecked(point)
    }

    /// `accumulator += point * scalar`.
    pub fn mul_accumulate(&mut self, point: &G1Affine, scalar: &Fr) -> UltraOp {
        assert!(!point.is_zero(), "mul_accumulate called with the point at infinity");
        self.assert_initialized();
        self.accumulator = (self.accumulator.into_group() + *point * scalar).into_affine();

        let ultra_op = construct_ultra_op(EccOpCode::MUL_ACCUM, point, scalar);
        self.eccvm_ops_table.push(EccvmOperation {
            op_code: EccOpCode::MUL_ACCUM,
            base_point: *point,
            z1: field_to_u256(&ultra_op.z_1),
            z2: field_to_u256(&ultra_op.z_2),
            mul_scalar_full: *scalar,
        });
        self.ultra_ops_table.push(ultra_op);
        ultra_op
    }

    /// Write the accumulator into the op and reset it to the point at infinity.
    pub fn eq_and_reset(&mut self) -> UltraOp {
        self.assert_initialized();
        let expected = self.accumulator;
        self.accumulator = G1Affine::zero();
        self.push_eq(expected)
    }

    /// A row with no effect, carrying the current accumulator.
    pub fn no_op(&mut self) -> UltraOp {
        self.assert_initialized();
        self.eccvm_ops_table.push(EccvmOperation::empty());
        let ultra_op = construct_ultra_op(EccOpCode::NULL_OP, &self.accumulator, &Fr::zero());
        self.ultra_ops_table.push(ultra_op);
        ultra_op
    }

    // ════════════════════════════════════════════════════════════════════
    //  Testing entry points
    // ════════════════════════════════════════════════════════════════════

    /// Add without rejecting the point at infinity.
    pub fn add_accumulate_for_testing(&mut self, point: &G1Affine) -> UltraOp {
        self.add_accumulate_unchecked(point)
    }

    /// Push a raw op only. The Ultra table is left untouched.
    pub fn append_eccvm_op_for_testing(&mut self, op: EccvmOperation) {
        self.eccvm_ops_table.push(op);
    }

    /// Equality op against a random point instead of the accumulator.
    pub fn add_erroneous_equality_op_for_testing(&mut self, rng: &mut DebugRng) -> UltraOp {
        self.assert_initialized();
        self.accumulator = G1Affine::zero();
        self.push_eq(random_point(rng))
    }

    /// Mul op with a random point and scalar.
    pub fn random_mul_for_testing(&mut self, rng: &mut DebugRng) -> UltraOp {
        let point = random_point(rng);
        let scalar = random_scalar(rng);
        self.mul_accumulate(&point, &scalar)
    }

    // ── Internals ──────────────────────────────────────────────────

    fn assert_initialized(&self) {
        assert!(
            self.ultra_ops_table.has_subtable(),
            "ecc op issued before initialize_new_subtable"
        );
    }

    fn add_accumulate_unchecked(&mut self, point: &G1Affine) -> UltraOp {
        self.assert_initialized();
        self.accumulator = (self.accumulator.into_group() + point).into_affine();

        self.eccvm_ops_table.push(EccvmOperation {
            op_code: EccOpCode::ADD_ACCUM,
            base_point: *point,
            z1: U256::ZERO,
            z2: U256::ZERO,
            mul_scalar_full: Fr::zero(),
        });
        let ultra_op = construct_ultra_op(EccOpCode::ADD_ACCUM, point, &Fr::zero());
        self.ultra_ops_table.push(ultra_op);
        ultra_op
    }

    fn push_eq(&mut self, point: G1Affine) -> UltraOp {
        self.eccvm_ops_table.push(EccvmOperation {
            op_code: EccOpCode::EQUALITY,
            base_point: point,
            z1: U256::ZERO,
            z2: U256::ZERO,
            mul_scalar_full: Fr::zero(),
        });
        let ultra_op = construct_ultra_op(EccOpCode::EQUALITY, &point, &Fr::zero());
        self.ultra_ops_table.push(ultra_op);
        ultra_op
    }
}

/// Split a base field coordinate into `(lo, hi)` at [`CHUNK_SIZE`] bits.
pub fn split_coordinate(coordinate: &U256) -> (Fr, Fr) {
    let lo = coordinate.slice_wide(0, CHUNK_SIZE);
    let hi = coordinate.wrapping_shr_vartime(CHUNK_SIZE);
    (u256_to_field(&lo), u256_to_field(&hi))
}

/// Encode an op in Ultra format.
///
/// Coordinates of the point at infinity encode as zero; the infinity flag is
/// carried separately. A scalar wider than 128 bits is split with the curve
/// endomorphism so that `scalar = z_1 - z_2 * lambda`.
pub fn construct_ultra_op(op_code: EccOpCode, point: &G1Affine, scalar: &Fr) -> UltraOp {
    let (x, y) = affine_coordinates_u256(point);
    let (x_lo, x_hi) = split_coordinate(&x);
    let (y_lo, y_hi) = split_coordinate(&y);

    let (z_1, z_2) = if field_bit_length(scalar) <= SHORT_SCALAR_BITS {
        (*scalar, Fr::zero())
    } else {
        split_into_endomorphism_scalars(scalar)
    };

    UltraOp {
        op_code,
        x_lo,
        x_hi,
        y_lo,
        y_hi,
        z_1,
        z_2,
        return_is_infinity: point.is_zero(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ark_ec::PrimeGroup;
    use bbtrace_ecc::fields::endomorphism::cube_root_of_unity;
    use bbtrace_ecc::G1Projective;

    fn queue_with_subtable() -> EccOpQueue {
        let mut queue = EccOpQueue::new();
        queue.initialize_new_subtable();
        queue
    }

    #[test]
    fn accumulator_matches_native_sum() {
        let mut rng = DebugRng::new(11);
        let mut queue = queue_with_subtable();
        let p1 = random_point(&mut rng);
        let p2 = random_point(&mut rng);
        let p3 = random_point(&mut rng);
        let s = random_scalar(&mut rng);

        queue.add_accumulate(&p1);
        queue.mul_accumulate(&p2, &s);
        queue.add_accumulate(&p3);

        let expected = (p1.into_group() + p2 * s + p3).into_affine();
        assert_eq!(queue.get_accumulator(), expected);

        let eq_op = queue.eq_and_reset();
        assert!(queue.get_accumulator().is_zero());
        assert_eq!(eq_op, construct_ultra_op(EccOpCode::EQUALITY, &expected, &Fr::zero()));
        assert_eq!(queue.get_eccvm_ops().last().map(|op| op.base_point), Some(expected));

        // A second round starts from infinity.
        queue.add_accumulate(&p1);
        queue.eq_and_reset();
        assert_eq!(queue.get_eccvm_ops().last().map(|op| op.base_point), Some(p1));
    }

    #[test]
    fn each_op_adds_two_rows() {
        let mut rng = DebugRng::new(12);
        let mut queue = queue_with_subtable();
        let point = random_point(&mut rng);

        queue.add_accumulate(&point);
        assert_eq!(queue.get_ultra_ops_table_num_rows(), 2);
        queue.mul_accumulate(&point, &random_scalar(&mut rng));
        assert_eq!(queue.get_ultra_ops_table_num_rows(), 4);
        queue.no_op();
        assert_eq!(queue.get_ultra_ops_table_num_rows(), 6);
        queue.eq_and_reset();
        assert_eq!(queue.get_ultra_ops_table_num_rows(), 8);
        assert_eq!(queue.get_num_ops(), 4);
    }

    #[test]
    fn no_op_carries_current_accumulator() {
        let mut rng = DebugRng::new(13);
        let mut queue = queue_with_subtable();
        let point = random_point(&mut rng);
        queue.add_accumulate(&point);

        let op = queue.no_op();
        assert_eq!(op.op_code, EccOpCode::NULL_OP);
        assert_eq!(op, construct_ultra_op(EccOpCode::NULL_OP, &point, &Fr::zero()));
        assert_eq!(queue.get_accumulator(), point);
        assert_eq!(queue.get_eccvm_ops().last(), Some(&EccvmOperation::empty()));
    }

    #[test]
    fn coordinates_recombine() {
        let mut rng = DebugRng::new(14);
        let point = random_point(&mut rng);
        let op = construct_ultra_op(EccOpCode::ADD_ACCUM, &point, &Fr::zero());
        let (x, y) = affine_coordinates_u256(&point);

        let recombine = |lo: &Fr, hi: &Fr| {
            field_to_u256(lo).wrapping_add(&field_to_u256(hi).wrapping_shl_vartime(CHUNK_SIZE))
        };
        assert_eq!(recombine(&op.x_lo, &op.x_hi), x);
        assert_eq!(recombine(&op.y_lo, &op.y_hi), y);
        assert!(field_bit_length(&op.x_lo) <= CHUNK_SIZE);
    }

    #[test]
    fn infinity_encodes_as_zero_with_flag() {
        let mut queue = queue_with_subtable();
        let op = queue.add_accumulate_for_testing(&G1Affine::zero());
        assert!(op.return_is_infinity);
        assert!([op.x_lo, op.x_hi, op.y_lo, op.y_hi].iter().all(Fr::is_zero));

        // eq on an empty accumulator also reports infinity
        let op = queue.eq_and_reset();
        assert!(op.return_is_infinity);
    }

    #[test]
    #[should_panic(expected = "point at infinity")]
    fn production_add_rejects_infinity() {
        let mut queue = queue_with_subtable();
        queue.add_accumulate(&G1Affine::zero());
    }

    #[test]
    fn scalar_split_recombines() {
        let mut rng = DebugRng::new(15);
        let point = random_point(&mut rng);
        let lambda = cube_root_of_unity();
        for _ in 0..20 {
            let scalar = random_scalar(&mut rng);
            let op = construct_ultra_op(EccOpCode::MUL_ACCUM, &point, &scalar);
            assert_eq!(op.z_1 - op.z_2 * lambda, scalar);
            assert!(field_bit_length(&op.z_1) <= 128);
            assert!(field_bit_length(&op.z_2) <= 128);
        }
    }

    #[test]
    fn short_scalar_skips_split() {
        let point = G1Affine::generator();
        let scalar = Fr::from(u128::MAX);
        let op = construct_ultra_op(EccOpCode::MUL_ACCUM, &point, &scalar);
        assert_eq!(op.z_1, scalar);
        assert!(op.z_2.is_zero());
    }

    #[test]
    fn mul_by_generator_multiple() {
        let mut queue = queue_with_subtable();
        let scalar = Fr::from(5u64);
        queue.mul_accumulate(&G1Affine::generator(), &scalar);
        let expected = (G1Projective::generator() * scalar).into_affine();
        assert_eq!(queue.get_accumulator(), expected);
    }

    #[test]
    fn subtables_chain_in_prepend_order() {
        let mut rng = DebugRng::new(16);
        let mut queue = EccOpQueue::new();
        let mut rounds: Vec<Vec<UltraOp>> = Vec::new();
        for num_ops in [3usize, 1, 2] {
            queue.initialize_new_subtable();
            let mut ops: Vec<UltraOp> =
                (0..num_ops).map(|_| queue.random_mul_for_testing(&mut rng)).collect();
            ops.push(queue.eq_and_reset());
            rounds.push(ops);
            queue.merge(MergeSettings::Prepend, None);
        }

        let expected: Vec<UltraOp> = rounds.iter().rev().flatten().copied().collect();
        assert_eq!(queue.get_ultra_ops(), expected);
        assert_eq!(queue.get_current_subtable_size(), 3);
        assert_eq!(queue.get_previous_ultra_ops_table_num_rows(), 2 * (4 + 2));

        let previous: Vec<UltraOp> = queue.get_previous_aggregate_transcript().copied().collect();
        assert_eq!(previous, expected[3..]);
    }

    #[test]
    #[should_panic(expected = "initialize_new_subtable")]
    fn op_before_initialization_panics() {
        let mut queue = EccOpQueue::new();
        queue.no_op();
    }

    #[test]
    fn erroneous_equality_differs_from_accumulator() {
        let mut rng = DebugRng::new(17);
        let mut queue = queue_with_subtable();
        let point = random_point(&mut rng);
        queue.add_accumulate(&point);
        queue.add_erroneous_equality_op_for_testing(&mut rng);
        let last = queue.get_eccvm_ops().last().map(|op| op.base_point);
        assert_ne!(last, Some(point));
        assert!(queue.get_accumulator().is_zero());
    }
}
