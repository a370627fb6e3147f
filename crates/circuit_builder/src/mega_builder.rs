//! MegaCircuitBuilder: gate construction over the Mega trace blocks.
//!
//! Provides the constructor, constant-variable caching, arithmetic, elliptic,
//! range, sort, lookup, auxiliary and Poseidon2 gate creation, the goblin ECC
//! op rows backed by an [`EccOpQueue`], the databus, and finalization into a
//! locked execution trace.

use std::collections::{BTreeMap, HashMap};

use ark_ff::{AdditiveGroup, Field, One, Zero};
use bbtrace_ecc::fields::conversions::{field_bit_length, field_to_u256};
use bbtrace_ecc::{Fr, G1Affine};
use bbtrace_numeric::U256Ext;
use bbtrace_op_queue::{EccOpCode, EccOpQueue, UltraOp};

use crate::builder_base::{CircuitBuilderBase, DEFAULT_TAG};
use crate::databus::{BusId, BusVector, DataBus};
use crate::error::{Result, TraceError};
use crate::execution_trace::{MegaBlockKind, MegaExecutionTraceBlocks, NUM_SELECTORS, NUM_WIRES};
use crate::gate_data::{
    AddQuad, AddTriple, ArithmeticTriple, AuxSelector, DatabusLookupGate, EccAddGate, EccDblGate,
    EccOpTuple, MulQuad, Poseidon2ExternalGate, Poseidon2InternalGate, RangeList,
};
use crate::lookup::{BasicTable, BasicTableId, ColumnIdx, LookupEntry, MultiTable, MultiTableId, ReadData};
use crate::trace_structure::{CapacityPolicy, TraceSettings};

/// Ranges wider than this many bits are decomposed into limbs before the
/// sorted-set check.
pub const DEFAULT_PLOOKUP_RANGE_BITNUM: u64 = 14;
/// Step size for the sorted-set delta-range checks.
pub const DEFAULT_PLOOKUP_RANGE_STEP_SIZE: u64 = 3;
/// Maximum value representable in the default plookup range.
pub const DEFAULT_PLOOKUP_RANGE_SIZE: u64 = (1 << DEFAULT_PLOOKUP_RANGE_BITNUM) - 1;

/// Mega circuit builder: `CircuitBuilderBase` plus the Mega trace blocks, the
/// goblin op queue, lookup tables and the databus.
#[derive(Debug, Clone)]
pub struct MegaCircuitBuilder {
    /// Variable storage, copy constraints, tags and error state.
    pub base: CircuitBuilderBase<Fr>,
    /// Wires and selectors for all gate types.
    pub blocks: MegaExecutionTraceBlocks<Fr>,
    op_queue: EccOpQueue,
    /// Maps constant values to the variable fixed to them.
    constant_variable_indices: HashMap<Fr, u32>,
    /// Range lists keyed by target range, turned into delta-range gates on finalization.
    range_lists: BTreeMap<u64, RangeList>,
    lookup_tables: Vec<BasicTable<Fr>>,
    databus: DataBus,
    /// Constant variables holding each ECC opcode.
    null_op_idx: u32,
    add_accum_op_idx: u32,
    mul_accum_op_idx: u32,
    equality_op_idx: u32,
    circuit_finalized: bool,
}

impl MegaCircuitBuilder {
    // ════════════════════════════════════════════════════════════════════
    //  Construction
    // ════════════════════════════════════════════════════════════════════

    /// Builder with a fresh op queue.
    pub fn new() -> Self {
        Self::with_op_queue(EccOpQueue::new())
    }

    /// Builder that appends its ECC ops to `op_queue`, continuing a chain of
    /// circuits. A new subtable is opened for this circuit's ops.
    pub fn with_op_queue(mut op_queue: EccOpQueue) -> Self {
        op_queue.initialize_new_subtable();
        let mut builder = Self {
            base: CircuitBuilderBase::new(),
            blocks: MegaExecutionTraceBlocks::new(),
            op_queue,
            constant_variable_indices: HashMap::new(),
            range_lists: BTreeMap::new(),
            lookup_tables: Vec::new(),
            databus: DataBus::default(),
            null_op_idx: 0,
            add_accum_op_idx: 0,
            mul_accum_op_idx: 0,
            equality_op_idx: 0,
            circuit_finalized: false,
        };
        let zero_idx = builder.put_constant_variable(Fr::zero());
        builder.base.set_zero_idx(zero_idx);
        builder.base.set_tau_at_index(DEFAULT_TAG, DEFAULT_TAG);

        builder.null_op_idx = zero_idx;
        builder.add_accum_op_idx = builder.put_constant_variable(EccOpCode::ADD_ACCUM.to_field());
        builder.mul_accum_op_idx = builder.put_constant_variable(EccOpCode::MUL_ACCUM.to_field());
        builder.equality_op_idx = builder.put_constant_variable(EccOpCode::EQUALITY.to_field());
        builder
    }

    pub fn op_queue(&self) -> &EccOpQueue {
        &self.op_queue
    }

    /// Release the op queue so the next circuit of the chain can take it over.
    pub fn into_op_queue(self) -> EccOpQueue {
        self.op_queue
    }

    pub fn is_finalized(&self) -> bool {
        self.circuit_finalized
    }

    // ════════════════════════════════════════════════════════════════════
    //  Constant variable caching
    // ════════════════════════════════════════════════════════════════════

    /// Get or create a variable constrained to `variable`.
    pub fn put_constant_variable(&mut self, variable: Fr) -> u32 {
        if let Some(&idx) = self.constant_variable_indices.get(&variable) {
            return idx;
        }
        let variable_index = self.base.add_variable(variable);
        self.fix_witness(variable_index, variable);
        self.constant_variable_indices.insert(variable, variable_index);
        variable_index
    }

    /// Fix a witness with the gate `witness - witness_value = 0`.
    pub fn fix_witness(&mut self, witness_index: u32, witness_value: Fr) {
        self.base.assert_valid_variables(&[witness_index]);
        let zero = self.base.zero_idx();
        self.add_gate(
            MegaBlockKind::Arithmetic,
            [witness_index, zero, zero, zero],
            [Fr::zero(), -witness_value, Fr::one(), Fr::zero(), Fr::zero(), Fr::zero()],
            Fr::one(),
        );
    }

    /// Assert that a variable equals a constant value.
    pub fn assert_equal_constant(&mut self, a_idx: u32, b: Fr, msg: &str) {
        if self.base.get_variable(a_idx) != b && !self.base.failed() {
            self.base.failure(msg.to_string());
        }
        let b_idx = self.put_constant_variable(b);
        self.base.assert_equal(a_idx, b_idx, msg);
    }

    // ════════════════════════════════════════════════════════════════════
    //  Gate creation: arithmetic
    // ════════════════════════════════════════════════════════════════════

    /// `a*a_scaling + b*b_scaling + c*c_scaling + const_scaling = 0`
    pub fn create_add_gate(&mut self, gate: &AddTriple<Fr>) {
        self.create_big_add_gate(
            &AddQuad {
                a: gate.a,
                b: gate.b,
                c: gate.c,
                d: self.base.zero_idx(),
                a_scaling: gate.a_scaling,
                b_scaling: gate.b_scaling,
                c_scaling: gate.c_scaling,
                d_scaling: Fr::zero(),
                const_scaling: gate.const_scaling,
            },
            false,
        );
    }

    /// Width-4 addition gate. With `use_next_gate_w_4` the next row's `w_4`
    /// joins the sum (q_arith = 2).
    pub fn create_big_add_gate(&mut self, gate: &AddQuad<Fr>, use_next_gate_w_4: bool) {
        self.create_big_mul_add_gate(
            &MulQuad {
                a: gate.a,
                b: gate.b,
                c: gate.c,
                d: gate.d,
                mul_scaling: Fr::zero(),
                a_scaling: gate.a_scaling,
                b_scaling: gate.b_scaling,
                c_scaling: gate.c_scaling,
                d_scaling: gate.d_scaling,
                const_scaling: gate.const_scaling,
            },
            use_next_gate_w_4,
        );
    }

    /// Width-4 mul-add gate.
    ///
    /// With `use_next_gate_w_4`, q_arith is 2 and `mul_scaling` is doubled to
    /// cancel the halving the arithmetic relation applies in that mode.
    pub fn create_big_mul_add_gate(&mut self, gate: &MulQuad<Fr>, use_next_gate_w_4: bool) {
        self.base
            .assert_valid_variables(&[gate.a, gate.b, gate.c, gate.d]);
        let (mul_scaling, arith) = if use_next_gate_w_4 {
            (gate.mul_scaling.double(), Fr::from(2u64))
        } else {
            (gate.mul_scaling, Fr::one())
        };
        self.add_gate(
            MegaBlockKind::Arithmetic,
            [gate.a, gate.b, gate.c, gate.d],
            [
                mul_scaling,
                gate.const_scaling,
                gate.a_scaling,
                gate.b_scaling,
                gate.c_scaling,
                gate.d_scaling,
            ],
            arith,
        );
    }

    /// Constrain a variable to be 0 or 1 through `x^2 - x = 0`.
    pub fn create_bool_gate(&mut self, variable_index: u32) {
        self.base.assert_valid_variables(&[variable_index]);
        let zero = self.base.zero_idx();
        self.add_gate(
            MegaBlockKind::Arithmetic,
            [variable_index, variable_index, zero, zero],
            [Fr::one(), Fr::zero(), -Fr::one(), Fr::zero(), Fr::zero(), Fr::zero()],
            Fr::one(),
        );
    }

    /// `q_m*a*b + q_l*a + q_r*b + q_o*c + q_c = 0`, fourth wire unused.
    pub fn create_arithmetic_gate(&mut self, gate: &ArithmeticTriple<Fr>) {
        self.base.assert_valid_variables(&[gate.a, gate.b, gate.c]);
        let zero = self.base.zero_idx();
        self.add_gate(
            MegaBlockKind::Arithmetic,
            [gate.a, gate.b, gate.c, zero],
            [gate.q_m, gate.q_c, gate.q_l, gate.q_r, gate.q_o, Fr::zero()],
            Fr::one(),
        );
    }

    /// A row with every selector zero. Its wires are read through shifts by
    /// the gate above it.
    pub fn create_unconstrained_gate(
        &mut self,
        kind: MegaBlockKind,
        idx_1: u32,
        idx_2: u32,
        idx_3: u32,
        idx_4: u32,
    ) {
        self.add_gate(
            kind,
            [idx_1, idx_2, idx_3, idx_4],
            [Fr::zero(); 6],
            Fr::zero(),
        );
    }

    /// Place variables in the witness without constraining them, four per row.
    pub fn create_unconstrained_gates(&mut self, variable_index: &[u32]) {
        self.base.assert_valid_variables(variable_index);
        let zero = self.base.zero_idx();
        for chunk in variable_index.chunks(NUM_WIRES) {
            let mut row = [zero; NUM_WIRES];
            row[..chunk.len()].copy_from_slice(chunk);
            self.create_unconstrained_gate(MegaBlockKind::Arithmetic, row[0], row[1], row[2], row[3]);
        }
    }

    // ════════════════════════════════════════════════════════════════════
    //  Gate creation: elliptic curve
    // ════════════════════════════════════════════════════════════════════

    /// Elliptic curve addition.
    ///
    /// ```text
    ///     | q_ecc | w1  | w2  | w3  | w4  |
    ///     |-------|-----|-----|-----|-----|
    ///     |    1  |  -  | x1  | y1  |  -  | --> constrained
    ///     |    0  | x2  | x3  | y3  | y2  | --> read via shifts
    /// ```
    ///
    /// When the previous row already holds `(x1, y1)` as its output the gate
    /// is fused into it.
    pub fn create_ecc_add_gate(&mut self, gate: &EccAddGate<Fr>) {
        self.base
            .assert_valid_variables(&[gate.x1, gate.x2, gate.x3, gate.y1, gate.y2, gate.y3]);

        if let Some(idx) = self.fusable_elliptic_row(gate.x1, gate.y1) {
            let block = &mut self.blocks.elliptic;
            block.block.q_1_mut().set(idx, gate.sign_coefficient);
            block.q_elliptic_mut().set(idx, Fr::one());
        } else {
            let zero = self.base.zero_idx();
            self.add_gate(
                MegaBlockKind::Elliptic,
                [zero, gate.x1, gate.y1, zero],
                [Fr::zero(), Fr::zero(), gate.sign_coefficient, Fr::zero(), Fr::zero(), Fr::zero()],
                Fr::one(),
            );
        }
        self.create_unconstrained_gate(MegaBlockKind::Elliptic, gate.x2, gate.x3, gate.y3, gate.y2);
    }

    /// Elliptic curve doubling, selected by `q_m = 1`. Fuses like
    /// [`Self::create_ecc_add_gate`].
    pub fn create_ecc_dbl_gate(&mut self, gate: &EccDblGate) {
        self.base
            .assert_valid_variables(&[gate.x1, gate.x3, gate.y1, gate.y3]);

        if let Some(idx) = self.fusable_elliptic_row(gate.x1, gate.y1) {
            let block = &mut self.blocks.elliptic;
            block.q_elliptic_mut().set(idx, Fr::one());
            block.block.q_m_mut().set(idx, Fr::one());
        } else {
            let zero = self.base.zero_idx();
            self.add_gate(
                MegaBlockKind::Elliptic,
                [zero, gate.x1, gate.y1, zero],
                [Fr::one(), Fr::zero(), Fr::zero(), Fr::zero(), Fr::zero(), Fr::zero()],
                Fr::one(),
            );
        }
        let zero = self.base.zero_idx();
        self.create_unconstrained_gate(MegaBlockKind::Elliptic, zero, gate.x3, gate.y3, zero);
    }

    /// The last elliptic row, if it is an unconstrained output row holding
    /// `(x1, y1)`.
    fn fusable_elliptic_row(&self, x1: u32, y1: u32) -> Option<usize> {
        let block = &self.blocks.elliptic;
        let last = block.size().checked_sub(1)?;
        let wires_match = block.block.w_r()[last] == x1 && block.block.w_o()[last] == y1;
        let unconstrained = block.q_elliptic().get(last).is_zero()
            && block.block.q_1().get(last).is_zero()
            && block.block.q_m().get(last).is_zero();
        (wires_match && unconstrained).then_some(last)
    }

    // ════════════════════════════════════════════════════════════════════
    //  Gate creation: range constraints
    // ════════════════════════════════════════════════════════════════════

    /// Constrain a variable to `[0, 2^num_bits - 1]`.
    ///
    /// One bit becomes a bool gate, up to [`DEFAULT_PLOOKUP_RANGE_BITNUM`]
    /// bits a range list entry, anything wider a limb decomposition.
    pub fn create_range_constraint(&mut self, variable_index: u32, num_bits: usize, msg: &str) {
        if num_bits == 1 {
            self.create_bool_gate(variable_index);
        } else if num_bits <= DEFAULT_PLOOKUP_RANGE_BITNUM as usize {
            // The variable must appear in a wire for the sorted-set check to balance.
            self.create_arithmetic_gate(&ArithmeticTriple {
                a: variable_index,
                b: variable_index,
                c: variable_index,
                q_m: Fr::zero(),
                q_l: Fr::one(),
                q_r: -Fr::one(),
                q_o: Fr::zero(),
                q_c: Fr::zero(),
            });
            self.create_new_range_constraint(variable_index, (1u64 << num_bits) - 1, msg);
        } else {
            self.decompose_into_default_range(
                variable_index,
                num_bits as u64,
                DEFAULT_PLOOKUP_RANGE_BITNUM,
                msg,
            );
        }
    }

    /// Constrain a variable to `[0, target_range]` by tagging it into the
    /// range list for `target_range`.
    pub fn create_new_range_constraint(&mut self, variable_index: u32, target_range: u64, msg: &str) {
        let value = field_to_u256(&self.base.get_variable(variable_index));
        let is_out_of_range = value.bit_length() > 64 || value.limbs()[0] > target_range;
        if is_out_of_range && !self.base.failed() {
            self.base.failure(msg.to_string());
        }

        if !self.range_lists.contains_key(&target_range) {
            let list = self.create_range_list(target_range);
            self.range_lists.insert(target_range, list);
        }

        let existing_tag = self.base.get_tag(variable_index);
        let list_range_tag = self.range_lists[&target_range].range_tag;
        if existing_tag == list_range_tag {
            return;
        }

        if existing_tag != DEFAULT_TAG {
            let existing_range = self
                .range_lists
                .iter()
                .find(|(_, list)| list.range_tag == existing_tag)
                .map(|(&range, _)| range);
            debug_assert!(existing_range.is_some(), "tag {existing_tag} belongs to no range list");
            if existing_range.is_some_and(|range| range < target_range) {
                // Already held to a tighter range.
                return;
            }
            // A variable carries one tag; constrain a copy instead.
            let copied_witness = self.base.add_variable(self.base.get_variable(variable_index));
            self.create_add_gate(&AddTriple {
                a: variable_index,
                b: copied_witness,
                c: self.base.zero_idx(),
                a_scaling: Fr::one(),
                b_scaling: -Fr::one(),
                c_scaling: Fr::zero(),
                const_scaling: Fr::zero(),
            });
            self.create_new_range_constraint(copied_witness, target_range, msg);
            return;
        }

        self.base.assign_tag(variable_index, list_range_tag);
        if let Some(list) = self.range_lists.get_mut(&target_range) {
            list.variable_indices.push(variable_index);
        }
    }

    /// Split a variable into `target_range_bitnum`-bit limbs, range check
    /// each limb and constrain the limbs to recompose the variable.
    ///
    /// Returns the limb variable indices, least significant first.
    pub fn decompose_into_default_range(
        &mut self,
        variable_index: u32,
        num_bits: u64,
        target_range_bitnum: u64,
        msg: &str,
    ) -> Vec<u32> {
        self.base.assert_valid_variables(&[variable_index]);
        assert!(num_bits > 0, "cannot decompose into zero bits");

        let value = self.base.get_variable(variable_index);
        if u64::from(field_bit_length(&value)) > num_bits && !self.base.failed() {
            self.base.failure(msg.to_string());
        }
        let value = field_to_u256(&value);

        let sublimb_mask = (1u64 << target_range_bitnum) - 1;
        let num_limbs = num_bits.div_ceil(target_range_bitnum);
        let last_limb_size = num_bits % target_range_bitnum;
        let last_limb_range = if last_limb_size > 0 {
            (1u64 << last_limb_size) - 1
        } else {
            sublimb_mask
        };

        let mut sublimbs = Vec::with_capacity(num_limbs as usize);
        let mut sublimb_indices = Vec::with_capacity(num_limbs as usize);
        for i in 0..num_limbs {
            let start = (i * target_range_bitnum) as u32;
            let end = (start + target_range_bitnum as u32).min(256);
            let sublimb = if start < 256 { value.slice(start, end) } else { 0 };
            let limb_idx = self.base.add_variable(Fr::from(sublimb));
            let range = if i == num_limbs - 1 { last_limb_range } else { sublimb_mask };
            self.create_new_range_constraint(limb_idx, range, msg);
            sublimbs.push(sublimb);
            sublimb_indices.push(limb_idx);
        }

        // Three limbs per gate; each gate peels them off the running accumulator
        // held in w_4 and hands the remainder to the next row's w_4.
        let num_limb_triples = num_limbs.div_ceil(3) as usize;
        let zero = self.base.zero_idx();
        let mut accumulator = self.base.get_variable(variable_index);
        let mut accumulator_idx = variable_index;
        for i in 0..num_limb_triples {
            let mut limbs = [zero; 3];
            let mut scalings = [Fr::zero(); 3];
            for j in 0..3 {
                let limb = 3 * i + j;
                if limb < sublimbs.len() {
                    let scaling = Fr::from(2u64).pow([target_range_bitnum * limb as u64]);
                    limbs[j] = sublimb_indices[limb];
                    scalings[j] = scaling;
                    accumulator -= Fr::from(sublimbs[limb]) * scaling;
                }
            }
            let is_last = i == num_limb_triples - 1;
            self.create_big_add_gate(
                &AddQuad {
                    a: limbs[0],
                    b: limbs[1],
                    c: limbs[2],
                    d: accumulator_idx,
                    a_scaling: scalings[0],
                    b_scaling: scalings[1],
                    c_scaling: scalings[2],
                    d_scaling: -Fr::one(),
                    const_scaling: Fr::zero(),
                },
                !is_last,
            );
            if !is_last {
                accumulator_idx = self.base.add_variable(accumulator);
            }
        }

        sublimb_indices
    }

    // ════════════════════════════════════════════════════════════════════
    //  Gate creation: sort constraints
    // ════════════════════════════════════════════════════════════════════

    /// Delta-range rows checking that neighbouring values differ by at most
    /// 3. The list length must be a multiple of four.
    pub fn create_sort_constraint(&mut self, variable_index: &[u32]) {
        assert_eq!(
            variable_index.len() % NUM_WIRES,
            0,
            "sort constraint variable count must be a multiple of {NUM_WIRES}"
        );
        self.base.assert_valid_variables(variable_index);
        for row in variable_index.chunks_exact(NUM_WIRES) {
            self.add_delta_range_row(row);
        }
        // The last row is read through shifts by the row above.
        if let Some(&last) = variable_index.last() {
            let zero = self.base.zero_idx();
            self.create_unconstrained_gate(MegaBlockKind::DeltaRange, last, zero, zero, zero);
        }
    }

    /// Sort constraint that also pins the first value to `start` and the last
    /// to `end`.
    pub fn create_sort_constraint_with_edges(&mut self, variable_index: &[u32], start: Fr, end: Fr) {
        assert_eq!(
            variable_index.len() % NUM_WIRES,
            0,
            "sort constraint variable count must be a multiple of {NUM_WIRES}"
        );
        assert!(
            variable_index.len() > NUM_WIRES,
            "sort constraint with edges needs more than one row"
        );
        self.base.assert_valid_variables(variable_index);
        let zero = self.base.zero_idx();
        let first = variable_index[0];
        let last = variable_index[variable_index.len() - 1];

        self.create_add_gate(&AddTriple {
            a: first,
            b: zero,
            c: zero,
            a_scaling: Fr::one(),
            b_scaling: Fr::zero(),
            c_scaling: Fr::zero(),
            const_scaling: -start,
        });
        for row in variable_index.chunks_exact(NUM_WIRES) {
            self.add_delta_range_row(row);
        }
        self.create_unconstrained_gate(MegaBlockKind::DeltaRange, last, zero, zero, zero);
        self.create_add_gate(&AddTriple {
            a: last,
            b: zero,
            c: zero,
            a_scaling: Fr::one(),
            b_scaling: Fr::zero(),
            c_scaling: Fr::zero(),
            const_scaling: -end,
        });
    }

    fn add_delta_range_row(&mut self, row: &[u32]) {
        self.add_gate(
            MegaBlockKind::DeltaRange,
            [row[0], row[1], row[2], row[3]],
            [Fr::zero(); 6],
            Fr::one(),
        );
    }

    // ════════════════════════════════════════════════════════════════════
    //  Range lists
    // ════════════════════════════════════════════════════════════════════

    /// New range list for `[0, target_range]`, seeded with every multiple of
    /// [`DEFAULT_PLOOKUP_RANGE_STEP_SIZE`] and the range end so the sorted set
    /// has no gaps wider than the step.
    pub fn create_range_list(&mut self, target_range: u64) -> RangeList {
        let range_tag = self.base.get_new_tag();
        let tau_tag = self.base.get_new_tag();
        self.base.set_tau_transposition(range_tag, tau_tag);

        let num_multiples = target_range / DEFAULT_PLOOKUP_RANGE_STEP_SIZE;
        let mut variable_indices = Vec::with_capacity(num_multiples as usize + 2);
        let values = (0..=num_multiples)
            .map(|i| i * DEFAULT_PLOOKUP_RANGE_STEP_SIZE)
            .chain(std::iter::once(target_range));
        for value in values {
            let index = self.base.add_variable(Fr::from(value));
            self.base.assign_tag(index, range_tag);
            variable_indices.push(index);
        }
        self.create_unconstrained_gates(&variable_indices);

        RangeList {
            target_range,
            range_tag,
            tau_tag,
            variable_indices,
        }
    }

    /// Turn a range list into a sorted delta-range run from 0 to the range end.
    pub fn process_range_list(&mut self, list: &mut RangeList) {
        self.base.assert_valid_variables(&list.variable_indices);
        assert!(!list.variable_indices.is_empty(), "range list is empty");

        for x in &mut list.variable_indices {
            *x = self.base.real_variable_index(*x);
        }
        list.variable_indices.sort_unstable();
        list.variable_indices.dedup();

        let mut sorted_values: Vec<u64> = list
            .variable_indices
            .iter()
            .map(|&idx| field_to_u256(&self.base.get_variable(idx)).limbs()[0])
            .collect();
        sorted_values.sort_unstable();

        // Pad to whole rows, with at least two rows in total.
        let mut padding = (NUM_WIRES - sorted_values.len() % NUM_WIRES) % NUM_WIRES;
        if sorted_values.len() <= NUM_WIRES {
            padding += NUM_WIRES;
        }
        let zero = self.base.zero_idx();
        let mut indices = vec![zero; padding];
        indices.reserve(sorted_values.len());
        for value in sorted_values {
            let index = self.base.add_variable(Fr::from(value));
            self.base.assign_tag(index, list.tau_tag);
            indices.push(index);
        }

        self.create_sort_constraint_with_edges(&indices, Fr::zero(), Fr::from(list.target_range));
    }

    pub fn process_range_lists(&mut self) {
        let mut lists = std::mem::take(&mut self.range_lists);
        for list in lists.values_mut() {
            self.process_range_list(list);
        }
        self.range_lists = lists;
    }

    pub fn range_lists(&self) -> &BTreeMap<u64, RangeList> {
        &self.range_lists
    }

    // ════════════════════════════════════════════════════════════════════
    //  Lookups
    // ════════════════════════════════════════════════════════════════════

    /// The basic table `id`, generated and registered on first use.
    pub fn get_table(&mut self, id: BasicTableId) -> &mut BasicTable<Fr> {
        let idx = match self.lookup_tables.iter().position(|t| t.id == id) {
            Some(idx) => idx,
            None => {
                let table_index = self.lookup_tables.len();
                self.lookup_tables.push(BasicTable::generate(id, table_index));
                table_index
            }
        };
        &mut self.lookup_tables[idx]
    }

    /// A table this circuit has already used.
    pub fn get_lookup_table(&self, id: BasicTableId) -> Result<&BasicTable<Fr>> {
        self.lookup_tables
            .iter()
            .find(|t| t.id == id)
            .ok_or(TraceError::UnknownLookupTable(id))
    }

    pub fn get_lookup_tables(&self) -> &[BasicTable<Fr>] {
        &self.lookup_tables
    }

    /// Total rows of every table the circuit uses.
    pub fn get_tables_size(&self) -> usize {
        self.lookup_tables.iter().map(BasicTable::size).sum()
    }

    /// Look `(key_a, key_b)` up in a single basic table and return the
    /// witness holding the result.
    ///
    /// Keys wider than the table's slice fail with `LookupKeyTooWide`. The
    /// table is registered only once the lookup succeeds.
    pub fn create_lookup_gate(&mut self, table_id: BasicTableId, key_a: u32, key_b: u32) -> Result<u32> {
        self.base.assert_valid_variables(&[key_a, key_b]);
        let width = table_id.bits_per_slice();
        let mut key = [0u64; 2];
        for (slot, witness) in key.iter_mut().zip([key_a, key_b]) {
            let bits = field_bit_length(&self.base.get_variable(witness));
            if u64::from(bits) > width {
                return Err(TraceError::LookupKeyTooWide {
                    table: table_id,
                    bits,
                    width,
                });
            }
            *slot = self.witness_low_u64(witness);
        }

        let position = self.lookup_tables.iter().position(|t| t.id == table_id);
        let mut fresh = None;
        let table = match position {
            Some(idx) => &mut self.lookup_tables[idx],
            None => fresh.insert(BasicTable::generate(table_id, self.lookup_tables.len())),
        };
        let [result, _] = table.get_values_from_key(key)?;
        table.lookup_gates.push(LookupEntry { key });
        let table_index = table.table_index;
        if let Some(table) = fresh {
            self.lookup_tables.push(table);
        }

        let result_idx = self.base.add_variable(result);
        self.add_gate(
            MegaBlockKind::Lookup,
            [key_a, key_b, result_idx, self.base.zero_idx()],
            [
                Fr::zero(),
                Fr::zero(),
                Fr::zero(),
                Fr::zero(),
                Fr::from(table_index as u64),
                Fr::zero(),
            ],
            Fr::one(),
        );
        Ok(result_idx)
    }

    /// Look two keys up in a multi-table, one lookup gate per slice.
    ///
    /// Row 0 of each returned column is the full key or result; the input
    /// witnesses are reused for the keys.
    pub fn read_from_multi_table(&mut self, id: MultiTableId, key_a: u32, key_b: u32) -> ReadData<u32> {
        self.base.assert_valid_variables(&[key_a, key_b]);
        let multi_table = MultiTable::<Fr>::new(id);
        let width: u64 = multi_table.slice_sizes.iter().sum();
        for key in [key_a, key_b] {
            let bits = field_bit_length(&self.base.get_variable(key));
            if u64::from(bits) > width && !self.base.failed() {
                self.base
                    .failure(format!("lookup key exceeds the {width}-bit width of {id:?}"));
            }
        }
        let read_values = multi_table
            .get_lookup_accumulators(self.witness_low_u64(key_a), self.witness_low_u64(key_b));
        self.create_gates_from_plookup_accumulators(&multi_table, &read_values, key_a, Some(key_b))
    }

    /// One lookup gate per accumulator row. Each row but the last subtracts
    /// the scaled accumulators of the next row through q_2, q_m and q_c.
    pub fn create_gates_from_plookup_accumulators(
        &mut self,
        multi_table: &MultiTable<Fr>,
        read_values: &ReadData<Fr>,
        key_a_index: u32,
        key_b_index: Option<u32>,
    ) -> ReadData<u32> {
        let num_lookups = read_values[ColumnIdx::C1].len();
        let mut read_data = ReadData::<u32>::default();

        for i in 0..num_lookups {
            let is_first_lookup = i == 0;
            let is_last_lookup = i == num_lookups - 1;

            let table = self.get_table(multi_table.basic_table_ids[i]);
            table.lookup_gates.push(read_values.lookup_entries[i]);
            let table_index = table.table_index;

            let first_idx = if is_first_lookup {
                key_a_index
            } else {
                self.base.add_variable(read_values[ColumnIdx::C1][i])
            };
            let second_idx = match key_b_index {
                Some(idx) if is_first_lookup => idx,
                _ => self.base.add_variable(read_values[ColumnIdx::C2][i]),
            };
            let third_idx = self.base.add_variable(read_values[ColumnIdx::C3][i]);

            read_data[ColumnIdx::C1].push(first_idx);
            read_data[ColumnIdx::C2].push(second_idx);
            read_data[ColumnIdx::C3].push(third_idx);
            self.base
                .assert_valid_variables(&[first_idx, second_idx, third_idx]);

            let (q_2, q_m, q_c) = if is_last_lookup {
                (Fr::zero(), Fr::zero(), Fr::zero())
            } else {
                (
                    -multi_table.column_1_step_sizes[i + 1],
                    -multi_table.column_2_step_sizes[i + 1],
                    -multi_table.column_3_step_sizes[i + 1],
                )
            };
            self.add_gate(
                MegaBlockKind::Lookup,
                [first_idx, second_idx, third_idx, self.base.zero_idx()],
                [q_m, q_c, Fr::zero(), q_2, Fr::from(table_index as u64), Fr::zero()],
                Fr::one(),
            );
        }
        read_data
    }

    fn witness_low_u64(&self, index: u32) -> u64 {
        field_to_u256(&self.base.get_variable(index)).limbs()[0]
    }

    /// Value of a witness that fits in 64 bits.
    fn witness_to_u64(&self, index: u32) -> Option<u64> {
        let value = field_to_u256(&self.base.get_variable(index));
        (value.bit_length() <= 64).then(|| value.limbs()[0])
    }

    // ════════════════════════════════════════════════════════════════════
    //  Gate creation: auxiliary
    // ════════════════════════════════════════════════════════════════════

    /// One auxiliary row: memory and non-native field gadgets choose the
    /// relation through `selector`.
    pub fn create_aux_gate(&mut self, selector: AuxSelector, a: u32, b: u32, c: u32, d: u32) {
        self.base.assert_valid_variables(&[a, b, c, d]);
        self.blocks.aux.populate_wires(a, b, c, d);
        self.apply_aux_selectors(selector);
        self.check_selector_length_consistency();
        self.base.increment_num_gates(1);
    }

    fn apply_aux_selectors(&mut self, selector: AuxSelector) {
        let block = &mut self.blocks.aux;
        block
            .block
            .push_non_gate_selectors(selector.non_gate_pattern().map(Fr::from));
        let q_aux = if selector == AuxSelector::None {
            Fr::zero()
        } else {
            Fr::one()
        };
        block.set_gate_selector(q_aux);
    }

    // ════════════════════════════════════════════════════════════════════
    //  Gate creation: Poseidon2
    // ════════════════════════════════════════════════════════════════════

    /// External round: the four round constants go to q_1..q_4.
    pub fn create_poseidon2_external_gate(&mut self, gate: &Poseidon2ExternalGate<Fr>) {
        self.base
            .assert_valid_variables(&[gate.a, gate.b, gate.c, gate.d]);
        let [rc_1, rc_2, rc_3, rc_4] = gate.round_constants;
        self.add_gate(
            MegaBlockKind::Poseidon2External,
            [gate.a, gate.b, gate.c, gate.d],
            [Fr::zero(), Fr::zero(), rc_1, rc_2, rc_3, rc_4],
            Fr::one(),
        );
    }

    /// Internal round: only q_1 carries a constant.
    pub fn create_poseidon2_internal_gate(&mut self, gate: &Poseidon2InternalGate<Fr>) {
        self.base
            .assert_valid_variables(&[gate.a, gate.b, gate.c, gate.d]);
        self.add_gate(
            MegaBlockKind::Poseidon2Internal,
            [gate.a, gate.b, gate.c, gate.d],
            [Fr::zero(), Fr::zero(), gate.round_constant, Fr::zero(), Fr::zero(), Fr::zero()],
            Fr::one(),
        );
    }

    // ════════════════════════════════════════════════════════════════════
    //  Goblin ECC ops
    // ════════════════════════════════════════════════════════════════════

    /// Queue `accumulator += point` and write its ecc_op rows.
    pub fn queue_ecc_add_accum(&mut self, point: &G1Affine) -> EccOpTuple {
        let ultra_op = self.op_queue.add_accumulate(point);
        self.populate_ecc_op_wires(&ultra_op)
    }

    /// Queue `accumulator += point * scalar` and write its ecc_op rows.
    pub fn queue_ecc_mul_accum(&mut self, point: &G1Affine, scalar: &Fr) -> EccOpTuple {
        let ultra_op = self.op_queue.mul_accumulate(point, scalar);
        self.populate_ecc_op_wires(&ultra_op)
    }

    /// Queue an equality check against the accumulator, resetting it.
    pub fn queue_ecc_eq(&mut self) -> EccOpTuple {
        let ultra_op = self.op_queue.eq_and_reset();
        self.populate_ecc_op_wires(&ultra_op)
    }

    /// Queue a row with no effect on the accumulator.
    pub fn queue_ecc_no_op(&mut self) -> EccOpTuple {
        let ultra_op = self.op_queue.no_op();
        self.populate_ecc_op_wires(&ultra_op)
    }

    /// Add witnesses for an op and write them as `[op, x_lo, x_hi, y_lo]`
    /// then `[0, y_hi, z_1, z_2]`, all selectors zero.
    fn populate_ecc_op_wires(&mut self, ultra_op: &UltraOp) -> EccOpTuple {
        let op_tuple = EccOpTuple {
            op: self.get_ecc_op_idx(ultra_op.op_code),
            x_lo: self.base.add_variable(ultra_op.x_lo),
            x_hi: self.base.add_variable(ultra_op.x_hi),
            y_lo: self.base.add_variable(ultra_op.y_lo),
            y_hi: self.base.add_variable(ultra_op.y_hi),
            z_1: self.base.add_variable(ultra_op.z_1),
            z_2: self.base.add_variable(ultra_op.z_2),
            return_is_infinity: ultra_op.return_is_infinity,
        };
        let zero = self.base.zero_idx();
        let block = &mut self.blocks.ecc_op;
        for wires in [
            [op_tuple.op, op_tuple.x_lo, op_tuple.x_hi, op_tuple.y_lo],
            [zero, op_tuple.y_hi, op_tuple.z_1, op_tuple.z_2],
        ] {
            block.append_row([Fr::zero(); NUM_SELECTORS], wires);
        }
        op_tuple
    }

    fn get_ecc_op_idx(&self, op_code: EccOpCode) -> u32 {
        match op_code {
            EccOpCode::ADD_ACCUM => self.add_accum_op_idx,
            EccOpCode::MUL_ACCUM => self.mul_accum_op_idx,
            EccOpCode::EQUALITY => self.equality_op_idx,
            _ => self.null_op_idx,
        }
    }

    // ════════════════════════════════════════════════════════════════════
    //  Databus
    // ════════════════════════════════════════════════════════════════════

    pub fn add_public_calldata(&mut self, witness_index: u32) {
        self.append_to_bus_vector(BusId::CallData, witness_index);
    }

    pub fn add_public_secondary_calldata(&mut self, witness_index: u32) {
        self.append_to_bus_vector(BusId::SecondaryCallData, witness_index);
    }

    pub fn add_public_return_data(&mut self, witness_index: u32) {
        self.append_to_bus_vector(BusId::ReturnData, witness_index);
    }

    /// Read calldata at the position held by `read_idx_witness`.
    pub fn read_calldata(&mut self, read_idx_witness: u32) -> Result<u32> {
        self.read_bus_vector(BusId::CallData, read_idx_witness)
    }

    pub fn read_secondary_calldata(&mut self, read_idx_witness: u32) -> Result<u32> {
        self.read_bus_vector(BusId::SecondaryCallData, read_idx_witness)
    }

    pub fn read_return_data(&mut self, read_idx_witness: u32) -> Result<u32> {
        self.read_bus_vector(BusId::ReturnData, read_idx_witness)
    }

    pub fn get_databus(&self, bus: BusId) -> &BusVector {
        self.databus.column(bus)
    }

    /// Length of the longest databus column.
    pub fn get_databus_size(&self) -> usize {
        self.databus.max_size()
    }

    fn append_to_bus_vector(&mut self, bus: BusId, witness_index: u32) {
        self.base.assert_valid_variables(&[witness_index]);
        self.databus.column_mut(bus).append(witness_index);
    }

    /// Copy the bus entry at the read index into a new witness and constrain
    /// the pair with a busread gate. The whole field value of the index must
    /// address an entry; otherwise nothing is emitted and the read fails with
    /// `DatabusReadOutOfRange`.
    fn read_bus_vector(&mut self, bus: BusId, read_idx_witness: u32) -> Result<u32> {
        self.base.assert_valid_variables(&[read_idx_witness]);
        let column = self.databus.column(bus);
        let entry = self
            .witness_to_u64(read_idx_witness)
            .and_then(|idx| usize::try_from(idx).ok())
            .and_then(|idx| column.get(idx).map(|entry_idx| (idx, entry_idx)));
        let Some((read_idx, entry_idx)) = entry else {
            return Err(TraceError::DatabusReadOutOfRange {
                bus,
                index: self.base.get_variable(read_idx_witness),
                size: column.len(),
            });
        };
        self.databus.column_mut(bus).increment_read_count(read_idx);
        let value = self.base.get_variable(entry_idx);
        let value_witness = self.base.add_variable(value);
        self.create_databus_read_gate(
            &DatabusLookupGate {
                index: read_idx_witness,
                value: value_witness,
            },
            bus,
        );
        Ok(value_witness)
    }

    /// Busread row `[value, index, 0, 0]`; the column is picked by q_1, q_2
    /// or q_3.
    pub fn create_databus_read_gate(&mut self, gate: &DatabusLookupGate, bus: BusId) {
        self.base.assert_valid_variables(&[gate.index, gate.value]);
        let mut column_selectors = [Fr::zero(); 3];
        column_selectors[bus.index()] = Fr::one();
        let [q_1, q_2, q_3] = column_selectors;
        let zero = self.base.zero_idx();
        self.add_gate(
            MegaBlockKind::BusRead,
            [gate.value, gate.index, zero, zero],
            [Fr::zero(), Fr::zero(), q_1, q_2, q_3, Fr::zero()],
            Fr::one(),
        );
    }

    // ════════════════════════════════════════════════════════════════════
    //  Finalization
    // ════════════════════════════════════════════════════════════════════

    /// Resolve deferred constraints: range lists become delta-range rows and
    /// public inputs are copied into their block. Runs once.
    pub fn finalize_circuit(&mut self) {
        if self.circuit_finalized {
            return;
        }
        self.process_range_lists();
        self.populate_public_inputs_block();
        self.base.finalize_public_inputs();
        self.circuit_finalized = true;
    }

    /// Finalize the circuit and lock its trace under `settings`.
    ///
    /// A structured trace is padded to the layout's capacities; blocks that
    /// overflow fail or warn according to `policy`.
    pub fn finalize(&mut self, settings: &TraceSettings, policy: CapacityPolicy) -> Result<()> {
        if self.blocks.is_finalized() {
            return Err(TraceError::AlreadyFinalized);
        }
        self.finalize_circuit();
        self.blocks.set_fixed_block_sizes(settings)?;
        self.blocks.finalize(policy, self.base.zero_idx())?;
        tracing::debug!(
            gates = self.base.num_gates(),
            variables = self.base.get_num_variables(),
            tables = self.get_tables_size(),
            databus = self.get_databus_size(),
            "mega circuit finalized"
        );
        Ok(())
    }

    /// Public input rows `[idx, idx, 0, 0]` with all selectors zero.
    fn populate_public_inputs_block(&mut self) {
        let zero = self.base.zero_idx();
        let block = &mut self.blocks.pub_inputs;
        for &idx in self.base.public_inputs() {
            block.append_row([Fr::zero(); NUM_SELECTORS], [idx, idx, zero, zero]);
        }
    }

    // ════════════════════════════════════════════════════════════════════
    //  Shared row construction
    // ════════════════════════════════════════════════════════════════════

    /// Append one gate row: wires, the non-gate selectors
    /// `[q_m, q_c, q_1, q_2, q_3, q_4]`, and the block's own gate selector.
    fn add_gate(
        &mut self,
        kind: MegaBlockKind,
        wires: [u32; NUM_WIRES],
        non_gate_selectors: [Fr; 6],
        gate_selector: Fr,
    ) {
        let block = self.blocks.block_mut(kind);
        let [w_1, w_2, w_3, w_4] = wires;
        block.populate_wires(w_1, w_2, w_3, w_4);
        block.block.push_non_gate_selectors(non_gate_selectors);
        block.set_gate_selector(gate_selector);
        self.check_selector_length_consistency();
        self.base.increment_num_gates(1);
    }

    /// Debug check that every selector of every block has one entry per row.
    pub fn check_selector_length_consistency(&self) {
        for block in self.blocks.get() {
            block.check_selector_length_consistency();
        }
    }
}

impl Default for MegaCircuitBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ════════════════════════════════════════════════════════════════════════
//  Tests
// ════════════════════════════════════════════════════════════════════════
