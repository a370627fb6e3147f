// ECC operation records and the subtable tables that hold them.
//
// Each circuit in a chain contributes one subtable of operations. Subtables
// live in an arena and are linked by index; a freshly created subtable is
// linked at the head of the chain, so logically prepending costs nothing and
// no existing data moves. A subtable may instead be merged at the tail, in
// which case it is unlinked from the head and (for the Ultra table) may be
// pinned at a fixed row offset.

use std::ops::Index;

use ark_ec::AffineRepr;
use ark_ff::Zero;
use bbtrace_ecc::{Fr, G1Affine};
use bbtrace_numeric::U256;

// ════════════════════════════════════════════════════════════════════════
//  Op records
// ════════════════════════════════════════════════════════════════════════

/// Opcode flags of one ECC operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct EccOpCode {
    pub add: bool,
    pub mul: bool,
    pub eq: bool,
    pub reset: bool,
}

impl EccOpCode {
    pub const NULL_OP: EccOpCode = EccOpCode { add: false, mul: false, eq: false, reset: false };
    pub const ADD_ACCUM: EccOpCode = EccOpCode { add: true, mul: false, eq: false, reset: false };
    pub const MUL_ACCUM: EccOpCode = EccOpCode { add: false, mul: true, eq: false, reset: false };
    pub const EQUALITY: EccOpCode = EccOpCode { add: false, mul: false, eq: true, reset: true };

    /// Packed encoding `add << 3 | mul << 2 | eq << 1 | reset`.
    pub fn value(&self) -> u32 {
        (self.add as u32) << 3 | (self.mul as u32) << 2 | (self.eq as u32) << 1 | self.reset as u32
    }

    pub fn to_field(&self) -> Fr {
        Fr::from(self.value())
    }
}

/// One operation as it appears in the width-4 Ultra table.
///
/// Occupies two rows: `[op, x_lo, x_hi, y_lo]` then `[0, y_hi, z_1, z_2]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UltraOp {
    pub op_code: EccOpCode,
    pub x_lo: Fr,
    pub x_hi: Fr,
    pub y_lo: Fr,
    pub y_hi: Fr,
    pub z_1: Fr,
    pub z_2: Fr,
    pub return_is_infinity: bool,
}

impl UltraOp {
    /// The two table rows of this op.
    pub fn rows(&self) -> [[Fr; 4]; 2] {
        [
            [self.op_code.to_field(), self.x_lo, self.x_hi, self.y_lo],
            [Fr::zero(), self.y_hi, self.z_1, self.z_2],
        ]
    }
}

/// One operation as consumed by the ECC virtual machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EccvmOperation {
    pub op_code: EccOpCode,
    pub base_point: G1Affine,
    pub z1: U256,
    pub z2: U256,
    pub mul_scalar_full: Fr,
}

impl EccvmOperation {
    /// A row with no effect.
    pub fn empty() -> Self {
        Self {
            op_code: EccOpCode::NULL_OP,
            base_point: G1Affine::zero(),
            z1: U256::ZERO,
            z2: U256::ZERO,
            mul_scalar_full: Fr::zero(),
        }
    }
}

// ════════════════════════════════════════════════════════════════════════
//  Subtable arena
// ════════════════════════════════════════════════════════════════════════

/// Where the current subtable lands when it is merged into the aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergeSettings {
    #[default]
    Prepend,
    Append,
}

#[derive(Debug, Clone)]
struct Subtable<Op> {
    ops: Vec<Op>,
    /// Next subtable in logical order.
    next: Option<usize>,
}

/// A chain of op subtables stored in an arena.
#[derive(Debug, Clone)]
pub struct EccOpsTable<Op> {
    subtables: Vec<Subtable<Op>>,
    /// First subtable of the prepended chain.
    head: Option<usize>,
    /// Subtable merged at the tail, if any.
    appended: Option<usize>,
    /// Subtable receiving pushes.
    current: Option<usize>,
}

impl<Op> Default for EccOpsTable<Op> {
    fn default() -> Self {
        Self { subtables: Vec::new(), head: None, appended: None, current: None }
    }
}

impl<Op> EccOpsTable<Op> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_subtable(&self) -> bool {
        self.current.is_some()
    }

    pub fn num_subtables(&self) -> usize {
        self.subtables.len()
    }

    /// Start a new subtable, logically ahead of everything already in the table.
    pub fn create_new_subtable(&mut self) {
        let id = self.subtables.len();
        self.subtables.push(Subtable { ops: Vec::new(), next: self.head });
        self.head = Some(id);
        self.current = Some(id);
    }

    /// Push an op onto the current subtable.
    pub fn push(&mut self, op: Op) {
        let Some(id) = self.current else {
            panic!("op queue used before a subtable was created");
        };
        self.subtables[id].ops.push(op);
    }

    /// Fix the position of the current subtable in the aggregate.
    ///
    /// Subtables are created at the head, so prepending is a no-op. Appending
    /// unlinks the current subtable from the head and moves it to the tail;
    /// only one subtable may be appended.
    pub fn merge(&mut self, settings: MergeSettings) {
        let Some(id) = self.current else {
            panic!("merge called before a subtable was created");
        };
        if settings == MergeSettings::Prepend {
            return;
        }
        assert!(self.appended.is_none(), "only one subtable may be appended");
        assert_eq!(self.head, Some(id), "current subtable must be at the head to be appended");
        self.head = self.subtables[id].next.take();
        self.appended = Some(id);
    }

    // ── Sizes ──────────────────────────────────────────────────────

    /// Total number of ops across all subtables.
    pub fn size(&self) -> usize {
        self.subtables.iter().map(|s| s.ops.len()).sum()
    }

    pub fn current_subtable_size(&self) -> usize {
        self.current.map_or(0, |id| self.subtables[id].ops.len())
    }

    /// Number of ops before the current subtable was added.
    pub fn previous_size(&self) -> usize {
        self.size() - self.current_subtable_size()
    }

    // ── Views ──────────────────────────────────────────────────────

    /// Subtable ids in logical order.
    fn ordered_ids(&self) -> impl Iterator<Item = usize> + '_ {
        std::iter::successors(self.head, move |&id| self.subtables[id].next).chain(self.appended)
    }

    /// Subtables in logical order.
    pub fn subtables(&self) -> impl Iterator<Item = &[Op]> + '_ {
        self.ordered_ids().map(move |id| self.subtables[id].ops.as_slice())
    }

    /// All ops in logical order.
    pub fn iter(&self) -> impl Iterator<Item = &Op> + '_ {
        self.subtables().flatten()
    }

    /// All ops except those of the current subtable, in logical order.
    pub fn iter_previous(&self) -> impl Iterator<Item = &Op> + '_ {
        let current = self.current;
        self.ordered_ids()
            .filter(move |&id| Some(id) != current)
            .flat_map(move |id| self.subtables[id].ops.iter())
    }

    /// Ops of the current subtable.
    pub fn current_subtable(&self) -> &[Op] {
        match self.current {
            Some(id) => &self.subtables[id].ops,
            None => &[],
        }
    }

    /// Copy of the aggregate table in logical order.
    pub fn get_reconstructed(&self) -> Vec<Op>
    where
        Op: Clone,
    {
        self.iter().cloned().collect()
    }
}

impl<Op> Index<usize> for EccOpsTable<Op> {
    type Output = Op;

    fn index(&self, index: usize) -> &Op {
        let mut remaining = index;
        for subtable in self.subtables() {
            if remaining < subtable.len() {
                return &subtable[remaining];
            }
            remaining -= subtable.len();
        }
        panic!("op index {index} out of bounds for table of size {}", self.size());
    }
}

/// Raw ops table consumed by the ECC virtual machine.
pub type EccvmOpsTable = EccOpsTable<EccvmOperation>;

// ════════════════════════════════════════════════════════════════════════
//  Ultra table
// ════════════════════════════════════════════════════════════════════════

/// Ops table in Ultra format, two rows of four columns per op.
#[derive(Debug, Clone, Default)]
pub struct UltraEccOpsTable {
    table: EccOpsTable<UltraOp>,
    /// Row at which the appended subtable starts, when pinned.
    append_offset: Option<usize>,
}

impl UltraEccOpsTable {
    pub const TABLE_WIDTH: usize = 4;
    pub const NUM_ROWS_PER_OP: usize = 2;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_new_subtable(&mut self) {
        self.table.create_new_subtable();
    }

    pub fn push(&mut self, op: UltraOp) {
        self.table.push(op);
    }

    /// Merge the current subtable. A fixed `offset` only applies to an
    /// appended subtable and must not overlap the prepended rows.
    pub fn merge(&mut self, settings: MergeSettings, offset: Option<usize>) {
        self.table.merge(settings);
        if settings == MergeSettings::Append {
            if let Some(offset) = offset {
                let prepended_rows = self.prepended_ops() * Self::NUM_ROWS_PER_OP;
                assert!(
                    offset >= prepended_rows,
                    "append offset {offset} overlaps {prepended_rows} prepended rows"
                );
            }
            self.append_offset = offset;
        }
    }

    pub fn has_subtable(&self) -> bool {
        self.table.has_subtable()
    }

    /// Number of ops in the table.
    pub fn size(&self) -> usize {
        self.table.size()
    }

    pub fn current_subtable_size(&self) -> usize {
        self.table.current_subtable_size()
    }

    /// Number of rows in the column view, including any gap before a pinned
    /// appended subtable.
    pub fn ultra_table_size(&self) -> usize {
        match (self.append_offset, self.appended_ops()) {
            (Some(offset), appended) => offset + appended * Self::NUM_ROWS_PER_OP,
            (None, _) => self.size() * Self::NUM_ROWS_PER_OP,
        }
    }

    /// Rows in the column view before the current subtable was added. A
    /// pinned appended subtable keeps its offset unless it is the current one.
    pub fn previous_ultra_table_size(&self) -> usize {
        let appended = self.table.appended;
        let pinned = self
            .append_offset
            .filter(|_| appended.is_some() && appended != self.table.current);
        match pinned {
            Some(offset) => offset + self.appended_ops() * Self::NUM_ROWS_PER_OP,
            None => self.table.previous_size() * Self::NUM_ROWS_PER_OP,
        }
    }

    pub fn current_ultra_subtable_size(&self) -> usize {
        self.current_subtable_size() * Self::NUM_ROWS_PER_OP
    }

    pub fn iter(&self) -> impl Iterator<Item = &UltraOp> + '_ {
        self.table.iter()
    }

    pub fn iter_previous(&self) -> impl Iterator<Item = &UltraOp> + '_ {
        self.table.iter_previous()
    }

    pub fn get_reconstructed(&self) -> Vec<UltraOp> {
        self.table.get_reconstructed()
    }

    fn appended_ops(&self) -> usize {
        self.table.appended.map_or(0, |id| self.table.subtables[id].ops.len())
    }

    fn prepended_ops(&self) -> usize {
        self.size() - self.appended_ops()
    }

    // ── Column construction ────────────────────────────────────────

    /// Columns of the full table.
    pub fn construct_table_columns(&self) -> [Vec<Fr>; 4] {
        self.columns_excluding(None)
    }

    /// Columns of the table as it was before the current subtable.
    pub fn construct_previous_table_columns(&self) -> [Vec<Fr>; 4] {
        self.columns_excluding(self.table.current)
    }

    /// Columns of the current subtable on its own.
    pub fn construct_current_subtable_columns(&self) -> [Vec<Fr>; 4] {
        let mut columns = empty_columns(self.current_ultra_subtable_size());
        write_ops(&mut columns, self.table.current_subtable());
        columns
    }

    fn columns_excluding(&self, skip: Option<usize>) -> [Vec<Fr>; 4] {
        let mut columns = empty_columns(self.ultra_table_size());
        let mut prepended = self.table.head;
        while let Some(id) = prepended {
            if Some(id) != skip {
                write_ops(&mut columns, &self.table.subtables[id].ops);
            }
            prepended = self.table.subtables[id].next;
        }
        if let Some(id) = self.table.appended.filter(|&id| Some(id) != skip) {
            if let Some(offset) = self.append_offset {
                let gap = offset.saturating_sub(columns[0].len());
                for column in columns.iter_mut() {
                    column.resize(column.len() + gap, Fr::zero());
                }
            }
            write_ops(&mut columns, &self.table.subtables[id].ops);
        }
        columns
    }
}

impl Index<usize> for UltraEccOpsTable {
    type Output = UltraOp;

    fn index(&self, index: usize) -> &UltraOp {
        &self.table[index]
    }
}

fn empty_columns(capacity: usize) -> [Vec<Fr>; 4] {
    std::array::from_fn(|_| Vec::with_capacity(capacity))
}

fn write_ops(columns: &mut [Vec<Fr>; 4], ops: &[UltraOp]) {
    for op in ops {
        for row in op.rows() {
            for (column, value) in columns.iter_mut().zip(row) {
                column.push(value);
            }
        }
    }
}

// ════════════════════════════════════════════════════════════════════════
//  Tests
// ════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use bbtrace_ecc::fields::random::{random_point, random_scalar};
    use bbtrace_numeric::random::DebugRng;

    const SUBTABLE_OP_COUNTS: [usize; 3] = [4, 2, 7];

    fn random_ultra_op(rng: &mut DebugRng) -> UltraOp {
        UltraOp {
            op_code: EccOpCode::NULL_OP,
            x_lo: random_scalar(rng),
            x_hi: random_scalar(rng),
            y_lo: random_scalar(rng),
            y_hi: random_scalar(rng),
            z_1: random_scalar(rng),
            z_2: random_scalar(rng),
            return_is_infinity: false,
        }
    }

    fn random_eccvm_op(rng: &mut DebugRng) -> EccvmOperation {
        EccvmOperation {
            op_code: EccOpCode::MUL_ACCUM,
            base_point: random_point(rng),
            z1: rng.get_random_u256(),
            z2: rng.get_random_u256(),
            mul_scalar_full: random_scalar(rng),
        }
    }

    fn generate_subtables<Op>(rng: &mut DebugRng, make_op: fn(&mut DebugRng) -> Op) -> Vec<Vec<Op>> {
        SUBTABLE_OP_COUNTS
            .iter()
            .map(|&count| (0..count).map(|_| make_op(rng)).collect())
            .collect()
    }

    /// Expected columns for subtables laid out back to back.
    fn mock_columns(subtables: &[&Vec<UltraOp>]) -> [Vec<Fr>; 4] {
        let mut columns = empty_columns(0);
        for ops in subtables {
            write_ops(&mut columns, ops);
        }
        columns
    }

    fn build_ultra_table(
        subtables: &[Vec<UltraOp>],
        settings: [MergeSettings; 3],
        append_offset: Option<usize>,
    ) -> UltraEccOpsTable {
        let mut table = UltraEccOpsTable::new();
        for (ops, setting) in subtables.iter().zip(settings) {
            table.create_new_subtable();
            for op in ops {
                table.push(*op);
            }
            table.merge(setting, append_offset);
        }
        table
    }

    const PREPEND_THEN_APPEND: [MergeSettings; 3] =
        [MergeSettings::Prepend, MergeSettings::Prepend, MergeSettings::Append];

    #[test]
    fn ultra_ops_table_prepend_only() {
        let mut rng = DebugRng::new(1);
        let subtables = generate_subtables(&mut rng, random_ultra_op);
        let table = build_ultra_table(&subtables, [MergeSettings::Prepend; 3], None);

        assert_eq!(table.size(), 13);
        assert_eq!(table.ultra_table_size(), 26);
        let expected = mock_columns(&[&subtables[2], &subtables[1], &subtables[0]]);
        assert_eq!(table.construct_table_columns(), expected);
    }

    #[test]
    fn ultra_ops_prepend_then_append() {
        let mut rng = DebugRng::new(2);
        let subtables = generate_subtables(&mut rng, random_ultra_op);
        let table = build_ultra_table(&subtables, PREPEND_THEN_APPEND, None);

        assert_eq!(table.size(), 13);
        assert_eq!(table.ultra_table_size(), 26);
        let expected = mock_columns(&[&subtables[1], &subtables[0], &subtables[2]]);
        assert_eq!(table.construct_table_columns(), expected);
        assert_eq!(table[0], subtables[1][0]);
        assert_eq!(table[12], subtables[2][6]);
    }

    #[test]
    fn ultra_ops_fixed_location_append_with_gap() {
        let mut rng = DebugRng::new(3);
        let subtables = generate_subtables(&mut rng, random_ultra_op);
        let fixed_offset = 20;
        let prepended_size = (SUBTABLE_OP_COUNTS[0] + SUBTABLE_OP_COUNTS[1]) * UltraEccOpsTable::NUM_ROWS_PER_OP;
        assert!(fixed_offset > prepended_size);

        let table = build_ultra_table(&subtables, PREPEND_THEN_APPEND, Some(fixed_offset));

        // The gap only exists in the column view.
        assert_eq!(table.size(), 13);
        let expected_poly_size = fixed_offset + SUBTABLE_OP_COUNTS[2] * UltraEccOpsTable::NUM_ROWS_PER_OP;
        assert_eq!(table.ultra_table_size(), expected_poly_size);

        let columns = table.construct_table_columns();
        let prepended = mock_columns(&[&subtables[1], &subtables[0]]);
        let appended = mock_columns(&[&subtables[2]]);
        for (i, column) in columns.iter().enumerate() {
            assert_eq!(column.len(), expected_poly_size);
            assert_eq!(&column[..prepended_size], prepended[i].as_slice());
            assert!(column[prepended_size..fixed_offset].iter().all(Fr::is_zero));
            assert_eq!(&column[fixed_offset..], appended[i].as_slice());
        }
    }

    #[test]
    fn ultra_ops_fixed_location_append_no_gap() {
        let mut rng = DebugRng::new(6);
        let subtables = generate_subtables(&mut rng, random_ultra_op);
        let prepended_size = (SUBTABLE_OP_COUNTS[0] + SUBTABLE_OP_COUNTS[1]) * UltraEccOpsTable::NUM_ROWS_PER_OP;

        let pinned = build_ultra_table(&subtables, PREPEND_THEN_APPEND, Some(prepended_size));
        let unpinned = build_ultra_table(&subtables, PREPEND_THEN_APPEND, None);

        let expected = mock_columns(&[&subtables[1], &subtables[0], &subtables[2]]);
        assert_eq!(pinned.size(), 13);
        assert_eq!(pinned.ultra_table_size(), 26);
        assert_eq!(pinned.construct_table_columns(), expected);
        assert_eq!(unpinned.construct_table_columns(), expected);
        assert_eq!(pinned.previous_ultra_table_size(), prepended_size);
    }

    #[test]
    fn previous_size_keeps_append_gap() {
        let mut rng = DebugRng::new(7);
        let subtables = generate_subtables(&mut rng, random_ultra_op);
        let fixed_offset = 40;
        let settings = [MergeSettings::Prepend, MergeSettings::Append, MergeSettings::Prepend];
        let table = build_ultra_table(&subtables, settings, Some(fixed_offset));

        // The appended subtable is the current one right after its merge.
        let appended_only = build_ultra_table(&subtables[..2], settings, Some(fixed_offset));
        assert_eq!(
            appended_only.previous_ultra_table_size(),
            SUBTABLE_OP_COUNTS[0] * UltraEccOpsTable::NUM_ROWS_PER_OP
        );

        let expected_size = fixed_offset + SUBTABLE_OP_COUNTS[1] * UltraEccOpsTable::NUM_ROWS_PER_OP;
        assert_eq!(table.ultra_table_size(), expected_size);
        assert_eq!(table.previous_ultra_table_size(), expected_size);
        let previous = table.construct_previous_table_columns();
        assert_eq!(previous[0].len(), table.previous_ultra_table_size());

        let leading = mock_columns(&[&subtables[0]]);
        let appended = mock_columns(&[&subtables[1]]);
        let leading_rows = leading[0].len();
        for (i, column) in previous.iter().enumerate() {
            assert_eq!(&column[..leading_rows], leading[i].as_slice());
            assert!(column[leading_rows..fixed_offset].iter().all(Fr::is_zero));
            assert_eq!(&column[fixed_offset..], appended[i].as_slice());
        }
    }

    #[test]
    fn previous_and_current_views() {
        let mut rng = DebugRng::new(4);
        let subtables = generate_subtables(&mut rng, random_ultra_op);
        let table = build_ultra_table(&subtables, [MergeSettings::Prepend; 3], None);

        assert_eq!(table.current_subtable_size(), 7);
        assert_eq!(table.previous_ultra_table_size(), 12);
        assert_eq!(
            table.construct_previous_table_columns(),
            mock_columns(&[&subtables[1], &subtables[0]])
        );
        assert_eq!(table.construct_current_subtable_columns(), mock_columns(&[&subtables[2]]));

        let previous: Vec<UltraOp> = table.iter_previous().copied().collect();
        let expected: Vec<UltraOp> = subtables[1].iter().chain(&subtables[0]).copied().collect();
        assert_eq!(previous, expected);
    }

    #[test]
    fn eccvm_ops_table_prepend_only() {
        let mut rng = DebugRng::new(5);
        let subtables = generate_subtables(&mut rng, random_eccvm_op);
        let mut table = EccvmOpsTable::new();
        for ops in &subtables {
            table.create_new_subtable();
            for op in ops {
                table.push(*op);
            }
            table.merge(MergeSettings::Prepend);
        }

        let expected: Vec<EccvmOperation> = subtables.iter().rev().flatten().copied().collect();
        assert_eq!(table.size(), 13);
        for (i, op) in expected.iter().enumerate() {
            assert_eq!(&table[i], op);
        }
        assert_eq!(table.get_reconstructed(), expected);
    }

    #[test]
    fn eccvm_ops_table_prepend_then_append() {
        let mut rng = DebugRng::new(6);
        let subtables = generate_subtables(&mut rng, random_eccvm_op);
        let mut table = EccvmOpsTable::new();
        for (ops, setting) in subtables.iter().zip(PREPEND_THEN_APPEND) {
            table.create_new_subtable();
            for op in ops {
                table.push(*op);
            }
            table.merge(setting);
        }

        let mut ordered: Vec<&Vec<EccvmOperation>> = Vec::new();
        for (ops, setting) in subtables.iter().zip(PREPEND_THEN_APPEND) {
            match setting {
                MergeSettings::Prepend => ordered.insert(0, ops),
                MergeSettings::Append => ordered.push(ops),
            }
        }
        let expected: Vec<EccvmOperation> = ordered.into_iter().flatten().copied().collect();
        assert_eq!(table.size(), 13);
        assert_eq!(table.get_reconstructed(), expected);
        assert_eq!(table[4], expected[4]);
    }

    #[test]
    fn op_code_encoding() {
        assert_eq!(EccOpCode::NULL_OP.value(), 0);
        assert_eq!(EccOpCode::ADD_ACCUM.value(), 8);
        assert_eq!(EccOpCode::MUL_ACCUM.value(), 4);
        assert_eq!(EccOpCode::EQUALITY.value(), 3);
    }

    #[test]
    #[should_panic(expected = "before a subtable")]
    fn push_without_subtable_panics() {
        let mut table = UltraEccOpsTable::new();
        table.push(UltraOp::default());
    }
}
