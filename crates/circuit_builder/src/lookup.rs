//! Lookup tables for the lookup block.
//!
//! A [`BasicTable`] is a three-column table of field elements; lookup gates
//! prove that `(w_1, w_2, w_3)` (less the step-scaled next row) is one of its
//! rows. A [`MultiTable`] chains several basic tables to look up a wide value
//! slice by slice: the XOR/AND tables here split 8 to 64-bit operands into
//! 6-bit slices with a 2 or 4-bit tail.

use ark_ff::PrimeField;

use crate::error::{Result, TraceError};

// ---------------------------------------------------------------------------
// BasicTableId
// ---------------------------------------------------------------------------

/// Bitwise operation a slice table evaluates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BitwiseOp {
    Xor,
    And,
}

impl BitwiseOp {
    fn apply(self, a: u64, b: u64) -> u64 {
        match self {
            BitwiseOp::Xor => a ^ b,
            BitwiseOp::And => a & b,
        }
    }
}

/// Identifies a basic lookup table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BasicTableId {
    UintXorSlice6,
    UintXorSlice2,
    UintXorSlice4,
    UintAndSlice6,
    UintAndSlice2,
    UintAndSlice4,
}

impl BasicTableId {
    pub fn bits_per_slice(self) -> u64 {
        match self {
            BasicTableId::UintXorSlice6 | BasicTableId::UintAndSlice6 => 6,
            BasicTableId::UintXorSlice2 | BasicTableId::UintAndSlice2 => 2,
            BasicTableId::UintXorSlice4 | BasicTableId::UintAndSlice4 => 4,
        }
    }

    pub fn op(self) -> BitwiseOp {
        match self {
            BasicTableId::UintXorSlice6 | BasicTableId::UintXorSlice2 | BasicTableId::UintXorSlice4 => {
                BitwiseOp::Xor
            }
            BasicTableId::UintAndSlice6 | BasicTableId::UintAndSlice2 | BasicTableId::UintAndSlice4 => {
                BitwiseOp::And
            }
        }
    }

    fn slice_table(op: BitwiseOp, bits: u64) -> Self {
        match (op, bits) {
            (BitwiseOp::Xor, 6) => BasicTableId::UintXorSlice6,
            (BitwiseOp::Xor, 4) => BasicTableId::UintXorSlice4,
            (BitwiseOp::Xor, 2) => BasicTableId::UintXorSlice2,
            (BitwiseOp::And, 6) => BasicTableId::UintAndSlice6,
            (BitwiseOp::And, 4) => BasicTableId::UintAndSlice4,
            (BitwiseOp::And, 2) => BasicTableId::UintAndSlice2,
            _ => panic!("no {op:?} slice table of {bits} bits"),
        }
    }
}

// ---------------------------------------------------------------------------
// LookupEntry
// ---------------------------------------------------------------------------

/// The key pair of one lookup against a basic table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LookupEntry {
    pub key: [u64; 2],
}

// ---------------------------------------------------------------------------
// BasicTable
// ---------------------------------------------------------------------------

/// A basic lookup table and the lookups made against it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicTable<F> {
    pub id: BasicTableId,
    /// Position of the table among the builder's tables; written to q_3 of
    /// every lookup gate against it.
    pub table_index: usize,
    pub use_twin_keys: bool,

    pub column_1_step_size: F,
    pub column_2_step_size: F,
    pub column_3_step_size: F,

    pub column_1: Vec<F>,
    pub column_2: Vec<F>,
    pub column_3: Vec<F>,

    /// Every lookup made against this table, in gate order.
    pub lookup_gates: Vec<LookupEntry>,
}

impl<F: PrimeField> BasicTable<F> {
    /// Build the table `id` with all `2^bits × 2^bits` slice pairs.
    pub fn generate(id: BasicTableId, table_index: usize) -> Self {
        let bits = id.bits_per_slice();
        let op = id.op();
        let base = 1u64 << bits;
        let rows = (base * base) as usize;
        let mut table = Self {
            id,
            table_index,
            use_twin_keys: true,
            column_1_step_size: F::from(base),
            column_2_step_size: F::from(base),
            column_3_step_size: F::from(base),
            column_1: Vec::with_capacity(rows),
            column_2: Vec::with_capacity(rows),
            column_3: Vec::with_capacity(rows),
            lookup_gates: Vec::new(),
        };
        for i in 0..base {
            for j in 0..base {
                table.column_1.push(F::from(i));
                table.column_2.push(F::from(j));
                table.column_3.push(F::from(op.apply(i, j)));
            }
        }
        table
    }

    /// Number of rows in this table.
    pub fn size(&self) -> usize {
        debug_assert_eq!(self.column_1.len(), self.column_2.len());
        debug_assert_eq!(self.column_2.len(), self.column_3.len());
        self.column_1.len()
    }

    /// Row holding `key`, if the key is in the table.
    pub fn index_of(&self, key: [u64; 2]) -> Option<usize> {
        let base = 1u64 << self.id.bits_per_slice();
        (key[0] < base && key[1] < base).then(|| (key[0] * base + key[1]) as usize)
    }

    /// Output columns for `key`: the operation result and an unused zero.
    pub fn get_values_from_key(&self, key: [u64; 2]) -> Result<[F; 2]> {
        let row = self.index_of(key).ok_or(TraceError::LookupEntryNotFound {
            table: self.id,
            key,
        })?;
        Ok([self.column_3[row], F::zero()])
    }

    /// How many recorded lookups hit each row.
    pub fn read_counts(&self) -> Vec<u64> {
        let mut counts = vec![0u64; self.size()];
        for entry in &self.lookup_gates {
            if let Some(row) = self.index_of(entry.key) {
                counts[row] += 1;
            }
        }
        counts
    }
}

// ---------------------------------------------------------------------------
// MultiTable
// ---------------------------------------------------------------------------

/// Identifies a multi-table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MultiTableId {
    Uint8Xor,
    Uint16Xor,
    Uint32Xor,
    Uint64Xor,
    Uint8And,
    Uint16And,
    Uint32And,
    Uint64And,
}

impl MultiTableId {
    fn op_and_width(self) -> (BitwiseOp, u64) {
        match self {
            MultiTableId::Uint8Xor => (BitwiseOp::Xor, 8),
            MultiTableId::Uint16Xor => (BitwiseOp::Xor, 16),
            MultiTableId::Uint32Xor => (BitwiseOp::Xor, 32),
            MultiTableId::Uint64Xor => (BitwiseOp::Xor, 64),
            MultiTableId::Uint8And => (BitwiseOp::And, 8),
            MultiTableId::Uint16And => (BitwiseOp::And, 16),
            MultiTableId::Uint32And => (BitwiseOp::And, 32),
            MultiTableId::Uint64And => (BitwiseOp::And, 64),
        }
    }
}

/// Bits per full slice of the uint tables.
const UINT_SLICE_BITS: u64 = 6;

/// A chain of basic tables plus the step sizes that recombine their slices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultiTable<F> {
    pub id: MultiTableId,
    pub basic_table_ids: Vec<BasicTableId>,
    pub slice_sizes: Vec<u64>,
    /// `step_sizes[i]` scales accumulator `i` into accumulator `i - 1`.
    pub column_1_step_sizes: Vec<F>,
    pub column_2_step_sizes: Vec<F>,
    pub column_3_step_sizes: Vec<F>,
}

impl<F: PrimeField> MultiTable<F> {
    pub fn new(id: MultiTableId) -> Self {
        let (op, width) = id.op_and_width();
        let num_full = width / UINT_SLICE_BITS;
        let tail = width % UINT_SLICE_BITS;

        let mut slice_sizes: Vec<u64> = vec![UINT_SLICE_BITS; num_full as usize];
        if tail != 0 {
            slice_sizes.push(tail);
        }
        let basic_table_ids = slice_sizes
            .iter()
            .map(|&bits| BasicTableId::slice_table(op, bits))
            .collect::<Vec<_>>();

        let step = F::from(1u64 << UINT_SLICE_BITS);
        let step_sizes: Vec<F> = (0..slice_sizes.len())
            .map(|i| if i == 0 { F::one() } else { step })
            .collect();

        Self {
            id,
            basic_table_ids,
            slice_sizes,
            column_1_step_sizes: step_sizes.clone(),
            column_2_step_sizes: step_sizes.clone(),
            column_3_step_sizes: step_sizes,
        }
    }

    pub fn num_lookups(&self) -> usize {
        self.basic_table_ids.len()
    }

    /// Slice both keys, look each slice pair up and build the accumulator
    /// columns. Row 0 of each column holds the full value.
    pub fn get_lookup_accumulators(&self, key_a: u64, key_b: u64) -> ReadData<F> {
        let (op, _) = self.id.op_and_width();
        let n = self.num_lookups();

        let mut slices = Vec::with_capacity(n);
        let mut shift = 0u64;
        for &bits in &self.slice_sizes {
            let mask = (1u64 << bits) - 1;
            let a = (key_a >> shift) & mask;
            let b = (key_b >> shift) & mask;
            slices.push([a, b, op.apply(a, b)]);
            shift += bits;
        }

        let mut read = ReadData::<F>::default();
        for column in &mut read.columns {
            column.resize(n, F::zero());
        }
        for i in (0..n).rev() {
            let [a, b, c] = slices[i];
            let (mut acc_1, mut acc_2, mut acc_3) = (F::from(a), F::from(b), F::from(c));
            if i + 1 < n {
                acc_1 += self.column_1_step_sizes[i + 1] * read.columns[0][i + 1];
                acc_2 += self.column_2_step_sizes[i + 1] * read.columns[1][i + 1];
                acc_3 += self.column_3_step_sizes[i + 1] * read.columns[2][i + 1];
            }
            read.columns[0][i] = acc_1;
            read.columns[1][i] = acc_2;
            read.columns[2][i] = acc_3;
        }
        read.lookup_entries = slices.iter().map(|s| LookupEntry { key: [s[0], s[1]] }).collect();
        read
    }
}

// ---------------------------------------------------------------------------
// ReadData
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnIdx {
    C1,
    C2,
    C3,
}

/// Column values (or witness indices) produced by a multi-table read, one row
/// per basic lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadData<T> {
    pub columns: [Vec<T>; 3],
    pub lookup_entries: Vec<LookupEntry>,
}

impl<T> Default for ReadData<T> {
    fn default() -> Self {
        Self {
            columns: [Vec::new(), Vec::new(), Vec::new()],
            lookup_entries: Vec::new(),
        }
    }
}

impl<T> std::ops::Index<ColumnIdx> for ReadData<T> {
    type Output = Vec<T>;
    fn index(&self, idx: ColumnIdx) -> &Self::Output {
        &self.columns[idx as usize]
    }
}

impl<T> std::ops::IndexMut<ColumnIdx> for ReadData<T> {
    fn index_mut(&mut self, idx: ColumnIdx) -> &mut Self::Output {
        &mut self.columns[idx as usize]
    }
}
