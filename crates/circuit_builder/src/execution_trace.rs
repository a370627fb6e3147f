//! Execution trace blocks for the Mega arithmetization.
//!
//! A trace is an ordered collection of typed blocks. Each block holds four wire
//! columns (indices into the builder's witness table) and fourteen selector
//! columns. Block order defines the final trace layout, and a structured trace
//! additionally reserves a fixed number of rows per block.

use std::fmt;

use ark_ff::Field;
use bbtrace_numeric::bitop::round_up_power_2;

use crate::error::{Result, TraceError};
use crate::trace_structure::{CapacityPolicy, TraceSettings};

// ── Selector ──────────────────────────────────────────────────────────────────

/// A selector column in an execution trace block.
///
/// `Zero` selectors are identically zero in their block and only track their
/// logical length; `Vec` selectors store every row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector<F> {
    /// All entries are zero. Only tracks the logical length.
    Zero(usize),
    /// Backed by a Vec of field elements.
    Vec(Vec<F>),
}

impl<F: Field> Selector<F> {
    /// Create a new zero selector with size 0.
    pub fn zero() -> Self {
        Selector::Zero(0)
    }

    /// Create a new vec-backed selector with size 0.
    pub fn vec() -> Self {
        Selector::Vec(Vec::new())
    }

    pub fn len(&self) -> usize {
        match self {
            Selector::Zero(n) => *n,
            Selector::Vec(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Push a field element. For `Zero` selectors, asserts the value is zero.
    pub fn push(&mut self, value: F) {
        match self {
            Selector::Zero(n) => {
                debug_assert!(value.is_zero(), "cannot push non-zero value to a zero selector");
                *n += 1;
            }
            Selector::Vec(v) => v.push(value),
        }
    }

    /// Overwrite the value at `idx`. Used when a gate is fused into the previous row.
    pub fn set(&mut self, idx: usize, value: F) {
        match self {
            Selector::Zero(_) => {
                debug_assert!(value.is_zero(), "cannot set non-zero value in a zero selector");
            }
            Selector::Vec(v) => v[idx] = value,
        }
    }

    /// Get the element at `index`. Returns zero for `Zero` selectors.
    pub fn get(&self, index: usize) -> F {
        match self {
            Selector::Zero(n) => {
                debug_assert!(index < *n, "zero selector index out of bounds");
                F::zero()
            }
            Selector::Vec(v) => v[index],
        }
    }

    pub fn is_vec(&self) -> bool {
        matches!(self, Selector::Vec(_))
    }

    /// Keep the first `len` entries.
    pub fn truncate(&mut self, len: usize) {
        match self {
            Selector::Zero(n) => *n = (*n).min(len),
            Selector::Vec(v) => v.truncate(len),
        }
    }
}

// ── Wires ─────────────────────────────────────────────────────────────────────

/// Number of wires in the Mega arithmetization.
pub const NUM_WIRES: usize = 4;

/// Wire columns: each wire is a vector of variable indices.
pub type Wires = [Vec<u32>; NUM_WIRES];

/// q_m, q_c, q_1, q_2, q_3, q_4.
pub const NUM_NON_GATE_SELECTORS: usize = 6;

/// One gate selector per gate-carrying block.
pub const NUM_GATE_SELECTORS: usize = 8;

pub const NUM_SELECTORS: usize = NUM_NON_GATE_SELECTORS + NUM_GATE_SELECTORS;

// ── ExecutionTraceBlock ───────────────────────────────────────────────────────

/// Wires, the six non-gate selectors and the sizing state shared by every block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionTraceBlock<F> {
    /// Wire columns (variable indices).
    pub wires: Wires,
    /// First trace row of this block, assigned by `compute_offsets`.
    pub trace_offset: u32,
    /// The 6 non-gate selectors: [q_m, q_c, q_1, q_2, q_3, q_4].
    pub non_gate_selectors: [Selector<F>; NUM_NON_GATE_SELECTORS],
    fixed_size: u32,
    padding: usize,
    locked: bool,
}

impl<F: Field> Default for ExecutionTraceBlock<F> {
    fn default() -> Self {
        Self {
            wires: std::array::from_fn(|_| Vec::new()),
            trace_offset: u32::MAX,
            non_gate_selectors: std::array::from_fn(|_| Selector::vec()),
            fixed_size: 0,
            padding: 0,
            locked: false,
        }
    }
}

impl<F: Field> ExecutionTraceBlock<F> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows in this block, padding included.
    pub fn size(&self) -> usize {
        self.wires[0].len()
    }

    /// Number of rows appended by gate construction, padding excluded.
    pub fn gate_count(&self) -> usize {
        self.size() - self.padding
    }

    /// Number of zero rows added by `finalize`.
    pub fn padding(&self) -> usize {
        self.padding
    }

    pub fn fixed_size(&self) -> u32 {
        self.fixed_size
    }

    /// Configure the number of rows this block reserves in a structured trace.
    pub fn set_fixed_capacity(&mut self, capacity: u32) {
        self.fixed_size = capacity;
    }

    /// Rows this block occupies in the trace: the fixed capacity when
    /// structured, the actual size otherwise.
    pub fn get_fixed_size(&self, is_structured: bool) -> u32 {
        if is_structured {
            self.fixed_size
        } else {
            self.size() as u32
        }
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Reserve space in all wire and selector vectors.
    pub fn reserve(&mut self, size_hint: usize) {
        for wire in &mut self.wires {
            wire.reserve(size_hint);
        }
        for sel in &mut self.non_gate_selectors {
            if let Selector::Vec(v) = sel {
                v.reserve(size_hint);
            }
        }
    }

    /// Populate all 4 wires with a single row of variable indices.
    pub fn populate_wires(&mut self, idx_1: u32, idx_2: u32, idx_3: u32, idx_4: u32) {
        assert!(!self.locked, "cannot add rows to a finalized trace block");
        self.wires[0].push(idx_1);
        self.wires[1].push(idx_2);
        self.wires[2].push(idx_3);
        self.wires[3].push(idx_4);
    }

    pub fn w_l(&self) -> &[u32] {
        &self.wires[0]
    }
    pub fn w_r(&self) -> &[u32] {
        &self.wires[1]
    }
    pub fn w_o(&self) -> &[u32] {
        &self.wires[2]
    }
    pub fn w_4(&self) -> &[u32] {
        &self.wires[3]
    }

    // Non-gate selector accessors.

    pub fn q_m(&self) -> &Selector<F> {
        &self.non_gate_selectors[0]
    }
    pub fn q_c(&self) -> &Selector<F> {
        &self.non_gate_selectors[1]
    }
    pub fn q_1(&self) -> &Selector<F> {
        &self.non_gate_selectors[2]
    }
    pub fn q_2(&self) -> &Selector<F> {
        &self.non_gate_selectors[3]
    }
    pub fn q_3(&self) -> &Selector<F> {
        &self.non_gate_selectors[4]
    }
    pub fn q_4(&self) -> &Selector<F> {
        &self.non_gate_selectors[5]
    }

    pub fn q_m_mut(&mut self) -> &mut Selector<F> {
        &mut self.non_gate_selectors[0]
    }
    pub fn q_c_mut(&mut self) -> &mut Selector<F> {
        &mut self.non_gate_selectors[1]
    }
    pub fn q_1_mut(&mut self) -> &mut Selector<F> {
        &mut self.non_gate_selectors[2]
    }
    pub fn q_2_mut(&mut self) -> &mut Selector<F> {
        &mut self.non_gate_selectors[3]
    }
    pub fn q_3_mut(&mut self) -> &mut Selector<F> {
        &mut self.non_gate_selectors[4]
    }
    pub fn q_4_mut(&mut self) -> &mut Selector<F> {
        &mut self.non_gate_selectors[5]
    }

    /// Push one row of non-gate selectors: [q_m, q_c, q_1, q_2, q_3, q_4].
    pub fn push_non_gate_selectors(&mut self, values: [F; NUM_NON_GATE_SELECTORS]) {
        for (sel, value) in self.non_gate_selectors.iter_mut().zip(values) {
            sel.push(value);
        }
    }
}

// ── MegaBlockKind ─────────────────────────────────────────────────────────────

/// The eleven Mega blocks, in trace order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MegaBlockKind {
    EccOp,
    BusRead,
    Lookup,
    PubInputs,
    Arithmetic,
    DeltaRange,
    Elliptic,
    Aux,
    Poseidon2External,
    Poseidon2Internal,
    Overflow,
}

/// Number of block types in the Mega arithmetization.
pub const NUM_MEGA_BLOCKS: usize = 11;

/// Index constants for the 8 gate-specific selectors within `gate_selectors`.
const Q_BUSREAD: usize = 0;
const Q_LOOKUP: usize = 1;
const Q_ARITH: usize = 2;
const Q_DELTA_RANGE: usize = 3;
const Q_ELLIPTIC: usize = 4;
const Q_AUX: usize = 5;
const Q_POSEIDON2_EXTERNAL: usize = 6;
const Q_POSEIDON2_INTERNAL: usize = 7;

impl MegaBlockKind {
    pub const ALL: [MegaBlockKind; NUM_MEGA_BLOCKS] = [
        MegaBlockKind::EccOp,
        MegaBlockKind::BusRead,
        MegaBlockKind::Lookup,
        MegaBlockKind::PubInputs,
        MegaBlockKind::Arithmetic,
        MegaBlockKind::DeltaRange,
        MegaBlockKind::Elliptic,
        MegaBlockKind::Aux,
        MegaBlockKind::Poseidon2External,
        MegaBlockKind::Poseidon2Internal,
        MegaBlockKind::Overflow,
    ];

    /// Position of the block in the trace.
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn label(self) -> &'static str {
        match self {
            MegaBlockKind::EccOp => "ecc_op",
            MegaBlockKind::BusRead => "busread",
            MegaBlockKind::Lookup => "lookup",
            MegaBlockKind::PubInputs => "pub_inputs",
            MegaBlockKind::Arithmetic => "arithmetic",
            MegaBlockKind::DeltaRange => "delta_range",
            MegaBlockKind::Elliptic => "elliptic",
            MegaBlockKind::Aux => "aux",
            MegaBlockKind::Poseidon2External => "poseidon2_external",
            MegaBlockKind::Poseidon2Internal => "poseidon2_internal",
            MegaBlockKind::Overflow => "overflow",
        }
    }

    /// The gate selector this block owns. Ecc-op and public-input rows are
    /// switched on by fixed lagrange polynomials instead, and the overflow
    /// block may hold gates of any kind.
    fn gate_selector_index(self) -> Option<usize> {
        match self {
            MegaBlockKind::BusRead => Some(Q_BUSREAD),
            MegaBlockKind::Lookup => Some(Q_LOOKUP),
            MegaBlockKind::Arithmetic => Some(Q_ARITH),
            MegaBlockKind::DeltaRange => Some(Q_DELTA_RANGE),
            MegaBlockKind::Elliptic => Some(Q_ELLIPTIC),
            MegaBlockKind::Aux => Some(Q_AUX),
            MegaBlockKind::Poseidon2External => Some(Q_POSEIDON2_EXTERNAL),
            MegaBlockKind::Poseidon2Internal => Some(Q_POSEIDON2_INTERNAL),
            MegaBlockKind::EccOp | MegaBlockKind::PubInputs | MegaBlockKind::Overflow => None,
        }
    }

    /// Whether rows past this block's capacity may move to the overflow block.
    /// Ecc-op and public-input rows are pinned to their lagrange-selected window.
    pub fn can_spill(self) -> bool {
        !matches!(
            self,
            MegaBlockKind::EccOp | MegaBlockKind::PubInputs | MegaBlockKind::Overflow
        )
    }
}

impl fmt::Display for MegaBlockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ── MegaTraceBlock ────────────────────────────────────────────────────────────

/// A Mega trace block: the shared `ExecutionTraceBlock` plus 8 gate selectors.
/// Only the block's own gate selector is vec-backed; the overflow block keeps
/// all of them vec-backed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MegaTraceBlock<F> {
    pub block: ExecutionTraceBlock<F>,
    pub kind: MegaBlockKind,
    /// [q_busread, q_lookup, q_arith, q_delta_range, q_elliptic, q_aux,
    ///  q_poseidon2_external, q_poseidon2_internal]
    pub gate_selectors: [Selector<F>; NUM_GATE_SELECTORS],
}

impl<F: Field> MegaTraceBlock<F> {
    pub fn new(kind: MegaBlockKind) -> Self {
        let own = kind.gate_selector_index();
        let gate_selectors = std::array::from_fn(|i| {
            if kind == MegaBlockKind::Overflow || own == Some(i) {
                Selector::vec()
            } else {
                Selector::zero()
            }
        });
        Self {
            block: ExecutionTraceBlock::default(),
            kind,
            gate_selectors,
        }
    }

    /// Number of rows in this block, padding included.
    pub fn size(&self) -> usize {
        self.block.size()
    }

    /// Number of gate rows, padding excluded.
    pub fn gate_count(&self) -> usize {
        self.block.gate_count()
    }

    pub fn set_fixed_capacity(&mut self, capacity: u32) {
        self.block.set_fixed_capacity(capacity);
    }

    pub fn populate_wires(&mut self, idx_1: u32, idx_2: u32, idx_3: u32, idx_4: u32) {
        self.block.populate_wires(idx_1, idx_2, idx_3, idx_4);
    }

    /// Push `value` to this block's gate selector and zero to the others.
    pub fn set_gate_selector(&mut self, value: F) {
        let own = self.kind.gate_selector_index();
        for (i, sel) in self.gate_selectors.iter_mut().enumerate() {
            if own == Some(i) {
                sel.push(value);
            } else {
                sel.push(F::zero());
            }
        }
    }

    /// Append one full row: 14 selector values followed by the 4 wires.
    pub fn append_row(&mut self, selectors: [F; NUM_SELECTORS], wires: [u32; NUM_WIRES]) {
        let [w_1, w_2, w_3, w_4] = wires;
        self.block.populate_wires(w_1, w_2, w_3, w_4);
        let (non_gate, gate) = selectors.split_at(NUM_NON_GATE_SELECTORS);
        for (sel, &value) in self.block.non_gate_selectors.iter_mut().zip(non_gate) {
            sel.push(value);
        }
        for (sel, &value) in self.gate_selectors.iter_mut().zip(gate) {
            sel.push(value);
        }
        self.check_selector_length_consistency();
    }

    /// Wire values of row `idx`.
    pub fn row_wires(&self, idx: usize) -> [u32; NUM_WIRES] {
        std::array::from_fn(|w| self.block.wires[w][idx])
    }

    /// Selector values of row `idx`: 6 non-gate followed by 8 gate selectors.
    pub fn row_selectors(&self, idx: usize) -> [F; NUM_SELECTORS] {
        let mut row = [F::zero(); NUM_SELECTORS];
        for (slot, sel) in row.iter_mut().zip(self.get_all_selectors()) {
            *slot = sel.get(idx);
        }
        row
    }

    /// Drop every row from `len` on.
    fn truncate(&mut self, len: usize) {
        for wire in &mut self.block.wires {
            wire.truncate(len);
        }
        for sel in self
            .block
            .non_gate_selectors
            .iter_mut()
            .chain(self.gate_selectors.iter_mut())
        {
            sel.truncate(len);
        }
    }

    /// Append `count` rows with every selector zero and every wire on `zero_idx`.
    fn pad(&mut self, count: usize, zero_idx: u32) {
        self.block.reserve(count);
        for _ in 0..count {
            self.append_row([F::zero(); NUM_SELECTORS], [zero_idx; NUM_WIRES]);
        }
        self.block.padding += count;
    }

    /// Every selector must have exactly one entry per row.
    pub fn check_selector_length_consistency(&self) {
        if cfg!(debug_assertions) {
            let size = self.size();
            for (i, sel) in self.get_all_selectors().iter().enumerate() {
                debug_assert_eq!(
                    sel.len(),
                    size,
                    "selector {i} of block {} has inconsistent length",
                    self.kind
                );
            }
        }
    }

    // Gate-specific selector accessors.

    pub fn q_busread(&self) -> &Selector<F> {
        &self.gate_selectors[Q_BUSREAD]
    }
    pub fn q_lookup(&self) -> &Selector<F> {
        &self.gate_selectors[Q_LOOKUP]
    }
    pub fn q_arith(&self) -> &Selector<F> {
        &self.gate_selectors[Q_ARITH]
    }
    pub fn q_delta_range(&self) -> &Selector<F> {
        &self.gate_selectors[Q_DELTA_RANGE]
    }
    pub fn q_elliptic(&self) -> &Selector<F> {
        &self.gate_selectors[Q_ELLIPTIC]
    }
    pub fn q_aux(&self) -> &Selector<F> {
        &self.gate_selectors[Q_AUX]
    }
    pub fn q_poseidon2_external(&self) -> &Selector<F> {
        &self.gate_selectors[Q_POSEIDON2_EXTERNAL]
    }
    pub fn q_poseidon2_internal(&self) -> &Selector<F> {
        &self.gate_selectors[Q_POSEIDON2_INTERNAL]
    }

    pub fn q_arith_mut(&mut self) -> &mut Selector<F> {
        &mut self.gate_selectors[Q_ARITH]
    }
    pub fn q_elliptic_mut(&mut self) -> &mut Selector<F> {
        &mut self.gate_selectors[Q_ELLIPTIC]
    }

    /// All 14 selectors: 6 non-gate followed by 8 gate selectors.
    pub fn get_all_selectors(&self) -> Vec<&Selector<F>> {
        let mut sels: Vec<&Selector<F>> = self.block.non_gate_selectors.iter().collect();
        sels.extend(self.gate_selectors.iter());
        sels
    }
}

// ── MegaExecutionTraceBlocks ──────────────────────────────────────────────────

/// All Mega trace blocks, one field per block in trace order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MegaExecutionTraceBlocks<F> {
    pub ecc_op: MegaTraceBlock<F>,
    pub busread: MegaTraceBlock<F>,
    pub lookup: MegaTraceBlock<F>,
    pub pub_inputs: MegaTraceBlock<F>,
    pub arithmetic: MegaTraceBlock<F>,
    pub delta_range: MegaTraceBlock<F>,
    pub elliptic: MegaTraceBlock<F>,
    pub aux: MegaTraceBlock<F>,
    pub poseidon2_external: MegaTraceBlock<F>,
    pub poseidon2_internal: MegaTraceBlock<F>,
    pub overflow: MegaTraceBlock<F>,
    is_structured: bool,
    /// Set when `finalize` moved rows of some block into `overflow`.
    has_overflow: bool,
    finalized: bool,
}

impl<F: Field> Default for MegaExecutionTraceBlocks<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: Field> MegaExecutionTraceBlocks<F> {
    pub fn new() -> Self {
        Self {
            ecc_op: MegaTraceBlock::new(MegaBlockKind::EccOp),
            busread: MegaTraceBlock::new(MegaBlockKind::BusRead),
            lookup: MegaTraceBlock::new(MegaBlockKind::Lookup),
            pub_inputs: MegaTraceBlock::new(MegaBlockKind::PubInputs),
            arithmetic: MegaTraceBlock::new(MegaBlockKind::Arithmetic),
            delta_range: MegaTraceBlock::new(MegaBlockKind::DeltaRange),
            elliptic: MegaTraceBlock::new(MegaBlockKind::Elliptic),
            aux: MegaTraceBlock::new(MegaBlockKind::Aux),
            poseidon2_external: MegaTraceBlock::new(MegaBlockKind::Poseidon2External),
            poseidon2_internal: MegaTraceBlock::new(MegaBlockKind::Poseidon2Internal),
            overflow: MegaTraceBlock::new(MegaBlockKind::Overflow),
            is_structured: false,
            has_overflow: false,
            finalized: false,
        }
    }

    /// Return references to all blocks in order.
    pub fn get(&self) -> [&MegaTraceBlock<F>; NUM_MEGA_BLOCKS] {
        [
            &self.ecc_op,
            &self.busread,
            &self.lookup,
            &self.pub_inputs,
            &self.arithmetic,
            &self.delta_range,
            &self.elliptic,
            &self.aux,
            &self.poseidon2_external,
            &self.poseidon2_internal,
            &self.overflow,
        ]
    }

    /// Return mutable references to all blocks in order.
    pub fn get_mut(&mut self) -> [&mut MegaTraceBlock<F>; NUM_MEGA_BLOCKS] {
        [
            &mut self.ecc_op,
            &mut self.busread,
            &mut self.lookup,
            &mut self.pub_inputs,
            &mut self.arithmetic,
            &mut self.delta_range,
            &mut self.elliptic,
            &mut self.aux,
            &mut self.poseidon2_external,
            &mut self.poseidon2_internal,
            &mut self.overflow,
        ]
    }

    /// The blocks that own a gate selector.
    pub fn get_gate_blocks(&self) -> [&MegaTraceBlock<F>; NUM_GATE_SELECTORS] {
        [
            &self.busread,
            &self.lookup,
            &self.arithmetic,
            &self.delta_range,
            &self.elliptic,
            &self.aux,
            &self.poseidon2_external,
            &self.poseidon2_internal,
        ]
    }

    pub fn block(&self, kind: MegaBlockKind) -> &MegaTraceBlock<F> {
        self.get()[kind.index()]
    }

    pub fn block_mut(&mut self, kind: MegaBlockKind) -> &mut MegaTraceBlock<F> {
        match kind {
            MegaBlockKind::EccOp => &mut self.ecc_op,
            MegaBlockKind::BusRead => &mut self.busread,
            MegaBlockKind::Lookup => &mut self.lookup,
            MegaBlockKind::PubInputs => &mut self.pub_inputs,
            MegaBlockKind::Arithmetic => &mut self.arithmetic,
            MegaBlockKind::DeltaRange => &mut self.delta_range,
            MegaBlockKind::Elliptic => &mut self.elliptic,
            MegaBlockKind::Aux => &mut self.aux,
            MegaBlockKind::Poseidon2External => &mut self.poseidon2_external,
            MegaBlockKind::Poseidon2Internal => &mut self.poseidon2_internal,
            MegaBlockKind::Overflow => &mut self.overflow,
        }
    }

    /// Assign each block the capacity named by `settings`.
    ///
    /// Fails with `StructureSizeMismatch` when the resulting trace would be
    /// longer than the target length the settings declare.
    pub fn set_fixed_block_sizes(&mut self, settings: &TraceSettings) -> Result<()> {
        let Some(capacities) = settings.capacities() else {
            self.is_structured = false;
            return Ok(());
        };
        if let Some(log_size) = settings.target_log_size {
            let target_size = 1usize << log_size;
            let dyadic_size = settings.dyadic_size();
            if dyadic_size > target_size {
                return Err(TraceError::StructureSizeMismatch {
                    structure_size: settings.size(),
                    dyadic_size,
                    target_size,
                });
            }
        }
        for (block, capacity) in self.get_mut().into_iter().zip(capacities) {
            block.set_fixed_capacity(capacity);
        }
        self.is_structured = true;
        Ok(())
    }

    pub fn is_structured(&self) -> bool {
        self.is_structured
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    pub fn has_overflow(&self) -> bool {
        self.has_overflow
    }

    /// Assign each block its first trace row. Row 0 is reserved, so the first
    /// block starts at 1.
    pub fn compute_offsets(&mut self, is_structured: bool) {
        let mut offset: u32 = 1;
        for block in self.get_mut() {
            block.block.trace_offset = offset;
            offset += block.block.get_fixed_size(is_structured);
        }
    }

    /// Trace length of the structured layout, reserved row included.
    pub fn get_structured_dyadic_size(&self) -> usize {
        let total: usize = self
            .get()
            .iter()
            .map(|b| b.block.fixed_size() as usize)
            .sum();
        round_up_power_2(1 + total)
    }

    /// Total number of rows across all blocks.
    pub fn get_total_content_size(&self) -> usize {
        self.get().iter().map(|b| b.size()).sum()
    }

    /// Log each block's usage against its capacity.
    pub fn summarize(&self) {
        tracing::info!("Mega trace block sizes (actual / fixed)");
        for block in self.get() {
            tracing::info!(
                block = block.kind.label(),
                actual = block.gate_count(),
                fixed = block.block.fixed_size(),
                "{:<20} {} / {}",
                block.kind.label(),
                block.gate_count(),
                block.block.fixed_size()
            );
        }
    }

    /// Check a structured trace against its capacities.
    ///
    /// Rows past a block's capacity are destined for the overflow block, so
    /// only a pinned block (ecc-op, public inputs) or the overflow block
    /// itself can run out of room. A pinned block always fails; the overflow
    /// block fails or warns according to `policy`.
    pub fn check_within_fixed_sizes(&self, policy: CapacityPolicy) -> Result<()> {
        if !self.is_structured {
            return Ok(());
        }
        let mut spilled = 0usize;
        for block in self.get() {
            if block.kind == MegaBlockKind::Overflow {
                continue;
            }
            let capacity = block.block.fixed_size();
            let size = block.gate_count();
            if size <= capacity as usize {
                continue;
            }
            if !block.kind.can_spill() {
                return Err(TraceError::CapacityExceeded {
                    block: block.kind,
                    size,
                    capacity,
                });
            }
            spilled += size - capacity as usize;
        }

        let capacity = self.overflow.block.fixed_size();
        let size = self.overflow.gate_count() + spilled;
        if size > capacity as usize {
            match policy {
                CapacityPolicy::Strict => {
                    return Err(TraceError::CapacityExceeded {
                        block: MegaBlockKind::Overflow,
                        size,
                        capacity,
                    });
                }
                CapacityPolicy::Warn => {
                    tracing::warn!(
                        size,
                        capacity,
                        "structured trace overflowed beyond the fixed overflow capacity"
                    );
                }
            }
        }
        Ok(())
    }

    /// Move every row past its block's capacity to the end of the overflow
    /// block, selectors and wires unchanged.
    fn move_structured_trace_overflow_to_overflow_block(&mut self) {
        let mut spilled: Vec<([F; NUM_SELECTORS], [u32; NUM_WIRES])> = Vec::new();
        for block in self.get_mut() {
            if !block.kind.can_spill() {
                continue;
            }
            let capacity = block.block.fixed_size() as usize;
            let size = block.size();
            if size <= capacity {
                continue;
            }
            tracing::debug!(
                block = block.kind.label(),
                rows = size - capacity,
                "moving rows to the overflow block"
            );
            spilled.extend((capacity..size).map(|i| (block.row_selectors(i), block.row_wires(i))));
            block.truncate(capacity);
        }
        if spilled.is_empty() {
            return;
        }
        self.has_overflow = true;
        self.overflow.block.reserve(spilled.len());
        for (selectors, wires) in spilled {
            self.overflow.append_row(selectors, wires);
        }
        // Only reachable under `CapacityPolicy::Warn`.
        let overflow_size = self.overflow.size();
        if overflow_size > self.overflow.block.fixed_size() as usize {
            self.overflow.set_fixed_capacity(overflow_size as u32);
        }
    }

    /// Validate capacities, move excess rows to the overflow block, pad a
    /// structured trace out to its layout, assign offsets and lock every block.
    pub fn finalize(&mut self, policy: CapacityPolicy, zero_idx: u32) -> Result<()> {
        if self.finalized {
            return Err(TraceError::AlreadyFinalized);
        }
        self.check_within_fixed_sizes(policy)?;
        let is_structured = self.is_structured;
        if is_structured {
            self.move_structured_trace_overflow_to_overflow_block();
        }
        for block in self.get_mut() {
            if is_structured {
                let capacity = block.block.fixed_size() as usize;
                let size = block.size();
                if size < capacity {
                    block.pad(capacity - size, zero_idx);
                }
            }
            block.block.locked = true;
        }
        self.compute_offsets(is_structured);
        self.finalized = true;
        tracing::debug!(
            structured = is_structured,
            overflow = self.has_overflow,
            content = self.get_total_content_size(),
            "trace blocks finalized"
        );
        Ok(())
    }
}
