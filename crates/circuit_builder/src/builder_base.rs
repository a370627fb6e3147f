//! Variable storage shared by circuit builders.
//!
//! Holds the witness table, the copy-constraint cycles (via `next_var_index` /
//! `prev_var_index` / `real_variable_index`), public inputs, the tag machinery
//! used by range-list sort constraints and the failure state.

use std::collections::HashMap;

use ark_ff::Field;
use bbtrace_numeric::bitop::round_up_power_2;

/// Default tag value: variables with this tag are not part of any multiset-equality check.
pub const DEFAULT_TAG: u32 = 0;

/// Sentinel: marks the *last* variable in its equivalence class (the "real" variable).
const REAL_VARIABLE: u32 = u32::MAX - 1;

/// Sentinel: marks the *first* variable in its equivalence class.
const FIRST_VARIABLE_IN_CLASS: u32 = u32::MAX - 2;

/// Base data and methods shared by all circuit builders.
#[derive(Debug, Clone)]
pub struct CircuitBuilderBase<F> {
    // ── witness storage ─────────────────────────────────────────────────
    /// All witness values used by the circuit.
    variables: Vec<F>,

    /// Map from witness index to real variable index. Two witnesses that share
    /// a real variable index share their value.
    real_variable_index: Vec<u32>,

    // ── copy-constraint cycle ───────────────────────────────────────────
    /// Index of the *next* variable in the equivalence-class cycle.
    next_var_index: Vec<u32>,

    /// Index of the *previous* variable in the equivalence-class cycle.
    prev_var_index: Vec<u32>,

    // ── public inputs ───────────────────────────────────────────────────
    public_inputs: Vec<u32>,
    public_inputs_finalized: bool,

    // ── tags ─────────────────────────────────────────────────────────────
    /// Per-real-variable tag for the generalized permutation argument.
    real_variable_tags: Vec<u32>,
    current_tag: u32,
    /// Permutation on tags: each tag maps to the tag its multiset must equal.
    tau: HashMap<u32, u32>,

    // ── bookkeeping ─────────────────────────────────────────────────────
    /// Index of a witness constrained to equal 0.
    zero_idx: u32,
    num_gates: usize,

    // ── error state ─────────────────────────────────────────────────────
    failed: bool,
    err: String,
}

impl<F: Field> CircuitBuilderBase<F> {
    // ════════════════════════════════════════════════════════════════════
    //  Construction
    // ════════════════════════════════════════════════════════════════════

    pub fn new() -> Self {
        Self {
            variables: Vec::new(),
            real_variable_index: Vec::new(),
            next_var_index: Vec::new(),
            prev_var_index: Vec::new(),
            public_inputs: Vec::new(),
            public_inputs_finalized: false,
            real_variable_tags: Vec::new(),
            current_tag: DEFAULT_TAG,
            tau: HashMap::new(),
            zero_idx: 0,
            num_gates: 0,
            failed: false,
            err: String::new(),
        }
    }

    // ════════════════════════════════════════════════════════════════════
    //  Variable management
    // ════════════════════════════════════════════════════════════════════

    /// Add a witness to the circuit and return its index.
    pub fn add_variable(&mut self, value: F) -> u32 {
        self.variables.push(value);
        let index = self.variables.len() as u32 - 1;
        self.real_variable_index.push(index);
        self.next_var_index.push(REAL_VARIABLE);
        self.prev_var_index.push(FIRST_VARIABLE_IN_CLASS);
        self.real_variable_tags.push(DEFAULT_TAG);
        index
    }

    /// Add a witness and register it as a public input.
    pub fn add_public_variable(&mut self, value: F) -> u32 {
        let index = self.add_variable(value);
        assert!(
            !self.public_inputs_finalized,
            "cannot add to public inputs after they have been finalized"
        );
        self.public_inputs.push(index);
        index
    }

    /// Make an existing witness public. Returns its position among the public inputs.
    pub fn set_public_input(&mut self, witness_index: u32) -> u32 {
        if self.public_inputs.contains(&witness_index) {
            if !self.failed {
                self.failure("attempted to set a public input that is already public".into());
            }
            return 0;
        }
        assert!(
            !self.public_inputs_finalized,
            "cannot add to public inputs after they have been finalized"
        );
        let public_input_index = self.public_inputs.len() as u32;
        self.public_inputs.push(witness_index);
        public_input_index
    }

    /// Get the witness value for a variable, following copy constraints.
    #[inline]
    pub fn get_variable(&self, index: u32) -> F {
        debug_assert!((index as usize) < self.real_variable_index.len());
        let real_idx = self.real_variable_index[index as usize];
        self.variables[real_idx as usize]
    }

    /// Overwrite a witness value. Used to check that constraints reject a bad witness.
    pub fn set_variable_unchecked(&mut self, index: u32, value: F) {
        let real_idx = self.real_variable_index[index as usize] as usize;
        self.variables[real_idx] = value;
    }

    pub fn get_variables(&self) -> &[F] {
        &self.variables
    }

    pub fn get_num_variables(&self) -> usize {
        self.variables.len()
    }

    pub fn real_variable_index(&self, index: u32) -> u32 {
        self.real_variable_index[index as usize]
    }

    // ════════════════════════════════════════════════════════════════════
    //  Copy-constraint / equivalence-class management
    // ════════════════════════════════════════════════════════════════════

    /// Join the equivalence classes of `a_idx` and `b_idx`.
    ///
    /// Records a failure if the current values disagree or the classes carry
    /// clashing tags.
    pub fn assert_equal(&mut self, a_idx: u32, b_idx: u32, msg: &str) {
        self.assert_valid_variables(&[a_idx, b_idx]);

        let values_equal = self.get_variable(a_idx) == self.get_variable(b_idx);
        if !values_equal && !self.failed {
            self.failure(msg.to_string());
        }

        let a_real_idx = self.real_variable_index[a_idx as usize];
        let b_real_idx = self.real_variable_index[b_idx as usize];
        if a_real_idx == b_real_idx {
            return;
        }

        // Point the whole b-chain at a's real variable.
        let b_start_idx = self.get_first_variable_in_class(b_idx);
        self.update_real_variable_indices(b_start_idx, a_real_idx);

        // Splice the cycles: last of b (its real variable) now leads to first of a.
        let a_start_idx = self.get_first_variable_in_class(a_idx);
        self.next_var_index[b_real_idx as usize] = a_start_idx;
        self.prev_var_index[a_start_idx as usize] = b_real_idx;

        let a_tag = self.real_variable_tags[a_real_idx as usize];
        let b_tag = self.real_variable_tags[b_real_idx as usize];
        let no_tag_clash = a_tag == DEFAULT_TAG || b_tag == DEFAULT_TAG || a_tag == b_tag;
        if !no_tag_clash && !self.failed {
            self.failure(msg.to_string());
        }
        if a_tag == DEFAULT_TAG {
            self.real_variable_tags[a_real_idx as usize] = b_tag;
        }
    }

    /// Walk back through `prev_var_index` to the first variable of the class.
    pub fn get_first_variable_in_class(&self, mut index: u32) -> u32 {
        while self.prev_var_index[index as usize] != FIRST_VARIABLE_IN_CLASS {
            index = self.prev_var_index[index as usize];
        }
        index
    }

    fn update_real_variable_indices(&mut self, index: u32, new_real_index: u32) {
        let mut cur = index;
        loop {
            self.real_variable_index[cur as usize] = new_real_index;
            cur = self.next_var_index[cur as usize];
            if cur == REAL_VARIABLE {
                break;
            }
        }
    }

    /// Debug-mode check that all variable indices are valid.
    pub fn assert_valid_variables(&self, variable_indices: &[u32]) {
        for &idx in variable_indices {
            debug_assert!(
                (idx as usize) < self.variables.len(),
                "variable index {} out of range (variables.len() = {})",
                idx,
                self.variables.len()
            );
        }
    }

    // ════════════════════════════════════════════════════════════════════
    //  Public inputs
    // ════════════════════════════════════════════════════════════════════

    pub fn public_inputs(&self) -> &[u32] {
        &self.public_inputs
    }

    pub fn num_public_inputs(&self) -> usize {
        self.public_inputs.len()
    }

    /// Prevent further additions to public inputs.
    pub fn finalize_public_inputs(&mut self) {
        self.public_inputs_finalized = true;
    }

    // ════════════════════════════════════════════════════════════════════
    //  Gate count
    // ════════════════════════════════════════════════════════════════════

    pub fn num_gates(&self) -> usize {
        self.num_gates
    }

    pub fn increment_num_gates(&mut self, count: usize) {
        self.num_gates += count;
    }

    /// Smallest power of two that fits `num_gates` rows.
    pub fn get_circuit_subgroup_size(&self, num_gates: usize) -> usize {
        round_up_power_2(num_gates)
    }

    // ════════════════════════════════════════════════════════════════════
    //  Tags / tau
    // ════════════════════════════════════════════════════════════════════

    /// Allocate a fresh tag.
    pub fn get_new_tag(&mut self) -> u32 {
        self.current_tag += 1;
        self.current_tag
    }

    /// Tag the real variable behind `variable_index`. Returns the previous tag.
    pub fn assign_tag(&mut self, variable_index: u32, tag: u32) -> u32 {
        let real_idx = self.real_variable_index[variable_index as usize] as usize;
        // A variable already tagged with this tag is fine; anything else is a logic error.
        let current = self.real_variable_tags[real_idx];
        debug_assert!(
            current == DEFAULT_TAG || current == tag,
            "variable {variable_index} is already tagged {current}"
        );
        self.real_variable_tags[real_idx] = tag;
        current
    }

    pub fn get_tag(&self, variable_index: u32) -> u32 {
        self.real_variable_tags[self.real_variable_index[variable_index as usize] as usize]
    }

    /// Record that the multiset tagged `tag_index` must equal the one tagged `tau_index`.
    pub fn set_tau_at_index(&mut self, tag_index: u32, tau_index: u32) {
        self.tau.insert(tag_index, tau_index);
    }

    /// Record the pair of tags in both directions.
    pub fn set_tau_transposition(&mut self, tag_index_1: u32, tag_index_2: u32) {
        self.set_tau_at_index(tag_index_1, tag_index_2);
        self.set_tau_at_index(tag_index_2, tag_index_1);
    }

    pub fn tau(&self) -> &HashMap<u32, u32> {
        &self.tau
    }

    // ════════════════════════════════════════════════════════════════════
    //  Zero index
    // ════════════════════════════════════════════════════════════════════

    pub fn zero_idx(&self) -> u32 {
        self.zero_idx
    }

    pub fn set_zero_idx(&mut self, value: u32) {
        self.zero_idx = value;
    }

    // ════════════════════════════════════════════════════════════════════
    //  Error state
    // ════════════════════════════════════════════════════════════════════

    pub fn failed(&self) -> bool {
        self.failed
    }

    pub fn err(&self) -> &str {
        &self.err
    }

    pub fn failure(&mut self, msg: String) {
        self.failed = true;
        self.err = msg;
    }
}

impl<F: Field> Default for CircuitBuilderBase<F> {
    fn default() -> Self {
        Self::new()
    }
}

// ════════════════════════════════════════════════════════════════════════
//  Tests
// ════════════════════════════════════════════════════════════════════════
