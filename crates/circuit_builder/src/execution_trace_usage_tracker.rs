//! Tracks which rows of a structured trace are in use across a sequence of
//! circuits, and splits those rows evenly between worker threads.
//!
//! A folding prover only needs to touch the rows that some circuit of the
//! sequence actually filled. The tracker accumulates, per block, the largest
//! gate count seen so far and turns it into a list of active row ranges.

use rayon::prelude::*;

use crate::execution_trace::{MegaBlockKind, NUM_MEGA_BLOCKS};
use crate::mega_builder::MegaCircuitBuilder;
use crate::trace_structure::TraceSettings;

// ════════════════════════════════════════════════════════════════════════
//  Range
// ════════════════════════════════════════════════════════════════════════

/// Half-open row interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Range {
    pub start: usize,
    pub end: usize,
}

impl Range {
    pub fn new(start: usize, end: usize) -> Self {
        debug_assert!(start <= end, "range start {start} is past its end {end}");
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    pub fn contains(&self, idx: usize) -> bool {
        self.start <= idx && idx < self.end
    }
}

impl From<(usize, usize)> for Range {
    fn from((start, end): (usize, usize)) -> Self {
        Self::new(start, end)
    }
}

// ════════════════════════════════════════════════════════════════════════
//  ExecutionTraceUsageTracker
// ════════════════════════════════════════════════════════════════════════

/// Active-row bookkeeping for a structured trace shared by several circuits.
#[derive(Debug, Clone)]
pub struct ExecutionTraceUsageTracker {
    settings: TraceSettings,
    /// Largest gate count seen per block, in trace order.
    max_sizes: [usize; NUM_MEGA_BLOCKS],
    /// First row of each block in the structured layout.
    fixed_offsets: [usize; NUM_MEGA_BLOCKS],
    max_databus_size: usize,
    max_tables_size: usize,
    /// Rows in use after the latest `update`.
    pub active_ranges: Vec<Range>,
    /// Rows in use before the latest `update`.
    pub previous_active_ranges: Vec<Range>,
    /// Output of the latest `construct_thread_ranges`, one list per thread.
    pub thread_ranges: Vec<Vec<Range>>,
}

impl ExecutionTraceUsageTracker {
    pub fn new(settings: &TraceSettings) -> Self {
        let mut fixed_offsets = [0usize; NUM_MEGA_BLOCKS];
        if let Some(capacities) = settings.capacities() {
            // Row 0 is reserved; the first block starts at 1.
            let mut offset = 1usize;
            for (slot, capacity) in fixed_offsets.iter_mut().zip(capacities) {
                *slot = offset;
                offset += capacity as usize;
            }
        }
        Self {
            settings: *settings,
            max_sizes: [0; NUM_MEGA_BLOCKS],
            fixed_offsets,
            max_databus_size: 0,
            max_tables_size: 0,
            active_ranges: Vec::new(),
            previous_active_ranges: Vec::new(),
            thread_ranges: Vec::new(),
        }
    }

    pub fn max_size(&self, kind: MegaBlockKind) -> usize {
        self.max_sizes[kind.index()]
    }

    pub fn fixed_offset(&self, kind: MegaBlockKind) -> usize {
        self.fixed_offsets[kind.index()]
    }

    pub fn max_databus_size(&self) -> usize {
        self.max_databus_size
    }

    pub fn max_tables_size(&self) -> usize {
        self.max_tables_size
    }

    /// Fold one more circuit into the running maxima and recompute the
    /// active ranges. The previous ranges are kept for `use_prev` queries.
    pub fn update(&mut self, circuit: &MegaCircuitBuilder) {
        for (max_size, block) in self.max_sizes.iter_mut().zip(circuit.blocks.get()) {
            *max_size = (*max_size).max(block.gate_count());
        }
        self.max_databus_size = self.max_databus_size.max(circuit.get_databus_size());
        self.max_tables_size = self.max_tables_size.max(circuit.get_tables_size());

        self.previous_active_ranges = std::mem::take(&mut self.active_ranges);
        for (&offset, &max_size) in self.fixed_offsets.iter().zip(&self.max_sizes) {
            self.active_ranges.push(Range::new(offset, offset + max_size));
        }

        // Databus columns sit at the top of the trace and lookup tables at the
        // bottom of the dyadic domain.
        let busread = MegaBlockKind::BusRead.index();
        let databus_end = self
            .max_databus_size
            .max(self.fixed_offsets[busread] + self.max_sizes[busread]);
        self.active_ranges.push(Range::new(0, databus_end));

        let dyadic_size = if circuit.blocks.is_structured() {
            circuit.blocks.get_structured_dyadic_size()
        } else {
            self.settings.dyadic_size()
        };
        let lookups_start = dyadic_size.saturating_sub(self.max_tables_size);
        self.active_ranges.push(Range::new(lookups_start, dyadic_size));

        tracing::debug!(
            databus = self.max_databus_size,
            tables = self.max_tables_size,
            dyadic_size,
            ranges = self.active_ranges.len(),
            "usage tracker updated"
        );
    }

    /// Whether row `idx` is in use. Every row of an unstructured trace is.
    pub fn check_is_active(&self, idx: usize, use_prev: bool) -> bool {
        if !self.settings.is_structured() {
            return true;
        }
        let ranges = if use_prev {
            &self.previous_active_ranges
        } else {
            &self.active_ranges
        };
        ranges.iter().any(|range| range.contains(idx))
    }

    /// Split the active rows (or the whole domain when unstructured) between
    /// `num_threads` workers and store the result in `thread_ranges`.
    pub fn construct_thread_ranges(&mut self, num_threads: usize, full_domain_size: usize, use_prev: bool) {
        let ranges = if !self.settings.is_structured() {
            vec![Range::new(0, full_domain_size)]
        } else if use_prev {
            self.previous_active_ranges.clone()
        } else {
            self.active_ranges.clone()
        };
        let union = Self::construct_union_of_ranges(&ranges);
        self.thread_ranges = Self::construct_ranges_for_equal_content_distribution(&union, num_threads);
    }

    /// Run `f(thread_idx, ranges)` for every thread's range list on the rayon pool.
    pub fn par_for_each_thread_range<F>(&self, f: F)
    where
        F: Fn(usize, &[Range]) + Sync + Send,
    {
        self.thread_ranges
            .par_iter()
            .enumerate()
            .for_each(|(thread_idx, ranges)| f(thread_idx, ranges));
    }

    /// Map every thread's range list on the rayon pool, results in thread order.
    pub fn par_map_thread_ranges<T, F>(&self, f: F) -> Vec<T>
    where
        T: Send,
        F: Fn(usize, &[Range]) -> T + Sync + Send,
    {
        self.thread_ranges
            .par_iter()
            .enumerate()
            .map(|(thread_idx, ranges)| f(thread_idx, ranges))
            .collect()
    }

    // ── Range algorithms ────────────────────────────────────────────────

    /// Sorted, disjoint union of `ranges`. Overlapping and touching ranges
    /// merge; empty ranges are dropped.
    pub fn construct_union_of_ranges(ranges: &[Range]) -> Vec<Range> {
        let mut sorted: Vec<Range> = ranges.iter().copied().filter(|r| !r.is_empty()).collect();
        sorted.sort_unstable();

        let mut union: Vec<Range> = Vec::with_capacity(sorted.len());
        for range in sorted {
            match union.last_mut() {
                Some(last) if range.start <= last.end => last.end = last.end.max(range.end),
                _ => union.push(range),
            }
        }
        union
    }

    /// Deal the rows of `union_ranges` out to `num_threads` threads.
    ///
    /// Each range is cut into `num_threads` consecutive pieces of
    /// `len / num_threads` rows, the first `len % num_threads` pieces one row
    /// longer; piece `t` goes to thread `t` and empty pieces are skipped.
    pub fn construct_ranges_for_equal_content_distribution(
        union_ranges: &[Range],
        num_threads: usize,
    ) -> Vec<Vec<Range>> {
        assert!(num_threads > 0, "cannot distribute rows over zero threads");
        let mut thread_ranges: Vec<Vec<Range>> = vec![Vec::new(); num_threads];
        for range in union_ranges {
            let piece = range.len() / num_threads;
            let remainder = range.len() % num_threads;
            let mut start = range.start;
            for (thread_idx, ranges) in thread_ranges.iter_mut().enumerate() {
                let size = piece + usize::from(thread_idx < remainder);
                if size == 0 {
                    break;
                }
                ranges.push(Range::new(start, start + size));
                start += size;
            }
        }
        thread_ranges
    }
}

// ════════════════════════════════════════════════════════════════════════
//  Tests
// ════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::init_tracing;
    use crate::trace_structure::TraceStructureKind;
    use ark_ff::{One, Zero};
    use bbtrace_ecc::Fr;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    type Tracker = ExecutionTraceUsageTracker;

    fn ranges(pairs: &[(usize, usize)]) -> Vec<Range> {
        pairs.iter().map(|&p| Range::from(p)).collect()
    }

    // ── Union ──────────────────────────────────────────────────────

    #[test]
    fn union_merges_overlaps() {
        let input = ranges(&[(4, 7), (9, 13), (1, 12), (23, 40), (17, 19)]);
        assert_eq!(
            Tracker::construct_union_of_ranges(&input),
            ranges(&[(1, 13), (17, 19), (23, 40)])
        );
    }

    #[test]
    fn union_of_empty_and_single() {
        assert!(Tracker::construct_union_of_ranges(&[]).is_empty());
        let single = ranges(&[(5, 9)]);
        assert_eq!(Tracker::construct_union_of_ranges(&single), single);
    }

    #[test]
    fn union_merges_touching_ranges() {
        let input = ranges(&[(5, 8), (0, 5), (8, 8), (10, 12)]);
        assert_eq!(
            Tracker::construct_union_of_ranges(&input),
            ranges(&[(0, 8), (10, 12)])
        );
    }

    // ── Equal content distribution ─────────────────────────────────

    #[test]
    fn distribution_over_four_threads() {
        let union = ranges(&[(2, 8), (13, 34), (36, 45), (50, 60)]);
        let expected = vec![
            ranges(&[(2, 4), (13, 19), (36, 39), (50, 53)]),
            ranges(&[(4, 6), (19, 24), (39, 41), (53, 56)]),
            ranges(&[(6, 7), (24, 29), (41, 43), (56, 58)]),
            ranges(&[(7, 8), (29, 34), (43, 45), (58, 60)]),
        ];
        assert_eq!(Tracker::construct_ranges_for_equal_content_distribution(&union, 4), expected);
    }

    #[test]
    fn distribution_with_more_threads_than_rows() {
        let union = ranges(&[(2, 3), (13, 14)]);
        let expected = vec![ranges(&[(2, 3), (13, 14)]), vec![], vec![], vec![]];
        assert_eq!(Tracker::construct_ranges_for_equal_content_distribution(&union, 4), expected);
    }

    #[test]
    fn distribution_splits_large_range() {
        let union = ranges(&[(0, 1), (2, 101)]);
        let expected = vec![ranges(&[(0, 1), (2, 35)]), ranges(&[(35, 68)]), ranges(&[(68, 101)])];
        assert_eq!(Tracker::construct_ranges_for_equal_content_distribution(&union, 3), expected);
    }

    #[test]
    #[should_panic(expected = "zero threads")]
    fn distribution_over_zero_threads_panics() {
        Tracker::construct_ranges_for_equal_content_distribution(&ranges(&[(0, 4)]), 0);
    }

    // ── Tracker over circuits ──────────────────────────────────────

    fn micro_settings() -> TraceSettings {
        TraceSettings::from_kind(TraceStructureKind::Micro)
    }

    #[test]
    fn offsets_follow_structure() {
        let tracker = Tracker::new(&micro_settings());
        assert_eq!(tracker.fixed_offset(MegaBlockKind::EccOp), 1);
        assert_eq!(tracker.fixed_offset(MegaBlockKind::Arithmetic), 21);
        assert_eq!(tracker.fixed_offset(MegaBlockKind::Overflow), 42);
    }

    #[test]
    fn update_marks_filled_rows_active() {
        init_tracing();
        let mut tracker = Tracker::new(&micro_settings());
        let builder = MegaCircuitBuilder::new();
        tracker.update(&builder);

        // four constant gates in the arithmetic block
        assert_eq!(tracker.max_size(MegaBlockKind::Arithmetic), 4);
        assert!(tracker.check_is_active(21, false));
        assert!(tracker.check_is_active(24, false));
        assert!(!tracker.check_is_active(25, false));
        // databus range runs up to the end of the busread block
        assert!(tracker.check_is_active(3, false));
        assert!(!tracker.check_is_active(8, false));
        assert!(!tracker.check_is_active(21, true));
    }

    #[test]
    fn update_keeps_running_maximum() {
        let mut tracker = Tracker::new(&micro_settings());
        let mut large = MegaCircuitBuilder::new();
        large.create_bool_gate(large.base.zero_idx());
        large.create_bool_gate(large.base.zero_idx());
        tracker.update(&large);
        let small = MegaCircuitBuilder::new();
        tracker.update(&small);

        assert_eq!(tracker.max_size(MegaBlockKind::Arithmetic), 6);
        assert!(tracker.check_is_active(26, false));
        assert!(tracker.check_is_active(26, true));
        assert!(!tracker.check_is_active(27, false));
    }

    #[test]
    fn update_covers_databus_and_tables() {
        let mut tracker = Tracker::new(&micro_settings());
        let mut builder = MegaCircuitBuilder::new();
        for v in 0..8u64 {
            let idx = builder.base.add_variable(Fr::from(v));
            builder.add_public_calldata(idx);
        }
        let a = builder.base.add_variable(Fr::one());
        let b = builder.base.add_variable(Fr::zero());
        builder
            .create_lookup_gate(crate::lookup::BasicTableId::UintXorSlice2, a, b)
            .expect("key in table");
        tracker.update(&builder);

        assert_eq!(tracker.max_databus_size(), 8);
        assert_eq!(tracker.max_tables_size(), 16);
        assert!(tracker.check_is_active(7, false));
        // the sixteen table rows end the 64-row dyadic domain
        assert!(tracker.check_is_active(48, false));
        assert!(tracker.check_is_active(63, false));
        assert!(!tracker.check_is_active(47, false));
    }

    #[test]
    fn spilled_rows_are_active_in_overflow_block() {
        let settings = micro_settings().with_overflow_capacity(4);
        let mut tracker = Tracker::new(&settings);
        assert_eq!(tracker.fixed_offset(MegaBlockKind::Overflow), 42);

        let mut builder = MegaCircuitBuilder::new();
        for _ in 0..8 {
            builder.create_bool_gate(builder.base.zero_idx());
        }
        builder
            .finalize(&settings, crate::trace_structure::CapacityPolicy::Strict)
            .expect("overflow rows are free");
        tracker.update(&builder);

        assert_eq!(tracker.max_size(MegaBlockKind::Arithmetic), 10);
        assert_eq!(tracker.max_size(MegaBlockKind::Overflow), 2);
        assert!(tracker.check_is_active(30, false));
        assert!(!tracker.check_is_active(31, false));
        assert!(tracker.check_is_active(42, false));
        assert!(tracker.check_is_active(43, false));
        assert!(!tracker.check_is_active(44, false));
    }

    #[test]
    fn thread_ranges_cover_active_rows() {
        let mut tracker = Tracker::new(&micro_settings());
        tracker.update(&MegaCircuitBuilder::new());
        tracker.construct_thread_ranges(2, 64, false);
        assert_eq!(
            tracker.thread_ranges,
            vec![ranges(&[(0, 3), (21, 23)]), ranges(&[(3, 6), (23, 25)])]
        );
    }

    #[test]
    fn unstructured_trace_is_fully_active() {
        let mut tracker = Tracker::new(&TraceSettings::unstructured());
        tracker.update(&MegaCircuitBuilder::new());
        assert!(tracker.check_is_active(1_000, false));
        tracker.construct_thread_ranges(3, 10, false);
        assert_eq!(
            tracker.thread_ranges,
            vec![ranges(&[(0, 4)]), ranges(&[(4, 7)]), ranges(&[(7, 10)])]
        );
    }

    #[test]
    fn parallel_walk_visits_every_row_once() {
        let mut tracker = Tracker::new(&TraceSettings::unstructured());
        tracker.construct_thread_ranges(4, 1 << 10, false);

        let visited = AtomicUsize::new(0);
        tracker.par_for_each_thread_range(|_, ranges| {
            let rows: usize = ranges.iter().map(Range::len).sum();
            visited.fetch_add(rows, Ordering::Relaxed);
        });
        assert_eq!(visited.load(Ordering::Relaxed), 1 << 10);

        let per_thread = tracker.par_map_thread_ranges(|idx, ranges| (idx, ranges.len()));
        assert_eq!(per_thread, vec![(0, 1), (1, 1), (2, 1), (3, 1)]);
    }

    // ── Properties ─────────────────────────────────────────────────

    fn arb_ranges() -> impl Strategy<Value = Vec<Range>> {
        prop::collection::vec((0usize..200, 0usize..40), 0..12)
            .prop_map(|v| v.into_iter().map(|(s, l)| Range::new(s, s + l)).collect())
    }

    proptest! {
        #[test]
        fn prop_union_is_idempotent(input in arb_ranges()) {
            let once = Tracker::construct_union_of_ranges(&input);
            let twice = Tracker::construct_union_of_ranges(&once);
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn prop_union_covers_same_rows(input in arb_ranges()) {
            let union = Tracker::construct_union_of_ranges(&input);
            for pair in union.windows(2) {
                prop_assert!(pair[0].end < pair[1].start);
            }
            for idx in 0..250 {
                let in_input = input.iter().any(|r| r.contains(idx));
                let in_union = union.iter().any(|r| r.contains(idx));
                prop_assert_eq!(in_input, in_union);
            }
        }

        #[test]
        fn prop_distribution_rebuilds_union(input in arb_ranges(), num_threads in 1usize..9) {
            let union = Tracker::construct_union_of_ranges(&input);
            let threads = Tracker::construct_ranges_for_equal_content_distribution(&union, num_threads);
            prop_assert_eq!(threads.len(), num_threads);

            let flat: Vec<Range> = threads.iter().flatten().copied().collect();
            let total: usize = flat.iter().map(Range::len).sum();
            let union_total: usize = union.iter().map(Range::len).sum();
            prop_assert_eq!(total, union_total);
            prop_assert_eq!(Tracker::construct_union_of_ranges(&flat), union.clone());

            let loads: Vec<usize> = threads.iter().map(|t| t.iter().map(Range::len).sum()).collect();
            let max = loads.iter().copied().max().unwrap_or(0);
            let min = loads.iter().copied().min().unwrap_or(0);
            prop_assert!(max - min <= union.len());
        }
    }
}
