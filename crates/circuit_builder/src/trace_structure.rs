//! Fixed block layouts for structured Mega traces.
//!
//! A structured trace reserves a fixed number of rows for every block so that
//! circuits folded together share one layout. The named layouts below cover the
//! recursive-proving contexts the toolchain ships with; a driver may also load a
//! custom [`TraceStructure`] from JSON (feature `serde`).

use std::fmt;
use std::str::FromStr;

use bbtrace_numeric::bitop::round_up_power_2;

use crate::error::TraceError;
use crate::execution_trace::{MegaBlockKind, NUM_MEGA_BLOCKS};

// ════════════════════════════════════════════════════════════════════════
//  TraceStructure
// ════════════════════════════════════════════════════════════════════════

/// Per-block capacities, one field per Mega block in trace order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TraceStructure {
    pub ecc_op: u32,
    pub busread: u32,
    pub lookup: u32,
    pub pub_inputs: u32,
    pub arithmetic: u32,
    pub delta_range: u32,
    pub elliptic: u32,
    pub aux: u32,
    pub poseidon2_external: u32,
    pub poseidon2_internal: u32,
    pub overflow: u32,
}

impl TraceStructure {
    /// Build a structure from capacities listed in block order.
    pub const fn from_capacities(c: [u32; NUM_MEGA_BLOCKS]) -> Self {
        Self {
            ecc_op: c[0],
            busread: c[1],
            lookup: c[2],
            pub_inputs: c[3],
            arithmetic: c[4],
            delta_range: c[5],
            elliptic: c[6],
            aux: c[7],
            poseidon2_external: c[8],
            poseidon2_internal: c[9],
            overflow: c[10],
        }
    }

    /// Capacities in block order.
    pub fn capacities(&self) -> [u32; NUM_MEGA_BLOCKS] {
        [
            self.ecc_op,
            self.busread,
            self.lookup,
            self.pub_inputs,
            self.arithmetic,
            self.delta_range,
            self.elliptic,
            self.aux,
            self.poseidon2_external,
            self.poseidon2_internal,
            self.overflow,
        ]
    }

    pub fn capacity(&self, kind: MegaBlockKind) -> u32 {
        self.capacities()[kind.index()]
    }

    /// Sum of all block capacities.
    pub fn size(&self) -> usize {
        self.capacities().iter().map(|&c| c as usize).sum()
    }
}

// ════════════════════════════════════════════════════════════════════════
//  Named structures
// ════════════════════════════════════════════════════════════════════════

/// The named layouts. Each one targets a fixed power-of-two trace length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TraceStructureKind {
    #[cfg_attr(feature = "serde", serde(rename = "micro"))]
    Micro,
    #[cfg_attr(feature = "serde", serde(rename = "tiny"))]
    Tiny,
    #[cfg_attr(feature = "serde", serde(rename = "small"))]
    Small,
    #[cfg_attr(feature = "serde", serde(rename = "client_ivc_bench"))]
    ClientIvcBench,
    #[cfg_attr(feature = "serde", serde(rename = "example_18"))]
    Example18,
    #[cfg_attr(feature = "serde", serde(rename = "example_20"))]
    Example20,
    #[cfg_attr(feature = "serde", serde(rename = "e2e_full_test"))]
    E2eFullTest,
}

const MICRO: TraceStructure = TraceStructure::from_capacities([5, 5, 5, 5, 10, 2, 2, 2, 2, 3, 0]);

const TINY: TraceStructure =
    TraceStructure::from_capacities([18, 3, 2, 1, 1 << 14, 5, 2, 10, 2, 2, 0]);

const SMALL: TraceStructure = TraceStructure::from_capacities([
    1 << 14,
    1 << 14,
    1 << 14,
    1 << 14,
    1 << 15,
    1 << 14,
    1 << 14,
    1 << 14,
    1 << 14,
    1 << 15,
    0,
]);

const CLIENT_IVC_BENCH: TraceStructure = TraceStructure::from_capacities([
    1 << 11,
    1 << 8,
    144_000,
    1 << 8,
    396_000,
    180_000,
    18_000,
    272_000,
    5_000,
    28_000,
    0,
]);

const EXAMPLE_18: TraceStructure = TraceStructure::from_capacities([
    1 << 10,
    1 << 6,
    36_000,
    1 << 6,
    84_000,
    45_000,
    9_000,
    68_000,
    2_500,
    14_000,
    0,
]);

const E2E_FULL_TEST: TraceStructure = TraceStructure::from_capacities([
    1 << 10,
    6_000,
    200_000,
    4_000,
    200_000,
    25_000,
    80_000,
    100_000,
    30_128,
    172_000,
    0,
]);

impl TraceStructureKind {
    pub const ALL: [TraceStructureKind; 7] = [
        TraceStructureKind::Micro,
        TraceStructureKind::Tiny,
        TraceStructureKind::Small,
        TraceStructureKind::ClientIvcBench,
        TraceStructureKind::Example18,
        TraceStructureKind::Example20,
        TraceStructureKind::E2eFullTest,
    ];

    pub fn structure(self) -> TraceStructure {
        match self {
            TraceStructureKind::Micro => MICRO,
            TraceStructureKind::Tiny => TINY,
            TraceStructureKind::Small => SMALL,
            TraceStructureKind::ClientIvcBench | TraceStructureKind::Example20 => CLIENT_IVC_BENCH,
            TraceStructureKind::Example18 => EXAMPLE_18,
            TraceStructureKind::E2eFullTest => E2E_FULL_TEST,
        }
    }

    /// Log2 of the trace length this layout is sized for.
    pub fn target_log_size(self) -> u32 {
        match self {
            TraceStructureKind::Micro => 6,
            TraceStructureKind::Tiny => 15,
            TraceStructureKind::Small | TraceStructureKind::Example18 => 18,
            TraceStructureKind::ClientIvcBench
            | TraceStructureKind::Example20
            | TraceStructureKind::E2eFullTest => 20,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            TraceStructureKind::Micro => "micro",
            TraceStructureKind::Tiny => "tiny",
            TraceStructureKind::Small => "small",
            TraceStructureKind::ClientIvcBench => "client_ivc_bench",
            TraceStructureKind::Example18 => "example_18",
            TraceStructureKind::Example20 => "example_20",
            TraceStructureKind::E2eFullTest => "e2e_full_test",
        }
    }
}

impl fmt::Display for TraceStructureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TraceStructureKind {
    type Err = TraceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TraceStructureKind::ALL
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| TraceError::UnknownTraceStructure(s.to_string()))
    }
}

// ════════════════════════════════════════════════════════════════════════
//  TraceSettings
// ════════════════════════════════════════════════════════════════════════

/// Layout handed to the trace collection and the usage tracker.
///
/// `structure == None` means an unstructured trace: blocks are laid out back
/// to back at their actual sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TraceSettings {
    pub structure: Option<TraceStructure>,
    /// Rows reserved past the structured blocks for gates that do not fit.
    #[cfg_attr(feature = "serde", serde(default))]
    pub overflow_capacity: u32,
    /// Log2 bound the structured dyadic size must not exceed, if any.
    #[cfg_attr(feature = "serde", serde(default))]
    pub target_log_size: Option<u32>,
}

impl TraceSettings {
    pub fn unstructured() -> Self {
        Self::default()
    }

    pub fn from_kind(kind: TraceStructureKind) -> Self {
        Self {
            structure: Some(kind.structure()),
            overflow_capacity: 0,
            target_log_size: Some(kind.target_log_size()),
        }
    }

    pub fn with_overflow_capacity(mut self, overflow_capacity: u32) -> Self {
        self.overflow_capacity = overflow_capacity;
        self
    }

    pub fn is_structured(&self) -> bool {
        self.structure.is_some()
    }

    /// Block capacities in trace order, or `None` for an unstructured trace.
    /// The overflow block takes `overflow_capacity` in place of the
    /// structure's own overflow entry.
    pub fn capacities(&self) -> Option<[u32; NUM_MEGA_BLOCKS]> {
        self.structure.map(|structure| {
            let mut capacities = structure.capacities();
            capacities[MegaBlockKind::Overflow.index()] = self.overflow_capacity;
            capacities
        })
    }

    /// Rows claimed by the structured blocks and the overflow block.
    pub fn size(&self) -> usize {
        self.capacities()
            .map_or(0, |c| c.iter().map(|&c| c as usize).sum())
    }

    /// Power-of-two trace length for this layout, including the reserved
    /// zero row at the top of the trace.
    pub fn dyadic_size(&self) -> usize {
        round_up_power_2(1 + self.size())
    }
}

/// What `finalize` does when a block outgrows its fixed capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CapacityPolicy {
    /// Fail with `CapacityExceeded`.
    #[default]
    Strict,
    /// Log a warning and keep going. Meant for benchmark and test tooling.
    Warn,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_structures_fit_their_targets() {
        for kind in TraceStructureKind::ALL {
            let settings = TraceSettings::from_kind(kind);
            assert!(
                settings.dyadic_size() <= 1usize << kind.target_log_size(),
                "{kind} overflows its target"
            );
            // Every layout uses more than half of its target.
            assert_eq!(settings.dyadic_size(), 1usize << kind.target_log_size(), "{kind}");
        }
    }

    #[test]
    fn micro_capacities() {
        let micro = TraceStructureKind::Micro.structure();
        assert_eq!(micro.size(), 41);
        assert_eq!(micro.capacity(MegaBlockKind::Arithmetic), 10);
        assert_eq!(micro.capacity(MegaBlockKind::Poseidon2Internal), 3);
        assert_eq!(micro.capacity(MegaBlockKind::Overflow), 0);
    }

    #[test]
    fn example_20_matches_client_ivc_bench() {
        assert_eq!(
            TraceStructureKind::Example20.structure(),
            TraceStructureKind::ClientIvcBench.structure()
        );
    }

    #[test]
    fn overflow_capacity_grows_the_dyadic_size() {
        let settings = TraceSettings::from_kind(TraceStructureKind::Micro);
        assert_eq!(settings.dyadic_size(), 64);
        assert_eq!(settings.with_overflow_capacity(30).dyadic_size(), 128);
    }

    #[test]
    fn overflow_capacity_replaces_structure_overflow() {
        let mut capacities = [1u32; NUM_MEGA_BLOCKS];
        capacities[MegaBlockKind::Overflow.index()] = 20;
        let settings = TraceSettings {
            structure: Some(TraceStructure::from_capacities(capacities)),
            overflow_capacity: 3,
            target_log_size: None,
        };
        let resolved = settings.capacities().expect("structured");
        assert_eq!(resolved[MegaBlockKind::Overflow.index()], 3);
        assert_eq!(settings.size(), 13);
        assert_eq!(TraceSettings::unstructured().capacities(), None);
    }

    #[test]
    fn unstructured_settings() {
        let settings = TraceSettings::unstructured();
        assert!(!settings.is_structured());
        assert_eq!(settings.size(), 0);
        assert_eq!(settings.dyadic_size(), 1);
    }

    #[test]
    fn kinds_parse_from_their_names() {
        for kind in TraceStructureKind::ALL {
            assert_eq!(kind.name().parse::<TraceStructureKind>(), Ok(kind));
        }
        assert_eq!(
            "huge".parse::<TraceStructureKind>(),
            Err(TraceError::UnknownTraceStructure("huge".into()))
        );
    }

    #[test]
    fn default_policy_is_strict() {
        assert_eq!(CapacityPolicy::default(), CapacityPolicy::Strict);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn settings_load_from_json() {
        let json = r#"{
            "structure": {
                "ecc_op": 5, "busread": 5, "lookup": 5, "pub_inputs": 5,
                "arithmetic": 10, "delta_range": 2, "elliptic": 2, "aux": 2,
                "poseidon2_external": 2, "poseidon2_internal": 3, "overflow": 0
            },
            "overflow_capacity": 4
        }"#;
        let settings: TraceSettings = serde_json::from_str(json).unwrap();
        assert_eq!(settings.structure, Some(TraceStructureKind::Micro.structure()));
        assert_eq!(settings.overflow_capacity, 4);
        assert_eq!(settings.target_log_size, None);

        let kind: TraceStructureKind = serde_json::from_str("\"example_18\"").unwrap();
        assert_eq!(kind, TraceStructureKind::Example18);
    }
}
