//! Errors surfaced by the trace collection and the lookup machinery.

use thiserror::Error;

use bbtrace_ecc::Fr;

use crate::databus::BusId;
use crate::execution_trace::MegaBlockKind;
use crate::lookup::BasicTableId;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TraceError {
    #[error("block {block} holds {size} rows but its fixed capacity is {capacity}")]
    CapacityExceeded {
        block: MegaBlockKind,
        size: usize,
        capacity: u32,
    },

    #[error("trace structure of {structure_size} rows needs a {dyadic_size}-row trace, more than its target of {target_size}")]
    StructureSizeMismatch {
        structure_size: usize,
        dyadic_size: usize,
        target_size: usize,
    },

    #[error("trace blocks have already been finalized")]
    AlreadyFinalized,

    #[error("unknown trace structure `{0}`")]
    UnknownTraceStructure(String),

    #[error("lookup table {0:?} is not registered with the builder")]
    UnknownLookupTable(BasicTableId),

    #[error("key {key:?} is not an entry of lookup table {table:?}")]
    LookupEntryNotFound { table: BasicTableId, key: [u64; 2] },

    #[error("lookup key of {bits} bits is wider than the {width}-bit slices of table {table:?}")]
    LookupKeyTooWide {
        table: BasicTableId,
        bits: u32,
        width: u64,
    },

    #[error("databus read at {index} is out of range for {bus:?} of length {size}")]
    DatabusReadOutOfRange { bus: BusId, index: Fr, size: usize },
}

pub type Result<T> = std::result::Result<T, TraceError>;
