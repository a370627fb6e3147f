//! Execution trace and circuit builder for the Mega arithmetization.
//!
//! [`MegaCircuitBuilder`] turns gate calls into rows of typed trace blocks
//! ([`MegaExecutionTraceBlocks`]), forwards goblin ECC ops to a shared
//! [`bbtrace_op_queue::EccOpQueue`] and finalizes the trace into a fixed
//! [`TraceStructure`] layout. [`ExecutionTraceUsageTracker`] follows which rows
//! a sequence of circuits actually fills and splits them between threads.

pub mod builder_base;
pub mod databus;
pub mod error;
pub mod execution_trace;
pub mod execution_trace_usage_tracker;
pub mod gate_data;
pub mod lookup;
pub mod mega_builder;
pub mod trace_structure;

pub use builder_base::{CircuitBuilderBase, DEFAULT_TAG};
pub use databus::{BusId, BusVector, DataBus};
pub use error::{Result, TraceError};
pub use execution_trace::{
    ExecutionTraceBlock, MegaBlockKind, MegaExecutionTraceBlocks, MegaTraceBlock, Selector,
    NUM_MEGA_BLOCKS, NUM_SELECTORS, NUM_WIRES,
};
pub use execution_trace_usage_tracker::{ExecutionTraceUsageTracker, Range};
pub use mega_builder::MegaCircuitBuilder;
pub use trace_structure::{CapacityPolicy, TraceSettings, TraceStructure, TraceStructureKind};
