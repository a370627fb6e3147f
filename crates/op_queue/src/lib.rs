//! Queue of elliptic curve operations shared by a chain of circuits.
//!
//! Circuits push add / mul / equality ops through [`EccOpQueue`]. Each op is
//! evaluated natively and recorded both for the ECC virtual machine and in the
//! width-4 Ultra format that lands in the circuit's ecc_op block. Ops from
//! successive circuits are grouped into subtables that are logically prepended
//! (or, once, appended) to the aggregate table.

pub mod ecc_op_queue;
pub mod ecc_ops_table;

pub use ecc_op_queue::{construct_ultra_op, EccOpQueue};
pub use ecc_ops_table::{
    EccOpCode, EccOpsTable, EccvmOperation, EccvmOpsTable, MergeSettings, UltraEccOpsTable, UltraOp,
};
