// Numeric helpers shared by the trace crates.
//
// - uint256: crypto-bigint `U256` plus the limb/bit helpers used when
//   splitting curve coordinates and scalars
// - bitop: power-of-two rounding used for dyadic trace sizes
// - random: seeded RNG for reproducible test data

pub mod bitop;
pub mod random;
pub mod uint256;

pub use uint256::{U256, U256Ext};
