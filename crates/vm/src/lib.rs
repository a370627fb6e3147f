//! Runtime-tagged VM values.
//!
//! A [`TaggedValue`] holds one of six fixed-width unsigned integers or a
//! BN254 scalar field element. Operator semantics are chosen by the tag:
//! integers wrap modulo `2^bits`, the field variant uses modular arithmetic.

pub mod error;
pub mod tagged_value;

pub use error::{Result, TaggedValueError};
pub use tagged_value::{TaggedType, TaggedValue, Uint1, ValueTag, FF};
