use thiserror::Error;

use crate::tagged_value::ValueTag;

/// Errors raised by tagged value construction and operators.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum TaggedValueError {
    /// Binary operator applied to operands with different tags.
    #[error("type mismatch: {lhs} vs {rhs}")]
    TypeMismatch { lhs: ValueTag, rhs: ValueTag },

    /// Bitwise operator applied to a field element.
    #[error("bitwise operations are not supported on field elements")]
    BitwiseOnField,

    /// Bounds-checked construction given a value wider than the tag.
    #[error("value with {bits} significant bits is out of bounds for {tag}")]
    OutOfBounds { tag: ValueTag, bits: u32 },

    /// Division by zero, or by a non-invertible field element.
    #[error("invalid divisor: division by zero for {tag}")]
    InvalidDivisor { tag: ValueTag },

    /// Shift whose amount is a field element.
    #[error("shift amount must be an integer, got {tag}")]
    UnsupportedShiftOperand { tag: ValueTag },

    /// Numeric tag encoding outside the known range.
    #[error("invalid tag encoding {0}")]
    InvalidTag(u8),
}

pub type Result<T> = std::result::Result<T, TaggedValueError>;
