//! Tagged value: a closed union over the VM's integer widths and the field.
//!
//! The tag is never stored on its own; it is derived from the active variant.
//! Integer operators work on a widened `u128` payload and mask the result back
//! to the tag's width, which gives wrapping semantics for every width at once.

use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, BitAnd, BitOr, BitXor, Div, Mul, Not, Shl, Shr, Sub};

use ark_ff::{Field, PrimeField, Zero};
use bbtrace_ecc::fields::conversions::{field_bit_length, field_to_u256};
use bbtrace_ecc::Fr;
use bbtrace_numeric::U256Ext;

use crate::error::{Result, TaggedValueError};

/// The VM's native field.
pub type FF = Fr;

// ════════════════════════════════════════════════════════════════════════
//  Tags
// ════════════════════════════════════════════════════════════════════════

/// Type tag of a [`TaggedValue`]. The discriminant is the VM's tag encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum ValueTag {
    FF = 0,
    U1 = 1,
    U8 = 2,
    U16 = 3,
    U32 = 4,
    U64 = 5,
    U128 = 6,
}

impl ValueTag {
    /// All tags in encoding order.
    pub const ALL: [ValueTag; 7] = [
        ValueTag::FF,
        ValueTag::U1,
        ValueTag::U8,
        ValueTag::U16,
        ValueTag::U32,
        ValueTag::U64,
        ValueTag::U128,
    ];

    /// The fixed-width integer tags.
    pub const INTEGERS: [ValueTag; 6] = [
        ValueTag::U1,
        ValueTag::U8,
        ValueTag::U16,
        ValueTag::U32,
        ValueTag::U64,
        ValueTag::U128,
    ];

    /// Number of bits a value of this tag can hold. For the field this is the
    /// modulus bit size.
    pub fn bit_width(self) -> u32 {
        match self {
            ValueTag::U1 => 1,
            ValueTag::U8 => 8,
            ValueTag::U16 => 16,
            ValueTag::U32 => 32,
            ValueTag::U64 => 64,
            ValueTag::U128 => 128,
            ValueTag::FF => FF::MODULUS_BIT_SIZE,
        }
    }

    pub fn is_integer(self) -> bool {
        self != ValueTag::FF
    }

    /// `2^bits - 1` for integer tags.
    fn mask(self) -> u128 {
        match self.bit_width() {
            128.. => u128::MAX,
            bits => (1u128 << bits) - 1,
        }
    }
}

impl TryFrom<u8> for ValueTag {
    type Error = TaggedValueError;

    fn try_from(value: u8) -> Result<Self> {
        ValueTag::ALL
            .get(value as usize)
            .copied()
            .ok_or(TaggedValueError::InvalidTag(value))
    }
}

impl fmt::Display for ValueTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueTag::FF => "FF",
            ValueTag::U1 => "U1",
            ValueTag::U8 => "U8",
            ValueTag::U16 => "U16",
            ValueTag::U32 => "U32",
            ValueTag::U64 => "U64",
            ValueTag::U128 => "U128",
        };
        f.write_str(name)
    }
}

// ════════════════════════════════════════════════════════════════════════
//  Uint1
// ════════════════════════════════════════════════════════════════════════

/// A single-bit unsigned integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Uint1(bool);

impl Uint1 {
    pub const fn new(bit: bool) -> Self {
        Self(bit)
    }

    pub const fn value(self) -> u8 {
        self.0 as u8
    }
}

impl From<bool> for Uint1 {
    fn from(bit: bool) -> Self {
        Self(bit)
    }
}

// ════════════════════════════════════════════════════════════════════════
//  TaggedValue
// ════════════════════════════════════════════════════════════════════════

/// A VM value together with its type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaggedValue {
    U1(Uint1),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    U128(u128),
    FF(FF),
}

/// Rust types that map onto one variant of [`TaggedValue`].
pub trait TaggedType: Sized + Copy {
    const TAG: ValueTag;

    fn into_tagged(self) -> TaggedValue;

    fn from_tagged(value: &TaggedValue) -> Option<Self>;
}

macro_rules! impl_tagged_type {
    ($ty:ty, $variant:ident) => {
        impl TaggedType for $ty {
            const TAG: ValueTag = ValueTag::$variant;

            fn into_tagged(self) -> TaggedValue {
                TaggedValue::$variant(self)
            }

            fn from_tagged(value: &TaggedValue) -> Option<Self> {
                match value {
                    TaggedValue::$variant(v) => Some(*v),
                    _ => None,
                }
            }
        }

        impl From<$ty> for TaggedValue {
            fn from(value: $ty) -> Self {
                TaggedValue::$variant(value)
            }
        }
    };
}

impl_tagged_type!(Uint1, U1);
impl_tagged_type!(u8, U8);
impl_tagged_type!(u16, U16);
impl_tagged_type!(u32, U32);
impl_tagged_type!(u64, U64);
impl_tagged_type!(u128, U128);
impl_tagged_type!(FF, FF);

impl TaggedValue {
    // ── Construction ───────────────────────────────────────────────

    /// Wrap a native value; the tag follows from its type.
    pub fn from_value<T: TaggedType>(value: T) -> Self {
        value.into_tagged()
    }

    /// Bounds-checked construction: fails if `value` needs more bits than `tag` has.
    pub fn from_tag(tag: ValueTag, value: FF) -> Result<Self> {
        if tag.is_integer() {
            let bits = field_bit_length(&value);
            if bits > tag.bit_width() {
                return Err(TaggedValueError::OutOfBounds { tag, bits });
            }
        }
        Ok(Self::from_tag_truncating(tag, value))
    }

    /// Construction that reduces `value` modulo `2^bits`. Identity for the field tag.
    pub fn from_tag_truncating(tag: ValueTag, value: FF) -> Self {
        if !tag.is_integer() {
            return TaggedValue::FF(value);
        }
        let low = field_to_u256(&value).low_u128();
        Self::from_integer(tag, low & tag.mask())
    }

    /// Build an integer variant from an already-masked payload.
    fn from_integer(tag: ValueTag, value: u128) -> Self {
        debug_assert!(tag.is_integer() && value <= tag.mask());
        match tag {
            ValueTag::U1 => TaggedValue::U1(Uint1(value != 0)),
            ValueTag::U8 => TaggedValue::U8(value as u8),
            ValueTag::U16 => TaggedValue::U16(value as u16),
            ValueTag::U32 => TaggedValue::U32(value as u32),
            ValueTag::U64 => TaggedValue::U64(value as u64),
            ValueTag::U128 => TaggedValue::U128(value),
            ValueTag::FF => TaggedValue::FF(FF::from(value)),
        }
    }

    // ── Accessors ──────────────────────────────────────────────────

    pub fn get_tag(&self) -> ValueTag {
        match self {
            TaggedValue::U1(_) => ValueTag::U1,
            TaggedValue::U8(_) => ValueTag::U8,
            TaggedValue::U16(_) => ValueTag::U16,
            TaggedValue::U32(_) => ValueTag::U32,
            TaggedValue::U64(_) => ValueTag::U64,
            TaggedValue::U128(_) => ValueTag::U128,
            TaggedValue::FF(_) => ValueTag::FF,
        }
    }

    /// The value as a field element. Lossless for every tag.
    pub fn as_field(&self) -> FF {
        match self {
            TaggedValue::FF(value) => *value,
            _ => FF::from(self.int()),
        }
    }

    /// The native value, if the tag matches `T`.
    pub fn try_as<T: TaggedType>(&self) -> Result<T> {
        T::from_tagged(self).ok_or(TaggedValueError::TypeMismatch {
            lhs: self.get_tag(),
            rhs: T::TAG,
        })
    }

    /// Integer payload widened to `u128`; `None` for the field variant.
    fn integer_payload(&self) -> Option<u128> {
        match *self {
            TaggedValue::U1(v) => Some(v.0 as u128),
            TaggedValue::U8(v) => Some(v as u128),
            TaggedValue::U16(v) => Some(v as u128),
            TaggedValue::U32(v) => Some(v as u128),
            TaggedValue::U64(v) => Some(v as u128),
            TaggedValue::U128(v) => Some(v),
            TaggedValue::FF(_) => None,
        }
    }

    // ── Operator plumbing ──────────────────────────────────────────

    fn check_same_tag(&self, rhs: &Self) -> Result<ValueTag> {
        let (lhs_tag, rhs_tag) = (self.get_tag(), rhs.get_tag());
        if lhs_tag != rhs_tag {
            return Err(TaggedValueError::TypeMismatch {
                lhs: lhs_tag,
                rhs: rhs_tag,
            });
        }
        Ok(lhs_tag)
    }

    fn arithmetic(
        &self,
        rhs: &Self,
        int_op: impl FnOnce(ValueTag, u128, u128) -> Result<u128>,
        ff_op: impl FnOnce(FF, FF) -> Result<FF>,
    ) -> Result<Self> {
        let tag = self.check_same_tag(rhs)?;
        match (self, rhs) {
            (TaggedValue::FF(a), TaggedValue::FF(b)) => Ok(TaggedValue::FF(ff_op(*a, *b)?)),
            _ => {
                let (a, b) = (self.int(), rhs.int());
                Ok(Self::from_integer(tag, int_op(tag, a, b)? & tag.mask()))
            }
        }
    }

    fn bitwise(&self, rhs: &Self, op: impl FnOnce(u128, u128) -> u128) -> Result<Self> {
        let tag = self.check_same_tag(rhs)?;
        if !tag.is_integer() {
            return Err(TaggedValueError::BitwiseOnField);
        }
        Ok(Self::from_integer(tag, op(self.int(), rhs.int()) & tag.mask()))
    }

    fn shift(&self, amount: &Self, op: impl FnOnce(u128, u32) -> u128) -> Result<Self> {
        let tag = self.get_tag();
        if !tag.is_integer() {
            return Err(TaggedValueError::BitwiseOnField);
        }
        let amount = amount
            .integer_payload()
            .ok_or(TaggedValueError::UnsupportedShiftOperand { tag: ValueTag::FF })?;
        if amount >= tag.bit_width() as u128 {
            return Ok(Self::from_integer(tag, 0));
        }
        Ok(Self::from_integer(tag, op(self.int(), amount as u32) & tag.mask()))
    }

    /// Integer payload of a value already known to be an integer.
    fn int(&self) -> u128 {
        self.integer_payload().unwrap_or_default()
    }

    // ── Comparison ─────────────────────────────────────────────────

    /// Ordering between two values of the same tag. Field elements compare
    /// by their canonical integer representation.
    pub fn compare(&self, rhs: &Self) -> Result<Ordering> {
        self.check_same_tag(rhs)?;
        Ok(match (self, rhs) {
            (TaggedValue::FF(a), TaggedValue::FF(b)) => a.cmp(b),
            _ => self.int().cmp(&rhs.int()),
        })
    }

    pub fn lt(&self, rhs: &Self) -> Result<bool> {
        Ok(self.compare(rhs)? == Ordering::Less)
    }

    pub fn lte(&self, rhs: &Self) -> Result<bool> {
        Ok(self.compare(rhs)? != Ordering::Greater)
    }
}

impl fmt::Display for TaggedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaggedValue::FF(value) => write!(f, "{}({})", ValueTag::FF, value.into_bigint()),
            _ => write!(f, "{}({})", self.get_tag(), self.int()),
        }
    }
}

// ════════════════════════════════════════════════════════════════════════
//  Operators
// ════════════════════════════════════════════════════════════════════════

impl Add for TaggedValue {
    type Output = Result<TaggedValue>;

    fn add(self, rhs: Self) -> Self::Output {
        self.arithmetic(&rhs, |_, a, b| Ok(a.wrapping_add(b)), |a, b| Ok(a + b))
    }
}

impl Sub for TaggedValue {
    type Output = Result<TaggedValue>;

    fn sub(self, rhs: Self) -> Self::Output {
        self.arithmetic(&rhs, |_, a, b| Ok(a.wrapping_sub(b)), |a, b| Ok(a - b))
    }
}

impl Mul for TaggedValue {
    type Output = Result<TaggedValue>;

    fn mul(self, rhs: Self) -> Self::Output {
        self.arithmetic(&rhs, |_, a, b| Ok(a.wrapping_mul(b)), |a, b| Ok(a * b))
    }
}

impl Div for TaggedValue {
    type Output = Result<TaggedValue>;

    fn div(self, rhs: Self) -> Self::Output {
        self.arithmetic(
            &rhs,
            |tag, a, b| a.checked_div(b).ok_or(TaggedValueError::InvalidDivisor { tag }),
            |a, b| {
                if b.is_zero() {
                    return Err(TaggedValueError::InvalidDivisor { tag: ValueTag::FF });
                }
                b.inverse()
                    .map(|inv| a * inv)
                    .ok_or(TaggedValueError::InvalidDivisor { tag: ValueTag::FF })
            },
        )
    }
}

impl BitAnd for TaggedValue {
    type Output = Result<TaggedValue>;

    fn bitand(self, rhs: Self) -> Self::Output {
        self.bitwise(&rhs, |a, b| a & b)
    }
}

impl BitOr for TaggedValue {
    type Output = Result<TaggedValue>;

    fn bitor(self, rhs: Self) -> Self::Output {
        self.bitwise(&rhs, |a, b| a | b)
    }
}

impl BitXor for TaggedValue {
    type Output = Result<TaggedValue>;

    fn bitxor(self, rhs: Self) -> Self::Output {
        self.bitwise(&rhs, |a, b| a ^ b)
    }
}

impl Shl for TaggedValue {
    type Output = Result<TaggedValue>;

    fn shl(self, rhs: Self) -> Self::Output {
        self.shift(&rhs, |a, s| a << s)
    }
}

impl Shr for TaggedValue {
    type Output = Result<TaggedValue>;

    fn shr(self, rhs: Self) -> Self::Output {
        self.shift(&rhs, |a, s| a >> s)
    }
}

impl Not for TaggedValue {
    type Output = Result<TaggedValue>;

    fn not(self) -> Self::Output {
        let tag = self.get_tag();
        if !tag.is_integer() {
            return Err(TaggedValueError::BitwiseOnField);
        }
        Ok(Self::from_integer(tag, !self.int() & tag.mask()))
    }
}

// ════════════════════════════════════════════════════════════════════════
//  Tests
// ════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use ark_ff::One;
    use bbtrace_ecc::fields::conversions::u256_to_field;
    use bbtrace_numeric::U256;
    use proptest::prelude::*;

    fn ff(value: u128) -> FF {
        FF::from(value)
    }

    fn pow2(bits: u32) -> FF {
        u256_to_field(&U256::ONE.wrapping_shl_vartime(bits))
    }

    // ── Construction ───────────────────────────────────────────────

    #[test]
    fn constructor_and_type_properties() {
        let v = TaggedValue::from_value(Uint1::new(true));
        assert_eq!(v.get_tag(), ValueTag::U1);
        assert_eq!(v.try_as::<Uint1>().unwrap().value(), 1);

        let v = TaggedValue::from(1u64 << 40);
        assert_eq!(v.get_tag(), ValueTag::U64);
        assert_eq!(v.try_as::<u64>().unwrap(), 1u64 << 40);

        let v = TaggedValue::from(1u128 << 100);
        assert_eq!(v.get_tag(), ValueTag::U128);
        assert_eq!(v.try_as::<u128>().unwrap(), 1u128 << 100);

        let v = TaggedValue::from(ff(123));
        assert_eq!(v.get_tag(), ValueTag::FF);
        assert_eq!(v.try_as::<FF>().unwrap(), ff(123));
    }

    #[test]
    fn from_tag_embeds_exact_values() {
        for tag in ValueTag::ALL {
            let v = TaggedValue::from_tag(tag, ff(1)).unwrap();
            assert_eq!(v.get_tag(), tag);
            assert_eq!(v.as_field(), ff(1));
        }
        let v = TaggedValue::from_tag(ValueTag::U16, ff(42)).unwrap();
        assert_eq!(v.try_as::<u16>().unwrap(), 42);
    }

    #[test]
    fn from_tag_out_of_bounds() {
        assert!(TaggedValue::from_tag(ValueTag::U8, ff(255)).is_ok());
        assert_eq!(
            TaggedValue::from_tag(ValueTag::U8, ff(256)),
            Err(TaggedValueError::OutOfBounds { tag: ValueTag::U8, bits: 9 })
        );
        assert!(TaggedValue::from_tag(ValueTag::U16, ff(65535)).is_ok());
        assert!(TaggedValue::from_tag(ValueTag::U16, ff(65536)).is_err());
        assert!(TaggedValue::from_tag(ValueTag::U32, ff((1 << 32) - 1)).is_ok());
        assert!(TaggedValue::from_tag(ValueTag::U32, ff(1 << 32)).is_err());
        assert!(TaggedValue::from_tag(ValueTag::U64, ff(u64::MAX as u128)).is_ok());
        assert!(TaggedValue::from_tag(ValueTag::U64, ff(u64::MAX as u128 + 1)).is_err());
        assert!(TaggedValue::from_tag(ValueTag::U128, ff(u128::MAX)).is_ok());
        assert!(TaggedValue::from_tag(ValueTag::U128, pow2(128)).is_err());
        assert!(TaggedValue::from_tag(ValueTag::U1, ff(2)).is_err());
    }

    #[test]
    fn from_tag_truncating_reduces() {
        let v = TaggedValue::from_tag_truncating(ValueTag::U1, ff(3));
        assert_eq!(v.try_as::<Uint1>().unwrap().value(), 1);
        let v = TaggedValue::from_tag_truncating(ValueTag::U1, ff(2));
        assert_eq!(v.try_as::<Uint1>().unwrap().value(), 0);
        let v = TaggedValue::from_tag_truncating(ValueTag::U8, ff(300));
        assert_eq!(v.try_as::<u8>().unwrap(), 44);
        let v = TaggedValue::from_tag_truncating(ValueTag::U16, ff(70000));
        assert_eq!(v.try_as::<u16>().unwrap(), 4464);
        let v = TaggedValue::from_tag_truncating(ValueTag::U32, pow2(33) + ff(42));
        assert_eq!(v.try_as::<u32>().unwrap(), 42);
        let v = TaggedValue::from_tag_truncating(ValueTag::U64, pow2(65) + ff(123));
        assert_eq!(v.try_as::<u64>().unwrap(), 123);
        let v = TaggedValue::from_tag_truncating(ValueTag::U128, pow2(129) + ff(456));
        assert_eq!(v.try_as::<u128>().unwrap(), 456);
        let large = -FF::one();
        let v = TaggedValue::from_tag_truncating(ValueTag::FF, large);
        assert_eq!(v.try_as::<FF>().unwrap(), large);
    }

    #[test]
    fn tag_encoding() {
        for tag in ValueTag::ALL {
            assert_eq!(ValueTag::try_from(tag as u8), Ok(tag));
        }
        assert_eq!(ValueTag::try_from(100), Err(TaggedValueError::InvalidTag(100)));
        assert_eq!(ValueTag::FF.bit_width(), 254);
    }

    // ── Arithmetic ─────────────────────────────────────────────────

    #[test]
    fn arithmetic_operations() {
        let a = TaggedValue::from(40u8);
        let b = TaggedValue::from(2u8);
        assert_eq!((a + b).unwrap(), TaggedValue::from(42u8));
        assert_eq!((a - b).unwrap(), TaggedValue::from(38u8));
        assert_eq!((a * b).unwrap(), TaggedValue::from(80u8));
        assert_eq!((a / b).unwrap(), TaggedValue::from(20u8));

        let a = TaggedValue::from(1u64 << 32);
        let b = TaggedValue::from(5u64);
        assert_eq!((a / b).unwrap(), TaggedValue::from((1u64 << 32) / 5));

        let a = TaggedValue::from(ff(100));
        let b = TaggedValue::from(ff(5));
        assert_eq!((a + b).unwrap(), TaggedValue::from(ff(105)));
        assert_eq!((a - b).unwrap(), TaggedValue::from(ff(95)));
        assert_eq!((a * b).unwrap(), TaggedValue::from(ff(500)));
        assert_eq!((a / b).unwrap(), TaggedValue::from(ff(20)));
    }

    #[test]
    fn u1_arithmetic_wraps() {
        let one = TaggedValue::from(Uint1::new(true));
        let zero = TaggedValue::from(Uint1::new(false));
        assert_eq!((one + one).unwrap(), zero);
        assert_eq!((zero - one).unwrap(), one);
        assert_eq!((one * zero).unwrap(), zero);
        assert_eq!((one / one).unwrap(), one);
    }

    #[test]
    fn boundary_overflow_and_underflow() {
        assert_eq!(
            (TaggedValue::from(255u8) + TaggedValue::from(1u8)).unwrap(),
            TaggedValue::from(0u8)
        );
        assert_eq!(
            (TaggedValue::from(u128::MAX) + TaggedValue::from(1u128)).unwrap(),
            TaggedValue::from(0u128)
        );
        assert_eq!(
            (TaggedValue::from(0u32) - TaggedValue::from(1u32)).unwrap(),
            TaggedValue::from(u32::MAX)
        );
        assert_eq!(
            (TaggedValue::from(128u8) * TaggedValue::from(128u8)).unwrap(),
            TaggedValue::from(0u8)
        );
        assert_eq!(
            (TaggedValue::from(256u16) * TaggedValue::from(256u16)).unwrap(),
            TaggedValue::from(0u16)
        );
        let p_minus_one = TaggedValue::from(-FF::one());
        assert_eq!(
            (p_minus_one + TaggedValue::from(FF::one())).unwrap(),
            TaggedValue::from(FF::zero())
        );
    }

    #[test]
    fn division_by_zero_is_invalid_divisor() {
        assert_eq!(
            TaggedValue::from(7u32) / TaggedValue::from(0u32),
            Err(TaggedValueError::InvalidDivisor { tag: ValueTag::U32 })
        );
        assert_eq!(
            TaggedValue::from(ff(7)) / TaggedValue::from(FF::zero()),
            Err(TaggedValueError::InvalidDivisor { tag: ValueTag::FF })
        );
    }

    // ── Bitwise ────────────────────────────────────────────────────

    #[test]
    fn bitwise_operations() {
        let a = TaggedValue::from(0b1010u8);
        let b = TaggedValue::from(0b1100u8);
        assert_eq!((a & b).unwrap(), TaggedValue::from(0b1000u8));
        assert_eq!((a | b).unwrap(), TaggedValue::from(0b1110u8));
        assert_eq!((a ^ b).unwrap(), TaggedValue::from(0b0110u8));
        assert_eq!(
            (!TaggedValue::from(0xFFFF_FFFF_FFFF_FFF0u64)).unwrap(),
            TaggedValue::from(0xFu64)
        );
    }

    #[test]
    fn unary_not_all_widths() {
        assert_eq!((!TaggedValue::from(Uint1::new(true))).unwrap(), TaggedValue::from(Uint1::new(false)));
        assert_eq!((!TaggedValue::from(0xAAu8)).unwrap(), TaggedValue::from(0x55u8));
        assert_eq!((!TaggedValue::from(0xAAAAu16)).unwrap(), TaggedValue::from(0x5555u16));
        assert_eq!((!TaggedValue::from(0xAAAA_AAAAu32)).unwrap(), TaggedValue::from(0x5555_5555u32));
        let input = u128::from_ne_bytes([0xAA; 16]);
        let expected = u128::from_ne_bytes([0x55; 16]);
        assert_eq!((!TaggedValue::from(input)).unwrap(), TaggedValue::from(expected));
        assert_eq!(!TaggedValue::from(ff(123)), Err(TaggedValueError::BitwiseOnField));
    }

    #[test]
    fn bitwise_on_field_fails() {
        let a = TaggedValue::from(ff(10));
        let b = TaggedValue::from(ff(5));
        assert_eq!(a & b, Err(TaggedValueError::BitwiseOnField));
        assert_eq!(a | b, Err(TaggedValueError::BitwiseOnField));
        assert_eq!(a ^ b, Err(TaggedValueError::BitwiseOnField));
        assert_eq!(a << TaggedValue::from(1u8), Err(TaggedValueError::BitwiseOnField));
    }

    // ── Shifts ─────────────────────────────────────────────────────

    #[test]
    fn shifts_accept_any_integer_amount() {
        let v = TaggedValue::from(1u32);
        assert_eq!((v << TaggedValue::from(3u8)).unwrap(), TaggedValue::from(8u32));
        assert_eq!((v << TaggedValue::from(4u16)).unwrap(), TaggedValue::from(16u32));
        assert_eq!((v << TaggedValue::from(Uint1::new(true))).unwrap(), TaggedValue::from(2u32));
        assert_eq!(
            (TaggedValue::from(0b1000_0000u8) >> TaggedValue::from(2u8)).unwrap(),
            TaggedValue::from(0b0010_0000u8)
        );
    }

    #[test]
    fn shift_past_width_is_zero() {
        assert_eq!(
            (TaggedValue::from(1u8) << TaggedValue::from(8u8)).unwrap(),
            TaggedValue::from(0u8)
        );
        assert_eq!(
            (TaggedValue::from(u128::MAX) >> TaggedValue::from(200u64)).unwrap(),
            TaggedValue::from(0u128)
        );
        assert_eq!(
            (TaggedValue::from(0xFFu8) << TaggedValue::from(4u8)).unwrap(),
            TaggedValue::from(0xF0u8)
        );
    }

    #[test]
    fn shift_by_field_amount_fails() {
        assert_eq!(
            TaggedValue::from(1u8) << TaggedValue::from(ff(1)),
            Err(TaggedValueError::UnsupportedShiftOperand { tag: ValueTag::FF })
        );
    }

    // ── Errors / comparison / display ──────────────────────────────

    #[test]
    fn mixed_tags_fail() {
        let a = TaggedValue::from(10u8);
        let b = TaggedValue::from(5u16);
        let mismatch = Err(TaggedValueError::TypeMismatch { lhs: ValueTag::U8, rhs: ValueTag::U16 });
        assert_eq!(a + b, mismatch);
        assert_eq!(a - b, mismatch);
        assert_eq!(a * b, mismatch);
        assert_eq!(a / b, mismatch);
        assert_eq!(a & b, mismatch);
        assert_eq!(a | b, mismatch);
        assert_eq!(a ^ b, mismatch);
        assert!(a.try_as::<u16>().is_err());
        assert!(a.lt(&b).is_err());
    }

    #[test]
    fn comparisons() {
        assert!(TaggedValue::from(3u16).lt(&TaggedValue::from(4u16)).unwrap());
        assert!(TaggedValue::from(4u16).lte(&TaggedValue::from(4u16)).unwrap());
        assert!(!TaggedValue::from(5u16).lte(&TaggedValue::from(4u16)).unwrap());
        assert!(TaggedValue::from(ff(1)).lt(&TaggedValue::from(-FF::one())).unwrap());
    }

    #[test]
    fn display_shows_tag_and_value() {
        assert_eq!(TaggedValue::from(42u8).to_string(), "U8(42)");
        assert_eq!(TaggedValue::from(ff(7)).to_string(), "FF(7)");
    }

    // ── Properties ─────────────────────────────────────────────────

    fn integer_tag() -> impl Strategy<Value = ValueTag> {
        prop::sample::select(ValueTag::INTEGERS.to_vec())
    }

    proptest! {
        #[test]
        fn prop_from_tag_roundtrip(tag in integer_tag(), raw in any::<u128>()) {
            let value = raw & tag.mask();
            let tagged = TaggedValue::from_tag(tag, ff(value)).unwrap();
            prop_assert_eq!(tagged.get_tag(), tag);
            prop_assert_eq!(tagged.as_field(), ff(value));
        }

        #[test]
        fn prop_truncation_law(tag in integer_tag(), hi in any::<u64>(), lo in any::<u128>()) {
            // value = hi * 2^128 + lo
            let value = FF::from(hi) * pow2(128) + ff(lo);
            let tagged = TaggedValue::from_tag_truncating(tag, value);
            prop_assert_eq!(tagged.as_field(), ff(lo & tag.mask()));
        }

        #[test]
        fn prop_mismatched_tags_fail(
            lhs in integer_tag(),
            rhs in integer_tag(),
            a in any::<u128>(),
            b in any::<u128>(),
        ) {
            prop_assume!(lhs != rhs);
            let x = TaggedValue::from_tag_truncating(lhs, ff(a));
            let y = TaggedValue::from_tag_truncating(rhs, ff(b));
            let expected = Err(TaggedValueError::TypeMismatch { lhs, rhs });
            prop_assert_eq!(x + y, expected);
            prop_assert_eq!(x - y, expected);
            prop_assert_eq!(x * y, expected);
            prop_assert_eq!(x / y, expected);
            prop_assert_eq!(x & y, expected);
            prop_assert_eq!(x | y, expected);
            prop_assert_eq!(x ^ y, expected);
        }

        #[test]
        fn prop_u32_matches_native_wrapping(a in any::<u32>(), b in any::<u32>()) {
            let (x, y) = (TaggedValue::from(a), TaggedValue::from(b));
            prop_assert_eq!((x + y).unwrap(), TaggedValue::from(a.wrapping_add(b)));
            prop_assert_eq!((x - y).unwrap(), TaggedValue::from(a.wrapping_sub(b)));
            prop_assert_eq!((x * y).unwrap(), TaggedValue::from(a.wrapping_mul(b)));
        }
    }
}
