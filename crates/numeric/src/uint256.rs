// 256-bit unsigned integer.
//
// Wraps `crypto_bigint::U256`. Limbs are little-endian (data[0] is least
// significant), which is also crypto-bigint's internal layout, so limb arrays
// coming out of arkworks `BigInt`s can be moved across without reordering.

use crypto_bigint::Uint;

/// 256-bit unsigned integer, backed by `crypto_bigint::U256`.
pub type U256 = Uint<4>;

/// Convenience methods used by the coordinate and scalar decompositions.
pub trait U256Ext: Sized {
    /// Position of the most significant set bit (0-indexed). Returns 0 for zero.
    fn get_msb(&self) -> u32;

    /// Number of significant bits. Returns 0 for zero.
    fn bit_length(&self) -> u32;

    /// Extract a single bit.
    fn get_bit(&self, index: u32) -> bool;

    /// Extract the bit range `[start, end)` as a u64. The range must fit in 64 bits.
    fn slice(&self, start: u32, end: u32) -> u64;

    /// Extract the bit range `[start, end)` as a U256, for ranges wider than a limb.
    fn slice_wide(&self, start: u32, end: u32) -> Self;

    /// Construct from 4 x u64 limbs in little-endian limb order.
    fn from_limbs(limbs: [u64; 4]) -> Self;

    /// Raw u64 limbs in little-endian limb order.
    fn limbs(&self) -> [u64; 4];

    /// Value of the low 128 bits.
    fn low_u128(&self) -> u128;
}

impl U256Ext for U256 {
    fn get_msb(&self) -> u32 {
        self.bit_length().saturating_sub(1)
    }

    fn bit_length(&self) -> u32 {
        self.bits_vartime()
    }

    fn get_bit(&self, index: u32) -> bool {
        index < 256 && self.bit_vartime(index)
    }

    fn slice(&self, start: u32, end: u32) -> u64 {
        assert!(end > start, "end must be greater than start");
        assert!(end - start <= 64, "slice range must fit in u64");
        self.slice_wide(start, end).as_words()[0]
    }

    fn slice_wide(&self, start: u32, end: u32) -> Self {
        assert!(end > start && end <= 256, "invalid slice range [{start}, {end})");
        let width = end - start;
        let shifted = self.wrapping_shr_vartime(start);
        if width == 256 {
            return shifted;
        }
        let mask = U256::ONE.wrapping_shl_vartime(width).wrapping_sub(&U256::ONE);
        shifted.bitand(&mask)
    }

    fn from_limbs(limbs: [u64; 4]) -> Self {
        U256::from_words(limbs)
    }

    fn limbs(&self) -> [u64; 4] {
        *self.as_words()
    }

    fn low_u128(&self) -> u128 {
        let words = self.as_words();
        (words[0] as u128) | ((words[1] as u128) << 64)
    }
}
