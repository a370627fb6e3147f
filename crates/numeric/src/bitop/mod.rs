// Bit manipulation utilities.
//
// Trace sizes are rounded to powers of two ("dyadic" sizes) throughout the
// builder; this keeps that arithmetic in one place.

/// Round up to the next power of two. `0` and `1` both map to `1`.
#[inline]
pub fn round_up_power_2(val: usize) -> usize {
    val.max(1).next_power_of_two()
}
