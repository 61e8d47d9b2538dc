//! Utility functions.
//!
//! Saturating q31 arithmetic shared by the oscillators, the waveshaper and the
//! delay. Samples are `i32` with 31 fractional bits, so `i32::MAX` is just
//! below +1.0 and `i32::MIN` is -1.0.

pub mod parameter_interpolator;
pub mod phase;

/// Unity in q31, saturated to the largest representable value.
pub const ONE_Q31: i32 = i32::MAX;

/// High word of the 64-bit product, `(a * b) >> 32`.
#[inline]
pub fn multiply_32x32_rshift32(a: i32, b: i32) -> i32 {
    ((a as i64 * b as i64) >> 32) as i32
}

/// High word of the 64-bit product, rounded to nearest.
#[inline]
pub fn multiply_32x32_rshift32_rounded(a: i32, b: i32) -> i32 {
    ((a as i64 * b as i64 + 0x8000_0000) >> 32) as i32
}

/// `sum + round((a * b) >> 32)`, saturating on the final addition.
#[inline]
pub fn multiply_accumulate_32x32_rshift32_rounded(sum: i32, a: i32, b: i32) -> i32 {
    sum.saturating_add(multiply_32x32_rshift32_rounded(a, b))
}

#[inline]
pub fn add_saturate(a: i32, b: i32) -> i32 {
    a.saturating_add(b)
}

/// Left shift that clips to the `i32` range instead of discarding high bits.
#[inline]
pub fn lshift_and_saturate(value: i32, shift: u32) -> i32 {
    if shift == 0 {
        return value;
    }
    if shift >= 31 {
        return match value.signum() {
            1 => i32::MAX,
            -1 => i32::MIN,
            _ => 0,
        };
    }
    let limit = i32::MAX >> shift;
    if value > limit {
        i32::MAX
    } else if value < !limit {
        i32::MIN
    } else {
        value << shift
    }
}

/// Clips `value` to a signed range of `BITS` bits.
#[inline]
pub fn signed_saturate<const BITS: u32>(value: i32) -> i32 {
    let max = (1i32 << (BITS - 1)) - 1;
    value.clamp(-max - 1, max)
}

/// Rotates the bit pattern of a sample, wrapping low bits into the top.
#[inline]
pub fn rotate_right(value: i32, bits: u32) -> i32 {
    (value as u32).rotate_right(bits) as i32
}

/// Saturating conversion of a 64-bit intermediate back to `i32`.
#[inline]
pub fn clip_i32(value: i64) -> i32 {
    value.clamp(i32::MIN as i64, i32::MAX as i64) as i32
}

/// Converts a float in -1.0..=1.0 to q31, saturating at the ends.
#[inline]
pub fn f32_to_q31(value: f32) -> i32 {
    clip_i32((value as f64 * 2_147_483_648.0) as i64)
}

#[inline]
pub fn q31_to_f32(value: i32) -> f32 {
    value as f32 / 2_147_483_648.0
}
