//! Audio side of the waveshaper.

use alloc::sync::Arc;
use core::sync::atomic::Ordering;

use super::{
    apply_drive, compute_base_slope, compute_threshold64, lookup, ShaperCoefficients,
    SharedTables, ONE_Q16, THRESHOLD_SHIFT,
};
use crate::utils::{add_saturate, lshift_and_saturate, multiply_32x32_rshift32};

/// Processes samples against the published table. Never allocates or blocks.
#[derive(Debug)]
pub struct ShaperProcessor {
    shared: Arc<SharedTables>,
}

impl ShaperProcessor {
    pub(crate) fn new(shared: Arc<SharedTables>) -> Self {
        Self { shared }
    }

    /// True while the shaper bypasses, either for a linear curve or released storage.
    pub fn is_linear(&self) -> bool {
        self.shared.is_linear()
    }

    pub fn input_scale_shift(&self) -> u32 {
        self.shared.input_scale_shift.load(Ordering::Relaxed)
    }

    /// Shapes one sample. `drive_gain_q26` comes from
    /// [`drive_to_gain_q26`](super::drive_to_gain_q26) and `mix_norm_q16` from
    /// [`mix_param_to_norm_q16`](super::mix_param_to_norm_q16).
    ///
    /// With a linear curve or a zero mix the driven input is returned as is.
    pub fn process(&mut self, input: i32, drive_gain_q26: i32, mix_norm_q16: i32) -> i32 {
        let driven = apply_drive(input, drive_gain_q26);
        let block = self.begin_block();
        if block.is_linear() {
            return driven;
        }
        let base_slope = compute_base_slope(mix_norm_q16);
        let slope = block.blend_slope_q8(base_slope);
        let threshold = compute_threshold64(mix_norm_q16);
        block.process_hoisted(driven, driven, slope, threshold, 0, None)
    }

    /// Pins the published table for the duration of a block.
    ///
    /// The builder will not overwrite the pinned table until the returned
    /// guard is dropped.
    pub fn begin_block(&mut self) -> ShaperBlock<'_> {
        let index = self.shared.acquire();
        let coefficients = match index {
            // SAFETY: `acquire` set the reading bit of `index`.
            Some(index) => unsafe { self.shared.slot(index) }.coefficients,
            None => ShaperCoefficients::default(),
        };
        ShaperBlock {
            shared: &self.shared,
            index,
            coefficients,
            input_scale_shift: self.shared.input_scale_shift.load(Ordering::Relaxed),
        }
    }
}

/// Read access to one table for the length of a block.
#[derive(Debug)]
pub struct ShaperBlock<'a> {
    shared: &'a SharedTables,
    index: Option<usize>,
    coefficients: ShaperCoefficients,
    input_scale_shift: u32,
}

impl Drop for ShaperBlock<'_> {
    fn drop(&mut self) {
        if let Some(index) = self.index {
            self.shared.release(index);
        }
    }
}

#[inline]
fn abs_clamped(value: i32) -> i32 {
    value.max(-i32::MAX).abs()
}

impl ShaperBlock<'_> {
    /// True when no table was pinned and every call passes the dry signal.
    pub fn is_linear(&self) -> bool {
        self.index.is_none()
    }

    /// Coefficients published together with the pinned table.
    pub fn coefficients(&self) -> &ShaperCoefficients {
        &self.coefficients
    }

    pub fn input_scale_shift(&self) -> u32 {
        self.input_scale_shift
    }

    /// Brings a driven sample up to the table domain.
    #[inline]
    pub fn scale_input(&self, driven: i32) -> i32 {
        lshift_and_saturate(driven, self.input_scale_shift)
    }

    #[inline]
    pub fn unscale(&self, scaled: i32) -> i32 {
        scaled >> self.input_scale_shift
    }

    #[inline]
    pub fn blend_slope_q8(&self, base_slope: i32) -> i32 {
        self.coefficients.blend_slope_q8(base_slope)
    }

    #[inline]
    fn table(&self) -> Option<&[i16]> {
        let index = self.index?;
        // SAFETY: the reading bit of `index` stays set until `self` is dropped.
        unsafe { self.shared.slot(index) }.table.as_deref()
    }

    /// Wet input shifted against the direction of travel, updating `prev`.
    #[inline]
    fn offset_wet(scaled_wet: i32, scaled_dry: i32, hyst_offset: i32, prev: Option<&mut i32>) -> i32 {
        match prev {
            Some(prev) => {
                let rising = scaled_dry.wrapping_sub(*prev) >= 0;
                *prev = scaled_dry;
                let offset = if rising { hyst_offset } else { -hyst_offset };
                add_saturate(scaled_wet, offset)
            }
            None => scaled_wet,
        }
    }

    /// Mix of the scaled dry signal and the table value, still scaled.
    #[inline]
    fn blend(table: &[i16], scaled_wet: i32, scaled_dry: i32, blend_q16: i32) -> i32 {
        let shaped = lookup(table, (scaled_wet as u32).wrapping_add(0x8000_0000));
        let blend_q30 = blend_q16 << 14;
        let dry = multiply_32x32_rshift32(scaled_dry, (ONE_Q16 << 14) - blend_q30) << 2;
        let wet = multiply_32x32_rshift32(shaped, blend_q30) << 2;
        dry.saturating_add(wet)
    }

    /// Shapes with separate wet and dry inputs, both driven but unscaled.
    ///
    /// The blend amount follows the dry level against a full precision
    /// threshold. `prev` enables hysteresis and tracks the previous scaled
    /// dry value.
    pub fn process_hoisted(
        &self,
        wet: i32,
        dry: i32,
        slope_q8: i32,
        threshold64: i64,
        hyst_offset: i32,
        prev: Option<&mut i32>,
    ) -> i32 {
        let Some(table) = self.table() else {
            return dry;
        };
        let scaled_wet = self.scale_input(wet);
        let scaled_dry = self.scale_input(dry);

        let diff = abs_clamped(scaled_dry) as i64 - threshold64;
        if diff <= 0 {
            if let Some(prev) = prev {
                *prev = scaled_dry;
            }
            return dry;
        }
        let diff = diff.min(i32::MAX as i64);
        let blend_q16 = (((diff >> 15) * slope_q8 as i64) >> 8).min(ONE_Q16 as i64) as i32;

        let scaled_wet = Self::offset_wet(scaled_wet, scaled_dry, hyst_offset, prev);
        self.unscale(Self::blend(table, scaled_wet, scaled_dry, blend_q16))
    }

    /// Shapes a driven sample with the reduced precision threshold from
    /// [`compute_threshold32`](super::compute_threshold32).
    pub fn process_fast(&self, driven: i32, slope_q8: i32, threshold32: i32) -> i32 {
        let Some(table) = self.table() else {
            return driven;
        };
        let scaled = self.scale_input(driven);
        match Self::blend_q16_32(scaled, slope_q8, threshold32) {
            Some(blend_q16) => self.unscale(Self::blend(table, scaled, scaled, blend_q16)),
            None => driven,
        }
    }

    /// Shapes inputs already in the table domain and returns a scaled result.
    pub fn process_pre_scaled32(
        &self,
        scaled_wet: i32,
        scaled_dry: i32,
        slope_q8: i32,
        threshold32: i32,
        hyst_offset: i32,
        prev: Option<&mut i32>,
    ) -> i32 {
        let Some(table) = self.table() else {
            return scaled_dry;
        };
        match Self::blend_q16_32(scaled_dry, slope_q8, threshold32) {
            Some(blend_q16) => {
                let scaled_wet = Self::offset_wet(scaled_wet, scaled_dry, hyst_offset, prev);
                Self::blend(table, scaled_wet, scaled_dry, blend_q16)
            }
            None => {
                if let Some(prev) = prev {
                    *prev = scaled_dry;
                }
                scaled_dry
            }
        }
    }

    #[inline]
    fn blend_q16_32(scaled_dry: i32, slope_q8: i32, threshold32: i32) -> Option<i32> {
        let diff = (abs_clamped(scaled_dry) >> THRESHOLD_SHIFT) - threshold32;
        if diff <= 0 {
            return None;
        }
        let diff_q16 = (diff >> (15 - THRESHOLD_SHIFT)) as i64;
        Some(((diff_q16 * slope_q8 as i64) >> 8).min(ONE_Q16 as i64) as i32)
    }
}
