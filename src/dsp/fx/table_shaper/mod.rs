//! Table-based waveshaper.
//!
//! The transfer curve is sampled into one of two lookup tables by a
//! [`ShaperBuilder`] running outside the audio context, then published to
//! the [`ShaperProcessor`] on the audio path through a single atomic word.
//! The builder only ever writes the table that is not published, so the
//! processor never sees a half written curve.
//!
//! ```
//! use q31_synth_dsp::dsp::fx::table_shaper::{TableShaper, TableShaperParams};
//!
//! let (mut builder, mut processor) = TableShaper::new();
//! builder.set_parameters(TableShaperParams {
//!     drive: 0.5,
//!     ..Default::default()
//! });
//! builder.regenerate_if_dirty().ok();
//!
//! let out = processor.process(1 << 28, 1 << 26, 65536);
//! assert_ne!(out, 0);
//! ```

pub mod buffer;
pub mod builder;
pub mod params;
pub mod processor;
pub mod transfer;
pub mod xy_mapper;

pub use buffer::{ShaperBlockParams, ShaperChannelState, ShaperSmoothing};
pub use builder::{Regeneration, ShaperBuilder};
pub use params::TableShaperParams;
pub use processor::{ShaperBlock, ShaperProcessor};
pub use xy_mapper::TableShaperSettings;

use alloc::boxed::Box;
use alloc::sync::Arc;
use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicU32, Ordering};

use crate::dsp::allocate_buffer;
use crate::utils::clip_i32;
use crate::Error;

/// Table segments spanning the input range.
pub const TABLE_SIZE: usize = 1024;

/// Entries per table, including the guard entry for interpolation.
pub const TABLE_LEN: usize = TABLE_SIZE + 1;

/// Table entries per unit of input.
pub const TABLE_SCALE: usize = 512;

pub const ONE_Q16: i32 = 65536;

/// Largest normalised mix, 2.0 in Q16.
pub const MAX_MIX: i32 = 131072;

const BASE_SLOPE: i64 = 256;
const SLOPE_SHIFT: u32 = 20;
const MAX_SLOPE: i64 = BASE_SLOPE + ((MAX_MIX as i64 * MAX_MIX as i64) >> SLOPE_SHIFT);
const BLEND_TARGET: i64 = (ONE_Q16 as i64) << 8;
const REQUIRED_DIFF_Q16: i64 = (BLEND_TARGET + MAX_SLOPE - 1) / MAX_SLOPE;

/// Threshold at full mix. Below zero, so every sample gets the whole wet signal.
pub const THRESHOLD_FOR_FULL_WET: i64 = -(REQUIRED_DIFF_Q16 << 15);
const THRESHOLD_RANGE: i64 = i32::MAX as i64 - THRESHOLD_FOR_FULL_WET;

/// Precision dropped by the 32-bit threshold variants.
pub const THRESHOLD_SHIFT: u32 = 8;

/// 32-bit threshold meaning "always dry".
pub const INT32_MAX_SHIFTED: i32 = i32::MAX >> THRESHOLD_SHIFT;
const THRESHOLD_RANGE_32: i64 = THRESHOLD_RANGE >> THRESHOLD_SHIFT;

/// Unity drive gain in Q26.
pub const UNITY_GAIN_Q26: i32 = 1 << 26;

/// Default peak level of the input signal, 1/32 of full scale.
pub const DEFAULT_EXPECTED_PEAK: i32 = 1 << 26;

/// Shift bringing [`DEFAULT_EXPECTED_PEAK`] up to the table domain.
pub const DEFAULT_INPUT_SCALE_SHIFT: u32 = 7;

/// Hysteresis offset at full intensity, in the scaled input domain.
pub const HYSTERESIS_OFFSET_SCALE: f32 = 320_000_000.0;

/// Wet slope when the mix is at `mix_norm_q16`.
#[inline]
pub fn compute_base_slope(mix_norm_q16: i32) -> i32 {
    (BASE_SLOPE + ((mix_norm_q16 as i64 * mix_norm_q16 as i64) >> SLOPE_SHIFT)) as i32
}

/// Amplitude above which the wet signal starts to blend in.
#[inline]
pub fn compute_threshold64(mix_norm_q16: i32) -> i64 {
    i32::MAX as i64 - ((THRESHOLD_RANGE * mix_norm_q16 as i64) >> 17)
}

/// [`compute_threshold64`] with [`THRESHOLD_SHIFT`] bits less precision.
#[inline]
pub fn compute_threshold32(mix_norm_q16: i32) -> i32 {
    (INT32_MAX_SHIFTED as i64 - ((THRESHOLD_RANGE_32 * mix_norm_q16 as i64) >> 17)) as i32
}

/// Maps a q31 mix control onto 0..=[`MAX_MIX`].
#[inline]
pub fn mix_param_to_norm_q16(mix: i32) -> i32 {
    if mix <= -(1 << 30) {
        0
    } else {
        (((mix as i64 + (1 << 30)) >> 14) as i32).min(MAX_MIX)
    }
}

/// Maps a q31 drive control onto a Q26 gain following a fifth-power curve.
/// A drive of 0 yields unity gain.
pub fn drive_to_gain_q26(drive: i32) -> i32 {
    let p = ((drive >> 1) + (1 << 29)).max(0) as i64;
    let p2 = (p * p) >> 30;
    let p4 = (p2 * p2) >> 30;
    let p5 = (p4 * p) >> 30;
    if p5 >= 1 << 30 {
        i32::MAX
    } else {
        (p5 << 1) as i32
    }
}

/// Applies a Q26 drive gain with saturation. Unity gain is exact.
#[inline]
pub fn apply_drive(input: i32, gain_q26: i32) -> i32 {
    clip_i32((input as i64 * gain_q26 as i64) >> 26)
}

/// Interpolated lookup, `input` spanning the table as an unsigned value.
#[inline]
pub(crate) fn lookup(table: &[i16], input: u32) -> i32 {
    let index = (input >> 22) as usize;
    let fraction = ((input >> 6) & 0xffff) as i64;
    let a = table[index] as i64;
    let b = table[index + 1] as i64;
    (a * (ONE_Q16 as i64 - fraction) + b * fraction) as i32
}

/// Integer values derived from one parameter set, published with its table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShaperCoefficients {
    pub blend_aggression_q8: i32,
    pub hyst_offset: i32,
    pub hyst_mix_q16: i32,
    pub drift_mult_q16: i32,
    pub drift_add_q16: i32,
    pub drift_stereo_q16: i32,
    pub sub_intensity_q16: i32,
    pub sub_ratio: i8,
    pub stride: i32,
    pub feedback_q16: i32,
    pub rotation: u32,
    pub slew_intensity_q16: i32,
}

impl Default for ShaperCoefficients {
    fn default() -> Self {
        Self::from_params(&TableShaperParams::default())
    }
}

impl ShaperCoefficients {
    pub fn from_params(params: &TableShaperParams) -> Self {
        let p = params.clamped();
        let q16 = |value: f32| (value * ONE_Q16 as f32) as i32;
        Self {
            blend_aggression_q8: p.blend_aggression_q8(),
            hyst_offset: (p.hysteresis * HYSTERESIS_OFFSET_SCALE) as i32,
            hyst_mix_q16: q16(p.hyst_mix_influence),
            drift_mult_q16: q16(p.drift_mult),
            drift_add_q16: q16(p.drift_add),
            drift_stereo_q16: q16(p.drift_stereo_offset),
            sub_intensity_q16: q16(p.sub_intensity),
            sub_ratio: p.sub_ratio,
            stride: p.stride,
            feedback_q16: q16(p.feedback),
            rotation: p.rotation as u32,
            slew_intensity_q16: q16(p.slew_intensity),
        }
    }

    /// Slope of the wet blend for a base slope from [`compute_base_slope`].
    #[inline]
    pub fn blend_slope_q8(&self, base_slope: i32) -> i32 {
        ((base_slope as i64 * self.blend_aggression_q8 as i64) >> 8) as i32
    }
}

// Layout of the published state word.
const ACTIVE_INDEX: u32 = 1 << 0;
const LINEAR: u32 = 1 << 1;
const ABSENT: u32 = 1 << 2;
const READING: [u32; 2] = [1 << 8, 1 << 9];

#[derive(Debug, Default)]
struct TableSlot {
    table: Option<Box<[i16]>>,
    coefficients: ShaperCoefficients,
}

/// Storage shared by a builder and its processor.
///
/// Bit 0 of `state` is the published table, bit 1 marks a linear curve and
/// bit 2 released storage. Bits 8 and 9 are set while the processor reads
/// table 0 or 1.
#[derive(Debug)]
pub(crate) struct SharedTables {
    state: AtomicU32,
    input_scale_shift: AtomicU32,
    slots: [UnsafeCell<TableSlot>; 2],
}

// SAFETY: a slot is written only by the builder, and only while it is
// neither published nor marked as being read; the processor reads a slot
// only after setting its reading bit for the published index. Both bits live
// in `state`, updated with compare-exchange, so the two sides never access a
// slot at the same time.
unsafe impl Sync for SharedTables {}

impl SharedTables {
    fn new() -> Self {
        Self {
            state: AtomicU32::new(LINEAR | ABSENT),
            input_scale_shift: AtomicU32::new(DEFAULT_INPUT_SCALE_SHIFT),
            slots: [
                UnsafeCell::new(TableSlot::default()),
                UnsafeCell::new(TableSlot::default()),
            ],
        }
    }

    /// Marks the published slot as being read. `None` while bypassed.
    fn acquire(&self) -> Option<usize> {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            if current & (LINEAR | ABSENT) != 0 {
                return None;
            }
            let index = (current & ACTIVE_INDEX) as usize;
            match self.state.compare_exchange_weak(
                current,
                current | READING[index],
                Ordering::Acquire,
                Ordering::Acquire,
            ) {
                Ok(_) => return Some(index),
                Err(actual) => current = actual,
            }
        }
    }

    fn release(&self, index: usize) {
        self.state.fetch_and(!READING[index], Ordering::Release);
    }

    fn is_linear(&self) -> bool {
        self.state.load(Ordering::Acquire) & (LINEAR | ABSENT) != 0
    }

    /// # Safety
    ///
    /// The caller must hold the reading bit of `index`.
    unsafe fn slot(&self, index: usize) -> &TableSlot {
        &*self.slots[index].get()
    }

    /// # Safety
    ///
    /// `index` must be neither published nor being read, or the storage
    /// must be marked absent.
    #[allow(clippy::mut_from_ref)]
    unsafe fn slot_mut(&self, index: usize) -> &mut TableSlot {
        &mut *self.slots[index].get()
    }
}

/// Entry point creating a connected builder/processor pair.
pub struct TableShaper;

impl TableShaper {
    /// Creates a shaper in bypass with no table storage allocated.
    #[allow(clippy::new_ret_no_self)]
    pub fn new() -> (ShaperBuilder, ShaperProcessor) {
        let shared = Arc::new(SharedTables::new());
        (
            ShaperBuilder::new(shared.clone()),
            ShaperProcessor::new(shared),
        )
    }
}

fn allocate_table() -> Result<Box<[i16]>, Error> {
    allocate_buffer::<i16>(TABLE_LEN)
}
