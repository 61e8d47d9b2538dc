//! Band-limited waveform tables.
//!
//! Each waveform category owns a set of tables whose harmonic content
//! decreases as the phase increment grows, so the highest partial always
//! stays below Nyquist. The tables are synthesised additively the first time
//! they are requested and live for the rest of the program. Call
//! [`prepare_tables`] before audio starts to keep that work off the render
//! path.

use alloc::boxed::Box;
use alloc::vec;
use alloc::vec::Vec;
use core::f64::consts::PI;

#[allow(unused_imports)]
use num_traits::float::Float;
use spin::Once;

use crate::Error;

/// Number of tables per saw/square category.
pub const NUM_TABLES: usize = 20;

/// Upper increment bound (inclusive) of table index `n`. Increments above the
/// last bound select the final table.
pub const TABLE_BOUNDARIES: [u32; NUM_TABLES - 1] = [
    1_247_086,
    1_764_571,
    2_494_173,
    3_526_245,
    4_982_560,
    7_040_929,
    9_988_296,
    14_035_840,
    19_701_684,
    28_256_363,
    40_518_559,
    55_063_683,
    79_536_431,
    113_025_455,
    165_191_049,
    238_609_294,
    306_783_378,
    429_496_729,
    715_827_882,
];

/// Size magnitude (log2 of the entry count) of table index `n`.
pub const TABLE_MAGNITUDES: [u8; NUM_TABLES] = [
    13, 12, 12, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 10, 10, 10, 10, 9, 9,
];

/// First index that has a digital saw/square table. Lower indices always
/// render with the crude formulas.
pub const FIRST_DIGITAL_TABLE: usize = 6;

const DIGITAL_HARMONICS: [usize; NUM_TABLES - FIRST_DIGITAL_TABLE] =
    [215, 153, 109, 76, 53, 39, 27, 19, 13, 9, 7, 5, 3, 1];

const ANALOG_HARMONICS: [usize; NUM_TABLES] = [
    1722, 1217, 861, 609, 431, 305, 215, 153, 109, 76, 53, 39, 27, 19, 13, 9, 7, 5, 3, 1,
];

/// Table indices below this use the first analog saw recipe.
const ANALOG_SAW_SECOND_RECIPE: usize = 8;

pub const NUM_TRIANGLE_TABLES: usize = 6;

const TRIANGLE_BOUNDARIES: [u32; NUM_TRIANGLE_TABLES - 1] =
    [102_261_126, 143_165_576, 238_609_294, 429_496_729, 715_827_882];

const TRIANGLE_HARMONICS: [usize; NUM_TRIANGLE_TABLES] = [21, 15, 9, 5, 3, 1];

const TRIANGLE_MAGNITUDES: [u8; NUM_TRIANGLE_TABLES] = [7, 7, 7, 7, 6, 6];

const SINE_MAGNITUDE: u8 = 8;

/// Table selected for a phase increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableNumber {
    pub index: usize,
    pub magnitude: u8,
}

/// Maps a phase increment onto its saw/square table.
#[inline]
pub fn table_number(increment: u32) -> TableNumber {
    let index = TABLE_BOUNDARIES.partition_point(|&bound| bound < increment);
    TableNumber {
        index,
        magnitude: TABLE_MAGNITUDES[index],
    }
}

#[inline]
pub fn triangle_table_index(increment: u32) -> usize {
    TRIANGLE_BOUNDARIES.partition_point(|&bound| bound < increment)
}

/// Single-cycle lookup table of `2^magnitude` samples plus one guard entry
/// repeating the first, so interpolation never needs to wrap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaveTable {
    magnitude: u8,
    data: Box<[i16]>,
}

impl WaveTable {
    /// Builds a table from one cycle of `2^magnitude` samples.
    pub fn from_cycle(magnitude: u8, cycle: &[i16]) -> Result<Self, Error> {
        if !(1..=16).contains(&magnitude) || cycle.len() != 1 << magnitude {
            return Err(Error::InvalidTableLength { len: cycle.len() });
        }
        let mut data = Vec::with_capacity(cycle.len() + 1);
        data.extend_from_slice(cycle);
        data.push(cycle[0]);

        Ok(Self {
            magnitude,
            data: data.into_boxed_slice(),
        })
    }

    pub fn magnitude(&self) -> u8 {
        self.magnitude
    }

    /// Samples of one cycle, without the guard entry.
    pub fn samples(&self) -> &[i16] {
        &self.data[..self.data.len() - 1]
    }

    /// Linearly interpolated q31 value at `phase`.
    #[inline]
    pub fn value(&self, phase: u32) -> i32 {
        let shift = 32 - self.magnitude as u32;
        let index = (phase >> shift) as usize;
        let fraction = ((phase << self.magnitude) >> 16) as i64;
        let a = self.data[index] as i64;
        let b = self.data[index + 1] as i64;

        (a * (65536 - fraction) + b * fraction) as i32
    }

    /// Sums harmonics `1..=harmonics`, each contributing
    /// `s·sin(2πkx) + c·cos(2πkx)` for `(s, c) = partial(k)`, and normalises
    /// the peak to full scale.
    fn additive(magnitude: u8, harmonics: usize, partial: impl Fn(usize) -> (f64, f64)) -> Self {
        let len = 1usize << magnitude;
        let mut acc = vec![0.0f64; len];

        for k in 1..=harmonics {
            let (sine_amount, cosine_amount) = partial(k);
            if sine_amount == 0.0 && cosine_amount == 0.0 {
                continue;
            }
            let (step_sin, step_cos) = (2.0 * PI * k as f64 / len as f64).sin_cos();
            let (mut s, mut c) = (0.0f64, 1.0f64);
            for x in acc.iter_mut() {
                *x += sine_amount * s + cosine_amount * c;
                let next_s = s * step_cos + c * step_sin;
                c = c * step_cos - s * step_sin;
                s = next_s;
            }
        }

        let peak = acc.iter().fold(0.0f64, |m, x| m.max(x.abs()));
        let gain = if peak > 0.0 { 32767.0 / peak } else { 0.0 };
        let mut data: Vec<i16> = acc
            .iter()
            .map(|x| (x * gain).round().clamp(-32767.0, 32767.0) as i16)
            .collect();
        data.push(data[0]);

        Self {
            magnitude,
            data: data.into_boxed_slice(),
        }
    }
}

// Rising ramp that jumps from +1 to -1 at half a cycle, matching `phase as i32`.
fn saw_partial(k: usize) -> (f64, f64) {
    let sign = if k % 2 == 1 { 1.0 } else { -1.0 };
    (sign * 2.0 / (PI * k as f64), 0.0)
}

// High for the first half cycle.
fn square_partial(k: usize) -> (f64, f64) {
    if k % 2 == 1 {
        (4.0 / (PI * k as f64), 0.0)
    } else {
        (0.0, 0.0)
    }
}

// Trough at phase 0, crest at half a cycle.
fn triangle_partial(k: usize) -> (f64, f64) {
    if k % 2 == 1 {
        (0.0, -8.0 / (PI * PI * (k * k) as f64))
    } else {
        (0.0, 0.0)
    }
}

/// Applies a one-pole roll-off with corner `corner` harmonics, including its
/// phase lag, to a partial. This is what rounds the edges of the analog sets.
fn analog_partial(partial: (f64, f64), k: usize, corner: f64, poles: i32) -> (f64, f64) {
    let ratio = k as f64 / corner;
    let magnitude = (1.0 + ratio * ratio).powf(-0.5 * poles as f64);
    let lag = poles as f64 * ratio.atan();
    let (lag_sin, lag_cos) = lag.sin_cos();
    let (s, c) = partial;

    (
        magnitude * (s * lag_cos + c * lag_sin),
        magnitude * (c * lag_cos - s * lag_sin),
    )
}

#[allow(clippy::declare_interior_mutable_const)]
const UNINIT: Once<WaveTable> = Once::new();

static SINE: Once<WaveTable> = Once::new();
static TRIANGLES: [Once<WaveTable>; NUM_TRIANGLE_TABLES] = [UNINIT; NUM_TRIANGLE_TABLES];
static SAWS: [Once<WaveTable>; NUM_TABLES] = [UNINIT; NUM_TABLES];
static SQUARES: [Once<WaveTable>; NUM_TABLES] = [UNINIT; NUM_TABLES];
static ANALOG_SAWS: [Once<WaveTable>; NUM_TABLES] = [UNINIT; NUM_TABLES];
static ANALOG_SQUARES: [Once<WaveTable>; NUM_TABLES] = [UNINIT; NUM_TABLES];

pub fn sine_table() -> &'static WaveTable {
    SINE.call_once(|| WaveTable::additive(SINE_MAGNITUDE, 1, |_| (1.0, 0.0)))
}

/// Full scale sine lookup, one cycle over the `u32` range.
#[inline]
pub fn sine_value(phase: u32) -> i32 {
    sine_table().value(phase)
}

pub fn triangle_table(increment: u32) -> &'static WaveTable {
    let index = triangle_table_index(increment);
    TRIANGLES[index].call_once(|| {
        WaveTable::additive(
            TRIANGLE_MAGNITUDES[index],
            TRIANGLE_HARMONICS[index],
            triangle_partial,
        )
    })
}

/// Digital saw table, absent below [`FIRST_DIGITAL_TABLE`].
pub fn saw_table(index: usize) -> Option<&'static WaveTable> {
    let harmonics = *DIGITAL_HARMONICS.get(index.checked_sub(FIRST_DIGITAL_TABLE)?)?;
    Some(SAWS[index].call_once(|| {
        WaveTable::additive(TABLE_MAGNITUDES[index], harmonics, saw_partial)
    }))
}

/// Digital square table, absent below [`FIRST_DIGITAL_TABLE`].
pub fn square_table(index: usize) -> Option<&'static WaveTable> {
    let harmonics = *DIGITAL_HARMONICS.get(index.checked_sub(FIRST_DIGITAL_TABLE)?)?;
    Some(SQUARES[index].call_once(|| {
        WaveTable::additive(TABLE_MAGNITUDES[index], harmonics, square_partial)
    }))
}

pub fn analog_saw_table(index: usize) -> &'static WaveTable {
    let index = index.min(NUM_TABLES - 1);
    ANALOG_SAWS[index].call_once(|| {
        let harmonics = ANALOG_HARMONICS[index];
        // The two recipes meet at index 8, where the second, brighter set
        // takes over with a gentler corner and no extra pole.
        let (corner, poles) = if index < ANALOG_SAW_SECOND_RECIPE {
            (harmonics as f64 * 0.25, 2)
        } else {
            (harmonics as f64 * 0.6, 1)
        };
        WaveTable::additive(TABLE_MAGNITUDES[index], harmonics, |k| {
            analog_partial(saw_partial(k), k, corner.max(1.0), poles)
        })
    })
}

pub fn analog_square_table(index: usize) -> &'static WaveTable {
    let index = index.min(NUM_TABLES - 1);
    ANALOG_SQUARES[index].call_once(|| {
        let harmonics = ANALOG_HARMONICS[index];
        let corner = (harmonics as f64 / 3.0).max(1.0);
        WaveTable::additive(TABLE_MAGNITUDES[index], harmonics, |k| {
            analog_partial(square_partial(k), k, corner, 1)
        })
    })
}

/// Builds every static table. Meant to run once at start-up, outside the
/// audio context.
pub fn prepare_tables() {
    sine_table();
    for bound in TRIANGLE_BOUNDARIES {
        triangle_table(bound);
    }
    triangle_table(u32::MAX);
    for index in 0..NUM_TABLES {
        saw_table(index);
        square_table(index);
        analog_saw_table(index);
        analog_square_table(index);
    }
    log::debug!("oscillator tables prepared");
}
