//! Per-sample waveform evaluators.
//!
//! A shape maps a phase onto a q31 value. The block renderer is generic over
//! [`WaveShape`], so pulse width and dead-zone handling wrap any shape
//! without a branch in the sample loop.

use super::tables::WaveTable;

pub trait WaveShape {
    fn value(&self, phase: u32) -> i32;

    /// Called after every rendered sample. Shapes that morph over a block
    /// move on here.
    #[inline]
    fn step(&mut self) {}
}

impl<T: WaveShape + ?Sized> WaveShape for &T {
    #[inline]
    fn value(&self, phase: u32) -> i32 {
        (**self).value(phase)
    }
}

impl WaveShape for WaveTable {
    #[inline]
    fn value(&self, phase: u32) -> i32 {
        WaveTable::value(self, phase)
    }
}

/// Aliasing saw, the phase reinterpreted as a signed sample.
#[derive(Debug, Default, Clone, Copy)]
pub struct CrudeSaw;

impl WaveShape for CrudeSaw {
    #[inline]
    fn value(&self, phase: u32) -> i32 {
        phase as i32
    }
}

/// Aliasing pulse, high while the phase is below the threshold.
#[derive(Debug, Clone, Copy)]
pub struct CrudeSquare {
    threshold: u32,
}

impl CrudeSquare {
    /// `pulse_width` is the deviation from an even duty cycle, so 0 gives a square.
    pub fn new(pulse_width: u32) -> Self {
        Self {
            threshold: pulse_width.wrapping_add(1 << 31),
        }
    }
}

impl WaveShape for CrudeSquare {
    #[inline]
    fn value(&self, phase: u32) -> i32 {
        if phase < self.threshold {
            i32::MAX
        } else {
            i32::MIN
        }
    }
}

/// Closed-form triangle with its trough at phase 0.
#[derive(Debug, Default, Clone, Copy)]
pub struct CrudeTriangle;

impl WaveShape for CrudeTriangle {
    #[inline]
    fn value(&self, phase: u32) -> i32 {
        let folded = if phase & 0x8000_0000 == 0 {
            phase
        } else {
            !phase
        };
        ((folded << 1) ^ 0x8000_0000) as i32
    }
}

/// Difference of a shape and a copy of itself shifted by `offset`.
///
/// Subtracting two band-limited waveforms keeps the result band-limited, so
/// the width can move without adding aliasing.
#[derive(Debug, Clone, Copy)]
pub struct PulseDifference<W> {
    shape: W,
    offset: u32,
}

impl<W: WaveShape> PulseDifference<W> {
    pub fn new(shape: W, offset: u32) -> Self {
        Self { shape, offset }
    }
}

impl<W: WaveShape> WaveShape for PulseDifference<W> {
    #[inline]
    fn value(&self, phase: u32) -> i32 {
        (self.shape.value(phase) >> 1) - (self.shape.value(phase.wrapping_add(self.offset)) >> 1)
    }

    #[inline]
    fn step(&mut self) {
        self.shape.step();
    }
}

/// Pulse built from two reads of a saw, high while the phase is below
/// `pulse_width + 2^31`, the way [`CrudeSquare`] is.
///
/// The difference of two saws has no DC. Adding `pulse_width` back restores
/// the mean of a full scale pulse with that duty cycle.
#[derive(Debug, Clone, Copy)]
pub struct SawPulse<W> {
    saw: W,
    offset: u32,
    dc: i64,
}

impl<W: WaveShape> SawPulse<W> {
    pub fn new(saw: W, pulse_width: u32) -> Self {
        Self {
            saw,
            offset: pulse_width.wrapping_add(1 << 31),
            dc: pulse_width as i32 as i64,
        }
    }
}

impl<W: WaveShape> WaveShape for SawPulse<W> {
    #[inline]
    fn value(&self, phase: u32) -> i32 {
        let a = self.saw.value(phase) as i64;
        let b = self.saw.value(phase.wrapping_add(self.offset)) as i64;
        (a - b + self.dc).clamp(i32::MIN as i64, i32::MAX as i64) as i32
    }

    #[inline]
    fn step(&mut self) {
        self.saw.step();
    }
}

/// Triangle squeezed into the first part of the cycle, holding its trough
/// for the remainder. The squeeze factor follows the width continuously so
/// the peak level never drops.
#[derive(Debug, Clone, Copy)]
pub struct DeadZoneTriangle<W> {
    shape: W,
    active_span: u32,
    scaler_q16: u64,
}

impl<W: WaveShape> DeadZoneTriangle<W> {
    pub fn new(shape: W, zone: DeadZone) -> Self {
        Self {
            shape,
            active_span: zone.active_span,
            scaler_q16: zone.scaler_q16,
        }
    }
}

impl<W: WaveShape> WaveShape for DeadZoneTriangle<W> {
    #[inline]
    fn value(&self, phase: u32) -> i32 {
        if phase >= self.active_span {
            return i32::MIN;
        }
        let scaled = ((phase as u64 * self.scaler_q16) >> 16).min(u32::MAX as u64) as u32;
        self.shape.value(scaled)
    }

    #[inline]
    fn step(&mut self) {
        self.shape.step();
    }
}

/// Geometry of the dead zone for a pulse width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeadZone {
    active_span: u32,
    scaler_q16: u64,
}

impl DeadZone {
    /// `pulse_width` is the fraction of the cycle spent in the trough.
    pub fn new(pulse_width: u32) -> Self {
        let active_span = u32::MAX - pulse_width;
        let scaler_q16 = (1u64 << 48) / (active_span as u64 + 1);
        Self {
            active_span,
            scaler_q16,
        }
    }

    /// Phase increment of the squeezed triangle, used to pick its table.
    pub fn scaled_increment(&self, increment: u32) -> u32 {
        ((increment as u64 * self.scaler_q16) >> 16).min(u32::MAX as u64) as u32
    }
}
