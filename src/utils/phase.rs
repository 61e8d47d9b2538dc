//! Phase accumulator.
//!
//! A full waveform cycle spans the whole `u32` range. Overflow is the wrap
//! mechanism, so every advance uses wrapping arithmetic.

use crate::SampleRate;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PhaseState {
    pub phase: u32,
    pub increment: u32,
}

impl PhaseState {
    pub fn new(phase: u32, increment: u32) -> Self {
        Self { phase, increment }
    }

    /// Creates a state at phase 0 running at `frequency_hz`.
    pub fn with_frequency(frequency_hz: f32, sample_rate: &SampleRate) -> Self {
        Self {
            phase: 0,
            increment: frequency_to_increment(frequency_hz, sample_rate),
        }
    }

    pub fn set_frequency(&mut self, frequency_hz: f32, sample_rate: &SampleRate) {
        self.increment = frequency_to_increment(frequency_hz, sample_rate);
    }

    /// Advances by one sample and returns the new phase.
    #[inline]
    pub fn advance(&mut self) -> u32 {
        self.phase = self.phase.wrapping_add(self.increment);
        self.phase
    }

    /// Advances by `samples` in one step, equivalent to as many calls to [`Self::advance`].
    #[inline]
    pub fn advance_by(&mut self, samples: usize) -> u32 {
        self.phase = self
            .phase
            .wrapping_add(self.increment.wrapping_mul(samples as u32));
        self.phase
    }
}

/// Converts a frequency into a per-sample phase increment, rounded to nearest.
///
/// Negative frequencies yield 0. Frequencies at or above the sample rate
/// saturate to `u32::MAX`.
pub fn frequency_to_increment(frequency_hz: f32, sample_rate: &SampleRate) -> u32 {
    let increment = frequency_hz as f64 * sample_rate.increment_per_hz + 0.5;
    if increment <= 0.0 {
        0
    } else if increment >= u32::MAX as f64 {
        u32::MAX
    } else {
        increment as u32
    }
}
