#![doc = include_str!("../README.md")]
#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod dsp;
pub mod error;
pub mod params;
pub mod utils;

pub use error::Error;

/// Sample rate context for converting frequencies into phase increments.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleRate {
    /// Sample rate in Hz
    pub sample_rate_hz: f32,
    /// Phase increment of a 1 Hz tone, `2^32 / sample_rate_hz`
    pub increment_per_hz: f64,
}

impl SampleRate {
    /// Create a new sample rate context.
    pub fn new(sample_rate_hz: f32) -> Self {
        let increment_per_hz = 4_294_967_296.0 / sample_rate_hz as f64;
        Self {
            sample_rate_hz,
            increment_per_hz,
        }
    }
}

impl Default for SampleRate {
    fn default() -> Self {
        Self::new(dsp::SAMPLE_RATE as f32)
    }
}
