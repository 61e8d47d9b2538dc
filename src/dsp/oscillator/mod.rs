//! Oscillators rendering q31 blocks from a 32-bit phase accumulator.

#[allow(clippy::module_inception)]
pub mod oscillator;
pub mod shapes;
pub mod tables;
pub mod wavetable_oscillator;

pub use oscillator::{render_oscillator, Oscillator, OscillatorRenderConfig, SyncSource};

use crate::params::{ParamReader, ParamWriter, PersistentParams};

/// Waveform family rendered by an oscillator.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum OscillatorType {
    #[default]
    Sine,
    Triangle,
    /// Triangle with an adjustable dead zone instead of phase-offset PWM.
    TrianglePw,
    Saw,
    Square,
    AnalogSaw,
    AnalogSquare,
    Wavetable,
}

impl OscillatorType {
    pub const ALL: [OscillatorType; 8] = [
        OscillatorType::Sine,
        OscillatorType::Triangle,
        OscillatorType::TrianglePw,
        OscillatorType::Saw,
        OscillatorType::Square,
        OscillatorType::AnalogSaw,
        OscillatorType::AnalogSquare,
        OscillatorType::Wavetable,
    ];

    pub fn from_index(index: i32) -> Option<Self> {
        usize::try_from(index)
            .ok()
            .and_then(|index| Self::ALL.get(index).copied())
    }

    pub fn index(self) -> i32 {
        self as i32
    }
}

/// Stored oscillator setup. Frequency and level come from the voice at
/// render time and are not part of it.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct OscillatorSettings {
    pub osc_type: OscillatorType,

    /// Phase every note starts from, or free running when `None`.
    pub retrigger_phase: Option<u32>,

    /// Slave this oscillator to the previous one in the voice.
    pub oscillator_sync: bool,
}

impl PersistentParams for OscillatorSettings {
    fn write_params<W: ParamWriter>(&self, writer: &mut W) {
        writer.write_attribute("type", self.osc_type.index());
        if let Some(phase) = self.retrigger_phase {
            writer.write_attribute("retrigPhase", phase as i32);
        }
        if self.oscillator_sync {
            writer.write_attribute("oscillatorSync", 1);
        }
    }

    fn read_param<R: ParamReader>(&mut self, tag: &str, reader: &mut R) -> bool {
        match tag {
            "type" => {
                self.osc_type = OscillatorType::from_index(reader.read_value()).unwrap_or_default();
            }
            "retrigPhase" => {
                let value = reader.read_value();
                self.retrigger_phase = (value != -1).then_some(value as u32);
            }
            "oscillatorSync" => self.oscillator_sync = reader.read_value() != 0,
            _ => return false,
        }
        true
    }
}
