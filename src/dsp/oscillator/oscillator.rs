//! Block renderer for the table-driven oscillators.
//!
//! Every waveform is rendered by the same generic loop. The variant only
//! decides which [`WaveShape`] feeds it: a crude formula when aliasing is
//! cheap to accept, otherwise a band-limited table picked from the phase
//! increment. Pulse width and hard sync are layered on top of that choice.

use super::shapes::{
    CrudeSaw, CrudeSquare, CrudeTriangle, DeadZone, DeadZoneTriangle, PulseDifference, SawPulse, WaveShape,
};
use super::tables::{self, TableNumber};
use super::wavetable_oscillator::{WaveTableBank, WavetableMorph};
use super::OscillatorType;
use crate::dsp::RenderContext;
use crate::utils::parameter_interpolator::ParameterInterpolator;
use crate::utils::phase::PhaseState;
use crate::utils::{multiply_32x32_rshift32, multiply_accumulate_32x32_rshift32_rounded};
use crate::SampleRate;

/// Offset added to the retrigger phase of a synced sine, so each cycle starts in its trough.
pub const SINE_SYNC_OFFSET: u32 = 3_221_225_472;

/// Offset added to the retrigger phase of a synced saw, so each cycle starts at the ramp bottom.
pub const SAW_SYNC_OFFSET: u32 = 2_147_483_648;

/// Triangles below this increment render in closed form.
pub const TRIANGLE_TABLE_MIN_INCREMENT: u32 = 69_273_666;

/// Load at which triangles always render in closed form.
pub const TRIANGLE_CRUDE_DIRENESS: u8 = 7;

/// Saw and square tables below `cpu_direness + CRUDE_TABLE_OFFSET` render crude.
pub const CRUDE_TABLE_OFFSET: usize = 6;

/// Analog saws from this table index on may fall back to the digital saw under load.
pub const ANALOG_SAW_DEMOTION_MIN_TABLE: usize = 8;

/// Master oscillator driving hard sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSource {
    /// Master phase at the start of the block.
    pub resetter: PhaseState,

    /// Phase the slave restarts from on every master cycle.
    pub retrigger_phase: u32,
}

/// Wavetable bank and morph position for [`OscillatorType::Wavetable`].
#[derive(Debug, Clone, Copy)]
pub struct WavetableSource<'a> {
    pub bank: &'a WaveTableBank,
    /// Morph position at the first sample, spanning the whole bank.
    pub position: u32,
    /// Added to the position after every sample.
    pub position_increment: i32,
}

/// Everything a block render needs besides the phase. Built fresh per block.
#[derive(Debug, Clone, Copy)]
pub struct OscillatorRenderConfig<'a> {
    pub osc_type: OscillatorType,

    /// 0 disables pulse width modulation. For squares this is the deviation
    /// from an even duty cycle. For triangle-PW it is the share of the cycle
    /// held in the trough. Other waveforms subtract a copy shifted by it.
    pub pulse_width: u32,

    /// Gain at the start of the block, applied as `(value * amplitude) >> 32`.
    pub amplitude: i32,

    /// Amount added to the amplitude before every sample.
    pub amplitude_increment: i32,

    /// Add amplitude scaled samples into the buffer instead of overwriting it
    /// with full scale values.
    pub apply_amplitude: bool,

    pub sync: Option<SyncSource>,

    pub wavetable: Option<WavetableSource<'a>>,
}

impl<'a> OscillatorRenderConfig<'a> {
    pub fn new(osc_type: OscillatorType) -> Self {
        Self {
            osc_type,
            pulse_width: 0,
            amplitude: 0,
            amplitude_increment: 0,
            apply_amplitude: false,
            sync: None,
            wavetable: None,
        }
    }

    /// Accumulate into the output, ramping the gain by `increment` per sample.
    pub fn with_amplitude(mut self, amplitude: i32, increment: i32) -> Self {
        self.amplitude = amplitude;
        self.amplitude_increment = increment;
        self.apply_amplitude = true;
        self
    }

    pub fn with_pulse_width(mut self, pulse_width: u32) -> Self {
        self.pulse_width = pulse_width;
        self
    }

    pub fn with_sync(mut self, resetter: PhaseState, retrigger_phase: u32) -> Self {
        self.sync = Some(SyncSource {
            resetter,
            retrigger_phase,
        });
        self
    }

    pub fn with_wavetable(mut self, bank: &'a WaveTableBank, position: u32) -> Self {
        self.wavetable = Some(WavetableSource {
            bank,
            position,
            position_increment: 0,
        });
        self
    }

    /// Morphs through the bank, moving the position by `increment` per sample.
    pub fn with_wavetable_sweep(mut self, bank: &'a WaveTableBank, position: u32, increment: i32) -> Self {
        self.wavetable = Some(WavetableSource {
            bank,
            position,
            position_increment: increment,
        });
        self
    }
}

/// Oscillator owning its phase across blocks.
#[derive(Debug, Default, Clone, Copy)]
pub struct Oscillator {
    phase: PhaseState,
}

impl Oscillator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn init(&mut self) {
        self.phase = PhaseState::default();
    }

    pub fn set_frequency(&mut self, frequency_hz: f32, sample_rate: &SampleRate) {
        self.phase.set_frequency(frequency_hz, sample_rate);
    }

    pub fn phase(&self) -> PhaseState {
        self.phase
    }

    pub fn phase_mut(&mut self) -> &mut PhaseState {
        &mut self.phase
    }

    #[inline]
    pub fn render(&mut self, ctx: &RenderContext, config: &OscillatorRenderConfig, out: &mut [i32]) {
        render_oscillator(ctx, config, &mut self.phase, out);
    }
}

/// Renders one block, leaving `phase` where the next block continues.
///
/// Without sync the phase ends exactly `out.len() * increment` further on.
pub fn render_oscillator(
    ctx: &RenderContext,
    config: &OscillatorRenderConfig,
    phase: &mut PhaseState,
    out: &mut [i32],
) {
    let increment = phase.increment;
    let direness = ctx.cpu_direness as usize;
    let pulse_width = config.pulse_width;
    let block = BlockRenderer { config, phase, out };

    match config.osc_type {
        OscillatorType::Sine => block.render_with_width(tables::sine_table(), SINE_SYNC_OFFSET),

        OscillatorType::Triangle => {
            if triangle_is_crude(ctx, increment) {
                block.render_with_width(CrudeTriangle, 0)
            } else {
                block.render_with_width(tables::triangle_table(increment), 0)
            }
        }

        OscillatorType::TrianglePw => {
            let zone = DeadZone::new(pulse_width);
            let scaled_increment = zone.scaled_increment(increment);
            if triangle_is_crude(ctx, scaled_increment) {
                block.render(&DeadZoneTriangle::new(CrudeTriangle, zone), 0)
            } else {
                let table = tables::triangle_table(scaled_increment);
                block.render(&DeadZoneTriangle::new(table, zone), 0)
            }
        }

        OscillatorType::Saw => render_saw(block, increment, direness),

        OscillatorType::Square => {
            let number = square_table_number(increment, pulse_width);
            let crude = number.index < direness + CRUDE_TABLE_OFFSET;
            match (pulse_width, crude) {
                (0, false) => match tables::square_table(number.index) {
                    Some(table) => block.render(table, 0),
                    None => block.render(&CrudeSquare::new(0), 0),
                },
                (_, false) => match tables::saw_table(number.index) {
                    Some(table) => block.render(&square_pwm(table, pulse_width), 0),
                    None => block.render(&CrudeSquare::new(pulse_width), 0),
                },
                (_, true) => block.render(&CrudeSquare::new(pulse_width), 0),
            }
        }

        OscillatorType::AnalogSaw => {
            let number = tables::table_number(increment);
            if number.index >= ANALOG_SAW_DEMOTION_MIN_TABLE
                && number.index < direness + CRUDE_TABLE_OFFSET
            {
                render_saw(block, increment, direness)
            } else {
                block.render_with_width(tables::analog_saw_table(number.index), SAW_SYNC_OFFSET)
            }
        }

        OscillatorType::AnalogSquare => {
            let number = square_table_number(increment, pulse_width);
            if pulse_width == 0 {
                block.render(tables::analog_square_table(number.index), 0)
            } else {
                let table = tables::analog_saw_table(number.index);
                block.render(&square_pwm(table, pulse_width), 0)
            }
        }

        OscillatorType::Wavetable => match config.wavetable {
            Some(source) => {
                let morph = WavetableMorph::new(source.bank, source.position, source.position_increment);
                block.render_with_width(morph, 0)
            }
            None => block.silence(),
        },
    }
}

#[inline]
fn triangle_is_crude(ctx: &RenderContext, increment: u32) -> bool {
    increment < TRIANGLE_TABLE_MIN_INCREMENT || ctx.cpu_direness >= TRIANGLE_CRUDE_DIRENESS
}

/// Modulated squares have more high partials, so their table is picked as if
/// the tone were lower.
#[inline]
fn square_table_number(increment: u32, pulse_width: u32) -> TableNumber {
    if pulse_width == 0 {
        tables::table_number(increment)
    } else {
        tables::table_number((increment as u64 * 3 / 5) as u32)
    }
}

/// Band-limited pulse from two saws half a cycle plus the width apart.
#[inline]
fn square_pwm<W: WaveShape>(saw: W, pulse_width: u32) -> SawPulse<W> {
    SawPulse::new(saw, pulse_width)
}

fn render_saw(block: BlockRenderer, increment: u32, direness: usize) {
    let number = tables::table_number(increment);
    let table = if number.index < direness + CRUDE_TABLE_OFFSET {
        None
    } else {
        tables::saw_table(number.index)
    };
    match table {
        Some(table) => block.render_with_width(table, SAW_SYNC_OFFSET),
        None => block.render_with_width(CrudeSaw, SAW_SYNC_OFFSET),
    }
}

/// `2^31 / ceil(increment / 2^16)`, truncated to 16 bits of divisor. Lets the
/// sync path turn the master's overshoot into a fraction with one multiply.
#[inline]
pub fn resetter_divide_by_phase_increment(increment: u32) -> u32 {
    let divisor = ((increment as u64 + 65535) >> 16) as u16;
    if divisor == 0 {
        0
    } else {
        (1u32 << 31) / divisor as u32
    }
}

/// Blends the value computed before a sync crossing into the one computed
/// after it. `fade` is the share of the sample that already belongs to the
/// new cycle, in units of 2^-32. The window is a half sine.
#[inline]
pub fn sync_crossfade(before: i32, after: i32, fade: u32) -> i32 {
    let average = (before >> 1) + (after >> 1);
    let half_difference = (after >> 1) - (before >> 1);
    let centered = fade.wrapping_sub(1 << 31) as i32;
    let window = tables::sine_value((centered >> 1) as u32);

    average + (multiply_32x32_rshift32(half_difference, window) << 1)
}

struct BlockRenderer<'c, 'p, 'o> {
    config: &'c OscillatorRenderConfig<'c>,
    phase: &'p mut PhaseState,
    out: &'o mut [i32],
}

impl BlockRenderer<'_, '_, '_> {
    fn render_with_width<W: WaveShape>(self, shape: W, sync_offset: u32) {
        if self.config.pulse_width == 0 {
            self.render(shape, sync_offset)
        } else {
            let offset = self.config.pulse_width;
            self.render(PulseDifference::new(shape, offset), sync_offset)
        }
    }

    fn render<W: WaveShape>(self, mut shape: W, sync_offset: u32) {
        let config = self.config;
        let mut amplitude = config.amplitude;
        let mut ramp = ParameterInterpolator::new_with_increment(&mut amplitude, config.amplitude_increment);

        match config.sync.filter(|sync| sync.resetter.increment != 0) {
            None => {
                for out in self.out.iter_mut() {
                    let value = shape.value(self.phase.advance());
                    write_sample(out, value, &mut ramp, config.apply_amplitude);
                    shape.step();
                }
            }
            Some(sync) => {
                let mut resetter = sync.resetter;
                let divide = resetter_divide_by_phase_increment(resetter.increment) as u64;
                let retrigger = sync.retrigger_phase.wrapping_add(sync_offset);

                for out in self.out.iter_mut() {
                    let phase = self.phase.advance();
                    let resetter_phase = resetter.advance();

                    let value = if resetter_phase < resetter.increment {
                        let before = shape.value(phase);
                        let fade = ((((resetter_phase as u64 * divide) >> 32) << 17) & 0xffff_ffff) as u32;
                        let restarted = ((fade as u64 * self.phase.increment as u64) >> 32) as u32;
                        self.phase.phase = restarted.wrapping_add(retrigger).wrapping_add(1);
                        sync_crossfade(before, shape.value(self.phase.phase), fade)
                    } else {
                        shape.value(phase)
                    };

                    write_sample(out, value, &mut ramp, config.apply_amplitude);
                    shape.step();
                }
            }
        }
    }

    /// Wavetable without a bank: keep time, emit nothing.
    fn silence(self) {
        self.phase.advance_by(self.out.len());
        if !self.config.apply_amplitude {
            self.out.fill(0);
        }
    }
}

#[inline]
fn write_sample(out: &mut i32, value: i32, ramp: &mut ParameterInterpolator, apply_amplitude: bool) {
    if apply_amplitude {
        *out = multiply_accumulate_32x32_rshift32_rounded(*out, value, ramp.next());
    } else {
        *out = value;
    }
}
