//! Two-knob control surface for the waveshaper.
//!
//! X sets the drive. Y sweeps through combinations of the basis functions,
//! each weight following a gated triangle whose rate is a different power of
//! the golden ratio, so the combinations never repeat exactly. A third
//! control, the gamma phase, shifts every triangle and unlocks the extras.

#[allow(unused_imports)]
use num_traits::float::Float;

use super::params::TableShaperParams;
use crate::dsp::oscillator::OscillatorType;
use crate::params::{read_scaled, write_scaled, ParamReader, ParamWriter, PersistentParams};

/// Powers of the golden ratio.
pub mod phi {
    pub const PHI_N100: f32 = 0.618_034;
    pub const PHI_N050: f32 = 0.786_151_3;
    pub const PHI_033: f32 = 1.174_662_7;
    pub const PHI_050: f32 = 1.272_019_6;
    pub const PHI_067: f32 = 1.387_187_2;
    pub const PHI_075: f32 = 1.435_295_8;
    pub const PHI_100: f32 = 1.618_034;
    pub const PHI_125: f32 = 1.825_741_9;
    pub const PHI_150: f32 = 2.058_171;
    pub const PHI_175: f32 = 2.319_717_1;
    pub const PHI_200: f32 = 2.618_034;
    pub const PHI_225: f32 = 2.960_311;
    pub const PHI_250: f32 = 3.330_207_7;
    pub const PHI_275: f32 = 3.751_556_2;
    pub const PHI_350: f32 = 5.388_415_6;
    pub const PHI_400: f32 = 6.854_102;
}

pub const SHAPE_X_MAX: u8 = 127;
pub const SHAPE_Y_MAX: u16 = 1023;

const PHASE_WIDTH: f32 = 0.5;
const ACCEL_FACTOR: f32 = 3.0;
const ZONE_BLEND_START: f32 = 768.0 / 1023.0;
const ZONE_BLEND_END: f32 = 896.0 / 1023.0;

/// Fractional part of `phase`, in 0..1.
pub fn wrap_phase(phase: f64) -> f32 {
    (phase - phase.floor()) as f32
}

/// Triangle over the first `duty` of the cycle, zero for the rest.
///
/// Rises from 0 to 1 over the first half of the active part and falls back
/// over the second half. `phase` wraps into 0..1 first.
pub fn triangle_simple_unipolar(phase: f32, duty: f32) -> f32 {
    let phase = wrap_phase(phase as f64);
    if duty <= 0.0 || phase >= duty {
        return 0.0;
    }
    1.0 - (2.0 * phase / duty - 1.0).abs()
}

/// How rich in upper harmonics an oscillator is. Steers the lowpass extra.
pub fn osc_type_to_harmonic_weight(osc_type: OscillatorType) -> f32 {
    match osc_type {
        OscillatorType::Sine => 0.0,
        OscillatorType::Triangle => 0.3,
        OscillatorType::Saw => 0.5,
        OscillatorType::Square | OscillatorType::AnalogSquare => 1.0,
        _ => 0.5,
    }
}

/// One gated triangle of the Y sweep.
#[derive(Debug, Clone, Copy)]
struct PhiTriangle {
    frequency: f32,
    duty: f32,
    offset: f32,
    bipolar: bool,
}

const EXTRAS_BANK: [PhiTriangle; 4] = [
    // Subharmonic ratio.
    PhiTriangle { frequency: phi::PHI_050, duty: 1.0, offset: 0.0, bipolar: false },
    // Stride.
    PhiTriangle { frequency: phi::PHI_067, duty: 1.0, offset: 0.25, bipolar: false },
    // Feedback.
    PhiTriangle { frequency: phi::PHI_075, duty: 1.0, offset: 0.5, bipolar: false },
    // Rotation.
    PhiTriangle { frequency: phi::PHI_N050, duty: 1.0, offset: 0.75, bipolar: false },
];

#[derive(Debug, Clone, Copy)]
struct Sweep {
    y_norm: f32,
    freq_mult: f32,
    period_scale: f32,
    gamma_phase: f64,
}

impl Sweep {
    fn new(y: u16, gamma_phase: f32, period_scale: f32) -> Self {
        let y_norm = y.min(SHAPE_Y_MAX) as f32 / SHAPE_Y_MAX as f32;
        Self {
            y_norm,
            freq_mult: 1.0 + y_norm * y_norm * ACCEL_FACTOR,
            period_scale,
            gamma_phase: gamma_phase as f64,
        }
    }

    fn base(&self, frequency: f32) -> f32 {
        (self.y_norm as f64 * frequency as f64 * self.freq_mult as f64 * self.period_scale as f64)
            as f32
    }

    fn phase_offset(&self, frequency: f32) -> f32 {
        wrap_phase(self.gamma_phase * frequency as f64)
    }

    /// Triangle at `frequency` shifted by the gamma phase.
    fn triangle(&self, frequency: f32, duty: f32, offset: f32) -> f32 {
        let phase = self.base(frequency) + self.phase_offset(frequency) + offset;
        triangle_simple_unipolar(wrap_phase(phase as f64), duty)
    }

    fn eval(&self, t: &PhiTriangle, enable: f32) -> f32 {
        let tri = self.triangle(t.frequency, t.duty, t.offset);
        enable * if t.bipolar { tri * 2.0 - 1.0 } else { tri }
    }

    fn in_blend_zone(&self) -> bool {
        (ZONE_BLEND_START..ZONE_BLEND_END).contains(&self.y_norm)
    }
}

fn sub_ratio_from_triangle(tri: f32) -> i8 {
    ((tri * 5.0) as i8 + 2).clamp(2, 6)
}

fn stride_from_triangle(tri: f32) -> i32 {
    (64 + ((tri - 0.5) * 128.0) as i32).clamp(1, 128)
}

fn feedback_from_triangle(tri: f32) -> f32 {
    tri * 0.8
}

fn rotation_from_triangle(tri: f32) -> i8 {
    (tri * 31.0) as i8
}

/// Inflator with soft clipping, symmetric, expansion following the drive.
fn apply_blend_zone(p: &mut TableShaperParams) {
    p.inflator_weight = 1.0;
    p.poly_weight = 0.5;
    p.hard_knee_weight = 0.0;
    p.cheby_weight = 0.0;
    p.sine_fold_weight = 0.0;
    p.rectifier_weight = 0.0;
    p.pre_expand_amount = p.drive;
    p.asymmetry = 0.5;
}

/// Curve parameters for an X/Y position without any phase offset.
pub fn derive_parameters(x: u8, y: u16) -> TableShaperParams {
    let s = Sweep::new(y, 0.0, 1.0);
    let y_norm = s.y_norm;
    let tri = |frequency: f32, offset: f32| {
        triangle_simple_unipolar(y_norm * frequency * s.freq_mult + offset, PHASE_WIDTH)
    };

    let mut p = TableShaperParams {
        drive: x.min(SHAPE_X_MAX) as f32 / SHAPE_X_MAX as f32,
        inflator_weight: tri(phi::PHI_225, 0.0),
        poly_weight: tri(phi::PHI_200, 0.167),
        hard_knee_weight: tri(phi::PHI_175, 0.333),
        cheby_weight: tri(phi::PHI_250, 0.5),
        sine_fold_weight: tri(phi::PHI_150, 0.667),
        rectifier_weight: tri(phi::PHI_125, 0.833),
        threshold: tri(phi::PHI_275, 0.25),
        ..Default::default()
    };

    let asym_freq_mult = 1.0 + y_norm * y_norm * (ACCEL_FACTOR * 0.5);
    p.asymmetry =
        0.3 + triangle_simple_unipolar(y_norm * phi::PHI_100 * asym_freq_mult, PHASE_WIDTH) * 0.4;
    p.pre_expand_amount = p.drive * triangle_simple_unipolar(y_norm * 2.0, 1.0);

    if s.in_blend_zone() {
        apply_blend_zone(&mut p);
    }
    p
}

/// Curve and extras parameters for an X/Y position shifted by `gamma_phase`.
///
/// With a zero phase the curve matches [`derive_parameters`] and every
/// extra stays off, except the lowpass for harmonically rich oscillators.
pub fn derive_parameters_with_phase(
    x: u8,
    y: u16,
    gamma_phase: f32,
    period_scale: f32,
    osc_harmonic_weight: f32,
) -> TableShaperParams {
    let s = Sweep::new(y, gamma_phase, period_scale);
    let enable = if gamma_phase != 0.0 { 1.0 } else { 0.0 };
    let weight = |frequency: f32, offset: f32| s.triangle(frequency, PHASE_WIDTH, offset);

    let mut p = TableShaperParams {
        drive: x.min(SHAPE_X_MAX) as f32 / SHAPE_X_MAX as f32,
        inflator_weight: weight(phi::PHI_225, 0.0),
        poly_weight: weight(phi::PHI_200, 0.167),
        hard_knee_weight: weight(phi::PHI_175, 0.333),
        cheby_weight: weight(phi::PHI_250, 0.5),
        sine_fold_weight: weight(phi::PHI_150, 0.667),
        rectifier_weight: weight(phi::PHI_125, 0.833),
        threshold: weight(phi::PHI_275, 0.25),
        ..Default::default()
    };

    let asym_freq_mult = 1.0 + s.y_norm * s.y_norm * (ACCEL_FACTOR * 0.5);
    let asym_base = (s.y_norm as f64
        * phi::PHI_100 as f64
        * asym_freq_mult as f64
        * period_scale as f64) as f32;
    let asym_phase = wrap_phase((asym_base + s.phase_offset(phi::PHI_100)) as f64);
    p.asymmetry = 0.3 + triangle_simple_unipolar(asym_phase, PHASE_WIDTH) * 0.4;

    p.deadzone_width = enable * s.triangle(phi::PHI_N050, 0.2, 0.0);
    let deadzone_phase = s.triangle(phi::PHI_033, 0.3, 0.0);
    p.deadzone_phase = deadzone_phase * deadzone_phase;

    p.hysteresis = s.eval(
        &PhiTriangle { frequency: phi::PHI_067, duty: 1.0, offset: 0.0, bipolar: true },
        enable,
    );
    p.hyst_mix_influence = enable * s.triangle(phi::PHI_050, 0.5, 0.0);
    p.drift_mult = s.eval(
        &PhiTriangle { frequency: phi::PHI_400, duty: 0.4, offset: 0.0, bipolar: true },
        enable,
    );
    p.drift_add = s.eval(
        &PhiTriangle { frequency: phi::PHI_N100, duty: 0.4, offset: 0.5, bipolar: true },
        enable,
    );
    p.drift_stereo_offset = enable * (s.triangle(phi::PHI_250, 0.5, 0.0) * 0.6 - 0.3);
    p.sub_intensity = enable * s.triangle(phi::PHI_350, 0.3, 0.0);

    let extras = EXTRAS_BANK.map(|t| s.eval(&t, enable));
    p.sub_ratio = sub_ratio_from_triangle(extras[0]);
    p.stride = stride_from_triangle(extras[1]);
    p.feedback = feedback_from_triangle(extras[2]);
    p.rotation = rotation_from_triangle(extras[3]);

    let slew_enable = if gamma_phase != 0.0 || osc_harmonic_weight >= 0.8 {
        1.0
    } else {
        0.0
    };
    let slew_duty = (osc_harmonic_weight + 0.2).min(1.0);
    p.slew_intensity = slew_enable * s.triangle(phi::PHI_175, slew_duty, 0.0);

    let pre_expand_base = (s.y_norm as f64 * 2.0 * period_scale as f64) as f32;
    let pre_expand_phase = wrap_phase((pre_expand_base + s.phase_offset(phi::PHI_050)) as f64);
    p.pre_expand_amount = p.drive * triangle_simple_unipolar(pre_expand_phase, 1.0);

    if gamma_phase == 0.0 && s.in_blend_zone() {
        apply_blend_zone(&mut p);
    }
    p
}

/// Stored waveshaper setup of a sound.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TableShaperSettings {
    /// Drive position, 0..=127. Zero switches the shaper off.
    pub shape_x: u8,
    /// Curve position, 0..=1023.
    pub shape_y: u16,
    pub anti_aliasing: bool,
    pub gamma_phase: f32,
    pub extras_mask: u8,
    pub osc_harmonic_weight: f32,
}

impl Default for TableShaperSettings {
    fn default() -> Self {
        Self {
            shape_x: 0,
            shape_y: 0,
            anti_aliasing: false,
            gamma_phase: 0.0,
            extras_mask: 0,
            osc_harmonic_weight: 0.5,
        }
    }
}

impl TableShaperSettings {
    pub fn is_enabled(&self) -> bool {
        self.shape_x > 0
    }

    pub fn derive_parameters(&self) -> TableShaperParams {
        derive_parameters_with_phase(
            self.shape_x,
            self.shape_y,
            self.gamma_phase,
            1.0,
            self.osc_harmonic_weight,
        )
    }

    /// Follows the oscillator feeding the shaper.
    pub fn set_oscillator_type(&mut self, osc_type: OscillatorType) {
        self.osc_harmonic_weight = osc_type_to_harmonic_weight(osc_type);
    }
}

impl PersistentParams for TableShaperSettings {
    fn write_params<W: ParamWriter>(&self, writer: &mut W) {
        writer.write_attribute("tableShaperShapeX", self.shape_x as i32);
        writer.write_attribute("tableShaperShapeY", self.shape_y as i32);
        if self.anti_aliasing {
            writer.write_attribute("tableShaperAA", 1);
        }
        write_scaled(writer, "tableShaperPhase", self.gamma_phase, 10.0);
        writer.write_attribute("tableShaperExtras", self.extras_mask as i32);
        write_scaled(writer, "tableShaperHarmonic", self.osc_harmonic_weight, 100.0);
    }

    fn read_param<R: ParamReader>(&mut self, tag: &str, reader: &mut R) -> bool {
        match tag {
            "tableShaperShapeX" => {
                self.shape_x = reader.read_value().clamp(0, SHAPE_X_MAX as i32) as u8;
            }
            "tableShaperShapeY" => {
                self.shape_y = reader.read_value().clamp(0, SHAPE_Y_MAX as i32) as u16;
            }
            "tableShaperAA" => self.anti_aliasing = reader.read_value() != 0,
            "tableShaperPhase" => self.gamma_phase = read_scaled(reader, 10.0),
            "tableShaperExtras" => {
                self.extras_mask = (reader.read_value() & 0x1f) as u8;
            }
            "tableShaperHarmonic" => {
                self.osc_harmonic_weight = read_scaled(reader, 100.0).clamp(0.0, 1.0);
            }
            _ => return false,
        }
        true
    }
}
