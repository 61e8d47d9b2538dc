//! User-facing waveshaper parameters.

use crate::params::{read_scaled, write_scaled, ParamReader, ParamWriter, PersistentParams};

/// Drive below this counts as bypass.
pub const LINEAR_DRIVE_THRESHOLD: f32 = 0.001;

/// Parameters of the transfer curve and of the wet-path extras.
///
/// Values outside their documented ranges are accepted and clamped by
/// [`TableShaperParams::clamped`] before anything uses them.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TableShaperParams {
    /// Input gain and curve steepness, 0..=1. Zero bypasses the shaper.
    pub drive: f32,

    // Basis weights, 0..=1. They are normalised by their sum.
    pub inflator_weight: f32,
    pub poly_weight: f32,
    pub hard_knee_weight: f32,
    pub cheby_weight: f32,
    pub sine_fold_weight: f32,
    pub rectifier_weight: f32,

    /// Linear zone size, 0..=1.
    pub threshold: f32,
    /// Balance between the positive and negative halves, 0..=1 with 0.5 symmetric.
    pub asymmetry: f32,
    /// Share of the input range collapsed to silence, 0..=1.
    pub deadzone_width: f32,
    /// Centre of the passthrough window, 0..=1 with 0.5 at the zero crossing.
    pub deadzone_phase: f32,

    /// Direction dependent curve offset, -1..=1.
    pub hysteresis: f32,
    pub hyst_mix_influence: f32,

    // Drift intensities, -1..=1.
    pub drift_mult: f32,
    pub drift_add: f32,
    pub drift_stereo_offset: f32,

    /// Subharmonic gain modulation, 0..=1.
    pub sub_intensity: f32,
    /// Zero crossings between subharmonic sign flips, 2..=6.
    pub sub_ratio: i8,
    /// Samples between zero crossing checks, 1..=128.
    pub stride: i32,
    /// Comb feedback, 0..=0.8.
    pub feedback: f32,
    /// Bit rotation of the wet signal, 0..=31.
    pub rotation: i8,
    pub slew_intensity: f32,
    /// Soft expansion ahead of the curve, 0..=1.
    pub pre_expand_amount: f32,
}

impl Default for TableShaperParams {
    fn default() -> Self {
        Self {
            drive: 0.0,
            inflator_weight: 1.0,
            poly_weight: 0.0,
            hard_knee_weight: 0.0,
            cheby_weight: 0.0,
            sine_fold_weight: 0.0,
            rectifier_weight: 0.0,
            threshold: 1.0,
            asymmetry: 0.5,
            deadzone_width: 0.0,
            deadzone_phase: 0.5,
            hysteresis: 0.0,
            hyst_mix_influence: 0.0,
            drift_mult: 0.0,
            drift_add: 0.0,
            drift_stereo_offset: 0.0,
            sub_intensity: 0.0,
            sub_ratio: 2,
            stride: 64,
            feedback: 0.0,
            rotation: 0,
            slew_intensity: 0.0,
            pre_expand_amount: 0.0,
        }
    }
}

// NaN turns into the lower bound so a clamped set always compares equal to itself.
fn clamp_unit(value: f32, min: f32, max: f32) -> f32 {
    if value.is_nan() {
        min
    } else {
        value.clamp(min, max)
    }
}

impl TableShaperParams {
    pub fn clamp(&mut self) {
        self.drive = clamp_unit(self.drive, 0.0, 1.0);
        self.inflator_weight = clamp_unit(self.inflator_weight, 0.0, 1.0);
        self.poly_weight = clamp_unit(self.poly_weight, 0.0, 1.0);
        self.hard_knee_weight = clamp_unit(self.hard_knee_weight, 0.0, 1.0);
        self.cheby_weight = clamp_unit(self.cheby_weight, 0.0, 1.0);
        self.sine_fold_weight = clamp_unit(self.sine_fold_weight, 0.0, 1.0);
        self.rectifier_weight = clamp_unit(self.rectifier_weight, 0.0, 1.0);
        self.threshold = clamp_unit(self.threshold, 0.0, 1.0);
        self.asymmetry = clamp_unit(self.asymmetry, 0.0, 1.0);
        self.deadzone_width = clamp_unit(self.deadzone_width, 0.0, 1.0);
        self.deadzone_phase = clamp_unit(self.deadzone_phase, 0.0, 1.0);
        self.hysteresis = clamp_unit(self.hysteresis, -1.0, 1.0);
        self.hyst_mix_influence = clamp_unit(self.hyst_mix_influence, 0.0, 1.0);
        self.drift_mult = clamp_unit(self.drift_mult, -1.0, 1.0);
        self.drift_add = clamp_unit(self.drift_add, -1.0, 1.0);
        self.drift_stereo_offset = clamp_unit(self.drift_stereo_offset, -1.0, 1.0);
        self.sub_intensity = clamp_unit(self.sub_intensity, 0.0, 1.0);
        self.sub_ratio = self.sub_ratio.clamp(2, 6);
        self.stride = self.stride.clamp(1, 128);
        self.feedback = clamp_unit(self.feedback, 0.0, 0.8);
        self.rotation = self.rotation.clamp(0, 31);
        self.slew_intensity = clamp_unit(self.slew_intensity, 0.0, 1.0);
        self.pre_expand_amount = clamp_unit(self.pre_expand_amount, 0.0, 1.0);
    }

    pub fn clamped(mut self) -> Self {
        self.clamp();
        self
    }

    /// True when the curve degenerates to a straight line.
    pub fn is_linear(&self) -> bool {
        self.drive < LINEAR_DRIVE_THRESHOLD
    }

    /// Steepness of the wet blend, `0.1 + 1.9 * drive²`, in Q8.
    pub fn blend_aggression_q8(&self) -> i32 {
        ((0.1 + self.drive * self.drive * 1.9) * 256.0) as i32
    }
}

/// Only the curve-defining values are stored, the extras are derived from
/// the XY settings again on load.
impl PersistentParams for TableShaperParams {
    fn write_params<W: ParamWriter>(&self, writer: &mut W) {
        let defaults = Self::default();
        if self.drive != defaults.drive {
            write_scaled(writer, "tableShaperDrive", self.drive, 1000.0);
        }
        if self.hysteresis != defaults.hysteresis {
            write_scaled(writer, "tableShaperHysteresis", self.hysteresis, 1000.0);
        }
        if self.asymmetry != defaults.asymmetry {
            write_scaled(writer, "tableShaperAsymmetry", self.asymmetry, 1000.0);
        }
    }

    fn read_param<R: ParamReader>(&mut self, tag: &str, reader: &mut R) -> bool {
        match tag {
            "tableShaperDrive" => self.drive = read_scaled(reader, 1000.0),
            "tableShaperHysteresis" => self.hysteresis = read_scaled(reader, 1000.0),
            "tableShaperAsymmetry" => self.asymmetry = read_scaled(reader, 1000.0),
            _ => return false,
        }
        self.clamp();
        true
    }
}
