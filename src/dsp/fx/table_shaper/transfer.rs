//! Float model of the transfer curve, sampled into the lookup tables.

use core::f32::consts::PI;

#[allow(unused_imports)]
use num_traits::float::Float;

use super::params::TableShaperParams;
use super::{TABLE_LEN, TABLE_SCALE};

const WEIGHT_EPSILON: f32 = 0.001;
const DEADZONE_EPSILON: f32 = 4.0 / 32767.0;

/// Curve constants derived once per table build.
#[derive(Debug, Clone, Copy)]
pub struct TransferCurve {
    params: TableShaperParams,
    k: f32,
    /// Gain ratio of the positive half, 0.5..=1.5. The negative half gets `2 - ratio`.
    asym_ratio: f32,
    inv_norm_positive: f32,
    inv_norm_negative: f32,
    weights: [f32; 6],
    has_weights: bool,
}

impl TransferCurve {
    pub fn new(params: &TableShaperParams) -> Self {
        let params = params.clamped();
        let k = 1.0 + 9.0 * params.drive;
        let asym_ratio = 0.5 + params.asymmetry;
        let inv_norm_positive = 1.0 / (k * asym_ratio).tanh().max(0.01);
        let inv_norm_negative = 1.0 / (k * (2.0 - asym_ratio)).tanh().max(0.01);

        let mut weights = [
            params.inflator_weight,
            params.poly_weight,
            params.hard_knee_weight,
            params.cheby_weight,
            params.sine_fold_weight,
            params.rectifier_weight,
        ];
        let sum: f32 = weights.iter().sum();
        let has_weights = sum >= WEIGHT_EPSILON;
        if has_weights {
            weights.iter_mut().for_each(|w| *w /= sum);
        }

        Self {
            params,
            k,
            asym_ratio,
            inv_norm_positive,
            inv_norm_negative,
            weights,
            has_weights,
        }
    }

    /// Evaluates the curve at `x` in -1..=1.
    pub fn evaluate(&self, x: f32) -> f32 {
        let p = &self.params;
        let norm = x.abs();
        let overdriven = norm * (1.0 + p.drive);
        let pe = if p.pre_expand_amount > WEIGHT_EPSILON {
            overdriven * (1.0 + p.pre_expand_amount * 0.5 * (1.0 - overdriven * overdriven))
        } else {
            overdriven
        };

        let (k_eff, inv_norm) = if x >= 0.0 {
            (self.k * self.asym_ratio, self.inv_norm_positive)
        } else {
            (self.k * (2.0 - self.asym_ratio), self.inv_norm_negative)
        };

        let magnitude = if self.has_weights {
            let w = &self.weights;
            let mut blend = 0.0;
            if w[0] > 0.0 {
                blend += w[0] * inflator(pe, k_eff) * inv_norm;
            }
            if w[1] > 0.0 {
                blend += w[1] * poly(pe, k_eff) * inv_norm;
            }
            if w[2] > 0.0 {
                blend += w[2] * pe.clamp(-1.0, 1.0);
            }
            if w[3] > 0.0 {
                blend += w[3] * chebyshev_fold(pe);
            }
            if w[4] > 0.0 {
                blend += w[4] * sine_fold(pe, p.drive);
            }
            if w[5] > 0.0 {
                blend += w[5] * rectifier(pe, p.drive);
            }
            blend
        } else {
            norm
        };

        let mut value = if x < 0.0 { -magnitude } else { magnitude };

        if p.deadzone_width > WEIGHT_EPSILON {
            let passthrough = 1.0 - 0.8 * p.deadzone_width;
            let center = p.deadzone_phase * 2.0 - 1.0;
            if x < center - passthrough || x > center + passthrough {
                value = if value >= 0.0 {
                    DEADZONE_EPSILON
                } else {
                    -DEADZONE_EPSILON
                };
            }
        }

        value
    }
}

fn inflator(x: f32, k: f32) -> f32 {
    (x * (1.0 + 0.5 * (1.0 - x.abs() * x.abs())) * k).tanh()
}

fn poly(x: f32, k: f32) -> f32 {
    let x3 = x * x * x;
    let x5 = x3 * x * x;
    ((x - x3 / 3.0 + x5 / 5.0) * k).tanh()
}

/// Fifth Chebyshev polynomial, folded back into 0..=1 once it leaves the unit range.
fn chebyshev_fold(x: f32) -> f32 {
    let c = 1.2 * x;
    let c2 = c * c;
    let raw = c * (5.0 - 20.0 * c2 + 16.0 * c2 * c2);
    let shifted = raw + 1.0;
    let wrapped = shifted - 4.0 * (shifted * 0.25).floor();
    let folded = if wrapped < 2.0 { wrapped - 1.0 } else { 3.0 - wrapped };
    folded.abs()
}

fn sine_fold(x: f32, drive: f32) -> f32 {
    let b = PI * (1.0 + drive);
    ((x / 0.4).tanh() * (b * x).sin() + 0.3 * x.tanh())
        .abs()
        .min(1.0)
}

fn rectifier(x: f32, drive: f32) -> f32 {
    let bias = 0.2 * drive;
    (((x + bias).abs() - bias) * 2.0).tanh()
}

/// Samples the curve over the whole table, recentres it and scales it to the
/// i16 range. `scratch` must hold [`TABLE_LEN`] values.
pub fn build_table(params: &TableShaperParams, scratch: &mut [f32], table: &mut [i16]) {
    let curve = TransferCurve::new(params);
    let scratch = &mut scratch[..TABLE_LEN];

    let mut min = f32::MAX;
    let mut max = f32::MIN;
    for (i, y) in scratch.iter_mut().enumerate() {
        let x = i as f32 / TABLE_SCALE as f32 - 1.0;
        *y = curve.evaluate(x);
        min = min.min(*y);
        max = max.max(*y);
    }

    let center = (min + max) * 0.5;
    let peak_to_peak = max - min;
    let gain = if peak_to_peak > WEIGHT_EPSILON {
        2.0 / peak_to_peak
    } else {
        1.0
    };

    for (entry, y) in table.iter_mut().zip(scratch.iter()) {
        // Truncates towards zero.
        *entry = ((y - center) * gain * 32767.0).clamp(-32767.0, 32767.0) as i16;
    }
}
