//! Block processing with smoothed controls and wet-path extras.

#[allow(unused_imports)]
use num_traits::float::Float;

use super::processor::ShaperBlock;
use super::{
    apply_drive, compute_base_slope, compute_threshold32, drive_to_gain_q26,
    mix_param_to_norm_q16, ShaperProcessor, INT32_MAX_SHIFTED, ONE_Q16,
};
use crate::dsp::StereoSample;
use crate::utils::{add_saturate, clip_i32, multiply_32x32_rshift32, rotate_right, ONE_Q31};

/// Bits of [`ShaperBlockParams::extras_mask`].
pub mod extras {
    /// Subharmonic gain modulation.
    pub const SUB: u8 = 1 << 0;
    /// Comb feedback from a sample `stride` samples back.
    pub const FEEDBACK: u8 = 1 << 1;
    /// Bit rotation of the wet signal.
    pub const ROTATION: u8 = 1 << 2;
    /// One-pole lowpass on the wet signal.
    pub const LPF: u8 = 1 << 3;
    /// Integrator reset on zero crossings.
    pub const INTEGRATOR: u8 = 1 << 4;
    pub const ALL: u8 = 0x1f;
}

/// Per-sample smoothing coefficient of the drive gain, about 40ms at 44.1kHz.
pub const SMOOTHING_ALPHA: i32 = (0.0005 * ONE_Q31 as f64) as i32;

/// Largest subharmonic gain swing, 0.3 in Q16.
pub const SUB_BOOST_MAX_Q16: i32 = 19660;

/// Note frequency used for the lowpass when no note is playing.
pub const LPF_REFERENCE_HZ: f32 = 110.0;

const LPF_OCTAVE_MIN: f32 = 1.0;
const LPF_OCTAVE_MAX: f32 = 2.0;
const LPF_ALPHA_SCALE: i32 = 9;

/// Lowpass coefficient in Q16. The cutoff moves from two octaves above the
/// note at zero intensity down to one octave above at full intensity.
pub fn compute_lpf_alpha_q16(intensity_q16: i32, note_frequency_hz: f32) -> i32 {
    let octave = LPF_OCTAVE_MAX
        - (LPF_OCTAVE_MAX - LPF_OCTAVE_MIN) * intensity_q16 as f32 / ONE_Q16 as f32;
    let cutoff = note_frequency_hz * octave.exp2();
    (cutoff as i32).saturating_mul(LPF_ALPHA_SCALE)
}

/// Controls for one block, as patched by the voice.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShaperBlockParams {
    /// Drive in q31, 0 for unity gain.
    pub drive: i32,
    /// Wet amount in q31. `-2^30` and below is fully dry.
    pub mix: i32,
    pub extras_mask: u8,
    /// Zero disables hysteresis and leaves only the forced lowpass as an extra.
    pub gamma_phase: f32,
    pub note_frequency_hz: f32,
}

impl Default for ShaperBlockParams {
    fn default() -> Self {
        Self {
            drive: 0,
            mix: 0,
            extras_mask: 0,
            gamma_phase: 0.0,
            note_frequency_hz: LPF_REFERENCE_HZ,
        }
    }
}

/// Smoothed controls carried from one block to the next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShaperSmoothing {
    pub drive_gain_q26: i32,
    pub threshold32: i32,
    pub blend_slope_q8: i32,
}

impl Default for ShaperSmoothing {
    fn default() -> Self {
        Self {
            drive_gain_q26: 0,
            threshold32: INT32_MAX_SHIFTED,
            blend_slope_q8: 0,
        }
    }
}

impl ShaperSmoothing {
    /// Moves the blend coefficients halfway to their targets. Fresh state
    /// jumps straight there so the first block is not silent.
    fn advance_coefficients(&mut self, threshold32: i32, blend_slope_q8: i32, mix_norm_q16: i32) {
        let first_use =
            self.threshold32 == INT32_MAX_SHIFTED && self.blend_slope_q8 == 0 && mix_norm_q16 > 0;
        if first_use {
            self.threshold32 = threshold32;
            self.blend_slope_q8 = blend_slope_q8;
        }
        self.threshold32 = ((self.threshold32 as i64 + threshold32 as i64) >> 1) as i32;
        self.blend_slope_q8 = ((self.blend_slope_q8 as i64 + blend_slope_q8 as i64) >> 1) as i32;
    }

    #[inline]
    fn step_gain(&mut self, target: i32) -> i32 {
        let delta = multiply_32x32_rshift32(target.wrapping_sub(self.drive_gain_q26), SMOOTHING_ALPHA);
        self.drive_gain_q26 = self.drive_gain_q26.saturating_add(delta.saturating_mul(2));
        self.drive_gain_q26
    }
}

/// Modulation state of one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShaperChannelState {
    /// Previous scaled dry value, for the hysteresis direction.
    pub prev_scaled_input: i32,
    /// Input at the last stride point, for zero crossings and feedback.
    pub prev_sample: i32,
    pub zero_crossings: u8,
    /// Current subharmonic polarity, 1 or -1.
    pub sub_sign: i8,
    /// Lowpass or integrator state, in the scaled domain.
    pub slewed: i32,
}

impl Default for ShaperChannelState {
    fn default() -> Self {
        Self {
            prev_scaled_input: 0,
            prev_sample: 0,
            zero_crossings: 0,
            sub_sign: 1,
            slewed: 0,
        }
    }
}

/// Values fixed for the duration of one block.
#[derive(Debug, Default, Clone, Copy)]
struct BlockContext {
    blend_slope_q8: i32,
    threshold32: i32,
    hyst_offset: i32,
    hysteresis: bool,
    sub_boost_q16: i32,
    sub_ratio: u8,
    stride: i32,
    feedback_q16: i32,
    rotation: u32,
    lpf_alpha_q16: i32,
    integrator_blend_q16: i32,
    lpf: bool,
    integrator: bool,
}

impl BlockContext {
    fn new(block: &ShaperBlock<'_>, params: &ShaperBlockParams, smoothing: &ShaperSmoothing) -> Self {
        let c = block.coefficients();
        let mask = params.extras_mask;
        let mut ctx = Self {
            blend_slope_q8: smoothing.blend_slope_q8,
            threshold32: smoothing.threshold32,
            sub_ratio: 2,
            stride: 64,
            ..Default::default()
        };

        if params.gamma_phase != 0.0 && c.hyst_offset != 0 {
            ctx.hyst_offset = c.hyst_offset;
            ctx.hysteresis = true;
        }

        if mask & (extras::SUB | extras::FEEDBACK) != 0 {
            ctx.stride = c.stride.max(1);
        }
        if mask & extras::SUB != 0 {
            ctx.sub_boost_q16 = ((c.sub_intensity_q16 as i64 * SUB_BOOST_MAX_Q16 as i64) >> 16) as i32;
            ctx.sub_ratio = c.sub_ratio.max(1) as u8;
        }
        if mask & extras::FEEDBACK != 0 {
            ctx.feedback_q16 = c.feedback_q16;
        }
        if mask & extras::ROTATION != 0 {
            ctx.rotation = c.rotation;
        }
        if c.slew_intensity_q16 > 0 {
            if mask & extras::INTEGRATOR != 0 {
                ctx.integrator = true;
                ctx.integrator_blend_q16 = c.slew_intensity_q16;
            } else if mask & extras::LPF != 0 || params.gamma_phase == 0.0 {
                ctx.lpf = true;
                ctx.lpf_alpha_q16 =
                    compute_lpf_alpha_q16(c.slew_intensity_q16, params.note_frequency_hz);
            }
        }
        ctx
    }

    fn needs_stride_loop(&self) -> bool {
        self.sub_boost_q16 != 0 || self.feedback_q16 > 0 || self.integrator
    }

    /// Only rotation and hysteresis, handled without per-channel extras state.
    fn is_simple(&self, mask: u8) -> bool {
        mask & !extras::ROTATION == 0 && !self.lpf
    }
}

#[derive(Debug, Default)]
struct StrideCounter {
    count: i32,
}

impl StrideCounter {
    #[inline]
    fn tick(&mut self, stride: i32) -> bool {
        self.count += 1;
        if self.count >= stride {
            self.count = 0;
            true
        } else {
            false
        }
    }
}

#[inline]
fn shape_simple(
    block: &ShaperBlock<'_>,
    ctx: &BlockContext,
    driven: i32,
    state: &mut ShaperChannelState,
) -> i32 {
    let scaled_dry = block.scale_input(driven);
    let scaled_wet = rotate_right(scaled_dry, ctx.rotation);
    let prev = ctx.hysteresis.then_some(&mut state.prev_scaled_input);
    block.unscale(block.process_pre_scaled32(
        scaled_wet,
        scaled_dry,
        ctx.blend_slope_q8,
        ctx.threshold32,
        ctx.hyst_offset,
        prev,
    ))
}

#[inline]
fn shape_with_extras(
    block: &ShaperBlock<'_>,
    ctx: &BlockContext,
    input: i32,
    gain_q26: i32,
    stride_point: bool,
    state: &mut ShaperChannelState,
) -> i32 {
    let mut scaled_feedback = 0;
    if stride_point {
        let prev = state.prev_sample;
        if ctx.feedback_q16 > 0 {
            let scaled_prev = block.scale_input(apply_drive(prev, gain_q26));
            scaled_feedback = ((scaled_prev as i64 * ctx.feedback_q16 as i64) >> 16) as i32;
        }
        state.prev_sample = input;

        if (input ^ prev) < 0 {
            if ctx.sub_boost_q16 != 0 {
                state.zero_crossings += 1;
                if state.zero_crossings >= ctx.sub_ratio {
                    state.sub_sign = -state.sub_sign;
                    state.zero_crossings = 0;
                }
            }
            if ctx.integrator {
                state.slewed = 0;
            }
        }
    }

    let scaled_dry = block.scale_input(apply_drive(input, gain_q26));
    let mut wet = scaled_dry;

    if scaled_feedback != 0 {
        wet = add_saturate(wet, scaled_feedback);
    }
    wet = rotate_right(wet, ctx.rotation);

    if ctx.integrator {
        state.slewed = add_saturate(state.slewed, wet >> 6);
        let diff = state.slewed as i64 - wet as i64;
        wet = clip_i32(wet as i64 + ((diff * ctx.integrator_blend_q16 as i64) >> 16));
    } else if ctx.lpf {
        let diff = scaled_dry as i64 - state.slewed as i64;
        state.slewed = clip_i32(state.slewed as i64 + ((diff * ctx.lpf_alpha_q16 as i64) >> 16));
        wet = state.slewed;
    }

    if ctx.sub_boost_q16 != 0 {
        let adjustment = multiply_32x32_rshift32(wet, ctx.sub_boost_q16 << 16);
        wet = wet.saturating_sub(state.sub_sign as i32 * adjustment);
    }

    let prev = ctx.hysteresis.then_some(&mut state.prev_scaled_input);
    block.unscale(block.process_pre_scaled32(
        wet,
        scaled_dry,
        ctx.blend_slope_q8,
        ctx.threshold32,
        ctx.hyst_offset,
        prev,
    ))
}

impl ShaperProcessor {
    /// Shapes a mono block in place.
    ///
    /// The drive gain glides per sample, the blend coefficients per block.
    /// With a linear curve only the drive is applied.
    pub fn shape_block(
        &mut self,
        buffer: &mut [i32],
        params: &ShaperBlockParams,
        smoothing: &mut ShaperSmoothing,
        state: &mut ShaperChannelState,
    ) {
        if buffer.is_empty() {
            return;
        }
        let target_gain = drive_to_gain_q26(params.drive);
        let mix_norm = mix_param_to_norm_q16(params.mix);
        let target_threshold = compute_threshold32(mix_norm);

        let block = self.begin_block();
        let target_slope = block.blend_slope_q8(compute_base_slope(mix_norm));

        if block.is_linear() {
            for sample in buffer.iter_mut() {
                *sample = apply_drive(*sample, smoothing.step_gain(target_gain));
            }
            smoothing.threshold32 = target_threshold;
            smoothing.blend_slope_q8 = target_slope;
            return;
        }

        smoothing.advance_coefficients(target_threshold, target_slope, mix_norm);
        let ctx = BlockContext::new(&block, params, smoothing);

        if params.extras_mask == 0 && !ctx.lpf {
            for sample in buffer.iter_mut() {
                let driven = apply_drive(*sample, smoothing.step_gain(target_gain));
                *sample = block.process_fast(driven, ctx.blend_slope_q8, ctx.threshold32);
            }
        } else if ctx.is_simple(params.extras_mask) {
            for sample in buffer.iter_mut() {
                let driven = apply_drive(*sample, smoothing.step_gain(target_gain));
                *sample = shape_simple(&block, &ctx, driven, state);
            }
        } else {
            let needs_stride = ctx.needs_stride_loop();
            let mut stride = StrideCounter::default();
            for sample in buffer.iter_mut() {
                let gain = smoothing.step_gain(target_gain);
                let stride_point = needs_stride && stride.tick(ctx.stride);
                *sample = shape_with_extras(&block, &ctx, *sample, gain, stride_point, state);
            }
        }
    }

    /// Stereo version of [`ShaperProcessor::shape_block`]. Both channels
    /// share the smoothed controls and keep their own modulation state.
    pub fn shape_block_stereo(
        &mut self,
        buffer: &mut [StereoSample],
        params: &ShaperBlockParams,
        smoothing: &mut ShaperSmoothing,
        left: &mut ShaperChannelState,
        right: &mut ShaperChannelState,
    ) {
        if buffer.is_empty() {
            return;
        }
        let target_gain = drive_to_gain_q26(params.drive);
        let mix_norm = mix_param_to_norm_q16(params.mix);
        let target_threshold = compute_threshold32(mix_norm);

        let block = self.begin_block();
        let target_slope = block.blend_slope_q8(compute_base_slope(mix_norm));

        if block.is_linear() {
            for frame in buffer.iter_mut() {
                let gain = smoothing.step_gain(target_gain);
                frame.l = apply_drive(frame.l, gain);
                frame.r = apply_drive(frame.r, gain);
            }
            smoothing.threshold32 = target_threshold;
            smoothing.blend_slope_q8 = target_slope;
            return;
        }

        smoothing.advance_coefficients(target_threshold, target_slope, mix_norm);
        let ctx = BlockContext::new(&block, params, smoothing);

        if params.extras_mask == 0 && !ctx.lpf {
            for frame in buffer.iter_mut() {
                let gain = smoothing.step_gain(target_gain);
                frame.l = block.process_fast(apply_drive(frame.l, gain), ctx.blend_slope_q8, ctx.threshold32);
                frame.r = block.process_fast(apply_drive(frame.r, gain), ctx.blend_slope_q8, ctx.threshold32);
            }
        } else if ctx.is_simple(params.extras_mask) {
            for frame in buffer.iter_mut() {
                let gain = smoothing.step_gain(target_gain);
                frame.l = shape_simple(&block, &ctx, apply_drive(frame.l, gain), left);
                frame.r = shape_simple(&block, &ctx, apply_drive(frame.r, gain), right);
            }
        } else {
            let needs_stride = ctx.needs_stride_loop();
            let mut stride = StrideCounter::default();
            for frame in buffer.iter_mut() {
                let gain = smoothing.step_gain(target_gain);
                let stride_point = needs_stride && stride.tick(ctx.stride);
                frame.l = shape_with_extras(&block, &ctx, frame.l, gain, stride_point, left);
                frame.r = shape_with_extras(&block, &ctx, frame.r, gain, stride_point, right);
            }
        }
    }
}
