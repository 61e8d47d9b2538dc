//! Tests for the fixed-point helpers

use q31_synth_dsp::utils::parameter_interpolator::ParameterInterpolator;
use q31_synth_dsp::utils::phase::{frequency_to_increment, PhaseState};
use q31_synth_dsp::utils::*;
use q31_synth_dsp::SampleRate;

#[test]
fn multiplies_keep_high_word() {
    assert_eq!(multiply_32x32_rshift32(1 << 30, 1 << 30), 1 << 28);
    assert_eq!(multiply_32x32_rshift32(-(1 << 30), 1 << 30), -(1 << 28));
    assert_eq!(multiply_32x32_rshift32_rounded(1 << 30, 3), 1);
    assert_eq!(multiply_32x32_rshift32(1 << 30, 3), 0);
}

#[test]
fn accumulate_saturates() {
    assert_eq!(
        multiply_accumulate_32x32_rshift32_rounded(i32::MAX, i32::MAX, i32::MAX),
        i32::MAX
    );
    assert_eq!(
        multiply_accumulate_32x32_rshift32_rounded(i32::MIN, i32::MAX, i32::MIN),
        i32::MIN
    );
    assert_eq!(multiply_accumulate_32x32_rshift32_rounded(10, 1 << 30, 1 << 2), 11);
}

#[test]
fn shifts_clip_instead_of_wrapping() {
    assert_eq!(lshift_and_saturate(1 << 30, 1), i32::MAX);
    assert_eq!(lshift_and_saturate(-(1 << 30), 2), i32::MIN);
    assert_eq!(lshift_and_saturate(3, 4), 48);
    assert_eq!(lshift_and_saturate(-3, 40), i32::MIN);
    assert_eq!(lshift_and_saturate(0, 40), 0);
    assert_eq!(lshift_and_saturate(i32::MIN, 0), i32::MIN);
}

#[test]
fn signed_saturate_limits_range() {
    assert_eq!(signed_saturate::<29>(i32::MAX), (1 << 28) - 1);
    assert_eq!(signed_saturate::<29>(i32::MIN), -(1 << 28));
    assert_eq!(signed_saturate::<29>(12345), 12345);
}

#[test]
fn saturating_helpers() {
    assert_eq!(add_saturate(i32::MAX, 1), i32::MAX);
    assert_eq!(add_saturate(i32::MIN, -1), i32::MIN);
    assert_eq!(clip_i32(i64::MAX), i32::MAX);
    assert_eq!(clip_i32(i64::MIN), i32::MIN);
    assert_eq!(rotate_right(1, 1), i32::MIN);
}

#[test]
fn float_conversion() {
    assert_eq!(f32_to_q31(1.0), i32::MAX);
    assert_eq!(f32_to_q31(-1.0), i32::MIN);
    assert_eq!(f32_to_q31(0.0), 0);
    assert_eq!(q31_to_f32(1 << 30), 0.5);
    assert_eq!(q31_to_f32(i32::MIN), -1.0);
}

#[test]
fn interpolator_writes_back_reached_value() {
    let mut state = 0;
    {
        let mut ramp = ParameterInterpolator::new_with_increment(&mut state, 10);
        for _ in 0..10 {
            ramp.next();
        }
        assert_eq!(ramp.value(), 100);
    }
    assert_eq!(state, 100);

    {
        let mut ramp = ParameterInterpolator::new_with_increment(&mut state, -7);
        ramp.next();
        ramp.next();
    }
    assert_eq!(state, 86);

    // Steps saturate instead of wrapping.
    let mut state = i32::MAX - 5;
    {
        let mut ramp = ParameterInterpolator::new_with_increment(&mut state, 10);
        assert_eq!(ramp.next(), i32::MAX);
    }
    assert_eq!(state, i32::MAX);
}

#[test]
fn phase_wraps_at_overflow() {
    let mut phase = PhaseState::new(u32::MAX - 5, 10);
    assert_eq!(phase.advance(), 4);
    assert_eq!(phase.advance(), 14);

    let mut stepped = PhaseState::new(123, 0x9000_0000);
    let mut jumped = stepped;
    for _ in 0..37 {
        stepped.advance();
    }
    jumped.advance_by(37);
    assert_eq!(stepped, jumped);
}

#[test]
fn frequency_to_increment_clamps() {
    let sample_rate = SampleRate::default();
    assert_eq!(frequency_to_increment(-10.0, &sample_rate), 0);
    assert_eq!(frequency_to_increment(0.0, &sample_rate), 0);
    assert_eq!(frequency_to_increment(44_100.0, &sample_rate), u32::MAX);

    let a = frequency_to_increment(440.0, &sample_rate);
    let expected = (440.0f64 * 4_294_967_296.0 / 44_100.0).round() as u32;
    assert!(a.abs_diff(expected) <= 1);
}

#[test]
fn sample_rate_holds_increment_per_hz() {
    let sample_rate = SampleRate::new(48_000.0);
    assert_eq!(sample_rate.sample_rate_hz, 48_000.0);
    assert_eq!(sample_rate.increment_per_hz, 4_294_967_296.0 / 48_000.0);
    assert_eq!(
        SampleRate::default(),
        SampleRate::new(q31_synth_dsp::dsp::SAMPLE_RATE as f32)
    );
}
