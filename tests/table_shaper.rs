//! Tests for the table waveshaper

mod modulation;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use preset::Preset;
use q31_synth_dsp::dsp::fx::table_shaper::buffer::extras;
use q31_synth_dsp::dsp::fx::table_shaper::transfer::{build_table, TransferCurve};
use q31_synth_dsp::dsp::fx::table_shaper::xy_mapper::{
    derive_parameters, derive_parameters_with_phase, SHAPE_Y_MAX,
};
use q31_synth_dsp::dsp::fx::table_shaper::*;
use q31_synth_dsp::dsp::oscillator::{render_oscillator, OscillatorRenderConfig, OscillatorType};
use q31_synth_dsp::dsp::{RenderContext, StereoSample, BLOCK_SIZE, SAMPLE_RATE};
use q31_synth_dsp::utils::phase::PhaseState;
use q31_synth_dsp::SampleRate;

const INPUTS: [i32; 11] = [
    i32::MIN,
    -(1 << 30),
    -(1 << 23),
    -(1 << 20),
    -1,
    0,
    1,
    1 << 21,
    1 << 22,
    1 << 30,
    i32::MAX,
];

fn driven(drive: f32) -> TableShaperParams {
    TableShaperParams {
        drive,
        ..Default::default()
    }
}

fn published(params: TableShaperParams) -> (ShaperBuilder, ShaperProcessor) {
    let (mut builder, processor) = TableShaper::new();
    assert!(builder.set_parameters(params));
    assert!(matches!(
        builder.regenerate_if_dirty(),
        Ok(Regeneration::Published { .. })
    ));
    (builder, processor)
}

fn outputs(processor: &mut ShaperProcessor) -> Vec<i32> {
    INPUTS
        .iter()
        .map(|&x| processor.process(x, UNITY_GAIN_Q26, MAX_MIX))
        .collect()
}

#[test]
fn zero_drive_is_unity_gain() {
    assert_eq!(drive_to_gain_q26(0), UNITY_GAIN_Q26);
    assert!(drive_to_gain_q26(i32::MAX) > UNITY_GAIN_Q26);
    assert_eq!(apply_drive(i32::MIN, UNITY_GAIN_Q26), i32::MIN);
}

#[test]
fn bypass_returns_input() {
    let (mut builder, mut processor) = TableShaper::new();
    assert!(processor.is_linear());
    for x in INPUTS {
        assert_eq!(processor.process(x, drive_to_gain_q26(0), MAX_MIX), x);
    }

    builder.set_parameters(driven(0.8));
    builder.regenerate_if_dirty().unwrap();
    assert!(!processor.is_linear());

    builder.set_parameters(driven(0.0));
    assert_eq!(builder.regenerate_if_dirty(), Ok(Regeneration::Linear));
    assert!(processor.is_linear());
    for x in INPUTS {
        assert_eq!(processor.process(x, drive_to_gain_q26(0), MAX_MIX), x);
    }
}

#[test]
fn shaping_changes_signal() {
    let (_builder, mut processor) = published(driven(1.0));
    let shaped = outputs(&mut processor);
    assert!(shaped.iter().zip(INPUTS).any(|(&out, x)| out != x));
}

#[test]
fn processing_is_deterministic() {
    let (_builder, mut processor) = published(driven(0.6));
    assert_eq!(outputs(&mut processor), outputs(&mut processor));
}

#[test]
fn published_table_replaces_previous_one() {
    let first = driven(0.3);
    let second = TableShaperParams {
        drive: 0.9,
        poly_weight: 1.0,
        sine_fold_weight: 0.5,
        ..Default::default()
    };

    let (_b, mut reference) = published(second);
    let expected = outputs(&mut reference);

    let (mut builder, mut processor) = published(first);
    let before = outputs(&mut processor);
    builder.set_parameters(second);
    assert_eq!(
        builder.regenerate_if_dirty(),
        Ok(Regeneration::Published { index: 0 })
    );

    assert_eq!(outputs(&mut processor), expected);
    assert_ne!(before, expected);
}

#[test]
fn pinned_table_defers_rebuild() {
    let (mut builder, mut processor) = published(driven(0.3));

    let block = processor.begin_block();
    assert!(!block.is_linear());

    builder.set_parameters(driven(0.5));
    assert_eq!(
        builder.regenerate_if_dirty(),
        Ok(Regeneration::Published { index: 0 })
    );

    builder.set_parameters(driven(0.7));
    assert_eq!(builder.regenerate_if_dirty(), Ok(Regeneration::Deferred));
    assert!(builder.is_dirty());
    assert!(!builder.release_tables());

    drop(block);
    assert_eq!(
        builder.regenerate_if_dirty(),
        Ok(Regeneration::Published { index: 1 })
    );
    assert_eq!(builder.regenerate_if_dirty(), Ok(Regeneration::Clean));
}

#[test]
fn concurrent_rebuilds_never_mix_tables() {
    let gentle = driven(0.3);
    let harsh = TableShaperParams {
        drive: 0.9,
        hard_knee_weight: 1.0,
        rectifier_weight: 0.4,
        ..Default::default()
    };
    let expected_gentle = outputs(&mut published(gentle).1);
    let expected_harsh = outputs(&mut published(harsh).1);

    let (mut builder, mut processor) = published(gentle);
    let done = Arc::new(AtomicBool::new(false));
    let finished = done.clone();

    let handle = thread::spawn(move || {
        for i in 0..500 {
            builder.set_parameters(if i % 2 == 0 { harsh } else { gentle });
            while builder.regenerate_if_dirty() == Ok(Regeneration::Deferred) {
                thread::yield_now();
            }
        }
        finished.store(true, Ordering::Release);
    });

    while !done.load(Ordering::Acquire) {
        for (k, &x) in INPUTS.iter().enumerate() {
            let out = processor.process(x, UNITY_GAIN_Q26, MAX_MIX);
            assert!(
                out == expected_gentle[k] || out == expected_harsh[k],
                "input {x} gave {out}"
            );
        }
    }
    handle.join().unwrap();
}

#[test]
fn parameters_are_clamped() {
    let (mut builder, _processor) = TableShaper::new();
    builder.set_parameters(TableShaperParams {
        drive: 2.0,
        threshold: f32::NAN,
        hysteresis: -3.0,
        sub_ratio: 10,
        stride: 0,
        feedback: 1.0,
        rotation: 40,
        ..Default::default()
    });

    let params = builder.parameters();
    assert_eq!(params.drive, 1.0);
    assert_eq!(params.threshold, 0.0);
    assert_eq!(params.hysteresis, -1.0);
    assert_eq!(params.sub_ratio, 6);
    assert_eq!(params.stride, 1);
    assert_eq!(params.feedback, 0.8);
    assert_eq!(params.rotation, 31);

    let same = *params;
    assert!(!builder.set_parameters(same));
}

#[test]
fn tables_are_released_and_reallocated() {
    let (mut builder, mut processor) = TableShaper::new();
    assert!(!builder.has_allocated_tables());
    assert!(!builder.release_tables());

    builder.ensure_buffers_allocated().unwrap();
    assert!(builder.has_allocated_tables());
    assert!(processor.is_linear());

    builder.set_parameters(driven(0.5));
    builder.regenerate_if_dirty().unwrap();
    assert!(!builder.release_tables());

    builder.set_parameters(driven(0.0));
    builder.regenerate_if_dirty().unwrap();
    assert!(builder.release_tables());
    assert!(!builder.has_allocated_tables());
    assert!(processor.is_linear());
    assert_eq!(processor.process(1 << 22, UNITY_GAIN_Q26, MAX_MIX), 1 << 22);

    builder.set_parameters(driven(0.5));
    assert!(matches!(
        builder.regenerate_if_dirty(),
        Ok(Regeneration::Published { .. })
    ));
    assert!(builder.has_allocated_tables());
    assert!(!processor.is_linear());
}

#[test]
fn expected_peak_sets_input_scale() {
    let (mut builder, processor) = TableShaper::new();
    assert_eq!(processor.input_scale_shift(), DEFAULT_INPUT_SCALE_SHIFT);

    builder.set_expected_peak(1 << 20);
    assert_eq!(processor.input_scale_shift(), 13);

    builder.set_expected_peak(0);
    assert_eq!(processor.input_scale_shift(), 30);
}

#[test]
fn table_spans_full_range() {
    let mut scratch = vec![0.0; TABLE_LEN];
    let mut table = vec![0i16; TABLE_LEN];
    build_table(&driven(0.5), &mut scratch, &mut table);

    // Quantisation truncates, so the peaks may land one step short.
    assert!(*table.iter().max().unwrap() >= 32766);
    assert!(*table.iter().min().unwrap() <= -32766);
}

#[test]
fn default_asymmetry_is_symmetric() {
    for params in [TableShaperParams::default(), driven(0.5)] {
        let curve = TransferCurve::new(&params);
        for x in [0.05, 0.2, 0.5, 0.9] {
            let sum = curve.evaluate(x) + curve.evaluate(-x);
            assert!(sum.abs() < 1e-4, "x {x}: {sum}");
        }

        let mut scratch = vec![0.0; TABLE_LEN];
        let mut table = vec![0i16; TABLE_LEN];
        build_table(&params, &mut scratch, &mut table);
        let center = TABLE_SIZE / 2;
        for j in 0..=center {
            let sum = table[center + j] as i32 + table[center - j] as i32;
            assert!(sum.abs() <= 1, "offset {j}: {sum}");
        }
    }
}

#[test]
fn asymmetry_drives_halves_differently() {
    let params = TableShaperParams {
        asymmetry: 0.9,
        ..driven(0.3)
    };
    let curve = TransferCurve::new(&params);
    let positive = curve.evaluate(0.2);
    let negative = -curve.evaluate(-0.2);
    assert!(positive > negative);
}

#[test]
fn block_bypass_with_settled_gain() {
    let (_builder, mut processor) = TableShaper::new();
    let mut smoothing = ShaperSmoothing {
        drive_gain_q26: UNITY_GAIN_Q26,
        ..Default::default()
    };
    let mut state = ShaperChannelState::default();

    let input: Vec<i32> = (0..BLOCK_SIZE as i32).map(|n| (n - 64) << 20).collect();
    let mut buffer = input.clone();
    processor.shape_block(&mut buffer, &ShaperBlockParams::default(), &mut smoothing, &mut state);
    assert_eq!(buffer, input);
}

#[test]
fn drive_glides_from_silence() {
    let (_builder, mut processor) = TableShaper::new();
    let mut smoothing = ShaperSmoothing::default();
    let mut state = ShaperChannelState::default();

    let mut buffer = vec![1 << 24; BLOCK_SIZE];
    processor.shape_block(&mut buffer, &ShaperBlockParams::default(), &mut smoothing, &mut state);
    assert!(buffer[0] < buffer[BLOCK_SIZE - 1]);
    assert!(buffer[BLOCK_SIZE - 1] < 1 << 24);
    assert!(smoothing.drive_gain_q26 > 0);
}

fn render_sine(frequency: f32, blocks: usize) -> Vec<i32> {
    let sample_rate = SampleRate::default();
    let ctx = RenderContext::new(sample_rate);
    let config = OscillatorRenderConfig::new(OscillatorType::Sine).with_amplitude(1 << 26, 0);
    let mut phase = PhaseState::with_frequency(frequency, &sample_rate);
    let mut signal = vec![0; blocks * BLOCK_SIZE];
    for block in signal.chunks_mut(BLOCK_SIZE) {
        render_oscillator(&ctx, &config, &mut phase, block);
    }
    signal
}

#[test]
fn stereo_block_with_extras() {
    let settings = TableShaperSettings {
        shape_x: 100,
        shape_y: 500,
        gamma_phase: 1.3,
        extras_mask: extras::ALL,
        ..Default::default()
    };
    let (mut builder, mut processor) = TableShaper::new();
    builder.set_parameters(settings.derive_parameters());
    builder.regenerate_if_dirty().unwrap();

    let blocks = (SAMPLE_RATE as usize) / BLOCK_SIZE;
    let signal = render_sine(110.0, blocks);

    let params = ShaperBlockParams {
        drive: 1 << 29,
        mix: i32::MAX,
        extras_mask: settings.extras_mask,
        gamma_phase: settings.gamma_phase,
        note_frequency_hz: 110.0,
    };
    let mut smoothing = ShaperSmoothing::default();
    let mut left = ShaperChannelState::default();
    let mut right = ShaperChannelState::default();
    let mut wav_data = Vec::new();

    for (n, chunk) in signal.chunks(BLOCK_SIZE).enumerate() {
        let mut buffer: Vec<StereoSample> = chunk
            .iter()
            .map(|&s| StereoSample::new(s, (s >> 1) + (n as i32)))
            .collect();
        processor.shape_block_stereo(&mut buffer, &params, &mut smoothing, &mut left, &mut right);
        wav_data.extend_from_slice(&buffer);
    }

    assert!(wav_data.iter().zip(&signal).any(|(frame, &dry)| frame.l != dry));
    assert!(left.sub_sign == 1 || left.sub_sign == -1);
    wav_writer::write_stereo("fx/table_shaper_extras.wav", &wav_data).ok();
}

#[test]
fn xy_sweep() {
    let blocks = 2 * (SAMPLE_RATE as usize) / BLOCK_SIZE;
    let signal = render_sine(220.0, blocks);

    let (mut builder, mut processor) = TableShaper::new();
    let mut smoothing = ShaperSmoothing::default();
    let mut state = ShaperChannelState::default();
    let mut wav_data = Vec::new();

    for (n, chunk) in signal.chunks(BLOCK_SIZE).enumerate() {
        let y = (modulation::ramp_up(n, blocks) * SHAPE_Y_MAX as f32) as u16;
        builder.set_parameters(derive_parameters(96, y));
        builder.regenerate_if_dirty().unwrap();

        let mut buffer = chunk.to_vec();
        let params = ShaperBlockParams {
            mix: i32::MAX,
            ..Default::default()
        };
        processor.shape_block(&mut buffer, &params, &mut smoothing, &mut state);
        wav_data.extend_from_slice(&buffer);
    }

    wav_writer::write("fx/table_shaper_sweep.wav", &wav_data).ok();
}

#[test]
fn xy_drive_follows_x() {
    assert!(derive_parameters(0, 400).is_linear());
    assert_eq!(derive_parameters(127, 400).drive, 1.0);
    assert_eq!(derive_parameters(255, 400).drive, 1.0);
}

#[test]
fn zero_phase_disables_extras() {
    let with_phase = derive_parameters_with_phase(64, 300, 0.0, 1.0, 0.5);
    let plain = derive_parameters(64, 300);

    assert!((with_phase.inflator_weight - plain.inflator_weight).abs() < 1e-4);
    assert!((with_phase.cheby_weight - plain.cheby_weight).abs() < 1e-4);
    assert!((with_phase.threshold - plain.threshold).abs() < 1e-4);
    assert_eq!(with_phase.hysteresis, 0.0);
    assert_eq!(with_phase.deadzone_width, 0.0);
    assert_eq!(with_phase.sub_intensity, 0.0);
    assert_eq!(with_phase.drift_stereo_offset, 0.0);
    assert_eq!(with_phase.feedback, 0.0);
    assert_eq!(with_phase.rotation, 0);
    assert_eq!(with_phase.slew_intensity, 0.0);
}

#[test]
fn blend_zone_forces_soft_curve() {
    let p = derive_parameters(64, 800);
    assert_eq!(p.inflator_weight, 1.0);
    assert_eq!(p.poly_weight, 0.5);
    assert_eq!(p.hard_knee_weight, 0.0);
    assert_eq!(p.asymmetry, 0.5);
    assert_eq!(p.pre_expand_amount, p.drive);
}

#[test]
fn settings_round_trip() {
    let settings = TableShaperSettings {
        shape_x: 90,
        shape_y: 700,
        anti_aliasing: true,
        gamma_phase: 1.5,
        extras_mask: extras::SUB | extras::ROTATION | extras::INTEGRATOR,
        osc_harmonic_weight: 0.3,
    };
    let preset = Preset::store(&settings);

    let mut restored = TableShaperSettings::default();
    assert!(preset.load(&mut restored).is_empty());
    assert_eq!(restored, settings);
    assert!(restored.is_enabled());
}

#[test]
fn settings_read_clamps() {
    let mut settings = TableShaperSettings::default();
    assert!(!settings.is_enabled());
    assert!(!settings.anti_aliasing);

    assert!(preset::read_one(&mut settings, "tableShaperShapeX", 500));
    assert!(preset::read_one(&mut settings, "tableShaperShapeY", -4));
    assert!(!preset::read_one(&mut settings, "tableShaperUnknown", 1));
    assert_eq!(settings.shape_x, 127);
    assert_eq!(settings.shape_y, 0);

    settings.set_oscillator_type(OscillatorType::Square);
    assert_eq!(settings.osc_harmonic_weight, 1.0);
}

#[test]
fn params_store_curve_values_only() {
    let params = TableShaperParams {
        drive: 0.25,
        hysteresis: -0.5,
        feedback: 0.4,
        ..Default::default()
    };
    let preset = Preset::store(&params);
    assert_eq!(preset.attributes.len(), 2);
    assert_eq!(preset.get("tableShaperDrive"), Some(250));

    let mut restored = TableShaperParams::default();
    assert!(preset.load(&mut restored).is_empty());
    assert_eq!(restored.drive, 0.25);
    assert_eq!(restored.hysteresis, -0.5);
    assert_eq!(restored.feedback, 0.0);
}
