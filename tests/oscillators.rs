//! Tests for the oscillators

mod modulation;

use q31_synth_dsp::dsp::oscillator::tables::{self, table_number, FIRST_DIGITAL_TABLE};
use q31_synth_dsp::dsp::oscillator::oscillator::SAW_SYNC_OFFSET;
use q31_synth_dsp::dsp::oscillator::wavetable_oscillator::WaveTableBank;
use q31_synth_dsp::dsp::oscillator::*;
use q31_synth_dsp::dsp::{RenderContext, SAMPLE_RATE};
use q31_synth_dsp::utils::multiply_32x32_rshift32_rounded;
use q31_synth_dsp::utils::phase::PhaseState;
use q31_synth_dsp::SampleRate;

const BLOCK_SIZE: usize = 128;

/// Saw increment selecting table 5, rendered in closed form.
const INCREMENT_TABLE_5: u32 = 6_000_000;

/// Saw increment selecting table 8, the first with a band-limited table in use.
const INCREMENT_TABLE_8: u32 = 17_000_000;

#[test]
fn saw_end_to_end_crude() {
    assert_eq!(table_number(INCREMENT_TABLE_5).index, 5);

    let ctx = RenderContext::default();
    let amplitude_increment = (2000 - 1000) / BLOCK_SIZE as i32;
    let config =
        OscillatorRenderConfig::new(OscillatorType::Saw).with_amplitude(1000, amplitude_increment);
    let mut phase = PhaseState::new(0, INCREMENT_TABLE_5);
    let mut out = [0; BLOCK_SIZE];

    render_oscillator(&ctx, &config, &mut phase, &mut out);

    let mut expected_phase = 0u32;
    let mut amplitude = 1000;
    for (n, value) in out.iter().enumerate() {
        expected_phase = expected_phase.wrapping_add(INCREMENT_TABLE_5);
        amplitude += amplitude_increment;
        let expected = multiply_32x32_rshift32_rounded(expected_phase as i32, amplitude);
        assert!(
            (value - expected).abs() <= 1,
            "sample {n}: got {value}, expected {expected}"
        );
    }
    assert_eq!(phase.phase, INCREMENT_TABLE_5.wrapping_mul(BLOCK_SIZE as u32));
}

#[test]
fn saw_end_to_end_table() {
    let number = table_number(INCREMENT_TABLE_8);
    assert_eq!(number.index, 8);
    let table = tables::saw_table(number.index).unwrap();

    let ctx = RenderContext::default();
    let amplitude = 1 << 30;
    let config = OscillatorRenderConfig::new(OscillatorType::Saw).with_amplitude(amplitude, 0);
    let mut phase = PhaseState::new(0, INCREMENT_TABLE_8);
    let mut out = [0; BLOCK_SIZE];

    render_oscillator(&ctx, &config, &mut phase, &mut out);

    let mut expected_phase = 0u32;
    for (n, value) in out.iter().enumerate() {
        expected_phase = expected_phase.wrapping_add(INCREMENT_TABLE_8);
        let expected = multiply_32x32_rshift32_rounded(table.value(expected_phase), amplitude);
        assert!(
            (value - expected).abs() <= 1,
            "sample {n}: got {value}, expected {expected}"
        );
    }
}

#[test]
fn cpu_direness_demotes_tables() {
    let increment = INCREMENT_TABLE_8;
    let config = OscillatorRenderConfig::new(OscillatorType::Saw);
    let mut phase = PhaseState::new(0, increment);
    let mut out = [0; 16];

    let dire = RenderContext::default().with_cpu_direness(4);
    render_oscillator(&dire, &config, &mut phase, &mut out);

    let mut expected_phase = 0u32;
    for value in out {
        expected_phase = expected_phase.wrapping_add(increment);
        assert_eq!(value, expected_phase as i32);
    }
}

#[test]
fn phase_continues_across_blocks() {
    let ctx = RenderContext::default();
    let config = OscillatorRenderConfig::new(OscillatorType::Sine);
    let increment = 0x1234_5678;

    let mut split = PhaseState::new(0xffff_0000, increment);
    let mut first = [0; 48];
    let mut second = [0; 80];
    render_oscillator(&ctx, &config, &mut split, &mut first);
    render_oscillator(&ctx, &config, &mut split, &mut second);

    let mut whole = PhaseState::new(0xffff_0000, increment);
    let mut out = [0; 128];
    render_oscillator(&ctx, &config, &mut whole, &mut out);

    assert_eq!(split, whole);
    assert_eq!(&out[..48], &first[..]);
    assert_eq!(&out[48..], &second[..]);
}

#[test]
fn square_pulse_width_moves_duty_cycle() {
    let ctx = RenderContext::default();
    let increment = 1 << 22;
    let mut out = [0; 1024];

    let mut phase = PhaseState::new(0, increment);
    render_oscillator(&ctx, &OscillatorRenderConfig::new(OscillatorType::Square), &mut phase, &mut out);
    assert_eq!(out.iter().filter(|&&v| v > 0).count(), 512);

    let config = OscillatorRenderConfig::new(OscillatorType::Square).with_pulse_width(1 << 30);
    let mut phase = PhaseState::new(0, increment);
    render_oscillator(&ctx, &config, &mut phase, &mut out);
    assert_eq!(out.iter().filter(|&&v| v > 0).count(), 768);
}

#[test]
fn quarter_pulse_mean_matches_crude_path() {
    // 64 samples per cycle, high for the first quarter.
    let increment = 1 << 26;
    let pulse_width = 3 << 30;
    let config = OscillatorRenderConfig::new(OscillatorType::Square).with_pulse_width(pulse_width);
    let mean = |ctx: &RenderContext| {
        let mut out = [0; 1024];
        render_oscillator(ctx, &config, &mut PhaseState::new(0, increment), &mut out);
        out.iter().map(|&v| v as i64).sum::<i64>() / out.len() as i64
    };

    let crude = mean(&RenderContext::default().with_cpu_direness(10));
    let table = mean(&RenderContext::default());
    assert!((crude + (1 << 30)).abs() <= 1, "{crude}");
    assert!((table - crude).abs() < (1 << 31) / 100, "table {table}, crude {crude}");
}

#[test]
fn sync_without_master_is_free_running() {
    let ctx = RenderContext::default();
    let increment = 50_000_000;

    let free = OscillatorRenderConfig::new(OscillatorType::Saw);
    let mut free_phase = PhaseState::new(0, increment);
    let mut free_out = [0; BLOCK_SIZE];
    render_oscillator(&ctx, &free, &mut free_phase, &mut free_out);

    let idle_master = free.with_sync(PhaseState::new(0, 0), 0);
    let mut phase = PhaseState::new(0, increment);
    let mut out = [0; BLOCK_SIZE];
    render_oscillator(&ctx, &idle_master, &mut phase, &mut out);

    assert_eq!(out, free_out);
    assert_eq!(phase, free_phase);
}

#[test]
fn sync_restarts_slave_cycle() {
    let ctx = RenderContext::default();
    let slave_increment = 50_000_000;
    let master = PhaseState::new(0, 1 << 26);

    let config = OscillatorRenderConfig::new(OscillatorType::Saw).with_sync(master, 0);
    let mut phase = PhaseState::new(0, slave_increment);
    let mut out = [0; BLOCK_SIZE];
    render_oscillator(&ctx, &config, &mut phase, &mut out);

    // The master wraps on the last sample of each half block, restarting
    // the slave at the bottom of its ramp.
    let free_running = slave_increment.wrapping_mul(BLOCK_SIZE as u32);
    assert_ne!(phase.phase, free_running);
    assert_eq!(phase.phase, SAW_SYNC_OFFSET.wrapping_add(1));
}

#[test]
fn overwrite_and_accumulate_modes() {
    let ctx = RenderContext::default();
    let increment = INCREMENT_TABLE_8;

    let mut out = [7; BLOCK_SIZE];
    let silent = OscillatorRenderConfig::new(OscillatorType::Triangle).with_amplitude(0, 0);
    render_oscillator(&ctx, &silent, &mut PhaseState::new(0, increment), &mut out);
    assert!(out.iter().all(|&v| v == 7));

    let overwrite = OscillatorRenderConfig::new(OscillatorType::Triangle);
    render_oscillator(&ctx, &overwrite, &mut PhaseState::new(0, increment), &mut out);
    assert!(out.iter().any(|&v| v > 1 << 30));
    assert!(out.iter().any(|&v| v < -(1 << 30)));
}

#[test]
fn accumulating_twice_doubles_output() {
    let ctx = RenderContext::default();
    let config = OscillatorRenderConfig::new(OscillatorType::Saw).with_amplitude(1 << 29, 0);

    let mut once = [0; BLOCK_SIZE];
    render_oscillator(&ctx, &config, &mut PhaseState::new(0, INCREMENT_TABLE_8), &mut once);

    let mut twice = [0; BLOCK_SIZE];
    for _ in 0..2 {
        render_oscillator(&ctx, &config, &mut PhaseState::new(0, INCREMENT_TABLE_8), &mut twice);
    }

    for (single, double) in once.iter().zip(&twice) {
        assert!((double - 2 * single).abs() <= 1);
    }
}

#[test]
fn zero_pulse_width_is_plain_square() {
    let ctx = RenderContext::default();
    let mut plain = [0; BLOCK_SIZE];
    let mut zero_width = [0; BLOCK_SIZE];
    for increment in [INCREMENT_TABLE_5, INCREMENT_TABLE_8] {
        let config = OscillatorRenderConfig::new(OscillatorType::Square);
        render_oscillator(&ctx, &config, &mut PhaseState::new(0, increment), &mut plain);
        let config = config.with_pulse_width(0);
        render_oscillator(&ctx, &config, &mut PhaseState::new(0, increment), &mut zero_width);
        assert_eq!(plain, zero_width);
    }
}

#[test]
fn wavetable_without_bank_is_silent() {
    let ctx = RenderContext::default();
    let config = OscillatorRenderConfig::new(OscillatorType::Wavetable);
    let mut phase = PhaseState::new(0, 1000);
    let mut out = [5; 32];
    render_oscillator(&ctx, &config, &mut phase, &mut out);
    assert!(out.iter().all(|&v| v == 0));
    assert_eq!(phase.phase, 32_000);
}

#[test]
fn wavetable_bank_rejects_bad_lengths() {
    assert!(WaveTableBank::from_samples(8, &[0; 300]).is_err());

    let ramp: Vec<i16> = (0..512).map(|i| ((i % 256) as i16 - 128) * 256).collect();
    let bank = WaveTableBank::from_samples(8, &ramp).unwrap();
    assert_eq!(bank.num_cycles(), 2);

    let ctx = RenderContext::default();
    let config = OscillatorRenderConfig::new(OscillatorType::Wavetable).with_wavetable(&bank, 0);
    let mut out = [0; 64];
    render_oscillator(&ctx, &config, &mut PhaseState::new(0, 1 << 24), &mut out);
    assert!(out.iter().any(|&v| v != 0));
}

#[test]
fn wavetable_position_moves_within_block() {
    // Cycle 0 holds half scale, cycle 1 minus half scale.
    let mut samples = vec![16_384i16; 256];
    samples.extend(std::iter::repeat(-16_384i16).take(256));
    let bank = WaveTableBank::from_samples(8, &samples).unwrap();
    let first = 1 << 30;
    let last = -(1 << 30);

    let ctx = RenderContext::default();
    let increment = (u32::MAX / (BLOCK_SIZE as u32 - 1)) as i32;
    let config =
        OscillatorRenderConfig::new(OscillatorType::Wavetable).with_wavetable_sweep(&bank, 0, increment);
    let mut out = [0; BLOCK_SIZE];
    render_oscillator(&ctx, &config, &mut PhaseState::new(0, 1 << 24), &mut out);

    assert_eq!(out[0], first);
    assert!(out[BLOCK_SIZE - 1] <= last + (1 << 16), "{}", out[BLOCK_SIZE - 1]);
    assert!(out.windows(2).all(|pair| pair[1] <= pair[0]));

    // Sweeping back down saturates at the first cycle.
    let config = OscillatorRenderConfig::new(OscillatorType::Wavetable).with_wavetable_sweep(
        &bank,
        1 << 20,
        -increment,
    );
    render_oscillator(&ctx, &config, &mut PhaseState::new(0, 1 << 24), &mut out);
    assert!(out[1..].iter().all(|&v| v == first));

    // A fixed position stays put for the whole block.
    let config =
        OscillatorRenderConfig::new(OscillatorType::Wavetable).with_wavetable(&bank, u32::MAX);
    render_oscillator(&ctx, &config, &mut PhaseState::new(0, 1 << 24), &mut out);
    assert!(out.iter().all(|&v| (v - last).abs() <= 1 << 16));
}

#[test]
fn oscillator_sweep() {
    let duration = 2.0;
    let sample_rate = SampleRate::default();
    let ctx = RenderContext::new(sample_rate);

    for osc_type in OscillatorType::ALL {
        let mut osc = Oscillator::new();
        let mut out = [0; BLOCK_SIZE];
        let mut wav_data = Vec::new();
        osc.init();

        let blocks = (duration * SAMPLE_RATE as f32 / BLOCK_SIZE as f32) as usize;

        for n in 0..blocks {
            let modulation = modulation::ramp_up(n, blocks);
            osc.set_frequency(55.0 * (modulation * 6.0).exp2(), &sample_rate);
            let pulse_width = (modulation::triangle(n, blocks, 4.0) * 0.5 * u32::MAX as f32) as u32;
            let config = OscillatorRenderConfig::new(osc_type).with_pulse_width(pulse_width);
            osc.render(&ctx, &config, &mut out);
            wav_data.extend_from_slice(&out);
        }

        wav_writer::write(&format!("oscillator/{osc_type:?}.wav"), &wav_data).ok();
    }
}

#[test]
fn digital_tables_start_at_index_six() {
    assert!(tables::saw_table(FIRST_DIGITAL_TABLE - 1).is_none());
    assert!(tables::saw_table(FIRST_DIGITAL_TABLE).is_some());
    assert!(tables::square_table(tables::NUM_TABLES).is_none());
}
