//! Renders a saw through the waveshaper and delay into a WAV file.

use simple_logger::SimpleLogger;

use q31_synth_dsp::dsp::fx::delay::{Delay, DelayWorkingState, UNITY_RATE};
use q31_synth_dsp::dsp::fx::table_shaper::{
    ShaperBlockParams, ShaperChannelState, ShaperSmoothing, TableShaper, TableShaperSettings,
};
use q31_synth_dsp::dsp::oscillator::tables::prepare_tables;
use q31_synth_dsp::dsp::oscillator::{Oscillator, OscillatorRenderConfig, OscillatorType};
use q31_synth_dsp::dsp::{RenderContext, StereoSample, BLOCK_SIZE, SAMPLE_RATE};
use q31_synth_dsp::utils::q31_to_f32;
use q31_synth_dsp::SampleRate;

const DURATION_SECONDS: usize = 4;
const NOTE_SECONDS: f32 = 0.5;

fn main() {
    SimpleLogger::new()
        .with_level(log::LevelFilter::Debug)
        .init()
        .unwrap();

    prepare_tables();

    let sample_rate = SampleRate::default();
    let ctx = RenderContext::new(sample_rate);

    let mut osc = Oscillator::new();
    osc.init();
    osc.set_frequency(110.0, &sample_rate);

    let settings = TableShaperSettings {
        shape_x: 80,
        shape_y: 300,
        ..Default::default()
    };
    let (mut builder, mut shaper) = TableShaper::new();
    builder.set_parameters(settings.derive_parameters());
    builder.regenerate_if_dirty().unwrap();

    let shaper_params = ShaperBlockParams {
        drive: 1 << 28,
        mix: i32::MAX,
        note_frequency_hz: 110.0,
        ..Default::default()
    };
    let mut smoothing = ShaperSmoothing::default();
    let mut left = ShaperChannelState::default();
    let mut right = ShaperChannelState::default();

    let mut delay = Delay::new();

    let spec = hound::WavSpec {
        channels: 2,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer = hound::WavWriter::create("render_demo.wav", spec).unwrap();

    let blocks = DURATION_SECONDS * SAMPLE_RATE as usize / BLOCK_SIZE;
    let note_blocks = (NOTE_SECONDS * SAMPLE_RATE as f32) as usize / BLOCK_SIZE;
    let config = OscillatorRenderConfig::new(OscillatorType::Saw).with_amplitude(1 << 27, 0);
    let mut mono = [0; BLOCK_SIZE];

    for n in 0..blocks {
        // One short note at the start, then the delay repeats fade out.
        let any_sound = n < note_blocks;
        mono.fill(0);
        if any_sound {
            osc.render(&ctx, &config, &mut mono);
        }

        let mut buffer: Vec<StereoSample> = mono.iter().map(|&s| StereoSample::mono(s)).collect();
        shaper.shape_block_stereo(&mut buffer, &shaper_params, &mut smoothing, &mut left, &mut right);

        let mut working = DelayWorkingState {
            user_delay_rate: UNITY_RATE as i32,
            delay_feedback_amount: 1 << 29,
            ..Default::default()
        };
        delay.setup_working_state(&mut working, 0, any_sound);
        delay.process(&mut buffer, &working, &ctx);

        for frame in &buffer {
            writer.write_sample(q31_to_f32(frame.l)).unwrap();
            writer.write_sample(q31_to_f32(frame.r)).unwrap();
        }
    }

    writer.finalize().unwrap();
    log::info!("Wrote render_demo.wav, delay state {:?}", delay.state());
}
