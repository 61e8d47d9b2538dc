//! Stereo feedback delay with on-demand buffer management.
//!
//! Memory is only held while the delay can be heard. Activation allocates a
//! secondary buffer sized for the requested rate and primes it. Once it holds
//! a full cycle it is promoted to primary and reading starts. When the
//! feedback tail has decayed for the number of repeats derived from the
//! feedback amount, both buffers are released again.

pub mod delay_buffer;

pub use delay_buffer::{
    ideal_buffer_size, native_rate_for_size, DelayBuffer, MAX_SIZE, MIN_SIZE, NEUTRAL_SIZE,
    SPACE_BETWEEN_READ_AND_WRITE, UNITY_RATE,
};

use crate::dsp::{BufferAllocator, HeapAllocator, RenderContext, StereoSample, BLOCK_SIZE, SAMPLE_RATE};
use crate::params::{ParamReader, ParamWriter, PersistentParams};
use crate::utils::{lshift_and_saturate, multiply_32x32_rshift32, signed_saturate};
use crate::Error;

/// Feedback below this never starts the delay.
pub const MIN_FEEDBACK: i32 = 256;

/// Writes a rebuffering secondary receives beyond its size before promotion.
pub const REBUFFER_EXTRA_WRITES: i32 = 5;

/// Abandon counter value that never counts down.
pub const REPEATS_PINNED: u8 = 255;

/// Repeats to keep sounding for a feedback amount, first matching row wins.
const ABANDON_THRESHOLDS: [(i32, u8); 13] = [
    (33_554_432, 1),
    (100_663_297, 2),
    (218_103_809, 3),
    (318_767_104, 4),
    (352_321_536, 5),
    (452_984_832, 6),
    (520_093_696, 9),
    (637_534_208, 12),
    (704_643_072, 13),
    (771_751_936, 18),
    (838_860_800, 24),
    (939_524_096, 40),
    (1_040_187_392, 110),
];

/// Number of repeats before a tail at `feedback` is judged inaudible.
pub fn repeats_for_feedback(feedback: i32) -> u8 {
    ABANDON_THRESHOLDS
        .iter()
        .find(|(limit, _)| feedback < *limit)
        .map_or(REPEATS_PINNED, |(_, repeats)| *repeats)
}

/// Note value the delay time is synced to.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SyncType {
    #[default]
    Even,
    Triplet,
    Dotted,
}

impl SyncType {
    fn from_index(index: i32) -> Self {
        match index {
            1 => SyncType::Triplet,
            2 => SyncType::Dotted,
            _ => SyncType::Even,
        }
    }

    fn index(self) -> i32 {
        self as i32
    }
}

/// Stored delay setup of a sound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DelayConfig {
    pub ping_pong: bool,
    pub analog: bool,
    /// Tempo sync resolution, 0 for free running, up to 9.
    pub sync_level: u8,
    pub sync_type: SyncType,
}

impl Default for DelayConfig {
    fn default() -> Self {
        Self {
            ping_pong: true,
            analog: false,
            sync_level: 0,
            sync_type: SyncType::Even,
        }
    }
}

pub const MAX_SYNC_LEVEL: u8 = 9;

impl PersistentParams for DelayConfig {
    fn write_params<W: ParamWriter>(&self, writer: &mut W) {
        writer.write_attribute("pingPong", self.ping_pong as i32);
        writer.write_attribute("analog", self.analog as i32);
        writer.write_attribute("syncLevel", self.sync_level as i32);
        writer.write_attribute("syncType", self.sync_type.index());
    }

    fn read_param<R: ParamReader>(&mut self, tag: &str, reader: &mut R) -> bool {
        match tag {
            "pingPong" => self.ping_pong = reader.read_value() != 0,
            "analog" => self.analog = reader.read_value() != 0,
            "syncLevel" => {
                self.sync_level = reader.read_value().clamp(0, MAX_SYNC_LEVEL as i32) as u8;
            }
            "syncType" => self.sync_type = SyncType::from_index(reader.read_value()),
            _ => return false,
        }
        true
    }
}

/// Per-block snapshot of the delay controls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayWorkingState {
    /// Set by [`Delay::setup_working_state`].
    pub do_delay: bool,
    /// Buffer cells per sample, unity at [`UNITY_RATE`].
    pub user_delay_rate: i32,
    /// Feedback in q31.
    pub delay_feedback_amount: i32,
    /// Headroom bits of the analog saturation.
    pub analog_saturation: u32,
}

impl Default for DelayWorkingState {
    fn default() -> Self {
        Self {
            do_delay: false,
            user_delay_rate: UNITY_RATE as i32,
            delay_feedback_amount: 0,
            analog_saturation: 8,
        }
    }
}

/// Lifecycle stage, derived from the buffers and the abandon counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelayState {
    Inactive,
    /// The secondary buffer is being filled, nothing is read yet.
    Priming,
    Active,
    /// No new input since the last repeat, counting down to release.
    Abandoning,
}

/// Cubic soft clip of a q31 value after `saturation` bits of gain, scaled back down.
fn soft_saturate(value: i32, saturation: u32) -> i32 {
    let saturation = saturation.min(30);
    let x = lshift_and_saturate(value, saturation);
    let x2 = multiply_32x32_rshift32(x, x).saturating_mul(2);
    let x3 = multiply_32x32_rshift32(x2, x).saturating_mul(2);
    // 1.5x - 0.5x³, written so no intermediate leaves the q31 range.
    let shaped = x.saturating_add((x >> 1) - (x3 >> 1));
    shaped >> saturation
}

/// Feedback delay owning a primary and a secondary buffer.
#[derive(Debug)]
pub struct Delay<A: BufferAllocator = HeapAllocator> {
    allocator: A,
    primary: DelayBuffer,
    secondary: DelayBuffer,
    size_left_until_buffer_swap: i32,
    repeats_until_abandon: u8,
    armed_repeats: u8,
    prev_feedback: i32,
    post_lpf: StereoSample,
    user_rate_last_time: i32,
    count_cycles_without_change: usize,
    generation: u32,
    pub config: DelayConfig,
    working: [StereoSample; BLOCK_SIZE],
}

impl Default for Delay<HeapAllocator> {
    fn default() -> Self {
        Self::new()
    }
}

impl Delay<HeapAllocator> {
    pub fn new() -> Self {
        Self::with_allocator(HeapAllocator)
    }
}

impl<A: BufferAllocator> Delay<A> {
    pub fn with_allocator(allocator: A) -> Self {
        Self {
            allocator,
            primary: DelayBuffer::new(),
            secondary: DelayBuffer::new(),
            size_left_until_buffer_swap: 0,
            repeats_until_abandon: 0,
            armed_repeats: 0,
            prev_feedback: 0,
            post_lpf: StereoSample::default(),
            user_rate_last_time: 0,
            count_cycles_without_change: 0,
            generation: 0,
            config: DelayConfig::default(),
            working: [StereoSample::default(); BLOCK_SIZE],
        }
    }

    pub fn allocator(&self) -> &A {
        &self.allocator
    }

    pub fn allocator_mut(&mut self) -> &mut A {
        &mut self.allocator
    }

    pub fn is_active(&self) -> bool {
        self.primary.is_active() || self.secondary.is_active()
    }

    pub fn state(&self) -> DelayState {
        if !self.is_active() {
            DelayState::Inactive
        } else if !self.primary.is_active() {
            DelayState::Priming
        } else if self.repeats_until_abandon < self.armed_repeats {
            DelayState::Abandoning
        } else {
            DelayState::Active
        }
    }

    pub fn primary(&self) -> &DelayBuffer {
        &self.primary
    }

    pub fn secondary(&self) -> &DelayBuffer {
        &self.secondary
    }

    pub fn repeats_until_abandon(&self) -> u8 {
        self.repeats_until_abandon
    }

    /// Samples the secondary buffer still needs before it is promoted.
    pub fn size_left_until_buffer_swap(&self) -> i32 {
        self.size_left_until_buffer_swap
    }

    fn init_secondary(&mut self, rate: i32, fail_if_size: Option<usize>) -> Result<(), Error> {
        let mut fresh = DelayBuffer::new();
        fresh.init(rate.max(0) as u32, &mut self.allocator, fail_if_size)?;
        log::debug!("delay buffer allocated, size {}", fresh.size());
        self.secondary = fresh;
        self.size_left_until_buffer_swap = self.secondary.size() as i32;
        Ok(())
    }

    /// Starts a replacement for a playing primary.
    ///
    /// A settled rate keeps the secondary at that rate and moves the
    /// primary's native rate to match it. Otherwise both native rates are
    /// taken from the buffer sizes.
    fn rebuffer(&mut self, rate: i32, settled: bool) -> Result<(), Error> {
        self.init_secondary(rate, Some(self.primary.size()))?;
        if settled {
            self.primary.make_native_rate_precise_relative_to(&self.secondary);
        } else {
            self.primary.make_native_rate_precise();
            self.secondary.make_native_rate_precise();
        }
        self.size_left_until_buffer_swap = self.secondary.size() as i32 + REBUFFER_EXTRA_WRITES;
        Ok(())
    }

    /// Starts or stops the delay. Starting allocates and primes a buffer
    /// for `rate`. On failure nothing changes and the error is returned.
    ///
    /// While nothing has been written yet, a rate that asks for a different
    /// size replaces the secondary buffer.
    pub fn inform_whether_active(&mut self, active: bool, rate: i32) -> Result<(), Error> {
        let was_active = self.is_active();
        if was_active != active {
            if !active {
                self.discard_buffers();
                return Ok(());
            }
            self.init_secondary(rate, None)
                .inspect_err(|e| log::warn!("delay activation failed: {}", e))?;
            self.post_lpf = StereoSample::default();
            return Ok(());
        }

        let untouched = !self.primary.is_active()
            && self.secondary.is_active()
            && self.size_left_until_buffer_swap == self.secondary.size() as i32;
        if was_active && untouched {
            let (ideal, _) = ideal_buffer_size(rate.max(0) as u32);
            if ideal != self.secondary.size() {
                log::debug!("delay buffer resized before writing");
                self.init_secondary(rate, None)
                    .inspect_err(|e| log::warn!("delay resize failed: {}", e))?;
            }
        }
        Ok(())
    }

    /// Arms the abandon counter from the feedback amount.
    pub fn set_time_to_abandon(&mut self, working: &DelayWorkingState) {
        self.repeats_until_abandon = if working.do_delay {
            repeats_for_feedback(working.delay_feedback_amount)
        } else {
            0
        };
        self.armed_repeats = self.repeats_until_abandon;
    }

    /// Counts one repeat down. Releases everything when the count runs out.
    pub fn has_wrapped(&mut self) {
        if self.repeats_until_abandon == 0 || self.repeats_until_abandon == REPEATS_PINNED {
            return;
        }
        self.repeats_until_abandon -= 1;
        if self.repeats_until_abandon == 0 {
            log::debug!("delay tail abandoned");
            self.discard_buffers();
        }
    }

    pub fn discard_buffers(&mut self) {
        self.primary.discard();
        self.secondary.discard();
        self.prev_feedback = 0;
        self.repeats_until_abandon = 0;
        self.armed_repeats = 0;
    }

    /// Rate after tempo sync, `tick_inverse` being the reciprocal of the
    /// tick length in 32-bit fixed point.
    fn synced_rate(&self, rate: i32, tick_inverse: u32) -> i32 {
        let level = self.config.sync_level.min(MAX_SYNC_LEVEL) as u32;
        if level == 0 {
            return rate;
        }
        let shift = level + 5;
        let rate = ((rate as i64 * tick_inverse as i64 + 0x8000_0000) >> 32) as i32;
        let rate = rate.min(i32::MAX >> shift);
        let rate = match self.config.sync_type {
            SyncType::Even => rate,
            SyncType::Triplet => rate.saturating_mul(3) / 2,
            SyncType::Dotted => rate.saturating_mul(2) / 3,
        };
        lshift_and_saturate(rate, shift)
    }

    /// Decides whether this block runs the delay, allocating or releasing
    /// buffers as needed, and fills in `working.do_delay`.
    pub fn setup_working_state(
        &mut self,
        working: &mut DelayWorkingState,
        tick_inverse: u32,
        any_sound_coming_in: bool,
    ) {
        let might_do_delay = working.delay_feedback_amount >= MIN_FEEDBACK
            && (any_sound_coming_in || self.repeats_until_abandon != 0);

        if might_do_delay {
            working.user_delay_rate = self.synced_rate(working.user_delay_rate, tick_inverse);
        }

        // Failure is logged inside and retried on the next block.
        self.inform_whether_active(might_do_delay, working.user_delay_rate).ok();
        working.do_delay = self.is_active();

        if working.do_delay {
            self.consider_rebuffering(working.user_delay_rate);
            if any_sound_coming_in || working.delay_feedback_amount != self.prev_feedback {
                self.set_time_to_abandon(working);
                self.prev_feedback = working.delay_feedback_amount;
            }
        }
    }

    /// Replaces a resampling primary buffer with one sized for the current
    /// rate once the rate settles, or sooner when it moved far off.
    fn consider_rebuffering(&mut self, rate: i32) {
        if rate != self.user_rate_last_time {
            self.user_rate_last_time = rate;
            self.count_cycles_without_change = 0;
        } else {
            self.count_cycles_without_change += BLOCK_SIZE;
        }

        if self.secondary.is_active() || !self.primary.is_active() {
            return;
        }
        let native = self.primary.native_rate() as i64;
        let requested = rate as i64;
        if !self.primary.is_resampling() && requested == native {
            return;
        }

        let result = if self.count_cycles_without_change >= (SAMPLE_RATE as usize >> 5) {
            self.rebuffer(rate, true)
        } else if requested >= native << 1 {
            self.rebuffer(rate, false)
        } else if requested < native >> 1 {
            self.rebuffer(rate >> 1, false)
        } else {
            Ok(())
        };
        match result {
            Ok(()) | Err(Error::SizeUnchanged) => {}
            Err(e) => log::warn!("delay rebuffering failed: {}", e),
        }
    }

    fn promote_secondary(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        let mut promoted = core::mem::take(&mut self.secondary);
        promoted.generation = self.generation;
        self.primary = promoted;
        log::debug!("delay buffer promoted, generation {}", self.generation);
    }

    /// Adds the delayed signal to `buffer` and records the new input.
    pub fn process(&mut self, buffer: &mut [StereoSample], working: &DelayWorkingState, ctx: &RenderContext) {
        if !working.do_delay {
            return;
        }
        for chunk in buffer.chunks_mut(BLOCK_SIZE) {
            self.process_chunk(chunk, working, ctx);
        }
    }

    fn process_chunk(&mut self, buffer: &mut [StereoSample], working: &DelayWorkingState, ctx: &RenderContext) {
        let rate = working.user_delay_rate.max(0) as u32;
        let n = buffer.len();
        let mut wrapped = false;

        self.primary.setup_for_render(rate);
        if self.secondary.is_active() {
            self.secondary.setup_for_render(rate);
        }

        let read_cursor = self.primary.cursor();
        let delayed = &mut self.working[..n];
        if !self.primary.is_active() {
            delayed.fill(StereoSample::default());
        } else if !self.primary.is_resampling() {
            for sample in delayed.iter_mut() {
                wrapped |= self.primary.clear_and_move_on();
                *sample = self.primary.current();
            }
        } else {
            for sample in delayed.iter_mut() {
                for _ in 0..self.primary.advance() {
                    wrapped |= self.primary.clear_and_move_on();
                }
                *sample = self.primary.read_interpolated(self.primary.fraction());
            }
        }

        let feedback = working.delay_feedback_amount;
        if self.config.analog {
            let saturation = working.analog_saturation;
            for sample in delayed.iter_mut() {
                let apply = |x: i32| {
                    lshift_and_saturate(soft_saturate(multiply_32x32_rshift32(x, feedback), saturation), 2)
                };
                *sample = StereoSample::new(apply(sample.l), apply(sample.r));
            }
        } else {
            for sample in delayed.iter_mut() {
                let apply = |x: i32| signed_saturate::<29>(multiply_32x32_rshift32(x, feedback)) << 2;
                *sample = StereoSample::new(apply(sample.l), apply(sample.r));
            }
        }

        // Highpass against DC build-up over many repeats.
        let lpf = &mut self.post_lpf;
        for sample in delayed.iter_mut() {
            lpf.l = lpf.l.saturating_add(sample.l.saturating_sub(lpf.l) >> 11);
            sample.l = sample.l.saturating_sub(lpf.l);
            lpf.r = lpf.r.saturating_add(sample.r.saturating_sub(lpf.r) >> 11);
            sample.r = sample.r.saturating_sub(lpf.r);
        }

        let ping_pong = self.config.ping_pong && ctx.render_in_stereo;
        for (input, output) in delayed.iter_mut().zip(buffer.iter_mut()) {
            let current = *input;
            if ping_pong {
                let mono = ((output.l as i64 + output.r as i64) >> 1) as i32;
                input.l = current.r;
                input.r = mono.saturating_add(current.l);
            } else {
                input.l = current.l.saturating_add(output.l);
                input.r = current.r.saturating_add(output.r);
            }
            output.l = output.l.saturating_add(current.l);
            output.r = output.r.saturating_add(current.r);
        }

        let delayed = &self.working[..n];
        if self.primary.is_active() {
            if !self.primary.is_resampling() {
                self.primary.write_native_block(read_cursor.0, delayed);
            } else {
                self.primary.restore_cursor(read_cursor);
                for &sample in delayed {
                    let crossed = self.primary.advance();
                    for _ in 0..crossed {
                        self.primary.move_on();
                    }
                    let fraction = self.primary.fraction();
                    self.primary.write_resampled(sample, fraction, crossed);
                }
            }
        }

        if self.secondary.is_active() {
            wrapped = false;
            let resampling = self.secondary.is_resampling();
            for &sample in delayed {
                if self.size_left_until_buffer_swap <= 0 {
                    break;
                }
                if !resampling {
                    wrapped |= self.secondary.clear_and_move_on();
                    self.size_left_until_buffer_swap -= 1;
                    self.secondary.write_native(sample);
                } else {
                    let crossed = self.secondary.advance();
                    for _ in 0..crossed {
                        wrapped |= self.secondary.clear_and_move_on();
                        self.size_left_until_buffer_swap -= 1;
                    }
                    let fraction = self.secondary.fraction();
                    self.secondary.write_resampled(sample, fraction, crossed);
                }
            }
            if self.size_left_until_buffer_swap <= 0 {
                self.promote_secondary();
            }
        }

        if wrapped {
            self.has_wrapped();
        }
    }
}
