//! Circular stereo buffer with an optional resampling cursor.

use alloc::boxed::Box;

use crate::dsp::{BufferAllocator, StereoSample};
use crate::utils::multiply_32x32_rshift32;
use crate::Error;

/// Two seconds at 44.1kHz.
pub const MAX_SIZE: usize = 88_200;
pub const MIN_SIZE: usize = 1;

/// Buffer size at unity rate.
pub const NEUTRAL_SIZE: usize = 16_384;

/// Distance the write cursor trails the read cursor by.
pub const SPACE_BETWEEN_READ_AND_WRITE: usize = 20;

/// Rate at which the buffer advances one cell per sample.
pub const UNITY_RATE: u32 = 1 << 24;

/// Buffer size for `rate`, clamped to [`MIN_SIZE`]..=[`MAX_SIZE`], and
/// whether clamping took place. A zero rate asks for the longest buffer.
pub fn ideal_buffer_size(rate: u32) -> (usize, bool) {
    if rate == 0 {
        return (MAX_SIZE, true);
    }
    let ideal = ((NEUTRAL_SIZE as u64) << 24) / rate as u64;
    if ideal > MAX_SIZE as u64 {
        (MAX_SIZE, true)
    } else if ideal < MIN_SIZE as u64 {
        (MIN_SIZE, true)
    } else {
        (ideal as usize, false)
    }
}

/// Rate at which a buffer of `size` cells covers the neutral delay time,
/// rounded to nearest.
pub fn native_rate_for_size(size: usize) -> u32 {
    let size = size.max(1) as u64;
    ((((NEUTRAL_SIZE as u64) << 24) + size / 2) / size).min(u32::MAX as u64) as u32
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Resample {
    /// Cells per sample, unity at [`UNITY_RATE`].
    spin_rate: u32,
}

/// Storage plus cursors of one delay buffer. Inactive while it owns no storage.
#[derive(Debug, Default)]
pub struct DelayBuffer {
    storage: Option<Box<[StereoSample]>>,
    current: usize,
    native_rate: u32,
    resample: Option<Resample>,
    long_pos: u32,
    last_short_pos: u8,
    pub(crate) generation: u32,
}

impl DelayBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates zeroed storage sized for `rate`.
    ///
    /// Fails with [`Error::SizeUnchanged`] when the size would equal
    /// `fail_if_size`, and leaves `self` untouched on any failure.
    pub fn init<A: BufferAllocator>(
        &mut self,
        rate: u32,
        allocator: &mut A,
        fail_if_size: Option<usize>,
    ) -> Result<(), Error> {
        let (size, clamped) = ideal_buffer_size(rate);
        if fail_if_size == Some(size) {
            return Err(Error::SizeUnchanged);
        }
        let storage = allocator.allocate::<StereoSample>(size)?;

        self.storage = Some(storage);
        self.current = 0;
        self.native_rate = if clamped {
            native_rate_for_size(size)
        } else {
            rate
        };
        self.resample = None;
        self.long_pos = 0;
        self.last_short_pos = 0;
        Ok(())
    }

    /// Releases the storage.
    pub fn discard(&mut self) {
        self.storage = None;
        self.resample = None;
    }

    pub fn is_active(&self) -> bool {
        self.storage.is_some()
    }

    pub fn size(&self) -> usize {
        self.storage.as_ref().map_or(0, |storage| storage.len())
    }

    pub fn native_rate(&self) -> u32 {
        self.native_rate
    }

    /// Replaces the requested rate with the one the actual size implies.
    pub fn make_native_rate_precise(&mut self) {
        if self.is_active() {
            self.native_rate = native_rate_for_size(self.size());
        }
    }

    /// Sets the native rate so this buffer spans the same time as `other`
    /// does at its own native rate.
    pub fn make_native_rate_precise_relative_to(&mut self, other: &DelayBuffer) {
        let size = self.size() as u64;
        if size == 0 || !other.is_active() {
            return;
        }
        let span = other.native_rate as u64 * other.size() as u64;
        self.native_rate = ((span + size / 2) / size).min(u32::MAX as u64) as u32;
    }

    pub fn is_resampling(&self) -> bool {
        self.resample.is_some()
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Buffer contents, empty while inactive.
    pub fn samples(&self) -> &[StereoSample] {
        self.storage.as_deref().unwrap_or(&[])
    }

    pub(crate) fn current(&self) -> StereoSample {
        self.samples().get(self.current).copied().unwrap_or_default()
    }

    fn next(&self) -> StereoSample {
        let samples = self.samples();
        if samples.is_empty() {
            return StereoSample::default();
        }
        samples[(self.current + 1) % samples.len()]
    }

    /// Chooses between native and resampled access for this block.
    pub fn setup_for_render(&mut self, rate: u32) {
        if rate == self.native_rate {
            self.resample = None;
            return;
        }
        let spin_rate = ((rate as u64) << 24) / self.native_rate.max(1) as u64;
        self.resample = Some(Resample {
            spin_rate: spin_rate.min(u32::MAX as u64) as u32,
        });
    }

    /// Zeroes the cell under the cursor and moves on. Returns whether the cursor wrapped.
    pub fn clear_and_move_on(&mut self) -> bool {
        let current = self.current;
        if let Some(storage) = self.storage.as_deref_mut() {
            storage[current] = StereoSample::default();
        }
        self.move_on()
    }

    pub fn move_on(&mut self) -> bool {
        let size = self.size();
        if size == 0 {
            return false;
        }
        self.current += 1;
        if self.current >= size {
            self.current = 0;
            true
        } else {
            false
        }
    }

    fn write_index(&self, from: usize) -> usize {
        let size = self.size().max(1);
        (from + size - SPACE_BETWEEN_READ_AND_WRITE % size) % size
    }

    /// Writes the cell the write cursor trails the read cursor at.
    pub fn write_native(&mut self, sample: StereoSample) {
        let index = self.write_index(self.current);
        if let Some(storage) = self.storage.as_deref_mut() {
            storage[index] = sample;
        }
    }

    /// Writes `samples` consecutively, starting behind a read position taken
    /// before the block was read.
    pub(crate) fn write_native_block(&mut self, read_start: usize, samples: &[StereoSample]) {
        let mut index = self.write_index(read_start);
        if let Some(storage) = self.storage.as_deref_mut() {
            for &sample in samples {
                storage[index] = sample;
                index += 1;
                if index == storage.len() {
                    index = 0;
                }
            }
        }
    }

    /// Moves the long position on by one output sample. Returns how many
    /// cells were crossed.
    pub(crate) fn advance(&mut self) -> u8 {
        let spin_rate = self.resample.map_or(UNITY_RATE, |r| r.spin_rate);
        self.long_pos = self.long_pos.wrapping_add(spin_rate);
        let short_pos = (self.long_pos >> 24) as u8;
        let crossed = short_pos.wrapping_sub(self.last_short_pos);
        self.last_short_pos = short_pos;
        crossed
    }

    /// Position between the current cell and the next, 0..65536.
    pub(crate) fn fraction(&self) -> i32 {
        ((self.long_pos >> 8) & 0xffff) as i32
    }

    pub(crate) fn cursor(&self) -> (usize, u32, u8) {
        (self.current, self.long_pos, self.last_short_pos)
    }

    pub(crate) fn restore_cursor(&mut self, (current, long_pos, last_short_pos): (usize, u32, u8)) {
        self.current = current;
        self.long_pos = long_pos;
        self.last_short_pos = last_short_pos;
    }

    /// Interpolated read between the current and the next cell.
    pub(crate) fn read_interpolated(&self, strength2: i32) -> StereoSample {
        let strength1 = 65536 - strength2;
        let a = self.current();
        let b = self.next();
        let mix = |x: i32, y: i32| {
            (multiply_32x32_rshift32(x, strength1 << 14) + multiply_32x32_rshift32(y, strength2 << 14))
                << 2
        };
        StereoSample::new(mix(a.l, b.l), mix(a.r, b.r))
    }

    /// Splits `sample` over the write cell and its neighbour. Cells the
    /// cursor skipped since the last write receive the whole sample.
    pub(crate) fn write_resampled(&mut self, sample: StereoSample, strength2: i32, skipped: u8) {
        let strength1 = 65536 - strength2;
        let index = self.write_index(self.current);
        let Some(storage) = self.storage.as_deref_mut() else {
            return;
        };
        let size = storage.len();
        let add = |cell: &mut StereoSample, strength: i32| {
            let scale = |x: i32| multiply_32x32_rshift32(x, strength << 14) << 2;
            cell.l = cell.l.saturating_add(scale(sample.l));
            cell.r = cell.r.saturating_add(scale(sample.r));
        };

        for back in 1..skipped as usize {
            let cell = &mut storage[(index + size - back % size) % size];
            cell.l = cell.l.saturating_add(sample.l);
            cell.r = cell.r.saturating_add(sample.r);
        }
        add(&mut storage[index], strength1);
        add(&mut storage[(index + 1) % size], strength2);
    }
}
