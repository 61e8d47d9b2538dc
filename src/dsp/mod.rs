//! Top-level module for all code running on the audio path.

pub mod fx;
pub mod oscillator;

use alloc::boxed::Box;
use alloc::vec::Vec;

use crate::{Error, SampleRate};

/// Audio sample rate in Hz.
pub const SAMPLE_RATE: u32 = 44_100;

/// Number of samples rendered per block.
pub const BLOCK_SIZE: usize = 128;

/// One frame of a stereo q31 signal.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StereoSample {
    pub l: i32,
    pub r: i32,
}

impl StereoSample {
    pub const fn new(l: i32, r: i32) -> Self {
        Self { l, r }
    }

    pub const fn mono(value: i32) -> Self {
        Self { l: value, r: value }
    }
}

/// Per-block rendering context handed to every call that depends on engine state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderContext {
    pub sample_rate: SampleRate,

    /// Load hint, 0 when there is plenty of headroom. Higher values make the
    /// renderers pick cheaper approximations.
    pub cpu_direness: u8,

    /// Whether stereo-only processing like ping-pong feedback applies.
    pub render_in_stereo: bool,
}

impl RenderContext {
    pub fn new(sample_rate: SampleRate) -> Self {
        Self {
            sample_rate,
            cpu_direness: 0,
            render_in_stereo: true,
        }
    }

    pub fn with_cpu_direness(mut self, cpu_direness: u8) -> Self {
        self.cpu_direness = cpu_direness;
        self
    }

    pub fn with_stereo(mut self, render_in_stereo: bool) -> Self {
        self.render_in_stereo = render_in_stereo;
        self
    }
}

impl Default for RenderContext {
    fn default() -> Self {
        Self::new(SampleRate::default())
    }
}

/// Source of zeroed sample buffers.
///
/// Embedded targets plug in a pool that never blocks. Failure must be
/// reported as [`Error::OutOfMemory`] and leave the allocator usable.
pub trait BufferAllocator {
    fn allocate<T: Copy + Default>(&mut self, len: usize) -> Result<Box<[T]>, Error>;
}

/// Allocator backed by the global heap, failing gracefully instead of aborting.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeapAllocator;

impl BufferAllocator for HeapAllocator {
    fn allocate<T: Copy + Default>(&mut self, len: usize) -> Result<Box<[T]>, Error> {
        allocate_buffer(len)
    }
}

/// Allocate a zeroed buffer with a given number of elements.
pub fn allocate_buffer<T: Copy + Default>(buffer_length: usize) -> Result<Box<[T]>, Error> {
    let mut buffer = Vec::new();
    buffer
        .try_reserve_exact(buffer_length)
        .map_err(|_| Error::OutOfMemory {
            requested: buffer_length,
        })?;
    buffer.resize(buffer_length, T::default());

    Ok(buffer.into_boxed_slice())
}
