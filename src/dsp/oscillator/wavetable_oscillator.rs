//! Wavetable banks made of user supplied single-cycle waveforms.

use alloc::vec::Vec;

use super::shapes::WaveShape;
use super::tables::WaveTable;
use crate::Error;

/// Ordered set of equally sized cycles to morph across.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaveTableBank {
    cycles: Vec<WaveTable>,
}

impl WaveTableBank {
    /// Splits `samples` into consecutive cycles of `2^magnitude` samples each.
    pub fn from_samples(magnitude: u8, samples: &[i16]) -> Result<Self, Error> {
        if !(1..=16).contains(&magnitude) {
            return Err(Error::InvalidTableLength { len: samples.len() });
        }
        let cycle_len = 1usize << magnitude;
        if samples.is_empty() || samples.len() % cycle_len != 0 {
            return Err(Error::InvalidTableLength { len: samples.len() });
        }
        let cycles = samples
            .chunks_exact(cycle_len)
            .map(|cycle| WaveTable::from_cycle(magnitude, cycle))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { cycles })
    }

    pub fn num_cycles(&self) -> usize {
        self.cycles.len()
    }

    pub fn cycles(&self) -> &[WaveTable] {
        &self.cycles
    }
}

/// Bank read at a morph position that moves by a fixed step every sample.
#[derive(Debug, Clone, Copy)]
pub struct WavetableMorph<'a> {
    cycles: &'a [WaveTable],
    position: u32,
    position_increment: i32,
}

impl<'a> WavetableMorph<'a> {
    /// `position` spans the bank, 0 being the first and `u32::MAX` the last
    /// cycle. It moves by `position_increment` after each sample, saturating
    /// at either end.
    pub fn new(bank: &'a WaveTableBank, position: u32, position_increment: i32) -> Self {
        Self {
            cycles: &bank.cycles,
            position,
            position_increment,
        }
    }

    pub fn position(&self) -> u32 {
        self.position
    }
}

impl WaveShape for WavetableMorph<'_> {
    #[inline]
    fn value(&self, phase: u32) -> i32 {
        let last = self.cycles.len() - 1;
        let scaled = self.position as u64 * last as u64;
        let index = ((scaled >> 32) as usize).min(last);
        let fraction = ((scaled >> 16) & 0xffff) as i64;

        let a = self.cycles[index].value(phase) as i64;
        if fraction == 0 {
            return a as i32;
        }
        let b = self.cycles[(index + 1).min(last)].value(phase) as i64;
        (a + (((b - a) * fraction) >> 16)) as i32
    }

    #[inline]
    fn step(&mut self) {
        self.position = self.position.saturating_add_signed(self.position_increment);
    }
}
