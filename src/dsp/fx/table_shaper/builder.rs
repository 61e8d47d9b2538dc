//! Control side of the waveshaper: parameter changes and table builds.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::Ordering;

use super::transfer::build_table;
use super::{
    allocate_table, ShaperCoefficients, SharedTables, TableShaperParams, ABSENT, ACTIVE_INDEX,
    LINEAR, READING, TABLE_LEN,
};
use crate::Error;

/// Outcome of [`ShaperBuilder::regenerate_if_dirty`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Regeneration {
    /// Nothing changed since the last build.
    Clean,
    /// The curve is a straight line and the processor now bypasses.
    Linear,
    /// A new table was written and published.
    Published { index: usize },
    /// The table to write is still pinned by a processor block. Try again later.
    Deferred,
}

/// Builds and publishes tables. Runs outside the audio context.
#[derive(Debug)]
pub struct ShaperBuilder {
    shared: Arc<SharedTables>,
    params: TableShaperParams,
    dirty: bool,
    coefficients: ShaperCoefficients,
    scratch: Vec<f32>,
}

impl ShaperBuilder {
    pub(crate) fn new(shared: Arc<SharedTables>) -> Self {
        Self {
            shared,
            params: TableShaperParams::default(),
            dirty: false,
            coefficients: ShaperCoefficients::default(),
            scratch: Vec::new(),
        }
    }

    /// Applies a parameter set, clamped to the valid ranges. Returns whether
    /// it differs from the current one, in which case a rebuild is pending.
    pub fn set_parameters(&mut self, params: TableShaperParams) -> bool {
        let params = params.clamped();
        if params == self.params {
            return false;
        }
        self.params = params;
        self.dirty = true;
        true
    }

    pub fn parameters(&self) -> &TableShaperParams {
        &self.params
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Coefficients of the last applied parameter set.
    pub fn coefficients(&self) -> &ShaperCoefficients {
        &self.coefficients
    }

    /// Sets the peak the input is expected to reach, so that it spans the
    /// table after scaling. Defaults to [`DEFAULT_EXPECTED_PEAK`](super::DEFAULT_EXPECTED_PEAK).
    pub fn set_expected_peak(&mut self, peak: i32) {
        let peak = peak.max(1);
        let shift = (peak.leading_zeros() + 2).min(30);
        self.shared
            .input_scale_shift
            .store(shift, Ordering::Relaxed);
    }

    pub fn has_allocated_tables(&self) -> bool {
        self.shared.state.load(Ordering::Acquire) & ABSENT == 0
    }

    /// Allocates both tables if they were released or never allocated.
    pub fn ensure_buffers_allocated(&mut self) -> Result<(), Error> {
        if self.scratch.len() < TABLE_LEN {
            self.scratch
                .try_reserve_exact(TABLE_LEN - self.scratch.len())
                .map_err(|_| Error::OutOfMemory {
                    requested: TABLE_LEN,
                })?;
            self.scratch.resize(TABLE_LEN, 0.0);
        }

        if self.has_allocated_tables() {
            return Ok(());
        }
        let first = allocate_table()?;
        let second = allocate_table()?;
        // SAFETY: storage is marked absent, so the processor bypasses both slots.
        unsafe {
            self.shared.slot_mut(0).table = Some(first);
            self.shared.slot_mut(1).table = Some(second);
        }
        self.shared.state.fetch_and(!ABSENT, Ordering::Release);
        log::debug!("table shaper storage allocated");
        Ok(())
    }

    /// Frees both tables while the shaper is bypassed. Returns `false` when
    /// the curve is not linear or a block still holds a table.
    pub fn release_tables(&mut self) -> bool {
        let released = self
            .shared
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |state| {
                let idle = state & (READING[0] | READING[1]) == 0;
                (state & LINEAR != 0 && state & ABSENT == 0 && idle).then_some(state | ABSENT)
            });
        if released.is_err() {
            return false;
        }
        // SAFETY: storage is marked absent and no reader was active.
        unsafe {
            self.shared.slot_mut(0).table = None;
            self.shared.slot_mut(1).table = None;
        }
        log::debug!("table shaper storage released");
        true
    }

    /// Rebuilds and publishes the table if the parameters changed.
    pub fn regenerate_if_dirty(&mut self) -> Result<Regeneration, Error> {
        if !self.dirty {
            return Ok(Regeneration::Clean);
        }

        let coefficients = ShaperCoefficients::from_params(&self.params);

        if self.params.is_linear() {
            self.coefficients = coefficients;
            self.shared.state.fetch_or(LINEAR, Ordering::Release);
            self.dirty = false;
            log::trace!("table shaper linear");
            return Ok(Regeneration::Linear);
        }

        self.ensure_buffers_allocated()?;

        let state = self.shared.state.load(Ordering::Acquire);
        let target = 1 - (state & ACTIVE_INDEX) as usize;
        if state & READING[target] != 0 {
            return Ok(Regeneration::Deferred);
        }

        // SAFETY: `target` is not published and its reading bit is clear.
        // The processor only pins the published index, which only this
        // builder changes.
        let slot = unsafe { self.shared.slot_mut(target) };
        if slot.table.is_none() {
            slot.table = Some(allocate_table()?);
        }
        if let Some(table) = slot.table.as_deref_mut() {
            build_table(&self.params, &mut self.scratch, table);
        }
        slot.coefficients = coefficients;

        let published = self
            .shared
            .state
            .fetch_update(Ordering::Release, Ordering::Relaxed, |state| {
                Some((state & !(ACTIVE_INDEX | LINEAR)) | target as u32)
            });
        debug_assert!(published.is_ok());

        self.coefficients = coefficients;
        self.dirty = false;
        log::trace!("table shaper published table {}", target);
        Ok(Regeneration::Published { index: target })
    }
}
