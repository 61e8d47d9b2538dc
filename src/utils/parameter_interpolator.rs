//! Linear interpolation of fixed-point parameters in rendering loops.

/// Steps a value by a constant increment per sample. The reached value is
/// written back to the borrowed state when the interpolator is dropped, so
/// the next block continues from where this one ended.
#[derive(Debug)]
pub struct ParameterInterpolator<'a> {
    state: &'a mut i32,
    value: i32,
    increment: i32,
}

impl<'a> ParameterInterpolator<'a> {
    /// Ramps from the current state by a caller supplied per-sample step.
    pub fn new_with_increment(state: &'a mut i32, increment: i32) -> Self {
        let v = *state;
        Self {
            state,
            value: v,
            increment,
        }
    }

    #[inline]
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> i32 {
        self.value = self.value.saturating_add(self.increment);
        self.value
    }

    #[inline]
    pub fn value(&self) -> i32 {
        self.value
    }
}

impl Drop for ParameterInterpolator<'_> {
    fn drop(&mut self) {
        *self.state = self.value;
    }
}
