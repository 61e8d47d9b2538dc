//! Control curves for sweeping parameters across a test render

/// Position `block_no` of `block_count`, rising from 0.0 towards 1.0.
#[allow(dead_code)]
pub fn ramp_up(block_no: usize, block_count: usize) -> f32 {
    block_no as f32 / block_count as f32
}

/// Unipolar triangle making `periods` round trips between 0.0 and 1.0.
#[allow(dead_code)]
pub fn triangle(block_no: usize, block_count: usize, periods: f32) -> f32 {
    let phase = (ramp_up(block_no, block_count) * periods).fract();
    1.0 - (2.0 * phase - 1.0).abs()
}
