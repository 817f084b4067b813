//! FFT compute plans scoped to image dimensions and batch size.

use std::sync::Arc;

use rustfft::num_complex::Complex64;
use rustfft::{Fft, FftPlanner};

/// Angular samples of the polar resampling, one per degree.
pub const POLAR_ANGLES: usize = 360;

/// Cached forward/inverse plans for the padded 2D transform and the polar rows.
///
/// Acquired for one `(width, height, batch)` context and released explicitly;
/// the pipeline rebuilds it when the batch size changes.
pub struct ComputePlan {
    width: usize,
    height: usize,
    batch: usize,
    padded: (usize, usize),
    polar: (usize, usize),
    row_forward: Arc<dyn Fft<f64>>,
    row_inverse: Arc<dyn Fft<f64>>,
    col_forward: Arc<dyn Fft<f64>>,
    col_inverse: Arc<dyn Fft<f64>>,
    polar_forward: Arc<dyn Fft<f64>>,
    polar_inverse: Arc<dyn Fft<f64>>,
}

impl std::fmt::Debug for ComputePlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComputePlan")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("batch", &self.batch)
            .field("padded", &self.padded)
            .field("polar", &self.polar)
            .finish()
    }
}

impl ComputePlan {
    /// Plan transforms for `width x height` images, padded to `(2W-1) x (2H-1)`,
    /// and polar images of `360 x polar_radius`.
    pub fn acquire(width: usize, height: usize, polar_radius: usize, batch: usize) -> Self {
        let padded = (2 * width - 1, 2 * height - 1);
        let polar = (POLAR_ANGLES, polar_radius);

        let mut planner = FftPlanner::new();
        let plan = Self {
            width,
            height,
            batch,
            padded,
            polar,
            row_forward: planner.plan_fft_forward(padded.0),
            row_inverse: planner.plan_fft_inverse(padded.0),
            col_forward: planner.plan_fft_forward(padded.1),
            col_inverse: planner.plan_fft_inverse(padded.1),
            polar_forward: planner.plan_fft_forward(POLAR_ANGLES),
            polar_inverse: planner.plan_fft_inverse(POLAR_ANGLES),
        };
        tracing::debug!("Acquired {:?}", plan);
        plan
    }

    pub fn release(self) {
        tracing::debug!("Released compute plan for batch of {}", self.batch);
    }

    #[inline]
    pub fn image_dims(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    #[inline]
    pub fn batch(&self) -> usize {
        self.batch
    }

    #[inline]
    pub fn padded_dims(&self) -> (usize, usize) {
        self.padded
    }

    #[inline]
    pub fn padded_len(&self) -> usize {
        self.padded.0 * self.padded.1
    }

    #[inline]
    pub fn polar_dims(&self) -> (usize, usize) {
        self.polar
    }

    #[inline]
    pub fn polar_len(&self) -> usize {
        self.polar.0 * self.polar.1
    }

    /// In-place forward 2D transform of a padded image.
    pub fn fft_2d(&self, data: &mut [Complex64]) {
        self.transform_2d(data, &self.row_forward, &self.col_forward);
    }

    /// In-place inverse 2D transform of a padded spectrum, normalised.
    pub fn ifft_2d(&self, data: &mut [Complex64]) {
        self.transform_2d(data, &self.row_inverse, &self.col_inverse);
        let norm = 1.0 / self.padded_len() as f64;
        data.iter_mut().for_each(|c| *c *= norm);
    }

    /// In-place forward transform of every angular row of a polar image.
    pub fn fft_polar_rows(&self, data: &mut [Complex64]) {
        debug_assert_eq!(data.len() % POLAR_ANGLES, 0);
        self.polar_forward.process(data);
    }

    /// In-place inverse transform of one angular row, normalised.
    pub fn ifft_polar_row(&self, row: &mut [Complex64]) {
        debug_assert_eq!(row.len(), POLAR_ANGLES);
        self.polar_inverse.process(row);
        let norm = 1.0 / POLAR_ANGLES as f64;
        row.iter_mut().for_each(|c| *c *= norm);
    }

    fn transform_2d(&self, data: &mut [Complex64], rows: &Arc<dyn Fft<f64>>, cols: &Arc<dyn Fft<f64>>) {
        let (w, h) = self.padded;
        debug_assert_eq!(data.len(), w * h);

        // Row-column decomposition: rows, transpose, rows, transpose back.
        rows.process(data);
        let mut transposed = transpose(data, w, h);
        cols.process(&mut transposed);
        data.copy_from_slice(&transpose(&transposed, h, w));
    }
}

/// Transpose a row-major `width x height` matrix into `height x width`.
pub fn transpose(data: &[Complex64], width: usize, height: usize) -> Vec<Complex64> {
    let mut out = vec![Complex64::new(0.0, 0.0); data.len()];
    for y in 0..height {
        for x in 0..width {
            out[x * height + y] = data[y * width + x];
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_padded_and_polar_dims() {
        let plan = ComputePlan::acquire(32, 24, 10, 4);
        assert_eq!(plan.padded_dims(), (63, 47));
        assert_eq!(plan.polar_dims(), (360, 10));
        assert_eq!(plan.batch(), 4);
        plan.release();
    }

    #[test]
    fn test_transpose_non_square() {
        let data: Vec<Complex64> = (0..6).map(|i| Complex64::new(i as f64, 0.0)).collect();
        // 3 wide, 2 high: [0 1 2; 3 4 5] -> [0 3; 1 4; 2 5]
        let t = transpose(&data, 3, 2);
        let re: Vec<f64> = t.iter().map(|c| c.re).collect();
        assert_eq!(re, vec![0.0, 3.0, 1.0, 4.0, 2.0, 5.0]);
    }

    #[test]
    fn test_fft_2d_round_trip() {
        let plan = ComputePlan::acquire(4, 3, 1, 1);
        let original: Vec<Complex64> = (0..plan.padded_len())
            .map(|i| Complex64::new((i as f64 * 0.37).sin(), 0.0))
            .collect();

        let mut data = original.clone();
        plan.fft_2d(&mut data);
        // DC term is the plain sum.
        let sum: f64 = original.iter().map(|c| c.re).sum();
        assert!((data[0].re - sum).abs() < 1e-9);

        plan.ifft_2d(&mut data);
        for (a, b) in data.iter().zip(&original) {
            assert!((a - b).norm() < 1e-12);
        }
    }

    #[test]
    fn test_fft_2d_of_impulse_is_flat() {
        let plan = ComputePlan::acquire(3, 3, 1, 1);
        let mut data = vec![Complex64::new(0.0, 0.0); plan.padded_len()];
        data[0] = Complex64::new(1.0, 0.0);
        plan.fft_2d(&mut data);
        assert!(data.iter().all(|c| (c - Complex64::new(1.0, 0.0)).norm() < 1e-12));
    }
}
