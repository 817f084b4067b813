//! FFT-based correlation of preprocessed batches.
//!
//! Image `k` of the experimental batch is correlated against image `k` of the
//! reference batch. Two modes:
//!
//! - **Translation**: masked normalised cross-correlation in the padded frame.
//!   With `a`, `b` the masked images and `ma`, `mb` their masks, every term
//!   `sum_p x(p + s) y(p)` is `ifft(X * conj(Y))(s)`:
//!
//!   ```text
//!   num(s) = [a.b] - [a.mb][ma.b] / [ma.mb]
//!   den(s) = ([a².mb] - [a.mb]² / [ma.mb]) * ([ma.b²] - [ma.b]² / [ma.mb])
//!   ncc(s) = num / sqrt(den)
//!   ```
//!
//!   The best shift `s` means `reference(p) ≈ experimental(p - s)`.
//!
//! - **Rotation**: correlation along the angle axis of the polar images,
//!   summed over radius rows and normalised with the polar sums and squared
//!   sums (the DC terms of the row spectra).
//!
//! Both peaks are refined below grid resolution by a parabolic fit.


use glam::DVec2;
use rayon::prelude::*;
use rustfft::num_complex::Complex64;

use crate::error::{Error, Result};
use crate::plan::{ComputePlan, POLAR_ANGLES};
use crate::preprocess::{PreprocessedBatch, Spectra};
use crate::transform::Transform;

/// Score of a pair that has not produced a valid correlation.
pub const NO_SCORE: f64 = -1.0;

/// Shifts whose mask overlap falls below this fraction of the mask are skipped.
const MIN_OVERLAP_FRACTION: f64 = 0.1;

/// Variances below this fraction of the squared sum count as flat.
const VARIANCE_EPSILON: f64 = 1e-9;

/// Best increment found for one reference/experimental pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Peak {
    /// Transform to apply after the current composite.
    pub increment: Transform,
    /// Normalised correlation at the peak, or [`NO_SCORE`].
    pub score: f64,
}

impl Peak {
    fn none() -> Self {
        Self {
            increment: Transform::identity(),
            score: NO_SCORE,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CorrelationEngine<'a> {
    plan: &'a ComputePlan,
}

impl<'a> CorrelationEngine<'a> {
    pub fn new(plan: &'a ComputePlan) -> Self {
        Self { plan }
    }

    /// Best shift per index, searched within `|dx|, |dy| <= max_shift`.
    pub fn translation(
        &self,
        reference: &PreprocessedBatch,
        experimental: &PreprocessedBatch,
        max_shift: f64,
    ) -> Result<Vec<Peak>> {
        check_counts(reference, experimental)?;
        let ref_spectra = reference
            .translation()
            .ok_or_else(|| missing_stage("reference", "translation"))?;
        let exp_spectra = experimental
            .translation()
            .ok_or_else(|| missing_stage("experimental", "translation"))?;

        let overlap = self.cross_2d(reference.mask_spectrum(), experimental.mask_spectrum());
        let window = SearchWindow::new(self.plan, max_shift);
        let min_overlap = MIN_OVERLAP_FRACTION * reference.mask_count().max(1) as f64;

        let peaks = ref_spectra
            .par_iter()
            .zip(exp_spectra.par_iter())
            .map(|(a, b)| {
                let surface = self.ncc_surface(
                    a,
                    b,
                    reference.mask_spectrum(),
                    experimental.mask_spectrum(),
                    &overlap,
                    &window,
                    min_overlap,
                );
                window.peak(&surface)
            })
            .collect();
        Ok(peaks)
    }

    /// Best in-plane rotation per index on a one-degree grid, refined.
    pub fn rotation(
        &self,
        reference: &PreprocessedBatch,
        experimental: &PreprocessedBatch,
    ) -> Result<Vec<Peak>> {
        check_counts(reference, experimental)?;
        let ref_spectra = reference
            .rotation()
            .ok_or_else(|| missing_stage("reference", "rotation"))?;
        let exp_spectra = experimental
            .rotation()
            .ok_or_else(|| missing_stage("experimental", "rotation"))?;
        let (_, rows) = reference.polar_dims();

        let peaks = ref_spectra
            .par_iter()
            .zip(exp_spectra.par_iter())
            .map(|(a, b)| self.rotation_peak(a, b, rows))
            .collect();
        Ok(peaks)
    }

    /// `ifft(x * conj(y))`, real part.
    fn cross_2d(&self, x: &[Complex64], y: &[Complex64]) -> Vec<f64> {
        let mut product: Vec<Complex64> = x.iter().zip(y).map(|(a, b)| a * b.conj()).collect();
        self.plan.ifft_2d(&mut product);
        product.iter().map(|c| c.re).collect()
    }

    #[allow(clippy::too_many_arguments)]
    fn ncc_surface(
        &self,
        a: &Spectra,
        b: &Spectra,
        ma: &[Complex64],
        mb: &[Complex64],
        overlap: &[f64],
        window: &SearchWindow,
        min_overlap: f64,
    ) -> Vec<f64> {
        let ab = self.cross_2d(&a.image, &b.image);
        let a_mb = self.cross_2d(&a.image, mb);
        let ma_b = self.cross_2d(ma, &b.image);
        let a2_mb = self.cross_2d(&a.squared, mb);
        let ma_b2 = self.cross_2d(ma, &b.squared);

        window
            .offsets()
            .map(|(sx, sy)| {
                let i = window.padded_index(sx, sy);
                let o = overlap[i].round();
                if o < min_overlap {
                    return f64::NEG_INFINITY;
                }
                let num = ab[i] - a_mb[i] * ma_b[i] / o;
                let var_a = a2_mb[i] - a_mb[i] * a_mb[i] / o;
                let var_b = ma_b2[i] - ma_b[i] * ma_b[i] / o;
                if is_flat(var_a, a2_mb[i]) || is_flat(var_b, ma_b2[i]) {
                    return f64::NEG_INFINITY;
                }
                num / (var_a * var_b).sqrt()
            })
            .collect()
    }

    fn rotation_peak(&self, a: &Spectra, b: &Spectra, rows: usize) -> Peak {
        let mut accumulated = vec![Complex64::new(0.0, 0.0); POLAR_ANGLES];
        for r in 0..rows {
            let row = r * POLAR_ANGLES..(r + 1) * POLAR_ANGLES;
            for (acc, (x, y)) in accumulated
                .iter_mut()
                .zip(a.image[row.clone()].iter().zip(&b.image[row]))
            {
                *acc += x * y.conj();
            }
        }
        self.plan.ifft_polar_row(&mut accumulated);

        let dc = |spectrum: &[Complex64]| -> f64 {
            (0..rows).map(|r| spectrum[r * POLAR_ANGLES].re).sum()
        };
        let n = (POLAR_ANGLES * rows) as f64;
        let (sum_a, sum_b) = (dc(&a.image), dc(&b.image));
        let (sq_a, sq_b) = (dc(&a.squared), dc(&b.squared));
        let var_a = sq_a - sum_a * sum_a / n;
        let var_b = sq_b - sum_b * sum_b / n;
        if is_flat(var_a, sq_a) || is_flat(var_b, sq_b) {
            return Peak::none();
        }
        let norm = (var_a * var_b).sqrt();
        let mean_term = sum_a * sum_b / n;
        let scores: Vec<f64> = accumulated
            .iter()
            .map(|c| (c.re - mean_term) / norm)
            .collect();

        let (best, &score) = scores
            .iter()
            .enumerate()
            .max_by(|x, y| x.1.total_cmp(y.1))
            .unwrap_or((0, &NO_SCORE));
        let left = scores[(best + POLAR_ANGLES - 1) % POLAR_ANGLES];
        let right = scores[(best + 1) % POLAR_ANGLES];
        let psi = wrap_degrees(best as f64 + parabolic_offset(left, score, right));

        Peak {
            increment: Transform::rotation(psi),
            score,
        }
    }
}

/// Shift grid searched by the translation mode.
#[derive(Debug, Clone, Copy)]
struct SearchWindow {
    limit_x: isize,
    limit_y: isize,
    padded_width: usize,
    padded_height: usize,
}

impl SearchWindow {
    fn new(plan: &ComputePlan, max_shift: f64) -> Self {
        let (width, height) = plan.image_dims();
        let (padded_width, padded_height) = plan.padded_dims();
        let limit = max_shift.floor().max(0.0) as isize;
        Self {
            limit_x: limit.min(width as isize - 1),
            limit_y: limit.min(height as isize - 1),
            padded_width,
            padded_height,
        }
    }

    #[inline]
    fn width(&self) -> usize {
        (2 * self.limit_x + 1) as usize
    }

    /// Shifts in row-major order over the window.
    fn offsets(&self) -> impl Iterator<Item = (isize, isize)> + '_ {
        (-self.limit_y..=self.limit_y)
            .flat_map(move |sy| (-self.limit_x..=self.limit_x).map(move |sx| (sx, sy)))
    }

    #[inline]
    fn padded_index(&self, sx: isize, sy: isize) -> usize {
        let x = sx.rem_euclid(self.padded_width as isize) as usize;
        let y = sy.rem_euclid(self.padded_height as isize) as usize;
        y * self.padded_width + x
    }

    fn peak(&self, surface: &[f64]) -> Peak {
        let Some((best, &score)) = surface
            .iter()
            .enumerate()
            .filter(|(_, v)| v.is_finite())
            .max_by(|x, y| x.1.total_cmp(y.1))
        else {
            return Peak::none();
        };

        let w = self.width();
        let (bx, by) = (best % w, best / w);
        let at = |x: usize, y: usize| surface[y * w + x];

        let mut dx = bx as f64 - self.limit_x as f64;
        let mut dy = by as f64 - self.limit_y as f64;
        if bx > 0 && bx + 1 < w {
            dx += parabolic_offset(at(bx - 1, by), score, at(bx + 1, by));
        }
        let rows = surface.len() / w;
        if by > 0 && by + 1 < rows {
            dy += parabolic_offset(at(bx, by - 1), score, at(bx, by + 1));
        }

        Peak {
            increment: Transform::translation(DVec2::new(dx, dy)),
            score,
        }
    }
}

/// Vertex offset of the parabola through three equally spaced samples.
fn parabolic_offset(left: f64, center: f64, right: f64) -> f64 {
    if !(left.is_finite() && right.is_finite()) {
        return 0.0;
    }
    let denom = 2.0 * (left + right - 2.0 * center);
    if denom.abs() > 1e-12 {
        ((left - right) / denom).clamp(-0.5, 0.5)
    } else {
        0.0
    }
}

#[inline]
fn is_flat(variance: f64, squared_sum: f64) -> bool {
    variance <= VARIANCE_EPSILON * squared_sum.abs().max(1.0)
}

/// Wrap an angle in degrees into `(-180, 180]`.
pub fn wrap_degrees(angle: f64) -> f64 {
    let wrapped = angle.rem_euclid(360.0);
    if wrapped > 180.0 {
        wrapped - 360.0
    } else {
        wrapped
    }
}

fn check_counts(reference: &PreprocessedBatch, experimental: &PreprocessedBatch) -> Result<()> {
    if reference.count() != experimental.count() {
        return Err(Error::Correlation(format!(
            "reference batch holds {} images, experimental batch {}",
            reference.count(),
            experimental.count()
        )));
    }
    if reference.padded_dims() != experimental.padded_dims() {
        return Err(Error::Correlation(format!(
            "padded dimensions differ: {:?} vs {:?}",
            reference.padded_dims(),
            experimental.padded_dims()
        )));
    }
    Ok(())
}

fn missing_stage(side: &str, stage: &str) -> Error {
    Error::Correlation(format!("{side} batch has no current {stage} spectra"))
}
