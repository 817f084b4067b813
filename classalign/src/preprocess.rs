//! Mask, pad, polar-resample and transform image batches for correlation.
//!
//! Every image of a batch yields:
//! - the masked image zero-padded to `(2W-1) x (2H-1)` and its square, both
//!   forward transformed (translation stage);
//! - the masked image resampled to `360 x R1` polar samples and its square,
//!   each angular row forward transformed (rotation stage).
//!
//! The padded mask spectrum is shared by the whole batch and computed once per
//! [`PreprocessedBatch`].

use rayon::prelude::*;
use rustfft::num_complex::Complex64;

use crate::error::{Error, Result};
use crate::image::{bilinear_sample, image_center, BorderMode, ImageBatch};
use crate::mask::CircularMask;
use crate::plan::{ComputePlan, POLAR_ANGLES};

/// Which degree of freedom a spectrum set serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Translation,
    Rotation,
}

/// Stages computed by a full preprocessing call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stages {
    Both,
    Only(Stage),
}

impl Stages {
    #[inline]
    pub fn includes(self, stage: Stage) -> bool {
        match self {
            Stages::Both => true,
            Stages::Only(only) => only == stage,
        }
    }
}

/// Spectrum of an image and of its elementwise square.
#[derive(Debug, Clone)]
pub struct Spectra {
    pub image: Vec<Complex64>,
    pub squared: Vec<Complex64>,
}

/// Correlation-ready form of one image batch.
#[derive(Debug, Clone)]
pub struct PreprocessedBatch {
    count: usize,
    padded_dims: (usize, usize),
    polar_dims: (usize, usize),
    mask_count: usize,
    mask_spectrum: Vec<Complex64>,
    translation: Option<Vec<Spectra>>,
    rotation: Option<Vec<Spectra>>,
}

impl PreprocessedBatch {
    #[inline]
    pub fn count(&self) -> usize {
        self.count
    }

    #[inline]
    pub fn padded_dims(&self) -> (usize, usize) {
        self.padded_dims
    }

    #[inline]
    pub fn polar_dims(&self) -> (usize, usize) {
        self.polar_dims
    }

    #[inline]
    pub fn mask_count(&self) -> usize {
        self.mask_count
    }

    #[inline]
    pub fn mask_spectrum(&self) -> &[Complex64] {
        &self.mask_spectrum
    }

    /// Padded image spectra, if the translation stage is current.
    pub fn translation(&self) -> Option<&[Spectra]> {
        self.translation.as_deref()
    }

    /// Polar row spectra, if the rotation stage is current.
    pub fn rotation(&self) -> Option<&[Spectra]> {
        self.rotation.as_deref()
    }
}

/// Entry points of the batch preprocessor.
#[derive(Debug, Clone, Copy)]
pub struct Preprocessor<'a> {
    plan: &'a ComputePlan,
    mask: &'a CircularMask,
}

impl<'a> Preprocessor<'a> {
    pub fn new(plan: &'a ComputePlan, mask: &'a CircularMask) -> Self {
        debug_assert_eq!(plan.image_dims(), (mask.width(), mask.height()));
        Self { plan, mask }
    }

    /// Full preprocessing of new image content.
    pub fn prepare(&self, batch: &ImageBatch, stages: Stages) -> Result<PreprocessedBatch> {
        self.check_dims(batch)?;

        let mut prepared = PreprocessedBatch {
            count: batch.count(),
            padded_dims: self.plan.padded_dims(),
            polar_dims: self.plan.polar_dims(),
            mask_count: self.mask.count(),
            mask_spectrum: self.mask_spectrum(),
            translation: None,
            rotation: None,
        };
        if stages.includes(Stage::Translation) {
            prepared.translation = Some(self.translation_spectra(batch));
        }
        if stages.includes(Stage::Rotation) {
            prepared.rotation = Some(self.rotation_spectra(batch));
        }
        Ok(prepared)
    }

    /// Re-project a transformed batch in place, computing only `stage`.
    ///
    /// The other stage is dropped since it no longer describes the batch. The
    /// mask spectrum is kept.
    pub fn reproject(
        &self,
        prepared: &mut PreprocessedBatch,
        batch: &ImageBatch,
        stage: Stage,
    ) -> Result<()> {
        self.check_dims(batch)?;
        if batch.count() != prepared.count {
            return Err(Error::Correlation(format!(
                "re-projected batch holds {} images, prepared batch {}",
                batch.count(),
                prepared.count
            )));
        }

        match stage {
            Stage::Translation => {
                prepared.translation = Some(self.translation_spectra(batch));
                prepared.rotation = None;
            }
            Stage::Rotation => {
                prepared.rotation = Some(self.rotation_spectra(batch));
                prepared.translation = None;
            }
        }
        Ok(())
    }

    fn check_dims(&self, batch: &ImageBatch) -> Result<()> {
        let expected = self.plan.image_dims();
        let actual = (batch.width(), batch.height());
        if expected != actual {
            return Err(Error::DimensionMismatch {
                id: "batch".to_string(),
                expected,
                actual,
            });
        }
        Ok(())
    }

    fn mask_spectrum(&self) -> Vec<Complex64> {
        let mut padded = self.pad(self.mask.values(), |m, _| m);
        self.plan.fft_2d(&mut padded);
        padded
    }

    fn translation_spectra(&self, batch: &ImageBatch) -> Vec<Spectra> {
        let mask = self.mask.values();
        batch
            .data()
            .par_chunks_exact(batch.image_len())
            .map(|pixels| {
                let mut image = self.pad(pixels, |v, i| v * mask[i]);
                let mut squared = self.pad(pixels, |v, i| v * v * mask[i]);
                self.plan.fft_2d(&mut image);
                self.plan.fft_2d(&mut squared);
                Spectra { image, squared }
            })
            .collect()
    }

    fn rotation_spectra(&self, batch: &ImageBatch) -> Vec<Spectra> {
        let (width, height) = self.plan.image_dims();
        let mask = self.mask.values();
        let angles = polar_angle_table();

        batch
            .data()
            .par_chunks_exact(batch.image_len())
            .map(|pixels| {
                let masked: Vec<f64> = pixels.iter().zip(mask).map(|(v, m)| v * m).collect();
                let polar = polar_resample(&masked, width, height, self.mask.polar_radius(), &angles);

                let mut image: Vec<Complex64> =
                    polar.iter().map(|&v| Complex64::new(v, 0.0)).collect();
                let mut squared: Vec<Complex64> =
                    polar.iter().map(|&v| Complex64::new(v * v, 0.0)).collect();
                self.plan.fft_polar_rows(&mut image);
                self.plan.fft_polar_rows(&mut squared);
                Spectra { image, squared }
            })
            .collect()
    }

    /// Zero-pad an image into the top-left corner of the padded frame.
    fn pad(&self, pixels: &[f64], value: impl Fn(f64, usize) -> f64) -> Vec<Complex64> {
        let (width, height) = self.plan.image_dims();
        let (padded_width, _) = self.plan.padded_dims();
        let mut padded = vec![Complex64::new(0.0, 0.0); self.plan.padded_len()];
        for y in 0..height {
            for x in 0..width {
                let i = y * width + x;
                padded[y * padded_width + x] = Complex64::new(value(pixels[i], i), 0.0);
            }
        }
        padded
    }
}

fn polar_angle_table() -> Vec<(f64, f64)> {
    (0..POLAR_ANGLES)
        .map(|a| {
            let (sin, cos) = (a as f64).to_radians().sin_cos();
            (cos, sin)
        })
        .collect()
}

/// Resample into `radius` rows of 360 angular samples each.
///
/// Row `r` holds samples at distance `r` from the centre; column `a` is the
/// angle in degrees, counter-clockwise in (x, y).
pub fn polar_resample(
    pixels: &[f64],
    width: usize,
    height: usize,
    radius: usize,
    angles: &[(f64, f64)],
) -> Vec<f64> {
    let center = image_center(width, height);
    let mut polar = vec![0.0; POLAR_ANGLES * radius];
    for r in 0..radius {
        let row = &mut polar[r * POLAR_ANGLES..(r + 1) * POLAR_ANGLES];
        for (value, &(cos, sin)) in row.iter_mut().zip(angles) {
            let x = center.x + r as f64 * cos;
            let y = center.y + r as f64 * sin;
            *value = bilinear_sample(pixels, width, height, x, y, BorderMode::Zero);
        }
    }
    polar
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::blob_image;

    fn setup(size: usize) -> (ComputePlan, CircularMask) {
        let mask = CircularMask::new(size, size);
        let plan = ComputePlan::acquire(size, size, mask.polar_radius(), 2);
        (plan, mask)
    }

    #[test]
    fn test_full_preprocessing_fills_both_stages() {
        let (plan, mask) = setup(16);
        let batch = ImageBatch::replicate(&blob_image(16, 0), 2);
        let prepared = Preprocessor::new(&plan, &mask).prepare(&batch, Stages::Both).unwrap();

        assert_eq!(prepared.count(), 2);
        assert_eq!(prepared.padded_dims(), (31, 31));
        assert_eq!(prepared.polar_dims(), (360, 7));
        assert_eq!(prepared.mask_count(), mask.count());

        let translation = prepared.translation().unwrap();
        let rotation = prepared.rotation().unwrap();
        assert_eq!(translation.len(), 2);
        assert_eq!(rotation.len(), 2);
        assert_eq!(translation[0].image.len(), 31 * 31);
        assert_eq!(rotation[0].image.len(), 360 * 7);

        // DC of the padded mask spectrum is the active pixel count.
        assert!((prepared.mask_spectrum()[0].re - mask.count() as f64).abs() < 1e-9);
    }

    #[test]
    fn test_padded_spectrum_dc_is_masked_sum() {
        let (plan, mask) = setup(16);
        let image = blob_image(16, 1);
        let batch = ImageBatch::replicate(&image, 1);
        let prepared = Preprocessor::new(&plan, &mask)
            .prepare(&batch, Stages::Only(Stage::Translation))
            .unwrap();

        let expected: f64 = image
            .pixels()
            .iter()
            .zip(mask.values())
            .map(|(v, m)| v * m)
            .sum();
        let spectra = &prepared.translation().unwrap()[0];
        assert!((spectra.image[0].re - expected).abs() < 1e-9);
        assert!(prepared.rotation().is_none());
    }

    #[test]
    fn test_reproject_switches_stage_and_keeps_mask() {
        let (plan, mask) = setup(16);
        let preprocessor = Preprocessor::new(&plan, &mask);
        let batch = ImageBatch::replicate(&blob_image(16, 2), 2);
        let mut prepared = preprocessor
            .prepare(&batch, Stages::Only(Stage::Translation))
            .unwrap();
        let mask_spectrum = prepared.mask_spectrum().to_vec();

        preprocessor
            .reproject(&mut prepared, &batch, Stage::Rotation)
            .unwrap();

        assert!(prepared.translation().is_none());
        assert!(prepared.rotation().is_some());
        assert_eq!(prepared.mask_spectrum(), mask_spectrum.as_slice());
    }

    #[test]
    fn test_reproject_rejects_count_change() {
        let (plan, mask) = setup(16);
        let preprocessor = Preprocessor::new(&plan, &mask);
        let image = blob_image(16, 0);
        let mut prepared = preprocessor
            .prepare(&ImageBatch::replicate(&image, 2), Stages::Both)
            .unwrap();

        let result =
            preprocessor.reproject(&mut prepared, &ImageBatch::replicate(&image, 3), Stage::Rotation);
        assert!(matches!(result, Err(Error::Correlation(_))));
    }

    #[test]
    fn test_polar_rotation_is_circular_shift() {
        let size = 32;
        let image = blob_image(size, 3);
        let rotated = image.warped(&crate::Transform::rotation(40.0), BorderMode::Zero);
        let angles = polar_angle_table();

        let a = polar_resample(image.pixels(), size, size, 10, &angles);
        let b = polar_resample(rotated.pixels(), size, size, 10, &angles);

        // rotated(theta) == image(theta - 40) on an interior ring.
        let r = 6;
        let mut err = 0.0;
        for t in 0..POLAR_ANGLES {
            let shifted = (t + POLAR_ANGLES - 40) % POLAR_ANGLES;
            err += (b[r * POLAR_ANGLES + t] - a[r * POLAR_ANGLES + shifted]).abs();
        }
        let scale: f64 = a[r * POLAR_ANGLES..(r + 1) * POLAR_ANGLES]
            .iter()
            .map(|v| v.abs())
            .sum();
        assert!(err / scale < 0.1, "relative error {}", err / scale);
    }
}
