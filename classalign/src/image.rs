//! Single-channel images and image batches.
//!
//! Pixels are row-major `f64`. Geometry uses centred coordinates: the origin is
//! the pixel `(width / 2, height / 2)`, x grows to the right and y grows down.

use glam::DVec2;

use crate::transform::Transform;

/// Behaviour of the sampler outside the image footprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BorderMode {
    /// Samples outside the image read as zero.
    #[default]
    Zero,
    /// Coordinates wrap around periodically.
    Wrap,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    width: usize,
    height: usize,
    pixels: Vec<f64>,
}

impl Image {
    pub fn new(width: usize, height: usize, pixels: Vec<f64>) -> Self {
        assert_eq!(
            pixels.len(),
            width * height,
            "pixels length must equal width * height"
        );
        Self {
            width,
            height,
            pixels,
        }
    }

    pub fn zeros(width: usize, height: usize) -> Self {
        Self::new(width, height, vec![0.0; width * height])
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn dimensions(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    #[inline]
    pub fn pixels(&self) -> &[f64] {
        &self.pixels
    }

    #[inline]
    pub fn pixels_mut(&mut self) -> &mut [f64] {
        &mut self.pixels
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> f64 {
        debug_assert!(x < self.width && y < self.height);
        self.pixels[y * self.width + x]
    }

    /// Centre pixel used as the coordinate origin.
    #[inline]
    pub fn center(&self) -> DVec2 {
        image_center(self.width, self.height)
    }

    /// Horizontal mirror: every row reversed.
    pub fn flipped_x(&self) -> Image {
        let mut flipped = self.clone();
        flipped.flip_x();
        flipped
    }

    pub fn flip_x(&mut self) {
        for row in self.pixels.chunks_exact_mut(self.width) {
            row.reverse();
        }
    }

    /// Resample through `transform`: `out(p) = self(T^-1 p)` in centred coordinates.
    pub fn warped(&self, transform: &Transform, border: BorderMode) -> Image {
        let mut out = Image::zeros(self.width, self.height);
        warp_into(
            &self.pixels,
            self.width,
            self.height,
            transform,
            border,
            &mut out.pixels,
        );
        out
    }

    /// Bilinear sample at pixel coordinates (not centred).
    pub fn sample(&self, x: f64, y: f64, border: BorderMode) -> f64 {
        bilinear_sample(&self.pixels, self.width, self.height, x, y, border)
    }
}

/// A stack of equally sized images stored contiguously.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageBatch {
    width: usize,
    height: usize,
    count: usize,
    data: Vec<f64>,
}

impl ImageBatch {
    pub fn zeros(width: usize, height: usize, count: usize) -> Self {
        Self {
            width,
            height,
            count,
            data: vec![0.0; width * height * count],
        }
    }

    pub fn from_data(width: usize, height: usize, count: usize, data: Vec<f64>) -> Self {
        assert_eq!(data.len(), width * height * count, "batch length mismatch");
        Self {
            width,
            height,
            count,
            data,
        }
    }

    /// Stack the given images. All images must share dimensions.
    pub fn from_images(images: &[Image]) -> Self {
        assert!(!images.is_empty(), "batch needs at least one image");
        let (width, height) = images[0].dimensions();
        let mut data = Vec::with_capacity(width * height * images.len());
        for image in images {
            assert_eq!(image.dimensions(), (width, height), "image size mismatch");
            data.extend_from_slice(image.pixels());
        }
        Self::from_data(width, height, images.len(), data)
    }

    /// `count` copies of one image.
    pub fn replicate(image: &Image, count: usize) -> Self {
        let mut data = Vec::with_capacity(image.pixels().len() * count);
        for _ in 0..count {
            data.extend_from_slice(image.pixels());
        }
        Self::from_data(image.width(), image.height(), count, data)
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn count(&self) -> usize {
        self.count
    }

    #[inline]
    pub fn image_len(&self) -> usize {
        self.width * self.height
    }

    #[inline]
    pub fn data(&self) -> &[f64] {
        &self.data
    }

    #[inline]
    pub fn data_mut(&mut self) -> &mut [f64] {
        &mut self.data
    }

    #[inline]
    pub fn image(&self, index: usize) -> &[f64] {
        let len = self.image_len();
        &self.data[index * len..(index + 1) * len]
    }

    #[inline]
    pub fn image_mut(&mut self, index: usize) -> &mut [f64] {
        let len = self.image_len();
        &mut self.data[index * len..(index + 1) * len]
    }

    pub fn images(&self) -> std::slice::ChunksExact<'_, f64> {
        self.data.chunks_exact(self.image_len())
    }

    pub fn to_image(&self, index: usize) -> Image {
        Image::new(self.width, self.height, self.image(index).to_vec())
    }

    /// Warp image `k` of `self` by `transforms[k]` into a new batch.
    pub fn warped(&self, transforms: &[Transform], border: BorderMode) -> ImageBatch {
        assert_eq!(transforms.len(), self.count, "one transform per image");
        let mut out = ImageBatch::zeros(self.width, self.height, self.count);
        let len = self.image_len();
        for (k, (dst, transform)) in out.data.chunks_exact_mut(len).zip(transforms).enumerate() {
            warp_into(self.image(k), self.width, self.height, transform, border, dst);
        }
        out
    }
}

#[inline]
pub fn image_center(width: usize, height: usize) -> DVec2 {
    DVec2::new((width / 2) as f64, (height / 2) as f64)
}

fn warp_into(
    src: &[f64],
    width: usize,
    height: usize,
    transform: &Transform,
    border: BorderMode,
    dst: &mut [f64],
) {
    let center = image_center(width, height);
    let inverse = transform.inverse();
    for y in 0..height {
        for x in 0..width {
            let p = DVec2::new(x as f64, y as f64) - center;
            let s = inverse.apply(p) + center;
            dst[y * width + x] = bilinear_sample(src, width, height, s.x, s.y, border);
        }
    }
}

/// Bilinear interpolation on a row-major image.
pub fn bilinear_sample(
    image: &[f64],
    width: usize,
    height: usize,
    x: f64,
    y: f64,
    border: BorderMode,
) -> f64 {
    let x0 = x.floor() as isize;
    let y0 = y.floor() as isize;
    let fx = x - x0 as f64;
    let fy = y - y0 as f64;

    let get_pixel = |px: isize, py: isize| -> f64 {
        match border {
            BorderMode::Zero => {
                if px >= 0 && px < width as isize && py >= 0 && py < height as isize {
                    image[py as usize * width + px as usize]
                } else {
                    0.0
                }
            }
            BorderMode::Wrap => {
                let wx = px.rem_euclid(width as isize) as usize;
                let wy = py.rem_euclid(height as isize) as usize;
                image[wy * width + wx]
            }
        }
    };

    let p00 = get_pixel(x0, y0);
    let p10 = get_pixel(x0 + 1, y0);
    let p01 = get_pixel(x0, y0 + 1);
    let p11 = get_pixel(x0 + 1, y0 + 1);

    let top = p00 + fx * (p10 - p00);
    let bottom = p01 + fx * (p11 - p01);
    top + fy * (bottom - top)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(width: usize, height: usize) -> Image {
        let pixels = (0..width * height).map(|i| i as f64).collect();
        Image::new(width, height, pixels)
    }

    #[test]
    fn test_flip_x_reverses_rows() {
        let image = ramp(3, 2);
        let flipped = image.flipped_x();
        assert_eq!(flipped.pixels(), &[2.0, 1.0, 0.0, 5.0, 4.0, 3.0]);
        assert_eq!(flipped.flipped_x(), image);
    }

    #[test]
    fn test_identity_warp_is_exact() {
        let image = ramp(8, 6);
        let warped = image.warped(&Transform::identity(), BorderMode::Zero);
        assert_eq!(warped, image);
    }

    #[test]
    fn test_integer_translation_moves_content() {
        let mut image = Image::zeros(8, 8);
        image.pixels_mut()[3 * 8 + 2] = 1.0;

        let warped = image.warped(
            &Transform::translation(DVec2::new(2.0, 1.0)),
            BorderMode::Zero,
        );

        assert!((warped.get(4, 4) - 1.0).abs() < 1e-12);
        assert!(warped.get(2, 3).abs() < 1e-12);
    }

    #[test]
    fn test_quarter_turn_about_center() {
        let mut image = Image::zeros(9, 9);
        // (x=6, y=4) is +2 along x from the centre (4, 4).
        image.pixels_mut()[4 * 9 + 6] = 1.0;

        let warped = image.warped(&Transform::rotation(90.0), BorderMode::Zero);

        // Counter-clockwise in (x, y): +x maps to +y.
        assert!((warped.get(4, 6) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_wrap_border_samples_periodically() {
        let image = ramp(4, 4);
        assert_eq!(image.sample(-1.0, 0.0, BorderMode::Wrap), 3.0);
        assert_eq!(image.sample(-1.0, 0.0, BorderMode::Zero), 0.0);
    }

    #[test]
    fn test_batch_replicate_and_access() {
        let image = ramp(2, 2);
        let batch = ImageBatch::replicate(&image, 3);
        assert_eq!(batch.count(), 3);
        assert_eq!(batch.image(2), image.pixels());
        assert_eq!(batch.images().count(), 3);
    }
}
