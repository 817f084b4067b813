//! Binary circular mask inscribed in the image footprint.

use crate::image::image_center;

/// Mask radius as a fraction of the smaller image side.
pub const MASK_RADIUS_FRACTION: f64 = 0.45;

#[derive(Debug, Clone)]
pub struct CircularMask {
    width: usize,
    height: usize,
    radius: f64,
    values: Vec<f64>,
    count: usize,
}

impl CircularMask {
    /// Radius `0.45 * min(width, height)`, centred at the image origin.
    pub fn new(width: usize, height: usize) -> Self {
        let radius = MASK_RADIUS_FRACTION * width.min(height) as f64;
        let center = image_center(width, height);
        let r2 = radius * radius;

        let mut values = vec![0.0; width * height];
        let mut count = 0;
        for y in 0..height {
            let dy = y as f64 - center.y;
            for x in 0..width {
                let dx = x as f64 - center.x;
                if dx * dx + dy * dy <= r2 {
                    values[y * width + x] = 1.0;
                    count += 1;
                }
            }
        }

        Self {
            width,
            height,
            radius,
            values,
            count,
        }
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    /// Mask radius `R1` in pixels.
    #[inline]
    pub fn radius(&self) -> f64 {
        self.radius
    }

    /// Number of radial samples of the polar resampling.
    #[inline]
    pub fn polar_radius(&self) -> usize {
        self.radius as usize
    }

    /// Active pixel count.
    #[inline]
    pub fn count(&self) -> usize {
        self.count
    }

    /// Mask as 0/1 samples, row-major.
    #[inline]
    pub fn values(&self) -> &[f64] {
        &self.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_radius_uses_smaller_side() {
        let mask = CircularMask::new(64, 40);
        assert!((mask.radius() - 18.0).abs() < 1e-12);
        assert_eq!(mask.polar_radius(), 18);
    }

    #[test]
    fn test_mask_is_centered_and_symmetric() {
        let mask = CircularMask::new(32, 32);
        let v = mask.values();
        assert_eq!(v[16 * 32 + 16], 1.0);
        assert_eq!(v[0], 0.0);
        // Symmetric about the origin pixel (16, 16).
        for (dx, dy) in [(5, 3), (-7, 2), (0, -14)] {
            let a = v[((16 + dy) * 32 + 16 + dx) as usize];
            let b = v[((16 - dy) * 32 + 16 - dx) as usize];
            assert_eq!(a, b);
        }
    }

    #[test]
    fn test_count_close_to_disc_area() {
        let mask = CircularMask::new(64, 64);
        let area = std::f64::consts::PI * mask.radius() * mask.radius();
        let count = mask.count() as f64;
        assert!((count - area).abs() / area < 0.02, "count {count}, area {area}");
        assert_eq!(count, mask.values().iter().sum::<f64>());
    }
}
