//! Rigid 2D transforms (rotation + translation) as homogeneous 3x3 matrices.

use glam::DVec2;

/// Row-major 3x3 homogeneous matrix holding a rotation and a translation.
///
/// ```text
/// | cos  -sin  tx |   | m[0] m[1] m[2] |
/// | sin   cos  ty | = | m[3] m[4] m[5] |
/// |  0     0    1 |   | m[6] m[7] m[8] |
/// ```
///
/// A transform maps experimental-image coordinates (centred) onto reference
/// coordinates, so the aligned image is `aligned(p) = experimental(T^-1 p)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    m: [f64; 9],
}

impl Default for Transform {
    fn default() -> Self {
        Self::identity()
    }
}

impl std::fmt::Display for Transform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let t = self.shift();
        write!(
            f,
            "Rigid(dx={:.2}, dy={:.2}, psi={:.3}°)",
            t.x,
            t.y,
            self.psi_degrees()
        )
    }
}

impl Transform {
    pub const fn identity() -> Self {
        Self {
            m: [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
        }
    }

    pub fn translation(t: DVec2) -> Self {
        Self {
            m: [1.0, 0.0, t.x, 0.0, 1.0, t.y, 0.0, 0.0, 1.0],
        }
    }

    /// Rotation about the centred origin, counter-clockwise in (x, y).
    pub fn rotation(degrees: f64) -> Self {
        let (sin_a, cos_a) = degrees.to_radians().sin_cos();
        Self {
            m: [cos_a, -sin_a, 0.0, sin_a, cos_a, 0.0, 0.0, 0.0, 1.0],
        }
    }

    pub fn from_array(m: [f64; 9]) -> Self {
        Self { m }
    }

    #[inline]
    pub fn as_array(&self) -> &[f64; 9] {
        &self.m
    }

    /// Compose an increment applied after `self`: `increment * self`.
    pub fn then(&self, increment: &Transform) -> Transform {
        let a = &increment.m;
        let b = &self.m;
        Transform {
            m: [
                a[0] * b[0] + a[1] * b[3] + a[2] * b[6],
                a[0] * b[1] + a[1] * b[4] + a[2] * b[7],
                a[0] * b[2] + a[1] * b[5] + a[2] * b[8],
                a[3] * b[0] + a[4] * b[3] + a[5] * b[6],
                a[3] * b[1] + a[4] * b[4] + a[5] * b[7],
                a[3] * b[2] + a[4] * b[5] + a[5] * b[8],
                a[6] * b[0] + a[7] * b[3] + a[8] * b[6],
                a[6] * b[1] + a[7] * b[4] + a[8] * b[7],
                a[6] * b[2] + a[7] * b[5] + a[8] * b[8],
            ],
        }
    }

    /// Translation column.
    #[inline]
    pub fn shift(&self) -> DVec2 {
        DVec2::new(self.m[2], self.m[5])
    }

    /// In-plane rotation angle in degrees, `atan2(m10, m00)`.
    #[inline]
    pub fn psi_degrees(&self) -> f64 {
        self.m[3].atan2(self.m[0]).to_degrees()
    }

    #[inline]
    pub fn apply(&self, p: DVec2) -> DVec2 {
        let m = &self.m;
        DVec2::new(
            m[0] * p.x + m[1] * p.y + m[2],
            m[3] * p.x + m[4] * p.y + m[5],
        )
    }

    /// Inverse of a rigid transform: `R^T` and `-R^T t`.
    pub fn inverse(&self) -> Transform {
        let m = &self.m;
        let tx = -(m[0] * m[2] + m[3] * m[5]);
        let ty = -(m[1] * m[2] + m[4] * m[5]);
        Transform {
            m: [m[0], m[3], tx, m[1], m[4], ty, 0.0, 0.0, 1.0],
        }
    }

    pub fn approx_eq(&self, other: &Transform, tolerance: f64) -> bool {
        self.m
            .iter()
            .zip(other.m.iter())
            .all(|(a, b)| (a - b).abs() <= tolerance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rotation_psi_round_trip() {
        for angle in [-170.0, -45.0, 0.0, 12.5, 90.0, 179.0] {
            let psi = Transform::rotation(angle).psi_degrees();
            assert!((psi - angle).abs() < 1e-9, "angle {angle}, psi {psi}");
        }
    }

    #[test]
    fn test_then_applies_increment_after() {
        let shift = Transform::translation(DVec2::new(3.0, -1.0));
        let composite = shift.then(&Transform::rotation(90.0));

        // (0,0) -> shift (3,-1) -> rotate 90 => (1, 3)
        let p = composite.apply(DVec2::ZERO);
        assert!((p - DVec2::new(1.0, 3.0)).length() < 1e-12);
        assert!((composite.psi_degrees() - 90.0).abs() < 1e-12);
        assert!((composite.shift() - DVec2::new(1.0, 3.0)).length() < 1e-12);
    }

    #[test]
    fn test_inverse_undoes_transform() {
        let t = Transform::rotation(33.0).then(&Transform::translation(DVec2::new(4.0, 7.5)));
        let p = DVec2::new(-2.0, 5.0);
        let back = t.inverse().apply(t.apply(p));
        assert!((back - p).length() < 1e-12);
        assert!(t.then(&t.inverse()).approx_eq(&Transform::identity(), 1e-12));
    }
}
