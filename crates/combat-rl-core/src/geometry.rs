//! Planar vector math for positions and velocities

use serde::{Deserialize, Serialize};
use std::ops::{Add, Div, Mul, Sub};

/// 2D vector on the combat plane
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec2 {
    /// X coordinate
    pub x: f32,
    /// Y coordinate
    pub y: f32,
}

impl Vec2 {
    /// Zero vector
    pub const ZERO: Vec2 = Vec2 { x: 0.0, y: 0.0 };

    /// Create a new vector
    #[must_use]
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Euclidean length
    #[must_use]
    pub fn length(&self) -> f32 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    /// Distance to another point
    #[must_use]
    pub fn distance(&self, other: Vec2) -> f32 {
        (*self - other).length()
    }

    /// Unit vector in the same direction, or zero for a zero vector
    #[must_use]
    pub fn normalized(&self) -> Vec2 {
        let len = self.length();
        if len <= f32::EPSILON {
            Vec2::ZERO
        } else {
            *self / len
        }
    }

    /// Unit vector for `index` out of `count` evenly spaced headings,
    /// index 0 pointing along +x and increasing counter-clockwise.
    #[must_use]
    pub fn heading(index: u8, count: u8) -> Vec2 {
        if count == 0 {
            return Vec2::ZERO;
        }
        let angle = std::f32::consts::TAU * f32::from(index) / f32::from(count);
        Vec2::new(angle.cos(), angle.sin())
    }

    /// Index of the heading out of `count` closest to this vector's
    /// direction. `None` for a zero-length vector or when `count` is 0.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn nearest_heading(&self, count: u8) -> Option<u8> {
        if count == 0 || !self.is_finite() || self.length() <= f32::EPSILON {
            return None;
        }
        let angle = self.y.atan2(self.x).rem_euclid(std::f32::consts::TAU);
        let step = std::f32::consts::TAU / f32::from(count);
        let index = (angle / step).round() as u32 % u32::from(count);
        u8::try_from(index).ok()
    }

    /// Whether both components are finite
    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }

    /// Arithmetic mean of a set of points, `None` when empty
    pub fn centroid<I: IntoIterator<Item = Vec2>>(points: I) -> Option<Vec2> {
        let mut sum = Vec2::ZERO;
        let mut n = 0usize;
        for p in points {
            sum = sum + p;
            n += 1;
        }
        if n == 0 {
            None
        } else {
            #[allow(clippy::cast_precision_loss)]
            Some(sum / n as f32)
        }
    }
}

impl Add for Vec2 {
    type Output = Vec2;

    fn add(self, rhs: Vec2) -> Vec2 {
        Vec2::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for Vec2 {
    type Output = Vec2;

    fn sub(self, rhs: Vec2) -> Vec2 {
        Vec2::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl Mul<f32> for Vec2 {
    type Output = Vec2;

    fn mul(self, rhs: f32) -> Vec2 {
        Vec2::new(self.x * rhs, self.y * rhs)
    }
}

impl Div<f32> for Vec2 {
    type Output = Vec2;

    fn div(self, rhs: f32) -> Vec2 {
        Vec2::new(self.x / rhs, self.y / rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_distance_and_centroid() {
        let a = Vec2::new(0.0, 0.0);
        let b = Vec2::new(3.0, 4.0);
        assert_relative_eq!(a.distance(b), 5.0);

        let c = Vec2::centroid([a, b, Vec2::new(6.0, 2.0)]).unwrap();
        assert_relative_eq!(c.x, 3.0);
        assert_relative_eq!(c.y, 2.0);
        assert!(Vec2::centroid(std::iter::empty()).is_none());
    }

    #[test]
    fn test_heading_is_unit_length() {
        for i in 0..8 {
            assert_relative_eq!(Vec2::heading(i, 8).length(), 1.0, epsilon = 1e-5);
        }
        assert_eq!(Vec2::heading(0, 0), Vec2::ZERO);
    }

    #[test]
    fn test_nearest_heading() {
        assert_eq!(Vec2::new(1.0, 0.0).nearest_heading(8), Some(0));
        assert_eq!(Vec2::new(0.0, 2.0).nearest_heading(8), Some(2));
        assert_eq!(Vec2::new(-1.0, -0.01).nearest_heading(8), Some(4));
        assert_eq!(Vec2::new(0.0, -1.0).nearest_heading(4), Some(3));
        assert_eq!(Vec2::new(1.0, -0.1).nearest_heading(8), Some(0));
        assert_eq!(Vec2::ZERO.nearest_heading(8), None);
        for i in 0..8 {
            assert_eq!(Vec2::heading(i, 8).nearest_heading(8), Some(i));
        }
    }
}
