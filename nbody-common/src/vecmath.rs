use serde::{Deserialize, Serialize};
use std::ops::{Add, Div, Mul, Sub};

/// A simple 3D vector struct.
#[derive(Debug, Copy, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    /// Creates a new Vec3.
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Vec3 { x, y, z }
    }

    /// Creates a zero vector.
    pub fn zero() -> Self {
        Vec3 { x: 0.0, y: 0.0, z: 0.0 }
    }

    /// Calculates the squared length (magnitude) of the vector.
    pub fn length_squared(&self) -> f64 {
        self.x * self.x + self.y * self.y + self.z * self.z
    }

    /// Calculates the squared distance to another vector (point).
    pub fn distance_squared(&self, other: Vec3) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        dx * dx + dy * dy + dz * dz
    }

    /// Calculates the distance to another vector (point).
    pub fn distance(&self, other: Vec3) -> f64 {
        self.distance_squared(other).sqrt()
    }
}

impl Add for Vec3 {
    type Output = Self;
    fn add(self, other: Self) -> Self {
        Self { x: self.x + other.x, y: self.y + other.y, z: self.z + other.z }
    }
}

impl Sub for Vec3 {
    type Output = Self;
    fn sub(self, other: Self) -> Self {
        Self { x: self.x - other.x, y: self.y - other.y, z: self.z - other.z }
    }
}

impl Mul<f64> for Vec3 {
    type Output = Self;
    fn mul(self, scalar: f64) -> Self {
        Self { x: self.x * scalar, y: self.y * scalar, z: self.z * scalar }
    }
}

impl Div<f64> for Vec3 {
    type Output = Self;
    fn div(self, scalar: f64) -> Self {
        Self { x: self.x / scalar, y: self.y / scalar, z: self.z / scalar }
    }
}

impl std::iter::Sum for Vec3 {
    fn sum<I: Iterator<Item = Vec3>>(iter: I) -> Self {
        iter.fold(Vec3::zero(), |acc, v| acc + v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_is_euclidean() {
        let a = Vec3::new(1.0, 2.0, 2.0);
        assert_eq!(a.length_squared(), 9.0);
        assert_eq!(a.distance(Vec3::zero()), 3.0);
        assert_eq!(a.distance_squared(Vec3::new(1.0, 2.0, 0.0)), 4.0);
    }

    #[test]
    fn operators_are_componentwise() {
        let a = Vec3::new(1.0, -2.0, 3.0);
        let b = Vec3::new(0.5, 0.5, 0.5);
        assert_eq!(a + b, Vec3::new(1.5, -1.5, 3.5));
        assert_eq!(a - b, Vec3::new(0.5, -2.5, 2.5));
        assert_eq!(a * 2.0, Vec3::new(2.0, -4.0, 6.0));
        assert_eq!(a / 2.0, Vec3::new(0.5, -1.0, 1.5));
        let total: Vec3 = vec![a, b].into_iter().sum();
        assert_eq!(total, a + b);
    }
}
