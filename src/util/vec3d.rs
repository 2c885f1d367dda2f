use num::traits::{Float, Num};
use serde::Serialize;
use std::fmt::{Display, Formatter};
use std::ops::{Add, Mul};
use strum_macros::Display as StrumDisplay;

/// One of the three body axes.
#[derive(Debug, StrumDisplay, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Axis {
    X,
    Y,
    Z,
}

/// A 3D vector generic over any numeric type.
///
/// Used for raw accelerometer readings in the body frame (x forward, y right, z down
/// or up depending on the source, see [`AccelPosition`](crate::calibration::AccelPosition)).
#[derive(Debug, PartialEq, Clone, Copy, Serialize)]
pub struct Vec3D<T> {
    x: T,
    y: T,
    z: T,
}

impl<T: Copy> Vec3D<T> {
    pub const fn new(x: T, y: T, z: T) -> Self { Self { x, y, z } }

    pub const fn x(&self) -> T { self.x }

    pub const fn y(&self) -> T { self.y }

    pub const fn z(&self) -> T { self.z }

    /// Returns the component along `axis`.
    pub const fn component(&self, axis: Axis) -> T {
        match axis {
            Axis::X => self.x,
            Axis::Y => self.y,
            Axis::Z => self.z,
        }
    }
}

impl<T: Num + Copy> Vec3D<T> {
    /// Computes the dot product with another vector.
    pub fn dot(self, other: Vec3D<T>) -> T { self.x * other.x + self.y * other.y + self.z * other.z }

    pub fn zero() -> Self { Self::new(T::zero(), T::zero(), T::zero()) }

    /// Unit vector along `axis`, negated if `positive` is `false`.
    pub fn unit(axis: Axis, positive: bool) -> Self {
        let one = if positive { T::one() } else { T::zero() - T::one() };
        match axis {
            Axis::X => Self::new(one, T::zero(), T::zero()),
            Axis::Y => Self::new(T::zero(), one, T::zero()),
            Axis::Z => Self::new(T::zero(), T::zero(), one),
        }
    }
}

impl<T: Float> Vec3D<T> {
    /// Computes the magnitude (Euclidean norm) of the vector.
    pub fn abs(&self) -> T { (self.x.powi(2) + self.y.powi(2) + self.z.powi(2)).sqrt() }

    /// Angle between the two vectors in degrees, `None` if either has zero length.
    pub fn angle_deg(&self, other: &Self) -> Option<T> {
        let denom = self.abs() * other.abs();
        if denom.is_zero() {
            return None;
        }
        let cos = (self.dot(*other) / denom).max(-T::one()).min(T::one());
        Some(cos.acos().to_degrees())
    }
}

impl<T: Num> Add for Vec3D<T> {
    type Output = Vec3D<T>;

    fn add(self, rhs: Self) -> Self::Output {
        Self::Output { x: self.x + rhs.x, y: self.y + rhs.y, z: self.z + rhs.z }
    }
}

impl<T: Num + Copy> Mul<T> for Vec3D<T> {
    type Output = Vec3D<T>;

    /// Scales the vector by a scalar.
    fn mul(self, rhs: T) -> Self::Output {
        Self::Output { x: self.x * rhs, y: self.y * rhs, z: self.z * rhs }
    }
}

impl<T: Display> Display for Vec3D<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if let Some(precision) = f.precision() {
            write!(f, "[{:.*}, {:.*}, {:.*}]", precision, self.x, precision, self.y, precision, self.z)
        } else {
            write!(f, "[{}, {}, {}]", self.x, self.y, self.z)
        }
    }
}
