//! 2D geometry utilities shared by the sketch constraint solver.
//!
//! Pure functions over points represented as `[f64; 2]`, plus nalgebra
//! aliases for the typed accessors the parameter table exposes.

use nalgebra as na;
use std::f64::consts::PI;

pub type Vec2 = na::Vector2<f64>;

/// Tolerance for floating-point comparisons
pub const EPSILON: f64 = 1e-6;

pub trait ApproxEq {
    fn approx_eq(&self, other: &Self) -> bool;
}

impl ApproxEq for f64 {
    fn approx_eq(&self, other: &Self) -> bool {
        (self - other).abs() < EPSILON
    }
}

impl ApproxEq for Vec2 {
    fn approx_eq(&self, other: &Self) -> bool {
        (self - other).norm_squared() < EPSILON * EPSILON
    }
}

/// Compute squared distance between two 2D points.
#[inline]
pub fn distance_squared(p1: [f64; 2], p2: [f64; 2]) -> f64 {
    let dx = p2[0] - p1[0];
    let dy = p2[1] - p1[1];
    dx * dx + dy * dy
}

/// Compute distance between two 2D points.
#[inline]
pub fn distance(p1: [f64; 2], p2: [f64; 2]) -> f64 {
    distance_squared(p1, p2).sqrt()
}

/// 2D dot product.
#[inline]
pub fn dot(a: [f64; 2], b: [f64; 2]) -> f64 {
    a[0] * b[0] + a[1] * b[1]
}

/// 2D scalar cross product (z component of the 3D cross).
#[inline]
pub fn cross(a: [f64; 2], b: [f64; 2]) -> f64 {
    a[0] * b[1] - a[1] * b[0]
}

/// Wrap an angle difference into `(-PI, PI]`.
#[inline]
pub fn wrap_angle(delta: f64) -> f64 {
    if delta > -PI && delta <= PI {
        delta
    } else {
        delta.sin().atan2(delta.cos())
    }
}
