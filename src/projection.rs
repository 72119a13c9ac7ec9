// Copyright (c) 2025 HypercubeDB Contributors
// Licensed under the GPL-3.0 License. See LICENSE file for details.

//! Lossy spherical projection for vector fields.
//!
//! Compressed tables store every [`Value::Vector`](crate::Value::Vector) as a
//! fixed four-field [`ProjectedVector`]:
//!
//! 1. polar angle from the +z axis, quantized to `1e-4` rad
//! 2. azimuth in the xy plane, rounded to whole degrees
//! 3. intensity, the magnitude of the projected 3-D vector
//! 4. a coarse time bucket (hours since the Unix epoch) of the encoding
//!
//! Only the first three components take part; shorter vectors are padded with
//! zeros and extra components are discarded. Decoding yields a 3-component
//! vector along the recovered direction, scaled by the intensity, so the
//! angular error is bounded by the azimuth rounding (half a degree).

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

const POLAR_STEP: f64 = 1e-4;
const SECS_PER_BUCKET: u64 = 3600;

/// Four-field encoding of a vector.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct ProjectedVector {
    /// Polar angle in radians, multiple of `1e-4`.
    pub polar: f64,
    /// Azimuth in whole degrees, in `[-180, 180]`.
    pub azimuth_deg: f64,
    /// Magnitude of the projected 3-D vector.
    pub intensity: f64,
    /// Hours since the Unix epoch at encoding time.
    pub time_bucket: u64,
}

/// Projects `components` onto the sphere.
///
/// ```rust
/// use hypercubedb::projection::{project, unproject};
///
/// let p = project(&[0.0, 0.0, 2.0]);
/// assert_eq!(p.polar, 0.0);
/// assert_eq!(p.intensity, 2.0);
///
/// let v = unproject(&p);
/// assert!((v[2] - 2.0).abs() < 1e-9);
/// ```
pub fn project(components: &[f64]) -> ProjectedVector {
    let at = |i: usize| components.get(i).copied().filter(|c| c.is_finite()).unwrap_or(0.0);
    let (x, y, z) = (at(0), at(1), at(2));
    let intensity = x.hypot(y).hypot(z);

    let (polar, azimuth_deg) = if intensity > 0.0 {
        let theta = (z / intensity).clamp(-1.0, 1.0).acos();
        let phi = y.atan2(x).to_degrees();
        ((theta / POLAR_STEP).round() * POLAR_STEP, phi.round())
    } else {
        (0.0, 0.0)
    };

    ProjectedVector {
        polar,
        azimuth_deg,
        intensity,
        time_bucket: current_bucket(),
    }
}

/// Recovers a 3-component vector from its projection.
pub fn unproject(p: &ProjectedVector) -> Vec<f64> {
    let phi = p.azimuth_deg.to_radians();
    let (sin_t, cos_t) = p.polar.sin_cos();
    vec![
        p.intensity * sin_t * phi.cos(),
        p.intensity * sin_t * phi.sin(),
        p.intensity * cos_t,
    ]
}

fn current_bucket() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() / SECS_PER_BUCKET)
        .unwrap_or(0)
}

/// Angle in degrees between two 3-D vectors. Zero vectors give 0.
pub fn angle_between_deg(a: &[f64], b: &[f64]) -> f64 {
    let (Some(ua), Some(ub)) = (unit(a), unit(b)) else {
        return 0.0;
    };
    let dot: f64 = ua.iter().zip(&ub).map(|(x, y)| x * y).sum();
    dot.clamp(-1.0, 1.0).acos().to_degrees()
}

/// First three components scaled to unit length, `None` for a zero vector.
fn unit(v: &[f64]) -> Option<[f64; 3]> {
    let at = |i: usize| v.get(i).copied().unwrap_or(0.0);
    let norm = at(0).hypot(at(1)).hypot(at(2));
    (norm > 0.0).then(|| [at(0) / norm, at(1) / norm, at(2) / norm])
}
