//! Affine transforms for build-item and component placement
//!
//! 3MF stores placements as a row-major 3×4 affine matrix flattened into
//! twelve values, `"m00 m01 m02 m10 m11 m12 m20 m21 m22 tx ty tz"`, applied
//! to row vectors. This module parses and formats that representation,
//! composes it from an instance placement, and decomposes it back into
//! scale, Euler rotation and translation through a quaternion intermediate.

use std::f64::consts::{FRAC_PI_2, TAU};

use nalgebra::{Point3, Vector2, Vector3};

use crate::error::{Error, Result};

/// Number of components in a flattened 3×4 affine matrix
pub const TRANSFORM_LEN: usize = 12;

/// Row-major 3×4 affine matrix; the last three values are the translation
pub type Matrix3x4 = [f64; TRANSFORM_LEN];

/// The identity transform
pub const IDENTITY: Matrix3x4 = [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0];

/// Decomposed affine transform
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Decomposition {
    /// Per-axis scale factors
    pub scale: Vector3<f64>,
    /// Euler rotation (X, Y, Z order), each angle in [0, 2π)
    pub rotation: Vector3<f64>,
    /// Translation
    pub translation: Vector3<f64>,
}

/// Parse a whitespace-separated transform attribute
///
/// Fails unless exactly twelve numeric tokens are present.
pub fn parse(text: &str) -> Result<Matrix3x4> {
    let mut matrix = [0.0; TRANSFORM_LEN];
    let mut count = 0;
    for token in text.split_whitespace() {
        if count < TRANSFORM_LEN {
            matrix[count] = token.parse::<f64>()?;
        }
        count += 1;
    }
    if count != TRANSFORM_LEN {
        return Err(Error::BadTransform(count));
    }
    Ok(matrix)
}

/// Format a transform as a whitespace-separated attribute value
pub fn format(matrix: &Matrix3x4) -> String {
    matrix
        .iter()
        // Composed rotations produce -0.0 terms; emit them as plain zeros.
        .map(|&v| (if v == 0.0 { 0.0 } else { v }).to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Apply the transform to a point (row-vector convention)
pub fn apply(m: &Matrix3x4, p: &Point3<f64>) -> Point3<f64> {
    Point3::new(
        p.x * m[0] + p.y * m[3] + p.z * m[6] + m[9],
        p.x * m[1] + p.y * m[4] + p.z * m[7] + m[10],
        p.x * m[2] + p.y * m[5] + p.z * m[8] + m[11],
    )
}

/// Compose the matrix for an instance placement
///
/// `rotation` is about the Z axis in radians, `scale` is uniform, and the
/// object's accumulated `origin_translation` is re-added to the planar
/// offset so that re-imported parts land where they were placed.
pub fn compose(
    rotation: f64,
    scale: f64,
    offset: &Vector2<f64>,
    origin_translation: &Vector3<f64>,
) -> Matrix3x4 {
    let (sin, cos) = rotation.sin_cos();
    let tx = offset.x + origin_translation.x;
    let ty = offset.y + origin_translation.y;
    [
        cos * scale,
        sin * scale,
        0.0,
        -sin * scale,
        cos * scale,
        0.0,
        0.0,
        0.0,
        scale,
        tx,
        ty,
        0.0,
    ]
}

/// Decompose an affine matrix into scale, Euler rotation and translation
///
/// The rotation is recovered through a quaternion built with the stable
/// square-root formula, sign-corrected from the off-diagonal differences,
/// then converted to X-Y-Z Euler angles with explicit handling of the
/// gimbal singularities at the poles. All angles are reduced to [0, 2π).
pub fn decompose(m: &Matrix3x4) -> Decomposition {
    let translation = Vector3::new(m[9], m[10], m[11]);

    let sx = (m[0] * m[0] + m[1] * m[1] + m[2] * m[2]).sqrt();
    let sy = (m[3] * m[3] + m[4] * m[4] + m[5] * m[5]).sqrt();
    let sz = (m[6] * m[6] + m[7] * m[7] + m[8] * m[8]).sqrt();
    let scale = Vector3::new(sx, sy, sz);

    // Normalize each row by its scale to isolate the pure rotation.
    let mut r = [m[0], m[1], m[2], m[3], m[4], m[5], m[6], m[7], m[8]];
    for (row, s) in [(0, sx), (1, sy), (2, sz)] {
        if s != 0.0 {
            for v in &mut r[row * 3..row * 3 + 3] {
                *v /= s;
            }
        }
    }

    let mut qw = (0.0_f64.max(1.0 + r[0] + r[4] + r[8])).sqrt() / 2.0;
    let mut qx = (0.0_f64.max(1.0 + r[0] - r[4] - r[8])).sqrt() / 2.0;
    let mut qy = (0.0_f64.max(1.0 - r[0] + r[4] - r[8])).sqrt() / 2.0;
    let mut qz = (0.0_f64.max(1.0 - r[0] - r[4] + r[8])).sqrt() / 2.0;

    if qx * (r[5] - r[7]) <= 0.0 {
        qx = -qx;
    }
    if qy * (r[6] - r[2]) <= 0.0 {
        qy = -qy;
    }
    if qz * (r[1] - r[3]) <= 0.0 {
        qz = -qz;
    }

    let magnitude = (qw * qw + qx * qx + qy * qy + qz * qz).sqrt();
    if magnitude != 0.0 {
        qw /= magnitude;
        qx /= magnitude;
        qy /= magnitude;
        qz /= magnitude;
    }

    let test = qx * qy + qz * qw;
    let rotation = if test > 0.499 {
        // Singularity at the north pole.
        Vector3::new(0.0, 2.0 * qx.atan2(qw), FRAC_PI_2)
    } else if test < -0.499 {
        // Singularity at the south pole.
        Vector3::new(0.0, -2.0 * qx.atan2(qw), -FRAC_PI_2)
    } else {
        Vector3::new(
            (2.0 * qx * qw - 2.0 * qy * qz).atan2(1.0 - 2.0 * qx * qx - 2.0 * qz * qz),
            (2.0 * qy * qw - 2.0 * qx * qz).atan2(1.0 - 2.0 * qy * qy - 2.0 * qz * qz),
            (2.0 * qx * qy + 2.0 * qz * qw).asin(),
        )
    };

    Decomposition {
        scale,
        rotation: rotation.map(wrap_angle),
        translation,
    }
}

/// Reduce an angle into [0, 2π)
fn wrap_angle(angle: f64) -> f64 {
    let wrapped = angle % TAU;
    if wrapped < 0.0 {
        wrapped + TAU
    } else {
        wrapped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn assert_close(a: f64, b: f64) {
        assert!((a - b).abs() < 1e-9, "{} != {}", a, b);
    }

    #[test]
    fn parse_requires_twelve_tokens() {
        assert!(parse("1 0 0 0 1 0 0 0 1 0 0 0").is_ok());
        assert!(matches!(
            parse("1 0 0 0 1 0 0 0 1 0 0"),
            Err(Error::BadTransform(11))
        ));
        assert!(matches!(
            parse("1 0 0 0 1 0 0 0 1 0 0 0 5"),
            Err(Error::BadTransform(13))
        ));
        assert!(parse("1 0 0 0 x 0 0 0 1 0 0 0").is_err());
    }

    #[test]
    fn format_round_trips() {
        let m = compose(0.0, 2.0, &Vector2::new(10.0, -4.5), &Vector3::zeros());
        let parsed = parse(&format(&m)).unwrap();
        assert_eq!(m, parsed);
    }

    #[test]
    fn apply_identity_is_noop() {
        let p = Point3::new(1.0, 2.0, 3.0);
        assert_eq!(apply(&IDENTITY, &p), p);
    }

    #[test]
    fn decompose_pure_scale_and_translation() {
        let m = compose(0.0, 2.0, &Vector2::new(10.0, 5.0), &Vector3::zeros());
        let d = decompose(&m);
        assert_close(d.scale.x, 2.0);
        assert_close(d.scale.y, 2.0);
        assert_close(d.scale.z, 2.0);
        assert_close(d.rotation.x, 0.0);
        assert_close(d.rotation.y, 0.0);
        assert_close(d.rotation.z, 0.0);
        assert_close(d.translation.x, 10.0);
        assert_close(d.translation.y, 5.0);
        assert_close(d.translation.z, 0.0);
    }

    #[test]
    fn decompose_recovers_z_rotation() {
        let m = compose(0.5, 3.0, &Vector2::zeros(), &Vector3::zeros());
        let d = decompose(&m);
        assert_close(d.scale.x, 3.0);
        assert_close(d.rotation.z, 0.5);
        assert_close(d.rotation.x, 0.0);
        assert_close(d.rotation.y, 0.0);
    }

    #[test]
    fn decompose_wraps_negative_rotation() {
        let m = compose(-0.25, 1.0, &Vector2::zeros(), &Vector3::zeros());
        let d = decompose(&m);
        assert_close(d.rotation.z, TAU - 0.25);
    }

    #[test]
    fn decompose_handles_north_pole() {
        // A cyclic axis permutation lands exactly on the xy+zw singularity;
        // the branch must stay finite and report the pole rotation.
        let m = [0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0];
        let d = decompose(&m);
        assert!(d.rotation.iter().all(|a| a.is_finite()));
        assert_close(d.rotation.y, FRAC_PI_2);
        assert_close(d.rotation.z, FRAC_PI_2);
    }

    #[test]
    fn compose_places_origin_compensation() {
        let m = compose(
            0.0,
            1.0,
            &Vector2::new(1.0, 2.0),
            &Vector3::new(10.0, 20.0, 30.0),
        );
        assert_close(m[9], 11.0);
        assert_close(m[10], 22.0);
        assert_close(m[11], 0.0);
    }

    #[test]
    fn apply_rotates_counterclockwise() {
        let m = compose(PI / 2.0, 1.0, &Vector2::zeros(), &Vector3::zeros());
        let p = apply(&m, &Point3::new(1.0, 0.0, 0.0));
        assert_close(p.x, 0.0);
        assert_close(p.y, 1.0);
        assert_close(p.z, 0.0);
    }
}
