//! Frame and interpolation helpers shared by the engine, the bridge and the
//! annotation tools.
//!
//! Coordinates are y-up. A root transform places +z along the character's
//! facing direction; "relative to" maps world quantities into that frame and
//! "relative from" maps them back out.

use nalgebra::{Isometry3, Point3, Quaternion, Translation3, UnitQuaternion, Vector3};

/// Tolerance below which a ground-plane vector is treated as degenerate.
pub const EPSILON: f64 = 1e-9;

/// `a + t * (b - a)`.
#[inline]
pub fn lerp(a: f64, b: f64, t: f64) -> f64 {
    a + t * (b - a)
}

#[inline]
pub fn lerp_vector(a: &Vector3<f64>, b: &Vector3<f64>, t: f64) -> Vector3<f64> {
    a + (b - a) * t
}

#[inline]
pub fn lerp_point(a: &Point3<f64>, b: &Point3<f64>, t: f64) -> Point3<f64> {
    a + (b - a) * t
}

/// Wrap `value` into `[0, length)`, also for negative values.
#[inline]
pub fn repeat(value: f64, length: f64) -> f64 {
    let wrapped = value.rem_euclid(length);
    // rem_euclid can round up to `length` for tiny negative inputs
    if wrapped >= length {
        0.0
    } else {
        wrapped
    }
}

/// Map `value` from `[min, max]` onto `[out_min, out_max]`. A degenerate input
/// range leaves the value untouched.
#[inline]
pub fn normalise(value: f64, min: f64, max: f64, out_min: f64, out_max: f64) -> f64 {
    if max - min != 0.0 {
        (value - min) / (max - min) * (out_max - out_min) + out_min
    } else {
        value
    }
}

/// Last set flag strictly before `frame`.
pub fn previous_key(keys: &[bool], frame: usize) -> Option<usize> {
    (0..frame.min(keys.len())).rev().find(|&i| keys[i])
}

/// First set flag strictly after `frame`.
pub fn next_key(keys: &[bool], frame: usize) -> Option<usize> {
    (frame.saturating_add(1)..keys.len()).find(|&i| keys[i])
}

/// Project a vector onto the ground plane and normalize it. Returns `fallback`
/// when the projection vanishes.
pub fn ground_direction(v: &Vector3<f64>, fallback: &Vector3<f64>) -> Vector3<f64> {
    Vector3::new(v.x, 0.0, v.z)
        .try_normalize(EPSILON)
        .unwrap_or(*fallback)
}

/// Yaw rotation that turns +z onto the (ground-projected) `direction`.
pub fn look_rotation(direction: &Vector3<f64>) -> UnitQuaternion<f64> {
    UnitQuaternion::from_axis_angle(&Vector3::y_axis(), direction.x.atan2(direction.z))
}

/// Rotation about the up axis by `degrees`.
pub fn yaw_rotation(degrees: f64) -> UnitQuaternion<f64> {
    UnitQuaternion::from_axis_angle(&Vector3::y_axis(), degrees.to_radians())
}

/// Root transform from a position and a facing direction.
pub fn root_transform(position: &Point3<f64>, direction: &Vector3<f64>) -> Isometry3<f64> {
    Isometry3::from_parts(Translation3::from(position.coords), look_rotation(direction))
}

#[inline]
pub fn relative_position_to(p: &Point3<f64>, root: &Isometry3<f64>) -> Point3<f64> {
    root.inverse_transform_point(p)
}

#[inline]
pub fn relative_direction_to(v: &Vector3<f64>, root: &Isometry3<f64>) -> Vector3<f64> {
    root.inverse_transform_vector(v)
}

#[inline]
pub fn relative_position_from(p: &Point3<f64>, root: &Isometry3<f64>) -> Point3<f64> {
    root.transform_point(p)
}

#[inline]
pub fn relative_direction_from(v: &Vector3<f64>, root: &Isometry3<f64>) -> Vector3<f64> {
    root.transform_vector(v)
}

/// Exponential of the pure quaternion `(0, v)`, normalized into a rotation.
pub fn exp_map(v: &Vector3<f64>) -> UnitQuaternion<f64> {
    UnitQuaternion::new_normalize(Quaternion::from_imag(*v).exp())
}

// ── Mirroring about the xy plane (z is negated) ──

#[inline]
pub fn mirror_point(p: &Point3<f64>) -> Point3<f64> {
    Point3::new(p.x, p.y, -p.z)
}

#[inline]
pub fn mirror_vector(v: &Vector3<f64>) -> Vector3<f64> {
    Vector3::new(v.x, v.y, -v.z)
}

pub fn mirror_rotation(q: &UnitQuaternion<f64>) -> UnitQuaternion<f64> {
    let q = q.quaternion();
    UnitQuaternion::new_unchecked(Quaternion::new(q.w, -q.i, -q.j, q.k))
}

pub fn mirror_isometry(m: &Isometry3<f64>) -> Isometry3<f64> {
    Isometry3::from_parts(
        Translation3::from(mirror_vector(&m.translation.vector)),
        mirror_rotation(&m.rotation),
    )
}
