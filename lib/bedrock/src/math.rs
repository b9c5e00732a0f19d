pub use glam::{EulerRot, Quat, Vec2, Vec3};

/// Squared distance on the XY plane. Ground-level visibility checks ignore
/// height so tall structures don't pop entities in and out.
#[inline]
pub fn distance_sqr_2d(a: Vec3, b: Vec3) -> f32 {
    let d = Vec2::new(a.x - b.x, a.y - b.y);
    d.dot(d)
}

/// Full squared euclidean distance.
#[inline]
pub fn distance_sqr_3d(a: Vec3, b: Vec3) -> f32 {
    (a - b).length_squared()
}

/// Builds the rotation quaternion for a facing angle (degrees around Z).
#[inline]
pub fn facing_angle_to_quat(angle: f32) -> Quat {
    Quat::from_rotation_z(angle.to_radians())
}

/// Extracts the Z facing angle (degrees) from a rotation.
#[inline]
pub fn quat_to_facing_angle(rotation: Quat) -> f32 {
    let (_, _, z) = rotation.to_euler(EulerRot::XYZ);
    z.to_degrees()
}
