//! World-frame projection of sensor-local positions.
//!
//! A sensor reports positions relative to itself. Given its [`Pose`], each
//! homogeneous position `p` is mapped to `T · Rz · Ry · Rx · p`: rotate about
//! the sensor's own origin first (X, then Y, then Z), translate last.

use circum_env::{Pose, Position};
use nalgebra::{Matrix4, Matrix4xX, Vector4};

/// Rotation about the X axis by `degrees`.
pub fn rotation_x(degrees: f64) -> Matrix4<f64> {
    let (s, c) = degrees.to_radians().sin_cos();
    Matrix4::new(
        1.0, 0.0, 0.0, 0.0,
        0.0, c, -s, 0.0,
        0.0, s, c, 0.0,
        0.0, 0.0, 0.0, 1.0,
    )
}

/// Rotation about the Y axis by `degrees`.
pub fn rotation_y(degrees: f64) -> Matrix4<f64> {
    let (s, c) = degrees.to_radians().sin_cos();
    Matrix4::new(
        c, 0.0, s, 0.0,
        0.0, 1.0, 0.0, 0.0,
        -s, 0.0, c, 0.0,
        0.0, 0.0, 0.0, 1.0,
    )
}

/// Rotation about the Z axis by `degrees`.
pub fn rotation_z(degrees: f64) -> Matrix4<f64> {
    let (s, c) = degrees.to_radians().sin_cos();
    Matrix4::new(
        c, -s, 0.0, 0.0,
        s, c, 0.0, 0.0,
        0.0, 0.0, 1.0, 0.0,
        0.0, 0.0, 0.0, 1.0,
    )
}

/// The composed sensor-to-world matrix `T · Rz · Ry · Rx`.
pub fn pose_matrix(pose: &Pose) -> Matrix4<f64> {
    let mut translation = Matrix4::identity();
    translation[(0, 3)] = pose.x;
    translation[(1, 3)] = pose.y;
    translation[(2, 3)] = pose.z;

    translation * rotation_z(pose.roll) * rotation_y(pose.pitch) * rotation_x(pose.yaw)
}

/// Transform homogeneous positions (one per column, 4th row = 1) into the world frame.
pub fn transform_positions(positions: &Matrix4xX<f64>, pose: &Pose) -> Matrix4xX<f64> {
    pose_matrix(pose) * positions
}

/// Transform wire positions into the world frame.
pub fn transform_points(points: &[Position], pose: &Pose) -> Vec<Position> {
    let m = pose_matrix(pose);
    points
        .iter()
        .map(|p| {
            let w = m * Vector4::new(p.x, p.y, p.z, 1.0);
            Position::new(w[0], w[1], w[2])
        })
        .collect()
}
