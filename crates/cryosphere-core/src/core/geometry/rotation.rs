use nalgebra::{Matrix3, Rotation3, UnitQuaternion, Vector3};

/// Rotation matrix for intrinsic ZYZ Euler angles (radians): `Rz(a) · Ry(b) · Rz(c)`.
pub fn euler_zyz_to_matrix(a: f64, b: f64, c: f64) -> Matrix3<f64> {
    let rz_a = Rotation3::from_axis_angle(&Vector3::z_axis(), a);
    let ry_b = Rotation3::from_axis_angle(&Vector3::y_axis(), b);
    let rz_c = Rotation3::from_axis_angle(&Vector3::z_axis(), c);
    (rz_a * ry_b * rz_c).into_inner()
}

/// Pose matrix from RELION Euler angles in degrees.
///
/// RELION rotates the reference clockwise; the returned matrix left-multiplies atom
/// coordinates in the counter-clockwise convention, hence the transpose.
pub fn relion_pose(rot_deg: f64, tilt_deg: f64, psi_deg: f64) -> Matrix3<f64> {
    euler_zyz_to_matrix(rot_deg.to_radians(), tilt_deg.to_radians(), psi_deg.to_radians())
        .transpose()
}

/// Exponential map of a rotation vector (axis times angle in radians).
pub fn expmap(rotation_vector: &Vector3<f64>) -> Matrix3<f64> {
    Rotation3::new(*rotation_vector).into_inner()
}

/// Pose matrix from a cryoSPARC `alignments3D/pose` rotation vector.
pub fn cryosparc_pose(rotation_vector: &Vector3<f64>) -> Matrix3<f64> {
    expmap(rotation_vector).transpose()
}

/// Converts a quaternion `(w, x, y, z)` of arbitrary norm to an axis-angle vector.
///
/// The quaternion is normalized first, so only its direction matters. The zero quaternion maps
/// to the identity rotation. Uses a Taylor expansion of `sin(θ/2)/θ` near zero so that the
/// conversion stays smooth around the identity.
pub fn quaternion_to_axis_angle(q: &[f64; 4]) -> Vector3<f64> {
    let norm = q.iter().map(|v| v * v).sum::<f64>().sqrt();
    if norm == 0.0 {
        return Vector3::zeros();
    }
    let (w, v) = (q[0] / norm, Vector3::new(q[1], q[2], q[3]) / norm);
    let half_angle = v.norm().atan2(w);
    let angle = 2.0 * half_angle;
    let sin_half_over_angle = if angle.abs() < 1e-6 {
        0.5 - angle * angle / 48.0
    } else {
        half_angle.sin() / angle
    };
    v / sin_half_over_angle
}

/// Unit quaternion of an axis-angle vector.
pub fn axis_angle_to_quaternion(axis_angle: &Vector3<f64>) -> UnitQuaternion<f64> {
    UnitQuaternion::from_scaled_axis(*axis_angle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::{FRAC_PI_2, PI};

    #[test]
    fn euler_zyz_composes_in_order() {
        let m = euler_zyz_to_matrix(FRAC_PI_2, 0.0, 0.0);
        let x = m * Vector3::x();
        assert_relative_eq!(x, Vector3::y(), epsilon = 1e-12);

        let m = euler_zyz_to_matrix(0.3, 0.7, -1.1);
        let expected = Rotation3::from_axis_angle(&Vector3::z_axis(), 0.3).into_inner()
            * Rotation3::from_axis_angle(&Vector3::y_axis(), 0.7).into_inner()
            * Rotation3::from_axis_angle(&Vector3::z_axis(), -1.1).into_inner();
        assert_relative_eq!(m, expected, epsilon = 1e-12);
    }

    #[test]
    fn relion_pose_is_transposed_euler_matrix() {
        let pose = relion_pose(30.0, 60.0, -45.0);
        let m = euler_zyz_to_matrix(30f64.to_radians(), 60f64.to_radians(), (-45f64).to_radians());
        assert_relative_eq!(pose * m, Matrix3::identity(), epsilon = 1e-12);
    }

    #[test]
    fn cryosparc_pose_matches_equivalent_relion_pose() {
        let relion = relion_pose(12.0, 101.0, 250.0);
        // A cryoSPARC rotation vector whose exponential is the transpose of the pose.
        let rotvec = Rotation3::from_matrix(&relion.transpose()).scaled_axis();
        assert_relative_eq!(cryosparc_pose(&rotvec), relion, epsilon = 1e-9);
    }

    #[test]
    fn quaternion_to_axis_angle_ignores_norm() {
        let axis = Vector3::new(1.0, -2.0, 0.5).normalize();
        let angle = 0.8;
        let q = UnitQuaternion::from_scaled_axis(axis * angle);
        let raw = [q.w * 3.0, q.i * 3.0, q.j * 3.0, q.k * 3.0];
        assert_relative_eq!(quaternion_to_axis_angle(&raw), axis * angle, epsilon = 1e-12);
    }

    #[test]
    fn identity_and_zero_quaternions_give_no_rotation() {
        assert_relative_eq!(quaternion_to_axis_angle(&[1.0, 0.0, 0.0, 0.0]), Vector3::zeros());
        assert_relative_eq!(quaternion_to_axis_angle(&[2.5, 0.0, 0.0, 0.0]), Vector3::zeros());
        assert_relative_eq!(quaternion_to_axis_angle(&[0.0; 4]), Vector3::zeros());
    }

    #[test]
    fn small_angles_use_the_series_expansion() {
        let q = [1.0, 1e-9, 0.0, 0.0];
        let aa = quaternion_to_axis_angle(&q);
        assert_relative_eq!(aa.x, 2e-9, epsilon = 1e-18);
    }

    #[test]
    fn half_turn_round_trips_through_quaternion() {
        let aa = Vector3::new(0.0, 0.0, PI * 0.999);
        let q = axis_angle_to_quaternion(&aa);
        let back = quaternion_to_axis_angle(&[q.w, q.i, q.j, q.k]);
        assert_relative_eq!(back, aa, epsilon = 1e-9);
    }
}
