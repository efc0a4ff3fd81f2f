//! SE(3) rigid transforms.
//!
//! An element is a rotation plus a translation, `T = [R t; 0 1]`. As a problem variable it is
//! stored as the 7-vector `[tx, ty, tz, qw, qx, qy, qz]`. Tangent vectors are ordered
//! `[ρ, θ]` (translation part first), matching the pose weights used by the IK factors.

use crate::manifold::{
    LieGroup, SMALL_ANGLE, Tangent,
    so3::{SO3, SO3Tangent},
    skew,
};
use nalgebra::{
    DVector, Isometry3, Matrix3, Matrix4, Matrix6, Translation3, UnitQuaternion, Vector3, Vector6,
};
use std::{
    fmt,
    fmt::{Display, Formatter},
};

#[derive(Clone, PartialEq)]
pub struct SE3 {
    rotation: SO3,
    translation: Vector3<f64>,
}

impl Display for SE3 {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let t = self.translation;
        let q = self.rotation.coeffs();
        write!(
            f,
            "SE3(translation: [{:.4}, {:.4}, {:.4}], rotation: [w: {:.4}, x: {:.4}, y: {:.4}, z: {:.4}])",
            t.x, t.y, t.z, q[0], q[1], q[2], q[3]
        )
    }
}

impl fmt::Debug for SE3 {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(self, f)
    }
}

impl Default for SE3 {
    fn default() -> Self {
        Self::identity()
    }
}

impl SE3 {
    pub const DOF: usize = 6;

    pub const REP_SIZE: usize = 7;

    pub fn identity() -> Self {
        SE3 {
            rotation: SO3::identity(),
            translation: Vector3::zeros(),
        }
    }

    pub fn new(translation: Vector3<f64>, rotation: UnitQuaternion<f64>) -> Self {
        SE3 {
            rotation: SO3::new(rotation),
            translation,
        }
    }

    pub fn from_translation_so3(translation: Vector3<f64>, rotation: SO3) -> Self {
        SE3 {
            rotation,
            translation,
        }
    }

    pub fn from_translation(translation: Vector3<f64>) -> Self {
        Self::from_translation_so3(translation, SO3::identity())
    }

    /// Translation plus roll/pitch/yaw (extrinsic XYZ).
    pub fn from_translation_euler(
        x: f64,
        y: f64,
        z: f64,
        roll: f64,
        pitch: f64,
        yaw: f64,
    ) -> Self {
        Self::from_translation_so3(
            Vector3::new(x, y, z),
            SO3::from_euler_angles(roll, pitch, yaw),
        )
    }

    pub fn from_isometry(isometry: &Isometry3<f64>) -> Self {
        Self::new(isometry.translation.vector, isometry.rotation)
    }

    /// Uniformly scattered pose, translation in [-1, 1]³ and rotation angle up to √3.
    #[cfg(test)]
    pub fn random() -> Self {
        let sample = || rand::random::<f64>() * 2.0 - 1.0;
        let translation = Vector3::new(sample(), sample(), sample());
        let axis_angle = Vector3::new(sample(), sample(), sample());
        Self::from_translation_so3(translation, SO3::from_scaled_axis(axis_angle))
    }

    pub fn translation(&self) -> Vector3<f64> {
        self.translation
    }

    pub fn rotation_so3(&self) -> &SO3 {
        &self.rotation
    }

    pub fn rotation_quaternion(&self) -> UnitQuaternion<f64> {
        self.rotation.quaternion()
    }

    pub fn rotation_matrix(&self) -> Matrix3<f64> {
        self.rotation.rotation_matrix()
    }

    pub fn isometry(&self) -> Isometry3<f64> {
        Isometry3::from_parts(
            Translation3::from(self.translation),
            self.rotation.quaternion(),
        )
    }

    pub fn matrix(&self) -> Matrix4<f64> {
        self.isometry().to_homogeneous()
    }

    /// Apply the transform to a point, `R p + t`.
    pub fn transform_point(&self, point: &Vector3<f64>) -> Vector3<f64> {
        self.rotation.quaternion() * point + self.translation
    }
}

impl From<DVector<f64>> for SE3 {
    fn from(data: DVector<f64>) -> Self {
        SE3::from_translation_so3(
            Vector3::new(data[0], data[1], data[2]),
            SO3::from_wxyz(data[3], data[4], data[5], data[6]),
        )
    }
}

impl From<SE3> for DVector<f64> {
    fn from(se3: SE3) -> Self {
        let t = se3.translation;
        let q = se3.rotation.coeffs();
        DVector::from_vec(vec![t.x, t.y, t.z, q[0], q[1], q[2], q[3]])
    }
}

impl LieGroup for SE3 {
    type TangentVector = SE3Tangent;
    type JacobianMatrix = Matrix6<f64>;

    fn inverse(&self, jacobian: Option<&mut Self::JacobianMatrix>) -> Self {
        if let Some(jac) = jacobian {
            *jac = -self.adjoint();
        }
        let rotation_inv = self.rotation.inverse(None);
        let translation = -rotation_inv.act(&self.translation, None, None);
        SE3::from_translation_so3(translation, rotation_inv)
    }

    fn compose(
        &self,
        other: &Self,
        jacobian_self: Option<&mut Self::JacobianMatrix>,
        jacobian_other: Option<&mut Self::JacobianMatrix>,
    ) -> Self {
        if let Some(jac_self) = jacobian_self {
            *jac_self = other.inverse(None).adjoint();
        }
        if let Some(jac_other) = jacobian_other {
            *jac_other = Matrix6::identity();
        }
        SE3::from_translation_so3(
            self.rotation.act(&other.translation, None, None) + self.translation,
            self.rotation.compose(&other.rotation, None, None),
        )
    }

    fn log(&self, jacobian: Option<&mut Self::JacobianMatrix>) -> Self::TangentVector {
        let theta = self.rotation.log(None);
        let rho = theta.left_jacobian_inv() * self.translation;
        let tangent = SE3Tangent::from_parts(rho, theta.coeffs());
        if let Some(jac) = jacobian {
            *jac = tangent.right_jacobian_inv();
        }
        tangent
    }

    /// The Jacobian with respect to the transform is 3×6; it is written into the
    /// first three rows of `jacobian_self`.
    fn act(
        &self,
        vector: &Vector3<f64>,
        jacobian_self: Option<&mut Self::JacobianMatrix>,
        jacobian_vector: Option<&mut Matrix3<f64>>,
    ) -> Vector3<f64> {
        let rotation = self.rotation_matrix();
        if let Some(jac_self) = jacobian_self {
            *jac_self = Matrix6::zeros();
            jac_self.fixed_view_mut::<3, 3>(0, 0).copy_from(&rotation);
            jac_self
                .fixed_view_mut::<3, 3>(0, 3)
                .copy_from(&(-rotation * skew(vector)));
        }
        if let Some(jac_vector) = jacobian_vector {
            *jac_vector = rotation;
        }
        rotation * vector + self.translation
    }

    /// `Ad = [R, [t]× R; 0, R]`
    fn adjoint(&self) -> Self::JacobianMatrix {
        let rotation = self.rotation_matrix();
        let mut adjoint = Matrix6::zeros();
        adjoint.fixed_view_mut::<3, 3>(0, 0).copy_from(&rotation);
        adjoint
            .fixed_view_mut::<3, 3>(0, 3)
            .copy_from(&(skew(&self.translation) * rotation));
        adjoint.fixed_view_mut::<3, 3>(3, 3).copy_from(&rotation);
        adjoint
    }

    fn jacobian_identity(&self) -> Self::JacobianMatrix {
        Matrix6::identity()
    }

    fn normalize(&mut self) {
        self.rotation.normalize();
    }

    fn is_valid(&self, tolerance: f64) -> bool {
        self.rotation.is_valid(tolerance) && self.translation.iter().all(|v| v.is_finite())
    }
}

/// Tangent vector of SE(3), `[ρ, θ]`.
#[derive(Clone, PartialEq, Debug)]
pub struct SE3Tangent {
    data: Vector6<f64>,
}

impl From<DVector<f64>> for SE3Tangent {
    fn from(data: DVector<f64>) -> Self {
        SE3Tangent::new(Vector6::from_iterator(data.iter().copied()))
    }
}

impl SE3Tangent {
    pub fn new(data: Vector6<f64>) -> Self {
        SE3Tangent { data }
    }

    pub fn from_parts(rho: Vector3<f64>, theta: Vector3<f64>) -> Self {
        SE3Tangent::new(Vector6::new(
            rho.x, rho.y, rho.z, theta.x, theta.y, theta.z,
        ))
    }

    pub fn zero() -> Self {
        SE3Tangent::new(Vector6::zeros())
    }

    pub fn coeffs(&self) -> Vector6<f64> {
        self.data
    }

    pub fn rho(&self) -> Vector3<f64> {
        self.data.fixed_rows::<3>(0).into_owned()
    }

    pub fn theta(&self) -> Vector3<f64> {
        self.data.fixed_rows::<3>(3).into_owned()
    }

    fn negated(&self) -> Self {
        SE3Tangent::new(-self.data)
    }

    /// Off-diagonal block `Q(ρ, θ)` of the SE(3) left Jacobian (Barfoot, eq. 7.86).
    fn q_block(&self) -> Matrix3<f64> {
        let rho_hat = skew(&self.rho());
        let theta_hat = skew(&self.theta());
        let theta_sq = self.theta().norm_squared();

        let (a, b, c) = if theta_sq < SMALL_ANGLE {
            (
                1.0 / 6.0 - theta_sq / 120.0,
                1.0 / 24.0 - theta_sq / 720.0,
                1.0 / 120.0 - theta_sq / 2520.0,
            )
        } else {
            let theta = theta_sq.sqrt();
            let (sin, cos) = theta.sin_cos();
            (
                (theta - sin) / (theta_sq * theta),
                (theta_sq + 2.0 * cos - 2.0) / (2.0 * theta_sq * theta_sq),
                (2.0 * theta - 3.0 * sin + theta * cos) / (2.0 * theta_sq * theta_sq * theta),
            )
        };

        let tr = theta_hat * rho_hat;
        let rt = rho_hat * theta_hat;
        let trt = tr * theta_hat;
        rho_hat * 0.5
            + (tr + rt + trt) * a
            + (theta_hat * tr + rt * theta_hat - trt * 3.0) * b
            + (trt * theta_hat + theta_hat * trt) * c
    }
}

impl Tangent<SE3> for SE3Tangent {
    const DIM: usize = 6;

    fn exp(&self, jacobian: Option<&mut Matrix6<f64>>) -> SE3 {
        let theta = SO3Tangent::new(self.theta());
        if let Some(jac) = jacobian {
            *jac = self.right_jacobian();
        }
        SE3::from_translation_so3(theta.left_jacobian() * self.rho(), theta.exp(None))
    }

    fn right_jacobian(&self) -> Matrix6<f64> {
        self.negated().left_jacobian()
    }

    /// `Jl = [Jl(θ), Q; 0, Jl(θ)]`
    fn left_jacobian(&self) -> Matrix6<f64> {
        let jl = SO3Tangent::new(self.theta()).left_jacobian();
        let mut jac = Matrix6::zeros();
        jac.fixed_view_mut::<3, 3>(0, 0).copy_from(&jl);
        jac.fixed_view_mut::<3, 3>(0, 3).copy_from(&self.q_block());
        jac.fixed_view_mut::<3, 3>(3, 3).copy_from(&jl);
        jac
    }

    fn right_jacobian_inv(&self) -> Matrix6<f64> {
        self.negated().left_jacobian_inv()
    }

    /// `Jl⁻¹ = [Jl⁻¹(θ), -Jl⁻¹(θ) Q Jl⁻¹(θ); 0, Jl⁻¹(θ)]`
    fn left_jacobian_inv(&self) -> Matrix6<f64> {
        let jl_inv = SO3Tangent::new(self.theta()).left_jacobian_inv();
        let mut jac = Matrix6::zeros();
        jac.fixed_view_mut::<3, 3>(0, 0).copy_from(&jl_inv);
        jac.fixed_view_mut::<3, 3>(0, 3)
            .copy_from(&(-jl_inv * self.q_block() * jl_inv));
        jac.fixed_view_mut::<3, 3>(3, 3).copy_from(&jl_inv);
        jac
    }

    fn is_zero(&self, tolerance: f64) -> bool {
        self.data.norm() < tolerance
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOLERANCE: f64 = 1e-9;

    fn sample_tangents() -> Vec<SE3Tangent> {
        vec![
            SE3Tangent::new(Vector6::new(0.1, -0.2, 0.3, 1e-6, 0.0, -1e-6)),
            SE3Tangent::new(Vector6::new(0.5, 0.2, -0.4, 0.3, -0.2, 0.6)),
            SE3Tangent::new(Vector6::new(-1.0, 0.7, 0.2, 1.2, 0.9, -0.5)),
        ]
    }

    #[test]
    fn test_se3_exp_log_roundtrip() {
        for tangent in sample_tangents() {
            let recovered = tangent.exp(None).log(None);
            assert!((recovered.coeffs() - tangent.coeffs()).norm() < TOLERANCE);
        }
    }

    #[test]
    fn test_se3_vector_layout() {
        let pose = SE3::from_translation_euler(1.0, 2.0, 3.0, 0.0, 0.0, 0.5);
        let vector: DVector<f64> = pose.clone().into();
        assert_eq!(vector.len(), SE3::REP_SIZE);
        assert!((vector[2] - 3.0).abs() < TOLERANCE);
        assert!((vector[3] - (0.25_f64).cos()).abs() < TOLERANCE);
        assert!(SE3::from(vector).is_approx(&pose, TOLERANCE));
    }

    #[test]
    fn test_se3_inverse_compose_is_identity() {
        let pose = SE3::random();
        let product = pose.compose(&pose.inverse(None), None, None);
        assert!(product.is_approx(&SE3::identity(), 1e-10));
    }

    #[test]
    fn test_se3_adjoint_conjugates_exp() {
        let pose = SE3::from_translation_euler(0.3, -0.1, 0.8, 0.4, -0.3, 1.0);
        let tangent = SE3Tangent::new(Vector6::new(0.1, 0.2, -0.3, 0.05, -0.1, 0.2));
        let lhs = pose
            .compose(&tangent.exp(None), None, None)
            .compose(&pose.inverse(None), None, None);
        let rhs = SE3Tangent::new(pose.adjoint() * tangent.coeffs()).exp(None);
        assert!(lhs.is_approx(&rhs, 1e-10));
    }

    #[test]
    fn test_se3_jacobian_inverses() {
        for tangent in sample_tangents() {
            let left = tangent.left_jacobian() * tangent.left_jacobian_inv();
            let right = tangent.right_jacobian() * tangent.right_jacobian_inv();
            assert!((left - Matrix6::identity()).norm() < 1e-8);
            assert!((right - Matrix6::identity()).norm() < 1e-8);
        }
    }

    #[test]
    fn test_se3_log_jacobian_matches_finite_difference() {
        let h = 1e-6;
        for tangent in sample_tangents() {
            let pose = tangent.exp(None);
            let mut jac = Matrix6::zeros();
            let base = pose.log(Some(&mut jac));
            for i in 0..6 {
                let mut delta = Vector6::zeros();
                delta[i] = h;
                let moved = pose.right_plus(&SE3Tangent::new(delta), None, None).log(None);
                let column = (moved.coeffs() - base.coeffs()) / h;
                for r in 0..6 {
                    assert!(
                        (column[r] - jac[(r, i)]).abs() < 1e-5,
                        "entry ({r}, {i}): {} vs {}",
                        column[r],
                        jac[(r, i)]
                    );
                }
            }
        }
    }

    #[test]
    fn test_se3_act_and_transform_point_agree() {
        let pose = SE3::from_translation_euler(1.0, 0.0, -1.0, 0.2, 0.1, -0.3);
        let point = Vector3::new(0.4, 0.5, 0.6);
        let acted = pose.act(&point, None, None);
        assert!((acted - pose.transform_point(&point)).norm() < TOLERANCE);
        let via_isometry = (pose.isometry() * nalgebra::Point3::from(point)).coords;
        assert!((acted - via_isometry).norm() < 1e-12);
    }
}
