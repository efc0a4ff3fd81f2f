//! SO(3) rotations stored as unit quaternions.
//!
//! Tangent vectors are axis-angle vectors `θ ∈ R³`. Jacobians follow the closed forms in
//! Solà et al., "A micro Lie theory for state estimation in robotics", with Taylor
//! expansions near the identity.

use crate::manifold::{LieGroup, SMALL_ANGLE, Tangent, skew};
use nalgebra::{DVector, Matrix3, Quaternion, Unit, UnitQuaternion, Vector3};
use std::{
    fmt,
    fmt::{Display, Formatter},
};

#[derive(Clone, PartialEq)]
pub struct SO3 {
    quaternion: UnitQuaternion<f64>,
}

impl Display for SO3 {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let q = self.quaternion.quaternion();
        write!(
            f,
            "SO3(quaternion: [w: {:.4}, x: {:.4}, y: {:.4}, z: {:.4}])",
            q.w, q.i, q.j, q.k
        )
    }
}

impl fmt::Debug for SO3 {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(self, f)
    }
}

impl SO3 {
    pub const DOF: usize = 3;

    pub const REP_SIZE: usize = 4;

    pub fn identity() -> Self {
        SO3 {
            quaternion: UnitQuaternion::identity(),
        }
    }

    pub fn new(quaternion: UnitQuaternion<f64>) -> Self {
        SO3 { quaternion }
    }

    /// Builds a rotation from `[w, x, y, z]`, normalizing the coefficients.
    pub fn from_wxyz(w: f64, x: f64, y: f64, z: f64) -> Self {
        SO3::new(UnitQuaternion::from_quaternion(Quaternion::new(w, x, y, z)))
    }

    pub fn from_euler_angles(roll: f64, pitch: f64, yaw: f64) -> Self {
        SO3::new(UnitQuaternion::from_euler_angles(roll, pitch, yaw))
    }

    pub fn from_axis_angle(axis: &Vector3<f64>, angle: f64) -> Self {
        SO3::new(UnitQuaternion::from_axis_angle(
            &Unit::new_normalize(*axis),
            angle,
        ))
    }

    pub fn from_scaled_axis(axis_angle: Vector3<f64>) -> Self {
        SO3::new(UnitQuaternion::from_scaled_axis(axis_angle))
    }

    pub fn quaternion(&self) -> UnitQuaternion<f64> {
        self.quaternion
    }

    pub fn rotation_matrix(&self) -> Matrix3<f64> {
        self.quaternion.to_rotation_matrix().into_inner()
    }

    /// Coefficients in `[w, x, y, z]` order.
    pub fn coeffs(&self) -> [f64; 4] {
        let q = self.quaternion.quaternion();
        [q.w, q.i, q.j, q.k]
    }

    /// Geodesic angle between two rotations.
    pub fn angular_distance(&self, other: &Self) -> f64 {
        self.quaternion.angle_to(&other.quaternion)
    }
}

impl From<DVector<f64>> for SO3 {
    fn from(data: DVector<f64>) -> Self {
        SO3::from_wxyz(data[0], data[1], data[2], data[3])
    }
}

impl From<SO3> for DVector<f64> {
    fn from(so3: SO3) -> Self {
        DVector::from_row_slice(&so3.coeffs())
    }
}

impl LieGroup for SO3 {
    type TangentVector = SO3Tangent;
    type JacobianMatrix = Matrix3<f64>;

    fn inverse(&self, jacobian: Option<&mut Self::JacobianMatrix>) -> Self {
        if let Some(jac) = jacobian {
            *jac = -self.adjoint();
        }
        SO3 {
            quaternion: self.quaternion.inverse(),
        }
    }

    fn compose(
        &self,
        other: &Self,
        jacobian_self: Option<&mut Self::JacobianMatrix>,
        jacobian_other: Option<&mut Self::JacobianMatrix>,
    ) -> Self {
        if let Some(jac_self) = jacobian_self {
            *jac_self = other.rotation_matrix().transpose();
        }
        if let Some(jac_other) = jacobian_other {
            *jac_other = Matrix3::identity();
        }
        SO3 {
            quaternion: self.quaternion * other.quaternion,
        }
    }

    fn log(&self, jacobian: Option<&mut Self::JacobianMatrix>) -> Self::TangentVector {
        let q = self.quaternion.quaternion();
        // q and -q are the same rotation; pick w >= 0 so that the angle lies in [0, π]
        let (w, v) = if q.w < 0.0 {
            (-q.w, -q.imag())
        } else {
            (q.w, q.imag())
        };
        let sin_half = v.norm();
        let scale = if sin_half > f64::EPSILON {
            2.0 * sin_half.atan2(w) / sin_half
        } else {
            2.0 / w
        };
        let tangent = SO3Tangent::new(v * scale);
        if let Some(jac) = jacobian {
            *jac = tangent.right_jacobian_inv();
        }
        tangent
    }

    fn act(
        &self,
        vector: &Vector3<f64>,
        jacobian_self: Option<&mut Self::JacobianMatrix>,
        jacobian_vector: Option<&mut Matrix3<f64>>,
    ) -> Vector3<f64> {
        let rotation = self.rotation_matrix();
        if let Some(jac_self) = jacobian_self {
            *jac_self = -rotation * skew(vector);
        }
        if let Some(jac_vector) = jacobian_vector {
            *jac_vector = rotation;
        }
        rotation * vector
    }

    fn adjoint(&self) -> Self::JacobianMatrix {
        self.rotation_matrix()
    }

    fn jacobian_identity(&self) -> Self::JacobianMatrix {
        Matrix3::identity()
    }

    fn normalize(&mut self) {
        self.quaternion = UnitQuaternion::from_quaternion(self.quaternion.into_inner());
    }

    fn is_valid(&self, tolerance: f64) -> bool {
        (self.quaternion.norm() - 1.0).abs() < tolerance
    }
}

/// Axis-angle tangent vector of SO(3).
#[derive(Clone, PartialEq, Debug)]
pub struct SO3Tangent {
    data: Vector3<f64>,
}

impl From<DVector<f64>> for SO3Tangent {
    fn from(data: DVector<f64>) -> Self {
        SO3Tangent::new(Vector3::new(data[0], data[1], data[2]))
    }
}

impl SO3Tangent {
    pub fn new(axis_angle: Vector3<f64>) -> Self {
        SO3Tangent { data: axis_angle }
    }

    pub fn zero() -> Self {
        SO3Tangent::new(Vector3::zeros())
    }

    pub fn coeffs(&self) -> Vector3<f64> {
        self.data
    }

    pub fn angle(&self) -> f64 {
        self.data.norm()
    }

    /// `[θ]×`
    pub fn hat(&self) -> Matrix3<f64> {
        skew(&self.data)
    }
}

impl Tangent<SO3> for SO3Tangent {
    const DIM: usize = 3;

    fn exp(&self, jacobian: Option<&mut Matrix3<f64>>) -> SO3 {
        if let Some(jac) = jacobian {
            *jac = self.right_jacobian();
        }
        SO3::from_scaled_axis(self.data)
    }

    fn right_jacobian(&self) -> Matrix3<f64> {
        SO3Tangent::new(-self.data).left_jacobian()
    }

    /// `Jl(θ) = I + (1 - cos θ)/θ² [θ]× + (θ - sin θ)/θ³ [θ]×²`
    fn left_jacobian(&self) -> Matrix3<f64> {
        let theta_sq = self.data.norm_squared();
        let hat = self.hat();
        let hat_sq = hat * hat;
        let (a, b) = if theta_sq < SMALL_ANGLE {
            (0.5 - theta_sq / 24.0, 1.0 / 6.0 - theta_sq / 120.0)
        } else {
            let theta = theta_sq.sqrt();
            (
                (1.0 - theta.cos()) / theta_sq,
                (theta - theta.sin()) / (theta_sq * theta),
            )
        };
        Matrix3::identity() + hat * a + hat_sq * b
    }

    fn right_jacobian_inv(&self) -> Matrix3<f64> {
        SO3Tangent::new(-self.data).left_jacobian_inv()
    }

    /// `Jl⁻¹(θ) = I - ½[θ]× + (1/θ² - (1 + cos θ)/(2θ sin θ)) [θ]×²`
    fn left_jacobian_inv(&self) -> Matrix3<f64> {
        let theta_sq = self.data.norm_squared();
        let hat = self.hat();
        let hat_sq = hat * hat;
        let c = if theta_sq < SMALL_ANGLE {
            1.0 / 12.0 + theta_sq / 720.0
        } else {
            let theta = theta_sq.sqrt();
            1.0 / theta_sq - (1.0 + theta.cos()) / (2.0 * theta * theta.sin())
        };
        Matrix3::identity() - hat * 0.5 + hat_sq * c
    }

    fn is_zero(&self, tolerance: f64) -> bool {
        self.data.norm() < tolerance
    }
}
