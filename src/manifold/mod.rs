//! Lie group manifolds for the optimization variables.
//!
//! Joint configurations live in a plain vector space and the optional floating base lives on
//! SE(3). The solver only ever touches them through the traits below, so both kinds of variable
//! are updated with the same retraction `x ⊞ δ`.
//!
//! Lie group M,° | size | dim | X ∈ M             | T_X M        | Exp(T)          | Comp. | Action
//! ------------- | ---- | --- | ----------------- | ------------ | --------------- | ----- | ------
//! n-D vector    | Rⁿ,+ | n   | v ∈ Rⁿ            | v ∈ Rⁿ       | v = exp(v)      | v₁+v₂ | v + x
//! Rotation      | SO(3)| 3   | R                 | [θ] ∈ R³     | R = exp([θ]x)   | R₁R₂  | Rx
//! Rigid motion  | SE(3)| 6   | M = [R t; 0 1]    | [ρ θ] ∈ R⁶   | Exp([ρ θ])      | M₁M₂  | Rx+t
//!
//! Conventions follow [manif](https://github.com/artivis/manif): right perturbations,
//! `x ⊞ τ = x ∘ exp(τ)`, `y ⊟ x = log(x⁻¹ ∘ y)`, SE(3) tangents ordered translation first.

use nalgebra::{Matrix3, Vector3};
use std::ops::{Mul, Neg};
use std::{
    error, fmt,
    fmt::{Display, Formatter},
};

pub mod rn;
pub mod se3;
pub mod so3;

/// Angles below this are treated with Taylor expansions.
pub(crate) const SMALL_ANGLE: f64 = 1e-8;

/// Errors that can occur during manifold operations.
#[derive(Debug, Clone, PartialEq)]
pub enum ManifoldError {
    /// Vector passed for a group element or tangent has the wrong length
    DimensionMismatch { expected: usize, actual: usize },
    /// NaN or Inf detected in manifold element
    InvalidNumber,
    /// Quaternion could not be normalized
    NormalizationFailed(String),
}

/// Manifold kinds a problem variable can be declared with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifoldType {
    RN,
    SE3,
}

impl Display for ManifoldError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ManifoldError::DimensionMismatch { expected, actual } => {
                write!(f, "Dimension mismatch: expected {expected}, got {actual}")
            }
            ManifoldError::InvalidNumber => {
                write!(f, "Invalid number: NaN or Inf detected")
            }
            ManifoldError::NormalizationFailed(msg) => {
                write!(f, "Normalization failed: {msg}")
            }
        }
    }
}

impl error::Error for ManifoldError {}

pub type ManifoldResult<T> = Result<T, ManifoldError>;

/// Core trait for Lie group operations.
///
/// Every operation optionally writes the Jacobian of its result with respect to its inputs,
/// expressed in the local (right) tangent spaces.
pub trait LieGroup: Clone + PartialEq {
    /// Tangent space (Lie algebra in vector form)
    type TangentVector: Tangent<Self>;

    /// Square matrix over the tangent space
    type JacobianMatrix: Clone
        + PartialEq
        + Neg<Output = Self::JacobianMatrix>
        + Mul<Output = Self::JacobianMatrix>
        + std::ops::Index<(usize, usize), Output = f64>;

    fn inverse(&self, jacobian: Option<&mut Self::JacobianMatrix>) -> Self;

    fn compose(
        &self,
        other: &Self,
        jacobian_self: Option<&mut Self::JacobianMatrix>,
        jacobian_other: Option<&mut Self::JacobianMatrix>,
    ) -> Self;

    /// Logarithmic map, group element to tangent vector.
    fn log(&self, jacobian: Option<&mut Self::JacobianMatrix>) -> Self::TangentVector;

    /// Apply the group element to a 3D point.
    fn act(
        &self,
        vector: &Vector3<f64>,
        jacobian_self: Option<&mut Self::JacobianMatrix>,
        jacobian_vector: Option<&mut Matrix3<f64>>,
    ) -> Vector3<f64>;

    fn adjoint(&self) -> Self::JacobianMatrix;

    fn jacobian_identity(&self) -> Self::JacobianMatrix;

    fn normalize(&mut self);

    fn is_valid(&self, tolerance: f64) -> bool;

    fn is_approx(&self, other: &Self, tolerance: f64) -> bool {
        self.right_minus(other, None, None).is_zero(tolerance)
    }

    /// `g ⊞ τ = g ∘ exp(τ)`
    fn right_plus(
        &self,
        tangent: &Self::TangentVector,
        jacobian_self: Option<&mut Self::JacobianMatrix>,
        jacobian_tangent: Option<&mut Self::JacobianMatrix>,
    ) -> Self {
        let exp_tangent = tangent.exp(None);

        if let Some(jac_tangent) = jacobian_tangent {
            *jac_tangent = tangent.right_jacobian();
        }

        self.compose(&exp_tangent, jacobian_self, None)
    }

    /// `g1 ⊟ g2 = log(g2⁻¹ ∘ g1)`
    fn right_minus(
        &self,
        other: &Self,
        jacobian_self: Option<&mut Self::JacobianMatrix>,
        jacobian_other: Option<&mut Self::JacobianMatrix>,
    ) -> Self::TangentVector {
        let result = other.inverse(None).compose(self, None, None).log(None);

        if let Some(jac_self) = jacobian_self {
            *jac_self = result.right_jacobian_inv();
        }

        if let Some(jac_other) = jacobian_other {
            *jac_other = -result.left_jacobian_inv();
        }

        result
    }

    fn plus(
        &self,
        tangent: &Self::TangentVector,
        jacobian_self: Option<&mut Self::JacobianMatrix>,
        jacobian_tangent: Option<&mut Self::JacobianMatrix>,
    ) -> Self {
        self.right_plus(tangent, jacobian_self, jacobian_tangent)
    }

    fn minus(
        &self,
        other: &Self,
        jacobian_self: Option<&mut Self::JacobianMatrix>,
        jacobian_other: Option<&mut Self::JacobianMatrix>,
    ) -> Self::TangentVector {
        self.right_minus(other, jacobian_self, jacobian_other)
    }

    /// `g1⁻¹ ∘ g2`
    fn between(&self, other: &Self) -> Self {
        self.inverse(None).compose(other, None, None)
    }

    fn tangent_dim(&self) -> usize {
        Self::TangentVector::DIM
    }
}

/// Tangent space of a [`LieGroup`].
pub trait Tangent<Group: LieGroup>: Clone + PartialEq {
    /// Degrees of freedom. Zero marks a dynamically sized space.
    const DIM: usize;

    fn exp(&self, jacobian: Option<&mut Group::JacobianMatrix>) -> Group;

    fn right_jacobian(&self) -> Group::JacobianMatrix;

    fn left_jacobian(&self) -> Group::JacobianMatrix;

    fn right_jacobian_inv(&self) -> Group::JacobianMatrix;

    fn left_jacobian_inv(&self) -> Group::JacobianMatrix;

    fn is_zero(&self, tolerance: f64) -> bool;
}

/// Skew-symmetric matrix `[v]×` such that `[v]× w = v × w`.
pub fn skew(v: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(0.0, -v.z, v.y, v.z, 0.0, -v.x, -v.y, v.x, 0.0)
}
