//! Euclidean vector space Rⁿ viewed as a Lie group under addition.
//!
//! Joint configurations are stored as `Rn` so that they share the variable and update
//! machinery with SE(3) base poses. All Jacobians are (plus or minus) identity.

use crate::manifold::{LieGroup, Tangent};
use nalgebra::{DMatrix, DVector, Matrix3, Vector3};
use std::{
    fmt,
    fmt::{Display, Formatter},
};

/// Element of Rⁿ.
#[derive(Debug, Clone, PartialEq)]
pub struct Rn {
    data: DVector<f64>,
}

impl Display for Rn {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Rn(dim: {}, data: [", self.data.len())?;
        for (i, val) in self.data.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{:.4}", val)?;
        }
        write!(f, "])")
    }
}

impl From<DVector<f64>> for Rn {
    fn from(data: DVector<f64>) -> Self {
        Rn::new(data)
    }
}

impl From<Rn> for DVector<f64> {
    fn from(rn: Rn) -> Self {
        rn.data
    }
}

impl Rn {
    pub fn new(data: DVector<f64>) -> Self {
        Rn { data }
    }

    pub fn zeros(dim: usize) -> Self {
        Rn::new(DVector::zeros(dim))
    }

    pub fn from_slice(slice: &[f64]) -> Self {
        Rn::new(DVector::from_row_slice(slice))
    }

    pub fn data(&self) -> &DVector<f64> {
        &self.data
    }

    pub fn dim(&self) -> usize {
        self.data.len()
    }
}

impl LieGroup for Rn {
    type TangentVector = RnTangent;
    type JacobianMatrix = DMatrix<f64>;

    fn inverse(&self, jacobian: Option<&mut Self::JacobianMatrix>) -> Self {
        if let Some(jac) = jacobian {
            *jac = -self.jacobian_identity();
        }
        Rn::new(-&self.data)
    }

    fn compose(
        &self,
        other: &Self,
        jacobian_self: Option<&mut Self::JacobianMatrix>,
        jacobian_other: Option<&mut Self::JacobianMatrix>,
    ) -> Self {
        if let Some(jac_self) = jacobian_self {
            *jac_self = self.jacobian_identity();
        }
        if let Some(jac_other) = jacobian_other {
            *jac_other = self.jacobian_identity();
        }
        Rn::new(&self.data + &other.data)
    }

    fn log(&self, jacobian: Option<&mut Self::JacobianMatrix>) -> Self::TangentVector {
        if let Some(jac) = jacobian {
            *jac = self.jacobian_identity();
        }
        RnTangent::new(self.data.clone())
    }

    /// Translates a 3D point by the first three components.
    fn act(
        &self,
        vector: &Vector3<f64>,
        jacobian_self: Option<&mut Self::JacobianMatrix>,
        jacobian_vector: Option<&mut Matrix3<f64>>,
    ) -> Vector3<f64> {
        let offset = Vector3::from_fn(|i, _| self.data.get(i).copied().unwrap_or(0.0));
        if let Some(jac_self) = jacobian_self {
            *jac_self = DMatrix::from_fn(3, self.dim(), |r, c| if r == c { 1.0 } else { 0.0 });
        }
        if let Some(jac_vector) = jacobian_vector {
            *jac_vector = Matrix3::identity();
        }
        vector + offset
    }

    fn adjoint(&self) -> Self::JacobianMatrix {
        self.jacobian_identity()
    }

    fn jacobian_identity(&self) -> Self::JacobianMatrix {
        DMatrix::identity(self.dim(), self.dim())
    }

    fn normalize(&mut self) {}

    fn is_valid(&self, _tolerance: f64) -> bool {
        self.data.iter().all(|v| v.is_finite())
    }

    fn is_approx(&self, other: &Self, tolerance: f64) -> bool {
        self.dim() == other.dim() && (&self.data - &other.data).norm() < tolerance
    }

    fn tangent_dim(&self) -> usize {
        self.dim()
    }
}

/// Tangent vector of Rⁿ, which is Rⁿ itself.
#[derive(Debug, Clone, PartialEq)]
pub struct RnTangent {
    data: DVector<f64>,
}

impl From<DVector<f64>> for RnTangent {
    fn from(data: DVector<f64>) -> Self {
        RnTangent::new(data)
    }
}

impl RnTangent {
    pub fn new(data: DVector<f64>) -> Self {
        RnTangent { data }
    }

    pub fn data(&self) -> &DVector<f64> {
        &self.data
    }

    fn identity(&self) -> DMatrix<f64> {
        DMatrix::identity(self.data.len(), self.data.len())
    }
}

impl Tangent<Rn> for RnTangent {
    const DIM: usize = 0;

    fn exp(&self, jacobian: Option<&mut DMatrix<f64>>) -> Rn {
        if let Some(jac) = jacobian {
            *jac = self.identity();
        }
        Rn::new(self.data.clone())
    }

    fn right_jacobian(&self) -> DMatrix<f64> {
        self.identity()
    }

    fn left_jacobian(&self) -> DMatrix<f64> {
        self.identity()
    }

    fn right_jacobian_inv(&self) -> DMatrix<f64> {
        self.identity()
    }

    fn left_jacobian_inv(&self) -> DMatrix<f64> {
        self.identity()
    }

    fn is_zero(&self, tolerance: f64) -> bool {
        self.data.norm() < tolerance
    }
}
