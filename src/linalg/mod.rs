//! Linear solvers for the damped normal equations.
//!
//! Every Levenberg-Marquardt iteration solves
//!
//! ```text
//! (JᵀJ + λI) δ = −Jᵀr
//! ```
//!
//! for the sparse stacked Jacobian `J`. Three interchangeable backends implement
//! [`SparseLinearSolver`]:
//!
//! - [`SparseCholeskySolver`]: faer sparse LLᵀ, symbolic factorization cached across iterations
//! - [`ConjugateGradientSolver`]: Jacobi-preconditioned CG that never forms `JᵀJ`
//! - [`DenseCholeskySolver`]: nalgebra dense Cholesky, for small problems

pub mod cholesky;
pub mod conjugate_gradient;
pub mod dense_cholesky;

use faer::{Mat, sparse::SparseColMat};
use std::{
    fmt,
    fmt::{Display, Formatter},
};
use thiserror::Error;
use tracing::error;

pub use cholesky::SparseCholeskySolver;
pub use conjugate_gradient::ConjugateGradientSolver;
pub use dense_cholesky::DenseCholeskySolver;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum LinearSolverType {
    #[default]
    SparseCholesky,
    ConjugateGradient,
    DenseCholesky,
}

impl Display for LinearSolverType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            LinearSolverType::SparseCholesky => write!(f, "Sparse Cholesky"),
            LinearSolverType::ConjugateGradient => write!(f, "Conjugate Gradient"),
            LinearSolverType::DenseCholesky => write!(f, "Dense Cholesky"),
        }
    }
}

impl LinearSolverType {
    pub fn create_solver(self) -> Box<dyn SparseLinearSolver> {
        match self {
            LinearSolverType::SparseCholesky => Box::new(SparseCholeskySolver::new()),
            LinearSolverType::ConjugateGradient => Box::new(ConjugateGradientSolver::new()),
            LinearSolverType::DenseCholesky => Box::new(DenseCholeskySolver::new()),
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum LinAlgError {
    #[error("Matrix factorization failed: {0}")]
    FactorizationFailed(String),

    #[error("Singular matrix detected (matrix is not invertible)")]
    SingularMatrix,

    #[error("Failed to create sparse matrix: {0}")]
    SparseMatrixCreation(String),

    #[error("Matrix conversion failed: {0}")]
    MatrixConversion(String),

    #[error("Invalid damping factor {0}, must be finite and non-negative")]
    InvalidDamping(f64),
}

impl LinAlgError {
    #[must_use]
    pub fn log(self) -> Self {
        error!("{}", self);
        self
    }

    #[must_use]
    pub fn log_with_source<E: std::fmt::Debug>(self, source_error: E) -> Self {
        error!("{} | Source: {:?}", self, source_error);
        self
    }
}

pub type LinAlgResult<T> = Result<T, LinAlgError>;

pub trait SparseLinearSolver {
    /// Solve `(JᵀJ + λI) δ = −Jᵀr` and return `δ` as an `n × 1` matrix.
    ///
    /// The gradient `Jᵀr` of the last call is kept for [`get_gradient`](Self::get_gradient).
    fn solve_augmented_equation(
        &mut self,
        residuals: &Mat<f64>,
        jacobians: &SparseColMat<usize, f64>,
        lambda: f64,
    ) -> LinAlgResult<Mat<f64>>;

    /// `Jᵀr` of the last solve.
    fn get_gradient(&self) -> Option<&Mat<f64>>;

    /// Inner iterations spent by the last solve (zero for direct solvers).
    fn iterations(&self) -> usize {
        0
    }
}

/// `Jᵀr` as an `n × 1` matrix.
pub(crate) fn gradient(residuals: &Mat<f64>, jacobians: &SparseColMat<usize, f64>) -> Mat<f64> {
    jacobians.as_ref().transpose() * residuals
}

pub(crate) fn check_damping(lambda: f64) -> LinAlgResult<()> {
    if !lambda.is_finite() || lambda < 0.0 {
        return Err(LinAlgError::InvalidDamping(lambda).log());
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod test_utils {
    use faer::{
        Mat,
        sparse::{SparseColMat, Triplet},
    };

    /// Overdetermined 4×3 system shared by the backend tests.
    pub fn create_test_data()
    -> Result<(SparseColMat<usize, f64>, Mat<f64>), faer::sparse::CreationError> {
        let triplets = vec![
            Triplet::new(0, 0, 2.0),
            Triplet::new(0, 1, 1.0),
            Triplet::new(1, 0, 1.0),
            Triplet::new(1, 1, 3.0),
            Triplet::new(1, 2, 1.0),
            Triplet::new(2, 1, 1.0),
            Triplet::new(2, 2, 2.0),
            Triplet::new(3, 0, 1.5),
            Triplet::new(3, 2, 0.5),
        ];
        let jacobian = SparseColMat::try_new_from_triplets(4, 3, &triplets)?;

        let residuals = Mat::from_fn(4, 1, |i, _| match i {
            0 => 1.0,
            1 => -2.0,
            2 => 0.5,
            3 => 1.2,
            _ => 0.0,
        });

        Ok((jacobian, residuals))
    }

    /// Residual norm of `(JᵀJ + λI) δ + Jᵀr`.
    pub fn augmented_residual(
        jacobian: &SparseColMat<usize, f64>,
        residuals: &Mat<f64>,
        lambda: f64,
        step: &Mat<f64>,
    ) -> f64 {
        let dense = jacobian.to_dense();
        let lhs = dense.transpose() * &dense * step + step * faer::Scale(lambda);
        let rhs = dense.transpose() * residuals;
        (lhs + rhs).norm_l2()
    }
}
