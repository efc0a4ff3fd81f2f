//! Dense Cholesky backend.
//!
//! Converts `J` to a dense nalgebra matrix and factors `JᵀJ + λI` with
//! [`nalgebra::linalg::Cholesky`]. IK problems have a handful of columns, where this is often
//! the fastest choice.

use faer::{Mat, sparse::SparseColMat};
use nalgebra::{DMatrix, DVector};

use crate::linalg::{LinAlgError, LinAlgResult, SparseLinearSolver, check_damping, gradient};

#[derive(Debug, Clone, Default)]
pub struct DenseCholeskySolver {
    gradient: Option<Mat<f64>>,
}

impl DenseCholeskySolver {
    pub fn new() -> Self {
        Self::default()
    }

    fn to_nalgebra(jacobians: &SparseColMat<usize, f64>) -> DMatrix<f64> {
        let mut dense = DMatrix::zeros(jacobians.nrows(), jacobians.ncols());
        let symbolic = jacobians.symbolic();
        for col in 0..jacobians.ncols() {
            let rows = symbolic.row_idx_of_col_raw(col);
            let values = jacobians.val_of_col(col);
            for (&row, &value) in rows.iter().zip(values) {
                dense[(row, col)] += value;
            }
        }
        dense
    }
}

impl SparseLinearSolver for DenseCholeskySolver {
    fn solve_augmented_equation(
        &mut self,
        residuals: &Mat<f64>,
        jacobians: &SparseColMat<usize, f64>,
        lambda: f64,
    ) -> LinAlgResult<Mat<f64>> {
        check_damping(lambda)?;
        let n = jacobians.ncols();
        let jacobian = Self::to_nalgebra(jacobians);
        let gradient = gradient(residuals, jacobians);

        let mut augmented = jacobian.tr_mul(&jacobian);
        for i in 0..n {
            augmented[(i, i)] += lambda;
        }
        let rhs = DVector::from_fn(n, |i, _| -gradient[(i, 0)]);

        let cholesky = augmented.cholesky().ok_or_else(|| LinAlgError::SingularMatrix.log())?;
        let dx = cholesky.solve(&rhs);

        self.gradient = Some(gradient);
        Ok(Mat::from_fn(n, 1, |i, _| dx[i]))
    }

    fn get_gradient(&self) -> Option<&Mat<f64>> {
        self.gradient.as_ref()
    }
}
