use faer::{
    Mat, Side,
    linalg::solvers::Solve,
    sparse::linalg::solvers::{Llt, SymbolicLlt},
    sparse::{SparseColMat, Triplet},
};
use std::ops::Mul;

use crate::linalg::{LinAlgError, LinAlgResult, SparseLinearSolver, check_damping, gradient};

/// Sparse Cholesky on the explicitly formed `JᵀJ + λI`.
///
/// The sparsity pattern of `J` is constant during a solve, so the symbolic factorization is
/// computed on the first call and reused afterwards.
#[derive(Debug, Clone, Default)]
pub struct SparseCholeskySolver {
    symbolic_factorization: Option<SymbolicLlt<usize>>,
    gradient: Option<Mat<f64>>,
}

impl SparseCholeskySolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_symbolic_factorization(&self) -> bool {
        self.symbolic_factorization.is_some()
    }
}

impl SparseLinearSolver for SparseCholeskySolver {
    fn solve_augmented_equation(
        &mut self,
        residuals: &Mat<f64>,
        jacobians: &SparseColMat<usize, f64>,
        lambda: f64,
    ) -> LinAlgResult<Mat<f64>> {
        check_damping(lambda)?;
        let n = jacobians.ncols();

        // H = J^T * J
        let jt = jacobians.as_ref().transpose();
        let hessian = jt
            .to_col_major()
            .map_err(|e| {
                LinAlgError::MatrixConversion(
                    "Failed to convert transposed Jacobian to column-major format".to_string(),
                )
                .log_with_source(e)
            })?
            .mul(jacobians.as_ref());

        let gradient = gradient(residuals, jacobians);

        let lambda_i_triplets: Vec<_> = (0..n).map(|i| Triplet::new(i, i, lambda)).collect();
        let lambda_i =
            SparseColMat::try_new_from_triplets(n, n, &lambda_i_triplets).map_err(|e| {
                LinAlgError::SparseMatrixCreation("Failed to create lambda*I matrix".to_string())
                    .log_with_source(e)
            })?;
        let augmented_hessian = &hessian + lambda_i;

        let sym = if let Some(ref cached_sym) = self.symbolic_factorization {
            cached_sym.clone()
        } else {
            let new_sym =
                SymbolicLlt::try_new(augmented_hessian.symbolic(), Side::Lower).map_err(|e| {
                    LinAlgError::FactorizationFailed(
                        "Symbolic Cholesky decomposition failed for augmented system".to_string(),
                    )
                    .log_with_source(e)
                })?;
            self.symbolic_factorization = Some(new_sym.clone());
            new_sym
        };

        let cholesky = Llt::try_new_with_symbolic(sym, augmented_hessian.as_ref(), Side::Lower)
            .map_err(|e| LinAlgError::SingularMatrix.log_with_source(e))?;

        let dx = cholesky.solve(-&gradient);
        self.gradient = Some(gradient);
        Ok(dx)
    }

    fn get_gradient(&self) -> Option<&Mat<f64>> {
        self.gradient.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::test_utils::{augmented_residual, create_test_data};

    const TOLERANCE: f64 = 1e-10;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[test]
    fn test_solver_creation() {
        let solver = SparseCholeskySolver::new();
        assert!(!solver.has_symbolic_factorization());
        assert!(solver.get_gradient().is_none());
    }

    #[test]
    fn test_solve_augmented_equation() -> TestResult {
        let mut solver = SparseCholeskySolver::new();
        let (jacobian, residuals) = create_test_data()?;
        let solution = solver.solve_augmented_equation(&residuals, &jacobian, 0.1)?;
        assert_eq!(solution.nrows(), 3);
        assert_eq!(solution.ncols(), 1);
        assert!(augmented_residual(&jacobian, &residuals, 0.1, &solution) < TOLERANCE);
        assert_eq!(solver.iterations(), 0);
        Ok(())
    }

    #[test]
    fn test_symbolic_pattern_caching() -> TestResult {
        let mut solver = SparseCholeskySolver::new();
        let (jacobian, residuals) = create_test_data()?;

        let sol1 = solver.solve_augmented_equation(&residuals, &jacobian, 0.01)?;
        assert!(solver.has_symbolic_factorization());
        let sol2 = solver.solve_augmented_equation(&residuals, &jacobian, 0.01)?;
        for i in 0..sol1.nrows() {
            assert!((sol1[(i, 0)] - sol2[(i, 0)]).abs() < TOLERANCE);
        }
        Ok(())
    }

    #[test]
    fn test_larger_damping_shortens_step() -> TestResult {
        let mut solver = SparseCholeskySolver::new();
        let (jacobian, residuals) = create_test_data()?;
        let small = solver.solve_augmented_equation(&residuals, &jacobian, 0.01)?;
        let large = solver.solve_augmented_equation(&residuals, &jacobian, 100.0)?;
        assert!(large.norm_l2() < small.norm_l2());

        // Large damping approaches a scaled gradient step
        let gradient = solver.get_gradient().ok_or("missing gradient")?;
        for i in 0..3 {
            assert!((large[(i, 0)] + gradient[(i, 0)] / 100.0).abs() < 2e-2);
        }
        Ok(())
    }

    #[test]
    fn test_zero_column_needs_damping() -> TestResult {
        // A locked DOF leaves an all-zero Jacobian column
        let triplets = vec![Triplet::new(0, 0, 1.0), Triplet::new(1, 0, 2.0), Triplet::new(1, 1, 0.0)];
        let jacobian = SparseColMat::try_new_from_triplets(2, 2, &triplets)?;
        let residuals = Mat::from_fn(2, 1, |i, _| i as f64 + 1.0);
        let mut solver = SparseCholeskySolver::new();
        let step = solver.solve_augmented_equation(&residuals, &jacobian, 1e-3)?;
        assert_eq!(step[(1, 0)], 0.0);
        Ok(())
    }
}
