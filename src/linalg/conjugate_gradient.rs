//! Matrix-free preconditioned conjugate gradients on the damped normal equations.
//!
//! `JᵀJ` is never formed. Each CG iteration applies `(JᵀJ + λI) p` as `Jᵀ(J p) + λ p`, and
//! the Jacobi preconditioner is `1 / (‖J_{:,j}‖² + λ)`.

use faer::{Mat, sparse::SparseColMat};
use tracing::debug;

use crate::linalg::{LinAlgError, LinAlgResult, SparseLinearSolver, check_damping, gradient};

#[derive(Debug, Clone)]
pub struct ConjugateGradientSolver {
    /// Iteration cap; `None` means `10 · n`
    max_cg_iterations: Option<usize>,
    /// Stop when `‖residual‖ ≤ cg_tolerance · ‖Jᵀr‖`
    cg_tolerance: f64,
    gradient: Option<Mat<f64>>,
    last_iterations: usize,
}

impl Default for ConjugateGradientSolver {
    fn default() -> Self {
        Self::new()
    }
}

impl ConjugateGradientSolver {
    pub fn new() -> Self {
        Self {
            max_cg_iterations: None,
            cg_tolerance: 1e-12,
            gradient: None,
            last_iterations: 0,
        }
    }

    pub fn with_cg_params(max_iterations: usize, tolerance: f64) -> Self {
        Self {
            max_cg_iterations: Some(max_iterations),
            cg_tolerance: tolerance,
            ..Self::new()
        }
    }

    /// `diag(JᵀJ) + λ`, inverted, with empty directions mapped to 1.
    fn jacobi_preconditioner(jacobians: &SparseColMat<usize, f64>, lambda: f64) -> Vec<f64> {
        (0..jacobians.ncols())
            .map(|col| {
                let diag: f64 =
                    jacobians.val_of_col(col).iter().map(|v| v * v).sum::<f64>() + lambda;
                if diag.abs() < 1e-12 { 1.0 } else { 1.0 / diag }
            })
            .collect()
    }

    /// `(JᵀJ + λI) x`
    fn apply_operator(jacobians: &SparseColMat<usize, f64>, lambda: f64, x: &Mat<f64>) -> Mat<f64> {
        let jx = jacobians.as_ref() * x;
        let mut out = jacobians.as_ref().transpose() * &jx;
        for i in 0..out.nrows() {
            out[(i, 0)] += lambda * x[(i, 0)];
        }
        out
    }

    fn dot(a: &Mat<f64>, b: &Mat<f64>) -> f64 {
        (0..a.nrows()).map(|i| a[(i, 0)] * b[(i, 0)]).sum()
    }

    /// Solve `A x = b` with PCG from `x = 0`.
    fn solve_pcg(
        &mut self,
        jacobians: &SparseColMat<usize, f64>,
        lambda: f64,
        b: &Mat<f64>,
    ) -> LinAlgResult<Mat<f64>> {
        let n = b.nrows();
        let precond = Self::jacobi_preconditioner(jacobians, lambda);
        let max_iterations = self.max_cg_iterations.unwrap_or(10 * n.max(1));
        let threshold = self.cg_tolerance * b.norm_l2();

        let mut x = Mat::<f64>::zeros(n, 1);
        let mut r = b.clone();
        let mut z = Mat::from_fn(n, 1, |i, _| precond[i] * r[(i, 0)]);
        let mut p = z.clone();
        let mut rz_old = Self::dot(&r, &z);
        self.last_iterations = 0;

        if r.norm_l2() <= threshold {
            return Ok(x);
        }

        for iteration in 0..max_iterations {
            let ap = Self::apply_operator(jacobians, lambda, &p);
            let p_ap = Self::dot(&p, &ap);
            if p_ap <= 1e-300 {
                // Not positive definite along p
                if lambda == 0.0 {
                    return Err(LinAlgError::SingularMatrix.log());
                }
                break;
            }

            let alpha = rz_old / p_ap;
            for i in 0..n {
                x[(i, 0)] += alpha * p[(i, 0)];
                r[(i, 0)] -= alpha * ap[(i, 0)];
            }
            self.last_iterations = iteration + 1;

            if r.norm_l2() <= threshold {
                break;
            }

            for i in 0..n {
                z[(i, 0)] = precond[i] * r[(i, 0)];
            }
            let rz_new = Self::dot(&r, &z);
            let beta = rz_new / rz_old;
            for i in 0..n {
                p[(i, 0)] = z[(i, 0)] + beta * p[(i, 0)];
            }
            rz_old = rz_new;
        }

        if x.col(0).iter().any(|v| !v.is_finite()) {
            return Err(LinAlgError::FactorizationFailed(
                "conjugate gradient produced a non-finite step".to_string(),
            )
            .log());
        }
        debug!("CG converged in {} iterations", self.last_iterations);
        Ok(x)
    }
}

impl SparseLinearSolver for ConjugateGradientSolver {
    fn solve_augmented_equation(
        &mut self,
        residuals: &Mat<f64>,
        jacobians: &SparseColMat<usize, f64>,
        lambda: f64,
    ) -> LinAlgResult<Mat<f64>> {
        check_damping(lambda)?;
        let gradient = gradient(residuals, jacobians);
        let rhs = Mat::from_fn(gradient.nrows(), 1, |i, _| -gradient[(i, 0)]);
        let dx = self.solve_pcg(jacobians, lambda, &rhs)?;
        self.gradient = Some(gradient);
        Ok(dx)
    }

    fn get_gradient(&self) -> Option<&Mat<f64>> {
        self.gradient.as_ref()
    }

    fn iterations(&self) -> usize {
        self.last_iterations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::test_utils::{augmented_residual, create_test_data};
    use faer::sparse::Triplet;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[test]
    fn test_cg_solves_augmented_system() -> TestResult {
        let (jacobian, residuals) = create_test_data()?;
        let mut solver = ConjugateGradientSolver::new();
        let step = solver.solve_augmented_equation(&residuals, &jacobian, 0.1)?;
        assert!(augmented_residual(&jacobian, &residuals, 0.1, &step) < 1e-9);
        assert!(solver.iterations() >= 1 && solver.iterations() <= 30);
        Ok(())
    }

    #[test]
    fn test_cg_iteration_cap() -> TestResult {
        let (jacobian, residuals) = create_test_data()?;
        let mut solver = ConjugateGradientSolver::with_cg_params(1, 1e-14);
        solver.solve_augmented_equation(&residuals, &jacobian, 0.1)?;
        assert_eq!(solver.iterations(), 1);
        Ok(())
    }

    #[test]
    fn test_cg_zero_gradient_gives_zero_step() -> TestResult {
        let (jacobian, _) = create_test_data()?;
        let residuals = Mat::<f64>::zeros(4, 1);
        let mut solver = ConjugateGradientSolver::new();
        let step = solver.solve_augmented_equation(&residuals, &jacobian, 0.1)?;
        assert_eq!(step.norm_l2(), 0.0);
        assert_eq!(solver.iterations(), 0);
        Ok(())
    }

    #[test]
    fn test_cg_handles_zero_columns_with_damping() -> TestResult {
        let triplets = vec![Triplet::new(0, 0, 1.0), Triplet::new(1, 0, 2.0)];
        let jacobian = SparseColMat::try_new_from_triplets(2, 2, &triplets)?;
        let residuals = Mat::from_fn(2, 1, |i, _| i as f64 + 1.0);
        let mut solver = ConjugateGradientSolver::new();
        let step = solver.solve_augmented_equation(&residuals, &jacobian, 1e-3)?;
        assert_eq!(step[(1, 0)], 0.0);
        // (5 + λ) δ0 = −5
        assert!((step[(0, 0)] + 5.0 / (5.0 + 1e-3)).abs() < 1e-10);
        Ok(())
    }
}
