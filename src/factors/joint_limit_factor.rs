//! Joint position limit factor.
//!
//! ```text
//! r_i = sqrt(w_i) · (max(0, q_i − upper_i) + max(0, lower_i − q_i))
//! ```
//!
//! Zero strictly inside (and on) the bounds, growing linearly outside.

use nalgebra::{DMatrix, DVector};

use crate::error::ApexIkResult;
use crate::factors::{Factor, check_param, sqrt_weights};

#[derive(Debug, Clone)]
pub struct JointLimitFactor {
    lower: DVector<f64>,
    upper: DVector<f64>,
    sqrt_weights: DVector<f64>,
}

impl JointLimitFactor {
    pub fn new(lower: DVector<f64>, upper: DVector<f64>, weights: DVector<f64>) -> Self {
        JointLimitFactor {
            lower,
            upper,
            sqrt_weights: sqrt_weights(&weights),
        }
    }
}

impl Factor for JointLimitFactor {
    fn linearize(
        &self,
        params: &[DVector<f64>],
        compute_jacobian: bool,
    ) -> ApexIkResult<(DVector<f64>, Option<DMatrix<f64>>)> {
        let n = self.lower.len();
        check_param(params, 1, 0, n)?;
        let q = &params[0];

        let mut residual = DVector::zeros(n);
        let mut slope = DVector::zeros(n);
        for i in 0..n {
            let s = self.sqrt_weights[i];
            if q[i] > self.upper[i] {
                residual[i] = s * (q[i] - self.upper[i]);
                slope[i] = s;
            } else if q[i] < self.lower[i] {
                residual[i] = s * (self.lower[i] - q[i]);
                slope[i] = -s;
            }
        }

        let jacobian = compute_jacobian.then(|| DMatrix::from_diagonal(&slope));
        Ok((residual, jacobian))
    }

    fn get_dimension(&self) -> usize {
        self.lower.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factors::test_utils::numeric_jacobian;
    use nalgebra::dvector;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn factor(weight: f64) -> JointLimitFactor {
        JointLimitFactor::new(
            dvector![-1.0, -1.0, 0.0],
            dvector![1.0, 1.0, 0.5],
            DVector::repeat(3, weight),
        )
    }

    #[test]
    fn test_zero_inside_bounds() -> TestResult {
        let (residual, jac) = factor(100.0).linearize(&[dvector![0.3, -0.99, 0.5]], true)?;
        assert_eq!(residual, DVector::zeros(3));
        assert_eq!(jac.ok_or("missing jacobian")?, DMatrix::zeros(3, 3));
        Ok(())
    }

    #[test]
    fn test_grows_linearly_outside_bounds() -> TestResult {
        let limit = factor(4.0);
        let (near, _) = limit.linearize(&[dvector![1.1, -1.2, 0.0]], false)?;
        let (far, _) = limit.linearize(&[dvector![1.5, -2.0, 0.0]], false)?;
        assert!((near[0] - 0.2).abs() < 1e-12);
        assert!((near[1] - 0.4).abs() < 1e-12);
        assert!(far[0] > near[0] && far[1] > near[1]);
        assert!((far[0] - 1.0).abs() < 1e-12);
        Ok(())
    }

    #[test]
    fn test_jacobian_matches_finite_difference() -> TestResult {
        let limit = factor(9.0);
        let q = dvector![1.3, -1.4, 0.2];
        let (_, jac) = limit.linearize(&[q.clone()], true)?;
        let numeric = numeric_jacobian(&limit, &[q], 1e-6)?;
        assert!((jac.ok_or("missing jacobian")? - numeric).amax() < 1e-8);
        Ok(())
    }

    #[test]
    fn test_zero_weight_contributes_nothing() -> TestResult {
        let (residual, jac) = factor(0.0).linearize(&[dvector![5.0, -5.0, 5.0]], true)?;
        assert_eq!(residual.norm(), 0.0);
        assert_eq!(jac.ok_or("missing jacobian")?.norm(), 0.0);
        Ok(())
    }
}
