//! Joint velocity limit factor.
//!
//! Penalizes the implied velocity of moving from `previous` to `q` within `dt`:
//!
//! ```text
//! r_i = sqrt(w_i) · max(0, |q_i − previous_i| / dt − v_max_i)
//! ```
//!
//! `previous` is fixed when the factor is built, so this regularizes against the start
//! configuration of a solve rather than between iterations.

use nalgebra::{DMatrix, DVector};

use crate::error::ApexIkResult;
use crate::factors::{Factor, check_param, sqrt_weights};

#[derive(Debug, Clone)]
pub struct JointVelocityFactor {
    previous: DVector<f64>,
    dt: f64,
    max_velocity: DVector<f64>,
    sqrt_weights: DVector<f64>,
}

impl JointVelocityFactor {
    /// `dt` must be positive.
    pub fn new(
        previous: DVector<f64>,
        dt: f64,
        max_velocity: DVector<f64>,
        weights: DVector<f64>,
    ) -> Self {
        JointVelocityFactor {
            previous,
            dt,
            max_velocity,
            sqrt_weights: sqrt_weights(&weights),
        }
    }
}

impl Factor for JointVelocityFactor {
    fn linearize(
        &self,
        params: &[DVector<f64>],
        compute_jacobian: bool,
    ) -> ApexIkResult<(DVector<f64>, Option<DMatrix<f64>>)> {
        let n = self.previous.len();
        check_param(params, 1, 0, n)?;
        let q = &params[0];

        let mut residual = DVector::zeros(n);
        let mut slope = DVector::zeros(n);
        for i in 0..n {
            let delta = q[i] - self.previous[i];
            let excess = delta.abs() / self.dt - self.max_velocity[i];
            if excess > 0.0 {
                residual[i] = self.sqrt_weights[i] * excess;
                slope[i] = self.sqrt_weights[i] * delta.signum() / self.dt;
            }
        }

        let jacobian = compute_jacobian.then(|| DMatrix::from_diagonal(&slope));
        Ok((residual, jacobian))
    }

    fn get_dimension(&self) -> usize {
        self.previous.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factors::test_utils::numeric_jacobian;
    use nalgebra::dvector;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[test]
    fn test_within_velocity_bound_is_free() -> TestResult {
        let factor = JointVelocityFactor::new(dvector![0.0, 1.0], 0.1, dvector![1.0, 1.0], dvector![10.0, 10.0]);
        let (residual, _) = factor.linearize(&[dvector![0.1, 0.9]], false)?;
        assert_eq!(residual, DVector::zeros(2));
        Ok(())
    }

    #[test]
    fn test_excess_velocity_is_penalized_both_directions() -> TestResult {
        let factor = JointVelocityFactor::new(dvector![0.0, 0.0], 0.1, dvector![1.0, 1.0], dvector![1.0, 1.0]);
        let (residual, jac) = factor.linearize(&[dvector![0.3, -0.3]], true)?;
        assert!((residual[0] - 2.0).abs() < 1e-12);
        assert!((residual[1] - 2.0).abs() < 1e-12);
        let jac = jac.ok_or("missing jacobian")?;
        assert!((jac[(0, 0)] - 10.0).abs() < 1e-12);
        assert!((jac[(1, 1)] + 10.0).abs() < 1e-12);
        Ok(())
    }

    #[test]
    fn test_jacobian_matches_finite_difference() -> TestResult {
        let factor = JointVelocityFactor::new(
            dvector![0.2, -0.1, 0.4],
            0.05,
            dvector![0.5, 2.0, 1.0],
            dvector![3.0, 1.0, 0.5],
        );
        let q = dvector![0.5, -0.3, -0.2];
        let (_, jac) = factor.linearize(&[q.clone()], true)?;
        let numeric = numeric_jacobian(&factor, &[q], 1e-7)?;
        assert!((jac.ok_or("missing jacobian")? - numeric).amax() < 1e-6);
        Ok(())
    }
}
