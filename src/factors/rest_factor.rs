//! Rest configuration prior, `r = sqrt(w) ⊙ (q − q_rest)`.

use nalgebra::{DMatrix, DVector};

use crate::error::ApexIkResult;
use crate::factors::{Factor, check_param, sqrt_weights};

#[derive(Debug, Clone)]
pub struct RestFactor {
    rest: DVector<f64>,
    sqrt_weights: DVector<f64>,
}

impl RestFactor {
    pub fn new(rest: DVector<f64>, weights: DVector<f64>) -> Self {
        RestFactor {
            rest,
            sqrt_weights: sqrt_weights(&weights),
        }
    }
}

impl Factor for RestFactor {
    fn linearize(
        &self,
        params: &[DVector<f64>],
        compute_jacobian: bool,
    ) -> ApexIkResult<(DVector<f64>, Option<DMatrix<f64>>)> {
        check_param(params, 1, 0, self.rest.len())?;
        let residual = (&params[0] - &self.rest).component_mul(&self.sqrt_weights);
        let jacobian = compute_jacobian.then(|| DMatrix::from_diagonal(&self.sqrt_weights));
        Ok((residual, jacobian))
    }

    fn get_dimension(&self) -> usize {
        self.rest.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::dvector;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[test]
    fn test_zero_only_at_rest() -> TestResult {
        let factor = RestFactor::new(dvector![0.1, -0.2], DVector::repeat(2, 0.001));
        let (at_rest, _) = factor.linearize(&[dvector![0.1, -0.2]], false)?;
        assert_eq!(at_rest.norm(), 0.0);
        let (away, _) = factor.linearize(&[dvector![0.1, 0.8]], false)?;
        assert!((away[1] - 0.001_f64.sqrt()).abs() < 1e-12);
        Ok(())
    }

    #[test]
    fn test_jacobian_is_weight_diagonal() -> TestResult {
        let factor = RestFactor::new(DVector::zeros(3), dvector![1.0, 4.0, 9.0]);
        let (_, jac) = factor.linearize(&[dvector![1.0, 1.0, 1.0]], true)?;
        assert_eq!(jac.ok_or("missing jacobian")?, DMatrix::from_diagonal(&dvector![1.0, 2.0, 3.0]));
        Ok(())
    }
}
