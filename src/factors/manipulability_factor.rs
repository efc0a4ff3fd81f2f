//! Manipulability factor.
//!
//! For each link the residual is `sqrt(w) / (m(q) + ε)`, where `m` is the Yoshikawa measure
//! of the 3×n translational Jacobian:
//!
//! ```text
//! m = sqrt(det(Jp · Jpᵀ))      n ≥ 3
//! m = sqrt(det(Jpᵀ · Jp))      n < 3
//! ```
//!
//! Driving the residual down moves the arm away from singular configurations. The measure
//! has no convenient closed-form derivative, so the Jacobian is a central difference.

use std::sync::Arc;

use nalgebra::{DMatrix, DVector};

use crate::error::ApexIkResult;
use crate::factors::{Factor, check_param};
use crate::kinematics::KinematicModel;

const EPSILON: f64 = 1e-3;
const STEP: f64 = 1e-6;

pub struct ManipulabilityFactor {
    model: Arc<dyn KinematicModel>,
    links: Vec<usize>,
    sqrt_weight: f64,
}

impl ManipulabilityFactor {
    pub fn new(model: Arc<dyn KinematicModel>, links: Vec<usize>, weight: f64) -> Self {
        ManipulabilityFactor {
            model,
            links,
            sqrt_weight: weight.max(0.0).sqrt(),
        }
    }

    /// Yoshikawa measure of `link` at `q`.
    pub fn manipulability(&self, q: &DVector<f64>, link: usize) -> ApexIkResult<f64> {
        let translational = self.model.jacobian(q, link)?.rows(0, 3).into_owned();
        let gram = if translational.ncols() >= 3 {
            &translational * translational.transpose()
        } else {
            translational.transpose() * &translational
        };
        Ok(gram.determinant().max(0.0).sqrt())
    }

    fn residual(&self, q: &DVector<f64>) -> ApexIkResult<DVector<f64>> {
        let mut residual = DVector::zeros(self.links.len());
        for (i, &link) in self.links.iter().enumerate() {
            residual[i] = self.sqrt_weight / (self.manipulability(q, link)? + EPSILON);
        }
        Ok(residual)
    }
}

impl Factor for ManipulabilityFactor {
    fn linearize(
        &self,
        params: &[DVector<f64>],
        compute_jacobian: bool,
    ) -> ApexIkResult<(DVector<f64>, Option<DMatrix<f64>>)> {
        let n = self.model.num_actuated_joints();
        check_param(params, 1, 0, n)?;
        let q = &params[0];
        let residual = self.residual(q)?;

        if !compute_jacobian {
            return Ok((residual, None));
        }
        if self.sqrt_weight == 0.0 {
            return Ok((residual, Some(DMatrix::zeros(self.links.len(), n))));
        }

        let mut jacobian = DMatrix::zeros(self.links.len(), n);
        let mut perturbed = q.clone();
        for j in 0..n {
            perturbed[j] = q[j] + STEP;
            let forward = self.residual(&perturbed)?;
            perturbed[j] = q[j] - STEP;
            let backward = self.residual(&perturbed)?;
            perturbed[j] = q[j];
            jacobian.set_column(j, &((forward - backward) / (2.0 * STEP)));
        }
        Ok((residual, Some(jacobian)))
    }

    fn get_dimension(&self) -> usize {
        self.links.len()
    }
}
