//! Cost factors for inverse kinematics.
//!
//! Each factor maps the current variable values to a weighted residual block `r(x)` and its
//! Jacobian. The solver minimizes `Σ ‖r_i(x)‖²`. Weights are applied as `sqrt(w)` on the
//! residual, so a weight `w` contributes `w · e²` per dimension.
//!
//! - [`PoseFactor`]: target link poses, `log(T*⁻¹ · B · T_link(q))`
//! - [`JointLimitFactor`]: hinge on the joint position bounds
//! - [`JointVelocityFactor`]: hinge on `|q − q_prev| / dt` against the velocity bounds
//! - [`RestFactor`]: deviation from a rest configuration
//! - [`ManipulabilityFactor`]: inverse Yoshikawa manipulability of target links
//! - [`SelfCollisionFactor`] / [`WorldCollisionFactor`]: hinge on signed distance margins
//!
//! Parameters arrive in the order of the variable keys the factor was registered with.
//! Joint configurations are Rⁿ vectors; the base pose is the SE(3) vector
//! `[tx, ty, tz, qw, qx, qy, qz]`. Jacobian columns follow the tangent layout of each
//! variable in the same order.

use nalgebra::{DMatrix, DVector};
use thiserror::Error;
use tracing::error;

use crate::error::ApexIkResult;

pub mod collision_factor;
pub mod joint_limit_factor;
pub mod joint_velocity_factor;
pub mod manipulability_factor;
pub mod pose_factor;
pub mod rest_factor;

pub use collision_factor::{SelfCollisionFactor, WorldCollisionFactor};
pub use joint_limit_factor::JointLimitFactor;
pub use joint_velocity_factor::JointVelocityFactor;
pub use manipulability_factor::ManipulabilityFactor;
pub use pose_factor::{PoseFactor, PoseTarget};
pub use rest_factor::RestFactor;

#[derive(Debug, Clone, Error)]
pub enum FactorError {
    #[error("Invalid dimension: expected {expected}, got {actual}")]
    InvalidDimension { expected: usize, actual: usize },

    #[error("Expected {expected} parameter blocks, got {actual}")]
    MissingParameters { expected: usize, actual: usize },

    #[error("Numerical instability: {0}")]
    NumericalInstability(String),
}

impl FactorError {
    #[must_use]
    pub fn log(self) -> Self {
        error!("{}", self);
        self
    }
}

pub type FactorResult<T> = Result<T, FactorError>;

/// A residual block with an analytic (or finite-difference) Jacobian.
pub trait Factor: Send + Sync {
    /// Evaluate the residual and, when `compute_jacobian` is set, its Jacobian.
    ///
    /// Errors raised by the kinematic or collision model are returned unchanged.
    fn linearize(
        &self,
        params: &[DVector<f64>],
        compute_jacobian: bool,
    ) -> ApexIkResult<(DVector<f64>, Option<DMatrix<f64>>)>;

    /// Number of residual rows.
    fn get_dimension(&self) -> usize;
}

/// Checks the parameter block count and that block `index` has length `dim`.
pub(crate) fn check_param(
    params: &[DVector<f64>],
    expected_blocks: usize,
    index: usize,
    dim: usize,
) -> FactorResult<()> {
    if params.len() < expected_blocks {
        return Err(FactorError::MissingParameters {
            expected: expected_blocks,
            actual: params.len(),
        }
        .log());
    }
    if params[index].len() != dim {
        return Err(FactorError::InvalidDimension {
            expected: dim,
            actual: params[index].len(),
        }
        .log());
    }
    Ok(())
}

/// Element-wise `sqrt(w)`, with weights clamped at zero.
pub(crate) fn sqrt_weights(weights: &DVector<f64>) -> DVector<f64> {
    weights.map(|w| w.max(0.0).sqrt())
}

#[cfg(test)]
pub(crate) mod test_utils {
    use super::Factor;
    use nalgebra::{DMatrix, DVector};

    /// Central-difference Jacobian over plain vector parameters.
    ///
    /// Only valid for blocks whose tangent equals their vector form (Rⁿ).
    pub fn numeric_jacobian(
        factor: &dyn Factor,
        params: &[DVector<f64>],
        h: f64,
    ) -> Result<DMatrix<f64>, Box<dyn std::error::Error>> {
        let cols: usize = params.iter().map(|p| p.len()).sum();
        let mut jac = DMatrix::zeros(factor.get_dimension(), cols);
        let mut col = 0;
        for block in 0..params.len() {
            for i in 0..params[block].len() {
                let mut forward = params.to_vec();
                let mut backward = params.to_vec();
                forward[block][i] += h;
                backward[block][i] -= h;
                let (r_f, _) = factor.linearize(&forward, false)?;
                let (r_b, _) = factor.linearize(&backward, false)?;
                jac.set_column(col, &((r_f - r_b) / (2.0 * h)));
                col += 1;
            }
        }
        Ok(jac)
    }
}
