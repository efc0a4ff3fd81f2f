//! Nonlinear least-squares optimization.
//!
//! [`LevenbergMarquardt`] minimizes `½‖r(x)‖²` over the variables of a
//! [`Problem`](crate::core::problem::Problem), solving the damped normal equations with one of
//! the [`linalg`](crate::linalg) backends at every iteration.

use crate::core::problem::VariableEnum;
use crate::linalg;
use faer::{Mat, MatRef};
use std::collections::HashMap;
use std::{
    fmt,
    fmt::{Display, Formatter},
};
use thiserror::Error;
use tracing::error;
use web_time as time;

pub mod levenberg_marquardt;

pub use levenberg_marquardt::{LevenbergMarquardt, LevenbergMarquardtConfig};

#[derive(Debug, Clone, Error)]
pub enum OptimizerError {
    /// The linear system could not be solved even at maximum damping
    #[error("Linear system solve failed: {0}")]
    LinearSolveFailed(String),

    #[error("Invalid optimization parameters: {0}")]
    InvalidParameters(String),

    #[error("Linear algebra error: {0}")]
    LinAlg(#[from] linalg::LinAlgError),

    #[error("Problem has no variables to optimize")]
    EmptyProblem,

    #[error("Problem has no residual blocks")]
    NoResidualBlocks,
}

impl OptimizerError {
    /// Log the error with tracing::error and return self for chaining
    #[must_use]
    pub fn log(self) -> Self {
        error!("{}", self);
        self
    }

    /// Log the error together with the error that caused it
    #[must_use]
    pub fn log_with_source<E: std::fmt::Debug>(self, source_error: E) -> Self {
        error!("{} | Source: {:?}", self, source_error);
        self
    }
}

pub type OptimizerResult<T> = Result<T, OptimizerError>;

/// Detailed convergence information.
#[derive(Debug, Clone)]
pub struct ConvergenceInfo {
    /// ‖Jᵀr‖ at the returned iterate
    pub final_gradient_norm: f64,
    /// Norm of the last proposed step
    pub final_parameter_update_norm: f64,
    pub final_damping: f64,
    pub cost_evaluations: usize,
    pub jacobian_evaluations: usize,
}

impl Display for ConvergenceInfo {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Final gradient norm: {:.2e}, Final parameter update norm: {:.2e}, Final damping: {:.2e}, Cost evaluations: {}, Jacobian evaluations: {}",
            self.final_gradient_norm,
            self.final_parameter_update_norm,
            self.final_damping,
            self.cost_evaluations,
            self.jacobian_evaluations
        )
    }
}

/// Why the optimizer stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimizationStatus {
    /// Relative cost change fell below the cost tolerance
    CostToleranceReached,
    /// `‖δ‖ ≤ tol (‖x‖ + tol)` after an accepted step
    ParameterToleranceReached,
    /// `‖Jᵀr‖` fell below the gradient tolerance
    GradientToleranceReached,
    MaxIterationsReached,
    Timeout,
    /// NaN or Inf in the cost, gradient or step
    InvalidNumericalValues,
}

impl OptimizationStatus {
    /// True for the three tolerance-based stops.
    pub fn is_converged(&self) -> bool {
        matches!(
            self,
            OptimizationStatus::CostToleranceReached
                | OptimizationStatus::ParameterToleranceReached
                | OptimizationStatus::GradientToleranceReached
        )
    }
}

impl Display for OptimizationStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            OptimizationStatus::CostToleranceReached => write!(f, "Cost tolerance reached"),
            OptimizationStatus::ParameterToleranceReached => {
                write!(f, "Parameter tolerance reached")
            }
            OptimizationStatus::GradientToleranceReached => write!(f, "Gradient tolerance reached"),
            OptimizationStatus::MaxIterationsReached => write!(f, "Maximum iterations reached"),
            OptimizationStatus::Timeout => write!(f, "Timeout"),
            OptimizationStatus::InvalidNumericalValues => {
                write!(f, "Invalid numerical values (NaN/Inf) detected")
            }
        }
    }
}

/// Result of a solver execution.
#[derive(Debug, Clone)]
pub struct SolverResult<T> {
    /// Best iterate found
    pub parameters: T,
    pub status: OptimizationStatus,
    pub initial_cost: f64,
    pub final_cost: f64,
    /// Number of linearizations performed
    pub iterations: usize,
    pub elapsed_time: time::Duration,
    pub convergence_info: Option<ConvergenceInfo>,
}

/// Apply a stacked tangent step to all variables with manifold right-plus.
///
/// `step` holds one tangent segment per variable, in `variable_order`. Returns `‖step‖`.
pub fn apply_parameter_step(
    variables: &mut HashMap<String, VariableEnum>,
    step: MatRef<f64>,
    variable_order: &[String],
) -> f64 {
    let mut step_offset = 0;

    for var_name in variable_order {
        if let Some(var) = variables.get_mut(var_name) {
            let var_size = var.get_size();
            let var_step = step.subrows(step_offset, var_size);
            var.apply_tangent_step(var_step);
            step_offset += var_size;
        }
    }

    step.norm_l2()
}

/// `½‖r‖²`
pub fn compute_cost(residual: &Mat<f64>) -> f64 {
    let cost = residual.norm_l2();
    0.5 * cost * cost
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::variable::Variable;
    use crate::manifold::se3::SE3;
    use nalgebra::dvector;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[test]
    fn test_apply_parameter_step_splits_by_order() -> TestResult {
        let mut variables = HashMap::new();
        variables.insert(
            "a".to_string(),
            VariableEnum::Rn(Variable::from_vector(dvector![1.0, 2.0])),
        );
        variables.insert("b".to_string(), VariableEnum::SE3(Variable::new(SE3::identity())));
        let order = vec!["a".to_string(), "b".to_string()];

        let step = Mat::from_fn(8, 1, |i, _| if i < 2 { 0.5 } else if i == 2 { 0.1 } else { 0.0 });
        let norm = apply_parameter_step(&mut variables, step.as_ref(), &order);

        assert!((norm - (0.5f64 * 0.5 * 2.0 + 0.01).sqrt()).abs() < 1e-12);
        let a = variables.get("a").ok_or("missing a")?.to_vector();
        assert_eq!(a, dvector![1.5, 2.5]);
        let b = variables.get("b").ok_or("missing b")?.to_vector();
        assert!((b[0] - 0.1).abs() < 1e-12);
        Ok(())
    }

    #[test]
    fn test_compute_cost() {
        let residual = Mat::from_fn(2, 1, |i, _| if i == 0 { 3.0 } else { 4.0 });
        assert!((compute_cost(&residual) - 12.5).abs() < 1e-12);
        let empty = Mat::<f64>::zeros(0, 1);
        assert_eq!(compute_cost(&empty), 0.0);
    }

    #[test]
    fn test_status_convergence_flags() {
        assert!(OptimizationStatus::GradientToleranceReached.is_converged());
        assert!(!OptimizationStatus::MaxIterationsReached.is_converged());
        assert_eq!(OptimizationStatus::Timeout.to_string(), "Timeout");
    }
}
