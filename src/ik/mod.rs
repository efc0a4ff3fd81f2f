//! Inverse kinematics on top of the factor-graph solver.
//!
//! [`solve_ik`] matches one or more link poses, optionally with a floating base, while joint
//! limits, velocity limits, a rest configuration and (optionally) manipulability shape the
//! solution. [`solve_ik_with_coll`] adds self-collision and world-collision margins.
//!
//! A request is validated and turned into an [`IkProblem`]: a fixed list of [`IkFactor`]s
//! over the variables `"joints"` (Rⁿ) and, with a floating base, `"base"` (SE(3)). The
//! problem is then handed to [`LevenbergMarquardt`](crate::optimizer::LevenbergMarquardt).
//!
//! Failing to converge within the iteration budget is not an error: the returned
//! [`SolveReport`] carries the engine status and a warning is logged.

use std::fmt;

use thiserror::Error;
use tracing::error;
use web_time::Duration;

use crate::optimizer::{OptimizationStatus, SolverResult};

pub mod assembler;
pub mod config;
pub mod solve;

pub use assembler::{BASE_VARIABLE, IkFactor, IkProblem, JOINTS_VARIABLE};
pub use config::{BasePose, CollisionIkWeights, IkConfig, IkOptions, IkWeights, JointWeights};
pub use solve::{CollisionIkSolution, IkSolution, solve_ik, solve_ik_with_coll};

/// Malformed IK requests, rejected before any iteration.
#[derive(Debug, Clone, Error)]
pub enum IkError {
    #[error("At least one pose target is required")]
    EmptyTargets,

    #[error("Target link {link} out of range for a model with {num_links} links")]
    LinkOutOfRange { link: usize, num_links: usize },

    #[error("{what} has {actual} entries, expected {expected}")]
    LengthMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("{what} must be finite and non-negative, got {value}")]
    InvalidWeight { what: &'static str, value: f64 },

    #[error("Time step must be finite and positive, got {0}")]
    InvalidTimeStep(f64),

    #[error("{what} must be finite and non-negative, got {value}")]
    InvalidMargin { what: &'static str, value: f64 },

    #[error("Locked base DOF {0} out of range, tangent indices are 0..6")]
    InvalidLockedDof(usize),

    #[error("{0} contains non-finite values")]
    NonFinite(&'static str),
}

impl IkError {
    #[must_use]
    pub fn log(self) -> Self {
        error!("{}", self);
        self
    }
}

pub type IkResult<T> = Result<T, IkError>;

/// Outcome of the engine run behind an IK solve.
#[derive(Debug, Clone)]
pub struct SolveReport {
    pub status: OptimizationStatus,
    pub iterations: usize,
    pub initial_cost: f64,
    pub final_cost: f64,
    /// ‖Jᵀr‖ at the returned configuration
    pub gradient_norm: f64,
    pub elapsed: Duration,
}

impl SolveReport {
    pub fn is_converged(&self) -> bool {
        self.status.is_converged()
    }
}

impl<T> From<&SolverResult<T>> for SolveReport {
    fn from(result: &SolverResult<T>) -> Self {
        SolveReport {
            status: result.status,
            iterations: result.iterations,
            initial_cost: result.initial_cost,
            final_cost: result.final_cost,
            gradient_norm: result
                .convergence_info
                .as_ref()
                .map_or(f64::NAN, |info| info.final_gradient_norm),
            elapsed: result.elapsed_time,
        }
    }
}

impl fmt::Display for SolveReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} after {} iterations, cost {:.3e} -> {:.3e}, |gradient| {:.2e}, {:.2}ms",
            self.status,
            self.iterations,
            self.initial_cost,
            self.final_cost,
            self.gradient_norm,
            self.elapsed.as_secs_f64() * 1000.0
        )
    }
}
