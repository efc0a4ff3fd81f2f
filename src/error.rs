//! Error types for the apex-ik library
//!
//! Every module owns a `thiserror` enum describing its own failures. Public entry points
//! return [`ApexIkResult`], whose error wraps the module errors transparently so the
//! original message and source chain survive.
//!
//! Example error chain:
//! ```text
//! ApexIkError::Ik(
//!     IkError::LinkOutOfRange { link: 9, num_links: 7 }
//! )
//! ```

use crate::{
    collision::CollisionError, core::CoreError, factors::FactorError, ik::IkError,
    kinematics::KinematicsError, linalg::LinAlgError, manifold::ManifoldError,
    optimizer::OptimizerError,
};
use std::error::Error as StdError;
use thiserror::Error;

/// Main result type used throughout the apex-ik library
pub type ApexIkResult<T> = Result<T, ApexIkError>;

/// Top-level error exposed by the public API.
///
/// ```rust,ignore
/// if let Err(e) = solve_ik(&model, &targets, &q0, &weights, &options) {
///     warn!("Full chain: {}", e.chain());
/// }
/// ```
#[derive(Debug, Error)]
pub enum ApexIkError {
    /// Problem construction, variables and factor evaluation
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Malformed factor inputs
    #[error(transparent)]
    Factor(#[from] FactorError),

    /// Optimization algorithm errors
    #[error(transparent)]
    Optimizer(#[from] OptimizerError),

    /// Linear algebra errors
    #[error(transparent)]
    LinearAlgebra(#[from] LinAlgError),

    /// Manifold operation errors
    #[error(transparent)]
    Manifold(#[from] ManifoldError),

    /// Forward kinematics or Jacobian evaluation failed
    #[error(transparent)]
    Kinematics(#[from] KinematicsError),

    /// Collision distance evaluation failed
    #[error(transparent)]
    Collision(#[from] CollisionError),

    /// Invalid IK request
    #[error(transparent)]
    Ik(#[from] IkError),
}

impl ApexIkError {
    /// Full error chain, one cause per line.
    pub fn chain(&self) -> String {
        let mut chain = vec![self.to_string()];
        let mut source = self.source();

        while let Some(err) = source {
            chain.push(format!("  → {}", err));
            source = err.source();
        }

        chain.join("\n")
    }

    /// Single-line error chain for logging
    ///
    /// ```rust,ignore
    /// error!("Solve failed: {}", err.chain_compact());
    /// ```
    pub fn chain_compact(&self) -> String {
        let mut chain = vec![self.to_string()];
        let mut source = self.source();

        while let Some(err) = source {
            chain.push(err.to_string());
            source = err.source();
        }

        chain.join(" → ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apex_ik_error_display() {
        let error = ApexIkError::from(LinAlgError::SingularMatrix);
        assert!(error.to_string().contains("Singular matrix"));
    }

    #[test]
    fn test_apex_ik_error_chain() {
        let error = ApexIkError::from(LinAlgError::FactorizationFailed(
            "Cholesky factorization failed".to_string(),
        ));

        let chain = error.chain();
        assert!(chain.contains("factorization"));
        assert!(chain.contains("Cholesky"));
    }

    #[test]
    fn test_apex_ik_error_chain_compact() {
        let error = ApexIkError::from(KinematicsError::LinkOutOfRange {
            link: 12,
            num_links: 4,
        });
        assert!(error.chain_compact().contains("12"));
    }

    #[test]
    fn test_transparent_error_conversion() {
        let apex_error: ApexIkError = IkError::EmptyTargets.into();
        assert!(matches!(apex_error, ApexIkError::Ik(IkError::EmptyTargets)));

        let apex_error: ApexIkError = ManifoldError::DimensionMismatch {
            expected: 7,
            actual: 6,
        }
        .into();
        assert!(matches!(apex_error, ApexIkError::Manifold(_)));
    }
}
